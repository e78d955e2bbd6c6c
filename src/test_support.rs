//! Minimal HTTP/1.1 responder for exercising the clients against canned
//! upstream payloads.

use reqwest::StatusCode;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
struct Reply {
    status: u16,
    body: String,
}

#[derive(Default)]
struct Routes {
    /// Replies are consumed in order; the last one is sticky.
    replies: HashMap<String, VecDeque<Reply>>,
    /// Query strings of every request, per path.
    requests: HashMap<String, Vec<String>>,
    /// Held before each reply is sent.
    latency: Duration,
    in_flight: usize,
    peak_in_flight: usize,
}

#[derive(Clone)]
pub struct FakeApi {
    base: String,
    routes: Arc<Mutex<Routes>>,
}

impl FakeApi {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let routes = Arc::new(Mutex::new(Routes::default()));

        let shared = Arc::clone(&routes);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = serve(stream, routes).await;
                });
            }
        });

        Self { base, routes }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn respond_json(&self, path: &str, body: Value) {
        self.push(path, Reply {
            status: 200,
            body: body.to_string(),
        });
    }

    pub fn respond_status(&self, path: &str, status: u16, times: usize) {
        for _ in 0..times {
            self.push(path, Reply {
                status,
                body: "{}".to_string(),
            });
        }
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests(path).len()
    }

    pub fn requests(&self, path: &str) -> Vec<String> {
        let routes = self.routes.lock().unwrap();
        routes.requests.get(path).cloned().unwrap_or_default()
    }

    pub fn set_latency(&self, latency: Duration) {
        self.routes.lock().unwrap().latency = latency;
    }

    /// Most requests ever being served at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.routes.lock().unwrap().peak_in_flight
    }

    fn push(&self, path: &str, reply: Reply) {
        let mut routes = self.routes.lock().unwrap();
        routes
            .replies
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }
}

async fn serve(mut stream: TcpStream, routes: Arc<Mutex<Routes>>) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buffer.windows(4).any(|w| w == b"\r\n\r\n") {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..read]);
    }

    let request = String::from_utf8_lossy(&buffer);
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target.clone(), String::new()),
    };

    let (reply, latency) = {
        let mut routes = routes.lock().unwrap();
        routes.requests.entry(path.clone()).or_default().push(query);
        routes.in_flight += 1;
        routes.peak_in_flight = routes.peak_in_flight.max(routes.in_flight);
        let reply = match routes.replies.get_mut(&path) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        (reply, routes.latency)
    };
    let reply = reply.unwrap_or(Reply {
        status: 404,
        body: "{}".to_string(),
    });

    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
    routes.lock().unwrap().in_flight -= 1;

    let reason = StatusCode::from_u16(reply.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.status,
        reason,
        reply.body.len(),
        reply.body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
