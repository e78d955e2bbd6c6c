pub mod http;
pub mod steam;
pub mod steamspy;
