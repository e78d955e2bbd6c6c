mod clients;
mod storage;

pub use clients::{
    http::HttpFetcher,
    steam::{ReviewQuery, ReviewWindow, SteamClient},
    steamspy::{numeric, split_catalogue_page, SteamSpyClient, HIDDEN_APPID},
};
pub use storage::fs_store::FileSystemStore;
