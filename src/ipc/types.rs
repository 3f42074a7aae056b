use rusqlite::Connection;
use serde::Deserialize;
use std::path::PathBuf;

/// One request line from the host process.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon state between requests: the selected workspace and its open
/// database. Every engine call borrows the connection from here.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
