//! Server-side error type

use shared::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Refused a connection because `max_clients` are already attached
    #[error("Server full ({max} clients)")]
    ServerFull { max: usize },
}
