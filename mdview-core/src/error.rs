use std::path::PathBuf;

use thiserror::Error;

use crate::path::PathRejection;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Invalid path: {0}")]
    InvalidPath(#[from] PathRejection),

    #[error("Watch target not found: {}", .0.display())]
    TargetMissing(PathBuf),

    #[error("Failed to start watch on {}: {message}", path.display())]
    WatchStartFailed { path: PathBuf, message: String },

    #[error("Session watching is not configured")]
    SessionsDisabled,

    #[error("Subscriber channel closed before the watch became active")]
    ChannelClosed,

    #[error("Watch registry is shut down")]
    RegistryClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;
