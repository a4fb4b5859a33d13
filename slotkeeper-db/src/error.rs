use thiserror::Error;
use tokio_rusqlite::rusqlite;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("game server not found")]
    ServerNotFound,

    #[error("player already connected to server")]
    PlayerAlreadyConnected,

    #[error("player not connected to server")]
    PlayerNotConnected,

    #[error("no free slots on server")]
    NoFreeSlots,
}

/// A status literal that is not part of the lifecycle vocabulary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

/// A server kind other than `official` or `community`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown server kind '{0}'")]
pub struct UnknownKind(pub String);

pub type Result<T> = std::result::Result<T, DbError>;
