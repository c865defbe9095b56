use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("gateway already registered: {0}")]
    AlreadyRegistered(String),

    #[error("gateway not registered: {0}")]
    NotRegistered(String),

    #[error("no free process")]
    NoFreeProcess,
}

pub type Result<T> = std::result::Result<T, Error>;
