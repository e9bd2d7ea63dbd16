/// The error taxonomy shared by every component in this crate.
///
/// End-of-stream and end-of-channel are deliberately not variants here: a
/// stream signals its end with an empty `Bytes`, and a channel signals its
/// end with `None`. Only genuine failures live in this enum.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key not found")]
    NotFound,

    #[error("resource is closed")]
    Closed,

    #[error("resource is broken: {0}")]
    Broken(String),

    #[error("operation would block")]
    WouldBlock,

    #[error("tee is busy: a receive is already in flight")]
    TeeBusy,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
