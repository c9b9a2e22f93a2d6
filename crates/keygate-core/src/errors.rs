use keygate_channel::ChannelError;
use keygate_storage::StorageError;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("no active keys available in group {0}")]
    NoActiveKeys(String),
    /// Non-2xx from the provider, reason already passed through the shared
    /// upstream-error parser.
    #[error("upstream error [status {status}]: {reason}")]
    Upstream { status: u16, reason: String },
    /// Ciphertext could not be decrypted. A system fault, not a credential
    /// fault: the key's status is left alone.
    #[error("failed to decrypt api key {key_id}")]
    Decryption { key_id: i64 },
    #[error("no models returned from provider")]
    EmptyModelList,
    #[error("unexpected response format")]
    UnexpectedResponseFormat,
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CoreError {
    pub fn group_not_found(name: &str) -> Self {
        CoreError::NotFound(format!("group '{name}'"))
    }
}
