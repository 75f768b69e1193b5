use thiserror::Error;

#[derive(Error, Debug)]
pub enum KVError {
    /// The backend refused the write for lack of space (quota, full disk).
    /// Recoverable by writing somewhere else.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KVError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, KVError::Unavailable(_))
    }
}
