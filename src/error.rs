pub type Result<T> = std::result::Result<T, StringSetError>;

/// Errors produced by set parsing and disk provisioning.
#[derive(Debug, thiserror::Error)]
pub enum StringSetError {
    #[error("string parsing failed: input is empty")]
    EmptyInput,

    #[error("failed to create scratch directory: {0}")]
    ScratchDir(#[source] std::io::Error),

    #[error("disk store error: {0}")]
    Store(#[from] rusqlite::Error),
}
