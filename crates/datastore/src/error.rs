use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be mapped back to a domain value
    #[error("corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },
}
