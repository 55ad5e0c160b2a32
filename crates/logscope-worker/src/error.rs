use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker stopped, or every receiver of its events was dropped
    #[error("Worker channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, WorkerError>;
