use thiserror::Error;

/// Storage engine error types
#[derive(Error, Debug)]
pub enum BurrowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("out of memory: no free frame and no evictable page")]
    OutOfMemory,

    #[error("disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("index header page is full")]
    HeaderFull,
}

pub type Result<T> = std::result::Result<T, BurrowError>;
