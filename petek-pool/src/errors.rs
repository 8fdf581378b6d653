use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// The task panicked while running.
    #[error("task panicked")]
    Panicked,
    /// The task was dropped without ever running.
    #[error("task dropped before it ran: pool shut down")]
    Shutdown,
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
