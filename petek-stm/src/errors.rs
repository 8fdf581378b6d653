use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StmError {
    /// The attempt observed state committed after its birth timestamp, or could
    /// not lock its write-set. Discard the attempt and run it again.
    #[error("transaction conflict, attempt must be retried")]
    Conflict,
    /// A bounded retry policy ran out of attempts.
    #[error("transaction gave up after {attempts} conflicting attempts")]
    Exhausted { attempts: u32 },
}

impl StmError {
    /// Returns true if the error only asks for the attempt to be re-run.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StmError::Conflict)
    }
}
