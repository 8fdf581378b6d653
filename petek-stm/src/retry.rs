/// How [`Stm::atomically`](crate::Stm::atomically) reacts to a conflicting
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Re-run immediately, forever.
    ///
    /// Under pathological contention a set of transactions can keep
    /// invalidating each other and never make progress.
    #[default]
    Forever,
    /// Spin, then yield, with exponentially growing pauses between attempts.
    /// With `max_attempts` set, give up with
    /// [`StmError::Exhausted`](crate::StmError::Exhausted) after that many
    /// conflicting attempts.
    Backoff { max_attempts: Option<u32> },
}

impl RetryPolicy {
    /// Unbounded retries with backoff.
    pub const fn backoff() -> Self {
        RetryPolicy::Backoff { max_attempts: None }
    }

    /// At most `max_attempts` attempts, with backoff between them.
    pub const fn bounded(max_attempts: u32) -> Self {
        RetryPolicy::Backoff {
            max_attempts: Some(max_attempts),
        }
    }

    /// Returns true if the policy can give up.
    pub fn is_bounded(&self) -> bool {
        matches!(
            self,
            RetryPolicy::Backoff {
                max_attempts: Some(_)
            }
        )
    }
}
