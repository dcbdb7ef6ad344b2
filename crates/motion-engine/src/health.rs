//! Per-controller communication health.
//!
//! A single bad exchange is absorbed silently; the second consecutive
//! one is a real failure. Any good exchange heals the instance no
//! matter how far gone it was.

/// Tri-state reliability tracker for one controller instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommHealth {
    #[default]
    Normal,
    /// One exchange failed; the poll cycle reports "no new status" and
    /// the axis is not failed yet.
    Retry,
    /// Consecutive failures; the axis surfaces `problem` + `comm_error`
    /// and any in-flight motion is terminated as failed.
    CommError,
}

impl CommHealth {
    /// Transition on a successful exchange.
    pub fn on_success(self) -> Self {
        CommHealth::Normal
    }

    /// Transition on a failed exchange (timeout, malformed reply or I/O
    /// error).
    pub fn on_failure(self) -> Self {
        match self {
            CommHealth::Normal => CommHealth::Retry,
            CommHealth::Retry | CommHealth::CommError => CommHealth::CommError,
        }
    }

    pub fn is_failed(self) -> bool {
        self == CommHealth::CommError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Every (state, outcome) pair has a defined transition, and
    // CommError never steps back to Retry.
    #[test]
    fn transition_table_is_total() {
        assert_eq!(CommHealth::Normal.on_failure(), CommHealth::Retry);
        assert_eq!(CommHealth::Retry.on_failure(), CommHealth::CommError);
        assert_eq!(CommHealth::CommError.on_failure(), CommHealth::CommError);

        assert_eq!(CommHealth::Normal.on_success(), CommHealth::Normal);
        assert_eq!(CommHealth::Retry.on_success(), CommHealth::Normal);
        assert_eq!(CommHealth::CommError.on_success(), CommHealth::Normal);
    }

    #[test]
    fn only_commerror_counts_as_failed() {
        assert!(!CommHealth::Normal.is_failed());
        assert!(!CommHealth::Retry.is_failed());
        assert!(CommHealth::CommError.is_failed());
    }
}
