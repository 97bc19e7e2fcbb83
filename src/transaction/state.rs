// src/transaction/state.rs

//! Per-package transaction state machine

use crate::error::Error;
use std::fmt;
use tracing::{debug, warn};

/// Where a package transaction currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Created, no step started yet
    Pending,
    Fetching,
    Parsing,
    VerifyingDeps,
    CheckingConflicts,
    Extracting,
    Recording,
    Done,
    Failed,
}

impl TransactionState {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionState::Pending => "pending",
            TransactionState::Fetching => "fetching",
            TransactionState::Parsing => "parsing",
            TransactionState::VerifyingDeps => "verifying dependencies",
            TransactionState::CheckingConflicts => "checking conflicts",
            TransactionState::Extracting => "extracting",
            TransactionState::Recording => "recording",
            TransactionState::Done => "done",
            TransactionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Done | TransactionState::Failed)
    }

    /// Whether failing in this state leaves filesystem changes to undo
    pub fn touches_filesystem(&self) -> bool {
        matches!(self, TransactionState::Extracting | TransactionState::Recording)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One package's pass through the pipeline
#[derive(Debug)]
pub struct Transaction {
    package: String,
    state: TransactionState,
}

impl Transaction {
    pub fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            state: TransactionState::Pending,
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Move to the next state
    ///
    /// Terminal states are final; advancing out of one is ignored.
    pub fn advance(&mut self, next: TransactionState) {
        if self.state.is_terminal() {
            warn!(
                "Ignoring transition {} -> {} for finished transaction {}",
                self.state, next, self.package
            );
            return;
        }
        debug!("{}: {} -> {}", self.package, self.state, next);
        self.state = next;
    }

    /// Mark the transaction failed, returning the state it failed in
    pub fn fail(&mut self, error: &Error) -> TransactionState {
        let failed_in = self.state;
        if failed_in != TransactionState::Failed {
            warn!("{}: failed while {}: {}", self.package, failed_in, error);
            self.state = TransactionState::Failed;
        }
        failed_in
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let mut txn = Transaction::new("foo");
        assert_eq!(txn.state(), TransactionState::Pending);

        txn.advance(TransactionState::Fetching);
        txn.advance(TransactionState::Parsing);
        assert_eq!(txn.state(), TransactionState::Parsing);

        let failed_in = txn.fail(&Error::ParseError("bad".to_string()));
        assert_eq!(failed_in, TransactionState::Parsing);
        assert_eq!(txn.state(), TransactionState::Failed);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut txn = Transaction::new("foo");
        txn.advance(TransactionState::Done);
        txn.advance(TransactionState::Extracting);
        assert_eq!(txn.state(), TransactionState::Done);
    }

    #[test]
    fn test_filesystem_states() {
        assert!(TransactionState::Extracting.touches_filesystem());
        assert!(TransactionState::Recording.touches_filesystem());
        assert!(!TransactionState::CheckingConflicts.touches_filesystem());
        assert_eq!(TransactionState::VerifyingDeps.to_string(), "verifying dependencies");
    }
}
