//! Entity trait and optimistic version expectations.

use crate::error::{LedgerError, LedgerResult};

/// Entity marker + minimal interface: identity and a monotonically increasing version.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Persisted row version, bumped on every successful write.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a row write.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (fresh inserts).
    Any,
    /// Require the stored row to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> LedgerResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(LedgerError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_mismatch_is_a_conflict() {
        assert!(ExpectedVersion::Exact(3).check(3).is_ok());
        assert!(ExpectedVersion::Any.check(42).is_ok());
        let err = ExpectedVersion::Exact(3).check(4).unwrap_err();
        assert!(err.is_retryable());
    }
}
