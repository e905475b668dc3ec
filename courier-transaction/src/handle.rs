use std::fmt;

use ulid::Ulid;

/// Identity of one unit of work driven by a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionHandle(Ulid);

impl TransactionHandle {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TransactionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Token returned by `create_savepoint`.
///
/// The participant keeps no partial state, so rolling back to a savepoint
/// leaves it untouched; the coordinator owns savepoint semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint {
    transaction: TransactionHandle,
}

impl Savepoint {
    pub(crate) const fn new(transaction: TransactionHandle) -> Self {
        Self { transaction }
    }

    #[must_use]
    pub const fn transaction(&self) -> TransactionHandle {
        self.transaction
    }

    pub const fn rollback(&self) {}
}
