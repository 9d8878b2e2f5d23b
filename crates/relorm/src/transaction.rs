//! Transaction scoping.

#![allow(clippy::result_large_err)]

use relorm_core::error::{TransactionError, TransactionErrorKind};
use relorm_core::{Driver, Error, Result};

use crate::database::Database;

impl<D: Driver> Database<D> {
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` succeeds and rolls back when it fails. A failed
    /// commit is rolled back too. Nesting is not supported.
    pub fn run_in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        if self.in_transaction.get() {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NestedNotSupported,
                message: "Transaction already active".to_string(),
            }));
        }
        self.begin()?;
        match f(self).and_then(|value| self.commit().map(|()| value)) {
            Ok(value) => Ok(value),
            Err(err) => {
                if let Err(rollback) = self.rollback() {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
