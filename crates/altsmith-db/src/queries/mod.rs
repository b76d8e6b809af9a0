//! Database query operations.
//!
//! Each submodule owns the SQL for one table:
//!
//! - `clients` - client registration and credential state
//! - `runs` - processing run lifecycle and counters
//! - `ledger` - dedup ledger and in-flight claims
//! - `stats` - lifetime per-client counters

pub mod clients;
pub mod ledger;
pub mod runs;
pub mod stats;

use rusqlite::types::Type;

/// Surface a bad stored value (e.g. a hand-edited ID column) as a row error
/// instead of panicking inside the mapper.
pub(crate) fn column_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}
