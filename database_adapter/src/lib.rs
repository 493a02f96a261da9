pub mod db;
pub mod model;

pub use db::{DbError, LedgerStore, PostgresLedger};

#[cfg(test)]
mod tests;
