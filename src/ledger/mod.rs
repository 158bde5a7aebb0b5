//! Ledger module containing invoice management and bank transaction imports

pub mod bank_transaction;
pub mod invoice;

pub use bank_transaction::*;
pub use invoice::*;
