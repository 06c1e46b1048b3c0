//! wallet_ledger Library
//!
//! Wallet ledger and settlement engine: accounts, balances, an append-only
//! journal, and the deposit, withdrawal and gateway-callback flows that move
//! money through them under distributed locks.

pub mod accounts;
pub mod balance;
pub mod config;
pub mod db;
pub mod domain;
pub mod gateway;
pub mod handlers;
pub mod jobs;
pub mod journal;
pub mod ledger;
pub mod lock;
pub mod store;

mod error;

pub use config::{Config, LedgerConfig};
pub use domain::{Amount, AmountError, Balance, DomainError, OperationContext};
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use ledger::Ledger;
