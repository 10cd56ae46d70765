pub mod merkle;
pub mod store;

pub use store::{Ledger, Store, Txn};
