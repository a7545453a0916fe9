pub mod amount;
pub mod batcher;
pub mod cache;
pub mod config;
pub mod csv;
pub mod engine;
pub mod hydrate;
pub mod id;
pub mod ledger;
pub mod model;
pub mod store;

pub use amount::Amount;
pub use batcher::Batcher;
pub use config::Config;
pub use engine::{AccountingEngine, MemoryEngine};
pub use ledger::{Ledger, LedgerError, TransferFailure};
pub use model::LedgerEvent;
pub use store::{CachedSpecStore, MemorySpecStore, SpecStore};
