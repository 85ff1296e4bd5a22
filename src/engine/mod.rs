// 10.0: the ledger service. coordinates sessions, allocations, bilateral trades,
// order matching, price ticks and settlement over an injected store.
// every mutation is read, validate, commit under the session lock.

mod config;
mod core;
mod locks;
mod orders;
mod pricing;
mod results;
mod sessions;
mod settlement;
mod trading;

pub use config::EngineConfig;
pub use self::core::Ledger;
pub use results::{ErrorKind, LedgerError, OrderResult};
