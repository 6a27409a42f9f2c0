pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod server;
pub mod storage;

pub use config::LedgerConfig;
pub use domain::LedgerService;
pub use error::{LedgerError, Result};
