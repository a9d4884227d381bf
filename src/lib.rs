pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod job;
pub mod logging;
pub mod plan;
pub mod redact;
pub mod selector;
pub mod store;

pub use error::JobError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
