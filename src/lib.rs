//! MyTunnel Pool - pooled byte buffers for the data path
//!
//! This library provides an arena allocator that leases byte buffers out of
//! shared chunks, resizes them in place when it can, and recycles both the
//! memory and the handle objects once buffers are released.

pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod util;

pub use config::Config;
pub use error::PoolError;
pub use pool::{DerivedBuf, PoolArena, PooledBuf};

/// Library version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
