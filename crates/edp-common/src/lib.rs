//! EDP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the EDP workspace members.
//!
//! # Example
//!
//! ```no_run
//! use edp_common::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!
//!     info!("starting up");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod retry;

// Re-export commonly used types
pub use error::{EdpError, Result};
