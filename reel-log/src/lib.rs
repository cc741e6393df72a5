//! Error reporting and logging facade for Reel.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with [`logging`](LogConfig) and
//! [`sentry`](SentryConfig) configuration. The configuration implements `serde` traits, so it can
//! be obtained from configuration files.
//!
//! ```ignore
//! use reel_log::{LogConfig, SentryConfig};
//!
//! let log_config = LogConfig {
//!     enable_backtraces: true,
//!     ..LogConfig::default()
//! };
//!
//! reel_log::init(&log_config, &SentryConfig::default());
//! ```
//!
//! # Logging
//!
//! Log through the five macros [`error!`], [`warn!`], [`info!`], [`debug!`] and [`trace!`]. They
//! accept format strings like [`println!`] and structured fields like `tracing`.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages over verbose text. Choose the log level according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior. This will also be reported to Sentry.
//! - [`warn!`] for undesirable behavior.
//! - [`info!`] for messages relevant to the average user.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.
//!
//! ## Logging Error Types
//!
//! To log errors with all their causes, use the [`LogError`] wrapper:
//!
//! ```
//! use std::io::{Error, ErrorKind};
//! use reel_log::LogError;
//!
//! let custom_error = Error::new(ErrorKind::Other, "oh no!");
//! reel_log::error!("operation failed: {}", LogError(&custom_error));
//! ```
//!
//! # Testing
//!
//! For unit testing, call [`init_test!`] at the beginning of the test. It captures logs of the
//! calling crate in the output of the test runner.
//!
//! ```ignore
//! #[test]
//! fn test_something() {
//!     reel_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
mod test;
#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};

// Expose the minimal error reporting API.
#[cfg(feature = "sentry")]
#[doc(inline)]
pub use sentry::{Hub, capture_error, configure_scope, protocol, with_scope};
