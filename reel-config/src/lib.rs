//! Configuration for the Reel CLI and server.
//!
//! The configuration lives in a folder containing a `config.yml`. All sections are optional and
//! fall back to sensible defaults, with the exception of `auth.token_secret`, which must be set
//! before the server can start:
//!
//! ```yaml
//! reel:
//!   host: 0.0.0.0
//!   port: 9000
//!   shard_id: 3
//! auth:
//!   token_secret: "3dJX0wd0J2yGOHe2vW5xSaMz9LzFg3pcQnsyWH1QmvuMZrn0NAd31oa5RZDu2cR9"
//! projects:
//!   - project_id: 1
//!     project_key: "web-shop"
//!     sample_rate: 50
//! ```
//!
//! Values can be overridden from the command line and environment through [`OverridableConfig`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod byte_size;
mod config;
mod projects;

pub use crate::byte_size::*;
pub use crate::config::*;
pub use crate::projects::*;
