//! Services and collaborators used by the endpoints.
//!
//! - [`negotiation`]: settings agreed on per session.
//! - [`queue`]: hand-off of session messages to the downstream queue.
//! - [`server`]: the HTTP server.
//!
//! The remaining modules define narrow contracts to external systems and the implementations
//! shipped with Reel: [`projects`], [`clients`], [`geo`], [`sessions`], [`flags`] and
//! [`storage`].

pub mod clients;
pub mod flags;
pub mod geo;
pub mod negotiation;
pub mod projects;
pub mod queue;
pub mod server;
pub mod sessions;
pub mod storage;
