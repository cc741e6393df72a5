//! Reel is the ingestion gateway for session replays.
//!
//! Browser trackers and mobile SDKs open sessions at Reel and stream batches of recorded events to
//! it. Reel decides for every request whether it starts a new session or continues a running
//! one, mints time-ordered session ids, signs session tokens, applies per-project sampling and
//! hands accepted sessions and batches to the processing queue.
//!
//! # Feature Flags
//!
//! - `processing`: Produces sessions and batches to Kafka. Without it, Reel accepts traffic but
//!   discards the queue hand-off.
//!
//! # Workspace Crates
//!
//! Reel is split into the following workspace crates:
//!
//!  - `reel`: Main entry point and command line interface.
//!  - [`reel-auth`]: Signed session tokens.
//!  - [`reel-config`]: Static configuration for the CLI and server.
//!  - [`reel-ids`]: Time-ordered session ids.
//!  - [`reel-kafka`]: Kafka-related functionality.
//!  - [`reel-log`]: Error reporting and logging.
//!  - [`reel-sampling`]: Admission of new sessions.
//!  - [`reel-server`]: Endpoints and services.
//!  - [`reel-statsd`]: High-level StatsD metric client for internal measurements.
//!
//! [`reel-auth`]: ../reel_auth/index.html
//! [`reel-config`]: ../reel_config/index.html
//! [`reel-ids`]: ../reel_ids/index.html
//! [`reel-kafka`]: ../reel_kafka/index.html
//! [`reel-log`]: ../reel_log/index.html
//! [`reel-sampling`]: ../reel_sampling/index.html
//! [`reel-server`]: ../reel_server/index.html
//! [`reel-statsd`]: ../reel_statsd/index.html

mod cli;
mod cliapp;
mod setup;

use std::process;

use reel_log::Hub;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            reel_log::ensure_error(&err);
            1
        }
    };

    Hub::current().client().map(|x| x.close(None));
    process::exit(exit_code);
}
