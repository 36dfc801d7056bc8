//! # pblog sim
//!
//! Record and replay of simulation topic traffic.
//!
//! The crate plugs into a simulation runtime through the [`host::SimModule`]
//! trait. Two modules are provided:
//!
//! - [`Recorder`] subscribes to a set of topics and writes everything it
//!   receives to a `.pblog` file, one file per scenario run
//! - [`Player`] reads a `.pblog` file and publishes its messages again,
//!   paced by the simulation clock
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       pblog-sim                          │
//! │  ┌──────────────┐                    ┌──────────────┐    │
//! │  │  Recorder    │                    │   Player     │    │
//! │  │  (SimModule) │                    │  (SimModule) │    │
//! │  └──────┬───────┘                    └──────▲───────┘    │
//! │         ▼                                   │            │
//! │  ┌──────────────┐   .pblog file     ┌──────────────┐     │
//! │  │  WriteQueue  │ ───────────────▶  │  ReadQueue   │     │
//! │  │ writer thread│                   │ reader thread│     │
//! │  └──────────────┘                   └──────────────┘     │
//! └──────────────────────────────────────────────────────────┘
//!                 ▲ framing & topic rules: pblog-core
//! ```
//!
//! ## Module parameters
//!
//! - `log-folder` (recorder) - output directory
//! - `channels` (both) - topics separated by `||`, default all
//! - `post-script` (recorder) - command run on each non-empty log
//! - `sync` (recorder) - 1 waits for `post-script`, 0 detaches it
//! - `queue-size` (both) - queue capacity
//! - `log-file` (player) - log to replay

pub mod config;
pub mod error;
pub mod host;
pub mod protos;
pub mod queue;
pub mod recording;

pub use error::{FormatError, ModuleError};
pub use recording::{Player, Recorder};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
