//! # quip-mirror
//!
//! Mirrors a Quip folder tree onto the local filesystem. Every document is
//! saved three times: its raw HTML, a Markdown rendering and the binary
//! export the service produces for its type (docx, xlsx or pdf).
//!
//! ## Layout
//! - [`rate_limit`]: sliding-window limiter shared by every outgoing request
//! - [`client`]: HTTP client implementing [`contract::Workspace`]
//! - [`export`]: turns one document into its local files
//! - [`synchronise`]: walks the folder tree and aggregates a report
//! - [`load_config`] / [`config`]: YAML file, environment and flag handling
//! - [`cli`]: the `quip-mirror` command line
//!
//! The traits in [`contract`] are the seams between the remote service, the
//! traversal and the filesystem; mocks are generated for tests.

pub mod cli;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod export;
pub mod load_config;
pub mod markdown;
pub mod rate_limit;
pub mod synchronise;

pub use cli::{run, Cli, Commands};
pub use client::QuipClient;
pub use export::{ExportWriter, FsStore};
pub use rate_limit::RateLimiter;
pub use synchronise::{synchronise, SynchroniseReport};
