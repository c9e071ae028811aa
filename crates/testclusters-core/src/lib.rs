//! testclusters-core: lifecycle management for ephemeral Elasticsearch test nodes
//!
//! A [`Node`] takes an extracted server distribution, builds an isolated
//! working directory out of hard links, writes the node configuration,
//! installs plugins, secure settings and users through the distribution's own
//! bin scripts, launches the server and tears its whole process tree down
//! again. Nodes can be restarted in place or upgraded to the next configured
//! distribution for rolling-upgrade tests.
//!
//! # Architecture
//!
//! ```text
//! NodeSpec --freeze--> FrozenSpec
//!                          |
//!        workdir -> settings -> tools -> supervisor --> running process
//!                                                            |
//!              readiness (port files) <----------------------+
//!              log_tail (on stop) <--------------------------+
//! ```
//!
//! # Modules
//!
//! - `node`: the lifecycle facade (start, stop, restart, upgrade)
//! - `spec`: node configuration builder and its frozen form
//! - `settings`: `elasticsearch.yml` generation and override rules
//! - `workdir`: hard-linked working directory management
//! - `environment`: process environment and `ES_JAVA_OPTS`
//! - `tools`: plugin, keystore, user and module installation
//! - `supervisor`: process launch and tree termination
//! - `process_tree`: OS process inspection (`/proc`, `ps`)
//! - `readiness`: polling readiness gate
//! - `log_tail`: log error/warning aggregation and tail
//! - `reaper`: pid registration for orphan cleanup
//! - `config`: harness configuration and node manifests
//! - `logging`: tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod environment;
pub mod error;
pub mod http_wait;
pub mod log_tail;
pub mod logging;
pub mod node;
pub mod paths;
pub mod ports;
pub mod process_tree;
pub mod readiness;
pub mod reaper;
pub mod ring_buffer;
pub mod settings;
pub mod spec;
pub mod supervisor;
pub mod tools;
pub mod value;
pub mod version;
pub mod workdir;

pub use config::{FixtureConfig, NodeManifest};
pub use error::{ConfigError, Error, LifecycleError, Result, ToolError};
pub use node::Node;
pub use spec::{Distribution, ExtractedDistribution, FrozenSpec, NodeSpec, TestDistribution, UserSpec};
pub use version::Version;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
