//! rproxy is a rule-based HTTP/HTTPS reverse proxy.
//!
//! Every incoming request is matched against an ordered rule table of
//! host pattern, path regex, optional rewrite and target. The first rule
//! that matches decides where the request goes; its path may be rewritten
//! through the rule's regex before the exchange is streamed to the
//! backend. Requests no rule matches get `404`. An optional HTTPS
//! listener terminates TLS and relays the decrypted traffic to the
//! plaintext listener, so both take the same routing path.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, init, validate).
//! - [`config`] -- Rule-table loading and validation via the
//!   [`ConfigSource`](config::ConfigSource) trait.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`proxy`] -- Rule matching, path rewriting, header construction and
//!   streaming forwarding.
//! - [`server`] -- Listeners, shared state, HTTP client and graceful shutdown.
//! - [`tls`] -- Key and certificate loading for the HTTPS listener.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML rule tables _(enabled by default)_ |
//! | `json` | JSON rule tables |
//! | `toml` | TOML rule tables |
//! | `file-backends` | All file formats |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod tls;
