//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (run, init, validate), and their associated argument
//! structs. Every `run` flag has an environment variable equivalent
//! for container deployments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "rproxy",
    version,
    about = "Rule-based HTTP/HTTPS reverse proxy",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        rproxy init                     Create a starter rule table\n  \
        rproxy run                      Start with ./rproxy.yaml\n  \
        rproxy run -c rules.yaml        Start with a specific rule table"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy
    Run(Box<RunArgs>),

    /// Generate a starter rule table
    Init(InitArgs),

    /// Validate a rule table without starting
    Validate(ValidateArgs),
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        rproxy run                                         Auto-detect config\n  \
        rproxy run -c rules.yaml -p 8080 --tls-port 8443   Unprivileged ports\n  \
        rproxy run --tls-key key.pem --tls-cert cert.pem   Custom TLS material")]
pub struct RunArgs {
    /// Rule table file path (.yaml, .json, .toml)
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Plaintext listen port
    #[arg(short, long, env = "PORT", default_value_t = 80)]
    pub port: u16,

    /// TLS listen port
    #[arg(long, env = "TLS_PORT", default_value_t = 443)]
    pub tls_port: u16,

    /// Listen address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    // -- TLS --
    /// PEM private key; TLS stays off when missing
    #[arg(
        long,
        env = "TLS_KEY",
        default_value = "./priv.pem",
        help_heading = "TLS"
    )]
    pub tls_key: PathBuf,

    /// PEM certificate chain; TLS stays off when missing
    #[arg(
        long,
        env = "TLS_CERT",
        default_value = "./cert.pem",
        help_heading = "TLS"
    )]
    pub tls_cert: PathBuf,

    // -- Logging --
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,

    // -- Tuning --
    /// Backend response timeout in milliseconds (overrides the rule table)
    #[arg(long, env = "REQUEST_TIMEOUT_MS", help_heading = "Tuning")]
    pub timeout: Option<u64>,

    /// Do not add X-Forwarded-* headers (overrides the rule table)
    #[arg(long, help_heading = "Tuning")]
    pub no_forward_headers: bool,
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        rproxy init                          Starter rule table (yaml)\n  \
        rproxy init --full                   With every option documented\n  \
        rproxy init -f toml -o rules.toml    TOML format")]
pub struct InitArgs {
    /// Output format
    #[arg(short, long, default_value = "yaml")]
    pub format: ConfigFormat,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Include every option, documented
    #[arg(long)]
    pub full: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Rule table file to validate
    #[arg(default_value = "rproxy.yaml")]
    pub config: PathBuf,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ValidateFormat,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}
