//! `rproxy run`: start the proxy.
//!
//! Loads and compiles the rule table, binds the plaintext listener, then
//! brings up the TLS listener when key and certificate load. Missing or
//! unusable TLS material only disables the TLS listener; a port that cannot
//! be bound aborts startup. Both listeners stop together on SIGTERM / Ctrl+C.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cli::RunArgs;
use crate::config::model::Config;
use crate::config::sources::create_file_source;
use crate::config::{validation, ConfigSource};
use crate::error::RproxyError;
use crate::logging;
use crate::proxy::routing::RuleTable;
use crate::proxy::ForwardOptions;
use crate::server::{self, AppState, RelayState};
use crate::tls;

const CONFIG_CANDIDATES: [&str; 4] = ["rproxy.yaml", "rproxy.yml", "rproxy.json", "rproxy.toml"];

pub async fn execute(args: RunArgs) -> Result<(), RproxyError> {
    let log_format = logging::resolve_format(args.pretty, args.json);
    logging::init(&args.log_level, log_format);

    let source = resolve_config_source(args.config.as_deref()).await?;
    let mut config = source.load().await?;
    apply_overrides(&mut config, &args)?;

    tracing::info!(
        source = source.name(),
        rules = config.rules.len(),
        timeout_ms = config.defaults.timeout,
        forward_headers = config.defaults.forward_headers,
        change_origin = config.defaults.change_origin,
        "rule table loaded"
    );

    let listen = Listen::from_args(&args)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = start(&config, &listen, shutdown_rx).await?;

    tokio::spawn(async move {
        server::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    running.wait().await?;
    tracing::info!("rproxy stopped");
    Ok(())
}

/// Command-line overrides win over the rule table's defaults. The result is
/// validated again.
pub fn apply_overrides(config: &mut Config, args: &RunArgs) -> Result<(), RproxyError> {
    if let Some(timeout) = args.timeout {
        config.defaults.timeout = timeout;
    }
    if args.no_forward_headers {
        config.defaults.forward_headers = false;
    }
    validation::validate(config).map_err(|errors| RproxyError::ConfigValidation { errors })
}

/// Listener addresses and TLS material.
#[derive(Debug, Clone)]
pub struct Listen {
    pub host: IpAddr,
    pub port: u16,
    pub tls_port: u16,
    pub tls_key: PathBuf,
    pub tls_cert: PathBuf,
}

impl Listen {
    pub fn from_args(args: &RunArgs) -> Result<Self, RproxyError> {
        Ok(Self {
            host: args.host.parse()?,
            port: args.port,
            tls_port: args.tls_port,
            tls_key: args.tls_key.clone(),
            tls_cert: args.tls_cert.clone(),
        })
    }
}

/// Bound listeners, serving until the shutdown channel flips.
pub struct Running {
    pub http_addr: SocketAddr,
    /// `None` when TLS material was unavailable.
    pub https_addr: Option<SocketAddr>,
    plain: JoinHandle<Result<(), RproxyError>>,
    tls: Option<JoinHandle<()>>,
}

impl Running {
    pub async fn wait(self) -> Result<(), RproxyError> {
        let plain = self
            .plain
            .await
            .map_err(|e| RproxyError::Io(std::io::Error::other(e)))
            .and_then(|served| served);

        if let Some(handle) = self.tls {
            if plain.is_err() {
                handle.abort();
            } else if let Err(e) = handle.await {
                tracing::error!(error = %e, "HTTPS listener task failed");
            }
        }

        plain
    }
}

/// Compile `config`, bind both listeners and start serving. Nothing is
/// served unless every listener that should run is bound.
pub async fn start(
    config: &Config,
    listen: &Listen,
    shutdown: watch::Receiver<bool>,
) -> Result<Running, RproxyError> {
    let rules = RuleTable::compile(&config.rules)?;
    for (index, rule) in rules.rules().iter().enumerate() {
        tracing::info!(index, rule = %rule, "mapping");
    }
    for (index, earlier) in validation::shadowed_rules(config) {
        tracing::warn!(index, earlier, "rule repeats an earlier host and path and never matches");
    }

    let options = ForwardOptions::from(&config.defaults);
    let timeout = options.timeout;
    let state = Arc::new(AppState::new(rules, options, server::build_http_client()));

    let listener = server::bind(SocketAddr::new(listen.host, listen.port)).await?;
    let http_addr = listener.local_addr()?;

    let tls = match tls::load_acceptor(&listen.tls_key, &listen.tls_cert).await {
        Some(acceptor) => {
            let tls_listener = server::bind(SocketAddr::new(listen.host, listen.tls_port)).await?;
            let relay = Arc::new(RelayState::new(http_addr, &state, timeout));
            Some((tls_listener, acceptor, relay))
        }
        None => None,
    };

    tracing::info!(addr = %http_addr, "HTTP listener started");
    let plain = tokio::spawn(server::serve_plain(
        listener,
        server::build_router(state),
        shutdown.clone(),
    ));

    let (https_addr, tls) = match tls {
        Some((tls_listener, acceptor, relay)) => {
            let addr = tls_listener.local_addr()?;
            tracing::info!(addr = %addr, upstream = %relay.upstream, "HTTPS listener started");
            let handle = tokio::spawn(server::serve_tls(
                tls_listener,
                acceptor,
                server::build_relay_router(relay),
                shutdown,
            ));
            (Some(addr), Some(handle))
        }
        None => (None, None),
    };

    Ok(Running {
        http_addr,
        https_addr,
        plain,
        tls,
    })
}

async fn resolve_config_source(
    explicit: Option<&Path>,
) -> Result<Box<dyn ConfigSource>, RproxyError> {
    if let Some(path) = explicit {
        return create_file_source(path);
    }

    for name in &CONFIG_CANDIDATES {
        let path = PathBuf::from(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "auto-detected config file");
            return create_file_source(&path);
        }
    }

    Err(RproxyError::NoConfigSource {
        hint: "Provide --config <file> or create ./rproxy.yaml.\n  \
               Run 'rproxy init' to create a starter rule table."
            .into(),
    })
}
