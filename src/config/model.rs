//! Serde data structures for the rule-table file.
//!
//! Contains [`Config`] (the root), [`RuleConfig`] and [`Defaults`]. All
//! types derive `Serialize` and `Deserialize` with `deny_unknown_fields`
//! for strict parsing. These are the raw, uncompiled shapes; the
//! matcher works on [`RuleTable`](crate::proxy::routing::RuleTable).

use serde::{Deserialize, Serialize};

/// Host pattern that matches every `Host` header.
pub const ANY_HOST: &str = "*";

const fn default_timeout() -> u64 {
    30_000
}

const fn default_true() -> bool {
    true
}

fn default_host() -> String {
    ANY_HOST.to_string()
}

fn is_default_timeout(v: &u64) -> bool {
    *v == default_timeout()
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_any_host(v: &str) -> bool {
    v == ANY_HOST
}

fn is_default_defaults(v: &Defaults) -> bool {
    v.timeout == default_timeout() && v.forward_headers && !v.change_origin
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "is_default_defaults")]
    pub defaults: Defaults,

    pub rules: Vec<RuleConfig>,
}

impl Config {
    /// The table shipped by `rproxy init`: `/cms` and `/site` pass through,
    /// everything else is rewritten under `/site`.
    #[must_use]
    pub fn starter() -> Self {
        let target = "http://127.0.0.1:8080";
        Self {
            defaults: Defaults::default(),
            rules: vec![
                RuleConfig::new("^/cms(/|$)", None, target),
                RuleConfig::new("^/site(/|$)", None, target),
                RuleConfig::new("^", Some("/site"), target),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Time allowed for the backend to produce a response head, in ms.
    #[serde(
        default = "default_timeout",
        skip_serializing_if = "is_default_timeout"
    )]
    pub timeout: u64,

    /// Add `X-Forwarded-*` headers to outbound requests.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub forward_headers: bool,

    /// Rewrite `Host` to the target authority instead of preserving it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub change_origin: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            forward_headers: default_true(),
            change_origin: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default = "default_host", skip_serializing_if = "is_any_host")]
    pub host: String,

    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<String>,

    pub target: String,
}

impl RuleConfig {
    #[must_use]
    pub fn new(path: &str, rewrite: Option<&str>, target: &str) -> Self {
        Self {
            host: default_host(),
            path: path.to_string(),
            rewrite: rewrite.map(String::from),
            target: target.to_string(),
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }
}
