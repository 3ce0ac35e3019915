//! Ordered, first-match-wins rule table.
//!
//! [`RuleTable::compile`] turns the raw [`RuleConfig`] list into
//! [`Rule`] values that own their compiled path [`Regex`], host pattern
//! and parsed [`Target`]. [`RuleTable::find`] walks the rules in
//! declaration order and returns the first whose host and path both
//! match. There is no scoring and no fallback beyond declaration order.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use axum::http::Uri;
use regex::Regex;
use url::Url;

use crate::config::model::{RuleConfig, ANY_HOST};
use crate::config::validation::validate_target_url;
use crate::error::{RproxyError, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    Any,
    /// Compared byte-for-byte with the request's `Host`, port included.
    Exact(String),
}

impl HostPattern {
    #[must_use]
    pub fn parse(host: &str) -> Self {
        if host == ANY_HOST {
            Self::Any
        } else {
            Self::Exact(host.to_string())
        }
    }

    #[must_use]
    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == host,
        }
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(ANY_HOST),
            Self::Exact(host) => f.write_str(host),
        }
    }
}

/// Backend a rule forwards to: scheme, authority and an optional base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    scheme: String,
    authority: String,
    base_path: String,
}

impl Target {
    pub fn parse(url: &str) -> Result<Self, String> {
        validate_target_url(url)?;
        let parsed = Url::parse(url).map_err(|e| e.to_string())?;
        let host = parsed.host_str().unwrap_or_default();
        let authority = parsed
            .port()
            .map_or_else(|| host.to_string(), |port| format!("{host}:{port}"));
        Ok(Self {
            scheme: parsed.scheme().to_string(),
            authority,
            base_path: parsed.path().trim_end_matches('/').to_string(),
        })
    }

    /// Plain HTTP to a local listener. A wildcard bind address is reached
    /// through loopback.
    #[must_use]
    pub fn local(addr: SocketAddr) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        Self {
            scheme: "http".to_string(),
            authority: SocketAddr::new(ip, addr.port()).to_string(),
            base_path: String::new(),
        }
    }

    /// `host[:port]` as it would appear in a `Host` header.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Absolute URI for `path_and_query` on this backend, base path prepended.
    pub fn uri(&self, path_and_query: &str) -> Result<Uri, axum::http::uri::InvalidUri> {
        format!(
            "{}://{}{}{}",
            self.scheme, self.authority, self.base_path, path_and_query
        )
        .parse()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.base_path)
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub host: HostPattern,
    /// Used for both matching and rewriting.
    pub path: Regex,
    pub rewrite: Option<String>,
    pub target: Target,
}

impl Rule {
    #[must_use]
    pub fn matches(&self, host: &str, path: &str) -> bool {
        self.host.matches(host) && self.path.is_match(path)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.host, self.path.as_str())?;
        if let Some(ref rewrite) = self.rewrite {
            write!(f, " (rewrite '{rewrite}')")?;
        }
        write!(f, " -> {}", self.target)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn compile(rules: &[RuleConfig]) -> Result<Self, RproxyError> {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut errors = Vec::new();

        for (i, rule) in rules.iter().enumerate() {
            let path = Regex::new(&rule.path).map_err(|e| ValidationError {
                rule: format!("rules[{i}]"),
                field: "path".into(),
                message: format!("invalid regular expression: {e}"),
                suggestion: None,
            });
            let target = Target::parse(&rule.target).map_err(|message| ValidationError {
                rule: format!("rules[{i}]"),
                field: "target".into(),
                message,
                suggestion: None,
            });

            match (path, target) {
                (Ok(path), Ok(target)) => compiled.push(Rule {
                    host: HostPattern::parse(&rule.host),
                    path,
                    rewrite: rule.rewrite.clone(),
                    target,
                }),
                (path, target) => {
                    errors.extend(path.err());
                    errors.extend(target.err());
                }
            }
        }

        if errors.is_empty() {
            Ok(Self { rules: compiled })
        } else {
            Err(RproxyError::ConfigValidation { errors })
        }
    }

    /// First rule, in declaration order, matching both `host` and `path`.
    #[must_use]
    pub fn find(&self, host: &str, path: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(host, path))
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
