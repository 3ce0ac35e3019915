//! Rule-table validation with detailed error reporting.
//!
//! The [`validate`] function checks a parsed [`Config`] for structural
//! errors such as an empty table, blank hosts, path patterns that do not
//! compile and malformed targets. Returns a list of [`ValidationError`]
//! values with per-field suggestions. Rules that repeat an earlier host and
//! path are legal but can never match; [`shadowed_rules`] finds them so
//! callers can warn.

use url::Url;

use super::model::{Config, ANY_HOST};
use crate::error::ValidationError;

/// Validate a host pattern. Returns `Ok(())` or a human-readable error.
pub fn validate_host(host: &str) -> Result<(), String> {
    if host.is_empty() {
        return Err(format!("host cannot be empty (use '{ANY_HOST}' to match any host)"));
    }
    if host.chars().any(char::is_whitespace) {
        return Err(format!("'{host}' contains whitespace"));
    }
    Ok(())
}

/// Validate a path pattern by compiling it. Returns `Ok(())` or the
/// compiler's message.
pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| format!("invalid regular expression: {e}"))
}

/// Validate a target URL. Returns `Ok(())` or a human-readable error.
pub fn validate_target_url(url: &str) -> Result<(), String> {
    let parsed = Url::parse(url).map_err(|_| format!("'{url}' is not a valid URL"))?;
    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(format!(
            "unsupported scheme '{scheme}' (expected http or https)"
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(format!("'{url}' has no host"));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(format!("'{url}' must not carry a query or fragment"));
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.defaults.timeout == 0 {
        errors.push(ValidationError {
            rule: "(root)".into(),
            field: "defaults.timeout".into(),
            message: "timeout must be greater than 0".into(),
            suggestion: None,
        });
    }

    if config.rules.is_empty() {
        errors.push(ValidationError {
            rule: "(root)".into(),
            field: "rules".into(),
            message: "at least one rule must be defined".into(),
            suggestion: Some(format!("a catch-all rule is path '^' with host '{ANY_HOST}'")),
        });
        return Err(errors);
    }

    for (i, rule) in config.rules.iter().enumerate() {
        let rule_id = format!("rules[{i}]");

        if let Err(msg) = validate_host(&rule.host) {
            errors.push(ValidationError {
                rule: rule_id.clone(),
                field: "host".into(),
                message: msg,
                suggestion: None,
            });
        }

        if let Err(msg) = validate_pattern(&rule.path) {
            errors.push(ValidationError {
                rule: rule_id.clone(),
                field: "path".into(),
                message: msg,
                suggestion: None,
            });
        }

        if let Err(msg) = validate_target_url(&rule.target) {
            errors.push(ValidationError {
                rule: rule_id.clone(),
                field: "target".into(),
                suggestion: if rule.target.contains("://") {
                    None
                } else {
                    Some(format!("did you mean 'http://{}'?", rule.target))
                },
                message: msg,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `(index, earlier)` pairs where rule `index` repeats the host and path of
/// rule `earlier`. First match wins, so such a rule is never selected.
#[must_use]
pub fn shadowed_rules(config: &Config) -> Vec<(usize, usize)> {
    let mut first_seen = std::collections::HashMap::new();
    config
        .rules
        .iter()
        .enumerate()
        .filter_map(|(i, rule)| {
            let earlier = *first_seen
                .entry((rule.host.as_str(), rule.path.as_str()))
                .or_insert(i);
            (earlier != i).then_some((i, earlier))
        })
        .collect()
}

#[must_use]
pub fn format_validation_report(path: &str, config: &Config) -> String {
    let mut lines = vec![format!("  {} rules\n", config.rules.len())];

    for (i, rule) in config.rules.iter().enumerate() {
        let rewrite = rule
            .rewrite
            .as_deref()
            .map_or_else(String::new, |r| format!(" (rewrite '{r}')"));
        lines.push(format!(
            "  [{i}] {} {}{}  -> {}",
            rule.host, rule.path, rewrite, rule.target
        ));
    }

    lines.push(String::new());
    lines.push(format!("  timeout: {}ms", config.defaults.timeout));
    lines.push(format!(
        "  forward headers: {}",
        if config.defaults.forward_headers { "on" } else { "off" }
    ));
    lines.push(format!(
        "  change origin: {}",
        if config.defaults.change_origin { "on" } else { "off" }
    ));

    format!("{} is valid\n{}", path, lines.join("\n"))
}
