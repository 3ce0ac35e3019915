//! `rproxy init`: generate a starter rule table.
//!
//! Writes a YAML, JSON, or TOML file with either a minimal or a fully
//! documented template. Both carry the same three starter rules.

use std::path::PathBuf;

use console::style;

use crate::cli::{ConfigFormat, InitArgs};
use crate::error::RproxyError;

pub fn execute(args: &InitArgs) -> Result<(), RproxyError> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("rproxy.{}", args.format.extension())));

    if output.exists() {
        return Err(RproxyError::FileExists { path: output });
    }

    std::fs::write(&output, template(&args.format, args.full))?;
    println!(
        "{} Created {}\n\n  Start the proxy with: rproxy run -c {}",
        style("\u{2713}").green().bold(),
        output.display(),
        output.display()
    );
    Ok(())
}

#[must_use]
pub const fn template(format: &ConfigFormat, full: bool) -> &'static str {
    match (format, full) {
        (ConfigFormat::Yaml, false) => YAML_MINIMAL,
        (ConfigFormat::Yaml, true) => YAML_FULL,
        (ConfigFormat::Json, false) => JSON_MINIMAL,
        (ConfigFormat::Json, true) => JSON_FULL,
        (ConfigFormat::Toml, false) => TOML_MINIMAL,
        (ConfigFormat::Toml, true) => TOML_FULL,
    }
}

const YAML_MINIMAL: &str = r#"# rproxy rule table. First matching rule wins.

rules:
  - path: "^/cms(/|$)"
    target: "http://127.0.0.1:8080"
  - path: "^/site(/|$)"
    target: "http://127.0.0.1:8080"
  - path: "^"
    rewrite: "/site"
    target: "http://127.0.0.1:8080"
"#;

const YAML_FULL: &str = r#"# rproxy rule table.
#
# Rules are tried top to bottom; the first one whose host and path both
# match handles the request. A request no rule matches gets 404.
# All values shown under `defaults` are the built-in defaults.

# defaults:
#   timeout: 30000            # Time allowed for the backend response head, in ms
#   forward_headers: true     # Add X-Forwarded-For/-Proto/-Host/-Port
#   change_origin: false      # Send the target's host as Host instead of the client's

rules:
  # Pass /cms and everything below it through unchanged.
  - path: "^/cms(/|$)"
    target: "http://127.0.0.1:8080"

  # Same for /site.
  - path: "^/site(/|$)"
    target: "http://127.0.0.1:8080"

  # Host-specific rule: `host` is compared exactly, port included.
  # - host: "api.example.com"
  #   path: "^/v1/(.*)$"
  #   rewrite: "/api/$1"        # $1, ${name}: capture groups of `path`
  #   target: "http://127.0.0.1:9000"

  # Catch-all: everything else goes under /site, so /about becomes /site/about.
  - host: "*"
    path: "^"
    rewrite: "/site"
    target: "http://127.0.0.1:8080"
"#;

const JSON_MINIMAL: &str = r#"{
  "rules": [
    { "path": "^/cms(/|$)", "target": "http://127.0.0.1:8080" },
    { "path": "^/site(/|$)", "target": "http://127.0.0.1:8080" },
    { "path": "^", "rewrite": "/site", "target": "http://127.0.0.1:8080" }
  ]
}
"#;

const JSON_FULL: &str = r#"{
  "defaults": {
    "timeout": 30000,
    "forward_headers": true,
    "change_origin": false
  },
  "rules": [
    { "host": "*", "path": "^/cms(/|$)", "target": "http://127.0.0.1:8080" },
    { "host": "*", "path": "^/site(/|$)", "target": "http://127.0.0.1:8080" },
    { "host": "*", "path": "^", "rewrite": "/site", "target": "http://127.0.0.1:8080" }
  ]
}
"#;

const TOML_MINIMAL: &str = r#"# rproxy rule table. First matching rule wins.

[[rules]]
path = "^/cms(/|$)"
target = "http://127.0.0.1:8080"

[[rules]]
path = "^/site(/|$)"
target = "http://127.0.0.1:8080"

[[rules]]
path = "^"
rewrite = "/site"
target = "http://127.0.0.1:8080"
"#;

const TOML_FULL: &str = r#"# rproxy rule table.
#
# Rules are tried top to bottom; the first one whose host and path both
# match handles the request. A request no rule matches gets 404.
# All values shown under [defaults] are the built-in defaults.

[defaults]
# timeout = 30000
# forward_headers = true
# change_origin = false

[[rules]]
host = "*"
path = "^/cms(/|$)"
target = "http://127.0.0.1:8080"

[[rules]]
host = "*"
path = "^/site(/|$)"
target = "http://127.0.0.1:8080"

# [[rules]]
# host = "api.example.com"
# path = "^/v1/(.*)$"
# rewrite = "/api/$1"
# target = "http://127.0.0.1:9000"

[[rules]]
host = "*"
path = "^"
rewrite = "/site"
target = "http://127.0.0.1:8080"
"#;
