//! `rproxy validate`: check a rule table without starting.
//!
//! Text output lists the effective rule table in match order; JSON output
//! is a summary for scripts. Exits non-zero when the table is invalid.

use console::style;
use serde_json::json;

use crate::cli::{ValidateArgs, ValidateFormat};
use crate::config::model::Config;
use crate::config::sources::parse_config_str;
use crate::config::validation;
use crate::error::{RproxyError, ValidationError};

pub fn execute(args: &ValidateArgs) -> Result<(), RproxyError> {
    let path = &args.config;
    if !path.exists() {
        return Err(RproxyError::ConfigFileNotFound { path: path.clone() });
    }

    let display = path.display().to_string();
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = parse_config_str(ext, &std::fs::read_to_string(path)?, &display)?;

    match validation::validate(&config) {
        Ok(()) => {
            report_valid(&args.format, &display, &config);
            Ok(())
        }
        Err(errors) => {
            report_invalid(&args.format, &display, &errors);
            Err(RproxyError::ConfigValidation { errors })
        }
    }
}

fn shadow_warning(index: usize, earlier: usize) -> String {
    format!("rules[{index}] repeats the host and path of rules[{earlier}] and never matches")
}

fn report_valid(format: &ValidateFormat, display: &str, config: &Config) {
    let shadowed = validation::shadowed_rules(config);
    match format {
        ValidateFormat::Text => {
            println!(
                "{} {}",
                style("\u{2713}").green().bold(),
                validation::format_validation_report(display, config)
            );
            for (index, earlier) in shadowed {
                println!("{} {}", style("!").yellow().bold(), shadow_warning(index, earlier));
            }
        }
        ValidateFormat::Json => {
            let rules: Vec<_> = config
                .rules
                .iter()
                .map(|r| {
                    json!({
                        "host": r.host,
                        "path": r.path,
                        "rewrite": r.rewrite,
                        "target": r.target,
                    })
                })
                .collect();
            println!(
                "{}",
                json!({
                    "valid": true,
                    "rules": rules,
                    "timeout": config.defaults.timeout,
                    "forward_headers": config.defaults.forward_headers,
                    "change_origin": config.defaults.change_origin,
                    "warnings": shadowed
                        .iter()
                        .map(|&(index, earlier)| shadow_warning(index, earlier))
                        .collect::<Vec<_>>(),
                })
            );
        }
    }
}

fn report_invalid(format: &ValidateFormat, display: &str, errors: &[ValidationError]) {
    match format {
        ValidateFormat::Text => {
            eprintln!(
                "{} {display} has {} errors\n",
                style("\u{2717}").red().bold(),
                errors.len()
            );
            for error in errors {
                eprintln!("{error}");
            }
        }
        ValidateFormat::Json => {
            let errors: Vec<_> = errors
                .iter()
                .map(|e| {
                    json!({
                        "rule": e.rule,
                        "field": e.field,
                        "message": e.message,
                        "suggestion": e.suggestion,
                    })
                })
                .collect();
            println!("{}", json!({ "valid": false, "errors": errors }));
        }
    }
}
