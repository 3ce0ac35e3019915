//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`run`], [`init`] or [`validate`]. Each handler
//! lives in its own submodule.

pub mod init;
pub mod run;
pub mod validate;

use crate::cli::{Cli, Commands};
use crate::error::RproxyError;

pub async fn dispatch(cli: Cli) -> Result<(), RproxyError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Init(ref args)) => init::execute(args),
        Some(Commands::Validate(ref args)) => validate::execute(args),
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  rproxy v{version}: rule-based HTTP/HTTPS reverse proxy\n\n  \
         No command provided. To get started:\n\n    \
         rproxy init                  Generate a starter rule table\n    \
         rproxy run                   Start the proxy (auto-detects ./rproxy.yaml)\n    \
         rproxy run -c rules.yaml     Start with a specific rule table\n    \
         rproxy --help                See all commands and options\n"
    );
}
