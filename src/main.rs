use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = rproxy::cli::Cli::parse();
    if let Err(e) = rproxy::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
