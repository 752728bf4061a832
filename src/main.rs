use cadence::cli::{self, Cli};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = cli::run(cli).await;
    std::process::exit(code);
}
