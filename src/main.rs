use clap::Parser;
use std::process;
use stigscan::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cli.init_logging();

    match cli::execute(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    }
}
