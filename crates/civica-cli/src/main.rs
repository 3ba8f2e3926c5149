//! Civica command-line entry point.

mod app;
mod cli;
mod config;

use app::CivicaApp;
use cli::CliArgs;
use clap::Parser;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let app = match CivicaApp::from_args(&args) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
