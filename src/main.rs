mod categorizer;
mod cli;
mod db;
mod driver;
mod error;
mod extractor;
mod fetcher;
mod fmt;
mod gmail;
mod models;
mod orchestrator;
mod reconciler;
mod session;
mod settings;
#[cfg(test)]
mod testing;
mod webdriver;

use clap::Parser;
use env_logger::Env;

use cli::Cli;

fn main() {
    let _cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(e) = cli::run::run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
