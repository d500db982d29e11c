use crate::cli::download;
use clap::Parser;
use std::path::MAIN_SEPARATOR;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() {
    let f_appender =
        tracing_appender::rolling::hourly(format!(".{}", MAIN_SEPARATOR), "moodledl.log");
    let (non_blk, guard) = tracing_appender::non_blocking(f_appender);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("libmoodledl=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(tracing_subscriber::fmt::format().pretty())
        .with_writer(non_blk)
        .init();
    let cli = cli::Cli::parse();
    let exit_code = download(cli).await;
    // process::exit skips destructors, flush the log first
    drop(guard);
    std::process::exit(exit_code);
}
