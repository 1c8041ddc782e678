mod cli;
mod cmd;
mod signal;

use clap::Parser;

use crate::cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    signal::install_signal_handlers();

    let result = match cli.command {
        Commands::Archive {
            to_archive,
            out,
            comment,
        } => cmd::archive::run(&to_archive, &out, comment.as_deref().unwrap_or_default()),
        Commands::Web { root, port } => cmd::web::run(&root, port),
    };

    if let Err(e) = result {
        eprintln!("dumbcas: {e}");
        std::process::exit(1);
    }
}
