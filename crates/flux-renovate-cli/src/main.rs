//! flux-renovate CLI - Annotate Flux HelmReleases for Renovate

use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod error;
mod exit_codes;
mod logging;

#[derive(Parser)]
#[command(name = "flux-renovate")]
#[command(version)]
#[command(
    about = "Annotate Flux HelmReleases with their chart registry for Renovate",
    long_about = None
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Turn on debug logging
    #[arg(
        long,
        global = true,
        env = "DEBUG",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Add `# renovate: registryUrl=` comments to HelmRelease manifests
    Annotate(commands::annotate::AnnotateArgs),
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn main() -> ExitCode {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version also come through here
            let code = if e.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            return exit_code(code);
        }
    };

    logging::init(cli.debug);

    let result = match cli.command {
        Commands::Annotate(args) => commands::annotate::run(&args),
    };

    match result {
        Ok(()) => exit_code(exit_codes::SUCCESS),
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            exit_code(code)
        }
    }
}
