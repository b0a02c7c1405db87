#![allow(missing_docs)]

use clap::Parser;
use specmc_cli::{Opts, Subcommand};
use std::process::{ExitCode, Termination};

fn main() -> ExitCode {
    let opts = Opts::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(opts.configuration.log_level()),
    )
    .init();

    match opts.subcommand.run(&opts.configuration) {
        Ok(code) => code,
        result @ Err(_) => result.report(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_command() {
        use clap::CommandFactory;
        Opts::command().debug_assert();
    }
}
