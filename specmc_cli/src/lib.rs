#![allow(clippy::missing_errors_doc)]
#![allow(missing_docs)]

mod helpers;
mod materials;
mod run;
mod sink;

use anyhow::Result;
use clap::Parser;
use enum_dispatch::enum_dispatch;
use std::process::ExitCode;

#[derive(Parser)]
pub struct GlobalConfiguration {
    /// Increase log verbosity; repeat for more detail.
    #[arg(action = clap::ArgAction::Count, long, short)]
    pub verbose: u8,
}

impl GlobalConfiguration {
    #[must_use]
    pub const fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

#[enum_dispatch]
pub trait Subcommand {
    fn run(&self, cfg: &GlobalConfiguration) -> Result<ExitCode>;
}

#[enum_dispatch(Subcommand)]
#[derive(Parser)]
pub enum SubcommandEnum {
    Materials(materials::Opts),
    Run(run::Opts),
}

#[derive(Parser)]
#[command(
    arg_required_else_help = true,
    author,
    about,
    disable_help_subcommand = true,
    name = "specmc",
    version
)]
pub struct Opts {
    #[command(flatten)]
    pub configuration: GlobalConfiguration,
    #[command(subcommand)]
    pub subcommand: SubcommandEnum,
}
