use super::{GlobalConfiguration, Subcommand};
use anyhow::Result;
use clap::{Parser, ValueHint};
use prettytable::{format, row, Table};
use specmc::material::{MaterialDatabase, MaterialKind};
use specmc::units::G_PER_CM3;
use std::path::PathBuf;
use std::process::ExitCode;

/// Lists the materials of a material table.
#[derive(Parser)]
pub struct Opts {
    /// Path of the material table.
    #[arg(value_hint = ValueHint::FilePath)]
    table: PathBuf,
}

impl Subcommand for Opts {
    fn run(&self, _: &GlobalConfiguration) -> Result<ExitCode> {
        let database = MaterialDatabase::load(&self.table)?;
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_CLEAN);
        table.set_titles(row!["id", "name", "kind", "density [g/cm³]", "Zeff"]);
        for material in database.iter() {
            let kind = match material.kind() {
                MaterialKind::Element => "element",
                MaterialKind::Compound => "compound",
                MaterialKind::Mixture => "mixture",
            };
            table.add_row(row![
                material.id(),
                material.name(),
                kind,
                format!("{:.4}", material.density() / G_PER_CM3),
                format!("{:.2}", material.zeff()),
            ]);
        }
        table.printstd();
        Ok(ExitCode::SUCCESS)
    }
}
