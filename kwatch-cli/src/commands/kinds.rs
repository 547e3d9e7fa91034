//! `kwatch kinds`: list the resources that can be watched.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use kwatch_core::ResourceKind;

/// Arguments for `kwatch kinds`.
#[derive(Args, Debug)]
pub struct KindsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled, Serialize)]
struct KindRow {
    #[tabled(rename = "resource")]
    name: &'static str,
    #[tabled(rename = "scope")]
    scope: String,
    #[tabled(rename = "api version")]
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
}

fn rows() -> Vec<KindRow> {
    ResourceKind::all()
        .iter()
        .map(|kind| KindRow {
            name: kind.plural(),
            scope: kind.scope().to_string(),
            api_version: kind.api_version(),
        })
        .collect()
}

impl KindsArgs {
    pub fn run(self) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(&rows())?);
            return Ok(());
        }

        println!("{}", "Watchable resources".bold());
        let mut table = Table::new(rows());
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
