//! `kwatch eval`: render a JSONPath template against a document once.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use kwatch_renderer::{PathExpression, WHOLE_OBJECT};

/// Arguments for `kwatch eval`.
#[derive(Args, Debug)]
pub struct EvalArgs {
    /// JSONPath template.
    #[arg(long, default_value = WHOLE_OBJECT)]
    pub jsonpath: String,

    /// JSON or YAML document; stdin when omitted or `-`.
    pub input: Option<PathBuf>,

    /// Render every element of `.items` on its own line.
    #[arg(long)]
    pub items: bool,
}

impl EvalArgs {
    pub fn run(self) -> Result<()> {
        let expression = PathExpression::compile(&self.jsonpath).context("invalid --jsonpath")?;
        let text = read_input(self.input.as_deref())?;
        let document = parse_document(&text)?;

        if self.items {
            let items = document
                .get("items")
                .and_then(Value::as_array)
                .context("document has no `items` list")?;
            for item in items {
                println!("{}", expression.render(item));
            }
        } else {
            println!("{}", expression.render(&document));
        }
        Ok(())
    }
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

/// JSON first, then YAML (what `kubectl get -o yaml` prints).
fn parse_document(text: &str) -> Result<Value> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(json_err) => serde_yaml::from_str(text)
            .with_context(|| format!("input is neither JSON ({json_err}) nor YAML")),
    }
}
