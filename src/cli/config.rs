//! Configuration file commands

use crate::config::ProxyConfig;
use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a sample configuration file (YAML, or JSON for a .json path)
    Generate {
        /// Output file path
        file: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check a configuration file and report problems
    Validate {
        /// Configuration file path
        file: PathBuf,
    },
}

impl ConfigCommand {
    pub fn run(&self) -> Result<()> {
        match self {
            ConfigCommand::Generate { file, force } => generate(file, *force),
            ConfigCommand::Validate { file } => validate(file),
        }
    }
}

/// Write `ProxyConfig::sample()` to `path`
pub fn generate(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let contents = ProxyConfig::sample().to_file_string(path)?;
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✅ Sample configuration written to {}", path.display());
    Ok(())
}

/// Parse `path` strictly and report every finding; fails if there are any
pub fn validate(path: &Path) -> Result<()> {
    let loaded = ProxyConfig::from_file(path)?;
    let mut findings = loaded.warnings;
    findings.extend(loaded.config.validate());

    if findings.is_empty() {
        println!("✅ {} is valid", path.display());
        return Ok(());
    }

    for finding in &findings {
        println!("❌ {}", finding);
    }
    bail!("{} has {} problem(s)", path.display(), findings.len())
}
