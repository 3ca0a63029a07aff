use clap::{Args, Subcommand};

use super::OutputFormat;
use bibsync::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        config_path: Option<&std::path::Path>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_config(config),
                }
                Ok(())
            }
            ConfigSubcommand::Init { force } => {
                let path = config_path
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(Config::default_config_path);
                Config::write_template(&path, *force)?;
                println!("Wrote config file: {}", path.display());
                Ok(())
            }
        }
    }
}

fn print_config(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    println!("database_path: {}", config.database_path.value.display());
    println!("  source: {}", config.database_path.source);
    println!();

    println!(
        "sync.server_url: {}",
        config.sync.server_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "sync.api_key: {}",
        if config.sync.api_key.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!("sync.auto_sync: {}", config.sync.auto_sync);
    println!("sync.timeout_secs: {}", config.sync.timeout_secs);
    println!("sync.pull_remote: {}", config.sync.pull_remote);
}
