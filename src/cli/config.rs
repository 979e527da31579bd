//! Configuration CLI commands.
//!
//! Commands for viewing the effective settings.

use clap::Subcommand;

use crate::config::Config;

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// List all settings and their current values
    List {
        /// Show only settings matching this prefix (e.g., "jobs", "sim")
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Get a specific setting value
    Get {
        /// Setting path (e.g., "jobs.max_workers")
        path: String,
    },
}

/// Run a config command against the effective configuration.
pub fn run_config_command(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::List { filter } => {
            print!("{}", render_settings(config, filter.as_deref()));
            Ok(())
        }
        ConfigCommand::Get { path } => {
            println!("{}", get_setting(config, &path)?);
            Ok(())
        }
    }
}

/// Settings table, keys aligned.
fn render_settings(config: &Config, filter: Option<&str>) -> String {
    let all: Vec<(String, String)> = config
        .list()
        .into_iter()
        .filter(|(key, _)| filter.is_none_or(|f| key.starts_with(f)))
        .collect();

    // Find the longest key for alignment
    let max_key_len = all.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

    let mut out = String::from("Settings:\n\n");
    for (key, value) in all {
        out.push_str(&format!("  {:width$}  {}\n", key, value, width = max_key_len));
    }
    out
}

fn get_setting(config: &Config, path: &str) -> anyhow::Result<String> {
    match config.get(path) {
        Some(value) => Ok(value),
        None => anyhow::bail!("Setting not found: {}", path),
    }
}
