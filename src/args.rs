use std::path::PathBuf;

use clap::Parser;

use crate::auth::{DEFAULT_CLIENT_SECRET_PATH, DEFAULT_TOKEN_PATH};
use crate::cfg::DEFAULT_CONFIG_PATH;

const EXAMPLES: &str = "\
Examples:
  sheet_export                           # Interactive mode
  sheet_export --name \"My Sheet\"         # Export by name
  sheet_export --id \"1BxiMVs0...\"        # Export by ID
  sheet_export --list                    # List available sheets
  sheet_export --setup                   # Run setup wizard";

#[derive(Parser, Debug)]
#[command(name = "sheet_export")]
#[command(about = "Export Google Sheets from your Drive to local CSV files")]
#[command(version)]
#[command(after_help = EXAMPLES)]
pub struct Args {
    /// Export sheet by name (can be used multiple times)
    #[arg(short = 'n', long = "name", value_name = "NAME")]
    pub names: Vec<String>,

    /// Export sheet by ID (can be used multiple times)
    #[arg(short = 'i', long = "id", value_name = "ID")]
    pub ids: Vec<String>,

    /// List available sheets and exit
    #[arg(short, long)]
    pub list: bool,

    /// Maximum number of sheets to list
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Run initial setup wizard
    #[arg(long)]
    pub setup: bool,

    /// Revoke and delete the stored OAuth token
    #[arg(long)]
    pub logout: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub show_config: bool,

    /// Path to config file
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Path to the OAuth client secret downloaded from the Google Cloud console
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CLIENT_SECRET_PATH)]
    pub credentials: PathBuf,

    /// Path to the stored OAuth token
    #[arg(long, value_name = "PATH", default_value = DEFAULT_TOKEN_PATH)]
    pub token: PathBuf,

    /// Write CSV files here instead of the configured output directory
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// What a single invocation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Setup,
    Logout,
    ShowConfig,
    List,
    Export { names: Vec<String>, ids: Vec<String> },
    Interactive,
}

impl Args {
    pub fn mode(&self) -> Mode {
        if self.setup {
            Mode::Setup
        } else if self.logout {
            Mode::Logout
        } else if self.show_config {
            Mode::ShowConfig
        } else if self.list {
            Mode::List
        } else if !self.names.is_empty() || !self.ids.is_empty() {
            Mode::Export {
                names: self.names.clone(),
                ids: self.ids.clone(),
            }
        } else {
            Mode::Interactive
        }
    }
}
