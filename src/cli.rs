//! Command dispatch for the binary: one function per mode.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::args::{Args, Mode};
use crate::auth::GoogleCredentialManager;
use crate::cfg::ConfigStore;
use crate::error::Error;
use crate::job::Exporter;
use crate::prompt::Prompter;
use crate::setup;
use crate::sheets::{GoogleClient, SheetsApi, SpreadsheetRef};

/// Run the mode selected by `args`. `Ok(true)` maps to exit status 0.
pub async fn run(args: &Args) -> Result<bool> {
    match args.mode() {
        Mode::Setup => {
            let mut config = ConfigStore::load(&args.config);
            setup::run_setup(args, &mut config, &mut Prompter::stdio()).await
        }
        Mode::Logout => logout(args).await,
        Mode::ShowConfig => {
            println!("{}", session_config(args).to_pretty_json());
            Ok(true)
        }
        mode => {
            let config = session_config(args);
            let client = connect(args).await?;
            run_with_client(mode, args, &config, &client).await
        }
    }
}

/// Stored configuration with `--output-dir` applied for this run only.
fn session_config(args: &Args) -> ConfigStore {
    let mut config = ConfigStore::load(&args.config);
    if let Some(dir) = &args.output_dir {
        config.set("output_directory", dir.display().to_string());
    }
    config
}

async fn run_with_client(mode: Mode, args: &Args, config: &ConfigStore, client: &GoogleClient) -> Result<bool> {
    let exporter = Exporter::new(client, config);
    match mode {
        Mode::List => {
            let sheets = exporter.list_spreadsheets(args.limit).await;
            display_sheets(&mut io::stdout(), &sheets)?;
            Ok(true)
        }
        Mode::Export { names, ids } => {
            let mut succeeded = false;
            if !names.is_empty() {
                let batch = exporter.export_by_names(&names).await;
                if batch.halted {
                    anyhow::bail!("export stopped: lost access to Google APIs");
                }
                succeeded |= batch.any_succeeded();
            }
            if !ids.is_empty() {
                let batch = exporter.export_by_ids(&ids).await;
                if batch.halted {
                    anyhow::bail!("export stopped: lost access to Google APIs");
                }
                succeeded |= batch.any_succeeded();
            }
            Ok(succeeded)
        }
        Mode::Interactive => {
            println!("Fetching your Google Sheets...");
            let sheets = exporter.list_spreadsheets(args.limit).await;
            if sheets.is_empty() {
                println!("No Google Sheets found in your Drive.");
                return Ok(false);
            }
            display_sheets(&mut io::stdout(), &sheets)?;
            let confirm = config.settings().display_options.confirm_before_export;
            interactive(&exporter, &sheets, confirm, &mut Prompter::stdio()).await?;
            Ok(true)
        }
        Mode::Setup | Mode::Logout | Mode::ShowConfig => Ok(false),
    }
}

/// Authenticate once up front, then hand the credential manager to the API
/// client so each request gets a current token.
pub async fn connect(args: &Args) -> Result<GoogleClient> {
    info!("Authenticating with Google APIs");
    let mut manager = GoogleCredentialManager::google(&args.credentials, &args.token);
    manager.authenticate().await.map_err(|e| match e {
        Error::CredentialsFileMissing { .. } => {
            anyhow::Error::new(e).context("run with --setup to configure Google API credentials")
        }
        other => anyhow::Error::new(other).context("authentication failed"),
    })?;
    Ok(GoogleClient::new(Arc::new(Mutex::new(manager))))
}

async fn logout(args: &Args) -> Result<bool> {
    let mut manager = GoogleCredentialManager::google(&args.credentials, &args.token);
    manager
        .revoke()
        .await
        .with_context(|| format!("cannot remove {}", args.token.display()))?;
    println!("Signed out. The next run will ask for authorization again.");
    Ok(true)
}

/// Numbered listing of spreadsheets.
pub fn display_sheets(out: &mut impl Write, sheets: &[SpreadsheetRef]) -> io::Result<()> {
    if sheets.is_empty() {
        return writeln!(out, "No Google Sheets found in your Drive.");
    }

    writeln!(out)?;
    writeln!(out, "Found {} Google Sheets:", sheets.len())?;
    writeln!(out, "{}", "-".repeat(80))?;
    for (i, sheet) in sheets.iter().enumerate() {
        let modified = sheet
            .modified_time
            .map_or_else(|| "Unknown".to_string(), |t| t.format("%Y-%m-%d").to_string());
        writeln!(out, "{:2}. {}", i + 1, sheet.name)?;
        writeln!(out, "    Modified: {}", modified)?;
        writeln!(out, "    ID: {}", sheet.id)?;
        writeln!(out)?;
    }
    Ok(())
}

/// Selection loop: pick a number, optionally confirm, export, repeat.
/// Ends on `q`, end of input, a credential failure, or a negative answer to
/// "export another".
pub async fn interactive<A, R, W>(
    exporter: &Exporter<'_, A>,
    sheets: &[SpreadsheetRef],
    confirm_before_export: bool,
    prompter: &mut Prompter<R, W>,
) -> io::Result<()>
where
    A: SheetsApi,
    R: BufRead,
    W: Write,
{
    loop {
        let Some(choice) = prompter.ask("\nEnter sheet number to export (or 'q' to quit): ")? else {
            return Ok(());
        };
        if choice.eq_ignore_ascii_case("q") {
            prompter.say("Goodbye!")?;
            return Ok(());
        }

        let sheet = match choice.parse::<usize>() {
            Ok(n) if (1..=sheets.len()).contains(&n) => &sheets[n - 1],
            Ok(_) => {
                prompter.say("Invalid selection. Please try again.")?;
                continue;
            }
            Err(_) => {
                prompter.say("Please enter a valid number.")?;
                continue;
            }
        };

        if confirm_before_export
            && !prompter.confirm(&format!("Export '{}'?", sheet.name), false)?
        {
            continue;
        }

        prompter.say(&format!("\nExporting '{}'...", sheet.name))?;
        let summary = exporter.export_spreadsheet(&sheet.id, &sheet.name).await;
        if summary.halted {
            prompter.say("Lost access to Google APIs. Run again to re-authorize.")?;
            return Ok(());
        }
        if !summary.succeeded() {
            error!("Nothing was exported from '{}'", sheet.name);
        }

        if !prompter.confirm("\nExport another sheet?", false)? {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_display_sheets_format() {
        let sheets = vec![
            SpreadsheetRef {
                id: "abc".to_string(),
                name: "Budget".to_string(),
                modified_time: Some(Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap()),
                web_view_link: None,
            },
            SpreadsheetRef {
                id: "def".to_string(),
                name: "Plan".to_string(),
                modified_time: None,
                web_view_link: None,
            },
        ];
        let mut out = Vec::new();
        display_sheets(&mut out, &sheets).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Found 2 Google Sheets:"));
        assert!(text.contains(" 1. Budget\n    Modified: 2024-02-01\n    ID: abc\n"));
        assert!(text.contains(" 2. Plan\n    Modified: Unknown\n    ID: def\n"));
    }

    #[test]
    fn test_display_no_sheets() {
        let mut out = Vec::new();
        display_sheets(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No Google Sheets found in your Drive.\n");
    }
}
