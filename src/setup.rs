//! First-run wizard: collect preferences, check the client secret, and make
//! one authenticated call.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::error;

use crate::args::Args;
use crate::cfg::{ConfigStore, DEFAULT_TEMPLATE_PATH};
use crate::cli::connect;
use crate::prompt::Prompter;
use crate::sheets::SheetsApi;

const RULE: &str = "============================================================";

fn heading<R: BufRead, W: Write>(prompter: &mut Prompter<R, W>, title: &str) -> io::Result<()> {
    prompter.say(&format!("\n{}\n{}\n{}", RULE, title, RULE))
}

/// Ask for the main preferences and write them into `config`. Empty answers
/// keep the current value.
pub fn configure<R: BufRead, W: Write>(
    config: &mut ConfigStore,
    prompter: &mut Prompter<R, W>,
) -> io::Result<()> {
    heading(prompter, "CONFIGURATION SETUP")?;

    let current_dir = config.settings().output_directory;
    let answer = prompter.ask(&format!(
        "Output directory for CSV files [{}]: ",
        current_dir.display()
    ))?;
    if let Some(dir) = answer.filter(|a| !a.is_empty()) {
        config.set("output_directory", dir);
    }

    prompter.say("\n--- File Naming Options ---")?;
    let include_timestamp = prompter.confirm("Include timestamp in filenames?", false)?;
    config.set("file_naming.include_timestamp", include_timestamp);

    if let Some(prefix) = prompter
        .ask("Custom prefix for filenames (optional): ")?
        .filter(|p| !p.is_empty())
    {
        config.set("file_naming.custom_prefix", prefix);
    }

    prompter.say("\n--- Export Options ---")?;
    let export_all = prompter.confirm("Export all worksheets by default?", true)?;
    config.set("export_options.export_all_worksheets", export_all);

    Ok(())
}

/// Report whether the OAuth client secret is in place, with instructions
/// for obtaining one when it is not.
pub fn check_credentials<R: BufRead, W: Write>(
    path: &Path,
    prompter: &mut Prompter<R, W>,
) -> io::Result<bool> {
    heading(prompter, "GOOGLE API CREDENTIALS CHECK")?;

    if path.exists() {
        prompter.say(&format!("✓ Found credentials file: {}", path.display()))?;
        return Ok(true);
    }

    prompter.say(&format!("✗ Credentials file not found: {}", path.display()))?;
    prompter.say("\nTo use this tool, you need to:")?;
    prompter.say("1. Go to the Google Cloud Console (https://console.cloud.google.com/)")?;
    prompter.say("2. Create a new project or select an existing one")?;
    prompter.say("3. Enable the Google Sheets API and Google Drive API")?;
    prompter.say("4. Create credentials (OAuth 2.0 Client ID, application type Desktop)")?;
    prompter.say("5. Download the credentials JSON file")?;
    prompter.say(&format!("6. Save it as '{}'", path.display()))?;
    Ok(false)
}

pub async fn run_setup<R: BufRead, W: Write>(
    args: &Args,
    config: &mut ConfigStore,
    prompter: &mut Prompter<R, W>,
) -> Result<bool> {
    prompter.say("Google Sheets to CSV Exporter - Setup Wizard")?;

    configure(config, prompter)?;
    config
        .save()
        .with_context(|| format!("failed to save {}", config.path().display()))?;
    prompter.say(&format!("✓ Configuration saved to {}", config.path().display()))?;

    let template = config.path().with_file_name(DEFAULT_TEMPLATE_PATH);
    match ConfigStore::write_template(&template) {
        Ok(()) => prompter.say(&format!("✓ Wrote {}", template.display()))?,
        Err(e) => error!("Could not write {}: {}", template.display(), e),
    }

    let output_dir = config.resolve_output_directory()?;
    prompter.say(&format!("✓ Output directory ready: {}", output_dir.display()))?;

    if !check_credentials(&args.credentials, prompter)? {
        prompter.say("\nSetup incomplete. Please follow the credential setup instructions.")?;
        return Ok(false);
    }

    heading(prompter, "AUTHENTICATION TEST")?;
    prompter.say("Testing authentication...")?;
    let client = match connect(args).await {
        Ok(client) => client,
        Err(e) => {
            error!("{:#}", e);
            prompter.say("✗ Authentication failed. Please check your credentials.")?;
            return Ok(false);
        }
    };
    prompter.say("✓ Authentication successful!")?;

    match client.list_spreadsheets(5).await {
        Ok(sheets) if sheets.is_empty() => {
            prompter.say("✓ API access working, but no Google Sheets found in your Drive")?
        }
        Ok(sheets) => prompter.say(&format!(
            "✓ Found {} Google Sheets in your Drive",
            sheets.len()
        ))?,
        Err(e) => {
            prompter.say(&format!("✗ API access failed: {}", e))?;
            return Ok(false);
        }
    }

    heading(prompter, "SETUP COMPLETE")?;
    prompter.say("\nYou can now use the exporter:")?;
    prompter.say("  sheet_export                     # Interactive mode")?;
    prompter.say("  sheet_export --list              # List your sheets")?;
    prompter.say("  sheet_export --name 'My Sheet'   # Export by name")?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_configure_applies_answers() {
        let mut config = ConfigStore::with_defaults("unused.json");
        let mut prompter = Prompter::new(Cursor::new("out/csv\ny\nacme\nn\n"), Vec::new());
        configure(&mut config, &mut prompter).unwrap();

        let settings = config.settings();
        assert_eq!(settings.output_directory, Path::new("out/csv"));
        assert!(settings.file_naming.include_timestamp);
        assert_eq!(settings.file_naming.custom_prefix, "acme");
        assert!(!settings.export_options.export_all_worksheets);
    }

    #[test]
    fn test_configure_keeps_defaults_on_empty_answers() {
        let mut config = ConfigStore::with_defaults("unused.json");
        let mut prompter = Prompter::new(Cursor::new("\n\n\n\n"), Vec::new());
        configure(&mut config, &mut prompter).unwrap();

        let settings = config.settings();
        assert_eq!(settings.output_directory, Path::new("./exports"));
        assert!(!settings.file_naming.include_timestamp);
        assert_eq!(settings.file_naming.custom_prefix, "");
        assert!(settings.export_options.export_all_worksheets);
    }

    #[test]
    fn test_check_credentials() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let mut prompter = Prompter::new(Cursor::new(""), Vec::new());
        assert!(!check_credentials(&path, &mut prompter).unwrap());
        let output = String::from_utf8(prompter.output().clone()).unwrap();
        assert!(output.contains("Credentials file not found"));
        assert!(output.contains("Google Sheets API and Google Drive API"));

        std::fs::write(&path, "{}").unwrap();
        let mut prompter = Prompter::new(Cursor::new(""), Vec::new());
        assert!(check_credentials(&path, &mut prompter).unwrap());
    }
}
