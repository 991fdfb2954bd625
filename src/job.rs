use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::cfg::ConfigStore;
use crate::csv_sink::write_worksheet;
use crate::error::Result;
use crate::sheets::{SheetsApi, SpreadsheetRef, WorksheetRef};

/// Upper bound on spreadsheets fetched when resolving names.
const NAME_LOOKUP_LIMIT: usize = 1000;

/// One worksheet about to be written to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    pub spreadsheet_id: String,
    pub spreadsheet_name: String,
    pub worksheet: WorksheetRef,
    pub output_path: PathBuf,
}

/// Worksheet counts for one spreadsheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub exported: usize,
    pub attempted: usize,
    /// Set when a credential failure stopped the export part way.
    pub halted: bool,
}

impl ExportSummary {
    pub fn succeeded(&self) -> bool {
        self.exported > 0
    }
}

/// Spreadsheet counts over a batch of requested names or ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub requested: usize,
    /// Set when a credential failure stopped the batch.
    pub halted: bool,
}

impl BatchSummary {
    pub fn any_succeeded(&self) -> bool {
        self.succeeded > 0
    }

    /// Count one spreadsheet. Returns false once the batch must stop.
    fn record(&mut self, export: ExportSummary) -> bool {
        if export.succeeded() {
            self.succeeded += 1;
        }
        self.halted |= export.halted;
        !self.halted
    }
}

/// Decide the fan-out for a spreadsheet and compute each target path.
///
/// With a single worksheet, or when exporting all worksheets is disabled,
/// only the first worksheet is exported, to a file named after the
/// spreadsheet alone.
pub fn plan(
    config: &ConfigStore,
    spreadsheet_id: &str,
    spreadsheet_name: &str,
    worksheets: &[WorksheetRef],
    output_dir: &Path,
    now: DateTime<Local>,
) -> Vec<ExportJob> {
    let export_all = config.settings().export_options.export_all_worksheets;
    let job = |worksheet: &WorksheetRef, worksheet_name: Option<&str>| ExportJob {
        spreadsheet_id: spreadsheet_id.to_string(),
        spreadsheet_name: spreadsheet_name.to_string(),
        worksheet: worksheet.clone(),
        output_path: output_dir.join(config.compute_filename_at(spreadsheet_name, worksheet_name, now)),
    };

    match worksheets {
        [] => Vec::new(),
        [first, ..] if worksheets.len() == 1 || !export_all => vec![job(first, None)],
        _ => worksheets
            .iter()
            .map(|worksheet| job(worksheet, Some(worksheet.title.as_str())))
            .collect(),
    }
}

/// Resolves spreadsheets to worksheets and files, and drives the CSV writer.
pub struct Exporter<'a, A> {
    api: &'a A,
    config: &'a ConfigStore,
}

impl<'a, A: SheetsApi> Exporter<'a, A> {
    pub fn new(api: &'a A, config: &'a ConfigStore) -> Self {
        Self { api, config }
    }

    /// Spreadsheets in the user's Drive; empty on API error.
    pub async fn list_spreadsheets(&self, limit: Option<usize>) -> Vec<SpreadsheetRef> {
        let limit = limit.unwrap_or(self.config.settings().display_options.list_limit);
        match self.api.list_spreadsheets(limit).await {
            Ok(spreadsheets) => spreadsheets,
            Err(e) => {
                error!("Error listing sheets: {}", e);
                Vec::new()
            }
        }
    }

    /// Worksheets of a spreadsheet in ascending index order; empty on API error.
    pub async fn list_worksheets(&self, spreadsheet_id: &str) -> Vec<WorksheetRef> {
        self.fetch_worksheets(spreadsheet_id).await.unwrap_or_else(|e| {
            error!("Error getting worksheets of {}: {}", spreadsheet_id, e);
            Vec::new()
        })
    }

    async fn fetch_worksheets(&self, spreadsheet_id: &str) -> Result<Vec<WorksheetRef>> {
        let mut worksheets = self.api.worksheets(spreadsheet_id).await?;
        worksheets.sort_by_key(|w| w.index);
        Ok(worksheets)
    }

    pub async fn export_spreadsheet(&self, spreadsheet_id: &str, display_name: &str) -> ExportSummary {
        let worksheets = match self.fetch_worksheets(spreadsheet_id).await {
            Ok(worksheets) => worksheets,
            Err(e) => {
                error!("Error getting worksheets of {}: {}", spreadsheet_id, e);
                return ExportSummary {
                    halted: e.is_fatal(),
                    ..ExportSummary::default()
                };
            }
        };
        if worksheets.is_empty() {
            warn!("No worksheets found in '{}'", display_name);
            return ExportSummary::default();
        }

        let output_dir = match self.config.resolve_output_directory() {
            Ok(dir) => dir,
            Err(e) => {
                error!("Cannot prepare output directory: {}", e);
                return ExportSummary::default();
            }
        };

        let jobs = plan(
            self.config,
            spreadsheet_id,
            display_name,
            &worksheets,
            &output_dir,
            Local::now(),
        );
        debug!("Planned {} export jobs for '{}'", jobs.len(), display_name);

        let mut summary = ExportSummary {
            attempted: jobs.len(),
            ..ExportSummary::default()
        };
        for job in &jobs {
            match self.run_job(job).await {
                Ok(true) => summary.exported += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Stopping export of '{}': {}", display_name, e);
                    summary.halted = true;
                    break;
                }
            }
        }

        info!(
            "Successfully exported {}/{} worksheets from '{}'",
            summary.exported, summary.attempted, display_name
        );
        summary
    }

    /// Write one worksheet. Only credential failures are returned as errors;
    /// anything else is logged and reported as `Ok(false)`.
    async fn run_job(&self, job: &ExportJob) -> Result<bool> {
        let values = match self.api.values(&job.spreadsheet_id, &job.worksheet.title).await {
            Ok(values) => values,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("Failed to export '{}': {}", job.worksheet.title, e);
                return Ok(false);
            }
        };

        let written = write_worksheet(&values, &job.output_path);
        if written {
            info!("Exported '{}' to {}", job.worksheet.title, job.output_path.display());
        }
        Ok(written)
    }

    /// Export spreadsheets whose names match (case-insensitively).
    pub async fn export_by_names(&self, names: &[String]) -> BatchSummary {
        let all = self.list_spreadsheets(Some(NAME_LOOKUP_LIMIT)).await;
        let mut summary = BatchSummary {
            requested: names.len(),
            ..BatchSummary::default()
        };

        for name in names {
            let wanted = name.to_lowercase();
            let Some(spreadsheet) = all.iter().find(|s| s.name.to_lowercase() == wanted) else {
                warn!("Sheet '{}' not found", name);
                continue;
            };
            info!("Exporting '{}'", spreadsheet.name);
            if !summary.record(self.export_spreadsheet(&spreadsheet.id, &spreadsheet.name).await) {
                break;
            }
        }

        info!(
            "Exported {}/{} sheets successfully",
            summary.succeeded, summary.requested
        );
        summary
    }

    /// Export spreadsheets by id, looking up each display name first.
    pub async fn export_by_ids(&self, ids: &[String]) -> BatchSummary {
        let mut summary = BatchSummary {
            requested: ids.len(),
            ..BatchSummary::default()
        };

        for id in ids {
            let name = match self.api.spreadsheet_title(id).await {
                Ok(name) => name,
                Err(e) => {
                    error!("Failed to export sheet {}: {}", id, e);
                    if e.is_fatal() {
                        summary.halted = true;
                        break;
                    }
                    continue;
                }
            };
            info!("Exporting '{}'", name);
            if !summary.record(self.export_spreadsheet(id, &name).await) {
                break;
            }
        }

        info!(
            "Exported {}/{} sheets successfully",
            summary.succeeded, summary.requested
        );
        summary
    }
}
