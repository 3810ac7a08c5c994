use std::io::{self, Write};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::annotation::Gene;
use crate::app::{InitResult, ProgressEvent, ProgressSink, ProjectSummary, RunResult};
use crate::error::GemproError;
use crate::layout::ProjectLayout;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_init(result: &InitResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_gene(gene: &Gene) -> io::Result<()> {
        Self::print_json(gene)
    }

    pub fn print_summary(summary: &ProjectSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Reports stage progress through the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => info!("{}", event.message),
        }
    }
}

/// Writes a stage table to `data/<table>.json` as an array of row objects.
pub fn export_table<R: Serialize>(
    layout: &ProjectLayout,
    table: &str,
    rows: &[R],
) -> Result<Utf8PathBuf, GemproError> {
    let path = layout.table_path(table);
    ProjectLayout::write_json(&path, rows)?;
    Ok(path)
}
