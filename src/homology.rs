//! Homology model output on disk.

use std::fs;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::annotation::HomologyRecord;
use crate::error::GemproError;
use crate::layout::ProjectLayout;

pub trait HomologySource: Send + Sync {
    /// Copies the top model found in `raw_dir` into `copy_to_dir` as
    /// `<rename_to>_model1.pdb`. `None` when the run produced no model.
    fn organize(
        &self,
        raw_dir: &Utf8Path,
        copy_to_dir: &Utf8Path,
        rename_to: &str,
    ) -> Result<Option<HomologyRecord>, GemproError>;
}

/// Reads I-TASSER run folders: `model1.pdb` plus the optional `cscore`
/// summary table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItasserOrganizer;

const MODEL_FILE: &str = "model1.pdb";
const CSCORE_FILE: &str = "cscore";

impl HomologySource for ItasserOrganizer {
    fn organize(
        &self,
        raw_dir: &Utf8Path,
        copy_to_dir: &Utf8Path,
        rename_to: &str,
    ) -> Result<Option<HomologyRecord>, GemproError> {
        let model = raw_dir.join(MODEL_FILE);
        if !model.is_file() {
            debug!("no {MODEL_FILE} in {raw_dir}");
            return Ok(None);
        }

        let copied = ProjectLayout::copy_file_atomic(
            &model,
            copy_to_dir,
            Some(&format!("{rename_to}_model1.pdb")),
        )?;
        let mut record = HomologyRecord::new(copied, 1.0);
        record.model_date = fs::metadata(model.as_std_path())
            .and_then(|meta| meta.modified())
            .ok()
            .map(|modified| DateTime::<Utc>::from(modified).date_naive());

        let cscore = raw_dir.join(CSCORE_FILE);
        if cscore.is_file() {
            let content = fs::read_to_string(cscore.as_std_path())
                .map_err(|err| GemproError::Homology(format!("read {cscore}: {err}")))?;
            if let Some(scores) = parse_cscore(&content) {
                record.c_score = Some(scores.c_score);
                record.tm_score = Some(scores.tm_score);
                record.tm_score_err = Some(scores.tm_score_err);
                record.rmsd = Some(scores.rmsd);
                record.rmsd_err = Some(scores.rmsd_err);
            }
        }
        Ok(Some(record))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelScores {
    pub c_score: f64,
    pub tm_score: f64,
    pub tm_score_err: f64,
    pub rmsd: f64,
    pub rmsd_err: f64,
}

/// Scores of `model1` from a `cscore` table, where TM-score and RMSD are
/// written as `value+-error`.
pub fn parse_cscore(content: &str) -> Option<ModelScores> {
    let line = content
        .lines()
        .find(|line| line.split_whitespace().next() == Some("model1"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }
    let c_score = fields[1].parse().ok()?;
    let (tm_score, tm_score_err) = split_with_error(fields[2])?;
    let (rmsd, rmsd_err) = split_with_error(fields[3])?;
    Some(ModelScores {
        c_score,
        tm_score,
        tm_score_err,
        rmsd,
        rmsd_err,
    })
}

fn split_with_error(field: &str) -> Option<(f64, f64)> {
    let (value, err) = field.split_once("+-")?;
    Some((value.parse().ok()?, err.parse().ok()?))
}
