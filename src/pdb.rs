use std::time::Duration;

use camino::Utf8Path;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use crate::domain::{ChainId, PdbId, UniprotAccession};
use crate::error::GemproError;
use crate::http::{Service, ServiceClient};
use crate::layout::ProjectLayout;

/// One chain from the ranked structure list of a UniProt entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedStructure {
    pub pdb_id: PdbId,
    pub chain_id: ChainId,
    pub experimental_method: Option<String>,
    pub resolution: Option<f64>,
    pub coverage: f64,
    pub taxonomy_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdbEntryMetadata {
    pub pdb_id: PdbId,
    pub title: Option<String>,
    pub experimental_method: Option<String>,
    pub resolution: Option<f64>,
    pub release_date: Option<NaiveDate>,
}

pub trait PdbClient: Send + Sync {
    /// Chains covering `accession`, best first. Chains whose coverage is
    /// below `seq_ident_cutoff` are left out.
    fn best_structures(
        &self,
        accession: &UniprotAccession,
        seq_ident_cutoff: f64,
    ) -> Result<Vec<RankedStructure>, GemproError>;

    /// `None` when the entry is unknown.
    fn entry_metadata(&self, pdb: &PdbId) -> Result<Option<PdbEntryMetadata>, GemproError>;

    /// Fetches the PDB-format file of `pdb` to `destination`.
    fn download_structure(&self, pdb: &PdbId, destination: &Utf8Path) -> Result<(), GemproError>;
}

#[derive(Clone)]
pub struct PdbHttpClient {
    http: ServiceClient,
}

impl PdbHttpClient {
    pub fn new() -> Result<Self, GemproError> {
        Ok(Self {
            http: ServiceClient::new(Service::Pdb, Duration::from_secs(30))?,
        })
    }

    pub fn structure_url(pdb: &PdbId) -> String {
        format!("https://files.rcsb.org/download/{}.pdb", pdb.as_str())
    }

    fn best_structures_url(accession: &UniprotAccession) -> String {
        format!(
            "https://www.ebi.ac.uk/pdbe/api/mappings/best_structures/{}",
            accession.as_str()
        )
    }

    fn metadata_url(pdb: &PdbId) -> String {
        format!("https://data.rcsb.org/rest/v1/core/entry/{}", pdb.as_str())
    }
}

impl PdbClient for PdbHttpClient {
    fn best_structures(
        &self,
        accession: &UniprotAccession,
        seq_ident_cutoff: f64,
    ) -> Result<Vec<RankedStructure>, GemproError> {
        let Some(raw) = self.http.get_json_optional(&Self::best_structures_url(accession))? else {
            return Ok(Vec::new());
        };
        Ok(parse_best_structures(&raw, accession, seq_ident_cutoff))
    }

    fn entry_metadata(&self, pdb: &PdbId) -> Result<Option<PdbEntryMetadata>, GemproError> {
        let raw = self.http.get_json_optional(&Self::metadata_url(pdb))?;
        Ok(raw.map(|raw| parse_entry_metadata(pdb, &raw)))
    }

    fn download_structure(&self, pdb: &PdbId, destination: &Utf8Path) -> Result<(), GemproError> {
        let url = Self::structure_url(pdb);
        let response = self.http.send_with_retries(|| self.http.client().get(&url))?;
        let mut response = self.http.handle_status(response)?;
        let parent = destination
            .parent()
            .ok_or_else(|| GemproError::Filesystem(format!("no parent for {destination}")))?;
        ProjectLayout::ensure_dir(parent)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".gempro-download")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| GemproError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| GemproError::Filesystem(err.to_string()))?;
        temp.persist(destination.as_std_path())
            .map_err(|err| GemproError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Reads the PDBe `best_structures` payload, keyed by accession.
pub fn parse_best_structures(
    raw: &Value,
    accession: &UniprotAccession,
    seq_ident_cutoff: f64,
) -> Vec<RankedStructure> {
    let Some(items) = raw.get(accession.as_str()).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let pdb_id = item.get("pdb_id").and_then(Value::as_str)?.parse().ok()?;
            let chain_id = item.get("chain_id").and_then(Value::as_str)?.parse().ok()?;
            let coverage = item.get("coverage").and_then(Value::as_f64).unwrap_or(0.0);
            Some(RankedStructure {
                pdb_id,
                chain_id,
                experimental_method: item
                    .get("experimental_method")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                resolution: item.get("resolution").and_then(Value::as_f64),
                coverage,
                taxonomy_id: item
                    .get("tax_id")
                    .and_then(Value::as_u64)
                    .and_then(|id| u32::try_from(id).ok()),
            })
        })
        .filter(|structure| structure.coverage >= seq_ident_cutoff)
        .collect()
}

pub fn parse_entry_metadata(pdb: &PdbId, raw: &Value) -> PdbEntryMetadata {
    let title = raw
        .get("struct")
        .and_then(|value| value.get("title"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let experimental_method = raw
        .get("exptl")
        .and_then(Value::as_array)
        .and_then(|array| array.first())
        .and_then(|value| value.get("method"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let resolution = raw
        .get("rcsb_entry_info")
        .and_then(|value| value.get("resolution_combined"))
        .and_then(Value::as_array)
        .and_then(|array| array.first())
        .and_then(Value::as_f64);
    let release_date = raw
        .get("rcsb_accession_info")
        .and_then(|value| value.get("initial_release_date"))
        .and_then(Value::as_str)
        .and_then(parse_release_date);

    PdbEntryMetadata {
        pdb_id: pdb.clone(),
        title,
        experimental_method,
        resolution,
        release_date,
    }
}

/// RCSB dates look like `2000-02-04T00:00:00+0000`; only the day is kept.
fn parse_release_date(value: &str) -> Option<NaiveDate> {
    let day = value.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}
