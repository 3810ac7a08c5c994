use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::annotation::{SequenceRecord, UniprotEntry};
use crate::domain::{PdbId, UniprotAccession};
use crate::error::GemproError;
use crate::http::{Service, ServiceClient};

#[derive(Debug, Clone)]
pub struct UniprotRecord {
    pub raw_json: Value,
    pub fasta: String,
    pub metadata: UniprotMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct UniprotMetadata {
    pub accession: UniprotAccession,
    pub reviewed: bool,
    pub sequence_length: usize,
    pub gene_names: Vec<String>,
    pub description: Option<String>,
    pub pdb_ids: Vec<PdbId>,
    pub kegg_ids: Vec<String>,
    pub ec_numbers: Vec<String>,
    pub refseq_ids: Vec<String>,
    pub pfam_ids: Vec<String>,
    pub entry_version: Option<u32>,
    pub sequence_version: Option<u32>,
}

impl UniprotMetadata {
    pub fn into_entry(
        self,
        sequence_file: Option<Utf8PathBuf>,
        metadata_file: Option<Utf8PathBuf>,
    ) -> UniprotEntry {
        UniprotEntry {
            record: SequenceRecord {
                accession: Some(self.accession),
                external_id: (!self.kegg_ids.is_empty()).then(|| self.kegg_ids.join(";")),
                length: self.sequence_length,
                structure_ids: self.pdb_ids,
                sequence_file,
                metadata_file,
            },
            reviewed: self.reviewed,
            gene_names: self.gene_names,
            description: self.description,
            kegg_ids: self.kegg_ids,
            ec_numbers: self.ec_numbers,
            refseq_ids: self.refseq_ids,
            pfam_ids: self.pfam_ids,
            entry_version: self.entry_version,
            sequence_version: self.sequence_version,
        }
    }
}

pub trait UniprotClient: Send + Sync {
    /// Maps ids of `source_db` (UniProt id-mapping database name, e.g.
    /// `EnsemblGenome`) to accessions. Unmapped ids are absent.
    fn map_ids(
        &self,
        source_db: &str,
        ids: &[String],
    ) -> Result<IndexMap<String, Vec<UniprotAccession>>, GemproError>;

    fn fetch(&self, accession: &UniprotAccession) -> Result<UniprotRecord, GemproError>;
}

#[derive(Clone)]
pub struct UniprotHttpClient {
    http: ServiceClient,
}

const MAPPING_BATCH: usize = 1000;
const MAPPING_POLLS: usize = 60;

impl UniprotHttpClient {
    pub fn new() -> Result<Self, GemproError> {
        Ok(Self {
            http: ServiceClient::new(Service::Uniprot, Duration::from_secs(30))?,
        })
    }

    fn metadata_url(accession: &UniprotAccession) -> String {
        format!("https://rest.uniprot.org/uniprotkb/{}.json", accession.as_str())
    }

    fn fasta_url(accession: &UniprotAccession) -> String {
        format!("https://rest.uniprot.org/uniprotkb/{}.fasta", accession.as_str())
    }

    fn submit_mapping(&self, source_db: &str, ids: &[String]) -> Result<String, GemproError> {
        let joined = ids.join(",");
        let form = [("from", source_db), ("to", "UniProtKB"), ("ids", joined.as_str())];
        let response = self.http.send_with_retries(|| {
            self.http
                .client()
                .post("https://rest.uniprot.org/idmapping/run")
                .form(&form)
        })?;
        let response = self.http.handle_status(response)?;
        let body: Value = response
            .json()
            .map_err(|err| GemproError::UniprotHttp(err.to_string()))?;
        body.get("jobId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                GemproError::UniprotHttp("id mapping response without jobId".to_string())
            })
    }

    fn wait_for_mapping(&self, job_id: &str) -> Result<(), GemproError> {
        let url = format!("https://rest.uniprot.org/idmapping/status/{job_id}");
        for _ in 0..MAPPING_POLLS {
            let status = self
                .http
                .get_json_optional(&url)?
                .ok_or_else(|| GemproError::UniprotHttp(format!("unknown mapping job {job_id}")))?;
            if status.get("results").is_some() || status.get("failedIds").is_some() {
                return Ok(());
            }
            match status.get("jobStatus").and_then(Value::as_str) {
                Some("FINISHED") => return Ok(()),
                Some("ERROR") | Some("FAILURE") => {
                    return Err(GemproError::UniprotHttp(format!(
                        "id mapping job {job_id} failed"
                    )));
                }
                _ => thread::sleep(Duration::from_secs(1)),
            }
        }
        Err(GemproError::UniprotMappingTimeout(job_id.to_string()))
    }
}

impl UniprotClient for UniprotHttpClient {
    fn map_ids(
        &self,
        source_db: &str,
        ids: &[String],
    ) -> Result<IndexMap<String, Vec<UniprotAccession>>, GemproError> {
        let mut mapping: IndexMap<String, Vec<UniprotAccession>> = IndexMap::new();
        for batch in ids.chunks(MAPPING_BATCH) {
            let job_id = self.submit_mapping(source_db, batch)?;
            debug!("uniprot id mapping job {job_id} for {} ids", batch.len());
            self.wait_for_mapping(&job_id)?;
            let results = self
                .http
                .get_json_optional(&format!(
                    "https://rest.uniprot.org/idmapping/stream/{job_id}"
                ))?
                .unwrap_or(Value::Null);
            for (from, accession) in parse_mapping_results(&results) {
                let entry = mapping.entry(from).or_default();
                if !entry.contains(&accession) {
                    entry.push(accession);
                }
            }
        }
        Ok(mapping)
    }

    fn fetch(&self, accession: &UniprotAccession) -> Result<UniprotRecord, GemproError> {
        let raw_json = self
            .http
            .get_json_optional(&Self::metadata_url(accession))?
            .ok_or_else(|| GemproError::UniprotStatus {
                status: 404,
                message: format!("no UniProt entry {accession}"),
            })?;
        let fasta = self
            .http
            .get_text_optional(&Self::fasta_url(accession))?
            .unwrap_or_default();
        let metadata = extract_metadata(&raw_json)?;

        Ok(UniprotRecord {
            raw_json,
            fasta,
            metadata,
        })
    }
}

/// `(from, accession)` pairs of an id-mapping result page. `to` is either a
/// bare accession or a full UniProtKB entry.
pub fn parse_mapping_results(raw: &Value) -> Vec<(String, UniprotAccession)> {
    let Some(results) = raw.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|item| {
            let from = item.get("from").and_then(Value::as_str)?;
            let to = item.get("to")?;
            let accession = to
                .as_str()
                .or_else(|| to.get("primaryAccession").and_then(Value::as_str))?;
            Some((from.to_string(), accession.parse().ok()?))
        })
        .collect()
}

pub fn extract_metadata(raw: &Value) -> Result<UniprotMetadata, GemproError> {
    let accession = raw
        .get("primaryAccession")
        .and_then(Value::as_str)
        .ok_or_else(|| GemproError::UniprotHttp("entry without primaryAccession".to_string()))?;
    let accession = accession.parse::<UniprotAccession>().map_err(|_| {
        GemproError::UniprotHttp(format!("malformed primaryAccession {accession}"))
    })?;
    let reviewed = raw
        .get("entryType")
        .and_then(Value::as_str)
        .is_some_and(is_reviewed_entry_type);
    let sequence_length = raw
        .get("sequence")
        .and_then(|v| v.get("length"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;

    let description = raw
        .get("proteinDescription")
        .and_then(|v| v.get("recommendedName"))
        .and_then(|v| v.get("fullName"))
        .and_then(|v| v.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            raw.get("proteinDescription")
                .and_then(|v| v.get("submissionNames"))
                .and_then(Value::as_array)
                .and_then(|arr| arr.first())
                .and_then(|v| v.get("fullName"))
                .and_then(|v| v.get("value"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

    let ec_numbers = raw
        .get("proteinDescription")
        .and_then(|v| v.get("recommendedName"))
        .and_then(|v| v.get("ecNumbers"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.get("value").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut gene_names = Vec::new();
    if let Some(genes) = raw.get("genes").and_then(Value::as_array) {
        for gene in genes {
            if let Some(name) = gene
                .get("geneName")
                .and_then(|v| v.get("value"))
                .and_then(Value::as_str)
            {
                gene_names.push(name.to_string());
            }
        }
    }

    let mut pdb_ids: Vec<PdbId> = Vec::new();
    let mut kegg_ids = Vec::new();
    let mut refseq_ids = Vec::new();
    let mut pfam_ids = Vec::new();
    if let Some(xrefs) = raw.get("uniProtKBCrossReferences").and_then(Value::as_array) {
        for xref in xrefs {
            let database = xref.get("database").and_then(Value::as_str);
            let Some(id) = xref.get("id").and_then(Value::as_str) else {
                continue;
            };
            match database {
                Some("PDB") => {
                    if let Ok(pdb) = id.parse::<PdbId>() {
                        if !pdb_ids.contains(&pdb) {
                            pdb_ids.push(pdb);
                        }
                    }
                }
                Some("KEGG") => kegg_ids.push(id.to_string()),
                Some("RefSeq") => refseq_ids.push(id.to_string()),
                Some("Pfam") => pfam_ids.push(id.to_string()),
                _ => {}
            }
        }
    }

    let audit = raw.get("entryAudit");
    let entry_version = audit
        .and_then(|v| v.get("entryVersion"))
        .and_then(Value::as_u64)
        .map(|v| v as u32);
    let sequence_version = audit
        .and_then(|v| v.get("sequenceVersion"))
        .and_then(Value::as_u64)
        .map(|v| v as u32);

    Ok(UniprotMetadata {
        accession,
        reviewed,
        sequence_length,
        gene_names,
        description,
        pdb_ids,
        kegg_ids,
        ec_numbers,
        refseq_ids,
        pfam_ids,
        entry_version,
        sequence_version,
    })
}

fn is_reviewed_entry_type(kind: &str) -> bool {
    let lower = kind.to_ascii_lowercase();
    lower.contains("swiss-prot") || (lower.contains("reviewed") && !lower.contains("unreviewed"))
}
