use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GemproError {
    #[error("invalid gene id: {0}")]
    InvalidGeneId(String),

    #[error("invalid UniProt accession: {0}")]
    InvalidUniprotAccession(String),

    #[error("invalid PDB id: {0}")]
    InvalidPdbId(String),

    #[error("invalid chain id: {0}")]
    InvalidChainId(String),

    #[error("invalid structure key (expected <pdb>_<chain>): {0}")]
    InvalidStructureKey(String),

    #[error("invalid homology model id: {0}")]
    InvalidModelId(String),

    #[error("gene not found in project: {0}")]
    UnknownGene(String),

    #[error("missing config file gempro.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("malformed manual input: {0}")]
    #[diagnostic(help("manual homology models need a \"model_file\" entry"))]
    InvalidManualInput(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("KEGG request failed: {0}")]
    KeggHttp(String),

    #[error("KEGG returned status {status}: {message}")]
    KeggStatus { status: u16, message: String },

    #[error("uniprot request failed: {0}")]
    UniprotHttp(String),

    #[error("uniprot returned status {status}: {message}")]
    UniprotStatus { status: u16, message: String },

    #[error("uniprot id mapping job {0} did not finish in time")]
    UniprotMappingTimeout(String),

    #[error("PDB request failed: {0}")]
    PdbHttp(String),

    #[error("PDB returned status {status}: {message}")]
    PdbStatus { status: u16, message: String },

    #[error("failed to parse structure file {path}: {message}")]
    StructureParse { path: String, message: String },

    #[error("homology model output error: {0}")]
    Homology(String),
}

impl GemproError {
    /// Failures of a remote service or a per-gene file operation. The
    /// aggregator skips the affected gene instead of aborting the run.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            GemproError::Filesystem(_)
                | GemproError::KeggHttp(_)
                | GemproError::KeggStatus { .. }
                | GemproError::UniprotHttp(_)
                | GemproError::UniprotStatus { .. }
                | GemproError::UniprotMappingTimeout(_)
                | GemproError::PdbHttp(_)
                | GemproError::PdbStatus { .. }
                | GemproError::StructureParse { .. }
                | GemproError::Homology(_)
        )
    }
}
