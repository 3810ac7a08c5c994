use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GemproError;

static UNIPROT_ACCESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([OPQ][0-9][A-Z0-9]{3}[0-9]|[A-NR-Z][0-9]([A-Z][A-Z0-9]{2}[0-9]){1,2})(-\d+)?$")
        .expect("uniprot accession pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GeneId(String);

impl GeneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeneId {
    type Err = GemproError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && !trimmed.contains(['/', '\\'])
            && !trimmed.chars().any(char::is_whitespace);
        if !is_valid {
            return Err(GemproError::InvalidGeneId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for GeneId {
    type Error = GemproError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GeneId> for String {
    fn from(value: GeneId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniprotAccession(String);

impl UniprotAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniprotAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UniprotAccession {
    type Err = GemproError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !UNIPROT_ACCESSION.is_match(&normalized) {
            return Err(GemproError::InvalidUniprotAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for UniprotAccession {
    type Error = GemproError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UniprotAccession> for String {
    fn from(value: UniprotAccession) -> Self {
        value.0
    }
}

/// Four character PDB entry id, stored lowercase to match downloaded file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PdbId(String);

impl PdbId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PdbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PdbId {
    type Err = GemproError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let is_valid = normalized.len() == 4
            && normalized.chars().all(|ch| ch.is_ascii_alphanumeric())
            && normalized.starts_with(|ch: char| ch.is_ascii_digit());
        if !is_valid {
            return Err(GemproError::InvalidPdbId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for PdbId {
    type Error = GemproError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PdbId> for String {
    fn from(value: PdbId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId(String);

impl ChainId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChainId {
    type Err = GemproError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // Chain ids are case-sensitive: `A` and `a` are distinct chains.
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed.len() <= 4
            && trimmed.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(GemproError::InvalidChainId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for ChainId {
    type Error = GemproError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChainId> for String {
    fn from(value: ChainId) -> Self {
        value.0
    }
}

/// A (structure, chain) pair. Serialized as `<pdb>_<chain>` so it can be used
/// as a JSON object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StructureKey {
    pub pdb: PdbId,
    pub chain: ChainId,
}

impl StructureKey {
    pub fn new(pdb: PdbId, chain: ChainId) -> Self {
        Self { pdb, chain }
    }
}

impl fmt::Display for StructureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.pdb, self.chain)
    }
}

impl FromStr for StructureKey {
    type Err = GemproError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (pdb, chain) = value
            .trim()
            .split_once('_')
            .ok_or_else(|| GemproError::InvalidStructureKey(value.to_string()))?;
        Ok(Self {
            pdb: pdb.parse()?,
            chain: chain.parse()?,
        })
    }
}

impl TryFrom<String> for StructureKey {
    type Error = GemproError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StructureKey> for String {
    fn from(value: StructureKey) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(String);

impl ModelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ModelId {
    type Err = GemproError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.contains(['/', '\\']) {
            return Err(GemproError::InvalidModelId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for ModelId {
    type Error = GemproError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelId> for String {
    fn from(value: ModelId) -> Self {
        value.0
    }
}

/// Identity of a representative structure: an experimental chain or a
/// homology model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum StructureId {
    Experimental(StructureKey),
    Homology(ModelId),
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureId::Experimental(key) => write!(f, "{key}"),
            StructureId::Homology(model) => write!(f, "{model}"),
        }
    }
}

/// Field used to rank homology models; the highest value wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HomologySortKey {
    #[default]
    SeqCoverage,
    CScore,
    TmScore,
    ModelDate,
}

impl fmt::Display for HomologySortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HomologySortKey::SeqCoverage => write!(f, "seq_coverage"),
            HomologySortKey::CScore => write!(f, "c_score"),
            HomologySortKey::TmScore => write!(f, "tm_score"),
            HomologySortKey::ModelDate => write!(f, "model_date"),
        }
    }
}
