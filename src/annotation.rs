//! Per-gene annotation records.
//!
//! Every gene owns one [`SequenceAnnotation`] and one [`StructureAnnotation`].
//! Each holds separate provenance slots (KEGG, UniProt, ranked PDB, BLAST,
//! homology) plus a `representative` slot filled by the resolvers. Ordered
//! slots use [`IndexMap`] because ranking ties and the structure search are
//! decided by insertion order.

use std::cmp::Ordering;
use std::fmt;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    GeneId, HomologySortKey, ModelId, PdbId, StructureId, StructureKey, UniprotAccession,
};

/// Shared shape of the KEGG, UniProt and representative sequence slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    #[serde(default)]
    pub accession: Option<UniprotAccession>,
    /// Database id outside UniProt, e.g. `eco:b0001` for KEGG.
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub structure_ids: Vec<PdbId>,
    #[serde(default)]
    pub sequence_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub metadata_file: Option<Utf8PathBuf>,
}

impl SequenceRecord {
    pub fn has_sequence(&self) -> bool {
        self.length > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniprotEntry {
    #[serde(flatten)]
    pub record: SequenceRecord,
    #[serde(default)]
    pub reviewed: bool,
    #[serde(default)]
    pub gene_names: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kegg_ids: Vec<String>,
    #[serde(default)]
    pub ec_numbers: Vec<String>,
    #[serde(default)]
    pub refseq_ids: Vec<String>,
    #[serde(default)]
    pub pfam_ids: Vec<String>,
    #[serde(default)]
    pub entry_version: Option<u32>,
    #[serde(default)]
    pub sequence_version: Option<u32>,
}

impl UniprotEntry {
    /// Rank used when several UniProt entries map to one gene: a reviewed
    /// entry scores one point, each mapped structure one more.
    pub fn ranking_score(&self) -> usize {
        usize::from(self.reviewed) + self.record.structure_ids.len()
    }
}

/// Which slot the representative sequence was taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "accession", rename_all = "lowercase")]
pub enum SequenceOrigin {
    Kegg,
    Uniprot(UniprotAccession),
    Manual,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceAnnotation {
    #[serde(default)]
    pub kegg: Option<SequenceRecord>,
    #[serde(default)]
    pub uniprot: IndexMap<UniprotAccession, UniprotEntry>,
    #[serde(default)]
    pub representative: SequenceRecord,
    #[serde(default)]
    pub representative_origin: Option<SequenceOrigin>,
}

impl SequenceAnnotation {
    pub fn has_kegg(&self) -> bool {
        self.kegg.as_ref().is_some_and(SequenceRecord::has_sequence)
    }

    pub fn has_uniprot(&self) -> bool {
        !self.uniprot.is_empty()
    }

    /// A representative with a non-zero length is final.
    pub fn is_resolved(&self) -> bool {
        self.representative.has_sequence()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdbSource {
    Ranked,
    Blast,
}

impl fmt::Display for PdbSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdbSource::Ranked => write!(f, "ranked"),
            PdbSource::Blast => write!(f, "blast"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdbRecord {
    pub source: PdbSource,
    #[serde(default)]
    pub experimental_method: Option<String>,
    /// Angstroms; `None` means unknown and sorts as infinitely bad.
    #[serde(default)]
    pub resolution: Option<f64>,
    #[serde(default)]
    pub sequence_coverage: f64,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    /// 1 is best. Only ranked entries carry a rank.
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub uniprot_accession: Option<UniprotAccession>,
    #[serde(default)]
    pub taxonomy_id: Option<u32>,
    #[serde(default)]
    pub blast_score: Option<f64>,
    #[serde(default)]
    pub blast_evalue: Option<f64>,
    #[serde(default)]
    pub structure_file: Option<Utf8PathBuf>,
}

impl PdbRecord {
    pub fn new(source: PdbSource, sequence_coverage: f64) -> Self {
        Self {
            source,
            experimental_method: None,
            resolution: None,
            sequence_coverage,
            release_date: None,
            rank: None,
            uniprot_accession: None,
            taxonomy_id: None,
            blast_score: None,
            blast_evalue: None,
            structure_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomologyRecord {
    pub model_file: Utf8PathBuf,
    #[serde(default, alias = "seq_coverage")]
    pub sequence_coverage: f64,
    #[serde(default)]
    pub c_score: Option<f64>,
    #[serde(default)]
    pub tm_score: Option<f64>,
    #[serde(default)]
    pub tm_score_err: Option<f64>,
    #[serde(default)]
    pub rmsd: Option<f64>,
    #[serde(default)]
    pub rmsd_err: Option<f64>,
    #[serde(default)]
    pub model_date: Option<NaiveDate>,
    #[serde(default)]
    pub top_template: Option<StructureKey>,
    /// Free-form fields carried over from manual input.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl HomologyRecord {
    pub fn new(model_file: Utf8PathBuf, sequence_coverage: f64) -> Self {
        Self {
            model_file,
            sequence_coverage,
            c_score: None,
            tm_score: None,
            tm_score_err: None,
            rmsd: None,
            rmsd_err: None,
            model_date: None,
            top_template: None,
            extra: IndexMap::new(),
        }
    }

    /// Descending order by `key`; models missing the field sort last.
    pub fn compare_desc(&self, other: &Self, key: HomologySortKey) -> Ordering {
        match key {
            HomologySortKey::SeqCoverage => {
                desc_f64(Some(self.sequence_coverage), Some(other.sequence_coverage))
            }
            HomologySortKey::CScore => desc_f64(self.c_score, other.c_score),
            HomologySortKey::TmScore => desc_f64(self.tm_score, other.tm_score),
            HomologySortKey::ModelDate => match (self.model_date, other.model_date) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        }
    }
}

fn desc_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    let a = a.filter(|value| !value.is_nan());
    let b = b.filter(|value| !value.is_nan());
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepresentativeStructure {
    #[serde(default)]
    pub structure_id: Option<StructureId>,
    #[serde(default)]
    pub sequence_coverage: f64,
    #[serde(default)]
    pub original_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub clean_file: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureAnnotation {
    #[serde(default)]
    pub pdb: IndexMap<StructureKey, PdbRecord>,
    #[serde(default)]
    pub homology: IndexMap<ModelId, HomologyRecord>,
    #[serde(default)]
    pub representative: RepresentativeStructure,
}

impl StructureAnnotation {
    pub fn has_pdb(&self) -> bool {
        !self.pdb.is_empty()
    }

    pub fn has_homology(&self) -> bool {
        !self.homology.is_empty()
    }

    pub fn is_resolved(&self) -> bool {
        self.representative.structure_id.is_some()
    }

    /// Unique PDB entries in first-seen order.
    pub fn pdb_ids(&self) -> Vec<PdbId> {
        let mut ids: Vec<PdbId> = Vec::new();
        for key in self.pdb.keys() {
            if !ids.contains(&key.pdb) {
                ids.push(key.pdb.clone());
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Kegg,
    Uniprot,
    Manual,
    PdbRanked,
    Blast,
    Homology,
    Representative,
}

impl From<PdbSource> for Provenance {
    fn from(value: PdbSource) -> Self {
        match value {
            PdbSource::Ranked => Provenance::PdbRanked,
            PdbSource::Blast => Provenance::Blast,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationEvent {
    pub at: String,
    pub provenance: Provenance,
    pub action: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    pub id: GeneId,
    #[serde(default)]
    pub sequence: SequenceAnnotation,
    #[serde(default)]
    pub structure: StructureAnnotation,
    #[serde(default)]
    pub history: Vec<AnnotationEvent>,
}

impl Gene {
    pub fn new(id: GeneId) -> Self {
        Self {
            id,
            sequence: SequenceAnnotation::default(),
            structure: StructureAnnotation::default(),
            history: Vec::new(),
        }
    }

    pub fn record_event(
        &mut self,
        provenance: Provenance,
        action: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.history.push(AnnotationEvent {
            at: chrono::Utc::now().to_rfc3339(),
            provenance,
            action: action.into(),
            detail: detail.into(),
        });
    }

    pub fn set_kegg(&mut self, record: SequenceRecord) {
        let detail = record.external_id.clone().unwrap_or_default();
        self.sequence.kegg = Some(record);
        self.record_event(Provenance::Kegg, "upsert", detail);
    }

    pub fn upsert_uniprot(&mut self, entry: UniprotEntry) -> bool {
        let Some(accession) = entry.record.accession.clone() else {
            self.record_event(Provenance::Uniprot, "dropped", "entry without accession");
            return false;
        };
        self.sequence.uniprot.insert(accession.clone(), entry);
        self.record_event(Provenance::Uniprot, "upsert", accession.to_string());
        true
    }

    /// Adds a PDB candidate unless the key is already present; existing
    /// entries keep their fields and position. Returns whether it was added.
    pub fn merge_pdb(&mut self, key: StructureKey, record: PdbRecord) -> bool {
        let provenance = Provenance::from(record.source);
        if self.structure.pdb.contains_key(&key) {
            self.record_event(provenance, "kept-existing", key.to_string());
            return false;
        }
        self.structure.pdb.insert(key.clone(), record);
        self.record_event(provenance, "upsert", key.to_string());
        true
    }

    pub fn merge_homology(&mut self, model: ModelId, record: HomologyRecord) -> bool {
        if self.structure.homology.contains_key(&model) {
            self.record_event(Provenance::Homology, "kept-existing", model.to_string());
            return false;
        }
        self.structure.homology.insert(model.clone(), record);
        self.record_event(Provenance::Homology, "upsert", model.to_string());
        true
    }

    /// Manual path: overwrites a homology entry in place.
    pub fn replace_homology(&mut self, model: ModelId, record: HomologyRecord) {
        self.structure.homology.insert(model.clone(), record);
        self.record_event(Provenance::Manual, "replace-homology", model.to_string());
    }

    /// Manual override of the representative sequence. Later resolver calls
    /// short-circuit on it.
    pub fn override_representative_sequence(&mut self, record: SequenceRecord) {
        let detail = record
            .accession
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| record.sequence_file.as_ref().map(ToString::to_string))
            .unwrap_or_default();
        self.sequence.representative = record;
        self.sequence.representative_origin = Some(SequenceOrigin::Manual);
        self.record_event(Provenance::Manual, "override-representative", detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(value: &str) -> StructureKey {
        value.parse().unwrap()
    }

    #[test]
    fn merge_pdb_keeps_first_entry() {
        let mut gene = Gene::new("b0001".parse().unwrap());
        let mut ranked = PdbRecord::new(PdbSource::Ranked, 0.9);
        ranked.rank = Some(1);
        assert!(gene.merge_pdb(key("1abc_A"), ranked.clone()));
        assert!(!gene.merge_pdb(key("1abc_A"), PdbRecord::new(PdbSource::Blast, 0.4)));

        assert_eq!(gene.structure.pdb[&key("1abc_A")], ranked);
        assert_eq!(gene.history.last().unwrap().action, "kept-existing");
    }

    #[test]
    fn homology_compare_puts_missing_last() {
        let mut a = HomologyRecord::new("a.pdb".into(), 1.0);
        let b = HomologyRecord::new("b.pdb".into(), 0.5);
        a.c_score = Some(-1.2);
        assert_eq!(a.compare_desc(&b, HomologySortKey::CScore), Ordering::Less);
        assert_eq!(
            a.compare_desc(&b, HomologySortKey::SeqCoverage),
            Ordering::Less
        );
        assert_eq!(
            b.compare_desc(&a, HomologySortKey::SeqCoverage),
            Ordering::Greater
        );
    }

    #[test]
    fn serialized_gene_keeps_pdb_order() {
        let mut gene = Gene::new("b0001".parse().unwrap());
        gene.merge_pdb(key("2xyz_B"), PdbRecord::new(PdbSource::Ranked, 0.8));
        gene.merge_pdb(key("1abc_A"), PdbRecord::new(PdbSource::Ranked, 0.7));

        let json = serde_json::to_string(&gene).unwrap();
        let restored: Gene = serde_json::from_str(&json).unwrap();
        let keys: Vec<String> = restored.structure.pdb.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["2xyz_B", "1abc_A"]);
    }
}
