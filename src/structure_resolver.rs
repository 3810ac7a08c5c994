//! Choice of one representative structure per gene.
//!
//! Experimental chains are searched in PDB-entry insertion order, then chain
//! insertion order, and the first chain passing the quality check wins.
//! Homology models are ranked by a configurable field and trusted without a
//! check. Parallel callers fan out across genes; candidates of one gene are
//! always visited sequentially.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::annotation::{Gene, Provenance, RepresentativeStructure};
use crate::domain::{ChainId, GeneId, HomologySortKey, PdbId, StructureId, StructureKey};
use crate::error::GemproError;
use crate::fasta;
use crate::layout::ProjectLayout;
use crate::pdb::PdbClient;
use crate::pdbfile;
use crate::qc::{QcParams, QualityCheck};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructureOptions {
    pub prefer_homology: bool,
    pub homology_sort_key: HomologySortKey,
    pub qc: QcParams,
}

impl Default for StructureOptions {
    fn default() -> Self {
        Self {
            prefer_homology: true,
            homology_sort_key: HomologySortKey::default(),
            qc: QcParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "structure_id", rename_all = "snake_case")]
pub enum StructureResolution {
    Resolved(StructureId),
    AlreadySet,
    NoStructure,
}

/// File access needed while checking and cleaning candidates.
pub trait StructureFiles: Send + Sync {
    /// The gene's representative protein sequence, if one was written.
    fn reference_sequence(&self, gene: &Gene) -> Result<Option<String>, GemproError>;

    /// Local structure file of a PDB entry, fetched when absent.
    fn structure_file(&self, gene: &GeneId, pdb: &PdbId)
    -> Result<Option<Utf8PathBuf>, GemproError>;

    fn chain_sequence(&self, file: &Utf8Path, chain: &ChainId)
    -> Result<Option<String>, GemproError>;

    /// Writes a cleaned copy of `source`, restricted to `keep_chain` when set.
    fn write_cleaned(
        &self,
        gene: &GeneId,
        source: &Utf8Path,
        keep_chain: Option<&ChainId>,
    ) -> Result<Utf8PathBuf, GemproError>;
}

pub struct RepresentativeStructureResolver<Q, F> {
    qc: Q,
    files: F,
}

impl<Q: QualityCheck, F: StructureFiles> RepresentativeStructureResolver<Q, F> {
    pub fn new(qc: Q, files: F) -> Self {
        Self { qc, files }
    }

    /// Per-candidate problems (missing file, missing chain, unreadable file,
    /// failed clean-up) count as a failed check and the search continues.
    /// Only a failure to write the chosen homology model is returned.
    pub fn resolve(
        &self,
        gene: &mut Gene,
        options: &StructureOptions,
    ) -> Result<StructureResolution, GemproError> {
        if gene.structure.is_resolved() {
            return Ok(StructureResolution::AlreadySet);
        }
        let has_pdb = gene.structure.has_pdb();
        let has_homology = gene.structure.has_homology();
        if !has_pdb && !has_homology {
            debug!("{}: no structures mapped", gene.id);
            return Ok(StructureResolution::NoStructure);
        }

        if has_pdb && (!options.prefer_homology || !has_homology) {
            if let Some(id) = self.resolve_experimental(gene, &options.qc) {
                return Ok(StructureResolution::Resolved(id));
            }
            if !has_homology {
                debug!("{}: no experimental chain passed the quality check", gene.id);
                return Ok(StructureResolution::NoStructure);
            }
            debug!("{}: falling back to homology models", gene.id);
        }

        self.resolve_homology(gene, options.homology_sort_key)
    }

    fn resolve_experimental(&self, gene: &mut Gene, params: &QcParams) -> Option<StructureId> {
        let reference = match self.files.reference_sequence(gene) {
            Ok(Some(sequence)) if !sequence.is_empty() => sequence,
            Ok(_) => {
                warn!("{}: no representative sequence to check structures against", gene.id);
                return None;
            }
            Err(err) => {
                warn!("{}: reading representative sequence failed: {err}", gene.id);
                return None;
            }
        };

        for pdb in gene.structure.pdb_ids() {
            let Some(file) = self.locate(gene, &pdb) else {
                continue;
            };
            let chains: Vec<(StructureKey, f64)> = gene
                .structure
                .pdb
                .iter()
                .filter(|(key, _)| key.pdb == pdb)
                .map(|(key, record)| (key.clone(), record.sequence_coverage))
                .collect();

            for (key, coverage) in chains {
                let candidate = match self.files.chain_sequence(&file, &key.chain) {
                    Ok(Some(sequence)) => sequence,
                    Ok(None) => {
                        debug!("{}: chain {} not found in {file}", gene.id, key.chain);
                        continue;
                    }
                    Err(err) => {
                        warn!("{}: {key} skipped: {err}", gene.id);
                        continue;
                    }
                };
                if !self.qc.check(&reference, &candidate, params) {
                    debug!("{}: {key} failed the quality check", gene.id);
                    continue;
                }
                let clean_file = match self.files.write_cleaned(&gene.id, &file, Some(&key.chain)) {
                    Ok(path) => path,
                    Err(err) => {
                        warn!("{}: cleaning {key} failed: {err}", gene.id);
                        continue;
                    }
                };

                let id = StructureId::Experimental(key);
                gene.structure.representative = RepresentativeStructure {
                    structure_id: Some(id.clone()),
                    sequence_coverage: coverage,
                    original_file: Some(file),
                    clean_file: Some(clean_file),
                };
                gene.record_event(Provenance::Representative, "resolve-structure", id.to_string());
                return Some(id);
            }
        }
        None
    }

    /// Structure file for `pdb`, preferring a path already recorded on one of
    /// its chains. A fetched path is written back to every chain of the entry.
    fn locate(&self, gene: &mut Gene, pdb: &PdbId) -> Option<Utf8PathBuf> {
        let recorded = gene
            .structure
            .pdb
            .iter()
            .filter(|(key, _)| &key.pdb == pdb)
            .find_map(|(_, record)| record.structure_file.clone())
            .filter(|path| path.is_file());
        if recorded.is_some() {
            return recorded;
        }

        match self.files.structure_file(&gene.id, pdb) {
            Ok(Some(path)) => {
                for (key, record) in gene.structure.pdb.iter_mut() {
                    if &key.pdb == pdb {
                        record.structure_file = Some(path.clone());
                    }
                }
                Some(path)
            }
            Ok(None) => {
                debug!("{}: no structure file for {pdb}", gene.id);
                None
            }
            Err(err) => {
                warn!("{}: structure file for {pdb} unavailable: {err}", gene.id);
                None
            }
        }
    }

    fn resolve_homology(
        &self,
        gene: &mut Gene,
        sort_key: HomologySortKey,
    ) -> Result<StructureResolution, GemproError> {
        let mut models: Vec<_> = gene.structure.homology.iter().collect();
        models.sort_by(|(_, a), (_, b)| a.compare_desc(b, sort_key));
        let Some((model, record)) = models.first() else {
            return Ok(StructureResolution::NoStructure);
        };
        let model = (*model).clone();
        let original = record.model_file.clone();
        let coverage = record.sequence_coverage;

        let clean_file = self.files.write_cleaned(&gene.id, &original, None)?;
        let id = StructureId::Homology(model);
        gene.structure.representative = RepresentativeStructure {
            structure_id: Some(id.clone()),
            sequence_coverage: coverage,
            original_file: Some(original),
            clean_file: Some(clean_file),
        };
        gene.record_event(Provenance::Representative, "resolve-structure", id.to_string());
        Ok(StructureResolution::Resolved(id))
    }
}

/// [`StructureFiles`] over the project directories: sequences are read from
/// the representative FASTA, entries are looked up as
/// `structures/by_gene/<gene>/<pdb>.pdb` and downloaded when a client is set.
pub struct LocalStructureFiles<'a, P> {
    layout: &'a ProjectLayout,
    client: Option<&'a P>,
}

impl<'a, P: PdbClient> LocalStructureFiles<'a, P> {
    pub fn new(layout: &'a ProjectLayout, client: Option<&'a P>) -> Self {
        Self { layout, client }
    }

    pub fn entry_path(&self, gene: &GeneId, pdb: &PdbId) -> Utf8PathBuf {
        self.layout.gene_structure_dir(gene).join(format!("{pdb}.pdb"))
    }
}

impl<P: PdbClient> StructureFiles for LocalStructureFiles<'_, P> {
    fn reference_sequence(&self, gene: &Gene) -> Result<Option<String>, GemproError> {
        let Some(file) = gene.sequence.representative.sequence_file.as_ref() else {
            return Ok(None);
        };
        if !file.is_file() {
            return Ok(None);
        }
        fasta::read_sequence(file).map(Some)
    }

    fn structure_file(
        &self,
        gene: &GeneId,
        pdb: &PdbId,
    ) -> Result<Option<Utf8PathBuf>, GemproError> {
        let path = self.entry_path(gene, pdb);
        if path.is_file() {
            return Ok(Some(path));
        }
        let Some(client) = self.client else {
            return Ok(None);
        };
        client.download_structure(pdb, &path)?;
        Ok(Some(path))
    }

    fn chain_sequence(
        &self,
        file: &Utf8Path,
        chain: &ChainId,
    ) -> Result<Option<String>, GemproError> {
        pdbfile::chain_sequence(file, chain)
    }

    fn write_cleaned(
        &self,
        gene: &GeneId,
        source: &Utf8Path,
        keep_chain: Option<&ChainId>,
    ) -> Result<Utf8PathBuf, GemproError> {
        let out_dir = self.layout.gene_structure_dir(gene);
        ProjectLayout::ensure_dir(&out_dir)?;
        pdbfile::write_clean_structure(source, keep_chain, &out_dir)
    }
}
