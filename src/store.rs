use std::fs;

use camino::Utf8Path;
use indexmap::IndexMap;
use indexmap::map::rayon::ParValuesMut;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::annotation::{Gene, HomologyRecord, PdbRecord, SequenceRecord, UniprotEntry};
use crate::domain::{GeneId, ModelId, StructureKey};
use crate::error::GemproError;
use crate::layout::ProjectLayout;

/// Data for one sequence provenance slot.
#[derive(Debug, Clone)]
pub enum SequenceSource {
    Kegg(SequenceRecord),
    Uniprot(UniprotEntry),
}

/// Data for one mapping-keyed structure provenance slot.
#[derive(Debug, Clone)]
pub enum StructureSource {
    Pdb(StructureKey, PdbRecord),
    Homology(ModelId, HomologyRecord),
}

/// All genes of a project, in the order they were added.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneAnnotationStore {
    genes: IndexMap<GeneId, Gene>,
}

impl GeneAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_genes<I: IntoIterator<Item = GeneId>>(ids: I) -> Self {
        let mut store = Self::new();
        store.add_genes(ids);
        store
    }

    /// Adds genes not yet present; returns how many were new.
    pub fn add_genes<I: IntoIterator<Item = GeneId>>(&mut self, ids: I) -> usize {
        let mut added = 0;
        for id in ids {
            if self.genes.contains_key(&id) {
                continue;
            }
            self.genes.insert(id.clone(), Gene::new(id));
            added += 1;
        }
        added
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn contains(&self, id: &GeneId) -> bool {
        self.genes.contains_key(id)
    }

    pub fn get(&self, id: &GeneId) -> Result<&Gene, GemproError> {
        self.genes
            .get(id)
            .ok_or_else(|| GemproError::UnknownGene(id.to_string()))
    }

    pub fn get_mut(&mut self, id: &GeneId) -> Result<&mut Gene, GemproError> {
        self.genes
            .get_mut(id)
            .ok_or_else(|| GemproError::UnknownGene(id.to_string()))
    }

    pub fn gene_ids(&self) -> Vec<GeneId> {
        self.genes.keys().cloned().collect()
    }

    pub fn genes(&self) -> impl Iterator<Item = &Gene> {
        self.genes.values()
    }

    pub fn genes_mut(&mut self) -> impl Iterator<Item = &mut Gene> {
        self.genes.values_mut()
    }

    /// Parallel, order-preserving access for per-gene fan-out. Each gene is
    /// handed to exactly one worker.
    pub fn par_genes_mut(&mut self) -> ParValuesMut<'_, GeneId, Gene> {
        self.genes.par_values_mut()
    }

    /// Writes a sequence slot. KEGG replaces the KEGG record; UniProt adds
    /// or updates the entry for its accession.
    pub fn upsert_sequence_source(
        &mut self,
        id: &GeneId,
        source: SequenceSource,
    ) -> Result<(), GemproError> {
        let gene = self.get_mut(id)?;
        match source {
            SequenceSource::Kegg(record) => gene.set_kegg(record),
            SequenceSource::Uniprot(entry) => {
                gene.upsert_uniprot(entry);
            }
        }
        Ok(())
    }

    /// Monotonic merge into the PDB or homology slot: a key that is already
    /// present keeps its existing record. Returns whether the entry was added.
    pub fn upsert_structure_source(
        &mut self,
        id: &GeneId,
        source: StructureSource,
    ) -> Result<bool, GemproError> {
        let gene = self.get_mut(id)?;
        let added = match source {
            StructureSource::Pdb(key, record) => gene.merge_pdb(key, record),
            StructureSource::Homology(model, record) => gene.merge_homology(model, record),
        };
        Ok(added)
    }

    /// Manual override path for structures. Only homology entries can be
    /// replaced; PDB entries always come from ranked or BLAST searches.
    pub fn replace_homology(
        &mut self,
        id: &GeneId,
        model: ModelId,
        record: HomologyRecord,
    ) -> Result<(), GemproError> {
        self.get_mut(id)?.replace_homology(model, record);
        Ok(())
    }

    pub fn replace_representative_sequence(
        &mut self,
        id: &GeneId,
        record: SequenceRecord,
    ) -> Result<(), GemproError> {
        self.get_mut(id)?.override_representative_sequence(record);
        Ok(())
    }

    pub fn load(path: &Utf8Path) -> Result<Self, GemproError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| GemproError::Filesystem(format!("read {path}: {err}")))?;
        let store: Self = serde_json::from_str(&content)
            .map_err(|err| GemproError::Filesystem(format!("parse {path}: {err}")))?;
        debug!("loaded {} genes from {path}", store.len());
        Ok(store)
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), GemproError> {
        ProjectLayout::write_json(path, self)
    }
}
