use std::collections::HashMap;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::annotation::{Gene, HomologyRecord, PdbRecord, PdbSource, SequenceRecord};
use crate::blast::BlastSearch;
use crate::config::{KeggSettings, ResolvedConfig, UniprotSettings};
use crate::domain::{ChainId, GeneId, ModelId, PdbId, StructureId, StructureKey, UniprotAccession};
use crate::error::GemproError;
use crate::fasta;
use crate::homology::HomologySource;
use crate::kegg::{KeggClient, KeggGene};
use crate::layout::ProjectLayout;
use crate::output::export_table;
use crate::pdb::{PdbClient, PdbEntryMetadata};
use crate::qc::QualityCheck;
use crate::sequence_resolver::{RepresentativeSequenceResolver, SequenceResolution};
use crate::store::{GeneAnnotationStore, SequenceSource, StructureSource};
use crate::structure_resolver::{
    LocalStructureFiles, RepresentativeStructureResolver, StructureOptions, StructureResolution,
};
use crate::uniprot::{UniprotClient, UniprotRecord};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Rows of one stage plus the genes it could not map.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport<R> {
    pub rows: Vec<R>,
    pub missing: Vec<GeneId>,
}

impl<R> Default for StageReport<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            missing: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeggMappingRow {
    pub gene: GeneId,
    pub uniprot_acc: Option<UniprotAccession>,
    pub kegg_id: String,
    pub seq_len: usize,
    pub pdbs: Vec<PdbId>,
    pub seq_file: Option<Utf8PathBuf>,
    pub metadata_file: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UniprotMappingRow {
    pub gene: GeneId,
    pub uniprot_acc: UniprotAccession,
    pub reviewed: bool,
    pub seq_len: usize,
    pub seq_file: Option<Utf8PathBuf>,
    pub pdbs: Vec<PdbId>,
    pub gene_name: Option<String>,
    pub kegg_id: Option<String>,
    pub ec_number: Option<String>,
    pub description: Option<String>,
    pub entry_version: Option<u32>,
    pub seq_version: Option<u32>,
    pub metadata_file: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceRow {
    pub gene: GeneId,
    pub uniprot_acc: Option<UniprotAccession>,
    pub kegg_id: Option<String>,
    pub pdbs: Vec<PdbId>,
    pub seq_len: usize,
    pub seq_file: Option<Utf8PathBuf>,
    pub metadata_file: Option<Utf8PathBuf>,
}

impl SequenceRow {
    fn from_record(gene: &GeneId, record: &SequenceRecord) -> Self {
        Self {
            gene: gene.clone(),
            uniprot_acc: record.accession.clone(),
            kegg_id: record.external_id.clone(),
            pdbs: record.structure_ids.clone(),
            seq_len: record.length,
            seq_file: record.sequence_file.clone(),
            metadata_file: record.metadata_file.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PdbRankingRow {
    pub gene: GeneId,
    pub uniprot_acc: UniprotAccession,
    pub pdb_id: PdbId,
    pub pdb_chain_id: ChainId,
    pub experimental_method: Option<String>,
    pub resolution: Option<f64>,
    pub seq_coverage: f64,
    pub release_date: Option<NaiveDate>,
    pub taxonomy_id: Option<u32>,
    pub rank: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlastRow {
    pub gene: GeneId,
    pub pdb_id: PdbId,
    pub pdb_chain_id: ChainId,
    pub resolution: Option<f64>,
    pub release_date: Option<NaiveDate>,
    pub blast_score: f64,
    pub blast_evalue: f64,
    pub seq_coverage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HomologyRow {
    pub gene: GeneId,
    pub model_id: ModelId,
    pub model_file: Utf8PathBuf,
    pub model_date: Option<NaiveDate>,
    pub c_score: Option<f64>,
    pub tm_score: Option<f64>,
    pub tm_score_err: Option<f64>,
    pub rmsd: Option<f64>,
    pub rmsd_err: Option<f64>,
}

impl HomologyRow {
    fn from_record(gene: &GeneId, model: &ModelId, record: &HomologyRecord) -> Self {
        Self {
            gene: gene.clone(),
            model_id: model.clone(),
            model_file: record.model_file.clone(),
            model_date: record.model_date,
            c_score: record.c_score,
            tm_score: record.tm_score,
            tm_score_err: record.tm_score_err,
            rmsd: record.rmsd,
            rmsd_err: record.rmsd_err,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StructureFileRow {
    pub gene: GeneId,
    pub pdb_id: PdbId,
    pub pdb_chain_id: ChainId,
    pub experimental_method: Option<String>,
    pub resolution: Option<f64>,
    pub seq_coverage: f64,
    pub rank: Option<u32>,
    pub release_date: Option<NaiveDate>,
    pub pdb_file: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepresentativeStructureRow {
    pub gene: GeneId,
    pub structure_id: String,
    pub seq_coverage: f64,
    pub original_file: Option<Utf8PathBuf>,
    pub clean_file: Option<Utf8PathBuf>,
}

/// Genes left unmapped by the most recent run of each kind of stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MissingGenes {
    pub kegg: Vec<GeneId>,
    pub uniprot: Vec<GeneId>,
    pub sequence: Vec<GeneId>,
    pub itasser: Vec<GeneId>,
    pub structure: Vec<GeneId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub rows: usize,
    pub missing: usize,
    pub table: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    pub stages: Vec<StageSummary>,
    pub missing: MissingGenes,
    pub annotations: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub project_dir: Utf8PathBuf,
    pub genes: usize,
    pub added: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub project_dir: Utf8PathBuf,
    pub genes: usize,
    pub sequences_resolved: usize,
    pub experimental_structures: usize,
    pub homology_structures: usize,
    pub without_sequence: Vec<GeneId>,
    pub without_structure: Vec<GeneId>,
}

/// One annotation project: the gene store, its directory layout and the
/// remote collaborators the ingestion stages call.
pub struct Project<K: KeggClient, U: UniprotClient, P: PdbClient> {
    layout: ProjectLayout,
    store: GeneAnnotationStore,
    missing: MissingGenes,
    kegg: K,
    uniprot: U,
    pdb: P,
}

impl<K: KeggClient, U: UniprotClient, P: PdbClient> Project<K, U, P> {
    pub fn new(
        layout: ProjectLayout,
        store: GeneAnnotationStore,
        kegg: K,
        uniprot: U,
        pdb: P,
    ) -> Self {
        Self {
            layout,
            store,
            missing: MissingGenes::default(),
            kegg,
            uniprot,
            pdb,
        }
    }

    /// Loads the saved store when the project has one, otherwise starts empty.
    pub fn open(layout: ProjectLayout, kegg: K, uniprot: U, pdb: P) -> Result<Self, GemproError> {
        let path = layout.annotations_path();
        let store = if path.is_file() {
            GeneAnnotationStore::load(&path)?
        } else {
            GeneAnnotationStore::new()
        };
        Ok(Self::new(layout, store, kegg, uniprot, pdb))
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn store(&self) -> &GeneAnnotationStore {
        &self.store
    }

    pub fn missing(&self) -> &MissingGenes {
        &self.missing
    }

    pub fn gene(&self, id: &GeneId) -> Result<&Gene, GemproError> {
        self.store.get(id)
    }

    pub fn save(&self) -> Result<Utf8PathBuf, GemproError> {
        let path = self.layout.annotations_path();
        self.store.save(&path)?;
        debug!("saved {} genes to {path}", self.store.len());
        Ok(path)
    }

    pub fn init(
        &mut self,
        genes: &[GeneId],
        sink: &dyn ProgressSink,
    ) -> Result<InitResult, GemproError> {
        sink.event(ProgressEvent {
            message: format!("stage=init; preparing {}", self.layout.base_dir()),
            elapsed: None,
        });
        self.layout.ensure_dirs()?;
        let added = self.store.add_genes(genes.iter().cloned());
        self.save()?;
        info!("project has {} genes ({added} new)", self.store.len());
        Ok(InitResult {
            project_dir: self.layout.base_dir().to_path_buf(),
            genes: self.store.len(),
            added,
        })
    }

    pub fn kegg_mapping(
        &mut self,
        settings: &KeggSettings,
        sink: &dyn ProgressSink,
    ) -> Result<StageReport<KeggMappingRow>, GemproError> {
        let started = stage_started(sink, "kegg_mapping", self.store.len());
        let organism = settings.organism.as_str();
        let to_uniprot = skip_on_failure(
            &format!("KEGG organism {organism}"),
            "uniprot conversion",
            self.kegg.map_to_uniprot(organism),
        )?
        .unwrap_or_default();

        let mut report = StageReport::default();
        for id in self.store.gene_ids() {
            let kegg_gene = settings
                .custom_mapping
                .get(&id)
                .map_or(id.as_str(), String::as_str);
            let Some(entry) = skip_on_failure(
                id.as_str(),
                "KEGG lookup",
                self.kegg.fetch_gene(organism, kegg_gene),
            )?
            else {
                report.missing.push(id);
                continue;
            };
            let Some(entry) = entry else {
                debug!("{id}: no KEGG entry for {kegg_gene}");
                report.missing.push(id);
                continue;
            };

            let Some((metadata_file, seq_file, seq_len)) =
                skip_on_failure(id.as_str(), "KEGG file write", self.write_kegg_files(&id, &entry))?
            else {
                report.missing.push(id);
                continue;
            };

            let record = SequenceRecord {
                accession: to_uniprot.get(kegg_gene).cloned(),
                external_id: Some(entry.kegg_id.clone()),
                length: seq_len,
                structure_ids: entry.structure_ids.clone(),
                sequence_file: seq_file.clone(),
                metadata_file: Some(metadata_file.clone()),
            };
            report.rows.push(KeggMappingRow {
                gene: id.clone(),
                uniprot_acc: record.accession.clone(),
                kegg_id: entry.kegg_id,
                seq_len,
                pdbs: entry.structure_ids,
                seq_file,
                metadata_file: Some(metadata_file),
            });
            self.store.upsert_sequence_source(&id, SequenceSource::Kegg(record))?;
        }

        warn_missing("KEGG", &report.missing, self.store.len());
        self.missing.kegg = report.missing.clone();
        stage_finished(sink, "kegg_mapping", started, &report);
        Ok(report)
    }

    pub fn uniprot_mapping(
        &mut self,
        settings: &UniprotSettings,
        sink: &dyn ProgressSink,
    ) -> Result<StageReport<UniprotMappingRow>, GemproError> {
        let started = stage_started(sink, "uniprot_mapping", self.store.len());
        let queries: IndexMap<GeneId, String> = self
            .store
            .gene_ids()
            .into_iter()
            .map(|id| {
                let query = settings
                    .custom_mapping
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| id.to_string());
                (id, query)
            })
            .collect();
        let query_ids: Vec<String> = queries.values().cloned().collect();
        let mapping = skip_on_failure(
            &settings.source_db,
            "UniProt id mapping",
            self.uniprot.map_ids(&settings.source_db, &query_ids),
        )?
        .unwrap_or_default();

        let mut report = StageReport::default();
        for (id, query) in queries {
            let accessions = mapping.get(&query).cloned().unwrap_or_default();
            if accessions.is_empty() {
                report.missing.push(id);
                continue;
            }
            for accession in accessions {
                if let Some(row) = self.ingest_uniprot(&id, &accession)? {
                    report.rows.push(row);
                }
            }
        }

        warn_missing("UniProt", &report.missing, self.store.len());
        self.missing.uniprot = report.missing.clone();
        stage_finished(sink, "uniprot_mapping", started, &report);
        Ok(report)
    }

    /// Fetches one UniProt entry into the gene's UniProt slot. `None` when the
    /// fetch failed and the gene was skipped.
    fn ingest_uniprot(
        &mut self,
        id: &GeneId,
        accession: &UniprotAccession,
    ) -> Result<Option<UniprotMappingRow>, GemproError> {
        let Some(record) =
            skip_on_failure(id.as_str(), "UniProt fetch", self.uniprot.fetch(accession))?
        else {
            return Ok(None);
        };
        let Some((metadata_file, seq_file)) = skip_on_failure(
            id.as_str(),
            "UniProt file write",
            self.write_uniprot_files(id, accession, &record),
        )?
        else {
            return Ok(None);
        };

        let entry = record.metadata.into_entry(seq_file, Some(metadata_file));
        let row = UniprotMappingRow {
            gene: id.clone(),
            uniprot_acc: accession.clone(),
            reviewed: entry.reviewed,
            seq_len: entry.record.length,
            seq_file: entry.record.sequence_file.clone(),
            pdbs: entry.record.structure_ids.clone(),
            gene_name: entry.gene_names.first().cloned(),
            kegg_id: join_non_empty(&entry.kegg_ids),
            ec_number: join_non_empty(&entry.ec_numbers),
            description: entry.description.clone(),
            entry_version: entry.entry_version,
            seq_version: entry.sequence_version,
            metadata_file: entry.record.metadata_file.clone(),
        };
        self.store.upsert_sequence_source(id, SequenceSource::Uniprot(entry))?;
        Ok(Some(row))
    }

    /// Manual accessions replace the representative sequence outright.
    pub fn manual_uniprot_mapping(
        &mut self,
        mapping: &IndexMap<GeneId, UniprotAccession>,
        sink: &dyn ProgressSink,
    ) -> Result<StageReport<SequenceRow>, GemproError> {
        let started = stage_started(sink, "manual_uniprot_mapping", mapping.len());
        let mut report = StageReport::default();
        for (id, accession) in mapping {
            if !self.store.contains(id) {
                warn!("{id}: manual UniProt mapping for a gene outside the project");
                continue;
            }
            if self.ingest_uniprot(id, accession)?.is_none() {
                report.missing.push(id.clone());
                continue;
            }
            let gene = self.store.get(id)?;
            let Some(entry) = gene.sequence.uniprot.get(accession) else {
                report.missing.push(id.clone());
                continue;
            };
            let record = entry.record.clone();
            self.store.replace_representative_sequence(id, record.clone())?;
            self.missing.uniprot.retain(|gene| gene != id);
            self.missing.sequence.retain(|gene| gene != id);
            report.rows.push(SequenceRow::from_record(id, &record));
        }
        stage_finished(sink, "manual_uniprot_mapping", started, &report);
        Ok(report)
    }

    pub fn manual_sequence_mapping(
        &mut self,
        sequences: &IndexMap<GeneId, String>,
        sink: &dyn ProgressSink,
    ) -> Result<StageReport<SequenceRow>, GemproError> {
        let started = stage_started(sink, "manual_sequence_mapping", sequences.len());
        let mut report = StageReport::default();
        for (id, sequence) in sequences {
            if !self.store.contains(id) {
                warn!("{id}: manual sequence for a gene outside the project");
                continue;
            }
            let record_text = fasta::format_record(id.as_str(), sequence);
            let Some(seq_file) = skip_on_failure(
                id.as_str(),
                "sequence file write",
                self.write_sequence_file(id, &format!("{id}.faa"), record_text.as_bytes()),
            )?
            else {
                report.missing.push(id.clone());
                continue;
            };
            let record = SequenceRecord {
                length: sequence.len(),
                sequence_file: Some(seq_file),
                ..SequenceRecord::default()
            };
            self.store.replace_representative_sequence(id, record.clone())?;
            self.missing.sequence.retain(|gene| gene != id);
            report.rows.push(SequenceRow::from_record(id, &record));
        }
        stage_finished(sink, "manual_sequence_mapping", started, &report);
        Ok(report)
    }

    pub fn set_representative_sequences(
        &mut self,
        sink: &dyn ProgressSink,
    ) -> Result<StageReport<SequenceRow>, GemproError> {
        let started = stage_started(sink, "set_representative_sequences", self.store.len());
        let resolver = RepresentativeSequenceResolver::new();
        let mut report = StageReport::default();
        for gene in self.store.genes_mut() {
            match resolver.resolve(gene) {
                SequenceResolution::Unresolved => report.missing.push(gene.id.clone()),
                SequenceResolution::Resolved(_) | SequenceResolution::AlreadySet => report
                    .rows
                    .push(SequenceRow::from_record(&gene.id, &gene.sequence.representative)),
            }
        }
        warn_missing("representative sequence", &report.missing, self.store.len());
        self.missing.sequence = report.missing.clone();
        stage_finished(sink, "set_representative_sequences", started, &report);
        Ok(report)
    }

    /// Ranked PDB chains for each gene's representative UniProt accession.
    pub fn map_uniprot_to_pdb(
        &mut self,
        seq_ident_cutoff: f64,
        sink: &dyn ProgressSink,
    ) -> Result<StageReport<PdbRankingRow>, GemproError> {
        let started = stage_started(sink, "map_uniprot_to_pdb", self.store.len());
        let mut entries = HashMap::new();
        let mut report = StageReport::default();
        for id in self.store.gene_ids() {
            let Some(accession) = self.store.get(&id)?.sequence.representative.accession.clone()
            else {
                warn!("{id}: no representative UniProt accession, cannot rank structures");
                continue;
            };
            let Some(ranked) = skip_on_failure(
                id.as_str(),
                "structure ranking",
                self.pdb.best_structures(&accession, seq_ident_cutoff),
            )?
            else {
                continue;
            };
            if ranked.is_empty() {
                debug!("{id}: no PDB chains mapped to {accession}");
                continue;
            }

            for (rank, structure) in (1u32..).zip(ranked) {
                let release_date = self
                    .entry_metadata(&mut entries, &structure.pdb_id)
                    .and_then(|meta| meta.release_date);
                let record = PdbRecord {
                    experimental_method: structure.experimental_method.clone(),
                    resolution: structure.resolution,
                    release_date,
                    rank: Some(rank),
                    uniprot_accession: Some(accession.clone()),
                    taxonomy_id: structure.taxonomy_id,
                    ..PdbRecord::new(PdbSource::Ranked, structure.coverage)
                };
                report.rows.push(PdbRankingRow {
                    gene: id.clone(),
                    uniprot_acc: accession.clone(),
                    pdb_id: structure.pdb_id.clone(),
                    pdb_chain_id: structure.chain_id.clone(),
                    experimental_method: structure.experimental_method,
                    resolution: structure.resolution,
                    seq_coverage: structure.coverage,
                    release_date,
                    taxonomy_id: structure.taxonomy_id,
                    rank,
                });
                let key = StructureKey::new(structure.pdb_id, structure.chain_id);
                self.store
                    .upsert_structure_source(&id, StructureSource::Pdb(key, record))?;
            }
        }
        stage_finished(sink, "map_uniprot_to_pdb", started, &report);
        Ok(report)
    }

    /// Sequence search against the PDB. Genes that already have PDB chains
    /// are skipped unless `all_genes` is set; hits never overwrite existing
    /// chains.
    pub fn blast_sequences_to_pdb(
        &mut self,
        blast: &dyn BlastSearch,
        seq_ident_cutoff: f64,
        evalue: f64,
        all_genes: bool,
        sink: &dyn ProgressSink,
    ) -> Result<StageReport<BlastRow>, GemproError> {
        let started = stage_started(sink, "blast_sequences_to_pdb", self.store.len());
        let mut entries = HashMap::new();
        let mut report = StageReport::default();
        for id in self.store.gene_ids() {
            let gene = self.store.get(&id)?;
            let Some(seq_file) = gene.sequence.representative.sequence_file.clone() else {
                warn!("{id}: no representative sequence file, skipping BLAST");
                continue;
            };
            if gene.structure.has_pdb() && !all_genes {
                debug!("{id}: structures already mapped, skipping BLAST");
                continue;
            }
            let Some(sequence) =
                skip_on_failure(id.as_str(), "sequence read", fasta::read_sequence(&seq_file))?
            else {
                continue;
            };
            let Some(hits) = skip_on_failure(
                id.as_str(),
                "BLAST search",
                blast.search(&sequence, evalue, seq_ident_cutoff),
            )?
            else {
                continue;
            };

            let mut added = 0usize;
            for hit in hits {
                let metadata = self.entry_metadata(&mut entries, &hit.pdb_id);
                let resolution = metadata.as_ref().and_then(|meta| meta.resolution);
                let release_date = metadata.as_ref().and_then(|meta| meta.release_date);
                for chain in &hit.chains {
                    let record = PdbRecord {
                        experimental_method: metadata
                            .as_ref()
                            .and_then(|meta| meta.experimental_method.clone()),
                        resolution,
                        release_date,
                        blast_score: Some(hit.score),
                        blast_evalue: Some(hit.evalue),
                        ..PdbRecord::new(PdbSource::Blast, hit.percent_ident)
                    };
                    report.rows.push(BlastRow {
                        gene: id.clone(),
                        pdb_id: hit.pdb_id.clone(),
                        pdb_chain_id: chain.clone(),
                        resolution,
                        release_date,
                        blast_score: hit.score,
                        blast_evalue: hit.evalue,
                        seq_coverage: hit.percent_ident,
                    });
                    let key = StructureKey::new(hit.pdb_id.clone(), chain.clone());
                    if self
                        .store
                        .upsert_structure_source(&id, StructureSource::Pdb(key, record))?
                    {
                        added += 1;
                    }
                }
            }
            if added > 0 {
                info!("{id}: added {added} PDB chains from BLAST results");
            }
        }
        stage_finished(sink, "blast_sequences_to_pdb", started, &report);
        Ok(report)
    }

    /// Copies manual models into the project; each replaces any homology
    /// entry with the same id.
    pub fn manual_homology_models(
        &mut self,
        models: &IndexMap<GeneId, IndexMap<ModelId, HomologyRecord>>,
        sink: &dyn ProgressSink,
    ) -> Result<StageReport<HomologyRow>, GemproError> {
        let started = stage_started(sink, "manual_homology_models", models.len());
        let mut report = StageReport::default();
        for (id, gene_models) in models {
            if !self.store.contains(id) {
                warn!("{id}: manual homology models for a gene outside the project");
                continue;
            }
            let dest = self.layout.gene_structure_dir(id);
            for (model, record) in gene_models {
                let Some(copied) = skip_on_failure(
                    id.as_str(),
                    "homology model copy",
                    ProjectLayout::copy_file_atomic(&record.model_file, &dest, None),
                )?
                else {
                    report.missing.push(id.clone());
                    continue;
                };
                let record = HomologyRecord {
                    model_file: copied,
                    ..record.clone()
                };
                report.rows.push(HomologyRow::from_record(id, model, &record));
                self.store.replace_homology(id, model.clone(), record)?;
            }
        }
        info!("copied {} homology models", report.rows.len());
        stage_finished(sink, "manual_homology_models", started, &report);
        Ok(report)
    }

    /// Organises I-TASSER run folders (`<raw_dir>/<gene>` unless remapped).
    /// Models are stored under the gene id with full coverage.
    pub fn itasser_models(
        &mut self,
        source: &dyn HomologySource,
        raw_dir: &Utf8Path,
        custom_mapping: &IndexMap<GeneId, String>,
        sink: &dyn ProgressSink,
    ) -> Result<StageReport<HomologyRow>, GemproError> {
        let started = stage_started(sink, "itasser_models", self.store.len());
        let mut report = StageReport::default();
        for id in self.store.gene_ids() {
            let folder = custom_mapping.get(&id).map_or(id.as_str(), String::as_str);
            let run_dir = raw_dir.join(folder);
            let dest = self.layout.gene_structure_dir(&id);
            let Some(organized) = skip_on_failure(
                id.as_str(),
                "I-TASSER output",
                source.organize(&run_dir, &dest, id.as_str()),
            )?
            else {
                report.missing.push(id);
                continue;
            };
            let Some(mut record) = organized else {
                report.missing.push(id);
                continue;
            };
            record.sequence_coverage = 1.0;
            let model: ModelId = id.as_str().parse()?;
            report.rows.push(HomologyRow::from_record(&id, &model, &record));
            self.store
                .upsert_structure_source(&id, StructureSource::Homology(model, record))?;
        }
        self.missing.itasser = report.missing.clone();
        stage_finished(sink, "itasser_models", started, &report);
        Ok(report)
    }

    /// Downloads every mapped PDB entry and fills in resolution, method and
    /// release date where a chain record lacks them.
    pub fn download_structures(
        &mut self,
        sink: &dyn ProgressSink,
    ) -> Result<StageReport<StructureFileRow>, GemproError> {
        let started = stage_started(sink, "download_structures", self.store.len());
        let mut entries = HashMap::new();
        let mut report = StageReport::default();
        for id in self.store.gene_ids() {
            let dest = self.layout.gene_structure_dir(&id);
            let pdb_ids = self.store.get(&id)?.structure.pdb_ids();
            for pdb in pdb_ids {
                let path = dest.join(format!("{pdb}.pdb"));
                if !path.is_file()
                    && skip_on_failure(
                        id.as_str(),
                        "structure download",
                        self.pdb.download_structure(&pdb, &path),
                    )?
                    .is_none()
                {
                    continue;
                }
                let needs_metadata = self.store.get(&id)?.structure.pdb.iter().any(|(key, record)| {
                    key.pdb == pdb
                        && (record.resolution.is_none()
                            || record.experimental_method.is_none()
                            || record.release_date.is_none())
                });
                let metadata = if needs_metadata {
                    self.entry_metadata(&mut entries, &pdb)
                } else {
                    None
                };

                let gene = self.store.get_mut(&id)?;
                for (key, record) in gene.structure.pdb.iter_mut() {
                    if key.pdb != pdb {
                        continue;
                    }
                    if let Some(meta) = metadata.as_ref() {
                        record.resolution = record.resolution.or(meta.resolution);
                        if record.experimental_method.is_none() {
                            record.experimental_method = meta.experimental_method.clone();
                        }
                        record.release_date = record.release_date.or(meta.release_date);
                    }
                    record.structure_file = Some(path.clone());
                    report.rows.push(StructureFileRow {
                        gene: id.clone(),
                        pdb_id: key.pdb.clone(),
                        pdb_chain_id: key.chain.clone(),
                        experimental_method: record.experimental_method.clone(),
                        resolution: record.resolution,
                        seq_coverage: record.sequence_coverage,
                        rank: record.rank,
                        release_date: record.release_date,
                        pdb_file: path.clone(),
                    });
                }
            }
        }
        stage_finished(sink, "download_structures", started, &report);
        Ok(report)
    }

    /// Runs the structure resolver across genes in parallel. Each worker owns
    /// exactly one gene record.
    pub fn set_representative_structures<Q: QualityCheck>(
        &mut self,
        options: &StructureOptions,
        qc: Q,
        sink: &dyn ProgressSink,
    ) -> Result<StageReport<RepresentativeStructureRow>, GemproError> {
        use rayon::prelude::*;

        let started = stage_started(sink, "set_representative_structures", self.store.len());
        let files = LocalStructureFiles::new(&self.layout, Some(&self.pdb));
        let resolver = RepresentativeStructureResolver::new(qc, files);
        let outcomes: Vec<(GeneId, Result<StructureResolution, GemproError>)> = self
            .store
            .par_genes_mut()
            .map(|gene| (gene.id.clone(), resolver.resolve(gene, options)))
            .collect();

        let mut report = StageReport::default();
        for (id, outcome) in outcomes {
            match skip_on_failure(id.as_str(), "structure resolution", outcome)? {
                Some(StructureResolution::Resolved(_)) | Some(StructureResolution::AlreadySet) => {
                    let representative = &self.store.get(&id)?.structure.representative;
                    report.rows.push(RepresentativeStructureRow {
                        gene: id.clone(),
                        structure_id: representative
                            .structure_id
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                        seq_coverage: representative.sequence_coverage,
                        original_file: representative.original_file.clone(),
                        clean_file: representative.clean_file.clone(),
                    });
                }
                Some(StructureResolution::NoStructure) | None => report.missing.push(id),
            }
        }
        warn_missing("representative structure", &report.missing, self.store.len());
        self.missing.structure = report.missing.clone();
        stage_finished(sink, "set_representative_structures", started, &report);
        Ok(report)
    }

    pub fn pdbs_for_gene(&self, id: &GeneId) -> Result<Vec<PdbId>, GemproError> {
        Ok(self.store.get(id)?.structure.pdb_ids())
    }

    /// KEGG, UniProt and manual sequence input, each only when configured,
    /// followed by representative selection. Manual input lands first so the
    /// resolver keeps it.
    pub fn run_sequence_stages(
        &mut self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<StageSummary>, GemproError> {
        let mut stages = Vec::new();
        if let Some(kegg) = config.kegg.as_ref() {
            let report = self.kegg_mapping(kegg, sink)?;
            stages.push(self.export("kegg_mapping", &report)?);
        }
        if let Some(uniprot) = config.uniprot.as_ref() {
            let report = self.uniprot_mapping(uniprot, sink)?;
            stages.push(self.export("uniprot_mapping", &report)?);
        }
        if !config.manual.uniprot.is_empty() {
            let report = self.manual_uniprot_mapping(&config.manual.uniprot, sink)?;
            stages.push(self.export("manual_uniprot_mapping", &report)?);
        }
        if !config.manual.sequences.is_empty() {
            let report = self.manual_sequence_mapping(&config.manual.sequences, sink)?;
            stages.push(self.export("manual_sequence_mapping", &report)?);
        }
        let report = self.set_representative_sequences(sink)?;
        stages.push(self.export("representative_sequences", &report)?);
        Ok(stages)
    }

    /// PDB ranking, optional BLAST, homology input, downloads and
    /// representative structure selection.
    pub fn run_structure_stages<Q: QualityCheck>(
        &mut self,
        config: &ResolvedConfig,
        blast: Option<&dyn BlastSearch>,
        homology: &dyn HomologySource,
        qc: Q,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<StageSummary>, GemproError> {
        let settings = &config.structures;
        let mut stages = Vec::new();
        let report = self.map_uniprot_to_pdb(settings.seq_ident_cutoff, sink)?;
        stages.push(self.export("pdb_ranking", &report)?);
        if let Some(blast) = blast {
            let report = self.blast_sequences_to_pdb(
                blast,
                settings.seq_ident_cutoff,
                settings.blast_evalue,
                settings.blast_all_genes,
                sink,
            )?;
            stages.push(self.export("pdb_blast", &report)?);
        }
        if !config.manual.homology_models.is_empty() {
            let report = self.manual_homology_models(&config.manual.homology_models, sink)?;
            stages.push(self.export("manual_homology", &report)?);
        }
        if let Some(raw_dir) = settings.itasser_dir.as_ref() {
            let report =
                self.itasser_models(homology, raw_dir, &settings.custom_itasser_mapping, sink)?;
            stages.push(self.export("itasser", &report)?);
        }
        let report = self.download_structures(sink)?;
        stages.push(self.export("pdb_files", &report)?);
        let report = self.set_representative_structures(&settings.options, qc, sink)?;
        stages.push(self.export("representative_structures", &report)?);
        Ok(stages)
    }

    pub fn summary(&self) -> ProjectSummary {
        let mut summary = ProjectSummary {
            project_dir: self.layout.base_dir().to_path_buf(),
            genes: self.store.len(),
            sequences_resolved: 0,
            experimental_structures: 0,
            homology_structures: 0,
            without_sequence: Vec::new(),
            without_structure: Vec::new(),
        };
        for gene in self.store.genes() {
            if gene.sequence.is_resolved() {
                summary.sequences_resolved += 1;
            } else {
                summary.without_sequence.push(gene.id.clone());
            }
            match gene.structure.representative.structure_id {
                Some(StructureId::Experimental(_)) => {
                    summary.experimental_structures += 1
                }
                Some(StructureId::Homology(_)) => summary.homology_structures += 1,
                None => summary.without_structure.push(gene.id.clone()),
            }
        }
        summary
    }

    fn export<R: Serialize>(
        &self,
        table: &str,
        report: &StageReport<R>,
    ) -> Result<StageSummary, GemproError> {
        let path = export_table(&self.layout, table, &report.rows)?;
        Ok(StageSummary {
            stage: table.to_string(),
            rows: report.rows.len(),
            missing: report.missing.len(),
            table: Some(path),
        })
    }

    fn sequence_dir_file(&self, id: &GeneId, name: &str) -> Utf8PathBuf {
        self.layout.gene_sequence_dir(id).join(name)
    }

    fn write_sequence_file(
        &self,
        id: &GeneId,
        name: &str,
        content: &[u8],
    ) -> Result<Utf8PathBuf, GemproError> {
        let path = self.sequence_dir_file(id, name);
        ProjectLayout::write_bytes_atomic(&path, content)?;
        Ok(path)
    }

    /// Writes the KEGG flat file and, when present, the FASTA. Returns the
    /// metadata file, the sequence file and the sequence length.
    fn write_kegg_files(
        &self,
        id: &GeneId,
        entry: &KeggGene,
    ) -> Result<(Utf8PathBuf, Option<Utf8PathBuf>, usize), GemproError> {
        let file_stem = entry.kegg_id.replace(':', "-");
        let metadata_file = self.write_sequence_file(
            id,
            &format!("{file_stem}.kegg"),
            entry.flat_file.as_bytes(),
        )?;
        match entry.fasta.as_deref() {
            Some(text) => {
                let path =
                    self.write_sequence_file(id, &format!("{file_stem}.faa"), text.as_bytes())?;
                Ok((metadata_file, Some(path), fasta::first_sequence(text).len()))
            }
            None => Ok((metadata_file, None, 0)),
        }
    }

    fn write_uniprot_files(
        &self,
        id: &GeneId,
        accession: &UniprotAccession,
        record: &UniprotRecord,
    ) -> Result<(Utf8PathBuf, Option<Utf8PathBuf>), GemproError> {
        let metadata_file = self.sequence_dir_file(id, &format!("{accession}.json"));
        ProjectLayout::write_json(&metadata_file, &record.raw_json)?;
        if record.fasta.trim().is_empty() {
            return Ok((metadata_file, None));
        }
        let seq_file =
            self.write_sequence_file(id, &format!("{accession}.fasta"), record.fasta.as_bytes())?;
        Ok((metadata_file, Some(seq_file)))
    }

    /// Entry metadata looked up once per PDB id within a stage. Lookup
    /// failures are logged and cached as absent.
    fn entry_metadata(
        &self,
        cache: &mut HashMap<PdbId, Option<PdbEntryMetadata>>,
        pdb: &PdbId,
    ) -> Option<PdbEntryMetadata> {
        cache
            .entry(pdb.clone())
            .or_insert_with(|| match self.pdb.entry_metadata(pdb) {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("{pdb}: entry metadata unavailable: {err}");
                    None
                }
            })
            .clone()
    }
}

/// Collaborator failures are logged and turned into `None` so the caller
/// can skip the gene; every other error is returned.
fn skip_on_failure<T>(
    subject: &str,
    what: &str,
    result: Result<T, GemproError>,
) -> Result<Option<T>, GemproError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_collaborator_failure() => {
            warn!("{subject}: {what} failed, skipping: {err}");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn warn_missing(what: &str, missing: &[GeneId], total: usize) {
    if !missing.is_empty() {
        warn!("{} of {total} genes have no {what} mapping", missing.len());
        debug!("missing {what}: {missing:?}");
    }
}

fn join_non_empty(values: &[String]) -> Option<String> {
    (!values.is_empty()).then(|| values.join(";"))
}

fn stage_started(sink: &dyn ProgressSink, stage: &str, genes: usize) -> Instant {
    sink.event(ProgressEvent {
        message: format!("stage={stage}; {genes} genes"),
        elapsed: None,
    });
    Instant::now()
}

fn stage_finished<R>(
    sink: &dyn ProgressSink,
    stage: &str,
    started: Instant,
    report: &StageReport<R>,
) {
    info!(
        "{stage}: {} rows, {} genes missing",
        report.rows.len(),
        report.missing.len()
    );
    sink.event(ProgressEvent {
        message: format!("stage={stage}; done"),
        elapsed: Some(started.elapsed()),
    });
}
