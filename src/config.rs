use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::annotation::HomologyRecord;
use crate::domain::{GeneId, HomologySortKey, ModelId, UniprotAccession};
use crate::error::GemproError;
use crate::qc::QcParams;
use crate::structure_resolver::StructureOptions;

pub const DEFAULT_CONFIG_FILE: &str = "gempro.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub genes: Vec<String>,
    #[serde(default)]
    pub genes_file: Option<String>,
    #[serde(default)]
    pub kegg: Option<KeggSection>,
    #[serde(default)]
    pub uniprot: Option<UniprotSection>,
    #[serde(default)]
    pub manual: ManualSection,
    #[serde(default)]
    pub structures: StructuresSection,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct KeggSection {
    pub organism: String,
    /// Project gene id to KEGG gene id, for ids that differ.
    #[serde(default)]
    pub custom_gene_mapping: IndexMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UniprotSection {
    pub source_db: String,
    #[serde(default)]
    pub custom_gene_mapping: IndexMap<String, String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ManualSection {
    #[serde(default)]
    pub uniprot: IndexMap<String, String>,
    #[serde(default)]
    pub sequences: IndexMap<String, String>,
    #[serde(default)]
    pub homology_models: IndexMap<String, IndexMap<String, HomologyModelEntry>>,
}

/// A model given by path alone, or an object carrying `model_file` and any
/// scores known for it.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum HomologyModelEntry {
    Shorthand(String),
    Detailed(serde_json::Map<String, Value>),
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StructuresSection {
    #[serde(default)]
    pub seq_ident_cutoff: Option<f64>,
    #[serde(default)]
    pub prefer_homology: Option<bool>,
    #[serde(default)]
    pub sort_homology_by: Option<HomologySortKey>,
    #[serde(default)]
    pub qc: Option<QcParams>,
    #[serde(default)]
    pub itasser_dir: Option<String>,
    #[serde(default)]
    pub custom_itasser_mapping: IndexMap<String, String>,
    #[serde(default)]
    pub blast_evalue: Option<f64>,
    /// Search genes that already have ranked structures too.
    #[serde(default)]
    pub blast_all_genes: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct KeggSettings {
    pub organism: String,
    pub custom_mapping: IndexMap<GeneId, String>,
}

#[derive(Debug, Clone)]
pub struct UniprotSettings {
    pub source_db: String,
    pub custom_mapping: IndexMap<GeneId, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ManualSettings {
    pub uniprot: IndexMap<GeneId, UniprotAccession>,
    pub sequences: IndexMap<GeneId, String>,
    pub homology_models: IndexMap<GeneId, IndexMap<ModelId, HomologyRecord>>,
}

#[derive(Debug, Clone)]
pub struct StructureSettings {
    pub seq_ident_cutoff: f64,
    pub options: StructureOptions,
    pub itasser_dir: Option<Utf8PathBuf>,
    pub custom_itasser_mapping: IndexMap<GeneId, String>,
    pub blast_evalue: f64,
    pub blast_all_genes: bool,
}

pub const DEFAULT_BLAST_EVALUE: f64 = 0.0001;

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub project: String,
    pub root: Utf8PathBuf,
    pub genes: Vec<GeneId>,
    pub kegg: Option<KeggSettings>,
    pub uniprot: Option<UniprotSettings>,
    pub manual: ManualSettings,
    pub structures: StructureSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GemproError> {
        let config_path = Utf8PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));

        if path.is_none() && !config_path.exists() {
            return Err(GemproError::MissingConfig);
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| GemproError::ConfigRead(config_path.clone().into_std_path_buf()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GemproError::ConfigParse(err.to_string()))?;

        let base = config_path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        Self::resolve_config(config, base)
    }

    /// Validates `config`; relative paths are taken from `base`.
    pub fn resolve_config(config: Config, base: &Utf8Path) -> Result<ResolvedConfig, GemproError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let project = config.project.unwrap_or_else(|| "gempro".to_string());
        let root = relative_to(base, config.root.as_deref().unwrap_or("."));

        let mut gene_names = config.genes;
        if let Some(file) = config.genes_file.as_deref() {
            let path = relative_to(base, file);
            let content = fs::read_to_string(path.as_std_path())
                .map_err(|_| GemproError::ConfigRead(path.clone().into_std_path_buf()))?;
            gene_names.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            );
        }
        let mut genes: Vec<GeneId> = Vec::with_capacity(gene_names.len());
        for name in gene_names {
            let id: GeneId = name.parse()?;
            if !genes.contains(&id) {
                genes.push(id);
            }
        }

        let kegg = config
            .kegg
            .map(|section| {
                Ok::<_, GemproError>(KeggSettings {
                    organism: section.organism,
                    custom_mapping: gene_keyed(section.custom_gene_mapping)?,
                })
            })
            .transpose()?;
        let uniprot = config
            .uniprot
            .map(|section| {
                Ok::<_, GemproError>(UniprotSettings {
                    source_db: section.source_db,
                    custom_mapping: gene_keyed(section.custom_gene_mapping)?,
                })
            })
            .transpose()?;

        let manual = resolve_manual(config.manual, base)?;

        let structures_section = config.structures;
        let structures = StructureSettings {
            seq_ident_cutoff: structures_section.seq_ident_cutoff.unwrap_or(0.0),
            options: StructureOptions {
                prefer_homology: structures_section.prefer_homology.unwrap_or(true),
                homology_sort_key: structures_section.sort_homology_by.unwrap_or_default(),
                qc: structures_section.qc.unwrap_or_default(),
            },
            itasser_dir: structures_section
                .itasser_dir
                .as_deref()
                .map(|dir| relative_to(base, dir)),
            custom_itasser_mapping: gene_keyed(structures_section.custom_itasser_mapping)?,
            blast_evalue: structures_section.blast_evalue.unwrap_or(DEFAULT_BLAST_EVALUE),
            blast_all_genes: structures_section.blast_all_genes.unwrap_or(false),
        };

        Ok(ResolvedConfig {
            schema_version,
            project,
            root,
            genes,
            kegg,
            uniprot,
            manual,
            structures,
        })
    }
}

fn resolve_manual(section: ManualSection, base: &Utf8Path) -> Result<ManualSettings, GemproError> {
    let mut uniprot = IndexMap::new();
    for (gene, accession) in section.uniprot {
        uniprot.insert(gene.parse::<GeneId>()?, accession.parse::<UniprotAccession>()?);
    }

    let mut sequences = IndexMap::new();
    for (gene, sequence) in section.sequences {
        let sequence: String = sequence.chars().filter(|ch| !ch.is_whitespace()).collect();
        if sequence.is_empty() {
            return Err(GemproError::InvalidManualInput(format!(
                "empty sequence for gene {gene}"
            )));
        }
        sequences.insert(gene.parse::<GeneId>()?, sequence.to_ascii_uppercase());
    }

    let mut homology_models = IndexMap::new();
    for (gene, models) in section.homology_models {
        let gene: GeneId = gene.parse()?;
        let mut resolved = IndexMap::new();
        for (model, entry) in models {
            let model: ModelId = model.parse()?;
            let mut record = homology_record(&gene, &model, entry)?;
            record.model_file = relative_to(base, record.model_file.as_str());
            resolved.insert(model, record);
        }
        homology_models.insert(gene, resolved);
    }

    Ok(ManualSettings {
        uniprot,
        sequences,
        homology_models,
    })
}

fn homology_record(
    gene: &GeneId,
    model: &ModelId,
    entry: HomologyModelEntry,
) -> Result<HomologyRecord, GemproError> {
    match entry {
        HomologyModelEntry::Shorthand(path) => Ok(HomologyRecord::new(path.into(), 0.0)),
        HomologyModelEntry::Detailed(fields) => {
            if !fields.get("model_file").is_some_and(Value::is_string) {
                return Err(GemproError::InvalidManualInput(format!(
                    "homology model {model} of gene {gene} has no model_file"
                )));
            }
            serde_json::from_value(Value::Object(fields)).map_err(|err| {
                GemproError::InvalidManualInput(format!(
                    "homology model {model} of gene {gene}: {err}"
                ))
            })
        }
    }
}

fn gene_keyed(mapping: IndexMap<String, String>) -> Result<IndexMap<GeneId, String>, GemproError> {
    mapping
        .into_iter()
        .map(|(gene, value)| Ok((gene.parse::<GeneId>()?, value)))
        .collect()
}

fn relative_to(base: &Utf8Path, path: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn parse(json: &str) -> Result<ResolvedConfig, GemproError> {
        let config: Config = serde_json::from_str(json).unwrap();
        ConfigLoader::resolve_config(config, Utf8Path::new("/work"))
    }

    #[test]
    fn defaults_apply_to_minimal_config() {
        let resolved = parse(r#"{"genes": ["b0001", "b0002", "b0001"]}"#).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.project, "gempro");
        assert_eq!(resolved.root, Utf8PathBuf::from("/work/."));
        assert_eq!(resolved.genes.len(), 2);
        assert!(resolved.kegg.is_none());
        assert!(resolved.structures.options.prefer_homology);
        assert_eq!(
            resolved.structures.options.homology_sort_key,
            HomologySortKey::SeqCoverage
        );
        assert_eq!(resolved.structures.options.qc, QcParams::default());
    }

    #[test]
    fn manual_homology_needs_model_file() {
        let err = parse(
            r#"{"genes": ["b0002"],
                "manual": {"homology_models": {"b0002": {"m1": {"seq_coverage": 0.9}}}}}"#,
        )
        .unwrap_err();
        assert_matches!(err, GemproError::InvalidManualInput(_));
    }

    #[test]
    fn manual_homology_keeps_extra_fields() {
        let resolved = parse(
            r#"{"genes": ["b0002"],
                "manual": {"homology_models": {"b0002": {
                    "m1": {"model_file": "models/m1.pdb", "seq_coverage": 0.95, "template": "1abc"},
                    "m2": "models/m2.pdb"
                }}}}"#,
        )
        .unwrap();
        let gene: GeneId = "b0002".parse().unwrap();
        let models = &resolved.manual.homology_models[&gene];
        let m1 = &models[0];
        assert_eq!(m1.model_file, Utf8PathBuf::from("/work/models/m1.pdb"));
        assert_eq!(m1.sequence_coverage, 0.95);
        assert_eq!(m1.extra["template"], Value::String("1abc".to_string()));
        assert_eq!(models[1].model_file, Utf8PathBuf::from("/work/models/m2.pdb"));
    }

    #[test]
    fn structure_section_overrides() {
        let resolved = parse(
            r#"{"structures": {"prefer_homology": false, "sort_homology_by": "c_score",
                "seq_ident_cutoff": 0.3, "qc": {"allow_deletions": true}}}"#,
        )
        .unwrap();
        let options = resolved.structures.options;
        assert!(!options.prefer_homology);
        assert_eq!(options.homology_sort_key, HomologySortKey::CScore);
        assert!(options.qc.allow_deletions);
        assert!(options.qc.allow_mutants);
        assert_eq!(resolved.structures.seq_ident_cutoff, 0.3);
    }

    #[test]
    fn invalid_manual_accession_is_rejected() {
        let err = parse(r#"{"manual": {"uniprot": {"b0001": "not-an-acc"}}}"#).unwrap_err();
        assert_matches!(err, GemproError::InvalidUniprotAccession(_));
    }
}
