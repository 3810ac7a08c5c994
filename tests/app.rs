use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde_json::json;

use gempro::annotation::SequenceOrigin;
use gempro::app::Project;
use gempro::config::{Config, ConfigLoader, ResolvedConfig};
use gempro::domain::{ChainId, GeneId, ModelId, PdbId, StructureId, UniprotAccession};
use gempro::error::GemproError;
use gempro::homology::ItasserOrganizer;
use gempro::kegg::{KeggClient, KeggGene};
use gempro::layout::ProjectLayout;
use gempro::output::JsonOutput;
use gempro::pdb::{PdbClient, PdbEntryMetadata, RankedStructure};
use gempro::qc::UngappedSequenceCheck;
use gempro::uniprot::{UniprotClient, UniprotMetadata, UniprotRecord};

const SEQUENCE: &str = "MKTAYIAKQR";

struct MockKegg;

impl KeggClient for MockKegg {
    fn map_to_uniprot(
        &self,
        _organism: &str,
    ) -> Result<HashMap<String, UniprotAccession>, GemproError> {
        Ok(HashMap::from([(
            "b0001".to_string(),
            "P00001".parse().unwrap(),
        )]))
    }

    fn fetch_gene(&self, organism: &str, gene: &str) -> Result<Option<KeggGene>, GemproError> {
        if gene != "b0001" {
            return Ok(None);
        }
        Ok(Some(KeggGene {
            kegg_id: format!("{organism}:{gene}"),
            flat_file: format!("ENTRY       {gene}\nNAME        thrL\n///\n"),
            fasta: Some(format!(">{organism}:{gene}\n{SEQUENCE}\n")),
            structure_ids: Vec::new(),
        }))
    }
}

struct MockUniprot;

impl UniprotClient for MockUniprot {
    fn map_ids(
        &self,
        _source_db: &str,
        ids: &[String],
    ) -> Result<IndexMap<String, Vec<UniprotAccession>>, GemproError> {
        let mut mapping = IndexMap::new();
        for id in ids {
            match id.as_str() {
                "b0001" => {
                    mapping.insert(id.clone(), vec!["P00001".parse().unwrap()]);
                }
                "b0003" => {
                    mapping.insert(id.clone(), vec!["P99999".parse().unwrap()]);
                }
                _ => {}
            }
        }
        Ok(mapping)
    }

    fn fetch(&self, accession: &UniprotAccession) -> Result<UniprotRecord, GemproError> {
        if accession.as_str() != "P00001" {
            return Err(GemproError::UniprotStatus {
                status: 500,
                message: format!("{accession} unavailable"),
            });
        }
        Ok(UniprotRecord {
            raw_json: json!({"primaryAccession": "P00001"}),
            fasta: format!(">sp|P00001|THRL_ECOLI\n{SEQUENCE}\n"),
            metadata: UniprotMetadata {
                accession: accession.clone(),
                reviewed: true,
                sequence_length: SEQUENCE.len(),
                gene_names: vec!["thrL".to_string()],
                description: Some("thr operon leader peptide".to_string()),
                pdb_ids: vec!["1abc".parse().unwrap()],
                kegg_ids: vec!["eco:b0001".to_string()],
                ec_numbers: Vec::new(),
                refseq_ids: Vec::new(),
                pfam_ids: Vec::new(),
                entry_version: Some(3),
                sequence_version: Some(1),
            },
        })
    }
}

#[derive(Clone, Default)]
struct MockPdb {
    downloads: Arc<Mutex<Vec<String>>>,
}

impl PdbClient for MockPdb {
    fn best_structures(
        &self,
        accession: &UniprotAccession,
        _seq_ident_cutoff: f64,
    ) -> Result<Vec<RankedStructure>, GemproError> {
        if accession.as_str() != "P00001" {
            return Ok(Vec::new());
        }
        Ok(["B", "A"]
            .into_iter()
            .map(|chain| RankedStructure {
                pdb_id: "1abc".parse().unwrap(),
                chain_id: chain.parse().unwrap(),
                experimental_method: Some("X-ray diffraction".to_string()),
                resolution: Some(1.9),
                coverage: 1.0,
                taxonomy_id: Some(83333),
            })
            .collect())
    }

    fn entry_metadata(&self, pdb: &PdbId) -> Result<Option<PdbEntryMetadata>, GemproError> {
        Ok(Some(PdbEntryMetadata {
            pdb_id: pdb.clone(),
            title: None,
            experimental_method: Some("X-ray diffraction".to_string()),
            resolution: Some(1.9),
            release_date: "2001-05-04".parse().ok(),
        }))
    }

    fn download_structure(&self, pdb: &PdbId, destination: &Utf8Path) -> Result<(), GemproError> {
        self.downloads.lock().unwrap().push(pdb.to_string());
        // chain B carries a point mutation at every residue, chain A matches
        let mut text = atom_lines("B", "WWWWWWWWWW", 1);
        text.push_str(&atom_lines("A", SEQUENCE, 11));
        text.push_str("END\n");
        ProjectLayout::write_bytes_atomic(destination, text.as_bytes())
    }
}

fn atom_lines(chain: &str, sequence: &str, first_serial: usize) -> String {
    let mut out = String::new();
    for (index, residue) in sequence.chars().enumerate() {
        let name = match residue {
            'M' => "MET",
            'K' => "LYS",
            'T' => "THR",
            'A' => "ALA",
            'Y' => "TYR",
            'I' => "ILE",
            'Q' => "GLN",
            'R' => "ARG",
            'W' => "TRP",
            _ => "UNK",
        };
        let serial = first_serial + index;
        let number = index + 1;
        let x = index as f64;
        out.push_str(&format!(
            "ATOM  {serial:>5}  CA  {name} {chain}{number:>4}    {x:>8.3}{:>8.3}{:>8.3}  1.00  0.00           C\n",
            0.0, 0.0
        ));
    }
    out
}

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

fn project_config(root: &Utf8Path) -> ResolvedConfig {
    let model = format!("{}END\n", atom_lines("A", SEQUENCE, 1));
    fs::create_dir_all(root.join("models")).unwrap();
    fs::write(root.join("models/b0002.pdb"), model).unwrap();

    let config: Config = serde_json::from_value(json!({
        "project": "ecoli",
        "genes": ["b0001", "b0002", "b0003"],
        "kegg": {"organism": "eco"},
        "uniprot": {"source_db": "Gene_Name"},
        "manual": {
            "sequences": {"b0002": "mktayiakqr"},
            "homology_models": {
                "b0002": {"b0002": {"model_file": "models/b0002.pdb", "seq_coverage": 0.95}}
            }
        }
    }))
    .unwrap();
    ConfigLoader::resolve_config(config, root).unwrap()
}

fn gene(id: &str) -> GeneId {
    id.parse().unwrap()
}

#[test]
fn full_run_resolves_sequences_and_structures() {
    let (_temp, root) = temp_root();
    let config = project_config(&root);
    let layout = ProjectLayout::new(&config.root, &config.project);
    let pdb = MockPdb::default();
    let downloads = Arc::clone(&pdb.downloads);
    let mut project = Project::open(layout, MockKegg, MockUniprot, pdb).unwrap();

    let init = project.init(&config.genes, &JsonOutput).unwrap();
    assert_eq!(init.added, 3);

    project.run_sequence_stages(&config, &JsonOutput).unwrap();

    let b0001 = project.gene(&gene("b0001")).unwrap();
    assert_eq!(
        b0001.sequence.representative_origin,
        Some(SequenceOrigin::Uniprot("P00001".parse().unwrap()))
    );
    assert_eq!(b0001.sequence.representative.length, SEQUENCE.len());
    assert_eq!(b0001.sequence.kegg.as_ref().unwrap().external_id.as_deref(), Some("eco:b0001"));
    let b0002 = project.gene(&gene("b0002")).unwrap();
    assert_eq!(b0002.sequence.representative_origin, Some(SequenceOrigin::Manual));
    // b0003 maps to an accession whose fetch fails; the run carries on
    assert!(project.gene(&gene("b0003")).unwrap().sequence.uniprot.is_empty());
    assert_eq!(project.missing().sequence, vec![gene("b0003")]);

    let stages = project
        .run_structure_stages(&config, None, &ItasserOrganizer, UngappedSequenceCheck, &JsonOutput)
        .unwrap();
    let names: Vec<&str> = stages.iter().map(|stage| stage.stage.as_str()).collect();
    assert_eq!(
        names,
        vec!["pdb_ranking", "manual_homology", "pdb_files", "representative_structures"]
    );

    let b0001 = project.gene(&gene("b0001")).unwrap();
    let chain_a: ChainId = "A".parse().unwrap();
    match b0001.structure.representative.structure_id.as_ref() {
        Some(StructureId::Experimental(key)) => assert_eq!(key.chain, chain_a),
        other => panic!("unexpected representative {other:?}"),
    }
    let ranked: Vec<Option<u32>> = b0001.structure.pdb.values().map(|record| record.rank).collect();
    assert_eq!(ranked, vec![Some(1), Some(2)]);
    assert!(b0001.structure.pdb.values().all(|record| record.release_date.is_some()));
    assert!(b0001.structure.representative.clean_file.as_ref().unwrap().is_file());
    assert_eq!(downloads.lock().unwrap().as_slice(), &["1abc".to_string()]);

    let b0002 = project.gene(&gene("b0002")).unwrap();
    assert_eq!(
        b0002.structure.representative.structure_id,
        Some(StructureId::Homology("b0002".parse().unwrap()))
    );
    assert_eq!(b0002.structure.representative.sequence_coverage, 0.95);
    assert!(
        b0002.structure.homology[&"b0002".parse::<ModelId>().unwrap()]
            .model_file
            .starts_with(project.layout().gene_structure_dir(&gene("b0002")))
    );

    let summary = project.summary();
    assert_eq!(summary.genes, 3);
    assert_eq!(summary.sequences_resolved, 2);
    assert_eq!(summary.experimental_structures, 1);
    assert_eq!(summary.homology_structures, 1);
    assert_eq!(summary.without_structure, vec![gene("b0003")]);

    let table = fs::read_to_string(project.layout().table_path("pdb_ranking")).unwrap();
    let rows: serde_json::Value = serde_json::from_str(&table).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 2);
    assert_eq!(rows[0]["pdb_chain_id"], "B");
    assert_eq!(rows[0]["rank"], 1);
}

#[test]
fn reopened_project_keeps_annotations() {
    let (_temp, root) = temp_root();
    let config = project_config(&root);
    let layout = ProjectLayout::new(&config.root, &config.project);
    {
        let mut project =
            Project::open(layout.clone(), MockKegg, MockUniprot, MockPdb::default()).unwrap();
        project.init(&config.genes, &JsonOutput).unwrap();
        project.run_sequence_stages(&config, &JsonOutput).unwrap();
        project.save().unwrap();
    }

    let mut reopened = Project::open(layout, MockKegg, MockUniprot, MockPdb::default()).unwrap();
    let init = reopened.init(&config.genes, &JsonOutput).unwrap();
    assert_eq!(init.added, 0);
    assert_eq!(init.genes, 3);
    let ids: Vec<GeneId> = reopened.store().gene_ids();
    assert_eq!(ids, vec![gene("b0001"), gene("b0002"), gene("b0003")]);
    assert!(reopened.gene(&gene("b0001")).unwrap().sequence.is_resolved());

    let err = reopened.gene(&gene("b9999")).unwrap_err();
    assert!(matches!(err, GemproError::UnknownGene(_)));
}

#[test]
fn pdbs_for_gene_lists_entries_once() {
    let (_temp, root) = temp_root();
    let config = project_config(&root);
    let layout = ProjectLayout::new(&config.root, &config.project);
    let mut project = Project::open(layout, MockKegg, MockUniprot, MockPdb::default()).unwrap();
    project.init(&config.genes, &JsonOutput).unwrap();
    project.run_sequence_stages(&config, &JsonOutput).unwrap();
    project.map_uniprot_to_pdb(0.0, &JsonOutput).unwrap();

    let pdbs = project.pdbs_for_gene(&gene("b0001")).unwrap();
    assert_eq!(pdbs, vec!["1abc".parse::<PdbId>().unwrap()]);
    assert!(project.pdbs_for_gene(&gene("b0003")).unwrap().is_empty());
}

#[test]
fn failed_file_write_skips_only_that_gene() {
    let (_temp, root) = temp_root();
    let config = project_config(&root);
    let layout = ProjectLayout::new(&config.root, &config.project);
    let mut project = Project::open(layout, MockKegg, MockUniprot, MockPdb::default()).unwrap();
    project.init(&config.genes, &JsonOutput).unwrap();
    // a plain file where b0001's sequence directory should go
    fs::write(project.layout().gene_sequence_dir(&gene("b0001")), "").unwrap();

    let kegg = project.kegg_mapping(config.kegg.as_ref().unwrap(), &JsonOutput).unwrap();
    assert!(kegg.rows.is_empty());
    assert_eq!(kegg.missing, vec![gene("b0001"), gene("b0002"), gene("b0003")]);

    let uniprot = project
        .uniprot_mapping(config.uniprot.as_ref().unwrap(), &JsonOutput)
        .unwrap();
    assert!(uniprot.rows.is_empty());
    assert!(project.gene(&gene("b0001")).unwrap().sequence.uniprot.is_empty());

    let manual = project
        .manual_sequence_mapping(&config.manual.sequences, &JsonOutput)
        .unwrap();
    let rows: Vec<&GeneId> = manual.rows.iter().map(|row| &row.gene).collect();
    assert_eq!(rows, vec![&gene("b0002")]);

    project.set_representative_sequences(&JsonOutput).unwrap();
    assert!(!project.gene(&gene("b0001")).unwrap().sequence.is_resolved());
    assert!(project.gene(&gene("b0002")).unwrap().sequence.is_resolved());
}
