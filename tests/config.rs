use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use gempro::config::ConfigLoader;
use gempro::domain::{GeneId, HomologySortKey, ModelId};
use gempro::error::GemproError;

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

#[test]
fn resolve_reads_file_and_gene_list() {
    let (_temp, root) = temp_root();
    fs::write(root.join("genes.txt"), "# E. coli core\nb0002\n\nb0003\nb0001\n").unwrap();
    let config_path = root.join("gempro.json");
    fs::write(
        &config_path,
        r#"{
            "project": "ecoli_core",
            "genes": ["b0001"],
            "genes_file": "genes.txt",
            "kegg": {"organism": "eco"},
            "uniprot": {"source_db": "Gene_Name", "custom_gene_mapping": {"b0001": "thrL"}},
            "structures": {
                "seq_ident_cutoff": 0.3,
                "prefer_homology": false,
                "sort_homology_by": "tm_score",
                "itasser_dir": "itasser",
                "qc": {"allow_mutants": false}
            }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(config_path.as_str())).unwrap();

    assert_eq!(resolved.project, "ecoli_core");
    let genes: Vec<&str> = resolved.genes.iter().map(GeneId::as_str).collect();
    assert_eq!(genes, vec!["b0001", "b0002", "b0003"]);
    assert_eq!(resolved.kegg.as_ref().unwrap().organism, "eco");
    let uniprot = resolved.uniprot.as_ref().unwrap();
    assert_eq!(uniprot.source_db, "Gene_Name");
    assert_eq!(uniprot.custom_mapping[&"b0001".parse::<GeneId>().unwrap()], "thrL");

    let structures = &resolved.structures;
    assert_eq!(structures.seq_ident_cutoff, 0.3);
    assert!(!structures.options.prefer_homology);
    assert_eq!(structures.options.homology_sort_key, HomologySortKey::TmScore);
    assert!(!structures.options.qc.allow_mutants);
    assert!(structures.options.qc.allow_unresolved);
    assert_eq!(structures.itasser_dir.as_ref().unwrap(), &root.join("itasser"));
}

#[test]
fn manual_models_resolve_against_config_dir() {
    let (_temp, root) = temp_root();
    let config_path = root.join("gempro.json");
    fs::write(
        &config_path,
        r#"{
            "genes": ["b0002"],
            "manual": {
                "homology_models": {
                    "b0002": {
                        "b0002": {"model_file": "models/b0002.pdb", "seq_coverage": 0.95, "c_score": 1.1},
                        "alt": "models/alt.pdb"
                    }
                }
            }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(config_path.as_str())).unwrap();

    let gene: GeneId = "b0002".parse().unwrap();
    let models = &resolved.manual.homology_models[&gene];
    let detailed = &models[&"b0002".parse::<ModelId>().unwrap()];
    assert_eq!(detailed.model_file, root.join("models/b0002.pdb"));
    assert_eq!(detailed.sequence_coverage, 0.95);
    assert_eq!(detailed.c_score, Some(1.1));
    let shorthand = &models[&"alt".parse::<ModelId>().unwrap()];
    assert_eq!(shorthand.model_file, root.join("models/alt.pdb"));
}

#[test]
fn missing_explicit_file_is_a_read_error() {
    let (_temp, root) = temp_root();
    let path = root.join("absent.json");
    let err = ConfigLoader::resolve(Some(path.as_str())).unwrap_err();
    assert_matches!(err, GemproError::ConfigRead(_));
}

#[test]
fn missing_default_file_is_reported() {
    // The package root carries no gempro.json.
    let err = ConfigLoader::resolve(None).unwrap_err();
    assert_matches!(err, GemproError::MissingConfig);
}

#[test]
fn malformed_json_is_a_parse_error() {
    let (_temp, root) = temp_root();
    let path = root.join("gempro.json");
    fs::write(&path, "{\"genes\": [").unwrap();
    let err = ConfigLoader::resolve(Some(path.as_str())).unwrap_err();
    assert_matches!(err, GemproError::ConfigParse(_));
}

#[test]
fn invalid_gene_in_gene_file_is_rejected() {
    let (_temp, root) = temp_root();
    fs::write(root.join("genes.txt"), "b0001\nbad/gene\n").unwrap();
    let path = root.join("gempro.json");
    fs::write(&path, r#"{"genes_file": "genes.txt"}"#).unwrap();
    let err = ConfigLoader::resolve(Some(path.as_str())).unwrap_err();
    assert_matches!(err, GemproError::InvalidGeneId(_));
}
