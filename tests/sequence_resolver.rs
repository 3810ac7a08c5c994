use assert_matches::assert_matches;

use gempro::annotation::{Gene, SequenceOrigin, SequenceRecord, UniprotEntry};
use gempro::domain::{GeneId, PdbId};
use gempro::sequence_resolver::{RepresentativeSequenceResolver, SequenceResolution};
use gempro::store::{GeneAnnotationStore, SequenceSource};

fn gene_id(value: &str) -> GeneId {
    value.parse().unwrap()
}

fn kegg_record(length: usize, structures: &[&str]) -> SequenceRecord {
    SequenceRecord {
        external_id: Some("eco:b0001".to_string()),
        length,
        structure_ids: structures.iter().map(|p| p.parse::<PdbId>().unwrap()).collect(),
        sequence_file: Some("eco-b0001.faa".into()),
        ..SequenceRecord::default()
    }
}

fn uniprot_entry(
    accession: &str,
    reviewed: bool,
    length: usize,
    structures: &[&str],
) -> UniprotEntry {
    UniprotEntry {
        record: SequenceRecord {
            accession: Some(accession.parse().unwrap()),
            length,
            structure_ids: structures.iter().map(|p| p.parse::<PdbId>().unwrap()).collect(),
            sequence_file: Some(format!("{accession}.fasta").into()),
            metadata_file: Some(format!("{accession}.json").into()),
            ..SequenceRecord::default()
        },
        reviewed,
        ..UniprotEntry::default()
    }
}

#[test]
fn reviewed_uniprot_with_structure_beats_bare_kegg() {
    let id = gene_id("b0001");
    let mut store = GeneAnnotationStore::from_genes([id.clone()]);
    store
        .upsert_sequence_source(&id, SequenceSource::Kegg(kegg_record(300, &[])))
        .unwrap();
    store
        .upsert_sequence_source(
            &id,
            SequenceSource::Uniprot(uniprot_entry("P00001", true, 300, &["1abc"])),
        )
        .unwrap();

    let gene = store.get_mut(&id).unwrap();
    let outcome = RepresentativeSequenceResolver::new().resolve(gene);

    assert_matches!(
        outcome,
        SequenceResolution::Resolved(SequenceOrigin::Uniprot(ref acc)) if acc.as_str() == "P00001"
    );
    let representative = &gene.sequence.representative;
    assert_eq!(representative.length, 300);
    assert_eq!(representative.accession.as_ref().unwrap().as_str(), "P00001");
    assert_eq!(representative.structure_ids, vec!["1abc".parse::<PdbId>().unwrap()]);
}

#[test]
fn kegg_only_gene_copies_kegg_record() {
    let mut gene = Gene::new(gene_id("b0001"));
    gene.set_kegg(kegg_record(300, &[]));

    let outcome = RepresentativeSequenceResolver::new().resolve(&mut gene);

    assert_eq!(outcome, SequenceResolution::Resolved(SequenceOrigin::Kegg));
    assert_eq!(gene.sequence.representative, kegg_record(300, &[]));
    assert_eq!(gene.sequence.representative_origin, Some(SequenceOrigin::Kegg));
}

#[test]
fn equally_ranked_entries_keep_insertion_order() {
    let mut gene = Gene::new(gene_id("b0004"));
    gene.upsert_uniprot(uniprot_entry("Q00002", false, 210, &["2abc"]));
    gene.upsert_uniprot(uniprot_entry("Q00001", true, 200, &[]));

    let outcome = RepresentativeSequenceResolver::new().resolve(&mut gene);

    assert_matches!(
        outcome,
        SequenceResolution::Resolved(SequenceOrigin::Uniprot(ref acc)) if acc.as_str() == "Q00002"
    );
}

#[test]
fn second_resolution_leaves_representative_alone() {
    let mut gene = Gene::new(gene_id("b0001"));
    gene.set_kegg(kegg_record(300, &[]));
    let resolver = RepresentativeSequenceResolver::new();
    resolver.resolve(&mut gene);
    let first = gene.sequence.clone();

    gene.upsert_uniprot(uniprot_entry("P00001", true, 300, &["1abc"]));
    let outcome = resolver.resolve(&mut gene);

    assert_eq!(outcome, SequenceResolution::AlreadySet);
    assert_eq!(gene.sequence.representative, first.representative);
    assert_eq!(gene.sequence.representative_origin, first.representative_origin);
}

#[test]
fn manual_override_is_never_replaced() {
    let mut gene = Gene::new(gene_id("b0005"));
    gene.upsert_uniprot(uniprot_entry("P00005", true, 150, &["5abc"]));
    gene.override_representative_sequence(SequenceRecord {
        length: 140,
        sequence_file: Some("b0005.faa".into()),
        ..SequenceRecord::default()
    });

    let outcome = RepresentativeSequenceResolver::new().resolve(&mut gene);

    assert_eq!(outcome, SequenceResolution::AlreadySet);
    assert_eq!(gene.sequence.representative.length, 140);
    assert_eq!(gene.sequence.representative_origin, Some(SequenceOrigin::Manual));
}
