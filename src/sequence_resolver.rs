//! Picks the representative sequence of a gene from its KEGG and UniProt slots.
//!
//! Precedence, first match wins:
//!
//! 1. a representative that is already set (manual or earlier run) is kept;
//! 2. KEGG only: KEGG;
//! 3. UniProt only: the best ranked UniProt entry;
//! 4. both: KEGG when it maps structures and its accession is not among the
//!    UniProt entries, otherwise the best ranked UniProt entry;
//! 5. neither: unresolved.

use serde::Serialize;
use tracing::debug;

use crate::annotation::{Gene, Provenance, SequenceOrigin, SequenceRecord, UniprotEntry};
use crate::domain::UniprotAccession;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "origin", rename_all = "snake_case")]
pub enum SequenceResolution {
    Resolved(SequenceOrigin),
    AlreadySet,
    Unresolved,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RepresentativeSequenceResolver;

impl RepresentativeSequenceResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolves in place. Only `sequence.representative` and the gene
    /// history are touched.
    pub fn resolve(&self, gene: &mut Gene) -> SequenceResolution {
        let sequence = &gene.sequence;
        if sequence.is_resolved() {
            debug!("{}: representative sequence already set", gene.id);
            return SequenceResolution::AlreadySet;
        }

        let choice = match (sequence.has_kegg(), sequence.has_uniprot()) {
            (true, false) => Choice::Kegg,
            (false, true) => Choice::Uniprot,
            (true, true) if kegg_outranks_uniprot(gene) => Choice::Kegg,
            (true, true) => Choice::Uniprot,
            (false, false) => Choice::None,
        };

        match choice {
            Choice::Kegg => {
                let Some(kegg) = gene.sequence.kegg.clone() else {
                    return SequenceResolution::Unresolved;
                };
                gene.sequence.representative = kegg;
                gene.sequence.representative_origin = Some(SequenceOrigin::Kegg);
                gene.record_event(Provenance::Representative, "resolve-sequence", "kegg");
                debug!("{}: representative sequence set from KEGG", gene.id);
                SequenceResolution::Resolved(SequenceOrigin::Kegg)
            }
            Choice::Uniprot => {
                let Some((accession, entry)) = best_uniprot(gene.sequence.uniprot.iter()) else {
                    return SequenceResolution::Unresolved;
                };
                let accession = accession.clone();
                gene.sequence.representative = representative_from_uniprot(entry);
                gene.sequence.representative_origin =
                    Some(SequenceOrigin::Uniprot(accession.clone()));
                gene.record_event(
                    Provenance::Representative,
                    "resolve-sequence",
                    format!("uniprot {accession}"),
                );
                debug!("{}: representative sequence set from UniProt using {accession}", gene.id);
                SequenceResolution::Resolved(SequenceOrigin::Uniprot(accession))
            }
            Choice::None => {
                debug!("{}: no KEGG or UniProt sequence to choose from", gene.id);
                SequenceResolution::Unresolved
            }
        }
    }
}

enum Choice {
    Kegg,
    Uniprot,
    None,
}

fn kegg_outranks_uniprot(gene: &Gene) -> bool {
    let Some(kegg) = gene.sequence.kegg.as_ref() else {
        return false;
    };
    let accession_is_new = kegg
        .accession
        .as_ref()
        .is_none_or(|acc| !gene.sequence.uniprot.contains_key(acc));
    !kegg.structure_ids.is_empty() && accession_is_new
}

/// Highest [`UniprotEntry::ranking_score`]; on a tie the entry seen first wins.
pub fn best_uniprot<'a, I>(entries: I) -> Option<(&'a UniprotAccession, &'a UniprotEntry)>
where
    I: IntoIterator<Item = (&'a UniprotAccession, &'a UniprotEntry)>,
{
    let mut best: Option<(&UniprotAccession, &UniprotEntry)> = None;
    for (accession, entry) in entries {
        match best {
            Some((_, current)) if entry.ranking_score() <= current.ranking_score() => {}
            _ => best = Some((accession, entry)),
        }
    }
    best
}

fn representative_from_uniprot(entry: &UniprotEntry) -> SequenceRecord {
    let record = &entry.record;
    SequenceRecord {
        accession: record.accession.clone(),
        external_id: record
            .external_id
            .clone()
            .or_else(|| (!entry.kegg_ids.is_empty()).then(|| entry.kegg_ids.join(";"))),
        length: record.length,
        structure_ids: record.structure_ids.clone(),
        sequence_file: record.sequence_file.clone(),
        metadata_file: record.metadata_file.clone(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::PdbId;

    fn uniprot(acc: &str, reviewed: bool, pdbs: &[&str]) -> UniprotEntry {
        UniprotEntry {
            record: SequenceRecord {
                accession: Some(acc.parse().unwrap()),
                length: 100,
                structure_ids: pdbs.iter().map(|p| p.parse::<PdbId>().unwrap()).collect(),
                sequence_file: Some(format!("{acc}.fasta").into()),
                ..SequenceRecord::default()
            },
            reviewed,
            ..UniprotEntry::default()
        }
    }

    fn gene_with(kegg: Option<SequenceRecord>, entries: Vec<UniprotEntry>) -> Gene {
        let mut gene = Gene::new("b0001".parse().unwrap());
        gene.sequence.kegg = kegg;
        for entry in entries {
            gene.upsert_uniprot(entry);
        }
        gene
    }

    #[test]
    fn ties_go_to_first_seen_entry() {
        let mut gene = gene_with(
            None,
            vec![
                uniprot("P00001", true, &[]),
                uniprot("P00002", false, &["1abc"]),
                uniprot("P00003", true, &[]),
            ],
        );
        let outcome = RepresentativeSequenceResolver::new().resolve(&mut gene);
        assert_matches!(
            outcome,
            SequenceResolution::Resolved(SequenceOrigin::Uniprot(acc)) if acc.as_str() == "P00001"
        );
    }

    #[test]
    fn kegg_with_unmapped_structures_beats_uniprot() {
        let kegg = SequenceRecord {
            accession: Some("P11111".parse().unwrap()),
            external_id: Some("eco:b0001".to_string()),
            length: 90,
            structure_ids: vec!["2xyz".parse().unwrap()],
            ..SequenceRecord::default()
        };
        let mut gene = gene_with(Some(kegg.clone()), vec![uniprot("P00001", true, &["1abc"])]);

        let outcome = RepresentativeSequenceResolver::new().resolve(&mut gene);
        assert_eq!(outcome, SequenceResolution::Resolved(SequenceOrigin::Kegg));
        assert_eq!(gene.sequence.representative, kegg);
    }

    #[test]
    fn kegg_accession_already_in_uniprot_defers_to_uniprot() {
        let kegg = SequenceRecord {
            accession: Some("P00001".parse().unwrap()),
            length: 90,
            structure_ids: vec!["2xyz".parse().unwrap()],
            ..SequenceRecord::default()
        };
        let mut gene = gene_with(Some(kegg), vec![uniprot("P00001", false, &[])]);

        let outcome = RepresentativeSequenceResolver::new().resolve(&mut gene);
        assert_matches!(outcome, SequenceResolution::Resolved(SequenceOrigin::Uniprot(_)));
        assert_eq!(gene.sequence.representative.length, 100);
    }

    #[test]
    fn empty_gene_is_unresolved() {
        let mut gene = gene_with(None, Vec::new());
        let outcome = RepresentativeSequenceResolver::new().resolve(&mut gene);
        assert_eq!(outcome, SequenceResolution::Unresolved);
        assert!(!gene.sequence.is_resolved());
    }
}
