use std::collections::HashMap;
use std::time::Duration;

use crate::domain::{PdbId, UniprotAccession};
use crate::error::GemproError;
use crate::http::{Service, ServiceClient};

/// A KEGG GENES entry: flat-file text, amino acid FASTA and the PDB ids
/// listed under `STRUCTURE`.
#[derive(Debug, Clone)]
pub struct KeggGene {
    pub kegg_id: String,
    pub flat_file: String,
    pub fasta: Option<String>,
    pub structure_ids: Vec<PdbId>,
}

pub trait KeggClient: Send + Sync {
    /// KEGG gene id (without organism prefix) to its first UniProt accession.
    fn map_to_uniprot(
        &self,
        organism: &str,
    ) -> Result<HashMap<String, UniprotAccession>, GemproError>;

    /// `None` when KEGG has no entry for the gene.
    fn fetch_gene(&self, organism: &str, gene: &str) -> Result<Option<KeggGene>, GemproError>;
}

#[derive(Clone)]
pub struct KeggHttpClient {
    http: ServiceClient,
}

impl KeggHttpClient {
    pub fn new() -> Result<Self, GemproError> {
        Ok(Self {
            http: ServiceClient::new(Service::Kegg, Duration::from_secs(30))?,
        })
    }

    fn conv_url(organism: &str) -> String {
        format!("https://rest.kegg.jp/conv/uniprot/{organism}")
    }

    fn entry_url(kegg_id: &str) -> String {
        format!("https://rest.kegg.jp/get/{kegg_id}")
    }

    fn aaseq_url(kegg_id: &str) -> String {
        format!("https://rest.kegg.jp/get/{kegg_id}/aaseq")
    }
}

impl KeggClient for KeggHttpClient {
    fn map_to_uniprot(
        &self,
        organism: &str,
    ) -> Result<HashMap<String, UniprotAccession>, GemproError> {
        let text = self
            .http
            .get_text_optional(&Self::conv_url(organism))?
            .unwrap_or_default();
        Ok(parse_conv_uniprot(&text))
    }

    fn fetch_gene(&self, organism: &str, gene: &str) -> Result<Option<KeggGene>, GemproError> {
        let kegg_id = format!("{organism}:{gene}");
        let Some(flat_file) = self.http.get_text_optional(&Self::entry_url(&kegg_id))? else {
            return Ok(None);
        };
        let fasta = self.http.get_text_optional(&Self::aaseq_url(&kegg_id))?;
        let structure_ids = parse_structure_ids(&flat_file);
        Ok(Some(KeggGene {
            kegg_id,
            flat_file,
            fasta: fasta.filter(|text| text.trim_start().starts_with('>')),
            structure_ids,
        }))
    }
}

/// Parses `conv/uniprot` output (`eco:b0001\tup:P0AD86`). The first
/// accession listed for a gene is kept.
pub fn parse_conv_uniprot(text: &str) -> HashMap<String, UniprotAccession> {
    let mut mapping = HashMap::new();
    for line in text.lines() {
        let Some((kegg, uniprot)) = line.split_once('\t') else {
            continue;
        };
        let gene = kegg.split_once(':').map_or(kegg, |(_, gene)| gene).trim();
        let accession = uniprot.trim().trim_start_matches("up:");
        if let Ok(accession) = accession.parse::<UniprotAccession>() {
            mapping.entry(gene.to_string()).or_insert(accession);
        }
    }
    mapping
}

/// PDB ids from the `STRUCTURE` field, including continuation lines.
pub fn parse_structure_ids(flat_file: &str) -> Vec<PdbId> {
    let mut ids = Vec::new();
    let mut in_field = false;
    for line in flat_file.lines() {
        let body = if let Some(rest) = line.strip_prefix("STRUCTURE") {
            in_field = true;
            rest
        } else if in_field && line.starts_with(' ') {
            line
        } else {
            in_field = false;
            continue;
        };
        let body = body.trim();
        let body = body.strip_prefix("PDB:").unwrap_or(body);
        ids.extend(body.split_whitespace().filter_map(|token| token.parse::<PdbId>().ok()));
    }
    ids
}
