use serde::Serialize;

use crate::domain::{ChainId, PdbId};
use crate::error::GemproError;

/// One PDB entry hit by a sequence search. A hit can cover several chains of
/// the same entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlastHit {
    pub pdb_id: PdbId,
    pub chains: Vec<ChainId>,
    pub score: f64,
    pub evalue: f64,
    /// Identity over the query, 0..=1.
    pub percent_ident: f64,
    pub percent_similar: Option<f64>,
}

/// Sequence search against the PDB sequence database. Invocation of the
/// search tool itself lives outside this crate.
pub trait BlastSearch: Send + Sync {
    fn search(
        &self,
        sequence: &str,
        evalue: f64,
        seq_ident_cutoff: f64,
    ) -> Result<Vec<BlastHit>, GemproError>;
}
