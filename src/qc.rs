use serde::{Deserialize, Serialize};

/// Tolerances applied when comparing a structure chain to the representative
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcParams {
    /// Fraction of the reference that may be missing from the chain termini.
    pub allow_missing_on_termini: f64,
    pub allow_mutants: bool,
    pub allow_deletions: bool,
    pub allow_insertions: bool,
    /// Residues without density, reported as `X` in the chain sequence.
    pub allow_unresolved: bool,
}

impl Default for QcParams {
    fn default() -> Self {
        Self {
            allow_missing_on_termini: 0.1,
            allow_mutants: true,
            allow_deletions: false,
            allow_insertions: false,
            allow_unresolved: true,
        }
    }
}

/// Pass/fail gate for an experimental structure chain.
pub trait QualityCheck: Send + Sync {
    fn check(&self, reference: &str, candidate: &str, params: &QcParams) -> bool;
}

/// Ungapped comparison: the chain is slid along the reference and the offset
/// with the most identical residues is scored. Terminal truncation, point
/// mutations and unresolved residues are judged against [`QcParams`]; chains
/// that only fit with internal gaps fail regardless of the indel flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct UngappedSequenceCheck;

/// Above this mismatch fraction the best placement is treated as a
/// misalignment rather than a set of point mutations.
const MAX_MISMATCH_FRACTION: f64 = 0.1;

impl QualityCheck for UngappedSequenceCheck {
    fn check(&self, reference: &str, candidate: &str, params: &QcParams) -> bool {
        let reference: Vec<u8> = reference.trim().bytes().map(|b| b.to_ascii_uppercase()).collect();
        let candidate: Vec<u8> = candidate.trim().bytes().map(|b| b.to_ascii_uppercase()).collect();
        if reference.is_empty() || candidate.is_empty() || candidate.len() > reference.len() {
            return false;
        }

        let Some(placement) = best_placement(&reference, &candidate) else {
            return false;
        };

        let missing = reference.len() - candidate.len();
        if missing as f64 / reference.len() as f64 > params.allow_missing_on_termini {
            return false;
        }
        if placement.unresolved > 0 && !params.allow_unresolved {
            return false;
        }
        if placement.mismatches > 0 && !params.allow_mutants {
            return false;
        }
        let compared = candidate.len() - placement.unresolved;
        compared > 0 && (placement.mismatches as f64 / compared as f64) <= MAX_MISMATCH_FRACTION
    }
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    matches: usize,
    mismatches: usize,
    unresolved: usize,
}

fn best_placement(reference: &[u8], candidate: &[u8]) -> Option<Placement> {
    let mut best: Option<Placement> = None;
    for offset in 0..=(reference.len() - candidate.len()) {
        let window = &reference[offset..offset + candidate.len()];
        let mut placement = Placement {
            matches: 0,
            mismatches: 0,
            unresolved: 0,
        };
        for (&r, &c) in window.iter().zip(candidate) {
            if c == b'X' {
                placement.unresolved += 1;
            } else if r == c {
                placement.matches += 1;
            } else {
                placement.mismatches += 1;
            }
        }
        if best.is_none_or(|current| placement.matches > current.matches) {
            best = Some(placement);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = "MKRISTTITTTITITTGNGAG";

    #[test]
    fn identical_chain_passes() {
        assert!(UngappedSequenceCheck.check(REFERENCE, REFERENCE, &QcParams::default()));
    }

    #[test]
    fn terminal_truncation_is_bounded() {
        let params = QcParams::default();
        // one residue of 21 missing: under 10%
        assert!(UngappedSequenceCheck.check(REFERENCE, &REFERENCE[1..], &params));
        // five residues missing: over 10%
        assert!(!UngappedSequenceCheck.check(REFERENCE, &REFERENCE[3..19], &params));
    }

    #[test]
    fn mutants_follow_the_flag() {
        let mutant = REFERENCE.replacen('K', "A", 1);
        let strict = QcParams {
            allow_mutants: false,
            ..QcParams::default()
        };
        assert!(UngappedSequenceCheck.check(REFERENCE, &mutant, &QcParams::default()));
        assert!(!UngappedSequenceCheck.check(REFERENCE, &mutant, &strict));
    }

    #[test]
    fn unresolved_residues_follow_the_flag() {
        let gappy = REFERENCE.replacen('R', "X", 1);
        let strict = QcParams {
            allow_unresolved: false,
            ..QcParams::default()
        };
        assert!(UngappedSequenceCheck.check(REFERENCE, &gappy, &QcParams::default()));
        assert!(!UngappedSequenceCheck.check(REFERENCE, &gappy, &strict));
    }

    #[test]
    fn unrelated_chain_fails() {
        let candidate = "WWWWWWWWWWWWWWWWWWWWW";
        assert!(!UngappedSequenceCheck.check(REFERENCE, candidate, &QcParams::default()));
    }
}
