//! Minimal PDB-format text handling: per-chain residue sequences and
//! cleaned single-chain copies.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;

use crate::domain::ChainId;
use crate::error::GemproError;
use crate::layout::ProjectLayout;

/// One-letter sequence of every chain in the first model, in file order.
pub fn chain_sequences(path: &Utf8Path) -> Result<IndexMap<ChainId, String>, GemproError> {
    let content = read(path)?;
    Ok(chain_sequences_from_str(&content))
}

pub fn chain_sequence(path: &Utf8Path, chain: &ChainId) -> Result<Option<String>, GemproError> {
    Ok(chain_sequences(path)?.shift_remove(chain))
}

pub fn chain_sequences_from_str(content: &str) -> IndexMap<ChainId, String> {
    let mut sequences: IndexMap<ChainId, String> = IndexMap::new();
    let mut last_residue: Option<(ChainId, String)> = None;

    for line in content.lines() {
        if line.starts_with("ENDMDL") {
            break;
        }
        if !line.starts_with("ATOM  ") && !is_modified_residue(line) {
            continue;
        }
        let Some(atom) = AtomLine::parse(line) else {
            continue;
        };
        let Ok(chain) = atom.chain.parse::<ChainId>() else {
            continue;
        };
        let residue_key = (chain.clone(), atom.residue_number.to_string());
        if last_residue.as_ref() == Some(&residue_key) {
            continue;
        }
        last_residue = Some(residue_key);
        sequences
            .entry(chain)
            .or_default()
            .push(three_to_one(atom.residue_name));
    }
    sequences
}

/// Writes `<stem>_<suffix>.pdb` into `out_dir` holding only protein atoms of
/// the first model, restricted to `keep_chain` when given. Waters, ligands and
/// alternate locations other than the first are dropped.
pub fn write_clean_structure(
    source: &Utf8Path,
    keep_chain: Option<&ChainId>,
    out_dir: &Utf8Path,
) -> Result<Utf8PathBuf, GemproError> {
    let content = read(source)?;
    let cleaned = clean_structure_str(&content, keep_chain);
    let stem = source.file_stem().unwrap_or("structure");
    let suffix = match keep_chain {
        Some(chain) => format!("{chain}_clean"),
        None => "clean".to_string(),
    };
    let dest = out_dir.join(format!("{stem}_{suffix}.pdb"));
    ProjectLayout::write_bytes_atomic(&dest, cleaned.as_bytes())?;
    Ok(dest)
}

pub fn clean_structure_str(content: &str, keep_chain: Option<&ChainId>) -> String {
    let mut out = String::new();
    let mut last_chain: Option<String> = None;

    for line in content.lines() {
        if line.starts_with("ENDMDL") {
            break;
        }
        if !line.starts_with("ATOM  ") && !is_modified_residue(line) {
            continue;
        }
        let Some(atom) = AtomLine::parse(line) else {
            continue;
        };
        if let Some(keep) = keep_chain {
            if atom.chain != keep.as_str() {
                continue;
            }
        }
        if !matches!(atom.alt_loc, ' ' | 'A' | '1') {
            continue;
        }
        if let Some(previous) = last_chain.as_deref() {
            if previous != atom.chain {
                out.push_str("TER\n");
            }
        }
        last_chain = Some(atom.chain.to_string());

        let mut record = line.to_string();
        if atom.alt_loc != ' ' {
            record.replace_range(16..17, " ");
        }
        out.push_str(&record);
        out.push('\n');
    }
    if last_chain.is_some() {
        out.push_str("TER\n");
    }
    out.push_str("END\n");
    out
}

struct AtomLine<'a> {
    alt_loc: char,
    residue_name: &'a str,
    chain: &'a str,
    residue_number: &'a str,
}

impl<'a> AtomLine<'a> {
    /// `None` for short lines or when a fixed column splits a multi-byte
    /// character.
    fn parse(line: &'a str) -> Option<Self> {
        Some(Self {
            alt_loc: line.get(16..17)?.chars().next().unwrap_or(' '),
            residue_name: line.get(17..20)?.trim(),
            chain: line.get(21..22)?.trim(),
            residue_number: line.get(22..27)?,
        })
    }
}

/// Selenomethionine is the one HETATM residue kept as part of the chain.
fn is_modified_residue(line: &str) -> bool {
    line.starts_with("HETATM") && line.get(17..20) == Some("MSE")
}

fn three_to_one(residue: &str) -> char {
    match residue {
        "ALA" => 'A',
        "ARG" => 'R',
        "ASN" => 'N',
        "ASP" => 'D',
        "CYS" => 'C',
        "GLN" => 'Q',
        "GLU" => 'E',
        "GLY" => 'G',
        "HIS" => 'H',
        "ILE" => 'I',
        "LEU" => 'L',
        "LYS" => 'K',
        "MET" | "MSE" => 'M',
        "PHE" => 'F',
        "PRO" => 'P',
        "SER" => 'S',
        "THR" => 'T',
        "TRP" => 'W',
        "TYR" => 'Y',
        "VAL" => 'V',
        "SEC" => 'U',
        "PYL" => 'O',
        _ => 'X',
    }
}

fn read(path: &Utf8Path) -> Result<String, GemproError> {
    fs::read_to_string(path.as_std_path()).map_err(|err| GemproError::StructureParse {
        path: path.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
HEADER    TEST
ATOM      1  N   MET A   1      11.104   6.134  -6.504  1.00  0.00           N
ATOM      2  CA  MET A   1      11.639   6.071  -5.147  1.00  0.00           C
ATOM      3  N   LYS A   2      12.000   6.000  -4.000  1.00  0.00           N
ATOM      4  CA ALYS A   2      12.100   6.100  -4.100  0.50  0.00           C
ATOM      5  CA BLYS A   2      12.200   6.200  -4.200  0.50  0.00           C
HETATM    6  N   MSE A   3      13.000   7.000  -3.000  1.00  0.00           N
HETATM    7  O   HOH A 101      20.000  20.000  20.000  1.00  0.00           O
ATOM      8  N   GLY B   1      30.000  30.000  30.000  1.00  0.00           N
ATOM      9  N   TRP B   2      31.000  31.000  31.000  1.00  0.00           N
END
";

    #[test]
    fn extracts_chain_sequences() {
        let sequences = chain_sequences_from_str(SAMPLE);
        let chain_a: ChainId = "A".parse().unwrap();
        let chain_b: ChainId = "B".parse().unwrap();
        assert_eq!(sequences[&chain_a], "MKM");
        assert_eq!(sequences[&chain_b], "GW");
    }

    #[test]
    fn cleaning_keeps_one_chain_and_drops_waters() {
        let chain_a: ChainId = "A".parse().unwrap();
        let cleaned = clean_structure_str(SAMPLE, Some(&chain_a));
        assert!(!cleaned.contains("HOH"));
        assert!(!cleaned.contains("GLY B"));
        assert!(!cleaned.contains("BLYS"));
        assert!(cleaned.contains(" CA  LYS A   2"));
        assert!(cleaned.ends_with("TER\nEND\n"));
    }

    const MIXED_CASE_CHAINS: &str = "\
ATOM      1  N   MET A   1      11.104   6.134  -6.504  1.00  0.00           N
ATOM      2  N   LYS A   2      12.000   6.000  -4.000  1.00  0.00           N
ATOM      3  N   GLY a   1      30.000  30.000  30.000  1.00  0.00           N
ATOM      4  N   TRP a   2      31.000  31.000  31.000  1.00  0.00           N
END
";

    #[test]
    fn chains_differing_only_in_case_stay_apart() {
        let sequences = chain_sequences_from_str(MIXED_CASE_CHAINS);
        let upper: ChainId = "A".parse().unwrap();
        let lower: ChainId = "a".parse().unwrap();
        assert_eq!(sequences.len(), 2);
        assert_eq!(sequences[&upper], "MK");
        assert_eq!(sequences[&lower], "GW");

        let cleaned = clean_structure_str(MIXED_CASE_CHAINS, Some(&upper));
        assert_eq!(cleaned.lines().filter(|line| line.starts_with("ATOM")).count(), 2);
        assert!(!cleaned.contains("GLY a"));
    }

    #[test]
    fn non_ascii_columns_are_skipped() {
        let content = "\
ATOM      1  N  \u{e9}MET A   1      11.104   6.134  -6.504  1.00  0.00           N
ATOM      2  N   LYS A   2      12.000   6.000  -4.000  1.00  0.00           N
ATOM      3  N   GL\u{e9} A   3      12.000   6.000  -4.000  1.00  0.00           N
END
";
        let sequences = chain_sequences_from_str(content);
        let chain_a: ChainId = "A".parse().unwrap();
        assert_eq!(sequences[&chain_a], "K");

        let cleaned = clean_structure_str(content, Some(&chain_a));
        assert_eq!(cleaned.lines().filter(|line| line.starts_with("ATOM")).count(), 1);
    }

    #[test]
    fn writes_suffixed_file() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let source = dir.join("1abc.pdb");
        fs::write(source.as_std_path(), SAMPLE).unwrap();

        let chain_b: ChainId = "B".parse().unwrap();
        let written = write_clean_structure(&source, Some(&chain_b), &dir).unwrap();
        assert_eq!(written.file_name(), Some("1abc_B_clean.pdb"));
        assert_eq!(
            chain_sequence(&written, &chain_b).unwrap().as_deref(),
            Some("GW")
        );
    }
}
