use std::fs;

use camino::Utf8Path;

use crate::error::GemproError;

const LINE_WIDTH: usize = 60;

/// Residues of the first record, whitespace removed.
pub fn first_sequence(text: &str) -> String {
    let mut sequence = String::new();
    let mut seen_header = false;
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('>') {
            if seen_header {
                break;
            }
            seen_header = true;
            continue;
        }
        sequence.extend(line.chars().filter(|ch| !ch.is_whitespace() && *ch != '*'));
    }
    sequence
}

pub fn format_record(ident: &str, sequence: &str) -> String {
    let mut out = format!(">{ident}\n");
    let residues: Vec<char> = sequence.chars().collect();
    for chunk in residues.chunks(LINE_WIDTH) {
        out.extend(chunk);
        out.push('\n');
    }
    out
}

pub fn read_sequence(path: &Utf8Path) -> Result<String, GemproError> {
    let text = fs::read_to_string(path.as_std_path())
        .map_err(|err| GemproError::Filesystem(format!("read {path}: {err}")))?;
    Ok(first_sequence(&text))
}
