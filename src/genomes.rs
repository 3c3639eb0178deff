use anyhow::{bail, Context, Result};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One input assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct Genome {
    pub name: String,
    pub path: PathBuf,
}

const FASTA_EXTENSIONS: [&str; 5] = ["fa", "fasta", "fna", "fas", "fsa"];

/// Genome names end up as FASTA headers and Newick labels, so only
/// `[A-Za-z0-9_.-]` is kept.
pub fn sanitize_name(stem: &str) -> String {
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// Split "GCF_000005845.2.fna" into ("GCF_000005845.2", "fna").
fn split_fasta_name(file_name: &str) -> Option<(&str, &str)> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    let ext_lower = ext.to_ascii_lowercase();
    if ext_lower == "gz" {
        let (inner_stem, inner_ext) = stem.rsplit_once('.')?;
        if FASTA_EXTENSIONS.contains(&inner_ext.to_ascii_lowercase().as_str()) {
            return Some((inner_stem, ext));
        }
        return None;
    }
    if FASTA_EXTENSIONS.contains(&ext_lower.as_str()) {
        Some((stem, ext))
    } else {
        None
    }
}

/// List the genome FASTA files in `input_dir`, sorted by name.
pub fn discover_genomes(input_dir: &Path) -> Result<Vec<Genome>> {
    if !input_dir.is_dir() {
        bail!("input directory {} does not exist or is not a directory", input_dir.display());
    }

    let mut genomes: Vec<Genome> = Vec::new();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    for entry in fs::read_dir(input_dir).with_context(|| format!("failed to read {}", input_dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else { continue };
        if file_name.starts_with('.') {
            continue;
        }
        let Some((stem, ext)) = split_fasta_name(file_name) else { continue };

        if ext.eq_ignore_ascii_case("gz") {
            bail!("{} is gzipped; decompress genome files before running (the external tools need plain FASTA)", path.display());
        }

        let name = sanitize_name(stem);
        if let Some(previous) = seen.get(&name) {
            bail!("genome name '{}' is used by both {} and {}", name, previous.display(), path.display());
        }
        seen.insert(name.clone(), path.clone());
        genomes.push(Genome { name, path });
    }

    if genomes.is_empty() {
        bail!("no genome FASTA files (.{}) found in {}", FASTA_EXTENSIONS.join(", ."), input_dir.display());
    }

    genomes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(genomes)
}
