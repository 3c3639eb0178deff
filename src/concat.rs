use crate::align::check_alignment;
use crate::logger::Logger;
use crate::read_fasta::{self, Fasta};
use crate::seq::ungapped_len;
use crate::util::{name_without_suffix, open_bufwrite};

use anyhow::{bail, Context, Result};

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One gene's block of columns, 1-based inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub gene: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Default)]
pub struct Supermatrix {
    /// genome -> concatenated row, in genome order
    pub rows: BTreeMap<String, String>,
    pub partitions: Vec<Partition>,
    /// genome -> number of genes actually present (not gap-filled)
    pub genes_present: BTreeMap<String, usize>,
    pub skipped_empty: Vec<String>,
}

impl Supermatrix {
    pub fn length(&self) -> usize {
        self.partitions.last().map(|p| p.end).unwrap_or(0)
    }
}

/// Concatenate trimmed alignments into one row per genome. Genomes missing
/// from a gene are filled with gaps; empty alignments are skipped.
pub fn concatenate_alignments(files: &[PathBuf], suffix: &str, genomes: &[String], logger: &Logger) -> Result<Supermatrix> {
    if genomes.is_empty() {
        bail!("concatenate_alignments: no genomes to concatenate");
    }

    let mut files: Vec<&PathBuf> = files.iter().collect();
    files.sort();

    let mut matrix = Supermatrix::default();
    for g in genomes {
        matrix.rows.insert(g.clone(), String::new());
        matrix.genes_present.insert(g.clone(), 0);
    }

    for aln in files {
        let gene = name_without_suffix(aln, suffix).unwrap_or_else(|| aln.display().to_string());
        let records = read_fasta::read_fasta(aln)?;

        let len = if records.is_empty() { 0 } else { check_alignment(&records).with_context(|| format!("in {}", aln.display()))? };
        if len == 0 {
            logger.warning(&format!("concatenate_alignments: {} is empty after trimming, skipping", aln.display()));
            matrix.skipped_empty.push(gene);
            continue;
        }

        // genome -> aligned sequence for this single gene
        let mut this_alignment: HashMap<&str, &Fasta> = HashMap::new();
        for rec in &records {
            if !matrix.rows.contains_key(&rec.id) {
                bail!("genome '{}' in {} is not among the included genomes", rec.id, aln.display());
            }
            if this_alignment.insert(rec.id.as_str(), rec).is_some() {
                bail!("genome '{}' appears more than once in {}", rec.id, aln.display());
            }
        }

        let start = matrix.length() + 1;
        for (genome, row) in matrix.rows.iter_mut() {
            match this_alignment.get(genome.as_str()) {
                Some(rec) => {
                    row.push_str(&rec.seq);
                    if let Some(n) = matrix.genes_present.get_mut(genome) {
                        *n += 1;
                    }
                }
                None => row.push_str(&"-".repeat(len)),
            }
        }
        matrix.partitions.push(Partition { gene, start, end: start + len - 1 });
    }

    if matrix.partitions.is_empty() {
        bail!("concatenate_alignments: every alignment was empty, nothing to concatenate");
    }
    logger.information(&format!(
        "concatenate_alignments: {} genes, {} columns, {} genomes ({} empty alignments skipped)",
        matrix.partitions.len(),
        matrix.length(),
        matrix.rows.len(),
        matrix.skipped_empty.len()
    ));
    Ok(matrix)
}

pub fn write_supermatrix(matrix: &Supermatrix, output_path: &Path) -> Result<()> {
    let records: Vec<Fasta> = matrix
        .rows
        .iter()
        .map(|(genome, row)| Fasta { id: genome.clone(), desc: String::new(), seq: row.clone() })
        .collect();
    read_fasta::write_fasta_file(output_path, &records, 60)
}

/// RAxML-style partition file: `LG, gene = 1-250`.
pub fn write_partitions(matrix: &Supermatrix, nucleotide: bool, output_path: &Path, logger: &Logger) -> Result<()> {
    let model = if nucleotide { "DNA" } else { "LG" };
    let mut writer = open_bufwrite(output_path, logger, "write_partitions");
    for p in &matrix.partitions {
        writeln!(writer, "{}, {} = {}-{}", model, p.gene, p.start, p.end)?;
    }
    writer.flush()?;
    Ok(())
}

/// genome, genes present, residues, percent gaps
pub fn write_occupancy(matrix: &Supermatrix, output_path: &Path, logger: &Logger) -> Result<()> {
    let mut writer = open_bufwrite(output_path, logger, "write_occupancy");
    writeln!(writer, "genome\tgenes_present\tgenes_total\tresidues\tpercent_gaps")?;
    let total = matrix.partitions.len();
    for (genome, row) in &matrix.rows {
        let residues = ungapped_len(row);
        let gaps = if row.is_empty() { 0.0 } else { 100.0 * (row.len() - residues) as f64 / row.len() as f64 };
        let present = matrix.genes_present.get(genome).copied().unwrap_or(0);
        writeln!(writer, "{}\t{}\t{}\t{}\t{:.2}", genome, present, total, residues, gaps)?;
    }
    writer.flush()?;
    Ok(())
}
