use crate::args::Duplicates;
use crate::busco::{self, BuscoRecord, BuscoScores, BuscoStatus};
use crate::logger::Logger;
use crate::read_fasta::{self, Fasta};
use crate::util::non_empty;

use anyhow::{bail, Context, Result};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// How BUSCO called one gene in one genome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneCall {
    SingleCopy,
    MultiCopy(usize),
    Fragmented,
    Missing,
}

/// genome -> busco id -> call
pub type GenomeGenes = BTreeMap<String, BTreeMap<String, GeneCall>>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CoreGeneStats {
    pub examined: usize,
    pub core: usize,
    pub dropped_multi_copy: usize,
    pub dropped_low_occupancy: usize,
}

/// Collapse full_table rows into one call per gene. Duplicated rows are counted.
pub fn calls_from_records(records: &[BuscoRecord]) -> BTreeMap<String, GeneCall> {
    let mut calls: BTreeMap<String, GeneCall> = BTreeMap::new();
    for rec in records {
        let entry = calls.entry(rec.busco_id.clone()).or_insert(GeneCall::Missing);
        *entry = match (rec.status, *entry) {
            (BuscoStatus::Duplicated, GeneCall::MultiCopy(n)) => GeneCall::MultiCopy(n + 1),
            (BuscoStatus::Duplicated, _) => GeneCall::MultiCopy(1),
            (_, GeneCall::MultiCopy(n)) => GeneCall::MultiCopy(n),
            (BuscoStatus::Complete, _) => GeneCall::SingleCopy,
            (BuscoStatus::Fragmented, GeneCall::SingleCopy) => GeneCall::SingleCopy,
            (BuscoStatus::Fragmented, _) => GeneCall::Fragmented,
            (BuscoStatus::Missing, current) => current,
        };
    }
    calls
}

fn is_present(call: Option<&GeneCall>, duplicates: Duplicates) -> bool {
    match call {
        Some(GeneCall::SingleCopy) => true,
        Some(GeneCall::MultiCopy(_)) => duplicates == Duplicates::Longest,
        _ => false,
    }
}

/// Genes carried by at least `min_occupancy` of the `included` genomes.
/// With `Duplicates::Skip` a gene duplicated in any included genome is dropped.
pub fn select_core_genes(
    calls: &GenomeGenes,
    included: &[String],
    min_occupancy: f64,
    duplicates: Duplicates,
) -> (Vec<String>, CoreGeneStats) {
    let mut stats = CoreGeneStats::default();
    if included.is_empty() {
        return (Vec::new(), stats);
    }

    let mut universe: Vec<&String> = included
        .iter()
        .filter_map(|g| calls.get(g))
        .flat_map(|genes| genes.keys())
        .collect();
    universe.sort();
    universe.dedup();

    let mut core = Vec::new();
    for gene in universe {
        stats.examined += 1;
        let per_genome: Vec<Option<&GeneCall>> = included.iter().map(|g| calls.get(g).and_then(|m| m.get(gene))).collect();

        let multi_copy = per_genome.iter().any(|c| matches!(c, Some(GeneCall::MultiCopy(_))));
        if multi_copy && duplicates == Duplicates::Skip {
            stats.dropped_multi_copy += 1;
            continue;
        }

        let present = per_genome.iter().filter(|c| is_present(**c, duplicates)).count();
        let occupancy = present as f64 / included.len() as f64;
        if occupancy + 1e-9 < min_occupancy {
            stats.dropped_low_occupancy += 1;
            continue;
        }
        core.push(gene.clone());
    }
    stats.core = core.len();
    (core, stats)
}

/// Split genomes by BUSCO completeness. Genomes without scores are included.
pub fn filter_genomes_by_completeness(
    genomes: &[String],
    scores: &BTreeMap<String, BuscoScores>,
    min_completeness: f64,
) -> (Vec<String>, Vec<String>) {
    genomes.iter().cloned().partition(|g| scores.get(g).map(|s| s.complete >= min_completeness).unwrap_or(true))
}

fn clean_sequence(seq: &str) -> String {
    let upper = seq.to_ascii_uppercase();
    upper.trim_end_matches('*').to_string()
}

/// The sequence BUSCO reported for `gene` in one genome, with its header
/// rewritten to the genome name. Multi-copy genes keep the longest copy.
pub fn gene_sequence(genome: &str, gene: &str, call: GeneCall, run_dir: &Path, ext: &str) -> Result<Fasta> {
    let path = match call {
        GeneCall::SingleCopy => busco::single_copy_path(run_dir, gene, ext),
        GeneCall::MultiCopy(_) => busco::multi_copy_path(run_dir, gene, ext),
        other => bail!("gene {} is {:?} in genome {}", gene, other, genome),
    };
    if !path.is_file() {
        bail!("no sequence file for gene {} in genome {}: {} is missing", gene, genome, path.display());
    }
    let records = read_fasta::read_fasta(&path)?;
    let best = read_fasta::longest(&records)
        .with_context(|| format!("{} has no sequences (genome {}, gene {})", path.display(), genome, gene))?;

    let mut renamed = read_fasta::rename_record(best, genome);
    renamed.seq = clean_sequence(&renamed.seq);
    Ok(renamed)
}

/// Write `<gene>.<ext>` for every core gene, one record per genome carrying it.
pub fn write_core_gene_fastas(
    core: &[String],
    calls: &GenomeGenes,
    run_dirs: &BTreeMap<String, PathBuf>,
    included: &[String],
    duplicates: Duplicates,
    ext: &str,
    out_dir: &Path,
    logger: &Logger,
) -> Result<usize> {
    let mut written = 0usize;
    let mut kept = 0usize;

    for gene in core {
        let out_path = out_dir.join(format!("{}.{}", gene, ext));
        if non_empty(&out_path) {
            kept += 1;
            continue;
        }

        let mut records = Vec::new();
        for genome in included {
            let call = calls.get(genome).and_then(|m| m.get(gene)).copied();
            if !is_present(call.as_ref(), duplicates) {
                continue;
            }
            let Some(call) = call else { continue };
            let run_dir = run_dirs
                .get(genome)
                .with_context(|| format!("no BUSCO run directory recorded for genome {}", genome))?;
            records.push(gene_sequence(genome, gene, call, run_dir, ext)?);
        }

        read_fasta::write_fasta_file(&out_path, &records, 60)?;
        written += 1;
    }

    logger.information(&format!(
        "write_core_gene_fastas: wrote {} gene files, kept {} existing, in {}",
        written,
        kept,
        out_dir.display()
    ));
    Ok(written + kept)
}
