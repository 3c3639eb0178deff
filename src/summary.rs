use crate::args::{Args, Duplicates, PipelineStep};
use crate::busco::BuscoScores;
use crate::core_genes::CoreGeneStats;
use crate::external_tools::ToolSet;
use crate::logger::Logger;
use crate::util::open_bufwrite;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One row of `busco_summary.tsv`.
pub struct BuscoSummaryRow<'a> {
    pub genome: &'a str,
    pub scores: Option<&'a BuscoScores>,
    pub included: bool,
}

pub fn write_busco_summary(path: &Path, rows: &[BuscoSummaryRow], logger: &Logger) -> Result<()> {
    let mut writer = open_bufwrite(path, logger, "write_busco_summary");
    writeln!(writer, "genome\tcomplete\tsingle\tduplicated\tfragmented\tmissing\tn\tincluded")?;
    for row in rows {
        let included = if row.included { "yes" } else { "no" };
        match row.scores {
            Some(s) => writeln!(
                writer,
                "{}\t{:.1}\t{:.1}\t{:.1}\t{:.1}\t{:.1}\t{}\t{}",
                row.genome, s.complete, s.single, s.duplicated, s.fragmented, s.missing, s.n, included
            )?,
            None => writeln!(writer, "{}\tNA\tNA\tNA\tNA\tNA\tNA\t{}", row.genome, included)?,
        }
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
pub struct RunParams {
    pub input_dir: String,
    pub steps: Vec<PipelineStep>,
    pub lineage: String,
    pub seq_type: String,
    pub min_occupancy: f64,
    pub duplicates: Duplicates,
    pub min_completeness: f64,
    pub trimal_mode: String,
    pub mafft_args: String,
    pub fasttree_gamma: bool,
    pub rrna_kingdom: String,
    pub keep_partial_rrna: bool,
    pub rrna_min_length: usize,
    pub rrna_cluster_id: f64,
    pub threads: usize,
}

impl RunParams {
    pub fn from_args(args: &Args) -> Self {
        RunParams {
            input_dir: args.input_dir.clone(),
            steps: args.steps.clone(),
            lineage: args.lineage.clone(),
            seq_type: args.seq_type.clone(),
            min_occupancy: args.min_occupancy,
            duplicates: args.duplicates,
            min_completeness: args.min_completeness,
            trimal_mode: args.trimal_mode.clone(),
            mafft_args: args.mafft_args.clone(),
            fasttree_gamma: args.fasttree_gamma,
            rrna_kingdom: args.rrna_kingdom.clone(),
            keep_partial_rrna: args.keep_partial_rrna,
            rrna_min_length: args.rrna_min_length,
            rrna_cluster_id: args.rrna_cluster_id,
            threads: args.threads,
        }
    }
}

#[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
#[serde(default)]
pub struct CoreSummary {
    pub genomes_total: usize,
    pub genomes_included: Vec<String>,
    pub genomes_excluded: Vec<String>,
    pub genes_examined: usize,
    pub core_genes: usize,
    pub dropped_multi_copy: usize,
    pub dropped_low_occupancy: usize,
    pub alignments: usize,
    pub supermatrix_columns: Option<usize>,
    pub tree: Option<PathBuf>,
}

impl CoreSummary {
    pub fn record_selection(&mut self, stats: &CoreGeneStats) {
        self.genes_examined = stats.examined;
        self.core_genes = stats.core;
        self.dropped_multi_copy = stats.dropped_multi_copy;
        self.dropped_low_occupancy = stats.dropped_low_occupancy;
    }
}

#[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
#[serde(default)]
pub struct RrnaSummary {
    pub genomes_with_16s: usize,
    pub copies: usize,
    pub clusters: Option<usize>,
    pub tree: Option<PathBuf>,
}

/// Written to `run_summary.json` at the end of every run.
#[derive(Serialize)]
pub struct RunSummary<'a> {
    pub version: &'static str,
    pub params: RunParams,
    pub tools: &'a ToolSet,
    pub core: CoreSummary,
    pub rrna: RrnaSummary,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PreviousSummary {
    core: CoreSummary,
    rrna: RrnaSummary,
}

/// The pathway sections of an existing `run_summary.json`, or defaults when
/// there is none yet.
pub fn read_previous_summary(path: &Path) -> Result<(CoreSummary, RrnaSummary)> {
    if !path.is_file() {
        return Ok((CoreSummary::default(), RrnaSummary::default()));
    }
    let text = fs::read_to_string(path).with_context(|| format!("read_previous_summary: failed to read {}", path.display()))?;
    let previous: PreviousSummary = serde_json::from_str(&text).with_context(|| format!("read_previous_summary: malformed {}", path.display()))?;
    Ok((previous.core, previous.rrna))
}

pub fn write_run_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json + "\n").with_context(|| format!("write_run_summary: failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_write_busco_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busco_summary.tsv");
        let s = BuscoScores { complete: 98.4, single: 97.6, duplicated: 0.8, fragmented: 0.8, missing: 0.8, n: 124 };
        let rows = vec![
            BuscoSummaryRow { genome: "gA", scores: Some(&s), included: true },
            BuscoSummaryRow { genome: "gB", scores: None, included: false },
        ];
        write_busco_summary(&path, &rows, &Logger).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "gA\t98.4\t97.6\t0.8\t0.8\t0.8\t124\tyes");
        assert_eq!(lines[2], "gB\tNA\tNA\tNA\tNA\tNA\tNA\tno");
    }

    #[test]
    fn test_write_run_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_summary.json");
        let args = Args::parse_from(["coretree", "-i", "genomes", "--steps", "core-genes,align", "--duplicates", "longest"]);
        let tools = ToolSet::default();
        let mut core = CoreSummary { genomes_total: 4, ..Default::default() };
        core.record_selection(&CoreGeneStats { examined: 124, core: 100, dropped_multi_copy: 10, dropped_low_occupancy: 14 });

        let summary = RunSummary { version: "0.1.0", params: RunParams::from_args(&args), tools: &tools, core, rrna: RrnaSummary::default() };
        write_run_summary(&path, &summary).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["params"]["steps"], serde_json::json!(["core-genes", "align"]));
        assert_eq!(value["params"]["duplicates"], "longest");
        assert_eq!(value["core"]["core_genes"], 100);
        assert!(value["tools"]["busco"].is_null());
        assert!(value["rrna"]["tree"].is_null());
    }

    #[test]
    fn test_resumed_run_keeps_previous_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_summary.json");
        assert_eq!(read_previous_summary(&path).unwrap(), (CoreSummary::default(), RrnaSummary::default()));

        let args = Args::parse_from(["coretree", "-i", "genomes"]);
        let tools = ToolSet::default();
        let mut core = CoreSummary { genomes_total: 5, alignments: 80, supermatrix_columns: Some(24000), ..Default::default() };
        core.record_selection(&CoreGeneStats { examined: 124, core: 80, dropped_multi_copy: 30, dropped_low_occupancy: 14 });
        let rrna = RrnaSummary { genomes_with_16s: 5, copies: 21, clusters: Some(4), tree: None };
        let summary = RunSummary { version: "0.1.0", params: RunParams::from_args(&args), tools: &tools, core, rrna };
        write_run_summary(&path, &summary).unwrap();

        // a later `--steps tree` run starts from these counts
        let (core, rrna) = read_previous_summary(&path).unwrap();
        assert_eq!(core.core_genes, 80);
        assert_eq!(core.supermatrix_columns, Some(24000));
        assert_eq!(rrna.clusters, Some(4));

        fs::write(&path, "{\"core\": {\"core_genes\": 7}}").unwrap();
        let (core, rrna) = read_previous_summary(&path).unwrap();
        assert_eq!(core.core_genes, 7);
        assert_eq!(rrna, RrnaSummary::default());

        fs::write(&path, "not json").unwrap();
        assert!(read_previous_summary(&path).is_err());
    }
}
