use clap::Parser;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

mod align;
mod args;
mod busco;
mod concat;
mod core_genes;
mod external_tools;
mod genomes;
mod jobs;
mod logger;
mod read_fasta;
mod read_gff;
mod rrna;
mod seq;
mod summary;
mod tree;
mod util;
mod vsearch;

use args::{Args, PipelineStep};
use external_tools::{require, ToolSet};
use genomes::Genome;
use logger::Logger;
use summary::{BuscoSummaryRow, CoreSummary, RrnaSummary, RunParams, RunSummary};
use util::{files_with_suffix, mkdir, non_empty, LogResultExt};

/// Output layout under `--output_dir`.
struct OutDirs {
    root: PathBuf,
    busco: PathBuf,
    core: PathBuf,
    alignments: PathBuf,
    trimmed: PathBuf,
    supermatrix: PathBuf,
    tree: PathBuf,
    barrnap: PathBuf,
    rrna_seqs: PathBuf,
    rrna_clusters: PathBuf,
    rrna_tree: PathBuf,
}

impl OutDirs {
    fn new(root: &Path) -> Self {
        let rrna = root.join("rrna");
        OutDirs {
            root: root.to_path_buf(),
            busco: root.join("step1_busco"),
            core: root.join("step2_core_genes"),
            alignments: root.join("step3_alignments"),
            trimmed: root.join("step4_trimmed"),
            supermatrix: root.join("step5_supermatrix"),
            tree: root.join("step6_tree"),
            barrnap: rrna.join("barrnap"),
            rrna_seqs: rrna.join("16S"),
            rrna_clusters: rrna.join("clusters"),
            rrna_tree: rrna.join("tree"),
        }
    }
}

const INCLUDED_GENOMES: &str = "included_genomes.txt";
const PER_GENOME_16S: &str = "16S_per_genome.fna";
const CENTROIDS_16S: &str = "16S_centroids.fna";

/// Stop with a clear message when a step's input from an earlier step is missing.
fn require_input(path: &Path, step: &str, producer: &str, logger: &Logger) {
    if !non_empty(path) {
        logger.error(&format!(
            "{}: expected input {} is missing or empty; run step {} first",
            step,
            path.display(),
            producer
        ));
        std::process::exit(1);
    }
}

fn run_busco(args: &Args, genomes: &[Genome], tools: &ToolSet, dirs: &OutDirs, logger: &Logger) {
    let busco = require(&tools.busco, "busco", logger);
    mkdir(&dirs.busco, logger, "busco");

    let concurrency = jobs::job_concurrency(args.threads, args.jobs, 4).min(genomes.len().max(1));
    let cpus_per_job = (args.threads / concurrency).max(1);
    logger.information(&format!("busco: {} genomes, {} at a time with {} CPUs each", genomes.len(), concurrency, cpus_per_job));

    let busco_jobs = busco::busco_jobs(genomes, args, &busco.path, &dirs.busco, cpus_per_job)
        .log_or_exit(logger, |e| format!("busco: {:#}", e));
    let report = jobs::run_jobs(&busco_jobs, concurrency, logger).log_or_exit(logger, |e| format!("busco: {}", e));

    // a genome BUSCO cannot handle is excluded later, not fatal here
    for (label, err) in &report.failed {
        logger.warning(&format!("busco: {} failed and will be excluded from the core-gene tree: {}", label, err));
    }
    if report.completed.is_empty() && report.skipped.is_empty() {
        logger.error("busco: every BUSCO run failed");
        std::process::exit(1);
    }
}

fn run_core_genes(args: &Args, genomes: &[Genome], dirs: &OutDirs, core_summary: &mut CoreSummary, logger: &Logger) {
    require_input(&dirs.busco, "core-genes", "busco", logger);
    mkdir(&dirs.core, logger, "core-genes");

    let mut calls = core_genes::GenomeGenes::new();
    let mut run_dirs: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut scores: BTreeMap<String, busco::BuscoScores> = BTreeMap::new();
    let mut with_results: Vec<String> = Vec::new();
    let mut without_results: Vec<String> = Vec::new();

    for genome in genomes {
        let run_dir = match busco::find_run_dir(&dirs.busco, &genome.name, &args.lineage) {
            Ok(d) => d,
            Err(e) => {
                logger.warning(&format!("core-genes: excluding {}: {}", genome.name, e));
                without_results.push(genome.name.clone());
                continue;
            }
        };
        let table = run_dir.join("full_table.tsv");
        let records = match busco::parse_full_table(&table) {
            Ok(r) => r,
            Err(e) => {
                logger.warning(&format!("core-genes: excluding {}: {:#}", genome.name, e));
                without_results.push(genome.name.clone());
                continue;
            }
        };
        match busco::read_short_summary(&run_dir) {
            Ok(s) => {
                scores.insert(genome.name.clone(), s);
            }
            Err(e) => logger.warning(&format!("core-genes: no BUSCO scores for {}: {:#}", genome.name, e)),
        }
        calls.insert(genome.name.clone(), core_genes::calls_from_records(&records));
        run_dirs.insert(genome.name.clone(), run_dir);
        with_results.push(genome.name.clone());
    }

    let (included, mut excluded) = core_genes::filter_genomes_by_completeness(&with_results, &scores, args.min_completeness);
    for g in &excluded {
        logger.warning(&format!(
            "core-genes: excluding {} (BUSCO completeness {:.1}% < {:.1}%)",
            g,
            scores.get(g).map(|s| s.complete).unwrap_or(0.0),
            args.min_completeness
        ));
    }

    let rows: Vec<BuscoSummaryRow> = genomes
        .iter()
        .map(|g| BuscoSummaryRow { genome: &g.name, scores: scores.get(&g.name), included: included.contains(&g.name) })
        .collect();
    summary::write_busco_summary(&dirs.core.join("busco_summary.tsv"), &rows, logger)
        .log_or_exit(logger, |e| format!("core-genes: {}", e));

    excluded.extend(without_results);
    core_summary.genomes_included = included.clone();
    core_summary.genomes_excluded = excluded;

    if included.len() < tree::MIN_TAXA {
        logger.error(&format!(
            "core-genes: only {} genomes passed BUSCO filtering, at least {} are needed for a tree",
            included.len(),
            tree::MIN_TAXA
        ));
        std::process::exit(1);
    }

    let (core, stats) = core_genes::select_core_genes(&calls, &included, args.min_occupancy, args.duplicates);
    logger.information(&format!(
        "core-genes: {} genes examined, {} core, {} dropped as multi-copy, {} below occupancy {}",
        stats.examined, stats.core, stats.dropped_multi_copy, stats.dropped_low_occupancy, args.min_occupancy
    ));
    core_summary.record_selection(&stats);

    if core.is_empty() {
        logger.error("core-genes: no core genes found. Lower --min_occupancy or use --duplicates longest.");
        std::process::exit(1);
    }

    core_genes::write_core_gene_fastas(&core, &calls, &run_dirs, &included, args.duplicates, args.seq_ext(), &dirs.core, logger)
        .log_or_exit(logger, |e| format!("core-genes: {:#}", e));

    fs::write(dirs.core.join(INCLUDED_GENOMES), included.join("\n") + "\n")
        .log_or_exit(logger, |e| format!("core-genes: failed to write {}: {}", INCLUDED_GENOMES, e));
    fs::write(dirs.core.join("core_genes.txt"), core.join("\n") + "\n")
        .log_or_exit(logger, |e| format!("core-genes: failed to write core_genes.txt: {}", e));
}

fn run_align(args: &Args, tools: &ToolSet, dirs: &OutDirs, logger: &Logger) {
    let mafft = require(&tools.mafft, "mafft", logger);
    require_input(&dirs.core, "align", "core-genes", logger);
    mkdir(&dirs.alignments, logger, "align");

    let ext = args.seq_ext();
    let mafft_jobs = align::mafft_jobs(&dirs.core, &dirs.alignments, ext, &mafft.path, &args.mafft_args, logger)
        .log_or_exit(logger, |e| format!("align: {:#}", e));

    let concurrency = jobs::job_concurrency(args.threads, args.jobs, 1);
    jobs::run_jobs(&mafft_jobs, concurrency, logger)
        .and_then(|report| report.ensure_success("align"))
        .log_or_exit(logger, |e| format!("{:#}", e));

    align::check_alignment_dir(&dirs.alignments, &format!(".aln.{}", ext), logger)
        .log_or_exit(logger, |e| format!("align: {:#}", e));
}

fn run_trim(args: &Args, tools: &ToolSet, dirs: &OutDirs, logger: &Logger) {
    let trimal = require(&tools.trimal, "trimal", logger);
    require_input(&dirs.alignments, "trim", "align", logger);
    mkdir(&dirs.trimmed, logger, "trim");

    let trimal_jobs = align::trimal_jobs(&dirs.alignments, &dirs.trimmed, args.seq_ext(), &trimal.path, &args.trimal_mode)
        .log_or_exit(logger, |e| format!("trim: {:#}", e));

    let concurrency = jobs::job_concurrency(args.threads, args.jobs, 1);
    jobs::run_jobs(&trimal_jobs, concurrency, logger)
        .and_then(|report| report.ensure_success("trim"))
        .log_or_exit(logger, |e| format!("{:#}", e));
}

fn read_included_genomes(dirs: &OutDirs, logger: &Logger) -> Vec<String> {
    let path = dirs.core.join(INCLUDED_GENOMES);
    require_input(&path, "concatenate", "core-genes", logger);
    let text = fs::read_to_string(&path).log_or_exit(logger, |e| format!("concatenate: failed to read {}: {}", path.display(), e));
    text.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect()
}

fn supermatrix_path(args: &Args, dirs: &OutDirs) -> PathBuf {
    dirs.supermatrix.join(format!("core_genes.{}", args.seq_ext()))
}

fn run_concatenate(args: &Args, dirs: &OutDirs, core_summary: &mut CoreSummary, logger: &Logger) {
    require_input(&dirs.trimmed, "concatenate", "trim", logger);
    mkdir(&dirs.supermatrix, logger, "concatenate");

    let genomes = read_included_genomes(dirs, logger);
    let suffix = format!(".trim.{}", args.seq_ext());
    let files = files_with_suffix(&dirs.trimmed, &suffix)
        .log_or_exit(logger, |e| format!("concatenate: failed to read {}: {}", dirs.trimmed.display(), e));

    let matrix = concat::concatenate_alignments(&files, &suffix, &genomes, logger)
        .log_or_exit(logger, |e| format!("{:#}", e));

    concat::write_supermatrix(&matrix, &supermatrix_path(args, dirs))
        .and_then(|_| concat::write_partitions(&matrix, args.is_nucleotide(), &dirs.supermatrix.join("partitions.txt"), logger))
        .and_then(|_| concat::write_occupancy(&matrix, &dirs.supermatrix.join("occupancy.tsv"), logger))
        .log_or_exit(logger, |e| format!("concatenate: {:#}", e));

    core_summary.alignments = matrix.partitions.len();
    core_summary.supermatrix_columns = Some(matrix.length());
}

fn run_tree(args: &Args, tools: &ToolSet, dirs: &OutDirs, core_summary: &mut CoreSummary, logger: &Logger) {
    let fasttree = require(&tools.fasttree, "FastTree", logger);
    let alignment = supermatrix_path(args, dirs);
    require_input(&alignment, "tree", "concatenate", logger);
    mkdir(&dirs.tree, logger, "tree");

    let tree_path = dirs.tree.join("core_genes.tree");
    core_summary.tree = tree::run_fasttree(&fasttree.path, &alignment, &tree_path, args.is_nucleotide(), args.fasttree_gamma, logger)
        .log_or_exit(logger, |e| format!("tree: {:#}", e));
}

fn run_rrna_extract(args: &Args, genomes: &[Genome], tools: &ToolSet, dirs: &OutDirs, rrna_summary: &mut RrnaSummary, logger: &Logger) {
    let barrnap = require(&tools.barrnap, "barrnap", logger);
    mkdir(&dirs.barrnap, logger, "rrna-extract");
    mkdir(&dirs.rrna_seqs, logger, "rrna-extract");

    let barrnap_jobs = rrna::barrnap_jobs(genomes, &barrnap.path, &args.rrna_kingdom, &dirs.barrnap);
    let concurrency = jobs::job_concurrency(args.threads, args.jobs, 1);
    let report = jobs::run_jobs(&barrnap_jobs, concurrency, logger).log_or_exit(logger, |e| format!("rrna-extract: {}", e));
    for (label, err) in &report.failed {
        logger.warning(&format!("rrna-extract: barrnap failed for {}, no 16S for this genome: {}", label, err));
    }

    let annotated: Vec<Genome> = genomes
        .iter()
        .filter(|g| rrna::barrnap_gff_path(&dirs.barrnap, &g.name).is_file())
        .cloned()
        .collect();

    let extraction = rrna::rrna_extract(&annotated, &dirs.barrnap, args.keep_partial_rrna, args.rrna_min_length, logger)
        .log_or_exit(logger, |e| format!("rrna-extract: {:#}", e));

    read_fasta::write_fasta_file(&dirs.rrna_seqs.join("all_16S_copies.fna"), &extraction.all_copies, 60)
        .and_then(|_| read_fasta::write_fasta_file(&dirs.rrna_seqs.join(PER_GENOME_16S), &extraction.representatives, 60))
        .and_then(|_| rrna::write_rrna_summary(&dirs.rrna_seqs.join("16S_summary.tsv"), &extraction.counts, logger))
        .log_or_exit(logger, |e| format!("rrna-extract: {:#}", e));

    rrna_summary.genomes_with_16s = extraction.representatives.len();
    rrna_summary.copies = extraction.all_copies.len();

    if extraction.representatives.is_empty() {
        logger.warning("rrna-extract: no 16S sequences were extracted from any genome");
    }
}

fn run_rrna_cluster(args: &Args, tools: &ToolSet, dirs: &OutDirs, rrna_summary: &mut RrnaSummary, logger: &Logger) {
    let vsearch = require(&tools.vsearch, "vsearch", logger);
    let input = dirs.rrna_seqs.join(PER_GENOME_16S);
    require_input(&input, "rrna-cluster", "rrna-extract", logger);
    mkdir(&dirs.rrna_clusters, logger, "rrna-cluster");

    let centroids = dirs.rrna_clusters.join(CENTROIDS_16S);
    let uc = dirs.rrna_clusters.join("16S_clusters.uc");
    let job = vsearch::vsearch_job(&vsearch.path, &input, &centroids, &uc, args.rrna_cluster_id, args.threads);
    jobs::run_jobs(std::slice::from_ref(&job), 1, logger)
        .and_then(|report| report.ensure_success("rrna-cluster"))
        .log_or_exit(logger, |e| format!("{:#}", e));

    let clusters = vsearch::read_uc(&uc).log_or_exit(logger, |e| format!("rrna-cluster: {:#}", e));
    vsearch::write_cluster_table(&dirs.rrna_clusters.join("16S_clusters.tsv"), &clusters, logger)
        .log_or_exit(logger, |e| format!("rrna-cluster: {:#}", e));

    let shared = clusters.iter().filter(|c| c.members.len() > 1).count();
    logger.information(&format!(
        "rrna-cluster: {} clusters, {} shared by more than one genome",
        clusters.len(),
        shared
    ));
    rrna_summary.clusters = Some(clusters.len());
}

fn run_rrna_tree(args: &Args, tools: &ToolSet, dirs: &OutDirs, rrna_summary: &mut RrnaSummary, logger: &Logger) {
    let mafft = require(&tools.mafft, "mafft", logger);
    let fasttree = require(&tools.fasttree, "FastTree", logger);

    // centroids when clustering ran, otherwise one sequence per genome
    let centroids = dirs.rrna_clusters.join(CENTROIDS_16S);
    let input = if non_empty(&centroids) { centroids } else { dirs.rrna_seqs.join(PER_GENOME_16S) };
    require_input(&input, "rrna-tree", "rrna-extract", logger);
    mkdir(&dirs.rrna_tree, logger, "rrna-tree");

    let n_seqs = read_fasta::read_fasta(&input).log_or_exit(logger, |e| format!("rrna-tree: {:#}", e)).len();
    if n_seqs < tree::MIN_TAXA {
        logger.warning(&format!(
            "rrna-tree: {} distinct 16S sequences, at least {} are needed for a tree. Skipping 16S tree.",
            n_seqs,
            tree::MIN_TAXA
        ));
        return;
    }

    let aln = dirs.rrna_tree.join("16S.aln.fna");
    let extra: Vec<&str> = args.mafft_args.split_whitespace().collect();
    let job = align::mafft_job("mafft_16S", &mafft.path, &extra, args.threads, &input, &aln);
    jobs::run_jobs(std::slice::from_ref(&job), 1, logger)
        .and_then(|report| report.ensure_success("rrna-tree"))
        .log_or_exit(logger, |e| format!("{:#}", e));

    let tree_path = dirs.rrna_tree.join("16S.tree");
    rrna_summary.tree = tree::run_fasttree(&fasttree.path, &aln, &tree_path, true, args.fasttree_gamma, logger)
        .log_or_exit(logger, |e| format!("rrna-tree: {:#}", e));
}

fn main() -> Result<(), Box<dyn std::error::Error>> {

    let args = Args::parse();
    let logger = Logger;

    // Validate steps and ranges
    args::validate_step_sequence(&args.steps, &logger);
    args::validate_args(&args, &logger);

    let dirs = OutDirs::new(Path::new(&args.output_dir));
    mkdir(&dirs.root, &logger, "main");

    let genomes = genomes::discover_genomes(Path::new(&args.input_dir)).log_or_exit(&logger, |e| format!("main: {}", e));
    logger.information(&format!("main: {} genomes in {}", genomes.len(), args.input_dir));

    // Only the tools the selected steps call
    let tools = external_tools::resolve_tools(&args, &logger);

    // counts from steps this run does not repeat come from the previous summary
    let summary_path = dirs.root.join("run_summary.json");
    let (mut core_summary, mut rrna_summary) = summary::read_previous_summary(&summary_path).unwrap_or_else(|e| {
        logger.warning(&format!("main: ignoring unreadable {}: {:#}", summary_path.display(), e));
        (CoreSummary::default(), RrnaSummary::default())
    });
    core_summary.genomes_total = genomes.len();

    let steps: [(PipelineStep, &str); 9] = [
        (PipelineStep::Busco, "Running Step 1: busco"),
        (PipelineStep::CoreGenes, "Running Step 2: core-genes"),
        (PipelineStep::Align, "Running Step 3: align"),
        (PipelineStep::Trim, "Running Step 4: trim"),
        (PipelineStep::Concatenate, "Running Step 5: concatenate"),
        (PipelineStep::Tree, "Running Step 6: tree"),
        (PipelineStep::RrnaExtract, "Running 16S Step 1: rrna-extract"),
        (PipelineStep::RrnaCluster, "Running 16S Step 2: rrna-cluster"),
        (PipelineStep::RrnaTree, "Running 16S Step 3: rrna-tree"),
    ];

    for (step, title) in steps {
        if !args.runs(step) {
            continue;
        }
        logger.section(title);
        match step {
            PipelineStep::Busco => run_busco(&args, &genomes, &tools, &dirs, &logger),
            PipelineStep::CoreGenes => run_core_genes(&args, &genomes, &dirs, &mut core_summary, &logger),
            PipelineStep::Align => run_align(&args, &tools, &dirs, &logger),
            PipelineStep::Trim => run_trim(&args, &tools, &dirs, &logger),
            PipelineStep::Concatenate => run_concatenate(&args, &dirs, &mut core_summary, &logger),
            PipelineStep::Tree => run_tree(&args, &tools, &dirs, &mut core_summary, &logger),
            PipelineStep::RrnaExtract => run_rrna_extract(&args, &genomes, &tools, &dirs, &mut rrna_summary, &logger),
            PipelineStep::RrnaCluster => run_rrna_cluster(&args, &tools, &dirs, &mut rrna_summary, &logger),
            PipelineStep::RrnaTree => run_rrna_tree(&args, &tools, &dirs, &mut rrna_summary, &logger),
        }
    }

    let run_summary = RunSummary {
        version: env!("CARGO_PKG_VERSION"),
        params: RunParams::from_args(&args),
        tools: &tools,
        core: core_summary,
        rrna: rrna_summary,
    };
    summary::write_run_summary(&summary_path, &run_summary)?;
    logger.information(&format!("main: run summary written to {}", summary_path.display()));

    if let Some(t) = &run_summary.core.tree {
        logger.information(&format!("main: core-gene tree: {}", t.display()));
    }
    if let Some(t) = &run_summary.rrna.tree {
        logger.information(&format!("main: 16S tree: {}", t.display()));
    }
    logger.information("coretree: All requested steps completed.");
    Ok(())
}
