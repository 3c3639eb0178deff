use crate::Logger;

use clap::{Parser, ValueEnum};
use serde::Serialize;

// setting up the command line parameters
#[derive(Parser, Debug, Clone)]
#[command(name = "coretree")]
#[command(version)]
#[command(about = "Core-gene (BUSCO) and 16S rRNA phylogenies for bacterial genome assemblies.", long_about = None)]
pub struct Args {

    /// Directory of genome assemblies (.fa, .fasta, .fna, .fas, .fsa). Genome names are taken from file names.
    #[arg(short = 'i', long = "input_dir")]
    pub input_dir: String,

    /// Output directory
    #[arg(short = 'o', long = "output_dir", default_value = "coretree_output")]
    pub output_dir: String,

    /// Pipeline steps to run (comma separated), in order.
    /// Example:
    ///   --steps busco,core-genes,align,trim,concatenate,tree
    #[arg(
        short = 's',
        long = "steps",
        value_enum,
        value_delimiter = ',',
        default_values = [
            "busco",
            "core-genes",
            "align",
            "trim",
            "concatenate",
            "tree",
            "rrna-extract",
            "rrna-cluster",
            "rrna-tree"
        ]
    )]
    pub steps: Vec<PipelineStep>,

    /// BUSCO lineage dataset
    #[arg(short = 'l', long = "lineage", default_value = "bacteria_odb10")]
    pub lineage: String,

    /// BUSCO mode
    #[arg(long = "busco_mode", default_value = "genome", value_parser = ["genome", "proteins", "transcriptome"])]
    pub busco_mode: String,

    /// Run BUSCO with --offline
    #[arg(long = "offline")]
    pub offline: bool,

    /// BUSCO --download_path (lineage datasets)
    #[arg(long = "busco_download_path")]
    pub busco_download_path: Option<String>,

    /// Total number of threads
    #[arg(short = 't', long = "threads", default_value_t = 8)]
    pub threads: usize,

    /// Concurrent external jobs (0 = derive from --threads)
    #[arg(short = 'j', long = "jobs", default_value_t = 0)]
    pub jobs: usize,

    /// Sequence type of the core genes: "pep" (protein) or "cds" (nucleotide)
    #[arg(long = "seq_type", default_value = "pep", value_parser = ["pep", "cds"])]
    pub seq_type: String,

    /// Fraction of included genomes that must carry a gene for it to be core
    #[arg(long = "min_occupancy", default_value_t = 1.0)]
    pub min_occupancy: f64,

    /// Handling of duplicated (multi-copy) BUSCO genes
    #[arg(long = "duplicates", value_enum, default_value = "skip")]
    pub duplicates: Duplicates,

    /// Exclude genomes whose BUSCO completeness (%) is below this value
    #[arg(long = "min_completeness", default_value_t = 0.0)]
    pub min_completeness: f64,

    /// trimAl heuristic (automated1, gappyout, strict, strictplus)
    #[arg(long = "trimal_mode", default_value = "automated1", value_parser = ["automated1", "gappyout", "strict", "strictplus", "nogaps"])]
    pub trimal_mode: String,

    /// Extra MAFFT arguments (whitespace separated)
    #[arg(long = "mafft_args", default_value = "--auto", allow_hyphen_values = true)]
    pub mafft_args: String,

    /// Use the Gamma20 likelihood in FastTree
    #[arg(long = "fasttree_gamma")]
    pub fasttree_gamma: bool,

    /// barrnap kingdom
    #[arg(long = "rrna_kingdom", default_value = "bac", value_parser = ["bac", "arc", "euk", "mito"])]
    pub rrna_kingdom: String,

    /// Keep 16S copies barrnap marks as partial
    #[arg(long = "keep_partial_rrna")]
    pub keep_partial_rrna: bool,

    /// Minimum 16S length to keep
    #[arg(long = "rrna_min_length", default_value_t = 1200)]
    pub rrna_min_length: usize,

    /// vsearch identity for 16S clustering (1.0 = exact dereplication)
    #[arg(long = "rrna_cluster_id", default_value_t = 1.0)]
    pub rrna_cluster_id: f64,

    /// Directory searched for tools before PATH
    #[arg(long = "bin_dir")]
    pub bin_dir: Option<String>,
}

/// Steps of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Hash, Serialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    #[value(help = "Run BUSCO on every genome")]
    Busco,

    #[value(alias = "core", help = "Select core genes and write one FASTA per gene")]
    CoreGenes,

    #[value(help = "Align each core gene with MAFFT")]
    Align,

    #[value(help = "Trim each alignment with trimAl")]
    Trim,

    #[value(alias = "concat", help = "Concatenate trimmed alignments into a supermatrix")]
    Concatenate,

    #[value(help = "Infer the core-gene tree with FastTree")]
    Tree,

    #[value(help = "Predict rRNA with barrnap and extract 16S sequences")]
    RrnaExtract,

    #[value(help = "Dereplicate or cluster 16S sequences with vsearch")]
    RrnaCluster,

    #[value(help = "Align 16S representatives and infer the 16S tree")]
    RrnaTree,
}

/// Multi-copy BUSCO handling.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Duplicates {
    /// Drop any gene that is duplicated in at least one genome
    Skip,
    /// Keep the longest copy
    Longest,
}

const PIPELINE_ORDER: [PipelineStep; 9] = [
    PipelineStep::Busco,
    PipelineStep::CoreGenes,
    PipelineStep::Align,
    PipelineStep::Trim,
    PipelineStep::Concatenate,
    PipelineStep::Tree,
    PipelineStep::RrnaExtract,
    PipelineStep::RrnaCluster,
    PipelineStep::RrnaTree,
];

/// Validate that steps are in pipeline order.
/// Returns warnings for steps whose predecessor was not selected in this run.
pub fn check_step_sequence(steps: &[PipelineStep]) -> Result<Vec<String>, String> {
    use PipelineStep::*;

    if steps.is_empty() {
        return Err("No pipeline steps selected via --steps.".to_string());
    }

    let index_of = |step: &PipelineStep| PIPELINE_ORDER.iter().position(|s| s == step).unwrap_or(0);

    let mut last_idx = 0usize;
    for step in steps {
        let idx = index_of(step);
        if idx < last_idx {
            return Err(format!(
                "Step {:?} appears out of order in --steps. The allowed order is: \
                 busco -> core-genes -> align -> trim -> concatenate -> tree -> \
                 rrna-extract -> rrna-cluster -> rrna-tree.",
                step
            ));
        }
        last_idx = idx;
    }

    let mut warnings = Vec::new();
    let predecessors = [
        (CoreGenes, Busco),
        (Align, CoreGenes),
        (Trim, Align),
        (Concatenate, Trim),
        (Tree, Concatenate),
        (RrnaCluster, RrnaExtract),
        (RrnaTree, RrnaCluster),
    ];
    for (step, before) in predecessors {
        if steps.contains(&step) && !steps.contains(&before) {
            warnings.push(format!(
                "Step {:?} selected without {:?}; expecting its output from a previous run.",
                step, before
            ));
        }
    }
    Ok(warnings)
}

pub fn validate_step_sequence(steps: &[PipelineStep], logger: &Logger) {
    match check_step_sequence(steps) {
        Ok(warnings) => {
            for w in warnings {
                logger.warning(&w);
            }
        }
        Err(e) => {
            logger.error(&e);
            std::process::exit(1);
        }
    }
}

/// Range checks clap cannot express.
pub fn check_args(args: &Args) -> Result<(), String> {
    if !(args.min_occupancy > 0.0 && args.min_occupancy <= 1.0) {
        return Err(format!("--min_occupancy must be in (0, 1], got {}", args.min_occupancy));
    }
    if !(args.rrna_cluster_id > 0.0 && args.rrna_cluster_id <= 1.0) {
        return Err(format!("--rrna_cluster_id must be in (0, 1], got {}", args.rrna_cluster_id));
    }
    if !(0.0..=100.0).contains(&args.min_completeness) {
        return Err(format!("--min_completeness must be in [0, 100], got {}", args.min_completeness));
    }
    if args.threads == 0 {
        return Err("--threads must be at least 1".to_string());
    }
    Ok(())
}

pub fn validate_args(args: &Args, logger: &Logger) {
    if let Err(e) = check_args(args) {
        logger.error(&e);
        std::process::exit(1);
    }
}

impl Args {
    pub fn runs(&self, step: PipelineStep) -> bool {
        self.steps.contains(&step)
    }

    /// File extension of the core gene sequences.
    pub fn seq_ext(&self) -> &'static str {
        if self.seq_type == "cds" { "fna" } else { "faa" }
    }

    pub fn is_nucleotide(&self) -> bool {
        self.seq_type == "cds"
    }
}
