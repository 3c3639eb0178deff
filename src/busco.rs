use crate::args::Args;
use crate::genomes::Genome;
use crate::jobs::Job;
use crate::util::{absolute, non_empty};

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::Serialize;

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuscoStatus {
    Complete,
    Duplicated,
    Fragmented,
    Missing,
}

/// One row of `full_table.tsv`.
#[derive(Debug, Clone, PartialEq)]
pub struct BuscoRecord {
    pub busco_id: String,
    pub status: BuscoStatus,
}

/// Percentages from the one-line BUSCO summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BuscoScores {
    pub complete: f64,
    pub single: f64,
    pub duplicated: f64,
    pub fragmented: f64,
    pub missing: f64,
    pub n: usize,
}

/// `<out_dir>/<genome>` as BUSCO lays it out with `-o <genome> --out_path <out_dir>`.
pub fn genome_out_dir(out_dir: &Path, genome: &str) -> PathBuf {
    out_dir.join(genome)
}

/// "bacteria_odb10" for both a dataset name and a path to a local copy.
fn lineage_basename(lineage: &str) -> &str {
    lineage.trim_end_matches('/').rsplit('/').next().unwrap_or(lineage)
}

/// Locate `run_<lineage>`, falling back to the only `run_*` directory when
/// BUSCO picked the lineage itself.
pub fn find_run_dir(busco_dir: &Path, genome: &str, lineage: &str) -> Result<PathBuf> {
    let genome_dir = genome_out_dir(busco_dir, genome);
    let lineage_name = lineage_basename(lineage);
    let expected = genome_dir.join(format!("run_{}", lineage_name));
    if expected.is_dir() {
        return Ok(expected);
    }

    let mut candidates = Vec::new();
    if let Ok(rd) = fs::read_dir(&genome_dir) {
        for entry in rd.flatten() {
            let path = entry.path();
            let is_run = path.file_name().and_then(|s| s.to_str()).map(|s| s.starts_with("run_")).unwrap_or(false);
            if is_run && path.is_dir() {
                candidates.push(path);
            }
        }
    }
    candidates.sort();
    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => bail!("no BUSCO run directory for genome {} in {}", genome, genome_dir.display()),
        _ => bail!(
            "several BUSCO run directories for genome {} in {} and none matches lineage {}",
            genome,
            genome_dir.display(),
            lineage_name
        ),
    }
}

/// BUSCO runs inside `out_dir` so its logs and downloads stay there, which
/// means every path handed to it must be absolute.
pub fn busco_jobs(genomes: &[Genome], args: &Args, busco: &Path, out_dir: &Path, cpus_per_job: usize) -> Result<Vec<Job>> {
    let out_dir = absolute(out_dir).with_context(|| format!("busco_jobs: cannot resolve {}", out_dir.display()))?;
    // a lineage given as a local dataset directory rather than a name
    let lineage = if Path::new(&args.lineage).exists() {
        absolute(Path::new(&args.lineage))?.into_os_string()
    } else {
        args.lineage.clone().into()
    };

    let mut jobs = Vec::new();
    for genome in genomes {
        let input = absolute(&genome.path).with_context(|| format!("busco_jobs: cannot resolve {}", genome.path.display()))?;
        let genome_dir = genome_out_dir(&out_dir, &genome.name);
        let table = find_run_dir(&out_dir, &genome.name, &args.lineage)
            .map(|d| d.join("full_table.tsv"))
            .unwrap_or_else(|_| genome_dir.join(format!("run_{}", lineage_basename(&args.lineage))).join("full_table.tsv"));

        let mut job = Job::new(&genome.name, busco)
            .arg("-i").arg(input)
            .arg("-o").arg(&genome.name)
            .arg("--out_path").arg(&out_dir)
            .arg("-l").arg(lineage.clone())
            .arg("-m").arg(&args.busco_mode)
            .arg("-c").arg(cpus_per_job.max(1).to_string())
            .creates(table.clone())
            .current_dir(&out_dir);

        if args.offline {
            job = job.arg("--offline");
        }
        if let Some(p) = &args.busco_download_path {
            job = job.arg("--download_path").arg(absolute(Path::new(p))?);
        }
        // a previous run that died leaves a directory BUSCO refuses to overwrite
        if genome_dir.exists() && !non_empty(&table) {
            job = job.arg("-f");
        }
        jobs.push(job);
    }
    Ok(jobs)
}

fn parse_status(s: &str) -> Result<BuscoStatus> {
    match s {
        "Complete" => Ok(BuscoStatus::Complete),
        "Duplicated" => Ok(BuscoStatus::Duplicated),
        "Fragmented" => Ok(BuscoStatus::Fragmented),
        "Missing" => Ok(BuscoStatus::Missing),
        other => bail!("unknown BUSCO status '{}'", other),
    }
}

pub fn parse_full_table_text(text: &str) -> Result<Vec<BuscoRecord>> {
    let mut records = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 2 {
            bail!("line {}: expected at least 2 columns: '{}'", index + 1, line);
        }
        let status = parse_status(cols[1].trim()).with_context(|| format!("line {}", index + 1))?;
        // Duplicated genes get one row per copy; the sequences come from busco_sequences/
        records.push(BuscoRecord { busco_id: cols[0].trim().to_string(), status });
    }
    Ok(records)
}

pub fn parse_full_table(path: &Path) -> Result<Vec<BuscoRecord>> {
    let text = fs::read_to_string(path).with_context(|| format!("parse_full_table: failed to read {}", path.display()))?;
    parse_full_table_text(&text).with_context(|| format!("parse_full_table: malformed {}", path.display()))
}

/// Parse `C:98.4%[S:97.6%,D:0.8%],F:0.8%,M:0.8%,n:124`.
pub fn parse_short_summary(text: &str) -> Result<BuscoScores> {
    let re = Regex::new(
        r"C:\s*([\d.]+)%\s*\[\s*S:\s*([\d.]+)%\s*,\s*D:\s*([\d.]+)%\s*\]\s*,\s*F:\s*([\d.]+)%\s*,\s*M:\s*([\d.]+)%\s*,\s*n:\s*(\d+)",
    )?;
    let caps = re.captures(text).ok_or_else(|| anyhow!("no BUSCO score line (C:..%[S:..%,D:..%],F:..%,M:..%,n:..) found"))?;

    let pct = |i: usize| -> Result<f64> {
        let v: f64 = caps[i].parse().with_context(|| format!("bad percentage '{}'", &caps[i]))?;
        if !(0.0..=100.0).contains(&v) {
            bail!("percentage out of range: {}", v);
        }
        Ok(v)
    };

    let scores = BuscoScores {
        complete: pct(1)?,
        single: pct(2)?,
        duplicated: pct(3)?,
        fragmented: pct(4)?,
        missing: pct(5)?,
        n: caps[6].parse().with_context(|| format!("bad BUSCO count '{}'", &caps[6]))?,
    };
    if scores.n == 0 {
        bail!("BUSCO summary reports n:0");
    }
    Ok(scores)
}

/// Read the `short_summary*.txt` of a run directory (or its parent, where BUSCO 5 also puts a copy).
pub fn read_short_summary(run_dir: &Path) -> Result<BuscoScores> {
    let mut search = vec![run_dir.to_path_buf()];
    if let Some(parent) = run_dir.parent() {
        search.push(parent.to_path_buf());
    }
    for dir in search {
        let Ok(rd) = fs::read_dir(&dir) else { continue };
        let mut files: Vec<PathBuf> = rd
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|s| s.to_str())
                    .map(|s| s.starts_with("short_summary") && s.ends_with(".txt"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        if let Some(path) = files.first() {
            let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            return parse_short_summary(&text).with_context(|| format!("in {}", path.display()));
        }
    }
    bail!("no short_summary*.txt in {}", run_dir.display())
}

fn sequence_dir(run_dir: &Path, kind: &str) -> PathBuf {
    run_dir.join("busco_sequences").join(kind)
}

/// `.faa` for protein, `.fna` for nucleotide.
pub fn single_copy_path(run_dir: &Path, busco_id: &str, ext: &str) -> PathBuf {
    sequence_dir(run_dir, "single_copy_busco_sequences").join(format!("{}.{}", busco_id, ext))
}

pub fn multi_copy_path(run_dir: &Path, busco_id: &str, ext: &str) -> PathBuf {
    sequence_dir(run_dir, "multi_copy_busco_sequences").join(format!("{}.{}", busco_id, ext))
}

/// A `busco` stand-in for tests: two single-copy genes per genome, laid out
/// the way BUSCO 5 writes them.
#[cfg(test)]
pub fn write_stand_in_busco(dir: &Path) -> PathBuf {
    crate::util::write_script(
        dir,
        "busco",
        r#"while [ $# -gt 0 ]; do
  case "$1" in
    -i) input="$2"; shift 2 ;;
    -o) name="$2"; shift 2 ;;
    --out_path) out="$2"; shift 2 ;;
    -l) lineage=$(basename "$2"); shift 2 ;;
    *) shift ;;
  esac
done
[ -r "$input" ] || { echo "cannot read input $input from $(pwd)" >&2; exit 1; }
run="$out/$name/run_$lineage"
seqs="$run/busco_sequences/single_copy_busco_sequences"
mkdir -p "$seqs" || exit 1
printf '>%s_1\nMKLV*\n' "$name" > "$seqs/g1.faa"
printf '>%s_2\nMSTA\n' "$name" > "$seqs/g2.faa"
printf 'C:100.0%%[S:100.0%%,D:0.0%%],F:0.0%%,M:0.0%%,n:2\n' > "$out/$name/short_summary.specific.$lineage.$name.txt"
printf '# Busco id\tStatus\tSequence\tGene Start\tGene End\tStrand\tScore\tLength\ng1\tComplete\tc1\t1\t12\t+\t50.0\t4\ng2\tComplete\tc1\t20\t31\t+\t50.0\t4\n' > "$run/full_table.tsv"
"#,
    )
}
