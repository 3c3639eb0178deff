use crate::jobs::Job;
use crate::logger::Logger;
use crate::read_fasta::{self, Fasta};
use crate::util::{files_with_suffix, name_without_suffix, non_empty};

use anyhow::{bail, Context, Result};

use std::fs;
use std::path::Path;

/// `mafft <extra> --thread <n> --quiet <input> > <output>`
pub fn mafft_job(label: &str, mafft: &Path, extra: &[&str], threads: usize, input: &Path, output: &Path) -> Job {
    Job::new(label, mafft)
        .args(extra.iter().copied())
        .arg("--thread").arg(threads.max(1).to_string())
        .arg("--quiet")
        .arg(input)
        .stdout_to(output)
}

/// One MAFFT job per `<gene>.<ext>` in `in_dir`, writing `<gene>.aln.<ext>`.
/// Single-sequence genes are copied through instead of aligned.
pub fn mafft_jobs(in_dir: &Path, out_dir: &Path, ext: &str, mafft: &Path, mafft_args: &str, logger: &Logger) -> Result<Vec<Job>> {
    let suffix = format!(".{}", ext);
    let extra: Vec<&str> = mafft_args.split_whitespace().collect();
    let mut jobs = Vec::new();
    let mut copied = 0usize;

    for path in files_with_suffix(in_dir, &suffix)? {
        let Some(gene) = name_without_suffix(&path, &suffix) else { continue };
        let out_path = out_dir.join(format!("{}.aln.{}", gene, ext));

        let records = read_fasta::read_fasta(&path)?;
        if records.is_empty() {
            logger.warning(&format!("mafft_jobs: {} has no sequences, skipping", path.display()));
            continue;
        }
        if records.len() < 2 {
            if !non_empty(&out_path) {
                fs::copy(&path, &out_path).with_context(|| format!("failed to copy {} to {}", path.display(), out_path.display()))?;
            }
            copied += 1;
            continue;
        }

        jobs.push(mafft_job(&gene, mafft, &extra, 1, &path, &out_path));
    }

    if copied > 0 {
        logger.information(&format!("mafft_jobs: {} single-sequence genes copied without alignment", copied));
    }
    Ok(jobs)
}

/// One trimAl job per `<gene>.aln.<ext>`, writing `<gene>.trim.<ext>`.
pub fn trimal_jobs(in_dir: &Path, out_dir: &Path, ext: &str, trimal: &Path, mode: &str) -> Result<Vec<Job>> {
    let suffix = format!(".aln.{}", ext);
    let mut jobs = Vec::new();
    for path in files_with_suffix(in_dir, &suffix)? {
        let Some(gene) = name_without_suffix(&path, &suffix) else { continue };
        let out_path = out_dir.join(format!("{}.trim.{}", gene, ext));
        jobs.push(
            Job::new(&gene, trimal)
                .arg("-in").arg(&path)
                .output_arg("-out", out_path)
                .arg(format!("-{}", mode)),
        );
    }
    Ok(jobs)
}

/// All rows of an alignment must have the same length. Returns that length.
pub fn check_alignment(records: &[Fasta]) -> Result<usize> {
    let Some(first) = records.first() else { bail!("alignment has no sequences") };
    let len = first.seq.len();
    for rec in records {
        if rec.seq.len() != len {
            bail!("sequence {} has length {}, expected {}", rec.id, rec.seq.len(), len);
        }
    }
    Ok(len)
}

/// Reject MAFFT outputs that are empty or ragged before trimming.
pub fn check_alignment_dir(dir: &Path, suffix: &str, logger: &Logger) -> Result<usize> {
    let files = files_with_suffix(dir, suffix)?;
    for path in &files {
        let records = read_fasta::read_fasta(path)?;
        check_alignment(&records).with_context(|| format!("check_alignment_dir: {}", path.display()))?;
    }
    logger.information(&format!("check_alignment_dir: {} alignments in {} look consistent", files.len(), dir.display()));
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_alignment() {
        let rec = |id: &str, s: &str| Fasta { id: id.into(), desc: String::new(), seq: s.into() };
        assert_eq!(check_alignment(&[rec("a", "AC-T"), rec("b", "ACGT")]).unwrap(), 4);
        assert!(check_alignment(&[rec("a", "AC-T"), rec("b", "ACG")]).is_err());
        assert!(check_alignment(&[]).is_err());
    }

    #[test]
    fn test_mafft_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let in_dir = dir.path().join("in");
        let out_dir = dir.path().join("out");
        fs::create_dir_all(&in_dir).unwrap();
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(in_dir.join("g1.faa"), ">A\nMKL\n>B\nMKV\n").unwrap();
        fs::write(in_dir.join("g2.faa"), ">A\nMKL\n").unwrap();
        fs::write(in_dir.join("notes.txt"), "x").unwrap();

        let jobs = mafft_jobs(&in_dir, &out_dir, "faa", Path::new("mafft"), "--maxiterate 1000 --localpair", &Logger).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].label, "g1");
        assert_eq!(jobs[0].stdout_to, Some(out_dir.join("g1.aln.faa")));
        let line = jobs[0].command_line();
        assert!(line.starts_with("mafft --maxiterate 1000 --localpair --thread 1 --quiet "));

        assert_eq!(fs::read_to_string(out_dir.join("g2.aln.faa")).unwrap(), ">A\nMKL\n");
    }

    #[test]
    fn test_trimal_jobs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("g1.aln.fna"), ">A\nAC\n>B\nAC\n").unwrap();
        fs::write(dir.path().join("g1.fna"), ">A\nAC\n").unwrap();
        let jobs = trimal_jobs(dir.path(), dir.path(), "fna", Path::new("trimal"), "gappyout").unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].creates, Some(dir.path().join("g1.trim.fna")));
        let line = jobs[0].command_line();
        assert!(line.contains(&format!("-out {}", dir.path().join("g1.trim.fna.tmp").display())));
        assert!(line.ends_with("-gappyout"));
    }

    #[test]
    fn test_check_alignment_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("g1.aln.faa"), ">A\nMK-L\n>B\nMKVL\n").unwrap();
        assert_eq!(check_alignment_dir(dir.path(), ".aln.faa", &Logger).unwrap(), 1);
        fs::write(dir.path().join("g2.aln.faa"), ">A\nMK-L\n>B\nMKV\n").unwrap();
        assert!(check_alignment_dir(dir.path(), ".aln.faa", &Logger).is_err());
    }
}
