use crate::jobs::{self, Job};
use crate::logger::Logger;
use crate::read_fasta;

use anyhow::{bail, Context, Result};

use std::fs;
use std::path::{Path, PathBuf};

/// FastTree needs at least this many taxa for a meaningful tree.
pub const MIN_TAXA: usize = 3;

pub fn fasttree_job(fasttree: &Path, alignment: &Path, tree_path: &Path, nucleotide: bool, gamma: bool) -> Job {
    let mut job = Job::new("fasttree", fasttree);
    if nucleotide {
        job = job.args(["-nt", "-gtr"]);
    }
    if gamma {
        job = job.arg("-gamma");
    }
    job.arg(alignment).stdout_to(tree_path).check(check_newick_file)
}

fn check_newick_file(path: &Path) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    validate_newick(&text)
}

/// Balanced parentheses, a terminating ';' and something before it.
/// FastTree can exit 0 having written only a warning, so the tree is checked.
pub fn validate_newick(text: &str) -> Result<()> {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_suffix(';') else { bail!("tree does not end with ';'") };
    if body.trim().is_empty() {
        bail!("tree is empty");
    }
    let mut depth: i64 = 0;
    for c in body.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    bail!("unbalanced ')' in tree");
                }
            }
            ';' => bail!("';' inside tree"),
            _ => {}
        }
    }
    if depth != 0 {
        bail!("unbalanced '(' in tree");
    }
    Ok(())
}

/// Run FastTree on `alignment`, writing `tree_path`. Returns `None` (with a
/// warning) when the alignment has too few sequences for a tree.
pub fn run_fasttree(
    fasttree: &Path,
    alignment: &Path,
    tree_path: &Path,
    nucleotide: bool,
    gamma: bool,
    logger: &Logger,
) -> Result<Option<PathBuf>> {
    let n_seqs = read_fasta::read_fasta(alignment)?.len();
    if n_seqs < MIN_TAXA {
        logger.warning(&format!(
            "run_fasttree: {} has {} sequences, at least {} are needed for a tree. Skipping tree.",
            alignment.display(),
            n_seqs,
            MIN_TAXA
        ));
        return Ok(None);
    }

    logger.information(&format!("run_fasttree: building tree from {} -> {}", alignment.display(), tree_path.display()));
    let job = fasttree_job(fasttree, alignment, tree_path, nucleotide, gamma);
    let report = jobs::run_jobs(std::slice::from_ref(&job), 1, logger)?;
    report.ensure_success("run_fasttree")?;

    // a tree kept from an earlier run is only trusted if it still parses
    if let Err(e) = check_newick_file(tree_path) {
        let _ = fs::remove_file(tree_path);
        return Err(e.context(format!("run_fasttree: {} is not a valid Newick tree", tree_path.display())));
    }

    logger.information(&format!("run_fasttree: wrote tree to {}", tree_path.display()));
    Ok(Some(tree_path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::write_script;

    #[test]
    fn test_validate_newick() {
        assert!(validate_newick("(A:0.1,B:0.2,(C:0.3,D:0.4)0.95:0.05);\n").is_ok());
        assert!(validate_newick("(A,B,C)").is_err());
        assert!(validate_newick(";").is_err());
        assert!(validate_newick("((A,B,C);").is_err());
        assert!(validate_newick("(A,B));").is_err());
        assert!(validate_newick("(A,B);(C,D);").is_err());
    }

    #[test]
    fn test_fasttree_job() {
        let job = fasttree_job(Path::new("FastTree"), Path::new("core.fna"), Path::new("core.tree"), true, true);
        assert_eq!(job.command_line(), "FastTree -nt -gtr -gamma core.fna > core.tree");
        let job = fasttree_job(Path::new("FastTree"), Path::new("core.faa"), Path::new("core.tree"), false, false);
        assert_eq!(job.command_line(), "FastTree core.faa > core.tree");
    }

    #[test]
    fn test_run_fasttree_with_stand_in() {
        let dir = tempfile::tempdir().unwrap();
        let aln = dir.path().join("aln.faa");
        let tree = dir.path().join("aln.tree");

        fs::write(&aln, ">A\nMK\n>B\nMV\n").unwrap();
        assert_eq!(run_fasttree(Path::new("false"), &aln, &tree, false, false, &Logger).unwrap(), None);

        // `echo` stands in for FastTree: it prints its arguments, which is not Newick
        fs::write(&aln, ">A\nMK\n>B\nMV\n>C\nMM\n").unwrap();
        assert!(run_fasttree(Path::new("echo"), &aln, &tree, false, false, &Logger).is_err());
        assert!(!tree.exists());
        assert!(run_fasttree(Path::new("false"), &aln, &dir.path().join("x.tree"), false, false, &Logger).is_err());

        // the rejected output does not block a rerun
        let fasttree = write_script(dir.path(), "FastTree", "echo '(A:0.1,B:0.2,C:0.3);'\n");
        assert_eq!(run_fasttree(&fasttree, &aln, &tree, false, false, &Logger).unwrap(), Some(tree.clone()));
        assert_eq!(fs::read_to_string(&tree).unwrap(), "(A:0.1,B:0.2,C:0.3);\n");
    }

    #[test]
    fn test_run_fasttree_replaces_invalid_existing_tree() {
        let dir = tempfile::tempdir().unwrap();
        let aln = dir.path().join("aln.fna");
        let tree = dir.path().join("aln.tree");
        fs::write(&aln, ">A\nAC\n>B\nAC\n>C\nAG\n").unwrap();
        fs::write(&tree, "WARNING only\n").unwrap();

        assert!(run_fasttree(Path::new("false"), &aln, &tree, true, false, &Logger).is_err());
        assert!(!tree.exists());
    }
}
