use crate::external_tools::render_cmd;
use crate::logger::Logger;
use crate::util::non_empty;

use anyhow::{anyhow, bail, Result};
use rayon::prelude::*;

use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// One external program invocation.
#[derive(Clone)]
pub struct Job {
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub stdout_to: Option<PathBuf>,
    pub creates: Option<PathBuf>,
    pub current_dir: Option<PathBuf>,
    /// Output files passed to the program as `<file>.tmp`, renamed on success.
    pub staged: Vec<PathBuf>,
    pub check: Option<fn(&Path) -> Result<()>>,
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

impl Job {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Job {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            stdout_to: None,
            creates: None,
            current_dir: None,
            staged: Vec::new(),
            check: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Capture stdout into `path`. Also marks `path` as the job's output
    /// unless `creates` is set.
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_to = Some(path.into());
        self
    }

    /// A file or directory whose non-empty presence means the job is done.
    pub fn creates(mut self, path: impl Into<PathBuf>) -> Self {
        self.creates = Some(path.into());
        self
    }

    /// Pass `<flag> <path>.tmp` to the program and move the file to `path`
    /// once the job succeeds. The first staged output is the done marker
    /// unless `creates` is set.
    pub fn output_arg(mut self, flag: &str, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.args.push(flag.into());
        self.args.push(tmp_path(&path).into_os_string());
        if self.creates.is_none() {
            self.creates = Some(path.clone());
        }
        self.staged.push(path);
        self
    }

    /// Run `check` on the finished output before it is moved into place.
    pub fn check(mut self, check: fn(&Path) -> Result<()>) -> Self {
        self.check = Some(check);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = render_cmd(&self.program, &self.args);
        if let Some(out) = &self.stdout_to {
            line.push_str(&format!(" > {}", out.display()));
        }
        line
    }

    fn done_marker(&self) -> Option<&Path> {
        self.creates.as_deref().or(self.stdout_to.as_deref())
    }

    fn is_done(&self) -> bool {
        self.done_marker().map(non_empty).unwrap_or(false)
    }

    fn discard_tmp(&self) {
        for out in self.stdout_to.iter().chain(self.staged.iter()) {
            let _ = fs::remove_file(tmp_path(out));
        }
    }

    fn run(&self) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null()).stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        // stdout goes to "<file>.tmp" and is renamed only on success
        match &self.stdout_to {
            Some(out) => {
                let tmp = tmp_path(out);
                let file = File::create(&tmp).map_err(|e| anyhow!("cannot create {}: {}", tmp.display(), e))?;
                cmd.stdout(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::null());
            }
        }

        let output = cmd.output().map_err(|e| anyhow!("failed to start {}: {}", self.program.display(), e))?;

        if !output.status.success() {
            self.discard_tmp();
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
            let tail = tail[tail.len().saturating_sub(5)..].join(" | ");
            bail!("exited with {}{}", output.status, if tail.is_empty() { String::new() } else { format!(": {}", tail) });
        }

        if let (Some(check), Some(marker)) = (self.check, self.done_marker()) {
            let staged = self.stdout_to.iter().chain(self.staged.iter()).any(|p| p.as_path() == marker);
            let produced = if staged { tmp_path(marker) } else { marker.to_path_buf() };
            if let Err(e) = check(&produced) {
                self.discard_tmp();
                bail!("output rejected: {:#}", e);
            }
        }

        // the done marker moves last so it never exists without its siblings
        let marker = self.done_marker().map(Path::to_path_buf);
        let mut outputs: Vec<&PathBuf> = self.stdout_to.iter().chain(self.staged.iter()).collect();
        outputs.sort_by_key(|p| Some(*p) == marker.as_ref());
        for out in outputs {
            let tmp = tmp_path(out);
            if !tmp.exists() {
                bail!("expected output {} was not written", tmp.display());
            }
            fs::rename(&tmp, out).map_err(|e| anyhow!("cannot move {} to {}: {}", tmp.display(), out.display(), e))?;
        }
        Ok(())
    }
}

enum Outcome {
    Completed(String),
    Skipped(String),
    Failed(String, String),
}

/// What happened to a batch of jobs.
#[derive(Debug, Default)]
pub struct JobReport {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl JobReport {
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.failed.is_empty() {
            return Ok(());
        }
        let shown: Vec<String> = self.failed.iter().take(10).map(|(label, err)| format!("{} ({})", label, err)).collect();
        let more = if self.failed.len() > 10 { format!(" and {} more", self.failed.len() - 10) } else { String::new() };
        bail!("{}: {} job(s) failed: {}{}", context, self.failed.len(), shown.join("; "), more)
    }
}

/// Concurrent jobs when `--jobs 0`: as many as the thread budget allows.
pub fn job_concurrency(threads: usize, jobs: usize, threads_per_job: usize) -> usize {
    if jobs > 0 {
        jobs
    } else {
        (threads / threads_per_job.max(1)).max(1)
    }
}

/// Run every job on a dedicated pool of `concurrency` threads. Jobs whose
/// output already exists are skipped; failures are collected, not fatal.
pub fn run_jobs(jobs: &[Job], concurrency: usize, logger: &Logger) -> Result<JobReport> {
    let n_threads = concurrency.max(1);
    logger.information(&format!("run_jobs: {} jobs, {} concurrent", jobs.len(), n_threads));

    // Build a dedicated rayon pool so we do not rely on the global one
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build()
        .map_err(|e| anyhow!("run_jobs: failed to build thread pool: {}", e))?;

    let outcomes: Vec<Outcome> = pool.install(|| {
        jobs.par_iter()
            .map(|job| {
                if job.is_done() {
                    return Outcome::Skipped(job.label.clone());
                }
                logger.information(&format!("run_jobs: [{}] {}", job.label, job.command_line()));
                match job.run() {
                    Ok(()) => Outcome::Completed(job.label.clone()),
                    Err(e) => {
                        logger.warning(&format!("run_jobs: [{}] failed: {}", job.label, e));
                        Outcome::Failed(job.label.clone(), e.to_string())
                    }
                }
            })
            .collect()
    });

    let mut report = JobReport::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Completed(l) => report.completed.push(l),
            Outcome::Skipped(l) => report.skipped.push(l),
            Outcome::Failed(l, e) => report.failed.push((l, e)),
        }
    }
    logger.information(&format!(
        "run_jobs: completed {}, skipped (already done) {}, failed {}",
        report.completed.len(),
        report.skipped.len(),
        report.failed.len()
    ));
    Ok(report)
}
