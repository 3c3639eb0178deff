use crate::logger::Logger;

use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;

pub fn mkdir(path: &Path, logger: &Logger, context: &str) {
    fs::create_dir_all(path).log_or_exit(logger, |e| {
        format!("{context}: failed to create directory {}: {}", path.display(), e)
    });
}

pub fn open_bufwrite(path: &Path, logger: &Logger, context: &str) -> BufWriter<File> {
    let file = File::create(path).log_or_exit(logger, |e| {
        format!("{context}: failed to open for writing {}: {}", path.display(), e)
    });
    BufWriter::new(file)
}

/// True when `path` is a file with content, or a directory with at least one entry.
pub fn non_empty(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(m) if m.is_file() => m.len() > 0,
        Ok(m) if m.is_dir() => fs::read_dir(path).map(|mut rd| rd.next().is_some()).unwrap_or(false),
        _ => false,
    }
}

/// `path` resolved against the working directory when it is relative.
pub fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Files directly inside `dir` whose name ends with `suffix`, sorted.
pub fn files_with_suffix(dir: &Path, suffix: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else { continue };
        if name.ends_with(suffix) && !name.starts_with('.') {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Strip `suffix` from the file name of `path`, e.g. "1000at2.aln.faa" -> "1000at2".
pub fn name_without_suffix(path: &Path, suffix: &str) -> Option<String> {
    path.file_name()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_suffix(suffix))
        .map(|s| s.to_string())
}

// log_or_exit functionality
pub trait LogResultExt<T> {
    fn log_or_exit<F>(self, logger: &Logger, make_msg: F) -> T
    where
        F: FnOnce(&dyn fmt::Display) -> String;
}

impl<T, E> LogResultExt<T> for Result<T, E>
where
    E: fmt::Display,
{
    fn log_or_exit<F>(self, logger: &Logger, make_msg: F) -> T
    where
        F: FnOnce(&dyn fmt::Display) -> String,
    {
        match self {
            Ok(v) => v,
            Err(e) => {
                logger.error(&make_msg(&e));
                process::exit(1);
            }
        }
    }
}

/// Write an executable `#!/bin/sh` script, used as a stand-in for external tools.
#[cfg(test)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();
    file.write_all(format!("#!/bin/sh\n{}", body).as_bytes()).unwrap();
    file.sync_all().unwrap();
    drop(file);
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A temporary directory under the working directory, with its path given
/// relative to it, the way a user passes `-o coretree_output`.
#[cfg(test)]
pub fn relative_tempdir() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir_in(".").unwrap();
    let cwd = std::env::current_dir().unwrap();
    let rel = dir.path().strip_prefix(&cwd).map(Path::to_path_buf).unwrap_or_else(|_| dir.path().to_path_buf());
    assert!(rel.is_relative());
    (dir, rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!non_empty(dir.path()));
        assert!(!non_empty(&dir.path().join("absent")));

        let empty = dir.path().join("empty.txt");
        fs::write(&empty, "").unwrap();
        assert!(!non_empty(&empty));

        let full = dir.path().join("full.txt");
        fs::write(&full, "x").unwrap();
        assert!(non_empty(&full));
        assert!(non_empty(dir.path()));
    }

    #[test]
    fn test_files_with_suffix() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.aln.faa", "a.aln.faa", "c.faa", ".hidden.aln.faa"] {
            fs::write(dir.path().join(name), ">x\nA\n").unwrap();
        }
        fs::create_dir(dir.path().join("d.aln.faa")).unwrap();
        let files = files_with_suffix(dir.path(), ".aln.faa").unwrap();
        let names: Vec<_> = files.iter().map(|p| name_without_suffix(p, ".aln.faa").unwrap()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
