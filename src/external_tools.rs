use crate::args::{Args, PipelineStep};
use crate::logger::Logger;

use regex::Regex;
use serde::Serialize;

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A resolved external tool.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    pub path: PathBuf,
    pub version: String,
}

/// Tools needed by the selected steps; anything not needed stays `None`.
#[derive(Debug, Default, Serialize)]
pub struct ToolSet {
    pub busco: Option<Tool>,
    pub mafft: Option<Tool>,
    pub trimal: Option<Tool>,
    pub fasttree: Option<Tool>,
    pub barrnap: Option<Tool>,
    pub vsearch: Option<Tool>,
}

fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(m) => m.is_file() && m.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Search `bin_dir` first, then every PATH entry.
pub fn locate_executable(program: &str, bin_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = bin_dir {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

pub fn find_executable(programs: &[&str], bin_dir: Option<&Path>, step: &str, logger: &Logger) -> PathBuf {
    for program in programs {
        if let Some(path) = locate_executable(program, bin_dir) {
            logger.information(&format!("find_executable: using {} at {}", program, path.display()));
            return path;
        }
    }
    logger.error(&format!(
        "find_executable: could not find {} in {}PATH (needed by step {})",
        programs.join(" / "),
        bin_dir.map(|d| format!("{} or ", d.display())).unwrap_or_default(),
        step
    ));
    std::process::exit(1);
}

/// Version number the tool reports for `flag`, searching stdout then stderr.
/// FastTree and MAFFT report on stderr.
pub fn tool_version(path: &Path, flag: &str) -> String {
    let output = Command::new(path)
        .arg(flag)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    match output {
        Ok(o) => {
            let text = format!("{}\n{}", String::from_utf8_lossy(&o.stdout), String::from_utf8_lossy(&o.stderr));
            clean_version(&text).unwrap_or_else(|| "unknown".to_string())
        }
        Err(_) => "unknown".to_string(),
    }
}

/// Pull a dotted version number out of tool output, e.g.
/// "BUSCO 5.4.7" -> "5.4.7", "v7.505 (2022/Apr/10)" -> "7.505",
/// "trimAl v1.4.rev15" -> "1.4.rev15".
pub fn clean_version(text: &str) -> Option<String> {
    let re = Regex::new(r"v?(\d+\.\d+(?:\.(?:\d+|rev\d+))*)").ok()?;
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .find_map(|line| re.captures(line).map(|c| c[1].to_string()))
}

fn shell_escape(arg: &OsStr) -> String {
    let s = arg.to_string_lossy();
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "_-./:=".contains(c)) {
        s.into_owned()
    } else {
        let esc = s.replace('\'', "'\\''");
        format!("'{}'", esc)
    }
}

pub fn render_cmd<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> String {
    let mut s = String::new();
    s.push_str(&shell_escape(program.as_os_str()));
    for a in args {
        s.push(' ');
        s.push_str(&shell_escape(a.as_ref()));
    }
    s
}

fn resolve(names: &[&str], version_flag: &str, bin_dir: Option<&Path>, step: &str, logger: &Logger) -> Tool {
    let path = find_executable(names, bin_dir, step, logger);
    let version = tool_version(&path, version_flag);
    logger.information(&format!("resolve_tools: {} version {}", names[0], version));
    Tool { name: names[0].to_string(), path, version }
}

/// Resolve only the tools the selected steps call.
pub fn resolve_tools(args: &Args, logger: &Logger) -> ToolSet {
    use PipelineStep::*;

    let bin_dir = args.bin_dir.as_deref().map(Path::new);
    let mut tools = ToolSet::default();

    if args.runs(Busco) {
        tools.busco = Some(resolve(&["busco"], "--version", bin_dir, "busco", logger));
    }
    if args.runs(Align) || args.runs(RrnaTree) {
        tools.mafft = Some(resolve(&["mafft"], "--version", bin_dir, "align", logger));
    }
    if args.runs(Trim) {
        tools.trimal = Some(resolve(&["trimal"], "--version", bin_dir, "trim", logger));
    }
    if args.runs(Tree) || args.runs(RrnaTree) {
        tools.fasttree = Some(resolve(&["FastTree", "fasttree", "FastTreeMP"], "-expert", bin_dir, "tree", logger));
    }
    if args.runs(RrnaExtract) {
        tools.barrnap = Some(resolve(&["barrnap"], "--version", bin_dir, "rrna-extract", logger));
    }
    if args.runs(RrnaCluster) {
        tools.vsearch = Some(resolve(&["vsearch"], "--version", bin_dir, "rrna-cluster", logger));
    }
    tools
}

/// Unwrap a tool that `resolve_tools` should have resolved for this step.
pub fn require<'a>(tool: &'a Option<Tool>, name: &str, logger: &Logger) -> &'a Tool {
    match tool {
        Some(t) => t,
        None => {
            logger.error(&format!("require: {} was not resolved for this run", name));
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_version() {
        assert_eq!(clean_version("BUSCO 5.4.7\n").as_deref(), Some("5.4.7"));
        assert_eq!(clean_version("v7.505 (2022/Apr/10)\n").as_deref(), Some("7.505"));
        assert_eq!(clean_version("\n\ntrimAl v1.4.rev15 build[2013-12-17]").as_deref(), Some("1.4.rev15"));
        assert_eq!(clean_version("barrnap 0.9").as_deref(), Some("0.9"));
        assert_eq!(clean_version("vsearch v2.22.1_linux_x86_64, 15.5GB RAM").as_deref(), Some("2.22.1"));
        assert_eq!(clean_version("no digits here"), None);
    }

    #[test]
    fn test_render_cmd() {
        let rendered = render_cmd(Path::new("/usr/bin/mafft"), &["--auto", "my file.faa", "it's"]);
        assert_eq!(rendered, "/usr/bin/mafft --auto 'my file.faa' 'it'\\''s'");
    }

    #[test]
    fn test_locate_executable_in_bin_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("mytool");
        fs::write(&tool, "#!/bin/sh\necho mytool 1.2.3\n").unwrap();
        assert_eq!(locate_executable("mytool", Some(dir.path())), None);

        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(locate_executable("mytool", Some(dir.path())), Some(tool.clone()));
        assert_eq!(tool_version(&tool, "--version"), "1.2.3");
    }
}
