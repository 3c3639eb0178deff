use crate::jobs::Job;
use crate::logger::Logger;
use crate::util::open_bufwrite;

use anyhow::{bail, Context, Result};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// A vsearch cluster: the centroid and every member, centroid first.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub number: usize,
    pub centroid: String,
    pub members: Vec<String>,
}

/// `id >= 1.0` dereplicates identical sequences, anything lower clusters.
pub fn vsearch_job(vsearch: &Path, input: &Path, centroids: &Path, uc: &Path, id: f64, threads: usize) -> Job {
    if id >= 1.0 {
        Job::new("vsearch_derep", vsearch)
            .arg("--derep_fulllength").arg(input)
            .output_arg("--output", centroids)
            .output_arg("--uc", uc)
            .args(["--threads", "1", "--quiet"])
    } else {
        Job::new("vsearch_cluster", vsearch)
            .arg("--cluster_fast").arg(input)
            .arg("--id").arg(format!("{}", id))
            .output_arg("--centroids", centroids)
            .output_arg("--uc", uc)
            .arg("--threads").arg(threads.max(1).to_string())
            .arg("--quiet")
    }
}

/// Parse a `.uc` file. S opens a cluster, H adds to it, C is a summary line.
pub fn parse_uc<R: BufRead>(reader: R) -> Result<Vec<Cluster>> {
    let mut clusters: BTreeMap<usize, Cluster> = BTreeMap::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 10 {
            bail!("line {}: expected 10 tab-separated columns, found {}", index + 1, cols.len());
        }
        let number: usize = cols[1].parse().with_context(|| format!("line {}: bad cluster number '{}'", index + 1, cols[1]))?;
        let query = cols[8].to_string();
        let target = cols[9];

        match cols[0] {
            "S" => {
                if clusters.contains_key(&number) {
                    bail!("line {}: cluster {} has a second centroid", index + 1, number);
                }
                clusters.insert(number, Cluster { number, centroid: query.clone(), members: vec![query] });
            }
            "H" => match clusters.get_mut(&number) {
                Some(c) if c.centroid == target => c.members.push(query),
                Some(c) => bail!("line {}: hit {} points to {} but cluster {} has centroid {}", index + 1, query, target, number, c.centroid),
                None => bail!("line {}: hit {} for cluster {} before its centroid", index + 1, query, number),
            },
            "C" | "N" => {}
            other => bail!("line {}: unknown record type '{}'", index + 1, other),
        }
    }
    Ok(clusters.into_values().collect())
}

pub fn read_uc(path: &Path) -> Result<Vec<Cluster>> {
    let file = File::open(path).with_context(|| format!("read_uc: failed to open {}", path.display()))?;
    parse_uc(BufReader::new(file)).with_context(|| format!("read_uc: malformed {}", path.display()))
}

/// cluster, centroid, size, members
pub fn write_cluster_table(path: &Path, clusters: &[Cluster], logger: &Logger) -> Result<()> {
    let mut writer = open_bufwrite(path, logger, "write_cluster_table");
    writeln!(writer, "cluster\tcentroid\tsize\tmembers")?;
    for c in clusters {
        writeln!(writer, "{}\t{}\t{}\t{}", c.number, c.centroid, c.members.len(), c.members.join(","))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const UC: &str = "S\t0\t1540\t*\t*\t*\t*\t*\tgA\t*\n\
H\t0\t1540\t100.0\t+\t0\t0\t=\tgC\tgA\n\
S\t1\t1538\t*\t*\t*\t*\t*\tgB\t*\n\
H\t0\t1540\t100.0\t+\t0\t0\t=\tgD\tgA\n\
C\t0\t3\t*\t*\t*\t*\t*\tgA\t*\n\
C\t1\t1\t*\t*\t*\t*\t*\tgB\t*\n";

    #[test]
    fn test_parse_uc() {
        let clusters = parse_uc(UC.as_bytes()).unwrap();
        assert_eq!(
            clusters,
            vec![
                Cluster { number: 0, centroid: "gA".into(), members: vec!["gA".into(), "gC".into(), "gD".into()] },
                Cluster { number: 1, centroid: "gB".into(), members: vec!["gB".into()] },
            ]
        );
    }

    #[test]
    fn test_parse_uc_errors() {
        let hit_first = "H\t0\t1540\t100.0\t+\t0\t0\t=\tgC\tgA\nS\t0\t1540\t*\t*\t*\t*\t*\tgA\t*\n";
        assert!(parse_uc(hit_first.as_bytes()).is_err());
        let short = "S\t0\t1540\n";
        assert!(parse_uc(short.as_bytes()).is_err());
        let wrong_target = "S\t0\t1\t*\t*\t*\t*\t*\tgA\t*\nH\t0\t1\t99.0\t+\t0\t0\t=\tgC\tgZ\n";
        assert!(parse_uc(wrong_target.as_bytes()).is_err());
    }

    #[test]
    fn test_vsearch_job_modes() {
        let derep = vsearch_job(Path::new("vsearch"), Path::new("in.fna"), Path::new("c.fna"), Path::new("c.uc"), 1.0, 4);
        assert_eq!(derep.command_line(), "vsearch --derep_fulllength in.fna --output c.fna.tmp --uc c.uc.tmp --threads 1 --quiet");
        assert_eq!(derep.creates, Some(PathBuf::from("c.fna")));
        let cluster = vsearch_job(Path::new("vsearch"), Path::new("in.fna"), Path::new("c.fna"), Path::new("c.uc"), 0.99, 4);
        assert_eq!(cluster.command_line(), "vsearch --cluster_fast in.fna --id 0.99 --centroids c.fna.tmp --uc c.uc.tmp --threads 4 --quiet");
    }

    #[test]
    fn test_write_cluster_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusters.tsv");
        let clusters = parse_uc(UC.as_bytes()).unwrap();
        write_cluster_table(&path, &clusters, &Logger).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "cluster\tcentroid\tsize\tmembers\n0\tgA\t3\tgA,gC,gD\n1\tgB\t1\tgB\n"
        );
    }
}
