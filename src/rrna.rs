use crate::genomes::Genome;
use crate::jobs::Job;
use crate::logger::Logger;
use crate::read_fasta::{self, Fasta};
use crate::read_gff::{self, GffFeature};
use crate::seq;
use crate::util::open_bufwrite;

use anyhow::{Context, Result};
use serde::Serialize;

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// barrnap GFF for one genome.
pub fn barrnap_gff_path(out_dir: &Path, genome: &str) -> PathBuf {
    out_dir.join(format!("{}.rrna.gff", genome))
}

pub fn barrnap_jobs(genomes: &[Genome], barrnap: &Path, kingdom: &str, out_dir: &Path) -> Vec<Job> {
    genomes
        .iter()
        .map(|g| {
            Job::new(&g.name, barrnap)
                .arg("--kingdom").arg(kingdom)
                .args(["--threads", "1", "--quiet"])
                .arg(&g.path)
                .stdout_to(barrnap_gff_path(out_dir, &g.name))
        })
        .collect()
}

fn mentions_16s(value: Option<&str>) -> bool {
    value.map(|v| v.to_ascii_uppercase().contains("16S")).unwrap_or(false)
}

pub fn is_16s(feature: &GffFeature) -> bool {
    feature.feature_type.eq_ignore_ascii_case("rRNA") && (mentions_16s(feature.attr("Name")) || mentions_16s(feature.attr("product")))
}

/// barrnap notes "aligned only NN percent" on partial hits.
pub fn is_partial(feature: &GffFeature) -> bool {
    let flagged = |v: Option<&str>| {
        v.map(|s| {
            let lower = s.to_ascii_lowercase();
            lower.contains("partial") || lower.contains("aligned only")
        })
        .unwrap_or(false)
    };
    flagged(feature.attr("note")) || flagged(feature.attr("Note"))
}

/// Per-genome 16S bookkeeping, one row of `16S_summary.tsv`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RrnaCounts {
    pub genome: String,
    pub found: usize,
    pub partial_skipped: usize,
    pub too_short: usize,
    pub kept: usize,
    pub chosen_length: Option<usize>,
}

/// Cut every 16S feature out of the assembly by its GFF coordinates.
pub fn extract_16s(
    genome: &str,
    features: &[GffFeature],
    contigs: &[Fasta],
    keep_partial: bool,
    min_len: usize,
) -> Result<(Vec<Fasta>, RrnaCounts)> {
    let by_id: HashMap<&str, &Fasta> = contigs.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut counts = RrnaCounts { genome: genome.to_string(), ..Default::default() };
    let mut copies = Vec::new();

    for f in features.iter().filter(|f| is_16s(f)) {
        counts.found += 1;
        if !keep_partial && is_partial(f) {
            counts.partial_skipped += 1;
            continue;
        }
        let contig = by_id
            .get(f.seqid.as_str())
            .with_context(|| format!("genome {}: 16S on sequence '{}' which is not in the assembly", genome, f.seqid))?;
        let region = seq::extract_region(&contig.seq, f.start, f.end, f.strand)
            .with_context(|| format!("genome {}: 16S at {}:{}-{}", genome, f.seqid, f.start, f.end))?;
        if f.length() < min_len {
            counts.too_short += 1;
            continue;
        }
        copies.push(Fasta {
            id: format!("{}|{}:{}-{}({})", genome, f.seqid, f.start, f.end, f.strand),
            desc: String::new(),
            seq: region.to_ascii_uppercase(),
        });
    }
    counts.kept = copies.len();
    Ok((copies, counts))
}

/// Longest copy, renamed to the genome.
pub fn pick_representative(genome: &str, candidates: &[Fasta]) -> Option<Fasta> {
    read_fasta::longest(candidates).map(|best| read_fasta::rename_record(best, genome))
}

/// Outputs of the extraction step.
pub struct RrnaExtraction {
    pub representatives: Vec<Fasta>,
    pub all_copies: Vec<Fasta>,
    pub counts: Vec<RrnaCounts>,
}

pub fn rrna_extract(
    genomes: &[Genome],
    gff_dir: &Path,
    keep_partial: bool,
    min_len: usize,
    logger: &Logger,
) -> Result<RrnaExtraction> {
    let mut out = RrnaExtraction { representatives: Vec::new(), all_copies: Vec::new(), counts: Vec::new() };

    for genome in genomes {
        let gff_path = barrnap_gff_path(gff_dir, &genome.name);
        let features = read_gff::read_gff(&gff_path)?;
        let contigs = read_fasta::read_fasta(&genome.path)?;
        let (copies, mut counts) = extract_16s(&genome.name, &features, &contigs, keep_partial, min_len)?;

        match pick_representative(&genome.name, &copies) {
            Some(rep) => {
                counts.chosen_length = Some(rep.seq.len());
                out.representatives.push(rep);
            }
            None => logger.warning(&format!(
                "rrna_extract: no usable 16S in {} (found {}, partial {}, too short {})",
                genome.name, counts.found, counts.partial_skipped, counts.too_short
            )),
        }
        out.all_copies.extend(copies);
        out.counts.push(counts);
    }

    logger.information(&format!(
        "rrna_extract: 16S found for {} of {} genomes, {} copies in total",
        out.representatives.len(),
        genomes.len(),
        out.all_copies.len()
    ));
    Ok(out)
}

pub fn write_rrna_summary(path: &Path, counts: &[RrnaCounts], logger: &Logger) -> Result<()> {
    let mut writer = open_bufwrite(path, logger, "write_rrna_summary");
    writeln!(writer, "genome\tcopies_found\tpartial_skipped\ttoo_short\tcopies_kept\tchosen_length")?;
    for c in counts {
        let chosen = c.chosen_length.map(|l| l.to_string()).unwrap_or_else(|| "NA".to_string());
        writeln!(writer, "{}\t{}\t{}\t{}\t{}\t{}", c.genome, c.found, c.partial_skipped, c.too_short, c.kept, chosen)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn feature(line: &str) -> GffFeature {
        read_gff::parse_gff_line(line).unwrap()
    }

    fn contigs() -> Vec<Fasta> {
        vec![
            Fasta { id: "c1".into(), desc: String::new(), seq: "AAAACCCCGGGGTTTT".into() },
            Fasta { id: "c2".into(), desc: String::new(), seq: "acgtacgtac".into() },
        ]
    }

    #[test]
    fn test_is_16s_and_partial() {
        let f16 = feature("c1\tbarrnap:0.9\trRNA\t1\t4\t0\t+\t.\tName=16S_rRNA;product=16S ribosomal RNA");
        let f23 = feature("c1\tbarrnap:0.9\trRNA\t1\t4\t0\t+\t.\tName=23S_rRNA;product=23S ribosomal RNA");
        let cds = feature("c1\tProdigal\tCDS\t1\t4\t0\t+\t0\tproduct=16S rRNA methyltransferase");
        let part = feature("c1\tbarrnap:0.9\trRNA\t1\t4\t0\t+\t.\tName=16S_rRNA;note=aligned only 40 percent of the 16S ribosomal RNA");
        assert!(is_16s(&f16));
        assert!(!is_16s(&f23));
        assert!(!is_16s(&cds));
        assert!(!is_partial(&f16));
        assert!(is_partial(&part));
    }

    #[test]
    fn test_extract_16s() {
        let features = vec![
            feature("c1\tbarrnap\trRNA\t5\t12\t0\t+\t.\tName=16S_rRNA"),
            feature("c2\tbarrnap\trRNA\t1\t6\t0\t-\t.\tName=16S_rRNA"),
            feature("c2\tbarrnap\trRNA\t1\t3\t0\t+\t.\tName=16S_rRNA"),
            feature("c1\tbarrnap\trRNA\t1\t16\t0\t+\t.\tName=16S_rRNA;note=aligned only 30 percent"),
            feature("c1\tbarrnap\trRNA\t1\t16\t0\t+\t.\tName=5S_rRNA"),
        ];
        let (copies, counts) = extract_16s("gA", &features, &contigs(), false, 5).unwrap();
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0].id, "gA|c1:5-12(+)");
        assert_eq!(copies[0].seq, "CCCCGGGG");
        assert_eq!(copies[1].id, "gA|c2:1-6(-)");
        assert_eq!(copies[1].seq, "GTACGT");
        assert_eq!(counts, RrnaCounts { genome: "gA".into(), found: 4, partial_skipped: 1, too_short: 1, kept: 2, chosen_length: None });

        let (copies, _) = extract_16s("gA", &features, &contigs(), true, 1).unwrap();
        assert_eq!(copies.len(), 4);

        let rep = pick_representative("gA", &copies).unwrap();
        assert_eq!(rep.id, "gA");
        assert_eq!(rep.seq.len(), 16);
        assert!(pick_representative("gA", &[]).is_none());
    }

    #[test]
    fn test_extract_16s_errors() {
        let off_end = vec![feature("c2\tbarrnap\trRNA\t5\t20\t0\t+\t.\tName=16S_rRNA")];
        assert!(extract_16s("gA", &off_end, &contigs(), false, 1).is_err());
        let unknown = vec![feature("c9\tbarrnap\trRNA\t1\t2\t0\t+\t.\tName=16S_rRNA")];
        assert!(extract_16s("gA", &unknown, &contigs(), false, 1).is_err());
    }

    #[test]
    fn test_rrna_extract_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let fa = dir.path().join("gA.fna");
        let fb = dir.path().join("gB.fna");
        fs::write(&fa, ">c1 chromosome\nAAAACCCC\nGGGGTTTT\n").unwrap();
        fs::write(&fb, ">x1\nACGT\n").unwrap();
        fs::write(barrnap_gff_path(dir.path(), "gA"), "##gff-version 3\nc1\tbarrnap:0.9\trRNA\t3\t14\t0\t-\t.\tName=16S_rRNA\n").unwrap();
        fs::write(barrnap_gff_path(dir.path(), "gB"), "##gff-version 3\n").unwrap();

        let genomes = vec![Genome { name: "gA".into(), path: fa }, Genome { name: "gB".into(), path: fb }];
        let out = rrna_extract(&genomes, dir.path(), false, 1, &Logger).unwrap();
        assert_eq!(out.representatives.len(), 1);
        assert_eq!(out.representatives[0].id, "gA");
        assert_eq!(out.representatives[0].seq, "AACCCCGGGGTT");
        assert_eq!(out.counts[1].found, 0);

        let summary = dir.path().join("16S_summary.tsv");
        write_rrna_summary(&summary, &out.counts, &Logger).unwrap();
        let text = fs::read_to_string(&summary).unwrap();
        assert!(text.contains("gA\t1\t0\t0\t1\t12\n"));
        assert!(text.contains("gB\t0\t0\t0\t0\tNA\n"));
    }

    #[test]
    fn test_barrnap_jobs() {
        let genomes = vec![Genome { name: "gA".into(), path: PathBuf::from("/in/gA.fna") }];
        let jobs = barrnap_jobs(&genomes, Path::new("barrnap"), "bac", Path::new("/out"));
        assert_eq!(jobs[0].command_line(), "barrnap --kingdom bac --threads 1 --quiet /in/gA.fna > /out/gA.rrna.gff");
    }
}
