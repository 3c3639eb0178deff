use anyhow::{bail, Context, Result};

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct GffFeature {
    pub seqid: String,                 // contig
    pub feature_type: String,          // rRNA, CDS, gene, etc.
    pub start: usize,                  // 1-based, inclusive
    pub end: usize,
    pub strand: char,                  // '+', '-' or '.'
    pub attributes: HashMap<String, String>,
}

impl GffFeature {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    pub fn length(&self) -> usize {
        self.end + 1 - self.start
    }
}

fn percent_decode(value: &str) -> String {
    value
        .replace("%3B", ";")
        .replace("%3b", ";")
        .replace("%3D", "=")
        .replace("%3d", "=")
        .replace("%2C", ",")
        .replace("%2c", ",")
        .replace("%09", "\t")
        .replace("%25", "%")
}

/// Column 9: `key=value;key2=value2`.
pub fn parse_attributes(field: &str) -> HashMap<String, String> {
    let mut attributes = HashMap::new();
    for part in field.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((k, v)) = part.split_once('=') {
            attributes.insert(k.trim().to_string(), percent_decode(v.trim()));
        }
    }
    attributes
}

pub fn parse_gff_line(line: &str) -> Result<GffFeature> {
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() < 9 {
        bail!("expected 9 tab-separated columns, found {}: '{}'", cols.len(), line);
    }
    let start: usize = cols[3].trim().parse().with_context(|| format!("bad start coordinate '{}'", cols[3]))?;
    let end: usize = cols[4].trim().parse().with_context(|| format!("bad end coordinate '{}'", cols[4]))?;
    if start == 0 || end < start {
        bail!("invalid coordinates {}-{}", start, end);
    }
    let strand = match cols[6].trim() {
        "+" => '+',
        "-" => '-',
        _ => '.',
    };

    Ok(GffFeature {
        seqid: cols[0].to_string(),
        feature_type: cols[2].to_string(),
        start,
        end,
        strand,
        attributes: parse_attributes(cols[8]),
    })
}

/// Parse features, skipping comments and stopping at an embedded `##FASTA` section.
pub fn parse_gff<R: BufRead>(reader: R) -> Result<Vec<GffFeature>> {
    let mut features = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.starts_with("##FASTA") {
            break;
        }
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let feature = parse_gff_line(line).with_context(|| format!("line {}", index + 1))?;
        features.push(feature);
    }
    Ok(features)
}

pub fn read_gff(path: &Path) -> Result<Vec<GffFeature>> {
    let file = File::open(path).with_context(|| format!("read_gff: failed to open {}", path.display()))?;
    parse_gff(BufReader::new(file)).with_context(|| format!("read_gff: malformed GFF {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARRNAP: &str = "##gff-version 3\n\
contig_1\tbarrnap:0.9\trRNA\t100\t1629\t0\t+\t.\tName=16S_rRNA;product=16S ribosomal RNA\n\
contig_1\tbarrnap:0.9\trRNA\t2000\t4900\t0\t-\t.\tName=23S_rRNA;product=23S ribosomal RNA\n\
contig_2\tbarrnap:0.9\trRNA\t5\t700\t1.2e-80\t-\t.\tName=16S_rRNA;product=16S ribosomal RNA (partial);note=aligned only 45 percent of the 16S ribosomal RNA\n\
##FASTA\n\
>contig_1\n\
ACGT\n";

    #[test]
    fn test_parse_barrnap_gff() {
        let features = parse_gff(BARRNAP.as_bytes()).unwrap();
        assert_eq!(features.len(), 3);

        let f = &features[0];
        assert_eq!(f.seqid, "contig_1");
        assert_eq!(f.feature_type, "rRNA");
        assert_eq!((f.start, f.end), (100, 1629));
        assert_eq!(f.length(), 1530);
        assert_eq!(f.strand, '+');
        assert_eq!(f.attr("Name"), Some("16S_rRNA"));
        assert_eq!(f.attr("product"), Some("16S ribosomal RNA"));

        assert_eq!(features[2].strand, '-');
        assert_eq!(features[2].attr("note"), Some("aligned only 45 percent of the 16S ribosomal RNA"));
    }

    #[test]
    fn test_parse_attributes_decodes() {
        let attrs = parse_attributes("ID=gene1;Note=a%3Bb%2Cc;Empty;;x = y ");
        assert_eq!(attrs["ID"], "gene1");
        assert_eq!(attrs["Note"], "a;b,c");
        assert_eq!(attrs["x"], "y");
        assert!(!attrs.contains_key("Empty"));
    }

    #[test]
    fn test_parse_gff_errors() {
        assert!(parse_gff("c\tsrc\trRNA\t10\t5\t.\t+\t.\tName=x\n".as_bytes()).is_err());
        assert!(parse_gff("c\tsrc\trRNA\tten\t50\t.\t+\t.\tName=x\n".as_bytes()).is_err());
        assert!(parse_gff("c\tsrc\trRNA\t10\n".as_bytes()).is_err());
        assert!(parse_gff("c\tsrc\trRNA\t0\t5\t.\t+\t.\t.\n".as_bytes()).is_err());
    }
}
