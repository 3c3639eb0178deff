use anyhow::{bail, Context, Result};

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
pub struct Fasta {
    pub id: String,
    pub desc: String,
    pub seq: String,
}

/// Parse FASTA text. Multi-line records are joined and `\r` is dropped.
pub fn parse_fasta(text: &str) -> Result<Vec<Fasta>> {
    let mut fasta: Vec<Fasta> = Vec::new();
    let mut current: Option<Fasta> = None;

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');

        // ID and Description
        if let Some(header) = line.strip_prefix('>') {
            if let Some(done) = current.take() {
                fasta.push(done);
            }
            let header = header.trim();
            let (id, desc) = match header.find(char::is_whitespace) {
                Some(i) => (&header[..i], header[i..].trim()),
                None => (header, ""),
            };
            current = Some(Fasta { id: id.to_string(), desc: desc.to_string(), seq: String::new() });
        } else {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match current.as_mut() {
                Some(rec) => rec.seq.push_str(trimmed),
                None => bail!("sequence data before the first header at line {}", index + 1),
            }
        }
    }
    if let Some(done) = current {
        fasta.push(done);
    }
    Ok(fasta)
}

pub fn read_fasta(path: &Path) -> Result<Vec<Fasta>> {
    let text = fs::read_to_string(path).with_context(|| format!("read_fasta: failed to read {}", path.display()))?;
    parse_fasta(&text).with_context(|| format!("read_fasta: malformed FASTA {}", path.display()))
}

/// Write records, wrapping sequence lines at `width` (0 = single line).
pub fn write_fasta<W: Write>(writer: &mut W, records: &[Fasta], width: usize) -> std::io::Result<()> {
    for fasta in records {
        if fasta.desc.is_empty() {
            writeln!(writer, ">{}", fasta.id)?;
        } else {
            writeln!(writer, ">{} {}", fasta.id, fasta.desc)?;
        }
        if width == 0 {
            writeln!(writer, "{}", fasta.seq)?;
        } else {
            for chunk in fasta.seq.as_bytes().chunks(width) {
                writer.write_all(chunk)?;
                writer.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}

pub fn write_fasta_file(path: &Path, records: &[Fasta], width: usize) -> Result<()> {
    let file = File::create(path).with_context(|| format!("write_fasta_file: failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_fasta(&mut writer, records, width)
        .and_then(|_| writer.flush())
        .with_context(|| format!("write_fasta_file: failed to write {}", path.display()))
}

/// Rewrite the header to `new_id`; the description is dropped.
pub fn rename_record(record: &Fasta, new_id: &str) -> Fasta {
    Fasta { id: new_id.to_string(), desc: String::new(), seq: record.seq.clone() }
}

/// Longest sequence among candidates, first one wins ties.
pub fn longest(records: &[Fasta]) -> Option<&Fasta> {
    records.iter().fold(None, |best: Option<&Fasta>, rec| match best {
        Some(b) if b.seq.len() >= rec.seq.len() => Some(b),
        _ => Some(rec),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fasta() {
        let text = ">contig_1 some description here\nACGT\nACG\n\n>contig_2\r\nTT\r\nGG\r\n>empty\n";
        let recs = parse_fasta(text).unwrap();
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].id, "contig_1");
        assert_eq!(recs[0].desc, "some description here");
        assert_eq!(recs[0].seq, "ACGTACG");
        assert_eq!(recs[1].id, "contig_2");
        assert_eq!(recs[1].seq, "TTGG");
        assert_eq!(recs[2].seq, "");
    }

    #[test]
    fn test_parse_fasta_rejects_headless_sequence() {
        assert!(parse_fasta("ACGT\n>a\nAC\n").is_err());
        assert!(parse_fasta("").unwrap().is_empty());
    }

    #[test]
    fn test_write_fasta_wraps() {
        let recs = vec![
            Fasta { id: "a".into(), desc: "".into(), seq: "ACGTACGTAC".into() },
            Fasta { id: "b".into(), desc: "x y".into(), seq: "AC".into() },
        ];
        let mut out = Vec::new();
        write_fasta(&mut out, &recs, 4).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">a\nACGT\nACGT\nAC\n>b x y\nAC\n");

        let mut out = Vec::new();
        write_fasta(&mut out, &recs[..1], 0).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">a\nACGTACGTAC\n");
    }

    #[test]
    fn test_longest_and_rename() {
        let recs = vec![
            Fasta { id: "c1".into(), desc: "d".into(), seq: "AAAA".into() },
            Fasta { id: "c2".into(), desc: "".into(), seq: "AAAAAA".into() },
            Fasta { id: "c3".into(), desc: "".into(), seq: "CCCCCC".into() },
        ];
        let best = longest(&recs).unwrap();
        assert_eq!(best.id, "c2");
        let renamed = rename_record(best, "GenomeA");
        assert_eq!(renamed.id, "GenomeA");
        assert_eq!(renamed.desc, "");
        assert_eq!(renamed.seq, "AAAAAA");
        assert!(longest(&[]).is_none());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.fna");
        let recs = vec![Fasta { id: "g".into(), desc: "".into(), seq: "ACGT".repeat(40) }];
        write_fasta_file(&path, &recs, 60).unwrap();
        assert_eq!(read_fasta(&path).unwrap(), recs);
        assert!(read_fasta(&dir.path().join("missing.fna")).is_err());
    }
}
