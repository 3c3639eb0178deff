use anyhow::{bail, Result};

/// Reverse complement by character translation. IUPAC codes and gaps are
/// complemented, case is kept, anything else becomes N.
pub fn reverse_complement(seq: &str) -> String {
    seq.chars()
        .rev()
        .map(|c| {
            let comp = match c.to_ascii_uppercase() {
                'A' => 'T',
                'T' | 'U' => 'A',
                'G' => 'C',
                'C' => 'G',
                'R' => 'Y',
                'Y' => 'R',
                'K' => 'M',
                'M' => 'K',
                'B' => 'V',
                'V' => 'B',
                'D' => 'H',
                'H' => 'D',
                'S' => 'S',
                'W' => 'W',
                'N' => 'N',
                '-' => return '-',
                _ => 'N',
            };
            if c.is_ascii_lowercase() { comp.to_ascii_lowercase() } else { comp }
        })
        .collect()
}

/// Subsequence for 1-based inclusive coordinates. Strand '-' gives the reverse complement.
pub fn extract_region(seq: &str, start: usize, end: usize, strand: char) -> Result<String> {
    if start == 0 {
        bail!("start coordinate must be >= 1 (1-based), got 0");
    }
    if start > end {
        bail!("start {} is greater than end {}", start, end);
    }
    if end > seq.len() {
        bail!("end {} is beyond the sequence length {}", end, seq.len());
    }
    let region = seq.get(start - 1..end).ok_or_else(|| anyhow::anyhow!("sequence is not ASCII"))?;
    Ok(match strand {
        '-' => reverse_complement(region),
        _ => region.to_string(),
    })
}

/// Residue count, ignoring alignment gaps.
pub fn ungapped_len(seq: &str) -> usize {
    seq.bytes().filter(|&b| b != b'-' && b != b'.').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement("ACGT"), "ACGT");
        assert_eq!(reverse_complement("AACG"), "CGTT");
        assert_eq!(reverse_complement("acgTN"), "NAcgt");
        assert_eq!(reverse_complement("RYKMBVDH"), "DHBVKMRY");
        assert_eq!(reverse_complement("A-U"), "A-T");
        assert_eq!(reverse_complement("AXG"), "CNT");
        assert_eq!(reverse_complement(""), "");
    }

    #[test]
    fn test_extract_region() {
        let contig = "AAACCCGGGTTT";
        assert_eq!(extract_region(contig, 1, 3, '+').unwrap(), "AAA");
        assert_eq!(extract_region(contig, 4, 9, '+').unwrap(), "CCCGGG");
        assert_eq!(extract_region(contig, 10, 12, '-').unwrap(), "AAA");
        assert_eq!(extract_region(contig, 3, 5, '-').unwrap(), "GGT");
        assert_eq!(extract_region(contig, 1, 12, '.').unwrap(), contig);
        assert_eq!(extract_region(contig, 5, 5, '+').unwrap(), "C");
    }

    #[test]
    fn test_extract_region_bounds() {
        let contig = "ACGT";
        assert!(extract_region(contig, 0, 2, '+').is_err());
        assert!(extract_region(contig, 3, 2, '+').is_err());
        assert!(extract_region(contig, 2, 5, '+').is_err());
    }

    #[test]
    fn test_ungapped_len() {
        assert_eq!(ungapped_len("AC--G.T"), 4);
        assert_eq!(ungapped_len("----"), 0);
    }
}
