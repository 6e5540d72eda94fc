
use std::io::{self, Write};
use std::path::Path;

const SEQ_EXTENSIONS: &[&str] = &[".fa", ".fasta", ".fna", ".fq", ".fastq"];

/// Name stem for output files: the input filename with `.gz` and any common
/// sequence-file extension stripped.
pub fn read_stem(seq_file: &Path) -> String {
    let name = seq_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "reads".to_string());

    let name = name.strip_suffix(".gz").unwrap_or(&name);
    for ext in SEQ_EXTENSIONS {
        if let Some(stem) = name.strip_suffix(ext) {
            return stem.to_string();
        }
    }

    name.to_string()
}

/// Plain FASTA record: `>name\nseq\n`.
pub fn write_fasta_record(out: &mut dyn Write, name: &[u8], seq: &[u8]) -> io::Result<()> {
    out.write_all(b">")?;
    out.write_all(name)?;
    out.write_all(b"\n")?;
    out.write_all(seq)?;
    out.write_all(b"\n")
}

/// Partitioned FASTA record: `>name\t<pid><flag>\nseq\n`, where the flag is
/// `*` for a surrendered partition and a space otherwise.
pub fn write_partitioned_record(
    out: &mut dyn Write,
    name: &[u8],
    seq: &[u8],
    partition_id: u32,
    surrendered: bool,
) -> io::Result<()> {
    out.write_all(b">")?;
    out.write_all(name)?;
    let flag = if surrendered { '*' } else { ' ' };
    write!(out, "\t{partition_id}{flag}")?;
    out.write_all(b"\n")?;
    out.write_all(seq)?;
    out.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_read_stem() {
        assert_eq!(read_stem(&PathBuf::from("/data/reads.fa")), "reads");
        assert_eq!(read_stem(&PathBuf::from("sample.fasta.gz")), "sample");
        assert_eq!(read_stem(&PathBuf::from("weird.bin")), "weird.bin");
    }

    #[test]
    fn test_record_formats() {
        let mut plain = Vec::new();
        write_fasta_record(&mut plain, b"r1", b"ACGT").unwrap();
        assert_eq!(plain, b">r1\nACGT\n");

        let mut part = Vec::new();
        write_partitioned_record(&mut part, b"r1", b"ACGT", 3, false).unwrap();
        assert_eq!(part, b">r1\t3 \nACGT\n");

        let mut surrendered = Vec::new();
        write_partitioned_record(&mut surrendered, b"r2", b"ACGT", 12, true).unwrap();
        assert_eq!(surrendered, b">r2\t12*\nACGT\n");
    }
}
