use csv::ByteRecord;
use pia_core::fdr::FdrStats;
use pia_core::graph::{AccessionIx, EvidenceGraph, FileIx};
use pia_core::report::{ReportPeptide, ReportProtein, ReportPsmSet};
use std::path::{Path, PathBuf};

/// Writes the tab separated reports. Keeps its own copy of the names it needs
/// so that report collections can be borrowed from the aggregator while
/// writing.
pub struct Output {
    directory: PathBuf,
    filenames: Vec<String>,
    accessions: Vec<String>,
    sequence_lengths: Vec<Option<usize>>,
}

fn push_float(record: &mut ByteRecord, value: f64) {
    record.push_field(ryu::Buffer::new().format(value).as_bytes());
}

fn push_bool(record: &mut ByteRecord, value: bool) {
    record.push_field(if value { "true" } else { "false" }.as_bytes());
}

fn push_rank(record: &mut ByteRecord, rank: Option<u32>) {
    match rank {
        Some(rank) => record.push_field(itoa::Buffer::new().format(rank).as_bytes()),
        None => record.push_field(b""),
    }
}

fn push_fdr(record: &mut ByteRecord, fdr: &FdrStats) {
    push_float(record, fdr.fdr);
    push_float(record, fdr.q_value);
    push_float(record, fdr.fdr_score);
    push_bool(record, fdr.fdr_good);
}

const FDR_HEADERS: [&str; 4] = ["fdr", "q_value", "fdr_score", "fdr_good"];

impl Output {
    pub fn new<P: AsRef<Path>>(directory: P, graph: &EvidenceGraph) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            filenames: graph.files.iter().map(|f| f.name.clone()).collect(),
            accessions: graph
                .accessions
                .iter()
                .map(|a| a.accession.clone())
                .collect(),
            sequence_lengths: graph
                .accessions
                .iter()
                .map(|a| a.sequence.as_ref().map(|seq| seq.chars().count()))
                .collect(),
        }
    }

    // Create a path for `file_name` in the output directory
    pub(crate) fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.directory.join(file_name.as_ref())
    }

    fn join_accessions<'a, I: IntoIterator<Item = &'a AccessionIx>>(&self, accessions: I) -> String {
        accessions
            .into_iter()
            .filter_map(|acc| self.accessions.get(acc.0 as usize))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(";")
    }

    fn join_files(&self, files: &[FileIx]) -> String {
        files
            .iter()
            .filter_map(|file| self.filenames.get(file.0 as usize))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(";")
    }

    fn write_records<I>(&self, file_name: &str, headers: Vec<&str>, records: I) -> anyhow::Result<String>
    where
        I: IntoIterator<Item = ByteRecord>,
    {
        let path = self.make_path(file_name);
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        wtr.write_byte_record(&ByteRecord::from(headers))?;
        for record in records {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }

    pub fn serialize_protein(&self, protein: &ReportProtein) -> ByteRecord {
        let mut record = ByteRecord::new();
        record.push_field(itoa::Buffer::new().format(protein.id).as_bytes());
        record.push_field(self.join_accessions(&protein.accessions).as_bytes());
        push_float(&mut record, protein.score);
        push_rank(&mut record, protein.rank);
        push_bool(&mut record, protein.decoy);
        record.push_field(itoa::Buffer::new().format(protein.nr_peptides()).as_bytes());
        record.push_field(itoa::Buffer::new().format(protein.nr_psms()).as_bytes());
        record.push_field(itoa::Buffer::new().format(protein.nr_spectra()).as_bytes());
        record.push_field(
            itoa::Buffer::new()
                .format(protein.nr_unique_peptides())
                .as_bytes(),
        );

        // one value per accession, empty without a known sequence
        let coverage = protein
            .accessions
            .iter()
            .map(|acc| {
                let length = self.sequence_lengths.get(acc.0 as usize).copied().flatten();
                match (protein.coverage.get(acc), length) {
                    (Some(coverage), Some(length)) => {
                        ryu::Buffer::new().format(coverage.fraction(length)).to_string()
                    }
                    _ => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(";");
        record.push_field(coverage.as_bytes());

        let sub_sets = protein
            .sub_sets
            .iter()
            .map(|sub| self.join_accessions(&sub.accessions))
            .collect::<Vec<_>>()
            .join(",");
        record.push_field(sub_sets.as_bytes());
        push_fdr(&mut record, &protein.fdr);
        record
    }

    pub fn write_proteins(&self, proteins: &[&ReportProtein]) -> anyhow::Result<String> {
        let mut headers = vec![
            "protein_id",
            "accessions",
            "score",
            "rank",
            "decoy",
            "nr_peptides",
            "nr_psms",
            "nr_spectra",
            "nr_unique_peptides",
            "coverage",
            "sub_sets",
        ];
        headers.extend(FDR_HEADERS);
        self.write_records(
            "proteins.pia.tsv",
            headers,
            proteins.iter().map(|p| self.serialize_protein(p)),
        )
    }

    pub fn serialize_peptide(&self, peptide: &ReportPeptide) -> ByteRecord {
        let mut record = ByteRecord::new();
        record.push_field(peptide.sequence.as_bytes());
        record.push_field(peptide.key.as_bytes());
        record.push_field(self.join_accessions(&peptide.accessions).as_bytes());
        record.push_field(itoa::Buffer::new().format(peptide.nr_psms()).as_bytes());
        record.push_field(itoa::Buffer::new().format(peptide.nr_spectra()).as_bytes());
        record.push_field(
            itoa::Buffer::new()
                .format(peptide.missed_cleavages())
                .as_bytes(),
        );
        push_bool(&mut record, peptide.unique());
        push_bool(&mut record, peptide.decoy);
        push_rank(&mut record, peptide.rank);
        push_fdr(&mut record, &peptide.fdr);
        record
    }

    pub fn write_peptides(&self, peptides: &[&ReportPeptide]) -> anyhow::Result<String> {
        let mut headers = vec![
            "sequence",
            "peptide_key",
            "accessions",
            "nr_psms",
            "nr_spectra",
            "missed_cleavages",
            "unique",
            "decoy",
            "rank",
        ];
        headers.extend(FDR_HEADERS);
        self.write_records(
            "peptides.pia.tsv",
            headers,
            peptides.iter().map(|p| self.serialize_peptide(p)),
        )
    }

    pub fn serialize_psm_set(&self, set: &ReportPsmSet) -> ByteRecord {
        let mut record = ByteRecord::new();
        record.push_field(set.sequence.as_bytes());
        record.push_field(set.key.as_bytes());
        record.push_field(itoa::Buffer::new().format(set.charge()).as_bytes());
        push_float(&mut record, set.mz());
        record.push_field(self.join_files(&set.files()).as_bytes());
        record.push_field(self.join_accessions(&set.accessions()).as_bytes());
        record.push_field(itoa::Buffer::new().format(set.psms.len()).as_bytes());
        push_bool(&mut record, set.unique());
        push_bool(&mut record, set.decoy);
        push_float(&mut record, set.average_fdr_score);
        push_rank(&mut record, set.rank);
        push_fdr(&mut record, &set.fdr);
        record
    }

    pub fn write_psm_sets(&self, sets: &[&ReportPsmSet]) -> anyhow::Result<String> {
        let mut headers = vec![
            "sequence",
            "psm_set_key",
            "charge",
            "mz",
            "files",
            "accessions",
            "nr_psms",
            "unique",
            "decoy",
            "average_fdr_score",
            "rank",
        ];
        headers.extend(FDR_HEADERS);
        self.write_records(
            "psm_sets.pia.tsv",
            headers,
            sets.iter().map(|s| self.serialize_psm_set(s)),
        )
    }

    pub fn write_parameters<T: serde::Serialize>(&self, path: &Path, parameters: &T) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(parameters)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
