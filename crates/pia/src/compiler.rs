//! Compilation context used by format parsers to merge identifications from
//! several input files into one [`EvidenceGraph`].

use crate::error::{Error, GraphError};
use crate::graph::*;
use crate::score::ScoreModel;
use fnv::FnvHashMap;
use log::{info, warn};
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IssueKind {
    MalformedModification,
    MissingProteinEvidence,
    InvalidSpectrumMatch,
    ConflictingSequence,
}

/// Recoverable problems found while ingesting parser output. The offending
/// items were dropped (or left without protein evidence).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParserIssues {
    counts: BTreeMap<IssueKind, usize>,
}

impl ParserIssues {
    pub fn count(&self, kind: IssueKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn add(&mut self, kind: IssueKind) {
        *self.counts.entry(kind).or_default() += 1;
    }
}

/// A spectrum match as handed over by a parser
#[derive(Clone, Debug, Default)]
pub struct NewSpectrumMatch {
    pub charge: i32,
    pub mz: f64,
    pub delta_mass: f64,
    pub rt: Option<f64>,
    pub sequence: String,
    pub missed_cleavages: i32,
    pub source_id: Option<String>,
    pub title: Option<String>,
    pub file: FileIx,
    pub protocol: Option<String>,
    pub decoy: Option<bool>,
    pub modifications: BTreeMap<u32, Modification>,
    pub scores: Vec<ScoreModel>,
}

/// Owns the lookup tables of one compilation run. Dropped (via [`Compiler::finish`])
/// once every input file has been merged.
#[derive(Default)]
pub struct Compiler {
    graph: EvidenceGraph,
    accessions: FnvHashMap<String, AccessionIx>,
    peptides: FnvHashMap<String, PeptideIx>,
    issues: ParserIssues,
}

impl Compiler {
    pub fn insert_file<S: Into<String>>(&mut self, name: S, path: S, format: Option<S>) -> FileIx {
        self.graph.files.push(InputFile {
            name: name.into(),
            path: path.into(),
            format: format.map(Into::into),
        });
        FileIx(self.graph.files.len() as u32 - 1)
    }

    /// Insert an accession, or return the existing one. A previously unknown
    /// sequence is filled in.
    pub fn insert_accession(&mut self, accession: &str, sequence: Option<&str>) -> AccessionIx {
        let sequence = sequence.filter(|s| !s.is_empty());
        if let Some(&ix) = self.accessions.get(accession) {
            let known = self.graph.accessions[ix.0 as usize].sequence.clone();
            match (known, sequence) {
                (None, Some(seq)) => {
                    self.graph.accessions[ix.0 as usize].sequence = Some(seq.to_string())
                }
                (Some(known), Some(seq)) if known != seq => {
                    self.report_issue(
                        IssueKind::ConflictingSequence,
                        format!("accession `{}` was given a different sequence", accession),
                    );
                }
                _ => {}
            }
            return ix;
        }

        let ix = AccessionIx(self.graph.accessions.len() as u32);
        self.graph.accessions.push(Accession {
            accession: accession.to_string(),
            sequence: sequence.map(String::from),
            ..Default::default()
        });
        self.accessions.insert(accession.to_string(), ix);
        ix
    }

    fn check_file(&self, file: FileIx, entity: impl FnOnce() -> String) -> Result<(), GraphError> {
        match (file.0 as usize) < self.graph.files.len() {
            true => Ok(()),
            false => Err(GraphError::UnknownFile {
                entity: entity(),
                file,
            }),
        }
    }

    pub fn add_accession_file(
        &mut self,
        accession: AccessionIx,
        file: FileIx,
        description: Option<&str>,
    ) -> Result<(), GraphError> {
        let entry = self.accession_mut(accession)?;
        let name = entry.accession.clone();
        self.check_file(file, || format!("accession `{}`", name))?;

        let entry = &mut self.graph.accessions[accession.0 as usize];
        entry.files.insert(file);
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            entry.descriptions.insert(file, description.to_string());
        }
        Ok(())
    }

    pub fn add_accession_database<S: Into<String>>(
        &mut self,
        accession: AccessionIx,
        database: S,
    ) -> Result<(), GraphError> {
        self.accession_mut(accession)?
            .databases
            .insert(database.into());
        Ok(())
    }

    fn accession_mut(&mut self, accession: AccessionIx) -> Result<&mut Accession, GraphError> {
        self.graph
            .accessions
            .get_mut(accession.0 as usize)
            .ok_or_else(|| GraphError::UnresolvedReference {
                entity: "accession",
                id: accession.0 as u64,
            })
    }

    pub fn insert_peptide(&mut self, sequence: &str) -> PeptideIx {
        if let Some(&ix) = self.peptides.get(sequence) {
            return ix;
        }
        let ix = PeptideIx(self.graph.peptides.len() as u32);
        self.graph.peptides.push(Peptide {
            sequence: sequence.to_string(),
            ..Default::default()
        });
        self.peptides.insert(sequence.to_string(), ix);
        ix
    }

    /// Insert a spectrum match and link it to its peptide (created if needed).
    ///
    /// Returns `Ok(None)` if the match was malformed and dropped; an unknown
    /// input file is a hard error.
    pub fn insert_spectrum_match(
        &mut self,
        psm: NewSpectrumMatch,
    ) -> Result<Option<PsmIx>, GraphError> {
        let next = self.graph.psms.len();
        self.check_file(psm.file, || format!("spectrum match {}", next))?;

        if psm.sequence.is_empty() {
            self.report_issue(
                IssueKind::InvalidSpectrumMatch,
                format!("spectrum match {:?} has no sequence", psm.title),
            );
            return Ok(None);
        }
        if psm.mz.is_nan() || psm.charge == 0 {
            self.report_issue(
                IssueKind::InvalidSpectrumMatch,
                format!(
                    "spectrum match `{}` has charge {} and m/z {}",
                    psm.sequence, psm.charge, psm.mz
                ),
            );
            return Ok(None);
        }
        let len = psm.sequence.chars().count() as u32;
        if let Some(pos) = psm.modifications.keys().find(|&&pos| pos > len + 1) {
            self.report_issue(
                IssueKind::MalformedModification,
                format!(
                    "modification at position {} is outside of `{}`",
                    pos, psm.sequence
                ),
            );
            return Ok(None);
        }

        let peptide = self.insert_peptide(&psm.sequence);
        let ix = PsmIx(next as u32);
        self.graph.psms.push(Psm {
            charge: psm.charge,
            mz: psm.mz,
            delta_mass: psm.delta_mass,
            rt: psm.rt,
            sequence: psm.sequence,
            missed_cleavages: psm.missed_cleavages,
            source_id: psm.source_id,
            title: psm.title,
            file: psm.file,
            protocol: psm.protocol,
            decoy: psm.decoy,
            unique: None,
            modifications: psm.modifications,
            scores: psm.scores,
            peptide,
        });
        self.graph.peptides[peptide.0 as usize].psms.push(ix);
        Ok(Some(ix))
    }

    /// Record that `peptide` was found in `accession`. Duplicate occurrences are
    /// ignored.
    pub fn add_occurrence(
        &mut self,
        peptide: PeptideIx,
        accession: AccessionIx,
        position: Option<(u32, u32)>,
    ) -> Result<(), GraphError> {
        let sequence = self
            .graph
            .peptides
            .get(peptide.0 as usize)
            .map(|p| p.sequence.clone())
            .ok_or(GraphError::UnresolvedReference {
                entity: "peptide",
                id: peptide.0 as u64,
            })?;
        if accession.0 as usize >= self.graph.accessions.len() {
            return Err(GraphError::UnknownAccession {
                peptide: sequence,
                accession,
            });
        }
        let occurrence = Occurrence {
            accession,
            position,
        };
        let occurrences = &mut self.graph.peptides[peptide.0 as usize].occurrences;
        if !occurrences.contains(&occurrence) {
            occurrences.push(occurrence);
        }
        Ok(())
    }

    /// Find every position of the peptide inside the accession's sequence and
    /// record them. Accessions with unknown sequence get a position-less
    /// occurrence. Returns the number of recorded positions.
    pub fn locate_occurrences(
        &mut self,
        peptide: PeptideIx,
        accession: AccessionIx,
    ) -> Result<usize, GraphError> {
        let sequence = self
            .graph
            .accessions
            .get(accession.0 as usize)
            .and_then(|acc| acc.sequence.clone());
        let needle = match self.graph.peptides.get(peptide.0 as usize) {
            Some(p) => p.sequence.clone(),
            None => {
                return Err(GraphError::UnresolvedReference {
                    entity: "peptide",
                    id: peptide.0 as u64,
                })
            }
        };

        let haystack = match sequence {
            Some(seq) => seq,
            None => {
                self.add_occurrence(peptide, accession, None)?;
                return Ok(0);
            }
        };

        let positions = find_all(&haystack, &needle);
        if positions.is_empty() {
            self.report_issue(
                IssueKind::MissingProteinEvidence,
                format!(
                    "peptide `{}` not found in the sequence of `{}`",
                    needle, self.graph.accessions[accession.0 as usize].accession
                ),
            );
        }
        for &(start, end) in &positions {
            self.add_occurrence(peptide, accession, Some((start, end)))?;
        }
        Ok(positions.len())
    }

    pub fn report_issue<S: AsRef<str>>(&mut self, kind: IssueKind, message: S) {
        warn!("{:?}: {}", kind, message.as_ref());
        self.issues.add(kind);
    }

    pub fn issues(&self) -> &ParserIssues {
        &self.issues
    }

    /// Borrow the graph under construction, e.g. for parsers looking up
    /// previously inserted entities
    pub fn graph(&self) -> &EvidenceGraph {
        &self.graph
    }

    /// Finish the compilation: count spectrum matches without protein evidence
    /// and build the cluster structure.
    pub fn finish(mut self) -> Result<(EvidenceGraph, ParserIssues), Error> {
        let time = Instant::now();
        let orphaned = self
            .graph
            .peptides
            .iter()
            .filter(|p| p.occurrences.is_empty())
            .map(|p| (p.sequence.clone(), p.psms.len()))
            .collect::<Vec<_>>();
        for (sequence, psms) in orphaned {
            self.report_issue(
                IssueKind::MissingProteinEvidence,
                format!("peptide `{}` ({} PSMs) has no protein evidence", sequence, psms),
            );
        }

        self.graph.build_clusters()?;
        info!(
            "compiled {} files, {} accessions, {} peptides, {} PSMs in {}ms ({} parser issues)",
            self.graph.files.len(),
            self.graph.accessions.len(),
            self.graph.peptides.len(),
            self.graph.psms.len(),
            time.elapsed().as_millis(),
            self.issues.total()
        );
        Ok((self.graph, self.issues))
    }
}

/// All (possibly overlapping) 1-based inclusive residue positions of `needle`
/// in `haystack`. Positions count characters, not bytes.
fn find_all(haystack: &str, needle: &str) -> Vec<(u32, u32)> {
    let step = match needle.chars().next() {
        Some(first) => first.len_utf8(),
        None => return Vec::new(),
    };
    let length = needle.chars().count() as u32;

    let mut positions = Vec::new();
    let (mut from, mut residue, mut counted) = (0, 0, 0);
    while let Some(offset) = haystack.get(from..).and_then(|rest| rest.find(needle)) {
        let start = from + offset;
        residue += haystack[counted..start].chars().count() as u32;
        counted = start;
        positions.push((residue + 1, residue + length));
        from = start + step;
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions() {
        assert_eq!(find_all("MPEPTIDEKPEPTIDE", "PEPTIDE"), vec![(2, 8), (10, 16)]);
        assert_eq!(find_all("AAAA", "AA"), vec![(1, 2), (2, 3), (3, 4)]);
        assert!(find_all("AAAA", "K").is_empty());
        assert!(find_all("AAAA", "").is_empty());
    }

    #[test]
    fn positions_count_residues() {
        assert_eq!(find_all("ÉÉK", "É"), vec![(1, 1), (2, 2)]);
        assert_eq!(find_all("ÉÉK", "ÉK"), vec![(2, 3)]);
        assert_eq!(find_all("ßPEPÉPEP", "PEP"), vec![(2, 4), (6, 8)]);
    }

    #[test]
    fn non_ascii_sequences() -> Result<(), Error> {
        let mut compiler = Compiler::default();
        compiler.insert_file("run", "run.mzid", None);
        let acc = compiler.insert_accession("X", Some("ÉÉK"));
        let peptide = compiler.insert_peptide("É");
        assert_eq!(compiler.locate_occurrences(peptide, acc)?, 2);
        let positions = compiler.graph()[peptide]
            .occurrences
            .iter()
            .map(|occ| occ.position)
            .collect::<Vec<_>>();
        assert_eq!(positions, vec![Some((1, 1)), Some((2, 2))]);
        Ok(())
    }

    #[test]
    fn merge_and_issues() -> Result<(), Error> {
        let mut compiler = Compiler::default();
        let file = compiler.insert_file("run1", "run1.mzid", None);
        let acc = compiler.insert_accession("P1", None);
        assert_eq!(compiler.insert_accession("P1", Some("MPEPTIDEK")), acc);
        assert_eq!(
            compiler.graph()[acc].sequence.as_deref(),
            Some("MPEPTIDEK")
        );
        compiler.add_accession_file(acc, file, Some("Protein 1"))?;

        let psm = compiler
            .insert_spectrum_match(NewSpectrumMatch {
                charge: 2,
                mz: 400.0,
                sequence: "PEPTIDE".into(),
                file,
                ..Default::default()
            })?
            .unwrap();
        let peptide = compiler.graph()[psm].peptide;
        assert_eq!(compiler.locate_occurrences(peptide, acc)?, 1);
        assert_eq!(compiler.locate_occurrences(peptide, acc)?, 1);
        assert_eq!(compiler.graph()[peptide].occurrences.len(), 1);

        let dropped = compiler.insert_spectrum_match(NewSpectrumMatch {
            charge: 2,
            mz: 400.0,
            file,
            ..Default::default()
        })?;
        assert!(dropped.is_none());

        let unknown = compiler.insert_spectrum_match(NewSpectrumMatch {
            charge: 2,
            mz: 400.0,
            sequence: "PEPTIDE".into(),
            file: FileIx(4),
            ..Default::default()
        });
        assert!(matches!(unknown, Err(GraphError::UnknownFile { .. })));

        // A second peptide without any protein evidence
        compiler.insert_spectrum_match(NewSpectrumMatch {
            charge: 3,
            mz: 500.0,
            sequence: "ORPHAN".into(),
            file,
            ..Default::default()
        })?;

        let (graph, issues) = compiler.finish()?;
        assert_eq!(issues.count(IssueKind::InvalidSpectrumMatch), 1);
        assert_eq!(issues.count(IssueKind::MissingProteinEvidence), 1);
        assert_eq!(graph.clusters().len(), 1);
        assert_eq!(graph.orphan_peptides().len(), 1);
        Ok(())
    }
}
