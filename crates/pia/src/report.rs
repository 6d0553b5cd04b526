//! Report items: read-only views of the evidence graph at PSM, PSM set,
//! peptide and protein level, carrying FDR statistics and ranks.

use crate::fdr::{FdrItem, FdrStats};
use crate::fdr_score::CombinedFdrItem;
use crate::graph::*;
use crate::score::{compare_scores, ScoreKind, ScoreModel};
use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decimal places of m/z values used in identification keys
pub const MZ_PRECISION: usize = 4;

/// Which PSM properties make two PSMs "the same identification". PSMs from
/// different input files with identical keys are merged into one
/// [`ReportPsmSet`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsmSetSettings {
    pub mz: bool,
    pub rt: bool,
    pub source_id: bool,
    pub title: bool,
    pub sequence: bool,
    pub modifications: bool,
    pub charge: bool,
    pub file: bool,
}

impl Default for PsmSetSettings {
    fn default() -> Self {
        Self {
            mz: true,
            rt: true,
            source_id: false,
            title: false,
            sequence: true,
            modifications: true,
            charge: true,
            file: false,
        }
    }
}

impl PsmSetSettings {
    /// Key built from the enabled properties in a fixed order, joined by `:`.
    /// Missing values are skipped.
    pub fn identification_key(&self, psm: &Psm) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(8);
        if self.charge {
            parts.push(psm.charge.to_string());
        }
        if self.file {
            parts.push(psm.file.0.to_string());
        }
        if self.mz {
            parts.push(format!("{:.*}", MZ_PRECISION, psm.mz));
        }
        if self.modifications {
            parts.push(psm.modification_string());
        }
        if self.rt {
            if let Some(rt) = psm.rt {
                parts.push((rt.round() as i64).to_string());
            }
        }
        if self.sequence {
            parts.push(psm.sequence.clone());
        }
        if self.source_id {
            if let Some(id) = &psm.source_id {
                parts.push(id.clone());
            }
        }
        if self.title {
            if let Some(title) = &psm.title {
                parts.push(title.clone());
            }
        }
        parts.join(":")
    }

    /// Key identifying the spectrum, independent of the assigned peptide
    pub fn spectrum_key(&self, psm: &Psm) -> String {
        Self {
            sequence: false,
            modifications: false,
            ..*self
        }
        .identification_key(psm)
    }
}

/// Best value of the named score among `values`; NaN if there is none.
///
/// Without a known comparison direction there is no "best": the value is
/// only reported when all valid values agree, NaN otherwise.
pub fn best_value<I: IntoIterator<Item = f64>>(values: I, name: &str) -> f64 {
    let mut values = values.into_iter().filter(|v| !v.is_nan());
    let higher = ScoreKind::from_short_name(name).and_then(|kind| kind.higher_score_better());
    match higher {
        Some(higher) => values
            .min_by(|a, b| compare_scores(*a, *b, higher))
            .unwrap_or(f64::NAN),
        None => match values.next() {
            Some(first) if values.all(|v| v == first) => first,
            _ => f64::NAN,
        },
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ReportPsm {
    pub psm: PsmIx,
    pub file: FileIx,
    pub sequence: String,
    pub peptide_key: String,
    pub identification_key: String,
    pub spectrum_key: String,
    pub charge: i32,
    pub mz: f64,
    pub delta_mass: f64,
    pub rt: Option<f64>,
    pub missed_cleavages: i32,
    pub accessions: Vec<AccessionIx>,
    pub unique: bool,
    pub decoy: bool,
    pub scores: Vec<ScoreModel>,
    pub fdr: FdrStats,
    pub rank: Option<u32>,
}

impl ReportPsm {
    pub fn new(
        graph: &EvidenceGraph,
        ix: PsmIx,
        settings: &PsmSetSettings,
        consider_modifications: bool,
    ) -> Self {
        let psm = &graph[ix];
        let accessions = graph[psm.peptide].accessions();
        Self {
            psm: ix,
            file: psm.file,
            sequence: psm.sequence.clone(),
            peptide_key: psm.peptide_key(consider_modifications),
            identification_key: settings.identification_key(psm),
            spectrum_key: settings.spectrum_key(psm),
            charge: psm.charge,
            mz: psm.mz,
            delta_mass: psm.delta_mass,
            rt: psm.rt,
            missed_cleavages: psm.missed_cleavages,
            unique: psm.unique.unwrap_or(accessions.len() == 1),
            accessions,
            decoy: psm.decoy.unwrap_or(false),
            scores: psm.scores.clone(),
            fdr: FdrStats::default(),
            rank: None,
        }
    }
}

impl FdrItem for ReportPsm {
    fn score(&self, short_name: &str) -> f64 {
        match ScoreKind::from_short_name(short_name) {
            Some(ScoreKind::PsmFdrScore) => self.fdr.fdr_score,
            Some(ScoreKind::PsmQValue) => self.fdr.q_value,
            _ => self
                .scores
                .iter()
                .find(|s| s.short_name() == short_name)
                .map(|s| s.value)
                .unwrap_or(f64::NAN),
        }
    }

    fn is_decoy(&self) -> bool {
        self.decoy
    }

    fn fdr_stats(&self) -> &FdrStats {
        &self.fdr
    }

    fn fdr_stats_mut(&mut self) -> &mut FdrStats {
        &mut self.fdr
    }
}

/// PSMs sharing one identification key, usually the same spectrum identified
/// by several search engines
#[derive(Clone, Debug, Serialize)]
pub struct ReportPsmSet {
    pub key: String,
    pub sequence: String,
    pub peptide_key: String,
    pub psms: Vec<ReportPsm>,
    pub decoy: bool,
    pub average_fdr_score: f64,
    pub fdr: FdrStats,
    pub rank: Option<u32>,
}

impl ReportPsmSet {
    pub fn new(first: ReportPsm) -> Self {
        Self {
            key: first.identification_key.clone(),
            sequence: first.sequence.clone(),
            peptide_key: first.peptide_key.clone(),
            decoy: first.decoy,
            psms: vec![first],
            average_fdr_score: f64::NAN,
            fdr: FdrStats::default(),
            rank: None,
        }
    }

    pub fn push(&mut self, psm: ReportPsm) {
        self.decoy &= psm.decoy;
        self.psms.push(psm);
    }

    /// Re-derive the decoy state from the member PSMs
    pub fn update_decoy(&mut self) {
        self.decoy = !self.psms.is_empty() && self.psms.iter().all(|p| p.decoy);
    }

    pub fn files(&self) -> Vec<FileIx> {
        let mut files = self.psms.iter().map(|p| p.file).collect::<Vec<_>>();
        files.sort_unstable();
        files.dedup();
        files
    }

    pub fn accessions(&self) -> Vec<AccessionIx> {
        let mut accessions = self
            .psms
            .iter()
            .flat_map(|p| p.accessions.iter().copied())
            .collect::<Vec<_>>();
        accessions.sort_unstable();
        accessions.dedup();
        accessions
    }

    pub fn spectrum_keys(&self) -> FnvHashSet<&str> {
        self.psms.iter().map(|p| p.spectrum_key.as_str()).collect()
    }

    pub fn charge(&self) -> i32 {
        self.psms.first().map(|p| p.charge).unwrap_or(0)
    }

    pub fn mz(&self) -> f64 {
        self.psms.first().map(|p| p.mz).unwrap_or(f64::NAN)
    }

    pub fn unique(&self) -> bool {
        self.psms.iter().all(|p| p.unique)
    }
}

impl FdrItem for ReportPsmSet {
    fn score(&self, short_name: &str) -> f64 {
        match ScoreKind::from_short_name(short_name) {
            Some(ScoreKind::AverageFdrScore) => self.average_fdr_score,
            Some(ScoreKind::PsmCombinedFdrScore) | Some(ScoreKind::PsmFdrScore) => {
                self.fdr.fdr_score
            }
            Some(ScoreKind::PsmQValue) => self.fdr.q_value,
            _ => best_value(self.psms.iter().map(|p| p.score(short_name)), short_name),
        }
    }

    fn is_decoy(&self) -> bool {
        self.decoy
    }

    fn fdr_stats(&self) -> &FdrStats {
        &self.fdr
    }

    fn fdr_stats_mut(&mut self) -> &mut FdrStats {
        &mut self.fdr
    }
}

impl CombinedFdrItem for ReportPsmSet {
    fn file_fdr_scores(&self) -> Vec<(u32, f64)> {
        self.psms
            .iter()
            .map(|p| (p.file.0, p.fdr.fdr_score))
            .collect()
    }

    fn set_average_fdr_score(&mut self, score: f64) {
        self.average_fdr_score = score;
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ReportPeptide {
    pub key: String,
    pub sequence: String,
    pub peptide: PeptideIx,
    pub accessions: Vec<AccessionIx>,
    pub psm_sets: Vec<ReportPsmSet>,
    pub decoy: bool,
    pub fdr: FdrStats,
    pub rank: Option<u32>,
}

impl ReportPeptide {
    pub fn new(set: ReportPsmSet, peptide: PeptideIx) -> Self {
        Self {
            key: set.peptide_key.clone(),
            sequence: set.sequence.clone(),
            peptide,
            accessions: set.accessions(),
            decoy: set.decoy,
            psm_sets: vec![set],
            fdr: FdrStats::default(),
            rank: None,
        }
    }

    pub fn push(&mut self, set: ReportPsmSet) {
        for acc in set.accessions() {
            if let Err(pos) = self.accessions.binary_search(&acc) {
                self.accessions.insert(pos, acc);
            }
        }
        self.decoy &= set.decoy;
        self.psm_sets.push(set);
    }

    pub fn update_decoy(&mut self) {
        self.decoy = !self.psm_sets.is_empty() && self.psm_sets.iter().all(|s| s.decoy);
    }

    pub fn psms(&self) -> impl Iterator<Item = &ReportPsm> {
        self.psm_sets.iter().flat_map(|s| s.psms.iter())
    }

    pub fn nr_psms(&self) -> usize {
        self.psm_sets.iter().map(|s| s.psms.len()).sum()
    }

    pub fn spectrum_keys(&self) -> FnvHashSet<&str> {
        self.psms().map(|p| p.spectrum_key.as_str()).collect()
    }

    pub fn nr_spectra(&self) -> usize {
        self.spectrum_keys().len()
    }

    pub fn unique(&self) -> bool {
        self.accessions.len() == 1
    }

    pub fn missed_cleavages(&self) -> i32 {
        self.psms().map(|p| p.missed_cleavages).max().unwrap_or(0)
    }
}

impl FdrItem for ReportPeptide {
    fn score(&self, short_name: &str) -> f64 {
        match ScoreKind::from_short_name(short_name) {
            Some(ScoreKind::PeptideFdrScore) => self.fdr.fdr_score,
            Some(ScoreKind::PeptideQValue) => self.fdr.q_value,
            _ => best_value(self.psm_sets.iter().map(|s| s.score(short_name)), short_name),
        }
    }

    fn is_decoy(&self) -> bool {
        self.decoy
    }

    fn fdr_stats(&self) -> &FdrStats {
        &self.fdr
    }

    fn fdr_stats_mut(&mut self) -> &mut FdrStats {
        &mut self.fdr
    }
}

/// Merge PSMs sharing an identification key into sets, in first-seen order
pub fn merge_psm_sets<I: IntoIterator<Item = ReportPsm>>(psms: I) -> Vec<ReportPsmSet> {
    let mut index: FnvHashMap<String, usize> = FnvHashMap::default();
    let mut sets: Vec<ReportPsmSet> = Vec::new();
    for psm in psms {
        match index.get(&psm.identification_key) {
            Some(&ix) => sets[ix].push(psm),
            None => {
                index.insert(psm.identification_key.clone(), sets.len());
                sets.push(ReportPsmSet::new(psm));
            }
        }
    }
    sets
}

/// Merge PSM sets sharing a peptide key into peptides, in first-seen order
pub fn merge_peptides<I: IntoIterator<Item = ReportPsmSet>>(
    graph: &EvidenceGraph,
    sets: I,
) -> Vec<ReportPeptide> {
    let mut index: FnvHashMap<String, usize> = FnvHashMap::default();
    let mut peptides: Vec<ReportPeptide> = Vec::new();
    for set in sets {
        let peptide = match set.psms.first() {
            Some(psm) => graph[psm.psm].peptide,
            None => continue,
        };
        match index.get(&set.peptide_key) {
            Some(&ix) => peptides[ix].push(set),
            None => {
                index.insert(set.peptide_key.clone(), peptides.len());
                peptides.push(ReportPeptide::new(set, peptide));
            }
        }
    }
    peptides
}

/// Sorted, non-overlapping covered ranges of one protein sequence. Inserted
/// ranges are merged with every overlapping or adjacent range.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
    intervals: BTreeMap<u32, u32>,
}

impl Coverage {
    /// Insert the 1-based inclusive range `[start, end]`
    pub fn insert(&mut self, start: u32, end: u32) {
        let (mut start, mut end) = (start.min(end), start.max(end));
        let absorbed = self
            .intervals
            .range(..=end.saturating_add(1))
            .rev()
            .take_while(|(_, e)| e.saturating_add(1) >= start)
            .map(|(s, e)| (*s, *e))
            .collect::<Vec<_>>();
        for (s, e) in absorbed {
            self.intervals.remove(&s);
            start = start.min(s);
            end = end.max(e);
        }
        self.intervals.insert(start, end);
    }

    pub fn intervals(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.intervals.iter().map(|(s, e)| (*s, *e))
    }

    pub fn covered_residues(&self) -> u32 {
        self.intervals.iter().map(|(s, e)| e - s + 1).sum()
    }

    pub fn fraction(&self, sequence_length: usize) -> f64 {
        match sequence_length {
            0 => f64::NAN,
            len => self.covered_residues() as f64 / len as f64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ReportProtein {
    pub id: u32,
    pub cluster: ClusterIx,
    pub accessions: Vec<AccessionIx>,
    pub peptides: Vec<ReportPeptide>,
    pub sub_sets: Vec<ReportProtein>,
    pub score: f64,
    pub decoy: bool,
    pub coverage: BTreeMap<AccessionIx, Coverage>,
    pub fdr: FdrStats,
    pub rank: Option<u32>,
}

impl ReportProtein {
    pub fn new(cluster: ClusterIx, accessions: Vec<AccessionIx>, peptides: Vec<ReportPeptide>) -> Self {
        Self {
            id: 0,
            cluster,
            accessions,
            peptides,
            sub_sets: Vec::new(),
            score: f64::NAN,
            decoy: false,
            coverage: BTreeMap::new(),
            fdr: FdrStats::default(),
            rank: None,
        }
    }

    pub fn nr_peptides(&self) -> usize {
        self.peptides.len()
    }

    pub fn nr_psms(&self) -> usize {
        self.peptides.iter().map(|p| p.nr_psms()).sum()
    }

    pub fn nr_spectra(&self) -> usize {
        self.peptides
            .iter()
            .flat_map(|p| p.spectrum_keys())
            .collect::<FnvHashSet<_>>()
            .len()
    }

    /// Peptides that occur in no other accession than the ones of this protein
    pub fn nr_unique_peptides(&self) -> usize {
        self.peptides
            .iter()
            .filter(|p| p.accessions.iter().all(|a| self.accessions.contains(a)))
            .count()
    }

    pub fn peptide_ixs(&self) -> Vec<PeptideIx> {
        let mut ixs = self.peptides.iter().map(|p| p.peptide).collect::<Vec<_>>();
        ixs.sort_unstable();
        ixs.dedup();
        ixs
    }

    /// Rebuild the coverage of every accession with a known sequence from the
    /// positions of this protein's peptides
    pub fn update_coverage(&mut self, graph: &EvidenceGraph) {
        self.coverage.clear();
        for acc in &self.accessions {
            if graph[*acc].sequence.is_none() {
                continue;
            }
            let mut coverage = Coverage::default();
            for peptide in &self.peptides {
                for occ in &graph[peptide.peptide].occurrences {
                    if let (true, Some((start, end))) = (occ.accession == *acc, occ.position) {
                        coverage.insert(start, end);
                    }
                }
            }
            self.coverage.insert(*acc, coverage);
        }
        for sub in self.sub_sets.iter_mut() {
            sub.update_coverage(graph);
        }
    }

    pub fn coverage_fraction(&self, graph: &EvidenceGraph, accession: AccessionIx) -> Option<f64> {
        let sequence = graph[accession].sequence.as_ref()?;
        self.coverage
            .get(&accession)
            .map(|c| c.fraction(sequence.chars().count()))
    }

    pub fn update_decoy(&mut self) {
        self.decoy = !self.peptides.is_empty() && self.peptides.iter().all(|p| p.decoy);
    }

    pub fn accession_names<'g>(&self, graph: &'g EvidenceGraph) -> Vec<&'g str> {
        self.accessions
            .iter()
            .map(|a| graph[*a].accession.as_str())
            .collect()
    }
}

impl FdrItem for ReportProtein {
    fn score(&self, short_name: &str) -> f64 {
        match ScoreKind::from_short_name(short_name) {
            Some(ScoreKind::ProteinScore) => self.score,
            Some(ScoreKind::ProteinQValue) => self.fdr.q_value,
            _ => f64::NAN,
        }
    }

    fn is_decoy(&self) -> bool {
        self.decoy
    }

    fn fdr_stats(&self) -> &FdrStats {
        &self.fdr
    }

    fn fdr_stats_mut(&mut self) -> &mut FdrStats {
        &mut self.fdr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn coverage_merges() {
        let mut coverage = Coverage::default();
        coverage.insert(10, 20);
        coverage.insert(30, 40);
        assert_eq!(coverage.intervals().collect::<Vec<_>>(), vec![(10, 20), (30, 40)]);

        // adjacent
        coverage.insert(21, 25);
        assert_eq!(coverage.intervals().collect::<Vec<_>>(), vec![(10, 25), (30, 40)]);

        // bridging both
        coverage.insert(24, 31);
        assert_eq!(coverage.intervals().collect::<Vec<_>>(), vec![(10, 40)]);

        coverage.insert(1, 3);
        assert_eq!(coverage.covered_residues(), 34);
        assert!((coverage.fraction(68) - 0.5).abs() < 1e-12);
    }

    fn naive(ranges: &[(u32, u32)]) -> Vec<bool> {
        let mut covered = vec![false; 300];
        for &(s, e) in ranges {
            for pos in s.min(e)..=s.max(e) {
                covered[pos as usize] = true;
            }
        }
        covered
    }

    #[quickcheck]
    fn coverage_is_idempotent_and_exact(ranges: Vec<(u8, u8)>) -> bool {
        let ranges = ranges
            .into_iter()
            .map(|(s, e)| (s as u32 + 1, e as u32 + 1))
            .collect::<Vec<_>>();
        let mut once = Coverage::default();
        let mut twice = Coverage::default();
        for &(s, e) in &ranges {
            once.insert(s, e);
            twice.insert(s, e);
            twice.insert(s, e);
        }

        let mut covered = vec![false; 300];
        for (s, e) in once.intervals() {
            for pos in s..=e {
                covered[pos as usize] = true;
            }
        }
        let disjoint = once
            .intervals()
            .collect::<Vec<_>>()
            .windows(2)
            .all(|w| w[0].1 + 1 < w[1].0);

        once == twice && covered == naive(&ranges) && disjoint
    }

    #[test]
    fn identification_keys() {
        let psm = Psm {
            charge: 2,
            mz: 512.123456,
            rt: Some(1203.7),
            sequence: "PEPTIDE".into(),
            source_id: Some("index=17".into()),
            ..Default::default()
        };
        let settings = PsmSetSettings::default();
        assert_eq!(settings.identification_key(&psm), "2:512.1235::1204:PEPTIDE");
        assert_eq!(settings.spectrum_key(&psm), "2:512.1235:1204");

        let settings = PsmSetSettings {
            mz: false,
            rt: false,
            source_id: true,
            ..Default::default()
        };
        assert_eq!(settings.identification_key(&psm), "2::PEPTIDE:index=17");
    }

    #[test]
    fn best_values() {
        assert_eq!(best_value(vec![1.0, f64::NAN, 3.0], "mascot_score"), 3.0);
        assert_eq!(best_value(vec![1.0, f64::NAN, 3.0], "mascot_expect"), 1.0);
        assert!(best_value(vec![], "mascot_expect").is_nan());
        assert!(best_value(vec![f64::NAN], "mascot_score").is_nan());
    }

    #[test]
    fn best_value_without_direction() {
        assert_eq!(best_value(vec![0.2, f64::NAN, 0.2], "sequest_probability"), 0.2);
        assert!(best_value(vec![0.1, 0.9], "sequest_probability").is_nan());
        assert!(best_value(vec![1.0, 2.0], "my_score").is_nan());
        assert_eq!(best_value(vec![2.0], "my_score"), 2.0);
    }
}
