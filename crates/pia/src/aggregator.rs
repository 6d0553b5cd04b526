//! The report facade over a compiled evidence graph.
//!
//! All report collections are built lazily and cached. Changing a setting
//! that a collection depends on drops the cache; it is rebuilt on the next
//! read. FDR estimation and inference always work on one fully materialized
//! list.

use crate::error::{ConfigError, Error};
use crate::fdr::{calculate_fdr, DecoyStrategy, FdrData, FdrResults, FdrSettings};
use crate::fdr_score::{calculate_combined_fdr_score, calculate_fdr_score};
use crate::filter::{passes, Filter, PeptideFilter, ProteinFilter, PsmFilter};
use crate::graph::{AccessionIx, EvidenceGraph, FileIx, PsmIx};
use crate::inference::{CancellationToken, Inference, InferenceProgress};
use crate::rank::calculate_ranking;
use crate::report::{
    merge_peptides, merge_psm_sets, PsmSetSettings, ReportPeptide, ReportProtein, ReportPsm,
    ReportPsmSet,
};
use crate::score::ScoreName;
use fnv::FnvHashMap;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Either the merged overview of all input files, or a single file
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileScope {
    All,
    File(FileIx),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FdrLevel {
    Psm,
    Peptide,
    Protein,
}

impl FdrLevel {
    pub fn name(&self) -> &'static str {
        match self {
            FdrLevel::Psm => "PSM",
            FdrLevel::Peptide => "peptide",
            FdrLevel::Protein => "protein",
        }
    }
}

/// Filter lists of every report level
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelFilters {
    pub psm: Vec<Filter<PsmFilter>>,
    pub peptide: Vec<Filter<PeptideFilter>>,
    pub protein: Vec<Filter<ProteinFilter>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProteinSortField {
    Score,
    QValue,
    Rank,
    NrPeptides,
    NrPsms,
    NrSpectra,
    NrUniquePeptides,
    Accession,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: ProteinSortField,
    #[serde(default)]
    pub descending: bool,
}

/// Decoy state of something explained by `accessions`: all of them must
/// match the pattern
fn accessions_decoy(graph: &EvidenceGraph, data: &FdrData, accessions: &[AccessionIx]) -> bool {
    !accessions.is_empty()
        && accessions
            .iter()
            .all(|acc| data.is_decoy_accession(&graph[*acc].accession))
}

/// Decoy state as flagged by the search engine: all PSMs must be decoys
fn engine_decoy<'a, I: IntoIterator<Item = &'a ReportPsm>>(graph: &EvidenceGraph, psms: I) -> bool {
    let mut any = false;
    for psm in psms {
        any = true;
        if graph[psm.psm].decoy != Some(true) {
            return false;
        }
    }
    any
}

fn cmp_nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(&b),
    }
}

pub struct ReportAggregator {
    graph: EvidenceGraph,
    psm_set_settings: PsmSetSettings,
    consider_modifications: bool,

    psms: FnvHashMap<FileIx, Vec<ReportPsm>>,
    psm_sets: Option<Vec<ReportPsmSet>>,
    peptides: FnvHashMap<FileScope, Vec<ReportPeptide>>,
    proteins: Option<Vec<ReportProtein>>,
    fdr: FnvHashMap<(FdrLevel, FileScope), FdrData>,
    progress: Arc<InferenceProgress>,
}

impl ReportAggregator {
    pub fn new(graph: EvidenceGraph) -> Self {
        Self {
            graph,
            psm_set_settings: PsmSetSettings::default(),
            consider_modifications: false,
            psms: FnvHashMap::default(),
            psm_sets: None,
            peptides: FnvHashMap::default(),
            proteins: None,
            fdr: FnvHashMap::default(),
            progress: Arc::default(),
        }
    }

    pub fn graph(&self) -> &EvidenceGraph {
        &self.graph
    }

    pub fn psm_set_settings(&self) -> PsmSetSettings {
        self.psm_set_settings
    }

    pub fn consider_modifications(&self) -> bool {
        self.consider_modifications
    }

    /// Progress of the current or last protein inference. Clone the handle
    /// before starting an inference to observe it from another thread.
    pub fn progress(&self) -> Arc<InferenceProgress> {
        Arc::clone(&self.progress)
    }

    pub fn set_psm_set_settings(&mut self, settings: PsmSetSettings) {
        if settings != self.psm_set_settings {
            self.psm_set_settings = settings;
            self.invalidate_all();
        }
    }

    pub fn set_consider_modifications(&mut self, consider: bool) {
        if consider != self.consider_modifications {
            self.consider_modifications = consider;
            self.invalidate_all();
        }
    }

    fn invalidate_all(&mut self) {
        self.psms.clear();
        self.fdr.clear();
        self.invalidate_psm_sets();
    }

    /// PSM sets and everything built on top of them
    fn invalidate_psm_sets(&mut self) {
        self.psm_sets = None;
        self.fdr.remove(&(FdrLevel::Psm, FileScope::All));
        self.invalidate_peptides(FileScope::All);
    }

    fn invalidate_peptides(&mut self, scope: FileScope) {
        self.peptides.remove(&scope);
        self.fdr.remove(&(FdrLevel::Peptide, scope));
        if scope == FileScope::All {
            self.invalidate_proteins();
        }
    }

    fn invalidate_proteins(&mut self) {
        self.proteins = None;
        self.fdr.remove(&(FdrLevel::Protein, FileScope::All));
    }

    fn ensure_psms(&mut self, file: FileIx) {
        if self.psms.contains_key(&file) {
            return;
        }
        let psms = self
            .graph
            .psms
            .iter()
            .enumerate()
            .filter(|(_, psm)| psm.file == file)
            .map(|(ix, _)| {
                ReportPsm::new(
                    &self.graph,
                    PsmIx(ix as u32),
                    &self.psm_set_settings,
                    self.consider_modifications,
                )
            })
            .collect();
        self.psms.insert(file, psms);
    }

    fn ensure_psm_sets(&mut self) {
        if self.psm_sets.is_some() {
            return;
        }
        let time = Instant::now();
        let files = (0..self.graph.files.len() as u32).map(FileIx).collect::<Vec<_>>();
        for file in &files {
            self.ensure_psms(*file);
        }
        let psms = files
            .iter()
            .flat_map(|file| self.psms[file].iter().cloned())
            .collect::<Vec<_>>();
        let sets = merge_psm_sets(psms);
        info!(
            "- merged {} PSMs into {} PSM sets in {}ms",
            self.graph.psms.len(),
            sets.len(),
            time.elapsed().as_millis()
        );
        self.psm_sets = Some(sets);
    }

    fn ensure_peptides(&mut self, scope: FileScope) {
        if self.peptides.contains_key(&scope) {
            return;
        }
        let peptides = match scope {
            FileScope::All => {
                self.ensure_psm_sets();
                let sets = self.psm_sets.iter().flatten().cloned();
                merge_peptides(&self.graph, sets)
            }
            FileScope::File(file) => {
                self.ensure_psms(file);
                let sets = merge_psm_sets(self.psms[&file].iter().cloned());
                merge_peptides(&self.graph, sets)
            }
        };
        self.peptides.insert(scope, peptides);
    }

    /// PSMs of one file, or of every file
    pub fn report_psms(&mut self, scope: FileScope) -> Vec<&ReportPsm> {
        let files = match scope {
            FileScope::All => (0..self.graph.files.len() as u32).map(FileIx).collect(),
            FileScope::File(file) => vec![file],
        };
        for file in &files {
            self.ensure_psms(*file);
        }
        files
            .iter()
            .filter_map(|file| self.psms.get(file))
            .flatten()
            .collect()
    }

    pub fn report_psm_sets(&mut self) -> &[ReportPsmSet] {
        self.ensure_psm_sets();
        self.psm_sets.as_deref().unwrap_or(&[])
    }

    pub fn report_peptides(&mut self, scope: FileScope) -> &[ReportPeptide] {
        self.ensure_peptides(scope);
        self.peptides.get(&scope).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Inferred proteins; empty until [`Self::infer_proteins`] ran
    pub fn report_proteins(&self) -> &[ReportProtein] {
        self.proteins.as_deref().unwrap_or(&[])
    }

    pub fn fdr_data(&self, level: FdrLevel, scope: FileScope) -> Option<&FdrData> {
        self.fdr.get(&(level, scope))
    }

    fn check_decoy_information(&self, level: FdrLevel, data: &FdrData) -> Result<(), ConfigError> {
        let available = match data.strategy() {
            DecoyStrategy::AccessionPattern => true,
            DecoyStrategy::SearchEngine => self.graph.psms.iter().any(|psm| psm.decoy.is_some()),
            DecoyStrategy::Inherit => level != FdrLevel::Psm,
        };
        match (available, data.strategy()) {
            (true, _) => Ok(()),
            (false, DecoyStrategy::Inherit) => Err(ConfigError::StrategyNotApplicable {
                level: level.name(),
                strategy: data.strategy().short_name(),
            }),
            (false, strategy) => Err(ConfigError::NoDecoyInformation {
                level: level.name(),
                strategy: strategy.short_name(),
            }),
        }
    }

    /// FDR of single PSMs of one file, or of the PSM sets for
    /// [`FileScope::All`]. FDR scores are computed as well.
    pub fn calculate_psm_fdr(
        &mut self,
        scope: FileScope,
        settings: &FdrSettings,
    ) -> Result<FdrResults, Error> {
        let mut data = settings.to_data()?;
        self.check_decoy_information(FdrLevel::Psm, &data)?;

        match scope {
            FileScope::File(file) => {
                self.ensure_psms(file);
                let graph = &self.graph;
                let psms = self.psms.get_mut(&file).map(Vec::as_mut_slice).unwrap_or(&mut []);
                for psm in psms.iter_mut() {
                    psm.decoy = match data.strategy() {
                        DecoyStrategy::AccessionPattern => accessions_decoy(graph, &data, &psm.accessions),
                        _ => graph[psm.psm].decoy == Some(true),
                    };
                }
                calculate_fdr(psms, &mut data)?;
                calculate_fdr_score(psms, &data)?;
                self.invalidate_psm_sets();
                self.invalidate_peptides(scope);
            }
            FileScope::All => {
                self.ensure_psm_sets();
                let graph = &self.graph;
                let sets = self.psm_sets.as_deref_mut().unwrap_or(&mut []);
                for set in sets.iter_mut() {
                    set.decoy = match data.strategy() {
                        DecoyStrategy::AccessionPattern => {
                            accessions_decoy(graph, &data, &set.accessions())
                        }
                        _ => engine_decoy(graph, &set.psms),
                    };
                }
                calculate_fdr(sets, &mut data)?;
                calculate_fdr_score(sets, &data)?;
                self.invalidate_peptides(FileScope::All);
            }
        }

        let results = data.results().copied().unwrap_or_default();
        self.fdr.insert((FdrLevel::Psm, scope), data);
        Ok(results)
    }

    /// Combine the per-file PSM FDR scores into one FDR score per PSM set.
    /// Files without PSM FDR results are FDR-estimated with `settings` first.
    pub fn calculate_combined_fdr_score(&mut self, settings: &FdrSettings) -> Result<FdrResults, Error> {
        let time = Instant::now();
        for file in 0..self.graph.files.len() as u32 {
            let scope = FileScope::File(FileIx(file));
            let done = self
                .fdr_data(FdrLevel::Psm, scope)
                .and_then(FdrData::results)
                .is_some();
            if !done {
                self.calculate_psm_fdr(scope, settings)?;
            }
        }

        let mut data = settings.to_data()?;
        self.check_decoy_information(FdrLevel::Psm, &data)?;
        self.ensure_psm_sets();
        let graph = &self.graph;
        let sets = self.psm_sets.as_deref_mut().unwrap_or(&mut []);
        for set in sets.iter_mut() {
            match data.strategy() {
                DecoyStrategy::AccessionPattern => {
                    set.decoy = accessions_decoy(graph, &data, &set.accessions())
                }
                _ => set.update_decoy(),
            }
        }
        let results = calculate_combined_fdr_score(sets, &mut data)?;
        info!(
            "- combined FDR score of {} PSM sets in {}ms",
            results.items,
            time.elapsed().as_millis()
        );

        self.fdr.insert((FdrLevel::Psm, FileScope::All), data);
        self.invalidate_peptides(FileScope::All);
        Ok(results)
    }

    pub fn calculate_peptide_fdr(
        &mut self,
        scope: FileScope,
        settings: &FdrSettings,
    ) -> Result<FdrResults, Error> {
        let mut data = settings.to_data()?;
        self.check_decoy_information(FdrLevel::Peptide, &data)?;
        self.ensure_peptides(scope);

        let graph = &self.graph;
        let peptides = self
            .peptides
            .get_mut(&scope)
            .map(Vec::as_mut_slice)
            .unwrap_or(&mut []);
        for peptide in peptides.iter_mut() {
            match data.strategy() {
                DecoyStrategy::AccessionPattern => {
                    peptide.decoy = accessions_decoy(graph, &data, &peptide.accessions)
                }
                DecoyStrategy::SearchEngine => peptide.decoy = engine_decoy(graph, peptide.psms()),
                DecoyStrategy::Inherit => peptide.update_decoy(),
            }
        }
        calculate_fdr(peptides, &mut data)?;
        calculate_fdr_score(peptides, &data)?;

        let results = data.results().copied().unwrap_or_default();
        self.fdr.insert((FdrLevel::Peptide, scope), data);
        if scope == FileScope::All {
            self.invalidate_proteins();
        }
        Ok(results)
    }

    pub fn calculate_protein_fdr(&mut self, settings: &FdrSettings) -> Result<FdrResults, Error> {
        let mut data = settings.to_data()?;
        self.check_decoy_information(FdrLevel::Protein, &data)?;
        if self.proteins.is_none() {
            warn!("protein FDR requested before protein inference");
        }

        let graph = &self.graph;
        let proteins = self.proteins.as_deref_mut().unwrap_or(&mut []);
        for protein in proteins.iter_mut() {
            match data.strategy() {
                DecoyStrategy::AccessionPattern => {
                    protein.decoy = accessions_decoy(graph, &data, &protein.accessions)
                }
                DecoyStrategy::SearchEngine => {
                    protein.decoy = engine_decoy(graph, protein.peptides.iter().flat_map(|p| p.psms()))
                }
                DecoyStrategy::Inherit => protein.update_decoy(),
            }
        }
        calculate_fdr(proteins, &mut data)?;

        let results = data.results().copied().unwrap_or_default();
        self.fdr.insert((FdrLevel::Protein, FileScope::All), data);
        Ok(results)
    }

    pub fn filtered_psm_sets(&mut self, filters: &[Filter<PsmFilter>]) -> Vec<&ReportPsmSet> {
        self.ensure_psm_sets();
        let graph = &self.graph;
        self.psm_sets
            .iter()
            .flatten()
            .filter(|set| passes(filters, *set, graph))
            .collect()
    }

    pub fn filtered_peptides(
        &mut self,
        scope: FileScope,
        filters: &[Filter<PeptideFilter>],
    ) -> Vec<&ReportPeptide> {
        self.ensure_peptides(scope);
        let graph = &self.graph;
        self.peptides
            .get(&scope)
            .into_iter()
            .flatten()
            .filter(|peptide| passes(filters, *peptide, graph))
            .collect()
    }

    pub fn filtered_proteins(&self, filters: &[Filter<ProteinFilter>]) -> Vec<&ReportProtein> {
        self.report_proteins()
            .iter()
            .filter(|protein| passes(filters, *protein, &self.graph))
            .collect()
    }

    /// Rank the items of `level` by `score_name`; items failing the level's
    /// filters get no rank. At PSM level, [`FileScope::All`] ranks PSM sets.
    pub fn calculate_ranking(
        &mut self,
        level: FdrLevel,
        scope: FileScope,
        score_name: &str,
        filters: &LevelFilters,
    ) -> Result<(), ConfigError> {
        let higher = ScoreName::parse(score_name)
            .higher_score_better()
            .ok_or_else(|| ConfigError::UnknownScoreDirection(score_name.into()))?;

        match (level, scope) {
            (FdrLevel::Psm, FileScope::File(file)) => {
                self.ensure_psms(file);
                let graph = &self.graph;
                if let Some(psms) = self.psms.get_mut(&file) {
                    calculate_ranking(psms, score_name, higher, |psm| passes(&filters.psm, psm, graph));
                }
            }
            (FdrLevel::Psm, FileScope::All) => {
                self.ensure_psm_sets();
                let graph = &self.graph;
                if let Some(sets) = self.psm_sets.as_mut() {
                    calculate_ranking(sets, score_name, higher, |set| passes(&filters.psm, set, graph));
                }
            }
            (FdrLevel::Peptide, scope) => {
                self.ensure_peptides(scope);
                let graph = &self.graph;
                if let Some(peptides) = self.peptides.get_mut(&scope) {
                    calculate_ranking(peptides, score_name, higher, |p| passes(&filters.peptide, p, graph));
                }
            }
            (FdrLevel::Protein, _) => {
                let graph = &self.graph;
                if let Some(proteins) = self.proteins.as_mut() {
                    calculate_ranking(proteins, score_name, higher, |p| passes(&filters.protein, p, graph));
                }
            }
        }
        Ok(())
    }

    /// Run `inference` on the overview peptides. Replaces any previous
    /// protein report.
    pub fn infer_proteins(
        &mut self,
        inference: &Inference,
        cancellation: &CancellationToken,
    ) -> Result<&[ReportProtein], Error> {
        self.ensure_peptides(FileScope::All);
        self.invalidate_proteins();
        let peptides = self
            .peptides
            .get(&FileScope::All)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let proteins = inference.run(&self.graph, peptides, cancellation, &self.progress)?;
        let proteins = self.proteins.insert(proteins);
        Ok(proteins.as_slice())
    }

    /// Stable multi-key sort of the protein report, first key first
    pub fn sort_proteins(&mut self, keys: &[SortKey]) {
        let graph = &self.graph;
        let proteins = match self.proteins.as_mut() {
            Some(proteins) => proteins,
            None => return,
        };
        let first_accession = |p: &ReportProtein| {
            p.accessions
                .first()
                .map(|acc| graph[*acc].accession.clone())
                .unwrap_or_default()
        };
        proteins.sort_by(|a, b| {
            for key in keys {
                let ord = match key.field {
                    ProteinSortField::Score => cmp_nan_last(a.score, b.score),
                    ProteinSortField::QValue => cmp_nan_last(a.fdr.q_value, b.fdr.q_value),
                    ProteinSortField::Rank => match (a.rank, b.rank) {
                        (Some(x), Some(y)) => x.cmp(&y),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    },
                    ProteinSortField::NrPeptides => a.nr_peptides().cmp(&b.nr_peptides()),
                    ProteinSortField::NrPsms => a.nr_psms().cmp(&b.nr_psms()),
                    ProteinSortField::NrSpectra => a.nr_spectra().cmp(&b.nr_spectra()),
                    ProteinSortField::NrUniquePeptides => {
                        a.nr_unique_peptides().cmp(&b.nr_unique_peptides())
                    }
                    ProteinSortField::Accession => first_accession(a).cmp(&first_accession(b)),
                };
                let ord = match key.descending {
                    true => ord.reverse(),
                    false => ord,
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Compiler, NewSpectrumMatch};
    use crate::filter::Comparison;
    use crate::inference::InferenceMethod;
    use crate::score::{ScoreKind, ScoreModel};
    use crate::scoring::{PsmForScoring, Scoring, ScoringMethod};

    /// Two runs over targets T1..T4 and decoys DECOY_1..2, one peptide per
    /// accession
    fn aggregator() -> ReportAggregator {
        let mut compiler = Compiler::default();
        let files = [
            compiler.insert_file("run1", "run1.mzid", None),
            compiler.insert_file("run2", "run2.mzid", None),
        ];
        let entries = [
            ("T1", "PEPTIDEA", 50.0, Some(false)),
            ("T2", "PEPTIDEC", 40.0, Some(false)),
            ("DECOY_1", "PEPTIDED", 35.0, Some(true)),
            ("T3", "PEPTIDEE", 30.0, Some(false)),
            ("T4", "PEPTIDEF", 20.0, Some(false)),
            ("DECOY_2", "PEPTIDEG", 10.0, Some(true)),
        ];
        for (n, (accession, sequence, score, decoy)) in entries.iter().enumerate() {
            let acc = compiler.insert_accession(accession, None);
            let pep = compiler.insert_peptide(sequence);
            compiler.add_occurrence(pep, acc, None).unwrap();
            for (f, file) in files.iter().enumerate() {
                compiler
                    .insert_spectrum_match(NewSpectrumMatch {
                        charge: 2,
                        mz: 400.0 + n as f64,
                        rt: Some(100.0 * n as f64),
                        sequence: sequence.to_string(),
                        file: *file,
                        decoy: *decoy,
                        scores: vec![ScoreModel::new(ScoreKind::MascotScore, score - f as f64)],
                        ..Default::default()
                    })
                    .unwrap();
            }
        }
        let (graph, issues) = compiler.finish().unwrap();
        assert!(issues.is_empty());
        ReportAggregator::new(graph)
    }

    fn settings(strategy: DecoyStrategy, score: &str) -> FdrSettings {
        FdrSettings {
            strategy,
            pattern: Some("^DECOY_".into()),
            threshold: 0.5,
            score: score.into(),
        }
    }

    #[test]
    fn merging_and_scopes() {
        let mut agg = aggregator();
        assert_eq!(agg.report_psms(FileScope::All).len(), 12);
        assert_eq!(agg.report_psms(FileScope::File(FileIx(1))).len(), 6);
        assert_eq!(agg.report_psm_sets().len(), 6);
        assert!(agg.report_psm_sets().iter().all(|set| set.psms.len() == 2));
        assert_eq!(agg.report_peptides(FileScope::All).len(), 6);

        // the file is part of the key: no merging across files
        agg.set_psm_set_settings(PsmSetSettings {
            file: true,
            ..Default::default()
        });
        assert_eq!(agg.report_psm_sets().len(), 12);
        assert_eq!(agg.report_peptides(FileScope::All).len(), 6);
    }

    #[test]
    fn psm_fdr_per_file_and_combined() -> Result<(), Error> {
        let mut agg = aggregator();
        let results = agg.calculate_psm_fdr(
            FileScope::File(FileIx(0)),
            &settings(DecoyStrategy::AccessionPattern, "mascot_score"),
        )?;
        assert_eq!(results.targets, 4);
        assert_eq!(results.decoys, 2);
        assert!(agg.fdr_data(FdrLevel::Psm, FileScope::File(FileIx(0))).is_some());

        let results =
            agg.calculate_combined_fdr_score(&settings(DecoyStrategy::SearchEngine, "mascot_score"))?;
        assert_eq!(results.items, 6);
        assert!(agg.fdr_data(FdrLevel::Psm, FileScope::File(FileIx(1))).is_some());
        let data = agg.fdr_data(FdrLevel::Psm, FileScope::All).unwrap();
        assert_eq!(data.score(), &ScoreName::Known(ScoreKind::PsmCombinedFdrScore));
        assert!(agg
            .report_psm_sets()
            .iter()
            .all(|set| !set.fdr.fdr_score.is_nan()));
        Ok(())
    }

    #[test]
    fn decoy_information() {
        let mut agg = aggregator();
        let err = agg
            .calculate_psm_fdr(FileScope::All, &settings(DecoyStrategy::Inherit, "mascot_score"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::StrategyNotApplicable { .. })
        ));

        let mut settings = settings(DecoyStrategy::AccessionPattern, "mascot_score");
        settings.pattern = None;
        assert!(matches!(
            agg.calculate_peptide_fdr(FileScope::All, &settings),
            Err(Error::Config(ConfigError::MissingDecoyPattern))
        ));
    }

    #[test]
    fn no_search_engine_flags() {
        let mut compiler = Compiler::default();
        let file = compiler.insert_file("run", "run.mzid", None);
        compiler.insert_peptide("PEPTIDE");
        compiler
            .insert_spectrum_match(NewSpectrumMatch {
                charge: 2,
                mz: 400.0,
                sequence: "PEPTIDE".into(),
                file,
                ..Default::default()
            })
            .unwrap();
        let (graph, _) = compiler.finish().unwrap();
        let mut agg = ReportAggregator::new(graph);
        assert!(matches!(
            agg.calculate_psm_fdr(
                FileScope::File(file),
                &settings(DecoyStrategy::SearchEngine, "mascot_score")
            ),
            Err(Error::Config(ConfigError::NoDecoyInformation { .. }))
        ));
    }

    #[test]
    fn peptides_proteins_ranking() -> Result<(), Error> {
        let mut agg = aggregator();
        agg.calculate_combined_fdr_score(&settings(DecoyStrategy::AccessionPattern, "mascot_score"))?;
        let results = agg.calculate_peptide_fdr(
            FileScope::All,
            &settings(DecoyStrategy::Inherit, "psm_combined_fdr_score"),
        )?;
        assert_eq!(results.decoys, 2);

        let scoring = Scoring::new(ScoringMethod::Additive, "mascot_score", PsmForScoring::Best)?;
        let inference = Inference::new(InferenceMethod::OccamsRazor, scoring);
        let proteins = agg.infer_proteins(&inference, &CancellationToken::default())?;
        assert_eq!(proteins.len(), 6);
        assert_eq!(agg.progress().completed(), 6);

        let results =
            agg.calculate_protein_fdr(&settings(DecoyStrategy::AccessionPattern, "protein_score"))?;
        assert_eq!((results.targets, results.decoys), (4, 2));

        let filters = LevelFilters {
            protein: vec![Filter::new(ProteinFilter::Decoy { value: false })],
            ..Default::default()
        };
        agg.calculate_ranking(FdrLevel::Protein, FileScope::All, "protein_score", &filters)?;
        agg.sort_proteins(&[SortKey {
            field: ProteinSortField::Rank,
            descending: false,
        }]);
        let ranked = agg
            .report_proteins()
            .iter()
            .map(|p| (p.accession_names(agg.graph()).join(","), p.rank))
            .collect::<Vec<_>>();
        assert_eq!(ranked[0], ("T1".to_string(), Some(1)));
        assert_eq!(ranked[3], ("T4".to_string(), Some(4)));
        assert!(ranked[4..].iter().all(|(_, rank)| rank.is_none()));

        let good = agg.filtered_proteins(&[Filter::new(ProteinFilter::QValue {
            comparison: Comparison::LessEqual,
            value: 0.5,
        })]);
        assert!(!good.is_empty());
        Ok(())
    }

    #[test]
    fn settings_invalidate_caches() -> Result<(), Error> {
        let mut agg = aggregator();
        agg.calculate_peptide_fdr(
            FileScope::All,
            &settings(DecoyStrategy::AccessionPattern, "mascot_score"),
        )?;
        assert!(agg.fdr_data(FdrLevel::Peptide, FileScope::All).is_some());

        agg.set_consider_modifications(true);
        assert!(agg.fdr_data(FdrLevel::Peptide, FileScope::All).is_none());
        assert!(agg
            .report_peptides(FileScope::All)
            .iter()
            .all(|p| p.fdr.q_value.is_nan()));
        Ok(())
    }
}
