//! Protein inference: per cluster, choose the proteins that explain the
//! observed peptide evidence.
//!
//! Clusters share no accession and no peptide, so every cluster is solved
//! independently on a bounded rayon pool. Report ids are assigned once all
//! clusters are done, in cluster order.

use crate::error::{ConfigError, Error};
use crate::fdr::FdrItem;
use crate::filter::{passes, Filter, PeptideFilter, ProteinFilter, PsmFilter};
use crate::graph::{AccessionIx, ClusterIx, EvidenceGraph, PeptideIx};
use crate::report::{ReportPeptide, ReportProtein, ReportPsm, ReportPsmSet};
use crate::score::compare_scores;
use crate::scoring::{PsmForScoring, Scoring};
use fnv::{FnvHashMap, FnvHashSet};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMethod {
    /// Every group with passing evidence is reported
    ReportAll,
    /// Greedy minimal set of protein groups explaining all peptides
    OccamsRazor,
    /// Greedy minimal set of protein groups explaining all spectra
    SpectrumExtractor,
}

impl InferenceMethod {
    pub const ALL: [InferenceMethod; 3] = [
        InferenceMethod::ReportAll,
        InferenceMethod::OccamsRazor,
        InferenceMethod::SpectrumExtractor,
    ];

    pub fn short_name(&self) -> &'static str {
        match self {
            InferenceMethod::ReportAll => "report_all",
            InferenceMethod::OccamsRazor => "occams_razor",
            InferenceMethod::SpectrumExtractor => "spectrum_extractor",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.short_name() == name)
            .ok_or_else(|| ConfigError::UnknownMethod {
                kind: "inference method",
                name: name.into(),
            })
    }
}

/// Cooperative cancellation of a running inference, checked between clusters
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct InferenceProgress {
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl InferenceProgress {
    pub fn completed(&self) -> usize {
        self.completed.load(AtomicOrdering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(AtomicOrdering::Relaxed)
    }

    pub fn fraction(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => self.completed() as f64 / total as f64,
        }
    }

    fn reset(&self, total: usize) {
        self.total.store(total, AtomicOrdering::Relaxed);
        self.completed.store(0, AtomicOrdering::Relaxed);
    }

    fn tick(&self) {
        self.completed.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Inference {
    pub method: InferenceMethod,
    pub scoring: Option<Scoring>,
    pub psm_filters: Vec<Filter<PsmFilter>>,
    pub peptide_filters: Vec<Filter<PeptideFilter>>,
    pub protein_filters: Vec<Filter<ProteinFilter>>,
    /// Worker threads; 0 uses the rayon default
    pub threads: usize,
}

impl Inference {
    pub fn new(method: InferenceMethod, scoring: Scoring) -> Self {
        Self {
            method,
            scoring: Some(scoring),
            psm_filters: Vec::new(),
            peptide_filters: Vec::new(),
            protein_filters: Vec::new(),
            threads: 0,
        }
    }

    /// Run the inference over every cluster of `graph`. `peptides` is the
    /// complete peptide report; it is filtered per cluster here.
    pub fn run(
        &self,
        graph: &EvidenceGraph,
        peptides: &[ReportPeptide],
        cancellation: &CancellationToken,
        progress: &InferenceProgress,
    ) -> Result<Vec<ReportProtein>, Error> {
        let scoring = self.scoring.as_ref().ok_or(ConfigError::MissingScoring)?;
        let start = Instant::now();
        let total = graph.clusters().len();
        progress.reset(total);

        let mut evidence: FnvHashMap<PeptideIx, Vec<&ReportPeptide>> = FnvHashMap::default();
        for peptide in peptides {
            evidence.entry(peptide.peptide).or_default().push(peptide);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()?;

        let solved = pool.install(|| {
            (0..total)
                .into_par_iter()
                .map(|ix| {
                    if cancellation.is_cancelled() {
                        return None;
                    }
                    let proteins = self.infer_cluster(graph, ClusterIx(ix as u32), &evidence, scoring);
                    progress.tick();
                    Some(proteins)
                })
                .collect::<Vec<_>>()
        });

        if cancellation.is_cancelled() || solved.iter().any(Option::is_none) {
            return Err(Error::Cancelled {
                completed: progress.completed(),
                total,
            });
        }

        let mut proteins = solved.into_iter().flatten().flatten().collect::<Vec<_>>();
        let mut id = 0;
        for protein in proteins.iter_mut() {
            id += 1;
            protein.id = id;
            for sub in protein.sub_sets.iter_mut() {
                id += 1;
                sub.id = id;
            }
        }

        info!(
            "- inferred {} proteins from {} clusters with `{}` in {}ms",
            proteins.len(),
            total,
            self.method.short_name(),
            start.elapsed().as_millis()
        );
        Ok(proteins)
    }

    /// Solve one cluster. Filters are applied to its evidence first; a
    /// cluster without passing evidence yields no protein.
    fn infer_cluster(
        &self,
        graph: &EvidenceGraph,
        cluster: ClusterIx,
        evidence: &FnvHashMap<PeptideIx, Vec<&ReportPeptide>>,
        scoring: &Scoring,
    ) -> Vec<ReportProtein> {
        let mut passing = self.passing_evidence(graph, cluster, evidence);
        if self.method == InferenceMethod::SpectrumExtractor
            && scoring.used_spectra() == PsmForScoring::Best
        {
            keep_best_spectrum_matches(&mut passing, scoring);
        }
        if passing.is_empty() {
            debug!("cluster {} has no passing evidence", cluster.0);
            return Vec::new();
        }

        let candidates = match self.method {
            InferenceMethod::ReportAll => self.candidates(graph, cluster, &passing, false),
            _ => self.candidates(graph, cluster, &passing, true),
        };
        let candidates = candidates
            .into_iter()
            .map(|(accessions, peptide_ixs)| {
                let peptides = peptide_ixs
                    .iter()
                    .flat_map(|ix| passing[ix].iter().cloned())
                    .collect::<Vec<_>>();
                let mut protein = ReportProtein::new(cluster, accessions, peptides);
                protein.score = scoring.calculate(&protein.peptides);
                protein.update_decoy();
                protein.update_coverage(graph);
                (protein, peptide_ixs)
            })
            .filter(|(protein, _)| passes(&self.protein_filters, protein, graph))
            .collect::<Vec<_>>();

        let chosen = match self.method {
            InferenceMethod::ReportAll => (0..candidates.len()).collect(),
            InferenceMethod::OccamsRazor => {
                let units = candidates.iter().map(|(_, ixs)| ixs.clone()).collect::<Vec<_>>();
                greedy_cover(&candidates, &units)
            }
            InferenceMethod::SpectrumExtractor => {
                let units = candidates
                    .iter()
                    .map(|(protein, _)| {
                        protein
                            .peptides
                            .iter()
                            .flat_map(|p| p.psms().map(|psm| psm.spectrum_key.as_str()))
                            .collect::<FnvHashSet<_>>()
                            .into_iter()
                            .collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>();
                greedy_cover(&candidates, &units)
            }
        };

        let mut proteins = chosen
            .iter()
            .map(|&ix| candidates[ix].0.clone())
            .collect::<Vec<_>>();

        if self.method != InferenceMethod::ReportAll {
            let chosen_sets = chosen.iter().map(|&ix| &candidates[ix].1).collect::<Vec<_>>();
            for (ix, (candidate, peptide_ixs)) in candidates.iter().enumerate() {
                if chosen.contains(&ix) {
                    continue;
                }
                // a sub-set is listed under every reported protein covering it
                for (parent, set) in chosen_sets.iter().enumerate() {
                    if peptide_ixs.iter().all(|p| set.binary_search(p).is_ok()) {
                        proteins[parent].sub_sets.push(candidate.clone());
                    }
                }
            }
        }

        debug!(
            "cluster {}: {} candidates, {} proteins",
            cluster.0,
            candidates.len(),
            proteins.len()
        );
        proteins
    }

    /// Peptides of the cluster, with PSM sets failing the PSM filters removed,
    /// and peptides failing the peptide filters dropped
    fn passing_evidence(
        &self,
        graph: &EvidenceGraph,
        cluster: ClusterIx,
        evidence: &FnvHashMap<PeptideIx, Vec<&ReportPeptide>>,
    ) -> FnvHashMap<PeptideIx, Vec<ReportPeptide>> {
        let mut passing = FnvHashMap::default();
        for ix in &graph[cluster].peptides {
            let peptides = evidence
                .get(ix)
                .into_iter()
                .flatten()
                .filter_map(|&peptide| {
                    let mut peptide = peptide.clone();
                    peptide
                        .psm_sets
                        .retain(|set| passes(&self.psm_filters, set, graph));
                    peptide.update_decoy();
                    match !peptide.psm_sets.is_empty()
                        && passes(&self.peptide_filters, &peptide, graph)
                    {
                        true => Some(peptide),
                        false => None,
                    }
                })
                .collect::<Vec<_>>();
            if !peptides.is_empty() {
                passing.insert(*ix, peptides);
            }
        }
        passing
    }

    /// Groups of the cluster with accessions and passing peptides, as
    /// (accessions, sorted passing peptides). With `merge`, groups explained
    /// by identical peptide sets are joined, keeping first-seen order.
    fn candidates(
        &self,
        graph: &EvidenceGraph,
        cluster: ClusterIx,
        passing: &FnvHashMap<PeptideIx, Vec<ReportPeptide>>,
        merge: bool,
    ) -> Vec<(Vec<AccessionIx>, Vec<PeptideIx>)> {
        let mut candidates: Vec<(Vec<AccessionIx>, Vec<PeptideIx>)> = Vec::new();
        let mut index: FnvHashMap<Vec<PeptideIx>, usize> = FnvHashMap::default();
        for group in &graph[cluster].groups {
            let group = &graph[*group];
            let peptides = group
                .peptides
                .iter()
                .copied()
                .filter(|p| passing.contains_key(p))
                .collect::<Vec<_>>();
            if group.accessions.is_empty() || peptides.is_empty() {
                continue;
            }
            match index.get(&peptides).copied().filter(|_| merge) {
                Some(ix) => {
                    let accessions = &mut candidates[ix].0;
                    accessions.extend(group.accessions.iter().copied());
                    accessions.sort_unstable();
                    accessions.dedup();
                }
                None => {
                    index.insert(peptides.clone(), candidates.len());
                    candidates.push((group.accessions.clone(), peptides));
                }
            }
        }
        candidates
    }
}

/// Drop every PSM that is not the best scoring match of its spectrum among
/// all peptides of the cluster. PSM sets and peptides left empty are removed.
fn keep_best_spectrum_matches(
    passing: &mut FnvHashMap<PeptideIx, Vec<ReportPeptide>>,
    scoring: &Scoring,
) {
    let name = scoring.used_score().short_name().to_string();
    let higher = scoring.source_higher_score_better();
    let set_level = scoring
        .used_score()
        .kind()
        .map(|k| k.is_psm_set_score())
        .unwrap_or(false);
    let value = |set: &ReportPsmSet, psm: &ReportPsm| {
        match set_level {
            true => set.score(&name),
            false => psm.score(&name),
        }
    };

    let mut best: FnvHashMap<String, f64> = FnvHashMap::default();
    for peptide in passing.values().flatten() {
        for set in &peptide.psm_sets {
            for psm in &set.psms {
                let v = value(set, psm);
                let entry = best.entry(psm.spectrum_key.clone()).or_insert(f64::NAN);
                if compare_scores(v, *entry, higher) == Ordering::Less {
                    *entry = v;
                }
            }
        }
    }

    for peptides in passing.values_mut() {
        for peptide in peptides.iter_mut() {
            for set in peptide.psm_sets.iter_mut() {
                let keep = set
                    .psms
                    .iter()
                    .map(|psm| {
                        compare_scores(value(set, psm), best[&psm.spectrum_key], higher)
                            != Ordering::Greater
                    })
                    .collect::<Vec<_>>();
                let mut keep = keep.into_iter();
                set.psms.retain(|_| keep.next().unwrap_or(false));
                set.update_decoy();
            }
            peptide.psm_sets.retain(|set| !set.psms.is_empty());
            peptide.update_decoy();
        }
        peptides.retain(|p| !p.psm_sets.is_empty());
    }
    passing.retain(|_, peptides| !peptides.is_empty());
}

/// Greedy set cover over `units` (peptides or spectra explained by each
/// candidate). Returns the chosen candidate indices in selection order.
///
/// # Invariants
/// * candidates are in first-seen order
/// * ties on unexplained count fall back to better score, then more
///   accessions, then first-seen order
fn greedy_cover<K: Hash + Eq + Copy, T>(candidates: &[(ReportProtein, T)], units: &[Vec<K>]) -> Vec<usize> {
    let mut unexplained = units.iter().flatten().copied().collect::<FnvHashSet<K>>();
    let mut available = (0..candidates.len()).collect::<Vec<_>>();
    let mut chosen = Vec::new();

    while !unexplained.is_empty() {
        let best = available
            .iter()
            .map(|&ix| {
                let explains = units[ix].iter().filter(|u| unexplained.contains(u)).count();
                (ix, explains)
            })
            .filter(|(_, explains)| *explains > 0)
            .min_by(|(a, na), (b, nb)| {
                let (pa, pb) = (&candidates[*a].0, &candidates[*b].0);
                nb.cmp(na)
                    .then_with(|| compare_scores(pa.score, pb.score, true))
                    .then_with(|| pb.accessions.len().cmp(&pa.accessions.len()))
                    .then_with(|| a.cmp(b))
            });

        match best {
            Some((ix, _)) => {
                for unit in &units[ix] {
                    unexplained.remove(unit);
                }
                available.retain(|&c| c != ix);
                chosen.push(ix);
            }
            None => break,
        }
    }
    chosen
}
