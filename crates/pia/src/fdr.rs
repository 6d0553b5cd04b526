//! Target-decoy false discovery rate estimation
//!
//! One algorithm serves PSM, peptide and protein level: items are ranked by
//! a score, the FDR of every rank is `decoys / targets` counted down to (and
//! including) that rank, and q-values are the running minimum of the FDR from
//! the worst end of the list.
//!
//! Items sharing a score always share their FDR. A list without any decoy
//! yields `+inf` for every FDR and q-value and no FDR-good item: without
//! decoys, no FDR can be claimed.

use crate::error::ConfigError;
use crate::score::{compare_scores, same_score, ScoreName};
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct FdrStats {
    pub fdr: f64,
    pub q_value: f64,
    pub fdr_score: f64,
    pub fdr_good: bool,
}

impl Default for FdrStats {
    fn default() -> Self {
        Self {
            fdr: f64::NAN,
            q_value: f64::NAN,
            fdr_score: f64::NAN,
            fdr_good: false,
        }
    }
}

/// Anything that can be ranked and FDR-qualified
pub trait FdrItem {
    /// Value of the named score, NaN if not available
    fn score(&self, short_name: &str) -> f64;
    fn is_decoy(&self) -> bool;
    fn fdr_stats(&self) -> &FdrStats;
    fn fdr_stats_mut(&mut self) -> &mut FdrStats;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoyStrategy {
    /// Accessions matching a regular expression are decoys
    #[default]
    AccessionPattern,
    /// Decoy flags as reported by the search engine
    SearchEngine,
    /// Decoy state derived from the underlying, already decided evidence
    Inherit,
}

impl DecoyStrategy {
    pub fn short_name(&self) -> &'static str {
        match self {
            DecoyStrategy::AccessionPattern => "accession_pattern",
            DecoyStrategy::SearchEngine => "search_engine",
            DecoyStrategy::Inherit => "inherit",
        }
    }

    /// Unknown names fall back to [`DecoyStrategy::AccessionPattern`]
    pub fn from_name(name: &str) -> Self {
        match name {
            "accession_pattern" | "accessionpattern" => DecoyStrategy::AccessionPattern,
            "search_engine" | "searchengine" => DecoyStrategy::SearchEngine,
            "inherit" => DecoyStrategy::Inherit,
            _ => {
                warn!(
                    "unknown decoy strategy `{}`, using `accession_pattern`",
                    name
                );
                DecoyStrategy::AccessionPattern
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct FdrResults {
    pub items: usize,
    pub targets: usize,
    pub decoys: usize,
    pub fdr_good_targets: usize,
    pub fdr_good_decoys: usize,
    pub score_at_threshold: f64,
    /// FDR if one more decoy was appended after the last item
    pub artificial_decoy_fdr: f64,
}

impl FdrResults {
    pub fn has_decoys(&self) -> bool {
        self.decoys > 0
    }
}

/// User facing FDR configuration of one level
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FdrSettings {
    pub strategy: DecoyStrategy,
    pub pattern: Option<String>,
    pub threshold: f64,
    /// Short name of the score the items are ranked by
    pub score: String,
}

impl FdrSettings {
    pub fn to_data(&self) -> Result<FdrData, ConfigError> {
        FdrData::new(
            self.strategy,
            self.pattern.as_deref(),
            self.threshold,
            ScoreName::parse(&self.score),
        )
    }
}

/// FDR settings and results of one ranked list
#[derive(Clone, Debug, Serialize)]
pub struct FdrData {
    strategy: DecoyStrategy,
    pattern: Option<String>,
    #[serde(skip)]
    regex: Option<Regex>,
    threshold: f64,
    score: ScoreName,
    results: Option<FdrResults>,
}

impl FdrData {
    pub fn new(
        strategy: DecoyStrategy,
        pattern: Option<&str>,
        threshold: f64,
        score: ScoreName,
    ) -> Result<Self, ConfigError> {
        let mut data = Self {
            strategy,
            pattern: None,
            regex: None,
            threshold: 0.01,
            score,
            results: None,
        };
        data.set_pattern(pattern)?;
        data.set_threshold(threshold)?;
        if strategy == DecoyStrategy::AccessionPattern && data.regex.is_none() {
            return Err(ConfigError::MissingDecoyPattern);
        }
        Ok(data)
    }

    pub fn strategy(&self) -> DecoyStrategy {
        self.strategy
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn score(&self) -> &ScoreName {
        &self.score
    }

    pub fn results(&self) -> Option<&FdrResults> {
        self.results.as_ref()
    }

    pub fn set_strategy(&mut self, strategy: DecoyStrategy) {
        if strategy != self.strategy {
            self.results = None;
        }
        self.strategy = strategy;
    }

    pub fn set_pattern(&mut self, pattern: Option<&str>) -> Result<(), ConfigError> {
        let regex = pattern
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidDecoyPattern {
                    pattern: p.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        if self.pattern.as_deref() != pattern {
            self.results = None;
        }
        self.pattern = pattern.map(String::from);
        self.regex = regex;
        Ok(())
    }

    pub fn set_threshold(&mut self, threshold: f64) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        if threshold != self.threshold {
            self.results = None;
        }
        self.threshold = threshold;
        Ok(())
    }

    pub fn set_score(&mut self, score: ScoreName) {
        if score != self.score {
            self.results = None;
        }
        self.score = score;
    }

    pub(crate) fn set_results(&mut self, results: FdrResults) {
        self.results = Some(results);
    }

    pub fn higher_score_better(&self) -> Result<bool, ConfigError> {
        self.score
            .higher_score_better()
            .ok_or_else(|| ConfigError::UnknownScoreDirection(self.score.short_name().into()))
    }

    /// Whether the accession matches the decoy pattern. Always false without
    /// a pattern.
    pub fn is_decoy_accession(&self, accession: &str) -> bool {
        self.regex
            .as_ref()
            .map(|re| re.is_match(accession))
            .unwrap_or(false)
    }
}

fn rank_fdr(decoys: usize, targets: usize, any_decoys: bool) -> f64 {
    match (any_decoys, targets) {
        (false, _) | (_, 0) => f64::INFINITY,
        _ => decoys as f64 / targets as f64,
    }
}

/// Sort `items` by the score of `data`, and assign FDR, q-value and FDR-good
/// state to every item. Decoy states must be resolved beforehand.
pub fn calculate_fdr<T: FdrItem>(items: &mut [T], data: &mut FdrData) -> Result<(), ConfigError> {
    let time = Instant::now();
    let higher = data.higher_score_better()?;
    let name = data.score.short_name().to_string();

    items.sort_by(|a, b| compare_scores(a.score(&name), b.score(&name), higher));
    let any_decoys = items.iter().any(|item| item.is_decoy());

    let mut targets = 0;
    let mut decoys = 0;
    let mut rank_start = 0;
    for ix in 0..items.len() {
        if ix > 0 && !same_score(items[ix].score(&name), items[ix - 1].score(&name)) {
            let fdr = rank_fdr(decoys, targets, any_decoys);
            items[rank_start..ix]
                .iter_mut()
                .for_each(|item| item.fdr_stats_mut().fdr = fdr);
            rank_start = ix;
        }
        match items[ix].is_decoy() {
            true => decoys += 1,
            false => targets += 1,
        }
    }
    let fdr = rank_fdr(decoys, targets, any_decoys);
    items[rank_start..]
        .iter_mut()
        .for_each(|item| item.fdr_stats_mut().fdr = fdr);

    let artificial_decoy_fdr = match targets {
        0 => f64::INFINITY,
        _ => (decoys + 1) as f64 / targets as f64,
    };

    let score_at_threshold = items
        .iter()
        .rposition(|item| item.fdr_stats().fdr <= data.threshold)
        .map(|ix| items[ix].score(&name));

    let mut results = FdrResults {
        items: items.len(),
        targets,
        decoys,
        score_at_threshold: score_at_threshold.unwrap_or(f64::NAN),
        artificial_decoy_fdr,
        ..Default::default()
    };

    for item in items.iter_mut() {
        let good = score_at_threshold
            .map(|threshold| compare_scores(item.score(&name), threshold, higher) != Ordering::Greater)
            .unwrap_or(false);
        item.fdr_stats_mut().fdr_good = good;
        match (good, item.is_decoy()) {
            (true, true) => results.fdr_good_decoys += 1,
            (true, false) => results.fdr_good_targets += 1,
            _ => {}
        }
    }

    calculate_q_values(items);

    if !any_decoys {
        warn!(
            "no decoys among {} items ranked by `{}`: FDR is not estimable",
            items.len(),
            name
        );
    }
    info!(
        "- {} of {} targets pass {} FDR on `{}` ({} decoys) in {}ms",
        results.fdr_good_targets,
        targets,
        data.threshold,
        name,
        decoys,
        time.elapsed().as_millis()
    );

    data.results = Some(results);
    Ok(())
}

/// Assign q-values from already computed FDRs
///
/// # Invariants
/// * `items` must be sorted from best to worst score
pub fn calculate_q_values<T: FdrItem>(items: &mut [T]) {
    let mut q_min = f64::INFINITY;
    for item in items.iter_mut().rev() {
        let stats = item.fdr_stats_mut();
        q_min = q_min.min(stats.fdr);
        stats.q_value = q_min;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::score::ScoreKind;
    use quickcheck_macros::quickcheck;

    #[derive(Clone, Debug)]
    pub(crate) struct Item {
        pub score: f64,
        pub decoy: bool,
        pub stats: FdrStats,
        pub rank: Option<u32>,
    }

    impl Item {
        pub fn new(score: f64, decoy: bool) -> Self {
            Self {
                score,
                decoy,
                stats: FdrStats::default(),
                rank: None,
            }
        }
    }

    impl FdrItem for Item {
        fn score(&self, _: &str) -> f64 {
            self.score
        }
        fn is_decoy(&self) -> bool {
            self.decoy
        }
        fn fdr_stats(&self) -> &FdrStats {
            &self.stats
        }
        fn fdr_stats_mut(&mut self) -> &mut FdrStats {
            &mut self.stats
        }
    }

    pub(crate) fn data(threshold: f64) -> FdrData {
        FdrData::new(
            DecoyStrategy::SearchEngine,
            None,
            threshold,
            ScoreKind::MascotScore.into(),
        )
        .unwrap()
    }

    #[test]
    fn ranks_share_fdr() {
        let mut items = vec![
            Item::new(50.0, false),
            Item::new(40.0, false),
            Item::new(40.0, true),
            Item::new(40.0, false),
            Item::new(30.0, false),
            Item::new(20.0, true),
        ];
        let mut fdr = data(0.4);
        calculate_fdr(&mut items, &mut fdr).unwrap();

        let fdrs = items.iter().map(|i| i.stats.fdr).collect::<Vec<_>>();
        assert_eq!(fdrs, vec![0.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0, 0.25, 0.5]);

        let qs = items.iter().map(|i| i.stats.q_value).collect::<Vec<_>>();
        assert_eq!(qs, vec![0.0, 0.25, 0.25, 0.25, 0.25, 0.5]);

        let results = fdr.results().unwrap();
        assert_eq!(results.targets, 4);
        assert_eq!(results.decoys, 2);
        assert_eq!(results.score_at_threshold, 30.0);
        assert_eq!(results.fdr_good_targets, 4);
        assert_eq!(results.fdr_good_decoys, 1);
        assert_eq!(results.artificial_decoy_fdr, 0.75);
        assert!(!items[5].stats.fdr_good);
    }

    #[test]
    fn leading_decoy_is_infinite() {
        let mut items = vec![Item::new(3.0, true), Item::new(2.0, false)];
        let mut fdr = data(0.01);
        calculate_fdr(&mut items, &mut fdr).unwrap();
        assert_eq!(items[0].stats.fdr, f64::INFINITY);
        assert_eq!(items[1].stats.fdr, 1.0);
        assert_eq!(items[0].stats.q_value, 1.0);
        assert_eq!(fdr.results().unwrap().fdr_good_targets, 0);
    }

    #[test]
    fn no_decoys() {
        let mut items = (0..10).map(|i| Item::new(i as f64, false)).collect::<Vec<_>>();
        let mut fdr = data(1.0);
        calculate_fdr(&mut items, &mut fdr).unwrap();
        assert!(items.iter().all(|i| i.stats.fdr == f64::INFINITY));
        assert!(items.iter().all(|i| i.stats.q_value == f64::INFINITY));
        assert!(items.iter().all(|i| !i.stats.fdr_good));
        let results = fdr.results().unwrap();
        assert!(!results.has_decoys());
        assert_eq!(results.fdr_good_targets + results.fdr_good_decoys, 0);
    }

    #[test]
    fn settings_clear_results() {
        let mut items = vec![Item::new(3.0, true), Item::new(2.0, false)];
        let mut fdr = data(0.01);
        calculate_fdr(&mut items, &mut fdr).unwrap();
        assert!(fdr.results().is_some());
        fdr.set_threshold(0.05).unwrap();
        assert!(fdr.results().is_none());

        assert_eq!(
            fdr.set_threshold(1.5),
            Err(ConfigError::InvalidThreshold(1.5))
        );
        assert!(matches!(
            FdrData::new(
                DecoyStrategy::AccessionPattern,
                None,
                0.01,
                ScoreKind::MascotScore.into()
            ),
            Err(ConfigError::MissingDecoyPattern)
        ));
        assert!(FdrData::new(
            DecoyStrategy::SearchEngine,
            None,
            0.01,
            ScoreName::parse("unknown_score")
        )
        .unwrap()
        .higher_score_better()
        .is_err());
    }

    #[test]
    fn strategy_names() {
        assert_eq!(
            DecoyStrategy::from_name("searchengine"),
            DecoyStrategy::SearchEngine
        );
        assert_eq!(
            DecoyStrategy::from_name("bogus"),
            DecoyStrategy::AccessionPattern
        );
    }

    fn fdr_by_score(items: &[Item]) -> Vec<(u64, u64)> {
        let mut v = items
            .iter()
            .map(|i| (i.score.to_bits(), i.stats.fdr.to_bits()))
            .collect::<Vec<_>>();
        v.sort_unstable();
        v.dedup();
        v
    }

    #[quickcheck]
    fn tie_invariance_and_monotone_q(scores: Vec<(u8, bool)>, rotate: usize) -> bool {
        let items = scores
            .iter()
            .map(|(s, d)| Item::new((*s % 8) as f64, *d))
            .collect::<Vec<_>>();
        let mut forward = items.clone();
        let mut shuffled = items;
        if !shuffled.is_empty() {
            let k = rotate % shuffled.len();
            shuffled.rotate_left(k);
            shuffled.reverse();
        }

        calculate_fdr(&mut forward, &mut data(0.05)).unwrap();
        calculate_fdr(&mut shuffled, &mut data(0.05)).unwrap();

        // one FDR per distinct score, independent of the input order
        let a = fdr_by_score(&forward);
        let b = fdr_by_score(&shuffled);
        let one_per_score = a.windows(2).all(|w| w[0].0 != w[1].0);

        let monotone = forward
            .windows(2)
            .all(|w| w[0].stats.q_value <= w[1].stats.q_value);
        a == b && one_per_score && monotone
    }
}
