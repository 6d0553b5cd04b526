//! Continuous FDR score
//!
//! q-values are a step function of the score. The FDR score linearly
//! interpolates between the points where the q-value steps up, which yields a
//! strictly score-dependent value that can be compared across lists and
//! search engines.
//!
//! Jones et al., https://pubmed.ncbi.nlm.nih.gov/19253293/

use crate::error::ConfigError;
use crate::fdr::{calculate_fdr, FdrData, FdrItem, FdrResults};
use crate::score::{same_score, ScoreKind};
use itertools::Itertools;
use log::{debug, info};
use std::collections::BTreeMap;
use std::time::Instant;

/// An FDR score is never 0; this value is used instead
pub const SMALL_FDR_SCORE: f64 = 0.000001;

fn substitute(score: f64) -> f64 {
    match score == 0.0 {
        true => SMALL_FDR_SCORE,
        false => score,
    }
}

fn slope(s_last: f64, q_last: f64, s_next: f64, q_next: f64) -> f64 {
    let ds = s_next - s_last;
    match ds == 0.0 || !ds.is_finite() {
        true => 0.0,
        false => (q_next - q_last) / ds,
    }
}

/// Assign FDR scores from previously calculated q-values.
///
/// # Invariants
/// * `items` must have been sorted and FDR-calculated by
///   [`calculate_fdr`] with the same `data`
pub fn calculate_fdr_score<T: FdrItem>(items: &mut [T], data: &FdrData) -> Result<(), ConfigError> {
    let higher = data.higher_score_better()?;
    let name = data.score().short_name().to_string();
    let results = data.results().copied().unwrap_or_default();

    // NaN scores are sorted to the end of the list
    let valid = items
        .iter()
        .position(|item| item.score(&name).is_nan())
        .unwrap_or(items.len());
    items[valid..]
        .iter_mut()
        .for_each(|item| item.fdr_stats_mut().fdr_score = f64::NAN);
    let items = &mut items[..valid];

    if items.is_empty() {
        return Ok(());
    }
    // without targets every q-value and the artificial decoy anchor are infinite
    if !results.has_decoys() || results.targets == 0 {
        items
            .iter_mut()
            .for_each(|item| item.fdr_stats_mut().fdr_score = f64::INFINITY);
        return Ok(());
    }

    let top = items[0].score(&name);
    if items.iter().all(|item| same_score(item.score(&name), top)) {
        let q = substitute(items[0].fdr_stats().q_value);
        items
            .iter_mut()
            .for_each(|item| item.fdr_stats_mut().fdr_score = q);
        return Ok(());
    }

    // Flip higher-is-better scores so that the best item sits just above 0
    let best = match higher {
        true => {
            let second = items
                .iter()
                .map(|item| item.score(&name))
                .find(|s| !same_score(*s, top))
                .unwrap_or(top);
            Some(top + (top - second))
        }
        false => None,
    };
    let axis = |score: f64| match best {
        Some(best) => best - score,
        None => score,
    };

    let s = items
        .iter()
        .map(|item| axis(item.score(&name)))
        .collect::<Vec<_>>();
    let q = items
        .iter()
        .map(|item| item.fdr_stats().q_value)
        .collect::<Vec<_>>();
    let n = items.len();

    let mut steps = (0..n - 1).filter(|&i| q[i] < q[i + 1]).map(|i| i + 1);
    let trailing = (s[n - 1], results.artificial_decoy_fdr);
    let anchor = |step: Option<usize>| match step {
        Some(k) => (s[k], q[k]),
        None => trailing,
    };

    let (mut s_last, mut q_last) = (0.0, 0.0);
    let mut next = steps.next();
    let (mut s_next, mut q_next) = anchor(next);
    let mut g = slope(s_last, q_last, s_next, q_next);

    for (ix, item) in items.iter_mut().enumerate() {
        if next == Some(ix) {
            s_last = s_next;
            q_last = q_next;
            next = steps.next();
            (s_next, q_next) = anchor(next);
            g = slope(s_last, q_last, s_next, q_next);
        }
        item.fdr_stats_mut().fdr_score = substitute((s[ix] - s_last) * g + q_last);
    }
    Ok(())
}

/// Anything that can take part in the combined FDR score: an item built from
/// PSMs of several input files
pub trait CombinedFdrItem: FdrItem {
    /// `(file, fdr_score)` of every underlying PSM
    fn file_fdr_scores(&self) -> Vec<(u32, f64)>;
    fn set_average_fdr_score(&mut self, score: f64);
}

/// Geometric mean of the valid (non-NaN) values, NaN if there are none
pub fn geometric_mean<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let (sum, n) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, n), v| (sum + v.ln(), n + 1));
    match n {
        0 => f64::NAN,
        _ => (sum / n as f64).exp(),
    }
}

/// Combine per-file FDR scores into one FDR score per item.
///
/// Items are grouped by the set of files that contributed a valid FDR score.
/// Each group is ranked by its average FDR score; groups with more than two
/// items are FDR-scored, smaller groups keep their average FDR score. `data`
/// provides the decoy settings and threshold and receives the overall counts.
pub fn calculate_combined_fdr_score<T: CombinedFdrItem>(
    items: &mut [T],
    data: &mut FdrData,
) -> Result<FdrResults, ConfigError> {
    let time = Instant::now();
    let mut keys = Vec::with_capacity(items.len());
    for item in items.iter_mut() {
        let scores = item.file_fdr_scores();
        item.set_average_fdr_score(geometric_mean(scores.iter().map(|(_, s)| *s)));
        let key = scores
            .iter()
            .filter(|(_, s)| !s.is_nan())
            .map(|(f, _)| *f)
            .sorted()
            .dedup()
            .join(":");
        keys.push(key);
    }

    // Reorder so that each file combination is one contiguous slice
    let mut order = (0..items.len()).collect::<Vec<_>>();
    order.sort_by(|a, b| keys[*a].cmp(&keys[*b]));
    apply_order(items, &order);
    let mut ranges: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for (pos, &ix) in order.iter().enumerate() {
        let entry = ranges.entry(keys[ix].clone()).or_insert((pos, pos));
        entry.1 = pos + 1;
    }

    let mut group_data = data.clone();
    group_data.set_score(ScoreKind::AverageFdrScore.into());
    for (key, (start, end)) in ranges {
        let group = &mut items[start..end];
        if key.is_empty() {
            group
                .iter_mut()
                .for_each(|item| item.fdr_stats_mut().fdr_score = f64::NAN);
            continue;
        }
        debug!("combined FDR score for files {} ({} items)", key, group.len());
        calculate_fdr(group, &mut group_data)?;
        match group.len() > 2 {
            true => calculate_fdr_score(group, &group_data)?,
            false => group.iter_mut().for_each(|item| {
                let average = item.score(ScoreKind::AverageFdrScore.short_name());
                item.fdr_stats_mut().fdr_score = average;
            }),
        }
    }

    let threshold = data.threshold();
    let mut results = FdrResults {
        score_at_threshold: threshold,
        artificial_decoy_fdr: f64::NAN,
        ..Default::default()
    };
    for item in items.iter_mut() {
        let score = item.fdr_stats().fdr_score;
        if score.is_nan() {
            item.fdr_stats_mut().fdr_good = false;
            continue;
        }
        let good = score <= threshold;
        item.fdr_stats_mut().fdr_good = good;
        results.items += 1;
        match (item.is_decoy(), good) {
            (true, true) => {
                results.decoys += 1;
                results.fdr_good_decoys += 1
            }
            (true, false) => results.decoys += 1,
            (false, true) => {
                results.targets += 1;
                results.fdr_good_targets += 1
            }
            (false, false) => results.targets += 1,
        }
    }

    data.set_score(ScoreKind::PsmCombinedFdrScore.into());
    data.set_results(results);
    info!(
        "- combined FDR score: {} of {} targets pass {} in {}ms",
        results.fdr_good_targets,
        results.targets,
        threshold,
        time.elapsed().as_millis()
    );
    Ok(results)
}

/// Permute `items` in place so that `items[i]` becomes the former
/// `items[order[i]]`
fn apply_order<T>(items: &mut [T], order: &[usize]) {
    let mut position = (0..items.len()).collect::<Vec<_>>();
    let mut location = (0..items.len()).collect::<Vec<_>>();
    for (target, &original) in order.iter().enumerate() {
        let current = location[original];
        items.swap(target, current);
        let displaced = position[target];
        position[current] = displaced;
        location[displaced] = current;
        position[target] = original;
        location[original] = target;
    }
}
