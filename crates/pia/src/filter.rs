//! Composable, JSON-configurable filters for PSMs, peptides and proteins.
//!
//! ```json
//! {"filter": "charge", "comparison": "greater_equal", "value": 2}
//! {"filter": "sequence", "pattern": "^M", "negate": true}
//! ```

use crate::fdr::FdrItem;
use crate::graph::EvidenceGraph;
use crate::report::{ReportPeptide, ReportProtein, ReportPsm, ReportPsmSet};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
}

impl Comparison {
    /// Whether `value <op> target` holds. Comparisons involving NaN never do.
    pub fn holds<T: PartialOrd>(&self, value: T, target: T) -> bool {
        match self {
            Comparison::Less => value < target,
            Comparison::LessEqual => value <= target,
            Comparison::Equal => value == target,
            Comparison::GreaterEqual => value >= target,
            Comparison::Greater => value > target,
        }
    }
}

/// Regular expression that (de)serializes as its source string
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Pattern)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl TryFrom<String> for Pattern {
    type Error = regex::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Pattern::new(&value)
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.0.as_str().to_string()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

/// A single test on an item of type `T`
pub trait Criterion<T: ?Sized> {
    fn test(&self, item: &T, graph: &EvidenceGraph) -> bool;
}

/// A criterion plus optional negation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter<K> {
    #[serde(flatten)]
    pub kind: K,
    #[serde(default)]
    pub negate: bool,
}

impl<K> Filter<K> {
    pub fn new(kind: K) -> Self {
        Self {
            kind,
            negate: false,
        }
    }

    pub fn negated(kind: K) -> Self {
        Self { kind, negate: true }
    }
}

impl<T: ?Sized, K: Criterion<T>> Criterion<T> for Filter<K> {
    fn test(&self, item: &T, graph: &EvidenceGraph) -> bool {
        self.kind.test(item, graph) != self.negate
    }
}

/// Whether `item` passes every filter
pub fn passes<T: ?Sized, K: Criterion<T>>(filters: &[Filter<K>], item: &T, graph: &EvidenceGraph) -> bool {
    filters.iter().all(|f| f.test(item, graph))
}

/// Common view of single PSMs and PSM sets for PSM level filtering
pub trait PsmLike: FdrItem {
    fn charge(&self) -> i32;
    fn mz(&self) -> f64;
    fn delta_mass(&self) -> f64;
    fn missed_cleavages(&self) -> i32;
    fn sequence(&self) -> &str;
    fn unique(&self) -> bool;
    fn rank(&self) -> Option<u32>;
}

impl PsmLike for ReportPsm {
    fn charge(&self) -> i32 {
        self.charge
    }

    fn mz(&self) -> f64 {
        self.mz
    }

    fn delta_mass(&self) -> f64 {
        self.delta_mass
    }

    fn missed_cleavages(&self) -> i32 {
        self.missed_cleavages
    }

    fn sequence(&self) -> &str {
        &self.sequence
    }

    fn unique(&self) -> bool {
        self.unique
    }

    fn rank(&self) -> Option<u32> {
        self.rank
    }
}

impl PsmLike for ReportPsmSet {
    fn charge(&self) -> i32 {
        ReportPsmSet::charge(self)
    }

    fn mz(&self) -> f64 {
        ReportPsmSet::mz(self)
    }

    fn delta_mass(&self) -> f64 {
        self.psms.first().map(|p| p.delta_mass).unwrap_or(f64::NAN)
    }

    fn missed_cleavages(&self) -> i32 {
        self.psms.first().map(|p| p.missed_cleavages).unwrap_or(0)
    }

    fn sequence(&self) -> &str {
        &self.sequence
    }

    fn unique(&self) -> bool {
        ReportPsmSet::unique(self)
    }

    fn rank(&self) -> Option<u32> {
        self.rank
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum PsmFilter {
    Charge { comparison: Comparison, value: i32 },
    DeltaMass { comparison: Comparison, value: f64 },
    Mz { comparison: Comparison, value: f64 },
    MissedCleavages { comparison: Comparison, value: i32 },
    Sequence { pattern: Pattern },
    Decoy { value: bool },
    Unique { value: bool },
    Score { score: String, comparison: Comparison, value: f64 },
    FdrGood { value: bool },
    QValue { comparison: Comparison, value: f64 },
    Rank { comparison: Comparison, value: u32 },
}

impl<T: PsmLike> Criterion<T> for PsmFilter {
    fn test(&self, psm: &T, _: &EvidenceGraph) -> bool {
        match self {
            PsmFilter::Charge { comparison, value } => comparison.holds(psm.charge(), *value),
            PsmFilter::DeltaMass { comparison, value } => comparison.holds(psm.delta_mass(), *value),
            PsmFilter::Mz { comparison, value } => comparison.holds(psm.mz(), *value),
            PsmFilter::MissedCleavages { comparison, value } => {
                comparison.holds(psm.missed_cleavages(), *value)
            }
            PsmFilter::Sequence { pattern } => pattern.is_match(psm.sequence()),
            PsmFilter::Decoy { value } => psm.is_decoy() == *value,
            PsmFilter::Unique { value } => psm.unique() == *value,
            PsmFilter::Score {
                score,
                comparison,
                value,
            } => comparison.holds(psm.score(score), *value),
            PsmFilter::FdrGood { value } => psm.fdr_stats().fdr_good == *value,
            PsmFilter::QValue { comparison, value } => {
                comparison.holds(psm.fdr_stats().q_value, *value)
            }
            PsmFilter::Rank { comparison, value } => psm
                .rank()
                .map(|rank| comparison.holds(rank, *value))
                .unwrap_or(false),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum PeptideFilter {
    NrPsms { comparison: Comparison, value: usize },
    NrSpectra { comparison: Comparison, value: usize },
    Sequence { pattern: Pattern },
    Decoy { value: bool },
    Unique { value: bool },
    Score { score: String, comparison: Comparison, value: f64 },
    QValue { comparison: Comparison, value: f64 },
}

impl Criterion<ReportPeptide> for PeptideFilter {
    fn test(&self, peptide: &ReportPeptide, _: &EvidenceGraph) -> bool {
        match self {
            PeptideFilter::NrPsms { comparison, value } => comparison.holds(peptide.nr_psms(), *value),
            PeptideFilter::NrSpectra { comparison, value } => {
                comparison.holds(peptide.nr_spectra(), *value)
            }
            PeptideFilter::Sequence { pattern } => pattern.is_match(&peptide.sequence),
            PeptideFilter::Decoy { value } => peptide.decoy == *value,
            PeptideFilter::Unique { value } => peptide.unique() == *value,
            PeptideFilter::Score {
                score,
                comparison,
                value,
            } => comparison.holds(peptide.score(score), *value),
            PeptideFilter::QValue { comparison, value } => {
                comparison.holds(peptide.fdr.q_value, *value)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum ProteinFilter {
    Score { comparison: Comparison, value: f64 },
    NrPeptides { comparison: Comparison, value: usize },
    NrPsms { comparison: Comparison, value: usize },
    NrSpectra { comparison: Comparison, value: usize },
    NrUniquePeptides { comparison: Comparison, value: usize },
    /// Passes if any accession of the protein matches
    Accession { pattern: Pattern },
    Decoy { value: bool },
    QValue { comparison: Comparison, value: f64 },
}

impl Criterion<ReportProtein> for ProteinFilter {
    fn test(&self, protein: &ReportProtein, graph: &EvidenceGraph) -> bool {
        match self {
            ProteinFilter::Score { comparison, value } => comparison.holds(protein.score, *value),
            ProteinFilter::NrPeptides { comparison, value } => {
                comparison.holds(protein.nr_peptides(), *value)
            }
            ProteinFilter::NrPsms { comparison, value } => comparison.holds(protein.nr_psms(), *value),
            ProteinFilter::NrSpectra { comparison, value } => {
                comparison.holds(protein.nr_spectra(), *value)
            }
            ProteinFilter::NrUniquePeptides { comparison, value } => {
                comparison.holds(protein.nr_unique_peptides(), *value)
            }
            ProteinFilter::Accession { pattern } => protein
                .accessions
                .iter()
                .any(|acc| pattern.is_match(&graph[*acc].accession)),
            ProteinFilter::Decoy { value } => protein.decoy == *value,
            ProteinFilter::QValue { comparison, value } => {
                comparison.holds(protein.fdr.q_value, *value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons() {
        assert!(Comparison::Less.holds(1, 2));
        assert!(!Comparison::Less.holds(2, 2));
        assert!(Comparison::LessEqual.holds(2, 2));
        assert!(Comparison::Equal.holds(0.5, 0.5));
        assert!(Comparison::GreaterEqual.holds(3, 2));
        assert!(!Comparison::Greater.holds(f64::NAN, 0.0));
        assert!(!Comparison::LessEqual.holds(f64::NAN, 0.0));
    }

    #[test]
    fn deserialize() -> Result<(), serde_json::Error> {
        let filters: Vec<Filter<PsmFilter>> = serde_json::from_str(
            r#"[
                {"filter": "charge", "comparison": "greater_equal", "value": 2},
                {"filter": "sequence", "pattern": "^M", "negate": true},
                {"filter": "score", "score": "mascot_score", "comparison": "greater", "value": 20.5}
            ]"#,
        )?;
        assert_eq!(
            filters[0],
            Filter::new(PsmFilter::Charge {
                comparison: Comparison::GreaterEqual,
                value: 2
            })
        );
        assert!(filters[1].negate);
        assert!(matches!(filters[2].kind, PsmFilter::Score { value, .. } if value == 20.5));

        let bad: Result<Filter<PeptideFilter>, _> =
            serde_json::from_str(r#"{"filter": "sequence", "pattern": "(["}"#);
        assert!(bad.is_err());
        Ok(())
    }

    #[test]
    fn negation() {
        let graph = EvidenceGraph::default();
        let set = ReportPsmSet::new(ReportPsm {
            psm: Default::default(),
            file: Default::default(),
            sequence: "MPEPTIDE".into(),
            peptide_key: "MPEPTIDE".into(),
            identification_key: String::new(),
            spectrum_key: String::new(),
            charge: 3,
            mz: 500.0,
            delta_mass: 0.01,
            rt: None,
            missed_cleavages: 1,
            accessions: vec![],
            unique: true,
            decoy: false,
            scores: vec![],
            fdr: Default::default(),
            rank: None,
        });

        let starts_with_m = PsmFilter::Sequence {
            pattern: Pattern::new("^M").unwrap(),
        };
        assert!(Filter::new(starts_with_m.clone()).test(&set, &graph));
        assert!(!Filter::negated(starts_with_m).test(&set, &graph));

        let filters = vec![
            Filter::new(PsmFilter::Charge {
                comparison: Comparison::Equal,
                value: 3,
            }),
            Filter::new(PsmFilter::Decoy { value: false }),
            Filter::negated(PsmFilter::MissedCleavages {
                comparison: Comparison::Greater,
                value: 1,
            }),
        ];
        assert!(passes(&filters, &set, &graph));

        // unranked items never pass a rank filter
        let rank = Filter::new(PsmFilter::Rank {
            comparison: Comparison::LessEqual,
            value: 1,
        });
        assert!(!rank.test(&set, &graph));
    }
}
