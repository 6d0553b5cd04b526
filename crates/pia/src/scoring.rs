//! Protein scoring: reduce the scores of a protein's peptides into a single,
//! higher-is-better value.

use crate::error::ConfigError;
use crate::fdr::FdrItem;
use crate::report::ReportPeptide;
use crate::score::{ScoreKind, ScoreName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    /// Sum of the scores
    Additive,
    /// Product of the scores, naive-Bayes like for probabilities
    Multiplicative,
    /// Product of the `n`-th roots of the scores
    GeometricMean,
}

impl ScoringMethod {
    pub const ALL: [ScoringMethod; 3] = [
        ScoringMethod::Additive,
        ScoringMethod::Multiplicative,
        ScoringMethod::GeometricMean,
    ];

    pub fn short_name(&self) -> &'static str {
        match self {
            ScoringMethod::Additive => "scoring_additive",
            ScoringMethod::Multiplicative => "scoring_multiplicative",
            ScoringMethod::GeometricMean => "scoring_geometric_mean",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.short_name() == name)
            .ok_or_else(|| ConfigError::UnknownMethod {
                kind: "scoring method",
                name: name.into(),
            })
    }
}

/// Which PSM scores of a peptide take part in protein scoring
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsmForScoring {
    /// Best PSM set score per peptide
    #[default]
    Best,
    /// Every PSM of every peptide
    All,
}

impl PsmForScoring {
    pub fn short_name(&self) -> &'static str {
        match self {
            PsmForScoring::Best => "best",
            PsmForScoring::All => "all",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "best" => Ok(PsmForScoring::Best),
            "all" => Ok(PsmForScoring::All),
            _ => Err(ConfigError::UnknownMethod {
                kind: "PSM selection for scoring",
                name: name.into(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Scoring {
    method: ScoringMethod,
    used_score: ScoreName,
    used_spectra: PsmForScoring,
    /// Direction of `used_score`, resolved at construction
    #[serde(skip)]
    source_higher_better: bool,
}

impl Scoring {
    pub fn new(
        method: ScoringMethod,
        used_score: &str,
        used_spectra: PsmForScoring,
    ) -> Result<Self, ConfigError> {
        let kind = ScoreKind::from_description(used_score)
            .ok_or_else(|| ConfigError::UnknownScore(used_score.into()))?;
        let source_higher_better = kind
            .higher_score_better()
            .ok_or_else(|| ConfigError::UnknownScoreDirection(used_score.into()))?;
        Ok(Self {
            method,
            used_score: ScoreName::Known(kind),
            used_spectra,
            source_higher_better,
        })
    }

    /// Build a scoring from its short name and a settings map with the keys
    /// `used_score` and `used_spectra` (default `best`)
    pub fn from_settings(
        method: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let method = ScoringMethod::from_name(method)?;
        let used_score = settings
            .get("used_score")
            .ok_or_else(|| ConfigError::UnknownScore(String::new()))?;
        let used_spectra = settings
            .get("used_spectra")
            .map(|s| PsmForScoring::from_name(s))
            .transpose()?
            .unwrap_or_default();
        Self::new(method, used_score, used_spectra)
    }

    pub fn method(&self) -> ScoringMethod {
        self.method
    }

    pub fn used_score(&self) -> &ScoreName {
        &self.used_score
    }

    pub fn used_spectra(&self) -> PsmForScoring {
        self.used_spectra
    }

    /// Direction of the consumed PSM or peptide score
    pub fn source_higher_score_better(&self) -> bool {
        self.source_higher_better
    }

    /// Protein scores always grow with the evidence
    pub fn higher_score_better(&self) -> bool {
        true
    }

    /// The raw values this scoring consumes from `peptides`, NaN included
    pub fn selected_values(&self, peptides: &[ReportPeptide]) -> Vec<f64> {
        let name = self.used_score.short_name();
        match self.used_spectra {
            PsmForScoring::Best => peptides.iter().map(|p| p.score(name)).collect(),
            PsmForScoring::All => {
                let set_level = self
                    .used_score
                    .kind()
                    .map(|k| k.is_psm_set_score())
                    .unwrap_or(false);
                peptides
                    .iter()
                    .flat_map(|p| p.psm_sets.iter())
                    .flat_map(|set| match set_level {
                        true => vec![set.score(name)],
                        false => set.psms.iter().map(|psm| psm.score(name)).collect(),
                    })
                    .collect()
            }
        }
    }

    /// Score of a protein explained by `peptides`; NaN without any usable
    /// value
    pub fn calculate(&self, peptides: &[ReportPeptide]) -> f64 {
        let values = self
            .selected_values(peptides)
            .into_iter()
            .filter(|v| !v.is_nan())
            .collect::<Vec<_>>();
        if values.is_empty() {
            return f64::NAN;
        }
        let n = values.len() as f64;
        let higher = self.source_higher_better;

        match (self.method, higher) {
            (ScoringMethod::Additive, true) => values.iter().sum(),
            (ScoringMethod::Additive, false)
            | (ScoringMethod::Multiplicative, false) => values.iter().map(|v| -v.log10()).sum(),
            (ScoringMethod::Multiplicative, true) => values.iter().product(),
            (ScoringMethod::GeometricMean, true) => {
                values.iter().map(|v| v.powf(1.0 / n)).product()
            }
            (ScoringMethod::GeometricMean, false) => {
                values.iter().map(|v| -v.powf(1.0 / n).log10()).sum()
            }
        }
    }
}
