//! Named, direction-aware score values.
//!
//! Search engines report scores as plain numbers; whether a bigger number is a
//! better match depends on the score. [`ScoreKind`] is the registry of known
//! scores, everything else is carried as a custom [`ScoreName`] whose direction
//! may be unknown.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    AverageFdrScore,
    PsmCombinedFdrScore,
    PsmFdrScore,
    PsmQValue,
    PeptideFdrScore,
    PeptideQValue,
    ProteinQValue,
    MascotExpect,
    MascotScore,
    SequestProbability,
    SequestSpscore,
    SequestXcorr,
    XtandemExpect,
    XtandemHyperscore,
    MsgfRawscore,
    MsgfDenovoscore,
    MsgfSpecevalue,
    MsgfEvalue,
    AmandaScore,
    MyrimatchMvh,
    OpenmsPosteriorErrorProbability,
    OpenmsPosteriorProbability,
    FastaSequenceCount,
    FastaAccessionCount,
    ProteinScore,
}

impl ScoreKind {
    pub const ALL: [ScoreKind; 25] = [
        ScoreKind::AverageFdrScore,
        ScoreKind::PsmCombinedFdrScore,
        ScoreKind::PsmFdrScore,
        ScoreKind::PsmQValue,
        ScoreKind::PeptideFdrScore,
        ScoreKind::PeptideQValue,
        ScoreKind::ProteinQValue,
        ScoreKind::MascotExpect,
        ScoreKind::MascotScore,
        ScoreKind::SequestProbability,
        ScoreKind::SequestSpscore,
        ScoreKind::SequestXcorr,
        ScoreKind::XtandemExpect,
        ScoreKind::XtandemHyperscore,
        ScoreKind::MsgfRawscore,
        ScoreKind::MsgfDenovoscore,
        ScoreKind::MsgfSpecevalue,
        ScoreKind::MsgfEvalue,
        ScoreKind::AmandaScore,
        ScoreKind::MyrimatchMvh,
        ScoreKind::OpenmsPosteriorErrorProbability,
        ScoreKind::OpenmsPosteriorProbability,
        ScoreKind::FastaSequenceCount,
        ScoreKind::FastaAccessionCount,
        ScoreKind::ProteinScore,
    ];

    pub fn short_name(&self) -> &'static str {
        match self {
            ScoreKind::AverageFdrScore => "average_fdr_score",
            ScoreKind::PsmCombinedFdrScore => "psm_combined_fdr_score",
            ScoreKind::PsmFdrScore => "psm_fdr_score",
            ScoreKind::PsmQValue => "psm_q_value",
            ScoreKind::PeptideFdrScore => "peptide_fdr_score",
            ScoreKind::PeptideQValue => "peptide_q_value",
            ScoreKind::ProteinQValue => "protein_q_value",
            ScoreKind::MascotExpect => "mascot_expect",
            ScoreKind::MascotScore => "mascot_score",
            ScoreKind::SequestProbability => "sequest_probability",
            ScoreKind::SequestSpscore => "sequest_spscore",
            ScoreKind::SequestXcorr => "sequest_xcorr",
            ScoreKind::XtandemExpect => "xtandem_expect",
            ScoreKind::XtandemHyperscore => "xtandem_hyperscore",
            ScoreKind::MsgfRawscore => "msgf_rawscore",
            ScoreKind::MsgfDenovoscore => "msgf_denovoscore",
            ScoreKind::MsgfSpecevalue => "msgf_specevalue",
            ScoreKind::MsgfEvalue => "msgf_evalue",
            ScoreKind::AmandaScore => "amanda_score",
            ScoreKind::MyrimatchMvh => "myrimatch_mvh",
            ScoreKind::OpenmsPosteriorErrorProbability => "openms_posterior_error_probability",
            ScoreKind::OpenmsPosteriorProbability => "openms_posterior_probability",
            ScoreKind::FastaSequenceCount => "fasta_sequence_count",
            ScoreKind::FastaAccessionCount => "fasta_accession_count",
            ScoreKind::ProteinScore => "protein_score",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScoreKind::AverageFdrScore => "Average FDR Score",
            ScoreKind::PsmCombinedFdrScore => "PSM Combined FDR Score",
            ScoreKind::PsmFdrScore => "PSM FDRScore",
            ScoreKind::PsmQValue => "PSM q-value",
            ScoreKind::PeptideFdrScore => "Peptide FDRScore",
            ScoreKind::PeptideQValue => "Peptide q-value",
            ScoreKind::ProteinQValue => "Protein q-value",
            ScoreKind::MascotExpect => "Mascot Expect",
            ScoreKind::MascotScore => "Mascot Ion Score",
            ScoreKind::SequestProbability => "SEQUEST Probability",
            ScoreKind::SequestSpscore => "SEQUEST SpScore",
            ScoreKind::SequestXcorr => "XCorr",
            ScoreKind::XtandemExpect => "X!Tandem Expect",
            ScoreKind::XtandemHyperscore => "X!Tandem Hyperscore",
            ScoreKind::MsgfRawscore => "MS-GF RawScore",
            ScoreKind::MsgfDenovoscore => "MS-GF DeNovoScore",
            ScoreKind::MsgfSpecevalue => "MS-GF SpecEValue",
            ScoreKind::MsgfEvalue => "MS-GF EValue",
            ScoreKind::AmandaScore => "Amanda Score",
            ScoreKind::MyrimatchMvh => "MyriMatch MVH",
            ScoreKind::OpenmsPosteriorErrorProbability => "OpenMS Posterior Error Probability",
            ScoreKind::OpenmsPosteriorProbability => "OpenMS Posterior Probability",
            ScoreKind::FastaSequenceCount => "FASTA Sequence Count",
            ScoreKind::FastaAccessionCount => "FASTA Accession Count",
            ScoreKind::ProteinScore => "Protein score",
        }
    }

    /// `None` when the comparison direction is not known for this score
    pub fn higher_score_better(&self) -> Option<bool> {
        match self {
            ScoreKind::AverageFdrScore
            | ScoreKind::PsmCombinedFdrScore
            | ScoreKind::PsmFdrScore
            | ScoreKind::PsmQValue
            | ScoreKind::PeptideFdrScore
            | ScoreKind::PeptideQValue
            | ScoreKind::ProteinQValue
            | ScoreKind::MascotExpect
            | ScoreKind::XtandemExpect
            | ScoreKind::MsgfSpecevalue
            | ScoreKind::MsgfEvalue
            | ScoreKind::OpenmsPosteriorErrorProbability => Some(false),
            ScoreKind::SequestProbability => None,
            ScoreKind::MascotScore
            | ScoreKind::SequestSpscore
            | ScoreKind::SequestXcorr
            | ScoreKind::XtandemHyperscore
            | ScoreKind::MsgfRawscore
            | ScoreKind::MsgfDenovoscore
            | ScoreKind::AmandaScore
            | ScoreKind::MyrimatchMvh
            | ScoreKind::OpenmsPosteriorProbability
            | ScoreKind::FastaSequenceCount
            | ScoreKind::FastaAccessionCount
            | ScoreKind::ProteinScore => Some(true),
        }
    }

    /// Scores that only exist on merged PSM sets, never on a single PSM
    pub fn is_psm_set_score(&self) -> bool {
        matches!(
            self,
            ScoreKind::AverageFdrScore | ScoreKind::PsmCombinedFdrScore
        )
    }

    /// Exact short name lookup, without allocating
    pub fn from_short_name(short_name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.short_name() == short_name)
    }

    /// Look up a score by short name, name or lower-cased name
    pub fn from_description(description: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| {
            kind.short_name() == description
                || kind.name() == description
                || kind.name().to_lowercase() == description
        })
    }
}

impl std::fmt::Display for ScoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreName {
    Known(ScoreKind),
    Custom {
        short_name: String,
        higher_score_better: Option<bool>,
    },
}

impl ScoreName {
    /// Resolve a description against the registry, falling back to a custom
    /// score with unknown direction
    pub fn parse(description: &str) -> Self {
        match ScoreKind::from_description(description) {
            Some(kind) => ScoreName::Known(kind),
            None => ScoreName::Custom {
                short_name: description.to_string(),
                higher_score_better: None,
            },
        }
    }

    pub fn short_name(&self) -> &str {
        match self {
            ScoreName::Known(kind) => kind.short_name(),
            ScoreName::Custom { short_name, .. } => short_name,
        }
    }

    pub fn higher_score_better(&self) -> Option<bool> {
        match self {
            ScoreName::Known(kind) => kind.higher_score_better(),
            ScoreName::Custom {
                higher_score_better,
                ..
            } => *higher_score_better,
        }
    }

    pub fn kind(&self) -> Option<ScoreKind> {
        match self {
            ScoreName::Known(kind) => Some(*kind),
            ScoreName::Custom { .. } => None,
        }
    }
}

impl From<ScoreKind> for ScoreName {
    fn from(kind: ScoreKind) -> Self {
        ScoreName::Known(kind)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreModel {
    pub name: ScoreName,
    pub value: f64,
}

impl ScoreModel {
    pub fn new<N: Into<ScoreName>>(name: N, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn short_name(&self) -> &str {
        self.name.short_name()
    }

    /// Rank two scores of the same kind: `Less` means `self` is the better
    /// score. Scores of different kinds, or of unknown direction, compare
    /// equal unless one of them is NaN.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        if self.name != other.name {
            return nan_last(self.value, other.value).unwrap_or(Ordering::Equal);
        }
        match self.name.higher_score_better() {
            Some(higher) => compare_scores(self.value, other.value, higher),
            None => nan_last(self.value, other.value).unwrap_or(Ordering::Equal),
        }
    }
}

fn nan_last(a: f64, b: f64) -> Option<Ordering> {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Some(Ordering::Equal),
        (true, false) => Some(Ordering::Greater),
        (false, true) => Some(Ordering::Less),
        (false, false) => None,
    }
}

/// Compare two raw score values; `Less` means `a` is better than `b`.
/// NaN is worse than any number.
pub fn compare_scores(a: f64, b: f64, higher_score_better: bool) -> Ordering {
    if let Some(ord) = nan_last(a, b) {
        return ord;
    }
    match higher_score_better {
        true => b.total_cmp(&a),
        false => a.total_cmp(&b),
    }
}

/// Scores are "the same" for ranking purposes if they are bitwise equal or
/// both NaN
pub fn same_score(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}
