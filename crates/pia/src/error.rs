use crate::graph::{AccessionIx, FileIx, GroupIx, PeptideIx, PsmIx};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("inference cancelled after {completed} of {total} clusters")]
    Cancelled { completed: usize, total: usize },
}

/// Inconsistent references inside the evidence graph. These are fatal for the
/// ingestion that produced them.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("peptide `{peptide}` references unknown accession {accession:?}")]
    UnknownAccession {
        peptide: String,
        accession: AccessionIx,
    },
    #[error("spectrum match {psm:?} references unknown peptide {peptide:?}")]
    UnknownPeptide { psm: PsmIx, peptide: PeptideIx },
    #[error("{entity} references unknown input file {file:?}")]
    UnknownFile { entity: String, file: FileIx },
    #[error("peptide `{peptide}` references unknown spectrum match {psm:?}")]
    UnknownPsm { peptide: String, psm: PsmIx },
    #[error("group {group:?} references unknown group {child:?}")]
    UnknownGroup { group: GroupIx, child: GroupIx },
    #[error("duplicate {entity} id {id}")]
    DuplicateId { entity: &'static str, id: u64 },
    #[error("unresolved {entity} reference {id}")]
    UnresolvedReference { entity: &'static str, id: u64 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no scoring method set for protein inference")]
    MissingScoring,
    #[error("unknown score `{0}`")]
    UnknownScore(String),
    #[error("score `{0}` has no known comparison direction")]
    UnknownScoreDirection(String),
    #[error("unknown {kind} `{name}`")]
    UnknownMethod { kind: &'static str, name: String },
    #[error("decoy strategy `accession_pattern` requires a decoy pattern")]
    MissingDecoyPattern,
    #[error("invalid decoy pattern `{pattern}`: {reason}")]
    InvalidDecoyPattern { pattern: String, reason: String },
    #[error("no decoy information available for {level} level FDR with strategy `{strategy}`")]
    NoDecoyInformation {
        level: &'static str,
        strategy: &'static str,
    },
    #[error("decoy strategy `{strategy}` is not applicable at {level} level")]
    StrategyNotApplicable {
        level: &'static str,
        strategy: &'static str,
    },
    #[error("FDR threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
}
