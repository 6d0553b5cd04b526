use anyhow::{ensure, Context};
use clap::ArgMatches;
use pia_core::fdr::{DecoyStrategy, FdrSettings};
use pia_core::filter::{Filter, PeptideFilter, ProteinFilter, PsmFilter};
use pia_core::inference::{Inference, InferenceMethod};
use pia_core::report::PsmSetSettings;
use pia_core::score::ScoreName;
use pia_core::scoring::{PsmForScoring, Scoring, ScoringMethod};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_FDR_THRESHOLD: f64 = 0.01;

#[derive(Serialize)]
/// Actual analysis parameters - may include overrides or default values not set by user
pub struct Analysis {
    pub version: String,
    pub intermediate: String,
    pub consider_modifications: bool,
    pub psm_set: PsmSetSettings,
    pub psm: LevelSettings<PsmFilter>,
    pub peptide: LevelSettings<PeptideFilter>,
    pub protein: ProteinSettings,
    pub threads: usize,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,
}

#[derive(Serialize)]
pub struct LevelSettings<K> {
    pub fdr: Option<FdrSettings>,
    pub filters: Vec<Filter<K>>,
}

#[derive(Serialize)]
pub struct ProteinSettings {
    pub inference: Inference,
    pub fdr: Option<FdrSettings>,
    pub filters: Vec<Filter<ProteinFilter>>,
}

#[derive(Deserialize)]
/// Input analysis parameters deserialized from JSON file
pub struct Input {
    intermediate: Option<String>,
    output_directory: Option<String>,
    consider_modifications: Option<bool>,
    psm_set: Option<PsmSetOptions>,
    psm: Option<LevelOptions<PsmFilter>>,
    peptide: Option<LevelOptions<PeptideFilter>>,
    protein: Option<ProteinOptions>,
    threads: Option<usize>,
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct PsmSetOptions {
    mz: Option<bool>,
    rt: Option<bool>,
    source_id: Option<bool>,
    title: Option<bool>,
    sequence: Option<bool>,
    modifications: Option<bool>,
    charge: Option<bool>,
    file: Option<bool>,
}

impl From<PsmSetOptions> for PsmSetSettings {
    fn from(value: PsmSetOptions) -> Self {
        let default = PsmSetSettings::default();
        let settings = PsmSetSettings {
            mz: value.mz.unwrap_or(default.mz),
            rt: value.rt.unwrap_or(default.rt),
            source_id: value.source_id.unwrap_or(default.source_id),
            title: value.title.unwrap_or(default.title),
            sequence: value.sequence.unwrap_or(default.sequence),
            modifications: value.modifications.unwrap_or(default.modifications),
            charge: value.charge.unwrap_or(default.charge),
            file: value.file.unwrap_or(default.file),
        };
        if settings.file {
            log::warn!("psm_set.file is set: PSMs of different files are never merged");
        }
        if !(settings.mz || settings.rt || settings.source_id || settings.title) {
            log::warn!("psm_set uses no spectrum information, PSM sets only differ by peptide");
        }
        settings
    }
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct FdrOptions {
    strategy: Option<String>,
    pattern: Option<String>,
    threshold: Option<f64>,
    score: Option<String>,
}

impl FdrOptions {
    /// Fill unset fields from `default`; the score must be known by then
    fn build(self, level: &str, default: FdrSettings) -> anyhow::Result<FdrSettings> {
        let settings = FdrSettings {
            strategy: self
                .strategy
                .as_deref()
                .map(DecoyStrategy::from_name)
                .unwrap_or(default.strategy),
            pattern: self.pattern.or(default.pattern),
            threshold: self.threshold.unwrap_or(default.threshold),
            score: self.score.unwrap_or(default.score),
        };
        ensure!(
            !settings.score.is_empty(),
            "`{level}.fdr.score` must be set. For more information try '--help'"
        );
        if ScoreName::parse(&settings.score).higher_score_better().is_none() {
            log::warn!(
                "{}.fdr.score `{}` has no known direction, FDR estimation will fail",
                level,
                settings.score
            );
        }
        if settings.threshold > 0.05 {
            log::warn!("{}.fdr.threshold is higher than expected", level);
        }
        Ok(settings)
    }
}

#[derive(Deserialize)]
pub struct LevelOptions<K> {
    fdr: Option<FdrOptions>,
    filters: Option<Vec<Filter<K>>>,
}

impl<K> Default for LevelOptions<K> {
    fn default() -> Self {
        Self {
            fdr: None,
            filters: None,
        }
    }
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ScoringOptions {
    method: Option<String>,
    used_score: Option<String>,
    used_spectra: Option<PsmForScoring>,
}

impl TryFrom<ScoringOptions> for Scoring {
    type Error = anyhow::Error;

    fn try_from(value: ScoringOptions) -> Result<Self, Self::Error> {
        let method = match value.method {
            Some(name) => ScoringMethod::from_name(&name)?,
            None => ScoringMethod::Additive,
        };
        let used_score = value
            .used_score
            .unwrap_or_else(|| "psm_combined_fdr_score".into());
        let scoring = Scoring::new(method, &used_score, value.used_spectra.unwrap_or_default())
            .with_context(|| format!("Invalid protein scoring over `{used_score}`"))?;
        Ok(scoring)
    }
}

#[derive(Deserialize, Default)]
pub struct ProteinOptions {
    method: Option<String>,
    scoring: Option<ScoringOptions>,
    filters: Option<Vec<Filter<ProteinFilter>>>,
    inference_filters: Option<InferenceFilterOptions>,
    fdr: Option<FdrOptions>,
}

/// Filters applied to the evidence inside protein inference
#[derive(Deserialize, Default)]
pub struct InferenceFilterOptions {
    psm: Option<Vec<Filter<PsmFilter>>>,
    peptide: Option<Vec<Filter<PeptideFilter>>>,
    protein: Option<Vec<Filter<ProteinFilter>>>,
}

impl ProteinOptions {
    fn build_inference(&mut self, threads: usize) -> anyhow::Result<Inference> {
        let method = match self.method.as_deref() {
            Some(name) => InferenceMethod::from_name(name)?,
            None => InferenceMethod::OccamsRazor,
        };
        let scoring = Scoring::try_from(self.scoring.take().unwrap_or_default())?;
        let filters = self.inference_filters.take().unwrap_or_default();

        let mut inference = Inference::new(method, scoring);
        inference.psm_filters = filters.psm.unwrap_or_default();
        inference.peptide_filters = filters.peptide.unwrap_or_default();
        inference.protein_filters = filters.protein.unwrap_or_default();
        inference.threads = threads;
        Ok(inference)
    }
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("missing required argument `parameters`")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(intermediate) = matches.get_one::<String>("intermediate") {
            log::trace!("overriding `intermediate` parameter.");
            input.intermediate = Some(intermediate.into());
        }
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(threads) = matches.get_one::<u16>("threads").copied() {
            log::trace!("overriding `threads` parameter.");
            input.threads = Some(threads as usize);
        }

        ensure!(
            input.intermediate.is_some(),
            "`intermediate` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        pia_core::read_json(path.as_ref()).map_err(anyhow::Error::from)
    }

    pub fn build(self) -> anyhow::Result<Analysis> {
        let intermediate = self
            .intermediate
            .context("`intermediate` must be set. For more information try '--help'")?;
        let threads = self.threads.unwrap_or_else(num_cpus::get);
        if threads > num_cpus::get() {
            log::warn!(
                "{} threads requested, but only {} CPUs are available",
                threads,
                num_cpus::get()
            );
        }

        let psm = self.psm.unwrap_or_default();
        let psm_fdr = psm
            .fdr
            .map(|fdr| {
                fdr.build(
                    "psm",
                    FdrSettings {
                        strategy: DecoyStrategy::AccessionPattern,
                        pattern: None,
                        threshold: DEFAULT_FDR_THRESHOLD,
                        score: String::new(),
                    },
                )
            })
            .transpose()?;

        let peptide = self.peptide.unwrap_or_default();
        let peptide_fdr = peptide
            .fdr
            .map(|fdr| {
                fdr.build(
                    "peptide",
                    FdrSettings {
                        strategy: DecoyStrategy::Inherit,
                        pattern: None,
                        threshold: DEFAULT_FDR_THRESHOLD,
                        score: "psm_combined_fdr_score".into(),
                    },
                )
            })
            .transpose()?;

        let mut protein = self.protein.unwrap_or_default();
        let inference = protein.build_inference(threads)?;
        let protein_fdr = protein
            .fdr
            .take()
            .map(|fdr| {
                fdr.build(
                    "protein",
                    FdrSettings {
                        strategy: DecoyStrategy::Inherit,
                        pattern: None,
                        threshold: DEFAULT_FDR_THRESHOLD,
                        score: "protein_score".into(),
                    },
                )
            })
            .transpose()?;

        let fdr_scored = inference
            .scoring
            .as_ref()
            .and_then(|s| s.used_score().kind())
            .map(|kind| kind.is_psm_set_score())
            .unwrap_or(false);
        if fdr_scored && psm_fdr.is_none() {
            log::warn!(
                "protein scoring uses FDR scores, but `psm.fdr` is not set: protein scores will be NaN"
            );
        }

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path)?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Analysis {
            version: clap::crate_version!().into(),
            intermediate,
            consider_modifications: self.consider_modifications.unwrap_or(false),
            psm_set: self.psm_set.map(Into::into).unwrap_or_default(),
            psm: LevelSettings {
                fdr: psm_fdr,
                filters: psm.filters.unwrap_or_default(),
            },
            peptide: LevelSettings {
                fdr: peptide_fdr,
                filters: peptide.filters.unwrap_or_default(),
            },
            protein: ProteinSettings {
                inference,
                fdr: protein_fdr,
                filters: protein.filters.unwrap_or_default(),
            },
            threads,
            output_paths: Vec::new(),
            output_directory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() -> anyhow::Result<()> {
        let input: Input = serde_json::from_str(
            r#"{
                "intermediate": "run.json",
                "psm": {"fdr": {"strategy": "search_engine", "score": "mascot_score"}},
                "peptide": {"fdr": {}},
                "protein": {"fdr": {"threshold": 0.05}}
            }"#,
        )?;
        let analysis = input.build()?;
        assert_eq!(analysis.psm_set, PsmSetSettings::default());

        let psm = analysis.psm.fdr.as_ref().context("psm fdr")?;
        assert_eq!(psm.strategy, DecoyStrategy::SearchEngine);
        assert_eq!(psm.threshold, DEFAULT_FDR_THRESHOLD);

        let peptide = analysis.peptide.fdr.as_ref().context("peptide fdr")?;
        assert_eq!(peptide.strategy, DecoyStrategy::Inherit);
        assert_eq!(peptide.score, "psm_combined_fdr_score");

        let protein = analysis.protein.fdr.as_ref().context("protein fdr")?;
        assert_eq!(protein.threshold, 0.05);
        assert_eq!(protein.score, "protein_score");

        let inference = &analysis.protein.inference;
        assert_eq!(inference.method, InferenceMethod::OccamsRazor);
        assert_eq!(
            inference.scoring.as_ref().map(|s| s.method()),
            Some(ScoringMethod::Additive)
        );
        Ok(())
    }

    #[test]
    fn invalid_settings() -> anyhow::Result<()> {
        let missing_score: Input =
            serde_json::from_str(r#"{"intermediate": "run.json", "psm": {"fdr": {}}}"#)?;
        assert!(missing_score.build().is_err());

        let unknown_method: Input = serde_json::from_str(
            r#"{"intermediate": "run.json", "protein": {"method": "inference_magic"}}"#,
        )?;
        assert!(unknown_method.build().is_err());

        let no_direction: Input = serde_json::from_str(
            r#"{"intermediate": "run.json", "protein": {"scoring": {"used_score": "sequest_probability"}}}"#,
        )?;
        assert!(no_direction.build().is_err());
        Ok(())
    }

    #[test]
    fn psm_set_options() {
        let options = PsmSetOptions {
            rt: Some(false),
            file: Some(true),
            ..Default::default()
        };
        let settings = PsmSetSettings::from(options);
        assert!(!settings.rt);
        assert!(settings.file);
        assert!(settings.mz);
    }
}
