use super::input::Analysis;
use super::output::Output;
use anyhow::Context;
use log::info;
use pia_core::aggregator::{FdrLevel, FileScope, LevelFilters, ProteinSortField, ReportAggregator, SortKey};
use pia_core::fdr::FdrResults;
use pia_core::graph::FileIx;
use pia_core::inference::CancellationToken;
use std::time::Instant;

pub struct Runner {
    pub parameters: Analysis,
    aggregator: ReportAggregator,
    output: Output,
    start: Instant,
}

fn log_fdr(level: &str, scope: &str, results: &FdrResults) {
    info!(
        "- {} FDR ({}): {} targets, {} decoys, {} FDR-good targets",
        level, scope, results.targets, results.decoys, results.fdr_good_targets
    );
}

impl Runner {
    pub fn new(parameters: Analysis) -> anyhow::Result<Self> {
        let start = Instant::now();
        let graph = pia_core::intermediate::load(&parameters.intermediate).with_context(|| {
            format!(
                "Failed to read intermediate document `{}`",
                parameters.intermediate
            )
        })?;
        info!(
            "loaded {} files, {} accessions, {} peptides, {} spectrum matches in {:#?}",
            graph.files.len(),
            graph.accessions.len(),
            graph.peptides.len(),
            graph.psms.len(),
            start.elapsed()
        );

        let output = Output::new(&parameters.output_directory, &graph);
        let mut aggregator = ReportAggregator::new(graph);
        aggregator.set_psm_set_settings(parameters.psm_set);
        aggregator.set_consider_modifications(parameters.consider_modifications);

        Ok(Self {
            parameters,
            aggregator,
            output,
            start,
        })
    }

    fn filters(&self) -> LevelFilters {
        LevelFilters {
            psm: self.parameters.psm.filters.clone(),
            peptide: self.parameters.peptide.filters.clone(),
            protein: self.parameters.protein.filters.clone(),
        }
    }

    fn psm_level(&mut self) -> anyhow::Result<()> {
        let settings = match self.parameters.psm.fdr.clone() {
            Some(settings) => settings,
            None => return Ok(()),
        };
        for file in 0..self.aggregator.graph().files.len() as u32 {
            let scope = FileScope::File(FileIx(file));
            let results = self
                .aggregator
                .calculate_psm_fdr(scope, &settings)
                .with_context(|| format!("PSM FDR of file {file} failed"))?;
            log_fdr("PSM", &self.aggregator.graph().files[file as usize].name, &results);
        }
        let results = self.aggregator.calculate_combined_fdr_score(&settings)?;
        log_fdr("combined PSM", "all files", &results);

        self.aggregator.calculate_ranking(
            FdrLevel::Psm,
            FileScope::All,
            "psm_combined_fdr_score",
            &self.filters(),
        )?;
        Ok(())
    }

    fn peptide_level(&mut self) -> anyhow::Result<()> {
        let settings = match self.parameters.peptide.fdr.clone() {
            Some(settings) => settings,
            None => return Ok(()),
        };
        let results = self
            .aggregator
            .calculate_peptide_fdr(FileScope::All, &settings)?;
        log_fdr("peptide", "all files", &results);

        self.aggregator.calculate_ranking(
            FdrLevel::Peptide,
            FileScope::All,
            "peptide_fdr_score",
            &self.filters(),
        )?;
        Ok(())
    }

    fn protein_level(&mut self, cancellation: &CancellationToken) -> anyhow::Result<()> {
        let time = Instant::now();
        let inference = self.parameters.protein.inference.clone();
        let proteins = self
            .aggregator
            .infer_proteins(&inference, cancellation)?
            .len();
        info!(
            "- inferred {} proteins with {} in {}ms",
            proteins,
            inference.method.short_name(),
            time.elapsed().as_millis()
        );

        if let Some(settings) = self.parameters.protein.fdr.clone() {
            let results = self.aggregator.calculate_protein_fdr(&settings)?;
            log_fdr("protein", "all files", &results);
        }

        self.aggregator.calculate_ranking(
            FdrLevel::Protein,
            FileScope::All,
            "protein_score",
            &self.filters(),
        )?;
        self.aggregator.sort_proteins(&[
            SortKey {
                field: ProteinSortField::Rank,
                descending: false,
            },
            SortKey {
                field: ProteinSortField::Accession,
                descending: false,
            },
        ]);
        Ok(())
    }

    fn write_outputs(&mut self) -> anyhow::Result<()> {
        let Runner {
            parameters,
            aggregator,
            output,
            ..
        } = self;

        let proteins = aggregator.filtered_proteins(&parameters.protein.filters);
        parameters.output_paths.push(output.write_proteins(&proteins)?);

        let peptides = aggregator.filtered_peptides(FileScope::All, &parameters.peptide.filters);
        parameters.output_paths.push(output.write_peptides(&peptides)?);

        let sets = aggregator.filtered_psm_sets(&parameters.psm.filters);
        parameters.output_paths.push(output.write_psm_sets(&sets)?);
        Ok(())
    }

    pub fn run(mut self) -> anyhow::Result<Analysis> {
        let cancellation = CancellationToken::default();

        self.psm_level()?;
        self.peptide_level()?;
        self.protein_level(&cancellation)?;
        self.write_outputs()?;

        let path = self.output.make_path("results.json");
        self.parameters
            .output_paths
            .push(path.display().to_string());
        println!("{}", serde_json::to_string_pretty(&self.parameters)?);
        self.output.write_parameters(&path, &self.parameters)?;

        info!("finished in {}s", self.start.elapsed().as_secs());
        Ok(self.parameters)
    }
}
