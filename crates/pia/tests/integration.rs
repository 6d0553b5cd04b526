use pia_core::aggregator::{FdrLevel, FileScope, ReportAggregator};
use pia_core::compiler::{Compiler, NewSpectrumMatch};
use pia_core::fdr::{DecoyStrategy, FdrSettings};
use pia_core::graph::{AccessionIx, EvidenceGraph, FileIx};
use pia_core::inference::{CancellationToken, Inference, InferenceMethod};
use pia_core::intermediate::{read_intermediate, write_intermediate};
use pia_core::score::{ScoreKind, ScoreModel};
use pia_core::scoring::{PsmForScoring, Scoring, ScoringMethod};

const TWO_RUNS: &str = include_str!("../../../tests/data/two_runs.json");

fn occams_razor() -> anyhow::Result<Inference> {
    let scoring = Scoring::new(ScoringMethod::Additive, "mascot_score", PsmForScoring::Best)?;
    Ok(Inference::new(InferenceMethod::OccamsRazor, scoring))
}

fn accession(graph: &EvidenceGraph, name: &str) -> Option<AccessionIx> {
    graph
        .accessions
        .iter()
        .position(|acc| acc.accession == name)
        .map(|ix| AccessionIx(ix as u32))
}

#[test]
/// Three proteins, five peptides: A explains everything, B and C only parts
/// of it, so A is reported alone with B and C as its sub-sets
fn parsimony() -> anyhow::Result<()> {
    let mut compiler = Compiler::default();
    let file = compiler.insert_file("run", "run.mzid", None);
    let a = compiler.insert_accession("A", Some("MKPEPTIDERSAMPLERGGFIRSTKNEXTRLASTK"));
    let b = compiler.insert_accession("B", Some("PEPTIDERSAMPLER"));
    let c = compiler.insert_accession("C", Some("GGFIRSTKNEXTR"));

    let peptides = [
        ("PEPTIDER", 40.0),
        ("SAMPLER", 30.0),
        ("GGFIRSTK", 20.0),
        ("NEXTR", 15.0),
        ("LASTK", 10.0),
    ];
    for (sequence, score) in peptides {
        compiler.insert_spectrum_match(NewSpectrumMatch {
            charge: 2,
            mz: 300.0 + score,
            sequence: sequence.into(),
            file,
            scores: vec![ScoreModel::new(ScoreKind::MascotScore, score)],
            ..Default::default()
        })?;
        let peptide = compiler.insert_peptide(sequence);
        for acc in [a, b, c] {
            compiler.locate_occurrences(peptide, acc)?;
        }
    }
    let (graph, issues) = compiler.finish()?;
    // every peptide of B is missing from C and vice versa, LASTK is only in A
    assert_eq!(issues.total(), 6);
    assert_eq!(graph.clusters().len(), 1);
    assert_eq!(graph.groups().len(), 3);

    let mut aggregator = ReportAggregator::new(graph);
    let proteins = aggregator.infer_proteins(&occams_razor()?, &CancellationToken::default())?;
    assert_eq!(proteins.len(), 1);
    assert_eq!(proteins[0].accessions, vec![a]);
    assert_eq!(proteins[0].nr_peptides(), 5);
    assert_eq!(proteins[0].score, 115.0);

    let mut subs = proteins[0]
        .sub_sets
        .iter()
        .map(|p| (p.accessions.clone(), p.nr_peptides()))
        .collect::<Vec<_>>();
    subs.sort();
    assert_eq!(subs, vec![(vec![b], 2), (vec![c], 2)]);

    // MK[PEPTIDER][SAMPLER][GGFIRSTK][NEXTR][LASTK]
    let coverage = &proteins[0].coverage[&a];
    assert_eq!(coverage.intervals().collect::<Vec<_>>(), vec![(3, 35)]);
    Ok(())
}

#[test]
fn intermediate_round_trip() -> anyhow::Result<()> {
    let graph = read_intermediate(TWO_RUNS.as_bytes())?;
    assert_eq!(graph.files.len(), 2);
    assert_eq!(graph.psms.len(), 12);
    assert_eq!(graph.clusters().len(), 4);

    let mut buffer = Vec::new();
    write_intermediate(&graph, &mut buffer)?;
    let reread = read_intermediate(buffer.as_slice())?;

    assert_eq!(reread.accessions, graph.accessions);
    assert_eq!(reread.peptides, graph.peptides);
    assert_eq!(reread.psms, graph.psms);
    assert_eq!(reread.groups(), graph.groups());
    assert_eq!(reread.clusters(), graph.clusters());

    let inference = occams_razor()?;
    let mut before = ReportAggregator::new(graph);
    let mut after = ReportAggregator::new(reread);
    let token = CancellationToken::default();
    let before = before.infer_proteins(&inference, &token)?.to_vec();
    let after = after.infer_proteins(&inference, &token)?.to_vec();
    assert_eq!(before.len(), after.len());
    for (x, y) in before.iter().zip(&after) {
        assert_eq!(x.accessions, y.accessions);
        assert_eq!(x.coverage, y.coverage);
        assert_eq!(x.score, y.score);
    }
    Ok(())
}

#[test]
fn full_pipeline() -> anyhow::Result<()> {
    let graph = read_intermediate(TWO_RUNS.as_bytes())?;
    let p1 = accession(&graph, "P1").ok_or_else(|| anyhow::anyhow!("P1 is missing"))?;
    let mut aggregator = ReportAggregator::new(graph);

    let psm_fdr = FdrSettings {
        strategy: DecoyStrategy::SearchEngine,
        pattern: None,
        threshold: 0.05,
        score: "mascot_score".into(),
    };
    for file in [0, 1] {
        let results = aggregator.calculate_psm_fdr(FileScope::File(FileIx(file)), &psm_fdr)?;
        assert_eq!((results.targets, results.decoys), (5, 1));
    }
    let combined = aggregator.calculate_combined_fdr_score(&psm_fdr)?;
    assert_eq!(combined.items, 6);

    let peptide_fdr = FdrSettings {
        strategy: DecoyStrategy::Inherit,
        score: "psm_combined_fdr_score".into(),
        ..psm_fdr.clone()
    };
    let results = aggregator.calculate_peptide_fdr(FileScope::All, &peptide_fdr)?;
    assert_eq!(results.decoys, 1);

    aggregator.infer_proteins(&occams_razor()?, &CancellationToken::default())?;
    let proteins = aggregator.report_proteins();
    assert_eq!(proteins.len(), 4);
    let top = &proteins[0];
    assert_eq!(top.accessions, vec![p1]);
    assert_eq!(top.nr_peptides(), 3);
    assert_eq!(top.nr_psms(), 6);
    assert_eq!(top.sub_sets.len(), 1);
    let fraction = top
        .coverage_fraction(aggregator.graph(), p1)
        .ok_or_else(|| anyhow::anyhow!("no coverage"))?;
    assert!((fraction - 25.0 / 34.0).abs() < 1e-9);

    let protein_fdr = FdrSettings {
        strategy: DecoyStrategy::AccessionPattern,
        pattern: Some("^DECOY_".into()),
        threshold: 0.05,
        score: "protein_score".into(),
    };
    let results = aggregator.calculate_protein_fdr(&protein_fdr)?;
    assert_eq!((results.targets, results.decoys), (3, 1));
    assert!(aggregator
        .fdr_data(FdrLevel::Protein, FileScope::All)
        .and_then(|data| data.results())
        .is_some());

    // the decoy is the worst protein: every target is FDR-good
    let good = aggregator
        .report_proteins()
        .iter()
        .filter(|p| p.fdr.fdr_good && !p.decoy)
        .count();
    assert_eq!(good, 3);
    Ok(())
}
