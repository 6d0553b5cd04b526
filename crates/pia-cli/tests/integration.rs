use pia_cli::input::Input;
use pia_cli::runner::Runner;
use std::path::Path;

fn read_tsv(path: &Path) -> anyhow::Result<Vec<csv::StringRecord>> {
    let mut rdr = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    Ok(rdr.records().collect::<Result<Vec<_>, _>>()?)
}

#[test]
fn integration() -> anyhow::Result<()> {
    let mut analysis = Input::load("../../tests/data/params.json")?.build()?;
    assert_eq!(analysis.threads, 2);

    let directory = std::env::temp_dir().join("pia-cli-integration");
    std::fs::create_dir_all(&directory)?;
    analysis.output_directory = directory.clone();

    let analysis = Runner::new(analysis)?.run()?;
    assert_eq!(analysis.output_paths.len(), 4);

    let proteins = read_tsv(&directory.join("proteins.pia.tsv"))?;
    assert_eq!(proteins.len(), 4);

    // protein_id, accessions, score, rank, decoy, nr_peptides, ...
    let top = &proteins[0];
    assert_eq!(&top[1], "P1");
    assert_eq!(&top[2], "116.0");
    assert_eq!(&top[3], "1");
    assert_eq!(&top[5], "3");
    assert_eq!(&top[10], "P2");

    let last = &proteins[3];
    assert_eq!(&last[1], "DECOY_P4");
    assert_eq!(&last[4], "true");
    // fdr_good
    assert_eq!(&top[14], "true");
    assert_eq!(&last[14], "false");

    let peptides = read_tsv(&directory.join("peptides.pia.tsv"))?;
    assert_eq!(peptides.len(), 6);

    // identical m/z, retention time and charge in both runs
    let sets = read_tsv(&directory.join("psm_sets.pia.tsv"))?;
    assert_eq!(sets.len(), 6);
    assert!(sets.iter().all(|set| &set[4] == "run1;run2"));
    Ok(())
}
