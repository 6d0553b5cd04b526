pub mod aggregator;
pub mod compiler;
pub mod error;
pub mod fdr;
pub mod fdr_score;
pub mod filter;
pub mod graph;
pub mod inference;
pub mod intermediate;
pub mod rank;
pub mod report;
pub mod score;
pub mod scoring;

pub use error::Error;

pub fn read_json<P, T>(path: P) -> Result<T, Error>
where
    P: AsRef<std::path::Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let file = std::fs::File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}
