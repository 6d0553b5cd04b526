//! The persisted intermediate document: a complete, compiled evidence graph
//! that can be re-read without re-parsing any search engine output.
//!
//! Entities are referenced by 1-based ids. Reading a document validates every
//! reference, and reproduces the stored group and cluster structure exactly.

use crate::error::{Error, GraphError};
use crate::graph::*;
use crate::score::ScoreModel;
use fnv::FnvHashMap;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Instant;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Intermediate {
    #[serde(default)]
    pub name: Option<String>,
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
    pub accessions: Vec<AccessionEntry>,
    pub peptides: Vec<PeptideEntry>,
    pub spectra: Vec<SpectrumEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FileEntry {
    pub id: u64,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GroupEntry {
    pub id: u64,
    pub tree_id: u64,
    pub accessions: Vec<u64>,
    pub peptides: Vec<u64>,
    #[serde(default)]
    pub children: Vec<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AccessionEntry {
    pub id: u64,
    pub accession: String,
    #[serde(default)]
    pub sequence: Option<String>,
    #[serde(default)]
    pub files: Vec<u64>,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub descriptions: BTreeMap<u64, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OccurrenceEntry {
    pub accession: u64,
    #[serde(default)]
    pub start: Option<u32>,
    #[serde(default)]
    pub end: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PeptideEntry {
    pub id: u64,
    pub sequence: String,
    pub spectra: Vec<u64>,
    #[serde(default)]
    pub occurrences: Vec<OccurrenceEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SpectrumEntry {
    pub id: u64,
    pub charge: i32,
    pub mz: f64,
    pub delta_mass: f64,
    #[serde(default)]
    pub rt: Option<f64>,
    pub sequence: String,
    #[serde(default)]
    pub missed_cleavages: i32,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub file: u64,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub scores: Vec<ScoreModel>,
    #[serde(default)]
    pub modifications: BTreeMap<u32, Modification>,
    #[serde(default)]
    pub decoy: Option<bool>,
    #[serde(default)]
    pub unique: Option<bool>,
}

impl From<&EvidenceGraph> for Intermediate {
    fn from(graph: &EvidenceGraph) -> Self {
        let id = |ix: u32| ix as u64 + 1;
        Intermediate {
            name: None,
            files: graph
                .files
                .iter()
                .enumerate()
                .map(|(ix, f)| FileEntry {
                    id: id(ix as u32),
                    name: f.name.clone(),
                    path: f.path.clone(),
                    format: f.format.clone(),
                })
                .collect(),
            groups: graph
                .groups()
                .iter()
                .enumerate()
                .map(|(ix, g)| GroupEntry {
                    id: id(ix as u32),
                    tree_id: id(g.cluster.0),
                    accessions: g.accessions.iter().map(|a| id(a.0)).collect(),
                    peptides: g.peptides.iter().map(|p| id(p.0)).collect(),
                    children: g.children.iter().map(|c| id(c.0)).collect(),
                })
                .collect(),
            accessions: graph
                .accessions
                .iter()
                .enumerate()
                .map(|(ix, a)| AccessionEntry {
                    id: id(ix as u32),
                    accession: a.accession.clone(),
                    sequence: a.sequence.clone(),
                    files: a.files.iter().map(|f| id(f.0)).collect(),
                    databases: a.databases.iter().cloned().collect(),
                    descriptions: a
                        .descriptions
                        .iter()
                        .map(|(f, d)| (id(f.0), d.clone()))
                        .collect(),
                })
                .collect(),
            peptides: graph
                .peptides
                .iter()
                .enumerate()
                .map(|(ix, p)| PeptideEntry {
                    id: id(ix as u32),
                    sequence: p.sequence.clone(),
                    spectra: p.psms.iter().map(|s| id(s.0)).collect(),
                    occurrences: p
                        .occurrences
                        .iter()
                        .map(|occ| OccurrenceEntry {
                            accession: id(occ.accession.0),
                            start: occ.position.map(|p| p.0),
                            end: occ.position.map(|p| p.1),
                        })
                        .collect(),
                })
                .collect(),
            spectra: graph
                .psms
                .iter()
                .enumerate()
                .map(|(ix, s)| SpectrumEntry {
                    id: id(ix as u32),
                    charge: s.charge,
                    mz: s.mz,
                    delta_mass: s.delta_mass,
                    rt: s.rt,
                    sequence: s.sequence.clone(),
                    missed_cleavages: s.missed_cleavages,
                    source_id: s.source_id.clone(),
                    title: s.title.clone(),
                    file: id(s.file.0),
                    protocol: s.protocol.clone(),
                    scores: s.scores.clone(),
                    modifications: s.modifications.clone(),
                    decoy: s.decoy,
                    unique: s.unique,
                })
                .collect(),
        }
    }
}

/// Maps document ids to dense indices
struct IdMap {
    entity: &'static str,
    map: FnvHashMap<u64, u32>,
}

impl IdMap {
    fn new<I: Iterator<Item = u64>>(entity: &'static str, ids: I) -> Result<Self, GraphError> {
        let mut map = FnvHashMap::default();
        for (ix, id) in ids.enumerate() {
            if map.insert(id, ix as u32).is_some() {
                return Err(GraphError::DuplicateId { entity, id });
            }
        }
        Ok(Self { entity, map })
    }

    fn get(&self, id: u64) -> Result<u32, GraphError> {
        self.map
            .get(&id)
            .copied()
            .ok_or(GraphError::UnresolvedReference {
                entity: self.entity,
                id,
            })
    }
}

impl TryFrom<Intermediate> for EvidenceGraph {
    type Error = GraphError;

    fn try_from(doc: Intermediate) -> Result<Self, Self::Error> {
        let files = IdMap::new("file", doc.files.iter().map(|f| f.id))?;
        let accessions = IdMap::new("accession", doc.accessions.iter().map(|a| a.id))?;
        let peptides = IdMap::new("peptide", doc.peptides.iter().map(|p| p.id))?;
        let spectra = IdMap::new("spectrum", doc.spectra.iter().map(|s| s.id))?;
        let groups = IdMap::new("group", doc.groups.iter().map(|g| g.id))?;

        let mut graph = EvidenceGraph::default();
        graph.files = doc
            .files
            .into_iter()
            .map(|f| InputFile {
                name: f.name,
                path: f.path,
                format: f.format,
            })
            .collect();

        for entry in doc.accessions {
            graph.accessions.push(Accession {
                accession: entry.accession,
                sequence: entry.sequence,
                files: entry
                    .files
                    .iter()
                    .map(|f| files.get(*f).map(FileIx))
                    .collect::<Result<_, _>>()?,
                descriptions: entry
                    .descriptions
                    .into_iter()
                    .map(|(f, d)| files.get(f).map(|f| (FileIx(f), d)))
                    .collect::<Result<_, _>>()?,
                databases: entry.databases.into_iter().collect(),
            });
        }

        let mut owner: Vec<Option<PeptideIx>> = vec![None; doc.spectra.len()];
        for (ix, entry) in doc.peptides.into_iter().enumerate() {
            let psms = entry
                .spectra
                .iter()
                .map(|s| spectra.get(*s).map(PsmIx))
                .collect::<Result<Vec<_>, _>>()?;
            for (id, psm) in entry.spectra.iter().zip(&psms) {
                if owner[psm.0 as usize].replace(PeptideIx(ix as u32)).is_some() {
                    return Err(GraphError::DuplicateId {
                        entity: "spectrum reference",
                        id: *id,
                    });
                }
            }
            let occurrences = entry
                .occurrences
                .iter()
                .map(|occ| {
                    accessions.get(occ.accession).map(|acc| Occurrence {
                        accession: AccessionIx(acc),
                        position: occ.start.zip(occ.end),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            graph.peptides.push(Peptide {
                sequence: entry.sequence,
                psms,
                occurrences,
            });
        }

        for (ix, entry) in doc.spectra.into_iter().enumerate() {
            let peptide = owner[ix].ok_or(GraphError::UnresolvedReference {
                entity: "spectrum",
                id: entry.id,
            })?;
            graph.psms.push(Psm {
                charge: entry.charge,
                mz: entry.mz,
                delta_mass: entry.delta_mass,
                rt: entry.rt,
                sequence: entry.sequence,
                missed_cleavages: entry.missed_cleavages,
                source_id: entry.source_id,
                title: entry.title,
                file: FileIx(files.get(entry.file)?),
                protocol: entry.protocol,
                decoy: entry.decoy,
                unique: entry.unique,
                modifications: entry.modifications,
                scores: entry.scores,
                peptide,
            });
        }

        if doc.groups.is_empty() {
            graph.build_clusters()?;
            return Ok(graph);
        }

        let trees = IdMap::new("tree", {
            let mut ids = doc.groups.iter().map(|g| g.tree_id).collect::<Vec<_>>();
            ids.sort_unstable();
            ids.dedup();
            ids.into_iter()
        })?;
        let mut parsed = Vec::with_capacity(doc.groups.len());
        for entry in &doc.groups {
            parsed.push(Group {
                cluster: ClusterIx(trees.get(entry.tree_id)?),
                accessions: entry
                    .accessions
                    .iter()
                    .map(|a| accessions.get(*a).map(AccessionIx))
                    .collect::<Result<_, _>>()?,
                peptides: {
                    let mut peps = entry
                        .peptides
                        .iter()
                        .map(|p| peptides.get(*p).map(PeptideIx))
                        .collect::<Result<Vec<_>, _>>()?;
                    peps.sort_unstable();
                    peps
                },
                children: entry
                    .children
                    .iter()
                    .map(|c| groups.get(*c).map(GroupIx))
                    .collect::<Result<_, _>>()?,
                parents: Vec::new(),
            });
        }
        for ix in 0..parsed.len() {
            for child in parsed[ix].children.clone() {
                if parsed[child.0 as usize].cluster != parsed[ix].cluster {
                    return Err(GraphError::UnknownGroup {
                        group: GroupIx(ix as u32),
                        child,
                    });
                }
                parsed[child.0 as usize].parents.push(GroupIx(ix as u32));
            }
        }

        graph.validate()?;
        Ok(graph.with_groups(parsed))
    }
}

pub fn write_intermediate<W: Write>(graph: &EvidenceGraph, writer: W) -> Result<(), Error> {
    serde_json::to_writer(writer, &Intermediate::from(graph))?;
    Ok(())
}

pub fn read_intermediate<R: Read>(reader: R) -> Result<EvidenceGraph, Error> {
    let doc: Intermediate = serde_json::from_reader(reader)?;
    Ok(EvidenceGraph::try_from(doc)?)
}

pub fn save<P: AsRef<Path>>(graph: &EvidenceGraph, path: P) -> Result<(), Error> {
    let time = Instant::now();
    let file = std::io::BufWriter::new(std::fs::File::create(path.as_ref())?);
    write_intermediate(graph, file)?;
    info!(
        "wrote intermediate document `{}` in {}ms",
        path.as_ref().display(),
        time.elapsed().as_millis()
    );
    Ok(())
}

pub fn load<P: AsRef<Path>>(path: P) -> Result<EvidenceGraph, Error> {
    let time = Instant::now();
    let file = std::io::BufReader::new(std::fs::File::open(path.as_ref())?);
    let graph = read_intermediate(file)?;
    info!(
        "read {} accessions, {} peptides, {} PSMs in {} clusters from `{}` in {}ms",
        graph.accessions.len(),
        graph.peptides.len(),
        graph.psms.len(),
        graph.clusters().len(),
        path.as_ref().display(),
        time.elapsed().as_millis()
    );
    Ok(graph)
}
