//! # Evidence graph
//!
//! Accessions, peptides and spectrum matches from every merged input file,
//! plus the group/cluster structure derived from them.
//!
//! Accessions are bucketed into [`Group`]s when they are explained by exactly the
//! same set of peptides. Groups are linked child -> parent when the child's
//! peptides are a strict subset of the parent's (only the covering relation is
//! stored). Connected components of the accession/peptide graph are
//! [`Cluster`]s: no accession, peptide or group is shared between two clusters,
//! so every cluster can be handed to a separate inference task.

use crate::error::GraphError;
use crate::score::ScoreModel;
use fnv::FnvHashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Index;
use std::time::Instant;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileIx(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessionIx(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeptideIx(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PsmIx(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupIx(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterIx(pub u32);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFile {
    pub name: String,
    pub path: String,
    pub format: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Accession {
    pub accession: String,
    pub sequence: Option<String>,
    pub files: BTreeSet<FileIx>,
    pub descriptions: BTreeMap<FileIx, String>,
    pub databases: BTreeSet<String>,
}

/// Where a peptide was found inside an accession. Positions are 1-based and
/// inclusive; `None` when the accession's sequence is unknown.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Occurrence {
    pub accession: AccessionIx,
    pub position: Option<(u32, u32)>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Peptide {
    pub sequence: String,
    pub psms: Vec<PsmIx>,
    pub occurrences: Vec<Occurrence>,
}

impl Peptide {
    /// Distinct accessions this peptide occurs in, sorted
    pub fn accessions(&self) -> Vec<AccessionIx> {
        let mut accessions = self
            .occurrences
            .iter()
            .map(|occ| occ.accession)
            .collect::<Vec<_>>();
        accessions.sort_unstable();
        accessions.dedup();
        accessions
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub residue: Option<char>,
    pub mass_delta: f64,
    pub description: Option<String>,
    pub accession: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Psm {
    pub charge: i32,
    pub mz: f64,
    pub delta_mass: f64,
    pub rt: Option<f64>,
    pub sequence: String,
    pub missed_cleavages: i32,
    pub source_id: Option<String>,
    pub title: Option<String>,
    pub file: FileIx,
    pub protocol: Option<String>,
    pub decoy: Option<bool>,
    pub unique: Option<bool>,
    /// 0 is the N-terminus, `len + 1` the C-terminus
    pub modifications: BTreeMap<u32, Modification>,
    pub scores: Vec<ScoreModel>,
    pub peptide: PeptideIx,
}

impl Psm {
    pub fn score(&self, short_name: &str) -> Option<&ScoreModel> {
        self.scores.iter().find(|s| s.short_name() == short_name)
    }

    /// Value of the named score, NaN if this PSM does not carry it
    pub fn score_value(&self, short_name: &str) -> f64 {
        self.score(short_name).map(|s| s.value).unwrap_or(f64::NAN)
    }

    pub fn modification_string(&self) -> String {
        self.modifications
            .iter()
            .map(|(pos, m)| format!("({};{:.4})", pos, m.mass_delta))
            .collect()
    }

    /// The identity of the peptide this PSM reports: the sequence, followed by
    /// the modification signature when modifications are considered
    pub fn peptide_key(&self, consider_modifications: bool) -> String {
        match consider_modifications {
            true => format!("{}{}", self.sequence, self.modification_string()),
            false => self.sequence.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub cluster: ClusterIx,
    pub accessions: Vec<AccessionIx>,
    /// Every peptide explaining this group's accessions, sorted
    pub peptides: Vec<PeptideIx>,
    pub children: Vec<GroupIx>,
    pub parents: Vec<GroupIx>,
}

impl Group {
    /// Peptides not already explained by any child group
    pub fn direct_peptides(&self, graph: &EvidenceGraph) -> Vec<PeptideIx> {
        self.peptides
            .iter()
            .copied()
            .filter(|pep| {
                !self
                    .children
                    .iter()
                    .any(|child| graph[*child].peptides.binary_search(pep).is_ok())
            })
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub groups: Vec<GroupIx>,
    pub accessions: Vec<AccessionIx>,
    pub peptides: Vec<PeptideIx>,
}

#[derive(Clone, Debug, Default)]
pub struct EvidenceGraph {
    pub files: Vec<InputFile>,
    pub accessions: Vec<Accession>,
    pub peptides: Vec<Peptide>,
    pub psms: Vec<Psm>,
    groups: Vec<Group>,
    clusters: Vec<Cluster>,
    orphans: Vec<PeptideIx>,
    built: bool,
}

impl Index<FileIx> for EvidenceGraph {
    type Output = InputFile;
    fn index(&self, index: FileIx) -> &Self::Output {
        &self.files[index.0 as usize]
    }
}

impl Index<AccessionIx> for EvidenceGraph {
    type Output = Accession;
    fn index(&self, index: AccessionIx) -> &Self::Output {
        &self.accessions[index.0 as usize]
    }
}

impl Index<PeptideIx> for EvidenceGraph {
    type Output = Peptide;
    fn index(&self, index: PeptideIx) -> &Self::Output {
        &self.peptides[index.0 as usize]
    }
}

impl Index<PsmIx> for EvidenceGraph {
    type Output = Psm;
    fn index(&self, index: PsmIx) -> &Self::Output {
        &self.psms[index.0 as usize]
    }
}

impl Index<GroupIx> for EvidenceGraph {
    type Output = Group;
    fn index(&self, index: GroupIx) -> &Self::Output {
        &self.groups[index.0 as usize]
    }
}

impl Index<ClusterIx> for EvidenceGraph {
    type Output = Cluster;
    fn index(&self, index: ClusterIx) -> &Self::Output {
        &self.clusters[index.0 as usize]
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => self.parent[a] = b,
            std::cmp::Ordering::Greater => self.parent[b] = a,
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
            }
        }
    }
}

fn is_strict_subset(small: &[PeptideIx], large: &[PeptideIx]) -> bool {
    small.len() < large.len() && small.iter().all(|p| large.binary_search(p).is_ok())
}

impl EvidenceGraph {
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Peptides without any accession occurrence. They are not part of any
    /// group or cluster.
    pub fn orphan_peptides(&self) -> &[PeptideIx] {
        &self.orphans
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Check that every reference inside the graph points to an existing node
    pub fn validate(&self) -> Result<(), GraphError> {
        for accession in &self.accessions {
            if let Some(file) = accession
                .files
                .iter()
                .chain(accession.descriptions.keys())
                .find(|f| f.0 as usize >= self.files.len())
            {
                return Err(GraphError::UnknownFile {
                    entity: format!("accession `{}`", accession.accession),
                    file: *file,
                });
            }
        }
        for peptide in &self.peptides {
            if let Some(occ) = peptide
                .occurrences
                .iter()
                .find(|occ| occ.accession.0 as usize >= self.accessions.len())
            {
                return Err(GraphError::UnknownAccession {
                    peptide: peptide.sequence.clone(),
                    accession: occ.accession,
                });
            }
            if let Some(psm) = peptide
                .psms
                .iter()
                .find(|psm| psm.0 as usize >= self.psms.len())
            {
                return Err(GraphError::UnknownPsm {
                    peptide: peptide.sequence.clone(),
                    psm: *psm,
                });
            }
        }
        for (ix, psm) in self.psms.iter().enumerate() {
            if psm.peptide.0 as usize >= self.peptides.len() {
                return Err(GraphError::UnknownPeptide {
                    psm: PsmIx(ix as u32),
                    peptide: psm.peptide,
                });
            }
            if psm.file.0 as usize >= self.files.len() {
                return Err(GraphError::UnknownFile {
                    entity: format!("spectrum match {}", ix),
                    file: psm.file,
                });
            }
        }
        Ok(())
    }

    /// Compute groups and clusters from the inserted evidence.
    ///
    /// Safe to call repeatedly: the structure is rebuilt from scratch, and the
    /// result only depends on the insertion order of accessions and peptides.
    pub fn build_clusters(&mut self) -> Result<(), GraphError> {
        let time = Instant::now();
        self.validate()?;

        let n_accessions = self.accessions.len();
        let mut sets = DisjointSet::new(n_accessions + self.peptides.len());
        let mut explained: Vec<Vec<PeptideIx>> = vec![Vec::new(); n_accessions];
        let mut orphans = Vec::new();

        for (ix, peptide) in self.peptides.iter().enumerate() {
            if peptide.occurrences.is_empty() {
                debug!("peptide `{}` has no accession occurrence", peptide.sequence);
                orphans.push(PeptideIx(ix as u32));
                continue;
            }
            for occ in &peptide.occurrences {
                let acc = occ.accession.0 as usize;
                sets.union(acc, n_accessions + ix);
                explained[acc].push(PeptideIx(ix as u32));
            }
        }
        explained.iter_mut().for_each(|peps| {
            peps.sort_unstable();
            peps.dedup();
        });

        // Cluster ids follow the lowest accession index of each component
        let mut roots: FnvHashMap<usize, ClusterIx> = FnvHashMap::default();
        let mut clusters: Vec<Cluster> = Vec::new();
        for (acc, peptides) in explained.iter().enumerate() {
            if peptides.is_empty() {
                continue;
            }
            let root = sets.find(acc);
            let cluster = *roots.entry(root).or_insert_with(|| {
                clusters.push(Cluster::default());
                ClusterIx(clusters.len() as u32 - 1)
            });
            clusters[cluster.0 as usize]
                .accessions
                .push(AccessionIx(acc as u32));
        }
        for (ix, peptide) in self.peptides.iter().enumerate() {
            if peptide.occurrences.is_empty() {
                continue;
            }
            let root = sets.find(n_accessions + ix);
            if let Some(cluster) = roots.get(&root) {
                clusters[cluster.0 as usize]
                    .peptides
                    .push(PeptideIx(ix as u32));
            }
        }

        let mut groups: Vec<Group> = Vec::new();
        for (cluster_ix, cluster) in clusters.iter_mut().enumerate() {
            let first = groups.len();
            let mut buckets: FnvHashMap<&[PeptideIx], usize> = FnvHashMap::default();
            for acc in &cluster.accessions {
                let peptides = explained[acc.0 as usize].as_slice();
                let group = *buckets.entry(peptides).or_insert_with(|| {
                    groups.push(Group {
                        cluster: ClusterIx(cluster_ix as u32),
                        peptides: peptides.to_vec(),
                        ..Default::default()
                    });
                    groups.len() - 1
                });
                groups[group].accessions.push(*acc);
            }
            cluster.groups = (first..groups.len()).map(|g| GroupIx(g as u32)).collect();
            link_subsets(&mut groups[first..], first);
        }

        info!(
            "- built {} groups in {} clusters ({} peptides without accession) in {}ms",
            groups.len(),
            clusters.len(),
            orphans.len(),
            time.elapsed().as_millis()
        );

        self.groups = groups;
        self.clusters = clusters;
        self.orphans = orphans;
        self.built = true;
        Ok(())
    }

    /// Install a precomputed group/cluster structure, e.g. when reading a
    /// persisted document. Cluster membership is derived from the groups.
    pub(crate) fn with_groups(mut self, groups: Vec<Group>) -> Self {
        let n_clusters = groups
            .iter()
            .map(|g| g.cluster.0 as usize + 1)
            .max()
            .unwrap_or(0);
        let mut clusters = vec![Cluster::default(); n_clusters];
        for (ix, group) in groups.iter().enumerate() {
            let cluster = &mut clusters[group.cluster.0 as usize];
            cluster.groups.push(GroupIx(ix as u32));
            cluster.accessions.extend(group.accessions.iter().copied());
            cluster.peptides.extend(group.peptides.iter().copied());
        }
        for cluster in clusters.iter_mut() {
            cluster.accessions.sort_unstable();
            cluster.peptides.sort_unstable();
            cluster.peptides.dedup();
        }
        self.orphans = self
            .peptides
            .iter()
            .enumerate()
            .filter(|(_, p)| p.occurrences.is_empty())
            .map(|(ix, _)| PeptideIx(ix as u32))
            .collect();
        self.groups = groups;
        self.clusters = clusters;
        self.built = true;
        self
    }
}

/// Link each group to its minimal strict supersets within one cluster.
/// `offset` is the global index of `groups[0]`.
fn link_subsets(groups: &mut [Group], offset: usize) {
    let mut containing: FnvHashMap<PeptideIx, Vec<usize>> = FnvHashMap::default();
    for (ix, group) in groups.iter().enumerate() {
        for pep in &group.peptides {
            containing.entry(*pep).or_default().push(ix);
        }
    }

    let mut edges = Vec::new();
    for (ix, group) in groups.iter().enumerate() {
        let supersets = match group.peptides.first() {
            Some(first) => containing[first]
                .iter()
                .copied()
                .filter(|&other| is_strict_subset(&group.peptides, &groups[other].peptides))
                .collect::<Vec<_>>(),
            None => continue,
        };
        for &parent in &supersets {
            let covered = supersets.iter().any(|&between| {
                between != parent
                    && is_strict_subset(&groups[between].peptides, &groups[parent].peptides)
            });
            if !covered {
                edges.push((ix, parent));
            }
        }
    }

    for (child, parent) in edges {
        groups[child].parents.push(GroupIx((offset + parent) as u32));
        groups[parent].children.push(GroupIx((offset + child) as u32));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn graph_from(connections: &[(&str, &[&str])]) -> EvidenceGraph {
        let mut graph = EvidenceGraph::default();
        graph.files.push(InputFile::default());
        let mut peptides: FnvHashMap<String, PeptideIx> = FnvHashMap::default();
        for (accession, seqs) in connections {
            let acc = AccessionIx(graph.accessions.len() as u32);
            graph.accessions.push(Accession {
                accession: accession.to_string(),
                ..Default::default()
            });
            for seq in seqs.iter() {
                let pep = *peptides.entry(seq.to_string()).or_insert_with(|| {
                    graph.peptides.push(Peptide {
                        sequence: seq.to_string(),
                        ..Default::default()
                    });
                    PeptideIx(graph.peptides.len() as u32 - 1)
                });
                graph.peptides[pep.0 as usize].occurrences.push(Occurrence {
                    accession: acc,
                    position: None,
                });
            }
        }
        graph
    }

    fn accession_names(graph: &EvidenceGraph, group: &Group) -> Vec<String> {
        group
            .accessions
            .iter()
            .map(|acc| graph[*acc].accession.clone())
            .collect()
    }

    #[test]
    fn groups_and_subsets() {
        let mut graph = graph_from(&[
            ("A", &["P1", "P2", "P3"]),
            ("B", &["P1", "P2"]),
            ("C", &["P1"]),
            ("D", &["P1", "P2"]),
            ("E", &["P9"]),
        ]);
        graph.build_clusters().unwrap();

        assert_eq!(graph.clusters().len(), 2);
        assert_eq!(graph.groups().len(), 4);

        let bd = graph
            .groups()
            .iter()
            .find(|g| g.accessions.len() == 2)
            .unwrap();
        assert_eq!(accession_names(&graph, bd), vec!["B", "D"]);

        // C -> B/D -> A, no direct C -> A edge
        let a = &graph.groups()[0];
        let c = graph
            .groups()
            .iter()
            .find(|g| accession_names(&graph, g) == vec!["C"])
            .unwrap();
        assert_eq!(a.children.len(), 1);
        assert_eq!(c.parents.len(), 1);
        assert_eq!(graph[c.parents[0]].accessions.len(), 2);
        assert_eq!(a.direct_peptides(&graph).len(), 1);
    }

    #[test]
    fn orphans_are_excluded() {
        let mut graph = graph_from(&[("A", &["P1"])]);
        graph.peptides.push(Peptide {
            sequence: "LONELY".into(),
            ..Default::default()
        });
        graph.build_clusters().unwrap();
        assert_eq!(graph.orphan_peptides(), &[PeptideIx(1)]);
        assert_eq!(graph.clusters()[0].peptides, vec![PeptideIx(0)]);
    }

    #[test]
    fn unknown_accession_is_fatal() {
        let mut graph = graph_from(&[("A", &["P1"])]);
        graph.peptides[0].occurrences.push(Occurrence {
            accession: AccessionIx(7),
            position: None,
        });
        assert_eq!(
            graph.build_clusters(),
            Err(GraphError::UnknownAccession {
                peptide: "P1".into(),
                accession: AccessionIx(7)
            })
        );
    }

    #[test]
    fn idempotent() {
        let mut graph = graph_from(&[
            ("A", &["P1", "P2"]),
            ("B", &["P2", "P3"]),
            ("C", &["P4"]),
        ]);
        graph.build_clusters().unwrap();
        let groups = graph.groups().to_vec();
        let clusters = graph.clusters().to_vec();
        graph.build_clusters().unwrap();
        assert_eq!(graph.groups(), groups.as_slice());
        assert_eq!(graph.clusters(), clusters.as_slice());
    }

    fn check_independence(graph: &EvidenceGraph) {
        for (a_ix, a) in graph.groups().iter().enumerate() {
            for b in graph.groups().iter().skip(a_ix + 1) {
                if a.cluster == b.cluster {
                    continue;
                }
                assert!(a.accessions.iter().all(|acc| !b.accessions.contains(acc)));
                assert!(a.peptides.iter().all(|p| !b.peptides.contains(p)));
            }
            for linked in a.children.iter().chain(a.parents.iter()) {
                assert_eq!(graph[*linked].cluster, a.cluster);
            }
        }
    }

    #[quickcheck_macros::quickcheck]
    fn clusters_share_no_nodes(edges: Vec<(u8, u8)>) -> bool {
        let mut graph = EvidenceGraph::default();
        graph.accessions = (0..16)
            .map(|i| Accession {
                accession: format!("acc_{}", i),
                ..Default::default()
            })
            .collect();
        graph.peptides = (0..32)
            .map(|i| Peptide {
                sequence: format!("PEP{}", i),
                ..Default::default()
            })
            .collect();
        for (acc, pep) in edges {
            graph.peptides[(pep % 32) as usize]
                .occurrences
                .push(Occurrence {
                    accession: AccessionIx((acc % 16) as u32),
                    position: None,
                });
        }
        graph.build_clusters().unwrap();
        check_independence(&graph);

        // every accession with evidence sits in exactly one group
        let grouped = graph
            .groups()
            .iter()
            .map(|g| g.accessions.len())
            .sum::<usize>();
        let with_evidence = graph
            .peptides
            .iter()
            .flat_map(|p| p.accessions())
            .collect::<BTreeSet<_>>()
            .len();
        grouped == with_evidence
    }
}
