//! Proteoform families: connected components of proteoforms linked by accepted relations
use std::collections::{BTreeSet, HashMap, VecDeque};

use identity_hash::BuildIdentityHasher;

use crate::proteoform::{ProteoformArena, ProteoformId, ProteoformKind};
use crate::relation::{RelationArena, RelationId};

type Adjacency = HashMap<ProteoformId, Vec<(RelationId, ProteoformId)>, BuildIdentityHasher<ProteoformId>>;

/// A set of proteoforms connected to each other through accepted relations
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProteoformFamily {
    pub id: usize,
    pub experimentals: Vec<ProteoformId>,
    pub theoreticals: Vec<ProteoformId>,
    pub relations: Vec<RelationId>,
}

impl ProteoformFamily {
    /// A family is identified when at least one theoretical proteoform belongs to it
    pub fn is_identified(&self) -> bool {
        !self.theoreticals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.experimentals.len() + self.theoreticals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &ProteoformId) -> bool {
        self.experimentals.contains(id) || self.theoreticals.contains(id)
    }
}

struct FamilyTraversal<'a> {
    adjacency: &'a Adjacency,
    /// The proteoforms that have not yet been placed in a family
    unvisited: BTreeSet<ProteoformId>,
}

impl<'a> FamilyTraversal<'a> {
    fn new(adjacency: &'a Adjacency, seeds: BTreeSet<ProteoformId>) -> Self {
        Self {
            adjacency,
            unvisited: seeds,
        }
    }

    fn visit(&mut self, node: ProteoformId) -> (Vec<ProteoformId>, Vec<RelationId>) {
        let mut members = Vec::new();
        let mut edges = BTreeSet::new();
        let mut queue = VecDeque::from(vec![node]);
        self.unvisited.remove(&node);
        while let Some(node) = queue.pop_front() {
            members.push(node);
            if let Some(neighbors) = self.adjacency.get(&node) {
                for (rel, other) in neighbors {
                    edges.insert(*rel);
                    // Nodes that have already been queued are gone from `unvisited`
                    if self.unvisited.remove(other) {
                        queue.push_back(*other);
                    }
                }
            }
        }
        members.sort();
        (members, edges.into_iter().collect())
    }
}

impl Iterator for FamilyTraversal<'_> {
    type Item = (Vec<ProteoformId>, Vec<RelationId>);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.unvisited.iter().next().copied()?;
        Some(self.visit(node))
    }
}

/// Partition every experimental proteoform, and every theoretical proteoform reachable
/// from one, into families joined by the accepted relations among `eligible`.
pub fn construct_families(
    proteoforms: &ProteoformArena,
    relations: &RelationArena,
    eligible: &[RelationId],
) -> Vec<ProteoformFamily> {
    let mut adjacency = Adjacency::default();
    let mut seeds = BTreeSet::new();
    for rel_id in eligible {
        let rel = &relations[*rel_id];
        if !rel.accepted {
            continue;
        }
        let [a, b] = rel.connected_proteoforms();
        adjacency.entry(a).or_default().push((*rel_id, b));
        adjacency.entry(b).or_default().push((*rel_id, a));
        seeds.insert(a);
        seeds.insert(b);
    }
    seeds.extend(
        proteoforms
            .iter()
            .filter(|(_, p)| p.is_experimental())
            .map(|(id, _)| id),
    );

    FamilyTraversal::new(&adjacency, seeds)
        .enumerate()
        .map(|(i, (members, relations))| {
            let (experimentals, theoreticals) = members
                .into_iter()
                .partition(|id| proteoforms[*id].kind() == ProteoformKind::Experimental);
            ProteoformFamily {
                id: i,
                experimentals,
                theoreticals,
                relations,
            }
        })
        .collect()
}
