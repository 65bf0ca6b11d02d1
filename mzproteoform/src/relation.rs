//! Pairwise relations between proteoforms and their storage
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::ops::{Index, IndexMut};

use identity_hash::IdentityHashable;

use crate::params::ClusteringParams;
use crate::peak::PeakId;
use crate::proteoform::{Proteoform, ProteoformId};
use crate::tolerance::UNKNOWN_LYSINE_COUNT;

/// A key into a [`RelationArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelationId(pub u32);

impl Hash for RelationId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.0)
    }
}

impl IdentityHashable for RelationId {}

impl Display for RelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

impl RelationId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Which relation builder produced a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelationKind {
    /// Two experimental proteoforms with equal label counts
    ExperimentalExperimental,
    /// Two experimental proteoforms with different label counts, candidates for missed labels
    UnequalLysineCount,
    /// An experimental proteoform and a target theoretical proteoform
    ExperimentalTheoretical,
    /// An experimental proteoform and a decoy theoretical proteoform
    ExperimentalDecoy,
}

impl RelationKind {
    /// Whether relations of this kind have a theoretical on the reference side
    pub fn is_theoretical(&self) -> bool {
        matches!(
            self,
            Self::ExperimentalTheoretical | Self::ExperimentalDecoy
        )
    }
}

/// The aggregate values of one side of a relation at the time it was created
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelationSide {
    pub proteoform: ProteoformId,
    pub agg_intensity: f64,
    pub agg_rt: f64,
    pub observation_count: usize,
}

impl RelationSide {
    pub fn new(id: ProteoformId, proteoform: &Proteoform) -> Self {
        Self {
            proteoform: id,
            agg_intensity: proteoform.agg_intensity(),
            agg_rt: proteoform.agg_rt(),
            observation_count: proteoform.observation_count(),
        }
    }
}

/// An evidenced link from a subject proteoform to a reference proteoform.
///
/// `delta_mass` is the subject mass minus the reference mass.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProteoformRelation {
    pub kind: RelationKind,
    pub subject: RelationSide,
    pub reference: RelationSide,
    pub delta_mass: f64,
    pub lysine_count: i32,
    pub nearby_relations_count: usize,
    pub outside_no_mans_land: bool,
    pub accepted: bool,
    pub peak: Option<PeakId>,
    pub decoy_group: Option<String>,
}

impl ProteoformRelation {
    pub fn new(
        kind: RelationKind,
        subject: (ProteoformId, &Proteoform),
        reference: (ProteoformId, &Proteoform),
        clustering: &ClusteringParams,
    ) -> Self {
        let delta_mass = subject.1.modified_mass - reference.1.modified_mass;
        let lysine_count = if subject.1.has_lysine_count() {
            subject.1.lysine_count
        } else if reference.1.has_lysine_count() {
            reference.1.lysine_count
        } else {
            UNKNOWN_LYSINE_COUNT
        };
        Self {
            kind,
            subject: RelationSide::new(subject.0, subject.1),
            reference: RelationSide::new(reference.0, reference.1),
            delta_mass,
            lysine_count,
            nearby_relations_count: 0,
            outside_no_mans_land: clustering.outside_no_mans_land(delta_mass),
            accepted: false,
            peak: None,
            decoy_group: reference.1.decoy_group.clone(),
        }
    }

    pub fn connected_proteoforms(&self) -> [ProteoformId; 2] {
        [self.subject.proteoform, self.reference.proteoform]
    }

    pub fn involves(&self, id: ProteoformId) -> bool {
        self.subject.proteoform == id || self.reference.proteoform == id
    }

    /// An order-independent key for the pair of proteoforms this relation connects
    pub fn pair_key(&self) -> (ProteoformId, ProteoformId) {
        let (a, b) = (self.subject.proteoform, self.reference.proteoform);
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

impl Display for ProteoformRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}({} -> {}, {:0.4} Da)",
            self.kind, self.subject.proteoform, self.reference.proteoform, self.delta_mass
        )
    }
}

/// Count, for every relation, how many *other* relations in the same collection have a
/// delta mass within `peak_width_base / 2` of its own.
pub fn count_nearby_relations(relations: &mut [ProteoformRelation], peak_width_base: f64) {
    let mut deltas: Vec<f64> = relations.iter().map(|r| r.delta_mass).collect();
    deltas.sort_by(|a, b| a.total_cmp(b));
    let half_width = peak_width_base / 2.0;
    for rel in relations.iter_mut() {
        let lo = deltas.partition_point(|d| *d < rel.delta_mass - half_width);
        let hi = deltas.partition_point(|d| *d <= rel.delta_mass + half_width);
        rel.nearby_relations_count = (hi - lo).saturating_sub(1);
    }
}

/// The owner of every relation produced by a build
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelationArena {
    relations: Vec<ProteoformRelation>,
}

impl RelationArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, relation: ProteoformRelation) -> RelationId {
        let id = RelationId(self.relations.len() as u32);
        self.relations.push(relation);
        id
    }

    pub fn extend<I: IntoIterator<Item = ProteoformRelation>>(
        &mut self,
        relations: I,
    ) -> Vec<RelationId> {
        relations.into_iter().map(|r| self.push(r)).collect()
    }

    pub fn get(&self, id: RelationId) -> Option<&ProteoformRelation> {
        self.relations.get(id.index())
    }

    pub fn get_mut(&mut self, id: RelationId) -> Option<&mut ProteoformRelation> {
        self.relations.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RelationId, &ProteoformRelation)> {
        self.relations
            .iter()
            .enumerate()
            .map(|(i, r)| (RelationId(i as u32), r))
    }
}

impl Index<RelationId> for RelationArena {
    type Output = ProteoformRelation;

    fn index(&self, index: RelationId) -> &Self::Output {
        &self.relations[index.index()]
    }
}

impl IndexMut<RelationId> for RelationArena {
    fn index_mut(&mut self, index: RelationId) -> &mut Self::Output {
        &mut self.relations[index.index()]
    }
}
