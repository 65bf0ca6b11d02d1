//! Delta mass peaks: groups of relations sharing a delta mass
use std::collections::HashSet;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::ops::{Index, IndexMut};

use identity_hash::{BuildIdentityHasher, IdentityHashable};
use tracing::{debug, trace};

use crate::params::ClusteringParams;
use crate::relation::{RelationArena, RelationId, RelationKind};

/// A key into a [`PeakArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeakId(pub u32);

impl Hash for PeakId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.0)
    }
}

impl IdentityHashable for PeakId {}

impl Display for PeakId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "K{}", self.0)
    }
}

impl PeakId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A group of relations whose delta masses fall within one peak width of each other
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeltaMassPeak {
    pub id: PeakId,
    /// The kind of relation grouped by this peak
    pub kind: RelationKind,
    /// The decoy group the grouped relations belong to, if any
    pub decoy_group: Option<String>,
    /// The mean delta mass of the grouped relations
    pub delta_mass: f64,
    pub grouped_relations: Vec<RelationId>,
    /// The smallest delta mass in the peak
    pub start: f64,
    /// The largest delta mass in the peak
    pub end: f64,
    pub outside_no_mans_land: bool,
    pub peak_accepted: bool,
    /// Whether `peak_accepted` was set by the user rather than the acceptance rule
    pub acceptance_overridden: bool,
    pub missed_mono: bool,
}

impl DeltaMassPeak {
    pub fn len(&self) -> usize {
        self.grouped_relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grouped_relations.is_empty()
    }

    pub fn contains(&self, relation: &RelationId) -> bool {
        self.grouped_relations.contains(relation)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RelationId> {
        self.grouped_relations.iter()
    }
}

impl Index<usize> for DeltaMassPeak {
    type Output = RelationId;

    fn index(&self, index: usize) -> &Self::Output {
        &self.grouped_relations[index]
    }
}

impl<'a> IntoIterator for &'a DeltaMassPeak {
    type Item = &'a RelationId;

    type IntoIter = std::slice::Iter<'a, RelationId>;

    fn into_iter(self) -> Self::IntoIter {
        self.grouped_relations.iter()
    }
}

impl Display for DeltaMassPeak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({:?}, {:0.4} Da, {} relations, accepted={})",
            self.id,
            self.kind,
            self.delta_mass,
            self.len(),
            self.peak_accepted
        )
    }
}

/// The acceptance rule for delta mass peaks
#[inline]
pub fn peak_is_accepted(
    relation_count: usize,
    delta_mass: f64,
    min_peak_count: usize,
    clustering: &ClusteringParams,
) -> bool {
    relation_count >= min_peak_count && clustering.outside_no_mans_land(delta_mass)
}

/// The owner of every peak produced by a build
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeakArena {
    peaks: Vec<DeltaMassPeak>,
}

impl PeakArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> PeakId {
        PeakId(self.peaks.len() as u32)
    }

    fn push(&mut self, peak: DeltaMassPeak) -> PeakId {
        let id = peak.id;
        debug_assert_eq!(id, self.next_id());
        self.peaks.push(peak);
        id
    }

    pub fn get(&self, id: PeakId) -> Option<&DeltaMassPeak> {
        self.peaks.get(id.index())
    }

    pub fn get_mut(&mut self, id: PeakId) -> Option<&mut DeltaMassPeak> {
        self.peaks.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeltaMassPeak> {
        self.peaks.iter()
    }
}

impl Index<PeakId> for PeakArena {
    type Output = DeltaMassPeak;

    fn index(&self, index: PeakId) -> &Self::Output {
        &self.peaks[index.index()]
    }
}

impl IndexMut<PeakId> for PeakArena {
    fn index_mut(&mut self, index: PeakId) -> &mut Self::Output {
        &mut self.peaks[index.index()]
    }
}

type RelationSet = HashSet<RelationId, BuildIdentityHasher<RelationId>>;

/// Groups one collection of relations into delta mass peaks.
///
/// Relations are visited from the densest neighborhood outwards. Each unassigned
/// seed opens a window of width `peak_width_base` around its delta mass, the window
/// is re-centered on the mean delta mass of its members, and the unassigned relations
/// in the re-centered window form the peak.
#[derive(Debug)]
pub struct PeakClusterer<'a> {
    clustering: &'a ClusteringParams,
    min_peak_count: usize,
    kind: RelationKind,
    decoy_group: Option<&'a str>,
}

impl<'a> PeakClusterer<'a> {
    pub fn new(clustering: &'a ClusteringParams, min_peak_count: usize, kind: RelationKind) -> Self {
        Self {
            clustering,
            min_peak_count,
            kind,
            decoy_group: None,
        }
    }

    pub fn with_decoy_group(mut self, decoy_group: Option<&'a str>) -> Self {
        self.decoy_group = decoy_group;
        self
    }

    fn window(
        &self,
        sorted: &[(f64, RelationId)],
        assigned: &RelationSet,
        center: f64,
    ) -> Vec<(f64, RelationId)> {
        let half_width = self.clustering.peak_width_base / 2.0;
        let lo = sorted.partition_point(|(d, _)| *d < center - half_width);
        let hi = sorted.partition_point(|(d, _)| *d <= center + half_width);
        sorted[lo..hi]
            .iter()
            .filter(|(_, id)| !assigned.contains(id))
            .copied()
            .collect()
    }

    fn mean_delta(members: &[(f64, RelationId)]) -> f64 {
        members.iter().map(|(d, _)| *d).sum::<f64>() / members.len() as f64
    }

    /// Cluster `members` of `relations` into new peaks stored in `peaks`, marking each
    /// relation with its peak and the peak's acceptance.
    pub fn cluster(
        &self,
        relations: &mut RelationArena,
        members: &[RelationId],
        peaks: &mut PeakArena,
    ) -> Vec<PeakId> {
        let mut sorted: Vec<(f64, RelationId)> = members
            .iter()
            .map(|id| (relations[*id].delta_mass, *id))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut seeds: Vec<RelationId> = members.to_vec();
        seeds.sort_by(|a, b| {
            let (ra, rb) = (&relations[*a], &relations[*b]);
            rb.nearby_relations_count
                .cmp(&ra.nearby_relations_count)
                .then_with(|| ra.delta_mass.total_cmp(&rb.delta_mass))
                .then_with(|| a.cmp(b))
        });

        let mut assigned = RelationSet::default();
        let mut created = Vec::new();
        for seed in seeds {
            if assigned.contains(&seed) {
                continue;
            }
            let seed_delta = relations[seed].delta_mass;
            let first = self.window(&sorted, &assigned, seed_delta);
            let recentered = self.window(&sorted, &assigned, Self::mean_delta(&first));
            let group = if recentered.iter().any(|(_, id)| *id == seed) {
                recentered
            } else {
                first
            };

            let delta_mass = Self::mean_delta(&group);
            let start = group.first().map(|(d, _)| *d).unwrap_or(delta_mass);
            let end = group.last().map(|(d, _)| *d).unwrap_or(delta_mass);
            let grouped_relations: Vec<RelationId> = group.iter().map(|(_, id)| *id).collect();
            assigned.extend(grouped_relations.iter().copied());

            let peak_accepted = peak_is_accepted(
                grouped_relations.len(),
                delta_mass,
                self.min_peak_count,
                self.clustering,
            );
            let id = peaks.next_id();
            for rel_id in grouped_relations.iter() {
                let rel = &mut relations[*rel_id];
                rel.peak = Some(id);
                rel.accepted = peak_accepted;
            }
            let peak = DeltaMassPeak {
                id,
                kind: self.kind,
                decoy_group: self.decoy_group.map(|s| s.to_string()),
                delta_mass,
                grouped_relations,
                start,
                end,
                outside_no_mans_land: self.clustering.outside_no_mans_land(delta_mass),
                peak_accepted,
                acceptance_overridden: false,
                missed_mono: false,
            };
            trace!("Created {peak}");
            created.push(peaks.push(peak));
        }
        debug!(
            "Clustered {} {:?} relations into {} peaks ({} accepted)",
            members.len(),
            self.kind,
            created.len(),
            created.iter().filter(|p| peaks[**p].peak_accepted).count()
        );
        created
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::aggregation::build_experimental;
    use crate::observation::Component;
    use crate::proteoform::{Proteoform, ProteoformId};
    use crate::relation::{count_nearby_relations, ProteoformRelation};
    use crate::tolerance::{ToleranceMatcher, ToleranceParams};

    fn make_relations(deltas: &[f64], clustering: &ClusteringParams) -> RelationArena {
        let matcher: ToleranceMatcher = ToleranceParams::default().into();
        let mut relations: Vec<ProteoformRelation> = deltas
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let a = Component::new(format!("a{i}"), "run1", 10000.0 + d, 10.0, 30.0, -1);
                let b = Component::new(format!("b{i}"), "run1", 10000.0, 10.0, 30.0, -1);
                let a = Proteoform::experimental("a", build_experimental(&a, &[], &matcher), false);
                let b = Proteoform::experimental("b", build_experimental(&b, &[], &matcher), false);
                ProteoformRelation::new(
                    RelationKind::ExperimentalExperimental,
                    (ProteoformId(2 * i as u32), &a),
                    (ProteoformId(2 * i as u32 + 1), &b),
                    clustering,
                )
            })
            .collect();
        count_nearby_relations(&mut relations, clustering.peak_width_base);
        let mut arena = RelationArena::new();
        arena.extend(relations);
        arena
    }

    fn cluster_with(
        deltas: &[f64],
        min_peak_count: usize,
    ) -> (RelationArena, PeakArena, Vec<PeakId>) {
        let clustering = ClusteringParams::default();
        let mut relations = make_relations(deltas, &clustering);
        let members: Vec<RelationId> = relations.iter().map(|(id, _)| id).collect();
        let mut peaks = PeakArena::new();
        let ids = PeakClusterer::new(
            &clustering,
            min_peak_count,
            RelationKind::ExperimentalExperimental,
        )
        .cluster(&mut relations, &members, &mut peaks);
        (relations, peaks, ids)
    }

    #[test_log::test]
    fn test_cluster_groups() {
        let deltas = [15.995, 15.996, 15.994, 79.966, 79.967, 0.5];
        let (relations, peaks, ids) = cluster_with(&deltas, 2);
        assert_eq!(ids.len(), 3);
        let first = &peaks[ids[0]];
        assert_eq!(first.len(), 3);
        assert!((first.delta_mass - 15.995).abs() < 1e-6);
        assert!(first.peak_accepted);
        let second = &peaks[ids[1]];
        assert_eq!(second.len(), 2);
        assert!(second.peak_accepted);
        let third = &peaks[ids[2]];
        assert_eq!(third.len(), 1);
        assert!(!third.peak_accepted);
        assert!(!third.outside_no_mans_land);

        for (id, rel) in relations.iter() {
            let peak = &peaks[rel.peak.unwrap()];
            assert!(peak.contains(&id));
            assert_eq!(rel.accepted, peak.peak_accepted);
        }
    }

    #[test]
    fn test_min_peak_count_boundary() {
        let deltas = [42.010, 42.011, 42.012];
        let (_, peaks, ids) = cluster_with(&deltas, 3);
        assert_eq!(ids.len(), 1);
        assert!(peaks[ids[0]].peak_accepted);

        let (_, peaks, ids) = cluster_with(&deltas, 4);
        assert_eq!(ids.len(), 1);
        assert!(!peaks[ids[0]].peak_accepted);
    }

    #[test]
    fn test_no_mans_land_rejects_dense_peak() {
        let deltas = [0.5, 0.501, 0.502, 0.503];
        let (relations, peaks, ids) = cluster_with(&deltas, 2);
        assert_eq!(ids.len(), 1);
        assert!(!peaks[ids[0]].peak_accepted);
        assert!(relations.iter().all(|(_, r)| !r.accepted && r.peak.is_some()));
    }

    #[test]
    fn test_raising_threshold_only_rejects() {
        let deltas = [
            15.995, 15.996, 15.994, 15.995, 79.966, 79.967, 79.966, 0.984, 0.985, 28.031,
        ];
        let mut previous: Option<Vec<bool>> = None;
        for min_peak_count in 0..6 {
            let (_, peaks, ids) = cluster_with(&deltas, min_peak_count);
            let accepted: Vec<bool> = ids.iter().map(|id| peaks[*id].peak_accepted).collect();
            if let Some(prev) = previous.as_ref() {
                assert_eq!(prev.len(), accepted.len());
                for (before, after) in prev.iter().zip(accepted.iter()) {
                    assert!(*before || !*after);
                }
            }
            previous = Some(accepted);
        }
    }
}
