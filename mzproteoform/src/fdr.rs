//! Decoy-based false discovery rate estimation.
//!
//! Each decoy group's relations are clustered exactly as the target experimental-theoretical
//! relations are, and the spread of decoy identification counts across groups is compared
//! with the target identification count.
use std::collections::HashSet;

use identity_hash::BuildIdentityHasher;

use crate::peak::{PeakArena, PeakId};
use crate::proteoform::ProteoformId;
use crate::relation::{RelationArena, RelationId};
use crate::stats::mean_stddev;

/// Count the distinct experimental proteoforms taking part in at least one accepted relation
pub fn identified_experimentals(relations: &RelationArena, members: &[RelationId]) -> usize {
    members
        .iter()
        .map(|id| &relations[*id])
        .filter(|r| r.accepted)
        .map(|r| r.subject.proteoform)
        .collect::<HashSet<ProteoformId, BuildIdentityHasher<ProteoformId>>>()
        .len()
}

pub fn accepted_peak_count(peaks: &PeakArena, members: &[PeakId]) -> usize {
    members.iter().filter(|id| peaks[**id].peak_accepted).count()
}

/// Relation and peak statistics for one set of relations, target or decoy
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupStatistics {
    pub name: String,
    pub relation_count: usize,
    pub peak_count: usize,
    pub accepted_peaks: usize,
    pub identified: usize,
}

impl GroupStatistics {
    pub fn from_collections(
        name: impl Into<String>,
        relations: &RelationArena,
        relation_ids: &[RelationId],
        peaks: &PeakArena,
        peak_ids: &[PeakId],
    ) -> Self {
        Self {
            name: name.into(),
            relation_count: relation_ids.len(),
            peak_count: peak_ids.len(),
            accepted_peaks: accepted_peak_count(peaks, peak_ids),
            identified: identified_experimentals(relations, relation_ids),
        }
    }
}

/// The decoy statistics a caller needs to judge the significance of the target identifications
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FdrSummary {
    pub target: GroupStatistics,
    pub decoy_groups: Vec<GroupStatistics>,
    pub decoy_mean_identified: f64,
    pub decoy_stddev_identified: f64,
    pub decoy_mean_accepted_peaks: f64,
    pub decoy_stddev_accepted_peaks: f64,
    /// The identified target proteoform count
    pub target_identified: usize,
    /// The accepted peak count over all target relation kinds
    pub total_accepted_peaks: usize,
    /// The mean decoy identification count divided by the target identification count
    pub estimated_fdr: f64,
}

impl FdrSummary {
    pub fn estimate(
        target: GroupStatistics,
        total_accepted_peaks: usize,
        decoy_groups: Vec<GroupStatistics>,
    ) -> Self {
        let identified: Vec<f64> = decoy_groups.iter().map(|g| g.identified as f64).collect();
        let accepted: Vec<f64> = decoy_groups
            .iter()
            .map(|g| g.accepted_peaks as f64)
            .collect();
        let (decoy_mean_identified, decoy_stddev_identified) = mean_stddev(&identified);
        let (decoy_mean_accepted_peaks, decoy_stddev_accepted_peaks) = mean_stddev(&accepted);
        let target_identified = target.identified;
        let estimated_fdr = if target_identified == 0 {
            0.0
        } else {
            decoy_mean_identified / target_identified as f64
        };
        Self {
            target,
            decoy_groups,
            decoy_mean_identified,
            decoy_stddev_identified,
            decoy_mean_accepted_peaks,
            decoy_stddev_accepted_peaks,
            target_identified,
            total_accepted_peaks,
            estimated_fdr,
        }
    }

    /// Whether the target identification count exceeds the decoy mean by more than
    /// `k` decoy standard deviations
    pub fn is_significant(&self, k: f64) -> bool {
        self.target_identified as f64 > self.decoy_mean_identified + k * self.decoy_stddev_identified
    }
}
