//! The proteoform community: owner of every proteoform and of the relations,
//! delta mass peaks, families and decoy statistics derived from them.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use identity_hash::BuildIdentityHasher;
use itertools::Itertools;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::aggregation::{aggregate_observations, QuantificationPools};
use crate::family::{construct_families, ProteoformFamily};
use crate::fdr::{accepted_peak_count, FdrSummary, GroupStatistics};
use crate::observation::{validate_observations, DataError, Observation, SkipReport};
use crate::params::{CommunityParams, ConfigurationError};
use crate::peak::{DeltaMassPeak, PeakArena, PeakClusterer, PeakId};
use crate::proteoform::{
    ExperimentalProteoform, Proteoform, ProteoformArena, ProteoformId, TheoreticalProteoform,
};
use crate::relation::{
    count_nearby_relations, ProteoformRelation, RelationArena, RelationId, RelationKind,
};
use crate::tolerance::{ToleranceMatcher, MONOISOTOPIC_UNIT_MASS};

/// An error raised by a community edit or configuration change
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommunityError {
    #[error("Invalid configuration: {0}")]
    Configuration(
        #[source]
        #[from]
        ConfigurationError,
    ),
    #[error("No peak {0} exists in the current build")]
    UnknownPeak(PeakId),
    #[error("No relation {0} exists in the current build")]
    UnknownRelation(RelationId),
    #[error("No proteoform {0} exists")]
    UnknownProteoform(ProteoformId),
    #[error("Proteoform {0} is not an experimental proteoform")]
    NotExperimental(ProteoformId),
}

pub type RelationIndex = HashMap<ProteoformId, Vec<RelationId>, BuildIdentityHasher<ProteoformId>>;

/// Builds relations between proteoforms of one arena under one parameter snapshot.
///
/// Every method is a pure read producing new relations.
#[derive(Debug, Clone, Copy)]
pub struct RelationBuilder<'a> {
    proteoforms: &'a ProteoformArena,
    params: &'a CommunityParams,
}

impl<'a> RelationBuilder<'a> {
    pub fn new(proteoforms: &'a ProteoformArena, params: &'a CommunityParams) -> Self {
        Self {
            proteoforms,
            params,
        }
    }

    fn labeled(&self) -> bool {
        self.params.tolerance.neucode_labeled
    }

    /// The coarse gate shared by all experimental-experimental relation kinds
    pub fn within_ee_gate(&self, a: &Proteoform, b: &Proteoform) -> bool {
        let clustering = &self.params.clustering;
        (a.modified_mass - b.modified_mass).abs() <= clustering.ee_max_mass_difference
            && (a.agg_rt() - b.agg_rt()).abs() <= clustering.ee_max_retention_time_difference
    }

    /// Whether two experimental proteoforms may be related as a missed label candidate pair
    pub fn allowed_ee_relation(&self, a: ProteoformId, b: ProteoformId) -> bool {
        let (pa, pb) = (&self.proteoforms[a], &self.proteoforms[b]);
        pa.lysine_count != pb.lysine_count
            && pa.accession != pb.accession
            && self.within_ee_gate(pa, pb)
    }

    /// Order a pair so that the heavier proteoform is the subject
    fn orient(&self, a: ProteoformId, b: ProteoformId) -> (ProteoformId, ProteoformId) {
        let (pa, pb) = (&self.proteoforms[a], &self.proteoforms[b]);
        match pa
            .modified_mass
            .total_cmp(&pb.modified_mass)
            .then_with(|| a.cmp(&b))
        {
            std::cmp::Ordering::Less => (b, a),
            _ => (a, b),
        }
    }

    fn make_relation(
        &self,
        kind: RelationKind,
        subject: ProteoformId,
        reference: ProteoformId,
    ) -> ProteoformRelation {
        ProteoformRelation::new(
            kind,
            (subject, &self.proteoforms[subject]),
            (reference, &self.proteoforms[reference]),
            &self.params.clustering,
        )
    }

    /// Relate every unordered pair of distinct proteoforms drawn from `set_a` and `set_b`
    /// that pass `accept`, once per pair, in first-encountered order.
    fn relate_pairs<F>(
        &self,
        set_a: &[ProteoformId],
        set_b: &[ProteoformId],
        kind: RelationKind,
        accept: F,
    ) -> Vec<ProteoformRelation>
    where
        F: Fn(ProteoformId, ProteoformId) -> bool + Sync,
    {
        let candidates: Vec<(ProteoformId, ProteoformId)> = set_a
            .par_iter()
            .flat_map_iter(|a| {
                let accept = &accept;
                set_b
                    .iter()
                    .filter(move |b| *a != **b && accept(*a, **b))
                    .map(move |b| (*a, *b))
            })
            .collect();

        let mut seen: HashSet<(ProteoformId, ProteoformId)> = HashSet::with_capacity(candidates.len());
        candidates
            .into_iter()
            .filter(|(a, b)| seen.insert(if a <= b { (*a, *b) } else { (*b, *a) }))
            .map(|(a, b)| {
                let (subject, reference) = self.orient(a, b);
                self.make_relation(kind, subject, reference)
            })
            .collect()
    }

    /// Relate experimental proteoforms of equal label count (when labeled) within the
    /// coarse mass and retention time gate.
    pub fn relate_ee(&self, set_a: &[ProteoformId], set_b: &[ProteoformId]) -> Vec<ProteoformRelation> {
        let labeled = self.labeled();
        self.relate_pairs(set_a, set_b, RelationKind::ExperimentalExperimental, |a, b| {
            let (pa, pb) = (&self.proteoforms[a], &self.proteoforms[b]);
            (!labeled || pa.lysine_count == pb.lysine_count) && self.within_ee_gate(pa, pb)
        })
    }

    /// Relate experimental proteoforms whose label counts differ, surfacing missed label candidates
    pub fn relate_unequal_ee_lysine_counts(&self, set: &[ProteoformId]) -> Vec<ProteoformRelation> {
        self.relate_pairs(set, set, RelationKind::UnequalLysineCount, |a, b| {
            self.allowed_ee_relation(a, b)
        })
    }

    /// Relate every experimental proteoform to every theoretical proteoform within the
    /// coarse experimental-theoretical mass gate. Decoy theoreticals produce
    /// [`RelationKind::ExperimentalDecoy`] relations.
    pub fn relate_et(
        &self,
        experimentals: &[ProteoformId],
        theoreticals: &[ProteoformId],
    ) -> Vec<ProteoformRelation> {
        let labeled = self.labeled();
        let max_diff = self.params.clustering.et_max_mass_difference;
        experimentals
            .par_iter()
            .flat_map_iter(|e| {
                let pe = &self.proteoforms[*e];
                theoreticals.iter().filter_map(move |t| {
                    let pt = &self.proteoforms[*t];
                    let passes = (pe.modified_mass - pt.modified_mass).abs() <= max_diff
                        && (!labeled || pe.lysine_count == pt.lysine_count);
                    if !passes {
                        return None;
                    }
                    let kind = if pt.is_decoy() {
                        RelationKind::ExperimentalDecoy
                    } else {
                        RelationKind::ExperimentalTheoretical
                    };
                    Some(self.make_relation(kind, *e, *t))
                })
            })
            .collect()
    }

    /// Relate all experimental proteoforms to each decoy group in turn
    pub fn relate_ed(
        &self,
        experimentals: &[ProteoformId],
        decoy_groups: &BTreeMap<String, Vec<ProteoformId>>,
    ) -> BTreeMap<String, Vec<ProteoformRelation>> {
        decoy_groups
            .iter()
            .map(|(key, decoys)| (key.clone(), self.relate_et(experimentals, decoys)))
            .collect()
    }
}

/// Everything derived from the proteoforms by a build. Replaced wholesale by every
/// rebuild, never updated piecemeal.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DerivedCollections {
    pub relations: RelationArena,
    pub peaks: PeakArena,
    pub ee_relations: Vec<RelationId>,
    pub unequal_lysine_relations: Vec<RelationId>,
    pub et_relations: Vec<RelationId>,
    pub ed_relations: BTreeMap<String, Vec<RelationId>>,
    pub ee_peaks: Vec<PeakId>,
    pub et_peaks: Vec<PeakId>,
    pub ed_peaks: BTreeMap<String, Vec<PeakId>>,
    pub relation_index: RelationIndex,
    pub families: Vec<ProteoformFamily>,
    pub fdr: FdrSummary,
}

impl DerivedCollections {
    fn index_relations(&mut self) {
        let mut index = RelationIndex::default();
        for (id, rel) in self.relations.iter() {
            for p in rel.connected_proteoforms() {
                index.entry(p).or_default().push(id);
            }
        }
        self.relation_index = index;
    }

    fn refresh_aggregates(&mut self, proteoforms: &ProteoformArena) {
        let mut eligible = self.ee_relations.clone();
        eligible.extend_from_slice(&self.et_relations);
        self.families = construct_families(proteoforms, &self.relations, &eligible);

        let target = GroupStatistics::from_collections(
            "target",
            &self.relations,
            &self.et_relations,
            &self.peaks,
            &self.et_peaks,
        );
        let total_accepted_peaks = accepted_peak_count(&self.peaks, &self.et_peaks)
            + accepted_peak_count(&self.peaks, &self.ee_peaks);
        let decoy_groups = self
            .ed_relations
            .iter()
            .map(|(key, relation_ids)| {
                let peak_ids = self.ed_peaks.get(key).map(|v| v.as_slice()).unwrap_or(&[]);
                GroupStatistics::from_collections(
                    key.clone(),
                    &self.relations,
                    relation_ids,
                    &self.peaks,
                    peak_ids,
                )
            })
            .collect();
        self.fdr = FdrSummary::estimate(target, total_accepted_peaks, decoy_groups);
    }
}

fn install(
    relations: &mut RelationArena,
    mut batch: Vec<ProteoformRelation>,
    peak_width_base: f64,
) -> Vec<RelationId> {
    count_nearby_relations(&mut batch, peak_width_base);
    relations.extend(batch)
}

/// Owns the experimental, theoretical and decoy proteoforms and every collection
/// derived from them.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProteoformCommunity {
    params: CommunityParams,
    proteoforms: ProteoformArena,
    experimental_proteoforms: Vec<ProteoformId>,
    theoretical_proteoforms: Vec<ProteoformId>,
    decoy_proteoforms: BTreeMap<String, Vec<ProteoformId>>,
    accessions: HashSet<String>,
    derived: DerivedCollections,
    built: bool,
    skipped: SkipReport,
}

impl ProteoformCommunity {
    pub fn new(params: CommunityParams) -> Result<Self, ConfigurationError> {
        params.validate()?;
        Ok(Self {
            params,
            ..Default::default()
        })
    }

    pub fn params(&self) -> &CommunityParams {
        &self.params
    }

    pub fn matcher(&self) -> ToleranceMatcher {
        self.params.tolerance.into()
    }

    fn invalidate(&mut self) {
        if self.built {
            debug!("Invalidating derived collections");
        }
        self.derived = DerivedCollections::default();
        self.built = false;
    }

    fn register(&mut self, proteoform: Proteoform) -> Result<ProteoformId, DataError> {
        if !self.accessions.insert(proteoform.accession.clone()) {
            return Err(DataError::DuplicateAccession(proteoform.accession));
        }
        self.invalidate();
        Ok(self.proteoforms.push(proteoform))
    }

    pub fn add_experimental(
        &mut self,
        accession: impl Into<String>,
        experimental: ExperimentalProteoform,
    ) -> Result<ProteoformId, DataError> {
        let proteoform = Proteoform::experimental(
            accession,
            experimental,
            self.params.tolerance.neucode_labeled,
        );
        let id = self.register(proteoform)?;
        self.experimental_proteoforms.push(id);
        Ok(id)
    }

    pub fn add_theoretical(
        &mut self,
        accession: impl Into<String>,
        theoretical: TheoreticalProteoform,
        lysine_count: i32,
    ) -> Result<ProteoformId, DataError> {
        let id = self.register(Proteoform::theoretical(accession, theoretical, lysine_count))?;
        self.theoretical_proteoforms.push(id);
        Ok(id)
    }

    /// Register a decoy group, so that it is related even while it holds no decoys
    pub fn register_decoy_group(&mut self, decoy_group: impl Into<String>) {
        self.invalidate();
        self.decoy_proteoforms.entry(decoy_group.into()).or_default();
    }

    pub fn add_decoy(
        &mut self,
        decoy_group: impl Into<String>,
        accession: impl Into<String>,
        theoretical: TheoreticalProteoform,
        lysine_count: i32,
    ) -> Result<ProteoformId, DataError> {
        let decoy_group = decoy_group.into();
        let id = self.register(Proteoform::decoy(
            accession,
            theoretical,
            lysine_count,
            decoy_group.clone(),
        ))?;
        self.decoy_proteoforms.entry(decoy_group).or_default().push(id);
        Ok(id)
    }

    /// Validate `observations` and aggregate them into experimental proteoforms, quantifying
    /// them against `quant_pools` when given. Malformed records are skipped and recorded.
    pub fn add_observations(
        &mut self,
        observations: Vec<Observation>,
        quant_pools: Option<(Vec<Observation>, Vec<Observation>)>,
    ) -> Vec<ProteoformId> {
        let mut report = SkipReport::new();
        let components = validate_observations(observations, &mut report);
        let (light, heavy) = match quant_pools {
            Some((light, heavy)) => (
                validate_observations(light, &mut report),
                validate_observations(heavy, &mut report),
            ),
            None => (Vec::new(), Vec::new()),
        };
        let pools = if light.is_empty() && heavy.is_empty() {
            None
        } else {
            Some(QuantificationPools {
                light: &light,
                heavy: &heavy,
            })
        };
        let experimentals = aggregate_observations(&components, &self.matcher(), pools);
        let offset = self.experimental_proteoforms.len();
        let mut ids = Vec::with_capacity(experimentals.len());
        for (i, exp) in experimentals.into_iter().enumerate() {
            match self.add_experimental(format!("E{}", offset + i + 1), exp) {
                Ok(id) => ids.push(id),
                Err(e) => report.push(e),
            }
        }
        self.skipped.extend(report);
        ids
    }

    pub fn record_skipped(&mut self, error: DataError) {
        self.skipped.push(error);
    }

    pub fn skipped(&self) -> &SkipReport {
        &self.skipped
    }

    pub fn proteoforms(&self) -> &ProteoformArena {
        &self.proteoforms
    }

    pub fn proteoform(&self, id: ProteoformId) -> Option<&Proteoform> {
        self.proteoforms.get(id)
    }

    pub fn experimental_ids(&self) -> &[ProteoformId] {
        &self.experimental_proteoforms
    }

    pub fn theoretical_ids(&self) -> &[ProteoformId] {
        &self.theoretical_proteoforms
    }

    pub fn decoy_groups(&self) -> &BTreeMap<String, Vec<ProteoformId>> {
        &self.decoy_proteoforms
    }

    pub fn experimental_proteoforms(&self) -> impl Iterator<Item = (ProteoformId, &Proteoform)> {
        self.experimental_proteoforms
            .iter()
            .map(|id| (*id, &self.proteoforms[*id]))
    }

    pub fn theoretical_proteoforms(&self) -> impl Iterator<Item = (ProteoformId, &Proteoform)> {
        self.theoretical_proteoforms
            .iter()
            .map(|id| (*id, &self.proteoforms[*id]))
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn derived(&self) -> &DerivedCollections {
        &self.derived
    }

    pub fn relation(&self, id: RelationId) -> Option<&ProteoformRelation> {
        self.derived.relations.get(id)
    }

    pub fn relations(&self) -> &RelationArena {
        &self.derived.relations
    }

    pub fn peak(&self, id: PeakId) -> Option<&DeltaMassPeak> {
        self.derived.peaks.get(id)
    }

    pub fn delta_mass_peaks(&self) -> &PeakArena {
        &self.derived.peaks
    }

    pub fn ee_relations(&self) -> &[RelationId] {
        &self.derived.ee_relations
    }

    pub fn unequal_lysine_relations(&self) -> &[RelationId] {
        &self.derived.unequal_lysine_relations
    }

    pub fn et_relations(&self) -> &[RelationId] {
        &self.derived.et_relations
    }

    pub fn ed_relations(&self) -> &BTreeMap<String, Vec<RelationId>> {
        &self.derived.ed_relations
    }

    pub fn ee_peaks(&self) -> &[PeakId] {
        &self.derived.ee_peaks
    }

    pub fn et_peaks(&self) -> &[PeakId] {
        &self.derived.et_peaks
    }

    pub fn ed_peaks(&self) -> &BTreeMap<String, Vec<PeakId>> {
        &self.derived.ed_peaks
    }

    /// The relations a proteoform participates in
    pub fn relationships_of(&self, id: ProteoformId) -> &[RelationId] {
        self.derived
            .relation_index
            .get(&id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn families(&self) -> &[ProteoformFamily] {
        &self.derived.families
    }

    pub fn fdr(&self) -> &FdrSummary {
        &self.derived.fdr
    }

    pub fn relation_builder(&self) -> RelationBuilder<'_> {
        RelationBuilder::new(&self.proteoforms, &self.params)
    }

    pub fn relate_ee(&self, set_a: &[ProteoformId], set_b: &[ProteoformId]) -> Vec<ProteoformRelation> {
        self.relation_builder().relate_ee(set_a, set_b)
    }

    pub fn relate_unequal_ee_lysine_counts(&self) -> Vec<ProteoformRelation> {
        self.relation_builder()
            .relate_unequal_ee_lysine_counts(&self.experimental_proteoforms)
    }

    pub fn allowed_ee_relation(&self, a: ProteoformId, b: ProteoformId) -> bool {
        self.relation_builder().allowed_ee_relation(a, b)
    }

    pub fn relate_et(
        &self,
        experimentals: &[ProteoformId],
        theoreticals: &[ProteoformId],
    ) -> Vec<ProteoformRelation> {
        self.relation_builder().relate_et(experimentals, theoreticals)
    }

    pub fn relate_ed(&self) -> BTreeMap<String, Vec<ProteoformRelation>> {
        self.relation_builder()
            .relate_ed(&self.experimental_proteoforms, &self.decoy_proteoforms)
    }

    /// Compute every derived collection from scratch under `params` without
    /// touching the community.
    fn build_derived(&self, params: &CommunityParams) -> DerivedCollections {
        let builder = RelationBuilder::new(&self.proteoforms, params);
        let clustering = &params.clustering;
        let width = clustering.peak_width_base;
        let experimentals = &self.experimental_proteoforms;

        let mut derived = DerivedCollections::default();
        let relations = &mut derived.relations;
        derived.ee_relations = install(relations, builder.relate_ee(experimentals, experimentals), width);
        derived.unequal_lysine_relations = install(
            relations,
            builder.relate_unequal_ee_lysine_counts(experimentals),
            width,
        );
        derived.et_relations = install(
            relations,
            builder.relate_et(experimentals, &self.theoretical_proteoforms),
            width,
        );
        derived.ed_relations = builder
            .relate_ed(experimentals, &self.decoy_proteoforms)
            .into_iter()
            .map(|(key, batch)| (key, install(relations, batch, width)))
            .collect();

        let peaks = &mut derived.peaks;
        derived.ee_peaks = PeakClusterer::new(
            clustering,
            clustering.min_peak_count_ee,
            RelationKind::ExperimentalExperimental,
        )
        .cluster(relations, &derived.ee_relations, peaks);
        derived.et_peaks = PeakClusterer::new(
            clustering,
            clustering.min_peak_count_et,
            RelationKind::ExperimentalTheoretical,
        )
        .cluster(relations, &derived.et_relations, peaks);
        derived.ed_peaks = derived
            .ed_relations
            .iter()
            .map(|(key, members)| {
                let ids = PeakClusterer::new(
                    clustering,
                    clustering.min_peak_count_et,
                    RelationKind::ExperimentalDecoy,
                )
                .with_decoy_group(Some(key.as_str()))
                .cluster(relations, members, peaks);
                (key.clone(), ids)
            })
            .collect();

        derived.index_relations();
        derived.refresh_aggregates(&self.proteoforms);
        derived
    }

    /// Discard every derived collection and rebuild all of them from the current
    /// proteoforms and parameters. The new collections replace the old ones only
    /// once they are complete.
    #[instrument(level = "debug", skip(self))]
    pub fn rebuild(&mut self) {
        let started = Instant::now();
        let params = self.params;
        let derived = self.build_derived(&params);
        self.derived = derived;
        self.built = true;
        let fdr = &self.derived.fdr;
        info!(
            "Built {} EE, {} unequal label, {} ET and {} ED relations over {} decoy groups",
            self.derived.ee_relations.len(),
            self.derived.unequal_lysine_relations.len(),
            self.derived.et_relations.len(),
            self.derived.ed_relations.values().map(|v| v.len()).sum::<usize>(),
            self.derived.ed_relations.len(),
        );
        info!(
            "{} peaks ({} accepted), {} families, {} identified experimental proteoforms, decoy mean {:0.2} \u{00b1} {:0.2}",
            self.derived.peaks.len(),
            fdr.total_accepted_peaks,
            self.derived.families.len(),
            fdr.target_identified,
            fdr.decoy_mean_identified,
            fdr.decoy_stddev_identified,
        );
        debug!("Rebuild took {:0.3?}", started.elapsed());
    }

    /// Replace the parameter snapshot. Any change invalidates and rebuilds every
    /// derived collection.
    pub fn set_params(&mut self, params: CommunityParams) -> Result<(), CommunityError> {
        params.validate()?;
        self.params = params;
        self.invalidate();
        self.rebuild();
        Ok(())
    }

    fn peak_mut(&mut self, peak: PeakId) -> Result<&mut DeltaMassPeak, CommunityError> {
        self.derived
            .peaks
            .get_mut(peak)
            .ok_or(CommunityError::UnknownPeak(peak))
    }

    /// Override a peak's acceptance, carrying the decision to every member relation
    pub fn set_peak_acceptance(&mut self, peak: PeakId, accepted: bool) -> Result<(), CommunityError> {
        let p = self.peak_mut(peak)?;
        p.peak_accepted = accepted;
        p.acceptance_overridden = true;
        let members = p.grouped_relations.clone();
        for rel in members {
            self.derived.relations[rel].accepted = accepted;
        }
        self.derived.refresh_aggregates(&self.proteoforms);
        Ok(())
    }

    pub fn set_relation_acceptance(
        &mut self,
        relation: RelationId,
        accepted: bool,
    ) -> Result<(), CommunityError> {
        let rel = self
            .derived
            .relations
            .get_mut(relation)
            .ok_or(CommunityError::UnknownRelation(relation))?;
        rel.accepted = accepted;
        self.derived.refresh_aggregates(&self.proteoforms);
        Ok(())
    }

    fn experimental_members(
        &self,
        peak: PeakId,
    ) -> Result<HashSet<ProteoformId, BuildIdentityHasher<ProteoformId>>, CommunityError> {
        let p = self
            .derived
            .peaks
            .get(peak)
            .ok_or(CommunityError::UnknownPeak(peak))?;
        Ok(p.iter()
            .flat_map(|r| self.derived.relations[*r].connected_proteoforms())
            .filter(|id| self.proteoforms[*id].is_experimental())
            .collect())
    }

    /// Set the `missed_mono` flag of a peak and of every experimental proteoform its
    /// relations reference. Returns the number of proteoforms updated.
    pub fn set_peak_missed_mono(&mut self, peak: PeakId, missed_mono: bool) -> Result<usize, CommunityError> {
        let targets = self.experimental_members(peak)?;
        self.peak_mut(peak)?.missed_mono = missed_mono;
        // Each proteoform is written by exactly one task, and `for_each` returns only once all are done
        self.proteoforms
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .filter(|(i, _)| targets.contains(&ProteoformId(*i as u32)))
            .for_each(|(_, p)| {
                if let Some(e) = p.as_experimental_mut() {
                    e.missed_mono = missed_mono;
                }
            });
        self.derived.refresh_aggregates(&self.proteoforms);
        Ok(targets.len())
    }

    /// Correct the mass of the subject experimental proteoform of every relation in `peak`
    /// by `shift` isotopic unit masses. Proteoforms already shifted are left alone.
    ///
    /// Masses changed, so the derived collections are invalidated and the caller must
    /// [`rebuild`](Self::rebuild). Returns the number of proteoforms shifted.
    pub fn shift_peak_masses(&mut self, peak: PeakId, shift: i32) -> Result<usize, CommunityError> {
        let p = self
            .derived
            .peaks
            .get(peak)
            .ok_or(CommunityError::UnknownPeak(peak))?;
        let subjects: Vec<ProteoformId> = p
            .iter()
            .map(|r| self.derived.relations[*r].subject.proteoform)
            .sorted()
            .dedup()
            .collect();
        let delta = shift as f64 * MONOISOTOPIC_UNIT_MASS;
        let mut shifted = 0;
        for id in subjects {
            if self.proteoforms[id].apply_mass_shift(delta) {
                shifted += 1;
            }
        }
        info!("Shifted {shifted} experimental proteoforms by {shift} isotopic units");
        self.invalidate();
        Ok(shifted)
    }

    /// Set the `missed_mono` flag of a single experimental proteoform
    pub fn set_missed_mono(&mut self, id: ProteoformId, missed_mono: bool) -> Result<(), CommunityError> {
        let p = self
            .proteoforms
            .get_mut(id)
            .ok_or(CommunityError::UnknownProteoform(id))?;
        let e = p
            .as_experimental_mut()
            .ok_or(CommunityError::NotExperimental(id))?;
        e.missed_mono = missed_mono;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::aggregation::build_experimental;
    use crate::observation::Component;
    use crate::proteoform::{Evidence, ModificationSet};

    fn community(labeled: bool) -> ProteoformCommunity {
        let mut params = CommunityParams::default();
        params.tolerance.neucode_labeled = labeled;
        ProteoformCommunity::new(params).unwrap()
    }

    fn add_exp(community: &mut ProteoformCommunity, acc: &str, mass: f64, lysines: i32) -> ProteoformId {
        let matcher = community.matcher();
        let root = Component::new(acc, "run1", mass, 1000.0, 30.0, lysines);
        community
            .add_experimental(acc, build_experimental(&root, &[], &matcher))
            .unwrap()
    }

    fn theo(name: &str, mass: f64) -> TheoreticalProteoform {
        TheoreticalProteoform::new(
            name,
            1,
            100,
            mass,
            ModificationSet::default(),
            Evidence::default(),
        )
    }

    fn relate_all_ee(community: &ProteoformCommunity) -> Vec<ProteoformRelation> {
        let ids = community.experimental_ids().to_vec();
        community.relate_ee(&ids, &ids)
    }

    #[test]
    fn test_relate_ee_pair() {
        let mut c = community(true);
        let a = add_exp(&mut c, "a", 10000.0, 5);
        let b = add_exp(&mut c, "b", 10010.0, 5);
        let relations = relate_all_ee(&c);
        assert_eq!(relations.len(), 1);
        let rel = &relations[0];
        assert_eq!(rel.subject.proteoform, b);
        assert_eq!(rel.reference.proteoform, a);
        assert!((rel.delta_mass - 10.0).abs() < 1e-9);
        assert_eq!(rel.lysine_count, 5);
        assert_eq!(rel.kind, RelationKind::ExperimentalExperimental);
    }

    #[test]
    fn test_relate_ee_label_mismatch() {
        let mut c = community(true);
        add_exp(&mut c, "a", 10000.0, 5);
        add_exp(&mut c, "b", 10010.0, 6);
        assert!(relate_all_ee(&c).is_empty());
        let unequal = c.relate_unequal_ee_lysine_counts();
        assert_eq!(unequal.len(), 1);
        assert_eq!(unequal[0].kind, RelationKind::UnequalLysineCount);
        assert!(c.allowed_ee_relation(ProteoformId(0), ProteoformId(1)));
    }

    #[test]
    fn test_relate_ee_three_close() {
        let mut c = community(true);
        add_exp(&mut c, "a", 10000.0, 5);
        add_exp(&mut c, "b", 10010.0, 5);
        add_exp(&mut c, "c", 10020.0, 5);
        let relations = relate_all_ee(&c);
        assert_eq!(relations.len(), 3);
        for rel in relations.iter() {
            assert_ne!(rel.subject.proteoform, rel.reference.proteoform);
            assert!(rel.delta_mass >= 0.0);
        }
        let mut keys: Vec<_> = relations.iter().map(|r| r.pair_key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_relate_ee_one_distant() {
        let mut c = community(true);
        add_exp(&mut c, "a", 10000.0, 5);
        add_exp(&mut c, "b", 10010.0, 5);
        add_exp(&mut c, "c", 11000.0, 5);
        let relations = relate_all_ee(&c);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].pair_key(), (ProteoformId(0), ProteoformId(1)));
    }

    #[test]
    fn test_widening_gates_only_adds() {
        let masses = [10000.0, 10120.0, 10260.0, 10400.0, 10390.5, 10650.0];
        let mut narrow = community(false);
        for (i, m) in masses.iter().enumerate() {
            add_exp(&mut narrow, &format!("e{i}"), *m, -1);
        }
        narrow.add_theoretical("T1", theo("T1", 9600.0), 0).unwrap();
        let mut wide = narrow.clone();
        let mut params = *wide.params();
        params.clustering.ee_max_mass_difference = 400.0;
        params.clustering.et_max_mass_difference = 600.0;
        wide.set_params(params).unwrap();
        narrow.rebuild();

        let pairs = |c: &ProteoformCommunity, ids: &[RelationId]| -> Vec<_> {
            ids.iter().map(|r| c.relations()[*r].pair_key()).collect()
        };
        let narrow_ee = pairs(&narrow, narrow.ee_relations());
        let wide_ee = pairs(&wide, wide.ee_relations());
        assert!(wide_ee.len() > narrow_ee.len());
        assert!(narrow_ee.iter().all(|k| wide_ee.contains(k)));
        let narrow_et = pairs(&narrow, narrow.et_relations());
        let wide_et = pairs(&wide, wide.et_relations());
        assert!(wide_et.len() > narrow_et.len());
        assert!(narrow_et.iter().all(|k| wide_et.contains(k)));
    }

    #[test]
    fn test_label_equality() {
        let lysines = [4, 5, 5, 6, 4];
        let mut labeled = community(true);
        for (i, k) in lysines.iter().enumerate() {
            add_exp(&mut labeled, &format!("e{i}"), 10000.0 + 7.0 * i as f64, *k);
        }
        labeled.add_theoretical("T1", theo("T1", 9990.0), 5).unwrap();
        labeled.add_theoretical("T2", theo("T2", 9995.0), -1).unwrap();
        labeled.rebuild();
        let rels = labeled.relations();
        assert_eq!(labeled.ee_relations().len(), 2);
        assert_eq!(labeled.et_relations().len(), 2);
        for id in labeled.ee_relations().iter().chain(labeled.et_relations()) {
            let [a, b] = rels[*id].connected_proteoforms();
            let (pa, pb) = (&labeled.proteoforms()[a], &labeled.proteoforms()[b]);
            assert_eq!(pa.lysine_count, pb.lysine_count);
        }
        assert_eq!(labeled.unequal_lysine_relations().len(), 8);

        let mut unlabeled = community(false);
        for (i, k) in lysines.iter().enumerate() {
            add_exp(&mut unlabeled, &format!("e{i}"), 10000.0 + 7.0 * i as f64, *k);
        }
        unlabeled.add_theoretical("T1", theo("T1", 9990.0), 5).unwrap();
        unlabeled.rebuild();
        assert_eq!(unlabeled.ee_relations().len(), 10);
        assert_eq!(unlabeled.et_relations().len(), 5);
        assert!(unlabeled.unequal_lysine_relations().is_empty());
    }

    #[test]
    fn test_relate_ed() {
        let mut c = community(false);
        add_exp(&mut c, "a", 10042.0, 5);
        assert!(c.relate_ed().is_empty());

        c.add_decoy("decoy_1", "DECOY_1_T", theo("T", 10000.0), 5)
            .unwrap();
        let ed = c.relate_ed();
        assert_eq!(ed.len(), 1);
        let relations = &ed["decoy_1"];
        assert_eq!(relations.len(), 1);
        let rel = &relations[0];
        assert_eq!(rel.kind, RelationKind::ExperimentalDecoy);
        assert!(!rel.accepted);
        assert!(rel.outside_no_mans_land);
        assert_eq!(rel.decoy_group.as_deref(), Some("decoy_1"));

        c.register_decoy_group("decoy_2");
        let ed = c.relate_ed();
        assert_eq!(ed.len(), 2);
        assert!(ed["decoy_2"].is_empty());
    }

    #[test]
    fn test_duplicate_accession() {
        let mut c = community(false);
        c.add_theoretical("T1", theo("T1", 10000.0), 0).unwrap();
        let err = c.add_theoretical("T1", theo("T1", 10010.0), 0).unwrap_err();
        assert_eq!(err, DataError::DuplicateAccession("T1".into()));
        assert_eq!(c.theoretical_ids().len(), 1);
    }

    #[test]
    fn test_add_observations() {
        let mut c = community(false);
        let mut missing = Observation::new("o3", "run1", 0.0, 10.0, 30.0, None);
        missing.mass = None;
        let observations = vec![
            Observation::new("o1", "run1", 10000.0, 100.0, 30.0, None),
            Observation::new("o2", "run2", 10000.01, 50.0, 30.2, None),
            missing,
        ];
        let ids = c.add_observations(observations, None);
        assert_eq!(ids.len(), 1);
        assert_eq!(c.skipped().len(), 1);
        let p = &c.proteoforms()[ids[0]];
        assert_eq!(p.accession, "E1");
        assert_eq!(p.observation_count(), 2);
    }

    /// Two experimental proteoforms, each 15.995 Da above a theoretical, and a decoy
    /// group too far from either to relate
    fn identified_community() -> ProteoformCommunity {
        let mut params = CommunityParams::default();
        params.clustering.min_peak_count_et = 2;
        let mut c = ProteoformCommunity::new(params).unwrap();
        add_exp(&mut c, "e1", 10015.995, -1);
        add_exp(&mut c, "e2", 12015.996, -1);
        c.add_theoretical("T1", theo("T1", 10000.0), 0).unwrap();
        c.add_theoretical("T2", theo("T2", 12000.0), 0).unwrap();
        c.add_decoy("decoy_1", "DECOY_1_T1", theo("T1", 11000.0), 0)
            .unwrap();
        c.rebuild();
        c
    }

    #[test_log::test]
    fn test_rebuild() {
        let c = identified_community();
        assert!(c.is_built());
        assert!(c.ee_relations().is_empty());
        assert_eq!(c.et_relations().len(), 2);
        assert_eq!(c.et_peaks().len(), 1);
        let peak = &c.delta_mass_peaks()[c.et_peaks()[0]];
        assert!(peak.peak_accepted);
        assert_eq!(peak.len(), 2);
        for rel in c.et_relations() {
            assert!(c.relations()[*rel].accepted);
            assert_eq!(c.relations()[*rel].peak, Some(peak.id));
        }
        assert_eq!(c.ed_relations().len(), 1);
        assert!(c.ed_relations()["decoy_1"].is_empty());
        assert_eq!(c.relationships_of(ProteoformId(0)).len(), 1);

        assert_eq!(c.families().len(), 2);
        assert!(c.families().iter().all(|f| f.is_identified()));
        assert_eq!(c.fdr().target_identified, 2);
        assert_eq!(c.fdr().decoy_mean_identified, 0.0);
        assert_eq!(c.fdr().estimated_fdr, 0.0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_round_trip() {
        use crate::proteoform::Modification;

        let mut c = identified_community();
        let oxidized = TheoreticalProteoform::new(
            "T3",
            1,
            120,
            15000.0,
            ModificationSet::new(vec![
                Modification::new("Oxidation", 15.995, Some(12)),
                Modification::new("Acetyl", 42.011, None),
            ]),
            Evidence::default(),
        );
        c.add_theoretical("T3", oxidized, 0).unwrap();
        c.rebuild();
        assert!(!c.relationships_of(ProteoformId(0)).is_empty());

        let text = serde_json::to_string(&c).unwrap();
        let restored: ProteoformCommunity = serde_json::from_str(&text).unwrap();
        assert_eq!(c, restored);
        assert_eq!(
            restored.relationships_of(ProteoformId(0)),
            c.relationships_of(ProteoformId(0))
        );
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let c = identified_community();
        let mut again = c.clone();
        again.rebuild();
        assert_eq!(c, again);
    }

    #[test]
    fn test_set_peak_acceptance() {
        let mut c = identified_community();
        let peak = c.et_peaks()[0];
        c.set_peak_acceptance(peak, false).unwrap();
        assert!(c.peak(peak).unwrap().acceptance_overridden);
        assert!(c.et_relations().iter().all(|r| !c.relations()[*r].accepted));
        assert!(c.families().iter().all(|f| !f.is_identified()));
        assert_eq!(c.fdr().target_identified, 0);

        let rel = c.et_relations()[0];
        c.set_relation_acceptance(rel, true).unwrap();
        assert_eq!(c.fdr().target_identified, 1);

        assert_eq!(
            c.set_peak_acceptance(PeakId(99), true),
            Err(CommunityError::UnknownPeak(PeakId(99)))
        );
    }

    #[test]
    fn test_set_peak_missed_mono() {
        let mut c = identified_community();
        let peak = c.et_peaks()[0];
        assert_eq!(c.set_peak_missed_mono(peak, true).unwrap(), 2);
        assert!(c.peak(peak).unwrap().missed_mono);
        for (_, p) in c.experimental_proteoforms() {
            assert!(p.as_experimental().unwrap().missed_mono);
        }
        for (_, p) in c.theoretical_proteoforms() {
            assert!(p.as_experimental().is_none());
        }
    }

    #[test]
    fn test_shift_peak_masses() {
        let mut c = identified_community();
        let peak = c.et_peaks()[0];
        assert_eq!(c.shift_peak_masses(peak, -1).unwrap(), 2);
        assert!(!c.is_built());
        assert!(c.et_relations().is_empty());
        let mass = c.proteoforms()[ProteoformId(0)].modified_mass;
        assert!((mass - (10015.995 - MONOISOTOPIC_UNIT_MASS)).abs() < 1e-6);

        c.rebuild();
        let peak = c.et_peaks()[0];
        assert_eq!(c.shift_peak_masses(peak, -1).unwrap(), 0);
    }

    #[test]
    fn test_set_params() {
        let mut c = identified_community();
        let before = *c.params();
        let mut bad = before;
        bad.tolerance.mass_tolerance = -1.0;
        assert!(matches!(
            c.set_params(bad),
            Err(CommunityError::Configuration(_))
        ));
        assert_eq!(*c.params(), before);

        let mut stricter = before;
        stricter.clustering.min_peak_count_et = 3;
        c.set_params(stricter).unwrap();
        assert!(c.is_built());
        assert!(!c.delta_mass_peaks()[c.et_peaks()[0]].peak_accepted);
        assert_eq!(c.fdr().target_identified, 0);
    }
}
