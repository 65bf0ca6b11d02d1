//! Construction of experimental proteoforms from observation pools and
//! light/heavy label quantification.
use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::observation::Component;
use crate::proteoform::ExperimentalProteoform;
use crate::stats::{weighted_mean, weighted_mean_variance};
use crate::tolerance::{
    nearest_isotope_shift, AnchorPoint, MassAnchor, ToleranceMatcher, MONOISOTOPIC_UNIT_MASS,
    NEUCODE_LYSINE_MASS_SHIFT,
};

/// Added to both channel intensities before taking a ratio so that an empty channel
/// does not produce a singular ratio.
pub const RATIO_PSEUDOCOUNT: f64 = 0.1;

/// The light/heavy ratio observed in a single source file
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceRatio {
    pub source: String,
    pub light_intensity: f64,
    pub heavy_intensity: f64,
    pub log2_ratio: f64,
}

impl SourceRatio {
    pub fn new(source: String, light_intensity: f64, heavy_intensity: f64) -> Self {
        let log2_ratio =
            ((light_intensity + RATIO_PSEUDOCOUNT) / (heavy_intensity + RATIO_PSEUDOCOUNT)).log2();
        Self {
            source,
            light_intensity,
            heavy_intensity,
            log2_ratio,
        }
    }

    pub fn total_intensity(&self) -> f64 {
        self.light_intensity + self.heavy_intensity
    }
}

/// Intensity-weighted light/heavy quantification across source files.
///
/// `variance` is the intensity-weighted population variance of the per-source
/// log2 ratios around `log2_ratio`.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuantificationValues {
    pub per_source: Vec<SourceRatio>,
    pub light_intensity: f64,
    pub heavy_intensity: f64,
    pub log2_ratio: f64,
    pub variance: f64,
}

impl QuantificationValues {
    pub fn from_channels(light: &[Component], heavy: &[Component]) -> Self {
        let mut by_source: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
        for c in light {
            by_source.entry(c.source.as_str()).or_default().0 += c.intensity;
        }
        for c in heavy {
            by_source.entry(c.source.as_str()).or_default().1 += c.intensity;
        }
        let per_source: Vec<SourceRatio> = by_source
            .into_iter()
            .map(|(source, (l, h))| SourceRatio::new(source.to_string(), l, h))
            .collect();

        let pairs: Vec<(f64, f64)> = per_source
            .iter()
            .map(|r| (r.log2_ratio, r.total_intensity()))
            .collect();
        let (log2_ratio, variance) = weighted_mean_variance(&pairs);
        Self {
            light_intensity: per_source.iter().map(|r| r.light_intensity).sum(),
            heavy_intensity: per_source.iter().map(|r| r.heavy_intensity).sum(),
            per_source,
            log2_ratio,
            variance,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.per_source.is_empty()
    }
}

/// Select the members of `pool` compatible with `anchor`
pub fn select_members<'a, A: MassAnchor>(
    anchor: &A,
    pool: &'a [Component],
    matcher: &ToleranceMatcher,
) -> Vec<&'a Component> {
    pool.iter().filter(|c| matcher.accepts(anchor, *c)).collect()
}

/// The intensity-weighted aggregate coordinates of a set of components relative to `root`.
///
/// Each member's mass is first moved onto the root's isotopic peak by its own nearest
/// isotope shift.
pub fn aggregate_coordinates(root: &Component, members: &[&Component]) -> (f64, f64, f64) {
    let agg_intensity: f64 = members.iter().map(|c| c.intensity).sum();
    let agg_rt = weighted_mean(members.iter().map(|c| (c.rt, c.intensity)));
    let agg_mass = weighted_mean(members.iter().map(|c| {
        let shift = nearest_isotope_shift(c.mass, root.mass) as f64 * MONOISOTOPIC_UNIT_MASS;
        (c.mass - shift, c.intensity)
    }));
    (agg_mass, agg_intensity, agg_rt)
}

fn assemble(root: &Component, members: Vec<&Component>) -> ExperimentalProteoform {
    let (agg_mass, agg_intensity, agg_rt) = aggregate_coordinates(root, &members);
    ExperimentalProteoform {
        root: root.clone(),
        aggregated_components: members.into_iter().cloned().collect(),
        light_components: Vec::new(),
        heavy_components: Vec::new(),
        agg_mass,
        agg_intensity,
        agg_rt,
        quantification: None,
        missed_mono: false,
        mass_shifted: false,
    }
}

/// Build an experimental proteoform from `root` and every member of `pool` that
/// `matcher` accepts against it. The root is always a member.
pub fn build_experimental(
    root: &Component,
    pool: &[Component],
    matcher: &ToleranceMatcher,
) -> ExperimentalProteoform {
    let mut members = select_members(root, pool, matcher);
    if !members.iter().any(|c| c.id == root.id) {
        members.insert(0, root);
    }
    assemble(root, members)
}

/// Select the light and heavy channel members of `experimental` and compute its
/// light/heavy ratios. The heavy channel is sought at the aggregate mass plus one
/// label shift per lysine.
pub fn quantify(
    experimental: &mut ExperimentalProteoform,
    lysine_count: i32,
    light_pool: &[Component],
    heavy_pool: &[Component],
    matcher: &ToleranceMatcher,
) {
    let light_anchor = AnchorPoint::new(experimental.agg_mass, experimental.agg_rt, lysine_count);
    let heavy_anchor = AnchorPoint::new(
        experimental.agg_mass + lysine_count.max(0) as f64 * NEUCODE_LYSINE_MASS_SHIFT,
        experimental.agg_rt,
        lysine_count,
    );
    let light: Vec<Component> = select_members(&light_anchor, light_pool, matcher)
        .into_iter()
        .cloned()
        .collect();
    let heavy: Vec<Component> = select_members(&heavy_anchor, heavy_pool, matcher)
        .into_iter()
        .cloned()
        .collect();
    experimental.quantification = Some(QuantificationValues::from_channels(&light, &heavy));
    experimental.light_components = light;
    experimental.heavy_components = heavy;
}

/// Light and heavy label channel observation pools
#[derive(Debug, Clone, Copy)]
pub struct QuantificationPools<'a> {
    pub light: &'a [Component],
    pub heavy: &'a [Component],
}

/// Partition an entire observation pool into experimental proteoforms.
///
/// Roots are visited from most to least intense, and each component is aggregated into
/// at most one experimental proteoform.
#[instrument(level = "debug", skip_all, fields(n_components = components.len()))]
pub fn aggregate_observations(
    components: &[Component],
    matcher: &ToleranceMatcher,
    quant_pools: Option<QuantificationPools<'_>>,
) -> Vec<ExperimentalProteoform> {
    let mut by_intensity: Vec<usize> = (0..components.len()).collect();
    by_intensity.sort_by(|a, b| {
        let (a, b) = (&components[*a], &components[*b]);
        b.intensity
            .total_cmp(&a.intensity)
            .then_with(|| a.mass.total_cmp(&b.mass))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut by_mass: Vec<usize> = (0..components.len()).collect();
    by_mass.sort_by(|a, b| components[*a].mass.total_cmp(&components[*b].mass));
    let masses: Vec<f64> = by_mass.iter().map(|i| components[*i].mass).collect();

    let params = matcher.params();
    let max_shift = params.missed_monos as f64 * MONOISOTOPIC_UNIT_MASS;

    let mut assigned = vec![false; components.len()];
    let mut experimentals = Vec::new();
    for root_idx in by_intensity {
        if assigned[root_idx] {
            continue;
        }
        let root = &components[root_idx];
        let width = max_shift + (root.mass + max_shift) * params.mass_tolerance / 1e6;
        let lo = masses.partition_point(|m| *m < root.mass - width);
        let hi = masses.partition_point(|m| *m <= root.mass + width);

        let mut member_indices: Vec<usize> = by_mass[lo..hi]
            .iter()
            .copied()
            .filter(|i| !assigned[*i] && matcher.accepts(root, &components[*i]))
            .collect();
        if !member_indices.contains(&root_idx) {
            member_indices.push(root_idx);
        }
        member_indices.sort_unstable();
        for i in member_indices.iter() {
            assigned[*i] = true;
        }
        let members: Vec<&Component> = member_indices.iter().map(|i| &components[*i]).collect();
        let mut experimental = assemble(root, members);
        if let Some(pools) = quant_pools {
            let lysine_count = if matcher.neucode_labeled() {
                root.lysine_count
            } else {
                0
            };
            quantify(
                &mut experimental,
                lysine_count,
                pools.light,
                pools.heavy,
                matcher,
            );
        }
        experimentals.push(experimental);
    }
    debug!(
        "Aggregated {} components into {} experimental proteoforms",
        components.len(),
        experimentals.len()
    );
    experimentals
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tolerance::ToleranceParams;

    fn matcher(labeled: bool) -> ToleranceMatcher {
        ToleranceParams::new(5.0, 2.0, 3, 1, labeled).into()
    }

    #[test]
    fn test_build_experimental_corrects_isotope_shifts() {
        let root = Component::new("r", "run1", 10000.0, 300.0, 30.0, -1);
        let pool = vec![
            root.clone(),
            Component::new("a", "run1", 10000.0 + MONOISOTOPIC_UNIT_MASS, 100.0, 30.5, -1),
            Component::new("b", "run1", 10000.0, 100.0, 31.0, -1),
            Component::new("c", "run1", 10000.0, 100.0, 40.0, -1),
            Component::new("d", "run1", 10000.5, 100.0, 30.0, -1),
        ];
        let exp = build_experimental(&root, &pool, &matcher(false));
        assert_eq!(exp.observation_count(), 3);
        assert!((exp.agg_intensity - 500.0).abs() < 1e-9);
        assert!((exp.agg_mass - 10000.0).abs() < 1e-6);
        let expected_rt = (30.0 * 300.0 + 30.5 * 100.0 + 31.0 * 100.0) / 500.0;
        assert!((exp.agg_rt - expected_rt).abs() < 1e-9);
    }

    #[test]
    fn test_zero_intensity() {
        let root = Component::new("r", "run1", 10000.0, 0.0, 30.0, -1);
        let exp = build_experimental(&root, &[], &matcher(false));
        assert_eq!(exp.observation_count(), 1);
        assert_eq!(exp.agg_intensity, 0.0);
        assert_eq!(exp.agg_mass, 0.0);
        assert_eq!(exp.agg_rt, 0.0);
    }

    #[test_log::test]
    fn test_aggregate_observations_partitions() {
        let components = vec![
            Component::new("a", "run1", 10000.0, 100.0, 30.0, -1),
            Component::new("b", "run1", 10000.01, 500.0, 30.2, -1),
            Component::new("c", "run1", 10001.0123, 50.0, 30.1, -1),
            Component::new("d", "run1", 12000.0, 80.0, 30.0, -1),
            Component::new("e", "run1", 12000.0, 20.0, 50.0, -1),
        ];
        let exps = aggregate_observations(&components, &matcher(false), None);
        assert_eq!(exps.len(), 3);
        assert_eq!(exps[0].root().id, "b");
        assert_eq!(exps[0].observation_count(), 3);
        assert_eq!(exps[1].root().id, "d");
        assert_eq!(exps[1].observation_count(), 1);
        assert_eq!(exps[2].root().id, "e");
        let total: usize = exps.iter().map(|e| e.observation_count()).sum();
        assert_eq!(total, components.len());
    }

    #[test]
    fn test_quantification() {
        let lysines = 4;
        let heavy_mass = 10000.0 + lysines as f64 * NEUCODE_LYSINE_MASS_SHIFT;
        let light = vec![
            Component::new("l1", "run1", 10000.0, 400.0, 30.0, lysines),
            Component::new("l2", "run2", 10000.0, 100.0, 30.0, lysines),
        ];
        let heavy = vec![
            Component::new("h1", "run1", heavy_mass, 100.0, 30.0, lysines),
            Component::new("h2", "run2", heavy_mass, 100.0, 30.0, lysines),
        ];
        let root = Component::new("r", "run1", 10000.0, 500.0, 30.0, lysines);
        let matcher = matcher(true);
        let mut exp = build_experimental(&root, &[], &matcher);
        quantify(&mut exp, lysines, &light, &heavy, &matcher);
        let quant = exp.quantification.as_ref().unwrap();
        assert_eq!(exp.light_components().len(), 2);
        assert_eq!(exp.heavy_components().len(), 2);
        assert_eq!(quant.per_source.len(), 2);

        let r1 = (400.1f64 / 100.1).log2();
        let r2 = (100.1f64 / 100.1).log2();
        let mean = (r1 * 500.0 + r2 * 200.0) / 700.0;
        let var = (500.0 * (r1 - mean).powi(2) + 200.0 * (r2 - mean).powi(2)) / 700.0;
        assert!((quant.per_source[0].log2_ratio - r1).abs() < 1e-9);
        assert!((quant.log2_ratio - mean).abs() < 1e-9);
        assert!((quant.variance - var).abs() < 1e-9);
    }

    #[test]
    fn test_quantification_empty_channels() {
        let quant = QuantificationValues::from_channels(&[], &[]);
        assert!(quant.is_empty());
        assert_eq!(quant.log2_ratio, 0.0);
        assert_eq!(quant.variance, 0.0);
    }
}
