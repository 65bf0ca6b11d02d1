//! Tolerance matching between mass/retention time anchors.
//!
//! A candidate is compatible with an anchor when it lies within the retention time
//! window, within the ppm mass window of the anchor after correcting for up to
//! `missed_monos` misassigned isotopic peaks, and, when isotope labeling is in use,
//! within `missed_lysines` of the anchor's label count.
use mzpeaks::Tolerance;

/// The mass difference between successive isotopic peaks of an intact protein
pub const MONOISOTOPIC_UNIT_MASS: f64 = 1.0023;

/// The mass difference between the light and heavy NeuCode lysine labels
pub const NEUCODE_LYSINE_MASS_SHIFT: f64 = 0.036015372;

/// The label count used when a proteoform has no label count
pub const UNKNOWN_LYSINE_COUNT: i32 = -1;

/// Anything that carries a mass, retention time and label count coordinate
/// which may be compared by a [`ToleranceMatcher`].
pub trait MassAnchor {
    fn mass(&self) -> f64;

    fn rt(&self) -> f64;

    fn lysine_count(&self) -> i32 {
        UNKNOWN_LYSINE_COUNT
    }
}

impl<T: MassAnchor> MassAnchor for &T {
    fn mass(&self) -> f64 {
        (*self).mass()
    }

    fn rt(&self) -> f64 {
        (*self).rt()
    }

    fn lysine_count(&self) -> i32 {
        (*self).lysine_count()
    }
}

/// A free-standing [`MassAnchor`], used when matching against a derived coordinate
/// like the heavy label position of an aggregated proteoform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorPoint {
    pub mass: f64,
    pub rt: f64,
    pub lysine_count: i32,
}

impl AnchorPoint {
    pub fn new(mass: f64, rt: f64, lysine_count: i32) -> Self {
        Self {
            mass,
            rt,
            lysine_count,
        }
    }
}

impl MassAnchor for AnchorPoint {
    fn mass(&self) -> f64 {
        self.mass
    }

    fn rt(&self) -> f64 {
        self.rt
    }

    fn lysine_count(&self) -> i32 {
        self.lysine_count
    }
}

/// The tolerances used to decide whether two observations describe the same
/// proteoform.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ToleranceParams {
    /// The mass accuracy window in parts-per-million
    pub mass_tolerance: f64,
    /// The retention time window in minutes
    pub retention_time_tolerance: f64,
    /// The number of misassigned isotopic peaks to correct for in either direction
    pub missed_monos: u32,
    /// The number of missed label sites to tolerate in either direction
    pub missed_lysines: u32,
    /// Whether observations carry NeuCode lysine label counts
    pub neucode_labeled: bool,
}

impl Default for ToleranceParams {
    fn default() -> Self {
        Self {
            mass_tolerance: 3.0,
            retention_time_tolerance: 3.0,
            missed_monos: 3,
            missed_lysines: 1,
            neucode_labeled: false,
        }
    }
}

impl ToleranceParams {
    pub fn new(
        mass_tolerance: f64,
        retention_time_tolerance: f64,
        missed_monos: u32,
        missed_lysines: u32,
        neucode_labeled: bool,
    ) -> Self {
        Self {
            mass_tolerance,
            retention_time_tolerance,
            missed_monos,
            missed_lysines,
            neucode_labeled,
        }
    }
}

/// Iterates over isotope shift multiples in order of increasing magnitude,
/// `0, -1, 1, -2, 2, ...` up to a maximum magnitude.
#[derive(Debug, Clone)]
pub struct IsotopeShiftIter {
    max_shift: i32,
    magnitude: i32,
    negative_next: bool,
}

impl IsotopeShiftIter {
    /// Magnitudes beyond `i32::MAX - 1` are clamped
    pub fn new(max_shift: u32) -> Self {
        let max_shift = i32::try_from(max_shift).unwrap_or(i32::MAX).min(i32::MAX - 1);
        Self {
            max_shift,
            magnitude: 0,
            negative_next: false,
        }
    }

    pub fn next_shift(&mut self) -> Option<i32> {
        if self.magnitude > self.max_shift {
            return None;
        }
        if self.magnitude == 0 {
            self.magnitude = 1;
            self.negative_next = true;
            return Some(0);
        }
        if self.negative_next {
            self.negative_next = false;
            Some(-self.magnitude)
        } else {
            let k = self.magnitude;
            self.magnitude += 1;
            self.negative_next = true;
            Some(k)
        }
    }
}

impl Iterator for IsotopeShiftIter {
    type Item = i32;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_shift()
    }
}

/// The best integer number of isotopic unit masses separating `mass` from `reference`
#[inline]
pub fn nearest_isotope_shift(mass: f64, reference: f64) -> i32 {
    ((mass - reference) / MONOISOTOPIC_UNIT_MASS).round() as i32
}

/// A pure decision function for tolerance matching, built from a fixed [`ToleranceParams`]
/// snapshot so that every decision made during one build uses the same tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceMatcher {
    params: ToleranceParams,
}

impl From<ToleranceParams> for ToleranceMatcher {
    fn from(params: ToleranceParams) -> Self {
        Self::new(params)
    }
}

impl ToleranceMatcher {
    pub fn new(params: ToleranceParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ToleranceParams {
        &self.params
    }

    pub fn neucode_labeled(&self) -> bool {
        self.params.neucode_labeled
    }

    pub fn isotope_shifts(&self) -> IsotopeShiftIter {
        IsotopeShiftIter::new(self.params.missed_monos)
    }

    #[inline]
    pub fn within_retention_time(&self, anchor_rt: f64, candidate_rt: f64) -> bool {
        (candidate_rt - anchor_rt).abs() <= self.params.retention_time_tolerance
    }

    /// Find the first isotope shift `k` for which `candidate_mass` lies within the ppm
    /// window around `anchor_mass + k * MONOISOTOPIC_UNIT_MASS`.
    pub fn matching_isotope_shift(&self, anchor_mass: f64, candidate_mass: f64) -> Option<i32> {
        let tol = Tolerance::PPM(self.params.mass_tolerance);
        self.isotope_shifts().find(|k| {
            let shifted = anchor_mass + *k as f64 * MONOISOTOPIC_UNIT_MASS;
            let (lower, upper) = tol.bounds(shifted);
            lower <= candidate_mass && candidate_mass <= upper
        })
    }

    #[inline]
    pub fn within_mass(&self, anchor_mass: f64, candidate_mass: f64) -> bool {
        self.matching_isotope_shift(anchor_mass, candidate_mass)
            .is_some()
    }

    /// Always true when labeling is disabled
    #[inline]
    pub fn within_lysine_count(&self, anchor_count: i32, candidate_count: i32) -> bool {
        if !self.params.neucode_labeled {
            return true;
        }
        let missed = i64::from(self.params.missed_lysines);
        (i64::from(candidate_count) - i64::from(anchor_count)).abs() <= missed
    }

    /// Test whether `candidate` is compatible with `anchor` under all three windows
    pub fn accepts<A: MassAnchor, C: MassAnchor>(&self, anchor: &A, candidate: &C) -> bool {
        self.within_retention_time(anchor.rt(), candidate.rt())
            && self.within_lysine_count(anchor.lysine_count(), candidate.lysine_count())
            && self.within_mass(anchor.mass(), candidate.mass())
    }
}
