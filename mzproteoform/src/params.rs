//! The immutable parameter snapshot threaded through every build
use thiserror::Error;

use crate::tolerance::ToleranceParams;

/// A configuration value outside of its valid domain. Raised before any build starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("{name} must be non-negative, got {value}")]
    NegativeTolerance { name: &'static str, value: f64 },
    #[error("{name} must be a finite number")]
    NonFiniteParameter { name: &'static str },
    #[error("The peak width must be greater than zero, got {0}")]
    NonPositivePeakWidth(f64),
    #[error("The no-man's-land bounds must lie within [0, 1], got [{lower}, {upper}]")]
    NoMansLandOutOfRange { lower: f64, upper: f64 },
    #[error("The no-man's-land lower bound must be less than the upper bound, got [{lower}, {upper}]")]
    NoMansLandInverted { lower: f64, upper: f64 },
}

/// Parameters controlling coarse relation gates and delta mass peak clustering
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusteringParams {
    /// The width of a delta mass peak in Daltons
    pub peak_width_base: f64,
    /// The minimum number of relations an experimental-experimental peak needs to be accepted
    pub min_peak_count_ee: usize,
    /// The minimum number of relations an experimental-theoretical or experimental-decoy
    /// peak needs to be accepted
    pub min_peak_count_et: usize,
    /// The fractional part of a delta mass at or below which it is unambiguous
    pub no_mans_land_lower_bound: f64,
    /// The fractional part of a delta mass at or above which it is unambiguous
    pub no_mans_land_upper_bound: f64,
    /// The largest absolute mass difference, in Daltons, between two related experimental proteoforms
    pub ee_max_mass_difference: f64,
    /// The largest absolute mass difference, in Daltons, between a related experimental
    /// and theoretical proteoform
    pub et_max_mass_difference: f64,
    /// The largest retention time difference, in minutes, between two related experimental proteoforms
    pub ee_max_retention_time_difference: f64,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            peak_width_base: 0.015,
            min_peak_count_ee: 10,
            min_peak_count_et: 10,
            no_mans_land_lower_bound: 0.22,
            no_mans_land_upper_bound: 0.88,
            ee_max_mass_difference: 250.0,
            et_max_mass_difference: 500.0,
            ee_max_retention_time_difference: 2.5,
        }
    }
}

impl ClusteringParams {
    /// Test whether a delta mass falls outside of the ambiguous fractional mass band
    pub fn outside_no_mans_land(&self, delta_mass: f64) -> bool {
        let magnitude = delta_mass.abs();
        let fraction = magnitude - magnitude.floor();
        fraction <= self.no_mans_land_lower_bound || fraction >= self.no_mans_land_upper_bound
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, value) in [
            ("peak_width_base", self.peak_width_base),
            ("no_mans_land_lower_bound", self.no_mans_land_lower_bound),
            ("no_mans_land_upper_bound", self.no_mans_land_upper_bound),
            ("ee_max_mass_difference", self.ee_max_mass_difference),
            ("et_max_mass_difference", self.et_max_mass_difference),
            (
                "ee_max_retention_time_difference",
                self.ee_max_retention_time_difference,
            ),
        ] {
            if !value.is_finite() {
                return Err(ConfigurationError::NonFiniteParameter { name });
            }
        }
        if self.peak_width_base <= 0.0 {
            return Err(ConfigurationError::NonPositivePeakWidth(
                self.peak_width_base,
            ));
        }
        let (lower, upper) = (self.no_mans_land_lower_bound, self.no_mans_land_upper_bound);
        if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) {
            return Err(ConfigurationError::NoMansLandOutOfRange { lower, upper });
        }
        if lower >= upper {
            return Err(ConfigurationError::NoMansLandInverted { lower, upper });
        }
        for (name, value) in [
            ("ee_max_mass_difference", self.ee_max_mass_difference),
            ("et_max_mass_difference", self.et_max_mass_difference),
            (
                "ee_max_retention_time_difference",
                self.ee_max_retention_time_difference,
            ),
        ] {
            if value < 0.0 {
                return Err(ConfigurationError::NegativeTolerance { name, value });
            }
        }
        Ok(())
    }
}

/// The complete parameter snapshot for one build
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CommunityParams {
    pub tolerance: ToleranceParams,
    pub clustering: ClusteringParams,
}

impl CommunityParams {
    pub fn new(tolerance: ToleranceParams, clustering: ClusteringParams) -> Self {
        Self {
            tolerance,
            clustering,
        }
    }

    /// Check every parameter against its valid domain
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let tol = &self.tolerance;
        for (name, value) in [
            ("mass_tolerance", tol.mass_tolerance),
            ("retention_time_tolerance", tol.retention_time_tolerance),
        ] {
            if !value.is_finite() {
                return Err(ConfigurationError::NonFiniteParameter { name });
            }
            if value < 0.0 {
                return Err(ConfigurationError::NegativeTolerance { name, value });
            }
        }
        self.clustering.validate()
    }
}
