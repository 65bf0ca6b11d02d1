use clap::Args;
use serde::{Deserialize, Serialize};

use mzproteoform::CommunityParams;

pub(crate) fn non_negative_float_f64(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value < 0.0 {
        Err(format!("`{s}` is less than zero"))
    } else {
        Ok(value)
    }
}

pub(crate) fn positive_float_f64(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value <= 0.0 {
        Err(format!("`{s}` must be greater than zero"))
    } else {
        Ok(value)
    }
}

/// Command line overrides for individual community parameters.
///
/// Each override that is given replaces the corresponding value from the
/// configuration files.
#[derive(Debug, Clone, Default, PartialEq, Args, Deserialize, Serialize)]
pub struct ParameterOverrides {
    /// The mass tolerance in parts-per-million for aggregating observations
    #[arg(
        long = "mass-tolerance",
        value_parser = non_negative_float_f64,
        allow_negative_numbers = true
    )]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass_tolerance: Option<f64>,

    /// The retention time tolerance in minutes for aggregating observations
    #[arg(
        long = "retention-time-tolerance",
        value_parser = non_negative_float_f64,
        allow_negative_numbers = true
    )]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_time_tolerance: Option<f64>,

    /// The number of missed monoisotopic peaks to tolerate while aggregating observations
    #[arg(long = "missed-monos")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missed_monos: Option<u32>,

    /// The number of missed lysine labels to tolerate while aggregating observations
    #[arg(long = "missed-lysines")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missed_lysines: Option<u32>,

    /// Treat the observations as NeuCode lysine labeled, requiring label counts to match
    #[arg(long = "neucode")]
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub neucode: bool,

    /// The width of a delta mass peak in Daltons
    #[arg(
        long = "peak-width",
        value_parser = positive_float_f64,
        allow_negative_numbers = true
    )]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_width: Option<f64>,

    /// The minimum number of relations an accepted delta mass peak must group, applied
    /// to both experimental-experimental and experimental-theoretical peaks
    #[arg(long = "min-peak-count")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_peak_count: Option<usize>,
}

impl ParameterOverrides {
    /// Apply every given override to `params`
    pub fn apply(&self, params: &mut CommunityParams) {
        let tolerance = &mut params.tolerance;
        if let Some(value) = self.mass_tolerance {
            tolerance.mass_tolerance = value;
        }
        if let Some(value) = self.retention_time_tolerance {
            tolerance.retention_time_tolerance = value;
        }
        if let Some(value) = self.missed_monos {
            tolerance.missed_monos = value;
        }
        if let Some(value) = self.missed_lysines {
            tolerance.missed_lysines = value;
        }
        if self.neucode {
            tolerance.neucode_labeled = true;
        }

        let clustering = &mut params.clustering;
        if let Some(value) = self.peak_width {
            clustering.peak_width_base = value;
        }
        if let Some(value) = self.min_peak_count {
            clustering.min_peak_count_ee = value;
            clustering.min_peak_count_et = value;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_apply_overrides() {
        let overrides = ParameterOverrides {
            mass_tolerance: Some(10.0),
            neucode: true,
            min_peak_count: Some(2),
            ..Default::default()
        };
        let mut params = CommunityParams::default();
        overrides.apply(&mut params);
        assert_eq!(params.tolerance.mass_tolerance, 10.0);
        assert!(params.tolerance.neucode_labeled);
        assert_eq!(params.tolerance.retention_time_tolerance, 3.0);
        assert_eq!(params.clustering.min_peak_count_ee, 2);
        assert_eq!(params.clustering.min_peak_count_et, 2);
        assert_eq!(params.clustering.peak_width_base, 0.015);
    }

    #[test]
    fn test_value_parsers() {
        assert_eq!(non_negative_float_f64("0"), Ok(0.0));
        assert!(non_negative_float_f64("-1").is_err());
        assert!(positive_float_f64("0").is_err());
        assert!(non_negative_float_f64("abc").is_err());
    }
}
