//! Raw observation records and their validation into [`Component`]s
use std::fmt::Display;

use thiserror::Error;
use tracing::warn;

use crate::tolerance::{MassAnchor, UNKNOWN_LYSINE_COUNT};

/// A malformed input record. The record is skipped and the build proceeds.
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataError {
    #[error("Observation {id} has no mass")]
    MissingMass { id: String },
    #[error("Observation {id} has no intensity")]
    MissingIntensity { id: String },
    #[error("Observation {id} has a non-finite {field}")]
    NonFiniteValue { id: String, field: String },
    #[error("Observation {id} has a negative intensity")]
    NegativeIntensity { id: String },
    #[error("The accession {0} was already registered")]
    DuplicateAccession(String),
}

/// A record of every input record skipped while preparing a build
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkipReport {
    pub errors: Vec<DataError>,
}

impl SkipReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: DataError) {
        warn!("Skipping record: {error}");
        self.errors.push(error);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn extend(&mut self, other: SkipReport) {
        self.errors.extend(other.errors);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DataError> {
        self.errors.iter()
    }
}

/// A single deconvolved intact mass observation as read from an upstream tool
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Observation {
    pub id: String,
    /// The identity of the source file this observation was read from
    #[cfg_attr(feature = "serde", serde(default))]
    pub source: String,
    pub mass: Option<f64>,
    pub intensity: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub rt: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub lysine_count: Option<i32>,
}

impl Observation {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        mass: f64,
        intensity: f64,
        rt: f64,
        lysine_count: Option<i32>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            mass: Some(mass),
            intensity: Some(intensity),
            rt,
            lysine_count,
        }
    }

    /// Check the record for missing or malformed values
    pub fn validate(self) -> Result<Component, DataError> {
        let mass = self.mass.ok_or_else(|| DataError::MissingMass {
            id: self.id.clone(),
        })?;
        let intensity = self.intensity.ok_or_else(|| DataError::MissingIntensity {
            id: self.id.clone(),
        })?;
        for (field, value) in [("mass", mass), ("intensity", intensity), ("rt", self.rt)] {
            if !value.is_finite() {
                return Err(DataError::NonFiniteValue {
                    id: self.id,
                    field: field.to_string(),
                });
            }
        }
        if intensity < 0.0 {
            return Err(DataError::NegativeIntensity { id: self.id });
        }
        Ok(Component {
            id: self.id,
            source: self.source,
            mass,
            intensity,
            rt: self.rt,
            lysine_count: self.lysine_count.unwrap_or(UNKNOWN_LYSINE_COUNT),
        })
    }
}

/// A validated observation that may be aggregated into an experimental proteoform
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Component {
    pub id: String,
    pub source: String,
    pub mass: f64,
    pub intensity: f64,
    pub rt: f64,
    pub lysine_count: i32,
}

impl Component {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        mass: f64,
        intensity: f64,
        rt: f64,
        lysine_count: i32,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            mass,
            intensity,
            rt,
            lysine_count,
        }
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({:0.4}, {:0.2}, {:0.3})",
            self.id, self.mass, self.intensity, self.rt
        )
    }
}

impl MassAnchor for Component {
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

/// Validate a collection of observations, recording every skipped record in `report`
pub fn validate_observations<I: IntoIterator<Item = Observation>>(
    observations: I,
    report: &mut SkipReport,
) -> Vec<Component> {
    observations
        .into_iter()
        .filter_map(|obs| match obs.validate() {
            Ok(c) => Some(c),
            Err(e) => {
                report.push(e);
                None
            }
        })
        .collect()
}
