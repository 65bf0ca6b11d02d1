//! Relate, cluster and decoy-score intact proteoform observations.
//!
//! Observations are aggregated into [`ExperimentalProteoform`]s, which a
//! [`ProteoformCommunity`] relates to each other and to theoretical and decoy
//! proteoforms. Relations are grouped into [`DeltaMassPeak`]s, accepted relations
//! join proteoforms into [`ProteoformFamily`]s, and decoy groups estimate the false
//! discovery rate of the target identifications.
pub mod aggregation;
pub mod api;
pub mod community;
pub mod family;
pub mod fdr;
pub mod observation;
pub mod params;
pub mod peak;
pub mod proteoform;
pub mod relation;
pub mod service;
pub mod stats;
pub mod tolerance;

pub use crate::aggregation::{aggregate_observations, QuantificationValues};
pub use crate::api::{build_community, CommunityBuild, CommunityInput, TheoreticalRecord};
pub use crate::community::{CommunityError, ProteoformCommunity};
pub use crate::family::ProteoformFamily;
pub use crate::fdr::FdrSummary;
pub use crate::observation::{Component, DataError, Observation, SkipReport};
pub use crate::params::{ClusteringParams, CommunityParams, ConfigurationError};
pub use crate::peak::{DeltaMassPeak, PeakId};
pub use crate::proteoform::{
    ExperimentalProteoform, Modification, ModificationSet, Proteoform, ProteoformId,
    ProteoformKind, TheoreticalProteoform,
};
pub use crate::relation::{ProteoformRelation, RelationId, RelationKind};
pub use crate::service::{RebuildService, ServiceError};
pub use crate::tolerance::{
    ToleranceMatcher, ToleranceParams, MONOISOTOPIC_UNIT_MASS, NEUCODE_LYSINE_MASS_SHIFT,
    UNKNOWN_LYSINE_COUNT,
};
