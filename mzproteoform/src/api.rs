//! High level entry points for building a community from a single input document
use std::collections::BTreeMap;

use tracing::{info, instrument};

use crate::community::{CommunityError, ProteoformCommunity};
use crate::fdr::FdrSummary;
use crate::observation::Observation;
use crate::params::CommunityParams;
use crate::proteoform::TheoreticalProteoform;
use crate::tolerance::UNKNOWN_LYSINE_COUNT;

/// A theoretical or decoy proteoform entry with its accession
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TheoreticalRecord {
    pub accession: String,
    /// The number of labelable residues, when known
    #[cfg_attr(feature = "serde", serde(default))]
    pub lysine_count: Option<i32>,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub theoretical: TheoreticalProteoform,
}

impl TheoreticalRecord {
    pub fn new(
        accession: impl Into<String>,
        lysine_count: Option<i32>,
        theoretical: TheoreticalProteoform,
    ) -> Self {
        Self {
            accession: accession.into(),
            lysine_count,
            theoretical,
        }
    }
}

/// Everything needed to build a community
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommunityInput {
    pub observations: Vec<Observation>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub light_observations: Option<Vec<Observation>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub heavy_observations: Option<Vec<Observation>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub theoreticals: Vec<TheoreticalRecord>,
    /// Decoy theoretical proteoforms keyed by decoy group
    #[cfg_attr(feature = "serde", serde(default))]
    pub decoys: BTreeMap<String, Vec<TheoreticalRecord>>,
}

/// A completed build, tagged with the generation of the request that produced it
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommunityBuild {
    pub generation: u64,
    pub community: ProteoformCommunity,
}

impl CommunityBuild {
    pub fn params(&self) -> &CommunityParams {
        self.community.params()
    }

    pub fn fdr(&self) -> &FdrSummary {
        self.community.fdr()
    }
}

/// Populate a community from `input` and build every derived collection.
///
/// Malformed or duplicate records are skipped and listed in the community's
/// [`SkipReport`](crate::observation::SkipReport). Only an invalid `params` fails the build.
#[instrument(level = "debug", skip_all, fields(n_observations = input.observations.len()))]
pub fn build_community(
    input: CommunityInput,
    params: CommunityParams,
) -> Result<ProteoformCommunity, CommunityError> {
    let mut community = ProteoformCommunity::new(params)?;
    let quant_pools = match (input.light_observations, input.heavy_observations) {
        (None, None) => None,
        (light, heavy) => Some((light.unwrap_or_default(), heavy.unwrap_or_default())),
    };
    community.add_observations(input.observations, quant_pools);

    for record in input.theoreticals {
        let lysine_count = record.lysine_count.unwrap_or(UNKNOWN_LYSINE_COUNT);
        if let Err(e) = community.add_theoretical(record.accession, record.theoretical, lysine_count) {
            community.record_skipped(e);
        }
    }
    for (group, records) in input.decoys {
        community.register_decoy_group(group.as_str());
        for record in records {
            let lysine_count = record.lysine_count.unwrap_or(UNKNOWN_LYSINE_COUNT);
            if let Err(e) =
                community.add_decoy(group.as_str(), record.accession, record.theoretical, lysine_count)
            {
                community.record_skipped(e);
            }
        }
    }
    info!(
        "Loaded {} experimental, {} theoretical and {} decoy proteoforms, skipped {} records",
        community.experimental_ids().len(),
        community.theoretical_ids().len(),
        community.decoy_groups().values().map(|v| v.len()).sum::<usize>(),
        community.skipped().len(),
    );
    community.rebuild();
    Ok(community)
}
