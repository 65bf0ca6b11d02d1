//! Proteoform entities: experimental aggregates of observations and theoretical
//! reference proteoforms, stored in an arena and addressed by [`ProteoformId`].
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::ops::{Index, IndexMut};

use identity_hash::IdentityHashable;

use crate::aggregation::QuantificationValues;
use crate::observation::Component;
use crate::tolerance::{MassAnchor, UNKNOWN_LYSINE_COUNT};

/// A key into a [`ProteoformArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProteoformId(pub u32);

impl Hash for ProteoformId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.0)
    }
}

impl IdentityHashable for ProteoformId {}

impl Display for ProteoformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl ProteoformId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProteoformKind {
    Experimental,
    Theoretical,
    Decoy,
}

/// A single post-translational modification, optionally localized to a residue position
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Modification {
    pub name: String,
    pub mass: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: Option<u32>,
}

impl Modification {
    pub fn new(name: impl Into<String>, mass: f64, position: Option<u32>) -> Self {
        Self {
            name: name.into(),
            mass,
            position,
        }
    }
}

/// An ordered, deduplicated set of modifications and their combined mass
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "Vec<Modification>", into = "Vec<Modification>"))]
pub struct ModificationSet {
    modifications: Vec<Modification>,
    mass: f64,
}

impl ModificationSet {
    pub fn new(mut modifications: Vec<Modification>) -> Self {
        modifications.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.mass.total_cmp(&b.mass))
        });
        modifications.dedup();
        let mass = modifications.iter().map(|m| m.mass).sum();
        Self {
            modifications,
            mass,
        }
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn len(&self) -> usize {
        self.modifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Modification> {
        self.modifications.iter()
    }
}

impl From<Vec<Modification>> for ModificationSet {
    fn from(value: Vec<Modification>) -> Self {
        Self::new(value)
    }
}

impl From<ModificationSet> for Vec<Modification> {
    fn from(value: ModificationSet) -> Self {
        value.modifications
    }
}

impl FromIterator<Modification> for ModificationSet {
    fn from_iter<T: IntoIterator<Item = Modification>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Display for ModificationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "Unmodified");
        }
        let names: Vec<&str> = self.modifications.iter().map(|m| m.name.as_str()).collect();
        write!(f, "{}", names.join("; "))
    }
}

/// Counts of external evidence supporting a theoretical proteoform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Evidence {
    pub psm_count: u32,
    pub unique_psm_count: u32,
}

/// A reference proteoform derived from a sequence database entry
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TheoreticalProteoform {
    pub name: String,
    /// The first residue position of the proteoform in its parent sequence
    pub begin: u32,
    /// The last residue position of the proteoform in its parent sequence
    pub end: u32,
    pub unmodified_mass: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub modifications: ModificationSet,
    #[cfg_attr(feature = "serde", serde(default))]
    pub evidence: Evidence,
}

impl TheoreticalProteoform {
    pub fn new(
        name: impl Into<String>,
        begin: u32,
        end: u32,
        unmodified_mass: f64,
        modifications: ModificationSet,
        evidence: Evidence,
    ) -> Self {
        Self {
            name: name.into(),
            begin,
            end,
            unmodified_mass,
            modifications,
            evidence,
        }
    }

    pub fn modified_mass(&self) -> f64 {
        self.unmodified_mass + self.modifications.mass()
    }

    pub fn sequence_length(&self) -> u32 {
        (self.end + 1).saturating_sub(self.begin)
    }
}

/// An aggregate of observations sharing a mass, retention time and label count
/// within tolerance of a root observation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExperimentalProteoform {
    pub(crate) root: Component,
    pub(crate) aggregated_components: Vec<Component>,
    pub(crate) light_components: Vec<Component>,
    pub(crate) heavy_components: Vec<Component>,
    pub agg_mass: f64,
    pub agg_intensity: f64,
    pub agg_rt: f64,
    pub quantification: Option<QuantificationValues>,
    /// Whether the user flagged this proteoform's mass as a misassigned isotopic peak
    pub missed_mono: bool,
    /// Whether this proteoform's mass has already been corrected by a mass shift
    pub mass_shifted: bool,
}

impl ExperimentalProteoform {
    pub fn root(&self) -> &Component {
        &self.root
    }

    pub fn aggregated_components(&self) -> &[Component] {
        &self.aggregated_components
    }

    pub fn light_components(&self) -> &[Component] {
        &self.light_components
    }

    pub fn heavy_components(&self) -> &[Component] {
        &self.heavy_components
    }

    pub fn observation_count(&self) -> usize {
        self.aggregated_components.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProteoformVariant {
    Experimental(ExperimentalProteoform),
    Theoretical(TheoreticalProteoform),
}

/// A proteoform of any kind. Target/decoy status is carried by `decoy_group`, so
/// a proteoform is always exactly one of target or decoy.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Proteoform {
    pub accession: String,
    pub modified_mass: f64,
    pub lysine_count: i32,
    pub decoy_group: Option<String>,
    pub variant: ProteoformVariant,
}

impl Proteoform {
    /// Wrap an experimental aggregate. The label count is copied from the root
    /// observation when `labeled`.
    pub fn experimental(
        accession: impl Into<String>,
        experimental: ExperimentalProteoform,
        labeled: bool,
    ) -> Self {
        let lysine_count = if labeled {
            experimental.root.lysine_count
        } else {
            UNKNOWN_LYSINE_COUNT
        };
        Self {
            accession: accession.into(),
            modified_mass: experimental.agg_mass,
            lysine_count,
            decoy_group: None,
            variant: ProteoformVariant::Experimental(experimental),
        }
    }

    pub fn theoretical(
        accession: impl Into<String>,
        theoretical: TheoreticalProteoform,
        lysine_count: i32,
    ) -> Self {
        Self {
            accession: accession.into(),
            modified_mass: theoretical.modified_mass(),
            lysine_count,
            decoy_group: None,
            variant: ProteoformVariant::Theoretical(theoretical),
        }
    }

    pub fn decoy(
        accession: impl Into<String>,
        theoretical: TheoreticalProteoform,
        lysine_count: i32,
        decoy_group: impl Into<String>,
    ) -> Self {
        let mut this = Self::theoretical(accession, theoretical, lysine_count);
        this.decoy_group = Some(decoy_group.into());
        this
    }

    pub fn kind(&self) -> ProteoformKind {
        match (&self.variant, &self.decoy_group) {
            (ProteoformVariant::Experimental(_), _) => ProteoformKind::Experimental,
            (ProteoformVariant::Theoretical(_), None) => ProteoformKind::Theoretical,
            (ProteoformVariant::Theoretical(_), Some(_)) => ProteoformKind::Decoy,
        }
    }

    pub fn is_target(&self) -> bool {
        self.decoy_group.is_none()
    }

    pub fn is_decoy(&self) -> bool {
        self.decoy_group.is_some()
    }

    pub fn is_experimental(&self) -> bool {
        matches!(self.variant, ProteoformVariant::Experimental(_))
    }

    pub fn as_experimental(&self) -> Option<&ExperimentalProteoform> {
        match &self.variant {
            ProteoformVariant::Experimental(e) => Some(e),
            ProteoformVariant::Theoretical(_) => None,
        }
    }

    pub fn as_experimental_mut(&mut self) -> Option<&mut ExperimentalProteoform> {
        match &mut self.variant {
            ProteoformVariant::Experimental(e) => Some(e),
            ProteoformVariant::Theoretical(_) => None,
        }
    }

    pub fn as_theoretical(&self) -> Option<&TheoreticalProteoform> {
        match &self.variant {
            ProteoformVariant::Experimental(_) => None,
            ProteoformVariant::Theoretical(t) => Some(t),
        }
    }

    /// The aggregate intensity, or zero for proteoforms without observations
    pub fn agg_intensity(&self) -> f64 {
        self.as_experimental().map(|e| e.agg_intensity).unwrap_or(0.0)
    }

    pub fn agg_rt(&self) -> f64 {
        self.as_experimental().map(|e| e.agg_rt).unwrap_or(0.0)
    }

    pub fn observation_count(&self) -> usize {
        self.as_experimental()
            .map(|e| e.observation_count())
            .unwrap_or_default()
    }

    pub fn has_lysine_count(&self) -> bool {
        self.lysine_count != UNKNOWN_LYSINE_COUNT
    }

    /// Move an experimental proteoform's mass by `delta` Daltons, once.
    /// Returns `false` when the proteoform is not experimental or was already shifted.
    pub(crate) fn apply_mass_shift(&mut self, delta: f64) -> bool {
        let mass = match self.as_experimental_mut() {
            Some(e) if !e.mass_shifted => {
                e.agg_mass += delta;
                e.mass_shifted = true;
                e.agg_mass
            }
            _ => return false,
        };
        self.modified_mass = mass;
        true
    }
}

impl MassAnchor for Proteoform {
    fn mass(&self) -> f64 {
        self.modified_mass
    }

    fn rt(&self) -> f64 {
        self.agg_rt()
    }

    fn lysine_count(&self) -> i32 {
        self.lysine_count
    }
}

impl Display for Proteoform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({:?}, {:0.4} Da)",
            self.accession,
            self.kind(),
            self.modified_mass
        )
    }
}

/// The owner of every proteoform taking part in a community
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProteoformArena {
    proteoforms: Vec<Proteoform>,
}

impl ProteoformArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, proteoform: Proteoform) -> ProteoformId {
        let id = ProteoformId(self.proteoforms.len() as u32);
        self.proteoforms.push(proteoform);
        id
    }

    pub fn get(&self, id: ProteoformId) -> Option<&Proteoform> {
        self.proteoforms.get(id.index())
    }

    pub fn get_mut(&mut self, id: ProteoformId) -> Option<&mut Proteoform> {
        self.proteoforms.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.proteoforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proteoforms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProteoformId, &Proteoform)> {
        self.proteoforms
            .iter()
            .enumerate()
            .map(|(i, p)| (ProteoformId(i as u32), p))
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Proteoform] {
        &mut self.proteoforms
    }
}

impl Index<ProteoformId> for ProteoformArena {
    type Output = Proteoform;

    fn index(&self, index: ProteoformId) -> &Self::Output {
        &self.proteoforms[index.index()]
    }
}

impl IndexMut<ProteoformId> for ProteoformArena {
    fn index_mut(&mut self, index: ProteoformId) -> &mut Self::Output {
        &mut self.proteoforms[index.index()]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_modification_set() {
        let mods = ModificationSet::new(vec![
            Modification::new("Phospho", 79.966331, Some(12)),
            Modification::new("Acetyl", 42.010565, Some(1)),
            Modification::new("Phospho", 79.966331, Some(12)),
        ]);
        assert_eq!(mods.len(), 2);
        assert_eq!(mods.iter().next().unwrap().name, "Acetyl");
        assert!((mods.mass() - 121.976896).abs() < 1e-9);
        assert_eq!(mods.to_string(), "Acetyl; Phospho");
        assert_eq!(ModificationSet::default().to_string(), "Unmodified");
    }

    #[test]
    fn test_theoretical_kinds() {
        let theo = TheoreticalProteoform::new(
            "HIST1",
            2,
            101,
            11000.0,
            vec![Modification::new("Acetyl", 42.010565, Some(2))].into(),
            Evidence::default(),
        );
        assert_eq!(theo.sequence_length(), 100);
        let target = Proteoform::theoretical("T1", theo.clone(), 7);
        assert!((target.modified_mass - 11042.010565).abs() < 1e-9);
        assert_eq!(target.kind(), ProteoformKind::Theoretical);
        assert!(target.is_target() && !target.is_decoy());
        assert_eq!(target.agg_intensity(), 0.0);
        assert_eq!(target.observation_count(), 0);

        let decoy = Proteoform::decoy("D1", theo, 7, "decoy_0");
        assert_eq!(decoy.kind(), ProteoformKind::Decoy);
        assert!(decoy.is_decoy() && !decoy.is_target());
    }
}
