//! Response variables and predictor grouping.

use serde::{Deserialize, Serialize};

/// LiDAR-derived canopy-structure response variables, one model per variable
/// per tile. `index()` is stable and feeds seed derivation, so variants must
/// never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseVar {
    /// Canopy height, 50th relative-height percentile (m).
    Rh50,
    /// Canopy height, 75th relative-height percentile (m).
    Rh75,
    /// Canopy height, 98th relative-height percentile (m).
    Rh98,
    /// Canopy cover fraction (0-1).
    Cover,
    /// Foliage height diversity index.
    Fhd,
    /// Plant area index (m²/m²).
    Pai,
    /// Plant-area-volume-density, 0-5 m height bin.
    Pavd0to5,
    /// Plant-area-volume-density, 5-10 m height bin.
    Pavd5to10,
    /// Plant-area-volume-density, 10-20 m height bin.
    Pavd10to20,
    /// RH98 - RH50 difference (canopy vertical spread, m).
    RhDiff,
}

impl ResponseVar {
    pub const ALL: [ResponseVar; 10] = [
        ResponseVar::Rh50,
        ResponseVar::Rh75,
        ResponseVar::Rh98,
        ResponseVar::Cover,
        ResponseVar::Fhd,
        ResponseVar::Pai,
        ResponseVar::Pavd0to5,
        ResponseVar::Pavd5to10,
        ResponseVar::Pavd10to20,
        ResponseVar::RhDiff,
    ];

    /// Stable position in `ALL`, used for artifact keys and seed derivation.
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|v| v == self).unwrap_or(0)
    }

    /// Inverse of [`name`](Self::name), for CLI and artifact-key parsing.
    pub fn from_name(name: &str) -> Option<ResponseVar> {
        Self::ALL.iter().copied().find(|v| v.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResponseVar::Rh50 => "rh50",
            ResponseVar::Rh75 => "rh75",
            ResponseVar::Rh98 => "rh98",
            ResponseVar::Cover => "cover",
            ResponseVar::Fhd => "fhd",
            ResponseVar::Pai => "pai",
            ResponseVar::Pavd0to5 => "pavd_0_5",
            ResponseVar::Pavd5to10 => "pavd_5_10",
            ResponseVar::Pavd10to20 => "pavd_10_20",
            ResponseVar::RhDiff => "rh_diff_98_50",
        }
    }
}

/// Data-source category of a predictor, for importance aggregation and
/// group-ablation studies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictorGroup {
    Optical,
    Radar,
    Topography,
    LandCover,
    LeafTraits,
    SoilProperties,
}

impl PredictorGroup {
    pub const ALL: [PredictorGroup; 6] = [
        PredictorGroup::Optical,
        PredictorGroup::Radar,
        PredictorGroup::Topography,
        PredictorGroup::LandCover,
        PredictorGroup::LeafTraits,
        PredictorGroup::SoilProperties,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PredictorGroup::Optical => "optical",
            PredictorGroup::Radar => "radar",
            PredictorGroup::Topography => "topography",
            PredictorGroup::LandCover => "land_cover",
            PredictorGroup::LeafTraits => "leaf_traits",
            PredictorGroup::SoilProperties => "soil_properties",
        }
    }
}

/// Explicit predictor-name → group table for the standard predictor set.
pub const PREDICTOR_GROUPS: &[(&str, PredictorGroup)] = &[
    // Optical index set (Landsat/Sentinel-2 composites).
    ("ndvi", PredictorGroup::Optical),
    ("evi", PredictorGroup::Optical),
    ("nbr", PredictorGroup::Optical),
    ("ndmi", PredictorGroup::Optical),
    ("tc_brightness", PredictorGroup::Optical),
    ("tc_greenness", PredictorGroup::Optical),
    ("tc_wetness", PredictorGroup::Optical),
    // C-band radar backscatter.
    ("vv", PredictorGroup::Radar),
    ("vh", PredictorGroup::Radar),
    ("vv_vh_ratio", PredictorGroup::Radar),
    // Terrain.
    ("elevation", PredictorGroup::Topography),
    ("slope", PredictorGroup::Topography),
    ("aspect", PredictorGroup::Topography),
    ("tpi", PredictorGroup::Topography),
    // Categorical land cover class.
    ("landcover", PredictorGroup::LandCover),
    // Leaf trait maps.
    ("sla", PredictorGroup::LeafTraits),
    ("leaf_nitrogen", PredictorGroup::LeafTraits),
    ("leaf_phosphorus", PredictorGroup::LeafTraits),
    // Soil property maps.
    ("soil_ph", PredictorGroup::SoilProperties),
    ("soil_clay", PredictorGroup::SoilProperties),
    ("soil_sand", PredictorGroup::SoilProperties),
    ("soil_ocd", PredictorGroup::SoilProperties),
];

/// Group of a predictor name, or None for names outside the standard table.
pub fn group_of(name: &str) -> Option<PredictorGroup> {
    PREDICTOR_GROUPS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, g)| *g)
}
