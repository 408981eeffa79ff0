//! Filter type enumeration and factory for dynamic filter creation.

use crate::pipeline::filter::Filter;
use crate::pipeline::filters::{
    BoundingBoxFilter, DataLoadFilter, ExternalProgramFilter, IonClipFilter, IonDownsampleFilter,
    IonHullFilter, RangeFilter, SpectrumPlotFilter, ValueScriptFilter, VoxeliseFilter,
};
use serde::{Deserialize, Serialize};

/// Built-in filter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FilterType {
    // Sources
    DataLoad,

    // Ion transforms
    IonDownsample,
    RangeFilter,
    IonClip,
    ValueScript,
    ExternalProgram,

    // Analysis
    SpectrumPlot,
    BoundingBox,
    Voxelise,
    IonHull,
}

impl FilterType {
    pub fn display_name(&self) -> &'static str {
        match self {
            FilterType::DataLoad => "Data Load",
            FilterType::IonDownsample => "Ion Downsample",
            FilterType::RangeFilter => "Range Filter",
            FilterType::IonClip => "Ion Clip",
            FilterType::ValueScript => "Value Script",
            FilterType::ExternalProgram => "External Program",
            FilterType::SpectrumPlot => "Spectrum Plot",
            FilterType::BoundingBox => "Bounding Box",
            FilterType::Voxelise => "Voxelise",
            FilterType::IonHull => "Ion Hull",
        }
    }

    pub fn all() -> &'static [FilterType] {
        &[
            FilterType::DataLoad,
            FilterType::IonDownsample,
            FilterType::RangeFilter,
            FilterType::IonClip,
            FilterType::ValueScript,
            FilterType::ExternalProgram,
            FilterType::SpectrumPlot,
            FilterType::BoundingBox,
            FilterType::Voxelise,
            FilterType::IonHull,
        ]
    }

    pub fn is_source(&self) -> bool {
        matches!(self, FilterType::DataLoad)
    }

    /// Filters of this type can run external code. Lets state files be
    /// checked without instantiating anything.
    pub fn is_hazardous(&self) -> bool {
        matches!(self, FilterType::ExternalProgram)
    }

    pub fn description(&self) -> &'static str {
        match self {
            FilterType::DataLoad =>
                "Loads ions from a text file or generates a synthetic set.\n\
                 Optionally samples down to a maximum ion count.\n\
                 Can watch the file and reload when it changes.",

            FilterType::IonDownsample =>
                "Randomly keeps a fraction or a fixed number of ions.\n\
                 Sampling is seeded and repeatable.",

            FilterType::RangeFilter =>
                "Splits ions into one stream per ranged species.\n\
                 Publishes its range table for downstream filters.",

            FilterType::IonClip =>
                "Keeps ions inside (or outside) a sphere, box or half-space.",

            FilterType::ValueScript =>
                "Rewrites each ion's value or coordinate with a Rhai expression.\n\
                 Variables: x, y, z, value.",

            FilterType::ExternalProgram =>
                "Runs an external command on the ions and reads back its output.\n\
                 Hazardous: never saved as a default and stripped from untrusted files.",

            FilterType::SpectrumPlot =>
                "Histograms ion values into a plot.",

            FilterType::BoundingBox =>
                "Draws the axis-aligned bounds of the ions.",

            FilterType::Voxelise =>
                "Bins ions into a regular 3D grid of counts or densities.",

            FilterType::IonHull =>
                "Draws the convex footprint of the ions in the XY plane.",
        }
    }
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Creates filters from their type key.
pub struct FilterFactory;

impl FilterFactory {
    pub fn create(filter_type: FilterType) -> Box<dyn Filter> {
        match filter_type {
            FilterType::DataLoad => Box::new(DataLoadFilter::new()),
            FilterType::IonDownsample => Box::new(IonDownsampleFilter::new()),
            FilterType::RangeFilter => Box::new(RangeFilter::new()),
            FilterType::IonClip => Box::new(IonClipFilter::new()),
            FilterType::ValueScript => Box::new(ValueScriptFilter::new()),
            FilterType::ExternalProgram => Box::new(ExternalProgramFilter::new()),
            FilterType::SpectrumPlot => Box::new(SpectrumPlotFilter::new()),
            FilterType::BoundingBox => Box::new(BoundingBoxFilter::new()),
            FilterType::Voxelise => Box::new(VoxeliseFilter::new()),
            FilterType::IonHull => Box::new(IonHullFilter::new()),
        }
    }
}
