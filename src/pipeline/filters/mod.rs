//! Built-in filter implementations.
//!
//! Each filter lives in its own module together with its local error codes.
//! New built-ins also need a [`FilterType`](crate::pipeline::FilterType)
//! variant and an arm in [`FilterFactory`](crate::pipeline::FilterFactory).

mod bounding_box;
mod clip;
mod data_load;
mod downsample;
mod external_program;
mod hull;
mod range;
mod spectrum;
pub(crate) mod text_io;
mod value_script;
mod voxelise;

pub use bounding_box::BoundingBoxFilter;
pub use clip::{ClipPrimitive, IonClipFilter};
pub use data_load::{
    DataLoadFilter, SourceKind, DATALOAD_ERR_EMPTY, DATALOAD_ERR_NO_FILE, DATALOAD_ERR_OPEN,
    DATALOAD_ERR_PARSE,
};
pub use downsample::{IonDownsampleFilter, SampleMode};
pub use external_program::{
    ExternalProgramFilter, EXT_ERR_COMMAND_FAILED, EXT_ERR_NO_COMMAND, EXT_ERR_READ_OUTPUT,
    EXT_ERR_SPAWN, EXT_ERR_WRITE,
};
pub use hull::{IonHullFilter, HULL_ERR_NO_MEM};
pub use range::RangeFilter;
pub use spectrum::{SpectrumPlotFilter, SPECTRUM_ERR_TOO_MANY_BINS};
pub use value_script::{ScriptTarget, ValueScriptFilter, SCRIPT_ERR_EVAL, SCRIPT_ERR_NOT_FINITE};
pub use voxelise::{VoxelRepresentation, VoxeliseFilter, VOXEL_ERR_NO_MEM};
