//! Typed streams passed between filters, and the mask algebra over them.
//!
//! A stream is produced by one filter and shared by reference count between
//! the refresh output vectors and any filter cache holding it. It records the
//! producing filter as a plain `FilterId`, which never keeps the filter alive.

use crate::pipeline::id::FilterId;
use crate::types::{BoundingCube, Colour, Drawable, IonHit, RangeTable};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

/// Shared handle to an immutable stream.
pub type StreamRef = Arc<Stream>;

/// The kinds of data a stream can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Ions,
    Plot,
    Range,
    Drawable,
    Voxel,
}

impl StreamKind {
    pub const ALL: [StreamKind; 5] = [
        StreamKind::Ions,
        StreamKind::Plot,
        StreamKind::Range,
        StreamKind::Drawable,
        StreamKind::Voxel,
    ];

    pub fn mask(self) -> StreamMask {
        match self {
            StreamKind::Ions => StreamMask::IONS,
            StreamKind::Plot => StreamMask::PLOT,
            StreamKind::Range => StreamMask::RANGE,
            StreamKind::Drawable => StreamMask::DRAWABLE,
            StreamKind::Voxel => StreamMask::VOXEL,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            StreamKind::Ions => "Ions",
            StreamKind::Plot => "Plot",
            StreamKind::Range => "Range",
            StreamKind::Drawable => "Drawable",
            StreamKind::Voxel => "Voxel",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

bitflags! {
    /// Set of stream kinds, used for block/emit/use declarations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StreamMask: u32 {
        const IONS = 1 << 0;
        const PLOT = 1 << 1;
        const RANGE = 1 << 2;
        const DRAWABLE = 1 << 3;
        const VOXEL = 1 << 4;
    }
}

impl StreamMask {
    #[inline]
    pub fn has(self, kind: StreamKind) -> bool {
        self.contains(kind.mask())
    }

    /// Union of the kinds present in `streams`.
    pub fn of_streams(streams: &[StreamRef]) -> StreamMask {
        streams
            .iter()
            .fold(StreamMask::empty(), |acc, s| acc | s.kind().mask())
    }
}

/// A cloud of ion hits drawn in one colour.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IonStream {
    pub hits: Vec<IonHit>,
    pub colour: Colour,
    pub ion_size: f32,
    pub value_label: String,
}

impl IonStream {
    /// Same styling as `self`, new hits.
    pub fn with_hits(&self, hits: Vec<IonHit>) -> IonStream {
        IonStream {
            hits,
            colour: self.colour,
            ion_size: self.ion_size,
            value_label: self.value_label.clone(),
        }
    }
}

/// A 2D plot series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlotStream {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub points: Vec<[f32; 2]>,
    pub log_y: bool,
    pub colour: Colour,
    /// Identifies the series within its producing filter.
    pub plot_id: u32,
}

/// A range table published for downstream filters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeStream {
    pub ranges: Arc<RangeTable>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DrawableStream {
    pub drawables: Vec<Drawable>,
}

/// Dense scalar grid, x fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelStream {
    pub dims: [usize; 3],
    pub bounds: BoundingCube,
    pub values: Vec<f32>,
}

impl VoxelStream {
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        let [nx, ny, nz] = self.dims;
        if x >= nx || y >= ny || z >= nz {
            return None;
        }
        self.values.get(x + nx * (y + ny * z)).copied()
    }
}

/// Stream payload, one variant per `StreamKind`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamData {
    Ions(IonStream),
    Plot(PlotStream),
    Range(RangeStream),
    Drawable(DrawableStream),
    Voxel(VoxelStream),
}

impl StreamData {
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamData::Ions(_) => StreamKind::Ions,
            StreamData::Plot(_) => StreamKind::Plot,
            StreamData::Range(_) => StreamKind::Range,
            StreamData::Drawable(_) => StreamKind::Drawable,
            StreamData::Voxel(_) => StreamKind::Voxel,
        }
    }

    /// Approximate heap footprint of the payload.
    pub fn num_bytes(&self) -> usize {
        match self {
            StreamData::Ions(s) => s.hits.len() * size_of::<IonHit>() + s.value_label.len(),
            StreamData::Plot(s) => s.points.len() * size_of::<[f32; 2]>(),
            StreamData::Range(s) => {
                s.ranges.ranges().len() * size_of::<crate::types::ValueRange>()
                    + s.ranges.ions().len() * size_of::<crate::types::RangeIon>()
            }
            StreamData::Drawable(s) => s.drawables.len() * size_of::<Drawable>(),
            StreamData::Voxel(s) => s.values.len() * size_of::<f32>(),
        }
    }
}

/// One unit of filter output.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    parent: FilterId,
    cached: bool,
    data: StreamData,
}

impl Stream {
    pub fn new(parent: FilterId, data: StreamData) -> Self {
        Self {
            parent,
            cached: false,
            data,
        }
    }

    pub fn ions(parent: FilterId, ions: IonStream) -> Self {
        Self::new(parent, StreamData::Ions(ions))
    }

    #[inline]
    pub fn kind(&self) -> StreamKind {
        self.data.kind()
    }

    /// Filter that produced this stream. May no longer exist.
    #[inline]
    pub fn parent(&self) -> FilterId {
        self.parent
    }

    /// True when some filter cache retains this stream.
    #[inline]
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub(crate) fn mark_cached(&mut self) {
        self.cached = true;
    }

    pub fn data(&self) -> &StreamData {
        &self.data
    }

    pub fn num_bytes(&self) -> usize {
        self.data.num_bytes()
    }

    pub fn as_ions(&self) -> Option<&IonStream> {
        match &self.data {
            StreamData::Ions(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_plot(&self) -> Option<&PlotStream> {
        match &self.data {
            StreamData::Plot(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_range(&self) -> Option<&RangeStream> {
        match &self.data {
            StreamData::Range(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_drawable(&self) -> Option<&DrawableStream> {
        match &self.data {
            StreamData::Drawable(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_voxel(&self) -> Option<&VoxelStream> {
        match &self.data {
            StreamData::Voxel(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            StreamData::Ions(s) => write!(f, "{} ions ({})", s.hits.len(), s.value_label),
            StreamData::Plot(s) => write!(f, "plot '{}' with {} points", s.title, s.points.len()),
            StreamData::Range(s) => write!(
                f,
                "range table: {} ions, {} ranges",
                s.ranges.ions().len(),
                s.ranges.ranges().len()
            ),
            StreamData::Drawable(s) => write!(f, "{} drawables", s.drawables.len()),
            StreamData::Voxel(s) => {
                let [nx, ny, nz] = s.dims;
                write!(f, "voxels {}x{}x{}", nx, ny, nz)
            }
        }?;
        if self.cached {
            write!(f, " [cached]")?;
        }
        Ok(())
    }
}

/// Copy every input stream whose kind is not blocked into `output`.
///
/// With `pass_cache = false`, streams some cache already retains are skipped
/// so the caller can regenerate them itself.
pub fn propagate_streams(
    input: &[StreamRef],
    output: &mut Vec<StreamRef>,
    block_mask: StreamMask,
    pass_cache: bool,
) {
    output.extend(
        input
            .iter()
            .filter(|s| !block_mask.has(s.kind()))
            .filter(|s| pass_cache || !s.is_cached())
            .cloned(),
    );
}

/// Ion streams in `input`, in order.
pub fn ion_streams(input: &[StreamRef]) -> impl Iterator<Item = &IonStream> {
    input.iter().filter_map(|s| s.as_ions())
}

/// Total ion count across every ion stream in `input`.
pub fn count_ions(input: &[StreamRef]) -> usize {
    ion_streams(input).map(|s| s.hits.len()).sum()
}

/// `out ⊆ emit ∪ (in \ block)`.
pub fn mask_sound(
    input: StreamMask,
    output: StreamMask,
    block: StreamMask,
    emit: StreamMask,
) -> bool {
    (emit | input.difference(block)).contains(output)
}
