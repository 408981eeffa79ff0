//! VoxeliseFilter: bin ions into a regular 3D grid.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, RefreshError};
use crate::pipeline::filter::{Filter, FilterBase};
use crate::pipeline::filter_type::FilterType;
use crate::pipeline::property::{
    expect_count, expect_str, update, FilterProperty, PropertyEffect, PropertyError,
    PropertyValue,
};
use crate::pipeline::stream::{
    ion_streams, propagate_streams, Stream, StreamData, StreamMask, StreamRef, VoxelStream,
};
use crate::types::BoundingCube;
use std::mem::size_of;

pub const VOXEL_ERR_NO_MEM: ErrorCode = 1;

const MAX_AXIS_BINS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoxelRepresentation {
    Count,
    /// Count divided by voxel volume.
    Density,
}

#[derive(Debug)]
pub struct VoxeliseFilter {
    base: FilterBase,
    bins: [usize; 3],
    representation: VoxelRepresentation,
}

impl VoxeliseFilter {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new(FilterType::Voxelise.display_name()),
            bins: [50, 50, 50],
            representation: VoxelRepresentation::Count,
        }
    }

    fn n_voxels(&self) -> usize {
        self.bins[0] * self.bins[1] * self.bins[2]
    }
}

impl Default for VoxeliseFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for VoxeliseFilter {
    fn filter_type(&self) -> Option<FilterType> {
        Some(FilterType::Voxelise)
    }

    fn type_name(&self) -> &'static str {
        FilterType::Voxelise.display_name()
    }

    fn base(&self) -> &FilterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FilterBase {
        &mut self.base
    }

    fn clone_config(&self) -> Box<dyn Filter> {
        Box::new(Self {
            base: self.base.clone_config(),
            bins: self.bins,
            representation: self.representation,
        })
    }

    fn refresh(
        &mut self,
        input: &[StreamRef],
        output: &mut Vec<StreamRef>,
        ctx: &ExecutionContext,
    ) -> Result<(), RefreshError> {
        propagate_streams(input, output, self.block_mask(), true);

        let mut bounds = BoundingCube::empty();
        for ions in ion_streams(input) {
            bounds.merge(&BoundingCube::from_hits(&ions.hits));
        }
        if !bounds.is_valid() {
            return Ok(());
        }
        // Keep degenerate axes binnable
        for axis in 0..3 {
            if bounds.max[axis] - bounds.min[axis] <= f32::EPSILON {
                bounds.min[axis] -= 0.5;
                bounds.max[axis] += 0.5;
            }
        }

        let n = self.n_voxels();
        let mut values: Vec<f32> = Vec::new();
        values
            .try_reserve_exact(n)
            .map_err(|_| RefreshError::Filter(VOXEL_ERR_NO_MEM))?;
        values.resize(n, 0.0);

        let size = bounds.size();
        let [nx, ny, nz] = self.bins;
        let index = |p: f32, axis: usize, bins: usize| -> usize {
            let t = (p - bounds.min[axis]) / size[axis];
            ((t * bins as f32) as usize).min(bins - 1)
        };
        for ions in ion_streams(input) {
            for hit in ctx.checked(ions.hits.iter()) {
                let hit = hit?;
                let (x, y, z) = (
                    index(hit.pos[0], 0, nx),
                    index(hit.pos[1], 1, ny),
                    index(hit.pos[2], 2, nz),
                );
                values[x + nx * (y + ny * z)] += 1.0;
            }
        }

        if self.representation == VoxelRepresentation::Density {
            let volume = (size[0] / nx as f32) * (size[1] / ny as f32) * (size[2] / nz as f32);
            for v in &mut values {
                *v /= volume;
            }
        }

        let stream = Stream::new(
            self.base.id(),
            StreamData::Voxel(VoxelStream {
                dims: self.bins,
                bounds,
                values,
            }),
        );
        let stream = self.cache_as_needed(stream, n, ctx);
        output.push(stream);
        Ok(())
    }

    fn properties(&self) -> Vec<FilterProperty> {
        vec![
            FilterProperty::new("nx", "X bins", self.bins[0] as i64, "Voxels along x"),
            FilterProperty::new("ny", "Y bins", self.bins[1] as i64, "Voxels along y"),
            FilterProperty::new("nz", "Z bins", self.bins[2] as i64, "Voxels along z"),
            FilterProperty::new(
                "representation",
                "Representation",
                match self.representation {
                    VoxelRepresentation::Count => "count",
                    VoxelRepresentation::Density => "density",
                },
                "\"count\" or \"density\"",
            ),
        ]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError> {
        use PropertyEffect::Recompute;
        let axis = match key {
            "nx" => 0,
            "ny" => 1,
            "nz" => 2,
            "representation" => {
                let r = match expect_str(key, value)? {
                    "count" => VoxelRepresentation::Count,
                    "density" => VoxelRepresentation::Density,
                    _ => {
                        return Err(PropertyError::invalid(
                            key,
                            "expected \"count\" or \"density\"",
                        ))
                    }
                };
                return Ok(update(&mut self.representation, r, Recompute));
            }
            _ => return Err(PropertyError::UnknownKey(key.to_string())),
        };
        let n = expect_count(key, value, 1, MAX_AXIS_BINS)?;
        Ok(update(&mut self.bins[axis], n, Recompute))
    }

    fn num_bytes_for_cache(&self, n_voxels: usize) -> Option<usize> {
        Some(n_voxels * size_of::<f32>())
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::empty()
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::VOXEL
    }

    fn use_mask(&self) -> StreamMask {
        StreamMask::IONS
    }

    fn specific_error_string(&self, code: ErrorCode) -> &'static str {
        match code {
            VOXEL_ERR_NO_MEM => "Not enough memory for the voxel grid",
            _ => "Unknown voxelisation error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cache::CacheBudget;
    use crate::pipeline::id::FilterId;
    use crate::pipeline::stream::IonStream;
    use crate::types::IonHit;
    use std::sync::Arc;

    fn run(filter: &mut VoxeliseFilter, hits: Vec<IonHit>) -> Vec<StreamRef> {
        let ctx = ExecutionContext::new(Arc::new(CacheBudget::unlimited()));
        let input = vec![Arc::new(Stream::ions(
            FilterId::new(0, 0),
            IonStream {
                hits,
                ..Default::default()
            },
        ))];
        let mut out = Vec::new();
        filter.refresh(&input, &mut out, &ctx).unwrap();
        out
    }

    #[test]
    fn test_counts_conserved() {
        let mut filter = VoxeliseFilter::new();
        for key in ["nx", "ny", "nz"] {
            filter.set_property(key, &PropertyValue::Int(2)).unwrap();
        }
        let hits = vec![
            IonHit::new(0.0, 0.0, 0.0, 0.0),
            IonHit::new(0.1, 0.1, 0.1, 0.0),
            IonHit::new(1.0, 1.0, 1.0, 0.0),
        ];
        let out = run(&mut filter, hits);
        let voxels = out[1].as_voxel().unwrap();
        assert_eq!(voxels.values.iter().sum::<f32>(), 3.0);
        assert_eq!(voxels.get(0, 0, 0), Some(2.0));
        assert_eq!(voxels.get(1, 1, 1), Some(1.0));
    }

    #[test]
    fn test_single_point_is_binnable() {
        let mut filter = VoxeliseFilter::new();
        let out = run(&mut filter, vec![IonHit::new(5.0, 5.0, 5.0, 0.0)]);
        let voxels = out[1].as_voxel().unwrap();
        assert_eq!(voxels.values.iter().sum::<f32>(), 1.0);
    }

    #[test]
    fn test_bin_limits() {
        let mut filter = VoxeliseFilter::new();
        assert!(filter.set_property("nx", &PropertyValue::Int(0)).is_err());
        assert!(filter
            .set_property("nx", &PropertyValue::Int(MAX_AXIS_BINS as i64 + 1))
            .is_err());
    }
}
