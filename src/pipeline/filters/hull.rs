//! IonHullFilter: convex footprint of the ions in the XY plane.

use crate::geometry::{compute_hull, HullError};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, RefreshError};
use crate::pipeline::filter::{Filter, FilterBase};
use crate::pipeline::filter_type::FilterType;
use crate::pipeline::property::{
    expect_colour, update, FilterProperty, PropertyEffect, PropertyError, PropertyValue,
};
use crate::pipeline::stream::{
    ion_streams, propagate_streams, DrawableStream, Stream, StreamData, StreamMask, StreamRef,
};
use crate::types::{Colour, Drawable};
use std::mem::size_of;

pub const HULL_ERR_NO_MEM: ErrorCode = 1;

#[derive(Debug)]
pub struct IonHullFilter {
    base: FilterBase,
    colour: Colour,
}

impl IonHullFilter {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new(FilterType::IonHull.display_name()),
            colour: Colour::GREEN,
        }
    }
}

impl Default for IonHullFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for IonHullFilter {
    fn filter_type(&self) -> Option<FilterType> {
        Some(FilterType::IonHull)
    }

    fn type_name(&self) -> &'static str {
        FilterType::IonHull.display_name()
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
            colour: self.colour,
        })
    }

    fn refresh(
        &mut self,
        input: &[StreamRef],
        output: &mut Vec<StreamRef>,
        ctx: &ExecutionContext,
    ) -> Result<(), RefreshError> {
        propagate_streams(input, output, self.block_mask(), true);

        let mut points = Vec::new();
        let mut z_sum = 0.0f64;
        for ions in ion_streams(input) {
            for hit in ctx.checked(ions.hits.iter()) {
                let hit = hit?;
                points.push([hit.pos[0], hit.pos[1]]);
                z_sum += hit.pos[2] as f64;
            }
        }
        if points.is_empty() {
            return Ok(());
        }
        let z = (z_sum / points.len() as f64) as f32;

        let hull = match compute_hull(
            &points,
            ctx.progress().filter_progress_counter(),
            ctx.abort_flag(),
        ) {
            Ok(hull) => hull,
            Err(HullError::UserAbort) => return Err(RefreshError::Abort),
            Err(HullError::NoMem) => return Err(RefreshError::Filter(HULL_ERR_NO_MEM)),
            Err(HullError::InsufficientPoints) => {
                self.base
                    .console_message("Too few distinct ion positions to form a hull");
                return Ok(());
            }
        };

        let n = hull.len();
        let polygon = Drawable::Polygon {
            vertices: hull.into_iter().map(|[x, y]| [x, y, z]).collect(),
            colour: self.colour,
        };
        let stream = Stream::new(
            self.base.id(),
            StreamData::Drawable(DrawableStream {
                drawables: vec![polygon],
            }),
        );
        let stream = self.cache_as_needed(stream, n, ctx);
        output.push(stream);
        Ok(())
    }

    fn properties(&self) -> Vec<FilterProperty> {
        vec![FilterProperty::new(
            "colour",
            "Colour",
            self.colour.to_hex(),
            "Outline colour",
        )]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError> {
        match key {
            "colour" => Ok(update(
                &mut self.colour,
                expect_colour(key, value)?,
                PropertyEffect::Recompute,
            )),
            _ => Err(PropertyError::UnknownKey(key.to_string())),
        }
    }

    fn num_bytes_for_cache(&self, n_vertices: usize) -> Option<usize> {
        Some(n_vertices * size_of::<[f32; 3]>() + size_of::<Drawable>())
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::empty()
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::DRAWABLE
    }

    fn use_mask(&self) -> StreamMask {
        StreamMask::IONS
    }

    fn specific_error_string(&self, code: ErrorCode) -> &'static str {
        match code {
            HULL_ERR_NO_MEM => "Not enough memory to compute the hull",
            _ => "Unknown hull error",
        }
    }
}
