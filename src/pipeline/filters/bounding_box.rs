//! BoundingBoxFilter: draw the bounds of the incoming ions.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, RefreshError};
use crate::pipeline::filter::{Filter, FilterBase};
use crate::pipeline::filter_type::FilterType;
use crate::pipeline::property::{
    expect_bool, expect_colour, update, FilterProperty, PropertyEffect, PropertyError,
    PropertyValue,
};
use crate::pipeline::stream::{
    ion_streams, propagate_streams, DrawableStream, Stream, StreamData, StreamMask, StreamRef,
};
use crate::types::{BoundingCube, Colour, Drawable};
use std::mem::size_of;

#[derive(Debug)]
pub struct BoundingBoxFilter {
    base: FilterBase,
    /// One box per stream rather than one around everything.
    per_stream: bool,
    show_dimensions: bool,
    colour: Colour,
}

impl BoundingBoxFilter {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new(FilterType::BoundingBox.display_name()),
            per_stream: false,
            show_dimensions: true,
            colour: Colour::WHITE,
        }
    }

    fn push_box(&self, cube: BoundingCube, drawables: &mut Vec<Drawable>) {
        drawables.push(Drawable::BoundingBox {
            bounds: cube,
            colour: self.colour,
        });
        if self.show_dimensions {
            let [dx, dy, dz] = cube.size();
            drawables.push(Drawable::Text {
                position: cube.max,
                text: format!("{dx:.2} x {dy:.2} x {dz:.2}"),
                colour: self.colour,
            });
        }
    }
}

impl Default for BoundingBoxFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for BoundingBoxFilter {
    fn filter_type(&self) -> Option<FilterType> {
        Some(FilterType::BoundingBox)
    }

    fn type_name(&self) -> &'static str {
        FilterType::BoundingBox.display_name()
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
            per_stream: self.per_stream,
            show_dimensions: self.show_dimensions,
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

        let mut drawables = Vec::new();
        let mut combined = BoundingCube::empty();
        for ions in ion_streams(input) {
            ctx.check_abort()?;
            let cube = BoundingCube::from_hits(&ions.hits);
            if !cube.is_valid() {
                continue;
            }
            if self.per_stream {
                self.push_box(cube, &mut drawables);
            } else {
                combined.merge(&cube);
            }
        }
        if combined.is_valid() {
            self.push_box(combined, &mut drawables);
        }
        if drawables.is_empty() {
            return Ok(());
        }

        let n = drawables.len();
        let stream = Stream::new(
            self.base.id(),
            StreamData::Drawable(DrawableStream { drawables }),
        );
        let stream = self.cache_as_needed(stream, n, ctx);
        output.push(stream);
        Ok(())
    }

    fn properties(&self) -> Vec<FilterProperty> {
        vec![
            FilterProperty::new(
                "per_stream",
                "Per stream",
                self.per_stream,
                "One box per ion stream",
            ),
            FilterProperty::new(
                "show_dimensions",
                "Show dimensions",
                self.show_dimensions,
                "Label each box with its size",
            ),
            FilterProperty::new("colour", "Colour", self.colour.to_hex(), "Box colour"),
        ]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError> {
        use PropertyEffect::Recompute;
        match key {
            "per_stream" => Ok(update(&mut self.per_stream, expect_bool(key, value)?, Recompute)),
            "show_dimensions" => Ok(update(
                &mut self.show_dimensions,
                expect_bool(key, value)?,
                Recompute,
            )),
            "colour" => Ok(update(&mut self.colour, expect_colour(key, value)?, Recompute)),
            _ => Err(PropertyError::UnknownKey(key.to_string())),
        }
    }

    fn num_bytes_for_cache(&self, n_drawables: usize) -> Option<usize> {
        Some(n_drawables * size_of::<Drawable>())
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

    fn specific_error_string(&self, _code: ErrorCode) -> &'static str {
        "Unknown bounding box error"
    }
}
