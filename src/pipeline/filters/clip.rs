//! IonClipFilter: keep ions inside a sphere, box or half-space.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, RefreshError};
use crate::pipeline::filter::{Filter, FilterBase};
use crate::pipeline::filter_type::FilterType;
use crate::pipeline::property::{
    expect_bool, expect_float, expect_str, expect_vec3, format_vec3, update, FilterProperty,
    PropertyEffect, PropertyError, PropertyValue,
};
use crate::pipeline::stream::{propagate_streams, Stream, StreamMask, StreamRef};
use crate::types::{BoundingCube, IonHit};
use std::mem::size_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipPrimitive {
    Sphere,
    Box,
    /// Half-space on the side `normal` points to.
    Plane,
}

impl ClipPrimitive {
    fn as_str(self) -> &'static str {
        match self {
            ClipPrimitive::Sphere => "sphere",
            ClipPrimitive::Box => "box",
            ClipPrimitive::Plane => "plane",
        }
    }
}

#[derive(Debug)]
pub struct IonClipFilter {
    base: FilterBase,
    primitive: ClipPrimitive,
    origin: [f32; 3],
    radius: f32,
    /// Opposite box corner from `origin`.
    corner: [f32; 3],
    normal: [f32; 3],
    invert: bool,
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

impl IonClipFilter {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new(FilterType::IonClip.display_name()),
            primitive: ClipPrimitive::Sphere,
            origin: [0.0; 3],
            radius: 10.0,
            corner: [10.0; 3],
            normal: [0.0, 0.0, 1.0],
            invert: false,
        }
    }

    fn inside(&self) -> impl Fn(&IonHit) -> bool + '_ {
        let r2 = self.radius * self.radius;
        let mut cube = BoundingCube::empty();
        cube.expand(self.origin);
        cube.expand(self.corner);
        move |hit: &IonHit| {
            let inside = match self.primitive {
                ClipPrimitive::Sphere => {
                    let d = sub(hit.pos, self.origin);
                    dot(d, d) <= r2
                }
                ClipPrimitive::Box => cube.contains(hit.pos),
                ClipPrimitive::Plane => dot(sub(hit.pos, self.origin), self.normal) >= 0.0,
            };
            inside != self.invert
        }
    }
}

impl Default for IonClipFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for IonClipFilter {
    fn filter_type(&self) -> Option<FilterType> {
        Some(FilterType::IonClip)
    }

    fn type_name(&self) -> &'static str {
        FilterType::IonClip.display_name()
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
            primitive: self.primitive,
            origin: self.origin,
            radius: self.radius,
            corner: self.corner,
            normal: self.normal,
            invert: self.invert,
        })
    }

    fn refresh(
        &mut self,
        input: &[StreamRef],
        output: &mut Vec<StreamRef>,
        ctx: &ExecutionContext,
    ) -> Result<(), RefreshError> {
        propagate_streams(input, output, self.block_mask(), true);

        let mut clipped = Vec::new();
        {
            let keep = self.inside();
            for ions in input.iter().filter_map(|s| s.as_ions()) {
                let mut kept = Vec::new();
                for hit in ctx.checked(ions.hits.iter()) {
                    let hit = hit?;
                    if keep(hit) {
                        kept.push(*hit);
                    }
                }
                if !kept.is_empty() {
                    clipped.push((ions.hits.len(), ions.with_hits(kept)));
                }
            }
        }

        for (n, ions) in clipped {
            let stream = self.cache_as_needed(Stream::ions(self.base.id(), ions), n, ctx);
            output.push(stream);
        }
        Ok(())
    }

    fn properties(&self) -> Vec<FilterProperty> {
        vec![
            FilterProperty::new(
                "primitive",
                "Primitive",
                self.primitive.as_str(),
                "\"sphere\", \"box\" or \"plane\"",
            ),
            FilterProperty::new("origin", "Origin", format_vec3(self.origin), "x,y,z"),
            FilterProperty::new("radius", "Radius", self.radius as f64, "Sphere radius"),
            FilterProperty::new("corner", "Corner", format_vec3(self.corner), "Opposite box corner"),
            FilterProperty::new("normal", "Normal", format_vec3(self.normal), "Plane normal"),
            FilterProperty::new("invert", "Invert", self.invert, "Keep ions outside instead"),
        ]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError> {
        use PropertyEffect::Recompute;
        match key {
            "primitive" => {
                let p = match expect_str(key, value)? {
                    "sphere" => ClipPrimitive::Sphere,
                    "box" => ClipPrimitive::Box,
                    "plane" => ClipPrimitive::Plane,
                    other => {
                        return Err(PropertyError::invalid(
                            key,
                            format!("unknown primitive '{other}'"),
                        ))
                    }
                };
                Ok(update(&mut self.primitive, p, Recompute))
            }
            "origin" => Ok(update(&mut self.origin, expect_vec3(key, value)?, Recompute)),
            "corner" => Ok(update(&mut self.corner, expect_vec3(key, value)?, Recompute)),
            "normal" => {
                let n = expect_vec3(key, value)?;
                let len = dot(n, n).sqrt();
                if len <= f32::EPSILON {
                    return Err(PropertyError::invalid(key, "normal cannot be zero"));
                }
                Ok(update(
                    &mut self.normal,
                    [n[0] / len, n[1] / len, n[2] / len],
                    Recompute,
                ))
            }
            "radius" => {
                let r = expect_float(key, value)?;
                if r <= 0.0 {
                    return Err(PropertyError::invalid(key, "must be positive"));
                }
                Ok(update(&mut self.radius, r as f32, Recompute))
            }
            "invert" => Ok(update(&mut self.invert, expect_bool(key, value)?, Recompute)),
            _ => Err(PropertyError::UnknownKey(key.to_string())),
        }
    }

    fn num_bytes_for_cache(&self, n_objects: usize) -> Option<usize> {
        Some(n_objects * size_of::<IonHit>())
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::IONS
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::IONS
    }

    fn use_mask(&self) -> StreamMask {
        StreamMask::IONS
    }

    fn specific_error_string(&self, _code: ErrorCode) -> &'static str {
        "Unknown clipping error"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cache::CacheBudget;
    use crate::pipeline::id::FilterId;
    use crate::pipeline::stream::IonStream;
    use std::sync::Arc;

    fn line_of_ions() -> StreamRef {
        let hits = (-10..=10)
            .map(|i| IonHit::new(i as f32, 0.0, 0.0, 1.0))
            .collect();
        Arc::new(Stream::ions(
            FilterId::new(0, 0),
            IonStream {
                hits,
                ..Default::default()
            },
        ))
    }

    fn kept(filter: &mut IonClipFilter) -> usize {
        let ctx = ExecutionContext::new(Arc::new(CacheBudget::unlimited()));
        let mut out = Vec::new();
        filter.refresh(&[line_of_ions()], &mut out, &ctx).unwrap();
        out.iter()
            .filter_map(|s| s.as_ions())
            .map(|s| s.hits.len())
            .sum()
    }

    #[test]
    fn test_sphere() {
        let mut filter = IonClipFilter::new();
        filter.set_property("radius", &PropertyValue::Float(3.0)).unwrap();
        assert_eq!(kept(&mut filter), 7);
        filter.set_property("invert", &PropertyValue::Bool(true)).unwrap();
        assert_eq!(kept(&mut filter), 14);
    }

    #[test]
    fn test_box_corners_any_order() {
        let mut filter = IonClipFilter::new();
        filter.set_property("primitive", &"box".into()).unwrap();
        filter.set_property("origin", &"2,1,1".into()).unwrap();
        filter.set_property("corner", &"-2,-1,-1".into()).unwrap();
        assert_eq!(kept(&mut filter), 5);
    }

    #[test]
    fn test_plane() {
        let mut filter = IonClipFilter::new();
        filter.set_property("primitive", &"plane".into()).unwrap();
        filter.set_property("normal", &"-2,0,0".into()).unwrap();
        // x <= 0
        assert_eq!(kept(&mut filter), 11);
        assert!(filter.set_property("normal", &"0,0,0".into()).is_err());
    }
}
