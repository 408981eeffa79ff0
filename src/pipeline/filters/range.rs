//! RangeFilter: split ions by value into one stream per ranged species.
//!
//! Blocks incoming ion and range streams, then emits one ion stream per ion
//! species that received hits (coloured by the species) and a range stream
//! carrying its table. Unranged hits are dropped unless `drop_unranged` is
//! off, in which case they are emitted as one extra stream in their original
//! colour.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, RefreshError};
use crate::pipeline::filter::{Filter, FilterBase};
use crate::pipeline::filter_type::FilterType;
use crate::pipeline::property::{
    expect_bool, expect_str, update, FilterProperty, PropertyEffect, PropertyError, PropertyValue,
};
use crate::pipeline::stream::{
    ion_streams, propagate_streams, IonStream, RangeStream, Stream, StreamData, StreamMask,
    StreamRef,
};
use crate::types::{IonHit, RangeTable};
use std::mem::size_of;
use std::sync::Arc;

#[derive(Debug)]
pub struct RangeFilter {
    base: FilterBase,
    ranges: Arc<RangeTable>,
    drop_unranged: bool,
}

impl RangeFilter {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new(FilterType::RangeFilter.display_name()),
            ranges: Arc::new(RangeTable::new()),
            drop_unranged: true,
        }
    }

    pub fn with_ranges(table: RangeTable) -> Self {
        Self {
            ranges: Arc::new(table),
            ..Self::new()
        }
    }

    pub fn ranges(&self) -> &RangeTable {
        &self.ranges
    }
}

impl Default for RangeFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for RangeFilter {
    fn filter_type(&self) -> Option<FilterType> {
        Some(FilterType::RangeFilter)
    }

    fn type_name(&self) -> &'static str {
        FilterType::RangeFilter.display_name()
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
            ranges: Arc::new(RangeTable::clone(&self.ranges)),
            drop_unranged: self.drop_unranged,
        })
    }

    fn refresh(
        &mut self,
        input: &[StreamRef],
        output: &mut Vec<StreamRef>,
        ctx: &ExecutionContext,
    ) -> Result<(), RefreshError> {
        propagate_streams(input, output, self.block_mask(), true);

        let n_ions = self.ranges.ions().len();
        let mut buckets: Vec<Vec<IonHit>> = vec![Vec::new(); n_ions];
        let mut unranged: Vec<IonHit> = Vec::new();
        let mut template: Option<&IonStream> = None;

        for ions in ion_streams(input) {
            template.get_or_insert(ions);
            for hit in ctx.checked(ions.hits.iter()) {
                let hit = hit?;
                match self.ranges.classify(hit.value) {
                    Some(ion) => buckets[ion].push(*hit),
                    None if !self.drop_unranged => unranged.push(*hit),
                    None => {}
                }
            }
        }

        if self.ranges.is_empty() && template.is_some() {
            self.base.console_message("No ranges defined; all ions are unranged");
        }

        let id = self.base.id();
        let range_stream = Stream::new(
            id,
            StreamData::Range(RangeStream {
                ranges: Arc::clone(&self.ranges),
            }),
        );
        let range_stream = self.cache_as_needed(range_stream, 0, ctx);
        output.push(range_stream);

        let Some(template) = template else {
            return Ok(());
        };

        for (ion, hits) in buckets.into_iter().enumerate() {
            if hits.is_empty() {
                continue;
            }
            let n = hits.len();
            let stream = IonStream {
                hits,
                colour: self.ranges.ions()[ion].colour,
                ion_size: template.ion_size,
                value_label: template.value_label.clone(),
            };
            let stream = self.cache_as_needed(Stream::ions(id, stream), n, ctx);
            output.push(stream);
        }

        if !unranged.is_empty() {
            let n = unranged.len();
            let stream = self.cache_as_needed(Stream::ions(id, template.with_hits(unranged)), n, ctx);
            output.push(stream);
        }
        Ok(())
    }

    fn properties(&self) -> Vec<FilterProperty> {
        vec![
            FilterProperty::new(
                "ranges",
                "Ranges",
                self.ranges.to_spec_string(),
                "name[#rrggbb]:lo..hi[,lo..hi];...",
            ),
            FilterProperty::new(
                "drop_unranged",
                "Drop unranged",
                self.drop_unranged,
                "Discard ions outside every range",
            ),
        ]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError> {
        match key {
            "ranges" => {
                let table = RangeTable::parse(expect_str(key, value)?)
                    .map_err(|e| PropertyError::invalid(key, e.to_string()))?;
                if *self.ranges == table {
                    return Ok(PropertyEffect::Unchanged);
                }
                self.ranges = Arc::new(table);
                Ok(PropertyEffect::Recompute)
            }
            "drop_unranged" => {
                let b = expect_bool(key, value)?;
                Ok(update(&mut self.drop_unranged, b, PropertyEffect::Recompute))
            }
            _ => Err(PropertyError::UnknownKey(key.to_string())),
        }
    }

    fn num_bytes_for_cache(&self, n_objects: usize) -> Option<usize> {
        Some(n_objects * size_of::<IonHit>())
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::IONS | StreamMask::RANGE
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::IONS | StreamMask::RANGE
    }

    fn use_mask(&self) -> StreamMask {
        StreamMask::IONS
    }

    fn specific_error_string(&self, _code: ErrorCode) -> &'static str {
        "Unknown range error"
    }
}
