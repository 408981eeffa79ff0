//! SpectrumPlotFilter: histogram of ion values.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, RefreshError};
use crate::pipeline::filter::{Filter, FilterBase};
use crate::pipeline::filter_type::FilterType;
use crate::pipeline::property::{
    expect_bool, expect_colour, expect_float, update, FilterProperty, PropertyEffect,
    PropertyError, PropertyValue,
};
use crate::pipeline::stream::{
    ion_streams, propagate_streams, PlotStream, Stream, StreamData, StreamMask, StreamRef,
};
use crate::types::Colour;
use std::mem::size_of;

pub const SPECTRUM_ERR_TOO_MANY_BINS: ErrorCode = 1;

/// Upper bound on histogram bins.
pub const MAX_BINS: usize = 1_000_000;

#[derive(Debug)]
pub struct SpectrumPlotFilter {
    base: FilterBase,
    bin_width: f64,
    /// Fixed range when `auto_range` is off.
    min: f64,
    max: f64,
    auto_range: bool,
    log_y: bool,
    normalise: bool,
    colour: Colour,
}

impl SpectrumPlotFilter {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new(FilterType::SpectrumPlot.display_name()),
            bin_width: 0.5,
            min: 0.0,
            max: 150.0,
            auto_range: true,
            log_y: true,
            normalise: false,
            colour: Colour::BLUE,
        }
    }

    fn value_range(&self, input: &[StreamRef]) -> Option<(f64, f64)> {
        if !self.auto_range {
            return Some((self.min, self.max));
        }
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for hit in ion_streams(input).flat_map(|s| s.hits.iter()) {
            lo = lo.min(hit.value as f64);
            hi = hi.max(hit.value as f64);
        }
        (lo <= hi).then_some((lo, hi))
    }
}

impl Default for SpectrumPlotFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for SpectrumPlotFilter {
    fn filter_type(&self) -> Option<FilterType> {
        Some(FilterType::SpectrumPlot)
    }

    fn type_name(&self) -> &'static str {
        FilterType::SpectrumPlot.display_name()
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
            bin_width: self.bin_width,
            min: self.min,
            max: self.max,
            auto_range: self.auto_range,
            log_y: self.log_y,
            normalise: self.normalise,
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

        let Some((lo, hi)) = self.value_range(input) else {
            return Ok(());
        };
        let n_bins = (((hi - lo) / self.bin_width).floor() as usize).saturating_add(1);
        if n_bins > MAX_BINS {
            return Err(RefreshError::Filter(SPECTRUM_ERR_TOO_MANY_BINS));
        }

        let mut counts = vec![0u64; n_bins];
        let mut total = 0u64;
        for ions in ion_streams(input) {
            for hit in ctx.checked(ions.hits.iter()) {
                let v = hit?.value as f64;
                if v < lo || v > hi {
                    continue;
                }
                let bin = (((v - lo) / self.bin_width) as usize).min(n_bins - 1);
                counts[bin] += 1;
                total += 1;
            }
        }

        let scale = if self.normalise && total > 0 {
            1.0 / total as f64
        } else {
            1.0
        };
        let points = counts
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let x = lo + (i as f64 + 0.5) * self.bin_width;
                [x as f32, (c as f64 * scale) as f32]
            })
            .collect();

        let plot = PlotStream {
            title: "Spectrum".to_string(),
            x_label: ion_streams(input)
                .next()
                .map(|s| s.value_label.clone())
                .unwrap_or_default(),
            y_label: if self.normalise { "Fraction" } else { "Count" }.to_string(),
            points,
            log_y: self.log_y,
            colour: self.colour,
            plot_id: 0,
        };
        let stream = self.cache_as_needed(Stream::new(self.base.id(), StreamData::Plot(plot)), n_bins, ctx);
        output.push(stream);
        Ok(())
    }

    fn properties(&self) -> Vec<FilterProperty> {
        vec![
            FilterProperty::new("bin_width", "Bin width", self.bin_width, "Histogram bin width"),
            FilterProperty::new(
                "auto_range",
                "Auto range",
                self.auto_range,
                "Span the observed values",
            ),
            FilterProperty::new("min", "Minimum", self.min, "Lower bound when not auto"),
            FilterProperty::new("max", "Maximum", self.max, "Upper bound when not auto"),
            FilterProperty::new("log_y", "Log Y", self.log_y, "Logarithmic count axis"),
            FilterProperty::new(
                "normalise",
                "Normalise",
                self.normalise,
                "Divide counts by the total",
            ),
            FilterProperty::new("colour", "Colour", self.colour.to_hex(), "Trace colour"),
        ]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError> {
        use PropertyEffect::Recompute;
        match key {
            "bin_width" => {
                let w = expect_float(key, value)?;
                if w <= 0.0 {
                    return Err(PropertyError::invalid(key, "must be positive"));
                }
                Ok(update(&mut self.bin_width, w, Recompute))
            }
            "auto_range" => Ok(update(&mut self.auto_range, expect_bool(key, value)?, Recompute)),
            "min" => Ok(update(&mut self.min, expect_float(key, value)?, Recompute)),
            "max" => Ok(update(&mut self.max, expect_float(key, value)?, Recompute)),
            "log_y" => Ok(update(&mut self.log_y, expect_bool(key, value)?, Recompute)),
            "normalise" => Ok(update(&mut self.normalise, expect_bool(key, value)?, Recompute)),
            "colour" => Ok(update(&mut self.colour, expect_colour(key, value)?, Recompute)),
            _ => Err(PropertyError::UnknownKey(key.to_string())),
        }
    }

    fn num_bytes_for_cache(&self, n_bins: usize) -> Option<usize> {
        Some(n_bins.min(MAX_BINS) * size_of::<[f32; 2]>())
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::empty()
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::PLOT
    }

    fn use_mask(&self) -> StreamMask {
        StreamMask::IONS
    }

    fn specific_error_string(&self, code: ErrorCode) -> &'static str {
        match code {
            SPECTRUM_ERR_TOO_MANY_BINS => "Too many bins; increase the bin width",
            _ => "Unknown spectrum error",
        }
    }
}
