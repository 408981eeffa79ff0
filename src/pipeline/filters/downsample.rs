//! IonDownsampleFilter: seeded random subset of each ion stream.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, RefreshError};
use crate::pipeline::filter::{Filter, FilterBase};
use crate::pipeline::filter_type::FilterType;
use crate::pipeline::property::{
    expect_bool, expect_count, expect_float, expect_int, expect_str, update, FilterProperty,
    PropertyEffect, PropertyError, PropertyValue,
};
use crate::pipeline::stream::{propagate_streams, Stream, StreamMask, StreamRef};
use crate::types::IonHit;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::mem::size_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// Keep each ion with probability `fraction`.
    Fraction,
    /// Keep exactly `min(n, max_count)` ions.
    Count,
}

#[derive(Debug)]
pub struct IonDownsampleFilter {
    base: FilterBase,
    mode: SampleMode,
    fraction: f64,
    max_count: usize,
    seed: u64,
    /// Apply `max_count` to each stream instead of to the total.
    per_stream: bool,
}

impl IonDownsampleFilter {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new(FilterType::IonDownsample.display_name()),
            mode: SampleMode::Fraction,
            fraction: 0.1,
            max_count: 10_000,
            seed: 0x5eed,
            per_stream: true,
        }
    }

    fn sample_fraction(
        &self,
        hits: &[IonHit],
        rng: &mut SmallRng,
        ctx: &ExecutionContext,
    ) -> Result<Vec<IonHit>, RefreshError> {
        let mut kept = Vec::with_capacity((hits.len() as f64 * self.fraction) as usize);
        for hit in ctx.checked(hits.iter()) {
            let hit = hit?;
            if rng.gen_bool(self.fraction) {
                kept.push(*hit);
            }
        }
        Ok(kept)
    }

    fn sample_count(
        hits: &[IonHit],
        count: usize,
        rng: &mut SmallRng,
        ctx: &ExecutionContext,
    ) -> Result<Vec<IonHit>, RefreshError> {
        if hits.len() <= count {
            return Ok(hits.to_vec());
        }
        ctx.check_abort()?;
        let mut picked = rand::seq::index::sample(rng, hits.len(), count).into_vec();
        picked.sort_unstable();
        let mut kept = Vec::with_capacity(count);
        for idx in ctx.checked(picked.into_iter()) {
            kept.push(hits[idx?]);
        }
        Ok(kept)
    }
}

impl Default for IonDownsampleFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for IonDownsampleFilter {
    fn filter_type(&self) -> Option<FilterType> {
        Some(FilterType::IonDownsample)
    }

    fn type_name(&self) -> &'static str {
        FilterType::IonDownsample.display_name()
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
            mode: self.mode,
            fraction: self.fraction,
            max_count: self.max_count,
            seed: self.seed,
            per_stream: self.per_stream,
        })
    }

    fn refresh(
        &mut self,
        input: &[StreamRef],
        output: &mut Vec<StreamRef>,
        ctx: &ExecutionContext,
    ) -> Result<(), RefreshError> {
        propagate_streams(input, output, self.block_mask(), true);

        let mut rng = SmallRng::seed_from_u64(self.seed);
        let total: usize = crate::pipeline::stream::count_ions(input);
        let mut remaining = self.max_count;

        for stream in input {
            let Some(ions) = stream.as_ions() else {
                continue;
            };
            let kept = match self.mode {
                SampleMode::Fraction => self.sample_fraction(&ions.hits, &mut rng, ctx)?,
                SampleMode::Count if self.per_stream => {
                    Self::sample_count(&ions.hits, self.max_count, &mut rng, ctx)?
                }
                SampleMode::Count => {
                    // Share the budget across streams in proportion to size
                    let share = if total == 0 {
                        0
                    } else {
                        // Widened so huge counts cannot overflow; the share
                        // never exceeds `max_count`
                        let share = (ions.hits.len() as u128 * self.max_count as u128)
                            .div_ceil(total as u128);
                        (share as usize).min(remaining)
                    };
                    remaining -= share;
                    Self::sample_count(&ions.hits, share, &mut rng, ctx)?
                }
            };
            if kept.is_empty() {
                continue;
            }
            let n = ions.hits.len();
            let out = self.cache_as_needed(Stream::ions(self.base.id(), ions.with_hits(kept)), n, ctx);
            output.push(out);
        }
        Ok(())
    }

    fn properties(&self) -> Vec<FilterProperty> {
        vec![
            FilterProperty::new(
                "mode",
                "Mode",
                match self.mode {
                    SampleMode::Fraction => "fraction",
                    SampleMode::Count => "count",
                },
                "\"fraction\" or \"count\"",
            ),
            FilterProperty::new("fraction", "Fraction", self.fraction, "Keep probability"),
            FilterProperty::new(
                "max_count",
                "Max count",
                self.max_count as i64,
                "Ions kept in count mode",
            ),
            FilterProperty::new(
                "per_stream",
                "Per stream",
                self.per_stream,
                "Apply the count to each stream separately",
            ),
            FilterProperty::new("seed", "Seed", self.seed as i64, "Random seed"),
        ]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError> {
        use PropertyEffect::Recompute;
        match key {
            "mode" => {
                let mode = match expect_str(key, value)? {
                    "fraction" => SampleMode::Fraction,
                    "count" => SampleMode::Count,
                    _ => {
                        return Err(PropertyError::invalid(
                            key,
                            "expected \"fraction\" or \"count\"",
                        ))
                    }
                };
                Ok(update(&mut self.mode, mode, Recompute))
            }
            "fraction" => {
                let f = expect_float(key, value)?;
                if !(f > 0.0 && f <= 1.0) {
                    return Err(PropertyError::invalid(key, "must be in (0, 1]"));
                }
                Ok(update(&mut self.fraction, f, Recompute))
            }
            "max_count" => {
                let n = expect_count(key, value, 1, usize::MAX >> 1)?;
                Ok(update(&mut self.max_count, n, Recompute))
            }
            "per_stream" => {
                let b = expect_bool(key, value)?;
                Ok(update(&mut self.per_stream, b, Recompute))
            }
            "seed" => {
                let s = expect_int(key, value)? as u64;
                Ok(update(&mut self.seed, s, Recompute))
            }
            _ => Err(PropertyError::UnknownKey(key.to_string())),
        }
    }

    fn num_bytes_for_cache(&self, n_objects: usize) -> Option<usize> {
        let kept = match self.mode {
            SampleMode::Fraction => (n_objects as f64 * self.fraction).ceil() as usize,
            SampleMode::Count => n_objects.min(self.max_count),
        };
        Some(kept * size_of::<IonHit>())
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
        "Unknown downsample error"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cache::CacheBudget;
    use crate::pipeline::id::FilterId;
    use crate::pipeline::stream::{IonStream, StreamData, PlotStream};
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(CacheBudget::unlimited()))
    }

    fn ions(n: usize) -> StreamRef {
        let hits = (0..n).map(|i| IonHit::new(0.0, 0.0, 0.0, i as f32)).collect();
        Arc::new(Stream::ions(
            FilterId::new(0, 0),
            IonStream {
                hits,
                ..Default::default()
            },
        ))
    }

    fn run(filter: &mut IonDownsampleFilter, input: &[StreamRef]) -> Vec<StreamRef> {
        let mut out = Vec::new();
        filter.refresh(input, &mut out, &ctx()).unwrap();
        out
    }

    #[test]
    fn test_count_mode_exact() {
        let mut filter = IonDownsampleFilter::new();
        filter.set_property("mode", &"count".into()).unwrap();
        filter.set_property("max_count", &PropertyValue::Int(25)).unwrap();
        let out = run(&mut filter, &[ions(1000), ions(10)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ions().unwrap().hits.len(), 25);
        assert_eq!(out[1].as_ions().unwrap().hits.len(), 10);
        // Order preserved within a stream
        let values: Vec<f32> = out[0].as_ions().unwrap().hits.iter().map(|h| h.value).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_count_mode_shared_budget() {
        let mut filter = IonDownsampleFilter::new();
        filter.set_property("mode", &"count".into()).unwrap();
        filter.set_property("per_stream", &false.into()).unwrap();
        filter.set_property("max_count", &PropertyValue::Int(100)).unwrap();
        let out = run(&mut filter, &[ions(1000), ions(1000)]);
        let total: usize = out.iter().map(|s| s.as_ions().unwrap().hits.len()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_shared_budget_with_huge_count_keeps_everything() {
        let mut filter = IonDownsampleFilter::new();
        filter.set_property("mode", &"count".into()).unwrap();
        filter.set_property("per_stream", &false.into()).unwrap();
        filter
            .set_property("max_count", &PropertyValue::Int(1_000_000_000_000_000_000))
            .unwrap();
        let out = run(&mut filter, &[ions(20), ions(10)]);
        let sizes: Vec<usize> = out.iter().map(|s| s.as_ions().unwrap().hits.len()).collect();
        assert_eq!(sizes, vec![20, 10]);
    }

    #[test]
    fn test_fraction_mode_is_seeded() {
        let mut a = IonDownsampleFilter::new();
        let mut b = IonDownsampleFilter::new();
        let input = [ions(5000)];
        let out_a = run(&mut a, &input);
        let out_b = run(&mut b, &input);
        assert_eq!(out_a[0].as_ions(), out_b[0].as_ions());
        let kept = out_a[0].as_ions().unwrap().hits.len();
        assert!(kept > 300 && kept < 700, "kept {kept}");
    }

    #[test]
    fn test_non_ion_streams_pass_through() {
        let mut filter = IonDownsampleFilter::new();
        let plot = Arc::new(Stream::new(
            FilterId::new(0, 0),
            StreamData::Plot(PlotStream::default()),
        ));
        let out = run(&mut filter, &[plot.clone(), ions(100)]);
        assert!(Arc::ptr_eq(&out[0], &plot));
        assert!(out[1..].iter().all(|s| s.as_ions().is_some()));
    }

    #[test]
    fn test_cache_estimate_is_bounded() {
        let mut filter = IonDownsampleFilter::new();
        assert_eq!(
            filter.num_bytes_for_cache(1000),
            Some(100 * size_of::<IonHit>())
        );
        filter.set_property("mode", &"count".into()).unwrap();
        assert_eq!(
            filter.num_bytes_for_cache(1_000_000),
            Some(10_000 * size_of::<IonHit>())
        );
    }

    #[test]
    fn test_rejects_bad_fraction() {
        let mut filter = IonDownsampleFilter::new();
        assert!(filter.set_property("fraction", &PropertyValue::Float(0.0)).is_err());
        assert!(filter.set_property("fraction", &PropertyValue::Float(1.5)).is_err());
        assert_eq!(
            filter.set_property("fraction", &PropertyValue::Float(0.1)),
            Ok(PropertyEffect::Unchanged)
        );
    }
}
