//! A filter defined outside the crate, instrumented for tests

use ionflow::pipeline::stream::ion_streams;
use ionflow::pipeline::{
    propagate_streams, ExecutionContext, Filter, FilterBase, FilterProperty, FilterType,
    PropertyEffect, PropertyError, PropertyValue, RefreshError, Stream, StreamMask, StreamRef,
};
use ionflow::IonHit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared switches and counters observed by a [`CountingFilter`].
#[derive(Debug, Clone, Default)]
pub struct Tally {
    /// Number of `refresh` calls
    pub calls: Arc<AtomicUsize>,
    /// While set, `refresh` waits, polling for abort
    pub hold: Arc<AtomicBool>,
    /// Set once `refresh` has been entered
    pub entered: Arc<AtomicBool>,
    /// Reported by `monitor_needs_refresh`; cleared by `refresh`
    pub changed: Arc<AtomicBool>,
}

impl Tally {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hold(&self, on: bool) {
        self.hold.store(on, Ordering::SeqCst);
    }

    pub fn entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    /// Forget that `refresh` was entered.
    pub fn reset(&self) {
        self.entered.store(false, Ordering::SeqCst);
    }

    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }
}

/// Multiplies every ion value by `scale`.
#[derive(Debug)]
pub struct CountingFilter {
    base: FilterBase,
    tally: Tally,
    scale: f64,
}

impl CountingFilter {
    pub fn new(tally: &Tally) -> Self {
        Self {
            base: FilterBase::new("Counting"),
            tally: tally.clone(),
            scale: 2.0,
        }
    }
}

impl Filter for CountingFilter {
    fn filter_type(&self) -> Option<FilterType> {
        None
    }

    fn type_name(&self) -> &'static str {
        "Counting"
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
            tally: self.tally.clone(),
            scale: self.scale,
        })
    }

    fn refresh(
        &mut self,
        input: &[StreamRef],
        output: &mut Vec<StreamRef>,
        ctx: &ExecutionContext,
    ) -> Result<(), RefreshError> {
        self.tally.calls.fetch_add(1, Ordering::SeqCst);
        self.tally.changed.store(false, Ordering::SeqCst);
        self.tally.entered.store(true, Ordering::SeqCst);
        while self.tally.hold.load(Ordering::SeqCst) {
            ctx.check_abort()?;
            std::thread::sleep(Duration::from_millis(1));
        }

        propagate_streams(input, output, self.block_mask(), true);
        let scale = self.scale as f32;
        for ions in ion_streams(input) {
            let mut hits = Vec::with_capacity(ions.hits.len());
            for hit in ctx.checked(ions.hits.iter()) {
                let hit = hit?;
                hits.push(IonHit {
                    pos: hit.pos,
                    value: hit.value * scale,
                });
            }
            let n = hits.len();
            let stream = Stream::ions(self.id(), ions.with_hits(hits));
            output.push(self.cache_as_needed(stream, n, ctx));
        }
        Ok(())
    }

    fn properties(&self) -> Vec<FilterProperty> {
        vec![FilterProperty::new("scale", "Scale", self.scale, "Value multiplier")]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError> {
        match key {
            "scale" => {
                let scale = value.as_float().ok_or_else(|| {
                    PropertyError::invalid(key, "expected a number")
                })?;
                if scale == self.scale {
                    return Ok(PropertyEffect::Unchanged);
                }
                self.scale = scale;
                Ok(PropertyEffect::Recompute)
            }
            _ => Err(PropertyError::UnknownKey(key.to_string())),
        }
    }

    fn num_bytes_for_cache(&self, n_objects: usize) -> Option<usize> {
        Some(n_objects * std::mem::size_of::<IonHit>())
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

    fn monitor_needs_refresh(&self) -> bool {
        self.tally.changed.load(Ordering::SeqCst)
    }

    fn specific_error_string(&self, _code: u32) -> &'static str {
        "Counting filter error"
    }
}
