//! DataLoadFilter: pure data source.
//!
//! Loads ions from a delimited text file or generates a deterministic
//! synthetic set. When `max_ions` is non-zero, larger datasets are sampled
//! down with an even stride and a console warning reports the truncation.
//! With `monitor` on, a change in the file's modification time marks the
//! filter as needing a refresh.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, RefreshError};
use crate::pipeline::filter::{Filter, FilterBase};
use crate::pipeline::filter_type::FilterType;
use crate::pipeline::filters::text_io::{read_ions, TextIonError};
use crate::pipeline::property::{
    expect_bool, expect_colour, expect_count, expect_float, expect_str, update, FilterProperty,
    PropertyEffect, PropertyError, PropertyValue,
};
use crate::pipeline::state::{FilterState, StateError};
use crate::pipeline::stream::{IonStream, Stream, StreamMask, StreamRef};
use crate::types::{Colour, IonHit};
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const DATALOAD_ERR_OPEN: ErrorCode = 1;
pub const DATALOAD_ERR_PARSE: ErrorCode = 2;
pub const DATALOAD_ERR_EMPTY: ErrorCode = 3;
pub const DATALOAD_ERR_NO_FILE: ErrorCode = 4;

const MAX_SYNTHETIC_IONS: usize = 100_000_000;

/// Where ions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Synthetic,
}

impl SourceKind {
    fn as_str(self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Synthetic => "synthetic",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(SourceKind::File),
            "synthetic" => Some(SourceKind::Synthetic),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct DataLoadFilter {
    base: FilterBase,
    source: SourceKind,
    path: PathBuf,
    synthetic_count: usize,
    /// Zero disables sampling.
    max_ions: usize,
    colour: Colour,
    ion_size: f32,
    value_label: String,
    monitor: bool,
    /// Modification time seen by the last load attempt, successful or not.
    /// A file that failed to load is retried only once it changes again.
    attempted_mtime: Option<SystemTime>,
}

impl DataLoadFilter {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new(FilterType::DataLoad.display_name()),
            source: SourceKind::Synthetic,
            path: PathBuf::new(),
            synthetic_count: 1000,
            max_ions: 0,
            colour: Colour::RED,
            ion_size: 2.0,
            value_label: "Mass-to-Charge (Da/e)".to_string(),
            monitor: false,
            attempted_mtime: None,
        }
    }

    /// Synthetic source of `count` ions with values `0..count`.
    pub fn synthetic(count: usize) -> Self {
        Self {
            synthetic_count: count,
            ..Self::new()
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: SourceKind::File,
            path: path.into(),
            ..Self::new()
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ions on a 10x10 grid per layer, value equal to the index.
    fn generate(&self, ctx: &ExecutionContext) -> Result<Vec<IonHit>, RefreshError> {
        let mut hits = Vec::with_capacity(self.synthetic_count);
        for i in ctx.checked(0..self.synthetic_count) {
            let i = i?;
            hits.push(IonHit::new(
                (i % 10) as f32,
                ((i / 10) % 10) as f32,
                (i / 100) as f32,
                i as f32,
            ));
        }
        Ok(hits)
    }

    fn load_file(&mut self, ctx: &ExecutionContext) -> Result<Vec<IonHit>, RefreshError> {
        if self.path.as_os_str().is_empty() {
            return Err(RefreshError::Filter(DATALOAD_ERR_NO_FILE));
        }
        let mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        self.attempted_mtime = mtime;
        let hits = match read_ions(&self.path, ctx) {
            Ok(hits) => hits,
            Err(TextIonError::Abort) => return Err(RefreshError::Abort),
            Err(TextIonError::Io(e)) => {
                self.base
                    .console_message(format!("Unable to read {}: {e}", self.path.display()));
                return Err(RefreshError::Filter(DATALOAD_ERR_OPEN));
            }
            Err(e @ TextIonError::Parse { .. }) => {
                self.base
                    .console_message(format!("{}: {e}", self.path.display()));
                return Err(RefreshError::Filter(DATALOAD_ERR_PARSE));
            }
        };
        if hits.is_empty() {
            return Err(RefreshError::Filter(DATALOAD_ERR_EMPTY));
        }
        Ok(hits)
    }

    /// Evenly strided subset of at most `max_ions` hits.
    fn sample(
        &mut self,
        hits: Vec<IonHit>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<IonHit>, RefreshError> {
        if self.max_ions == 0 || hits.len() <= self.max_ions {
            return Ok(hits);
        }
        let total = hits.len();
        let mut kept = Vec::with_capacity(self.max_ions);
        for k in ctx.checked(0..self.max_ions) {
            let k = k?;
            kept.push(hits[k * total / self.max_ions]);
        }
        self.base.console_message(format!(
            "Sampling truncated the loaded dataset: kept {} of {} ions",
            kept.len(),
            total
        ));
        Ok(kept)
    }
}

impl Default for DataLoadFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for DataLoadFilter {
    fn filter_type(&self) -> Option<FilterType> {
        Some(FilterType::DataLoad)
    }

    fn type_name(&self) -> &'static str {
        FilterType::DataLoad.display_name()
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
            source: self.source,
            path: self.path.clone(),
            synthetic_count: self.synthetic_count,
            max_ions: self.max_ions,
            colour: self.colour,
            ion_size: self.ion_size,
            value_label: self.value_label.clone(),
            monitor: self.monitor,
            attempted_mtime: None,
        })
    }

    fn refresh(
        &mut self,
        _input: &[StreamRef],
        output: &mut Vec<StreamRef>,
        ctx: &ExecutionContext,
    ) -> Result<(), RefreshError> {
        // Sources have no parent, so nothing is forwarded
        ctx.progress().set_step(1, 2, "Loading");
        let hits = match self.source {
            SourceKind::File => self.load_file(ctx)?,
            SourceKind::Synthetic => self.generate(ctx)?,
        };

        ctx.progress().set_step(2, 2, "Sampling");
        let hits = self.sample(hits, ctx)?;
        let n = hits.len();
        tracing::debug!("{} produced {} ions", self.base.label(), n);

        let stream = Stream::ions(
            self.base.id(),
            IonStream {
                hits,
                colour: self.colour,
                ion_size: self.ion_size,
                value_label: self.value_label.clone(),
            },
        );
        let stream = self.cache_as_needed(stream, n, ctx);
        output.push(stream);
        Ok(())
    }

    fn properties(&self) -> Vec<FilterProperty> {
        vec![
            FilterProperty::new(
                "source",
                "Source",
                self.source.as_str(),
                "\"file\" or \"synthetic\"",
            ),
            FilterProperty::new(
                "file",
                "File",
                self.path.to_string_lossy().into_owned(),
                "Text file of x y z value records",
            ),
            FilterProperty::new(
                "synthetic_count",
                "Synthetic ions",
                self.synthetic_count as i64,
                "Number of generated ions",
            ),
            FilterProperty::new(
                "max_ions",
                "Max ions",
                self.max_ions as i64,
                "Sample down to this many ions, 0 for all",
            ),
            FilterProperty::new("colour", "Colour", self.colour.to_hex(), "Ion colour"),
            FilterProperty::new("ion_size", "Ion size", self.ion_size as f64, "Point size"),
            FilterProperty::new(
                "value_label",
                "Value label",
                self.value_label.as_str(),
                "Name of the per-ion value",
            ),
            FilterProperty::new(
                "monitor",
                "Watch file",
                self.monitor,
                "Reload when the file changes",
            ),
        ]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError> {
        use PropertyEffect::{Cosmetic, Recompute};
        match key {
            "source" => {
                let s = expect_str(key, value)?;
                let kind = SourceKind::parse(s).ok_or_else(|| {
                    PropertyError::invalid(key, "expected \"file\" or \"synthetic\"")
                })?;
                Ok(update(&mut self.source, kind, Recompute))
            }
            "file" => {
                let path = PathBuf::from(expect_str(key, value)?);
                Ok(update(&mut self.path, path, Recompute))
            }
            "synthetic_count" => {
                let n = expect_count(key, value, 0, MAX_SYNTHETIC_IONS)?;
                Ok(update(&mut self.synthetic_count, n, Recompute))
            }
            "max_ions" => {
                let n = expect_count(key, value, 0, usize::MAX >> 1)?;
                Ok(update(&mut self.max_ions, n, Recompute))
            }
            "colour" => {
                let c = expect_colour(key, value)?;
                Ok(update(&mut self.colour, c, Recompute))
            }
            "ion_size" => {
                let v = expect_float(key, value)?;
                if v <= 0.0 {
                    return Err(PropertyError::invalid(key, "must be positive"));
                }
                Ok(update(&mut self.ion_size, v as f32, Recompute))
            }
            "value_label" => {
                let s = expect_str(key, value)?.to_string();
                Ok(update(&mut self.value_label, s, Recompute))
            }
            "monitor" => {
                let b = expect_bool(key, value)?;
                Ok(update(&mut self.monitor, b, Cosmetic))
            }
            _ => Err(PropertyError::UnknownKey(key.to_string())),
        }
    }

    fn num_bytes_for_cache(&self, n_objects: usize) -> Option<usize> {
        let n = if self.max_ions > 0 {
            n_objects.min(self.max_ions)
        } else {
            n_objects
        };
        Some(n * size_of::<IonHit>())
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::empty()
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::IONS
    }

    fn use_mask(&self) -> StreamMask {
        StreamMask::empty()
    }

    fn is_pure_data_source(&self) -> bool {
        true
    }

    fn monitor_needs_refresh(&self) -> bool {
        if !self.monitor || self.source != SourceKind::File {
            return false;
        }
        let Some(attempted) = self.attempted_mtime else {
            return false;
        };
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map(|now| now != attempted)
            .unwrap_or(false)
    }

    fn specific_error_string(&self, code: ErrorCode) -> &'static str {
        match code {
            DATALOAD_ERR_OPEN => "Unable to open the data file",
            DATALOAD_ERR_PARSE => "The data file contains an unreadable record",
            DATALOAD_ERR_EMPTY => "The data file contains no ions",
            DATALOAD_ERR_NO_FILE => "No data file selected",
            _ => "Unknown data load error",
        }
    }

    fn read_state(&mut self, state: &FilterState, base_dir: &Path) -> Result<(), StateError> {
        state.apply_common(self)?;
        if self.path.is_relative() && !self.path.as_os_str().is_empty() {
            self.path = base_dir.join(&self.path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cache::CacheBudget;
    use crate::pipeline::id::FilterId;
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(CacheBudget::unlimited()))
    }

    fn run(filter: &mut DataLoadFilter) -> Result<Vec<StreamRef>, RefreshError> {
        let mut out = Vec::new();
        filter.refresh(&[], &mut out, &ctx())?;
        Ok(out)
    }

    #[test]
    fn test_synthetic_refresh_with_empty_input() {
        let mut filter = DataLoadFilter::synthetic(100);
        filter.base_mut().set_id(FilterId::new(0, 1));
        let out = run(&mut filter).unwrap();
        assert_eq!(out.len(), 1);
        let ions = out[0].as_ions().unwrap();
        assert_eq!(ions.hits.len(), 100);
        assert_eq!(ions.hits[42].value, 42.0);
        assert_eq!(out[0].parent(), FilterId::new(0, 1));
        assert!(out[0].is_cached());
    }

    #[test]
    fn test_sampling_warns() {
        let mut filter = DataLoadFilter::synthetic(1000);
        filter
            .set_property("max_ions", &PropertyValue::Int(10))
            .unwrap();
        let out = run(&mut filter).unwrap();
        assert_eq!(out[0].as_ions().unwrap().hits.len(), 10);
        let console = filter.base_mut().take_console();
        assert_eq!(console.len(), 1);
        assert!(console[0].contains("kept 10 of 1000"));
    }

    #[test]
    fn test_file_load_and_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ions.txt"), "0 0 0 1\n1 1 1 2\n").unwrap();

        let mut filter = DataLoadFilter::new();
        let mut state = filter.write_state();
        state
            .properties
            .insert("source".into(), PropertyValue::from("file"));
        state
            .properties
            .insert("file".into(), PropertyValue::from("ions.txt"));
        filter.read_state(&state, dir.path()).unwrap();
        assert_eq!(filter.path(), dir.path().join("ions.txt"));

        let out = run(&mut filter).unwrap();
        assert_eq!(out[0].as_ions().unwrap().hits.len(), 2);
    }

    #[test]
    fn test_missing_file_error() {
        let mut filter = DataLoadFilter::from_file("/nonexistent/ionflow/ions.txt");
        assert_eq!(
            run(&mut filter).unwrap_err(),
            RefreshError::Filter(DATALOAD_ERR_OPEN)
        );
        let mut filter = DataLoadFilter::from_file("");
        assert_eq!(
            run(&mut filter).unwrap_err(),
            RefreshError::Filter(DATALOAD_ERR_NO_FILE)
        );
    }

    #[test]
    fn test_monitor_detects_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ions.txt");
        std::fs::write(&path, "0 0 0 1\n").unwrap();

        let mut filter = DataLoadFilter::from_file(&path);
        filter
            .set_property("monitor", &PropertyValue::Bool(true))
            .unwrap();
        assert!(!filter.monitor_needs_refresh());
        run(&mut filter).unwrap();
        assert!(!filter.monitor_needs_refresh());

        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(60))
            .unwrap();
        assert!(filter.monitor_needs_refresh());
    }

    #[test]
    fn test_failed_reload_waits_for_next_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ions.txt");
        std::fs::write(&path, "0 0 0 1\n").unwrap();
        let touch = |secs: u64| {
            let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            file.set_modified(SystemTime::now() + std::time::Duration::from_secs(secs))
                .unwrap();
        };

        let mut filter = DataLoadFilter::from_file(&path);
        filter
            .set_property("monitor", &PropertyValue::Bool(true))
            .unwrap();
        run(&mut filter).unwrap();

        std::fs::write(&path, "garbage\n").unwrap();
        touch(60);
        assert!(filter.monitor_needs_refresh());
        assert_eq!(
            run(&mut filter).unwrap_err(),
            RefreshError::Filter(DATALOAD_ERR_PARSE)
        );
        assert!(!filter.monitor_needs_refresh());

        std::fs::write(&path, "0 0 0 1\n1 1 1 2\n").unwrap();
        touch(120);
        assert!(filter.monitor_needs_refresh());
        assert_eq!(run(&mut filter).unwrap()[0].as_ions().unwrap().hits.len(), 2);
        assert!(!filter.monitor_needs_refresh());
    }

    #[test]
    fn test_invalid_property_leaves_state() {
        let mut filter = DataLoadFilter::new();
        assert!(filter
            .set_property("source", &PropertyValue::from("tape"))
            .is_err());
        assert!(filter
            .set_property("ion_size", &PropertyValue::Float(-1.0))
            .is_err());
        assert!(matches!(
            filter.set_property("nope", &PropertyValue::Bool(true)),
            Err(PropertyError::UnknownKey(_))
        ));
        assert_eq!(filter.source, SourceKind::Synthetic);
        assert_eq!(filter.ion_size, 2.0);
    }

    #[test]
    fn test_abort() {
        let mut filter = DataLoadFilter::synthetic(10);
        let ctx = ctx();
        ctx.abort_flag().request();
        let mut out = Vec::new();
        assert_eq!(
            filter.refresh(&[], &mut out, &ctx),
            Err(RefreshError::Abort)
        );
        assert!(out.is_empty());
    }
}
