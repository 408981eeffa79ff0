//! Per-type templates for newly created filters.
//!
//! A template is the persisted state of a filter the user configured and
//! marked as "default". Filters that can run external code are never
//! captured, and templates for such types found in a hand-edited config are
//! ignored.

use crate::pipeline::error::HazardousCloneRefused;
use crate::pipeline::filter::Filter;
use crate::pipeline::filter_type::{FilterFactory, FilterType};
use crate::pipeline::state::FilterState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefaultsError {
    #[error(transparent)]
    Hazardous(#[from] HazardousCloneRefused),

    #[error("'{0}' is not a built-in filter")]
    NotBuiltIn(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterDefaults {
    templates: BTreeMap<FilterType, FilterState>,
}

impl FilterDefaults {
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn get(&self, filter_type: FilterType) -> Option<&FilterState> {
        self.templates.get(&filter_type)
    }

    /// Make `filter`'s configuration the template for its type.
    pub fn capture(&mut self, filter: &dyn Filter) -> Result<FilterType, DefaultsError> {
        let copy = filter.clone_uncached()?;
        let filter_type = copy
            .filter_type()
            .ok_or(DefaultsError::NotBuiltIn(copy.type_name()))?;
        let mut state = copy.write_state();
        // The label of a template would make every new filter look the same
        state.label.clear();
        self.templates.insert(filter_type, state);
        tracing::debug!("Captured default template for {}", filter_type);
        Ok(filter_type)
    }

    pub fn remove(&mut self, filter_type: FilterType) -> Option<FilterState> {
        self.templates.remove(&filter_type)
    }

    /// A new filter of `filter_type` with its template applied, if any.
    ///
    /// A template that no longer applies cleanly is skipped with a warning.
    pub fn create(&self, filter_type: FilterType) -> Box<dyn Filter> {
        let mut filter = FilterFactory::create(filter_type);
        let Some(template) = self.templates.get(&filter_type) else {
            return filter;
        };
        if filter_type.is_hazardous() {
            tracing::warn!("Ignoring default template for hazardous type {}", filter_type);
            return filter;
        }
        if let Err(e) = filter.read_state(template, Path::new(".")) {
            tracing::warn!("Default template for {} not applied: {}", filter_type, e);
            return FilterFactory::create(filter_type);
        }
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::filters::{ExternalProgramFilter, SpectrumPlotFilter};
    use crate::pipeline::property::PropertyValue;

    fn bin_width(filter: &dyn Filter) -> PropertyValue {
        filter
            .properties()
            .into_iter()
            .find(|p| p.key == "bin_width")
            .map(|p| p.value)
            .unwrap()
    }

    #[test]
    fn test_capture_and_create() {
        let mut spectrum = SpectrumPlotFilter::new();
        spectrum
            .set_property("bin_width", &PropertyValue::Float(0.25))
            .unwrap();
        spectrum.set_label("My spectrum");

        let mut defaults = FilterDefaults::default();
        assert_eq!(defaults.capture(&spectrum).unwrap(), FilterType::SpectrumPlot);

        let created = defaults.create(FilterType::SpectrumPlot);
        assert_eq!(bin_width(created.as_ref()), PropertyValue::Float(0.25));
        assert_eq!(created.label(), FilterType::SpectrumPlot.display_name());
    }

    #[test]
    fn test_hazardous_refused() {
        let mut defaults = FilterDefaults::default();
        let err = defaults
            .capture(&ExternalProgramFilter::with_command("true"))
            .unwrap_err();
        assert!(matches!(err, DefaultsError::Hazardous(_)));
        assert!(defaults.is_empty());
    }

    #[test]
    fn test_toml_shape() {
        let mut defaults = FilterDefaults::default();
        defaults.capture(&SpectrumPlotFilter::new()).unwrap();

        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            defaults: FilterDefaults,
        }
        let text = toml::to_string(&Wrapper { defaults }).unwrap();
        assert!(text.contains("[defaults.SpectrumPlot"));
        let back: Wrapper = toml::from_str(&text).unwrap();
        assert_eq!(back.defaults.len(), 1);
    }
}
