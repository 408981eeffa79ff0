//! ValueScriptFilter: rewrite one field of every ion with a Rhai expression.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, RefreshError};
use crate::pipeline::filter::{Filter, FilterBase};
use crate::pipeline::filter_type::FilterType;
use crate::pipeline::property::{
    expect_str, FilterProperty, PropertyEffect, PropertyError, PropertyValue,
};
use crate::pipeline::stream::{propagate_streams, Stream, StreamMask, StreamRef};
use crate::scripting::{CompiledExpression, ScriptEngine};
use crate::types::IonHit;
use std::fmt;
use std::mem::size_of;

pub const SCRIPT_ERR_EVAL: ErrorCode = 1;
pub const SCRIPT_ERR_NOT_FINITE: ErrorCode = 2;

/// Which field of the hit receives the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptTarget {
    Value,
    X,
    Y,
    Z,
}

impl ScriptTarget {
    fn as_str(self) -> &'static str {
        match self {
            ScriptTarget::Value => "value",
            ScriptTarget::X => "x",
            ScriptTarget::Y => "y",
            ScriptTarget::Z => "z",
        }
    }

    fn apply(self, hit: &mut IonHit, v: f32) {
        match self {
            ScriptTarget::Value => hit.value = v,
            ScriptTarget::X => hit.pos[0] = v,
            ScriptTarget::Y => hit.pos[1] = v,
            ScriptTarget::Z => hit.pos[2] = v,
        }
    }
}

pub struct ValueScriptFilter {
    base: FilterBase,
    engine: ScriptEngine,
    /// `None` is the identity expression.
    expression: Option<CompiledExpression>,
    target: ScriptTarget,
}

const DEFAULT_EXPRESSION: &str = "value";

impl ValueScriptFilter {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new(FilterType::ValueScript.display_name()),
            engine: ScriptEngine::new(),
            expression: None,
            target: ScriptTarget::Value,
        }
    }

    pub fn expression(&self) -> &str {
        self.expression
            .as_ref()
            .map_or(DEFAULT_EXPRESSION, CompiledExpression::source)
    }

    fn eval(&self, hit: &IonHit) -> crate::error::Result<f64> {
        match &self.expression {
            Some(expr) => self.engine.eval_hit(expr, hit),
            None => Ok(hit.value as f64),
        }
    }
}

impl Default for ValueScriptFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValueScriptFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueScriptFilter")
            .field("label", &self.base.label())
            .field("expression", &self.expression())
            .field("target", &self.target)
            .finish()
    }
}

impl Filter for ValueScriptFilter {
    fn filter_type(&self) -> Option<FilterType> {
        Some(FilterType::ValueScript)
    }

    fn type_name(&self) -> &'static str {
        FilterType::ValueScript.display_name()
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
            engine: ScriptEngine::new(),
            expression: self.expression.clone(),
            target: self.target,
        })
    }

    fn refresh(
        &mut self,
        input: &[StreamRef],
        output: &mut Vec<StreamRef>,
        ctx: &ExecutionContext,
    ) -> Result<(), RefreshError> {
        propagate_streams(input, output, self.block_mask(), true);

        let mut results = Vec::new();
        for ions in input.iter().filter_map(|s| s.as_ions()) {
            let mut hits = Vec::with_capacity(ions.hits.len());
            for hit in ctx.checked(ions.hits.iter()) {
                let mut hit = *hit?;
                let v = match self.eval(&hit) {
                    Ok(v) => v as f32,
                    Err(e) => {
                        self.base.console_message(e.to_string());
                        return Err(RefreshError::Filter(SCRIPT_ERR_EVAL));
                    }
                };
                if !v.is_finite() {
                    return Err(RefreshError::Filter(SCRIPT_ERR_NOT_FINITE));
                }
                self.target.apply(&mut hit, v);
                hits.push(hit);
            }
            results.push(ions.with_hits(hits));
        }

        for ions in results {
            let n = ions.hits.len();
            let stream = self.cache_as_needed(Stream::ions(self.base.id(), ions), n, ctx);
            output.push(stream);
        }
        Ok(())
    }

    fn properties(&self) -> Vec<FilterProperty> {
        vec![
            FilterProperty::new(
                "expression",
                "Expression",
                self.expression(),
                "Rhai expression over x, y, z and value",
            ),
            FilterProperty::new(
                "target",
                "Target",
                self.target.as_str(),
                "Field receiving the result: value, x, y or z",
            ),
        ]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError> {
        match key {
            "expression" => {
                let source = expect_str(key, value)?.trim();
                if source == self.expression() {
                    return Ok(PropertyEffect::Unchanged);
                }
                self.expression = if source == DEFAULT_EXPRESSION {
                    None
                } else {
                    Some(
                        self.engine
                            .compile(source)
                            .map_err(|e| PropertyError::invalid(key, e.to_string()))?,
                    )
                };
                Ok(PropertyEffect::Recompute)
            }
            "target" => {
                let target = match expect_str(key, value)? {
                    "value" => ScriptTarget::Value,
                    "x" => ScriptTarget::X,
                    "y" => ScriptTarget::Y,
                    "z" => ScriptTarget::Z,
                    other => {
                        return Err(PropertyError::invalid(
                            key,
                            format!("unknown target '{other}'"),
                        ))
                    }
                };
                Ok(crate::pipeline::property::update(
                    &mut self.target,
                    target,
                    PropertyEffect::Recompute,
                ))
            }
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

    fn specific_error_string(&self, code: ErrorCode) -> &'static str {
        match code {
            SCRIPT_ERR_EVAL => "Expression evaluation failed",
            SCRIPT_ERR_NOT_FINITE => "Expression produced a non-finite number",
            _ => "Unknown script error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cache::CacheBudget;
    use crate::pipeline::id::FilterId;
    use crate::pipeline::stream::IonStream;
    use std::sync::Arc;

    fn input() -> Vec<StreamRef> {
        let hits = (0..10).map(|i| IonHit::new(i as f32, 0.0, 0.0, 1.0)).collect();
        vec![Arc::new(Stream::ions(
            FilterId::new(0, 0),
            IonStream {
                hits,
                ..Default::default()
            },
        ))]
    }

    fn run(filter: &mut ValueScriptFilter) -> Result<Vec<StreamRef>, RefreshError> {
        let ctx = ExecutionContext::new(Arc::new(CacheBudget::unlimited()));
        let mut out = Vec::new();
        filter.refresh(&input(), &mut out, &ctx)?;
        Ok(out)
    }

    #[test]
    fn test_rewrites_value() {
        let mut filter = ValueScriptFilter::new();
        filter
            .set_property("expression", &"value + x".into())
            .unwrap();
        let out = run(&mut filter).unwrap();
        let hits = &out[0].as_ions().unwrap().hits;
        assert_eq!(hits[3].value, 4.0);
        assert_eq!(hits[3].pos[0], 3.0);
    }

    #[test]
    fn test_rewrites_coordinate() {
        let mut filter = ValueScriptFilter::new();
        filter.set_property("expression", &"x * 2".into()).unwrap();
        filter.set_property("target", &"z".into()).unwrap();
        let out = run(&mut filter).unwrap();
        assert_eq!(out[0].as_ions().unwrap().hits[4].pos[2], 8.0);
    }

    #[test]
    fn test_bad_expression_keeps_old() {
        let mut filter = ValueScriptFilter::new();
        filter.set_property("expression", &"value * 3".into()).unwrap();
        assert!(filter.set_property("expression", &"value *".into()).is_err());
        assert_eq!(filter.expression(), "value * 3");
    }

    #[test]
    fn test_non_finite_result_is_error() {
        let mut filter = ValueScriptFilter::new();
        filter.set_property("expression", &"value / 0.0".into()).unwrap();
        assert_eq!(
            run(&mut filter).unwrap_err(),
            RefreshError::Filter(SCRIPT_ERR_NOT_FINITE)
        );
    }

    #[test]
    fn test_clone_keeps_expression() {
        let mut filter = ValueScriptFilter::new();
        filter.set_property("expression", &"value * 3".into()).unwrap();
        let copy = filter.clone_config();
        let props = copy.properties();
        assert_eq!(props[0].value, PropertyValue::from("value * 3"));
    }
}
