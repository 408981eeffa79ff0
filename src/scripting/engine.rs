//! Rhai engine configured for per-ion expressions.

use crate::error::{EngineError, Result};
use crate::types::IonHit;
use rhai::{Dynamic, Engine, Scope, AST};

/// A compiled expression together with its source text.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    ast: AST,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Sandboxed Rhai engine with ion variables and maths helpers.
pub struct ScriptEngine {
    engine: Engine,
}

impl ScriptEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self { engine }
    }

    fn configure_engine(engine: &mut Engine) {
        // Safety limits: expressions run once per ion
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(16);
        engine.set_max_operations(10_000);
        engine.set_max_string_size(1_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(100);

        engine.register_fn("clamp", |x: f64, lo: f64, hi: f64| x.max(lo).min(hi));
        engine.register_fn("lerp", |a: f64, b: f64, t: f64| a + (b - a) * t);
        engine.register_fn(
            "map_range",
            |x: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64| {
                (x - in_lo) * (out_hi - out_lo) / (in_hi - in_lo) + out_lo
            },
        );
        engine.register_fn("dist", |x: f64, y: f64, z: f64| {
            (x * x + y * y + z * z).sqrt()
        });
        engine.register_fn("sign", |x: f64| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        });
        engine.register_fn("pi", || std::f64::consts::PI);
        engine.register_fn("e", || std::f64::consts::E);
    }

    /// Compile `source`, reporting syntax errors without evaluating anything.
    pub fn compile(&self, source: &str) -> Result<CompiledExpression> {
        let ast = self
            .engine
            .compile_expression(source)
            .map_err(|e| EngineError::Script(format!("Compile error: {e}")))?;
        Ok(CompiledExpression {
            source: source.to_string(),
            ast,
        })
    }

    /// Evaluate `expr` for one hit. Integers widen to floats.
    pub fn eval_hit(&self, expr: &CompiledExpression, hit: &IonHit) -> Result<f64> {
        let mut scope = Scope::new();
        scope.push("x", hit.pos[0] as f64);
        scope.push("y", hit.pos[1] as f64);
        scope.push("z", hit.pos[2] as f64);
        scope.push("value", hit.value as f64);

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &expr.ast)
            .map_err(EngineError::from_rhai_error)?;

        if let Ok(f) = result.as_float() {
            Ok(f)
        } else if let Ok(i) = result.as_int() {
            Ok(i as f64)
        } else {
            Err(EngineError::Script(format!(
                "Expression must return a number, got {}",
                result.type_name()
            )))
        }
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, hit: IonHit) -> Result<f64> {
        let engine = ScriptEngine::new();
        let expr = engine.compile(source)?;
        engine.eval_hit(&expr, &hit)
    }

    #[test]
    fn test_variables() {
        let hit = IonHit::new(1.0, 2.0, 2.0, 10.0);
        assert_eq!(eval("value * 2.0", hit).unwrap(), 20.0);
        assert_eq!(eval("x + y + z", hit).unwrap(), 5.0);
        assert_eq!(eval("dist(x, y, z)", hit).unwrap(), 3.0);
    }

    #[test]
    fn test_integer_result_widens() {
        assert_eq!(eval("42", IonHit::default()).unwrap(), 42.0);
    }

    #[test]
    fn test_helpers() {
        let hit = IonHit::new(0.0, 0.0, 0.0, 5.0);
        assert_eq!(eval("clamp(value, 0.0, 1.0)", hit).unwrap(), 1.0);
        assert_eq!(eval("lerp(0.0, 10.0, 0.25)", hit).unwrap(), 2.5);
        assert_eq!(eval("map_range(value, 0.0, 10.0, 0.0, 1.0)", hit).unwrap(), 0.5);
        assert_eq!(eval("sign(-value)", hit).unwrap(), -1.0);
        assert!((eval("pi()", hit).unwrap() - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn test_compile_error() {
        let engine = ScriptEngine::new();
        assert!(matches!(engine.compile("value +"), Err(EngineError::Script(_))));
        // Statements are not expressions
        assert!(engine.compile("let a = 1; a").is_err());
    }

    #[test]
    fn test_non_numeric_result() {
        assert!(eval("\"text\"", IonHit::default()).is_err());
        assert!(eval("undefined_var", IonHit::default()).is_err());
    }
}
