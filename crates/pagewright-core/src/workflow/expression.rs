//! Sandboxed JEXL evaluation for route values, transform nodes, and loop
//! exit conditions.
//!
//! Expressions only ever see the context object; nothing is interpolated
//! into the expression string, and the evaluator has no host access, so a
//! hostile workflow document cannot reach outside the run state.

use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression `{expression}` failed to evaluate: {reason}")]
    EvalFailed { expression: String, reason: String },

    #[error("expression context must be a JSON object")]
    InvalidContext,
}

// ---------------------------------------------------------------------------
// ExpressionEngine
// ---------------------------------------------------------------------------

fn arg_str(args: &[Value], index: usize) -> &str {
    args.get(index).and_then(|v| v.as_str()).unwrap_or("")
}

/// JEXL evaluator with the standard transform set registered.
///
/// Used by route nodes (`value` expressions), transform nodes
/// (`expression`), and iterators (`exitWhen`).
pub struct ExpressionEngine {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ExpressionEngine {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                Ok(json!(arg_str(args, 0).to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                Ok(json!(arg_str(args, 0).to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| Ok(json!(arg_str(args, 0).trim())))
            .with_transform("contains", |args: &[Value]| {
                Ok(json!(arg_str(args, 0).contains(arg_str(args, 1))))
            })
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(arg_str(args, 0).starts_with(arg_str(args, 1))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(arg_str(args, 0).ends_with(arg_str(args, 1))))
            })
            .with_transform("split", |args: &[Value]| {
                let parts: Vec<&str> = arg_str(args, 0)
                    .split(args.get(1).and_then(|v| v.as_str()).unwrap_or(","))
                    .collect();
                Ok(json!(parts))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!truthiness(&val)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.len(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate to a raw JSON value. Route `value` fields and transform
    /// expressions go through here.
    pub fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext);
        }
        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed {
                expression: expression.to_string(),
                reason: e.to_string(),
            })
    }

    /// Evaluate and coerce to a boolean. Loop exit conditions are required
    /// to be explicitly boolean-valued; everything else coerces by
    /// truthiness.
    pub fn evaluate_bool(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<bool, ExpressionError> {
        Ok(truthiness(&self.evaluate(expression, context)?))
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// JavaScript-like truthiness for route coercion and exit conditions.
pub fn truthiness(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
