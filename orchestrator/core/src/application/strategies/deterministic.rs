// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Deterministic Strategy
//
// Pure, in-process evaluation of a task payload. No I/O, so every attempt is
// safe to repeat. Evaluation errors are permanent: the same payload will fail
// the same way on retry.
//
// Payload shape understood by the built-in evaluator:
//   { "op": "sum" | "product" | "max" | "min" | "concat" | "echo", "args": [...] }
// `echo` returns `value` when present, otherwise `args`.

use async_trait::async_trait;
use serde_json::{json, Number, Value};
use std::sync::Arc;

use crate::domain::strategy::{
    ResourceUsage, StrategyContext, StrategyExecutor, StrategyKind, StrategyResult,
};
use crate::domain::task::{ExecutionTask, TaskFeatures};

pub trait Evaluator: Send + Sync {
    fn evaluate(&self, payload: &Value) -> Result<Value, String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinEvaluator;

impl BuiltinEvaluator {
    fn numbers(args: &[Value]) -> Result<Vec<Number>, String> {
        args.iter()
            .map(|v| match v {
                Value::Number(n) => Ok(n.clone()),
                other => Err(format!("expected a number, got {}", other)),
            })
            .collect()
    }

    fn fold(
        args: &[Value],
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
        identity: Option<i64>,
    ) -> Result<Value, String> {
        let numbers = Self::numbers(args)?;
        if numbers.is_empty() {
            return identity
                .map(|i| json!(i))
                .ok_or_else(|| "operation needs at least one argument".to_string());
        }

        // Stay in integers while every operand is one and nothing overflows.
        let ints: Option<Vec<i64>> = numbers.iter().map(Number::as_i64).collect();
        if let Some(ints) = ints {
            let folded = ints[1..]
                .iter()
                .try_fold(ints[0], |acc, n| int_op(acc, *n));
            if let Some(result) = folded {
                return Ok(json!(result));
            }
        }

        let floats: Vec<f64> = numbers.iter().filter_map(Number::as_f64).collect();
        let result = floats[1..].iter().fold(floats[0], |acc, n| float_op(acc, *n));
        Number::from_f64(result)
            .map(Value::Number)
            .ok_or_else(|| "result is not a finite number".to_string())
    }
}

impl Evaluator for BuiltinEvaluator {
    fn evaluate(&self, payload: &Value) -> Result<Value, String> {
        let op = payload
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| "payload has no 'op' field".to_string())?;
        let empty = Vec::new();
        let args = match payload.get("args") {
            Some(Value::Array(args)) => args,
            Some(other) => return Err(format!("'args' must be an array, got {}", other)),
            None => &empty,
        };

        match op {
            "echo" => Ok(payload
                .get("value")
                .cloned()
                .unwrap_or_else(|| Value::Array(args.clone()))),
            "sum" => Self::fold(args, i64::checked_add, |a, b| a + b, Some(0)),
            "product" => Self::fold(args, i64::checked_mul, |a, b| a * b, Some(1)),
            "max" => Self::fold(args, |a, b| Some(a.max(b)), f64::max, None),
            "min" => Self::fold(args, |a, b| Some(a.min(b)), f64::min, None),
            "concat" => Ok(Value::String(
                args.iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            )),
            other => Err(format!("unsupported operation '{}'", other)),
        }
    }
}

pub struct DeterministicStrategy {
    evaluator: Arc<dyn Evaluator>,
}

impl DeterministicStrategy {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }
}

impl Default for DeterministicStrategy {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinEvaluator))
    }
}

#[async_trait]
impl StrategyExecutor for DeterministicStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Deterministic
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn supports(&self, features: &TaskFeatures) -> bool {
        !features.external_io && !features.multi_turn
    }

    async fn execute(&self, task: &ExecutionTask, _context: &mut StrategyContext) -> StrategyResult {
        let usage = ResourceUsage {
            external_calls: 0,
            units: 1,
        };
        match self.evaluator.evaluate(&task.payload) {
            Ok(output) => StrategyResult::success(output).with_usage(usage),
            Err(message) => StrategyResult::permanent(message).with_usage(usage),
        }
    }
}
