//! Typed run-condition expressions.
//!
//! Conditions are a small expression tree evaluated against typed run
//! state (trigger kind, git ref, matrix assignment) rather than
//! interpolated strings, so a malformed expression is a parse error, not
//! a silently-false guard.

use crate::patterns::glob_match;
use crate::workflow::TriggerKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Always,
    /// The triggering ref matches a glob pattern, e.g. `refs/tags/*`.
    RefMatches { pattern: String },
    /// The current instance's matrix assignment binds `key` to `value`.
    MatrixEquals { key: String, value: String },
    EventIs { event: TriggerKind },
    Not { inner: Box<Condition> },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
}

/// Observable state a condition is evaluated against.
#[derive(Debug, Clone)]
pub struct ConditionContext<'a> {
    pub event: TriggerKind,
    pub git_ref: &'a str,
    pub matrix: &'a HashMap<String, String>,
}

impl Condition {
    pub fn evaluate(&self, ctx: &ConditionContext<'_>) -> bool {
        match self {
            Condition::Always => true,
            Condition::RefMatches { pattern } => glob_match(pattern, ctx.git_ref),
            Condition::MatrixEquals { key, value } => {
                ctx.matrix.get(key).is_some_and(|v| v == value)
            }
            Condition::EventIs { event } => ctx.event == *event,
            Condition::Not { inner } => !inner.evaluate(ctx),
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(ctx)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(ctx)),
        }
    }
}
