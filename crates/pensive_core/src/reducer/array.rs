//! Ordered-set reducer for link fields.
//!
//! Each raw value is one encoded op (`"+id"`, `"-id"`, `">id"`, `"<id"`) or
//! an array of ops applied left to right against the running result.
//!
//! This is not a CRDT. Two stores that add and remove the same target
//! concurrently can fold to different orders depending on merge order.

use super::Reducer;
use crate::model::Value;

/// Folds link ops into an ordered list of unique targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrayReducer;

impl Reducer for ArrayReducer {
    fn reduce(&self, current: Value, next: &Value) -> Value {
        match next {
            Value::Array(ops) => ops.iter().fold(current, |running, op| self.reduce(running, op)),
            Value::String(op) => apply_op(current, op),
            _ => current,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkOp {
    Add,
    Remove,
    MoveLater,
    MoveEarlier,
}

fn parse_op(encoded: &str) -> Option<(LinkOp, &str)> {
    let mut chars = encoded.chars();
    let op = match chars.next()? {
        '+' => LinkOp::Add,
        '-' => LinkOp::Remove,
        '>' => LinkOp::MoveLater,
        '<' => LinkOp::MoveEarlier,
        _ => return None,
    };
    Some((op, chars.as_str()))
}

fn apply_op(current: Value, encoded: &str) -> Value {
    let Some((op, target)) = parse_op(encoded) else {
        return current;
    };

    let mut items = match current {
        Value::Array(items) => items,
        _ => Vec::new(),
    };
    let position = items.iter().position(|item| item.as_str() == Some(target));

    match (op, position) {
        (LinkOp::Add, None) => items.push(Value::String(target.to_string())),
        (LinkOp::Remove, Some(_)) => {
            items.retain(|item| item.as_str() != Some(target));
            if items.is_empty() {
                return Value::Null;
            }
        }
        (LinkOp::MoveLater, Some(index)) if index + 1 < items.len() => {
            items.swap(index, index + 1);
        }
        (LinkOp::MoveEarlier, Some(index)) if index > 0 => {
            items.swap(index - 1, index);
        }
        _ => {}
    }
    Value::Array(items)
}
