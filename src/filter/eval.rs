use super::ast::{CompareOp, Filter};
use crate::record::{AttrValue, Record};

pub fn evaluate(filter: &Filter, record: &Record) -> bool {
    match filter {
        Filter::And(children) => children.iter().all(|child| evaluate(child, record)),
        Filter::Or(children) => children.iter().any(|child| evaluate(child, record)),
        Filter::Not(child) => !evaluate(child, record),
        Filter::Presence { attr } => eval_presence(record, attr),
        Filter::Substring { attr, pattern } => eval_substring(record, attr, pattern),
        Filter::Compare { attr, op, value } => eval_compare(record, attr, *op, *value),
        Filter::Equality { attr, value } => eval_equality(record, attr, value),
    }
}

fn eval_presence(record: &Record, attr: &str) -> bool {
    record.lookup(attr).is_some_and(AttrValue::is_truthy)
}

fn eval_substring(record: &Record, attr: &str, pattern: &str) -> bool {
    let Some(value) = record.lookup(attr) else {
        return false;
    };
    value.as_text().to_lowercase().contains(pattern)
}

fn eval_compare(record: &Record, attr: &str, op: CompareOp, value: Option<i64>) -> bool {
    try_eval_compare(record, attr, op, value).unwrap_or(false)
}

fn try_eval_compare(record: &Record, attr: &str, op: CompareOp, value: Option<i64>) -> Option<bool> {
    let right = value?;
    let left = record.lookup(attr)?.as_int()?;
    Some(op.apply(left, right))
}

fn eval_equality(record: &Record, attr: &str, expected: &str) -> bool {
    let Some(value) = record.lookup(attr) else {
        return false;
    };

    let expected = expected.to_lowercase();

    if let AttrValue::Multi(items) = value {
        return items.iter().any(|item| item.to_lowercase() == expected);
    }

    value.as_text().to_lowercase() == expected
}
