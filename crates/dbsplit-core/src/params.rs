//! Bound query parameters.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared type of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    Null,
    Int,
    Str,
    Bool,
    IntArray,
    StrArray,
}

impl ParamType {
    /// Best guess for a value bound without an explicit type.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => ParamType::Null,
            Value::Bool(_) => ParamType::Bool,
            Value::Int(_) => ParamType::Int,
            Value::Float(_) | Value::String(_) => ParamType::Str,
            Value::List(items) if items.iter().all(|v| matches!(v, Value::Int(_))) => {
                ParamType::IntArray
            }
            Value::List(_) => ParamType::StrArray,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ParamType::IntArray | ParamType::StrArray)
    }
}

/// A value bound to a placeholder together with its declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundParam {
    pub value: Value,
    pub ty: ParamType,
}

/// Named and positional parameters of one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    named: BTreeMap<String, BoundParam>,
    positional: Vec<BoundParam>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds (or rebinds) a named parameter.
    pub fn set_named(&mut self, name: impl Into<String>, value: Value, ty: ParamType) {
        self.named.insert(name.into(), BoundParam { value, ty });
    }

    /// Appends a positional parameter and returns its index.
    pub fn push_positional(&mut self, value: Value, ty: ParamType) -> usize {
        self.positional.push(BoundParam { value, ty });
        self.positional.len() - 1
    }

    pub fn named(&self, name: &str) -> Option<&BoundParam> {
        self.named.get(name.trim_start_matches(':'))
    }

    pub fn positional(&self, index: usize) -> Option<&BoundParam> {
        self.positional.get(index)
    }

    /// Value of a named parameter.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.named(name).map(|p| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name.trim_start_matches(':'))
    }

    pub fn has_positional(&self) -> bool {
        !self.positional.is_empty()
    }

    /// Iterates named parameters in name order.
    pub fn iter_named(&self) -> impl Iterator<Item = (&str, &BoundParam)> {
        self.named.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_positional(&self) -> impl Iterator<Item = &BoundParam> {
        self.positional.iter()
    }

    pub fn len(&self) -> usize {
        self.named.len() + self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty() && self.positional.is_empty()
    }

    /// Returns the first `dcValue{n}` name (n >= `start`) that is not bound yet.
    pub fn unused_name(&self, start: usize) -> (String, usize) {
        let mut n = start.max(1);
        loop {
            let name = format!("dcValue{}", n);
            if !self.named.contains_key(&name) {
                return (name, n);
            }
            n += 1;
        }
    }
}
