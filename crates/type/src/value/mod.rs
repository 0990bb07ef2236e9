// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

pub use float::OrderedF64;

mod float;
mod ordering;

use std::{
	collections::BTreeMap,
	fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};

use crate::PropPath;

/// A rill value, represented as a native Rust type.
///
/// Collections hold `Value::Object` rows; every other variant appears as a
/// field inside a row, as an index key or as a scalar produced by the query
/// evaluator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
	/// Value is not defined (think null in common programming languages)
	Undefined,
	/// A boolean: true or false.
	Boolean(bool),
	/// An 8-byte signed integer
	Int8(i64),
	/// An 8-byte floating point number with a total order
	Float8(OrderedF64),
	/// A UTF-8 encoded text.
	Utf8(String),
	/// An ordered list of values.
	List(Vec<Value>),
	/// A field-keyed record.
	Object(BTreeMap<String, Value>),
}

impl Value {
	pub fn boolean(value: bool) -> Self {
		Value::Boolean(value)
	}

	pub fn int8(value: impl Into<i64>) -> Self {
		Value::Int8(value.into())
	}

	pub fn float8(value: f64) -> Self {
		Value::Float8(OrderedF64::new(value))
	}

	pub fn utf8(value: impl Into<String>) -> Self {
		Value::Utf8(value.into())
	}

	pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
		Value::List(values.into_iter().collect())
	}

	pub fn object<S: Into<String>>(fields: impl IntoIterator<Item = (S, Value)>) -> Self {
		Value::Object(fields.into_iter().map(|(name, value)| (name.into(), value)).collect())
	}

	pub fn is_undefined(&self) -> bool {
		matches!(self, Value::Undefined)
	}

	pub fn as_boolean(&self) -> Option<bool> {
		match self {
			Value::Boolean(value) => Some(*value),
			_ => None,
		}
	}

	pub fn as_int8(&self) -> Option<i64> {
		match self {
			Value::Int8(value) => Some(*value),
			_ => None,
		}
	}

	pub fn as_float8(&self) -> Option<f64> {
		match self {
			Value::Float8(value) => Some(value.value()),
			Value::Int8(value) => Some(*value as f64),
			_ => None,
		}
	}

	pub fn as_utf8(&self) -> Option<&str> {
		match self {
			Value::Utf8(value) => Some(value),
			_ => None,
		}
	}

	pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
		match self {
			Value::Object(fields) => Some(fields),
			_ => None,
		}
	}

	pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
		match self {
			Value::Object(fields) => Some(fields),
			_ => None,
		}
	}

	/// Truthiness used by compiled predicates: only `Boolean(true)` passes.
	pub fn is_truthy(&self) -> bool {
		matches!(self, Value::Boolean(true))
	}

	/// Look up a field, yielding `Undefined` for anything that is not an
	/// object or does not carry the field.
	pub fn field(&self, name: &str) -> &Value {
		match self {
			Value::Object(fields) => fields.get(name).unwrap_or(&Value::Undefined),
			_ => &Value::Undefined,
		}
	}

	/// Walk a property path. Missing segments resolve to `Undefined`.
	pub fn at(&self, path: &PropPath) -> &Value {
		let mut current = self;
		for segment in path.segments() {
			current = current.field(segment);
		}
		current
	}

	/// Shallow object merge: fields of `patch` replace fields of `self`.
	/// A non-object on either side replaces `self` with `patch` wholesale.
	pub fn merge(&mut self, patch: &Value) {
		match (self.as_object_mut(), patch.as_object()) {
			(Some(target), Some(fields)) => {
				for (name, value) in fields {
					target.insert(name.clone(), value.clone());
				}
			}
			_ => *self = patch.clone(),
		}
	}

	/// Set a field on an object value, turning any other variant into a
	/// fresh single-field object.
	pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
		match self {
			Value::Object(fields) => {
				fields.insert(name.into(), value);
			}
			_ => {
				let mut fields = BTreeMap::new();
				fields.insert(name.into(), value);
				*self = Value::Object(fields);
			}
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Value::Undefined => f.write_str("undefined"),
			Value::Boolean(true) => f.write_str("true"),
			Value::Boolean(false) => f.write_str("false"),
			Value::Int8(value) => Display::fmt(value, f),
			Value::Float8(value) => Display::fmt(value, f),
			Value::Utf8(value) => Display::fmt(value, f),
			Value::List(values) => {
				f.write_str("[")?;
				for (idx, value) in values.iter().enumerate() {
					if idx > 0 {
						f.write_str(", ")?;
					}
					Display::fmt(value, f)?;
				}
				f.write_str("]")
			}
			Value::Object(fields) => {
				f.write_str("{ ")?;
				for (idx, (name, value)) in fields.iter().enumerate() {
					if idx > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{}: {}", name, value)?;
				}
				f.write_str(" }")
			}
		}
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Boolean(value)
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Value::Int8(value as i64)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Value::Int8(value)
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Value::float8(value)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::Utf8(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::Utf8(value)
	}
}

impl From<crate::Key> for Value {
	fn from(key: crate::Key) -> Self {
		match key {
			crate::Key::Int8(value) => Value::Int8(value),
			crate::Key::Utf8(value) => Value::Utf8(value),
		}
	}
}

/// Build a `Value::Object` from field/value pairs.
///
/// ```
/// use rill_type::{Value, object};
///
/// let row = object! { id: 1, title: "rewire the relay" };
/// assert_eq!(row.field("id"), &Value::Int8(1));
/// ```
#[macro_export]
macro_rules! object {
	($($field:ident: $value:expr),* $(,)?) => {{
		#[allow(unused_mut)]
		let mut fields = std::collections::BTreeMap::new();
		$(fields.insert(stringify!($field).to_string(), $crate::Value::from($value));)*
		$crate::Value::Object(fields)
	}};
}
