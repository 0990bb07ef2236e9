// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::collections::BTreeMap;

use rill_type::{SchemaIssue, Value};

/// Outcome of synchronous schema validation. `Valid` carries the validated
/// (possibly coerced) value.
pub enum Validated {
	Valid(Value),
	Invalid(Vec<SchemaIssue>),
}

/// The single contract a collection consumes from a validation library:
/// validate synchronously, return the value or the issues.
pub trait Schema: Send + Sync {
	fn validate(&self, value: &Value) -> Validated;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldCheck {
	Boolean,
	Int,
	Float,
	Text,
	List,
	Object,
	Any,
}

impl FieldCheck {
	fn admit(&self, value: &Value) -> Option<Value> {
		match (self, value) {
			(FieldCheck::Any, value) => Some(value.clone()),
			(FieldCheck::Boolean, Value::Boolean(_)) => Some(value.clone()),
			(FieldCheck::Int, Value::Int8(_)) => Some(value.clone()),
			(FieldCheck::Float, Value::Float8(_)) => Some(value.clone()),
			// integers coerce into float fields
			(FieldCheck::Float, Value::Int8(int)) => Some(Value::float8(*int as f64)),
			(FieldCheck::Text, Value::Utf8(_)) => Some(value.clone()),
			(FieldCheck::List, Value::List(_)) => Some(value.clone()),
			(FieldCheck::Object, Value::Object(_)) => Some(value.clone()),
			_ => None,
		}
	}

	fn name(&self) -> &'static str {
		match self {
			FieldCheck::Boolean => "boolean",
			FieldCheck::Int => "int",
			FieldCheck::Float => "float",
			FieldCheck::Text => "text",
			FieldCheck::List => "list",
			FieldCheck::Object => "object",
			FieldCheck::Any => "any",
		}
	}
}

/// A field-map schema, enough for tests and simple applications. Real
/// applications plug their validation library in through [`Schema`].
#[derive(Default)]
pub struct FieldSchema {
	fields: BTreeMap<String, (FieldCheck, bool)>,
	reject_unknown: bool,
}

impl FieldSchema {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn field(mut self, name: impl Into<String>, check: FieldCheck) -> Self {
		self.fields.insert(name.into(), (check, false));
		self
	}

	pub fn required(mut self, name: impl Into<String>, check: FieldCheck) -> Self {
		self.fields.insert(name.into(), (check, true));
		self
	}

	pub fn reject_unknown(mut self) -> Self {
		self.reject_unknown = true;
		self
	}
}

impl Schema for FieldSchema {
	fn validate(&self, value: &Value) -> Validated {
		let Some(fields) = value.as_object() else {
			return Validated::Invalid(vec![SchemaIssue::new("expected an object row")]);
		};

		let mut issues = Vec::new();
		let mut validated = BTreeMap::new();

		for (name, (check, required)) in &self.fields {
			match fields.get(name) {
				None | Some(Value::Undefined) => {
					if *required {
						issues.push(SchemaIssue::at("required field is missing", name.as_str()));
					}
				}
				Some(value) => match check.admit(value) {
					Some(value) => {
						validated.insert(name.clone(), value);
					}
					None => issues.push(SchemaIssue::at(format!("expected {}", check.name()), name.as_str())),
				},
			}
		}

		for name in fields.keys() {
			if !self.fields.contains_key(name) {
				if self.reject_unknown {
					issues.push(SchemaIssue::at("unknown field", name.as_str()));
				} else {
					validated.insert(name.clone(), fields[name].clone());
				}
			}
		}

		if issues.is_empty() {
			Validated::Valid(Value::Object(validated))
		} else {
			Validated::Invalid(issues)
		}
	}
}
