// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::collections::BTreeMap;

use rill_type::Value;

/// A change-tracked view handed to update callbacks.
///
/// The draft wraps the current immutable item, records every field
/// assignment and produces both the `changes` object (only assigned
/// fields) and the `modified` item (current value with the changes
/// applied). Reads see assigned fields immediately.
pub struct Draft {
	current: Value,
	changes: BTreeMap<String, Value>,
}

impl Draft {
	pub(crate) fn new(current: Value) -> Self {
		Self {
			current,
			changes: BTreeMap::new(),
		}
	}

	pub fn get(&self, field: &str) -> &Value {
		self.changes.get(field).unwrap_or_else(|| self.current.field(field))
	}

	pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
		self.changes.insert(field.into(), value.into());
	}

	/// Record a field removal; the modified item carries it as
	/// `Undefined`.
	pub fn unset(&mut self, field: impl Into<String>) {
		self.changes.insert(field.into(), Value::Undefined);
	}

	pub fn is_dirty(&self) -> bool {
		!self.changes.is_empty()
	}

	/// Only the fields the callback assigned.
	pub(crate) fn changes(&self) -> Value {
		Value::Object(self.changes.clone())
	}

	/// The current item with the recorded assignments applied.
	pub(crate) fn modified(&self) -> Value {
		let mut modified = self.current.clone();
		for (field, value) in &self.changes {
			modified.set_field(field.clone(), value.clone());
		}
		modified
	}
}
