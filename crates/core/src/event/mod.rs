// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use serde::{Deserialize, Serialize};

use rill_type::{Key, Value};

/// Type of change carried by a [`ChangeEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOp {
	/// A key appeared in the derived view
	Insert,
	/// An existing key changed its value
	Update,
	/// A key left the derived view
	Delete,
}

/// One observable change to a collection's derived view.
///
/// For an update `previous` carries the replaced value; for a delete `value`
/// carries the removed value so listeners can clean up after it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
	pub op: ChangeOp,
	pub key: Key,
	pub value: Value,
	pub previous: Option<Value>,
}

impl ChangeEvent {
	pub fn insert(key: Key, value: Value) -> Self {
		Self {
			op: ChangeOp::Insert,
			key,
			value,
			previous: None,
		}
	}

	pub fn update(key: Key, value: Value, previous: Value) -> Self {
		Self {
			op: ChangeOp::Update,
			key,
			value,
			previous: Some(previous),
		}
	}

	pub fn delete(key: Key, value: Value) -> Self {
		Self {
			op: ChangeOp::Delete,
			key: key.clone(),
			previous: Some(value.clone()),
			value,
		}
	}

	pub fn is_insert(&self) -> bool {
		self.op == ChangeOp::Insert
	}

	pub fn is_delete(&self) -> bool {
		self.op == ChangeOp::Delete
	}
}
