// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The unit of data between operators: a keyed row with a multiplicity.
//! `+1` inserts, `-1` retracts; an update is a retraction of the old row
//! followed by an insertion of the new one within the same batch.

use rill_core::{ChangeEvent, ChangeOp};
use rill_type::{Key, Value};

#[derive(Clone, Debug, PartialEq)]
pub struct Delta {
	/// Stable identity of the row inside its stream; composite keys are
	/// encoded as text by the operator that forms them.
	pub key: Key,
	pub row: Value,
	pub mult: i64,
}

impl Delta {
	pub fn insert(key: Key, row: Value) -> Self {
		Self {
			key,
			row,
			mult: 1,
		}
	}

	pub fn retract(key: Key, row: Value) -> Self {
		Self {
			key,
			row,
			mult: -1,
		}
	}

	pub fn scaled(&self, factor: i64) -> Self {
		Self {
			key: self.key.clone(),
			row: self.row.clone(),
			mult: self.mult * factor,
		}
	}
}

/// Translate one collection change event into deltas.
pub fn deltas_from_event(event: &ChangeEvent, wrap: impl Fn(&Value) -> Value) -> Vec<Delta> {
	match event.op {
		ChangeOp::Insert => vec![Delta::insert(event.key.clone(), wrap(&event.value))],
		ChangeOp::Update => {
			let previous = event.previous.as_ref().unwrap_or(&event.value);
			vec![
				Delta::retract(event.key.clone(), wrap(previous)),
				Delta::insert(event.key.clone(), wrap(&event.value)),
			]
		}
		ChangeOp::Delete => vec![Delta::retract(event.key.clone(), wrap(&event.value))],
	}
}

/// Join two row identities into one composite identity.
pub fn composite_key(left: &Key, right: Option<&Key>) -> Key {
	match right {
		Some(right) => Key::Utf8(format!("{}\u{1f}{}", left, right)),
		None => Key::Utf8(format!("{}\u{1f}", left)),
	}
}
