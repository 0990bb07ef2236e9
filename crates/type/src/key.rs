// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::Value;

/// A collection key: integer or text, totally ordered (integers before
/// texts).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
	Int8(i64),
	Utf8(String),
}

impl Key {
	/// Derive a key from a scalar value. Objects, lists, floats and
	/// undefined make no valid key.
	pub fn from_value(value: &Value) -> Option<Key> {
		match value {
			Value::Int8(value) => Some(Key::Int8(*value)),
			Value::Utf8(value) => Some(Key::Utf8(value.clone())),
			_ => None,
		}
	}
}

impl Display for Key {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Key::Int8(value) => Display::fmt(value, f),
			Key::Utf8(value) => Display::fmt(value, f),
		}
	}
}

impl From<i64> for Key {
	fn from(value: i64) -> Self {
		Key::Int8(value)
	}
}

impl From<i32> for Key {
	fn from(value: i32) -> Self {
		Key::Int8(value as i64)
	}
}

impl From<&str> for Key {
	fn from(value: &str) -> Self {
		Key::Utf8(value.to_string())
	}
}

impl From<String> for Key {
	fn from(value: String) -> Self {
		Key::Utf8(value)
	}
}
