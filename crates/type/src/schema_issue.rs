// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::PropPath;

/// One problem reported by a schema validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIssue {
	pub message: String,
	pub path: Option<PropPath>,
}

impl SchemaIssue {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			path: None,
		}
	}

	pub fn at(message: impl Into<String>, path: impl Into<PropPath>) -> Self {
		Self {
			message: message.into(),
			path: Some(path.into()),
		}
	}
}

impl Display for SchemaIssue {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match &self.path {
			Some(path) => write!(f, "{}: {}", path, self.message),
			None => f.write_str(&self.message),
		}
	}
}
