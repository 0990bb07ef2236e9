// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A field path into a row, e.g. `owner.name`. Most paths are one or two
/// segments deep.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropPath(SmallVec<[String; 2]>);

impl PropPath {
	pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
		Self(segments.into_iter().map(Into::into).collect())
	}

	/// Parse a dotted path: `"owner.name"` becomes `["owner", "name"]`.
	pub fn parse(path: &str) -> Self {
		Self(path.split('.').map(str::to_string).collect())
	}

	pub fn segments(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	pub fn first(&self) -> Option<&str> {
		self.0.first().map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// The path with its first segment stripped, used to unqualify an
	/// aliased reference (`u.name` -> `name`).
	pub fn tail(&self) -> PropPath {
		Self(self.0.iter().skip(1).cloned().collect())
	}

	pub fn prepend(&self, segment: impl Into<String>) -> PropPath {
		let mut segments: SmallVec<[String; 2]> = SmallVec::new();
		segments.push(segment.into());
		segments.extend(self.0.iter().cloned());
		Self(segments)
	}
}

impl Display for PropPath {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		for (idx, segment) in self.0.iter().enumerate() {
			if idx > 0 {
				f.write_str(".")?;
			}
			f.write_str(segment)?;
		}
		Ok(())
	}
}

impl<const N: usize> From<[&str; N]> for PropPath {
	fn from(segments: [&str; N]) -> Self {
		Self::new(segments)
	}
}

impl From<&str> for PropPath {
	fn from(path: &str) -> Self {
		Self::parse(path)
	}
}
