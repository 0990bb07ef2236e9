// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use crate::diagnostic::Diagnostic;

/// The workspace error: a thin wrapper around a [`Diagnostic`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Error(pub Diagnostic);

impl Error {
	pub fn diagnostic(&self) -> &Diagnostic {
		&self.0
	}

	pub fn code(&self) -> &'static str {
		self.0.code
	}
}

/// Wrap a [`Diagnostic`] into an [`Error`].
///
/// ```
/// use rill_type::{error, internal, Error};
///
/// let err: Error = error!(internal!("unreachable state"));
/// assert_eq!(err.code(), "INTERNAL_001");
/// ```
#[macro_export]
macro_rules! error {
	($diagnostic:expr) => {
		$crate::Error($diagnostic)
	};
}
