// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use super::Diagnostic;

pub fn unavailable(reason: impl Into<String>) -> Diagnostic {
	Diagnostic::new("STORAGE_001", format!("storage is unavailable: {}", reason.into()))
}

pub fn serialization(reason: impl Into<String>) -> Diagnostic {
	Diagnostic::new("STORAGE_002", format!("could not serialize storage payload: {}", reason.into()))
}

pub fn invalid_format(key: &str) -> Diagnostic {
	Diagnostic::new("STORAGE_003", format!("stored payload under '{}' has an invalid format", key))
}
