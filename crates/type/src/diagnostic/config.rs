// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use super::Diagnostic;

pub fn unknown_option(name: &str, suggestion: Option<&str>) -> Diagnostic {
	let diagnostic = Diagnostic::new("CONFIG_001", format!("unknown configuration option '{}'", name));
	match suggestion {
		Some(candidate) => diagnostic.with_help(format!("did you mean '{}'?", candidate)),
		None => diagnostic,
	}
}

pub fn invalid_option(name: &str, reason: impl Into<String>) -> Diagnostic {
	Diagnostic::new("CONFIG_002", format!("invalid configuration option '{}': {}", name, reason.into()))
}

pub fn missing_option(name: &str) -> Diagnostic {
	Diagnostic::new("CONFIG_003", format!("required configuration option '{}' is missing", name))
}
