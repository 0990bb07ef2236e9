// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use super::Diagnostic;
use crate::SchemaIssue;

pub fn validation_failed(operation: &str, issues: &[SchemaIssue]) -> Diagnostic {
	let mut diagnostic =
		Diagnostic::new("SCHEMA_001", format!("{} failed schema validation with {} issue(s)", operation, issues.len()));
	for issue in issues {
		diagnostic = diagnostic.with_note(issue.to_string());
	}
	diagnostic
}
