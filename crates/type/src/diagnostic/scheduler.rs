// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use super::Diagnostic;

pub fn unresolved_dependencies(context: &str, jobs: &[String]) -> Diagnostic {
	Diagnostic::new(
		"SCHEDULER_001",
		format!("dependency cycle among jobs in context '{}': [{}]", context, jobs.join(", ")),
	)
}
