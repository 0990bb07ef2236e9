// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use super::Diagnostic;

pub fn tick_cap_exceeded(ticks: u64, detail: impl Into<String>) -> Diagnostic {
	Diagnostic::new("FLOW_001", format!("dataflow did not settle within {} ticks", ticks))
		.with_help("this indicates a bug in operator ordering or predicate coverage")
		.with_note(detail.into())
}

pub fn unknown_source(alias: &str) -> Diagnostic {
	Diagnostic::new("FLOW_002", format!("pipeline references source alias '{}' with no bound collection", alias))
}
