// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use super::Diagnostic;

pub fn limit_requires_order_by() -> Diagnostic {
	Diagnostic::new("QUERY_001", "limit requires a non-empty order_by")
		.with_help("an unordered window has no deterministic contents")
}

pub fn offset_requires_order_by() -> Diagnostic {
	Diagnostic::new("QUERY_002", "offset requires a non-empty order_by")
}

pub fn having_requires_group_by() -> Diagnostic {
	Diagnostic::new("QUERY_003", "having requires a group_by clause")
}

pub fn misplaced_aggregate(name: &str) -> Diagnostic {
	Diagnostic::new("QUERY_004", format!("aggregate '{}' is only allowed in select or having over a grouped query", name))
}

pub fn unknown_function(name: &str) -> Diagnostic {
	Diagnostic::new("QUERY_005", format!("unknown scalar function '{}'", name))
}

pub fn duplicate_alias(alias: &str) -> Diagnostic {
	Diagnostic::new("QUERY_006", format!("source alias '{}' is used more than once", alias))
}

pub fn unknown_alias(alias: &str) -> Diagnostic {
	Diagnostic::new("QUERY_007", format!("expression references alias '{}' which is not a source", alias))
}

pub fn unsupported_join_predicate(alias: &str) -> Diagnostic {
	Diagnostic::new(
		"QUERY_008",
		format!("join on '{}' must be a conjunction of equalities between the two sides", alias),
	)
}
