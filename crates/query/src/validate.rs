// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::collections::HashSet;

use rill_type::{diagnostic::query, error};

use crate::{Expression, Query, Result, Source};

/// Structural validation of a query before it is handed to the compiler.
pub fn validate(query: &Query) -> Result<()> {
	if query.take.is_some() && query.sort.is_empty() && !query.find_one {
		return Err(error!(query::limit_requires_order_by()));
	}
	if query.skip.is_some() && query.sort.is_empty() {
		return Err(error!(query::offset_requires_order_by()));
	}
	if query.having.is_some() && query.group_by.is_empty() {
		return Err(error!(query::having_requires_group_by()));
	}

	let mut aliases = HashSet::new();
	for alias in query.aliases() {
		if !aliases.insert(alias) {
			return Err(error!(query::duplicate_alias(alias)));
		}
	}

	// aggregates may only appear in map or having, and having only makes
	// sense over a grouped stream (checked above)
	if let Some(filter) = &query.filter {
		reject_aggregates(filter)?;
	}
	for key in &query.sort {
		reject_aggregates(&key.expr)?;
	}
	for join in &query.joins {
		reject_aggregates(&join.on)?;
	}
	for group in &query.group_by {
		reject_aggregates(group)?;
	}

	// nested sources were built through the same door, but a handwritten
	// IR can smuggle anything; walk them anyway
	if let Source::Subquery(inner) = &query.from.source {
		validate(inner)?;
	}
	for join in &query.joins {
		if let Source::Subquery(inner) = &join.source {
			validate(inner)?;
		}
	}

	Ok(())
}

fn reject_aggregates(expr: &Expression) -> Result<()> {
	if let Some(name) = first_aggregate(expr) {
		return Err(error!(query::misplaced_aggregate(name)));
	}
	Ok(())
}

fn first_aggregate(expr: &Expression) -> Option<&'static str> {
	match expr {
		Expression::Aggregate(agg) => Some(agg.op.name()),
		Expression::Func(func) => func.args.iter().find_map(first_aggregate),
		_ => None,
	}
}
