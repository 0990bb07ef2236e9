// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Structural optimization of a validated query: alias qualification,
//! constant folding, conjunction splitting, predicate pushdown below joins
//! and hash-probe extraction from join predicates.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use rill_type::{PropPath, Value, diagnostic::query, error};

use crate::{Expression, FuncExpression, FuncOp, JoinKind, Query, Result, Source, eval, expr};

/// One join, reduced to hash-probe form: `left_keys[i]` evaluated on the
/// accumulated left row must equal `right_keys[i]` evaluated on the joined
/// source row.
#[derive(Clone, Debug)]
pub struct JoinPlan {
	pub alias: String,
	pub kind: JoinKind,
	pub source: Source,
	pub left_keys: Vec<Expression>,
	pub right_keys: Vec<Expression>,
}

/// A query after optimization, ready for the pipeline compiler.
#[derive(Clone, Debug)]
pub struct Plan {
	pub query: Query,
	/// Predicates safe to apply on a single source before any join.
	pub source_filters: BTreeMap<String, Expression>,
	/// What remains of the filter after pushdown; applied post-join.
	pub residual_filter: Option<Expression>,
	pub joins: Vec<JoinPlan>,
}

pub fn optimize(query: &Query) -> Result<Plan> {
	let aliases: Vec<String> = query.aliases().map(str::to_string).collect();
	let qualified = qualify(query, &aliases);

	let mut joins = Vec::new();
	for join in &qualified.joins {
		joins.push(extract_join_plan(join.alias.clone(), join.kind, join.source.clone(), &join.on)?);
	}

	let mut source_filters: BTreeMap<String, Expression> = BTreeMap::new();
	let mut residual: Vec<Expression> = Vec::new();

	if let Some(filter) = &qualified.filter {
		for conjunct in split_conjunction(filter) {
			let folded = fold(&conjunct);
			match pushdown_target(&folded, &qualified) {
				Some(alias) => {
					debug!(alias, "pushing filter conjunct below join");
					merge_filter(&mut source_filters, alias, folded);
				}
				None => residual.push(folded),
			}
		}
	}

	let residual_filter = residual.into_iter().reduce(expr::and);

	Ok(Plan {
		query: qualified,
		source_filters,
		residual_filter,
		joins,
	})
}

/// Split a predicate into its top-level `and` conjuncts.
pub fn split_conjunction(predicate: &Expression) -> Vec<Expression> {
	match predicate {
		Expression::Func(func) if func.op == FuncOp::And => {
			func.args.iter().flat_map(split_conjunction).collect()
		}
		other => vec![other.clone()],
	}
}

/// Recognize `field = literal` (either side), the shape that equality
/// indices and auto-indexing serve.
pub fn equality_prop(predicate: &Expression) -> Option<(PropPath, Value)> {
	let Expression::Func(func) = predicate else {
		return None;
	};
	if func.op != FuncOp::Eq || func.args.len() != 2 {
		return None;
	}
	match (&func.args[0], &func.args[1]) {
		(Expression::Prop(path), Expression::Value(value)) => Some((path.clone(), value.clone())),
		(Expression::Value(value), Expression::Prop(path)) => Some((path.clone(), value.clone())),
		_ => None,
	}
}

/// Prefix bare property paths with the from-alias so every reference is
/// alias-qualified downstream.
fn qualify(query: &Query, aliases: &[String]) -> Query {
	let from_alias = query.from.alias.clone();
	let qualify_path = move |path: &PropPath| -> PropPath {
		match path.first() {
			Some(first) if aliases.iter().any(|alias| alias == first) => path.clone(),
			_ => path.prepend(from_alias.clone()),
		}
	};

	let mut qualified = query.clone();
	qualified.filter = qualified.filter.map(|filter| filter.map_props(&qualify_path));
	qualified.having = qualified.having.map(|having| having.map_props(&qualify_path));
	qualified.group_by = qualified.group_by.iter().map(|group| group.map_props(&qualify_path)).collect();
	for key in &mut qualified.sort {
		key.expr = key.expr.map_props(&qualify_path);
	}
	for join in &mut qualified.joins {
		join.on = join.on.map_props(&qualify_path);
	}
	if let Some(items) = &mut qualified.map {
		for item in items.iter_mut() {
			item.expr = item.expr.map_props(&qualify_path);
		}
	}
	qualified
}

fn fold(expression: &Expression) -> Expression {
	match expression {
		Expression::Func(func) => {
			let args: Vec<Expression> = func.args.iter().map(fold).collect();
			let folded = Expression::Func(FuncExpression {
				op: func.op,
				args,
			});
			if let Expression::Func(inner) = &folded {
				if !inner.args.is_empty() && inner.args.iter().all(Expression::is_constant) {
					return Expression::Value(eval(&folded, &Value::Undefined));
				}
			}
			folded
		}
		other => other.clone(),
	}
}

fn referenced_aliases<'a>(expression: &'a Expression) -> HashSet<&'a str> {
	expression.prop_refs().into_iter().filter_map(PropPath::first).collect()
}

/// A conjunct can move below the joins when it references exactly one
/// source and that source can never be null-padded by the join tree
/// (filtering pre-join on a padded side changes which rows get padding).
fn pushdown_target<'a>(conjunct: &Expression, query: &'a Query) -> Option<&'a str> {
	let refs = referenced_aliases(conjunct);
	if refs.len() != 1 {
		return None;
	}
	let target = *refs.iter().next().unwrap();

	let from_padded = query.joins.iter().any(|join| matches!(join.kind, JoinKind::Right | JoinKind::Full));
	if query.from.alias == target {
		return (!from_padded).then_some(query.from.alias.as_str());
	}
	query.joins
		.iter()
		.find(|join| join.alias == target)
		.filter(|join| matches!(join.kind, JoinKind::Inner | JoinKind::Right))
		.map(|join| join.alias.as_str())
}

fn merge_filter(filters: &mut BTreeMap<String, Expression>, alias: &str, conjunct: Expression) {
	match filters.remove(alias) {
		Some(existing) => {
			filters.insert(alias.to_string(), expr::and(existing, conjunct));
		}
		None => {
			filters.insert(alias.to_string(), conjunct);
		}
	}
}

fn extract_join_plan(alias: String, kind: JoinKind, source: Source, on: &Expression) -> Result<JoinPlan> {
	let mut left_keys = Vec::new();
	let mut right_keys = Vec::new();

	for conjunct in split_conjunction(on) {
		let Expression::Func(func) = &conjunct else {
			return Err(error!(query::unsupported_join_predicate(&alias)));
		};
		if func.op != FuncOp::Eq || func.args.len() != 2 {
			return Err(error!(query::unsupported_join_predicate(&alias)));
		}

		let first_refs = referenced_aliases(&func.args[0]);
		let second_refs = referenced_aliases(&func.args[1]);
		let first_is_right = first_refs.iter().all(|name| *name == alias) && !first_refs.is_empty();
		let second_is_right = second_refs.iter().all(|name| *name == alias) && !second_refs.is_empty();

		match (first_is_right, second_is_right) {
			(false, true) => {
				left_keys.push(func.args[0].clone());
				right_keys.push(func.args[1].clone());
			}
			(true, false) => {
				left_keys.push(func.args[1].clone());
				right_keys.push(func.args[0].clone());
			}
			_ => return Err(error!(query::unsupported_join_predicate(&alias))),
		}
	}

	Ok(JoinPlan {
		alias,
		kind,
		source,
		left_keys,
		right_keys,
	})
}
