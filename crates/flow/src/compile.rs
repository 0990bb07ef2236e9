// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Pipeline compiler: a validated, optimized query becomes a chain of
//! operators in the arena.
//!
//! Operator order: inputs -> pushed-down source filters -> joins ->
//! residual filter -> group -> having -> top-k -> projection -> distinct
//! -> consolidate. Grouped queries have their having/map/sort expressions
//! rewritten against the group operator's output columns.

use rill_query::{
	AggExpression, Direction, Expression, FuncExpression, Plan, Query, SelectItem, Source, optimize,
};
use rill_type::{PropPath, Value};

use crate::{
	FlowGraph, Result,
	graph::NodeId,
	operator::{AggSpec, ConsolidateOperator, DistinctOperator, GroupOperator, JoinOperator, Operator, TopKOperator},
};

/// What the live layer needs to feed one source edge.
pub(crate) struct SourceBinding {
	pub alias: String,
	pub source: Source,
	/// Pushed-down predicate with the alias prefix stripped, ready for a
	/// collection-level subscription.
	pub filter: Option<Expression>,
	/// Order hint for index-backed limited snapshots; only set for
	/// single-source windowed queries sorting on a plain field.
	pub order: Option<(PropPath, Direction)>,
}

pub(crate) struct Compiled {
	pub graph: FlowGraph,
	pub sources: Vec<SourceBinding>,
}

pub(crate) fn compile(query: &Query) -> Result<Compiled> {
	let plan = optimize(query)?;
	let mut graph = FlowGraph::new();

	let mut chain = build_source_chain(&mut graph, &plan, &plan.query.from.alias);
	for join in &plan.joins {
		let right = build_source_chain(&mut graph, &plan, &join.alias);
		let node = graph.add_node(Operator::Join(JoinOperator::new(
			join.kind,
			join.left_keys.clone(),
			join.right_keys.clone(),
		)));
		graph.connect(chain, node, 0);
		graph.connect(right, node, 1);
		chain = node;
	}

	if let Some(residual) = &plan.residual_filter {
		let node = graph.add_node(Operator::Filter {
			predicate: residual.clone(),
		});
		graph.connect(chain, node, 0);
		chain = node;
	}

	let grouped = plan.query.has_aggregates();
	let mut having = plan.query.having.clone();
	let mut map = plan.query.map.clone();
	let mut sort = plan.query.sort.clone();

	if grouped {
		let group_names = group_column_names(&plan.query.group_by);
		let mut specs: Vec<(AggExpression, String)> = Vec::new();
		if let Some(items) = &map {
			for item in items {
				collect_aggregates(&item.expr, &mut specs);
			}
		}
		if let Some(having) = &having {
			collect_aggregates(having, &mut specs);
		}

		let rewrite_all = |expr: &Expression| rewrite_grouped(expr, &plan.query.group_by, &group_names, &specs);
		having = having.as_ref().map(&rewrite_all);
		map = map.map(|items| {
			items.into_iter()
				.map(|item| SelectItem {
					name: item.name,
					expr: rewrite_all(&item.expr),
				})
				.collect()
		});
		for key in &mut sort {
			key.expr = rewrite_all(&key.expr);
		}

		let aggregates = specs
			.into_iter()
			.map(|(agg, name)| AggSpec {
				name,
				op: agg.op,
				arg: agg.args.first().cloned(),
			})
			.collect();
		let node = graph.add_node(Operator::Group(GroupOperator::new(
			plan.query.group_by.clone(),
			group_names,
			aggregates,
		)));
		graph.connect(chain, node, 0);
		chain = node;
	}

	if let Some(having) = having {
		let node = graph.add_node(Operator::Filter {
			predicate: having,
		});
		graph.connect(chain, node, 0);
		chain = node;
	}

	let windowed = !sort.is_empty() || plan.query.take.is_some() || plan.query.skip.is_some() || plan.query.find_one;
	if windowed {
		let take = plan.query.take.or(if plan.query.find_one {
			Some(1)
		} else {
			None
		});
		let node = graph.add_node(Operator::TopK(TopKOperator::new(
			sort.clone(),
			take,
			plan.query.skip.unwrap_or(0),
			plan.query.index_flavor,
		)));
		graph.connect(chain, node, 0);
		graph.mark_topk(node);
		chain = node;
	}

	if let Some(items) = map {
		let node = graph.add_node(Operator::Map {
			items,
		});
		graph.connect(chain, node, 0);
		chain = node;
	}

	if plan.query.distinct {
		let node = graph.add_node(Operator::Distinct(DistinctOperator::new()));
		graph.connect(chain, node, 0);
		chain = node;
	}

	let consolidate = graph.add_node(Operator::Consolidate(ConsolidateOperator::new()));
	graph.connect(chain, consolidate, 0);

	let sources = source_bindings(&plan, grouped);
	Ok(Compiled {
		graph,
		sources,
	})
}

fn build_source_chain(graph: &mut FlowGraph, plan: &Plan, alias: &str) -> NodeId {
	let input = graph.add_input(alias);
	match plan.source_filters.get(alias) {
		Some(filter) => {
			let node = graph.add_node(Operator::Filter {
				predicate: filter.clone(),
			});
			graph.connect(input, node, 0);
			node
		}
		None => input,
	}
}

fn source_bindings(plan: &Plan, grouped: bool) -> Vec<SourceBinding> {
	let single_source = plan.joins.is_empty();
	let mut bindings = Vec::new();

	let strip = |alias: &str, expr: &Expression| {
		expr.map_props(&|path: &PropPath| {
			if path.first() == Some(alias) {
				path.tail()
			} else {
				path.clone()
			}
		})
	};

	let order = if single_source && !grouped && plan.query.take.is_some() {
		plan.query.sort.first().and_then(|key| match &key.expr {
			Expression::Prop(path) if path.first() == Some(plan.query.from.alias.as_str()) && path.len() > 1 => {
				Some((path.tail(), key.direction))
			}
			_ => None,
		})
	} else {
		None
	};

	bindings.push(SourceBinding {
		alias: plan.query.from.alias.clone(),
		source: plan.query.from.source.clone(),
		filter: plan
			.source_filters
			.get(&plan.query.from.alias)
			.map(|filter| strip(&plan.query.from.alias, filter)),
		order,
	});

	for join in &plan.joins {
		bindings.push(SourceBinding {
			alias: join.alias.clone(),
			source: join.source.clone(),
			filter: plan.source_filters.get(&join.alias).map(|filter| strip(&join.alias, filter)),
			order: None,
		});
	}
	bindings
}

fn group_column_names(group_by: &[Expression]) -> Vec<String> {
	let mut names = Vec::with_capacity(group_by.len());
	for (position, expr) in group_by.iter().enumerate() {
		let base = match expr {
			Expression::Prop(path) => path
				.segments()
				.last()
				.map(str::to_string)
				.unwrap_or_else(|| format!("group_{}", position)),
			_ => format!("group_{}", position),
		};
		let mut name = base.clone();
		let mut suffix = 1;
		while names.contains(&name) {
			name = format!("{}_{}", base, suffix);
			suffix += 1;
		}
		names.push(name);
	}
	names
}

fn collect_aggregates(expr: &Expression, specs: &mut Vec<(AggExpression, String)>) {
	match expr {
		Expression::Aggregate(agg) => {
			if !specs.iter().any(|(existing, _)| existing == agg) {
				let name = format!("__agg_{}", specs.len());
				specs.push((agg.clone(), name));
			}
		}
		Expression::Func(func) => {
			for arg in &func.args {
				collect_aggregates(arg, specs);
			}
		}
		_ => {}
	}
}

/// Rewrite a grouped-clause expression against the group operator's
/// output row: group-by expressions become their output column, each
/// aggregate becomes its accumulator column.
fn rewrite_grouped(
	expr: &Expression,
	group_by: &[Expression],
	group_names: &[String],
	specs: &[(AggExpression, String)],
) -> Expression {
	if let Some(position) = group_by.iter().position(|candidate| candidate == expr) {
		return Expression::Prop(PropPath::new([group_names[position].clone()]));
	}
	match expr {
		Expression::Aggregate(agg) => {
			match specs.iter().find(|(candidate, _)| candidate == agg) {
				Some((_, name)) => Expression::Prop(PropPath::new([name.clone()])),
				// an aggregate outside map/having was rejected during
				// validation
				None => Expression::Value(Value::Undefined),
			}
		}
		Expression::Func(func) => Expression::Func(FuncExpression {
			op: func.op,
			args: func.args.iter().map(|arg| rewrite_grouped(arg, group_by, group_names, specs)).collect(),
		}),
		other => other.clone(),
	}
}
