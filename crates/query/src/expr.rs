// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use serde::{Deserialize, Serialize};

use rill_type::{PropPath, Value};

/// A scalar expression over one (possibly alias-namespaced) row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expression {
	/// A path-indexed field reference.
	Prop(PropPath),
	/// A constant.
	Value(Value),
	/// A pure scalar function applied to argument expressions.
	Func(FuncExpression),
	/// An aggregate; only legal inside grouped map/having clauses.
	Aggregate(AggExpression),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FuncExpression {
	pub op: FuncOp,
	pub args: Vec<Expression>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuncOp {
	Eq,
	Neq,
	Gt,
	Gte,
	Lt,
	Lte,
	And,
	Or,
	Not,
	Add,
	Sub,
	Mul,
	Div,
	Coalesce,
	Concat,
	Upper,
	Lower,
	Length,
	In,
	IsUndefined,
}

impl FuncOp {
	pub fn name(&self) -> &'static str {
		match self {
			FuncOp::Eq => "eq",
			FuncOp::Neq => "neq",
			FuncOp::Gt => "gt",
			FuncOp::Gte => "gte",
			FuncOp::Lt => "lt",
			FuncOp::Lte => "lte",
			FuncOp::And => "and",
			FuncOp::Or => "or",
			FuncOp::Not => "not",
			FuncOp::Add => "add",
			FuncOp::Sub => "sub",
			FuncOp::Mul => "mul",
			FuncOp::Div => "div",
			FuncOp::Coalesce => "coalesce",
			FuncOp::Concat => "concat",
			FuncOp::Upper => "upper",
			FuncOp::Lower => "lower",
			FuncOp::Length => "length",
			FuncOp::In => "in",
			FuncOp::IsUndefined => "is_undefined",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggExpression {
	pub op: AggOp,
	pub args: Vec<Expression>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggOp {
	Count,
	Sum,
	Avg,
	Min,
	Max,
}

impl AggOp {
	pub fn name(&self) -> &'static str {
		match self {
			AggOp::Count => "count",
			AggOp::Sum => "sum",
			AggOp::Avg => "avg",
			AggOp::Min => "min",
			AggOp::Max => "max",
		}
	}
}

impl Expression {
	pub fn prop(path: impl Into<PropPath>) -> Self {
		Expression::Prop(path.into())
	}

	pub fn value(value: impl Into<Value>) -> Self {
		Expression::Value(value.into())
	}

	pub fn func(op: FuncOp, args: Vec<Expression>) -> Self {
		Expression::Func(FuncExpression {
			op,
			args,
		})
	}

	pub fn is_constant(&self) -> bool {
		matches!(self, Expression::Value(_))
	}

	/// Every property path referenced anywhere inside this expression.
	pub fn prop_refs(&self) -> Vec<&PropPath> {
		let mut refs = Vec::new();
		self.collect_prop_refs(&mut refs);
		refs
	}

	fn collect_prop_refs<'a>(&'a self, refs: &mut Vec<&'a PropPath>) {
		match self {
			Expression::Prop(path) => refs.push(path),
			Expression::Value(_) => {}
			Expression::Func(func) => {
				for arg in &func.args {
					arg.collect_prop_refs(refs);
				}
			}
			Expression::Aggregate(agg) => {
				for arg in &agg.args {
					arg.collect_prop_refs(refs);
				}
			}
		}
	}

	pub fn contains_aggregate(&self) -> bool {
		match self {
			Expression::Aggregate(_) => true,
			Expression::Func(func) => func.args.iter().any(Expression::contains_aggregate),
			_ => false,
		}
	}

	/// Rewrite every property path through `f`, e.g. to qualify bare
	/// paths with a source alias.
	pub fn map_props(&self, f: &impl Fn(&PropPath) -> PropPath) -> Expression {
		match self {
			Expression::Prop(path) => Expression::Prop(f(path)),
			Expression::Value(value) => Expression::Value(value.clone()),
			Expression::Func(func) => Expression::Func(FuncExpression {
				op: func.op,
				args: func.args.iter().map(|arg| arg.map_props(f)).collect(),
			}),
			Expression::Aggregate(agg) => Expression::Aggregate(AggExpression {
				op: agg.op,
				args: agg.args.iter().map(|arg| arg.map_props(f)).collect(),
			}),
		}
	}
}

// Combinator surface used by the query builder; mirrors the operator set of
// the scalar evaluator.

pub fn prop(path: impl Into<PropPath>) -> Expression {
	Expression::prop(path)
}

pub fn value(value: impl Into<Value>) -> Expression {
	Expression::value(value)
}

pub fn eq(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::Eq, vec![left, right])
}

pub fn neq(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::Neq, vec![left, right])
}

pub fn gt(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::Gt, vec![left, right])
}

pub fn gte(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::Gte, vec![left, right])
}

pub fn lt(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::Lt, vec![left, right])
}

pub fn lte(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::Lte, vec![left, right])
}

pub fn and(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::And, vec![left, right])
}

pub fn or(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::Or, vec![left, right])
}

pub fn not(expr: Expression) -> Expression {
	Expression::func(FuncOp::Not, vec![expr])
}

pub fn add(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::Add, vec![left, right])
}

pub fn sub(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::Sub, vec![left, right])
}

pub fn mul(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::Mul, vec![left, right])
}

pub fn div(left: Expression, right: Expression) -> Expression {
	Expression::func(FuncOp::Div, vec![left, right])
}

pub fn coalesce(args: Vec<Expression>) -> Expression {
	Expression::func(FuncOp::Coalesce, args)
}

pub fn concat(args: Vec<Expression>) -> Expression {
	Expression::func(FuncOp::Concat, args)
}

pub fn is_undefined(expr: Expression) -> Expression {
	Expression::func(FuncOp::IsUndefined, vec![expr])
}

pub fn in_list(needle: Expression, haystack: Vec<Value>) -> Expression {
	Expression::func(FuncOp::In, vec![needle, Expression::Value(Value::List(haystack))])
}

pub fn count() -> Expression {
	Expression::Aggregate(AggExpression {
		op: AggOp::Count,
		args: Vec::new(),
	})
}

pub fn sum(arg: Expression) -> Expression {
	Expression::Aggregate(AggExpression {
		op: AggOp::Sum,
		args: vec![arg],
	})
}

pub fn avg(arg: Expression) -> Expression {
	Expression::Aggregate(AggExpression {
		op: AggOp::Avg,
		args: vec![arg],
	})
}

pub fn min(arg: Expression) -> Expression {
	Expression::Aggregate(AggExpression {
		op: AggOp::Min,
		args: vec![arg],
	})
}

pub fn max(arg: Expression) -> Expression {
	Expression::Aggregate(AggExpression {
		op: AggOp::Max,
		args: vec![arg],
	})
}
