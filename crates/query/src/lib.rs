// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

pub use builder::QueryBuilder;
pub use eval::{eval, eval_predicate};
pub use expr::{AggExpression, AggOp, Expression, FuncExpression, FuncOp};
pub use ir::{Direction, FromClause, IndexFlavor, JoinClause, JoinKind, Query, SelectItem, SortKey, Source};
pub use optimize::{JoinPlan, Plan, equality_prop, optimize, split_conjunction};

mod builder;
mod eval;
pub mod expr;
mod ir;
mod optimize;
mod validate;

pub type Result<T> = std::result::Result<T, rill_type::Error>;
