// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use serde::{Deserialize, Serialize};

use rill_core::CollectionId;

use crate::Expression;

/// Where a pipeline input comes from: a bound collection or a nested query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Source {
	Collection(CollectionId),
	Subquery(Box<Query>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FromClause {
	pub alias: String,
	pub source: Source,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
	Inner,
	Left,
	Right,
	Full,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
	pub alias: String,
	pub source: Source,
	pub kind: JoinKind,
	/// Join predicate; the optimizer extracts hash-probe key pairs from
	/// its equality conjuncts.
	pub on: Expression,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
	Asc,
	Desc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
	pub expr: Expression,
	pub direction: Direction,
}

/// How sorted outputs expose their position to consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexFlavor {
	/// Dense integer positions, reassigned as rows move.
	#[default]
	Numeric,
	/// Fractional-index strings that interleave without reassignment.
	Fractional,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectItem {
	pub name: String,
	pub expr: Expression,
}

/// The structured query IR produced by [`crate::QueryBuilder`].
///
/// Vocabulary: `filter` narrows rows, `sort` orders them, `take`/`skip`
/// window them, `map` projects them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
	pub from: FromClause,
	pub joins: Vec<JoinClause>,
	pub filter: Option<Expression>,
	pub group_by: Vec<Expression>,
	pub having: Option<Expression>,
	pub sort: Vec<SortKey>,
	pub take: Option<usize>,
	pub skip: Option<usize>,
	pub map: Option<Vec<SelectItem>>,
	pub distinct: bool,
	pub find_one: bool,
	pub index_flavor: IndexFlavor,
}

impl Query {
	pub fn aliases(&self) -> impl Iterator<Item = &str> {
		std::iter::once(self.from.alias.as_str()).chain(self.joins.iter().map(|join| join.alias.as_str()))
	}

	pub fn is_grouped(&self) -> bool {
		!self.group_by.is_empty()
	}

	/// Grouped output also arises from a bare aggregate in `map` with no
	/// explicit `group_by` (a single whole-input group).
	pub fn has_aggregates(&self) -> bool {
		self.is_grouped()
			|| self.map.as_ref().is_some_and(|items| items.iter().any(|item| item.expr.contains_aggregate()))
	}
}
