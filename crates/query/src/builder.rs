// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use rill_core::CollectionId;

use crate::{
	Direction, Expression, FromClause, IndexFlavor, JoinClause, JoinKind, Query, Result, SelectItem, SortKey, Source,
	expr, validate,
};

/// Fluent builder for the query IR.
///
/// ```
/// use rill_core::CollectionId;
/// use rill_query::{Direction, QueryBuilder, expr};
///
/// let query = QueryBuilder::from("e", CollectionId(1))
/// 	.filter(expr::gt(expr::prop("e.salary"), expr::value(100_000)))
/// 	.sort(expr::prop("e.salary"), Direction::Desc)
/// 	.take(3)
/// 	.build()
/// 	.unwrap();
/// assert_eq!(query.take, Some(3));
/// ```
pub struct QueryBuilder {
	query: Query,
}

impl QueryBuilder {
	pub fn from(alias: impl Into<String>, source: impl Into<Source>) -> Self {
		Self {
			query: Query {
				from: FromClause {
					alias: alias.into(),
					source: source.into(),
				},
				joins: Vec::new(),
				filter: None,
				group_by: Vec::new(),
				having: None,
				sort: Vec::new(),
				take: None,
				skip: None,
				map: None,
				distinct: false,
				find_one: false,
				index_flavor: IndexFlavor::default(),
			},
		}
	}

	pub fn join(mut self, alias: impl Into<String>, source: impl Into<Source>, on: Expression) -> Self {
		self.query.joins.push(JoinClause {
			alias: alias.into(),
			source: source.into(),
			kind: JoinKind::Inner,
			on,
		});
		self
	}

	pub fn left_join(mut self, alias: impl Into<String>, source: impl Into<Source>, on: Expression) -> Self {
		self.query.joins.push(JoinClause {
			alias: alias.into(),
			source: source.into(),
			kind: JoinKind::Left,
			on,
		});
		self
	}

	pub fn right_join(mut self, alias: impl Into<String>, source: impl Into<Source>, on: Expression) -> Self {
		self.query.joins.push(JoinClause {
			alias: alias.into(),
			source: source.into(),
			kind: JoinKind::Right,
			on,
		});
		self
	}

	pub fn full_join(mut self, alias: impl Into<String>, source: impl Into<Source>, on: Expression) -> Self {
		self.query.joins.push(JoinClause {
			alias: alias.into(),
			source: source.into(),
			kind: JoinKind::Full,
			on,
		});
		self
	}

	/// Narrow rows; successive calls are combined with `and`.
	pub fn filter(mut self, predicate: Expression) -> Self {
		self.query.filter = Some(match self.query.filter.take() {
			Some(existing) => expr::and(existing, predicate),
			None => predicate,
		});
		self
	}

	pub fn group_by(mut self, exprs: impl IntoIterator<Item = Expression>) -> Self {
		self.query.group_by.extend(exprs);
		self
	}

	pub fn having(mut self, predicate: Expression) -> Self {
		self.query.having = Some(match self.query.having.take() {
			Some(existing) => expr::and(existing, predicate),
			None => predicate,
		});
		self
	}

	/// Append a sort key; earlier keys are more significant.
	pub fn sort(mut self, expr: Expression, direction: Direction) -> Self {
		self.query.sort.push(SortKey {
			expr,
			direction,
		});
		self
	}

	pub fn take(mut self, count: usize) -> Self {
		self.query.take = Some(count);
		self
	}

	pub fn skip(mut self, count: usize) -> Self {
		self.query.skip = Some(count);
		self
	}

	/// Project each row to named output fields.
	pub fn map<S: Into<String>>(mut self, items: impl IntoIterator<Item = (S, Expression)>) -> Self {
		self.query.map = Some(
			items.into_iter()
				.map(|(name, expr)| SelectItem {
					name: name.into(),
					expr,
				})
				.collect(),
		);
		self
	}

	/// Collapse rows with identical projected values.
	pub fn distinct(mut self) -> Self {
		self.query.distinct = true;
		self
	}

	/// Single-row output: `take(1)` with scalar result semantics.
	pub fn find_one(mut self) -> Self {
		self.query.find_one = true;
		self
	}

	pub fn index_flavor(mut self, flavor: IndexFlavor) -> Self {
		self.query.index_flavor = flavor;
		self
	}

	/// Validate the accumulated clauses and hand out the IR.
	pub fn build(self) -> Result<Query> {
		validate::validate(&self.query)?;
		Ok(self.query)
	}
}

impl From<CollectionId> for Source {
	fn from(id: CollectionId) -> Self {
		Source::Collection(id)
	}
}

impl From<Query> for Source {
	fn from(query: Query) -> Self {
		Source::Subquery(Box::new(query))
	}
}
