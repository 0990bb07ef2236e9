// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Reading the current derived view as a stream of insert events, with
//! index-served fast paths, plus the predicate-boundary filtering applied
//! to live change batches.

use std::cmp::Ordering;

use tracing::trace;

use rill_core::{ChangeEvent, ChangeOp};
use rill_index::{IndexKind, TakeQuery};
use rill_query::{Direction, Expression, equality_prop, eval_predicate};
use rill_type::{Key, PropPath, Value};

use crate::{AutoIndex, Collection};

/// Options of [`Collection::current_state_as_changes`].
#[derive(Clone, Default)]
pub struct SnapshotOptions {
	/// Row predicate (paths are plain field paths, no alias prefix).
	pub filter: Option<Expression>,
	pub order_by: Option<(PropPath, Direction)>,
	pub limit: Option<usize>,
	/// Only answer when an index can serve the request.
	pub optimized_only: bool,
}

impl Collection {
	/// The current derived view as a list of insert events, optionally
	/// filtered, ordered and limited. Returns `None` only when
	/// `optimized_only` is set and no index can serve the request.
	pub fn current_state_as_changes(&self, options: &SnapshotOptions) -> Option<Vec<ChangeEvent>> {
		let rows = match &options.order_by {
			Some((path, direction)) => self.ordered_rows(options, path, *direction)?,
			None => self.unordered_rows(options)?,
		};

		let limit = options.limit.unwrap_or(usize::MAX);
		Some(
			rows.into_iter()
				.take(limit)
				.map(|(key, value)| ChangeEvent::insert(key, value))
				.collect(),
		)
	}

	fn unordered_rows(&self, options: &SnapshotOptions) -> Option<Vec<(Key, Value)>> {
		if let Some(filter) = &options.filter {
			// a `field = literal` filter can be answered from an
			// equality index, creating one on demand under eager
			// auto-indexing
			if let Some((path, value)) = equality_prop(filter) {
				let index = match self.index_on(&path) {
					Some(index) => Some(index),
					None if self.auto_index_enabled() => {
						Some(self.create_index(path.clone(), IndexKind::Equality))
					}
					None => None,
				};
				if let Some(index) = index {
					trace!(collection = %self.name(), %path, "snapshot served from index");
					let mut rows = Vec::new();
					for key in index.lookup(&value) {
						if let Some(row) = self.get(&key) {
							if eval_predicate(filter, &row) {
								rows.push((key, row));
							}
						}
					}
					return Some(rows);
				}
			}
			if options.optimized_only {
				return None;
			}
			return Some(self.entries().into_iter().filter(|(_, row)| eval_predicate(filter, row)).collect());
		}

		if options.optimized_only {
			// full scans are never "optimized"
			return None;
		}
		Some(self.entries())
	}

	fn ordered_rows(
		&self,
		options: &SnapshotOptions,
		path: &PropPath,
		direction: Direction,
	) -> Option<Vec<(Key, Value)>> {
		if let Some(index) = self.range_index_on(path) {
			let limit = options.limit.unwrap_or(usize::MAX);
			let mut rows = Vec::new();
			let mut taken: std::collections::HashSet<Key> = std::collections::HashSet::new();
			let mut query = TakeQuery {
				after: None,
				descending: direction == Direction::Desc,
			};
			loop {
				let result = index.take(limit - rows.len(), &query, |key| {
					if taken.contains(key) {
						return false;
					}
					match self.get(key) {
						Some(row) => {
							options.filter.as_ref().is_none_or(|filter| eval_predicate(filter, &row))
						}
						None => false,
					}
				})?;
				for key in result.keys {
					if let Some(row) = self.get(&key) {
						taken.insert(key.clone());
						rows.push((key, row));
					}
				}
				if rows.len() >= limit || result.exhausted {
					return Some(rows);
				}
				query.after = result.last_seen;
			}
		}

		if options.optimized_only {
			return None;
		}

		let mut rows: Vec<(Key, Value)> = self
			.entries()
			.into_iter()
			.filter(|(_, row)| options.filter.as_ref().is_none_or(|filter| eval_predicate(filter, row)))
			.collect();
		rows.sort_by(|(left_key, left), (right_key, right)| {
			let ordering = left.at(path).cmp(right.at(path));
			let ordering = match direction {
				Direction::Asc => ordering,
				Direction::Desc => ordering.reverse(),
			};
			// key tiebreak keeps the order total and replayable
			if ordering == Ordering::Equal {
				left_key.cmp(right_key)
			} else {
				ordering
			}
		});
		Some(rows)
	}

	fn auto_index_enabled(&self) -> bool {
		self.config_auto_index() == AutoIndex::Eager
	}

	pub(crate) fn config_auto_index(&self) -> AutoIndex {
		self.inner_config().auto_index
	}
}

/// Apply a compiled predicate to a change batch, synthesizing the
/// insert/delete pairs that arise when a row crosses the predicate
/// boundary.
pub(crate) fn filter_batch(filter: &Expression, events: &[ChangeEvent]) -> Vec<ChangeEvent> {
	let mut out = Vec::with_capacity(events.len());
	for event in events {
		let matches_now = eval_predicate(filter, &event.value);
		match event.op {
			ChangeOp::Insert => {
				if matches_now {
					out.push(event.clone());
				}
			}
			ChangeOp::Update => {
				let matched_before =
					event.previous.as_ref().map(|previous| eval_predicate(filter, previous)).unwrap_or(false);
				match (matched_before, matches_now) {
					(true, true) => out.push(event.clone()),
					(false, true) => out.push(ChangeEvent::insert(event.key.clone(), event.value.clone())),
					(true, false) => {
						// the row left the predicate; downstream sees
						// its last matching value disappear
						let last_matching = event.previous.clone().unwrap_or_else(|| event.value.clone());
						out.push(ChangeEvent::delete(event.key.clone(), last_matching));
					}
					(false, false) => {}
				}
			}
			ChangeOp::Delete => {
				if matches_now {
					out.push(event.clone());
				}
			}
		}
	}
	out
}
