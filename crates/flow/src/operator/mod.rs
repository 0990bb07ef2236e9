// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Incremental operators. Each holds just enough state to answer a delta
//! batch with the minimal output diff.

pub use group::{AggSpec, GroupOperator};
pub use join::JoinOperator;
pub use order::TopKOperator;

mod group;
mod join;
mod order;

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::warn;

use rill_query::{Expression, SelectItem, eval, eval_predicate};
use rill_type::{Key, Value};

use crate::Delta;

/// The field sorted operators annotate rows with; consumers order by it.
pub const INDEX_FIELD: &str = "__index";

pub enum Operator {
	/// A source edge; rows arrive already alias-namespaced.
	Input,
	Filter {
		predicate: Expression,
	},
	Map {
		items: Vec<SelectItem>,
	},
	Join(JoinOperator),
	Group(GroupOperator),
	TopK(TopKOperator),
	Distinct(DistinctOperator),
	Consolidate(ConsolidateOperator),
}

impl Operator {
	pub fn apply(&mut self, port: usize, batch: &[Delta]) -> Vec<Delta> {
		match self {
			Operator::Input => batch.to_vec(),
			Operator::Filter {
				predicate,
			} => batch.iter().filter(|delta| eval_predicate(predicate, &delta.row)).cloned().collect(),
			Operator::Map {
				items,
			} => batch.iter().map(|delta| project(items, delta)).collect(),
			Operator::Join(join) => join.apply(port, batch),
			Operator::Group(group) => group.apply(batch),
			Operator::TopK(topk) => topk.apply(batch),
			Operator::Distinct(distinct) => distinct.apply(batch),
			Operator::Consolidate(consolidate) => consolidate.apply(batch),
		}
	}

	pub fn input_ports(&self) -> usize {
		match self {
			Operator::Join(_) => 2,
			_ => 1,
		}
	}
}

fn project(items: &[SelectItem], delta: &Delta) -> Delta {
	let mut row = Value::object(items.iter().map(|item| (item.name.clone(), eval(&item.expr, &delta.row))));
	// the sort annotation survives projection so consumers can still order
	let index = delta.row.field(INDEX_FIELD);
	if !index.is_undefined() {
		row.set_field(INDEX_FIELD, index.clone());
	}
	Delta {
		key: delta.key.clone(),
		row,
		mult: delta.mult,
	}
}

/// Emits `+1` when a row value first appears, `-1` when its last copy
/// disappears. Identity is the row content itself.
#[derive(Default)]
pub struct DistinctOperator {
	counts: HashMap<Value, i64>,
}

impl DistinctOperator {
	pub fn new() -> Self {
		Self::default()
	}

	fn apply(&mut self, batch: &[Delta]) -> Vec<Delta> {
		let mut out = Vec::new();
		for delta in batch {
			let count = self.counts.entry(delta.row.clone()).or_insert(0);
			let before = *count;
			*count += delta.mult;
			let after = *count;
			if after == 0 {
				self.counts.remove(&delta.row);
			}
			let key = Key::Utf8(delta.row.to_string());
			if before <= 0 && after > 0 {
				out.push(Delta::insert(key, delta.row.clone()));
			} else if before > 0 && after <= 0 {
				out.push(Delta::retract(key, delta.row.clone()));
			}
		}
		out
	}
}

/// Tracks the net row per key and emits only real transitions, squashing
/// same-batch churn. The final operator of every pipeline.
#[derive(Default)]
pub struct ConsolidateOperator {
	current: HashMap<Key, Value>,
}

impl ConsolidateOperator {
	pub fn new() -> Self {
		Self::default()
	}

	fn apply(&mut self, batch: &[Delta]) -> Vec<Delta> {
		// net multiplicity per key and row variant, in arrival order
		let mut scratch: IndexMap<Key, IndexMap<Value, i64>> = IndexMap::new();
		for delta in batch {
			*scratch.entry(delta.key.clone()).or_default().entry(delta.row.clone()).or_insert(0) +=
				delta.mult;
		}

		let mut out = Vec::new();
		for (key, variants) in scratch {
			let old = self.current.get(&key).cloned();
			let mut new = old.clone();
			for (row, mult) in variants {
				if mult > 0 {
					if mult > 1 {
						warn!(%key, mult, "consolidate flattening multiplicity to set semantics");
					}
					new = Some(row);
				} else if mult < 0 && new.as_ref() == Some(&row) {
					new = None;
				}
			}

			match (old, new) {
				(None, Some(row)) => {
					self.current.insert(key.clone(), row.clone());
					out.push(Delta::insert(key, row));
				}
				(Some(previous), None) => {
					self.current.remove(&key);
					out.push(Delta::retract(key, previous));
				}
				(Some(previous), Some(row)) => {
					if previous != row {
						self.current.insert(key.clone(), row.clone());
						out.push(Delta::retract(key.clone(), previous));
						out.push(Delta::insert(key, row));
					}
				}
				(None, None) => {}
			}
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use rill_type::{Key, object};

	use super::{ConsolidateOperator, DistinctOperator};
	use crate::Delta;

	#[test]
	fn test_consolidate_squashes_same_batch_churn() {
		let mut consolidate = ConsolidateOperator::new();
		let out = consolidate.apply(&[
			Delta::insert(Key::Int8(1), object! { v: 1 }),
			Delta::retract(Key::Int8(1), object! { v: 1 }),
			Delta::insert(Key::Int8(1), object! { v: 2 }),
		]);
		assert_eq!(out, vec![Delta::insert(Key::Int8(1), object! { v: 2 })]);

		// a later batch replacing the value produces a retract/insert pair
		let out = consolidate.apply(&[
			Delta::retract(Key::Int8(1), object! { v: 2 }),
			Delta::insert(Key::Int8(1), object! { v: 3 }),
		]);
		assert_eq!(
			out,
			vec![Delta::retract(Key::Int8(1), object! { v: 2 }), Delta::insert(Key::Int8(1), object! { v: 3 })]
		);
	}

	#[test]
	fn test_consolidate_drops_no_ops() {
		let mut consolidate = ConsolidateOperator::new();
		consolidate.apply(&[Delta::insert(Key::Int8(1), object! { v: 1 })]);
		let out = consolidate.apply(&[
			Delta::retract(Key::Int8(1), object! { v: 1 }),
			Delta::insert(Key::Int8(1), object! { v: 1 }),
		]);
		assert!(out.is_empty(), "replacing a row with itself is not a change");
	}

	#[test]
	fn test_distinct_counts_occurrences() {
		let mut distinct = DistinctOperator::new();
		let row = object! { category: "a" };

		let out = distinct.apply(&[Delta::insert(Key::Int8(1), row.clone())]);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].mult, 1);

		// a second copy of the same row is silent
		let out = distinct.apply(&[Delta::insert(Key::Int8(2), row.clone())]);
		assert!(out.is_empty());

		// removing one copy is silent, removing the last is a retraction
		let out = distinct.apply(&[Delta::retract(Key::Int8(1), row.clone())]);
		assert!(out.is_empty());
		let out = distinct.apply(&[Delta::retract(Key::Int8(2), row)]);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].mult, -1);
	}
}
