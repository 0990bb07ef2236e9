// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Sort and top-K.
//!
//! The operator keeps every live input row in a sorted set and maintains
//! the `[skip, skip + take)` window over it. Rows inside the window are
//! emitted annotated with their position: dense integers for the numeric
//! flavor (reassigned as rows move), fractional-index strings for the
//! fractional flavor (stable across neighbour insertions). Ties always
//! break by row key, so replaying the same inputs yields the same order,
//! even when a sort value is NaN.

use std::collections::{BTreeSet, HashMap};

use rill_core::util::{key_between, needs_rebalance, spread};
use rill_query::{Direction, IndexFlavor, SortKey, eval};
use rill_type::{Key, Value};

use super::INDEX_FIELD;
use crate::Delta;

#[derive(Clone, PartialEq, Eq)]
struct SortEntry {
	rank: Vec<(Value, bool)>,
	key: Key,
}

impl Ord for SortEntry {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		for ((left, descending), (right, _)) in self.rank.iter().zip(&other.rank) {
			let ordering = left.cmp(right);
			let ordering = if *descending {
				ordering.reverse()
			} else {
				ordering
			};
			if ordering != std::cmp::Ordering::Equal {
				return ordering;
			}
		}
		self.key.cmp(&other.key)
	}
}

impl PartialOrd for SortEntry {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

pub struct TopKOperator {
	sort: Vec<SortKey>,
	take: Option<usize>,
	skip: usize,
	flavor: IndexFlavor,
	rows: HashMap<Key, (Value, i64, SortEntry)>,
	sorted: BTreeSet<SortEntry>,
	emitted: HashMap<Key, Value>,
	fractional: HashMap<Key, String>,
}

impl TopKOperator {
	pub fn new(sort: Vec<SortKey>, take: Option<usize>, skip: usize, flavor: IndexFlavor) -> Self {
		Self {
			sort,
			take,
			skip,
			flavor,
			rows: HashMap::new(),
			sorted: BTreeSet::new(),
			emitted: HashMap::new(),
			fractional: HashMap::new(),
		}
	}

	/// Rows still missing from the window; the live layer uses this to
	/// demand more data from the source.
	pub fn underfilled(&self) -> Option<usize> {
		let take = self.take?;
		let available = self.sorted.len().saturating_sub(self.skip);
		(available < take).then(|| take - available)
	}

	fn entry_for(&self, key: &Key, row: &Value) -> SortEntry {
		SortEntry {
			rank: self
				.sort
				.iter()
				.map(|sort_key| (eval(&sort_key.expr, row), sort_key.direction == Direction::Desc))
				.collect(),
			key: key.clone(),
		}
	}

	pub fn apply(&mut self, batch: &[Delta]) -> Vec<Delta> {
		for delta in batch {
			let existing = self.rows.get(&delta.key).map(|(_, mult, entry)| (*mult, entry.clone()));
			match existing {
				Some((mult, old_entry)) => {
					let new_mult = mult + delta.mult;
					if new_mult <= 0 {
						self.sorted.remove(&old_entry);
						self.rows.remove(&delta.key);
					} else if delta.mult > 0 {
						// replacement row for a live key: re-rank it
						let new_entry = self.entry_for(&delta.key, &delta.row);
						self.rows
							.insert(delta.key.clone(), (delta.row.clone(), new_mult, new_entry.clone()));
						self.sorted.remove(&old_entry);
						self.sorted.insert(new_entry);
					} else if let Some(slot) = self.rows.get_mut(&delta.key) {
						// a retraction that still leaves copies behind
						slot.1 = new_mult;
					}
				}
				None => {
					if delta.mult > 0 {
						let entry = self.entry_for(&delta.key, &delta.row);
						self.rows.insert(delta.key.clone(), (delta.row.clone(), delta.mult, entry.clone()));
						self.sorted.insert(entry);
					}
					// a retraction for an unknown key is dropped; the
					// consolidated upstream never produces one
				}
			}
		}

		let window: Vec<(Key, Value)> = self
			.sorted
			.iter()
			.skip(self.skip)
			.take(self.take.unwrap_or(usize::MAX))
			.map(|entry| (entry.key.clone(), self.rows[&entry.key].0.clone()))
			.collect();

		let annotated: Vec<(Key, Value)> = match self.flavor {
			IndexFlavor::Numeric => window
				.into_iter()
				.enumerate()
				.map(|(position, (key, mut row))| {
					row.set_field(INDEX_FIELD, Value::Int8(position as i64));
					(key, row)
				})
				.collect(),
			IndexFlavor::Fractional => self.assign_fractional(window),
		};

		// minimal diff against what the window looked like before
		let mut out = Vec::new();
		let new_keys: HashMap<&Key, &Value> = annotated.iter().map(|(key, row)| (key, row)).collect();
		let departed: Vec<(Key, Value)> = self
			.emitted
			.iter()
			.filter(|(key, _)| !new_keys.contains_key(key))
			.map(|(key, row)| (key.clone(), row.clone()))
			.collect();
		for (key, row) in departed {
			self.emitted.remove(&key);
			self.fractional.remove(&key);
			out.push(Delta::retract(key, row));
		}
		for (key, row) in annotated {
			match self.emitted.get(&key) {
				Some(previous) if previous == &row => {}
				Some(previous) => {
					out.push(Delta::retract(key.clone(), previous.clone()));
					out.push(Delta::insert(key.clone(), row.clone()));
					self.emitted.insert(key, row);
				}
				None => {
					out.push(Delta::insert(key.clone(), row.clone()));
					self.emitted.insert(key, row);
				}
			}
		}
		out
	}

	/// Keep stable fractional keys for rows that stayed in order, mint
	/// keys between neighbours for newcomers, and rebalance the whole
	/// window when keys grow too long.
	fn assign_fractional(&mut self, window: Vec<(Key, Value)>) -> Vec<(Key, Value)> {
		let mut assigned: Vec<Option<String>> =
			window.iter().map(|(key, _)| self.fractional.get(key).cloned()).collect();

		// anchors must be strictly ascending; drop any that fell out of
		// order after a re-rank
		let mut last: Option<String> = None;
		for slot in assigned.iter_mut() {
			if let Some(fraction) = slot.clone() {
				if last.as_ref().is_some_and(|previous| *previous >= fraction) {
					*slot = None;
				} else {
					last = Some(fraction);
				}
			}
		}

		for position in 0..assigned.len() {
			if assigned[position].is_none() {
				let previous = assigned[..position].iter().flatten().next_back().cloned();
				let next = assigned[position + 1..].iter().flatten().next().cloned();
				assigned[position] = Some(key_between(previous.as_deref(), next.as_deref()));
			}
		}

		if assigned.iter().flatten().any(|fraction| needs_rebalance(fraction)) {
			let fresh = spread(assigned.len());
			assigned = fresh.into_iter().map(Some).collect();
		}

		self.fractional.clear();
		window
			.into_iter()
			.zip(assigned)
			.map(|((key, mut row), fraction)| {
				let fraction = fraction.expect("every window row was assigned");
				self.fractional.insert(key.clone(), fraction.clone());
				row.set_field(INDEX_FIELD, Value::utf8(fraction));
				(key, row)
			})
			.collect()
	}
}
