// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Incremental hash join.
//!
//! Both sides keep a hash index from probe values to their live rows. A
//! delta on one side probes the other and emits `(merged, m·m')` for every
//! match. Outer flavors additionally maintain padded emissions for rows
//! with no match on the opposite side, retracting the padded row the
//! moment its first match arrives and re-emitting it when the last match
//! leaves.

use std::collections::HashMap;

use rill_query::{Expression, JoinKind, eval};
use rill_type::{Key, Value};

use crate::{Delta, multiset::composite_key};

struct SideState {
	/// row key -> (row, multiplicity, probe values)
	rows: HashMap<Key, (Value, i64, Vec<Value>)>,
	/// probe values -> row keys
	by_probe: HashMap<Vec<Value>, Vec<Key>>,
}

impl SideState {
	fn new() -> Self {
		Self {
			rows: HashMap::new(),
			by_probe: HashMap::new(),
		}
	}

	fn total_mult(&self, probe: &[Value]) -> i64 {
		self.by_probe
			.get(probe)
			.map(|keys| keys.iter().filter_map(|key| self.rows.get(key)).map(|(_, mult, _)| *mult).sum())
			.unwrap_or(0)
	}

	fn matches(&self, probe: &[Value]) -> Vec<(Key, Value, i64)> {
		self.by_probe
			.get(probe)
			.map(|keys| {
				keys.iter()
					.filter_map(|key| {
						self.rows.get(key).map(|(row, mult, _)| (key.clone(), row.clone(), *mult))
					})
					.filter(|(_, _, mult)| *mult != 0)
					.collect()
			})
			.unwrap_or_default()
	}

	fn update(&mut self, key: &Key, row: &Value, probe: &[Value], mult: i64) {
		let entry = self.rows.entry(key.clone()).or_insert_with(|| (row.clone(), 0, probe.to_vec()));
		entry.0 = row.clone();
		entry.1 += mult;
		if entry.1 == 0 {
			self.rows.remove(key);
			if let Some(keys) = self.by_probe.get_mut(probe) {
				keys.retain(|candidate| candidate != key);
				if keys.is_empty() {
					self.by_probe.remove(probe);
				}
			}
		} else {
			let keys = self.by_probe.entry(probe.to_vec()).or_default();
			if !keys.contains(key) {
				keys.push(key.clone());
			}
		}
	}
}

pub struct JoinOperator {
	left_keys: Vec<Expression>,
	right_keys: Vec<Expression>,
	pad_left: bool,
	pad_right: bool,
	left: SideState,
	right: SideState,
}

fn pad_key(key: &Key, left_side: bool) -> Key {
	let side = if left_side { "l" } else { "r" };
	Key::Utf8(format!("{}\u{1f}pad-{}", key, side))
}

impl JoinOperator {
	pub fn new(kind: JoinKind, left_keys: Vec<Expression>, right_keys: Vec<Expression>) -> Self {
		Self {
			left_keys,
			right_keys,
			pad_left: matches!(kind, JoinKind::Left | JoinKind::Full),
			pad_right: matches!(kind, JoinKind::Right | JoinKind::Full),
			left: SideState::new(),
			right: SideState::new(),
		}
	}

	pub fn apply(&mut self, port: usize, batch: &[Delta]) -> Vec<Delta> {
		let mut out = Vec::new();
		for delta in batch {
			if port == 0 {
				self.apply_left(delta, &mut out);
			} else {
				self.apply_right(delta, &mut out);
			}
		}
		out
	}

	fn apply_left(&mut self, delta: &Delta, out: &mut Vec<Delta>) {
		let probe: Vec<Value> = self.left_keys.iter().map(|expr| eval(expr, &delta.row)).collect();

		for (right_key, right_row, right_mult) in self.right.matches(&probe) {
			let mut merged = delta.row.clone();
			merged.merge(&right_row);
			out.push(Delta {
				key: composite_key(&delta.key, Some(&right_key)),
				row: merged,
				mult: delta.mult * right_mult,
			});
			// this match keeps the right row un-padded; nothing changes
			// for it because the right side totals are untouched by a
			// left delta only when it had matches before, handled below
		}

		if self.pad_right {
			// left totals change: right rows on this probe may gain or
			// lose their first/last match
			let before = self.left.total_mult(&probe);
			let after = before + delta.mult;
			if before == 0 && after > 0 {
				for (right_key, right_row, right_mult) in self.right.matches(&probe) {
					out.push(Delta {
						key: pad_key(&right_key, false),
						row: right_row,
						mult: -right_mult,
					});
				}
			} else if before > 0 && after == 0 {
				for (right_key, right_row, right_mult) in self.right.matches(&probe) {
					out.push(Delta {
						key: pad_key(&right_key, false),
						row: right_row,
						mult: right_mult,
					});
				}
			}
		}

		if self.pad_left && self.right.total_mult(&probe) == 0 {
			// no matches: the left row itself is emitted padded
			out.push(Delta {
				key: pad_key(&delta.key, true),
				row: delta.row.clone(),
				mult: delta.mult,
			});
		}

		self.left.update(&delta.key, &delta.row, &probe, delta.mult);
	}

	fn apply_right(&mut self, delta: &Delta, out: &mut Vec<Delta>) {
		let probe: Vec<Value> = self.right_keys.iter().map(|expr| eval(expr, &delta.row)).collect();

		for (left_key, left_row, left_mult) in self.left.matches(&probe) {
			let mut merged = left_row;
			merged.merge(&delta.row);
			out.push(Delta {
				key: composite_key(&left_key, Some(&delta.key)),
				row: merged,
				mult: delta.mult * left_mult,
			});
		}

		if self.pad_left {
			let before = self.right.total_mult(&probe);
			let after = before + delta.mult;
			if before == 0 && after > 0 {
				// first match: retract the padded left rows
				for (left_key, left_row, left_mult) in self.left.matches(&probe) {
					out.push(Delta {
						key: pad_key(&left_key, true),
						row: left_row,
						mult: -left_mult,
					});
				}
			} else if before > 0 && after == 0 {
				// last match gone: pad the left rows again
				for (left_key, left_row, left_mult) in self.left.matches(&probe) {
					out.push(Delta {
						key: pad_key(&left_key, true),
						row: left_row,
						mult: left_mult,
					});
				}
			}
		}

		if self.pad_right && self.left.total_mult(&probe) == 0 {
			out.push(Delta {
				key: pad_key(&delta.key, false),
				row: delta.row.clone(),
				mult: delta.mult,
			});
		}

		self.right.update(&delta.key, &delta.row, &probe, delta.mult);
	}
}
