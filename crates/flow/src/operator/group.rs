// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Differential group-by.
//!
//! Each group keeps accumulators that absorb multiplicity-signed
//! contributions, so retractions unwind exactly what the matching
//! insertion added. After a batch, every touched group compares its new
//! aggregate row with the last one it emitted and produces a minimal
//! `(old, -1)` / `(new, +1)` pair.

use std::collections::{BTreeMap, HashMap, HashSet};

use rill_query::{AggOp, Expression, eval};
use rill_type::{Key, Value};

use crate::Delta;

#[derive(Clone)]
pub struct AggSpec {
	/// Output column the aggregate lands in.
	pub name: String,
	pub op: AggOp,
	/// Argument expression; `None` only for `count()`.
	pub arg: Option<Expression>,
}

enum Accum {
	Count(i64),
	/// sum and avg share the numeric accumulator; avg divides at read
	Sum {
		int: i64,
		float: f64,
		any_float: bool,
		n: i64,
	},
	/// min/max keep the full value bag so retractions can expose the
	/// runner-up
	Bag(BTreeMap<Value, i64>),
}

impl Accum {
	fn new(op: AggOp) -> Self {
		match op {
			AggOp::Count => Accum::Count(0),
			AggOp::Sum | AggOp::Avg => Accum::Sum {
				int: 0,
				float: 0.0,
				any_float: false,
				n: 0,
			},
			AggOp::Min | AggOp::Max => Accum::Bag(BTreeMap::new()),
		}
	}

	fn absorb(&mut self, value: &Value, mult: i64) {
		match self {
			Accum::Count(count) => *count += mult,
			Accum::Sum {
				int,
				float,
				any_float,
				n,
			} => match value {
				Value::Int8(v) => {
					*int += v * mult;
					*n += mult;
				}
				Value::Float8(v) => {
					*float += v.value() * mult as f64;
					*any_float = true;
					*n += mult;
				}
				_ => {}
			},
			Accum::Bag(bag) => {
				if !value.is_undefined() {
					let count = bag.entry(value.clone()).or_insert(0);
					*count += mult;
					if *count <= 0 {
						bag.remove(value);
					}
				}
			}
		}
	}

	fn read(&self, op: AggOp) -> Value {
		match (self, op) {
			(Accum::Count(count), _) => Value::Int8(*count),
			(
				Accum::Sum {
					int,
					float,
					any_float,
					..
				},
				AggOp::Sum,
			) => {
				if *any_float {
					Value::float8(*int as f64 + *float)
				} else {
					Value::Int8(*int)
				}
			}
			(
				Accum::Sum {
					int,
					float,
					n,
					..
				},
				AggOp::Avg,
			) => {
				if *n == 0 {
					Value::Undefined
				} else {
					Value::float8((*int as f64 + *float) / *n as f64)
				}
			}
			(Accum::Bag(bag), AggOp::Min) => {
				bag.keys().next().cloned().unwrap_or(Value::Undefined)
			}
			(Accum::Bag(bag), AggOp::Max) => {
				bag.keys().next_back().cloned().unwrap_or(Value::Undefined)
			}
			_ => Value::Undefined,
		}
	}
}

struct GroupState {
	/// Net row multiplicity; the group disappears at zero.
	rows: i64,
	group_values: Vec<Value>,
	accums: Vec<Accum>,
}

pub struct GroupOperator {
	group_by: Vec<Expression>,
	group_names: Vec<String>,
	aggregates: Vec<AggSpec>,
	state: HashMap<Key, GroupState>,
	emitted: HashMap<Key, Value>,
}

impl GroupOperator {
	pub fn new(group_by: Vec<Expression>, group_names: Vec<String>, aggregates: Vec<AggSpec>) -> Self {
		debug_assert_eq!(group_by.len(), group_names.len());
		Self {
			group_by,
			group_names,
			aggregates,
			state: HashMap::new(),
			emitted: HashMap::new(),
		}
	}

	fn group_key(values: &[Value]) -> Key {
		if values.is_empty() {
			// bare aggregates form a single whole-input group
			return Key::Utf8("__all".to_string());
		}
		let encoded: Vec<String> = values.iter().map(Value::to_string).collect();
		Key::Utf8(encoded.join("\u{1f}"))
	}

	pub fn apply(&mut self, batch: &[Delta]) -> Vec<Delta> {
		let mut touched: HashSet<Key> = HashSet::new();

		for delta in batch {
			let group_values: Vec<Value> =
				self.group_by.iter().map(|expr| eval(expr, &delta.row)).collect();
			let key = Self::group_key(&group_values);

			let state = self.state.entry(key.clone()).or_insert_with(|| GroupState {
				rows: 0,
				group_values: group_values.clone(),
				accums: self.aggregates.iter().map(|spec| Accum::new(spec.op)).collect(),
			});
			state.rows += delta.mult;
			for (accum, spec) in state.accums.iter_mut().zip(&self.aggregates) {
				match &spec.arg {
					None => accum.absorb(&Value::Undefined, delta.mult),
					Some(arg) => accum.absorb(&eval(arg, &delta.row), delta.mult),
				}
			}
			touched.insert(key);
		}

		let mut out = Vec::new();
		for key in touched {
			let next =
				self.state.get(&key).filter(|state| state.rows > 0).map(|state| self.render(state));
			if next.is_none() {
				self.state.remove(&key);
			}

			let previous = self.emitted.get(&key).cloned();
			match (previous, next) {
				(None, Some(row)) => {
					self.emitted.insert(key.clone(), row.clone());
					out.push(Delta::insert(key, row));
				}
				(Some(previous), None) => {
					self.emitted.remove(&key);
					out.push(Delta::retract(key, previous));
				}
				(Some(previous), Some(row)) => {
					if previous != row {
						self.emitted.insert(key.clone(), row.clone());
						out.push(Delta::retract(key.clone(), previous));
						out.push(Delta::insert(key, row));
					}
				}
				(None, None) => {}
			}
		}
		out
	}

	fn render(&self, state: &GroupState) -> Value {
		let mut row = Value::object(
			self.group_names.iter().zip(&state.group_values).map(|(name, value)| (name.clone(), value.clone())),
		);
		for (accum, spec) in state.accums.iter().zip(&self.aggregates) {
			row.set_field(spec.name.clone(), accum.read(spec.op));
		}
		row
	}
}
