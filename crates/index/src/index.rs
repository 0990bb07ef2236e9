// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{
	collections::{BTreeMap, BTreeSet, HashMap},
	fmt::{Display, Formatter},
	ops::Bound,
	sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use tracing::trace;

use rill_type::{Key, PropPath, Value};

/// Process-unique identity of an index instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexId(pub u64);

static NEXT_INDEX_ID: AtomicU64 = AtomicU64::new(1);

impl IndexId {
	pub fn next() -> Self {
		Self(NEXT_INDEX_ID.fetch_add(1, Ordering::Relaxed))
	}
}

impl Display for IndexId {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "index-{}", self.0)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
	/// Point lookups only
	Equality,
	/// Point lookups, range scans and ordered take
	BTree,
}

/// Parameters of an ordered [`CollectionIndex::take`] scan.
#[derive(Clone, Debug, Default)]
pub struct TakeQuery {
	/// Resume strictly after this index value.
	pub after: Option<Value>,
	/// Walk the index from its greatest value downwards.
	pub descending: bool,
}

/// Result of a [`CollectionIndex::take`] scan.
#[derive(Clone, Debug)]
pub struct TakeResult {
	/// Accepted row keys in index order, at most `limit` of them.
	pub keys: Vec<Key>,
	/// The last index value the scan visited, accepted or not; feed it
	/// back as `after` to resume without revisiting anything.
	pub last_seen: Option<Value>,
	/// No further entries exist beyond `last_seen`.
	pub exhausted: bool,
}

enum Entries {
	Equality(HashMap<Value, BTreeSet<Key>>),
	BTree(BTreeMap<Value, BTreeSet<Key>>),
}

/// An index over one field path of a collection's rows.
///
/// Rows with equal index values are held in key order, so every scan is
/// deterministic under replay.
pub struct CollectionIndex {
	id: IndexId,
	path: PropPath,
	entries: RwLock<Entries>,
}

impl CollectionIndex {
	pub fn equality(path: PropPath) -> Self {
		Self {
			id: IndexId::next(),
			path,
			entries: RwLock::new(Entries::Equality(HashMap::new())),
		}
	}

	pub fn btree(path: PropPath) -> Self {
		Self {
			id: IndexId::next(),
			path,
			entries: RwLock::new(Entries::BTree(BTreeMap::new())),
		}
	}

	pub fn id(&self) -> IndexId {
		self.id
	}

	pub fn path(&self) -> &PropPath {
		&self.path
	}

	pub fn kind(&self) -> IndexKind {
		match &*self.entries.read() {
			Entries::Equality(_) => IndexKind::Equality,
			Entries::BTree(_) => IndexKind::BTree,
		}
	}

	pub fn supports_range(&self) -> bool {
		self.kind() == IndexKind::BTree
	}

	fn value_of(&self, row: &Value) -> Value {
		row.at(&self.path).clone()
	}

	pub fn insert(&self, key: &Key, row: &Value) {
		let value = self.value_of(row);
		trace!(index = %self.id, %key, "index insert");
		match &mut *self.entries.write() {
			Entries::Equality(entries) => {
				entries.entry(value).or_default().insert(key.clone());
			}
			Entries::BTree(entries) => {
				entries.entry(value).or_default().insert(key.clone());
			}
		}
	}

	pub fn remove(&self, key: &Key, row: &Value) {
		let value = self.value_of(row);
		match &mut *self.entries.write() {
			Entries::Equality(entries) => {
				if let Some(keys) = entries.get_mut(&value) {
					keys.remove(key);
					if keys.is_empty() {
						entries.remove(&value);
					}
				}
			}
			Entries::BTree(entries) => {
				if let Some(keys) = entries.get_mut(&value) {
					keys.remove(key);
					if keys.is_empty() {
						entries.remove(&value);
					}
				}
			}
		}
	}

	pub fn update(&self, key: &Key, old_row: &Value, new_row: &Value) {
		if self.value_of(old_row) == self.value_of(new_row) {
			return;
		}
		self.remove(key, old_row);
		self.insert(key, new_row);
	}

	/// Point lookup: row keys whose indexed field equals `value`, in key
	/// order.
	pub fn lookup(&self, value: &Value) -> Vec<Key> {
		match &*self.entries.read() {
			Entries::Equality(entries) => {
				entries.get(value).map(|keys| keys.iter().cloned().collect()).unwrap_or_default()
			}
			Entries::BTree(entries) => {
				entries.get(value).map(|keys| keys.iter().cloned().collect()).unwrap_or_default()
			}
		}
	}

	/// Row keys whose indexed field falls inside the bounds, in index
	/// order. Only range-capable indices answer; equality indices yield
	/// `None`.
	pub fn range_scan(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> Option<Vec<Key>> {
		match &*self.entries.read() {
			Entries::Equality(_) => None,
			Entries::BTree(entries) => {
				let mut keys = Vec::new();
				for (_, tied) in entries.range((lower, upper)) {
					keys.extend(tied.iter().cloned());
				}
				Some(keys)
			}
		}
	}

	/// Visit index values strictly beyond `query.after`, apply `filter` to
	/// each row key and collect up to `limit` accepted keys.
	///
	/// `last_seen` only advances past *fully visited* values. When the
	/// limit lands inside a group of tied rows, the group stays visitable
	/// on resume and the caller's filter (which rejects keys it already
	/// consumed) guarantees progress. A fully visited minimum value,
	/// `Undefined` included, is never re-entered, which is what keeps a
	/// resuming scan from looping on rows that lack the indexed field.
	pub fn take(&self, limit: usize, query: &TakeQuery, mut filter: impl FnMut(&Key) -> bool) -> Option<TakeResult> {
		let entries = self.entries.read();
		let entries = match &*entries {
			Entries::Equality(_) => return None,
			Entries::BTree(entries) => entries,
		};

		let bounds = match (&query.after, query.descending) {
			(Some(after), false) => (Bound::Excluded(after), Bound::Unbounded),
			(Some(after), true) => (Bound::Unbounded, Bound::Excluded(after)),
			(None, _) => (Bound::Unbounded, Bound::Unbounded),
		};

		let iter: Box<dyn Iterator<Item = (&Value, &BTreeSet<Key>)>> = if query.descending {
			Box::new(entries.range(bounds).rev())
		} else {
			Box::new(entries.range(bounds))
		};

		let mut result = TakeResult {
			keys: Vec::new(),
			last_seen: query.after.clone(),
			exhausted: true,
		};

		for (value, tied) in iter {
			if result.keys.len() >= limit {
				// at least one more value exists that we never visited
				result.exhausted = false;
				break;
			}
			let mut fully_visited = true;
			for key in tied {
				if result.keys.len() >= limit {
					fully_visited = false;
					break;
				}
				if filter(key) {
					result.keys.push(key.clone());
				}
			}
			if fully_visited {
				result.last_seen = Some(value.clone());
			} else {
				result.exhausted = false;
				break;
			}
		}

		Some(result)
	}

	pub fn len(&self) -> usize {
		match &*self.entries.read() {
			Entries::Equality(entries) => entries.values().map(BTreeSet::len).sum(),
			Entries::BTree(entries) => entries.values().map(BTreeSet::len).sum(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use std::ops::Bound;

	use rill_type::{Key, PropPath, Value, object};

	use super::{CollectionIndex, TakeQuery};

	fn sample_index() -> CollectionIndex {
		let index = CollectionIndex::btree(PropPath::from(["score"]));
		for (id, score) in [(1, 50), (2, 30), (3, 70), (4, 30), (5, 90)] {
			index.insert(&Key::Int8(id), &object! { id: id, score: score });
		}
		index
	}

	#[test]
	fn test_lookup_returns_tied_keys_in_key_order() {
		let index = sample_index();
		assert_eq!(index.lookup(&Value::Int8(30)), vec![Key::Int8(2), Key::Int8(4)]);
		assert_eq!(index.lookup(&Value::Int8(99)), Vec::<Key>::new());
	}

	#[test]
	fn test_range_scan_bounds() {
		let index = sample_index();
		let keys = index.range_scan(Bound::Included(&Value::Int8(30)), Bound::Excluded(&Value::Int8(70))).unwrap();
		assert_eq!(keys, vec![Key::Int8(2), Key::Int8(4), Key::Int8(1)]);
	}

	#[test]
	fn test_take_ascending_with_resume() {
		let index = sample_index();
		let first = index.take(2, &TakeQuery::default(), |_| true).unwrap();
		assert_eq!(first.keys, vec![Key::Int8(2), Key::Int8(4)]);
		assert!(!first.exhausted);

		let second = index
			.take(
				2,
				&TakeQuery {
					after: first.last_seen,
					descending: false,
				},
				|_| true,
			)
			.unwrap();
		assert_eq!(second.keys, vec![Key::Int8(1), Key::Int8(3)]);
	}

	#[test]
	fn test_take_descending() {
		let index = sample_index();
		let result = index
			.take(
				2,
				&TakeQuery {
					after: None,
					descending: true,
				},
				|_| true,
			)
			.unwrap();
		assert_eq!(result.keys, vec![Key::Int8(5), Key::Int8(3)]);
		assert!(!result.exhausted);
	}

	#[test]
	fn test_take_filter_skips_rejected_rows() {
		let index = sample_index();
		let result = index.take(2, &TakeQuery::default(), |key| *key != Key::Int8(2)).unwrap();
		assert_eq!(result.keys, vec![Key::Int8(4), Key::Int8(1)]);
	}

	#[test]
	fn test_take_terminates_on_undefined_minimum() {
		let index = CollectionIndex::btree(PropPath::from(["score"]));
		// rows with no score at all index under Undefined
		index.insert(&Key::Int8(1), &object! { id: 1 });
		index.insert(&Key::Int8(2), &object! { id: 2 });
		index.insert(&Key::Int8(3), &object! { id: 3, score: 10 });

		let first = index.take(10, &TakeQuery::default(), |_| true).unwrap();
		assert_eq!(first.keys, vec![Key::Int8(1), Key::Int8(2), Key::Int8(3)]);
		assert!(first.exhausted);

		// resuming after the undefined group makes progress instead of
		// re-entering it
		let resumed = index
			.take(
				10,
				&TakeQuery {
					after: Some(Value::Undefined),
					descending: false,
				},
				|_| true,
			)
			.unwrap();
		assert_eq!(resumed.keys, vec![Key::Int8(3)]);
	}

	#[test]
	fn test_take_limit_inside_tied_group_resumes_via_filter() {
		let index = sample_index();
		// group 30 holds keys 2 and 4; a limit of 1 stops mid-group
		let first = index.take(1, &TakeQuery::default(), |_| true).unwrap();
		assert_eq!(first.keys, vec![Key::Int8(2)]);
		assert!(!first.exhausted);
		// last_seen stays before the partially consumed group
		assert_eq!(first.last_seen, None);

		let mut sent = first.keys.clone();
		let second = index
			.take(
				1,
				&TakeQuery {
					after: first.last_seen,
					descending: false,
				},
				|key| !sent.contains(key),
			)
			.unwrap();
		assert_eq!(second.keys, vec![Key::Int8(4)]);
		sent.extend(second.keys.clone());
	}

	#[test]
	fn test_update_moves_key_between_values() {
		let index = sample_index();
		index.update(&Key::Int8(2), &object! { id: 2, score: 30 }, &object! { id: 2, score: 95 });
		assert_eq!(index.lookup(&Value::Int8(30)), vec![Key::Int8(4)]);
		assert_eq!(index.lookup(&Value::Int8(95)), vec![Key::Int8(2)]);
	}

	#[test]
	fn test_equality_index_rejects_ordered_operations() {
		let index = CollectionIndex::equality(PropPath::from(["score"]));
		index.insert(&Key::Int8(1), &object! { id: 1, score: 50 });
		assert!(index.take(1, &TakeQuery::default(), |_| true).is_none());
		assert!(index.range_scan(Bound::Unbounded, Bound::Unbounded).is_none());
		assert_eq!(index.lookup(&Value::Int8(50)), vec![Key::Int8(1)]);
	}
}
