// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Ordered-map helpers on top of the concurrent skip list.
//!
//! The skip list already gives O(log n) insert/remove/lookup and ordered
//! iteration; what the collection and index layers additionally need is
//! iteration from a *strictly exclusive* lower bound, so a scan can resume
//! after the last key it saw without ever revisiting it.

use std::ops::Bound;

use crossbeam_skiplist::{SkipMap, map::Entry};

/// Iterate entries in key order, starting strictly after `after` when given.
pub fn iter_after<'a, K, V>(map: &'a SkipMap<K, V>, after: Option<&'a K>) -> Box<dyn Iterator<Item = Entry<'a, K, V>> + 'a>
where
	K: Ord + Send + 'static,
	V: Send + 'static,
{
	match after {
		Some(key) => Box::new(map.range((Bound::Excluded(key), Bound::Unbounded))),
		None => Box::new(map.iter()),
	}
}

/// Remove every entry. The skip list supports removal during iteration, so
/// this is safe against concurrent readers, which simply stop seeing
/// entries as they detach.
pub fn clear<K, V>(map: &SkipMap<K, V>)
where
	K: Ord + Send + 'static,
	V: Send + 'static,
{
	for entry in map.iter() {
		map.remove(entry.key());
	}
}

/// Collect keys in order. Mostly useful in tests and diffing passes.
pub fn keys_in_order<K, V>(map: &SkipMap<K, V>) -> Vec<K>
where
	K: Ord + Clone + Send + 'static,
	V: Send + 'static,
{
	map.iter().map(|entry| entry.key().clone()).collect()
}

#[cfg(test)]
mod tests {
	use crossbeam_skiplist::SkipMap;

	use super::iter_after;

	#[test]
	fn test_iter_after_is_exclusive() {
		let map = SkipMap::new();
		for key in [1, 3, 5, 7] {
			map.insert(key, ());
		}

		let keys: Vec<i32> = iter_after(&map, Some(&3)).map(|entry| *entry.key()).collect();
		assert_eq!(keys, vec![5, 7]);

		// a bound between entries starts at the next greater key
		let keys: Vec<i32> = iter_after(&map, Some(&4)).map(|entry| *entry.key()).collect();
		assert_eq!(keys, vec![5, 7]);
	}

	#[test]
	fn test_iter_after_none_starts_at_minimum() {
		let map = SkipMap::new();
		map.insert(2, ());
		map.insert(1, ());
		let keys: Vec<i32> = iter_after(&map, None).map(|entry| *entry.key()).collect();
		assert_eq!(keys, vec![1, 2]);
	}
}
