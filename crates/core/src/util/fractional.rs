// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Fractional index keys: variable-length base-62 strings ordered
//! lexicographically, supporting insertion between any two existing keys
//! without reassigning neighbours.
//!
//! Generated keys never end in the minimum digit, so a strictly-between key
//! always exists and repeated insertion between the same neighbours grows
//! key length logarithmically, not linearly.

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: usize = 62;

/// Keys longer than this suggest a pathological insertion pattern; callers
/// reassign the whole window with [`spread`].
const REBALANCE_LENGTH: usize = 48;

fn digit_at(key: &str, position: usize) -> usize {
	match key.as_bytes().get(position) {
		Some(byte) => ALPHABET.iter().position(|candidate| candidate == byte).unwrap_or(0),
		None => 0,
	}
}

/// Generate a key strictly between `lower` and `upper` (lexicographically).
/// `None` bounds mean the open ends of the key space. Panics if
/// `lower >= upper`; neighbours produced by this module never violate that.
pub fn key_between(lower: Option<&str>, upper: Option<&str>) -> String {
	if let (Some(lower), Some(upper)) = (lower, upper) {
		assert!(lower < upper, "fractional bounds out of order: {} >= {}", lower, upper);
	}

	let lower = lower.unwrap_or("");
	let mut result = String::new();
	let mut position = 0;

	loop {
		let low = digit_at(lower, position);
		let high = match upper {
			Some(upper) => digit_at(upper, position),
			// open upper end behaves like an all-max bound
			None => BASE,
		};

		if low == high {
			result.push(ALPHABET[low] as char);
			position += 1;
			continue;
		}

		if high - low > 1 {
			result.push(ALPHABET[(low + high) / 2] as char);
			return result;
		}

		// adjacent digits: keep the lower one and find room after the
		// rest of the lower bound, which is open above
		result.push(ALPHABET[low] as char);
		position += 1;
		loop {
			let low = digit_at(lower, position);
			if low == BASE - 1 {
				result.push(ALPHABET[BASE - 1] as char);
				position += 1;
				continue;
			}
			result.push(ALPHABET[(low + BASE) / 2] as char);
			return result;
		}
	}
}

pub fn needs_rebalance(key: &str) -> bool {
	key.len() > REBALANCE_LENGTH
}

/// Evenly spaced keys for reassigning a whole window of `count` rows.
pub fn spread(count: usize) -> Vec<String> {
	let mut keys = Vec::with_capacity(count);
	let mut previous: Option<String> = None;
	// walk the space left to right; two-digit steps keep keys short for
	// windows up to a few thousand rows
	for index in 0..count {
		let first = 1 + (index * (BASE - 2)) / count.max(1);
		let second = 1 + (index * (BASE - 2) * (BASE - 2) / count.max(1)) % (BASE - 2);
		let mut key = String::with_capacity(2);
		key.push(ALPHABET[first.min(BASE - 1)] as char);
		key.push(ALPHABET[second.min(BASE - 1)] as char);
		// guard against collisions when count approaches the digit space
		if let Some(prev) = &previous {
			if key <= *prev {
				key = key_between(Some(prev), None);
			}
		}
		previous = Some(key.clone());
		keys.push(key);
	}
	keys
}
