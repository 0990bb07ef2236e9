// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

pub use fractional::{key_between, needs_rebalance, spread};
pub use suggest::closest_match;

mod fractional;
mod suggest;
