// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

pub use graph::{FlowGraph, NodeId, TICK_CAP};
pub use live::LiveQuery;
pub use multiset::Delta;

mod compile;
mod graph;
mod live;
mod multiset;
pub mod operator;

pub type Result<T> = std::result::Result<T, rill_type::Error>;
