// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

pub use event::{ChangeEvent, ChangeOp};
pub use interface::{CollectionId, OverlaySink};

pub mod event;
pub mod interface;
pub mod sorted;
pub mod util;

pub type Result<T> = std::result::Result<T, rill_type::Error>;
