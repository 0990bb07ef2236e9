// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

pub use api::{MemoryStorage, StorageApi};
pub use sync::{StorageSync, storage_collection};

mod api;
mod sync;

pub type Result<T> = std::result::Result<T, rill_type::Error>;
