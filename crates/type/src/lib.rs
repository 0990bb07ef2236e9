// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

pub use error::Error;
pub use key::Key;
pub use path::PropPath;
pub use schema_issue::SchemaIssue;
pub use value::{OrderedF64, Value};

pub mod diagnostic;
mod error;
mod key;
mod path;
mod schema_issue;
mod value;

pub type Result<T> = std::result::Result<T, Error>;
