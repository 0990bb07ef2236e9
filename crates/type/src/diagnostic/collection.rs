// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use super::Diagnostic;
use crate::Key;

pub fn duplicate_key(key: &Key) -> Diagnostic {
	Diagnostic::new("COLLECTION_001", format!("cannot insert key '{}', it already exists in the collection", key))
}

pub fn duplicate_synced_key(key: &Key) -> Diagnostic {
	Diagnostic::new("COLLECTION_002", format!("sync source inserted key '{}' which is already synced", key))
}

pub fn unknown_key(key: &Key) -> Diagnostic {
	Diagnostic::new("COLLECTION_003", format!("key '{}' does not exist in the collection", key))
}

pub fn key_mutation(before: &Key, after: &Key) -> Diagnostic {
	Diagnostic::new("COLLECTION_004", format!("update changed the primary key from '{}' to '{}'", before, after))
		.with_help("updating the key field of an item is not allowed")
}

pub fn missing_handler(operation: &str, handler: &str) -> Diagnostic {
	Diagnostic::new(
		"COLLECTION_005",
		format!("direct {} without an ambient transaction requires an {} handler", operation, handler),
	)
}

pub fn empty_key_list(operation: &str) -> Diagnostic {
	Diagnostic::new("COLLECTION_006", format!("{} was called with an empty list of keys", operation))
}

pub fn sync_protocol(message: impl Into<String>) -> Diagnostic {
	Diagnostic::new("COLLECTION_007", message.into())
}

pub fn invalid_key(detail: impl Into<String>) -> Diagnostic {
	Diagnostic::new("COLLECTION_008", format!("could not derive a key: {}", detail.into()))
}

pub fn cleaned_up(id: &str) -> Diagnostic {
	Diagnostic::new("COLLECTION_009", format!("collection '{}' has been cleaned up", id))
}
