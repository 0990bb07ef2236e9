// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use super::Diagnostic;
use crate::Key;

pub fn not_pending(operation: &str, state: &str) -> Diagnostic {
	Diagnostic::new("TX_001", format!("cannot {} a transaction in state '{}'", operation, state))
}

pub fn already_terminal(operation: &str, state: &str) -> Diagnostic {
	Diagnostic::new("TX_002", format!("cannot {} a transaction already in terminal state '{}'", operation, state))
}

pub fn delete_of_deleted(key: &Key) -> Diagnostic {
	Diagnostic::new("TX_003", format!("key '{}' is already deleted by this transaction", key))
}

pub fn duplicate_insert(key: &Key) -> Diagnostic {
	Diagnostic::new("TX_004", format!("key '{}' is already inserted by this transaction", key))
}

pub fn persist_failed(cause: impl Into<String>) -> Diagnostic {
	Diagnostic::new("TX_005", "transaction failed to persist").with_note(cause.into())
}
