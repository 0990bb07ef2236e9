// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

pub use scheduler::Scheduler;
pub use timer::{TimerHandle, TimerService};

mod scheduler;
mod timer;

pub type Result<T> = std::result::Result<T, rill_type::Error>;
