// SPDX-License-Identifier: Apache-2.0

//! Stateful file tailer.
//!
//! Follows an append-only log file, emitting each newline-terminated line
//! to a [`TailerListener`] while surviving rename-recreate (and partially
//! copy-truncate) rotations. Progress is checkpointed in a
//! [`PositionStore`] keyed by a fingerprint of the file's leading bytes,
//! so a restarted process resumes where the previous one stopped instead
//! of re-emitting or skipping lines.
//!
//! Known limitation: when a file's final line carries no terminator and
//! the file is replaced by one of identical length, the partial line keeps
//! reporting fresh data and the rotation goes undetected until the sizes
//! diverge.

mod attributes;
pub mod config;
pub mod error;
mod framer;
pub mod listener;
pub mod position;
mod stateful;
pub mod trigger;

pub use config::{ConfigError, InitialPosition, TailerConfig};
pub use error::{Error, Result};
pub use listener::{TailerHandle, TailerListener};
pub use position::{FilePositionStore, MemoryPositionStore, PositionStore};
pub use stateful::StatefulTailer;
pub use trigger::{TimerTrigger, Trigger, Wait};
