/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! This module contains the [`WorkerPool`] that keeps exactly one fetch worker per real mailbox

pub mod pool;
mod state;

pub use self::pool::{CycleError, CycleReport, WorkerInfo, WorkerPool};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use self::state::WorkerState;
use crate::shutdown::ShutdownHandle;

/// The fetch worker of a single real mailbox
#[derive(Debug)]
pub(crate) struct Worker {
	/// Unique for the whole lifetime of the pool, even if a worker for the same mailbox is re-created
	id: u64,
	mailbox: String,
	state: Mutex<WorkerState>,
	shutdown: ShutdownHandle,

	/// Wakes up the worker task to run a cycle right away
	trigger: mpsc::Sender<()>,
}
