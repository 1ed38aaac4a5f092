//! Message types for acton-reactive owner actors.

use crate::scheduler::Task;

/// Queue a job on an owner.
///
/// `due_tick` is absolute; a job whose tick has already passed by the time
/// the owner sees it runs immediately. `None` means run on receipt.
#[derive(Debug, Clone)]
pub struct SubmitTask {
    pub task: Task,
    pub due_tick: Option<u64>,
}

/// Host tick boundary, sent to every owner in tick order.
#[derive(Debug, Clone)]
pub struct Tick {
    pub tick: u64,
}

/// Ask an owner to drop its pending timers.
#[derive(Debug, Clone)]
pub struct DrainTimers;
