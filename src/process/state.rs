//! Process lifecycle states.
//!
//! `ProcessState` is a total order from most to least active. Thread states
//! reduce to the minimum over all threads, so a single running thread makes
//! the whole process `Running`.

use serde::Serialize;

use crate::kernel::ThreadRunState;

/// Sleep time in seconds above which a waiting thread counts as idle.
pub const IDLE_SLEEP_SECONDS: u32 = 20;

/// Dominant state of a process, ordered by activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Zombie,
    Running,
    Uninterruptible,
    Sleeping,
    Idle,
    Stopped,
    Halted,
    Unknown,
}

impl ProcessState {
    /// Every state, in severity order.
    pub const ALL: [ProcessState; 8] = [
        ProcessState::Zombie,
        ProcessState::Running,
        ProcessState::Uninterruptible,
        ProcessState::Sleeping,
        ProcessState::Idle,
        ProcessState::Stopped,
        ProcessState::Halted,
        ProcessState::Unknown,
    ];

    /// Maps one thread's run state and sleep time.
    pub fn from_thread(run_state: ThreadRunState, sleep_time: u32) -> Self {
        match run_state {
            ThreadRunState::Running => ProcessState::Running,
            ThreadRunState::Uninterruptible => ProcessState::Uninterruptible,
            ThreadRunState::Waiting if sleep_time > IDLE_SLEEP_SECONDS => ProcessState::Idle,
            ThreadRunState::Waiting => ProcessState::Sleeping,
            ThreadRunState::Stopped => ProcessState::Stopped,
            ThreadRunState::Halted => ProcessState::Halted,
            ThreadRunState::Unknown => ProcessState::Unknown,
        }
    }

    /// Position on the severity scale; `Running` is 1, `Unknown` is 7.
    pub fn severity(self) -> usize {
        self as usize
    }

    /// One-letter code as shown by `ps`-style tools.
    pub fn letter(self) -> char {
        match self {
            ProcessState::Zombie => 'Z',
            ProcessState::Running => 'R',
            ProcessState::Uninterruptible => 'U',
            ProcessState::Sleeping => 'S',
            ProcessState::Idle => 'I',
            ProcessState::Stopped => 'T',
            ProcessState::Halted => 'H',
            ProcessState::Unknown => '?',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProcessState::Zombie => "zombie",
            ProcessState::Running => "running",
            ProcessState::Uninterruptible => "stuck",
            ProcessState::Sleeping => "sleeping",
            ProcessState::Idle => "idle",
            ProcessState::Stopped => "stopped",
            ProcessState::Halted => "halted",
            ProcessState::Unknown => "unknown",
        }
    }
}

/// BSD process status (`p_stat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BsdStatus {
    /// Status 0: the process slot is already gone.
    Gone,
    Idle,
    Runnable,
    Sleeping,
    Stopped,
    Zombie,
    Other(u32),
}

impl BsdStatus {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => BsdStatus::Gone,
            1 => BsdStatus::Idle,
            2 => BsdStatus::Runnable,
            3 => BsdStatus::Sleeping,
            4 => BsdStatus::Stopped,
            5 => BsdStatus::Zombie,
            other => BsdStatus::Other(other),
        }
    }
}
