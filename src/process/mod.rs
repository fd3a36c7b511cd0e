//! Per-process accounting.
//!
//! This module provides:
//! - `enumerator`: Process discovery through processor sets
//! - `regions`: Memory region classification into private/shared/aliased
//! - `threads`: Thread state reduction and CPU time accounting
//! - `command`: Command name recovery from the kernel argument area
//! - `record`: The per-process record and filtering
//! - `state`: Process and BSD status enums

pub mod command;
pub mod enumerator;
pub mod record;
pub mod regions;
pub mod state;
pub mod threads;

// Re-export commonly used types
pub use command::{
    fallback_command, parse_argument_area, recover_command, ArgumentParseError, CommandLine,
};
pub use enumerator::{enumerate_processes, Enumeration};
pub use record::{ProcessFilter, ProcessRecord, SortKey};
pub use regions::{classify_regions, RegionSummary};
pub use state::{BsdStatus, ProcessState, IDLE_SLEEP_SECONDS};
pub use threads::{aggregate_threads, reduce_threads, ThreadObservation, ThreadSummary};
