//! taskshare library
//!
//! Process and shared-memory accounting for Mach-based hosts. A refresh pass
//! enumerates every task through the host's processor sets, walks each
//! task's memory regions to split resident memory into private, shared and
//! aliased figures, reduces thread states to one process state and recovers
//! a readable command name.
//!
//! # Features
//!
//! - **Alias detection**: memory objects marked shared but mapped by only one
//!   task are counted as private
//! - **Pluggable kernel access**: the live Mach backend (macOS) or a
//!   simulated host loaded from JSON
//! - **Degrades per process**: tasks that exit mid-pass leave placeholder
//!   records instead of failing the refresh
//! - **History**: fixed-capacity circular buffer of per-pass host samples
//!
//! # Usage
//!
//! ```rust
//! use taskshare::engine::{Engine, EngineOptions};
//! use taskshare::kernel::simulated::{HostSnapshot, SimProcess};
//! use taskshare::kernel::SimulatedKernel;
//!
//! let host = HostSnapshot::with_processes(vec![SimProcess::new(1, "launchd")]);
//! let kernel = SimulatedKernel::new(host);
//!
//! let mut engine = Engine::new(EngineOptions::default());
//! let snapshot = engine.refresh(&kernel).expect("host is readable");
//!
//! for record in &snapshot.records {
//!     println!("{} {} private={}", record.pid, record.command, record.private_bytes);
//! }
//! ```

pub mod alias_table;
pub mod engine;
pub mod health_stats;
pub mod history;
pub mod kernel;
pub mod process;

// Re-export main types for convenience
pub use alias_table::{AliasTable, ObjectShare};
pub use engine::{Engine, EngineError, EngineOptions, HostTotals, PassCounters, Snapshot};
pub use history::{HostHistory, HostSample, SampleHistory, TopProcessInfo};
pub use kernel::{HostKernel, KernelError, SimulatedKernel};
pub use process::{ProcessFilter, ProcessRecord, ProcessState};
