//! Dynamic taint tracking for crash triage.
//!
//! Input returned by targeted read primitives is tainted, taint is carried
//! through every instruction, and when the process faults the crash is scored
//! by how much of the faulting state the input controls.

pub mod decode;
pub mod error;
pub mod exception;
pub mod exports;
pub mod history;
pub mod hooks;
pub mod instruction;
pub mod maps;
pub mod operand;
pub mod propagate;
pub mod recorded;
pub mod regs;
pub mod replay;
pub mod report;
pub mod server;
pub mod session;
pub mod substrate;
pub mod taint;
pub mod targets;
pub mod trace_entry;
pub mod triage;

pub use error::{Error, Result};
pub use session::{Config, Session};
