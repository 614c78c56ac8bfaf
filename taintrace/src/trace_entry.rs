use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::exception::ExceptionContext;
use crate::hooks::HookCall;
use crate::regs::Registers;

/// One recorded event of a traced execution. A log is one JSON entry per
/// line.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum TraceEntry {
    ModuleLoad {
        name: String,
        base: u64,
        size: u64,
        /// Export name to offset from `base`
        #[serde(default)]
        exports: HashMap<String, u64>,
        /// Module image to read further exports from
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// A mapped region and its contents
    Memory {
        start: u64,
        #[serde(default)]
        size: u64,
        #[serde(default = "default_perms")]
        perms: String,
        #[serde(default)]
        data: Vec<u8>,
        #[serde(default)]
        name: String,
    },
    Write {
        addr: u64,
        data: Vec<u8>,
    },
    Exec {
        pc: u64,
        /// Registers before the instruction executes. The previous snapshot
        /// carries over when absent.
        #[serde(default)]
        regs: Option<Registers>,
    },
    Call {
        #[serde(flatten)]
        call: HookCall,
        /// Exception being handed to a filter hook
        #[serde(default)]
        exception: Option<ExceptionContext>,
    },
    Exception(ExceptionContext),
    Exit {
        code: i32,
    },
}

fn default_perms() -> String {
    "rw-".to_string()
}
