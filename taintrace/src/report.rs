use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::exception::ExceptionContext;
use crate::history::History;
use crate::regs::{Reg, GPRS};
use crate::taint::{TaintStore, TaintedRange};
use crate::triage::{Facts, Verdict};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegisterEntry {
    pub name: String,
    pub value: u64,
    pub tainted: bool,
}

/// The document emitted for a triaged crash
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub score: u8,
    pub reason: String,
    pub exception: String,
    pub location: u64,
    pub instruction: String,
    pub pc_tainted: bool,
    pub stack_tainted: bool,
    pub is_ret: bool,
    pub is_indirect: bool,
    pub is_direct: bool,
    pub is_call: bool,
    pub mem_write: bool,
    pub mem_read: bool,
    pub tainted_src: bool,
    pub tainted_dst: bool,
    pub regs: Vec<RegisterEntry>,
    pub last_calls: Vec<u64>,
    pub last_insns: Vec<u64>,
    pub tainted_addrs: Vec<TaintedRange>,
    pub success: bool,
    pub run_id: Option<Uuid>,
}

impl CrashReport {
    /// Build the report for a fault. Only reads the store and history.
    pub fn build(
        verdict: Verdict,
        facts: &Facts,
        ctx: &ExceptionContext,
        instruction: Option<&str>,
        store: &TaintStore,
        history: &History,
        run_id: Option<Uuid>,
    ) -> Self {
        let mut regs: Vec<RegisterEntry> = GPRS
            .iter()
            .map(|&reg| RegisterEntry {
                name: reg.name(),
                value: ctx.regs.get(reg),
                tainted: store.is_reg_tainted(reg),
            })
            .collect();
        regs.push(RegisterEntry {
            name: Reg::Pc.name(),
            value: ctx.address,
            tainted: store.is_reg_tainted(Reg::Pc),
        });

        Self {
            score: verdict.score,
            reason: verdict.reason,
            exception: ctx.code().to_string(),
            location: ctx.address,
            instruction: instruction.unwrap_or("").to_string(),
            pc_tainted: facts.pc_tainted,
            stack_tainted: facts.stack_tainted,
            is_ret: facts.is_ret,
            is_indirect: facts.is_indirect,
            is_direct: facts.is_direct,
            is_call: facts.is_call,
            mem_write: facts.mem_write,
            mem_read: facts.mem_read,
            tainted_src: facts.tainted_src,
            tainted_dst: facts.tainted_dst,
            regs,
            last_calls: history.calls.oldest_first(),
            last_insns: history.insns.oldest_first(),
            tainted_addrs: store.ranges(),
            success: true,
            run_id,
        }
    }

    pub fn register(&self, name: &str) -> Option<&RegisterEntry> {
        self.regs.iter().find(|entry| entry.name == name)
    }
}

/// Emitted once when the session ends
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub success: bool,
    pub run_id: Option<Uuid>,
    pub message: String,
}

impl RunSummary {
    pub fn new(crashed: bool, run_id: Option<Uuid>) -> Self {
        let message = if crashed {
            "replay caused a crash"
        } else {
            "replay did not cause a crash"
        };
        Self {
            success: crashed,
            run_id,
            message: message.to_string(),
        }
    }
}
