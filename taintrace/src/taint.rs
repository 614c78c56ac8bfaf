//! Taint store and operand taint oracle.
//!
//! Registers are keyed by their canonical [`Reg`], memory by individual byte
//! address. Nothing in here can fail: an address or register that is not in
//! a set is simply untainted.

use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::operand::{MemRef, Operand};
use crate::regs::{Reg, Registers};

/// A maximal run of consecutive tainted bytes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaintedRange {
    pub start: u64,
    pub size: u64,
}

#[derive(Debug, Default, Clone)]
pub struct TaintStore {
    regs: HashSet<Reg>,
    mems: BTreeSet<u64>,
}

impl TaintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty() && self.mems.is_empty()
    }

    pub fn mark_reg(&mut self, reg: Reg) {
        self.regs.insert(reg);
    }

    /// Returns whether the register was tainted
    pub fn clear_reg(&mut self, reg: Reg) -> bool {
        self.regs.remove(&reg)
    }

    pub fn is_reg_tainted(&self, reg: Reg) -> bool {
        self.regs.contains(&reg)
    }

    pub fn mark_mem(&mut self, addr: u64, size: u64) {
        for i in 0..size {
            self.mems.insert(addr.wrapping_add(i));
        }
    }

    /// Returns whether any of the bytes was tainted
    pub fn clear_mem(&mut self, addr: u64, size: u64) -> bool {
        let mut cleared = false;
        for i in 0..size {
            cleared |= self.mems.remove(&addr.wrapping_add(i));
        }
        cleared
    }

    pub fn is_mem_tainted(&self, addr: u64, size: u64) -> bool {
        (0..size).any(|i| self.mems.contains(&addr.wrapping_add(i)))
    }

    /// Taint an operand. Memory operands are resolved against `regs`.
    pub fn mark(&mut self, op: &Operand, regs: &Registers) {
        match op {
            Operand::Reg(reg) => self.mark_reg(*reg),
            Operand::Mem(mem) => self.mark_mem(mem.address(regs), mem.size),
        }
    }

    /// Untaint an operand, returning whether anything was tainted before
    pub fn clear(&mut self, op: &Operand, regs: &Registers) -> bool {
        match op {
            Operand::Reg(reg) => self.clear_reg(*reg),
            Operand::Mem(mem) => self.clear_mem(mem.address(regs), mem.size),
        }
    }

    /// Whether an operand is influenced by tainted data. A memory operand is
    /// tainted when any byte it covers is, or when a register used to build
    /// its address is.
    pub fn is_tainted(&self, op: &Operand, regs: &Registers) -> bool {
        match op {
            Operand::Reg(reg) => self.is_reg_tainted(*reg),
            Operand::Mem(mem) => self.is_mem_operand_tainted(mem, regs),
        }
    }

    fn is_mem_operand_tainted(&self, mem: &MemRef, regs: &Registers) -> bool {
        self.is_mem_tainted(mem.address(regs), mem.size)
            || mem.address_regs().any(|reg| self.is_reg_tainted(reg))
    }

    pub fn any_tainted<'a>(
        &self,
        ops: impl IntoIterator<Item = &'a Operand>,
        regs: &Registers,
    ) -> bool {
        ops.into_iter().any(|op| self.is_tainted(op, regs))
    }

    pub fn tainted_regs(&self) -> impl Iterator<Item = &Reg> {
        self.regs.iter()
    }

    /// Tainted byte addresses in ascending order
    pub fn tainted_addrs(&self) -> impl Iterator<Item = &u64> {
        self.mems.iter()
    }

    /// Tainted memory as `[start, size)` runs, in a single ascending pass
    pub fn ranges(&self) -> Vec<TaintedRange> {
        let mut ranges: Vec<TaintedRange> = Vec::new();
        for &addr in &self.mems {
            match ranges.last_mut() {
                Some(range) if range.start.wrapping_add(range.size) == addr => range.size += 1,
                _ => ranges.push(TaintedRange {
                    start: addr,
                    size: 1,
                }),
            }
        }
        ranges
    }
}
