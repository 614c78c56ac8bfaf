//! Per-instruction taint propagation.
//!
//! The general rule: if any source is tainted every destination becomes
//! tainted, otherwise every destination is cleaned. A handful of idioms
//! replace the general rule entirely, see [`Idiom`].

use log::trace;

use crate::instruction::{Idiom, Instruction};
use crate::operand::Operand;
use crate::regs::{Reg, Registers};
use crate::taint::TaintStore;

/// Apply the taint effect of `instr` to `store`. `regs` must hold the
/// register values from before the instruction executes.
pub fn propagate(store: &mut TaintStore, instr: &Instruction, regs: &Registers) -> Idiom {
    let idiom = instr.idiom();
    match idiom {
        Idiom::ControlFlow => control_flow(store, instr, regs),
        Idiom::PushPop => spread(store, instr, regs, |op| !op.is_reg(Reg::Rsp)),
        Idiom::SelfXor(reg) => {
            store.clear_reg(reg);
        }
        Idiom::Exchange(a, b) => exchange(store, a, b),
        Idiom::Generic => spread(store, instr, regs, |_| true),
    }
    idiom
}

/// The general rule, restricted to the destinations `filter` accepts
fn spread(
    store: &mut TaintStore,
    instr: &Instruction,
    regs: &Registers,
    filter: impl Fn(&Operand) -> bool,
) {
    let tainted = store.any_tainted(&instr.srcs, regs);

    for dst in instr.dsts.iter().filter(|&op| filter(op)) {
        if tainted {
            store.mark(dst, regs);
        } else {
            store.clear(dst, regs);
        }
    }

    if tainted {
        trace!("0x{:x}: {} spreads taint", instr.addr, instr.text);
    }
}

/// Only the exactly-one-tainted case changes anything
fn exchange(store: &mut TaintStore, a: Reg, b: Reg) {
    match (store.is_reg_tainted(a), store.is_reg_tainted(b)) {
        (true, false) => {
            store.clear_reg(a);
            store.mark_reg(b);
        }
        (false, true) => {
            store.clear_reg(b);
            store.mark_reg(a);
        }
        _ => {}
    }
}

/// Track taint on the PC slot instead of on any real destination
fn control_flow(store: &mut TaintStore, instr: &Instruction, regs: &Registers) {
    let pc_tainted = store.is_reg_tainted(Reg::Pc);

    if instr.is_call() {
        // the pushed return address is the pc itself
        if let Some(slot) = instr.dsts.iter().find(|op| op.is_memory()) {
            if pc_tainted {
                store.mark(slot, regs);
            } else {
                store.clear(slot, regs);
            }
        }
    }

    if instr.is_direct_branch() {
        store.clear_reg(Reg::Pc);
    } else if instr.is_indirect_branch() {
        let target_tainted = instr.srcs.iter().any(|op| match op {
            Operand::Reg(reg) => *reg != Reg::Rsp && store.is_reg_tainted(*reg),
            Operand::Mem(_) => false,
        });
        set_pc(store, target_tainted);
    } else if instr.is_return() {
        let popped_tainted = store.any_tainted(&instr.srcs, regs);
        set_pc(store, popped_tainted);
    }
}

fn set_pc(store: &mut TaintStore, tainted: bool) {
    if tainted {
        store.mark_reg(Reg::Pc);
    } else {
        store.clear_reg(Reg::Pc);
    }
}
