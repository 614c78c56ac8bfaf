use taintrace::decode::Decoder;
use taintrace::instruction::{Idiom, Instruction, OpClass, Target};
use taintrace::operand::{MemRef, Operand};
use taintrace::propagate::propagate;
use taintrace::regs::{Reg, Registers};
use taintrace::taint::TaintStore;

fn decode(bytes: &[u8]) -> Instruction {
    Decoder::new().decode(0x1000, bytes).unwrap()
}

fn stack_regs() -> Registers {
    Registers {
        rsp: 0x8000,
        ..Registers::default()
    }
}

#[test]
fn test_general_rule_spreads_and_clears() {
    let regs = Registers::default();
    let mut store = TaintStore::new();
    // add rax, rbx
    let add = decode(&[0x48, 0x01, 0xd8]);

    store.mark_reg(Reg::Rbx);
    assert_eq!(propagate(&mut store, &add, &regs), Idiom::Generic);
    assert!(store.is_reg_tainted(Reg::Rax));

    // mov rax, rcx with a clean rcx
    let mov = decode(&[0x48, 0x89, 0xc8]);
    propagate(&mut store, &mov, &regs);
    assert!(!store.is_reg_tainted(Reg::Rax));
    assert!(store.is_reg_tainted(Reg::Rbx));
}

#[test]
fn test_self_xor_clears() {
    let regs = Registers::default();
    let mut store = TaintStore::new();
    store.mark_reg(Reg::Rax);

    let xor = decode(&[0x31, 0xc0]);
    assert_eq!(propagate(&mut store, &xor, &regs), Idiom::SelfXor(Reg::Rax));
    assert!(!store.is_reg_tainted(Reg::Rax));

    // and stays clear when it was clear
    propagate(&mut store, &xor, &regs);
    assert!(!store.is_reg_tainted(Reg::Rax));
}

#[test]
fn test_exchange_one_tainted_swaps() {
    let regs = Registers::default();
    let mut store = TaintStore::new();
    let xchg = decode(&[0x48, 0x87, 0xd8]);

    store.mark_reg(Reg::Rax);
    propagate(&mut store, &xchg, &regs);
    assert!(!store.is_reg_tainted(Reg::Rax));
    assert!(store.is_reg_tainted(Reg::Rbx));

    propagate(&mut store, &xchg, &regs);
    assert!(store.is_reg_tainted(Reg::Rax));
    assert!(!store.is_reg_tainted(Reg::Rbx));
}

#[test]
fn test_exchange_both_or_neither_unchanged() {
    let regs = Registers::default();
    let xchg = decode(&[0x48, 0x87, 0xd8]);

    let mut store = TaintStore::new();
    propagate(&mut store, &xchg, &regs);
    assert!(store.is_empty());

    store.mark_reg(Reg::Rax);
    store.mark_reg(Reg::Rbx);
    propagate(&mut store, &xchg, &regs);
    assert!(store.is_reg_tainted(Reg::Rax));
    assert!(store.is_reg_tainted(Reg::Rbx));
}

#[test]
fn test_push_pop_leave_rsp_alone() {
    let regs = stack_regs();
    let push = decode(&[0x50]);
    let pop = decode(&[0x5b]);

    // tainted push: the slot is tainted, rsp is not
    let mut store = TaintStore::new();
    store.mark_reg(Reg::Rax);
    assert_eq!(propagate(&mut store, &push, &regs), Idiom::PushPop);
    assert!(store.is_mem_tainted(0x8000 - 8, 8));
    assert!(!store.is_reg_tainted(Reg::Rsp));

    // a tainted rsp survives a clean pop
    let mut store = TaintStore::new();
    store.mark_reg(Reg::Rsp);
    store.mark_reg(Reg::Rbx);
    propagate(&mut store, &pop, &regs);
    assert!(store.is_reg_tainted(Reg::Rsp));
    // rsp is a source of the pop, so rbx stays tainted
    assert!(store.is_reg_tainted(Reg::Rbx));

    // clean rsp, tainted slot
    let mut store = TaintStore::new();
    store.mark_mem(0x8000, 8);
    propagate(&mut store, &pop, &regs);
    assert!(store.is_reg_tainted(Reg::Rbx));
    assert!(!store.is_reg_tainted(Reg::Rsp));
}

#[test]
fn test_direct_branch_clears_pc() {
    let regs = stack_regs();
    let mut store = TaintStore::new();
    store.mark_reg(Reg::Pc);

    let jmp = decode(&[0xeb, 0x00]);
    assert_eq!(propagate(&mut store, &jmp, &regs), Idiom::ControlFlow);
    assert!(!store.is_reg_tainted(Reg::Pc));
}

#[test]
fn test_call_with_tainted_pc_taints_return_slot() {
    let regs = stack_regs();
    let mut store = TaintStore::new();
    store.mark_reg(Reg::Pc);

    let call = decode(&[0xe8, 0x00, 0x00, 0x00, 0x00]);
    propagate(&mut store, &call, &regs);
    assert!(store.is_mem_tainted(0x8000 - 8, 8));
    // direct call: the target is fixed
    assert!(!store.is_reg_tainted(Reg::Pc));
}

#[test]
fn test_indirect_branch_follows_target_register() {
    let regs = stack_regs();
    let jmp = decode(&[0xff, 0xe0]);

    let mut store = TaintStore::new();
    store.mark_reg(Reg::Rax);
    propagate(&mut store, &jmp, &regs);
    assert!(store.is_reg_tainted(Reg::Pc));

    store.clear_reg(Reg::Rax);
    propagate(&mut store, &jmp, &regs);
    assert!(!store.is_reg_tainted(Reg::Pc));
}

#[test]
fn test_indirect_call_ignores_rsp() {
    let regs = stack_regs();
    let call = decode(&[0xff, 0xd0]);
    let mut store = TaintStore::new();
    store.mark_reg(Reg::Rsp);
    propagate(&mut store, &call, &regs);
    assert!(!store.is_reg_tainted(Reg::Pc));
    assert!(store.is_reg_tainted(Reg::Rsp));
}

#[test]
fn test_return_follows_popped_address() {
    let regs = stack_regs();
    let ret = decode(&[0xc3]);

    let mut store = TaintStore::new();
    store.mark_mem(0x8000, 8);
    propagate(&mut store, &ret, &regs);
    assert!(store.is_reg_tainted(Reg::Pc));

    store.clear_mem(0x8000, 8);
    propagate(&mut store, &ret, &regs);
    assert!(!store.is_reg_tainted(Reg::Pc));
}

#[test]
fn test_overrides_replace_general_rule() {
    // a hand-built instruction classified as a call never taints its
    // register destinations even with tainted sources
    let regs = stack_regs();
    let call = Instruction::new(0x1000, 2, OpClass::Call, "call rax".to_string())
        .with_srcs(vec![Operand::Reg(Reg::Rax), Operand::Reg(Reg::Rsp)])
        .with_dsts(vec![
            Operand::Mem(MemRef::based(Reg::Rsp, -8, 8)),
            Operand::Reg(Reg::Rsp),
        ])
        .with_target(Target::Indirect(Operand::Reg(Reg::Rax)));

    let mut store = TaintStore::new();
    store.mark_reg(Reg::Rax);
    propagate(&mut store, &call, &regs);
    assert!(!store.is_reg_tainted(Reg::Rsp));
    // pc was clean when the return address was pushed
    assert!(!store.is_mem_tainted(0x8000 - 8, 8));
    assert!(store.is_reg_tainted(Reg::Pc));
}

#[test]
fn test_indirect_call_through_clean_pointer() {
    let buffer = 0x2000;
    let mut regs = Registers {
        rbx: 0x3000,
        rsp: 0x8000,
        ..Registers::default()
    };
    let mut store = TaintStore::new();
    store.mark_mem(buffer, 4);
    let before: Vec<u64> = store.tainted_addrs().copied().collect();

    // mov rax, [rbx]
    propagate(&mut store, &decode(&[0x48, 0x8b, 0x03]), &regs);
    regs.rax = 0x4000;
    // call rax
    propagate(&mut store, &decode(&[0xff, 0xd0]), &regs);

    assert!(!store.is_reg_tainted(Reg::Pc));
    assert!(!store.is_reg_tainted(Reg::Rax));
    assert_eq!(store.tainted_regs().count(), 0);
    let after: Vec<u64> = store.tainted_addrs().copied().collect();
    assert_eq!(before, after);
}
