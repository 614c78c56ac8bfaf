use taintrace::operand::{MemRef, Operand};
use taintrace::regs::{Reg, Registers};
use taintrace::taint::{TaintStore, TaintedRange};

#[test]
fn test_mark_clear_register() {
    let regs = Registers::default();
    let mut store = TaintStore::new();
    let rax = Operand::Reg(Reg::Rax);

    store.mark(&rax, &regs);
    store.mark(&rax, &regs);
    assert!(store.is_tainted(&rax, &regs));
    assert_eq!(store.tainted_regs().count(), 1);

    assert!(store.clear(&rax, &regs));
    assert!(!store.clear(&rax, &regs));
    assert!(!store.is_tainted(&rax, &regs));
    assert!(store.is_empty());
}

#[test]
fn test_subregisters_share_taint() {
    let mut store = TaintStore::new();
    store.mark_reg(Reg::canonical("al").unwrap());
    assert!(store.is_reg_tainted(Reg::canonical("rax").unwrap()));
    assert!(store.is_reg_tainted(Reg::canonical("eax").unwrap()));
    assert_eq!(Reg::canonical("r10d"), Some(Reg::R10));
    assert_eq!(Reg::canonical("ymm3"), Reg::canonical("xmm3"));
    assert_eq!(Reg::canonical("cs"), None);
}

#[test]
fn test_mark_clear_memory() {
    let regs = Registers {
        rbx: 0x1000,
        ..Registers::default()
    };
    let mut store = TaintStore::new();
    let dword = Operand::Mem(MemRef::based(Reg::Rbx, 0, 4));

    store.mark(&dword, &regs);
    store.mark(&dword, &regs);
    assert_eq!(store.tainted_addrs().count(), 4);
    assert!(store.is_mem_tainted(0x1003, 1));
    assert!(!store.is_mem_tainted(0x1004, 1));

    // one clean byte over a tainted dword leaves the rest tainted
    store.clear(&Operand::Mem(MemRef::absolute(0x1001, 1)), &regs);
    assert!(store.is_mem_tainted(0x1000, 1));
    assert!(!store.is_mem_tainted(0x1001, 1));
    assert!(store.is_mem_tainted(0x1002, 2));
    assert!(store.is_tainted(&dword, &regs));

    assert!(store.clear(&dword, &regs));
    assert!(!store.clear(&dword, &regs));
    assert!(store.is_empty());
}

#[test]
fn test_tainted_address_register_taints_access() {
    let regs = Registers {
        rsi: 0x5000,
        rcx: 2,
        ..Registers::default()
    };
    let mut store = TaintStore::new();
    let access = Operand::Mem(MemRef::new(Some(Reg::Rsi), Some(Reg::Rcx), 4, 8, 4));
    assert!(!store.is_tainted(&access, &regs));

    store.mark_reg(Reg::Rcx);
    assert!(store.is_tainted(&access, &regs));

    store.clear_reg(Reg::Rcx);
    store.mark_mem(0x5000 + 2 * 4 + 8, 1);
    assert!(store.is_tainted(&access, &regs));
}

#[test]
fn test_ranges_coalesce() {
    let mut store = TaintStore::new();
    for addr in [105, 100, 102, 101, 106] {
        store.mark_mem(addr, 1);
    }
    assert_eq!(
        store.ranges(),
        vec![
            TaintedRange {
                start: 100,
                size: 3
            },
            TaintedRange {
                start: 105,
                size: 2
            },
        ]
    );
}

#[test]
fn test_ranges_empty() {
    assert!(TaintStore::new().ranges().is_empty());
}
