use serde_derive::{Deserialize, Serialize};

use crate::operand::Operand;
use crate::regs::Reg;

/// Coarse opcode class, only as fine as the taint rules need
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Push,
    Pop,
    Xor,
    Xchg,
    Call,
    Jump,
    CondJump,
    Return,
    Other,
}

/// Where a branch goes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Encoded in the instruction, already resolved to an address
    Direct(u64),
    /// Read from a register or memory at run time
    Indirect(Operand),
}

/// A decoded instruction with its sources and destinations made explicit,
/// including the implicit stack operands of push/pop/call/ret.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub addr: u64,
    pub len: u64,
    pub class: OpClass,
    pub srcs: Vec<Operand>,
    pub dsts: Vec<Operand>,
    pub target: Option<Target>,
    pub text: String,
}

/// Which propagation rule applies to an instruction, resolved once per
/// instruction. Checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idiom {
    ControlFlow,
    PushPop,
    SelfXor(Reg),
    Exchange(Reg, Reg),
    Generic,
}

impl Instruction {
    pub fn new(addr: u64, len: u64, class: OpClass, text: String) -> Self {
        Self {
            addr,
            len,
            class,
            srcs: Vec::new(),
            dsts: Vec::new(),
            target: None,
            text,
        }
    }

    pub fn with_srcs(mut self, srcs: Vec<Operand>) -> Self {
        self.srcs = srcs;
        self
    }

    pub fn with_dsts(mut self, dsts: Vec<Operand>) -> Self {
        self.dsts = dsts;
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn is_call(&self) -> bool {
        self.class == OpClass::Call
    }

    pub fn is_return(&self) -> bool {
        self.class == OpClass::Return
    }

    /// Unconditional or conditional jump, or call, to an address fixed in
    /// the encoding
    pub fn is_direct_branch(&self) -> bool {
        matches!(self.target, Some(Target::Direct(_)))
            && matches!(self.class, OpClass::Call | OpClass::Jump | OpClass::CondJump)
    }

    /// Jump or call through a register or memory. Returns are not included.
    pub fn is_indirect_branch(&self) -> bool {
        matches!(self.target, Some(Target::Indirect(_)))
            && matches!(self.class, OpClass::Call | OpClass::Jump)
    }

    /// Reads memory contents. Address-only operands (size 0, as for `lea`)
    /// do not count.
    pub fn reads_memory(&self) -> bool {
        self.srcs
            .iter()
            .any(|op| matches!(op, Operand::Mem(mem) if mem.size > 0))
    }

    pub fn writes_memory(&self) -> bool {
        self.dsts.iter().any(Operand::is_memory)
    }

    pub fn idiom(&self) -> Idiom {
        if matches!(
            self.class,
            OpClass::Call | OpClass::Jump | OpClass::CondJump | OpClass::Return
        ) {
            return Idiom::ControlFlow;
        }

        match (self.class, self.srcs.as_slice()) {
            (OpClass::Push | OpClass::Pop, _) => Idiom::PushPop,
            (OpClass::Xor, [Operand::Reg(a), Operand::Reg(b)]) if a == b => Idiom::SelfXor(*a),
            (OpClass::Xchg, [Operand::Reg(a), Operand::Reg(b)]) => Idiom::Exchange(*a, *b),
            _ => Idiom::Generic,
        }
    }
}
