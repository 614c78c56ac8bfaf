//! Exception scoring.
//!
//! The rules are an ordered list evaluated against the facts gathered at the
//! faulting instruction. The first rule that matches decides the verdict and
//! nothing after it runs, so the order of [`RULES`] is the precedence policy.

use serde_derive::{Deserialize, Serialize};

use crate::exception::ExceptionCode;
use crate::instruction::Instruction;
use crate::regs::{Reg, Registers};
use crate::taint::TaintStore;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub score: u8,
    pub reason: String,
}

impl Verdict {
    fn new(score: u8, reason: &str) -> Self {
        Self {
            score,
            reason: reason.to_string(),
        }
    }

    fn tainted(tainted: bool, hit: (u8, &str), miss: (u8, &str)) -> Self {
        if tainted {
            Self::new(hit.0, hit.1)
        } else {
            Self::new(miss.0, miss.1)
        }
    }
}

/// Everything the rules look at, captured once per exception
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facts {
    pub code: Option<ExceptionCode>,
    /// Whether the faulting address can be read
    pub readable: bool,
    pub pc_tainted: bool,
    pub stack_tainted: bool,
    pub is_call: bool,
    pub is_ret: bool,
    pub is_direct: bool,
    pub is_indirect: bool,
    pub mem_read: bool,
    pub mem_write: bool,
    pub tainted_src: bool,
    pub tainted_dst: bool,
}

impl Facts {
    /// Gather facts about a fault. `instr` is `None` when the faulting
    /// address could not be decoded, in which case only the code and pointer
    /// rules can match.
    pub fn gather(
        code: ExceptionCode,
        readable: bool,
        instr: Option<&Instruction>,
        store: &TaintStore,
        regs: &Registers,
    ) -> Self {
        let mut facts = Self {
            code: Some(code),
            readable,
            pc_tainted: store.is_reg_tainted(Reg::Pc),
            stack_tainted: store.is_reg_tainted(Reg::Rsp),
            ..Self::default()
        };

        if let Some(instr) = instr {
            facts.is_call = instr.is_call();
            facts.is_ret = instr.is_return();
            facts.is_direct = instr.is_direct_branch();
            facts.is_indirect = instr.is_indirect_branch();
            facts.mem_read = instr.reads_memory();
            facts.mem_write = instr.writes_memory();
            facts.tainted_src = store.any_tainted(&instr.srcs, regs);
            facts.tainted_dst = store.any_tainted(&instr.dsts, regs);
        }

        facts
    }
}

type Rule = fn(&Facts) -> Option<Verdict>;

/// Scoring rules in precedence order
pub static RULES: &[Rule] = &[
    oob_execution,
    illegal_instruction,
    divide_by_zero,
    breakpoint,
    branching,
    return_,
    write,
    read,
];

fn oob_execution(facts: &Facts) -> Option<Verdict> {
    (!facts.readable).then(|| {
        Verdict::tainted(
            facts.pc_tainted,
            (100, "oob execution tainted pc"),
            (50, "oob execution"),
        )
    })
}

fn illegal_instruction(facts: &Facts) -> Option<Verdict> {
    (facts.code == Some(ExceptionCode::IllegalInstruction)).then(|| {
        Verdict::tainted(
            facts.pc_tainted,
            (100, "illegal instruction tainted pc"),
            (50, "illegal instruction"),
        )
    })
}

fn divide_by_zero(facts: &Facts) -> Option<Verdict> {
    (facts.code == Some(ExceptionCode::IntDivideByZero))
        .then(|| Verdict::new(50, "divide by zero"))
}

fn breakpoint(facts: &Facts) -> Option<Verdict> {
    (facts.code == Some(ExceptionCode::Breakpoint)).then(|| Verdict::new(25, "breakpoint"))
}

fn branching(facts: &Facts) -> Option<Verdict> {
    (facts.is_direct || facts.is_indirect || facts.is_call).then(|| {
        Verdict::tainted(
            facts.pc_tainted,
            (75, "branching tainted pc"),
            (25, "branching"),
        )
    })
}

fn return_(facts: &Facts) -> Option<Verdict> {
    facts.is_ret.then(|| {
        Verdict::tainted(
            facts.pc_tainted || facts.stack_tainted,
            (100, "return with taint"),
            (75, "return"),
        )
    })
}

fn write(facts: &Facts) -> Option<Verdict> {
    facts.mem_write.then(|| {
        Verdict::tainted(
            facts.tainted_src || facts.tainted_dst,
            (75, "tainted write"),
            (50, "write"),
        )
    })
}

fn read(facts: &Facts) -> Option<Verdict> {
    facts
        .mem_read
        .then(|| Verdict::tainted(facts.tainted_src, (75, "tainted read"), (25, "read")))
}

/// Score a fault. Falls back to "unknown" when no rule matches.
pub fn triage(facts: &Facts) -> Verdict {
    RULES
        .iter()
        .find_map(|rule| rule(facts))
        .unwrap_or_else(|| Verdict::new(50, "unknown"))
}
