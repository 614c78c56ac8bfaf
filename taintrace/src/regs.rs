//! Register identities used as taint keys.
//!
//! Every register the decoder hands us is folded into its full-width parent
//! before it touches the taint store, so `al`, `ax`, `eax` and `rax` are all
//! the same key. Vector registers fold the same way (`xmm3`, `ymm3` and `zmm3`
//! share one key).

use serde_derive::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as DisplayResult};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Reg {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Vector(u8),
    /// Not a real readable/writable operand, only a taint-propagation
    /// bookkeeping slot meaning "the next instruction pointer is attacker
    /// influenced". The decoder never produces it.
    Pc,
}

/// General purpose registers in the order they are reported
pub const GPRS: [Reg; 16] = [
    Reg::Rax,
    Reg::Rbx,
    Reg::Rcx,
    Reg::Rdx,
    Reg::Rsp,
    Reg::Rbp,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];

impl Reg {
    /// Fold a register name of any width into its canonical identity.
    /// Registers we do not track (segment, flags, control, masks, x87)
    /// return `None`.
    pub fn canonical(name: &str) -> Option<Reg> {
        let reg = match name {
            "rax" | "eax" | "ax" | "ah" | "al" => Reg::Rax,
            "rbx" | "ebx" | "bx" | "bh" | "bl" => Reg::Rbx,
            "rcx" | "ecx" | "cx" | "ch" | "cl" => Reg::Rcx,
            "rdx" | "edx" | "dx" | "dh" | "dl" => Reg::Rdx,
            "rsp" | "esp" | "sp" | "spl" => Reg::Rsp,
            "rbp" | "ebp" | "bp" | "bpl" => Reg::Rbp,
            "rsi" | "esi" | "si" | "sil" => Reg::Rsi,
            "rdi" | "edi" | "di" | "dil" => Reg::Rdi,
            _ => return Self::canonical_numbered(name),
        };
        Some(reg)
    }

    /// `r8`..`r15` with their `d`/`w`/`b`/`l` suffixes, and vector registers
    fn canonical_numbered(name: &str) -> Option<Reg> {
        if let Some(rest) = name
            .strip_prefix("xmm")
            .or_else(|| name.strip_prefix("ymm"))
            .or_else(|| name.strip_prefix("zmm"))
        {
            return rest.parse::<u8>().ok().map(Reg::Vector);
        }

        let rest = name.strip_prefix('r')?;
        let digits = rest.trim_end_matches(|c| matches!(c, 'd' | 'w' | 'b' | 'l'));
        match digits.parse::<u8>().ok()? {
            8 => Some(Reg::R8),
            9 => Some(Reg::R9),
            10 => Some(Reg::R10),
            11 => Some(Reg::R11),
            12 => Some(Reg::R12),
            13 => Some(Reg::R13),
            14 => Some(Reg::R14),
            15 => Some(Reg::R15),
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Reg::Rax => "rax".into(),
            Reg::Rbx => "rbx".into(),
            Reg::Rcx => "rcx".into(),
            Reg::Rdx => "rdx".into(),
            Reg::Rsp => "rsp".into(),
            Reg::Rbp => "rbp".into(),
            Reg::Rsi => "rsi".into(),
            Reg::Rdi => "rdi".into(),
            Reg::R8 => "r8".into(),
            Reg::R9 => "r9".into(),
            Reg::R10 => "r10".into(),
            Reg::R11 => "r11".into(),
            Reg::R12 => "r12".into(),
            Reg::R13 => "r13".into(),
            Reg::R14 => "r14".into(),
            Reg::R15 => "r15".into(),
            Reg::Vector(n) => format!("xmm{}", n),
            Reg::Pc => "rip".into(),
        }
    }
}

impl Display for Reg {
    fn fmt(&self, f: &mut Formatter) -> DisplayResult {
        write!(f, "{}", self.name())
    }
}

/// A snapshot of the general purpose registers of one thread
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Registers {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
}

impl Registers {
    /// Value of a register. Vector registers never take part in address
    /// computation and read as zero.
    pub fn get(&self, reg: Reg) -> u64 {
        match reg {
            Reg::Rax => self.rax,
            Reg::Rbx => self.rbx,
            Reg::Rcx => self.rcx,
            Reg::Rdx => self.rdx,
            Reg::Rsp => self.rsp,
            Reg::Rbp => self.rbp,
            Reg::Rsi => self.rsi,
            Reg::Rdi => self.rdi,
            Reg::R8 => self.r8,
            Reg::R9 => self.r9,
            Reg::R10 => self.r10,
            Reg::R11 => self.r11,
            Reg::R12 => self.r12,
            Reg::R13 => self.r13,
            Reg::R14 => self.r14,
            Reg::R15 => self.r15,
            Reg::Pc => self.rip,
            Reg::Vector(_) => 0,
        }
    }

    pub fn set(&mut self, reg: Reg, value: u64) {
        let slot = match reg {
            Reg::Rax => &mut self.rax,
            Reg::Rbx => &mut self.rbx,
            Reg::Rcx => &mut self.rcx,
            Reg::Rdx => &mut self.rdx,
            Reg::Rsp => &mut self.rsp,
            Reg::Rbp => &mut self.rbp,
            Reg::Rsi => &mut self.rsi,
            Reg::Rdi => &mut self.rdi,
            Reg::R8 => &mut self.r8,
            Reg::R9 => &mut self.r9,
            Reg::R10 => &mut self.r10,
            Reg::R11 => &mut self.r11,
            Reg::R12 => &mut self.r12,
            Reg::R13 => &mut self.r13,
            Reg::R14 => &mut self.r14,
            Reg::R15 => &mut self.r15,
            Reg::Pc => &mut self.rip,
            Reg::Vector(_) => return,
        };
        *slot = value;
    }
}
