use serde_derive::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as DisplayResult};

use crate::regs::{Reg, Registers};

/// A memory reference as `[base + index * scale + disp]`, `size` bytes wide
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRef {
    pub base: Option<Reg>,
    pub index: Option<Reg>,
    pub scale: u8,
    pub disp: i64,
    pub size: u64,
}

impl MemRef {
    pub fn new(base: Option<Reg>, index: Option<Reg>, scale: u8, disp: i64, size: u64) -> Self {
        Self {
            base,
            index,
            scale,
            disp,
            size,
        }
    }

    /// `size` bytes at a fixed address
    pub fn absolute(addr: u64, size: u64) -> Self {
        Self::new(None, None, 1, addr as i64, size)
    }

    /// `size` bytes at `[reg + disp]`
    pub fn based(reg: Reg, disp: i64, size: u64) -> Self {
        Self::new(Some(reg), None, 1, disp, size)
    }

    pub fn address(&self, regs: &Registers) -> u64 {
        let base = self.base.map_or(0, |reg| regs.get(reg));
        let index = self
            .index
            .map_or(0, |reg| regs.get(reg).wrapping_mul(self.scale as u64));
        base.wrapping_add(index).wrapping_add(self.disp as u64)
    }

    /// Registers that feed the address computation
    pub fn address_regs(&self) -> impl Iterator<Item = Reg> {
        self.base.into_iter().chain(self.index)
    }
}

impl Display for MemRef {
    fn fmt(&self, f: &mut Formatter) -> DisplayResult {
        write!(f, "[")?;
        let mut first = true;
        if let Some(base) = self.base {
            write!(f, "{}", base)?;
            first = false;
        }
        if let Some(index) = self.index {
            if !first {
                write!(f, " + ")?;
            }
            write!(f, "{} * {}", index, self.scale)?;
            first = false;
        }
        if first {
            write!(f, "{:#x}", self.disp as u64)?;
        } else if self.disp < 0 {
            write!(f, " - {:#x}", self.disp.unsigned_abs())?;
        } else if self.disp > 0 {
            write!(f, " + {:#x}", self.disp)?;
        }
        write!(f, "]:{}", self.size)
    }
}

/// Something an instruction reads or writes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Mem(MemRef),
}

impl Operand {
    pub fn is_reg(&self, reg: Reg) -> bool {
        matches!(self, Operand::Reg(r) if *r == reg)
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Mem(_))
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter) -> DisplayResult {
        match self {
            Operand::Reg(reg) => write!(f, "{}", reg),
            Operand::Mem(mem) => write!(f, "{}", mem),
        }
    }
}
