use serde_derive::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as DisplayResult};

use crate::regs::Registers;

/// Hardware exception codes, as the platform reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    AccessViolation,
    InPageError,
    InvalidHandle,
    IllegalInstruction,
    PrivInstruction,
    IntDivideByZero,
    IntOverflow,
    FltDivideByZero,
    ArrayBoundsExceeded,
    DatatypeMisalignment,
    Breakpoint,
    SingleStep,
    GuardPage,
    StackOverflow,
    StackBufferOverrun,
    HeapCorruption,
    Other(u32),
}

const CODES: &[(ExceptionCode, u32, &str)] = &[
    (ExceptionCode::AccessViolation, 0xC000_0005, "EXCEPTION_ACCESS_VIOLATION"),
    (ExceptionCode::InPageError, 0xC000_0006, "EXCEPTION_IN_PAGE_ERROR"),
    (ExceptionCode::InvalidHandle, 0xC000_0008, "EXCEPTION_INVALID_HANDLE"),
    (ExceptionCode::IllegalInstruction, 0xC000_001D, "EXCEPTION_ILLEGAL_INSTRUCTION"),
    (ExceptionCode::PrivInstruction, 0xC000_0096, "EXCEPTION_PRIV_INSTRUCTION"),
    (ExceptionCode::IntDivideByZero, 0xC000_0094, "EXCEPTION_INT_DIVIDE_BY_ZERO"),
    (ExceptionCode::IntOverflow, 0xC000_0095, "EXCEPTION_INT_OVERFLOW"),
    (ExceptionCode::FltDivideByZero, 0xC000_008E, "EXCEPTION_FLT_DIVIDE_BY_ZERO"),
    (ExceptionCode::ArrayBoundsExceeded, 0xC000_008C, "EXCEPTION_ARRAY_BOUNDS_EXCEEDED"),
    (ExceptionCode::DatatypeMisalignment, 0x8000_0002, "EXCEPTION_DATATYPE_MISALIGNMENT"),
    (ExceptionCode::Breakpoint, 0x8000_0003, "EXCEPTION_BREAKPOINT"),
    (ExceptionCode::SingleStep, 0x8000_0004, "EXCEPTION_SINGLE_STEP"),
    (ExceptionCode::GuardPage, 0x8000_0001, "EXCEPTION_GUARD_PAGE"),
    (ExceptionCode::StackOverflow, 0xC000_00FD, "EXCEPTION_STACK_OVERFLOW"),
    (ExceptionCode::StackBufferOverrun, 0xC000_0409, "EXCEPTION_STACK_BUFFER_OVERRUN"),
    (ExceptionCode::HeapCorruption, 0xC000_0374, "EXCEPTION_HEAP_CORRUPTION"),
];

impl ExceptionCode {
    pub fn from_raw(raw: u32) -> Self {
        CODES
            .iter()
            .find(|(_, value, _)| *value == raw)
            .map_or(ExceptionCode::Other(raw), |(code, _, _)| *code)
    }

    pub fn raw(&self) -> u32 {
        match self {
            ExceptionCode::Other(raw) => *raw,
            known => CODES
                .iter()
                .find(|(code, _, _)| code == known)
                .map_or(0, |(_, value, _)| *value),
        }
    }
}

impl From<u32> for ExceptionCode {
    fn from(raw: u32) -> Self {
        Self::from_raw(raw)
    }
}

impl Display for ExceptionCode {
    fn fmt(&self, f: &mut Formatter) -> DisplayResult {
        match CODES.iter().find(|(code, _, _)| code == self) {
            Some((_, _, name)) => write!(f, "{}", name),
            None => write!(f, "0x{:08x}", self.raw()),
        }
    }
}

/// Everything captured at the moment of an exception. Frozen once built and
/// used for the report and the memory dump.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExceptionContext {
    /// Raw exception code
    pub code: u32,
    /// Address of the faulting instruction
    pub address: u64,
    pub regs: Registers,
    #[serde(default)]
    pub thread_id: u64,
    /// Opaque platform exception record, kept for the memory dump
    #[serde(default)]
    pub record: Vec<u8>,
}

impl ExceptionContext {
    pub fn new(code: u32, address: u64, regs: Registers) -> Self {
        Self {
            code,
            address,
            regs,
            thread_id: 0,
            record: Vec::new(),
        }
    }

    pub fn code(&self) -> ExceptionCode {
        ExceptionCode::from_raw(self.code)
    }
}
