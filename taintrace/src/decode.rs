//! Lowering of x86-64 machine code into the engine's instruction model.
//!
//! yaxpeax only reports the explicit operands in Intel order (destination
//! first). The taint rules need sources and destinations separated, with the
//! implicit stack traffic of push/pop/call/ret spelled out, so that is done
//! here once per decode.

use log::debug;
use yaxpeax_arch::LengthedInstruction;
use yaxpeax_x86::amd64::{
    DisplayStyle, InstDecoder, Instruction as X86Instruction, Opcode, Operand as X86Operand,
    RegSpec,
};

use crate::instruction::{Instruction, OpClass, Target};
use crate::operand::{MemRef, Operand};
use crate::regs::Reg;

/// Longest legal x86 instruction
pub const MAX_INSN_LEN: usize = 15;

const STACK_SLOT: u64 = 8;

/// What an explicit operand turned into
#[derive(Debug, Clone, Copy)]
enum Lowered {
    Op(Operand),
    Imm(i64),
    Ignored,
}

impl Lowered {
    fn operand(self) -> Option<Operand> {
        match self {
            Lowered::Op(op) => Some(op),
            _ => None,
        }
    }
}

pub struct Decoder {
    inner: InstDecoder,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            inner: InstDecoder::default(),
        }
    }

    /// Decode the instruction at `addr` from `bytes`. Returns `None` when the
    /// bytes are not a valid instruction.
    pub fn decode(&self, addr: u64, bytes: &[u8]) -> Option<Instruction> {
        let instr = match self.inner.decode_slice(bytes) {
            Ok(instr) => instr,
            Err(e) => {
                debug!("decode failed at 0x{:x}: {}", addr, e);
                return None;
            }
        };
        Some(lower(addr, &instr))
    }
}

fn lower(addr: u64, instr: &X86Instruction) -> Instruction {
    let len = instr.len().to_const();
    let next = addr.wrapping_add(len);
    let mem_size = instr
        .mem_size()
        .and_then(|size| size.bytes_size())
        .map_or(STACK_SLOT, |size| size as u64);

    let ops: Vec<Lowered> = (0..instr.operand_count())
        .map(|i| lower_operand(instr.operand(i), mem_size, next))
        .collect();
    let explicit = |i: usize| ops.get(i).and_then(|op| op.operand());
    let all_explicit = || ops.iter().filter_map(|op| op.operand()).collect::<Vec<_>>();

    let rsp = Operand::Reg(Reg::Rsp);
    let push_slot = Operand::Mem(MemRef::based(Reg::Rsp, -(STACK_SLOT as i64), STACK_SLOT));
    let pop_slot = Operand::Mem(MemRef::based(Reg::Rsp, 0, STACK_SLOT));
    let text = instr.display_with(DisplayStyle::Intel).to_string();

    match instr.opcode() {
        Opcode::PUSH => {
            let mut srcs: Vec<Operand> = explicit(0).into_iter().collect();
            srcs.push(rsp);
            Instruction::new(addr, len, OpClass::Push, text)
                .with_srcs(srcs)
                .with_dsts(vec![push_slot, rsp])
        }
        Opcode::POP => {
            let mut dsts: Vec<Operand> = explicit(0).into_iter().collect();
            dsts.push(rsp);
            Instruction::new(addr, len, OpClass::Pop, text)
                .with_srcs(vec![pop_slot, rsp])
                .with_dsts(dsts)
        }
        Opcode::CALL => {
            let target = branch_target(ops.first().copied(), next);
            let mut srcs: Vec<Operand> = explicit(0).into_iter().collect();
            srcs.push(rsp);
            let call = Instruction::new(addr, len, OpClass::Call, text)
                .with_srcs(srcs)
                .with_dsts(vec![push_slot, rsp]);
            match target {
                Some(target) => call.with_target(target),
                None => call,
            }
        }
        Opcode::JMP => {
            let target = branch_target(ops.first().copied(), next);
            let jump =
                Instruction::new(addr, len, OpClass::Jump, text).with_srcs(all_explicit());
            match target {
                Some(target) => jump.with_target(target),
                None => jump,
            }
        }
        Opcode::JA | Opcode::JB | Opcode::JRCXZ | Opcode::JG | Opcode::JGE
        | Opcode::JL | Opcode::JLE | Opcode::JNA | Opcode::JNB | Opcode::JNO
        | Opcode::JNP | Opcode::JNS | Opcode::JNZ | Opcode::JO | Opcode::JP
        | Opcode::JS | Opcode::JZ | Opcode::LOOP | Opcode::LOOPNZ
        | Opcode::LOOPZ => {
            let jump = Instruction::new(addr, len, OpClass::CondJump, text);
            match branch_target(ops.first().copied(), next) {
                Some(target) => jump.with_target(target),
                None => jump,
            }
        }
        Opcode::RETURN | Opcode::RETF => Instruction::new(addr, len, OpClass::Return, text)
            .with_srcs(vec![pop_slot, rsp])
            .with_dsts(vec![rsp]),
        Opcode::XOR => {
            // sources in (src, dst) order so `xor a, a` reads as two equal regs
            let srcs = [explicit(1), explicit(0)].into_iter().flatten().collect();
            Instruction::new(addr, len, OpClass::Xor, text)
                .with_srcs(srcs)
                .with_dsts(explicit(0).into_iter().collect())
        }
        Opcode::XCHG => Instruction::new(addr, len, OpClass::Xchg, text)
            .with_srcs(all_explicit())
            .with_dsts(all_explicit()),
        Opcode::LEAVE => Instruction::new(addr, len, OpClass::Other, text)
            .with_srcs(vec![
                Operand::Reg(Reg::Rbp),
                Operand::Mem(MemRef::based(Reg::Rbp, 0, STACK_SLOT)),
            ])
            .with_dsts(vec![rsp, Operand::Reg(Reg::Rbp)]),
        Opcode::CMP | Opcode::TEST => {
            Instruction::new(addr, len, OpClass::Other, text).with_srcs(all_explicit())
        }
        Opcode::LEA => {
            let srcs = explicit(1)
                .map(|op| match op {
                    Operand::Mem(mem) => Operand::Mem(MemRef { size: 0, ..mem }),
                    other => other,
                })
                .into_iter()
                .collect();
            Instruction::new(addr, len, OpClass::Other, text)
                .with_srcs(srcs)
                .with_dsts(explicit(0).into_iter().collect())
        }
        Opcode::MOV | Opcode::MOVZX | Opcode::MOVSX | Opcode::MOVSXD => {
            write_only(addr, len, text, &ops)
        }
        Opcode::IMUL if ops.len() == 3 => write_only(addr, len, text, &ops),
        Opcode::MUL | Opcode::IMUL | Opcode::DIV | Opcode::IDIV if ops.len() == 1 => {
            let mut srcs: Vec<Operand> = explicit(0).into_iter().collect();
            srcs.push(Operand::Reg(Reg::Rax));
            srcs.push(Operand::Reg(Reg::Rdx));
            Instruction::new(addr, len, OpClass::Other, text)
                .with_srcs(srcs)
                .with_dsts(vec![Operand::Reg(Reg::Rax), Operand::Reg(Reg::Rdx)])
        }
        Opcode::NOP => Instruction::new(addr, len, OpClass::Other, text),
        _ => {
            // read-modify-write of the first operand
            Instruction::new(addr, len, OpClass::Other, text)
                .with_srcs(all_explicit())
                .with_dsts(explicit(0).into_iter().collect())
        }
    }
}

/// First operand is written without being read, the rest are read
fn write_only(addr: u64, len: u64, text: String, ops: &[Lowered]) -> Instruction {
    Instruction::new(addr, len, OpClass::Other, text)
        .with_srcs(ops.iter().skip(1).filter_map(|op| op.operand()).collect())
        .with_dsts(ops.first().and_then(|op| op.operand()).into_iter().collect())
}

fn branch_target(op: Option<Lowered>, next: u64) -> Option<Target> {
    match op? {
        Lowered::Imm(rel) => Some(Target::Direct(next.wrapping_add(rel as u64))),
        Lowered::Op(op) => Some(Target::Indirect(op)),
        Lowered::Ignored => None,
    }
}

fn lower_operand(op: X86Operand, size: u64, next: u64) -> Lowered {
    let mem = |base: Option<RegSpec>, index: Option<RegSpec>, scale: u8, disp: i64| {
        if let Some(base) = base {
            if is_pc(&base) {
                // rip-relative: resolve now, the pc never appears as an operand
                return Lowered::Op(Operand::Mem(MemRef::absolute(
                    next.wrapping_add(disp as u64),
                    size,
                )));
            }
        }
        Lowered::Op(Operand::Mem(MemRef::new(
            base.as_ref().and_then(canonical),
            index.as_ref().and_then(canonical),
            scale,
            disp,
            size,
        )))
    };

    match op {
        X86Operand::ImmediateI8(imm) => Lowered::Imm(imm as i64),
        X86Operand::ImmediateU8(imm) => Lowered::Imm(imm as i64),
        X86Operand::ImmediateI16(imm) => Lowered::Imm(imm as i64),
        X86Operand::ImmediateU16(imm) => Lowered::Imm(imm as i64),
        X86Operand::ImmediateI32(imm) => Lowered::Imm(imm as i64),
        X86Operand::ImmediateU32(imm) => Lowered::Imm(imm as i64),
        X86Operand::ImmediateI64(imm) => Lowered::Imm(imm),
        X86Operand::ImmediateU64(imm) => Lowered::Imm(imm as i64),
        X86Operand::Register(reg) | X86Operand::RegisterMaskMerge(reg, _, _) => {
            match canonical(&reg) {
                Some(reg) => Lowered::Op(Operand::Reg(reg)),
                None => Lowered::Ignored,
            }
        }
        X86Operand::DisplacementU32(disp) => {
            Lowered::Op(Operand::Mem(MemRef::absolute(disp as u64, size)))
        }
        X86Operand::DisplacementU64(disp) => {
            Lowered::Op(Operand::Mem(MemRef::absolute(disp, size)))
        }
        X86Operand::RegDeref(base) => mem(Some(base), None, 1, 0),
        X86Operand::RegDisp(base, disp) => mem(Some(base), None, 1, disp as i64),
        X86Operand::RegScale(index, scale) => mem(None, Some(index), scale, 0),
        X86Operand::RegScaleDisp(index, scale, disp) => {
            mem(None, Some(index), scale, disp as i64)
        }
        X86Operand::RegIndexBase(base, index) => mem(Some(base), Some(index), 1, 0),
        X86Operand::RegIndexBaseDisp(base, index, disp) => {
            mem(Some(base), Some(index), 1, disp as i64)
        }
        X86Operand::RegIndexBaseScale(base, index, scale) => {
            mem(Some(base), Some(index), scale, 0)
        }
        X86Operand::RegIndexBaseScaleDisp(base, index, scale, disp) => {
            mem(Some(base), Some(index), scale, disp as i64)
        }
        _ => Lowered::Ignored,
    }
}

fn canonical(reg: &RegSpec) -> Option<Reg> {
    Reg::canonical(reg.name())
}

fn is_pc(reg: &RegSpec) -> bool {
    matches!(reg.name(), "rip" | "eip")
}
