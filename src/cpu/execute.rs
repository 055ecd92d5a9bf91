//! Instruction semantics
//!
//! One dispatch per primary opcode, with the SPECIAL/SPECIAL2/REGIMM and
//! coprocessor secondary dispatches split out. Execution either
//! continues, or signals a catchable guest exception through the
//! returned outcome; unrecognised encodings are fatal. The cpu's pc has
//! already advanced to the delay slot when an instruction executes, so
//! branch targets derive from `cpu.pc` and links store `cpu.next_pc`.

use super::decode::*;
use super::exception::ExceptionRequest;
use super::fpu;
use super::Cpu;
use crate::errors::MachineError;

/// What an executed instruction asks of the fetch loop.
pub enum ExecuteOutcome {
    Continue,
    Exception(ExceptionRequest),
}

pub fn execute(cpu: &mut Cpu, isn: u32) -> Result<ExecuteOutcome, MachineError> {
    let rs_v = cpu.reg[rs(isn) as usize];
    let rt_i = rt(isn) as usize;
    let off = simm(isn) as u32;

    match op(isn) {
        OP_SPECIAL => return exec_special(cpu, isn),
        OP_REGIMM => return exec_regimm(cpu, isn),
        OP_SPECIAL2 => return exec_special2(cpu, isn),
        OP_COP0 => return exec_cop0(cpu, isn),
        OP_COP1 => return fpu::exec_cop1(cpu, isn),

        OP_J => {
            cpu.next_pc = jump_target(isn, cpu.pc);
        }
        OP_JAL => {
            cpu.reg[31] = cpu.next_pc;
            cpu.next_pc = jump_target(isn, cpu.pc);
        }
        OP_BEQ => {
            if rs_v == cpu.reg[rt_i] {
                cpu.next_pc = branch_target(isn, cpu.pc);
            }
        }
        OP_BNE => {
            if rs_v != cpu.reg[rt_i] {
                cpu.next_pc = branch_target(isn, cpu.pc);
            }
        }
        OP_BLEZ => {
            if (rs_v as i32) <= 0 {
                cpu.next_pc = branch_target(isn, cpu.pc);
            }
        }
        OP_BGTZ => {
            if (rs_v as i32) > 0 {
                cpu.next_pc = branch_target(isn, cpu.pc);
            }
        }

        OP_ADDIU => cpu.set_reg(rt(isn), rs_v.wrapping_add(off)),
        OP_SLTI => cpu.set_reg(rt(isn), ((rs_v as i32) < simm(isn)) as u32),
        OP_SLTIU => {
            // zero extend both sides; the immediate sign extends first
            // so it covers the ends of the unsigned range
            let value = (rs_v as u64) < (off as u64);
            cpu.set_reg(rt(isn), value as u32);
        }
        OP_ANDI => cpu.set_reg(rt(isn), rs_v & imm(isn)),
        OP_ORI => cpu.set_reg(rt(isn), rs_v | imm(isn)),
        OP_XORI => cpu.set_reg(rt(isn), rs_v ^ imm(isn)),
        OP_LUI => cpu.set_reg(rt(isn), imm(isn) << 16),

        OP_LW => {
            let v = cpu.memory.load_word(rs_v.wrapping_add(off))?;
            cpu.set_reg(rt(isn), v);
        }
        OP_LH => {
            let v = cpu.memory.load_half(rs_v.wrapping_add(off))? as i16 as i32;
            cpu.set_reg(rt(isn), v as u32);
        }
        OP_LHU => {
            let v = cpu.memory.load_half(rs_v.wrapping_add(off))?;
            cpu.set_reg(rt(isn), v as u32);
        }
        OP_LB => {
            let v = cpu.memory.load_byte(rs_v.wrapping_add(off))? as i8 as i32;
            cpu.set_reg(rt(isn), v as u32);
        }
        OP_LBU => {
            let v = cpu.memory.load_byte(rs_v.wrapping_add(off))?;
            cpu.set_reg(rt(isn), v as u32);
        }
        OP_SW => cpu.memory.store_word(rs_v.wrapping_add(off), cpu.reg[rt_i])?,
        OP_SH => cpu
            .memory
            .store_half(rs_v.wrapping_add(off), cpu.reg[rt_i] as u16)?,
        OP_SB => cpu
            .memory
            .store_byte(rs_v.wrapping_add(off), cpu.reg[rt_i] as u8)?,

        OP_LL => {
            let va = rs_v.wrapping_add(off);
            let v = cpu.memory.load_word(va)?;
            cpu.ll_addr = va;
            cpu.ll_bit = true;
            cpu.set_reg(rt(isn), v);
        }
        OP_SC => {
            let va = rs_v.wrapping_add(off);
            // the link is consumed whether or not the store succeeds
            let linked = cpu.ll_bit && va == cpu.ll_addr;
            cpu.ll_bit = false;
            if linked {
                cpu.memory.store_word(va, cpu.reg[rt_i])?;
                cpu.set_reg(rt(isn), 1);
            } else {
                log::debug!("store conditional fail va={:#010x}", va);
                cpu.set_reg(rt(isn), 0);
            }
        }

        OP_LWL => {
            let a = rs_v.wrapping_add(off);
            let lealign = (a & 3) ^ cpu.word_addr_xor;
            let mem = cpu.memory.load_word(a & !3)?;
            let rsh = (lealign + 1) * 8;
            let lsh = 32 - rsh;
            let mask = (0xffff_ffffu64 >> rsh) as u32;
            cpu.set_reg(rt(isn), (mem << lsh) | (cpu.reg[rt_i] & mask));
        }
        OP_LWR => {
            let a = rs_v.wrapping_add(off);
            let lealign = (a & 3) ^ cpu.word_addr_xor;
            let mem = cpu.memory.load_word(a & !3)?;
            let rsh = lealign * 8;
            let lsh = 32 - rsh;
            let mask = ((0xffff_ffffu64 << lsh) & 0xffff_ffff) as u32;
            cpu.set_reg(rt(isn), (cpu.reg[rt_i] & mask) | (mem >> rsh));
        }
        OP_SWL => {
            let a = rs_v.wrapping_add(off);
            let aa = a & !3;
            let lealign = (a & 3) ^ cpu.word_addr_xor;
            let word = cpu.memory.load_word(aa)?;
            let lsh = (lealign + 1) * 8;
            let rsh = 32 - lsh;
            let mask = ((0xffff_ffffu64 << lsh) & 0xffff_ffff) as u32;
            cpu.memory
                .store_word(aa, (word & mask) | (cpu.reg[rt_i] >> rsh))?;
        }
        OP_SWR => {
            let a = rs_v.wrapping_add(off);
            let aa = a & !3;
            let lealign = (a & 3) ^ cpu.word_addr_xor;
            let word = cpu.memory.load_word(aa)?;
            let lsh = lealign * 8;
            let rsh = 32 - lsh;
            let mask = (0xffff_ffffu64 >> rsh) as u32;
            cpu.memory
                .store_word(aa, (cpu.reg[rt_i] << lsh) | (word & mask))?;
        }

        OP_LWC1 => {
            let v = cpu.memory.load_word(rs_v.wrapping_add(off))?;
            cpu.fpu.set_reg(rt(isn), v);
        }
        OP_SWC1 => {
            cpu.memory
                .store_word(rs_v.wrapping_add(off), cpu.fpu.reg(rt(isn)))?;
        }
        OP_LDC1 => {
            let a = rs_v.wrapping_add(off);
            let w0 = cpu.memory.load_word(a)?;
            let w1 = cpu.memory.load_word(a.wrapping_add(4))?;
            // the high word sits at the lower address on a big endian
            // board
            let (lo, hi) = if cpu.memory.byte_order().is_little() {
                (w0, w1)
            } else {
                (w1, w0)
            };
            cpu.fpu.set_double_words(rt(isn), lo, hi)?;
        }
        OP_SDC1 => {
            let a = rs_v.wrapping_add(off);
            let (lo, hi) = cpu.fpu.double_words(rt(isn))?;
            let (w0, w1) = if cpu.memory.byte_order().is_little() {
                (lo, hi)
            } else {
                (hi, lo)
            };
            cpu.memory.store_word(a, w0)?;
            cpu.memory.store_word(a.wrapping_add(4), w1)?;
        }

        OP_PREF => {}

        field => {
            return Err(MachineError::InvalidInstruction {
                what: "opcode",
                field,
                isn,
            })
        }
    }
    Ok(ExecuteOutcome::Continue)
}

fn exec_special(cpu: &mut Cpu, isn: u32) -> Result<ExecuteOutcome, MachineError> {
    let rs_v = cpu.reg[rs(isn) as usize];
    let rt_v = cpu.reg[rt(isn) as usize];
    let rd_f = rd(isn);

    match fn_code(isn) {
        FN_SLL => cpu.set_reg(rd_f, rt_v << sa(isn)),
        FN_SRL => cpu.set_reg(rd_f, rt_v >> sa(isn)),
        FN_SRA => cpu.set_reg(rd_f, ((rt_v as i32) >> sa(isn)) as u32),
        FN_SLLV => cpu.set_reg(rd_f, rt_v << (rs_v & 0x1f)),
        FN_SRLV => cpu.set_reg(rd_f, rt_v >> (rs_v & 0x1f)),
        FN_SRAV => cpu.set_reg(rd_f, ((rt_v as i32) >> (rs_v & 0x1f)) as u32),

        FN_JR => cpu.next_pc = rs_v,
        FN_JALR => {
            // read the target before the link lands, jalr rd == rs is
            // legal if pointless
            let target = rs_v;
            cpu.set_reg(rd_f, cpu.next_pc);
            cpu.next_pc = target;
        }

        FN_MOVZ => {
            if rt_v == 0 {
                cpu.set_reg(rd_f, rs_v);
            }
        }
        FN_MOVN => {
            if rt_v != 0 {
                cpu.set_reg(rd_f, rs_v);
            }
        }

        FN_SYSCALL => return Ok(ExecuteOutcome::Exception(ExceptionRequest::Syscall)),
        FN_BREAK => return Ok(ExecuteOutcome::Exception(ExceptionRequest::Breakpoint)),
        FN_SYNC => {}

        FN_MFHI => cpu.set_reg(rd_f, cpu.hi),
        FN_MTHI => cpu.hi = rs_v,
        FN_MFLO => cpu.set_reg(rd_f, cpu.lo),
        FN_MTLO => cpu.lo = rs_v,

        FN_MULT => {
            // sign extend both operands to 64 bits
            let result = (rs_v as i32 as i64).wrapping_mul(rt_v as i32 as i64) as u64;
            cpu.lo = result as u32;
            cpu.hi = (result >> 32) as u32;
        }
        FN_MULTU => {
            let result = (rs_v as u64) * (rt_v as u64);
            cpu.lo = result as u32;
            cpu.hi = (result >> 32) as u32;
        }
        FN_DIV => {
            // result is unpredictable for a zero divisor, no exception
            let (a, b) = (rs_v as i32, rt_v as i32);
            if b != 0 {
                cpu.lo = a.wrapping_div(b) as u32;
                cpu.hi = a.wrapping_rem(b) as u32;
            }
        }
        FN_DIVU => {
            if rt_v != 0 {
                cpu.lo = rs_v / rt_v;
                cpu.hi = rs_v % rt_v;
            }
        }

        FN_ADDU => cpu.set_reg(rd_f, rs_v.wrapping_add(rt_v)),
        FN_SUBU => cpu.set_reg(rd_f, rs_v.wrapping_sub(rt_v)),
        FN_AND => cpu.set_reg(rd_f, rs_v & rt_v),
        FN_OR => cpu.set_reg(rd_f, rs_v | rt_v),
        FN_XOR => cpu.set_reg(rd_f, rs_v ^ rt_v),
        FN_NOR => cpu.set_reg(rd_f, !(rs_v | rt_v)),
        FN_SLT => cpu.set_reg(rd_f, ((rs_v as i32) < (rt_v as i32)) as u32),
        FN_SLTU => {
            // compare as zero-extended 64 bit values
            cpu.set_reg(rd_f, ((rs_v as u64) < (rt_v as u64)) as u32);
        }

        FN_TNE => {
            if rs_v != rt_v {
                return Ok(ExecuteOutcome::Exception(ExceptionRequest::Trap));
            }
        }

        field => {
            return Err(MachineError::InvalidInstruction {
                what: "function",
                field,
                isn,
            })
        }
    }
    Ok(ExecuteOutcome::Continue)
}

fn exec_special2(cpu: &mut Cpu, isn: u32) -> Result<ExecuteOutcome, MachineError> {
    let rs_v = cpu.reg[rs(isn) as usize];
    let rt_v = cpu.reg[rt(isn) as usize];

    match fn_code(isn) {
        FN2_MADD => {
            let acc = ((cpu.hi as u64) << 32) | cpu.lo as u64;
            let result = ((rs_v as i32 as i64).wrapping_mul(rt_v as i32 as i64) as u64)
                .wrapping_add(acc);
            cpu.lo = result as u32;
            cpu.hi = (result >> 32) as u32;
        }
        FN2_MUL => {
            // low 32 bits of the signed product; hi/lo untouched
            let result = (rs_v as i32 as i64).wrapping_mul(rt_v as i32 as i64);
            cpu.set_reg(rd(isn), result as u32);
        }
        FN2_CLZ => cpu.set_reg(rd(isn), rs_v.leading_zeros()),
        field => {
            return Err(MachineError::InvalidInstruction {
                what: "function2",
                field,
                isn,
            })
        }
    }
    Ok(ExecuteOutcome::Continue)
}

fn exec_regimm(cpu: &mut Cpu, isn: u32) -> Result<ExecuteOutcome, MachineError> {
    let rs_v = cpu.reg[rs(isn) as usize] as i32;

    match rt(isn) {
        RT_BGEZAL => {
            cpu.reg[31] = cpu.next_pc;
            if rs_v >= 0 {
                cpu.next_pc = branch_target(isn, cpu.pc);
            }
        }
        RT_BGEZ => {
            if rs_v >= 0 {
                cpu.next_pc = branch_target(isn, cpu.pc);
            }
        }
        RT_BLTZAL => {
            cpu.reg[31] = cpu.next_pc;
            if rs_v < 0 {
                cpu.next_pc = branch_target(isn, cpu.pc);
            }
        }
        RT_BLTZ => {
            if rs_v < 0 {
                cpu.next_pc = branch_target(isn, cpu.pc);
            }
        }
        field => {
            return Err(MachineError::InvalidInstruction {
                what: "regimm",
                field,
                isn,
            })
        }
    }
    Ok(ExecuteOutcome::Continue)
}

fn exec_cop0(cpu: &mut Cpu, isn: u32) -> Result<ExecuteOutcome, MachineError> {
    let rs_f = rs(isn);
    if rs_f < 0x10 {
        match rs_f {
            CP_RS_MFC0 => {
                let count = (cpu.cycle >> 1) as u32;
                let v = cpu.cp0.move_from(rd(isn), sel(isn), count)?;
                cpu.set_reg(rt(isn), v);
            }
            CP_RS_MTC0 => {
                cpu.cp0.move_to(rd(isn), sel(isn), cpu.reg[rt(isn) as usize])?;
            }
            field => {
                return Err(MachineError::InvalidInstruction {
                    what: "coprocessor rs",
                    field,
                    isn,
                })
            }
        }
        return Ok(ExecuteOutcome::Continue);
    }

    match fn_code(isn) {
        // the board runs untranslated, tlb maintenance is accepted and
        // ignored
        CP_FN_TLBWI | CP_FN_TLBWR => {
            log::debug!("tlb write ignored at {}", cpu.symbols.name_offset(cpu.pc));
        }
        CP_FN_TLBP => {
            cpu.cp0.set_flag(super::cp0::INDEX_PROBEFAIL, true);
        }
        CP_FN_ERET => {
            if cpu.cp0.flag(super::cp0::STATUS_ERL) {
                return Err(MachineError::EretWithErl);
            }
            let epc = cpu.cp0.reg(super::cp0::CPR_EPC);
            // no delay slot on eret
            cpu.set_pc(epc);
            cpu.cp0.set_flag(super::cp0::STATUS_EXL, false);
            cpu.ll_bit = false;
            cpu.cp0.status_updated()?;
        }
        CP_FN_WAIT => cpu.wait_for_exception()?,
        field => {
            return Err(MachineError::InvalidInstruction {
                what: "coprocessor fn",
                field,
                isn,
            })
        }
    }
    Ok(ExecuteOutcome::Continue)
}
