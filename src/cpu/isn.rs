//! Instruction metadata and disassembly
//!
//! Static mnemonic + format-string metadata indexed by the same selector
//! fields the decoder uses. The format strings drive the disassembler:
//! each `{field}` placeholder expands against the instruction word and
//! the live cpu state, with addresses rendered through the symbol table.
//! Execution never consults this table.

use super::decode::*;
use super::Cpu;

#[derive(Clone, Copy)]
pub struct Isn {
    pub name: &'static str,
    pub format: &'static str,
}

const fn isn(name: &'static str, format: &'static str) -> Isn {
    Isn { name, format }
}

// shared format strings
const LOAD: &str = "{rt} <- [{base}+{offset}]: {membaseoffset} <- {baseoffset}";
const STORE: &str = "[{base}+{offset}] <- {rt}: [{baseoffset}] <- {regrt}";
const JUMP: &str = "{jump}";
const CONDBRA: &str = "{rs} ~ {rt}: {regrs} ~ {regrt} => {branch}";
const OPIMM: &str = "{rt} <- {rs} * {imm}";
const OPRRR: &str = "{rd} <- {rs} * {rt}";
const COND: &str = "{rs} ~ {rt}";
const SHIFT: &str = "{rd} <- {rt} * {sa}";
const SHIFTREG: &str = "{rd} <- {rt} * {rs}";
const ZCONDBRA: &str = "{rs} ~ 0: {regrs} => {branch}";
const CONDZMOV: &str = "{rd} <- {rs} if {regrt} ~ 0";
const HLOP: &str = "hi:lo <- {rs} * {rt}";

const NOP: Isn = isn("nop", "");
const UNDEF: Isn = isn("undef", "");

/// gas names of the general registers, plus the hi/lo pseudo registers.
pub const REG_NAMES: [&str; 34] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6",
    "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "s8",
    "ra", "hi", "lo",
];

pub fn gp_reg_name(n: u32) -> &'static str {
    REG_NAMES[n as usize & 0x1f]
}

pub fn cp_reg_name(reg: u32, sel: u32) -> String {
    let name = match (reg, sel) {
        (0, 0) => "Index",
        (1, 0) => "Random",
        (2, 0) => "EntryLo0",
        (3, 0) => "EntryLo1",
        (4, 0) => "Context",
        (5, 0) => "PageMask",
        (6, 0) => "Wired",
        (8, 0) => "BadVaddr",
        (9, 0) => "Count",
        (10, 0) => "EntryHi",
        (11, 0) => "Compare",
        (12, 0) => "Status",
        (12, 1) => "IntCtl",
        (13, 0) => "Cause",
        (14, 0) => "EPC",
        (15, 0) => "PRId",
        (15, 1) => "EBase",
        (16, 0) => "Config",
        (16, 1) => "Config1",
        _ => "unknown",
    };
    format!("{}.{}:{}", reg, sel, name)
}

fn op_isn(op: u32) -> Isn {
    match op {
        OP_J => isn("j", JUMP),
        OP_JAL => isn("jal", JUMP),
        OP_BEQ => isn("beq", CONDBRA),
        OP_BNE => isn("bne", CONDBRA),
        OP_BLEZ => isn("blez", ZCONDBRA),
        OP_BGTZ => isn("bgtz", ZCONDBRA),
        OP_ADDIU => isn("addiu", OPIMM),
        OP_SLTI => isn("slti", OPIMM),
        OP_SLTIU => isn("sltiu", OPIMM),
        OP_ANDI => isn("andi", OPIMM),
        OP_ORI => isn("ori", OPIMM),
        OP_XORI => isn("xori", OPIMM),
        OP_LUI => isn("lui", "{rt} <- {imm}"),
        OP_LL => isn("ll", LOAD),
        OP_LB => isn("lb", LOAD),
        OP_LH => isn("lh", LOAD),
        OP_LWL => isn("lwl", LOAD),
        OP_LW => isn("lw", LOAD),
        OP_LBU => isn("lbu", LOAD),
        OP_LHU => isn("lhu", LOAD),
        OP_LWR => isn("lwr", LOAD),
        OP_SB => isn("sb", STORE),
        OP_SH => isn("sh", STORE),
        OP_SWL => isn("swl", STORE),
        OP_SW => isn("sw", STORE),
        OP_SC => isn("sc", STORE),
        OP_SWR => isn("swr", STORE),
        OP_LWC1 => isn("lwc1", LOAD),
        OP_SWC1 => isn("swc1", STORE),
        OP_LDC1 => isn("ldc1", LOAD),
        OP_SDC1 => isn("sdc1", STORE),
        OP_PREF => isn("pref", ""),
        _ => UNDEF,
    }
}

fn fn_isn(code: u32) -> Isn {
    match code {
        FN_SLL => isn("sll", SHIFT),
        FN_SRL => isn("srl", SHIFT),
        FN_SRA => isn("sra", SHIFT),
        FN_SLLV => isn("sllv", SHIFTREG),
        FN_SRLV => isn("srlv", SHIFTREG),
        FN_SRAV => isn("srav", SHIFTREG),
        FN_JR => isn("jr", "{rs} -> {regrs}"),
        FN_JALR => isn("jalr", "{rd} <- link, {rs} => {regrs}"),
        FN_MOVZ => isn("movz", CONDZMOV),
        FN_MOVN => isn("movn", CONDZMOV),
        FN_SYSCALL => isn("syscall", "{syscall}"),
        FN_BREAK => isn("break", "{syscall}"),
        FN_SYNC => isn("sync", ""),
        FN_MFHI => isn("mfhi", "{rd} <- hi : {hi}"),
        FN_MTHI => isn("mthi", "hi <- {rs} : {regrs}"),
        FN_MFLO => isn("mflo", "{rd} <- lo : {lo}"),
        FN_MTLO => isn("mtlo", "lo <- {rs} : {regrs}"),
        FN_MULT => isn("mult", HLOP),
        FN_MULTU => isn("multu", HLOP),
        FN_DIV => isn("div", HLOP),
        FN_DIVU => isn("divu", HLOP),
        FN_ADDU => isn("addu", OPRRR),
        FN_SUBU => isn("subu", OPRRR),
        FN_AND => isn("and", OPRRR),
        FN_OR => isn("or", OPRRR),
        FN_XOR => isn("xor", OPRRR),
        FN_NOR => isn("nor", OPRRR),
        FN_SLT => isn("slt", OPRRR),
        FN_SLTU => isn("sltu", OPRRR),
        FN_TNE => isn("tne", COND),
        _ => UNDEF,
    }
}

fn fn2_isn(code: u32) -> Isn {
    match code {
        FN2_MADD => isn("madd", HLOP),
        FN2_MUL => isn("mul", OPRRR),
        FN2_CLZ => isn("clz", "{rd} <- clz {rs}"),
        _ => UNDEF,
    }
}

fn rt_isn(code: u32) -> Isn {
    match code {
        RT_BLTZ => isn("bltz", ZCONDBRA),
        RT_BGEZ => isn("bgez", ZCONDBRA),
        RT_BLTZAL => isn("bltzal", ZCONDBRA),
        RT_BGEZAL => isn("bgezal", ZCONDBRA),
        _ => UNDEF,
    }
}

fn cp_isn(word: u32) -> Isn {
    if rs(word) < 0x10 {
        match rs(word) {
            CP_RS_MFC0 => isn("mfc0", "{rt} <- {cprd}"),
            CP_RS_MTC0 => isn("mtc0", "{cprd} <- {rt}"),
            _ => UNDEF,
        }
    } else {
        match fn_code(word) {
            CP_FN_TLBWI => isn("tlbwi", ""),
            CP_FN_TLBWR => isn("tlbwr", ""),
            CP_FN_TLBP => isn("tlbp", ""),
            CP_FN_ERET => isn("eret", ""),
            CP_FN_WAIT => isn("wait", ""),
            _ => UNDEF,
        }
    }
}

fn fp_isn(word: u32) -> Isn {
    match rs(word) {
        FP_RS_MFC1 => isn("mfc1", "{rt} <- {fpfs}"),
        FP_RS_CFC1 => isn("cfc1", "{rt} <- {fpfs}"),
        FP_RS_MTC1 => isn("mtc1", "{fpfs} <- {rt}"),
        FP_RS_CTC1 => isn("ctc1", "{fpfs} <- {rt}"),
        FP_RS_BC1 => isn("bc1{fptf}", "{branch}"),
        FP_RS_S | FP_RS_D | FP_RS_W => match fn_code(word) {
            FP_FN_ADD => isn("add.{fpfmt}", ""),
            FP_FN_SUB => isn("sub.{fpfmt}", ""),
            FP_FN_MUL => isn("mul.{fpfmt}", ""),
            FP_FN_DIV => isn("div.{fpfmt}", ""),
            FP_FN_ABS => isn("abs.{fpfmt}", ""),
            FP_FN_MOV => isn("mov.{fpfmt}", ""),
            FP_FN_NEG => isn("neg.{fpfmt}", ""),
            FP_FN_CVT_S => isn("cvt.s.{fpfmt}", ""),
            FP_FN_CVT_D => isn("cvt.d.{fpfmt}", ""),
            FP_FN_CVT_W => isn("cvt.w.{fpfmt}", ""),
            FP_FN_C_EQ => isn("c.eq.{fpfmt}", ""),
            FP_FN_C_ULT => isn("c.ult.{fpfmt}", ""),
            FP_FN_C_LT => isn("c.lt.{fpfmt}", ""),
            FP_FN_C_LE => isn("c.le.{fpfmt}", ""),
            _ => UNDEF,
        },
        _ => UNDEF,
    }
}

/// Metadata for an instruction word.
pub fn lookup(word: u32) -> Isn {
    match op(word) {
        OP_SPECIAL => {
            if fn_code(word) == FN_SLL && rd(word) == 0 {
                NOP
            } else {
                fn_isn(fn_code(word))
            }
        }
        OP_SPECIAL2 => fn2_isn(fn_code(word)),
        OP_REGIMM => rt_isn(rt(word)),
        OP_COP0 => cp_isn(word),
        OP_COP1 => fp_isn(word),
        other => op_isn(other),
    }
}

/// Mnemonic only, for instruction counting.
pub fn mnemonic(word: u32) -> &'static str {
    lookup(word).name
}

fn fp_format_name(word: u32) -> &'static str {
    match rs(word) {
        FP_RS_S => "s",
        FP_RS_D => "d",
        FP_RS_W => "w",
        _ => "?",
    }
}

fn expand_placeholder(name: &str, word: u32, pc: u32, cpu: &Cpu) -> String {
    let syms = &cpu.symbols;
    match name {
        "rs" => gp_reg_name(rs(word)).into(),
        "rt" => gp_reg_name(rt(word)).into(),
        "rd" => gp_reg_name(rd(word)).into(),
        "base" => gp_reg_name(base(word)).into(),
        "offset" => simm(word).to_string(),
        "imm" => format!("{:#x}", imm(word)),
        "sa" => sa(word).to_string(),
        "regrs" => syms.name(cpu.register(rs(word))),
        "regrt" => syms.name(cpu.register(rt(word))),
        "regrd" => syms.name(cpu.register(rd(word))),
        "cprd" => cp_reg_name(rd(word), sel(word)),
        "fpfs" => format!("f{}", fs(word)),
        "hi" => format!("{:#x}", cpu.hi()),
        "lo" => format!("{:#x}", cpu.lo()),
        "syscall" => format!("{:#x}", syscall_code(word)),
        "branch" => syms.name(branch_target(word, pc.wrapping_add(4))),
        "jump" => syms.name(jump_target(word, pc.wrapping_add(4))),
        "baseoffset" => syms.name(
            cpu.register(base(word))
                .wrapping_add(simm(word) as u32),
        ),
        "membaseoffset" => {
            let addr = cpu.register(base(word)).wrapping_add(simm(word) as u32);
            match cpu.memory.load_word_unchecked(addr) {
                Some(w) => format!("{:#x}", w),
                None => "?".into(),
            }
        }
        "fpfmt" => fp_format_name(word).into(),
        "fptf" => if fp_true(word) { "t" } else { "f" }.into(),
        _ => format!("{{{}}}", name),
    }
}

fn expand(template: &str, word: u32, pc: u32, cpu: &Cpu) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(end) => {
                out.push_str(&expand_placeholder(
                    &rest[start + 1..start + end],
                    word,
                    pc,
                    cpu,
                ));
                rest = &rest[start + end + 1..];
            }
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// One disassembled line: symbolised address, raw word, mnemonic and
/// expanded operands.
pub fn isn_string(cpu: &Cpu, pc: u32, word: u32) -> String {
    let meta = lookup(word);
    let name = expand(meta.name, word, pc, cpu);
    let operands = expand(meta.format, word, pc, cpu);
    format!(
        "{:<40} {:08x} {:<8}{}",
        cpu.symbols.name_addr_offset(pc),
        word,
        name,
        operands
    )
}

/// Non-zero general registers as one line, for tracing.
pub fn gp_reg_string(cpu: &Cpu) -> String {
    let mut s = format!("pc={}", cpu.symbols.name(cpu.pc()));
    for n in 0..32 {
        let v = cpu.register(n);
        if v != 0 {
            s.push_str(&format!(" {}={}", gp_reg_name(n), cpu.symbols.name(v)));
        }
    }
    s
}
