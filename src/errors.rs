//! Fatal emulation errors
//!
//! Everything here is unrecoverable: either a genuine emulation gap or
//! guest behaviour the machine model does not attempt to handle. Guest
//! visible exceptions (syscall, breakpoint, trap, interrupts) are not
//! errors, see `cpu::exception`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MachineError {
    #[error("unmapped {op} at {addr:#010x}")]
    Unmapped { op: &'static str, addr: u32 },

    #[error("misaligned {op} at {addr:#010x}")]
    Misaligned { op: &'static str, addr: u32 },

    #[error("bad elf image: {0}")]
    BadImage(String),

    #[error("invalid {what} {field:#x} in instruction {isn:#010x}")]
    InvalidInstruction {
        what: &'static str,
        field: u32,
        isn: u32,
    },

    #[error("unknown cp0 register {reg}.{sel} (write: {write})")]
    UnknownCpRegister { reg: u32, sel: u32, write: bool },

    #[error("unknown {name} value {value:#010x}")]
    UnknownCpValue { name: &'static str, value: u32 },

    #[error("unknown {device} read at {addr:#010x}")]
    DeviceRead { device: &'static str, addr: u32 },

    #[error("unknown {device} write at {addr:#010x} <= {value:#x}")]
    DeviceWrite {
        device: &'static str,
        addr: u32,
        value: u32,
    },

    #[error("unsupported {device} command {value:#x}")]
    UnsupportedCommand { device: &'static str, value: u32 },

    #[error("unsupported pci target bus {bus} dev {dev} func {func}")]
    UnsupportedPci { bus: u32, dev: u32, func: u32 },

    #[error("masked interrupt {0}")]
    MaskedInterrupt(u32),

    #[error("unknown interrupt {0}")]
    UnknownInterrupt(u32),

    #[error("exception while status.bev is set (no boot rom)")]
    BootstrapException,

    #[error("exception while status.exl is set")]
    NestedException,

    #[error("eret with status.erl set")]
    EretWithErl,

    #[error("cpu dropped to user mode")]
    UserMode,

    #[error("cp0 compare hit at cycle {0}")]
    CompareHit(u64),

    #[error("wait instruction timed out with no pending exception")]
    WaitTimeout,

    #[error("odd double precision register {0}")]
    OddDoubleRegister(u32),

    #[error("bad snapshot: {0}")]
    BadSnapshot(String),

    #[error("cycle {cycle} at {pc}: {source}")]
    Run {
        cycle: u64,
        pc: String,
        #[source]
        source: Box<MachineError>,
    },
}
