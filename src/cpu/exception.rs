//! Guest-visible exceptions and their delivery
//!
//! An `ExceptionRequest` is created when a fault or interrupt condition
//! is detected (by an instruction, or asynchronously by a device posting
//! into the pending channel) and consumed exactly once by `deliver`,
//! which sets up the coprocessor 0 state and redirects the program
//! counter to the kernel's vector. Completion happens when the guest
//! executes eret.

use log::debug;

use super::cp0::*;
use super::Cpu;
use crate::devices::malta;
use crate::errors::MachineError;

// exception codes as they appear in Cause.ExcCode
pub const EX_INTERRUPT: u32 = 0;
pub const EX_TLB_LOAD: u32 = 2;
pub const EX_TLB_STORE: u32 = 3;
pub const EX_ADDR_ERROR_LOAD: u32 = 4;
pub const EX_ADDR_ERROR_STORE: u32 = 5;
pub const EX_SYSCALL: u32 = 8;
pub const EX_BREAKPOINT: u32 = 9;
pub const EX_TRAP: u32 = 13;

// exception vectors (no boot rom, so BEV must be clear)
pub const EXV_TLBREFILL: u32 = 0x8000_0000;
pub const EXV_EXCEPTION: u32 = 0x8000_0180;
pub const EXV_INTERRUPT: u32 = 0x8000_0200;

/// A classified exception with the data needed to act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionRequest {
    /// Hardware interrupt on one of the cpu interrupt lines, with the
    /// southbridge irq that raised it.
    Interrupt { interrupt: u32, irq: u32 },
    /// Address error on load or store.
    AddressError { vaddr: u32, store: bool },
    /// TLB miss or invalid entry.
    TlbMiss {
        vaddr: u32,
        store: bool,
        refill: bool,
    },
    Syscall,
    Breakpoint,
    Trap,
}

impl ExceptionRequest {
    pub fn excode(&self) -> u32 {
        match self {
            ExceptionRequest::Interrupt { .. } => EX_INTERRUPT,
            ExceptionRequest::AddressError { store: false, .. } => EX_ADDR_ERROR_LOAD,
            ExceptionRequest::AddressError { store: true, .. } => EX_ADDR_ERROR_STORE,
            ExceptionRequest::TlbMiss { store: false, .. } => EX_TLB_LOAD,
            ExceptionRequest::TlbMiss { store: true, .. } => EX_TLB_STORE,
            ExceptionRequest::Syscall => EX_SYSCALL,
            ExceptionRequest::Breakpoint => EX_BREAKPOINT,
            ExceptionRequest::Trap => EX_TRAP,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.excode() {
            EX_INTERRUPT => "interrupt",
            EX_TLB_LOAD => "tlb load",
            EX_TLB_STORE => "tlb store",
            EX_ADDR_ERROR_LOAD => "address error load",
            EX_ADDR_ERROR_STORE => "address error store",
            EX_SYSCALL => "syscall",
            EX_BREAKPOINT => "breakpoint",
            EX_TRAP => "trap",
            _ => "unknown",
        }
    }
}

impl std::fmt::Display for ExceptionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExceptionRequest::Interrupt { interrupt, irq } => {
                write!(
                    f,
                    "interrupt {} irq {}",
                    malta::interrupt_name(*interrupt),
                    malta::irq_name(*irq)
                )
            }
            ExceptionRequest::AddressError { vaddr, .. } => {
                write!(f, "{} vaddr {:#010x}", self.name(), vaddr)
            }
            ExceptionRequest::TlbMiss { vaddr, refill, .. } => {
                write!(f, "{} vaddr {:#010x} refill {}", self.name(), vaddr, refill)
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Set up exception state and redirect the pc to the right vector.
/// `pc` is the address of the instruction that was executing (or about
/// to execute); it re-executes when the guest returns via eret.
pub fn deliver(cpu: &mut Cpu, pc: u32, req: ExceptionRequest) -> Result<(), MachineError> {
    debug!("deliver {} at {}", req, cpu.symbols.name_offset(pc));

    if cpu.cp0.flag(STATUS_BEV) {
        // we don't have a boot rom
        return Err(MachineError::BootstrapException);
    }
    if cpu.cp0.flag(STATUS_EXL) {
        return Err(MachineError::NestedException);
    }

    let mut pending_mask = 0;
    if let ExceptionRequest::Interrupt { interrupt, .. } = req {
        pending_mask = 1u32 << interrupt;
        if cpu.cp0.get(STATUS_IM) & pending_mask == 0 {
            return Err(MachineError::MaskedInterrupt(interrupt));
        }
        if interrupt != malta::INT_SOUTHBRIDGE_INTR {
            return Err(MachineError::UnknownInterrupt(interrupt));
        }
    }

    cpu.cp0.set_flag(STATUS_EXL, true);
    cpu.cp0.set(CAUSE_EXCODE, req.excode());
    cpu.cp0.set(CAUSE_IP, pending_mask);

    // epc points at the branch when the faulting instruction sits in its
    // delay slot, so eret replays the branch
    let delay_slot = cpu.pc != pc.wrapping_add(4);
    cpu.cp0.set_flag(CAUSE_BD, delay_slot);
    cpu.cp0.registers_mut()[CPR_EPC] = if delay_slot { pc.wrapping_sub(4) } else { pc };

    match req {
        ExceptionRequest::AddressError { vaddr, .. } => {
            cpu.cp0.registers_mut()[CPR_BADVADDR] = vaddr;
        }
        ExceptionRequest::TlbMiss { vaddr, .. } => {
            let vpn2 = vpn2(vaddr);
            cpu.cp0.registers_mut()[CPR_BADVADDR] = vaddr;
            cpu.cp0.set(CONTEXT_BADVPN2, vpn2);
            cpu.cp0.set(ENTRYHI_VPN2, vpn2);
        }
        _ => {}
    }

    cpu.cp0.status_updated()?;

    if let ExceptionRequest::Interrupt { irq, .. } = req {
        // the kernel discovers the irq through the GT interrupt
        // acknowledge register
        cpu.memory.malta_mut().set_irq(irq);
    }

    let vector = match req {
        ExceptionRequest::TlbMiss { refill: true, .. } => EXV_TLBREFILL,
        ExceptionRequest::Interrupt { .. } if cpu.cp0.flag(CAUSE_IV) => EXV_INTERRUPT,
        _ => EXV_EXCEPTION,
    };
    cpu.set_pc(vector);
    Ok(())
}
