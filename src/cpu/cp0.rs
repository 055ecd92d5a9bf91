//! Coprocessor 0: system control registers
//!
//! The register file is the sparse (register, select) grid stored flat as
//! `register + select * 32`. Only the pairs the Linux boot path touches
//! are legal; moves to or from anything else are fatal, uniformly for
//! reads and writes. A few flags derived from Status (kernel mode,
//! interrupts enabled) are cached so the fetch loop does not re-decode
//! the register every cycle.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::MachineError;

// flat indices: register + select * 32
pub const CPR_INDEX: usize = 0;
pub const CPR_RANDOM: usize = 1;
pub const CPR_ENTRYLO0: usize = 2;
pub const CPR_ENTRYLO1: usize = 3;
pub const CPR_CONTEXT: usize = 4;
pub const CPR_PAGEMASK: usize = 5;
pub const CPR_WIRED: usize = 6;
pub const CPR_BADVADDR: usize = 8;
pub const CPR_COUNT: usize = 9;
pub const CPR_ENTRYHI: usize = 10;
pub const CPR_COMPARE: usize = 11;
pub const CPR_STATUS: usize = 12;
pub const CPR_CAUSE: usize = 13;
pub const CPR_EPC: usize = 14;
pub const CPR_PRID: usize = 15;
pub const CPR_CONFIG: usize = 16;
pub const CPR_CONFIG1: usize = 16 + 32;

/// A bit field within a coprocessor 0 register.
#[derive(Clone, Copy)]
pub struct CpField {
    pub reg: usize,
    pub shift: u32,
    pub mask: u32,
}

impl CpField {
    pub const fn new(reg: usize, shift: u32, width: u32) -> Self {
        CpField {
            reg,
            shift,
            mask: ((1u64 << width) - 1) as u32,
        }
    }

    /// Mask positioned within the register.
    pub const fn reg_mask(&self) -> u32 {
        self.mask << self.shift
    }
}

pub const STATUS_IE: CpField = CpField::new(CPR_STATUS, 0, 1);
pub const STATUS_EXL: CpField = CpField::new(CPR_STATUS, 1, 1);
pub const STATUS_ERL: CpField = CpField::new(CPR_STATUS, 2, 1);
pub const STATUS_UM: CpField = CpField::new(CPR_STATUS, 4, 1);
pub const STATUS_IM: CpField = CpField::new(CPR_STATUS, 8, 8);
pub const STATUS_BEV: CpField = CpField::new(CPR_STATUS, 22, 1);
pub const STATUS_CU0: CpField = CpField::new(CPR_STATUS, 28, 1);
pub const STATUS_CU1: CpField = CpField::new(CPR_STATUS, 29, 1);

pub const CAUSE_EXCODE: CpField = CpField::new(CPR_CAUSE, 2, 5);
pub const CAUSE_IP: CpField = CpField::new(CPR_CAUSE, 8, 8);
pub const CAUSE_IV: CpField = CpField::new(CPR_CAUSE, 23, 1);
pub const CAUSE_BD: CpField = CpField::new(CPR_CAUSE, 31, 1);

pub const PRID_REVISION: CpField = CpField::new(CPR_PRID, 0, 8);
pub const PRID_PROCID: CpField = CpField::new(CPR_PRID, 8, 8);
pub const PRID_COMPANYID: CpField = CpField::new(CPR_PRID, 16, 8);

pub const CONTEXT_BADVPN2: CpField = CpField::new(CPR_CONTEXT, 4, 19);
pub const ENTRYHI_VPN2: CpField = CpField::new(CPR_ENTRYHI, 13, 19);
pub const INDEX_INDEX: CpField = CpField::new(CPR_INDEX, 0, 4);
pub const INDEX_PROBEFAIL: CpField = CpField::new(CPR_INDEX, 31, 1);

/// Virtual page number pair for a virtual address.
#[inline(always)]
pub fn vpn2(vaddr: u32) -> u32 {
    vaddr >> 13
}

#[derive(Serialize, Deserialize)]
pub struct Cp0 {
    reg: Vec<u32>,
    kernel_mode: bool,
    interrupts_enabled: bool,
}

impl Cp0 {
    pub fn new(little_endian: bool) -> Self {
        let mut cp0 = Cp0 {
            reg: vec![0u32; 64],
            kernel_mode: true,
            interrupts_enabled: false,
        };

        // reboot state
        cp0.set_flag(STATUS_EXL, true);
        cp0.set_flag(STATUS_ERL, true);
        cp0.set_flag(STATUS_BEV, true);
        cp0.set_flag(STATUS_CU0, true);
        cp0.set_flag(STATUS_CU1, true);
        cp0.update_status_flags();

        cp0.set(PRID_PROCID, 0x80);
        cp0.set(PRID_COMPANYID, 1);

        // 15: big endian, 7: tlb
        cp0.reg[CPR_CONFIG] =
            (1 << 31) | ((if little_endian { 0 } else { 1 }) << 15) | (1 << 7) | (1 << 1);
        // 25: tlb entries - 1
        cp0.reg[CPR_CONFIG1] = 15 << 25;

        cp0.reg[CPR_COMPARE] = u32::MAX;

        cp0
    }

    pub fn reg(&self, idx: usize) -> u32 {
        self.reg[idx]
    }

    pub fn registers(&self) -> &[u32] {
        &self.reg
    }

    pub fn registers_mut(&mut self) -> &mut Vec<u32> {
        &mut self.reg
    }

    pub fn get(&self, f: CpField) -> u32 {
        (self.reg[f.reg] >> f.shift) & f.mask
    }

    pub fn flag(&self, f: CpField) -> bool {
        self.get(f) != 0
    }

    pub fn set(&mut self, f: CpField, value: u32) {
        let r = &mut self.reg[f.reg];
        *r = (*r & !f.reg_mask()) | ((value & f.mask) << f.shift);
    }

    pub fn set_flag(&mut self, f: CpField, value: bool) {
        self.set(f, value as u32);
    }

    pub fn kernel_mode(&self) -> bool {
        self.kernel_mode
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    fn index(reg: u32, sel: u32) -> Option<usize> {
        if reg < 32 && sel < 2 {
            Some((reg + sel * 32) as usize)
        } else {
            None
        }
    }

    /// Move-from (mfc0). `count` is the cycle-derived Count value,
    /// materialized only when read.
    pub fn move_from(&mut self, reg: u32, sel: u32, count: u32) -> Result<u32, MachineError> {
        let unknown = MachineError::UnknownCpRegister {
            reg,
            sel,
            write: false,
        };
        let cpr = Self::index(reg, sel).ok_or(unknown)?;
        match cpr {
            CPR_STATUS | CPR_PRID | CPR_CONFIG | CPR_CONFIG1 | CPR_CAUSE | CPR_ENTRYHI
            | CPR_WIRED | CPR_EPC | CPR_BADVADDR | CPR_CONTEXT => {}
            CPR_COUNT => self.reg[CPR_COUNT] = count,
            _ => {
                return Err(MachineError::UnknownCpRegister {
                    reg,
                    sel,
                    write: false,
                })
            }
        }
        Ok(self.reg[cpr])
    }

    /// Move-to (mtc0). Unknown pairs are rejected before the value is
    /// even looked at.
    pub fn move_to(&mut self, reg: u32, sel: u32, value: u32) -> Result<(), MachineError> {
        let unknown = MachineError::UnknownCpRegister {
            reg,
            sel,
            write: true,
        };
        let cpr = Self::index(reg, sel).ok_or(unknown)?;
        let old = self.reg[cpr];
        if old != value {
            debug!(
                "mtc0 {}.{} {:#x} <- {:#x}",
                reg, sel, old, value
            );
        }

        match cpr {
            CPR_INDEX => self.reg[cpr] = value & 0xf,
            CPR_ENTRYLO0 | CPR_ENTRYLO1 => self.reg[cpr] = value & 0x7fff_ffff,
            CPR_ENTRYHI => self.reg[cpr] = value & 0xffff_f0ff,
            CPR_PAGEMASK => self.reg[cpr] = value & 0x00ff_f000,
            CPR_CONTEXT | CPR_WIRED => {
                if old != value {
                    return Err(MachineError::UnknownCpValue {
                        name: "context/wired",
                        value,
                    });
                }
            }
            CPR_CONFIG => {
                if old != value {
                    return Err(MachineError::UnknownCpValue {
                        name: "config",
                        value,
                    });
                }
            }
            CPR_STATUS => return self.set_status(value),
            CPR_CAUSE => return self.set_cause(value),
            CPR_COMPARE => {
                debug!("set compare {:#x}", value);
                self.reg[cpr] = value;
            }
            CPR_EPC => self.reg[cpr] = value,
            _ => {
                return Err(MachineError::UnknownCpRegister {
                    reg,
                    sel,
                    write: true,
                })
            }
        }
        Ok(())
    }

    fn set_cause(&mut self, value: u32) -> Result<(), MachineError> {
        // only the interrupt vector select bit is writable
        let mask = CAUSE_IV.reg_mask();
        if value & !mask != 0 {
            return Err(MachineError::UnknownCpValue {
                name: "cause",
                value,
            });
        }
        self.reg[CPR_CAUSE] = (self.reg[CPR_CAUSE] & !mask) | (value & mask);
        Ok(())
    }

    fn set_status(&mut self, value: u32) -> Result<(), MachineError> {
        let mask = STATUS_CU1.reg_mask()
            | STATUS_CU0.reg_mask()
            | STATUS_BEV.reg_mask()
            | STATUS_IM.reg_mask()
            | STATUS_UM.reg_mask()
            | STATUS_ERL.reg_mask()
            | STATUS_EXL.reg_mask()
            | STATUS_IE.reg_mask();
        if value & !mask != 0 {
            return Err(MachineError::UnknownCpValue {
                name: "status",
                value,
            });
        }
        self.reg[CPR_STATUS] = value & mask;
        self.status_updated()
    }

    /// Replace the whole register file (snapshot restore).
    pub fn restore(&mut self, regs: Vec<u32>) -> Result<(), MachineError> {
        if regs.len() != self.reg.len() {
            return Err(MachineError::BadSnapshot(format!(
                "cp0 register count {}",
                regs.len()
            )));
        }
        self.reg = regs;
        self.status_updated()
    }

    /// Recompute the Status-derived flags. User mode is not modeled.
    pub fn status_updated(&mut self) -> Result<(), MachineError> {
        self.update_status_flags();
        if !self.kernel_mode {
            return Err(MachineError::UserMode);
        }
        Ok(())
    }

    fn update_status_flags(&mut self) {
        let ie = self.flag(STATUS_IE);
        let exl = self.flag(STATUS_EXL);
        let erl = self.flag(STATUS_ERL);
        let um = self.flag(STATUS_UM);

        // kernel mode if UM = 0, or EXL = 1, or ERL = 1
        self.kernel_mode = !um || exl || erl;
        // interrupts enabled if IE = 1 and EXL = 0 and ERL = 0
        self.interrupts_enabled = ie && !exl && !erl;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_state() {
        let cp0 = Cp0::new(false);
        assert!(cp0.flag(STATUS_EXL));
        assert!(cp0.flag(STATUS_ERL));
        assert!(cp0.flag(STATUS_BEV));
        assert!(cp0.kernel_mode());
        assert!(!cp0.interrupts_enabled());
        assert_eq!(cp0.get(PRID_COMPANYID), 1);
        assert_eq!(cp0.get(PRID_PROCID), 0x80);
        // big endian bit
        assert_eq!(cp0.reg(CPR_CONFIG) & (1 << 15), 1 << 15);
        assert_eq!(Cp0::new(true).reg(CPR_CONFIG) & (1 << 15), 0);
    }

    #[test]
    fn test_status_write_enables_interrupts() {
        let mut cp0 = Cp0::new(false);
        let v = STATUS_IE.reg_mask() | STATUS_IM.reg_mask() | STATUS_CU0.reg_mask();
        cp0.move_to(CPR_STATUS as u32, 0, v).unwrap();
        assert!(cp0.interrupts_enabled());
        assert!(cp0.kernel_mode());
    }

    #[test]
    fn test_unknown_pair_rejected_both_ways() {
        let mut cp0 = Cp0::new(false);
        // Random (reg 1) is not in the allow list
        assert!(cp0.move_from(1, 0, 0).is_err());
        assert!(cp0.move_to(1, 0, 0).is_err());
        // same-value writes are rejected just the same
        assert!(cp0.move_to(25, 0, 0).is_err());
    }

    #[test]
    fn test_cause_only_iv_writable() {
        let mut cp0 = Cp0::new(false);
        cp0.move_to(CPR_CAUSE as u32, 0, CAUSE_IV.reg_mask()).unwrap();
        assert!(cp0.flag(CAUSE_IV));
        assert!(cp0.move_to(CPR_CAUSE as u32, 0, 0x3).is_err());
    }

    #[test]
    fn test_count_materialized_on_read() {
        let mut cp0 = Cp0::new(false);
        assert_eq!(cp0.move_from(CPR_COUNT as u32, 0, 1234).unwrap(), 1234);
    }
}
