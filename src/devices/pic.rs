//! 82C59 programmable interrupt controller (PIIX4 style)
//!
//! Two cascaded chips, each a command/data register pair. Linux's boot
//! path programs the four initialisation command words in order and then
//! talks to the interrupt mask register through the data port; that is
//! the subset modeled here. The ICW sequence is tracked by a step
//! counter that resets after ICW4 (or after ICW3 when ICW1 announced no
//! ICW4).

use log::debug;

use super::Device;
use crate::errors::MachineError;
use crate::symbols::Symbols;

/// Init Command Word 1, Operational Command Words 2 and 3.
pub const M_CMD: u32 = 0;
/// Init Command Words 2-4, Operational Command Word 1.
pub const M_DATA: u32 = 1;

pub struct Pic {
    base: u32,
    master: bool,
    icw1: u32,
    icw2: u32,
    icw3: u32,
    icw4: u32,
    /// interrupt mask register
    ocw1: u32,
    ocw2: u32,
    ocw3: u32,
    /// which init command word the next data write is, 0 = initialised
    init_step: u32,
}

impl Pic {
    pub fn new(base: u32, master: bool) -> Self {
        Pic {
            base,
            master,
            icw1: 0,
            icw2: 0,
            icw3: 0,
            icw4: 0,
            ocw1: 0,
            ocw2: 0,
            ocw3: 0,
            init_step: 0,
        }
    }

    fn label(&self) -> &'static str {
        if self.master {
            "pic1"
        } else {
            "pic2"
        }
    }

    pub fn imr(&self) -> u32 {
        self.ocw1
    }

    /// True once the full ICW sequence has completed at least once.
    pub fn initialised(&self) -> bool {
        self.init_step == 0 && self.icw1 != 0
    }

    fn write_command(&mut self, value: u32) -> Result<(), MachineError> {
        if value & 0x10 != 0 {
            // ICW1 starts the init sequence
            debug!(
                "{} icw1 {:#x} icw4needed={} single={} ltim={}",
                self.label(),
                value,
                value & 0x1 != 0,
                value & 0x2 != 0,
                value & 0x8 != 0
            );
            self.icw1 = value;
            self.init_step = 1;
            Ok(())
        } else if value & 0x8 == 0 {
            debug!("{} ocw2 {:#x}", self.label(), value);
            self.ocw2 = value;
            Ok(())
        } else {
            if value & 0x4 != 0 {
                // poll mode is not part of the boot path
                return Err(MachineError::UnsupportedCommand {
                    device: "pic",
                    value,
                });
            }
            debug!("{} ocw3 {:#x}", self.label(), value);
            self.ocw3 = value;
            Ok(())
        }
    }

    fn write_data(&mut self, value: u32) -> Result<(), MachineError> {
        match self.init_step {
            0 => {
                debug!("{} ocw1 (imr) {:#x}", self.label(), value);
                self.ocw1 = value;
            }
            1 => {
                debug!("{} icw2 {:#x}", self.label(), value);
                self.icw2 = value;
                self.init_step = 2;
            }
            2 => {
                debug!("{} icw3 {:#x}", self.label(), value);
                self.icw3 = value;
                if self.master {
                    debug!("{} cascade={}", self.label(), value & 0x4 != 0);
                }
                // ICW4 only follows when ICW1 said so
                self.init_step = if self.icw1 & 0x1 != 0 { 3 } else { 0 };
            }
            3 => {
                debug!(
                    "{} icw4 {:#x} nested={} auto-eoi={} 8086={}",
                    self.label(),
                    value,
                    value & 0x10 != 0,
                    value & 0x2 != 0,
                    value & 0x1 != 0
                );
                self.icw4 = value;
                self.init_step = 0;
            }
            step => {
                return Err(MachineError::UnsupportedCommand {
                    device: "pic init",
                    value: step,
                })
            }
        }
        Ok(())
    }
}

impl Device for Pic {
    fn init(&mut self, sym: &mut Symbols) {
        let name = if self.master { "M_PIC1" } else { "M_PIC2" };
        sym.put_sized(self.base + M_CMD, &format!("{}_CMD", name), 1);
        sym.put_sized(self.base + M_DATA, &format!("{}_IMR", name), 1);
    }

    fn is_mapped(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.base) < 2
    }

    fn read(&mut self, addr: u32, _size: u32) -> Result<u32, MachineError> {
        match addr - self.base {
            M_DATA => {
                debug!("{} read imr {:#x}", self.label(), self.ocw1);
                Ok(self.ocw1)
            }
            _ => Err(MachineError::DeviceRead {
                device: "pic",
                addr,
            }),
        }
    }

    fn write(&mut self, addr: u32, _size: u32, value: u32) -> Result<(), MachineError> {
        let value = value & 0xff;
        match addr - self.base {
            M_CMD => self.write_command(value),
            M_DATA => self.write_data(value),
            _ => Err(MachineError::DeviceWrite {
                device: "pic",
                addr,
                value,
            }),
        }
    }
}
