//! 8042 keyboard controller
//!
//! Command/data port pair as documented in various contradictory
//! sources. Multi-step controller commands park the command byte in
//! `data_cmd` until the follow-up data write arrives; device commands
//! that answer with several bytes pack the reply into one word and shift
//! it out a byte per status-gated read. Replies raise the keyboard or
//! mouse irq when the matching interrupt enable bit is set in the config
//! byte.

use log::debug;
use std::sync::mpsc::Sender;

use super::malta::{INT_SOUTHBRIDGE_INTR, IRQ_KEYBOARD, IRQ_MOUSE};
use super::Device;
use crate::cpu::exception::ExceptionRequest;
use crate::errors::MachineError;
use crate::symbols::Symbols;

/// data read/write
pub const M_DATA: u32 = 0;
/// command (write), status (read)
pub const M_CMDSTATUS: u32 = 4;

// controller commands
pub const CMD_READCB: u32 = 0x20;
pub const CMD_WRITECB: u32 = 0x60;
pub const CMD_DISABLEAUX: u32 = 0xa7;
pub const CMD_ENABLEAUX: u32 = 0xa8;
pub const CMD_IFTESTAUX: u32 = 0xa9;
pub const CMD_SELFTEST: u32 = 0xaa;
pub const CMD_DISABLEKEY: u32 = 0xad;
pub const CMD_ENABLEKEY: u32 = 0xae;
pub const CMD_WRITEKEYOUT: u32 = 0xd2;
pub const CMD_WRITEAUXOUT: u32 = 0xd3;
pub const CMD_WRITEAUXIN: u32 = 0xd4;

// status bits
pub const ST_OUTPUTFULL: u32 = 0x01;
pub const ST_CMDDATA: u32 = 0x08;
pub const ST_NOTINHIBITED: u32 = 0x10;
pub const ST_AUXDATA: u32 = 0x20;

// config byte bits
pub const CB_ENABLEKEYINT: u32 = 0x01;
pub const CB_ENABLEAUXINT: u32 = 0x02;
pub const CB_DISABLEKEY: u32 = 0x10;
pub const CB_DISABLEAUX: u32 = 0x20;

// keyboard device commands
pub const KB_SETLED: u32 = 0xed;
pub const KB_IDENTIFY: u32 = 0xf2;
pub const KB_RESET: u32 = 0xff;

pub struct Kbc {
    base: u32,
    exceptions: Sender<ExceptionRequest>,
    /// reply bytes, low byte first; shifted out by data reads
    data: u32,
    status: u32,
    config: u32,
    /// controller command awaiting its data byte
    data_cmd: u32,
    /// device command awaiting its data byte
    dev_cmd: u32,
}

impl Kbc {
    pub fn new(base: u32, exceptions: Sender<ExceptionRequest>) -> Self {
        Kbc {
            base,
            exceptions,
            data: 0,
            status: 0,
            config: 0,
            data_cmd: 0,
            dev_cmd: 0,
        }
    }

    fn push_data(&mut self, value: u32, aux: bool) {
        self.data = value;
        self.status = ST_OUTPUTFULL | if aux { ST_AUXDATA } else { 0 };
        let enable = if aux { CB_ENABLEAUXINT } else { CB_ENABLEKEYINT };
        if self.config & enable != 0 {
            debug!("kbc irq aux={}", aux);
            let _ = self.exceptions.send(ExceptionRequest::Interrupt {
                interrupt: INT_SOUTHBRIDGE_INTR,
                irq: if aux { IRQ_MOUSE } else { IRQ_KEYBOARD },
            });
        }
    }

    fn read_data(&mut self) -> u32 {
        let v = self.data & 0xff;
        let rest = self.data >> 8;
        debug!("kbc read data {:#x} remaining {:#x}", v, rest);
        if rest != 0 {
            let aux = self.status & ST_AUXDATA != 0;
            self.push_data(rest, aux);
        } else {
            self.data = 0;
            self.status = 0;
        }
        v
    }

    fn write_command(&mut self, value: u32) -> Result<(), MachineError> {
        debug!("kbc command {:#x}", value);
        self.data_cmd = 0;

        match value {
            CMD_READCB => {
                self.data = self.config;
                self.status = ST_OUTPUTFULL;
            }
            CMD_WRITECB | CMD_WRITEKEYOUT | CMD_WRITEAUXOUT | CMD_WRITEAUXIN => {
                // wait for the data byte
                self.data_cmd = value;
                self.status = ST_CMDDATA;
            }
            CMD_DISABLEAUX => {
                self.config |= CB_DISABLEAUX;
                self.status = 0;
            }
            CMD_ENABLEAUX => {
                self.config &= !CB_DISABLEAUX;
                self.status = 0;
            }
            CMD_DISABLEKEY => {
                self.config |= CB_DISABLEKEY;
                self.status = 0;
            }
            CMD_ENABLEKEY => {
                self.config &= !CB_DISABLEKEY;
                self.status = 0;
            }
            CMD_IFTESTAUX => {
                self.data = 0;
                self.status = ST_OUTPUTFULL;
            }
            CMD_SELFTEST => {
                self.data = 0x55;
                self.status = ST_OUTPUTFULL;
            }
            _ => {
                return Err(MachineError::UnsupportedCommand {
                    device: "kbc",
                    value,
                })
            }
        }
        Ok(())
    }

    fn write_data(&mut self, value: u32) -> Result<(), MachineError> {
        if self.status & ST_CMDDATA != 0 {
            self.write_controller_data(value)
        } else if self.dev_cmd == 0 {
            self.write_device_command(value)
        } else {
            self.write_device_data(value)
        }
    }

    fn write_controller_data(&mut self, value: u32) -> Result<(), MachineError> {
        debug!("kbc data {:#x} for command {:#x}", value, self.data_cmd);
        let cmd = self.data_cmd;
        self.data_cmd = 0;
        match cmd {
            CMD_WRITECB => {
                self.config = value;
                self.status = 0;
                Ok(())
            }
            CMD_WRITEAUXOUT => {
                self.push_data(value, true);
                Ok(())
            }
            CMD_WRITEKEYOUT => {
                self.push_data(value, false);
                Ok(())
            }
            _ => Err(MachineError::UnsupportedCommand {
                device: "kbc data",
                value: cmd,
            }),
        }
    }

    fn write_device_command(&mut self, value: u32) -> Result<(), MachineError> {
        // atkbd probe path
        debug!("kbc device command {:#x}", value);
        match value {
            KB_SETLED => {
                self.push_data(0xfa, false);
                self.dev_cmd = KB_SETLED;
            }
            KB_IDENTIFY => {
                // ack, then the id bytes
                self.push_data(0x83ab_fa, false);
            }
            KB_RESET => {
                // ack, then self test pass
                self.push_data(0xaafa, false);
            }
            _ => {
                return Err(MachineError::UnsupportedCommand {
                    device: "kbc device",
                    value,
                })
            }
        }
        Ok(())
    }

    fn write_device_data(&mut self, value: u32) -> Result<(), MachineError> {
        debug!("kbc device data {:#x} for {:#x}", value, self.dev_cmd);
        let cmd = self.dev_cmd;
        self.dev_cmd = 0;
        match cmd {
            KB_SETLED => Ok(()),
            _ => Err(MachineError::UnsupportedCommand {
                device: "kbc device data",
                value: cmd,
            }),
        }
    }
}

impl Device for Kbc {
    fn init(&mut self, sym: &mut Symbols) {
        sym.put_sized(self.base + M_DATA, "M_KBC_DATA", 1);
        sym.put_sized(self.base + M_CMDSTATUS, "M_KBC_CMDSTATUS", 1);
    }

    fn is_mapped(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.base) <= M_CMDSTATUS
    }

    fn read(&mut self, addr: u32, _size: u32) -> Result<u32, MachineError> {
        match addr - self.base {
            M_DATA => Ok(self.read_data()),
            M_CMDSTATUS => {
                self.status |= ST_NOTINHIBITED;
                Ok(self.status)
            }
            _ => Err(MachineError::DeviceRead {
                device: "kbc",
                addr,
            }),
        }
    }

    fn write(&mut self, addr: u32, _size: u32, value: u32) -> Result<(), MachineError> {
        let value = value & 0xff;
        match addr - self.base {
            M_DATA => self.write_data(value),
            M_CMDSTATUS => self.write_command(value),
            _ => Err(MachineError::DeviceWrite {
                device: "kbc",
                addr,
                value,
            }),
        }
    }
}
