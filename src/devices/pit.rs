//! I8253 programmable interval timer
//!
//! Linux programs counter 0 with a control word (0x34 rate generator or
//! 0x38 one-shot strobe) followed by the counter value lsb then msb. On
//! the msb write the real wall-clock period is computed from the
//! 1.193182 MHz input clock and a callback is scheduled that posts a
//! southbridge timer interrupt. Reprogramming cancels the previously
//! scheduled callback first.

use log::{debug, info};
use std::time::Duration;

use super::malta::{INT_SOUTHBRIDGE_INTR, IRQ_TIMER};
use super::Device;
use crate::cpu::exception::ExceptionRequest;
use crate::errors::MachineError;
use crate::symbols::Symbols;
use crate::timer::TimerHandle;

pub const M_COUNTER_0: u32 = 0x0;
pub const M_COUNTER_1: u32 = 0x1;
pub const M_COUNTER_2: u32 = 0x2;
pub const M_TCW: u32 = 0x3;

/// Input clock, CLOCK_TICK_RATE in the kernel's i8253.h.
pub const CLOCK_RATE: f64 = 1_193_182.0;

/// binary, rate generator, r/w lsb then msb
const TCW_RATE_GEN: u32 = 0x34;
/// software triggered strobe
const TCW_ONE_SHOT: u32 = 0x38;

pub struct Pit {
    base: u32,
    timer: TimerHandle,
    counter0: u32,
    control_word: u32,
    /// 0 = next counter write is the lsb, 1 = the msb
    counter_byte: u32,
}

impl Pit {
    pub fn new(base: u32, timer: TimerHandle) -> Self {
        Pit {
            base,
            timer,
            counter0: 0,
            control_word: 0,
            counter_byte: 0,
        }
    }

    fn control_write(&mut self, value: u32) -> Result<(), MachineError> {
        debug!("pit control word {:#x}", value);
        if value == TCW_RATE_GEN || value == TCW_ONE_SHOT {
            self.control_word = value;
            self.counter_byte = 0;
            Ok(())
        } else {
            Err(MachineError::UnsupportedCommand {
                device: "pit",
                value,
            })
        }
    }

    fn counter0_write(&mut self, value: u32) -> Result<(), MachineError> {
        debug!("pit counter 0 write {:#x}", value);
        match self.counter_byte {
            0 => {
                self.counter0 = value & 0xff;
                self.counter_byte = 1;
                Ok(())
            }
            1 => {
                self.counter0 = (self.counter0 & 0xff) | ((value & 0xff) << 8);
                self.counter_byte = 0;
                self.timer.cancel();
                self.schedule();
                Ok(())
            }
            step => Err(MachineError::UnsupportedCommand {
                device: "pit latch",
                value: step,
            }),
        }
    }

    fn schedule(&mut self) {
        let request = ExceptionRequest::Interrupt {
            interrupt: INT_SOUTHBRIDGE_INTR,
            irq: IRQ_TIMER,
        };
        let count = self.counter0 as f64;

        if self.control_word == TCW_RATE_GEN {
            // the counter rolls from 1 to the reload value, never
            // reaching 0
            let hz = CLOCK_RATE / (count - 1.5);
            let dur = Duration::from_nanos((1_000_000_000.0 / hz).round() as u64);
            info!("pit rate generator {:.3} hz, period {:?}", hz, dur);
            self.timer.schedule_periodic(dur, request);
        } else {
            let secs = (count - 0.5) / CLOCK_RATE;
            let dur = Duration::from_nanos((secs * 1_000_000_000.0) as u64);
            info!("pit one shot in {:?}", dur);
            self.timer.schedule_once(dur, request);
        }
    }
}

impl Device for Pit {
    fn init(&mut self, sym: &mut Symbols) {
        sym.put_sized(self.base + M_COUNTER_0, "M_PIT_COUNTER_0", 1);
        sym.put_sized(self.base + M_COUNTER_1, "M_PIT_COUNTER_1", 1);
        sym.put_sized(self.base + M_COUNTER_2, "M_PIT_COUNTER_2", 1);
        sym.put_sized(self.base + M_TCW, "M_PIT_TCW", 1);
    }

    fn is_mapped(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.base) < 4
    }

    fn read(&mut self, addr: u32, _size: u32) -> Result<u32, MachineError> {
        Err(MachineError::DeviceRead {
            device: "pit",
            addr,
        })
    }

    fn write(&mut self, addr: u32, _size: u32, value: u32) -> Result<(), MachineError> {
        match addr - self.base {
            M_TCW => self.control_write(value & 0xff),
            M_COUNTER_0 => self.counter0_write(value & 0xff),
            _ => Err(MachineError::DeviceWrite {
                device: "pit",
                addr,
                value,
            }),
        }
    }
}
