//! Malta status display
//!
//! Write-only LED bar, hex ASCII word and eight ASCII position
//! registers. Every write recomputes the combined display string and
//! emits it as a display event for whatever front-end is listening.

use std::sync::mpsc::Sender;

use super::Device;
use crate::errors::MachineError;
use crate::symbols::Symbols;
use crate::system::SystemEvent;

pub const M_LEDBAR: u32 = 0x8;
pub const M_ASCIIWORD: u32 = 0x10;
pub const M_ASCIIPOS0: u32 = 0x18;

const WINDOW: u32 = 0x80;
/// ascii position registers are 8 bytes apart
const ASCIIPOS_STRIDE: u32 = 8;

pub struct DisplayPanel {
    base: u32,
    events: Sender<SystemEvent>,
    led_bar: u32,
    ascii_word: u32,
    ascii_pos: [u8; 8],
}

impl DisplayPanel {
    pub fn new(base: u32, events: Sender<SystemEvent>) -> Self {
        DisplayPanel {
            base,
            events,
            led_bar: 0,
            ascii_word: 0,
            ascii_pos: [0; 8],
        }
    }

    pub fn text(&self) -> String {
        let mut s = format!("{:b} {:x} ", self.led_bar, self.ascii_word);
        for &b in &self.ascii_pos {
            s.push(if b != 0 { b as char } else { ' ' });
        }
        s
    }

    fn changed(&mut self) {
        let _ = self.events.send(SystemEvent::DisplayText(self.text()));
    }
}

impl Device for DisplayPanel {
    fn init(&mut self, sym: &mut Symbols) {
        sym.put(self.base, "M_DISPLAY");
        sym.put_sized(self.base + M_LEDBAR, "M_DISPLAY_LEDBAR", 4);
        sym.put_sized(self.base + M_ASCIIWORD, "M_DISPLAY_ASCIIWORD", 4);
        for n in 0..8u32 {
            sym.put_sized(
                self.base + M_ASCIIPOS0 + n * ASCIIPOS_STRIDE,
                &format!("M_DISPLAY_ASCIIPOS{}", n),
                4,
            );
        }
    }

    fn is_mapped(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.base) < WINDOW
    }

    fn read(&mut self, addr: u32, _size: u32) -> Result<u32, MachineError> {
        Err(MachineError::DeviceRead {
            device: "display",
            addr,
        })
    }

    fn write(&mut self, addr: u32, _size: u32, value: u32) -> Result<(), MachineError> {
        let offset = addr - self.base;
        match offset {
            M_LEDBAR => self.led_bar = value,
            M_ASCIIWORD => self.ascii_word = value,
            o if o >= M_ASCIIPOS0
                && o < M_ASCIIPOS0 + 8 * ASCIIPOS_STRIDE
                && (o - M_ASCIIPOS0) % ASCIIPOS_STRIDE == 0 =>
            {
                self.ascii_pos[((o - M_ASCIIPOS0) / ASCIIPOS_STRIDE) as usize] = value as u8;
            }
            _ => {
                return Err(MachineError::DeviceWrite {
                    device: "display",
                    addr,
                    value,
                })
            }
        }
        self.changed();
        Ok(())
    }
}
