//! Intel 82371AB (PIIX4) southbridge
//!
//! Carries the legacy peripherals (and bits of the SMSC super-io
//! controller) behind one window: the cascaded interrupt controllers,
//! the interval timer, the keyboard controller, the real time clock and
//! the two uarts. Dispatch to sub-devices is the same first-match scan
//! the board itself uses.

use log::debug;
use std::sync::mpsc::Sender;

use super::kbc::Kbc;
use super::malta::{IRQ_UART0, IRQ_UART1};
use super::pic::Pic;
use super::pit::Pit;
use super::rtc::Rtc;
use super::uart::Uart;
use super::Device;
use crate::cpu::exception::ExceptionRequest;
use crate::errors::MachineError;
use crate::symbols::Symbols;
use crate::system::SystemEvent;
use crate::timer::TimerHandle;

// offsets within the southbridge window
pub const M_PIC_MASTER: u32 = 0x20;
pub const M_PIT: u32 = 0x40;
pub const M_KEYBOARD: u32 = 0x60;
pub const M_RTC: u32 = 0x70;
pub const M_PIC_SLAVE: u32 = 0xa0;
pub const M_DMA2_MASK_REG: u32 = 0xd4;
pub const M_COM2: u32 = 0x2f8;
pub const M_COM1: u32 = 0x3f8;

const WINDOW: u32 = 0xd00;

pub struct Piix4 {
    base: u32,
    com1: Uart,
    com2: Uart,
    pic1: Pic,
    pic2: Pic,
    kbc: Kbc,
    rtc: Rtc,
    pit: Pit,
}

impl Piix4 {
    pub fn new(
        base: u32,
        exceptions: Sender<ExceptionRequest>,
        events: Sender<SystemEvent>,
        timer: TimerHandle,
    ) -> Self {
        Piix4 {
            base,
            com1: Uart::new(
                base + M_COM1,
                "COM1",
                true,
                IRQ_UART1,
                exceptions.clone(),
                events.clone(),
            ),
            com2: Uart::new(
                base + M_COM2,
                "COM2",
                false,
                IRQ_UART0,
                exceptions.clone(),
                events,
            ),
            pic1: Pic::new(base + M_PIC_MASTER, true),
            pic2: Pic::new(base + M_PIC_SLAVE, false),
            kbc: Kbc::new(base + M_KEYBOARD, exceptions),
            rtc: Rtc::new(base + M_RTC),
            pit: Pit::new(base + M_PIT, timer),
        }
    }

    fn devices_mut(&mut self) -> [&mut dyn Device; 7] {
        [
            &mut self.com1,
            &mut self.com2,
            &mut self.pic1,
            &mut self.pic2,
            &mut self.kbc,
            &mut self.rtc,
            &mut self.pit,
        ]
    }

    pub fn com1_mut(&mut self) -> &mut Uart {
        &mut self.com1
    }

    pub fn pic1(&self) -> &Pic {
        &self.pic1
    }
}

impl Device for Piix4 {
    fn init(&mut self, sym: &mut Symbols) {
        sym.put(self.base, "M_PIIX4");
        sym.put(self.base + M_DMA2_MASK_REG, "M_DMA2_MASK_REG");
        for d in self.devices_mut() {
            d.init(sym);
        }
    }

    fn is_mapped(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.base) < WINDOW
    }

    fn read(&mut self, addr: u32, size: u32) -> Result<u32, MachineError> {
        for d in self.devices_mut() {
            if d.is_mapped(addr) {
                return d.read(addr, size);
            }
        }
        Err(MachineError::DeviceRead {
            device: "piix4",
            addr,
        })
    }

    fn write(&mut self, addr: u32, size: u32, value: u32) -> Result<(), MachineError> {
        for d in self.devices_mut() {
            if d.is_mapped(addr) {
                return d.write(addr, size, value);
            }
        }
        match addr - self.base {
            // asm/dma.h
            M_DMA2_MASK_REG => {
                debug!("enable dma channel 4+{}", value);
                Ok(())
            }
            _ => Err(MachineError::DeviceWrite {
                device: "piix4",
                addr,
                value,
            }),
        }
    }
}
