//! Malta board
//!
//! Maps the flat physical address space onto the fixed set of board
//! peripherals: the GT northbridge, the PIIX4 southbridge (which carries
//! its own sub-devices) and the status display. The device list is
//! closed; dispatch is a first-match linear scan, which is deterministic
//! because the windows do not overlap.

use log::debug;
use std::sync::mpsc::Sender;

use super::display::DisplayPanel;
use super::gt::Gt;
use super::piix4::Piix4;
use super::Device;
use crate::cpu::exception::ExceptionRequest;
use crate::errors::MachineError;
use crate::memory::ByteOrder;
use crate::symbols::Symbols;
use crate::system::SystemEvent;
use crate::timer::TimerHandle;

// physical board map
pub const M_SDRAM: u32 = 0x0;
pub const M_UNCACHED_EX_H: u32 = 0x100;
pub const M_PCI1: u32 = 0x0800_0000;
pub const M_PIIX4: u32 = 0x1000_0000;
pub const M_PCI2: u32 = 0x1800_0000;
pub const M_GTBASE: u32 = 0x1be0_0000;
pub const M_CBUS: u32 = 0x1c00_0000;
pub const M_MONITORFLASH: u32 = 0x1e00_0000;
pub const M_RESERVED: u32 = 0x1e40_0000;
pub const M_DEVICES: u32 = 0x1f00_0000;
pub const M_DISPLAY: u32 = 0x1f00_0400;
pub const M_BOOTROM: u32 = 0x1fc0_0000;
pub const M_REVISION: u32 = 0x1fc0_0010;

/// Malta core card revision read back at M_REVISION.
const CORE_LV: u32 = 1;

// southbridge irq lines (8259 inputs)
pub const IRQ_TIMER: u32 = 0;
pub const IRQ_KEYBOARD: u32 = 1;
pub const IRQ_CASCADE: u32 = 2;
pub const IRQ_UART0: u32 = 3;
pub const IRQ_UART1: u32 = 4;
pub const IRQ_FLOPPY: u32 = 6;
pub const IRQ_PARALLEL: u32 = 7;
pub const IRQ_RTC: u32 = 8;
pub const IRQ_I2C: u32 = 9;
pub const IRQ_PCI_AB: u32 = 10;
pub const IRQ_PCI_CD: u32 = 11;
pub const IRQ_MOUSE: u32 = 12;
pub const IRQ_IDE0: u32 = 14;
pub const IRQ_IDE1: u32 = 15;

// cpu interrupt lines
pub const INT_SOFTWARE_0: u32 = 0;
pub const INT_SOFTWARE_1: u32 = 1;
/// Southbridge interrupt (INT0), the only hardware line this board
/// actually raises.
pub const INT_SOUTHBRIDGE_INTR: u32 = 2;
pub const INT_SOUTHBRIDGE_SMI: u32 = 3;
pub const INT_CBUS_UART: u32 = 4;
pub const INT_COREHI: u32 = 5;
pub const INT_CORELO: u32 = 6;
pub const INT_R4KTIMER: u32 = 7;

pub fn interrupt_name(interrupt: u32) -> &'static str {
    match interrupt {
        INT_SOFTWARE_0 => "software0",
        INT_SOFTWARE_1 => "software1",
        INT_SOUTHBRIDGE_INTR => "southbridge-intr",
        INT_SOUTHBRIDGE_SMI => "southbridge-smi",
        INT_CBUS_UART => "cbus-uart",
        INT_COREHI => "corehi",
        INT_CORELO => "corelo",
        INT_R4KTIMER => "r4ktimer",
        _ => "unknown",
    }
}

pub fn irq_name(irq: u32) -> &'static str {
    match irq {
        IRQ_TIMER => "timer",
        IRQ_KEYBOARD => "keyboard",
        IRQ_CASCADE => "cascade",
        IRQ_UART0 => "uart0",
        IRQ_UART1 => "uart1",
        IRQ_FLOPPY => "floppy",
        IRQ_PARALLEL => "parallel",
        IRQ_RTC => "rtc",
        IRQ_I2C => "i2c",
        IRQ_PCI_AB => "pci-ab",
        IRQ_PCI_CD => "pci-cd",
        IRQ_MOUSE => "mouse",
        IRQ_IDE0 => "ide0",
        IRQ_IDE1 => "ide1",
        _ => "unknown",
    }
}

pub struct Malta {
    gt: Gt,
    piix4: Piix4,
    display: DisplayPanel,
}

impl Malta {
    pub fn new(
        byte_order: ByteOrder,
        exceptions: Sender<ExceptionRequest>,
        events: Sender<SystemEvent>,
        timer: TimerHandle,
        sym: &mut Symbols,
    ) -> Self {
        let mut malta = Malta {
            gt: Gt::new(M_GTBASE, byte_order),
            piix4: Piix4::new(M_PIIX4, exceptions, events.clone(), timer),
            display: DisplayPanel::new(M_DISPLAY, events),
        };

        sym.put(M_SDRAM, "M_SDRAM");
        sym.put_sized(M_UNCACHED_EX_H, "M_UNCACHED_EX_H", 0x100);
        sym.put(M_PCI1, "M_PCI1");
        sym.put(M_PCI2, "M_PCI2");
        sym.put(M_CBUS, "M_CBUS");
        sym.put(M_MONITORFLASH, "M_MONITORFLASH");
        sym.put(M_RESERVED, "M_RESERVED");
        sym.put(M_DEVICES, "M_DEVICES");
        sym.put(M_BOOTROM, "M_BOOTROM");
        sym.put_sized(M_REVISION, "M_REVISION", 8);

        malta.gt.init(sym);
        malta.piix4.init(sym);
        malta.display.init(sym);
        malta
    }

    fn devices_mut(&mut self) -> [&mut dyn Device; 3] {
        [&mut self.gt, &mut self.piix4, &mut self.display]
    }

    pub fn system_read(&mut self, addr: u32, size: u32) -> Result<u32, MachineError> {
        if addr == M_REVISION {
            return Ok(CORE_LV);
        }
        for dev in self.devices_mut() {
            if dev.is_mapped(addr) {
                return dev.read(addr, size);
            }
        }
        Err(MachineError::DeviceRead {
            device: "malta",
            addr,
        })
    }

    pub fn system_write(&mut self, addr: u32, size: u32, value: u32) -> Result<(), MachineError> {
        for dev in self.devices_mut() {
            if dev.is_mapped(addr) {
                return dev.write(addr, size, value);
            }
        }
        if (M_UNCACHED_EX_H..M_UNCACHED_EX_H + 0x100).contains(&addr) {
            debug!(
                "set uncached exception handler {:#x} <= {:#x}",
                addr, value
            );
            return Ok(());
        }
        Err(MachineError::DeviceWrite {
            device: "malta",
            addr,
            value,
        })
    }

    /// Latch a southbridge irq into the GT interrupt acknowledge
    /// register for the kernel's dispatch read.
    pub fn set_irq(&mut self, irq: u32) {
        self.gt.set_irq(irq);
    }

    /// Host keyboard input into the console uart.
    pub fn uart_input(&mut self, b: u8) {
        self.piix4.com1_mut().receive(b);
    }

    pub fn piix4_mut(&mut self) -> &mut Piix4 {
        &mut self.piix4
    }
}
