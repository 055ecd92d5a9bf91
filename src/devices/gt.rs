//! GT-64120 northbridge
//!
//! Kind-of represents the northbridge; it carries the PCI decode
//! registers the kernel reads at boot and a minimal PCI configuration
//! space shim that only answers for bus 0, device 0, function 0 (the
//! board's single PCI function). Register values are kept little endian
//! as the chip does, so a big-endian board sees them byte swapped.

use log::debug;
use std::collections::HashMap;

use super::Device;
use crate::errors::MachineError;
use crate::memory::ByteOrder;
use crate::symbols::Symbols;

// register offsets from the GT base
/// PCI_0 I/O Low Decode Address. Setting this affects ioremap.
pub const GT_PCI0IOLD: u32 = 0x48;
/// PCI_0 I/O High Decode Address
pub const GT_PCI0IOHD: u32 = 0x50;
/// PCI_0 Memory 0 Low Decode Address
pub const GT_PCI0M0LD: u32 = 0x58;
/// PCI_0 Memory 0 High Decode Address
pub const GT_PCI0M0HD: u32 = 0x60;
/// PCI_0 Memory 1 Low Decode Address
pub const GT_PCI0M1LD: u32 = 0x80;
/// PCI_0 Memory 1 High Decode Address
pub const GT_PCI0M1HD: u32 = 0x88;
/// PCI_0 IO Address Remap
pub const GT_PCI0IOREMAP: u32 = 0xf0;
/// PCI_0 Memory 0 Address Remap
pub const GT_PCI0M0REMAP: u32 = 0xf8;
/// PCI_0 Memory 1 Address Remap
pub const GT_PCI0M1REMAP: u32 = 0x100;
/// PCI_0 Command
pub const GT_PCI0_CMD: u32 = 0xc00;
/// Interrupt Cause Register
pub const GT_IC: u32 = 0xc18;
/// PCI_0 Interrupt Acknowledge Virtual Register
pub const GT_PCI0_IACK: u32 = 0xc34;
/// PCI_0 Configuration Address
pub const GT_PCI0_CFGADDR: u32 = 0xcf8;
/// PCI_0 Configuration Data Virtual Register
pub const GT_PCI0_CFGDATA: u32 = 0xcfc;

const WINDOW: u32 = 0x1000;

fn cfg_en(cfgaddr: u32) -> u32 {
    (cfgaddr >> 31) & 0x1
}

fn cfg_bus(cfgaddr: u32) -> u32 {
    (cfgaddr >> 16) & 0xff
}

fn cfg_dev(cfgaddr: u32) -> u32 {
    (cfgaddr >> 11) & 0x1f
}

fn cfg_func(cfgaddr: u32) -> u32 {
    (cfgaddr >> 8) & 0x7
}

fn cfg_reg(cfgaddr: u32) -> u32 {
    (cfgaddr >> 2) & 0x3f
}

/// Sized i/o register store: reads must match the size they were
/// written/seeded with.
struct IoRegs {
    ports: HashMap<u32, (u32, u32)>,
}

impl IoRegs {
    fn new() -> Self {
        IoRegs {
            ports: HashMap::new(),
        }
    }

    fn put_word(&mut self, offset: u32, value: u32) {
        self.put(offset, 4, value);
    }

    fn put(&mut self, offset: u32, size: u32, value: u32) {
        self.ports.insert(offset, (value, size));
    }

    fn get_word(&self, offset: u32) -> Option<u32> {
        self.get(offset, 4)
    }

    fn get(&self, offset: u32, size: u32) -> Option<u32> {
        match self.ports.get(&offset) {
            Some(&(value, s)) if s == size => Some(value),
            _ => None,
        }
    }
}

pub struct Gt {
    base: u32,
    regs: IoRegs,
    byte_order: ByteOrder,
}

impl Gt {
    pub fn new(base: u32, byte_order: ByteOrder) -> Self {
        let mut regs = IoRegs::new();
        // reset values the Malta firmware would have programmed
        regs.put_word(GT_PCI0IOLD, 0x80);
        regs.put_word(GT_PCI0IOHD, 0xf);
        regs.put_word(GT_PCI0M0LD, 0x90);
        regs.put_word(GT_PCI0M0HD, 0x1f);
        regs.put_word(GT_PCI0M1LD, 0x790);
        regs.put_word(GT_PCI0M1HD, 0x1f);
        regs.put_word(GT_PCI0IOREMAP, 0x80);
        regs.put_word(GT_PCI0M0REMAP, 0x90);
        regs.put_word(GT_PCI0M1REMAP, 0x790);
        Gt {
            base,
            regs,
            byte_order,
        }
    }

    /// The GT registers are little endian; a big-endian cpu reads and
    /// writes them byte swapped.
    fn swap(&self, value: u32) -> u32 {
        match self.byte_order {
            ByteOrder::Big => value.swap_bytes(),
            ByteOrder::Little => value,
        }
    }

    pub fn set_irq(&mut self, irq: u32) {
        debug!("gt latch irq {}", irq);
        self.regs.put_word(GT_PCI0_IACK, irq);
    }

    fn set_cfg_addr(&mut self, cfgaddr: u32) -> Result<(), MachineError> {
        let (en, bus, dev, func, reg) = (
            cfg_en(cfgaddr),
            cfg_bus(cfgaddr),
            cfg_dev(cfgaddr),
            cfg_func(cfgaddr),
            cfg_reg(cfgaddr),
        );
        debug!(
            "pci0 cfg addr {:#x} en={} bus={} dev={} func={} reg={:#x}",
            cfgaddr, en, bus, dev, func, reg
        );
        if bus == 0 && func == 0 {
            self.regs.put_word(GT_PCI0_CFGDATA, 0);
            Ok(())
        } else {
            Err(MachineError::UnsupportedPci { bus, dev, func })
        }
    }

    fn set_cfg_data(&mut self, value: u32) -> Result<(), MachineError> {
        let cfgaddr = self.regs.get_word(GT_PCI0_CFGADDR).unwrap_or(0);
        let (bus, dev, func) = (cfg_bus(cfgaddr), cfg_dev(cfgaddr), cfg_func(cfgaddr));
        debug!(
            "pci0 cfg data {:#x} bus={} dev={} func={} reg={:#x}",
            value,
            bus,
            dev,
            func,
            cfg_reg(cfgaddr)
        );
        if bus == 0 && dev == 0 && func == 0 {
            Ok(())
        } else {
            Err(MachineError::UnsupportedPci { bus, dev, func })
        }
    }
}

impl Device for Gt {
    fn init(&mut self, sym: &mut Symbols) {
        let base = self.base;
        sym.put(base, "M_GTBASE");
        for (off, name) in [
            (GT_PCI0IOLD, "GT_PCI0IOLD"),
            (GT_PCI0IOHD, "GT_PCI0IOHD"),
            (GT_PCI0M0LD, "GT_PCI0M0LD"),
            (GT_PCI0M0HD, "GT_PCI0M0HD"),
            (GT_PCI0M1LD, "GT_PCI0M1LD"),
            (GT_PCI0M1HD, "GT_PCI0M1HD"),
            (GT_PCI0IOREMAP, "GT_PCI0IOREMAP"),
            (GT_PCI0M0REMAP, "GT_PCI0M0REMAP"),
            (GT_PCI0M1REMAP, "GT_PCI0M1REMAP"),
            (GT_PCI0_CMD, "GT_PCI0_CMD"),
            (GT_IC, "GT_IC"),
            (GT_PCI0_IACK, "GT_PCI0_IACK"),
            (GT_PCI0_CFGADDR, "GT_PCI0_CFGADDR"),
            (GT_PCI0_CFGDATA, "GT_PCI0_CFGDATA"),
        ] {
            sym.put_sized(base + off, name, 4);
        }
    }

    fn is_mapped(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.base) < WINDOW
    }

    fn read(&mut self, addr: u32, size: u32) -> Result<u32, MachineError> {
        let offset = addr - self.base;
        match self.regs.get(offset, size) {
            Some(value) => Ok(self.swap(value)),
            None => Err(MachineError::DeviceRead { device: "gt", addr }),
        }
    }

    fn write(&mut self, addr: u32, size: u32, value: u32) -> Result<(), MachineError> {
        let offset = addr - self.base;
        let value = self.swap(value);
        debug!("gt write {:#x} <= {:#x} size {}", offset, value, size);
        self.regs.put(offset, size, value);

        match offset {
            GT_PCI0IOREMAP => {
                if value != 0 {
                    return Err(MachineError::DeviceWrite {
                        device: "gt remap",
                        addr,
                        value,
                    });
                }
                Ok(())
            }
            GT_IC | GT_PCI0_CMD => Ok(()),
            GT_PCI0_CFGADDR => self.set_cfg_addr(value),
            GT_PCI0_CFGDATA => self.set_cfg_data(value),
            _ => Err(MachineError::DeviceWrite {
                device: "gt",
                addr,
                value,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_swap_on_big_endian() {
        let mut gt = Gt::new(0x1be0_0000, ByteOrder::Big);
        let v = gt.read(0x1be0_0000 + GT_PCI0IOLD, 4).unwrap();
        assert_eq!(v, 0x80u32.swap_bytes());

        let mut gt = Gt::new(0x1be0_0000, ByteOrder::Little);
        let v = gt.read(0x1be0_0000 + GT_PCI0IOLD, 4).unwrap();
        assert_eq!(v, 0x80);
    }

    #[test]
    fn test_pci_config_gate() {
        let mut gt = Gt::new(0, ByteOrder::Little);
        // bus 0 func 0 accepted
        gt.write(GT_PCI0_CFGADDR, 4, 0x8000_0000).unwrap();
        assert_eq!(gt.read(GT_PCI0_CFGDATA, 4).unwrap(), 0);
        gt.write(GT_PCI0_CFGDATA, 4, 0x1234).unwrap();
        // bus 1 rejected
        assert!(matches!(
            gt.write(GT_PCI0_CFGADDR, 4, 0x8001_0000),
            Err(MachineError::UnsupportedPci { bus: 1, .. })
        ));
    }

    #[test]
    fn test_iack_latch() {
        let mut gt = Gt::new(0, ByteOrder::Little);
        gt.set_irq(3);
        assert_eq!(gt.read(GT_PCI0_IACK, 4).unwrap(), 3);
    }
}
