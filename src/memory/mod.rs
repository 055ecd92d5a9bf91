//! Paged physical memory with board-routed system region
//!
//! Memory is an array of 1 MiB pages stored as u32 words and indexed by
//! `addr >> 20`; pages are allocated explicitly (or by the loader) before
//! use. Sub-word access shifts within the containing word using the
//! byte-order xor trick, so the same page data serves both endiannesses.
//! Every access at or above the system base is forwarded to the Malta
//! board instead of touching a page; that is how ordinary load/store
//! instructions drive device I/O.
//!
//! Checked accesses to an unallocated page are fatal. The unchecked read
//! path returns `None` instead, because the disassembler needs to probe
//! memory for display without crashing mid-run.

use serde::{Deserialize, Serialize};

use crate::devices::malta::Malta;
use crate::errors::MachineError;

/// Accesses at or above this address go to the board.
pub const SYSTEM_BASE: u32 = 0xa000_0000;

pub const PAGE_SHIFT: u32 = 20;
pub const PAGE_BYTES: usize = 1 << PAGE_SHIFT;
pub const PAGE_WORDS: usize = PAGE_BYTES / 4;
const PAGE_COUNT: usize = 1 << (32 - PAGE_SHIFT);

/// Word order of the emulated board.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// xor applied to the byte-in-word offset: 0 for little endian,
    /// 3 for big endian.
    pub fn word_addr_xor(self) -> u32 {
        match self {
            ByteOrder::Little => 0,
            ByteOrder::Big => 3,
        }
    }

    pub fn half_addr_xor(self) -> u32 {
        match self {
            ByteOrder::Little => 0,
            ByteOrder::Big => 2,
        }
    }

    pub fn is_little(self) -> bool {
        self == ByteOrder::Little
    }
}

pub struct Memory {
    pages: Vec<Option<Box<[u32]>>>,
    byte_order: ByteOrder,
    malta: Malta,
}

impl Memory {
    pub fn new(byte_order: ByteOrder, malta: Malta) -> Self {
        let mut pages = Vec::with_capacity(PAGE_COUNT);
        pages.resize_with(PAGE_COUNT, || None);
        Memory {
            pages,
            byte_order,
            malta,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn malta(&self) -> &Malta {
        &self.malta
    }

    pub fn malta_mut(&mut self) -> &mut Malta {
        &mut self.malta
    }

    /// Allocate the page containing `addr`. Idempotent.
    pub fn init_page(&mut self, addr: u32) {
        let idx = (addr >> PAGE_SHIFT) as usize;
        if self.pages[idx].is_none() {
            self.pages[idx] = Some(vec![0u32; PAGE_WORDS].into_boxed_slice());
        }
    }

    pub fn page_mapped(&self, addr: u32) -> bool {
        self.pages[(addr >> PAGE_SHIFT) as usize].is_some()
    }

    fn is_system(addr: u32) -> bool {
        addr >= SYSTEM_BASE
    }

    fn word(&self, addr: u32, op: &'static str) -> Result<u32, MachineError> {
        match &self.pages[(addr >> PAGE_SHIFT) as usize] {
            Some(page) => Ok(page[(addr as usize & (PAGE_BYTES - 1)) >> 2]),
            None => Err(MachineError::Unmapped { op, addr }),
        }
    }

    fn word_mut(&mut self, addr: u32, op: &'static str) -> Result<&mut u32, MachineError> {
        match &mut self.pages[(addr >> PAGE_SHIFT) as usize] {
            Some(page) => Ok(&mut page[(addr as usize & (PAGE_BYTES - 1)) >> 2]),
            None => Err(MachineError::Unmapped { op, addr }),
        }
    }

    pub fn load_word(&mut self, addr: u32) -> Result<u32, MachineError> {
        if addr & 3 != 0 {
            return Err(MachineError::Misaligned {
                op: "word load",
                addr,
            });
        }
        if Self::is_system(addr) {
            self.malta.system_read(addr - SYSTEM_BASE, 4)
        } else {
            self.word(addr, "word load")
        }
    }

    pub fn store_word(&mut self, addr: u32, value: u32) -> Result<(), MachineError> {
        if addr & 3 != 0 {
            return Err(MachineError::Misaligned {
                op: "word store",
                addr,
            });
        }
        if Self::is_system(addr) {
            self.malta.system_write(addr - SYSTEM_BASE, 4, value)
        } else {
            *self.word_mut(addr, "word store")? = value;
            Ok(())
        }
    }

    pub fn load_half(&mut self, addr: u32) -> Result<u16, MachineError> {
        if addr & 1 != 0 {
            return Err(MachineError::Misaligned {
                op: "half load",
                addr,
            });
        }
        if Self::is_system(addr) {
            return Ok(self.malta.system_read(addr - SYSTEM_BASE, 2)? as u16);
        }
        let w = self.word(addr & !3, "half load")?;
        let s = ((addr & 2) ^ self.byte_order.half_addr_xor()) << 3;
        Ok((w >> s) as u16)
    }

    pub fn store_half(&mut self, addr: u32, value: u16) -> Result<(), MachineError> {
        if addr & 1 != 0 {
            return Err(MachineError::Misaligned {
                op: "half store",
                addr,
            });
        }
        if Self::is_system(addr) {
            return self.malta.system_write(addr - SYSTEM_BASE, 2, value as u32);
        }
        let s = ((addr & 2) ^ self.byte_order.half_addr_xor()) << 3;
        let w = self.word_mut(addr & !3, "half store")?;
        *w = (*w & !(0xffffu32 << s)) | ((value as u32) << s);
        Ok(())
    }

    pub fn load_byte(&mut self, addr: u32) -> Result<u8, MachineError> {
        if Self::is_system(addr) {
            return Ok(self.malta.system_read(addr - SYSTEM_BASE, 1)? as u8);
        }
        let w = self.word(addr & !3, "byte load")?;
        let s = ((addr & 3) ^ self.byte_order.word_addr_xor()) << 3;
        Ok((w >> s) as u8)
    }

    pub fn store_byte(&mut self, addr: u32, value: u8) -> Result<(), MachineError> {
        if Self::is_system(addr) {
            return self.malta.system_write(addr - SYSTEM_BASE, 1, value as u32);
        }
        let s = ((addr & 3) ^ self.byte_order.word_addr_xor()) << 3;
        let w = self.word_mut(addr & !3, "byte store")?;
        *w = (*w & !(0xffu32 << s)) | ((value as u32) << s);
        Ok(())
    }

    /// Unchecked probe for the disassembler: no fault on unmapped or
    /// system addresses, the word containing `addr` or `None`.
    pub fn load_word_unchecked(&self, addr: u32) -> Option<u32> {
        let addr = addr & !3;
        if Self::is_system(addr) {
            return None;
        }
        self.pages[(addr >> PAGE_SHIFT) as usize]
            .as_ref()
            .map(|page| page[(addr as usize & (PAGE_BYTES - 1)) >> 2])
    }

    /// Bulk byte store. Takes the word path when both address and length
    /// are word aligned, otherwise falls back byte by byte.
    pub fn store_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), MachineError> {
        if data.is_empty() {
            return Ok(());
        }
        if addr & 3 == 0 && data.len() & 3 == 0 {
            for (n, chunk) in data.chunks_exact(4).enumerate() {
                let w = match self.byte_order {
                    ByteOrder::Little => u32::from_le_bytes(chunk.try_into().unwrap()),
                    ByteOrder::Big => u32::from_be_bytes(chunk.try_into().unwrap()),
                };
                self.store_word(addr + (n as u32) * 4, w)?;
            }
        } else {
            for (n, &b) in data.iter().enumerate() {
                self.store_byte(addr + n as u32, b)?;
            }
        }
        Ok(())
    }

    /// Copy of the words backing each mapped page, for snapshots.
    pub fn snapshot_pages(&self) -> Vec<(u32, Vec<u32>)> {
        self.pages
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| p.as_ref().map(|p| (idx as u32, p.to_vec())))
            .collect()
    }

    pub fn restore_pages(&mut self, pages: &[(u32, Vec<u32>)]) -> Result<(), MachineError> {
        for slot in self.pages.iter_mut() {
            *slot = None;
        }
        for (idx, words) in pages {
            if *idx as usize >= PAGE_COUNT || words.len() != PAGE_WORDS {
                return Err(MachineError::BadSnapshot(format!(
                    "page {} has {} words",
                    idx,
                    words.len()
                )));
            }
            self.pages[*idx as usize] = Some(words.clone().into_boxed_slice());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::exception::ExceptionRequest;
    use crate::system::SystemEvent;
    use crate::symbols::Symbols;
    use crate::timer::TimerService;
    use std::sync::mpsc;

    fn test_memory(order: ByteOrder) -> Memory {
        let (exc_tx, _exc_rx) = mpsc::channel::<ExceptionRequest>();
        let (event_tx, _event_rx) = mpsc::channel::<SystemEvent>();
        let timer = TimerService::new(exc_tx.clone());
        let mut sym = Symbols::new();
        let malta = Malta::new(order, exc_tx, event_tx, timer.handle(), &mut sym);
        let mut mem = Memory::new(order, malta);
        mem.init_page(0);
        mem
    }

    #[test]
    fn test_word_round_trip() {
        let mut mem = test_memory(ByteOrder::Big);
        mem.store_word(0x100, 0xdead_beef).unwrap();
        assert_eq!(mem.load_word(0x100).unwrap(), 0xdead_beef);
    }

    #[test]
    fn test_sub_word_big_endian() {
        let mut mem = test_memory(ByteOrder::Big);
        mem.store_word(0x10, 0x0102_0304).unwrap();
        assert_eq!(mem.load_byte(0x10).unwrap(), 0x01);
        assert_eq!(mem.load_byte(0x13).unwrap(), 0x04);
        assert_eq!(mem.load_half(0x10).unwrap(), 0x0102);
        assert_eq!(mem.load_half(0x12).unwrap(), 0x0304);
    }

    #[test]
    fn test_sub_word_little_endian() {
        let mut mem = test_memory(ByteOrder::Little);
        mem.store_word(0x10, 0x0102_0304).unwrap();
        assert_eq!(mem.load_byte(0x10).unwrap(), 0x04);
        assert_eq!(mem.load_byte(0x13).unwrap(), 0x01);
        assert_eq!(mem.load_half(0x10).unwrap(), 0x0304);
    }

    #[test]
    fn test_alignment_checked() {
        let mut mem = test_memory(ByteOrder::Big);
        assert!(matches!(
            mem.load_word(0x101),
            Err(MachineError::Misaligned { .. })
        ));
        assert!(matches!(
            mem.store_half(0x103, 1),
            Err(MachineError::Misaligned { .. })
        ));
    }

    #[test]
    fn test_unmapped_page_fatal_but_probe_is_not() {
        let mut mem = test_memory(ByteOrder::Big);
        assert!(matches!(
            mem.load_word(0x40_0000),
            Err(MachineError::Unmapped { .. })
        ));
        assert_eq!(mem.load_word_unchecked(0x40_0000), None);
        assert_eq!(mem.load_word_unchecked(0x100), Some(0));
    }

    #[test]
    fn test_store_bytes_round_trip_both_paths() {
        for order in [ByteOrder::Big, ByteOrder::Little] {
            let mut mem = test_memory(order);
            let data: Vec<u8> = (0u8..16).collect();
            // aligned fast path
            mem.store_bytes(0x200, &data).unwrap();
            for (n, &b) in data.iter().enumerate() {
                assert_eq!(mem.load_byte(0x200 + n as u32).unwrap(), b);
            }
            // unaligned fallback
            mem.store_bytes(0x301, &data).unwrap();
            for (n, &b) in data.iter().enumerate() {
                assert_eq!(mem.load_byte(0x301 + n as u32).unwrap(), b);
            }
            // odd length fallback
            mem.store_bytes(0x400, &data[..7]).unwrap();
            for (n, &b) in data[..7].iter().enumerate() {
                assert_eq!(mem.load_byte(0x400 + n as u32).unwrap(), b);
            }
        }
    }
}
