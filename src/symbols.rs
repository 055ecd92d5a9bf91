//! Address to name mapping
//!
//! Holds ELF symbols plus board register names, used by the disassembler,
//! logging and fatal error reports. Lookup is a floor search: the highest
//! entry at or below the address whose size covers it wins, falling back
//! to lower entries on a span miss.

use std::collections::BTreeMap;

struct Symbol {
    name: String,
    size: u32,
}

#[derive(Default)]
pub struct Symbols {
    // keyed by zero-extended address so ksegs sort naturally
    map: BTreeMap<u64, Symbol>,
    rev: BTreeMap<String, u32>,
}

impl Symbols {
    pub fn new() -> Self {
        Symbols::default()
    }

    /// Name only, no address or offset.
    pub fn name(&self, addr: u32) -> String {
        self.format(addr, false, false)
    }

    /// Name with offset.
    pub fn name_offset(&self, addr: u32) -> String {
        self.format(addr, false, true)
    }

    /// Name with address and offset.
    pub fn name_addr_offset(&self, addr: u32) -> String {
        self.format(addr, true, true)
    }

    fn format(&self, addr: u32, include_addr: bool, include_offset: bool) -> String {
        let key = addr as u64;
        let addr_str = format!("{:#x}", addr);

        for (&start, sym) in self.map.range(..=key).rev() {
            let offset = (key - start) as u32;
            if offset >= sym.size {
                continue;
            }
            return match (include_addr, include_offset && offset != 0) {
                (true, true) => format!("{}<{}+{:#x}>", addr_str, sym.name, offset),
                (true, false) => format!("{}<{}>", addr_str, sym.name),
                (false, true) => format!("{}+{:#x}", sym.name, offset),
                (false, false) => sym.name.clone(),
            };
        }

        addr_str
    }

    pub fn addr(&self, name: &str) -> Option<u32> {
        self.rev.get(name).copied()
    }

    pub fn put(&mut self, addr: u32, name: &str) {
        self.put_sized(addr, name, u32::MAX);
    }

    pub fn put_sized(&mut self, addr: u32, name: &str, size: u32) {
        if addr == 0 || name.is_empty() || size == 0 {
            return;
        }
        let key = addr as u64;
        match self.map.get_mut(&key) {
            Some(prev) if prev.name != name => {
                // multiple symbols at one address are comma joined
                prev.name.push(',');
                prev.name.push_str(name);
                prev.size = prev.size.max(size);
            }
            Some(prev) => prev.size = prev.size.max(size),
            None => {
                self.map.insert(
                    key,
                    Symbol {
                        name: name.to_string(),
                        size,
                    },
                );
            }
        }
        self.rev.insert(name.to_string(), addr);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for Symbols {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Symbols[{}]", self.map.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_lookup() {
        let mut sym = Symbols::new();
        sym.put_sized(0x8000_0000, "start_kernel", 0x100);
        sym.put_sized(0x8000_0200, "trap_init", 0x40);

        assert_eq!(sym.name(0x8000_0000), "start_kernel");
        assert_eq!(sym.name_offset(0x8000_0010), "start_kernel+0x10");
        assert_eq!(
            sym.name_addr_offset(0x8000_0210),
            "0x80000210<trap_init+0x10>"
        );
        // inside the gap neither symbol covers
        assert_eq!(sym.name(0x8000_0180), "0x80000180");
    }

    #[test]
    fn test_fallback_to_lower_entry() {
        let mut sym = Symbols::new();
        sym.put_sized(0x1000, "big", 0x1000);
        sym.put_sized(0x1800, "small", 4);
        // 0x1810 is past "small" but still inside "big"
        assert_eq!(sym.name_offset(0x1810), "big+0x810");
    }

    #[test]
    fn test_collision_joins_names() {
        let mut sym = Symbols::new();
        sym.put(0x2000, "alpha");
        sym.put(0x2000, "beta");
        assert_eq!(sym.name(0x2000), "alpha,beta");
    }

    #[test]
    fn test_reverse_lookup() {
        let mut sym = Symbols::new();
        sym.put(0x4000, "handler");
        assert_eq!(sym.addr("handler"), Some(0x4000));
        assert_eq!(sym.addr("missing"), None);
    }
}
