//! Flattened Tree Builder
//!
//! Serializes nodes and properties into a version 17 blob. Used to construct
//! payloads and device trees under test; the stub itself only ever reads
//! trees and patches them through [`memmap`](crate::memmap).

use alloc::vec::Vec;

use crate::tree::{
    FDT_BEGIN_NODE, FDT_END, FDT_END_NODE, FDT_MAGIC, FDT_PROP, HEADER_SIZE, align4,
};

/// Incremental flattened-tree writer.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    structs: Vec<u8>,
    strings: Vec<u8>,
    reservations: Vec<(u64, u64)>,
    depth: usize,
}

impl TreeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push_u32(&mut self, v: u32) {
        self.structs.extend_from_slice(&v.to_be_bytes());
    }

    fn pad(&mut self) {
        self.structs.resize(align4(self.structs.len()), 0);
    }

    fn name_offset(&mut self, name: &str) -> u32 {
        let mut off = 0;
        for s in self.strings.split(|&b| b == 0) {
            if s == name.as_bytes() && off < self.strings.len() {
                return off as u32;
            }
            off += s.len() + 1;
        }
        let off = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        off
    }

    /// Open a node. The root node has the empty name.
    pub fn begin_node(&mut self, name: &str) -> &mut Self {
        self.push_u32(FDT_BEGIN_NODE);
        self.structs.extend_from_slice(name.as_bytes());
        self.structs.push(0);
        self.pad();
        self.depth += 1;
        self
    }

    pub fn end_node(&mut self) -> &mut Self {
        assert!(self.depth > 0, "end_node without begin_node");
        self.push_u32(FDT_END_NODE);
        self.depth -= 1;
        self
    }

    /// Add a property with a raw value.
    pub fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
        let nameoff = self.name_offset(name);
        self.push_u32(FDT_PROP);
        self.push_u32(value.len() as u32);
        self.push_u32(nameoff);
        self.structs.extend_from_slice(value);
        self.pad();
        self
    }

    pub fn prop_u32(&mut self, name: &str, v: u32) -> &mut Self {
        self.prop(name, &v.to_be_bytes())
    }

    pub fn prop_u64(&mut self, name: &str, v: u64) -> &mut Self {
        self.prop(name, &v.to_be_bytes())
    }

    /// Add a property made of 32-bit cells.
    pub fn prop_cells(&mut self, name: &str, cells: &[u32]) -> &mut Self {
        let value: Vec<u8> = cells.iter().flat_map(|c| c.to_be_bytes()).collect();
        self.prop(name, &value)
    }

    pub fn prop_str(&mut self, name: &str, v: &str) -> &mut Self {
        self.prop_strings(name, &[v])
    }

    pub fn prop_strings(&mut self, name: &str, list: &[&str]) -> &mut Self {
        let mut value = Vec::new();
        for s in list {
            value.extend_from_slice(s.as_bytes());
            value.push(0);
        }
        self.prop(name, &value)
    }

    /// Add an entry to the memory reservation map.
    pub fn reserve(&mut self, address: u64, size: u64) -> &mut Self {
        self.reservations.push((address, size));
        self
    }

    /// Emit the finished blob.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        assert_eq!(self.depth, 0, "unclosed node");
        self.push_u32(FDT_END);

        let off_rsvmap = HEADER_SIZE;
        let off_struct = off_rsvmap + (self.reservations.len() + 1) * 16;
        let off_strings = off_struct + self.structs.len();
        let total = off_strings + self.strings.len();

        let mut blob = Vec::with_capacity(total);
        for v in [
            FDT_MAGIC,
            total as u32,
            off_struct as u32,
            off_strings as u32,
            off_rsvmap as u32,
            17,
            16,
            0,
            self.strings.len() as u32,
            self.structs.len() as u32,
        ] {
            blob.extend_from_slice(&v.to_be_bytes());
        }
        for (address, size) in self.reservations.iter().chain(core::iter::once(&(0, 0))) {
            blob.extend_from_slice(&address.to_be_bytes());
            blob.extend_from_slice(&size.to_be_bytes());
        }
        blob.extend_from_slice(&self.structs);
        blob.extend_from_slice(&self.strings);
        blob
    }
}

/// Copy `bytes` into `buf` at `offset`, growing it with zeroes as needed.
pub fn place(buf: &mut Vec<u8>, offset: usize, bytes: &[u8]) {
    if buf.len() < offset + bytes.len() {
        buf.resize(offset + bytes.len(), 0);
    }
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_parses_with_fdt_crate() {
        let mut b = TreeBuilder::new();
        b.begin_node("")
            .prop_str("model", "keel test board")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 2)
            .begin_node("chosen")
            .prop_str("bootargs", "console=ttyAMA0")
            .end_node()
            .end_node();
        let blob = b.finish();

        let fdt = fdt::Fdt::new(&blob).unwrap();
        assert_eq!(fdt.total_size(), blob.len());
        let chosen = fdt.find_node("/chosen").unwrap();
        assert_eq!(
            chosen.property("bootargs").and_then(|p| p.as_str()),
            Some("console=ttyAMA0")
        );
    }

    #[test]
    fn test_property_names_are_shared() {
        let mut b = TreeBuilder::new();
        b.begin_node("")
            .begin_node("a")
            .prop_u32("reg", 1)
            .end_node()
            .begin_node("b")
            .prop_u32("reg", 2)
            .end_node()
            .end_node();
        assert_eq!(b.strings, b"reg\0");
    }
}
