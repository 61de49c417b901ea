//! Flattened Tree Reader
//!
//! Read-only accessor over a flattened device tree blob. The payload handed
//! to the stub and the device tree handed to the kernel share this encoding.
//!
//! # Layout
//!
//! ```text
//! +-----------------+ 0
//! | header (40 B)   |
//! +-----------------+ off_mem_rsvmap
//! | reservation map |  (address, size) u64 pairs, (0, 0) terminated
//! +-----------------+ off_dt_struct
//! | structure block |  BEGIN_NODE / PROP / NOP / END_NODE tokens, END
//! +-----------------+ off_dt_strings
//! | strings block   |  NUL-terminated property names
//! +-----------------+ totalsize
//! ```
//!
//! # Bounds
//!
//! [`Tree::new`] validates the header once. Afterwards every token, property
//! value and string is fetched through checked slicing of the structure or
//! strings block, so a corrupt offset yields [`Error::MalformedTree`]
//! instead of a read past the blob. [`Node`] handles are plain offsets and
//! are re-validated on every use.

use keel_common::{Extent, PhysAddr};

use crate::error::{Error, Result};

/// Header magic, big-endian.
pub const FDT_MAGIC: u32 = 0xd00d_feed;

/// Size of a version 17 header in bytes.
pub const HEADER_SIZE: usize = 40;

/// Oldest header version carrying `size_dt_struct`.
pub const MIN_VERSION: u32 = 17;

/// Newest format this reader understands.
pub const LAST_COMPATIBLE_VERSION: u32 = 17;

pub(crate) const FDT_BEGIN_NODE: u32 = 0x1;
pub(crate) const FDT_END_NODE: u32 = 0x2;
pub(crate) const FDT_PROP: u32 = 0x3;
pub(crate) const FDT_NOP: u32 = 0x4;
pub(crate) const FDT_END: u32 = 0x9;

/// Round up to the 4-byte token alignment.
#[inline]
pub(crate) const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Read a big-endian `u32` at `off`, bounds-checked.
#[inline]
pub(crate) fn be32(bytes: &[u8], off: usize) -> Result<u32> {
    let end = off.checked_add(4).ok_or(Error::MalformedTree)?;
    let raw = bytes.get(off..end).ok_or(Error::MalformedTree)?;
    Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Read a big-endian `u64` at `off`, bounds-checked.
#[inline]
pub(crate) fn be64(bytes: &[u8], off: usize) -> Result<u64> {
    let hi = be32(bytes, off)?;
    let lo = be32(bytes, off.checked_add(4).ok_or(Error::MalformedTree)?)?;
    Ok((u64::from(hi) << 32) | u64::from(lo))
}

/// Decode `cells` big-endian 32-bit cells (1 or 2) into one value.
pub fn read_cells(bytes: &[u8], cells: u32) -> Result<u64> {
    match (cells, bytes.len()) {
        (1, 4) => be32(bytes, 0).map(u64::from),
        (2, 8) => be64(bytes, 0),
        _ => Err(Error::MalformedTree),
    }
}

/// Decoded header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub total_size: u32,
    pub off_dt_struct: u32,
    pub off_dt_strings: u32,
    pub off_mem_rsvmap: u32,
    pub version: u32,
    pub last_comp_version: u32,
    pub boot_cpuid_phys: u32,
    pub size_dt_strings: u32,
    pub size_dt_struct: u32,
}

impl Header {
    /// Decode and validate the header at the start of `blob`.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        if blob.len() < HEADER_SIZE || be32(blob, 0)? != FDT_MAGIC {
            return Err(Error::MalformedTree);
        }

        let header = Self {
            total_size: be32(blob, 4)?,
            off_dt_struct: be32(blob, 8)?,
            off_dt_strings: be32(blob, 12)?,
            off_mem_rsvmap: be32(blob, 16)?,
            version: be32(blob, 20)?,
            last_comp_version: be32(blob, 24)?,
            boot_cpuid_phys: be32(blob, 28)?,
            size_dt_strings: be32(blob, 32)?,
            size_dt_struct: be32(blob, 36)?,
        };

        let total = header.total_size as usize;
        if header.version < MIN_VERSION
            || header.last_comp_version > LAST_COMPATIBLE_VERSION
            || total < HEADER_SIZE
            || total > blob.len()
        {
            return Err(Error::MalformedTree);
        }

        let block_fits = |off: u32, size: u32| {
            (off as usize)
                .checked_add(size as usize)
                .is_some_and(|end| off as usize >= HEADER_SIZE && end <= total)
        };
        if !block_fits(header.off_dt_struct, header.size_dt_struct)
            || !block_fits(header.off_dt_strings, header.size_dt_strings)
            || !block_fits(header.off_mem_rsvmap, 16)
            || header.off_dt_struct % 4 != 0
            || header.off_mem_rsvmap % 8 != 0
        {
            return Err(Error::MalformedTree);
        }

        Ok(header)
    }
}

/// Opaque handle to a node: the offset of its `BEGIN_NODE` token within the
/// structure block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node(u32);

impl Node {
    #[inline]
    fn offset(self) -> usize {
        self.0 as usize
    }
}

/// A property as found in the structure block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property<'a> {
    name: &'a str,
    value: &'a [u8],
    /// Offset of the `PROP` token within the structure block.
    pub(crate) token_offset: usize,
    /// Offset of the name within the strings block.
    pub(crate) name_offset: u32,
    /// Offset of the value from the start of the blob.
    blob_offset: usize,
}

impl<'a> Property<'a> {
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Raw value bytes.
    #[inline]
    #[must_use]
    pub fn value(&self) -> &'a [u8] {
        self.value
    }

    /// Offset of the value bytes from the start of the blob.
    #[inline]
    #[must_use]
    pub fn blob_offset(&self) -> usize {
        self.blob_offset
    }

    /// Decode a single 32-bit cell.
    pub fn as_u32(&self) -> Result<u32> {
        read_cells(self.value, 1).map(|v| v as u32)
    }

    /// Decode a two-cell 64-bit value.
    pub fn as_u64(&self) -> Result<u64> {
        read_cells(self.value, 2)
    }

    /// Decode a value of one or two cells, whichever the length says.
    pub fn as_address(&self) -> Result<u64> {
        match self.value.len() {
            4 => self.as_u32().map(u64::from),
            8 => self.as_u64(),
            _ => Err(Error::MalformedTree),
        }
    }

    /// Decode a single NUL-terminated string.
    pub fn as_str(&self) -> Result<&'a str> {
        self.strings().next().ok_or(Error::MalformedTree)?
    }

    /// Iterate over a NUL-separated string list.
    pub fn strings(&self) -> Strings<'a> {
        Strings { rest: self.value }
    }

    /// Iterate over `(address, size)` pairs of a `reg`-style value.
    pub fn reg(&self, address_cells: u32, size_cells: u32) -> Result<RegIter<'a>> {
        if !matches!(address_cells, 1 | 2) || !matches!(size_cells, 1 | 2) {
            return Err(Error::MalformedTree);
        }
        let stride = (address_cells + size_cells) as usize * 4;
        if self.value.len() % stride != 0 {
            return Err(Error::MalformedTree);
        }
        Ok(RegIter {
            rest: self.value,
            address_cells,
            size_cells,
        })
    }
}

/// Iterator over a string list property.
pub struct Strings<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Strings<'a> {
    type Item = Result<&'a str>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let Some(nul) = self.rest.iter().position(|&b| b == 0) else {
            self.rest = &[];
            return Some(Err(Error::MalformedTree));
        };
        let (head, tail) = self.rest.split_at(nul);
        self.rest = &tail[1..];
        Some(core::str::from_utf8(head).map_err(|_| Error::MalformedTree))
    }
}

/// Iterator over `(address, size)` pairs.
pub struct RegIter<'a> {
    rest: &'a [u8],
    address_cells: u32,
    size_cells: u32,
}

impl Iterator for RegIter<'_> {
    type Item = Result<(u64, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let a_len = self.address_cells as usize * 4;
        let s_len = self.size_cells as usize * 4;
        let (entry, rest) = self.rest.split_at(a_len + s_len);
        self.rest = rest;
        let addr = read_cells(&entry[..a_len], self.address_cells);
        let size = read_cells(&entry[a_len..], self.size_cells);
        Some(addr.and_then(|a| size.map(|s| (a, s))))
    }
}

/// One decoded structure-block token.
#[derive(Debug, Clone, Copy)]
enum Token<'a> {
    BeginNode { name: &'a str, next: usize },
    EndNode { next: usize },
    Prop { prop: Property<'a>, next: usize },
    Nop { next: usize },
    End,
}

/// A validated flattened tree.
#[derive(Debug, Clone, Copy)]
pub struct Tree<'a> {
    blob: &'a [u8],
    structs: &'a [u8],
    strings: &'a [u8],
    header: Header,
}

impl<'a> Tree<'a> {
    /// Validate the header of `blob` and build a reader over it.
    ///
    /// `blob` may extend past the declared total size (payloads carry image
    /// data behind the tree); the reader never looks beyond `totalsize`.
    pub fn new(blob: &'a [u8]) -> Result<Self> {
        let header = Header::parse(blob)?;
        let blob = &blob[..header.total_size as usize];
        let s = header.off_dt_struct as usize;
        let t = header.off_dt_strings as usize;
        Ok(Self {
            blob,
            structs: &blob[s..s + header.size_dt_struct as usize],
            strings: &blob[t..t + header.size_dt_strings as usize],
            header,
        })
    }

    #[inline]
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Declared total size in bytes.
    #[inline]
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.header.total_size as usize
    }

    /// The blob, truncated to its declared size.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.blob
    }

    #[inline]
    pub(crate) fn struct_block(&self) -> &'a [u8] {
        self.structs
    }

    #[inline]
    pub(crate) fn strings_block(&self) -> &'a [u8] {
        self.strings
    }

    // -- Token decoding

    fn string_at(&self, off: u32) -> Result<&'a str> {
        let tail = self.strings.get(off as usize..).ok_or(Error::MalformedTree)?;
        let nul = tail.iter().position(|&b| b == 0).ok_or(Error::MalformedTree)?;
        core::str::from_utf8(&tail[..nul]).map_err(|_| Error::MalformedTree)
    }

    fn token(&self, off: usize) -> Result<Token<'a>> {
        let body = off.checked_add(4).ok_or(Error::MalformedTree)?;
        match be32(self.structs, off)? {
            FDT_BEGIN_NODE => {
                let tail = self.structs.get(body..).ok_or(Error::MalformedTree)?;
                let nul = tail.iter().position(|&b| b == 0).ok_or(Error::MalformedTree)?;
                let name = core::str::from_utf8(&tail[..nul]).map_err(|_| Error::MalformedTree)?;
                Ok(Token::BeginNode {
                    name,
                    next: align4(body + nul + 1),
                })
            }
            FDT_END_NODE => Ok(Token::EndNode { next: body }),
            FDT_PROP => {
                let len = be32(self.structs, body)? as usize;
                let name_offset = be32(self.structs, body + 4)?;
                let start = body + 8;
                let end = start.checked_add(len).ok_or(Error::MalformedTree)?;
                let value = self.structs.get(start..end).ok_or(Error::MalformedTree)?;
                let prop = Property {
                    name: self.string_at(name_offset)?,
                    value,
                    token_offset: off,
                    name_offset,
                    blob_offset: self.header.off_dt_struct as usize + start,
                };
                Ok(Token::Prop {
                    prop,
                    next: align4(end),
                })
            }
            FDT_NOP => Ok(Token::Nop { next: body }),
            FDT_END => Ok(Token::End),
            _ => Err(Error::MalformedTree),
        }
    }

    /// Offset just past a node's name, where its properties begin.
    fn node_body(&self, node: Node) -> Result<(&'a str, usize)> {
        match self.token(node.offset())? {
            Token::BeginNode { name, next } => Ok((name, next)),
            _ => Err(Error::MalformedTree),
        }
    }

    /// Offset just past a node's `END_NODE` token.
    fn skip_node(&self, node: Node) -> Result<usize> {
        let mut depth = 0usize;
        let mut off = node.offset();
        loop {
            off = match self.token(off)? {
                Token::BeginNode { next, .. } => {
                    depth += 1;
                    next
                }
                Token::EndNode { next } => {
                    depth = depth.checked_sub(1).ok_or(Error::MalformedTree)?;
                    if depth == 0 {
                        return Ok(next);
                    }
                    next
                }
                Token::Prop { next, .. } | Token::Nop { next } => next,
                Token::End => return Err(Error::MalformedTree),
            };
        }
    }

    // -- Navigation

    /// The root node.
    pub fn root(&self) -> Result<Node> {
        let mut off = 0;
        loop {
            match self.token(off)? {
                Token::Nop { next } => off = next,
                Token::BeginNode { .. } => {
                    return u32::try_from(off).map(Node).map_err(|_| Error::MalformedTree);
                }
                _ => return Err(Error::MalformedTree),
            }
        }
    }

    /// The name of `node`, including any unit address.
    pub fn name(&self, node: Node) -> Result<&'a str> {
        self.node_body(node).map(|(name, _)| name)
    }

    /// Iterate over the properties of `node`.
    pub fn properties(&self, node: Node) -> Result<Properties<'_, 'a>> {
        let (_, off) = self.node_body(node)?;
        Ok(Properties {
            tree: self,
            off,
            done: false,
        })
    }

    /// Iterate over the direct children of `node`.
    pub fn children(&self, node: Node) -> Result<Children<'_, 'a>> {
        let (_, off) = self.node_body(node)?;
        Ok(Children {
            tree: self,
            off,
            done: false,
        })
    }

    /// Find the direct child of `parent` named `name`.
    ///
    /// A name without a unit address also matches `name@<unit>`.
    pub fn subnode(&self, parent: Node, name: &str) -> Result<Node> {
        for child in self.children(parent)? {
            let child = child?;
            if name_matches(self.name(child)?, name) {
                return Ok(child);
            }
        }
        Err(Error::NotFound)
    }

    /// Resolve an absolute path such as `/images/kernel-1`.
    pub fn resolve(&self, path: &str) -> Result<Node> {
        let rest = path.strip_prefix('/').ok_or(Error::NotFound)?;
        let mut node = self.root()?;
        for component in rest.split('/').filter(|c| !c.is_empty()) {
            node = self.subnode(node, component)?;
        }
        Ok(node)
    }

    /// Look up a property of `node` by name.
    ///
    /// Absence is `Ok(None)`; structural damage is an error.
    pub fn property(&self, node: Node, name: &str) -> Result<Option<Property<'a>>> {
        for prop in self.properties(node)? {
            let prop = prop?;
            if prop.name == name {
                return Ok(Some(prop));
            }
        }
        Ok(None)
    }

    /// Look up a property that must exist.
    pub fn required(&self, node: Node, name: &'static str) -> Result<Property<'a>> {
        self.property(node, name)?.ok_or(Error::MissingProperty(name))
    }

    /// Iterate over the memory reservation map.
    pub fn reservations(&self) -> Reservations<'a> {
        Reservations {
            blob: self.blob,
            off: self.header.off_mem_rsvmap as usize,
            done: false,
        }
    }
}

fn name_matches(node_name: &str, wanted: &str) -> bool {
    node_name == wanted
        || (!wanted.contains('@') && node_name.split('@').next() == Some(wanted))
}

/// Iterator over the properties of a node.
pub struct Properties<'t, 'a> {
    tree: &'t Tree<'a>,
    off: usize,
    done: bool,
}

impl<'a> Iterator for Properties<'_, 'a> {
    type Item = Result<Property<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.tree.token(self.off) {
                Ok(Token::Prop { prop, next }) => {
                    self.off = next;
                    return Some(Ok(prop));
                }
                Ok(Token::Nop { next }) => self.off = next,
                Ok(Token::BeginNode { .. } | Token::EndNode { .. }) => self.done = true,
                Ok(Token::End) => {
                    self.done = true;
                    return Some(Err(Error::MalformedTree));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Iterator over the direct children of a node.
pub struct Children<'t, 'a> {
    tree: &'t Tree<'a>,
    off: usize,
    done: bool,
}

impl Children<'_, '_> {
    fn step(&mut self) -> Result<Option<Node>> {
        loop {
            match self.tree.token(self.off)? {
                Token::Prop { next, .. } | Token::Nop { next } => self.off = next,
                Token::BeginNode { .. } => {
                    let child = Node(u32::try_from(self.off).map_err(|_| Error::MalformedTree)?);
                    self.off = self.tree.skip_node(child)?;
                    return Ok(Some(child));
                }
                Token::EndNode { .. } => return Ok(None),
                Token::End => return Err(Error::MalformedTree),
            }
        }
    }
}

impl Iterator for Children<'_, '_> {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.step();
        if !matches!(item, Ok(Some(_))) {
            self.done = true;
        }
        item.transpose()
    }
}

/// Iterator over `(address, size)` entries of the reservation map.
pub struct Reservations<'a> {
    blob: &'a [u8],
    off: usize,
    done: bool,
}

impl Iterator for Reservations<'_> {
    type Item = Result<Extent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let entry = be64(self.blob, self.off).and_then(|address| {
            be64(self.blob, self.off + 8).map(|size| (address, size))
        });
        match entry {
            Ok((0, 0)) => {
                self.done = true;
                None
            }
            Ok((address, size)) => {
                self.off += 16;
                Some(Extent::new(PhysAddr(address), size).ok_or(Error::MalformedTree))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TreeBuilder;

    fn sample() -> alloc::vec::Vec<u8> {
        let mut b = TreeBuilder::new();
        b.begin_node("")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 1)
            .prop_strings("compatible", &["board,x", "board,generic"])
            .begin_node("cpus")
            .begin_node("cpu@0")
            .prop_u32("reg", 0)
            .end_node()
            .end_node()
            .begin_node("memory@80000000")
            .prop_str("device_type", "memory")
            .prop_cells("reg", &[0, 0x8000_0000, 0x4000_0000])
            .end_node()
            .end_node();
        b.reserve(0x8000_0000, 0x1_0000);
        b.finish()
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut blob = sample();
        blob[0] = 0;
        assert_eq!(Tree::new(&blob).unwrap_err(), Error::MalformedTree);
    }

    #[test]
    fn test_rejects_truncated_blob() {
        let blob = sample();
        assert_eq!(Tree::new(&blob[..blob.len() - 1]).unwrap_err(), Error::MalformedTree);
        assert_eq!(Tree::new(&blob[..12]).unwrap_err(), Error::MalformedTree);
    }

    #[test]
    fn test_rejects_block_outside_total_size() {
        let mut blob = sample();
        // size_dt_struct
        blob[36..40].copy_from_slice(&0x1000_0000u32.to_be_bytes());
        assert_eq!(Tree::new(&blob).unwrap_err(), Error::MalformedTree);
    }

    #[test]
    fn test_ignores_bytes_after_total_size() {
        let mut blob = sample();
        let total = blob.len();
        blob.extend_from_slice(&[0xAA; 64]);
        let tree = Tree::new(&blob).unwrap();
        assert_eq!(tree.total_size(), total);
        assert_eq!(tree.as_bytes().len(), total);
    }

    #[test]
    fn test_resolve_and_names() {
        let blob = sample();
        let tree = Tree::new(&blob).unwrap();
        let cpu = tree.resolve("/cpus/cpu@0").unwrap();
        assert_eq!(tree.name(cpu).unwrap(), "cpu@0");
        // Unit address may be omitted
        let mem = tree.resolve("/memory").unwrap();
        assert_eq!(tree.name(mem).unwrap(), "memory@80000000");
        assert_eq!(tree.resolve("/").unwrap(), tree.root().unwrap());
        assert_eq!(tree.resolve("/nope").unwrap_err(), Error::NotFound);
        assert_eq!(tree.resolve("cpus").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn test_property_decoding() {
        let blob = sample();
        let tree = Tree::new(&blob).unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.required(root, "#address-cells").unwrap().as_u32(), Ok(2));
        assert_eq!(tree.property(root, "absent").unwrap(), None);
        assert_eq!(
            tree.required(root, "absent").unwrap_err(),
            Error::MissingProperty("absent")
        );

        let compat = tree.required(root, "compatible").unwrap();
        let list: alloc::vec::Vec<_> = compat.strings().map(|s| s.unwrap()).collect();
        assert_eq!(list, ["board,x", "board,generic"]);
        assert_eq!(compat.as_str(), Ok("board,x"));
        assert_eq!(compat.as_u32(), Err(Error::MalformedTree));

        let mem = tree.resolve("/memory").unwrap();
        let reg = tree.required(mem, "reg").unwrap();
        let ranges: alloc::vec::Vec<_> = reg.reg(2, 1).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(ranges, [(0x8000_0000, 0x4000_0000)]);
        assert!(reg.reg(2, 2).is_err());
    }

    #[test]
    fn test_property_blob_offset_points_at_value() {
        let blob = sample();
        let tree = Tree::new(&blob).unwrap();
        let mem = tree.resolve("/memory").unwrap();
        let reg = tree.required(mem, "reg").unwrap();
        let off = reg.blob_offset();
        assert_eq!(&blob[off..off + 12], reg.value());
    }

    #[test]
    fn test_children_in_declaration_order() {
        let blob = sample();
        let tree = Tree::new(&blob).unwrap();
        let names: alloc::vec::Vec<_> = tree
            .children(tree.root().unwrap())
            .unwrap()
            .map(|c| tree.name(c.unwrap()).unwrap())
            .collect();
        assert_eq!(names, ["cpus", "memory@80000000"]);
    }

    #[test]
    fn test_reservations() {
        let blob = sample();
        let tree = Tree::new(&blob).unwrap();
        let res: alloc::vec::Vec<_> = tree.reservations().map(|r| r.unwrap()).collect();
        assert_eq!(res, [Extent::new(PhysAddr(0x8000_0000), 0x1_0000).unwrap()]);
    }

    #[test]
    fn test_corrupt_property_length_is_malformed() {
        let blob = sample();
        let tree = Tree::new(&blob).unwrap();
        let root = tree.root().unwrap();
        let prop = tree.required(root, "#address-cells").unwrap();
        let len_at = tree.header().off_dt_struct as usize + prop.token_offset + 4;

        let mut bad = blob.clone();
        bad[len_at..len_at + 4].copy_from_slice(&0xFFFF_FFF0u32.to_be_bytes());
        let tree = Tree::new(&bad).unwrap();
        assert_eq!(
            tree.property(tree.root().unwrap(), "#address-cells").unwrap_err(),
            Error::MalformedTree
        );
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let blob = sample();
        let tree = Tree::new(&blob).unwrap();
        // Offset 8 lands inside the root's property stream, not on BEGIN_NODE
        assert_eq!(tree.name(Node(8)).unwrap_err(), Error::MalformedTree);
        assert_eq!(tree.name(Node(u32::MAX)).unwrap_err(), Error::MalformedTree);
    }
}
