//! Memory Reservation Editor
//!
//! Removes a physical range from the memory description of the device tree
//! handed to the kernel, so the kernel never allocates over the stub.
//!
//! The editor never writes to the tree it reads. [`exclude_region`] takes an
//! immutable [`Tree`] and serializes a patched copy into a caller buffer:
//!
//! - `reg` of every memory node loses `[start, end)`, splitting a range in
//!   two when the region is strictly interior
//! - the region is appended to the memory reservation map, unless an identical
//!   entry is already there
//!
//! Because the reservation map records the edit, applying the same region
//! again finds it reserved, leaves every range untouched and emits the same
//! bytes.

use keel_common::{Extent, PhysAddr};

use crate::error::{Error, Result};
use crate::tree::{FDT_MAGIC, FDT_PROP, HEADER_SIZE, MIN_VERSION, Tree, align4};

/// Maximum number of ranges tracked per memory node.
pub const MAX_MEM_TABLE_ENTRIES: usize = 8;

/// Maximum number of memory nodes under the root.
pub const MAX_MEMORY_NODES: usize = 4;

const DEFAULT_ADDRESS_CELLS: u32 = 2;
const DEFAULT_SIZE_CELLS: u32 = 1;

/// Fixed-capacity list of memory ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTable {
    ranges: [Extent; MAX_MEM_TABLE_ENTRIES],
    count: usize,
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ranges: [Extent::EMPTY; MAX_MEM_TABLE_ENTRIES],
            count: 0,
        }
    }

    /// Append a range. Empty ranges are dropped.
    pub fn push(&mut self, range: Extent) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        if self.count >= MAX_MEM_TABLE_ENTRIES {
            return Err(Error::MemoryTableFull);
        }
        self.ranges[self.count] = range;
        self.count += 1;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[Extent] {
        &self.ranges[..self.count]
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The table with `region` cut out of every range.
    ///
    /// Handles four cases per range:
    /// 1. No overlap: kept
    /// 2. Fully covered: dropped
    /// 3. Region overlaps the start or end: trimmed
    /// 4. Region strictly interior: split in two
    pub fn exclude(&self, region: &Extent) -> Result<Self> {
        let mut out = Self::new();
        for range in self.as_slice() {
            if !range.overlaps(region) {
                out.push(*range)?;
                continue;
            }
            if region.base() > range.base() {
                out.push(Extent::from_range(range.base(), region.base()).ok_or(Error::MalformedTree)?)?;
            }
            if region.end() < range.end() {
                out.push(Extent::from_range(region.end(), range.end()).ok_or(Error::MalformedTree)?)?;
            }
        }
        Ok(out)
    }
}

/// Root `#address-cells` / `#size-cells`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CellLayout {
    address: u32,
    size: u32,
}

impl CellLayout {
    fn of_root(tree: &Tree<'_>) -> Result<Self> {
        let root = tree.root()?;
        let read = |name: &str, default: u32| -> Result<u32> {
            match tree.property(root, name)? {
                Some(prop) => prop.as_u32(),
                None => Ok(default),
            }
        };
        let layout = Self {
            address: read("#address-cells", DEFAULT_ADDRESS_CELLS)?,
            size: read("#size-cells", DEFAULT_SIZE_CELLS)?,
        };
        if !matches!(layout.address, 1 | 2) || !matches!(layout.size, 1 | 2) {
            log::error!("Unsupported cell layout {:?}", layout);
            return Err(Error::MalformedTree);
        }
        Ok(layout)
    }

    fn entry_len(self) -> usize {
        (self.address + self.size) as usize * 4
    }

    /// Encode `value` into `cells` big-endian cells at the start of `out`.
    fn put(out: &mut [u8], cells: u32, value: u64) -> Result<usize> {
        if cells == 1 {
            let v = u32::try_from(value).map_err(|_| Error::MalformedTree)?;
            out[..4].copy_from_slice(&v.to_be_bytes());
            Ok(4)
        } else {
            out[..8].copy_from_slice(&value.to_be_bytes());
            Ok(8)
        }
    }

    fn encode(self, table: &MemoryTable, out: &mut [u8]) -> Result<usize> {
        let mut off = 0;
        for range in table.as_slice() {
            off += Self::put(&mut out[off..], self.address, range.base().as_u64())?;
            off += Self::put(&mut out[off..], self.size, range.size())?;
        }
        Ok(off)
    }
}

/// A memory node's `reg` property and the ranges it declares.
#[derive(Debug, Clone, Copy, Default)]
struct MemoryNode {
    /// Offset of the `PROP` token in the structure block.
    token_offset: usize,
    /// Length of the original value.
    value_len: usize,
    name_offset: u32,
    table: MemoryTable,
}

/// Every memory node of a tree.
#[derive(Debug, Clone, Copy, Default)]
struct MemoryNodes {
    nodes: [MemoryNode; MAX_MEMORY_NODES],
    count: usize,
}

impl MemoryNodes {
    fn as_slice(&self) -> &[MemoryNode] {
        &self.nodes[..self.count]
    }

    fn ranges(&self) -> impl Iterator<Item = &Extent> + Clone {
        self.as_slice().iter().flat_map(|node| node.table.as_slice())
    }

    fn collect(tree: &Tree<'_>, layout: CellLayout) -> Result<Self> {
        let mut nodes = Self::default();
        let root = tree.root()?;
        for child in tree.children(root)? {
            let child = child?;
            let name = tree.name(child)?;
            let is_memory = name == "memory"
                || name.starts_with("memory@")
                || match tree.property(child, "device_type")? {
                    Some(kind) => kind.as_str()? == "memory",
                    None => false,
                };
            if !is_memory {
                continue;
            }
            let Some(reg) = tree.property(child, "reg")? else {
                log::warn!("Memory node '{}' has no reg", name);
                continue;
            };

            let mut table = MemoryTable::new();
            for entry in reg.reg(layout.address, layout.size)? {
                let (base, size) = entry?;
                table.push(Extent::new(PhysAddr(base), size).ok_or(Error::MalformedTree)?)?;
            }

            if nodes.count >= MAX_MEMORY_NODES {
                return Err(Error::MemoryTableFull);
            }
            nodes.nodes[nodes.count] = MemoryNode {
                token_offset: reg.token_offset,
                value_len: reg.value().len(),
                name_offset: reg.name_offset,
                table,
            };
            nodes.count += 1;
        }
        Ok(nodes)
    }
}

/// Whether `region` is covered by the union of `ranges`.
fn is_covered<'r>(ranges: impl Iterator<Item = &'r Extent> + Clone, region: &Extent) -> bool {
    let mut cursor = region.base();
    while cursor < region.end() {
        match ranges.clone().find(|r| r.contains_addr(cursor)) {
            Some(range) => cursor = range.end(),
            None => return false,
        }
    }
    true
}

/// Lowest address inside a declared range and outside every reservation.
///
/// The answer is either the start of a range or the end of a reservation,
/// so only those candidates are tried.
fn lowest_usable<'r>(
    ranges: impl Iterator<Item = &'r Extent> + Clone,
    tree: &Tree<'_>,
    extra: Option<Extent>,
) -> Result<PhysAddr> {
    let reserved = |addr: PhysAddr| -> Result<bool> {
        for res in tree.reservations().chain(extra.map(Ok)) {
            if res?.contains_addr(addr) {
                return Ok(true);
            }
        }
        Ok(false)
    };

    let mut best: Option<PhysAddr> = None;
    let mut consider = |addr: PhysAddr| -> Result<()> {
        if best.is_some_and(|b| b <= addr) {
            return Ok(());
        }
        if ranges.clone().any(|r| r.contains_addr(addr)) && !reserved(addr)? {
            best = Some(addr);
        }
        Ok(())
    };

    for range in ranges.clone() {
        consider(range.base())?;
    }
    for res in tree.reservations().chain(extra.map(Ok)) {
        consider(res?.end())?;
    }
    best.ok_or(Error::NoUsableMemory)
}

/// Result of [`exclude_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchedTree {
    /// Bytes of the output buffer holding the patched tree.
    pub len: usize,
    /// Lowest usable RAM address after the edit.
    pub first_usable: PhysAddr,
}

fn put_u32(out: &mut [u8], off: usize, v: u32) {
    out[off..off + 4].copy_from_slice(&v.to_be_bytes());
}

fn put_u64(out: &mut [u8], off: usize, v: u64) {
    out[off..off + 8].copy_from_slice(&v.to_be_bytes());
}

/// Exclude `[start, end)` from the memory described by `tree`.
///
/// # Arguments
///
/// * `tree` - The device tree to patch, left untouched
/// * `start`, `end` - The half-open region to exclude
/// * `out` - Buffer receiving the patched tree
///
/// # Returns
///
/// The length of the patched tree in `out` and the first usable RAM address.
///
/// # Errors
///
/// - [`Error::MemoryDescriptionMissing`] if no memory node declares a range
/// - [`Error::RegionNotContained`] if the region is empty, or neither covered
///   by declared memory nor already reserved
/// - [`Error::MemoryTableFull`] if a split needs more than
///   [`MAX_MEM_TABLE_ENTRIES`] ranges
/// - [`Error::BufferTooSmall`] if `out` cannot hold the result
pub fn exclude_region(
    tree: &Tree<'_>,
    start: PhysAddr,
    end: PhysAddr,
    out: &mut [u8],
) -> Result<PatchedTree> {
    let region = Extent::from_range(start, end)
        .filter(|r| !r.is_empty())
        .ok_or(Error::RegionNotContained)?;

    let layout = CellLayout::of_root(tree)?;
    let nodes = MemoryNodes::collect(tree, layout)?;
    if nodes.ranges().next().is_none() {
        log::error!("Device tree declares no memory");
        return Err(Error::MemoryDescriptionMissing);
    }

    let mut already_reserved = false;
    let mut reservation_count = 0;
    for res in tree.reservations() {
        already_reserved |= res? == region;
        reservation_count += 1;
    }

    if !already_reserved && !is_covered(nodes.ranges(), &region) {
        log::error!("Region {} is not inside declared memory", region);
        return Err(Error::RegionNotContained);
    }

    let mut patched = nodes;
    for node in &mut patched.nodes[..patched.count] {
        node.table = node.table.exclude(&region)?;
    }

    // -- Size the output

    let header = tree.header();
    let rsv_entries = reservation_count + usize::from(!already_reserved);
    let rsv_size = (rsv_entries + 1) * 16;

    let mut struct_size = header.size_dt_struct as usize;
    for node in patched.as_slice() {
        let new_len = node.table.as_slice().len() * layout.entry_len();
        struct_size = struct_size - align4(node.value_len) + align4(new_len);
    }
    let strings_size = header.size_dt_strings as usize;

    let off_rsvmap = HEADER_SIZE;
    let off_struct = off_rsvmap + rsv_size;
    let off_strings = off_struct + struct_size;
    let total = off_strings + strings_size;
    if out.len() < total {
        log::error!("Patched tree needs {:#x} bytes, buffer holds {:#x}", total, out.len());
        return Err(Error::BufferTooSmall);
    }
    let total_u32 = u32::try_from(total).map_err(|_| Error::BufferTooSmall)?;

    // -- Header

    for (i, v) in [
        FDT_MAGIC,
        total_u32,
        off_struct as u32,
        off_strings as u32,
        off_rsvmap as u32,
        header.version.max(MIN_VERSION),
        16,
        header.boot_cpuid_phys,
        strings_size as u32,
        struct_size as u32,
    ]
    .into_iter()
    .enumerate()
    {
        put_u32(out, i * 4, v);
    }

    // -- Reservation map

    let mut off = off_rsvmap;
    for res in tree.reservations() {
        let res = res?;
        put_u64(out, off, res.base().as_u64());
        put_u64(out, off + 8, res.size());
        off += 16;
    }
    if !already_reserved {
        put_u64(out, off, region.base().as_u64());
        put_u64(out, off + 8, region.size());
        off += 16;
    }
    put_u64(out, off, 0);
    put_u64(out, off + 8, 0);

    // -- Structure block, splicing in the new reg values

    let src = tree.struct_block();
    let mut read = 0;
    let mut write = off_struct;
    for node in patched.as_slice() {
        let chunk = &src[read..node.token_offset];
        out[write..write + chunk.len()].copy_from_slice(chunk);
        write += chunk.len();

        let value = write + 12;
        let new_len = layout.encode(&node.table, &mut out[value..])?;
        let padded = align4(new_len);
        out[value + new_len..value + padded].fill(0);
        put_u32(out, write, FDT_PROP);
        put_u32(out, write + 4, new_len as u32);
        put_u32(out, write + 8, node.name_offset);
        write = value + padded;

        read = node.token_offset + 12 + align4(node.value_len);
    }
    let rest = &src[read..];
    out[write..write + rest.len()].copy_from_slice(rest);

    // -- Strings block, unchanged

    out[off_strings..total].copy_from_slice(tree.strings_block());

    let first_usable = lowest_usable(patched.ranges(), tree, Some(region))?;

    for range in patched.ranges() {
        log::debug!("Usable memory {}", range);
    }
    log::info!("Reserved {}, first usable RAM {:#x}", region, first_usable);

    Ok(PatchedTree {
        len: total,
        first_usable,
    })
}
