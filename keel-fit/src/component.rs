//! Component Extent Resolver
//!
//! A configuration references its components by name. Each component is a
//! node under `/images`:
//!
//! ```text
//! /images/kernel-1 {
//!     description = "Linux kernel";
//!     type = "kernel";
//!     compression = "none";
//!     data-position = <0x1000>;    // or data-offset, or inline data
//!     data-size = <0x2000>;
//!     load = <0x80000000>;         // one or two cells
//!     entry = <0x80000000>;        // optional, defaults to load
//! };
//! ```
//!
//! Resolution yields two extents per component: where the bytes sit now
//! (inside the payload) and where they must be before execution.

use core::fmt;

use keel_common::{Extent, PhysAddr};

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::tree::{Node, Property, Tree, align4};

/// Path of the images subtree.
pub const IMAGES_PATH: &str = "/images";

/// The part a component plays in the boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Kernel,
    DeviceTree,
    Ramdisk,
}

impl Role {
    /// All roles, in load order.
    pub const ALL: [Role; 3] = [Role::Kernel, Role::DeviceTree, Role::Ramdisk];

    /// Configuration property naming the component for this role.
    #[must_use]
    pub const fn property(self) -> &'static str {
        match self {
            Self::Kernel => "kernel",
            Self::DeviceTree => "fdt",
            Self::Ramdisk => "ramdisk",
        }
    }

    /// Value of the component's `type` property.
    #[must_use]
    pub const fn image_type(self) -> &'static str {
        match self {
            Self::Kernel => "kernel",
            Self::DeviceTree => "flat_dt",
            Self::Ramdisk => "ramdisk",
        }
    }

    /// Whether a configuration must reference this role.
    #[must_use]
    pub const fn is_required(self) -> bool {
        !matches!(self, Self::Ramdisk)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel => write!(f, "kernel"),
            Self::DeviceTree => write!(f, "device tree"),
            Self::Ramdisk => write!(f, "ramdisk"),
        }
    }
}

/// Rule for widening a one-cell (32-bit) `load`/`entry` address.
///
/// `phys = (upper << 32) | cell`. Two-cell values are taken verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressExpansion {
    upper: u32,
}

impl AddressExpansion {
    /// Plain zero-extension.
    pub const ZERO_EXTEND: Self = Self { upper: 0 };

    /// Place 32-bit addresses in the 4 GiB window starting at `upper << 32`.
    #[must_use]
    pub const fn with_upper(upper: u32) -> Self {
        Self { upper }
    }

    #[must_use]
    pub const fn expand(self, cell: u32) -> PhysAddr {
        PhysAddr(((self.upper as u64) << 32) | cell as u64)
    }

    /// Decode a one- or two-cell address property.
    pub fn decode(self, prop: &Property<'_>) -> Result<PhysAddr> {
        match prop.value().len() {
            4 => prop.as_u32().map(|cell| self.expand(cell)),
            8 => prop.as_u64().map(PhysAddr),
            _ => Err(Error::MalformedTree),
        }
    }
}

/// A resolved component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component<'a> {
    pub role: Role,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub node: Node,
    /// Where the bytes sit inside the payload.
    pub data: Extent,
    /// Where the bytes must be before execution.
    pub load: Extent,
    /// Execution entry point; the load address unless `entry` says otherwise.
    pub entry: PhysAddr,
}

/// Offset and length of the component data relative to the payload start.
fn data_descriptor(tree: &Tree<'_>, node: Node) -> Result<(u64, u64)> {
    if let Some(data) = tree.property(node, "data")? {
        return Ok((data.blob_offset() as u64, data.value().len() as u64));
    }

    let size = u64::from(tree.required(node, "data-size")?.as_u32()?);
    if let Some(position) = tree.property(node, "data-position")? {
        return Ok((u64::from(position.as_u32()?), size));
    }
    if let Some(offset) = tree.property(node, "data-offset")? {
        // External data starts at the first 4-byte boundary past the tree
        let base = align4(tree.total_size()) as u64;
        return Ok((base + u64::from(offset.as_u32()?), size));
    }
    Err(Error::MissingProperty("data"))
}

/// Bytes from the payload start to the end of the last image's data.
///
/// Covers the tree itself and the data of every node under `/images`,
/// referenced or not. Used when the previous stage passes no payload size.
pub fn payload_span(tree: &Tree<'_>) -> Result<u64> {
    let mut span = tree.total_size() as u64;
    let images = match tree.resolve(IMAGES_PATH) {
        Ok(node) => node,
        Err(Error::NotFound) => return Ok(span),
        Err(e) => return Err(e),
    };
    for image in tree.children(images)? {
        let image = image?;
        match data_descriptor(tree, image) {
            Ok((offset, size)) => {
                span = span.max(offset.checked_add(size).ok_or(Error::ExtentOutOfBounds)?);
            }
            // Resolution reports this if the image is ever referenced
            Err(Error::MissingProperty(_)) => log::debug!("Image '{}' has no data", tree.name(image)?),
            Err(e) => return Err(e),
        }
    }
    Ok(span)
}

fn check_kind(tree: &Tree<'_>, node: Node, role: Role) -> Result<()> {
    if let Some(kind) = tree.property(node, "type")?
        && kind.as_str()? != role.image_type()
    {
        log::error!("Component for {} has type '{}'", role, kind.as_str()?);
        return Err(Error::WrongComponentType);
    }
    if let Some(compression) = tree.property(node, "compression")?
        && compression.as_str()? != "none"
    {
        log::error!("Component for {} is compressed ({})", role, compression.as_str()?);
        return Err(Error::UnsupportedCompression);
    }
    Ok(())
}

/// Resolve the component a configuration references for `role`.
///
/// # Arguments
///
/// * `tree` - The payload tree
/// * `payload` - Physical placement of the whole payload, tree and trailing data
/// * `config` - The selected configuration
/// * `role` - Which component to resolve
/// * `expansion` - Widening rule for one-cell addresses
///
/// # Returns
///
/// `Ok(None)` when an optional role is not referenced. A missing required
/// role is [`Error::MissingProperty`]; data not fully inside `payload` is
/// [`Error::ExtentOutOfBounds`].
pub fn resolve_component<'a>(
    tree: &Tree<'a>,
    payload: Extent,
    config: &Configuration<'a>,
    role: Role,
    expansion: AddressExpansion,
) -> Result<Option<Component<'a>>> {
    let Some(name) = config.component_name(tree, role)? else {
        if role.is_required() {
            log::error!("Configuration '{}' has no {}", config.name(), role);
            return Err(Error::MissingProperty(role.property()));
        }
        return Ok(None);
    };

    let images = tree.resolve(IMAGES_PATH)?;
    let node = tree.subnode(images, name).inspect_err(|_| {
        log::error!("Image '{}' referenced for {} does not exist", name, role);
    })?;

    check_kind(tree, node, role)?;

    let (offset, size) = data_descriptor(tree, node)?;
    let data = payload
        .base()
        .checked_add(offset)
        .and_then(|base| Extent::new(base, size))
        .filter(|data| payload.contains(data))
        .ok_or(Error::ExtentOutOfBounds)?;

    let load_addr = expansion.decode(&tree.required(node, "load")?)?;
    let load = Extent::new(load_addr, size).ok_or(Error::OutOfBounds)?;
    let entry = match tree.property(node, "entry")? {
        Some(prop) => expansion.decode(&prop)?,
        None => load_addr,
    };

    let description = match tree.property(node, "description")? {
        Some(prop) => Some(prop.as_str()?),
        None => None,
    };

    log::info!(
        "{} '{}' ({}): data {} -> load {:#x}",
        role,
        name,
        description.unwrap_or("no description"),
        data,
        load_addr
    );

    Ok(Some(Component {
        role,
        name,
        description,
        node,
        data,
        load,
        entry,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{TreeBuilder, place};
    use crate::config::select_best_configuration;
    use alloc::vec::Vec;

    const PAYLOAD_BASE: u64 = 0x4800_0000;

    fn payload_extent(blob: &[u8]) -> Extent {
        Extent::new(PhysAddr(PAYLOAD_BASE), blob.len() as u64).unwrap()
    }

    /// One configuration, caller fills the images node.
    fn build(images: impl FnOnce(&mut TreeBuilder)) -> Vec<u8> {
        let mut b = TreeBuilder::new();
        b.begin_node("")
            .begin_node("configurations")
            .begin_node("default")
            .prop_str("compatible", "board,x")
            .prop_str("kernel", "kernel-1")
            .prop_str("fdt", "fdt-1")
            .end_node()
            .end_node()
            .begin_node("images");
        images(&mut b);
        b.end_node().end_node();
        b.finish()
    }

    fn resolve(blob: &[u8], role: Role) -> Result<Option<Component<'_>>> {
        let tree = Tree::new(blob)?;
        let config = select_best_configuration(&tree, &["board,x"])?;
        resolve_component(&tree, payload_extent(blob), &config, role, AddressExpansion::ZERO_EXTEND)
    }

    fn standard_images(b: &mut TreeBuilder) {
        b.begin_node("kernel-1")
            .prop_str("description", "test kernel")
            .prop_str("type", "kernel")
            .prop_str("compression", "none")
            .prop_u32("data-position", 0x1000)
            .prop_u32("data-size", 0x2000)
            .prop_u32("load", 0x8000_0000)
            .end_node()
            .begin_node("fdt-1")
            .prop_str("type", "flat_dt")
            .prop_u32("data-position", 0x4000)
            .prop_u32("data-size", 0x400)
            .prop_u64("load", 0x8020_0000)
            .end_node();
    }

    #[test]
    fn test_data_position_extents() {
        let mut blob = build(standard_images);
        place(&mut blob, 0x4400, &[]);

        let kernel = resolve(&blob, Role::Kernel).unwrap().unwrap();
        assert_eq!(kernel.name, "kernel-1");
        assert_eq!(kernel.description, Some("test kernel"));
        assert_eq!(kernel.data, Extent::new(PhysAddr(PAYLOAD_BASE + 0x1000), 0x2000).unwrap());
        assert_eq!(kernel.load, Extent::new(PhysAddr(0x8000_0000), 0x2000).unwrap());
        assert_eq!(kernel.entry, PhysAddr(0x8000_0000));

        let fdt = resolve(&blob, Role::DeviceTree).unwrap().unwrap();
        assert_eq!(fdt.data, Extent::new(PhysAddr(PAYLOAD_BASE + 0x4000), 0x400).unwrap());
        assert_eq!(fdt.load.base(), PhysAddr(0x8020_0000));
    }

    #[test]
    fn test_payload_span_reaches_last_image() {
        let blob = build(standard_images);
        let tree = Tree::new(&blob).unwrap();
        // fdt-1 ends last, at 0x4000 + 0x400
        assert_eq!(payload_span(&tree), Ok(0x4400));

        let blob = build(|b| {
            b.begin_node("kernel-1")
                .prop_u32("data-offset", 0x10)
                .prop_u32("data-size", 0x20)
                .prop_u32("load", 0x8000_0000)
                .end_node();
        });
        let tree = Tree::new(&blob).unwrap();
        let tree_end = ((blob.len() + 3) & !3) as u64;
        assert_eq!(payload_span(&tree), Ok(tree_end + 0x30));
    }

    #[test]
    fn test_payload_span_without_images() {
        let mut b = TreeBuilder::new();
        b.begin_node("").prop_str("description", "empty").end_node();
        let blob = b.finish();
        let tree = Tree::new(&blob).unwrap();
        assert_eq!(payload_span(&tree), Ok(blob.len() as u64));
    }

    #[test]
    fn test_optional_ramdisk_absent() {
        let mut blob = build(standard_images);
        place(&mut blob, 0x4400, &[]);
        assert_eq!(resolve(&blob, Role::Ramdisk), Ok(None));
    }

    #[test]
    fn test_data_outside_payload() {
        // Payload ends right after the tree, well before 0x1000
        let blob = build(standard_images);
        assert_eq!(resolve(&blob, Role::Kernel), Err(Error::ExtentOutOfBounds));
    }

    #[test]
    fn test_inline_data() {
        let blob = build(|b| {
            b.begin_node("kernel-1")
                .prop("data", &[0xAB; 16])
                .prop_u32("load", 0x8000_0000)
                .prop_u32("entry", 0x8000_0008)
                .end_node();
        });
        let tree = Tree::new(&blob).unwrap();
        let kernel = resolve(&blob, Role::Kernel).unwrap().unwrap();
        let start = (kernel.data.base().as_u64() - PAYLOAD_BASE) as usize;
        assert_eq!(&tree.as_bytes()[start..start + 16], &[0xAB; 16]);
        assert_eq!(kernel.entry, PhysAddr(0x8000_0008));
    }

    #[test]
    fn test_data_offset_is_relative_to_tree_end() {
        let mut blob = build(|b| {
            b.begin_node("kernel-1")
                .prop_u32("data-offset", 0x10)
                .prop_u32("data-size", 0x20)
                .prop_u32("load", 0x8000_0000)
                .end_node();
        });
        let tree_end = (blob.len() + 3) & !3;
        place(&mut blob, tree_end + 0x30, &[]);
        let kernel = resolve(&blob, Role::Kernel).unwrap().unwrap();
        assert_eq!(kernel.data.base(), PhysAddr(PAYLOAD_BASE + tree_end as u64 + 0x10));
    }

    #[test]
    fn test_one_cell_load_uses_expansion() {
        let mut blob = build(standard_images);
        place(&mut blob, 0x4400, &[]);
        let tree = Tree::new(&blob).unwrap();
        let config = select_best_configuration(&tree, &["board,x"]).unwrap();
        let kernel = resolve_component(
            &tree,
            payload_extent(&blob),
            &config,
            Role::Kernel,
            AddressExpansion::with_upper(0x1),
        )
        .unwrap()
        .unwrap();
        assert_eq!(kernel.load.base(), PhysAddr(0x1_8000_0000));
    }

    #[test]
    fn test_missing_load() {
        let mut blob = build(|b| {
            b.begin_node("kernel-1")
                .prop_u32("data-position", 0x100)
                .prop_u32("data-size", 0x10)
                .end_node();
        });
        place(&mut blob, 0x200, &[]);
        assert_eq!(resolve(&blob, Role::Kernel), Err(Error::MissingProperty("load")));
    }

    #[test]
    fn test_missing_image_node() {
        let blob = build(|_| {});
        assert_eq!(resolve(&blob, Role::Kernel), Err(Error::NotFound));
    }

    #[test]
    fn test_wrong_type_and_compression() {
        let blob = build(|b| {
            b.begin_node("kernel-1")
                .prop_str("type", "ramdisk")
                .prop("data", &[0; 4])
                .prop_u32("load", 0)
                .end_node();
        });
        assert_eq!(resolve(&blob, Role::Kernel), Err(Error::WrongComponentType));

        let blob = build(|b| {
            b.begin_node("kernel-1")
                .prop_str("compression", "gzip")
                .prop("data", &[0; 4])
                .prop_u32("load", 0)
                .end_node();
        });
        assert_eq!(resolve(&blob, Role::Kernel), Err(Error::UnsupportedCompression));
    }

    #[test]
    fn test_required_role_missing_from_configuration() {
        let mut b = TreeBuilder::new();
        b.begin_node("")
            .begin_node("configurations")
            .begin_node("default")
            .prop_str("compatible", "board,x")
            .prop_str("kernel", "kernel-1")
            .end_node()
            .end_node()
            .begin_node("images")
            .end_node()
            .end_node();
        let blob = b.finish();
        assert_eq!(resolve(&blob, Role::DeviceTree), Err(Error::MissingProperty("fdt")));
    }
}
