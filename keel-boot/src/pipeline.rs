//! Primary load pipeline
//!
//! Runs once, on the boot core, before any other core is powered on:
//!
//! 1. select the configuration matching this platform
//! 2. resolve kernel, device tree and optional ramdisk
//! 3. patch the device tree to reserve the stub (into a scratch buffer)
//! 4. check that no copy clobbers another component or the stub, then load
//!    in role order
//! 5. move the kernel to the first usable RAM address
//!
//! Every check happens before the first byte moves, so a failed pipeline
//! leaves RAM as the previous stage left it. [`commit`] writes the patched
//! tree over the loaded one and is the last write before hand-off.

use keel_common::{Extent, PhysAddr};
use keel_fit::{
    AddressExpansion, Error, PhysWindow, Role, Tree, exclude_region, load, relocate_kernel,
    resolve_component, select_best_configuration,
};

use crate::config::PlatformProfile;
use crate::error::BootError;

/// Where a component is and where it goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub role: Role,
    pub data: Extent,
    pub load: Extent,
    pub entry: PhysAddr,
}

/// The finalized boot: where everything ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootTarget {
    /// Kernel after relocation
    pub kernel: Extent,
    /// Kernel entry point after relocation
    pub entry: PhysAddr,
    /// Device tree as loaded from the payload
    pub device_tree: Extent,
    /// Length of the patched tree waiting in the scratch buffer
    pub patched_len: usize,
    pub ramdisk: Option<Extent>,
    /// First RAM address not reserved after the patch
    pub first_usable: PhysAddr,
}

impl BootTarget {
    /// Physical range of the committed tree.
    #[must_use]
    pub fn patched_tree(&self) -> Option<Extent> {
        Extent::new(self.device_tree.base(), self.patched_len as u64)
    }
}

/// Resolve every role the selected configuration references.
fn resolve(
    tree: &Tree<'_>,
    payload: Extent,
    platform: &[&str],
    expansion: AddressExpansion,
    out: &mut [Option<Placement>; 3],
) -> Result<(), BootError> {
    let config = select_best_configuration(tree, platform)?;
    log::info!("Booting configuration '{}'", config.name());

    for (slot, role) in out.iter_mut().zip(Role::ALL) {
        *slot = resolve_component(tree, payload, &config, role, expansion)?.map(|c| Placement {
            role: c.role,
            data: c.data,
            load: c.load,
            entry: c.entry,
        });
    }
    Ok(())
}

/// Every destination must be pairwise disjoint, and no copy may land on
/// payload data a later copy still reads.
fn check_placements(targets: &[Option<(Role, Extent)>], pending: &[Option<Placement>]) -> Result<(), BootError> {
    for (i, (role, target)) in targets.iter().enumerate().filter_map(|(i, t)| t.map(|t| (i, t))) {
        for (other, extent) in targets[i + 1..].iter().flatten() {
            if target.overlaps(extent) {
                return Err(BootError::ComponentOverlap {
                    first: role,
                    second: *other,
                });
            }
        }
        for later in pending.iter().skip(i + 1).flatten() {
            if target.overlaps(&later.data) {
                return Err(BootError::ComponentOverlap {
                    first: role,
                    second: later.role,
                });
            }
        }
    }
    Ok(())
}

/// No destination may land on the stub.
fn check_clear_of_stub(role: Role, target: &Extent, stub: &Extent) -> Result<(), BootError> {
    if target.overlaps(stub) {
        log::error!("{} target {} overlaps the stub {}", role, target, stub);
        return Err(BootError::StubOverlap(role));
    }
    Ok(())
}

/// Run the load pipeline.
///
/// # Arguments
///
/// * `profile` - The platform profile
/// * `window` - RAM the stub may write; must contain the payload. RAM on
///   either side of the stub counts, the stub itself is never written
/// * `payload` - Physical extent of the payload, tree plus external data
/// * `stub` - The region reserved for the stub itself
/// * `scratch` - Receives the patched device tree
pub fn prepare(
    profile: &PlatformProfile,
    window: &mut PhysWindow<'_>,
    payload: Extent,
    stub: Extent,
    scratch: &mut [u8],
) -> Result<BootTarget, BootError> {
    if payload.is_empty() || !window.covers(&payload) {
        log::error!("Payload {} outside RAM window {}", payload, window.extent());
        return Err(BootError::PayloadOutsideRam);
    }

    // -- Resolve and patch, reading the payload in place

    let mut placements = [None; 3];
    let (patched, dt) = {
        let tree = Tree::new(window.bytes(&payload)?)?;
        resolve(&tree, payload, profile.compatible, profile.address_expansion, &mut placements)?;

        let dt = placements[1].ok_or(Error::MissingProperty("fdt"))?;
        let dt_tree = Tree::new(window.bytes(&dt.data)?)?;
        let capacity = usize::try_from(profile.fdt_max_size.max(dt.load.size()))
            .map_err(|_| Error::BufferTooSmall)?
            .min(scratch.len());
        let patched = exclude_region(&dt_tree, stub.base(), stub.end(), &mut scratch[..capacity])?;
        (patched, dt)
    };

    let kernel = placements[0].ok_or(Error::MissingProperty("kernel"))?;
    let ramdisk = placements[2];

    // -- Check the final layout before anything moves

    let fdt_footprint = dt
        .load
        .with_size(profile.fdt_max_size.max(dt.load.size()))
        .ok_or(Error::OutOfBounds)?;
    let kernel_final = kernel.load.with_base(patched.first_usable).ok_or(Error::OutOfBounds)?;

    let targets = [
        Some((Role::Kernel, kernel.load)),
        Some((Role::DeviceTree, fdt_footprint)),
        ramdisk.map(|r| (Role::Ramdisk, r.load)),
    ];
    check_placements(&targets, &placements)?;
    for (role, extent) in targets.iter().flatten() {
        check_clear_of_stub(*role, extent, &stub)?;
        if !window.covers(extent) {
            log::error!("{} target {} outside RAM window {}", role, extent, window.extent());
            return Err(Error::OutOfBounds.into());
        }
    }
    if kernel_final != kernel.load {
        check_clear_of_stub(Role::Kernel, &kernel_final, &stub)?;
        if !window.covers(&kernel_final) {
            return Err(Error::OutOfBounds.into());
        }
        for (role, extent) in targets.iter().skip(1).flatten() {
            if kernel_final.overlaps(extent) {
                return Err(BootError::ComponentOverlap {
                    first: Role::Kernel,
                    second: *role,
                });
            }
        }
    }

    // -- Load in role order, then move the kernel into place

    for placement in placements.iter().flatten() {
        let at = load(window, placement.data, placement.load)?;
        log::info!("Loaded {} at {:#x} ({:#x} bytes)", placement.role, at, placement.load.size());
    }

    let kernel_extent = relocate_kernel(window, kernel.load, patched.first_usable)?;
    let entry = if kernel_extent == kernel.load {
        kernel.entry
    } else {
        kernel
            .entry
            .checked_offset_from(kernel.load.base())
            .and_then(|offset| kernel_extent.base().checked_add(offset))
            .ok_or(Error::OutOfBounds)?
    };

    log::info!("Kernel {} entry {:#x}", kernel_extent, entry);

    Ok(BootTarget {
        kernel: kernel_extent,
        entry,
        device_tree: dt.load,
        patched_len: patched.len,
        ramdisk: ramdisk.map(|r| r.load),
        first_usable: patched.first_usable,
    })
}

/// Write the patched tree over the loaded device tree.
///
/// Returns the tree address handed to the kernel.
pub fn commit(window: &mut PhysWindow<'_>, target: &BootTarget, scratch: &[u8]) -> Result<PhysAddr, BootError> {
    let patched = scratch.get(..target.patched_len).ok_or(Error::BufferTooSmall)?;
    let extent = target.patched_tree().ok_or(Error::OutOfBounds)?;
    window.bytes_mut(&extent)?.copy_from_slice(patched);
    log::debug!("Committed patched device tree at {}", extent);
    Ok(extent.base())
}
