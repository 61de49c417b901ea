//! Primary boot path
//!
//! [`run`] builds the boot context and drives [`STAGES`]:
//!
//! | Phase     | Hook                 |                                       |
//! |-----------|----------------------|---------------------------------------|
//! | Prestart  | `banner`             | console greeting                      |
//! | Prestart  | `verify_environment` | EL, MMU/cache state, stub size        |
//! | Prestart  | `init_el2`           | vector table                          |
//! | Prestart  | `platform_info`      | PSCI version and features             |
//! | Start     | `load_payload`       | the load pipeline                     |
//! | Poststart | `commit`             | patched tree, cache maintenance       |
//! | Poststart | `release_secondaries`| PSCI `CPU_ON` for each secondary      |
//! | Poststart | `handoff`            | `eret` into the kernel                |
//!
//! Any error is fatal.

use keel_arch::{cache, cpu, exceptions, registers};
use keel_common::{Extent, PhysAddr};
use keel_fit::tree::{FDT_MAGIC, HEADER_SIZE};
use keel_fit::{Error, PhysWindow, Tree, payload_span};
use keel_pal::{Psci, PsciMethod, dtb};
use spin::mutex::SpinMutex;

use crate::config::{MAX_CPUS, PROFILE, PlatformProfile, SCRATCH_SIZE};
use crate::error::{BootError, fatal};
use crate::handoff::{BOOT_RECORD, BootRecord, Handoff, HardwareLevel, RecordSlot};
use crate::pipeline::{self, BootTarget};
use crate::smp;
use crate::stages::{self, Hook, Stage};

/// Page 0 never joins the RAM window; Rust cannot address it.
const ZERO_PAGE_END: PhysAddr = PhysAddr(0x1000);

/// Receives the patched device tree until the commit.
static SCRATCH: SpinMutex<[u8; SCRATCH_SIZE]> = SpinMutex::new([0; SCRATCH_SIZE]);

/// State carried from one stage to the next on the primary core.
pub struct BootContext {
    pub profile: &'static PlatformProfile,
    /// Payload address and size from the previous stage, 0 if not given
    pub payload: PhysAddr,
    pub payload_size: u64,
    /// Linked extent of the stub image
    pub image: Extent,
    /// Region reserved for the stub; set by `verify_environment`
    pub stub: Extent,
    pub psci: Psci<PsciMethod>,
    pub target: Option<BootTarget>,
    pub cores: [u64; MAX_CPUS],
    pub core_count: usize,
}

impl BootContext {
    #[must_use]
    pub fn new(profile: &'static PlatformProfile, payload: u64, payload_size: u64, image: Extent) -> Self {
        Self {
            profile,
            payload: PhysAddr(payload),
            payload_size,
            image,
            stub: Extent::EMPTY,
            psci: Psci::new(profile.psci),
            target: None,
            cores: [0; MAX_CPUS],
            core_count: 0,
        }
    }

    /// Secondary cores found in the device tree.
    #[must_use]
    pub fn secondaries(&self) -> &[u64] {
        &self.cores[..self.core_count]
    }
}

/// Payload location, falling back to the profile default.
fn payload_address(profile: &PlatformProfile, given: PhysAddr) -> Result<PhysAddr, BootError> {
    match (given, profile.payload_address) {
        (given, _) if !given.is_null() => Ok(given),
        (_, fallback) if !fallback.is_null() => {
            log::info!("No payload address given, using {:#x}", fallback);
            Ok(fallback)
        }
        _ => Err(BootError::PayloadMissing),
    }
}

/// Payload extent.
///
/// A size of 0 means the previous stage did not say: the payload then runs
/// from `base` to the end of the last image's data, measured from the tree.
fn payload_extent(window: &PhysWindow<'_>, base: PhysAddr, size: u64) -> Result<Extent, BootError> {
    if size != 0 {
        return Extent::new(base, size).ok_or(BootError::PayloadOutsideRam);
    }

    let header = Extent::new(base, HEADER_SIZE as u64)
        .filter(|header| window.covers(header))
        .ok_or(BootError::PayloadOutsideRam)?;
    let bytes = window.bytes(&header)?;
    let word = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    if word(0) != FDT_MAGIC {
        return Err(Error::MalformedTree.into());
    }

    let tree = Extent::new(base, u64::from(word(4)))
        .filter(|tree| window.covers(tree))
        .ok_or(BootError::PayloadOutsideRam)?;
    let span = payload_span(&Tree::new(window.bytes(&tree)?)?)?;
    log::debug!("No payload size given, measured {:#x} bytes", span);
    Extent::new(base, span).ok_or(BootError::PayloadOutsideRam)
}

/// The profile's RAM without page 0, the stub region held back.
///
/// # Safety
/// Apart from the stub region, no other reference to that RAM may be live.
unsafe fn ram_window(ctx: &BootContext) -> Result<PhysWindow<'static>, BootError> {
    let ram = ctx.profile.ram().ok_or(BootError::PayloadOutsideRam)?;
    let extent =
        Extent::from_range(ram.base().max(ZERO_PAGE_END), ram.end()).ok_or(BootError::PayloadOutsideRam)?;
    // SAFETY: The range is RAM; everything the stub owns lies in `ctx.stub`,
    // which the window never touches, and the caller holds the only view
    Ok(unsafe { PhysWindow::from_raw(extent) }?.with_reserved(ctx.stub))
}

// -- Prestart

fn banner(ctx: &mut BootContext) -> Result<(), BootError> {
    keel_pal::println!();
    keel_pal::println!("keel {} ({})", env!("CARGO_PKG_VERSION"), ctx.profile.name);
    Ok(())
}

fn verify_environment(ctx: &mut BootContext) -> Result<(), BootError> {
    let found = cpu::current_el();
    if found != ctx.profile.entry_el {
        return Err(BootError::WrongPrivilegeLevel {
            expected: ctx.profile.entry_el,
            found,
        });
    }
    log::info!(
        "Running at EL{} (MMU {}, D-cache {})",
        found,
        if cpu::el2_mmu_enabled() { "on" } else { "off" },
        if cpu::el2_dcache_enabled() { "on" } else { "off" }
    );

    let stub = ctx
        .profile
        .stub_region(ctx.image.base())
        .filter(|region| region.contains(&ctx.image))
        .ok_or(BootError::StubTooLarge)?;
    log::info!("Stub image {}, reserved {}", ctx.image, stub);
    ctx.stub = stub;
    Ok(())
}

fn init_el2(_ctx: &mut BootContext) -> Result<(), BootError> {
    // SAFETY: The EL was checked by `verify_environment`
    unsafe { exceptions::init() };
    registers::log_el2_state();
    Ok(())
}

fn platform_info(ctx: &mut BootContext) -> Result<(), BootError> {
    ctx.psci.log_diagnostics(&[cpu::mpidr()]);
    Ok(())
}

// -- Start

fn load_payload(ctx: &mut BootContext) -> Result<(), BootError> {
    if ctx.target.is_some() {
        return Err(BootError::AlreadyPrepared);
    }
    let base = payload_address(ctx.profile, ctx.payload)?;

    // SAFETY: Single core, and no other window is live
    let mut window = unsafe { ram_window(ctx) }?;
    let payload = payload_extent(&window, base, ctx.payload_size)?;
    log::info!("Payload {}", payload);

    let mut scratch = SCRATCH.lock();
    let target = pipeline::prepare(ctx.profile, &mut window, payload, ctx.stub, &mut scratch[..])?;

    // Platform facts come from the tree the kernel will see
    let fdt = dtb::parse(&scratch[..target.patched_len])?;
    if let Some(model) = dtb::model(&fdt) {
        log::info!("Board: {}", model);
    }
    match dtb::psci_method(&fdt) {
        Ok(method) => ctx.psci = Psci::new(method),
        Err(e) => log::debug!("Keeping PSCI {:?}: {}", ctx.profile.psci, e),
    }
    ctx.core_count = match dtb::secondary_cores(&fdt, cpu::mpidr(), &mut ctx.cores) {
        Ok(count) => count,
        Err(e) => {
            log::warn!("No secondary CPUs: {}", e);
            0
        }
    };

    ctx.target = Some(target);
    Ok(())
}

// -- Poststart

fn clean_extent(extent: &Extent) {
    cache::clean_range(extent.base().as_u64(), extent.size());
}

fn commit(ctx: &mut BootContext) -> Result<(), BootError> {
    let target = ctx.target.ok_or(BootError::NotPrepared)?;

    // SAFETY: The pipeline's window is gone; nothing else views this RAM
    let mut window = unsafe { ram_window(ctx) }?;
    let tree = pipeline::commit(&mut window, &target, &SCRATCH.lock()[..])?;

    clean_extent(&target.kernel);
    if let Some(extent) = target.patched_tree() {
        clean_extent(&extent);
    }
    if let Some(ramdisk) = target.ramdisk {
        clean_extent(&ramdisk);
    }
    cache::icache_invalidate_all();

    BOOT_RECORD.publish(BootRecord {
        entry: target.entry,
        tree,
    })?;
    // Secondaries read the record with caches off
    cache::clean_range(
        core::ptr::from_ref::<RecordSlot>(&BOOT_RECORD) as u64,
        size_of::<RecordSlot>() as u64,
    );
    Ok(())
}

fn release_secondaries(ctx: &mut BootContext) -> Result<(), BootError> {
    if !ctx.profile.release_secondaries {
        log::info!("Secondary CPUs left off");
        return Ok(());
    }
    // SAFETY: The record is published and cleaned; the entry is the stub's
    // secondary entry point
    unsafe {
        smp::release_secondaries(
            &ctx.psci,
            &BOOT_RECORD,
            ctx.secondaries(),
            smp::secondary_entry_address(),
        )
    }?;
    Ok(())
}

fn handoff(ctx: &mut BootContext) -> Result<(), BootError> {
    let record = BOOT_RECORD.get().copied().ok_or(BootError::NotPrepared)?;
    let handoff = Handoff::begin(HardwareLevel, ctx.profile.entry_el)?;
    // SAFETY: The tree is committed and cleaned; nothing writes to the
    // kernel or the tree after this point
    let configured = unsafe {
        handoff.configure(
            exceptions::vector_table(),
            record.entry,
            record.tree,
            ctx.profile.target_el,
        )
    }?;
    configured.transfer()
}

/// The boot sequence.
pub static STAGES: [Stage<BootContext>; 8] = [
    Stage::Prestart(Hook {
        name: "banner",
        run: banner,
    }),
    Stage::Prestart(Hook {
        name: "verify_environment",
        run: verify_environment,
    }),
    Stage::Prestart(Hook {
        name: "init_el2",
        run: init_el2,
    }),
    Stage::Prestart(Hook {
        name: "platform_info",
        run: platform_info,
    }),
    Stage::Start(Hook {
        name: "load_payload",
        run: load_payload,
    }),
    Stage::Poststart(Hook {
        name: "commit",
        run: commit,
    }),
    Stage::Poststart(Hook {
        name: "release_secondaries",
        run: release_secondaries,
    }),
    Stage::Poststart(Hook {
        name: "handoff",
        run: handoff,
    }),
];

/// Boot the primary core. Never returns.
///
/// `payload` and `payload_size` are x0 and x1 from the previous stage;
/// `image` is the linked extent of the stub.
pub fn run(payload: u64, payload_size: u64, image: Extent) -> ! {
    let mut ctx = BootContext::new(PROFILE, payload, payload_size, image);
    match stages::drive(&STAGES, &mut ctx) {
        // The last stage diverges, so returning at all is a broken table
        Ok(()) => fatal(&BootError::StageSequence { stage: "handoff" }),
        Err(e) => fatal(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QEMU_VIRT;
    use keel_fit::builder::{TreeBuilder, place};

    const BASE: u64 = 0x4800_0000;

    fn small_tree() -> Vec<u8> {
        let mut b = TreeBuilder::new();
        b.begin_node("").prop_str("description", "payload");
        b.end_node();
        b.finish()
    }

    #[test]
    fn test_stage_table_is_ordered() {
        assert_eq!(stages::validate(&STAGES), Ok(()));
        assert_eq!(STAGES.last().map(|s| s.hook().name), Some("handoff"));
    }

    #[test]
    fn test_payload_address_fallback() {
        assert_eq!(
            payload_address(&QEMU_VIRT, PhysAddr(0x5000_0000)),
            Ok(PhysAddr(0x5000_0000))
        );
        assert_eq!(payload_address(&QEMU_VIRT, PhysAddr(0)), Ok(QEMU_VIRT.payload_address));

        let profile = PlatformProfile {
            payload_address: PhysAddr(0),
            ..QEMU_VIRT
        };
        assert_eq!(payload_address(&profile, PhysAddr(0)), Err(BootError::PayloadMissing));
    }

    #[test]
    fn test_payload_size_from_header() {
        let tree = small_tree();
        let mut ram = vec![0u8; 0x1000];
        place(&mut ram, 0x100, &tree);
        let window = PhysWindow::new(PhysAddr(BASE), &mut ram).unwrap();

        let extent = payload_extent(&window, PhysAddr(BASE + 0x100), 0).unwrap();
        assert_eq!(extent.base(), PhysAddr(BASE + 0x100));
        assert_eq!(extent.size(), tree.len() as u64);

        let explicit = payload_extent(&window, PhysAddr(BASE + 0x100), 0x800).unwrap();
        assert_eq!(explicit.size(), 0x800);
    }

    #[test]
    fn test_payload_size_covers_image_data() {
        let mut b = TreeBuilder::new();
        b.begin_node("");
        b.begin_node("images");
        b.begin_node("kernel-1")
            .prop_u32("data-position", 0x1000)
            .prop_u32("data-size", 0x200)
            .prop_u32("load", 0x4000_0000)
            .end_node();
        b.end_node();
        b.end_node();
        let tree = b.finish();

        let mut ram = vec![0u8; 0x2000];
        place(&mut ram, 0x100, &tree);
        let window = PhysWindow::new(PhysAddr(BASE), &mut ram).unwrap();

        let extent = payload_extent(&window, PhysAddr(BASE + 0x100), 0).unwrap();
        assert_eq!(extent, Extent::new(PhysAddr(BASE + 0x100), 0x1200).unwrap());
    }

    #[test]
    fn test_payload_without_magic() {
        let mut ram = vec![0u8; 0x1000];
        let window = PhysWindow::new(PhysAddr(BASE), &mut ram).unwrap();
        assert_eq!(
            payload_extent(&window, PhysAddr(BASE), 0),
            Err(BootError::Image(Error::MalformedTree))
        );
        assert_eq!(
            payload_extent(&window, PhysAddr(BASE + 0xFF0), 0),
            Err(BootError::PayloadOutsideRam)
        );
    }

    #[test]
    fn test_context_starts_unprepared() {
        let image = Extent::new(PhysAddr(0x4000_0000), 0x2_0000).unwrap();
        let ctx = BootContext::new(&QEMU_VIRT, 0, 0, image);
        assert!(ctx.target.is_none());
        assert!(ctx.secondaries().is_empty());
        assert_eq!(ctx.stub, Extent::EMPTY);
    }
}
