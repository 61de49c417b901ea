//! Stub Configuration
//!
//! Compile-time constants and the platform profile. The profile is chosen
//! with a cargo feature (`board-qemu-virt` by default, `board-rpi4`); its
//! link base lives in `build.rs`.

use keel_common::{Extent, PhysAddr};
use keel_fit::AddressExpansion;
use keel_pal::PsciMethod;
use log::LevelFilter;

/// Maximum number of CPUs the stub provides stacks for
pub const MAX_CPUS: usize = 8;

/// Size of each per-CPU stack
pub const STACK_SIZE: usize = 16 * 1024; // 16 KB per CPU

/// Most verbose level the logger emits
pub const LOG_LEVEL: LevelFilter = LevelFilter::Debug;

/// Buffer receiving the patched device tree before it is committed
pub const SCRATCH_SIZE: usize = 1024 * 1024; // 1 MB

/// Everything the stub needs to know about a board.
#[derive(Debug, Clone, Copy)]
pub struct PlatformProfile {
    /// Name for the boot log
    pub name: &'static str,
    /// Compatibility strings matched against payload configurations, most
    /// specific first
    pub compatible: &'static [&'static str],
    /// Widening rule for one-cell load/entry addresses
    pub address_expansion: AddressExpansion,
    /// First byte of RAM
    pub ram_base: PhysAddr,
    /// First byte past the RAM the stub may write
    pub ram_ceiling: PhysAddr,
    /// Exception level the stub expects at entry
    pub entry_el: u8,
    /// Exception level the kernel runs at
    pub target_el: u8,
    /// Bytes reserved from the stub's link base: image, stacks, scratch
    pub stub_reserved_size: u64,
    /// PL011 console
    pub uart_base: u64,
    /// PSCI conduit unless the device tree says otherwise
    pub psci: PsciMethod,
    /// Payload location when the previous stage passes none
    pub payload_address: PhysAddr,
    /// Space kept free after the device-tree load address for the patched tree
    pub fdt_max_size: u64,
    /// Whether secondary cores are started into the kernel
    pub release_secondaries: bool,
}

impl PlatformProfile {
    /// Usable physical RAM.
    #[must_use]
    pub const fn ram(&self) -> Option<Extent> {
        Extent::from_range(self.ram_base, self.ram_ceiling)
    }

    /// The region the stub reserves, starting at its link base.
    #[must_use]
    pub const fn stub_region(&self, stub_start: PhysAddr) -> Option<Extent> {
        Extent::new(stub_start, self.stub_reserved_size)
    }
}

/// QEMU `virt` machine with `virtualization=on`
pub const QEMU_VIRT: PlatformProfile = PlatformProfile {
    name: "qemu-virt",
    compatible: &["linux,dummy-virt", "qemu,virt"],
    address_expansion: AddressExpansion::ZERO_EXTEND,
    ram_base: PhysAddr(0x4000_0000),
    ram_ceiling: PhysAddr(0x1_0000_0000),
    entry_el: 2,
    target_el: 1,
    stub_reserved_size: 0x40_0000,
    uart_base: 0x0900_0000,
    psci: PsciMethod::Smc,
    payload_address: PhysAddr(0x4800_0000),
    fdt_max_size: 0x10_0000,
    release_secondaries: true,
};

/// Raspberry Pi 4 Model B, firmware-loaded at 0x80000 with TF-A at EL3
pub const RPI4: PlatformProfile = PlatformProfile {
    name: "rpi4",
    compatible: &["raspberrypi,4-model-b", "brcm,bcm2711"],
    address_expansion: AddressExpansion::ZERO_EXTEND,
    ram_base: PhysAddr(0),
    // VideoCore carve-out starts here on 1 GB boards
    ram_ceiling: PhysAddr(0x3B40_0000),
    entry_el: 2,
    target_el: 1,
    stub_reserved_size: 0x40_0000,
    uart_base: 0xFE20_1000,
    psci: PsciMethod::Smc,
    payload_address: PhysAddr(0x0200_0000),
    fdt_max_size: 0x10_0000,
    release_secondaries: true,
};

/// Profile of the board this stub is built for
#[cfg(feature = "board-rpi4")]
pub const PROFILE: &PlatformProfile = &RPI4;

/// Profile of the board this stub is built for
#[cfg(not(feature = "board-rpi4"))]
pub const PROFILE: &PlatformProfile = &QEMU_VIRT;

// The scratch buffer must hold the largest tree the profile allows
const _: () = assert!(SCRATCH_SIZE as u64 >= PROFILE.fdt_max_size);
const _: () = assert!(PROFILE.target_el < PROFILE.entry_el);
