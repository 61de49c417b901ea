//! keel Entry Point
//!
//! The previous stage enters `_start` at EL2 with the MMU off, x0 = payload
//! address and x1 = payload size (either may be 0).

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_os = "none")]
mod entry {
    use keel_boot::config::{PROFILE, STACK_SIZE};
    use keel_boot::smp::KEEL_STACKS;
    use keel_common::{Extent, PhysAddr};

    unsafe extern "C" {
        static __stub_start: u8;
        static __stub_end: u8;
    }

    /// Primary entry: clear .bss, take stack slot 0, call [`primary_main`].
    ///
    /// # Safety
    /// Only the previous boot stage may branch here.
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    #[unsafe(link_section = ".text.boot")]
    pub unsafe extern "C" fn _start() -> ! {
        core::arch::naked_asm!(
            "msr daifset, #0xf",

            // Keep the payload arguments out of the way
            "mov x19, x0",
            "mov x20, x1",

            // -- Clear .bss (16-byte aligned at both ends)
            "adrp x2, __bss_start",
            "add x2, x2, :lo12:__bss_start",
            "adrp x3, __bss_end",
            "add x3, x3, :lo12:__bss_end",
            "1:",
            "cmp x2, x3",
            "b.hs 2f",
            "stp xzr, xzr, [x2], #16",
            "b 1b",
            "2:",

            // -- Stack slot 0
            "adrp x2, {stacks}",
            "add x2, x2, :lo12:{stacks}",
            "mov x3, {stack_size}",
            "add sp, x2, x3",

            "mov x0, x19",
            "mov x1, x20",
            "bl {main}",

            "3:",
            "wfi",
            "b 3b",

            stacks = sym KEEL_STACKS,
            stack_size = const STACK_SIZE,
            main = sym primary_main,
        );
    }

    /// Rust side of the primary core.
    extern "C" fn primary_main(payload: u64, payload_size: u64) -> ! {
        // SAFETY: The profile names this board's PL011
        unsafe { keel_pal::console::init(PROFILE.uart_base) };
        keel_boot::logger::init();

        let start = (&raw const __stub_start) as u64;
        let end = (&raw const __stub_end) as u64;
        let image = Extent::from_range(PhysAddr(start), PhysAddr(end)).unwrap_or(Extent::EMPTY);

        keel_boot::boot::run(payload, payload_size, image)
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        keel_pal::println!("KEEL PANIC: {}", info);
        keel_pal::console::flush();
        keel_arch::halt()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
