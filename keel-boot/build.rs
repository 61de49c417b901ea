use std::env;

fn main() {
    println!("cargo:rerun-if-changed=link.ld");

    // Host builds (tests, tooling) link normally
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    // Link base per board, matching the RAM layout in src/config.rs
    let base = if env::var_os("CARGO_FEATURE_BOARD_RPI4").is_some() {
        "0x80000"
    } else {
        "0x40000000"
    };

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    println!("cargo:rustc-link-arg-bins=-T{}/link.ld", manifest_dir);
    println!("cargo:rustc-link-arg-bins=--defsym=__stub_base={}", base);
}
