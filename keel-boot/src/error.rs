//! Boot errors and the fatal path

use core::fmt;

use keel_fit::Role;
use keel_pal::DtbError;

/// Anything that stops the primary boot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// Resolving, loading or patching the payload failed
    Image(keel_fit::Error),
    /// A device-tree platform query failed
    Platform(DtbError),
    /// Running at an exception level other than the one the stub expects
    WrongPrivilegeLevel { expected: u8, found: u8 },
    /// The requested kernel exception level cannot be entered from here
    InvalidTargetLevel(u8),
    /// Two components would occupy the same memory, or a copy would clobber
    /// data still waiting to be loaded
    ComponentOverlap { first: Role, second: Role },
    /// A component would be written over the stub's reserved region
    StubOverlap(Role),
    /// No payload address was provided or configured
    PayloadMissing,
    /// The payload is not inside the RAM window the stub may touch
    PayloadOutsideRam,
    /// The stub image is larger than its reserved region
    StubTooLarge,
    /// The load pipeline already ran
    AlreadyPrepared,
    /// A step needing the loaded images ran before the load pipeline
    NotPrepared,
    /// Stage table is not ordered prestart, start, poststart
    StageSequence { stage: &'static str },
}

impl From<keel_fit::Error> for BootError {
    fn from(err: keel_fit::Error) -> Self {
        Self::Image(err)
    }
}

impl From<DtbError> for BootError {
    fn from(err: DtbError) -> Self {
        Self::Platform(err)
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(e) => write!(f, "payload: {}", e),
            Self::Platform(e) => write!(f, "platform: {}", e),
            Self::WrongPrivilegeLevel { expected, found } => {
                write!(f, "running at EL{}, expected EL{}", found, expected)
            }
            Self::InvalidTargetLevel(el) => write!(f, "cannot enter EL{}", el),
            Self::ComponentOverlap { first, second } => {
                write!(f, "{} and {} overlap", first, second)
            }
            Self::StubOverlap(role) => write!(f, "{} would overwrite the stub", role),
            Self::PayloadMissing => write!(f, "no payload"),
            Self::PayloadOutsideRam => write!(f, "payload outside usable RAM"),
            Self::StubTooLarge => write!(f, "stub image exceeds its reserved region"),
            Self::AlreadyPrepared => write!(f, "images already loaded"),
            Self::NotPrepared => write!(f, "images not loaded yet"),
            Self::StageSequence { stage } => write!(f, "stage '{}' out of order", stage),
        }
    }
}

/// Log `err` and stop this core for good.
pub fn fatal(err: &BootError) -> ! {
    log::error!("KEEL PANIC: {}", err);
    keel_pal::console::flush();
    keel_arch::halt()
}
