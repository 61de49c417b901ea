//! PSCI (Power State Coordination Interface)
//!
//! The stub uses PSCI to release secondary cores into the kernel entry path
//! and to report what the firmware supports. Running at EL2, the calls go to
//! EL3 firmware through SMC; HVC is kept for platforms where the stub itself
//! runs under a hypervisor.
//!
//! Reference: ARM DEN0022D - Power State Coordination Interface

use core::fmt;

// -- PSCI Function IDs (SMC64 convention for 64-bit calls)
//
// PSCI_VERSION, PSCI_FEATURES and CPU_OFF are SMC32 calls: only w0 of
// their result is defined.

/// Get PSCI version
pub const PSCI_VERSION: u32 = 0x8400_0000;

/// Query whether a function is implemented
pub const PSCI_FEATURES: u32 = 0x8400_000A;

/// CPU_SUSPEND - Enter a low-power state
pub const CPU_SUSPEND_64: u32 = 0xC400_0001;

/// CPU_OFF - Power down the calling CPU
pub const CPU_OFF: u32 = 0x8400_0002;

/// CPU_ON - Start a CPU at a given entry point
pub const CPU_ON_64: u32 = 0xC400_0003;

/// AFFINITY_INFO - Query power state of a CPU
pub const AFFINITY_INFO_64: u32 = 0xC400_0004;

/// Functions reported by [`Psci::log_diagnostics`].
pub const REPORTED_FUNCTIONS: [(u32, &str); 4] = [
    (CPU_ON_64, "CPU_ON"),
    (CPU_OFF, "CPU_OFF"),
    (CPU_SUSPEND_64, "CPU_SUSPEND"),
    (AFFINITY_INFO_64, "AFFINITY_INFO"),
];

// -- PSCI Return Codes

/// PSCI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PsciError {
    /// Operation not supported
    NotSupported = -1,
    /// Invalid parameters
    InvalidParameters = -2,
    /// Operation denied
    Denied = -3,
    /// CPU already on
    AlreadyOn = -4,
    /// CPU on pending
    OnPending = -5,
    /// Internal failure
    InternalFailure = -6,
    /// CPU not present
    NotPresent = -7,
    /// CPU disabled
    Disabled = -8,
    /// Invalid address
    InvalidAddress = -9,
}

impl PsciError {
    /// Map a negative return value. Anything outside the defined codes is
    /// reported as `InternalFailure`.
    #[must_use]
    pub fn from_code(value: i64) -> Self {
        match value {
            -1 => Self::NotSupported,
            -2 => Self::InvalidParameters,
            -3 => Self::Denied,
            -4 => Self::AlreadyOn,
            -5 => Self::OnPending,
            -7 => Self::NotPresent,
            -8 => Self::Disabled,
            -9 => Self::InvalidAddress,
            _ => Self::InternalFailure,
        }
    }

    /// Decode the w0 result of an SMC32 call, ignoring the upper half of x0.
    #[must_use]
    pub const fn smc32_result(raw: i64) -> i32 {
        raw as i32
    }

    /// `Ok` for `SUCCESS` (0), the mapped error otherwise.
    pub fn check(value: i64) -> Result<(), Self> {
        if value == 0 {
            Ok(())
        } else {
            Err(Self::from_code(value))
        }
    }
}

impl fmt::Display for PsciError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotSupported => "not supported",
            Self::InvalidParameters => "invalid parameters",
            Self::Denied => "denied",
            Self::AlreadyOn => "already on",
            Self::OnPending => "on pending",
            Self::InternalFailure => "internal failure",
            Self::NotPresent => "not present",
            Self::Disabled => "disabled",
            Self::InvalidAddress => "invalid address",
        };
        write!(f, "{} ({})", text, *self as i32)
    }
}

/// Affinity level states returned by AFFINITY_INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AffinityState {
    /// CPU is on
    On = 0,
    /// CPU is off
    Off = 1,
    /// CPU on is pending
    OnPending = 2,
}

/// Firmware PSCI version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PsciVersion {
    pub major: u16,
    pub minor: u16,
}

impl PsciVersion {
    /// PSCI_FEATURES first appeared in 1.0.
    pub const V1_0: Self = Self { major: 1, minor: 0 };

    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            major: (raw >> 16) as u16,
            minor: raw as u16,
        }
    }
}

impl fmt::Display for PsciVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// -- Conduits

/// The instruction that carries a PSCI call to firmware.
pub trait PsciConduit {
    /// Issue `function` with up to three arguments and return x0.
    ///
    /// # Safety
    /// The caller must ensure the function ID and arguments are valid; CPU_ON
    /// makes another core execute at `arg1`.
    unsafe fn call(&self, function: u32, arg0: u64, arg1: u64, arg2: u64) -> i64;
}

/// SMC conduit, firmware at EL3.
#[derive(Debug, Clone, Copy, Default)]
pub struct Smc;

/// HVC conduit, a hypervisor above the stub.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hvc;

impl PsciConduit for Smc {
    #[inline]
    unsafe fn call(&self, function: u32, arg0: u64, arg1: u64, arg2: u64) -> i64 {
        #[cfg(target_arch = "aarch64")]
        {
            let result: i64;
            // SAFETY: Caller guarantees the call is valid
            unsafe {
                core::arch::asm!(
                    "smc #0",
                    inout("x0") u64::from(function) => result,
                    inout("x1") arg0 => _,
                    inout("x2") arg1 => _,
                    inout("x3") arg2 => _,
                    options(nomem, nostack)
                );
            }
            result
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            let _ = (function, arg0, arg1, arg2);
            PsciError::NotSupported as i64
        }
    }
}

impl PsciConduit for Hvc {
    #[inline]
    unsafe fn call(&self, function: u32, arg0: u64, arg1: u64, arg2: u64) -> i64 {
        #[cfg(target_arch = "aarch64")]
        {
            let result: i64;
            // SAFETY: Caller guarantees the call is valid
            unsafe {
                core::arch::asm!(
                    "hvc #0",
                    inout("x0") u64::from(function) => result,
                    inout("x1") arg0 => _,
                    inout("x2") arg1 => _,
                    inout("x3") arg2 => _,
                    options(nomem, nostack)
                );
            }
            result
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            let _ = (function, arg0, arg1, arg2);
            PsciError::NotSupported as i64
        }
    }
}

/// Conduit chosen at run time, from the platform profile or the `/psci`
/// node of the device tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsciMethod {
    Smc,
    Hvc,
}

impl PsciMethod {
    /// Parse the `/psci` `method` property value.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "smc" => Some(Self::Smc),
            "hvc" => Some(Self::Hvc),
            _ => None,
        }
    }
}

impl PsciConduit for PsciMethod {
    #[inline]
    unsafe fn call(&self, function: u32, arg0: u64, arg1: u64, arg2: u64) -> i64 {
        // SAFETY: Forwarded from the caller
        unsafe {
            match self {
                Self::Smc => Smc.call(function, arg0, arg1, arg2),
                Self::Hvc => Hvc.call(function, arg0, arg1, arg2),
            }
        }
    }
}

// -- Public PSCI Interface

/// PSCI over a given conduit.
#[derive(Debug, Clone, Copy)]
pub struct Psci<C> {
    conduit: C,
}

impl<C: PsciConduit> Psci<C> {
    #[must_use]
    pub const fn new(conduit: C) -> Self {
        Self { conduit }
    }

    #[must_use]
    pub fn conduit(&self) -> &C {
        &self.conduit
    }

    /// Get the PSCI version supported by firmware.
    ///
    /// A negative return (no PSCI at all) becomes an error.
    pub fn version(&self) -> Result<PsciVersion, PsciError> {
        // SAFETY: PSCI_VERSION has no side effects
        let raw = PsciError::smc32_result(unsafe { self.conduit.call(PSCI_VERSION, 0, 0, 0) });
        if raw < 0 {
            return Err(PsciError::from_code(i64::from(raw)));
        }
        Ok(PsciVersion::from_raw(raw as u32))
    }

    /// Feature flags of `function`, or `NotSupported`.
    pub fn features(&self, function: u32) -> Result<u32, PsciError> {
        // SAFETY: PSCI_FEATURES has no side effects
        let raw =
            PsciError::smc32_result(unsafe { self.conduit.call(PSCI_FEATURES, u64::from(function), 0, 0) });
        if raw < 0 {
            return Err(PsciError::from_code(i64::from(raw)));
        }
        Ok(raw as u32)
    }

    /// Start a core at `entry`; it receives `context_id` in x0.
    ///
    /// Returns once firmware has accepted the request; the core may still
    /// be coming up.
    ///
    /// # Safety
    /// `entry` must be executable code prepared to run on a fresh core, and
    /// everything that code reads must already be final.
    pub unsafe fn power_on(&self, target: u64, entry: u64, context_id: u64) -> Result<(), PsciError> {
        log::debug!(
            "PSCI CPU_ON target={:#x} entry={:#x} context={:#x}",
            target,
            entry,
            context_id
        );
        // SAFETY: Caller guarantees entry is valid executable code
        PsciError::check(unsafe { self.conduit.call(CPU_ON_64, target, entry, context_id) })
    }

    /// Power down the calling core.
    ///
    /// On success the call does not return, so the only observable outcome
    /// is the error.
    ///
    /// # Safety
    /// The core must hold no locks and own nothing other cores wait on.
    pub unsafe fn power_off(&self) -> PsciError {
        // SAFETY: Caller guarantees the core can go away
        let raw = PsciError::smc32_result(unsafe { self.conduit.call(CPU_OFF, 0, 0, 0) });
        let err = PsciError::from_code(i64::from(raw));
        log::warn!("PSCI CPU_OFF returned: {}", err);
        err
    }

    /// Enter `power_state`. For powerdown states the core resumes at `entry`
    /// with `context_id` in x0; standby states return here.
    ///
    /// # Safety
    /// `entry` must be valid resume code when `power_state` is a powerdown
    /// state.
    pub unsafe fn power_suspend(
        &self,
        power_state: u32,
        entry: u64,
        context_id: u64,
    ) -> Result<(), PsciError> {
        // SAFETY: Caller guarantees entry is valid resume code
        PsciError::check(unsafe {
            self.conduit
                .call(CPU_SUSPEND_64, u64::from(power_state), entry, context_id)
        })
    }

    /// Query the power state of a CPU at affinity level 0.
    pub fn affinity_info(&self, target: u64) -> Result<AffinityState, PsciError> {
        // SAFETY: AFFINITY_INFO has no side effects
        let raw = unsafe { self.conduit.call(AFFINITY_INFO_64, target, 0, 0) };
        match raw {
            0 => Ok(AffinityState::On),
            1 => Ok(AffinityState::Off),
            2 => Ok(AffinityState::OnPending),
            _ => Err(PsciError::from_code(raw)),
        }
    }

    /// Log version, supported functions, and the state of each core.
    ///
    /// Returns the version, or `None` when firmware has no PSCI.
    pub fn log_diagnostics(&self, cores: &[u64]) -> Option<PsciVersion> {
        let version = match self.version() {
            Ok(v) => v,
            Err(e) => {
                log::warn!("PSCI unavailable: {}", e);
                return None;
            }
        };
        log::info!("PSCI version {}", version);

        if version >= PsciVersion::V1_0 {
            for (function, name) in REPORTED_FUNCTIONS {
                match self.features(function) {
                    Ok(flags) => log::debug!("PSCI {} supported (flags={:#x})", name, flags),
                    Err(e) => log::debug!("PSCI {} unavailable: {}", name, e),
                }
            }
        }

        for &core in cores {
            match self.affinity_info(core) {
                Ok(state) => log::debug!("CPU {:#x}: {:?}", core, state),
                Err(e) => log::debug!("CPU {:#x}: affinity query failed: {}", core, e),
            }
        }
        Some(version)
    }
}
