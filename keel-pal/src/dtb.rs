//! Device-tree platform queries
//!
//! Reads the handful of facts the stub needs from the tree it will hand to
//! the kernel: which cores exist, how PSCI is reached, and the board model
//! for the banner. Parsing uses the `fdt` crate; the tree is the payload's
//! device-tree component, already validated by the image resolver.

use core::fmt;

use fdt::Fdt;
use fdt::node::FdtNode;

use crate::psci::PsciMethod;

/// Device-tree query errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtbError {
    /// DTB parsing failed (invalid magic, size, etc.)
    InvalidDtb,
    /// Required node not found in device tree
    MissingNode(&'static str),
    /// Required property not found in node
    MissingProperty(&'static str),
    /// Property data is invalid or malformed
    InvalidData,
}

impl fmt::Display for DtbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDtb => write!(f, "invalid device tree"),
            Self::MissingNode(n) => write!(f, "device tree node {} not found", n),
            Self::MissingProperty(p) => write!(f, "device tree property {} not found", p),
            Self::InvalidData => write!(f, "malformed device tree property"),
        }
    }
}

/// Parse a device tree.
pub fn parse(blob: &[u8]) -> Result<Fdt<'_>, DtbError> {
    Fdt::new(blob).map_err(|_| DtbError::InvalidDtb)
}

fn is_cpu(node: &FdtNode<'_, '_>) -> bool {
    match node.property("device_type").and_then(|p| p.as_str()) {
        Some(device_type) => device_type == "cpu",
        None => node.name == "cpu" || node.name.starts_with("cpu@"),
    }
}

/// Collect the MPIDR affinity of every core under `/cpus`.
///
/// Returns the number written to `out`. Cores beyond its capacity are
/// logged and skipped.
pub fn cpu_affinities(fdt: &Fdt<'_>, out: &mut [u64]) -> Result<usize, DtbError> {
    let cpus = fdt.find_node("/cpus").ok_or(DtbError::MissingNode("/cpus"))?;

    let mut count = 0;
    for node in cpus.children().filter(is_cpu) {
        let reg = node
            .property("reg")
            .ok_or(DtbError::MissingProperty("reg"))?;
        let mpidr = reg.as_usize().ok_or(DtbError::InvalidData)? as u64;

        match out.get_mut(count) {
            Some(slot) => {
                *slot = mpidr;
                count += 1;
            }
            None => log::warn!("Ignoring CPU {} ({:#x}): table full", node.name, mpidr),
        }
    }
    Ok(count)
}

/// Like [`cpu_affinities`], without the core the stub is running on.
pub fn secondary_cores(fdt: &Fdt<'_>, boot_mpidr: u64, out: &mut [u64]) -> Result<usize, DtbError> {
    let total = cpu_affinities(fdt, out)?;
    let mut kept = 0;
    for i in 0..total {
        if out[i] != boot_mpidr {
            out[kept] = out[i];
            kept += 1;
        }
    }
    Ok(kept)
}

/// The PSCI conduit declared by `/psci`.
pub fn psci_method(fdt: &Fdt<'_>) -> Result<PsciMethod, DtbError> {
    let psci = fdt.find_node("/psci").ok_or(DtbError::MissingNode("/psci"))?;
    let method = psci
        .property("method")
        .and_then(|p| p.as_str())
        .ok_or(DtbError::MissingProperty("method"))?;
    PsciMethod::from_name(method).ok_or(DtbError::InvalidData)
}

/// Root `model` string, if any.
pub fn model<'a>(fdt: &Fdt<'a>) -> Option<&'a str> {
    fdt.all_nodes()
        .next()
        .and_then(|root| root.property("model"))
        .and_then(|p| p.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_fit::builder::TreeBuilder;

    fn board_tree(method: Option<&str>, cpus: &[u64], two_cells: bool) -> Vec<u8> {
        let mut b = TreeBuilder::new();
        b.begin_node("")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 2)
            .prop_str("model", "keel test board");
        b.begin_node("cpus")
            .prop_u32("#address-cells", if two_cells { 2 } else { 1 })
            .prop_u32("#size-cells", 0);
        for &mpidr in cpus {
            let name = format!("cpu@{:x}", mpidr);
            b.begin_node(&name).prop_str("device_type", "cpu");
            if two_cells {
                b.prop_u64("reg", mpidr);
            } else {
                b.prop_u32("reg", mpidr as u32);
            }
            b.end_node();
        }
        b.begin_node("cpu-map").end_node();
        b.end_node();
        if let Some(method) = method {
            b.begin_node("psci")
                .prop_str("compatible", "arm,psci-1.0")
                .prop_str("method", method)
                .end_node();
        }
        b.end_node();
        b.finish()
    }

    #[test]
    fn test_cpu_affinities() {
        let blob = board_tree(Some("smc"), &[0, 1, 2, 3], false);
        let fdt = parse(&blob).unwrap();
        let mut out = [0u64; 8];
        assert_eq!(cpu_affinities(&fdt, &mut out), Ok(4));
        assert_eq!(&out[..4], &[0, 1, 2, 3]);
    }

    #[test]
    fn test_cpu_affinities_two_cells() {
        let blob = board_tree(Some("smc"), &[0x0, 0x100, 0x1_0000_0000], true);
        let fdt = parse(&blob).unwrap();
        let mut out = [0u64; 8];
        assert_eq!(cpu_affinities(&fdt, &mut out), Ok(3));
        assert_eq!(&out[..3], &[0x0, 0x100, 0x1_0000_0000]);
    }

    #[test]
    fn test_cpu_table_overflow_is_truncated() {
        let blob = board_tree(Some("smc"), &[0, 1, 2, 3], false);
        let fdt = parse(&blob).unwrap();
        let mut out = [0u64; 2];
        assert_eq!(cpu_affinities(&fdt, &mut out), Ok(2));
        assert_eq!(out, [0, 1]);
    }

    #[test]
    fn test_secondary_cores_skip_boot_core() {
        let blob = board_tree(Some("smc"), &[0, 1, 2, 3], false);
        let fdt = parse(&blob).unwrap();
        let mut out = [0u64; 8];
        assert_eq!(secondary_cores(&fdt, 2, &mut out), Ok(3));
        assert_eq!(&out[..3], &[0, 1, 3]);
    }

    #[test]
    fn test_psci_method() {
        let blob = board_tree(Some("hvc"), &[0], false);
        assert_eq!(psci_method(&parse(&blob).unwrap()), Ok(PsciMethod::Hvc));

        let blob = board_tree(Some("smc"), &[0], false);
        assert_eq!(psci_method(&parse(&blob).unwrap()), Ok(PsciMethod::Smc));

        let blob = board_tree(Some("bogus"), &[0], false);
        assert_eq!(psci_method(&parse(&blob).unwrap()), Err(DtbError::InvalidData));

        let blob = board_tree(None, &[0], false);
        assert_eq!(
            psci_method(&parse(&blob).unwrap()),
            Err(DtbError::MissingNode("/psci"))
        );
    }

    #[test]
    fn test_model() {
        let blob = board_tree(None, &[0], false);
        assert_eq!(model(&parse(&blob).unwrap()), Some("keel test board"));
    }

    #[test]
    fn test_invalid_blob() {
        assert_eq!(parse(&[0u8; 64]).err(), Some(DtbError::InvalidDtb));
    }
}
