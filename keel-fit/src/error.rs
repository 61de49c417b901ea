//! Error types for payload resolution

use core::fmt;

/// Errors raised while resolving, loading or patching the payload.
///
/// Every variant is fatal on the primary boot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Header inconsistency, or an offset/length escaping the blob
    MalformedTree,
    /// A required node path does not exist
    NotFound,
    /// A required property is absent from its node
    MissingProperty(&'static str),
    /// No configuration is compatible with the platform
    NoMatch,
    /// A component's data extent is not contained in the payload
    ExtentOutOfBounds,
    /// A destination range escapes the usable RAM window
    OutOfBounds,
    /// Source and destination extents disagree on length
    SourceDestinationMismatchedSize,
    /// The component's `type` does not fit the role it was referenced for
    WrongComponentType,
    /// The component data is compressed
    UnsupportedCompression,
    /// The tree declares no memory ranges
    MemoryDescriptionMissing,
    /// The region to exclude is not covered by declared memory
    RegionNotContained,
    /// A memory node would need more ranges than the table holds
    MemoryTableFull,
    /// Every declared memory range is reserved
    NoUsableMemory,
    /// The output buffer cannot hold the patched tree
    BufferTooSmall,
}

/// Result alias for payload operations.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedTree => write!(f, "malformed flattened tree"),
            Self::NotFound => write!(f, "node not found"),
            Self::MissingProperty(name) => write!(f, "missing property '{}'", name),
            Self::NoMatch => write!(f, "no configuration matches this platform"),
            Self::ExtentOutOfBounds => write!(f, "component data lies outside the payload"),
            Self::OutOfBounds => write!(f, "destination lies outside usable RAM"),
            Self::SourceDestinationMismatchedSize => {
                write!(f, "source and destination sizes differ")
            }
            Self::WrongComponentType => write!(f, "component type does not match its role"),
            Self::UnsupportedCompression => write!(f, "compressed components are not supported"),
            Self::MemoryDescriptionMissing => write!(f, "tree declares no memory"),
            Self::RegionNotContained => write!(f, "region is not inside declared memory"),
            Self::MemoryTableFull => write!(f, "memory table full"),
            Self::NoUsableMemory => write!(f, "no usable memory remains"),
            Self::BufferTooSmall => write!(f, "output buffer too small"),
        }
    }
}
