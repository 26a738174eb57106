use crate::parsers::BlendParseError;
use thiserror::Error;

pub type Result<T, E = BlendError> = std::result::Result<T, E>;

/// Fatal errors. Anything in here means either the block listing is corrupt or the resolver broke one of
/// its own invariants; data anomalies inside blocks are reported through `log` and `None` instead.
#[derive(Debug, Error)]
pub enum BlendError {
    #[error(transparent)]
    Parse(#[from] BlendParseError),
    /// Two blocks claim the same memory address.
    #[error("duplicate block at address {address:#x}")]
    DuplicateBlock { address: u64 },
    /// A block address is at or below `HEAP_BASE`.
    #[error("block at address {address:#x} is not above the heap base {heap_base:#x}")]
    BelowHeapBase { address: u64, heap_base: u64 },
    /// An embedded field resolved to a different block than the struct containing it.
    #[error("field '{field}' of {type_name} at {address:#x} is outside of the block owning its parent")]
    CrossBlockField {
        type_name: String,
        field: String,
        address: u64,
    },
}
