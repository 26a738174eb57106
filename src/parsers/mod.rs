pub mod blend;
pub mod dna;
pub mod field;
pub mod primitive;

use nom::{
    error::{ErrorKind, ParseError},
    IResult,
};
use std::io;
use thiserror::Error;

pub(crate) type Result<'a, T> = IResult<&'a [u8], T, BlendParseError>;

/// Size of a pointer on the machine used to create the .blend file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PointerSize {
    Bits32,
    Bits64,
}

impl PointerSize {
    /// Returns the pointer size in bytes.
    pub fn bytes_num(self) -> usize {
        match self {
            PointerSize::Bits32 => 4,
            PointerSize::Bits64 => 8,
        }
    }
}

/// Endianness of the machine used to create the .blend file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Errors that can happen during the initial parsing of the .blend file.
/// Most errors are simply `NomError` but a few of them are specific either
/// for better error reporting or due to custom logic.
#[derive(Debug, Error)]
pub enum BlendParseError {
    #[error("malformed data ({kind:?})")]
    NomError {
        kind: ErrorKind,
        other: Option<Box<BlendParseError>>,
    },
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    /// Returned when the file is incomplete.
    #[error("the file ended before the ENDB block")]
    NotEnoughData,
    /// The known block codes are `b"REND"`, `b"TEST"`, `b"GLOB"`, `b"DATA"`, `b"DNA1"` and any two-digit
    /// code like `b"OB\0\0"` for objects. Anything different from that returns `UnknownBlockCode`.
    #[error("unknown block code {0:?}")]
    UnknownBlockCode([u8; 4]),
    /// Returned when no DNA block is found before `ENDB`.
    #[error("no DNA1 block found")]
    NoDnaBlockFound,
    /// Returned when the file doesn't start with `b"BLENDER"`. The assumption is that the file
    /// is a compressed blend file, but this isn't actually tested for.
    #[error("missing BLENDER magic, the file is probably compressed")]
    CompressedFileNotSupported,
}

impl ParseError<&[u8]> for BlendParseError {
    fn from_error_kind(_input: &[u8], kind: ErrorKind) -> Self {
        BlendParseError::NomError { kind, other: None }
    }

    fn append(_input: &[u8], kind: ErrorKind, other: Self) -> Self {
        BlendParseError::NomError {
            kind,
            other: Some(Box::new(other)),
        }
    }
}
