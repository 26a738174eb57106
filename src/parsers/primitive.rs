use super::Endianness;
use nom::number::complete::{
    be_f32, be_f64, be_i16, be_i32, be_i64, be_u16, be_u32, be_u64, le_f32, le_f64, le_i16,
    le_i32, le_i64, le_u16, le_u32, le_u64,
};

/// A fixed-size value that can be read straight out of the file buffer.
pub trait BlendPrimitive: Sized {
    /// Size of the value in the file, in bytes.
    const SIZE: usize;

    /// Parses the value from the start of `data`.
    /// # Panics
    /// Panics if `data` is shorter than `SIZE`.
    fn parse(data: &[u8], endianness: Endianness) -> Self;

    /// The name Blender's DNA uses for this type.
    fn blender_name() -> &'static str;
}

macro_rules! impl_primitive {
    ($ty:ty, $size:expr, $name:expr, $parse:ident) => {
        impl BlendPrimitive for $ty {
            const SIZE: usize = $size;

            fn parse(data: &[u8], endianness: Endianness) -> Self {
                $parse(data, endianness)
            }

            fn blender_name() -> &'static str {
                $name
            }
        }
    };
}

impl_primitive!(u8, 1, "uchar", parse_u8);
impl_primitive!(i8, 1, "char", parse_i8);
impl_primitive!(u16, 2, "ushort", parse_u16);
impl_primitive!(i16, 2, "short", parse_i16);
impl_primitive!(u32, 4, "uint", parse_u32);
impl_primitive!(i32, 4, "int", parse_i32);
impl_primitive!(u64, 8, "uint64_t", parse_u64);
impl_primitive!(i64, 8, "int64_t", parse_i64);
impl_primitive!(f32, 4, "float", parse_f32);
impl_primitive!(f64, 8, "double", parse_f64);

/// Reads a primitive at an absolute `position` of `data`. There is no cursor involved so concurrent
/// readers of the same buffer never interfere with each other.
/// # Panics
/// Panics if the value doesn't fit inside `data`.
pub fn read_at<U: BlendPrimitive>(data: &[u8], position: usize, endianness: Endianness) -> U {
    U::parse(data.get(position..).unwrap_or_default(), endianness)
}

pub fn parse_u8(slice: &[u8], _endianness: Endianness) -> u8 {
    *slice.get(0).expect("parse u8")
}

pub fn parse_i8(slice: &[u8], endianness: Endianness) -> i8 {
    parse_u8(slice, endianness) as i8
}

pub fn parse_u16(slice: &[u8], endianness: Endianness) -> u16 {
    let (_, val) = match endianness {
        Endianness::Little => le_u16::<()>(slice).expect("parse u16"),
        Endianness::Big => be_u16::<()>(slice).expect("parse u16"),
    };
    val
}

pub fn parse_i16(slice: &[u8], endianness: Endianness) -> i16 {
    let (_, val) = match endianness {
        Endianness::Little => le_i16::<()>(slice).expect("parse i16"),
        Endianness::Big => be_i16::<()>(slice).expect("parse i16"),
    };
    val
}

pub fn parse_u32(slice: &[u8], endianness: Endianness) -> u32 {
    let (_, val) = match endianness {
        Endianness::Little => le_u32::<()>(slice).expect("parse u32"),
        Endianness::Big => be_u32::<()>(slice).expect("parse u32"),
    };
    val
}

pub fn parse_i32(slice: &[u8], endianness: Endianness) -> i32 {
    let (_, val) = match endianness {
        Endianness::Little => le_i32::<()>(slice).expect("parse i32"),
        Endianness::Big => be_i32::<()>(slice).expect("parse i32"),
    };
    val
}

pub fn parse_u64(slice: &[u8], endianness: Endianness) -> u64 {
    let (_, val) = match endianness {
        Endianness::Little => le_u64::<()>(slice).expect("parse u64"),
        Endianness::Big => be_u64::<()>(slice).expect("parse u64"),
    };
    val
}

pub fn parse_i64(slice: &[u8], endianness: Endianness) -> i64 {
    let (_, val) = match endianness {
        Endianness::Little => le_i64::<()>(slice).expect("parse i64"),
        Endianness::Big => be_i64::<()>(slice).expect("parse i64"),
    };
    val
}

pub fn parse_f32(slice: &[u8], endianness: Endianness) -> f32 {
    let (_, val) = match endianness {
        Endianness::Little => le_f32::<()>(slice).expect("parse f32"),
        Endianness::Big => be_f32::<()>(slice).expect("parse f32"),
    };
    val
}

pub fn parse_f64(slice: &[u8], endianness: Endianness) -> f64 {
    let (_, val) = match endianness {
        Endianness::Little => le_f64::<()>(slice).expect("parse f64"),
        Endianness::Big => be_f64::<()>(slice).expect("parse f64"),
    };
    val
}
