//! Parses the decorated field names stored in the DNA (`*next`, `mat[4][4]`, `(*func)()`, ...).

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_until},
    combinator::complete,
    error::{ErrorKind, ParseError},
    multi::{many0, many1},
    sequence::delimited,
    Err, IResult,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FieldParseError {
    #[error("malformed field name ({kind:?})")]
    NomError {
        kind: ErrorKind,
        other: Option<Box<FieldParseError>>,
    },
    #[error("array size is not a number")]
    InvalidArraySize,
}

impl ParseError<&str> for FieldParseError {
    fn from_error_kind(_input: &str, kind: ErrorKind) -> Self {
        FieldParseError::NomError { kind, other: None }
    }

    fn append(_input: &str, kind: ErrorKind, other: Self) -> Self {
        FieldParseError::NomError {
            kind,
            other: Some(Box::new(other)),
        }
    }
}

type Result<'a, T> = IResult<&'a str, T, FieldParseError>;

/// The shape of a field as described by its decorated name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldInfo {
    /// `name`
    Value,
    /// `name[2][3]`, `len` is the product of all dimensions.
    ValueArray { len: usize, dimensions: Vec<usize> },
    /// `*name`, `**name`
    Pointer { indirection_count: usize },
    /// `*name[4]`
    PointerArray {
        indirection_count: usize,
        len: usize,
        dimensions: Vec<usize>,
    },
    /// `(*name)()`
    FnPointer,
}

impl FieldInfo {
    /// Number of elements the field holds inline.
    pub fn element_count(&self) -> usize {
        match self {
            FieldInfo::ValueArray { len, .. } | FieldInfo::PointerArray { len, .. } => *len,
            _ => 1,
        }
    }
}

fn fn_pointer(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, name) = delimited(tag("(*"), take_until(")"), tag(")"))(input)?;
    let (input, _) = delimited(tag("("), take_until(")"), tag(")"))(input)?;

    Ok((input, (name, FieldInfo::FnPointer)))
}

fn array_dimensions(input: &str) -> Result<Vec<usize>> {
    let (input, dimensions) =
        many0(complete(delimited(tag("["), take_until("]"), tag("]"))))(input)?;

    let dimensions = dimensions
        .into_iter()
        .map(|d: &str| d.trim().parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Err::Failure(FieldParseError::InvalidArraySize))?;

    Ok((input, dimensions))
}

fn pointer(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, asterisks) = many1(tag("*"))(input)?;
    let (input, name) = take_till(|c| c == '[')(input)?;

    if input.is_empty() {
        return Ok((
            input,
            (
                name,
                FieldInfo::Pointer {
                    indirection_count: asterisks.len(),
                },
            ),
        ));
    }

    let (input, dimensions) = array_dimensions(input)?;
    Ok((
        input,
        (
            name,
            FieldInfo::PointerArray {
                indirection_count: asterisks.len(),
                len: dimensions.iter().product(),
                dimensions,
            },
        ),
    ))
}

fn value(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, name) = take_till(|c| c == '[')(input)?;

    if input.is_empty() {
        return Ok((input, (name, FieldInfo::Value)));
    }

    let (input, dimensions) = array_dimensions(input)?;
    Ok((
        input,
        (
            name,
            FieldInfo::ValueArray {
                len: dimensions.iter().product(),
                dimensions,
            },
        ),
    ))
}

/// Splits a decorated DNA name into its base name and shape.
pub fn parse_field(input: &str) -> Result<(&str, FieldInfo)> {
    alt((fn_pointer, pointer, value))(input)
}

/// The part of a (possibly subscripted) field name before the first `[`.
pub fn base_name(name: &str) -> &str {
    name.split('[').next().unwrap_or(name)
}
