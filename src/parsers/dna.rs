//! Parser for the `DNA1` block: the table of names, types and struct layouts that describes every other block.

use crate::parsers::{Endianness, Result};
use nom::{
    bytes::complete::{tag, take, take_while},
    combinator::map,
    multi::count,
    number::complete::{be_u16, be_u32, le_u16, le_u32},
    sequence::terminated,
};

#[derive(Debug, Clone, Default)]
pub struct Dna {
    pub names: Vec<String>,
    pub types: Vec<DnaType>,
    pub structs: Vec<DnaStruct>,
}

#[derive(Debug, Clone)]
pub struct DnaType {
    pub name: String,
    /// Size in bytes of the type.
    pub bytes_len: usize,
}

#[derive(Debug, Clone)]
pub struct DnaField {
    /// Index on the `Dna::types` array.
    pub type_index: usize,
    /// Index on the `Dna::names` array.
    pub name_index: usize,
}

#[derive(Debug, Clone)]
pub struct DnaStruct {
    /// Index on the `Dna::types` array.
    pub type_index: usize,
    pub fields: Vec<DnaField>,
}

/// Number of padding bytes needed to bring `len` to a multiple of 4.
fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

#[derive(Debug)]
pub struct DnaParseContext {
    endianness: Endianness,
}

impl DnaParseContext {
    pub fn new(endianness: Endianness) -> Self {
        Self { endianness }
    }

    fn u16<'a>(&self, input: &'a [u8]) -> Result<'a, usize> {
        let (input, v) = match self.endianness {
            Endianness::Little => le_u16(input)?,
            Endianness::Big => be_u16(input)?,
        };
        Ok((input, usize::from(v)))
    }

    fn u32<'a>(&self, input: &'a [u8]) -> Result<'a, usize> {
        let (input, v) = match self.endianness {
            Endianness::Little => le_u32(input)?,
            Endianness::Big => be_u32(input)?,
        };
        Ok((input, v as usize))
    }

    /// `len` NUL-terminated strings followed by padding up to a 4 byte boundary.
    fn strings<'a>(&self, input: &'a [u8], len: usize) -> Result<'a, Vec<String>> {
        let (input, strings) = count(
            terminated(
                map(take_while(|b: u8| b != 0), |b: &[u8]| {
                    String::from_utf8_lossy(b).into_owned()
                }),
                tag("\0"),
            ),
            len,
        )(input)?;

        let consumed: usize = strings.iter().map(|s| s.len() + 1).sum();
        let (input, _) = take(padding(consumed))(input)?;

        Ok((input, strings))
    }

    fn names<'a>(&self, input: &'a [u8]) -> Result<'a, Vec<String>> {
        let (input, _) = tag("NAME")(input)?;
        let (input, names_len) = self.u32(input)?;
        self.strings(input, names_len)
    }

    fn types<'a>(&self, input: &'a [u8]) -> Result<'a, Vec<DnaType>> {
        let (input, _) = tag("TYPE")(input)?;
        let (input, types_len) = self.u32(input)?;
        let (input, type_names) = self.strings(input, types_len)?;

        let (input, _) = tag("TLEN")(input)?;
        let (input, type_lengths) = count(|i| self.u16(i), types_len)(input)?;
        let (input, _) = take(padding(types_len * 2))(input)?;

        Ok((
            input,
            type_names
                .into_iter()
                .zip(type_lengths)
                .map(|(name, bytes_len)| DnaType { name, bytes_len })
                .collect(),
        ))
    }

    fn dna_field<'a>(&self, input: &'a [u8]) -> Result<'a, DnaField> {
        let (input, type_index) = self.u16(input)?;
        let (input, name_index) = self.u16(input)?;
        Ok((
            input,
            DnaField {
                type_index,
                name_index,
            },
        ))
    }

    fn dna_struct<'a>(&self, input: &'a [u8]) -> Result<'a, DnaStruct> {
        let (input, type_index) = self.u16(input)?;
        let (input, fields_len) = self.u16(input)?;
        let (input, fields) = count(|i| self.dna_field(i), fields_len)(input)?;

        Ok((input, DnaStruct { type_index, fields }))
    }

    fn structs<'a>(&self, input: &'a [u8]) -> Result<'a, Vec<DnaStruct>> {
        let (input, _) = tag("STRC")(input)?;
        let (input, structs_len) = self.u32(input)?;
        count(|i| self.dna_struct(i), structs_len)(input)
    }

    pub fn dna<'a>(&self, input: &'a [u8]) -> Result<'a, Dna> {
        let (input, _) = tag("SDNA")(input)?;
        let (input, names) = self.names(input)?;
        let (input, types) = self.types(input)?;
        let (input, structs) = self.structs(input)?;

        Ok((
            input,
            Dna {
                names,
                types,
                structs,
            },
        ))
    }
}
