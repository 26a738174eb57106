use crate::parsers::{
    dna::{Dna, DnaParseContext},
    BlendParseError, Endianness, PointerSize, Result,
};
use nom::{
    branch::alt,
    bytes::complete::{tag, take},
    multi::many_till,
    number::complete::{be_u32, be_u64, le_u32, le_u64},
    sequence::tuple,
    Err,
};
use std::result::Result as StdResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// The size of the pointer on the machine used to save the blend file.
    pub pointer_size: PointerSize,
    /// The endianness on the machine used to save the blend file.
    pub endianness: Endianness,
    /// The version of Blender used to save the blend file.
    pub version: [u8; 3],
}

impl Header {
    /// Length of the file header in bytes.
    pub const LEN: usize = 12;

    /// Length of every block header in a file with this header.
    pub fn block_header_len(&self) -> usize {
        16 + self.pointer_size.bytes_num()
    }
}

/// Every block type found in the blend file. `Rend`, `Test` and `Dna` are never addressed by pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Rend,
    Test,
    Global,
    Dna,
    /// A principal (or root) block has a two letter code and its `dna_index` is always valid.
    Principal([u8; 2]),
    /// Subsidiary blocks have the code "DATA". Their `dna_index` is not always meaningful and is only
    /// used when whichever field points to them has a type like `void*`.
    Subsidiary,
}

impl BlockKind {
    fn from_code(code: [u8; 4]) -> Option<BlockKind> {
        match &code {
            b"REND" => Some(BlockKind::Rend),
            b"TEST" => Some(BlockKind::Test),
            b"GLOB" => Some(BlockKind::Global),
            b"DNA1" => Some(BlockKind::Dna),
            b"DATA" => Some(BlockKind::Subsidiary),
            &[c1, c2, 0, 0] => Some(BlockKind::Principal([c1, c2])),
            _ => None,
        }
    }

    /// Whether blocks of this kind take part in pointer resolution.
    pub fn is_addressable(self) -> bool {
        match self {
            BlockKind::Global | BlockKind::Principal(_) | BlockKind::Subsidiary => true,
            BlockKind::Rend | BlockKind::Test | BlockKind::Dna => false,
        }
    }
}

/// A block header as written by Blender, plus where it was found in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub code: [u8; 4],
    pub kind: BlockKind,
    /// Length of the payload in bytes.
    pub len: usize,
    /// The address the payload had in Blender's memory when the file was saved.
    pub memory_address: u64,
    pub dna_index: usize,
    /// The payload can contain more than one struct, count tells us how many there are.
    pub count: usize,
    /// File offset of the block header.
    pub header_position: usize,
    /// File offset of the payload.
    pub data_position: usize,
}

fn pointer_size_bits32(input: &[u8]) -> Result<PointerSize> {
    let (input, _) = tag("_")(input)?;
    Ok((input, PointerSize::Bits32))
}

fn pointer_size_bits64(input: &[u8]) -> Result<PointerSize> {
    let (input, _) = tag("-")(input)?;
    Ok((input, PointerSize::Bits64))
}

pub fn pointer_size(input: &[u8]) -> Result<PointerSize> {
    alt((pointer_size_bits32, pointer_size_bits64))(input)
}

fn endianness_little(input: &[u8]) -> Result<Endianness> {
    let (input, _) = tag("v")(input)?;
    Ok((input, Endianness::Little))
}

fn endianness_big(input: &[u8]) -> Result<Endianness> {
    let (input, _) = tag("V")(input)?;
    Ok((input, Endianness::Big))
}

pub fn endianness(input: &[u8]) -> Result<Endianness> {
    alt((endianness_little, endianness_big))(input)
}

pub fn version(input: &[u8]) -> Result<[u8; 3]> {
    let (input, v) = take(3_usize)(input)?;
    Ok((input, [v[0], v[1], v[2]]))
}

pub fn header(input: &[u8]) -> Result<Header> {
    let (input, _) = match tag::<_, _, BlendParseError>("BLENDER")(input) {
        Ok(v) => v,
        Err(_) => {
            return Err(Err::Failure(BlendParseError::CompressedFileNotSupported));
        }
    };

    let (input, (pointer_size, endianness, version)) =
        tuple((pointer_size, endianness, version))(input)?;

    Ok((
        input,
        Header {
            pointer_size,
            endianness,
            version,
        },
    ))
}

pub fn block_header_code(input: &[u8]) -> Result<[u8; 4]> {
    let (input, v) = take(4_usize)(input)?;
    Ok((input, [v[0], v[1], v[2], v[3]]))
}

/// The header, block listing and DNA of a .blend file. Payloads are not copied, every `BlockHeader`
/// records where its bytes live in the original buffer.
#[derive(Debug, Clone)]
pub struct RawBlend {
    pub header: Header,
    pub blocks: Vec<BlockHeader>,
    pub dna: Dna,
}

impl RawBlend {
    /// Parses the block listing of an uncompressed .blend file.
    pub fn parse(data: &[u8]) -> StdResult<Self, BlendParseError> {
        match BlendParseContext::default().blend(data) {
            Ok((_, blend)) => Ok(blend),
            Err(Err::Failure(e)) | Err(Err::Error(e)) => Err(e),
            Err(Err::Incomplete(..)) => Err(BlendParseError::NotEnoughData),
        }
    }
}

#[derive(Debug)]
pub enum BlendParseContext {
    Empty,
    ParsedHeader { header: Header, file_len: usize },
}

impl Default for BlendParseContext {
    fn default() -> Self {
        BlendParseContext::Empty
    }
}

impl BlendParseContext {
    fn u32<'a>(&self, endianness: Endianness, input: &'a [u8]) -> Result<'a, usize> {
        let (input, v) = match endianness {
            Endianness::Little => le_u32(input)?,
            Endianness::Big => be_u32(input)?,
        };
        Ok((input, v as usize))
    }

    fn memory_address<'a>(&self, header: &Header, input: &'a [u8]) -> Result<'a, u64> {
        match (header.endianness, header.pointer_size) {
            (Endianness::Little, PointerSize::Bits32) => {
                le_u32(input).map(|(i, n)| (i, u64::from(n)))
            }
            (Endianness::Big, PointerSize::Bits32) => {
                be_u32(input).map(|(i, n)| (i, u64::from(n)))
            }
            (Endianness::Little, PointerSize::Bits64) => le_u64(input),
            (Endianness::Big, PointerSize::Bits64) => be_u64(input),
        }
    }

    fn block<'a>(&self, input: &'a [u8]) -> Result<'a, BlockHeader> {
        let (header, file_len) = match self {
            BlendParseContext::ParsedHeader { header, file_len } => (header, *file_len),
            BlendParseContext::Empty => unreachable!("Header should be parsed here"),
        };

        let header_position = file_len - input.len();

        let (input, code) = block_header_code(input)?;
        let (input, len) = self.u32(header.endianness, input)?;
        let (input, memory_address) = self.memory_address(header, input)?;
        let (input, dna_index) = self.u32(header.endianness, input)?;
        let (input, count) = self.u32(header.endianness, input)?;

        let data_position = file_len - input.len();
        let (input, _) = take(len)(input)?;

        let kind = match BlockKind::from_code(code) {
            Some(kind) => kind,
            None => return Err(Err::Failure(BlendParseError::UnknownBlockCode(code))),
        };

        Ok((
            input,
            BlockHeader {
                code,
                kind,
                len,
                memory_address,
                dna_index,
                count,
                header_position,
                data_position,
            },
        ))
    }

    pub fn blend<'a>(&mut self, input: &'a [u8]) -> Result<'a, RawBlend> {
        let file = input;
        let (input, header) = header(input)?;

        //This has to happen before the rest of the parser runs
        *self = BlendParseContext::ParsedHeader {
            header,
            file_len: file.len(),
        };

        let this = &*self;
        let (input, (blocks, _)) = many_till(|d| this.block(d), tag("ENDB"))(input)?;

        let dna_block = match blocks.iter().rev().find(|b| b.kind == BlockKind::Dna) {
            Some(block) => block,
            None => return Err(Err::Failure(BlendParseError::NoDnaBlockFound)),
        };
        let dna_data = &file[dna_block.data_position..dna_block.data_position + dna_block.len];
        let (_, dna) = DnaParseContext::new(header.endianness).dna(dna_data)?;

        Ok((
            input,
            RawBlend {
                header,
                blocks,
                dna,
            },
        ))
    }
}
