//! Maps the memory addresses recorded in the file (and file offsets) back to the blocks that own them.

use crate::{
    error::{BlendError, Result},
    parsers::blend::BlockHeader,
};
use log::debug;
use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

/// Addresses at or below this value never belong to a block, only to broken or null pointers.
pub const HEAP_BASE: u64 = 0x400;

/// One allocation record of the saved heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// The block code, `b"DATA"` for subsidiary blocks and codes like `b"OB\0\0"` for root blocks.
    pub code: [u8; 4],
    /// The address the payload had in Blender's memory.
    pub address: u64,
    /// Payload length in bytes.
    pub size: u64,
    /// File offset of the payload.
    pub position: u64,
    /// Index of the payload's struct in the DNA.
    pub struct_type_id: usize,
    /// Length of the block header preceding the payload.
    pub data_offset: u64,
    /// Number of structs stored back to back in the payload.
    pub count: usize,
}

impl Block {
    pub fn new(address: u64, size: u64, position: u64, struct_type_id: usize) -> Self {
        Block {
            code: *b"DATA",
            address,
            size,
            position,
            struct_type_id,
            data_offset: 0,
            count: 1,
        }
    }

    pub(crate) fn from_header(header: &BlockHeader, header_len: usize) -> Self {
        Block {
            code: header.code,
            address: header.memory_address,
            size: header.len as u64,
            position: header.data_position as u64,
            struct_type_id: header.dna_index,
            data_offset: header_len as u64,
            count: header.count,
        }
    }

    /// First address past the end of the block. Blocks running past the top of the address space end at
    /// `u64::MAX`.
    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        self.address <= address && address < self.end()
    }

    /// Bytes left in the block from `address` onwards. Zero if `address` is outside of the block.
    pub fn remaining(&self, address: u64) -> u64 {
        if self.contains(address) {
            self.end() - address
        } else {
            0
        }
    }

    /// File offset of `address`, which must be inside the block.
    pub fn position_of(&self, address: u64) -> usize {
        (self.position + (address - self.address)) as usize
    }

    /// Two letter code of root blocks.
    pub fn root_code(&self) -> Option<[u8; 2]> {
        match self.code {
            [c1, c2, 0, 0] => Some([c1, c2]),
            _ => None,
        }
    }
}

/// The reconstructed address space of a .blend file.
///
/// Blocks are kept twice, sorted by address for pointer resolution and sorted by file position for the
/// reverse lookup. Blocks whose struct type was declared off-heap are moved into a nested table per type
/// and never take part in address lookups of the main table.
#[derive(Debug, Clone, Default)]
pub struct BlockTable {
    sorted: Vec<Block>,
    by_position: Vec<Block>,
    off_heap_types: BTreeSet<usize>,
    off_heap: BTreeMap<usize, BlockTable>,
    type_names: Rc<Vec<String>>,
}

impl BlockTable {
    /// Builds a table out of `blocks`, routing every block whose struct type is in `off_heap_types` to its
    /// own nested table.
    pub fn new<I>(blocks: I, off_heap_types: &BTreeSet<usize>) -> Result<Self>
    where
        I: IntoIterator<Item = Block>,
    {
        let mut heap = Vec::new();
        let mut off_heap: BTreeMap<usize, Vec<Block>> = BTreeMap::new();

        for block in blocks {
            if off_heap_types.contains(&block.struct_type_id) {
                off_heap.entry(block.struct_type_id).or_default().push(block);
            } else {
                heap.push(block);
            }
        }

        let mut table = BlockTable::from_blocks(heap)?;
        table.off_heap_types = off_heap_types.clone();
        for (type_id, blocks) in off_heap {
            table.off_heap.insert(type_id, BlockTable::from_blocks(blocks)?);
        }

        Ok(table)
    }

    fn from_blocks(mut blocks: Vec<Block>) -> Result<Self> {
        blocks.sort_by_key(|b| b.address);

        for block in &blocks {
            check_heap_base(block)?;
        }
        if let Some(pair) = blocks.windows(2).find(|w| w[0].address == w[1].address) {
            return Err(BlendError::DuplicateBlock {
                address: pair[0].address,
            });
        }

        let mut by_position = blocks.clone();
        by_position.sort_by_key(|b| b.position);

        Ok(BlockTable {
            sorted: blocks,
            by_position,
            ..BlockTable::default()
        })
    }

    /// Struct names indexed by `Block::struct_type_id`, used to make diagnostics readable.
    pub fn with_type_names(mut self, names: Vec<String>) -> Self {
        let names = Rc::new(names);
        for table in self.off_heap.values_mut() {
            table.type_names = names.clone();
        }
        self.type_names = names;
        self
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Blocks in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.sorted.iter()
    }

    /// Blocks in the order they appear in the file.
    pub fn iter_by_position(&self) -> impl Iterator<Item = &Block> {
        self.by_position.iter()
    }

    /// The nested table holding the blocks of an off-heap struct type.
    pub fn off_heap(&self, struct_type_id: usize) -> Option<&BlockTable> {
        self.off_heap.get(&struct_type_id)
    }

    pub fn off_heap_tables(&self) -> impl Iterator<Item = (usize, &BlockTable)> {
        self.off_heap.iter().map(|(id, table)| (*id, table))
    }

    /// `Ok` with the index of the block starting exactly at `address`, or `Err` with the index where such a
    /// block would be inserted.
    pub fn binary_search(&self, address: u64) -> std::result::Result<usize, usize> {
        self.sorted.binary_search_by_key(&address, |b| b.address)
    }

    /// Inserts a block loaded after the table was built.
    pub fn add(&mut self, block: Block) -> Result<()> {
        if self.off_heap_types.contains(&block.struct_type_id) {
            let type_names = self.type_names.clone();
            let table = self.off_heap.entry(block.struct_type_id).or_insert_with(|| BlockTable {
                type_names,
                ..BlockTable::default()
            });
            return table.add(block);
        }

        check_heap_base(&block)?;

        match self.binary_search(block.address) {
            Ok(_) => Err(BlendError::DuplicateBlock {
                address: block.address,
            }),
            Err(index) => {
                self.sorted.insert(index, block);

                let index = self
                    .by_position
                    .binary_search_by_key(&block.position, |b| b.position)
                    .unwrap_or_else(|i| i);
                self.by_position.insert(index, block);

                Ok(())
            }
        }
    }

    /// The block whose payload starts at or before `position`, or the first block if `position` comes before
    /// all of them. `None` only for an empty table.
    pub fn get_block_at(&self, position: u64) -> Option<&Block> {
        let index = match self
            .by_position
            .binary_search_by_key(&position, |b| b.position)
        {
            Ok(index) => index,
            Err(index) => index.saturating_sub(1),
        };

        self.by_position.get(index)
    }

    /// Translates a file offset into the memory address it had when the file was saved.
    pub fn get_address_at(&self, position: u64) -> Option<u64> {
        let block = self.get_block_at(position)?;
        position
            .checked_sub(block.position)
            .map(|delta| block.address + delta)
    }

    /// `Ok` with the index of the block containing `address`, otherwise `Err` with the index of the closest
    /// block starting below it.
    fn lookup(&self, address: u64) -> std::result::Result<usize, Option<usize>> {
        let candidate = match self.binary_search(address) {
            Ok(index) => return Ok(index),
            Err(index) => index.checked_sub(1),
        };

        match candidate {
            Some(index) if self.sorted[index].contains(address) => Ok(index),
            _ => Err(candidate),
        }
    }

    /// Same as `find_block` but without diagnostics.
    pub fn locate(&self, address: u64) -> Option<&Block> {
        if address == 0 {
            return None;
        }
        self.lookup(address).ok().map(|index| &self.sorted[index])
    }

    /// Resolves a pointer to the block containing it. Null pointers resolve to `None` silently, pointers
    /// outside of every block resolve to `None` with a debug diagnostic: files routinely contain stale
    /// pointers.
    pub fn find_block(&self, address: u64) -> Option<&Block> {
        if address == 0 {
            return None;
        }

        match self.lookup(address) {
            Ok(index) => Some(&self.sorted[index]),
            Err(candidate) => {
                self.log_miss(address, candidate);
                None
            }
        }
    }

    fn log_miss(&self, address: u64, candidate: Option<usize>) {
        let next = candidate
            .map_or(0, |i| i + 1)
            .min(self.sorted.len());
        let next = match self.sorted.get(next) {
            Some(block) => format!("{:#x}", block.address),
            None => String::from("none"),
        };

        match candidate.map(|i| &self.sorted[i]) {
            Some(block) => debug!(
                "address {:#x} is past block {:#x}..{:#x} ({}), next block at {}",
                address,
                block.address,
                block.end(),
                self.type_names
                    .get(block.struct_type_id)
                    .map_or("unknown type", String::as_str),
                next
            ),
            None => debug!(
                "address {:#x} is below every block, next block at {}",
                address, next
            ),
        }
    }
}

fn check_heap_base(block: &Block) -> Result<()> {
    if block.address > HEAP_BASE {
        Ok(())
    } else {
        Err(BlendError::BelowHeapBase {
            address: block.address,
            heap_base: HEAP_BASE,
        })
    }
}
