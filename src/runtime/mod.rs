pub mod block_table;
mod display;
pub mod instance;
pub mod list;
pub mod schema;

use crate::{
    error::Result,
    parsers::{
        blend::{BlockHeader, Header, RawBlend},
        primitive::{parse_u32, parse_u64},
        BlendParseError, PointerSize,
    },
};
use block_table::{Block, BlockTable};
use instance::Instance;
use log::{debug, warn};
use schema::Schema;
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeSet, HashMap},
    io::Read,
    path::Path,
    rc::{Rc, Weak},
};

/// Settings that change how a file is indexed.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Struct types whose blocks are kept out of the address table, each in its own table.
    pub off_heap_types: Vec<String>,
    /// Materializing more elements than this in one call logs a warning suggesting `get_instant_list`.
    pub large_array_warning: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            off_heap_types: Vec::new(),
            large_array_warning: 1000,
        }
    }
}

impl LoadOptions {
    pub fn off_heap_type<T: Into<String>>(mut self, name: T) -> Self {
        self.off_heap_types.push(name.into());
        self
    }

    pub fn large_array_warning(mut self, len: usize) -> Self {
        self.large_array_warning = len;
        self
    }
}

type CacheKey = (usize, u64);

/// Everything an `Instance` needs to interpret the file. Shared by every instance of the same file.
pub(crate) struct BlendData {
    pub(crate) data: Vec<u8>,
    pub(crate) header: Header,
    pub(crate) raw_blocks: Vec<BlockHeader>,
    pub(crate) schema: Schema,
    pub(crate) blocks: BlockTable,
    pub(crate) options: LoadOptions,
    cache: RefCell<HashMap<CacheKey, Weak<Instance>>>,
    prune_at: Cell<usize>,
}

const MIN_PRUNE_LEN: usize = 256;

impl BlendData {
    /// Reads a pointer stored at an absolute file offset, widened to 64 bits.
    pub(crate) fn pointer_at(&self, position: usize) -> u64 {
        let slice = self.data.get(position..).unwrap_or_default();
        match self.header.pointer_size {
            PointerSize::Bits32 => u64::from(parse_u32(slice, self.header.endianness)),
            PointerSize::Bits64 => parse_u64(slice, self.header.endianness),
        }
    }

    /// The block owning `address`, looking into off-heap tables too. Silent, used for consistency checks.
    pub(crate) fn owning_block(&self, address: u64) -> Option<&Block> {
        self.blocks.locate(address).or_else(|| {
            self.blocks
                .off_heap_tables()
                .find_map(|(_, table)| table.locate(address))
        })
    }
}

/// Returns the live instance of `type_index` at `address`, creating it if there is none. At most one
/// instance exists per (type, address) pair, so walking the same pointer twice yields the same `Rc`.
pub(crate) fn cached_instance(
    blend: &Rc<BlendData>,
    type_index: usize,
    address: u64,
    position: usize,
) -> Rc<Instance> {
    let key = (type_index, address);
    let mut cache = blend.cache.borrow_mut();

    if let Some(instance) = cache.get(&key).and_then(Weak::upgrade) {
        return instance;
    }

    if cache.len() >= blend.prune_at.get() {
        cache.retain(|_, instance| instance.strong_count() > 0);
        blend.prune_at.set((cache.len() * 2).max(MIN_PRUNE_LEN));
    }

    let instance = Rc::new(Instance::new(blend.clone(), type_index, address, position));
    cache.insert(key, Rc::downgrade(&instance));
    instance
}

/// An opened .blend file: the raw bytes, the block table and the schema used to interpret them.
#[derive(Clone)]
pub struct Blend {
    inner: Rc<BlendData>,
}

impl Blend {
    pub fn from_path<T: AsRef<Path>>(path: T) -> Result<Blend> {
        Blend::from_path_with_options(path, LoadOptions::default())
    }

    pub fn from_path_with_options<T: AsRef<Path>>(path: T, options: LoadOptions) -> Result<Blend> {
        use std::fs::File;

        let file = File::open(path).map_err(BlendParseError::IoError)?;
        Blend::from_data_with_options(file, options)
    }

    pub fn from_data<T: Read>(data: T) -> Result<Blend> {
        Blend::from_data_with_options(data, LoadOptions::default())
    }

    pub fn from_data_with_options<T: Read>(mut data: T, options: LoadOptions) -> Result<Blend> {
        let mut buffer = Vec::new();
        data.read_to_end(&mut buffer)
            .map_err(BlendParseError::IoError)?;

        Blend::from_bytes_with_options(buffer, options)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Blend> {
        Blend::from_bytes_with_options(data, LoadOptions::default())
    }

    pub fn from_bytes_with_options(data: Vec<u8>, options: LoadOptions) -> Result<Blend> {
        let raw = RawBlend::parse(&data)?;
        let schema = Schema::new(&raw.dna, raw.header.pointer_size);

        let mut off_heap_types = BTreeSet::new();
        for name in &options.off_heap_types {
            match schema
                .type_index(name)
                .and_then(|t| schema.type_template(t))
                .and_then(|t| t.struct_index)
            {
                Some(struct_index) => {
                    off_heap_types.insert(struct_index);
                }
                None => warn!("off-heap type '{}' is not a struct of this file", name),
            }
        }

        let header_len = raw.header.block_header_len();
        let blocks = BlockTable::new(
            raw.blocks
                .iter()
                .filter(|b| b.kind.is_addressable())
                .map(|b| Block::from_header(b, header_len)),
            &off_heap_types,
        )?
        .with_type_names(schema.struct_names());

        debug!(
            "indexed {} blocks ({} off-heap tables), pointer size {}",
            blocks.len(),
            blocks.off_heap_tables().count(),
            raw.header.pointer_size.bytes_num()
        );

        Ok(Blend {
            inner: Rc::new(BlendData {
                data,
                header: raw.header,
                raw_blocks: raw.blocks,
                schema,
                blocks,
                options,
                cache: RefCell::new(HashMap::new()),
                prune_at: Cell::new(MIN_PRUNE_LEN),
            }),
        })
    }

    pub fn header(&self) -> &Header {
        &self.inner.header
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn blocks(&self) -> &BlockTable {
        &self.inner.blocks
    }

    pub fn options(&self) -> &LoadOptions {
        &self.inner.options
    }

    /// The whole file.
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    /// Every block header in file order, including `REND`, `TEST` and `DNA1` blocks that are not addressable.
    pub fn raw_blocks(&self) -> &[BlockHeader] {
        &self.inner.raw_blocks
    }

    /// Reads the struct `type_name` at `address`.
    pub fn instance_at(&self, address: u64, type_name: &str) -> Option<Rc<Instance>> {
        let type_index = match self.inner.schema.type_index(type_name) {
            Some(type_index) => type_index,
            None => {
                warn!("unknown type '{}'", type_name);
                return None;
            }
        };

        let block = self.inner.blocks.find_block(address)?;
        Some(cached_instance(
            &self.inner,
            type_index,
            address,
            block.position_of(address),
        ))
    }

    /// Reads whatever struct the block containing `address` says it holds.
    pub fn root(&self, address: u64) -> Option<Rc<Instance>> {
        let block = self.inner.blocks.find_block(address)?;
        self.block_instance(block, address)
    }

    fn block_instance(&self, block: &Block, address: u64) -> Option<Rc<Instance>> {
        let type_index = self.inner.schema.struct_type(block.struct_type_id)?;
        Some(cached_instance(
            &self.inner,
            type_index,
            address,
            block.position_of(address),
        ))
    }

    /// Root blocks have a code that tells us their type, "OB" for object, "ME" for mesh, "MA" for material, etc.
    /// You can use this method to filter for a single type of block. Instances come in file order.
    pub fn instances_with_code(&self, code: [u8; 2]) -> Vec<Rc<Instance>> {
        self.inner
            .blocks
            .iter_by_position()
            .filter(|b| b.root_code() == Some(code))
            .filter_map(|b| self.block_instance(b, b.address))
            .collect()
    }

    /// Every root block (the ones with a two letter code), in file order.
    pub fn root_instances(&self) -> Vec<Rc<Instance>> {
        self.inner
            .blocks
            .iter_by_position()
            .filter(|b| b.root_code().is_some())
            .filter_map(|b| self.block_instance(b, b.address))
            .collect()
    }

    /// The table of blocks holding the off-heap struct `type_name`.
    pub fn off_heap_blocks(&self, type_name: &str) -> Option<&BlockTable> {
        let struct_index = self
            .inner
            .schema
            .type_index(type_name)
            .and_then(|t| self.inner.schema.type_template(t))
            .and_then(|t| t.struct_index)?;
        self.inner.blocks.off_heap(struct_index)
    }

    /// Number of instances currently alive in the cache.
    pub fn live_instances(&self) -> usize {
        self.inner
            .cache
            .borrow()
            .values()
            .filter(|i| i.strong_count() > 0)
            .count()
    }
}
