//! `Instance`, a typed view over one struct stored somewhere in the file.

use crate::{
    error::{BlendError, Result},
    parsers::{
        field::{base_name, FieldInfo},
        primitive::{read_at, BlendPrimitive},
    },
    runtime::{
        block_table::Block,
        cached_instance,
        list::InstantList,
        schema::{EffectiveType, FieldTemplate, TypeTemplate},
        BlendData,
    },
};
use log::{debug, warn};
use std::{
    cell::Cell,
    collections::HashSet,
    fmt,
    rc::Rc,
};

/// Field names that newer DNA versions dropped and that old readers still ask for. Missing them is expected.
const SILENT_MISSING_FIELDS: &[&str] = &["no[3]"];

/// Represents a struct inside the blend file. An `Instance` can be a camera, a mesh, a material, or anything
/// else Blender uses internally. It is only a view: a type from the schema plus the position of the struct
/// in the file buffer. Nothing is read until a field is accessed.
///
/// Instances reached through `Blend` or through other instances are cached by type and address, so two
/// walks to the same struct return the same `Rc`.
pub struct Instance {
    blend: Rc<BlendData>,
    type_index: usize,
    position: Cell<usize>,
    address: Cell<u64>,
}

impl Instance {
    pub(crate) fn new(blend: Rc<BlendData>, type_index: usize, address: u64, position: usize) -> Self {
        Instance {
            blend,
            type_index,
            position: Cell::new(position),
            address: Cell::new(address),
        }
    }

    /// Moves the view to another struct. Only `InstantList` does this, on its own private instance.
    pub(crate) fn rebind(&self, address: u64, position: usize) {
        self.address.set(address);
        self.position.set(position);
    }

    pub fn template(&self) -> &TypeTemplate {
        &self.blend.schema.types()[self.type_index]
    }

    pub fn type_name(&self) -> &str {
        &self.template().name
    }

    pub fn type_index(&self) -> usize {
        self.type_index
    }

    /// The address this struct had in Blender's memory.
    pub fn address(&self) -> u64 {
        self.address.get()
    }

    /// Offset of this struct inside the file.
    pub fn position(&self) -> usize {
        self.position.get()
    }

    /// Size in bytes of the struct type.
    pub fn size(&self) -> usize {
        self.template().size
    }

    /// Fields in DNA order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldTemplate> {
        self.template().fields.values()
    }

    /// The block this struct lives in.
    pub fn block(&self) -> Option<&Block> {
        self.blend.owning_block(self.address())
    }

    /// Looks a field up by name. `co[3]` finds a field registered as `co`. Unknown names log a warning.
    pub fn field(&self, name: &str) -> Option<&FieldTemplate> {
        let fields = &self.template().fields;

        if let Some(field) = fields.get(name) {
            return Some(field);
        }
        if name.contains('[') {
            if let Some(field) = fields.get(base_name(name)) {
                return Some(field);
            }
        }

        if !SILENT_MISSING_FIELDS.contains(&name) {
            warn!("{} has no field '{}'", self.type_name(), name);
        }
        None
    }

    /// Offset of a field from the start of the struct, `None` if the struct has no such field.
    pub fn get_offset(&self, name: &str) -> Option<usize> {
        self.field(name).map(|f| f.offset)
    }

    fn read<U: BlendPrimitive>(&self, offset: usize) -> U {
        read_at(
            &self.blend.data,
            self.position() + offset,
            self.blend.header.endianness,
        )
    }

    pub fn byte(&self, offset: usize) -> i8 {
        self.read(offset)
    }

    pub fn ubyte(&self, offset: usize) -> u8 {
        self.read(offset)
    }

    pub fn short(&self, offset: usize) -> i16 {
        self.read(offset)
    }

    pub fn ushort(&self, offset: usize) -> u16 {
        self.read(offset)
    }

    pub fn int(&self, offset: usize) -> i32 {
        self.read(offset)
    }

    pub fn long(&self, offset: usize) -> i64 {
        self.read(offset)
    }

    pub fn ulong(&self, offset: usize) -> u64 {
        self.read(offset)
    }

    pub fn float(&self, offset: usize) -> f32 {
        self.read(offset)
    }

    pub fn double(&self, offset: usize) -> f64 {
        self.read(offset)
    }

    /// Reads a pointer of the file's pointer size, widened to 64 bits.
    pub fn pointer(&self, offset: usize) -> u64 {
        self.blend.pointer_at(self.position() + offset)
    }

    /// Bytes of an embedded string: at most `limit` bytes, cut at the first NUL.
    pub fn string(&self, offset: usize, limit: usize) -> &[u8] {
        let data = &self.blend.data;
        let start = (self.position() + offset).min(data.len());
        let end = start.saturating_add(limit).min(data.len());
        until_nul(&data[start..end])
    }

    /// Bytes of the NUL terminated string a `char *` points to. Strings missing their terminator are
    /// returned up to the end of their block.
    pub fn char_pointer(&self, offset: usize) -> Option<&[u8]> {
        let address = self.pointer(offset);
        let block = self.blend.blocks.find_block(address)?;

        let data = &self.blend.data;
        let start = block.position_of(address).min(data.len());
        let end = start
            .saturating_add(block.remaining(address) as usize)
            .min(data.len());
        Some(until_nul(&data[start..end]))
    }

    /// The struct embedded in this one as `field`. Embedded structs can't leave the block of their parent;
    /// if they do the resolver is broken and an error is returned.
    fn inside_field(&self, field: &FieldTemplate) -> Result<Rc<Instance>> {
        let address = self.address().saturating_add(field.offset as u64);
        let cross_block = || BlendError::CrossBlockField {
            type_name: self.type_name().to_string(),
            field: field.name.clone(),
            address,
        };

        let parent = self.blend.owning_block(self.address()).ok_or_else(cross_block)?;
        let block = self.blend.owning_block(address).ok_or_else(cross_block)?;
        if parent.address != block.address {
            return Err(cross_block());
        }

        let EffectiveType { type_index, .. } = self
            .blend
            .schema
            .effective_type(field.type_index, block.struct_type_id);

        Ok(cached_instance(
            &self.blend,
            type_index,
            address,
            self.position() + field.offset,
        ))
    }

    /// An embedded struct, like `id` in `Object`.
    pub fn inside(&self, name: &str) -> Result<Option<Rc<Instance>>> {
        match self.field(name) {
            Some(field) => self.inside_field(field).map(Some),
            None => Ok(None),
        }
    }

    /// The block `address` points into and the type to read it as.
    fn target(&self, declared: usize, address: u64) -> Option<(&Block, EffectiveType)> {
        let block = self.blend.blocks.find_block(address)?;
        let ty = self
            .blend
            .schema
            .effective_type(declared, block.struct_type_id);

        if self.blend.schema.type_template(ty.type_index).is_none() {
            debug!("no type {} for the block at {:#x}", ty.type_index, block.address);
            return None;
        }

        Some((block, ty))
    }

    fn deref(&self, declared: usize, address: u64) -> Option<Rc<Instance>> {
        let (block, ty) = self.target(declared, address)?;
        Some(cached_instance(
            &self.blend,
            ty.type_index,
            address,
            block.position_of(address),
        ))
    }

    /// The struct a field refers to. Pointer fields are followed, `None` for null and dangling pointers;
    /// any other field is read as an embedded struct.
    pub fn get_pointer(&self, name: &str) -> Result<Option<Rc<Instance>>> {
        let field = match self.field(name) {
            Some(field) => field,
            None => return Ok(None),
        };

        match field.info {
            FieldInfo::FnPointer => Ok(None),
            _ if field.is_pointer() => Ok(self.deref(field.type_index, self.pointer(field.offset))),
            _ => self.inside_field(field).map(Some),
        }
    }

    /// Every struct a pointer field refers to: as many whole elements of the pointed type as fit in the
    /// rest of the target block. Non-pointer fields give a single embedded struct, function pointers nothing.
    pub fn get_struct_array(&self, name: &str) -> Result<Vec<Rc<Instance>>> {
        let field = match self.field(name) {
            Some(field) => field,
            None => return Ok(Vec::new()),
        };

        match field.info {
            FieldInfo::FnPointer => return Ok(Vec::new()),
            _ if !field.is_pointer() => return self.inside_field(field).map(|i| vec![i]),
            _ => {}
        }

        let address = self.pointer(field.offset);
        let (block, ty) = match self.target(field.type_index, address) {
            Some(target) => target,
            None => return Ok(Vec::new()),
        };

        let count = element_count(block, address, ty.element_size);
        if count > self.blend.options.large_array_warning {
            warn!(
                "{}.{} materializes {} instances, consider get_instant_list",
                self.type_name(),
                name,
                count
            );
        }

        let position = block.position_of(address);
        Ok((0..count)
            .map(|i| {
                let delta = i * ty.element_size;
                cached_instance(
                    &self.blend,
                    ty.type_index,
                    address + delta as u64,
                    position + delta,
                )
            })
            .collect())
    }

    /// Like `get_struct_array`, capped at `max_size` elements and without an instance per element: the
    /// returned list moves a single instance from element to element.
    pub fn get_instant_list(&self, name: &str, max_size: usize) -> Result<Option<InstantList>> {
        let field = match self.field(name) {
            Some(field) => field,
            None => return Ok(None),
        };

        if let FieldInfo::FnPointer = field.info {
            return Ok(None);
        }

        if !field.is_pointer() {
            let embedded = self.inside_field(field)?;
            let cursor = Instance::new(
                self.blend.clone(),
                embedded.type_index,
                embedded.address(),
                embedded.position(),
            );
            return Ok(Some(InstantList::new(cursor, embedded.size(), max_size.min(1))));
        }

        let address = self.pointer(field.offset);
        let (block, ty) = match self.target(field.type_index, address) {
            Some(target) => target,
            None => return Ok(None),
        };

        let count = element_count(block, address, ty.element_size).min(max_size);
        let cursor = Instance::new(
            self.blend.clone(),
            ty.type_index,
            address,
            block.position_of(address),
        );
        Ok(Some(InstantList::new(cursor, ty.element_size, count)))
    }

    /// An array of pointers, like `**mat` or `*mtex[18]`. The outer `None` means the array itself couldn't be
    /// found, inner `None`s are null or dangling elements.
    pub fn get_pointer_array(&self, name: &str) -> Option<Vec<Option<Rc<Instance>>>> {
        let field = self.field(name)?;
        let pointer_size = self.blend.header.pointer_size.bytes_num();

        let (position, slots) = match field.info {
            FieldInfo::PointerArray { len, .. } => (self.position() + field.offset, len),
            FieldInfo::Pointer { .. } => {
                let address = self.pointer(field.offset);
                let block = self.blend.blocks.find_block(address)?;
                (
                    block.position_of(address),
                    block.remaining(address) as usize / pointer_size,
                )
            }
            _ => {
                warn!(
                    "{}.{} is not an array of pointers",
                    self.type_name(),
                    field.decorated_name
                );
                return None;
            }
        };

        Some(
            (0..slots)
                .map(|i| {
                    let address = self.blend.pointer_at(position + i * pointer_size);
                    self.deref(field.type_index, address)
                })
                .collect(),
        )
    }

    /// Walks a `ListBase` field from `first` following `next` pointers until `last` or a null pointer.
    pub fn get_list(&self, name: &str) -> Result<Vec<Rc<Instance>>> {
        let list_base = match self.inside(name)? {
            Some(list_base) => list_base,
            None => return Ok(Vec::new()),
        };

        let last = list_base
            .get_offset("last")
            .map_or(0, |offset| list_base.pointer(offset));
        let mut cur = list_base.get_pointer("first")?;

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        while let Some(item) = cur {
            if !seen.insert(item.address()) {
                warn!(
                    "{}.{} loops back to {:#x}",
                    self.type_name(),
                    name,
                    item.address()
                );
                break;
            }

            // Linked structs start with their `next` pointer even when the DNA doesn't call it that.
            let next_offset = item.template().fields.get("next").map_or(0, |f| f.offset);
            let next = item.pointer(next_offset);
            let done = item.address() == last;

            cur = if done {
                None
            } else {
                item.deref(item.type_index, next)
            };
            items.push(item);
        }

        Ok(items)
    }

    fn get_value<U: BlendPrimitive>(&self, name: &str) -> Option<U> {
        let field = self.field(name)?;

        if field.is_pointer() || field.element_len() != Some(U::SIZE) {
            warn!(
                "{}.{} ({}) can't be read as {}",
                self.type_name(),
                field.decorated_name,
                field.type_name,
                U::blender_name()
            );
            return None;
        }

        Some(self.read(field.offset))
    }

    pub fn get_u8(&self, name: &str) -> Option<u8> {
        self.get_value(name)
    }

    pub fn get_i8(&self, name: &str) -> Option<i8> {
        self.get_value(name)
    }

    pub fn get_u16(&self, name: &str) -> Option<u16> {
        self.get_value(name)
    }

    pub fn get_i16(&self, name: &str) -> Option<i16> {
        self.get_value(name)
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        self.get_value(name)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get_value(name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get_value(name)
    }

    pub fn get_f32(&self, name: &str) -> Option<f32> {
        self.get_value(name)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get_value(name)
    }

    /// Embedded primitive arrays are read in place. Pointers to primitives read every whole value left in the
    /// target block.
    fn get_value_vec<U: BlendPrimitive>(&self, name: &str) -> Option<Vec<U>> {
        let field = self.field(name)?;
        let endianness = self.blend.header.endianness;

        let (position, len) = match field.info {
            FieldInfo::Pointer {
                indirection_count: 1,
            } => {
                let address = self.pointer(field.offset);
                let block = self.blend.blocks.find_block(address)?;
                (
                    block.position_of(address),
                    block.remaining(address) as usize / U::SIZE,
                )
            }
            FieldInfo::Value | FieldInfo::ValueArray { .. }
                if field.element_len() == Some(U::SIZE) =>
            {
                (self.position() + field.offset, field.info.element_count())
            }
            _ => {
                warn!(
                    "{}.{} ({}) is not an array of {}",
                    self.type_name(),
                    field.decorated_name,
                    field.type_name,
                    U::blender_name()
                );
                return None;
            }
        };

        Some(
            (0..len)
                .map(|i| read_at(&self.blend.data, position + i * U::SIZE, endianness))
                .collect(),
        )
    }

    pub fn get_u8_vec(&self, name: &str) -> Option<Vec<u8>> {
        self.get_value_vec(name)
    }

    pub fn get_i16_vec(&self, name: &str) -> Option<Vec<i16>> {
        self.get_value_vec(name)
    }

    pub fn get_i32_vec(&self, name: &str) -> Option<Vec<i32>> {
        self.get_value_vec(name)
    }

    pub fn get_f32_vec(&self, name: &str) -> Option<Vec<f32>> {
        self.get_value_vec(name)
    }

    pub fn get_f64_vec(&self, name: &str) -> Option<Vec<f64>> {
        self.get_value_vec(name)
    }

    /// A 4x4 float matrix such as `obmat`, in the row-major order it is stored in. No axis conversion is done.
    pub fn get_matrix4(&self, name: &str) -> Option<[[f32; 4]; 4]> {
        let values = self.get_f32_vec(name)?;
        if values.len() < 16 {
            warn!("{}.{} has only {} floats", self.type_name(), name, values.len());
            return None;
        }

        let mut matrix = [[0.0; 4]; 4];
        for (i, row) in matrix.iter_mut().enumerate() {
            row.copy_from_slice(&values[i * 4..i * 4 + 4]);
        }
        Some(matrix)
    }

    /// An embedded `char` array read as a string.
    pub fn get_string(&self, name: &str) -> Option<String> {
        let field = self.field(name)?;
        Some(String::from_utf8_lossy(self.string(field.offset, field.len)).into_owned())
    }

    /// The string behind a `char *` field.
    pub fn get_char_pointer(&self, name: &str) -> Option<String> {
        let field = self.field(name)?;
        self.char_pointer(field.offset)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

/// How many whole elements of `element_size` bytes fit between `address` and the end of `block`.
fn element_count(block: &Block, address: u64, element_size: usize) -> usize {
    if element_size == 0 {
        return 0;
    }
    block.remaining(address) as usize / element_size
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name())
            .field("address", &format_args!("{:#x}", self.address()))
            .field("position", &self.position())
            .finish()
    }
}
