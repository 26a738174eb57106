#![allow(dead_code)]

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::{cell::RefCell, collections::HashMap, sync::Once};

/// Where a field lives inside a struct built by `BlendBuilder`.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    pub offset: usize,
    pub len: usize,
}

/// Writes .blend files byte by byte: header, blocks, a `DNA1` block describing the structs and `ENDB`.
pub struct BlendBuilder {
    pointer_size: usize,
    big_endian: bool,
    names: Vec<String>,
    types: Vec<(String, usize)>,
    structs: Vec<(usize, Vec<(usize, usize)>)>,
    layouts: HashMap<String, HashMap<String, FieldLayout>>,
    blocks: Vec<([u8; 4], u64, usize, Vec<u8>)>,
}

fn base_name(decorated: &str) -> &str {
    let name = decorated.trim_start_matches("(*").trim_start_matches('*');
    let end = name.find(|c: char| c == '[' || c == ')').unwrap_or(name.len());
    &name[..end]
}

fn array_len(decorated: &str) -> usize {
    decorated
        .split('[')
        .skip(1)
        .map(|d| d.trim_end_matches(']').parse::<usize>().expect("array dimension"))
        .product()
}

impl BlendBuilder {
    pub fn new(pointer_size: usize, big_endian: bool) -> Self {
        let mut builder = BlendBuilder {
            pointer_size,
            big_endian,
            names: Vec::new(),
            types: Vec::new(),
            structs: Vec::new(),
            layouts: HashMap::new(),
            blocks: Vec::new(),
        };

        for (name, size) in &[
            ("char", 1),
            ("uchar", 1),
            ("short", 2),
            ("int", 4),
            ("float", 4),
            ("double", 8),
            ("void", 0),
        ] {
            builder.types.push((name.to_string(), *size));
        }
        builder
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn type_index(&self, name: &str) -> usize {
        self.types
            .iter()
            .position(|(n, _)| n == name)
            .unwrap_or_else(|| panic!("unknown type {}", name))
    }

    fn name_index(&mut self, name: &str) -> usize {
        match self.names.iter().position(|n| n == name) {
            Some(index) => index,
            None => {
                self.names.push(name.to_string());
                self.names.len() - 1
            }
        }
    }

    /// Declares a struct out of `(type, decorated name)` pairs. Its size is the sum of the fields.
    pub fn structure(&mut self, name: &str, fields: &[(&str, &str)]) -> &mut Self {
        // Registered first so fields can point to the struct itself.
        self.types.push((name.to_string(), 0));
        let struct_type = self.types.len() - 1;

        let mut layout = HashMap::new();
        let mut dna_fields = Vec::new();
        let mut offset = 0;

        for (type_name, decorated) in fields {
            let type_index = self.type_index(type_name);
            let element = if decorated.starts_with('*') || decorated.starts_with("(*") {
                self.pointer_size
            } else {
                self.types[type_index].1
            };
            let len = element * array_len(decorated);

            layout.insert(base_name(decorated).to_string(), FieldLayout { offset, len });
            dna_fields.push((type_index, self.name_index(decorated)));
            offset += len;
        }

        self.types[struct_type].1 = offset;
        self.structs.push((struct_type, dna_fields));
        self.layouts.insert(name.to_string(), layout);
        self
    }

    pub fn struct_index(&self, name: &str) -> usize {
        let type_index = self.type_index(name);
        self.structs
            .iter()
            .position(|(t, _)| *t == type_index)
            .unwrap_or_else(|| panic!("{} is not a struct", name))
    }

    pub fn size_of(&self, name: &str) -> usize {
        self.types[self.type_index(name)].1
    }

    pub fn field(&self, struct_name: &str, field: &str) -> FieldLayout {
        self.layouts[struct_name][field].clone()
    }

    /// A zeroed payload for one `struct_name`, filled through the returned writer.
    pub fn payload(&self, struct_name: &str) -> Payload {
        Payload {
            layout: self.layouts[struct_name].clone(),
            pointer_size: self.pointer_size,
            big_endian: self.big_endian,
            bytes: vec![0; self.size_of(struct_name)],
        }
    }

    /// The payload of a `DATA` block holding nothing but pointers.
    pub fn pointers(&self, addresses: &[u64]) -> Vec<u8> {
        let mut out = Vec::new();
        for address in addresses {
            self.push_pointer(&mut out, *address);
        }
        out
    }

    pub fn block(&mut self, code: &[u8], address: u64, struct_name: &str, payload: Vec<u8>) -> &mut Self {
        let mut full_code = [0; 4];
        full_code[..code.len()].copy_from_slice(code);
        let sdna_index = self.struct_index(struct_name);
        self.blocks.push((full_code, address, sdna_index, payload));
        self
    }

    fn push_u16(&self, out: &mut Vec<u8>, v: u16) {
        if self.big_endian {
            out.extend_from_slice(&v.to_be_bytes());
        } else {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn push_u32(&self, out: &mut Vec<u8>, v: u32) {
        if self.big_endian {
            out.extend_from_slice(&v.to_be_bytes());
        } else {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn push_pointer(&self, out: &mut Vec<u8>, v: u64) {
        match (self.pointer_size, self.big_endian) {
            (4, true) => out.extend_from_slice(&(v as u32).to_be_bytes()),
            (4, false) => out.extend_from_slice(&(v as u32).to_le_bytes()),
            (_, true) => out.extend_from_slice(&v.to_be_bytes()),
            (_, false) => out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn push_strings(&self, out: &mut Vec<u8>, strings: &[&str]) {
        self.push_u32(out, strings.len() as u32);
        let start = out.len();
        for s in strings {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        while (out.len() - start) % 4 != 0 {
            out.push(0);
        }
    }

    fn sdna(&self) -> Vec<u8> {
        let mut out = b"SDNA".to_vec();

        out.extend_from_slice(b"NAME");
        let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        self.push_strings(&mut out, &names);

        out.extend_from_slice(b"TYPE");
        let types: Vec<&str> = self.types.iter().map(|(n, _)| n.as_str()).collect();
        self.push_strings(&mut out, &types);

        out.extend_from_slice(b"TLEN");
        for (_, size) in &self.types {
            self.push_u16(&mut out, *size as u16);
        }
        if self.types.len() % 2 == 1 {
            out.extend_from_slice(&[0, 0]);
        }

        out.extend_from_slice(b"STRC");
        self.push_u32(&mut out, self.structs.len() as u32);
        for (type_index, fields) in &self.structs {
            self.push_u16(&mut out, *type_index as u16);
            self.push_u16(&mut out, fields.len() as u16);
            for (field_type, name) in fields {
                self.push_u16(&mut out, *field_type as u16);
                self.push_u16(&mut out, *name as u16);
            }
        }

        out
    }

    fn push_block(&self, out: &mut Vec<u8>, code: &[u8; 4], address: u64, sdna_index: usize, payload: &[u8]) {
        out.extend_from_slice(code);
        self.push_u32(out, payload.len() as u32);
        self.push_pointer(out, address);
        self.push_u32(out, sdna_index as u32);
        self.push_u32(out, 1);
        out.extend_from_slice(payload);
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = b"BLENDER".to_vec();
        out.push(if self.pointer_size == 4 { b'_' } else { b'-' });
        out.push(if self.big_endian { b'V' } else { b'v' });
        out.extend_from_slice(b"300");

        for (code, address, sdna_index, payload) in &self.blocks {
            self.push_block(&mut out, code, *address, *sdna_index, payload);
        }
        self.push_block(&mut out, b"DNA1", 0, 0, &self.sdna());
        self.push_block(&mut out, b"ENDB", 0, 0, &[]);

        out
    }
}

/// The bytes of one struct, written field by field.
pub struct Payload {
    layout: HashMap<String, FieldLayout>,
    pointer_size: usize,
    big_endian: bool,
    bytes: Vec<u8>,
}

impl Payload {
    fn write(&mut self, field: &str, index: usize, value: &[u8]) -> &mut Self {
        let layout = &self.layout[field];
        let start = layout.offset + index * value.len();
        assert!(start + value.len() <= layout.offset + layout.len, "{} overflows", field);
        self.bytes[start..start + value.len()].copy_from_slice(value);
        self
    }

    pub fn pointer(&mut self, field: &str, address: u64) -> &mut Self {
        self.pointer_at(field, 0, address)
    }

    pub fn pointer_at(&mut self, field: &str, index: usize, address: u64) -> &mut Self {
        let bytes = match (self.pointer_size, self.big_endian) {
            (4, true) => (address as u32).to_be_bytes().to_vec(),
            (4, false) => (address as u32).to_le_bytes().to_vec(),
            (_, true) => address.to_be_bytes().to_vec(),
            (_, false) => address.to_le_bytes().to_vec(),
        };
        self.write(field, index, &bytes)
    }

    pub fn int(&mut self, field: &str, value: i32) -> &mut Self {
        let bytes = if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        self.write(field, 0, &bytes)
    }

    pub fn short(&mut self, field: &str, value: i16) -> &mut Self {
        let bytes = if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        self.write(field, 0, &bytes)
    }

    pub fn floats(&mut self, field: &str, values: &[f32]) -> &mut Self {
        for (i, value) in values.iter().enumerate() {
            let bytes = if self.big_endian {
                value.to_be_bytes()
            } else {
                value.to_le_bytes()
            };
            self.write(field, i, &bytes);
        }
        self
    }

    pub fn string(&mut self, field: &str, value: &str) -> &mut Self {
        self.write(field, 0, value.as_bytes())
    }

    /// Copies a whole embedded struct.
    pub fn embed(&mut self, field: &str, payload: &Payload) -> &mut Self {
        self.write(field, 0, &payload.bytes)
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

/// Struct layouts shared by most tests, close to the ones Blender uses.
pub fn schema(pointer_size: usize, big_endian: bool) -> BlendBuilder {
    let mut builder = BlendBuilder::new(pointer_size, big_endian);
    builder
        .structure("Link", &[("Link", "*next"), ("Link", "*prev")])
        .structure("ListBase", &[("void", "*first"), ("void", "*last")])
        .structure("ID", &[("void", "*next"), ("void", "*prev"), ("char", "name[24]")])
        .structure(
            "Material",
            &[("ID", "id"), ("float", "r"), ("float", "g"), ("float", "b"), ("int", "flag")],
        )
        .structure(
            "MVert",
            &[("float", "co[3]"), ("short", "flag"), ("short", "_pad")],
        )
        .structure(
            "Mesh",
            &[
                ("ID", "id"),
                ("MVert", "*mvert"),
                ("char", "*uv_name"),
                ("int", "totvert"),
                ("int", "_pad"),
            ],
        )
        .structure(
            "ModifierData",
            &[
                ("ModifierData", "*next"),
                ("ModifierData", "*prev"),
                ("char", "name[16]"),
                ("int", "type"),
                ("int", "_pad"),
            ],
        )
        .structure(
            "Object",
            &[
                ("ID", "id"),
                ("void", "*data"),
                ("Material", "**mat"),
                ("int", "totcol"),
                ("float", "loc[3]"),
                ("float", "obmat[4][4]"),
                ("Material", "*mtex[2]"),
                ("ListBase", "modifiers"),
                ("void", "(*callback)()"),
                ("char", "*path"),
            ],
        )
        .structure(
            "Bone",
            &[("char", "name[16]"), ("int", "flag"), ("float", "matrix[16]")],
        )
        .structure(
            "PackedFile",
            &[("int", "size"), ("int", "seek"), ("void", "*data")],
        );
    builder
}

pub const OBJECT: u64 = 0x1000;
pub const MESH: u64 = 0x2000;
pub const MATERIALS: u64 = 0x3000;
pub const MATERIAL: u64 = 0x4000;
pub const MODIFIER_A: u64 = 0x5000;
pub const MODIFIER_B: u64 = 0x5100;
pub const PATH: u64 = 0x6000;
pub const UV_NAME: u64 = 0x6100;
pub const VERTICES: u64 = 0x7000;
pub const PACKED: u64 = 0x8000;
pub const BONE: u64 = 0x9000;
pub const DANGLING: u64 = 0xdead_0000;

/// A small scene: one object with a mesh, materials, modifiers and a texture path.
pub fn scene(pointer_size: usize, big_endian: bool) -> Vec<u8> {
    let mut builder = schema(pointer_size, big_endian);

    let mut id = builder.payload("ID");
    id.string("name", "OBCube");
    let mut modifiers = builder.payload("ListBase");
    modifiers
        .pointer("first", MODIFIER_A)
        .pointer("last", MODIFIER_B);
    let mut object = builder.payload("Object");
    object
        .embed("id", &id)
        .pointer("data", MESH)
        .pointer("mat", MATERIALS)
        .int("totcol", 6)
        .floats("loc", &[1.0, 2.0, 3.0])
        .floats("obmat", &(0..16).map(|i| i as f32).collect::<Vec<_>>())
        .pointer_at("mtex", 0, MATERIAL)
        .pointer_at("mtex", 1, 0)
        .embed("modifiers", &modifiers)
        .pointer("path", PATH);

    let mut id = builder.payload("ID");
    id.string("name", "MECube");
    let mut mesh = builder.payload("Mesh");
    mesh.embed("id", &id)
        .pointer("mvert", VERTICES)
        .pointer("uv_name", UV_NAME)
        .int("totvert", 3);

    let mut vertices = Vec::new();
    for i in 0..3 {
        let mut vertex = builder.payload("MVert");
        vertex
            .floats("co", &[i as f32, i as f32 * 10.0, -1.0])
            .short("flag", i as i16);
        vertices.extend(vertex.bytes());
    }
    // Trailing bytes that don't make a whole vertex.
    vertices.extend_from_slice(&[0xff; 10]);

    let mut id = builder.payload("ID");
    id.string("name", "MARed");
    let mut material = builder.payload("Material");
    material
        .embed("id", &id)
        .floats("r", &[1.0])
        .floats("g", &[0.5])
        .floats("b", &[0.25]);

    let mut modifier_a = builder.payload("ModifierData");
    modifier_a
        .pointer("next", MODIFIER_B)
        .string("name", "Subsurf")
        .int("type", 1);
    let mut modifier_b = builder.payload("ModifierData");
    // Points back to the first modifier, walks have to stop at `last` anyway.
    modifier_b
        .pointer("next", MODIFIER_A)
        .pointer("prev", MODIFIER_A)
        .string("name", "Mirror")
        .int("type", 5);

    let mut packed = builder.payload("PackedFile");
    packed.int("size", 128);

    let mut bone = builder.payload("Bone");
    bone.string("name", "Root")
        .floats("matrix", &(0..16).map(|i| i as f32 * 0.5).collect::<Vec<_>>());

    let materials = builder.pointers(&[MATERIAL, 0, DANGLING, MATERIAL, 0, 0]);

    builder
        .block(b"OB", OBJECT, "Object", object.bytes())
        .block(b"ME", MESH, "Mesh", mesh.bytes())
        .block(b"DATA", MATERIALS, "Link", materials)
        .block(b"MA", MATERIAL, "Material", material.bytes())
        .block(b"DATA", MODIFIER_A, "ModifierData", modifier_a.bytes())
        .block(b"DATA", MODIFIER_B, "ModifierData", modifier_b.bytes())
        .block(b"DATA", PATH, "Link", b"//textures/a.png\0junk".to_vec())
        .block(b"DATA", UV_NAME, "Link", b"UVMap".to_vec())
        .block(b"DATA", VERTICES, "MVert", vertices)
        .block(b"DATA", PACKED, "PackedFile", packed.bytes())
        .block(b"DATA", BONE, "Bone", bone.bytes());

    builder.build()
}

thread_local! {
    static RECORDS: RefCell<Vec<(Level, String)>> = RefCell::new(Vec::new());
}

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        RECORDS.with(|r| {
            r.borrow_mut()
                .push((record.level(), record.args().to_string()))
        });
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INIT: Once = Once::new();

/// Runs `f` and returns what it logged on this thread.
pub fn capture<R, F: FnOnce() -> R>(f: F) -> (R, Vec<(Level, String)>) {
    INIT.call_once(|| {
        log::set_logger(&LOGGER).expect("no other logger is installed in tests");
        log::set_max_level(LevelFilter::Trace);
    });

    RECORDS.with(|r| r.borrow_mut().clear());
    let result = f();
    let records = RECORDS.with(|r| r.replace(Vec::new()));
    (result, records)
}

pub fn warnings(records: &[(Level, String)]) -> Vec<&str> {
    records
        .iter()
        .filter(|(level, _)| *level == Level::Warn)
        .map(|(_, message)| message.as_str())
        .collect()
}
