//! Struct layouts computed from the DNA for the pointer size of a specific file.

use crate::parsers::{
    dna::{Dna, DnaStruct},
    field::{parse_field, FieldInfo},
    PointerSize,
};
use linked_hash_map::LinkedHashMap;
use log::warn;
use std::collections::HashMap;

/// Represents a field inside a struct. The data `FieldTemplate` keeps is used to interpret the raw bytes of the block.
#[derive(Debug, Clone)]
pub struct FieldTemplate {
    /// The field name without pointer or array decorations.
    pub name: String,
    /// The name as stored in the DNA, like `*next` or `mat[4][4]`.
    pub decorated_name: String,
    pub info: FieldInfo,
    /// The index of this field's declared type inside `Dna::types`.
    pub type_index: usize,
    /// The declared type name. Used for pretty printing and some sanity checks.
    pub type_name: String,
    /// Offset of the field from the start of its struct.
    pub offset: usize,
    /// The length in bytes of the field.
    pub len: usize,
}

impl FieldTemplate {
    /// Pointer fields are the ones whose decorated name starts with `*`.
    pub fn is_pointer(&self) -> bool {
        self.decorated_name.starts_with('*')
    }

    /// Size of one element of the field, `None` for zero-length arrays like `pad[0]`.
    pub fn element_len(&self) -> Option<usize> {
        self.len.checked_div(self.info.element_count())
    }
}

/// A DNA type: either a primitive (`float`, `int`, ...) or a struct with fields.
#[derive(Debug, Clone)]
pub struct TypeTemplate {
    pub name: String,
    /// Size in bytes as recorded in the DNA.
    pub size: usize,
    /// Index of the struct inside `Dna::structs`, `None` for primitives.
    pub struct_index: Option<usize>,
    /// We use a LinkedHashMap here because we want to preserve the DNA order.
    pub fields: LinkedHashMap<String, FieldTemplate>,
}

impl TypeTemplate {
    /// A type is concrete when it has a size and isn't `void`. Anything else has to be read as whatever the
    /// block holding it says it is.
    pub fn is_concrete(&self) -> bool {
        self.size > 0 && self.name != "void"
    }

    pub fn is_struct(&self) -> bool {
        self.struct_index.is_some()
    }
}

/// The type used to read a value and the stride between consecutive values of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveType {
    pub type_index: usize,
    pub element_size: usize,
}

/// Every type of the DNA with field offsets resolved for one pointer size.
#[derive(Debug, Clone)]
pub struct Schema {
    types: Vec<TypeTemplate>,
    /// `Dna::structs` index to `types` index.
    struct_types: Vec<usize>,
    by_name: HashMap<String, usize>,
    pointer_size: PointerSize,
}

impl Schema {
    pub fn new(dna: &Dna, pointer_size: PointerSize) -> Self {
        let mut types: Vec<TypeTemplate> = dna
            .types
            .iter()
            .map(|t| TypeTemplate {
                name: t.name.clone(),
                size: t.bytes_len,
                struct_index: None,
                fields: LinkedHashMap::new(),
            })
            .collect();

        for (struct_index, dna_struct) in dna.structs.iter().enumerate() {
            if let Some(template) = types.get_mut(dna_struct.type_index) {
                template.struct_index = Some(struct_index);
            }
        }

        for dna_struct in &dna.structs {
            let fields = generate_fields(dna_struct, dna, pointer_size);
            if let Some(template) = types.get_mut(dna_struct.type_index) {
                template.fields = fields;
            }
        }

        let by_name = types
            .iter()
            .enumerate()
            .map(|(index, t)| (t.name.clone(), index))
            .collect();

        Schema {
            types,
            struct_types: dna.structs.iter().map(|s| s.type_index).collect(),
            by_name,
            pointer_size,
        }
    }

    pub fn pointer_size(&self) -> PointerSize {
        self.pointer_size
    }

    pub fn types(&self) -> &[TypeTemplate] {
        &self.types
    }

    pub fn type_template(&self, type_index: usize) -> Option<&TypeTemplate> {
        self.types.get(type_index)
    }

    pub fn type_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// The type index of a struct, given its index in `Dna::structs` (what blocks record).
    pub fn struct_type(&self, struct_index: usize) -> Option<usize> {
        self.struct_types.get(struct_index).copied()
    }

    /// The struct stored in a block with the given `struct_type_id`.
    pub fn struct_template(&self, struct_index: usize) -> Option<&TypeTemplate> {
        self.struct_type(struct_index)
            .and_then(|t| self.type_template(t))
    }

    /// Struct names indexed by their `Dna::structs` index.
    pub fn struct_names(&self) -> Vec<String> {
        self.struct_types
            .iter()
            .map(|&t| self.types.get(t).map_or_else(String::new, |ty| ty.name.clone()))
            .collect()
    }

    /// Decides how a value reached through a field declared as `declared` is read, given the struct type
    /// recorded on the block the value lives in. A concrete declared type always wins; `void` and zero-sized
    /// declarations fall back to the block's own type, which is how common-prefix "base structs" are read
    /// as what they really are. If the block's type isn't usable either, the declared type is kept with
    /// the pointer size as stride.
    pub fn effective_type(&self, declared: usize, recorded_struct: usize) -> EffectiveType {
        if let Some(template) = self.type_template(declared).filter(|t| t.is_concrete()) {
            return EffectiveType {
                type_index: declared,
                element_size: template.size,
            };
        }

        let recorded = self
            .struct_type(recorded_struct)
            .filter(|&t| self.types.get(t).map_or(false, TypeTemplate::is_concrete));

        match recorded {
            Some(type_index) => EffectiveType {
                type_index,
                element_size: self.types[type_index].size,
            },
            None => EffectiveType {
                type_index: declared,
                element_size: self.pointer_size.bytes_num(),
            },
        }
    }
}

fn generate_fields(
    dna_struct: &DnaStruct,
    dna: &Dna,
    pointer_size: PointerSize,
) -> LinkedHashMap<String, FieldTemplate> {
    let mut fields = LinkedHashMap::new();
    let mut offset = 0;

    let struct_name = dna
        .types
        .get(dna_struct.type_index)
        .map_or("?", |t| t.name.as_str());

    for field in &dna_struct.fields {
        let (type_name, type_len) = match dna.types.get(field.type_index) {
            Some(t) => (t.name.clone(), t.bytes_len),
            None => {
                warn!("{} has a field with unknown type {}", struct_name, field.type_index);
                (String::from("void"), 0)
            }
        };
        let decorated_name = dna
            .names
            .get(field.name_index)
            .map_or("", String::as_str);

        let (name, info) = match parse_field(decorated_name) {
            Ok((_, (name, info))) => (name.to_string(), info),
            Err(_) => {
                warn!("{}.{} could not be parsed", struct_name, decorated_name);
                (decorated_name.to_string(), FieldInfo::Value)
            }
        };

        let len = match &info {
            FieldInfo::Pointer { .. } | FieldInfo::FnPointer => pointer_size.bytes_num(),
            FieldInfo::PointerArray { len, .. } => pointer_size.bytes_num() * len,
            FieldInfo::ValueArray { len, .. } => type_len * len,
            FieldInfo::Value => type_len,
        };

        fields.insert(
            name.clone(),
            FieldTemplate {
                name,
                decorated_name: decorated_name.to_string(),
                info,
                type_index: field.type_index,
                type_name,
                offset,
                len,
            },
        );

        offset += len;
    }

    if let Some(expected) = dna.types.get(dna_struct.type_index).map(|t| t.bytes_len) {
        if expected != offset {
            warn!(
                "{} is {} bytes long but its fields add up to {}",
                struct_name, expected, offset
            );
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::dna::{DnaField, DnaType};

    fn dna() -> Dna {
        let types = [
            ("char", 1),
            ("float", 4),
            ("void", 0),
            ("Link", 16),
            ("Mesh", 36),
        ];
        let field = |type_index, name_index| DnaField {
            type_index,
            name_index,
        };

        Dna {
            names: ["*next", "*prev", "name[8]", "*data", "co[3]", "(*cb)()"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            types: types
                .iter()
                .map(|(name, bytes_len)| DnaType {
                    name: name.to_string(),
                    bytes_len: *bytes_len,
                })
                .collect(),
            structs: vec![
                DnaStruct {
                    type_index: 3,
                    fields: vec![field(3, 0), field(3, 1)],
                },
                DnaStruct {
                    type_index: 4,
                    fields: vec![
                        field(0, 2),
                        field(2, 3),
                        field(1, 4),
                        field(2, 5),
                    ],
                },
            ],
        }
    }

    #[test]
    fn computes_offsets() {
        let schema = Schema::new(&dna(), PointerSize::Bits64);
        let mesh = schema
            .type_template(schema.type_index("Mesh").expect("Mesh"))
            .expect("Mesh template");

        let offsets: Vec<(&str, usize, usize)> = mesh
            .fields
            .values()
            .map(|f| (f.name.as_str(), f.offset, f.len))
            .collect();
        assert_eq!(
            offsets,
            vec![("name", 0, 8), ("data", 8, 8), ("co", 16, 12), ("cb", 28, 8)]
        );
        assert!(mesh.fields["data"].is_pointer());
        assert!(!mesh.fields["co"].is_pointer());
        assert!(!mesh.fields["cb"].is_pointer());
    }

    #[test]
    fn offsets_follow_pointer_size() {
        let schema = Schema::new(&dna(), PointerSize::Bits32);
        let link = schema.struct_template(0).expect("Link");

        assert_eq!(link.name, "Link");
        assert_eq!(link.fields["prev"].offset, 4);
        assert_eq!(schema.struct_names(), vec!["Link", "Mesh"]);
    }

    #[test]
    fn effective_type_prefers_concrete_declarations() {
        let schema = Schema::new(&dna(), PointerSize::Bits64);
        let (float, void, link, mesh) = (1, 2, 3, 4);

        assert_eq!(
            schema.effective_type(link, 1),
            EffectiveType {
                type_index: link,
                element_size: 16
            }
        );
        assert_eq!(
            schema.effective_type(float, 1),
            EffectiveType {
                type_index: float,
                element_size: 4
            }
        );
        assert_eq!(
            schema.effective_type(void, 1),
            EffectiveType {
                type_index: mesh,
                element_size: 36
            }
        );
        assert_eq!(
            schema.effective_type(void, 99),
            EffectiveType {
                type_index: void,
                element_size: 8
            }
        );
    }
}
