use crate::{
    parsers::field::FieldInfo,
    runtime::{instance::Instance, schema::FieldTemplate},
};
use std::{collections::HashSet, fmt};

/// Arrays longer than this are abbreviated.
const MAX_PRINTED_VALUES: usize = 16;

const PRIMITIVES: &[&str] = &[
    "char", "uchar", "short", "ushort", "int", "float", "double", "int64_t", "uint64_t",
];

fn fmt_value(f: &mut fmt::Formatter, inst: &Instance, type_name: &str, offset: usize) -> fmt::Result {
    match type_name {
        "char" => write!(f, "{}", inst.byte(offset)),
        "uchar" => write!(f, "{}", inst.ubyte(offset)),
        "short" => write!(f, "{}", inst.short(offset)),
        "ushort" => write!(f, "{}", inst.ushort(offset)),
        "int" => write!(f, "{}", inst.int(offset)),
        "float" => write!(f, "{}", inst.float(offset)),
        "double" => write!(f, "{}", inst.double(offset)),
        "int64_t" => write!(f, "{}", inst.long(offset)),
        "uint64_t" => write!(f, "{}", inst.ulong(offset)),
        _ => write!(f, "?"),
    }
}

fn fmt_array(f: &mut fmt::Formatter, inst: &Instance, field: &FieldTemplate, len: usize) -> fmt::Result {
    if field.type_name == "char" {
        return write!(
            f,
            "\"{}\"",
            String::from_utf8_lossy(inst.string(field.offset, field.len))
        );
    }

    let stride = field.len / len.max(1);
    write!(f, "[")?;
    for i in 0..len.min(MAX_PRINTED_VALUES) {
        if i > 0 {
            write!(f, ", ")?;
        }
        fmt_value(f, inst, &field.type_name, field.offset + i * stride)?;
    }
    if len > MAX_PRINTED_VALUES {
        write!(f, ", ... {} more", len - MAX_PRINTED_VALUES)?;
    }
    write!(f, "]")
}

fn fmt_instance(
    seen: &mut HashSet<(u64, usize)>,
    f: &mut fmt::Formatter,
    inst: &Instance,
    indent: usize,
) -> fmt::Result {
    let indent_str = "    ".repeat(indent);
    writeln!(f, "{} (@{:#x}) {{", inst.type_name(), inst.address())?;

    for field in inst.fields().filter(|field| !field.name.starts_with("_pad")) {
        write!(f, "{}    {}: {} = ", indent_str, field.decorated_name, field.type_name)?;

        match &field.info {
            FieldInfo::FnPointer => write!(f, "fn()")?,
            FieldInfo::Pointer { .. } => match inst.pointer(field.offset) {
                0 => write!(f, "null")?,
                address => write!(f, "@{:#x}", address)?,
            },
            FieldInfo::PointerArray { len, .. } => {
                let pointer_size = field.len / (*len).max(1);
                let addresses: Vec<String> = (0..*len)
                    .map(|i| format!("{:#x}", inst.pointer(field.offset + i * pointer_size)))
                    .collect();
                write!(f, "[{}]", addresses.join(", "))?
            }
            FieldInfo::ValueArray { len, .. } => fmt_array(f, inst, field, *len)?,
            FieldInfo::Value if PRIMITIVES.contains(&field.type_name.as_str()) => {
                fmt_value(f, inst, &field.type_name, field.offset)?
            }
            FieldInfo::Value => match inst.inside(&field.name) {
                Ok(Some(embedded)) => {
                    if seen.insert((embedded.address(), embedded.type_index())) {
                        fmt_instance(seen, f, &embedded, indent + 1)?;
                        continue;
                    }
                    write!(f, "@{:#x}", embedded.address())?
                }
                _ => write!(f, "?")?,
            },
        }

        writeln!(f, ";")?;
    }

    writeln!(f, "{}}}", indent_str)
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_instance(&mut HashSet::new(), f, self, 0)
    }
}
