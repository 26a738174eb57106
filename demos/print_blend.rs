//! Prints the objects of every .blend file found under a directory.
//!
//! `cargo run --example print_blend -- <dir> [--dump]`
//!
//! With `--dump` every root block is also written as text next to its file, `<file>.txt`.

use blend::{Blend, LoadOptions};
use libflate::gzip::Decoder;
use log::{info, warn};
use std::{
    env,
    error::Error,
    fs::File,
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

fn read_blend(path: &Path) -> Result<Blend, Box<dyn Error>> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    if !data.starts_with(b"BLENDER") {
        let mut decoder = Decoder::new(&data[..])?;
        let mut gzip_data = Vec::new();
        decoder.read_to_end(&mut gzip_data)?;

        data = gzip_data;
    }

    let options = LoadOptions::default().off_heap_type("PackedFile");
    Ok(Blend::from_bytes_with_options(data, options)?)
}

fn print_objects(blend: &Blend) -> blend::Result<()> {
    for obj in blend.instances_with_code(*b"OB") {
        let name = obj
            .inside("id")?
            .and_then(|id| id.get_string("name"))
            .unwrap_or_default();
        let loc = obj.get_f32_vec("loc").unwrap_or_default();
        let data = obj
            .get_pointer("data")?
            .map_or_else(|| String::from("none"), |d| d.type_name().to_string());

        println!("    {:?} at {:?} ({})", name, loc, data);

        for modifier in obj.get_list("modifiers")? {
            if let Some(name) = modifier.get_string("name") {
                println!("        modifier {:?}", name);
            }
        }
    }

    Ok(())
}

fn dump(blend: &Blend, path: &Path) -> Result<(), Box<dyn Error>> {
    let mut output = path.as_os_str().to_owned();
    output.push(".txt");
    let mut buffer = BufWriter::new(File::create(PathBuf::from(output))?);

    for root in blend.root_instances() {
        write!(buffer, "{}", root)?;
    }
    buffer.flush()?;

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let dir = args
        .next()
        .map_or_else(|| PathBuf::from("demos/blend_files"), PathBuf::from);
    let dump_blocks = args.any(|a| a == "--dump");

    if !dir.is_dir() {
        return Err(format!("{} is not a directory", dir.display()).into());
    }

    for entry in WalkDir::new(&dir) {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || path.extension().map_or(true, |e| e != "blend") {
            continue;
        }

        println!("{}", path.display());
        let blend = match read_blend(path) {
            Ok(blend) => blend,
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                continue;
            }
        };
        info!(
            "{} blocks, {} struct types",
            blend.blocks().len(),
            blend.schema().types().len()
        );

        print_objects(&blend)?;
        if dump_blocks {
            dump(&blend, path)?;
        }
    }

    Ok(())
}
