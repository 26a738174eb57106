//! # Blend - Random access to the structs inside .blend files
//!
//! ## Example
//!
//! ```no_run
//! use blend::Blend;
//!
//! /// Prints the name and position of every object
//! fn main() -> blend::Result<()> {
//!     let blend = Blend::from_path("file.blend")?;
//!
//!     for obj in blend.instances_with_code(*b"OB") {
//!         let loc = obj.get_f32_vec("loc");
//!         let name = obj.inside("id")?.and_then(|id| id.get_string("name"));
//!
//!         println!("{:?} at {:?}", name, loc);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## The .blend file
//!
//! Blender saves a file by dumping its memory to disk. Every allocation becomes a block tagged with the address
//! it had in memory, and pointers between structs are written as they were, raw addresses. The file also
//! carries its own type database (the DNA) describing every struct that may appear in it.
//!
//! Reading a struct means finding its type in the DNA, computing where each field lives for the pointer size
//! of the machine that saved the file, and, to follow a pointer, finding which block held that address.
//!
//! ## This crate
//!
//! `Blend` parses the block listing and the DNA once and builds a `BlockTable`, an index of every block by
//! address. Nothing else is read upfront: an `Instance` is only a type plus a position inside the file buffer,
//! and fields are decoded when they are asked for.
//!
//! Instances are reference counted and cached by type and address, so walking to the same struct twice yields
//! the same `Rc<Instance>`. The cache only holds weak references, dropping every handle to an instance frees it.
//!
//! `Blend` and `Instance` are single threaded (`!Send`). Open the file once per thread if you need to read it
//! from several threads at once.
//!
//! ### Missing data
//!
//! Files routinely contain pointers into memory that was never saved. Following those gives `None`, with a
//! `debug` level log message. Asking for a field a struct doesn't have gives `None` with a `warn` message.
//! The only errors are for files whose block listing can't be trusted, see `BlendError`.
//!
//! ### Limitations
//!
//! Compressed .blend files are not supported, uncompress the data before passing it to `Blend::from_data`
//! (see the `print_blend` demo). Writing .blend files is not supported.

pub mod error;
pub mod parsers;
pub mod runtime;

pub use error::{BlendError, Result};
pub use runtime::{
    block_table::{Block, BlockTable, HEAP_BASE},
    instance::Instance,
    list::InstantList,
    schema::Schema,
    Blend, LoadOptions,
};
