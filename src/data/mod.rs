//! Data structures and file I/O for profiles and metadata tables.

pub mod format;
pub mod io;
mod profile;
mod table;

pub use format::{Compression, FloatFormat, FloatStyle, OutputOptions};
pub use profile::{is_metadata_column, Profile, METADATA_PREFIX};
pub use table::Table;
