//! Storage layer: locked file I/O, the file header, and the pager.

mod file;
mod file_header;
mod pager;

pub use file::DbFile;
pub use file_header::{FileHeader, MAGIC};
pub use pager::Pager;
