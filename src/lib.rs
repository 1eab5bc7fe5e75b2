//! An in-memory model of optical-disc filesystem images: ISO9660 with
//! the Rock Ridge, Joliet, El Torito, and UDF extensions.  Parse an
//! existing image, mutate the directory and volume structures, and
//! serialise the result back to a byte-exact image.

pub mod codec;
pub mod dates;
pub mod directory;
pub mod eltorito;
pub mod error;
pub mod image;
pub mod inode;
pub mod layout;
pub mod path_table;
pub mod rockridge;
pub mod udf;
pub mod volume;

pub use crate::directory::{DirTree, DirectoryRecord, DrId, FileFlags};
pub use crate::error::{Error, Result};
pub use crate::image::{DataSource, Image, NewImageOptions, UdfContext};
pub use crate::inode::{Inode, InodeId, InodeOpenData, LinkedRecord};
pub use crate::rockridge::RrVersion;
pub use crate::udf::FeId;
