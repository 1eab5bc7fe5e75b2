//! The inode layer: unique data payloads referenced by one or more
//! metadata records (ISO9660/Joliet directory records, UDF file
//! entries, El Torito entries).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::eltorito::BootInfoTable;
use crate::error::{Error, Result};

/// Anything we can read bytes from at arbitrary offsets.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek + ?Sized> ReadSeek for T {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeId(pub usize);

/// Where an inode's payload bytes live.
pub enum InodeSource {
    /// At `extent * block_size` in the original image the model was
    /// parsed from.
    OnImage { extent: u32 },
    /// At `offset` in a caller-supplied reader owned by the inode.
    Reader { offset: u64 },
    /// At `offset` in a file the inode opens per streaming use.
    Path { path: PathBuf, offset: u64 },
}

/// A unique data payload and the metadata records that name it.
pub struct Inode {
    pub data_length: u64,
    pub source: InodeSource,
    /// Reader backing `InodeSource::Reader`.
    reader: Option<Box<dyn ReadSeek>>,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
    pub boot_info_table: Option<BootInfoTable>,
    pub linked_records: Vec<LinkedRecord>,
    /// How many of the linked records came from the UDF side.
    pub num_udf: usize,
}

/// A back-reference from an inode to one metadata record naming it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkedRecord {
    IsoDir(crate::directory::DrId),
    JolietDir(crate::directory::DrId),
    UdfFile(crate::udf::FeId),
    Eltorito(crate::eltorito::EntryRef),
}

impl Inode {
    /// An inode whose data lives on the original image.
    pub fn from_image(extent: u32, length: u64) -> Self {
        Inode {
            data_length: length,
            source: InodeSource::OnImage { extent },
            reader: None,
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
            boot_info_table: None,
            linked_records: Vec::new(),
            num_udf: 0,
        }
    }

    /// An inode whose data comes from a caller-supplied reader.
    pub fn from_reader(reader: Box<dyn ReadSeek>, offset: u64, length: u64) -> Self {
        Inode {
            data_length: length,
            source: InodeSource::Reader { offset },
            reader: Some(reader),
            orig_extent_loc: None,
            new_extent_loc: None,
            boot_info_table: None,
            linked_records: Vec::new(),
            num_udf: 0,
        }
    }

    /// An inode whose data comes from a path the library opens on
    /// demand.
    pub fn from_path(path: PathBuf, offset: u64, length: u64) -> Self {
        Inode {
            data_length: length,
            source: InodeSource::Path { path, offset },
            reader: None,
            orig_extent_loc: None,
            new_extent_loc: None,
            boot_info_table: None,
            linked_records: Vec::new(),
            num_udf: 0,
        }
    }

    /// The inode's current extent: the reshuffled one if a layout pass
    /// has run, else the one it was parsed at.
    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc
            .or(self.orig_extent_loc)
            .unwrap_or(0)
    }

    pub fn set_extent_location(&mut self, extent: u32) {
        self.new_extent_loc = Some(extent);
    }

    pub fn link(&mut self, rec: LinkedRecord) {
        if matches!(rec, LinkedRecord::UdfFile(_)) {
            self.num_udf += 1;
        }
        self.linked_records.push(rec);
    }

    pub fn unlink(&mut self, rec: LinkedRecord) {
        if let Some(pos) = self.linked_records.iter().position(|r| *r == rec) {
            if matches!(rec, LinkedRecord::UdfFile(_)) {
                self.num_udf -= 1;
            }
            self.linked_records.remove(pos);
        }
    }

    /// Replace the data backing this inode with a caller-supplied
    /// reader.
    pub fn update_reader(&mut self, reader: Box<dyn ReadSeek>, length: u64) {
        self.source = InodeSource::Reader { offset: 0 };
        self.reader = Some(reader);
        self.data_length = length;
    }

    /// Open this inode's data for streaming.  `image_source` is the
    /// reader for the original image, required when the data lives
    /// there.  The returned guard is positioned at the first payload
    /// byte and releases any library-opened file on every exit path.
    pub fn open_data<'a>(
        &'a mut self,
        image_source: Option<&'a mut dyn ReadSeek>,
        block_size: u32,
    ) -> Result<InodeOpenData<'a>> {
        let length = self.data_length;
        match &self.source {
            InodeSource::OnImage { extent } => {
                let src = image_source.ok_or_else(|| {
                    Error::internal("inode data is on the original image, but no source is open")
                })?;
                src.seek(SeekFrom::Start(u64::from(*extent) * u64::from(block_size)))?;
                Ok(InodeOpenData {
                    reader: OpenReader::Borrowed(src),
                    length,
                })
            }
            InodeSource::Reader { offset } => {
                let offset = *offset;
                let reader = self
                    .reader
                    .as_mut()
                    .ok_or_else(|| Error::internal("inode reader source missing"))?;
                reader.seek(SeekFrom::Start(offset))?;
                Ok(InodeOpenData {
                    reader: OpenReader::Borrowed(reader.as_mut()),
                    length,
                })
            }
            InodeSource::Path { path, offset } => {
                let mut file = File::open(path)?;
                file.seek(SeekFrom::Start(*offset))?;
                Ok(InodeOpenData {
                    reader: OpenReader::Owned(file),
                    length,
                })
            }
        }
    }
}

enum OpenReader<'a> {
    Borrowed(&'a mut dyn ReadSeek),
    // Dropped (and therefore closed) with the guard.
    Owned(File),
}

/// Scoped access to an inode's payload.  Implements `Read` over exactly
/// the payload region; dropping the guard releases any file the inode
/// opened for this use.
pub struct InodeOpenData<'a> {
    reader: OpenReader<'a>,
    length: u64,
}

impl InodeOpenData<'_> {
    pub fn length(&self) -> u64 {
        self.length
    }
}

impl Read for InodeOpenData<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.reader {
            OpenReader::Borrowed(r) => r.read(buf),
            OpenReader::Owned(f) => f.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn reader_inode_positions_at_offset() {
        let data = b"xxxxhello".to_vec();
        let mut ino = Inode::from_reader(Box::new(Cursor::new(data)), 4, 5);
        let mut opened = ino.open_data(None, 2048).unwrap();
        assert_eq!(opened.length(), 5);
        let mut buf = vec![0u8; 5];
        opened.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn on_image_inode_requires_source() {
        let mut ino = Inode::from_image(24, 5);
        assert!(ino.open_data(None, 2048).is_err());
    }

    #[test]
    fn on_image_inode_seeks_to_extent() {
        let mut image = vec![0u8; 2048 * 3];
        image[2048 * 2..2048 * 2 + 5].copy_from_slice(b"world");
        let mut cursor = Cursor::new(image);
        let mut ino = Inode::from_image(2, 5);
        let mut opened = ino.open_data(Some(&mut cursor), 2048).unwrap();
        let mut buf = vec![0u8; 5];
        opened.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn extent_location_prefers_new() {
        let mut ino = Inode::from_image(24, 5);
        assert_eq!(ino.extent_location(), 24);
        ino.set_extent_location(30);
        assert_eq!(ino.extent_location(), 30);
    }

    #[test]
    fn udf_links_are_counted() {
        let mut ino = Inode::from_image(24, 5);
        ino.link(LinkedRecord::UdfFile(crate::udf::FeId(0)));
        ino.link(LinkedRecord::IsoDir(crate::directory::DrId(0)));
        assert_eq!(ino.num_udf, 1);
        ino.unlink(LinkedRecord::UdfFile(crate::udf::FeId(0)));
        assert_eq!(ino.num_udf, 0);
        assert_eq!(ino.linked_records.len(), 1);
    }
}
