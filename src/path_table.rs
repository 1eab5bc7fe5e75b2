//! ISO9660 path table records.  Each directory on the volume gets one
//! record; the table is stored twice, once little-endian and once
//! big-endian.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// One path table record: identifier, extent, and 1-based parent index
/// into the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathTableRecord {
    pub xattr_len: u8,
    pub extent_location: u32,
    pub parent_directory_num: u16,
    pub directory_identifier: Vec<u8>,
    /// This record's own 1-based position in the table, filled in when
    /// the table is assembled.
    pub directory_num: u16,
}

impl PathTableRecord {
    pub const HEADER_LENGTH: usize = 8;

    /// On-disc length of a record naming `len_di` identifier bytes,
    /// including the pad byte for odd lengths.
    pub fn record_length(len_di: usize) -> usize {
        Self::HEADER_LENGTH + len_di + (len_di % 2)
    }

    fn parse(data: &[u8], big_endian: bool) -> Result<Self> {
        if data.len() < Self::HEADER_LENGTH {
            return Err(Error::invalid_iso("path table record too short"));
        }
        let len_di = data[0] as usize;
        if data.len() < Self::HEADER_LENGTH + len_di {
            return Err(Error::invalid_iso("path table record identifier truncated"));
        }
        let (extent_location, parent_directory_num) = if big_endian {
            (
                BigEndian::read_u32(&data[2..6]),
                BigEndian::read_u16(&data[6..8]),
            )
        } else {
            (
                LittleEndian::read_u32(&data[2..6]),
                LittleEndian::read_u16(&data[6..8]),
            )
        };
        Ok(PathTableRecord {
            xattr_len: data[1],
            extent_location,
            parent_directory_num,
            directory_identifier: data[8..8 + len_di].to_vec(),
            directory_num: 0,
        })
    }

    pub fn parse_le(data: &[u8]) -> Result<Self> {
        Self::parse(data, false)
    }

    pub fn parse_be(data: &[u8]) -> Result<Self> {
        Self::parse(data, true)
    }

    /// A record for the root directory (identifier is the single byte
    /// 0x00, parent is itself).
    pub fn new_root() -> Self {
        PathTableRecord {
            xattr_len: 0,
            extent_location: 0,
            parent_directory_num: 1,
            directory_identifier: vec![0x00],
            directory_num: 1,
        }
    }

    /// A record for a non-root directory.  Extent and parent number are
    /// filled in by the layout pass.
    pub fn new_dir(identifier: &[u8]) -> Self {
        PathTableRecord {
            xattr_len: 0,
            extent_location: 0,
            parent_directory_num: 0,
            directory_identifier: identifier.to_vec(),
            directory_num: 0,
        }
    }

    pub fn update_extent_location(&mut self, extent: u32) {
        self.extent_location = extent;
    }

    fn record(&self, big_endian: bool) -> Vec<u8> {
        let len_di = self.directory_identifier.len();
        let mut out = vec![0u8; Self::record_length(len_di)];
        out[0] = len_di as u8;
        out[1] = self.xattr_len;
        if big_endian {
            BigEndian::write_u32(&mut out[2..6], self.extent_location);
            BigEndian::write_u16(&mut out[6..8], self.parent_directory_num);
        } else {
            LittleEndian::write_u32(&mut out[2..6], self.extent_location);
            LittleEndian::write_u16(&mut out[6..8], self.parent_directory_num);
        }
        out[8..8 + len_di].copy_from_slice(&self.directory_identifier);
        out
    }

    pub fn record_le(&self) -> Vec<u8> {
        self.record(false)
    }

    pub fn record_be(&self) -> Vec<u8> {
        self.record(true)
    }

    /// Whether a big-endian copy of this record matches, identifier and
    /// all.
    pub fn equal_to_be(&self, be: &PathTableRecord) -> bool {
        self.xattr_len == be.xattr_len
            && self.extent_location == be.extent_location
            && self.parent_directory_num == be.parent_directory_num
            && self.directory_identifier == be.directory_identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_record_le_round_trip() {
        let mut root = PathTableRecord::new_root();
        root.update_extent_location(23);
        let rec = root.record_le();
        assert_eq!(rec.len(), 10);
        assert_eq!(rec[0], 1);
        assert_eq!(&rec[2..6], &[23, 0, 0, 0]);
        assert_eq!(&rec[6..8], &[1, 0]);
        let parsed = PathTableRecord::parse_le(&rec).unwrap();
        assert!(root.equal_to_be(&parsed));
    }

    #[test]
    fn be_record_swaps_fields() {
        let mut rec = PathTableRecord::new_dir(b"DIR1");
        rec.extent_location = 0x0102_0304;
        rec.parent_directory_num = 0x0506;
        let be = rec.record_be();
        assert_eq!(&be[2..6], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&be[6..8], &[0x05, 0x06]);
        let parsed = PathTableRecord::parse_be(&be).unwrap();
        assert!(rec.equal_to_be(&parsed));
    }

    #[test]
    fn odd_identifier_is_padded() {
        let rec = PathTableRecord::new_dir(b"ABC");
        assert_eq!(rec.record_le().len(), 12);
        assert_eq!(PathTableRecord::record_length(3), 12);
        assert_eq!(PathTableRecord::record_length(4), 12);
    }

    #[test]
    fn truncated_record_rejected() {
        assert!(PathTableRecord::parse_le(&[4, 0, 0, 0, 0, 0, 0, 0]).is_err());
    }
}
