//! ECMA-167 / UDF support: the descriptor tag framing, the volume
//! descriptor sequence, and the file-set / file-entry / file-identifier
//! graph.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{Datelike, Local, Timelike};

use crate::codec::{ceiling_div, crc_ccitt, udf_tag_checksum};
use crate::dates::gmt_offset_quarters;
use crate::error::{Error, Result};
use crate::inode::InodeId;

/// The largest byte length a single allocation descriptor is grown to
/// before another descriptor is appended.  cdrkit uses this value;
/// Windows uses 0x3ff00000.  Matching cdrkit keeps single-AD images
/// round-trippable.
pub const MAX_ALLOC_EXTENT_LENGTH: u32 = 0x3fff_f800;

/// Identifier stamped into implementation entity ids we create.
const IMPL_IDENT: &[u8] = b"*disc-image";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeId(pub usize);

/// Compress a UTF-8 string into an OSTA identifier: 0x08-prefixed
/// Latin-1 when it fits, 0x10-prefixed UCS-2-BE otherwise.
pub fn ostaunicode(src: &str) -> Vec<u8> {
    if src.chars().all(|c| (c as u32) < 0x100) {
        let mut out = vec![0x08];
        out.extend(src.chars().map(|c| c as u8));
        out
    } else {
        let mut out = vec![0x10];
        for c in src.chars() {
            let cp = c as u32 as u16;
            out.push((cp >> 8) as u8);
            out.push(cp as u8);
        }
        out
    }
}

/// An OSTA identifier zero-padded to a fixed field whose final byte is
/// the used length.
pub fn ostaunicode_zero_pad(src: &str, full_len: usize) -> Vec<u8> {
    let encoded = ostaunicode(src);
    let mut out = vec![0u8; full_len];
    out[..encoded.len()].copy_from_slice(&encoded);
    out[full_len - 1] = encoded.len() as u8;
    out
}

/// Encode a Unix-style path into UDF symlink component data.
pub fn symlink_to_bytes(symlink_target: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for comp in symlink_target.split('/') {
        match comp {
            "" => out.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]),
            "." => out.extend_from_slice(&[0x04, 0x00, 0x00, 0x00]),
            ".." => out.extend_from_slice(&[0x03, 0x00, 0x00, 0x00]),
            name => {
                let osta = ostaunicode(name);
                out.push(0x05);
                out.push(osta.len() as u8);
                out.extend_from_slice(&[0x00, 0x00]);
                out.extend_from_slice(&osta);
            }
        }
    }
    out
}

/// The 16-byte descriptor tag prefixing every UDF descriptor
/// (ECMA-167, Part 3, 7.2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdfTag {
    pub tag_ident: u16,
    pub desc_version: u16,
    pub tag_serial_number: u16,
    pub tag_location: u32,
    /// CRC span from parsing; a fresh tag uses the full body length.
    pub desc_crc_length: Option<usize>,
}

impl UdfTag {
    pub const LENGTH: usize = 16;

    pub fn parse(data: &[u8], extent: u32) -> Result<Self> {
        if data.len() < Self::LENGTH {
            return Err(Error::invalid_iso("UDF tag too short"));
        }
        let tag_ident = LittleEndian::read_u16(&data[0..2]);
        let desc_version = LittleEndian::read_u16(&data[2..4]);
        let tag_checksum = data[4];
        if data[5] != 0 {
            return Err(Error::invalid_iso("reserved data not 0"));
        }
        let tag_serial_number = LittleEndian::read_u16(&data[6..8]);
        let desc_crc = LittleEndian::read_u16(&data[8..10]);
        let desc_crc_length = LittleEndian::read_u16(&data[10..12]) as usize;
        let mut tag_location = LittleEndian::read_u32(&data[12..16]);

        if udf_tag_checksum(&data[..16]) != tag_checksum {
            return Err(Error::invalid_iso("tag checksum does not match"));
        }
        if tag_location != extent {
            // PS2 GT4 images carry a bogus tag location on the second
            // anchor and the file set terminator; fix it up silently.
            log::debug!(
                "UDF tag location {} does not match extent {}; fixing up",
                tag_location,
                extent
            );
            tag_location = extent;
        }
        if !matches!(desc_version, 2 | 3) {
            return Err(Error::invalid_iso("tag version not 2 or 3"));
        }
        if data.len() - 16 < desc_crc_length {
            return Err(Error::internal("not enough bytes to compute CRC"));
        }
        if desc_crc != crc_ccitt(&data[16..16 + desc_crc_length]) {
            return Err(Error::invalid_iso("tag CRC does not match"));
        }

        Ok(UdfTag {
            tag_ident,
            desc_version,
            tag_serial_number,
            tag_location,
            desc_crc_length: Some(desc_crc_length),
        })
    }

    pub fn new(tag_ident: u16, tag_serial: u16) -> Self {
        UdfTag {
            tag_ident,
            desc_version: 2,
            tag_serial_number: tag_serial,
            tag_location: 0,
            desc_crc_length: None,
        }
    }

    /// Emit the tag for a descriptor whose body is `crc_bytes`.
    pub fn record(&self, crc_bytes: &[u8]) -> [u8; 16] {
        let crc_len = self.desc_crc_length.unwrap_or(crc_bytes.len());
        let crc_len = crc_len.min(crc_bytes.len());
        let mut out = [0u8; 16];
        LittleEndian::write_u16(&mut out[0..2], self.tag_ident);
        LittleEndian::write_u16(&mut out[2..4], self.desc_version);
        LittleEndian::write_u16(&mut out[6..8], self.tag_serial_number);
        LittleEndian::write_u16(&mut out[8..10], crc_ccitt(&crc_bytes[..crc_len]));
        LittleEndian::write_u16(&mut out[10..12], crc_len as u16);
        LittleEndian::write_u32(&mut out[12..16], self.tag_location);
        out[4] = udf_tag_checksum(&out);
        out
    }
}

/// A UDF timestamp (ECMA-167, Part 1, 7.3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdfTimestamp {
    /// Minutes from UTC, -1440..=1440, or -2047 for "unspecified".
    pub tz: i16,
    pub timetype: u8,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub centiseconds: u8,
    pub hundreds_microseconds: u8,
    pub microseconds: u8,
}

impl UdfTimestamp {
    pub const LENGTH: usize = 12;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LENGTH {
            return Err(Error::invalid_iso("UDF timestamp too short"));
        }
        let tz_low = data[0];
        let timetype_raw = data[1];
        let timetype = timetype_raw >> 4;
        let raw12 = (u16::from(timetype_raw & 0xf) << 8) | u16::from(tz_low);
        let tz = if raw12 & 0x800 != 0 {
            (raw12 as i16) - 4096
        } else {
            raw12 as i16
        };
        if !(-1440..=1440).contains(&tz) && tz != -2047 {
            return Err(Error::invalid_iso("invalid UDF timezone"));
        }
        let year = LittleEndian::read_u16(&data[2..4]);
        if !(1..=9999).contains(&year) {
            return Err(Error::invalid_iso("invalid UDF year"));
        }
        let month = data[4];
        if !(1..=12).contains(&month) {
            return Err(Error::invalid_iso("invalid UDF month"));
        }
        let day = data[5];
        if !(1..=31).contains(&day) {
            return Err(Error::invalid_iso("invalid UDF day"));
        }
        let hour = data[6];
        if hour > 23 {
            return Err(Error::invalid_iso("invalid UDF hour"));
        }
        let minute = data[7];
        if minute > 59 {
            return Err(Error::invalid_iso("invalid UDF minute"));
        }
        let second = data[8];
        if second > 59 {
            return Err(Error::invalid_iso("invalid UDF second"));
        }
        Ok(UdfTimestamp {
            tz,
            timetype,
            year,
            month,
            day,
            hour,
            minute,
            second,
            centiseconds: data[9],
            hundreds_microseconds: data[10],
            microseconds: data[11],
        })
    }

    pub fn now() -> Self {
        let local = Local::now();
        UdfTimestamp {
            tz: i16::from(gmt_offset_quarters()) * 15,
            // 1 is local time.
            timetype: 1,
            year: local.year() as u16,
            month: local.month() as u8,
            day: local.day() as u8,
            hour: local.hour() as u8,
            minute: local.minute() as u8,
            second: local.second() as u8,
            centiseconds: 0,
            hundreds_microseconds: 0,
            microseconds: 0,
        }
    }

    pub fn record(&self) -> [u8; 12] {
        let raw12 = (self.tz as u16) & 0x0fff;
        let mut out = [0u8; 12];
        out[0] = raw12 as u8;
        out[1] = ((raw12 >> 8) as u8) | (self.timetype << 4);
        LittleEndian::write_u16(&mut out[2..4], self.year);
        out[4] = self.month;
        out[5] = self.day;
        out[6] = self.hour;
        out[7] = self.minute;
        out[8] = self.second;
        out[9] = self.centiseconds;
        out[10] = self.hundreds_microseconds;
        out[11] = self.microseconds;
        out
    }
}

/// A UDF Entity ID (ECMA-167, Part 1, 7.4).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdfEntityId {
    pub flags: u8,
    pub identifier: [u8; 23],
    pub suffix: [u8; 8],
}

impl UdfEntityId {
    pub const LENGTH: usize = 32;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LENGTH {
            return Err(Error::invalid_iso("UDF entity ID too short"));
        }
        if data[0] > 3 {
            return Err(Error::invalid_iso("UDF entity ID flags must be between 0 and 3"));
        }
        Ok(UdfEntityId {
            flags: data[0],
            identifier: data[1..24].try_into().unwrap(),
            suffix: data[24..32].try_into().unwrap(),
        })
    }

    pub fn new(flags: u8, identifier: &[u8], suffix: &[u8]) -> Result<Self> {
        if flags > 3 {
            return Err(Error::invalid_input("UDF entity ID flags must be between 0 and 3"));
        }
        if identifier.len() > 23 {
            return Err(Error::invalid_input(
                "UDF entity ID identifier must be less than 23 characters",
            ));
        }
        if suffix.len() > 8 {
            return Err(Error::invalid_input("UDF entity ID suffix must be less than 8 characters"));
        }
        let mut ident = [0u8; 23];
        ident[..identifier.len()].copy_from_slice(identifier);
        let mut suf = [0u8; 8];
        suf[..suffix.len()].copy_from_slice(suffix);
        Ok(UdfEntityId {
            flags,
            identifier: ident,
            suffix: suf,
        })
    }

    fn ours() -> Self {
        Self::new(0, IMPL_IDENT, b"").expect("static entity id is valid")
    }

    pub fn record(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0] = self.flags;
        out[1..24].copy_from_slice(&self.identifier);
        out[24..32].copy_from_slice(&self.suffix);
        out
    }
}

/// A UDF charspec (ECMA-167, Part 1, 7.2.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdfCharspec {
    pub set_type: u8,
    pub set_information: [u8; 63],
}

impl UdfCharspec {
    pub const LENGTH: usize = 64;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LENGTH {
            return Err(Error::invalid_iso("UDF charspec too short"));
        }
        if data[0] > 8 {
            return Err(Error::invalid_iso("invalid charset parsed; only 0-8 supported"));
        }
        Ok(UdfCharspec {
            set_type: data[0],
            set_information: data[1..64].try_into().unwrap(),
        })
    }

    pub fn osta_compressed() -> Self {
        let mut set_information = [0u8; 63];
        set_information[..23].copy_from_slice(b"OSTA Compressed Unicode");
        UdfCharspec {
            set_type: 0,
            set_information,
        }
    }

    pub fn record(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[0] = self.set_type;
        out[1..64].copy_from_slice(&self.set_information);
        out
    }
}

/// A UDF extent descriptor: length plus absolute block number
/// (ECMA-167, Part 3, 7.1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UdfExtentAd {
    pub extent_length: u32,
    pub extent_location: u32,
}

impl UdfExtentAd {
    pub const LENGTH: usize = 8;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let extent_length = LittleEndian::read_u32(&data[0..4]);
        if extent_length >= 0x3fff_ffff {
            return Err(Error::invalid_iso(
                "UDF extent descriptor length must be less than 0x3fffffff",
            ));
        }
        Ok(UdfExtentAd {
            extent_length,
            extent_location: LittleEndian::read_u32(&data[4..8]),
        })
    }

    pub fn new(length: u32, blocknum: u32) -> Self {
        UdfExtentAd {
            extent_length: length,
            extent_location: blocknum,
        }
    }

    pub fn record(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        LittleEndian::write_u32(&mut out[0..4], self.extent_length);
        LittleEndian::write_u32(&mut out[4..8], self.extent_location);
        out
    }
}

/// A UDF lb_addr: partition-relative block plus partition reference
/// (ECMA-167, Part 4, 7.1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UdfLbAddr {
    pub logical_block_num: u32,
    pub part_ref_num: u16,
}

impl UdfLbAddr {
    pub const LENGTH: usize = 6;

    pub fn parse(data: &[u8]) -> Self {
        UdfLbAddr {
            logical_block_num: LittleEndian::read_u32(&data[0..4]),
            part_ref_num: LittleEndian::read_u16(&data[4..6]),
        }
    }

    pub fn record(&self) -> [u8; 6] {
        let mut out = [0u8; 6];
        LittleEndian::write_u32(&mut out[0..4], self.logical_block_num);
        LittleEndian::write_u16(&mut out[4..6], self.part_ref_num);
        out
    }
}

/// Structure types for the BEA/NSR/TEA recognition triplet.
fn parse_volume_structure(data: &[u8], idents: &[&[u8]]) -> Result<Vec<u8>> {
    if data.len() < 7 {
        return Err(Error::invalid_iso("UDF volume structure too short"));
    }
    if data[0] != 0 {
        return Err(Error::invalid_iso("invalid structure type"));
    }
    if !idents.contains(&&data[1..6]) {
        return Err(Error::invalid_iso("invalid standard identifier"));
    }
    if data[6] != 1 {
        return Err(Error::invalid_iso("invalid structure version"));
    }
    Ok(data[1..6].to_vec())
}

fn record_volume_structure(ident: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 2048];
    out[1..6].copy_from_slice(ident);
    out[6] = 1;
    out
}

/// The Beginning Extended Area structure (ECMA-167, Part 2, 9.2).
pub struct BeaVolumeStructure {
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl BeaVolumeStructure {
    pub fn parse(data: &[u8], extent: u32) -> Result<Self> {
        parse_volume_structure(data, &[b"BEA01"])?;
        Ok(BeaVolumeStructure {
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new() -> Self {
        BeaVolumeStructure {
            orig_extent_loc: None,
            new_extent_loc: None,
        }
    }

    pub fn record(&self) -> Vec<u8> {
        record_volume_structure(b"BEA01")
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc.or(self.orig_extent_loc).unwrap_or(0)
    }
}

/// The NSR02/NSR03 structure (ECMA-167, Part 3, 9.1).
pub struct NsrVolumeStructure {
    pub standard_ident: Vec<u8>,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl NsrVolumeStructure {
    pub fn parse(data: &[u8], extent: u32) -> Result<Self> {
        let standard_ident = parse_volume_structure(data, &[b"NSR02", b"NSR03"])?;
        Ok(NsrVolumeStructure {
            standard_ident,
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new(version: u8) -> Result<Self> {
        let standard_ident = match version {
            2 => b"NSR02".to_vec(),
            3 => b"NSR03".to_vec(),
            _ => return Err(Error::internal("invalid NSR version requested")),
        };
        Ok(NsrVolumeStructure {
            standard_ident,
            orig_extent_loc: None,
            new_extent_loc: None,
        })
    }

    pub fn record(&self) -> Vec<u8> {
        record_volume_structure(&self.standard_ident)
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc.or(self.orig_extent_loc).unwrap_or(0)
    }
}

/// The Terminating Extended Area structure (ECMA-167, Part 2, 9.3).
pub struct TeaVolumeStructure {
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl TeaVolumeStructure {
    pub fn parse(data: &[u8], extent: u32) -> Result<Self> {
        parse_volume_structure(data, &[b"TEA01"])?;
        Ok(TeaVolumeStructure {
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new() -> Self {
        TeaVolumeStructure {
            orig_extent_loc: None,
            new_extent_loc: None,
        }
    }

    pub fn record(&self) -> Vec<u8> {
        record_volume_structure(b"TEA01")
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc.or(self.orig_extent_loc).unwrap_or(0)
    }
}

/// The Anchor Volume Descriptor Pointer (ECMA-167, Part 3, 10.2).
pub struct UdfAnchorVolumeStructure {
    pub desc_tag: UdfTag,
    pub main_vd: UdfExtentAd,
    pub reserve_vd: UdfExtentAd,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfAnchorVolumeStructure {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        Ok(UdfAnchorVolumeStructure {
            desc_tag,
            main_vd: UdfExtentAd::parse(&data[16..24])?,
            reserve_vd: UdfExtentAd::parse(&data[24..32])?,
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new() -> Self {
        UdfAnchorVolumeStructure {
            desc_tag: UdfTag::new(2, 0),
            main_vd: UdfExtentAd::new(32768, 0),
            reserve_vd: UdfExtentAd::new(32768, 0),
            orig_extent_loc: None,
            new_extent_loc: None,
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 496];
        body[0..8].copy_from_slice(&self.main_vd.record());
        body[8..16].copy_from_slice(&self.reserve_vd.record());
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc.or(self.orig_extent_loc).unwrap_or(0)
    }

    pub fn set_extent_location(&mut self, extent: u32, main_vd_extent: u32, reserve_vd_extent: u32) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = extent;
        self.main_vd.extent_location = main_vd_extent;
        self.reserve_vd.extent_location = reserve_vd_extent;
    }
}

/// The Volume Descriptor Pointer (ECMA-167, Part 3, 10.3).
#[derive(Clone)]
pub struct UdfVolumeDescriptorPointer {
    pub desc_tag: UdfTag,
    pub vol_seqnum: u32,
    pub next_vol_desc_seq_extent: UdfExtentAd,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfVolumeDescriptorPointer {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        Ok(UdfVolumeDescriptorPointer {
            desc_tag,
            vol_seqnum: LittleEndian::read_u32(&data[16..20]),
            next_vol_desc_seq_extent: UdfExtentAd::parse(&data[20..28])?,
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 496];
        LittleEndian::write_u32(&mut body[0..4], self.vol_seqnum);
        body[4..12].copy_from_slice(&self.next_vol_desc_seq_extent.record());
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub fn set_extent_location(&mut self, extent: u32) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = extent;
    }
}

/// The UDF Primary Volume Descriptor (ECMA-167, Part 3, 10.1).
#[derive(Clone)]
pub struct UdfPrimaryVolumeDescriptor {
    pub desc_tag: UdfTag,
    pub vol_desc_seqnum: u32,
    pub desc_num: u32,
    pub vol_ident: [u8; 32],
    pub interchange_level: u16,
    pub max_interchange_level: u16,
    pub vol_set_ident: [u8; 128],
    pub desc_char_set: UdfCharspec,
    pub explanatory_char_set: UdfCharspec,
    pub vol_abstract: UdfExtentAd,
    pub vol_copyright: UdfExtentAd,
    pub app_ident: UdfEntityId,
    pub recording_date: UdfTimestamp,
    pub impl_ident: UdfEntityId,
    pub implementation_use: [u8; 64],
    pub predecessor_vol_desc_location: u32,
    pub flags: u16,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfPrimaryVolumeDescriptor {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        let vol_seqnum = LittleEndian::read_u16(&data[56..58]);
        let max_vol_seqnum = LittleEndian::read_u16(&data[58..60]);
        if vol_seqnum != 1 || max_vol_seqnum != 1 {
            return Err(Error::invalid_iso("only single-volume UDF sets are supported"));
        }
        let interchange_level = LittleEndian::read_u16(&data[60..62]);
        if !matches!(interchange_level, 2 | 3) {
            return Err(Error::invalid_iso(
                "unsupported interchange level (only 2 and 3 supported)",
            ));
        }
        let char_set_list = LittleEndian::read_u32(&data[64..68]);
        let max_char_set_list = LittleEndian::read_u32(&data[68..72]);
        if char_set_list != 1 || max_char_set_list != 1 {
            return Err(Error::invalid_iso("only single-charset UDF volumes are supported"));
        }
        let flags = LittleEndian::read_u16(&data[488..490]);
        if flags > 1 {
            return Err(Error::invalid_iso("invalid UDF flags"));
        }
        if data[490..512].iter().any(|&b| b != 0) {
            return Err(Error::invalid_iso(
                "UDF primary volume descriptor reserved data not 0",
            ));
        }

        Ok(UdfPrimaryVolumeDescriptor {
            desc_tag,
            vol_desc_seqnum: LittleEndian::read_u32(&data[16..20]),
            desc_num: LittleEndian::read_u32(&data[20..24]),
            vol_ident: data[24..56].try_into().unwrap(),
            interchange_level,
            max_interchange_level: LittleEndian::read_u16(&data[62..64]),
            vol_set_ident: data[72..200].try_into().unwrap(),
            desc_char_set: UdfCharspec::parse(&data[200..264])?,
            explanatory_char_set: UdfCharspec::parse(&data[264..328])?,
            vol_abstract: UdfExtentAd::parse(&data[328..336])?,
            vol_copyright: UdfExtentAd::parse(&data[336..344])?,
            app_ident: UdfEntityId::parse(&data[344..376])?,
            recording_date: UdfTimestamp::parse(&data[376..388])?,
            impl_ident: UdfEntityId::parse(&data[388..420])?,
            implementation_use: data[420..484].try_into().unwrap(),
            predecessor_vol_desc_location: LittleEndian::read_u32(&data[484..488]),
            flags,
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new(unique_vol_set_ident: &str) -> Self {
        UdfPrimaryVolumeDescriptor {
            desc_tag: UdfTag::new(1, 0),
            vol_desc_seqnum: 0,
            desc_num: 0,
            vol_ident: ostaunicode_zero_pad("CDROM", 32).try_into().unwrap(),
            interchange_level: 2,
            max_interchange_level: 2,
            vol_set_ident: ostaunicode_zero_pad(unique_vol_set_ident, 128)
                .try_into()
                .unwrap(),
            desc_char_set: UdfCharspec::osta_compressed(),
            explanatory_char_set: UdfCharspec::osta_compressed(),
            vol_abstract: UdfExtentAd::default(),
            vol_copyright: UdfExtentAd::default(),
            app_ident: UdfEntityId::new(0, b"", b"").unwrap(),
            recording_date: UdfTimestamp::now(),
            impl_ident: UdfEntityId::ours(),
            implementation_use: [0u8; 64],
            predecessor_vol_desc_location: 0,
            flags: 0,
            orig_extent_loc: None,
            new_extent_loc: None,
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 496];
        LittleEndian::write_u32(&mut body[0..4], self.vol_desc_seqnum);
        LittleEndian::write_u32(&mut body[4..8], self.desc_num);
        body[8..40].copy_from_slice(&self.vol_ident);
        LittleEndian::write_u16(&mut body[40..42], 1);
        LittleEndian::write_u16(&mut body[42..44], 1);
        LittleEndian::write_u16(&mut body[44..46], self.interchange_level);
        LittleEndian::write_u16(&mut body[46..48], self.max_interchange_level);
        LittleEndian::write_u32(&mut body[48..52], 1);
        LittleEndian::write_u32(&mut body[52..56], 1);
        body[56..184].copy_from_slice(&self.vol_set_ident);
        body[184..248].copy_from_slice(&self.desc_char_set.record());
        body[248..312].copy_from_slice(&self.explanatory_char_set.record());
        body[312..320].copy_from_slice(&self.vol_abstract.record());
        body[320..328].copy_from_slice(&self.vol_copyright.record());
        body[328..360].copy_from_slice(&self.app_ident.record());
        body[360..372].copy_from_slice(&self.recording_date.record());
        body[372..404].copy_from_slice(&self.impl_ident.record());
        body[404..468].copy_from_slice(&self.implementation_use);
        LittleEndian::write_u32(&mut body[468..472], self.predecessor_vol_desc_location);
        LittleEndian::write_u16(&mut body[472..474], self.flags);
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub fn set_extent_location(&mut self, extent: u32) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = extent;
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc.or(self.orig_extent_loc).unwrap_or(0)
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.vol_desc_seqnum == other.vol_desc_seqnum
            && self.desc_num == other.desc_num
            && self.vol_ident == other.vol_ident
            && self.vol_set_ident == other.vol_set_ident
            && self.desc_char_set == other.desc_char_set
            && self.explanatory_char_set == other.explanatory_char_set
            && self.vol_abstract == other.vol_abstract
            && self.vol_copyright == other.vol_copyright
            && self.implementation_use == other.implementation_use
            && self.predecessor_vol_desc_location == other.predecessor_vol_desc_location
            && self.recording_date == other.recording_date
            && self.app_ident == other.app_ident
            && self.impl_ident == other.impl_ident
            && self.interchange_level == other.interchange_level
            && self.max_interchange_level == other.max_interchange_level
            && self.flags == other.flags
    }
}

/// The implementation-use payload of the Implementation Use Volume
/// Descriptor ("*UDF LV Info").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdfLvInformation {
    pub char_set: UdfCharspec,
    pub log_vol_ident: [u8; 128],
    pub lv_info1: [u8; 36],
    pub lv_info2: [u8; 36],
    pub lv_info3: [u8; 36],
    pub impl_ident: UdfEntityId,
    pub impl_use: [u8; 128],
}

impl UdfLvInformation {
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(UdfLvInformation {
            char_set: UdfCharspec::parse(&data[0..64])?,
            log_vol_ident: data[64..192].try_into().unwrap(),
            lv_info1: data[192..228].try_into().unwrap(),
            lv_info2: data[228..264].try_into().unwrap(),
            lv_info3: data[264..300].try_into().unwrap(),
            impl_ident: UdfEntityId::parse(&data[300..332])?,
            impl_use: data[332..460].try_into().unwrap(),
        })
    }

    pub fn new() -> Self {
        UdfLvInformation {
            char_set: UdfCharspec::osta_compressed(),
            log_vol_ident: ostaunicode_zero_pad("CDROM", 128).try_into().unwrap(),
            lv_info1: [0u8; 36],
            lv_info2: [0u8; 36],
            lv_info3: [0u8; 36],
            impl_ident: UdfEntityId::ours(),
            impl_use: [0u8; 128],
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![0u8; 460];
        out[0..64].copy_from_slice(&self.char_set.record());
        out[64..192].copy_from_slice(&self.log_vol_ident);
        out[192..228].copy_from_slice(&self.lv_info1);
        out[228..264].copy_from_slice(&self.lv_info2);
        out[264..300].copy_from_slice(&self.lv_info3);
        out[300..332].copy_from_slice(&self.impl_ident.record());
        out[332..460].copy_from_slice(&self.impl_use);
        out
    }
}

/// The Implementation Use Volume Descriptor (ECMA-167, Part 3, 10.4).
#[derive(Clone)]
pub struct UdfImplementationUseVolumeDescriptor {
    pub desc_tag: UdfTag,
    pub vol_desc_seqnum: u32,
    pub impl_ident: UdfEntityId,
    pub impl_use: UdfLvInformation,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfImplementationUseVolumeDescriptor {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        let impl_ident = UdfEntityId::parse(&data[20..52])?;
        if &impl_ident.identifier[..12] != b"*UDF LV Info" {
            return Err(Error::invalid_iso("implementation use identifier not '*UDF LV Info'"));
        }
        Ok(UdfImplementationUseVolumeDescriptor {
            desc_tag,
            vol_desc_seqnum: LittleEndian::read_u32(&data[16..20]),
            impl_ident,
            impl_use: UdfLvInformation::parse(&data[52..512])?,
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new() -> Self {
        UdfImplementationUseVolumeDescriptor {
            desc_tag: UdfTag::new(4, 0),
            vol_desc_seqnum: 1,
            impl_ident: UdfEntityId::new(0, b"*UDF LV Info", b"\x02\x01").unwrap(),
            impl_use: UdfLvInformation::new(),
            orig_extent_loc: None,
            new_extent_loc: None,
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 496];
        LittleEndian::write_u32(&mut body[0..4], self.vol_desc_seqnum);
        body[4..36].copy_from_slice(&self.impl_ident.record());
        body[36..496].copy_from_slice(&self.impl_use.record());
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub fn set_extent_location(&mut self, extent: u32) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = extent;
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.vol_desc_seqnum == other.vol_desc_seqnum
            && self.impl_ident == other.impl_ident
            && self.impl_use == other.impl_use
    }
}

/// The partition-header area inside a Partition Descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UdfPartitionHeaderDescriptor {
    pub unalloc_space_table: UdfShortAd,
    pub unalloc_space_bitmap: UdfShortAd,
    pub partition_integrity_table: UdfShortAd,
    pub freed_space_table: UdfShortAd,
    pub freed_space_bitmap: UdfShortAd,
}

impl UdfPartitionHeaderDescriptor {
    pub fn parse(data: &[u8]) -> Self {
        UdfPartitionHeaderDescriptor {
            unalloc_space_table: UdfShortAd::parse(&data[0..8]),
            unalloc_space_bitmap: UdfShortAd::parse(&data[8..16]),
            partition_integrity_table: UdfShortAd::parse(&data[16..24]),
            freed_space_table: UdfShortAd::parse(&data[24..32]),
            freed_space_bitmap: UdfShortAd::parse(&data[32..40]),
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![0u8; 128];
        out[0..8].copy_from_slice(&self.unalloc_space_table.record());
        out[8..16].copy_from_slice(&self.unalloc_space_bitmap.record());
        out[16..24].copy_from_slice(&self.partition_integrity_table.record());
        out[24..32].copy_from_slice(&self.freed_space_table.record());
        out[32..40].copy_from_slice(&self.freed_space_bitmap.record());
        out
    }
}

/// The Partition Descriptor (ECMA-167, Part 3, 10.5).
#[derive(Clone)]
pub struct UdfPartitionVolumeDescriptor {
    pub desc_tag: UdfTag,
    pub vol_desc_seqnum: u32,
    pub part_flags: u16,
    pub part_num: u16,
    pub part_contents: UdfEntityId,
    pub part_contents_use: UdfPartitionHeaderDescriptor,
    pub access_type: u32,
    pub part_start_location: u32,
    pub part_length: u32,
    pub impl_ident: UdfEntityId,
    pub implementation_use: [u8; 128],
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfPartitionVolumeDescriptor {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        let part_flags = LittleEndian::read_u16(&data[20..22]);
        if part_flags > 1 {
            return Err(Error::invalid_iso("invalid partition flags"));
        }
        let part_contents = UdfEntityId::parse(&data[24..56])?;
        if !matches!(
            &part_contents.identifier[..6],
            b"+FDC01" | b"+CD001" | b"+CDW02" | b"+NSR02" | b"+NSR03"
        ) {
            return Err(Error::invalid_iso(
                "partition contents identifier not '+FDC01', '+CD001', '+CDW02', '+NSR02', or '+NSR03'",
            ));
        }
        let access_type = LittleEndian::read_u32(&data[184..188]);
        if access_type > 0x1f {
            return Err(Error::invalid_iso("invalid UDF partition access type"));
        }
        Ok(UdfPartitionVolumeDescriptor {
            desc_tag,
            vol_desc_seqnum: LittleEndian::read_u32(&data[16..20]),
            part_flags,
            part_num: LittleEndian::read_u16(&data[22..24]),
            part_contents,
            part_contents_use: UdfPartitionHeaderDescriptor::parse(&data[56..184]),
            access_type,
            part_start_location: LittleEndian::read_u32(&data[188..192]),
            part_length: LittleEndian::read_u32(&data[192..196]),
            impl_ident: UdfEntityId::parse(&data[196..228])?,
            implementation_use: data[228..356].try_into().unwrap(),
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new(version: u8) -> Result<Self> {
        let part_contents = match version {
            2 => UdfEntityId::new(2, b"+NSR02", b"")?,
            3 => UdfEntityId::new(2, b"+NSR03", b"")?,
            _ => return Err(Error::internal("invalid NSR version requested")),
        };
        Ok(UdfPartitionVolumeDescriptor {
            desc_tag: UdfTag::new(5, 0),
            vol_desc_seqnum: 2,
            part_flags: 1,
            part_num: 0,
            part_contents,
            part_contents_use: UdfPartitionHeaderDescriptor::default(),
            access_type: 1,
            part_start_location: 0,
            part_length: 3,
            impl_ident: UdfEntityId::ours(),
            implementation_use: [0u8; 128],
            orig_extent_loc: None,
            new_extent_loc: None,
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 496];
        LittleEndian::write_u32(&mut body[0..4], self.vol_desc_seqnum);
        LittleEndian::write_u16(&mut body[4..6], self.part_flags);
        LittleEndian::write_u16(&mut body[6..8], self.part_num);
        body[8..40].copy_from_slice(&self.part_contents.record());
        body[40..168].copy_from_slice(&self.part_contents_use.record());
        LittleEndian::write_u32(&mut body[168..172], self.access_type);
        LittleEndian::write_u32(&mut body[172..176], self.part_start_location);
        LittleEndian::write_u32(&mut body[176..180], self.part_length);
        body[180..212].copy_from_slice(&self.impl_ident.record());
        body[212..340].copy_from_slice(&self.implementation_use);
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub fn set_extent_location(&mut self, extent: u32) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = extent;
    }

    pub fn set_start_location(&mut self, extent: u32) {
        self.part_start_location = extent;
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.vol_desc_seqnum == other.vol_desc_seqnum
            && self.part_flags == other.part_flags
            && self.part_num == other.part_num
            && self.part_contents == other.part_contents
            && self.part_contents_use == other.part_contents_use
            && self.access_type == other.access_type
            && self.part_start_location == other.part_start_location
            && self.part_length == other.part_length
            && self.impl_ident == other.impl_ident
            && self.implementation_use == other.implementation_use
    }
}

/// One partition map in a Logical Volume Descriptor (ECMA-167, Part 3,
/// 10.7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UdfPartitionMap {
    Type0 { data: Vec<u8> },
    Type1 { vol_seqnum: u16, part_num: u16 },
    Type2 { part_ident: [u8; 62] },
}

impl UdfPartitionMap {
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(Error::invalid_iso("UDF partition map too short"));
        }
        let map_type = data[0];
        let map_len = data[1] as usize;
        if map_len < 2 || map_len > data.len() {
            return Err(Error::invalid_iso("partition map goes beyond end of data, ISO corrupt"));
        }
        let map = match map_type {
            0 => UdfPartitionMap::Type0 {
                data: data[2..map_len].to_vec(),
            },
            1 => {
                if map_len != 6 {
                    return Err(Error::invalid_iso("UDF type 1 partition map length is not 6"));
                }
                UdfPartitionMap::Type1 {
                    vol_seqnum: LittleEndian::read_u16(&data[2..4]),
                    part_num: LittleEndian::read_u16(&data[4..6]),
                }
            }
            2 => {
                if map_len != 64 {
                    return Err(Error::invalid_iso("UDF type 2 partition map length is not 64"));
                }
                UdfPartitionMap::Type2 {
                    part_ident: data[2..64].try_into().unwrap(),
                }
            }
            _ => return Err(Error::invalid_iso("unsupported partition map type")),
        };
        Ok((map, map_len))
    }

    pub fn new_type1() -> Self {
        UdfPartitionMap::Type1 {
            vol_seqnum: 1,
            part_num: 0,
        }
    }

    pub fn record(&self) -> Vec<u8> {
        match self {
            UdfPartitionMap::Type0 { data } => {
                let mut out = vec![0, (2 + data.len()) as u8];
                out.extend_from_slice(data);
                out
            }
            UdfPartitionMap::Type1 {
                vol_seqnum,
                part_num,
            } => {
                let mut out = vec![1, 6, 0, 0, 0, 0];
                LittleEndian::write_u16(&mut out[2..4], *vol_seqnum);
                LittleEndian::write_u16(&mut out[4..6], *part_num);
                out
            }
            UdfPartitionMap::Type2 { part_ident } => {
                let mut out = vec![2, 64];
                out.extend_from_slice(part_ident);
                out
            }
        }
    }
}

/// The Logical Volume Descriptor (ECMA-167, Part 3, 10.6).
#[derive(Clone)]
pub struct UdfLogicalVolumeDescriptor {
    pub desc_tag: UdfTag,
    pub vol_desc_seqnum: u32,
    pub desc_char_set: UdfCharspec,
    pub logical_vol_ident: [u8; 128],
    pub domain_ident: UdfEntityId,
    pub logical_volume_contents_use: UdfLongAd,
    pub impl_ident: UdfEntityId,
    pub implementation_use: [u8; 128],
    pub integrity_sequence: UdfExtentAd,
    pub partition_maps: Vec<UdfPartitionMap>,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfLogicalVolumeDescriptor {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        let logical_block_size = LittleEndian::read_u32(&data[212..216]);
        if logical_block_size != 2048 {
            return Err(Error::invalid_iso("volume descriptor block size is not 2048"));
        }
        let domain_ident = UdfEntityId::parse(&data[216..248])?;
        if &domain_ident.identifier[..19] != b"*OSTA UDF Compliant" {
            return Err(Error::invalid_iso(
                "volume descriptor identifier not '*OSTA UDF Compliant'",
            ));
        }
        let map_table_length = LittleEndian::read_u32(&data[264..268]) as usize;
        let num_partition_maps = LittleEndian::read_u32(&data[268..272]);
        let map_data = &data[440..512];
        if map_table_length >= map_data.len() {
            return Err(Error::invalid_iso(
                "map table length greater than size of partition map data; ISO corrupt",
            ));
        }

        let mut partition_maps = Vec::new();
        let mut offset = 0usize;
        let mut left = map_table_length;
        for _ in 0..num_partition_maps {
            let (map, map_len) = UdfPartitionMap::parse(&map_data[offset..])?;
            if map_len > left {
                return Err(Error::invalid_iso(
                    "partition map goes beyond map table length, ISO corrupt",
                ));
            }
            partition_maps.push(map);
            offset += map_len;
            left -= map_len;
        }

        Ok(UdfLogicalVolumeDescriptor {
            desc_tag,
            vol_desc_seqnum: LittleEndian::read_u32(&data[16..20]),
            desc_char_set: UdfCharspec::parse(&data[20..84])?,
            logical_vol_ident: data[84..212].try_into().unwrap(),
            domain_ident,
            logical_volume_contents_use: UdfLongAd::parse(&data[248..264]),
            impl_ident: UdfEntityId::parse(&data[272..304])?,
            implementation_use: data[304..432].try_into().unwrap(),
            integrity_sequence: UdfExtentAd::parse(&data[432..440])?,
            partition_maps,
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new() -> Self {
        UdfLogicalVolumeDescriptor {
            desc_tag: UdfTag::new(6, 0),
            vol_desc_seqnum: 3,
            desc_char_set: UdfCharspec::osta_compressed(),
            logical_vol_ident: ostaunicode_zero_pad("CDROM", 128).try_into().unwrap(),
            domain_ident: UdfEntityId::new(0, b"*OSTA UDF Compliant", b"\x02\x01\x03").unwrap(),
            logical_volume_contents_use: UdfLongAd::new(4096, 0),
            impl_ident: UdfEntityId::ours(),
            implementation_use: [0u8; 128],
            integrity_sequence: UdfExtentAd::new(4096, 0),
            partition_maps: Vec::new(),
            orig_extent_loc: None,
            new_extent_loc: None,
        }
    }

    pub fn add_partition_map(&mut self, map: UdfPartitionMap) -> Result<()> {
        let total: usize = self.partition_maps.iter().map(|m| m.record().len()).sum();
        if total + map.record().len() > 72 {
            return Err(Error::internal("too many UDF partition maps"));
        }
        self.partition_maps.push(map);
        Ok(())
    }

    pub fn record(&self) -> Vec<u8> {
        let mut all_maps = Vec::new();
        for map in &self.partition_maps {
            all_maps.extend_from_slice(&map.record());
        }
        let mut body = vec![0u8; 496];
        LittleEndian::write_u32(&mut body[0..4], self.vol_desc_seqnum);
        body[4..68].copy_from_slice(&self.desc_char_set.record());
        body[68..196].copy_from_slice(&self.logical_vol_ident);
        LittleEndian::write_u32(&mut body[196..200], 2048);
        body[200..232].copy_from_slice(&self.domain_ident.record());
        body[232..248].copy_from_slice(&self.logical_volume_contents_use.record());
        LittleEndian::write_u32(&mut body[248..252], all_maps.len() as u32);
        LittleEndian::write_u32(&mut body[252..256], self.partition_maps.len() as u32);
        body[256..288].copy_from_slice(&self.impl_ident.record());
        body[288..416].copy_from_slice(&self.implementation_use);
        body[416..424].copy_from_slice(&self.integrity_sequence.record());
        body[424..424 + all_maps.len()].copy_from_slice(&all_maps);
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub fn set_extent_location(&mut self, extent: u32) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = extent;
    }

    pub fn set_integrity_location(&mut self, extent: u32) {
        self.integrity_sequence.extent_location = extent;
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.vol_desc_seqnum == other.vol_desc_seqnum
            && self.desc_char_set == other.desc_char_set
            && self.logical_vol_ident == other.logical_vol_ident
            && self.implementation_use == other.implementation_use
            && self.integrity_sequence == other.integrity_sequence
            && self.domain_ident == other.domain_ident
            && self.impl_ident == other.impl_ident
            && self.logical_volume_contents_use == other.logical_volume_contents_use
            && self.partition_maps == other.partition_maps
    }
}

/// The Unallocated Space Descriptor (ECMA-167, Part 3, 10.8).
#[derive(Clone)]
pub struct UdfUnallocatedSpaceDescriptor {
    pub desc_tag: UdfTag,
    pub vol_desc_seqnum: u32,
    pub alloc_descs: Vec<UdfExtentAd>,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfUnallocatedSpaceDescriptor {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        let num = LittleEndian::read_u32(&data[20..24]) as usize;
        if num * 8 > 488 {
            return Err(Error::invalid_iso("too many allocation descriptors"));
        }
        let mut alloc_descs = Vec::with_capacity(num);
        for i in 0..num {
            let off = 24 + i * 8;
            alloc_descs.push(UdfExtentAd::parse(&data[off..off + 8])?);
        }
        Ok(UdfUnallocatedSpaceDescriptor {
            desc_tag,
            vol_desc_seqnum: LittleEndian::read_u32(&data[16..20]),
            alloc_descs,
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new() -> Self {
        UdfUnallocatedSpaceDescriptor {
            desc_tag: UdfTag::new(7, 0),
            vol_desc_seqnum: 4,
            alloc_descs: Vec::new(),
            orig_extent_loc: None,
            new_extent_loc: None,
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 496];
        LittleEndian::write_u32(&mut body[0..4], self.vol_desc_seqnum);
        LittleEndian::write_u32(&mut body[4..8], self.alloc_descs.len() as u32);
        for (i, desc) in self.alloc_descs.iter().enumerate() {
            let off = 8 + i * 8;
            body[off..off + 8].copy_from_slice(&desc.record());
        }
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub fn set_extent_location(&mut self, extent: u32) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = extent;
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.vol_desc_seqnum == other.vol_desc_seqnum && self.alloc_descs == other.alloc_descs
    }
}

/// The Terminating Descriptor (ECMA-167, Part 3, 10.9).
#[derive(Clone)]
pub struct UdfTerminatingDescriptor {
    pub desc_tag: UdfTag,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfTerminatingDescriptor {
    pub fn parse(extent: u32, desc_tag: UdfTag) -> Self {
        UdfTerminatingDescriptor {
            desc_tag,
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        }
    }

    pub fn new() -> Self {
        UdfTerminatingDescriptor {
            desc_tag: UdfTag::new(8, 0),
            orig_extent_loc: None,
            new_extent_loc: None,
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let body = vec![0u8; 496];
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc.or(self.orig_extent_loc).unwrap_or(0)
    }

    /// Terminators inside a partition carry partition-relative tag
    /// locations.
    pub fn set_extent_location(&mut self, extent: u32, tag_location: Option<u32>) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = tag_location.unwrap_or(extent);
    }
}

/// The contents-use header of the LVID (ECMA-167, Part 4, 14.15).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdfLogicalVolumeHeaderDescriptor {
    pub unique_id: u64,
}

impl UdfLogicalVolumeHeaderDescriptor {
    pub fn parse(data: &[u8]) -> Self {
        UdfLogicalVolumeHeaderDescriptor {
            unique_id: LittleEndian::read_u64(&data[0..8]),
        }
    }

    pub fn new() -> Self {
        UdfLogicalVolumeHeaderDescriptor { unique_id: 261 }
    }

    pub fn record(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        LittleEndian::write_u64(&mut out[0..8], self.unique_id);
        out
    }
}

/// The implementation-use tail of the LVID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdfLogicalVolumeImplementationUse {
    pub impl_id: UdfEntityId,
    pub num_files: u32,
    pub num_dirs: u32,
    pub min_udf_read_revision: u16,
    pub min_udf_write_revision: u16,
    pub max_udf_write_revision: u16,
    pub impl_use: Vec<u8>,
}

impl UdfLogicalVolumeImplementationUse {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 46 {
            return Err(Error::invalid_iso("UDF LVID implementation use too short"));
        }
        Ok(UdfLogicalVolumeImplementationUse {
            impl_id: UdfEntityId::parse(&data[0..32])?,
            num_files: LittleEndian::read_u32(&data[32..36]),
            num_dirs: LittleEndian::read_u32(&data[36..40]),
            min_udf_read_revision: LittleEndian::read_u16(&data[40..42]),
            min_udf_write_revision: LittleEndian::read_u16(&data[42..44]),
            max_udf_write_revision: LittleEndian::read_u16(&data[44..46]),
            impl_use: data[46..].to_vec(),
        })
    }

    pub fn new() -> Self {
        UdfLogicalVolumeImplementationUse {
            impl_id: UdfEntityId::ours(),
            num_files: 0,
            num_dirs: 1,
            // 0x102, i.e. revision 2.58-style encoding of UDF 2.58;
            // matches what mastering tools write for 2.01 media.
            min_udf_read_revision: 258,
            min_udf_write_revision: 258,
            max_udf_write_revision: 258,
            impl_use: vec![0u8; 378],
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![0u8; 46];
        out[0..32].copy_from_slice(&self.impl_id.record());
        LittleEndian::write_u32(&mut out[32..36], self.num_files);
        LittleEndian::write_u32(&mut out[36..40], self.num_dirs);
        LittleEndian::write_u16(&mut out[40..42], self.min_udf_read_revision);
        LittleEndian::write_u16(&mut out[42..44], self.min_udf_write_revision);
        LittleEndian::write_u16(&mut out[44..46], self.max_udf_write_revision);
        out.extend_from_slice(&self.impl_use);
        out
    }
}

/// The Logical Volume Integrity Descriptor (ECMA-167, Part 3, 10.10).
pub struct UdfLogicalVolumeIntegrityDescriptor {
    pub desc_tag: UdfTag,
    pub recording_date: UdfTimestamp,
    pub integrity_type: u32,
    pub next_integrity_extent: UdfExtentAd,
    pub logical_volume_contents_use: UdfLogicalVolumeHeaderDescriptor,
    pub free_space_tables: Vec<u32>,
    pub size_tables: Vec<u32>,
    pub length_impl_use: u32,
    pub logical_volume_impl_use: UdfLogicalVolumeImplementationUse,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfLogicalVolumeIntegrityDescriptor {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        let integrity_type = LittleEndian::read_u32(&data[28..32]);
        if integrity_type > 1 {
            return Err(Error::invalid_iso("logical volume integrity type not 0 or 1"));
        }
        let num_partitions = LittleEndian::read_u32(&data[72..76]) as usize;
        let length_impl_use = LittleEndian::read_u32(&data[76..80]);
        let end = &data[80..512];
        if num_partitions * 8 + length_impl_use as usize > end.len() {
            return Err(Error::invalid_iso(
                "UDF logical volume integrity specified an implementation use that is too large",
            ));
        }
        let mut free_space_tables = Vec::with_capacity(num_partitions);
        let mut size_tables = Vec::with_capacity(num_partitions);
        let mut off = 0usize;
        for _ in 0..num_partitions {
            free_space_tables.push(LittleEndian::read_u32(&end[off..off + 4]));
            off += 4;
        }
        for _ in 0..num_partitions {
            size_tables.push(LittleEndian::read_u32(&end[off..off + 4]));
            off += 4;
        }
        Ok(UdfLogicalVolumeIntegrityDescriptor {
            desc_tag,
            recording_date: UdfTimestamp::parse(&data[16..28])?,
            integrity_type,
            next_integrity_extent: UdfExtentAd::parse(&data[32..40])?,
            logical_volume_contents_use: UdfLogicalVolumeHeaderDescriptor::parse(&data[40..72]),
            free_space_tables,
            size_tables,
            length_impl_use,
            logical_volume_impl_use: UdfLogicalVolumeImplementationUse::parse(&end[off..])?,
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new() -> Self {
        UdfLogicalVolumeIntegrityDescriptor {
            desc_tag: UdfTag::new(9, 0),
            recording_date: UdfTimestamp::now(),
            integrity_type: 1,
            next_integrity_extent: UdfExtentAd::default(),
            logical_volume_contents_use: UdfLogicalVolumeHeaderDescriptor::new(),
            free_space_tables: vec![0],
            size_tables: vec![3],
            length_impl_use: 46,
            logical_volume_impl_use: UdfLogicalVolumeImplementationUse::new(),
            orig_extent_loc: None,
            new_extent_loc: None,
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 496];
        body[0..12].copy_from_slice(&self.recording_date.record());
        LittleEndian::write_u32(&mut body[12..16], self.integrity_type);
        body[16..24].copy_from_slice(&self.next_integrity_extent.record());
        body[24..56].copy_from_slice(&self.logical_volume_contents_use.record());
        LittleEndian::write_u32(&mut body[56..60], self.free_space_tables.len() as u32);
        LittleEndian::write_u32(&mut body[60..64], self.length_impl_use);
        let mut off = 64;
        for table in &self.free_space_tables {
            LittleEndian::write_u32(&mut body[off..off + 4], *table);
            off += 4;
        }
        for table in &self.size_tables {
            LittleEndian::write_u32(&mut body[off..off + 4], *table);
            off += 4;
        }
        let impl_use = self.logical_volume_impl_use.record();
        let avail = 496 - off;
        let take = impl_use.len().min(avail);
        body[off..off + take].copy_from_slice(&impl_use[..take]);
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub fn set_extent_location(&mut self, extent: u32) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = extent;
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc.or(self.orig_extent_loc).unwrap_or(0)
    }
}

/// The File Set Descriptor (ECMA-167, Part 4, 14.1).
pub struct UdfFileSetDescriptor {
    pub desc_tag: UdfTag,
    pub recording_date: UdfTimestamp,
    pub file_set_num: u32,
    pub log_vol_char_set: UdfCharspec,
    pub log_vol_ident: [u8; 128],
    pub file_set_char_set: UdfCharspec,
    pub file_set_ident: [u8; 32],
    pub copyright_file_ident: [u8; 32],
    pub abstract_file_ident: [u8; 32],
    pub root_dir_icb: UdfLongAd,
    pub domain_ident: UdfEntityId,
    pub next_extent: UdfLongAd,
    pub system_stream_dir_icb: UdfLongAd,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfFileSetDescriptor {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        let interchange_level = LittleEndian::read_u16(&data[28..30]);
        let max_interchange_level = LittleEndian::read_u16(&data[30..32]);
        let char_set_list = LittleEndian::read_u32(&data[32..36]);
        let max_char_set_list = LittleEndian::read_u32(&data[36..40]);
        let file_set_desc_num = LittleEndian::read_u32(&data[44..48]);
        if interchange_level != 3
            || max_interchange_level != 3
            || char_set_list != 1
            || max_char_set_list != 1
            || file_set_desc_num != 0
        {
            return Err(Error::invalid_iso("unsupported UDF file set descriptor fields"));
        }
        let domain_ident = UdfEntityId::parse(&data[416..448])?;
        if &domain_ident.identifier[..19] != b"*OSTA UDF Compliant" {
            return Err(Error::invalid_iso(
                "file set descriptor identifier not '*OSTA UDF Compliant'",
            ));
        }
        Ok(UdfFileSetDescriptor {
            desc_tag,
            recording_date: UdfTimestamp::parse(&data[16..28])?,
            file_set_num: LittleEndian::read_u32(&data[40..44]),
            log_vol_char_set: UdfCharspec::parse(&data[48..112])?,
            log_vol_ident: data[112..240].try_into().unwrap(),
            file_set_char_set: UdfCharspec::parse(&data[240..304])?,
            file_set_ident: data[304..336].try_into().unwrap(),
            copyright_file_ident: data[336..368].try_into().unwrap(),
            abstract_file_ident: data[368..400].try_into().unwrap(),
            root_dir_icb: UdfLongAd::parse(&data[400..416]),
            domain_ident,
            next_extent: UdfLongAd::parse(&data[448..464]),
            system_stream_dir_icb: UdfLongAd::parse(&data[464..480]),
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new() -> Self {
        UdfFileSetDescriptor {
            desc_tag: UdfTag::new(256, 0),
            recording_date: UdfTimestamp::now(),
            file_set_num: 0,
            log_vol_char_set: UdfCharspec::osta_compressed(),
            log_vol_ident: ostaunicode_zero_pad("CDROM", 128).try_into().unwrap(),
            file_set_char_set: UdfCharspec::osta_compressed(),
            file_set_ident: ostaunicode_zero_pad("CDROM", 32).try_into().unwrap(),
            copyright_file_ident: [0u8; 32],
            abstract_file_ident: [0u8; 32],
            root_dir_icb: UdfLongAd::new(2048, 2),
            domain_ident: UdfEntityId::new(0, b"*OSTA UDF Compliant", b"\x02\x01\x03").unwrap(),
            next_extent: UdfLongAd::new(0, 0),
            system_stream_dir_icb: UdfLongAd::new(0, 0),
            orig_extent_loc: None,
            new_extent_loc: None,
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 496];
        body[0..12].copy_from_slice(&self.recording_date.record());
        LittleEndian::write_u16(&mut body[12..14], 3);
        LittleEndian::write_u16(&mut body[14..16], 3);
        LittleEndian::write_u32(&mut body[16..20], 1);
        LittleEndian::write_u32(&mut body[20..24], 1);
        LittleEndian::write_u32(&mut body[24..28], self.file_set_num);
        LittleEndian::write_u32(&mut body[28..32], 0);
        body[32..96].copy_from_slice(&self.log_vol_char_set.record());
        body[96..224].copy_from_slice(&self.log_vol_ident);
        body[224..288].copy_from_slice(&self.file_set_char_set.record());
        body[288..320].copy_from_slice(&self.file_set_ident);
        body[320..352].copy_from_slice(&self.copyright_file_ident);
        body[352..384].copy_from_slice(&self.abstract_file_ident);
        body[384..400].copy_from_slice(&self.root_dir_icb.record());
        body[400..432].copy_from_slice(&self.domain_ident.record());
        body[432..448].copy_from_slice(&self.next_extent.record());
        body[448..464].copy_from_slice(&self.system_stream_dir_icb.record());
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub fn set_extent_location(&mut self, extent: u32, tag_location: u32) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = tag_location;
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc.or(self.orig_extent_loc).unwrap_or(0)
    }
}

/// File types stored in an ICB tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UdfFileType {
    Dir,
    File,
    Symlink,
}

impl UdfFileType {
    fn as_byte(self) -> u8 {
        match self {
            UdfFileType::Dir => 4,
            UdfFileType::File => 5,
            UdfFileType::Symlink => 12,
        }
    }
}

/// The ICB tag (ECMA-167, Part 4, 14.6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdfIcbTag {
    pub prior_num_direct_entries: u32,
    pub strategy_type: u16,
    pub strategy_param: u16,
    pub max_num_entries: u16,
    pub file_type: u8,
    pub parent_icb: UdfLbAddr,
    pub flags: u16,
}

impl UdfIcbTag {
    pub const LENGTH: usize = 20;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let strategy_type = LittleEndian::read_u16(&data[4..6]);
        if !matches!(strategy_type, 4 | 4096) {
            return Err(Error::invalid_iso("UDF ICB tag invalid strategy type"));
        }
        if data[10] != 0 {
            return Err(Error::invalid_iso("UDF ICB tag reserved not 0"));
        }
        Ok(UdfIcbTag {
            prior_num_direct_entries: LittleEndian::read_u32(&data[0..4]),
            strategy_type,
            strategy_param: LittleEndian::read_u16(&data[6..8]),
            max_num_entries: LittleEndian::read_u16(&data[8..10]),
            file_type: data[11],
            parent_icb: UdfLbAddr::parse(&data[12..18]),
            flags: LittleEndian::read_u16(&data[18..20]),
        })
    }

    pub fn new(file_type: UdfFileType) -> Self {
        UdfIcbTag {
            prior_num_direct_entries: 0,
            strategy_type: 4,
            strategy_param: 0,
            max_num_entries: 1,
            file_type: file_type.as_byte(),
            parent_icb: UdfLbAddr::default(),
            // Short allocation descriptors, non-relocatable, archive.
            flags: 0x230,
        }
    }

    pub fn record(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        LittleEndian::write_u32(&mut out[0..4], self.prior_num_direct_entries);
        LittleEndian::write_u16(&mut out[4..6], self.strategy_type);
        LittleEndian::write_u16(&mut out[6..8], self.strategy_param);
        LittleEndian::write_u16(&mut out[8..10], self.max_num_entries);
        out[11] = self.file_type;
        out[12..18].copy_from_slice(&self.parent_icb.record());
        LittleEndian::write_u16(&mut out[18..20], self.flags);
        out
    }
}

/// A short allocation descriptor (ECMA-167, Part 4, 14.14.1).  The high
/// two bits of the length field are the extent type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UdfShortAd {
    pub extent_length: u32,
    pub extent_type: u8,
    pub log_block_num: u32,
}

impl UdfShortAd {
    pub const LENGTH: usize = 8;

    pub fn parse(data: &[u8]) -> Self {
        let raw = LittleEndian::read_u32(&data[0..4]);
        UdfShortAd {
            extent_length: raw & 0x3fff_ffff,
            extent_type: ((raw & 0xc000_0000) >> 30) as u8,
            log_block_num: LittleEndian::read_u32(&data[4..8]),
        }
    }

    pub fn new(length: u32) -> Result<Self> {
        if length > 0x3fff_ffff {
            return Err(Error::internal(
                "UDF short AD length must be less than or equal to 0x3fffffff",
            ));
        }
        Ok(UdfShortAd {
            extent_length: length,
            extent_type: 0,
            log_block_num: 0,
        })
    }

    pub fn record(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        let raw = self.extent_length | (u32::from(self.extent_type) << 30);
        LittleEndian::write_u32(&mut out[0..4], raw);
        LittleEndian::write_u32(&mut out[4..8], self.log_block_num);
        out
    }
}

/// A long allocation descriptor (ECMA-167, Part 4, 14.14.2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UdfLongAd {
    pub extent_length: u32,
    pub log_block_num: u32,
    pub part_ref_num: u16,
    pub impl_use: [u8; 6],
}

impl UdfLongAd {
    pub const LENGTH: usize = 16;

    pub fn parse(data: &[u8]) -> Self {
        UdfLongAd {
            extent_length: LittleEndian::read_u32(&data[0..4]),
            log_block_num: LittleEndian::read_u32(&data[4..8]),
            part_ref_num: LittleEndian::read_u16(&data[8..10]),
            impl_use: data[10..16].try_into().unwrap(),
        }
    }

    pub fn new(length: u32, blocknum: u32) -> Self {
        UdfLongAd {
            extent_length: length,
            log_block_num: blocknum,
            part_ref_num: 0,
            impl_use: [0u8; 6],
        }
    }

    pub fn record(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        LittleEndian::write_u32(&mut out[0..4], self.extent_length);
        LittleEndian::write_u32(&mut out[4..8], self.log_block_num);
        LittleEndian::write_u16(&mut out[8..10], self.part_ref_num);
        out[10..16].copy_from_slice(&self.impl_use);
        out
    }

    /// Point this AD at a new block: the tag-relative block number goes
    /// in the body, the absolute one in the implementation use.
    pub fn set_extent_location(&mut self, new_location: u32, tag_location: u32) {
        self.log_block_num = tag_location;
        let mut impl_use = [0u8; 6];
        LittleEndian::write_u32(&mut impl_use[2..6], new_location);
        self.impl_use = impl_use;
    }
}

/// The pseudo-AD for ICB flags type 3: the data is embedded in the file
/// entry itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UdfInlineAd {
    pub extent_length: u32,
    pub log_block_num: u32,
    pub offset: usize,
}

/// The allocation descriptors a file entry may carry, keyed by the low
/// three bits of its ICB flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationDescriptor {
    Short(UdfShortAd),
    Long(UdfLongAd),
    Inline(UdfInlineAd),
}

impl AllocationDescriptor {
    pub fn length(&self) -> usize {
        match self {
            AllocationDescriptor::Short(_) => UdfShortAd::LENGTH,
            AllocationDescriptor::Long(_) => UdfLongAd::LENGTH,
            AllocationDescriptor::Inline(ad) => ad.extent_length as usize,
        }
    }

    pub fn record(&self) -> Vec<u8> {
        match self {
            AllocationDescriptor::Short(ad) => ad.record().to_vec(),
            AllocationDescriptor::Long(ad) => ad.record().to_vec(),
            AllocationDescriptor::Inline(_) => Vec::new(),
        }
    }

    pub fn extent_length(&self) -> u32 {
        match self {
            AllocationDescriptor::Short(ad) => ad.extent_length,
            AllocationDescriptor::Long(ad) => ad.extent_length,
            AllocationDescriptor::Inline(ad) => ad.extent_length,
        }
    }

    pub fn set_extent_length(&mut self, length: u32) {
        match self {
            AllocationDescriptor::Short(ad) => ad.extent_length = length,
            AllocationDescriptor::Long(ad) => ad.extent_length = length,
            AllocationDescriptor::Inline(ad) => ad.extent_length = length,
        }
    }

    pub fn log_block_num(&self) -> u32 {
        match self {
            AllocationDescriptor::Short(ad) => ad.log_block_num,
            AllocationDescriptor::Long(ad) => ad.log_block_num,
            AllocationDescriptor::Inline(ad) => ad.log_block_num,
        }
    }

    pub fn set_extent_location(&mut self, new_location: u32, tag_location: u32) {
        match self {
            AllocationDescriptor::Short(ad) => ad.log_block_num = tag_location,
            AllocationDescriptor::Long(ad) => ad.set_extent_location(new_location, tag_location),
            AllocationDescriptor::Inline(ad) => ad.log_block_num = tag_location,
        }
    }
}

/// Decode the allocation descriptor area of a file entry according to
/// `icb_flags & 0x7`.
pub fn parse_allocation_descriptors(
    icb_flags: u16,
    data: &[u8],
    length: usize,
    start_offset: usize,
    extent: u32,
) -> Result<Vec<AllocationDescriptor>> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    match icb_flags & 0x7 {
        0 => {
            while offset < length {
                out.push(AllocationDescriptor::Short(UdfShortAd::parse(
                    &data[offset..offset + UdfShortAd::LENGTH],
                )));
                offset += UdfShortAd::LENGTH;
            }
        }
        1 => {
            while offset < length {
                out.push(AllocationDescriptor::Long(UdfLongAd::parse(
                    &data[offset..offset + UdfLongAd::LENGTH],
                )));
                offset += UdfLongAd::LENGTH;
            }
        }
        2 => {
            return Err(Error::internal(
                "UDF allocation descriptor of type 2 (extended) not yet supported",
            ));
        }
        3 => {
            out.push(AllocationDescriptor::Inline(UdfInlineAd {
                extent_length: length as u32,
                log_block_num: extent,
                offset: start_offset,
            }));
        }
        _ => return Err(Error::invalid_iso("UDF allocation descriptor type invalid")),
    }
    Ok(out)
}

const FE_HEADER_LENGTH: usize = 176;
const EFE_HEADER_LENGTH: usize = 216;

/// A File Entry or Extended File Entry (ECMA-167, Part 4, 14.9 and
/// 14.17).  The extended form carries the three extra fields; one type
/// keeps the tree uniform.
pub struct UdfFileEntry {
    pub desc_tag: UdfTag,
    pub icb_tag: UdfIcbTag,
    pub uid: u32,
    pub gid: u32,
    pub perms: u32,
    pub file_link_count: u16,
    pub info_len: u64,
    pub log_blocks_recorded: u64,
    pub access_time: UdfTimestamp,
    pub mod_time: UdfTimestamp,
    pub attr_time: UdfTimestamp,
    pub extended_attr_icb: UdfLongAd,
    pub impl_ident: UdfEntityId,
    pub unique_id: u64,
    pub extended_attrs: Vec<u8>,
    pub alloc_descs: Vec<AllocationDescriptor>,
    /// Raw embedded data when the ICB flags select inline (type 3)
    /// allocation; re-emitted verbatim.
    pub inline_data: Vec<u8>,
    /// Extended File Entry extras, present when this is an EFE.
    pub extended: Option<UdfExtendedFileEntryFields>,
    pub fi_descs: Vec<UdfFileIdentifierDescriptor>,
    pub parent: Option<FeId>,
    pub inode: Option<InodeId>,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

/// The fields an Extended File Entry adds over a File Entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdfExtendedFileEntryFields {
    pub obj_size: u64,
    pub creation_time: UdfTimestamp,
    pub stream_icb: UdfLongAd,
}

impl UdfFileEntry {
    pub fn parse(data: &[u8], extent: u32, parent: Option<FeId>, desc_tag: UdfTag) -> Result<Self> {
        let extended = desc_tag.tag_ident == 266;
        let min_len = if extended { EFE_HEADER_LENGTH } else { FE_HEADER_LENGTH };
        if data.len() < min_len {
            return Err(Error::invalid_iso("UDF file entry too short"));
        }
        let icb_tag = UdfIcbTag::parse(&data[16..36])?;
        let uid = LittleEndian::read_u32(&data[36..40]);
        let gid = LittleEndian::read_u32(&data[40..44]);
        let perms = LittleEndian::read_u32(&data[44..48]);
        let file_link_count = LittleEndian::read_u16(&data[48..50]);
        let record_format = data[50];
        let record_display_attrs = data[51];
        let record_len = LittleEndian::read_u32(&data[52..56]);
        if record_format != 0 {
            return Err(Error::invalid_iso("file entry record format is not 0"));
        }
        if record_display_attrs != 0 {
            return Err(Error::invalid_iso("file entry record display attributes is not 0"));
        }
        if record_len != 0 {
            return Err(Error::invalid_iso("file entry record length is not 0"));
        }
        let info_len = LittleEndian::read_u64(&data[56..64]);

        let (
            log_blocks_recorded,
            access_time,
            mod_time,
            attr_time,
            checkpoint,
            extended_attr_icb,
            impl_ident,
            unique_id,
            len_extended_attrs,
            len_alloc_descs,
            header_len,
            extended_fields,
        );
        if extended {
            let obj_size = LittleEndian::read_u64(&data[64..72]);
            log_blocks_recorded = LittleEndian::read_u64(&data[72..80]);
            access_time = UdfTimestamp::parse(&data[80..92])?;
            mod_time = UdfTimestamp::parse(&data[92..104])?;
            let creation_time = UdfTimestamp::parse(&data[104..116])?;
            attr_time = UdfTimestamp::parse(&data[116..128])?;
            checkpoint = LittleEndian::read_u32(&data[128..132]);
            extended_attr_icb = UdfLongAd::parse(&data[136..152]);
            let stream_icb = UdfLongAd::parse(&data[152..168]);
            impl_ident = UdfEntityId::parse(&data[168..200])?;
            unique_id = LittleEndian::read_u64(&data[200..208]);
            len_extended_attrs = LittleEndian::read_u32(&data[208..212]) as usize;
            len_alloc_descs = LittleEndian::read_u32(&data[212..216]) as usize;
            header_len = EFE_HEADER_LENGTH;
            extended_fields = Some(UdfExtendedFileEntryFields {
                obj_size,
                creation_time,
                stream_icb,
            });
        } else {
            log_blocks_recorded = LittleEndian::read_u64(&data[64..72]);
            access_time = UdfTimestamp::parse(&data[72..84])?;
            mod_time = UdfTimestamp::parse(&data[84..96])?;
            attr_time = UdfTimestamp::parse(&data[96..108])?;
            checkpoint = LittleEndian::read_u32(&data[108..112]);
            extended_attr_icb = UdfLongAd::parse(&data[112..128]);
            impl_ident = UdfEntityId::parse(&data[128..160])?;
            unique_id = LittleEndian::read_u64(&data[160..168]);
            len_extended_attrs = LittleEndian::read_u32(&data[168..172]) as usize;
            len_alloc_descs = LittleEndian::read_u32(&data[172..176]) as usize;
            header_len = FE_HEADER_LENGTH;
            extended_fields = None;
        }
        if checkpoint != 1 {
            return Err(Error::invalid_iso("only single-checkpoint file entries are supported"));
        }

        let ea_end = header_len + len_extended_attrs;
        let extended_attrs = data[header_len..ea_end].to_vec();
        let alloc_descs = parse_allocation_descriptors(
            icb_tag.flags,
            &data[ea_end..],
            len_alloc_descs,
            ea_end,
            extent,
        )?;
        let inline_data = if icb_tag.flags & 0x7 == 3 {
            data[ea_end..ea_end + len_alloc_descs].to_vec()
        } else {
            Vec::new()
        };

        Ok(UdfFileEntry {
            desc_tag,
            icb_tag,
            uid,
            gid,
            perms,
            file_link_count,
            info_len,
            log_blocks_recorded,
            access_time,
            mod_time,
            attr_time,
            extended_attr_icb,
            impl_ident,
            unique_id,
            extended_attrs,
            alloc_descs,
            inline_data,
            extended: extended_fields,
            fi_descs: Vec::new(),
            parent,
            inode: None,
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    /// Create a new File Entry.  Directories get one short AD covering
    /// their identifier area; files get a chain of short ADs capped at
    /// `MAX_ALLOC_EXTENT_LENGTH` each.
    pub fn new(
        length: u64,
        file_type: UdfFileType,
        parent: Option<FeId>,
        log_block_size: u32,
    ) -> Result<Self> {
        let mut alloc_descs = Vec::new();
        let (perms, file_link_count, info_len, log_blocks_recorded);
        if file_type == UdfFileType::Dir {
            perms = 5285;
            file_link_count = 0;
            info_len = 0;
            log_blocks_recorded = 1;
            alloc_descs.push(AllocationDescriptor::Short(UdfShortAd::new(length as u32)?));
        } else {
            perms = 4228;
            file_link_count = 1;
            info_len = length;
            log_blocks_recorded = ceiling_div(length, u64::from(log_block_size));
            let mut left = length;
            loop {
                let alloc_len = left.min(u64::from(MAX_ALLOC_EXTENT_LENGTH));
                alloc_descs.push(AllocationDescriptor::Short(UdfShortAd::new(alloc_len as u32)?));
                left -= alloc_len;
                if left == 0 {
                    break;
                }
            }
        }

        Ok(UdfFileEntry {
            desc_tag: UdfTag::new(261, 0),
            icb_tag: UdfIcbTag::new(file_type),
            // -1: unset.
            uid: u32::MAX,
            gid: u32::MAX,
            perms,
            file_link_count,
            info_len,
            log_blocks_recorded,
            access_time: UdfTimestamp::now(),
            mod_time: UdfTimestamp::now(),
            attr_time: UdfTimestamp::now(),
            extended_attr_icb: UdfLongAd::new(0, 0),
            impl_ident: UdfEntityId::ours(),
            unique_id: 0,
            extended_attrs: Vec::new(),
            alloc_descs,
            inline_data: Vec::new(),
            extended: None,
            fi_descs: Vec::new(),
            parent,
            inode: None,
            orig_extent_loc: None,
            new_extent_loc: None,
        })
    }

    pub fn is_dir(&self) -> bool {
        self.icb_tag.file_type == 4
    }

    pub fn is_file(&self) -> bool {
        self.icb_tag.file_type == 5
    }

    pub fn is_symlink(&self) -> bool {
        self.icb_tag.file_type == 12
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc.or(self.orig_extent_loc).unwrap_or(0)
    }

    pub fn set_extent_location(&mut self, extent: u32, tag_location: u32) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = tag_location;
        self.unique_id = u64::from(extent);
    }

    /// Spread this entry's data over consecutive blocks starting at the
    /// partition-relative `start`.
    pub fn set_data_location(&mut self, start: u32) {
        let mut current = start;
        for desc in &mut self.alloc_descs {
            desc.set_extent_location(current, current);
            current += 1;
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let len_alloc_descs: usize = self.alloc_descs.iter().map(AllocationDescriptor::length).sum();
        let header_len = if self.extended.is_some() {
            EFE_HEADER_LENGTH
        } else {
            FE_HEADER_LENGTH
        };
        let mut body = vec![0u8; header_len - 16];
        body[0..20].copy_from_slice(&self.icb_tag.record());
        LittleEndian::write_u32(&mut body[20..24], self.uid);
        LittleEndian::write_u32(&mut body[24..28], self.gid);
        LittleEndian::write_u32(&mut body[28..32], self.perms);
        LittleEndian::write_u16(&mut body[32..34], self.file_link_count);
        LittleEndian::write_u64(&mut body[40..48], self.info_len);
        match &self.extended {
            Some(ext) => {
                LittleEndian::write_u64(&mut body[48..56], ext.obj_size);
                LittleEndian::write_u64(&mut body[56..64], self.log_blocks_recorded);
                body[64..76].copy_from_slice(&self.access_time.record());
                body[76..88].copy_from_slice(&self.mod_time.record());
                body[88..100].copy_from_slice(&ext.creation_time.record());
                body[100..112].copy_from_slice(&self.attr_time.record());
                LittleEndian::write_u32(&mut body[112..116], 1);
                body[120..136].copy_from_slice(&self.extended_attr_icb.record());
                body[136..152].copy_from_slice(&ext.stream_icb.record());
                body[152..184].copy_from_slice(&self.impl_ident.record());
                LittleEndian::write_u64(&mut body[184..192], self.unique_id);
                LittleEndian::write_u32(&mut body[192..196], self.extended_attrs.len() as u32);
                LittleEndian::write_u32(&mut body[196..200], len_alloc_descs as u32);
            }
            None => {
                LittleEndian::write_u64(&mut body[48..56], self.log_blocks_recorded);
                body[56..68].copy_from_slice(&self.access_time.record());
                body[68..80].copy_from_slice(&self.mod_time.record());
                body[80..92].copy_from_slice(&self.attr_time.record());
                LittleEndian::write_u32(&mut body[92..96], 1);
                body[96..112].copy_from_slice(&self.extended_attr_icb.record());
                body[112..144].copy_from_slice(&self.impl_ident.record());
                LittleEndian::write_u64(&mut body[144..152], self.unique_id);
                LittleEndian::write_u32(&mut body[152..156], self.extended_attrs.len() as u32);
                LittleEndian::write_u32(&mut body[156..160], len_alloc_descs as u32);
            }
        }
        body.extend_from_slice(&self.extended_attrs);
        for desc in &self.alloc_descs {
            body.extend_from_slice(&desc.record());
        }
        body.extend_from_slice(&self.inline_data);
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    /// Add a file identifier to this directory entry and grow its
    /// identifier area.  Returns how many extents that added.
    pub fn add_file_ident_desc(
        &mut self,
        fi_desc: UdfFileIdentifierDescriptor,
        log_block_size: u32,
    ) -> Result<u32> {
        if self.icb_tag.file_type != 4 {
            return Err(Error::invalid_input("can only add a UDF file identifier to a directory"));
        }

        let num_bytes_to_add = UdfFileIdentifierDescriptor::length(fi_desc.fi.len());
        let is_dir = fi_desc.is_dir();
        self.fi_descs.push(fi_desc);

        let old_num_extents = if self.info_len > 0 {
            ceiling_div(self.info_len, u64::from(log_block_size))
        } else {
            0
        };
        self.info_len += num_bytes_to_add as u64;
        let new_num_extents = ceiling_div(self.info_len, u64::from(log_block_size));
        self.log_blocks_recorded = new_num_extents;

        if let Some(first) = self.alloc_descs.first_mut() {
            first.set_extent_length(self.info_len as u32);
        }
        if is_dir {
            self.file_link_count += 1;
        }

        Ok((new_num_extents - old_num_extents) as u32)
    }

    /// Track an identifier found while parsing, without resizing.
    pub fn track_file_ident_desc(&mut self, fi_desc: UdfFileIdentifierDescriptor) {
        self.fi_descs.push(fi_desc);
    }

    /// Remove the named identifier.  Directories must be empty (their
    /// file entry holds only the parent identifier).  Returns how many
    /// extents were released and the removed descriptor.
    pub fn remove_file_ident_desc_by_name(
        &mut self,
        name: &[u8],
        log_block_size: u32,
        target_is_empty: impl Fn(FeId) -> bool,
    ) -> Result<(u32, UdfFileIdentifierDescriptor)> {
        let index = self
            .fi_descs
            .iter()
            .position(|fid| !fid.is_parent() && fid.fi == name)
            .ok_or_else(|| Error::invalid_input("cannot find file to remove"))?;

        if self.fi_descs[index].is_dir() {
            let child_fe = self.fi_descs[index]
                .file_entry
                .ok_or_else(|| Error::internal("no UDF file entry for UDF file descriptor"))?;
            if !target_is_empty(child_fe) {
                return Err(Error::invalid_input("directory must be empty to remove it"));
            }
            self.file_link_count -= 1;
        }

        let old_num_extents = ceiling_div(self.info_len, u64::from(log_block_size));
        self.info_len -= UdfFileIdentifierDescriptor::length(self.fi_descs[index].fi.len()) as u64;
        let new_num_extents = ceiling_div(self.info_len, u64::from(log_block_size));
        if let Some(first) = self.alloc_descs.first_mut() {
            first.set_extent_length(self.info_len as u32);
        }

        let removed = self.fi_descs.remove(index);
        Ok(((old_num_extents - new_num_extents) as u32, removed))
    }

    /// Change the amount of data this entry describes, growing the last
    /// AD up to the cap and appending more as needed.
    pub fn set_data_length(&mut self, length: u64) -> Result<()> {
        use std::cmp::Ordering;

        match length.cmp(&self.info_len) {
            Ordering::Greater => {
                let mut len_diff = length - self.info_len;
                while len_diff > 0 {
                    let room = match self.alloc_descs.last() {
                        Some(last) => u64::from(MAX_ALLOC_EXTENT_LENGTH) - u64::from(last.extent_length()),
                        None => 0,
                    };
                    if room == 0 {
                        let chunk = len_diff.min(u64::from(MAX_ALLOC_EXTENT_LENGTH));
                        self.alloc_descs
                            .push(AllocationDescriptor::Short(UdfShortAd::new(chunk as u32)?));
                        len_diff -= chunk;
                    } else {
                        let grow = len_diff.min(room);
                        let last = self.alloc_descs.last_mut().unwrap();
                        last.set_extent_length(last.extent_length() + grow as u32);
                        len_diff -= grow;
                    }
                }
            }
            Ordering::Less => {
                let mut left = length;
                let mut needed = 0usize;
                while left > 0 {
                    let this_len = left.min(u64::from(MAX_ALLOC_EXTENT_LENGTH));
                    self.alloc_descs[needed].set_extent_length(this_len as u32);
                    needed += 1;
                    left -= this_len;
                }
                self.alloc_descs.truncate(needed.max(1));
                if length == 0 {
                    if let Some(first) = self.alloc_descs.first_mut() {
                        first.set_extent_length(0);
                    }
                }
            }
            Ordering::Equal => {}
        }
        self.info_len = length;
        Ok(())
    }

}

/// A File Identifier Descriptor (ECMA-167, Part 4, 14.4): one directory
/// entry, 4-byte padded on disc.
#[derive(Clone, Debug)]
pub struct UdfFileIdentifierDescriptor {
    pub desc_tag: UdfTag,
    pub file_characteristics: u8,
    pub fi: Vec<u8>,
    /// 0x08 for Latin-1 names, 0x10 for UCS-2-BE.  Parent identifiers
    /// have no name and no encoding byte.
    pub encoding: u8,
    pub isdir: bool,
    pub isparent: bool,
    pub icb: UdfLongAd,
    pub impl_use: Vec<u8>,
    /// The file entry this identifier points at.
    pub file_entry: Option<FeId>,
    pub parent: Option<FeId>,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfFileIdentifierDescriptor {
    const HEADER_LENGTH: usize = 38;

    fn pad(val: usize) -> usize {
        (4 * ceiling_div(val as u64, 4) as usize) - val
    }

    /// On-disc length of an identifier naming `namelen` bytes (plus its
    /// encoding byte when named).
    pub fn length(namelen: usize) -> usize {
        let namelen = if namelen > 0 { namelen + 1 } else { 0 };
        let to_add = Self::HEADER_LENGTH + namelen;
        to_add + Self::pad(to_add)
    }

    /// Parse one identifier; returns it and the bytes consumed
    /// (including padding).
    pub fn parse(
        data: &[u8],
        extent: u32,
        desc_tag: UdfTag,
        parent: Option<FeId>,
    ) -> Result<(Self, usize)> {
        if data.len() < Self::HEADER_LENGTH {
            return Err(Error::invalid_iso("UDF file identifier descriptor too short"));
        }
        if LittleEndian::read_u16(&data[16..18]) != 1 {
            return Err(Error::invalid_iso(
                "file identifier descriptor file version number not 1",
            ));
        }
        let file_characteristics = data[18];
        let len_fi = data[19] as usize;
        let icb = UdfLongAd::parse(&data[20..36]);
        let len_impl_use = LittleEndian::read_u16(&data[36..38]) as usize;

        let isdir = file_characteristics & 0x2 != 0;
        let isparent = file_characteristics & 0x8 != 0;

        if data.len() < Self::HEADER_LENGTH + len_impl_use + len_fi {
            return Err(Error::invalid_iso("UDF file identifier descriptor truncated"));
        }
        let mut start = Self::HEADER_LENGTH;
        let impl_use = data[start..start + len_impl_use].to_vec();
        start += len_impl_use;
        let end = start + len_fi;

        let (encoding, fi) = if isparent {
            (0x08, Vec::new())
        } else {
            let encoding = data[start];
            if !matches!(encoding, 0x08 | 0x10) {
                return Err(Error::invalid_iso(
                    "only UDF file identifier descriptor encodings 8 or 16 are supported",
                ));
            }
            (encoding, data[start + 1..end].to_vec())
        };

        Ok((
            UdfFileIdentifierDescriptor {
                desc_tag,
                file_characteristics,
                fi,
                encoding,
                isdir,
                isparent,
                icb,
                impl_use,
                file_entry: None,
                parent,
                orig_extent_loc: Some(extent),
                new_extent_loc: None,
            },
            end + Self::pad(end),
        ))
    }

    /// Create a new identifier for `name` (UTF-8).  Parent identifiers
    /// carry no name.
    pub fn new(isdir: bool, isparent: bool, name: &str, parent: Option<FeId>) -> Self {
        let mut file_characteristics = 0u8;
        if isdir {
            file_characteristics |= 0x2;
        }
        if isparent {
            file_characteristics |= 0x8;
        }
        let (encoding, fi) = if isparent {
            (0x08, Vec::new())
        } else {
            let osta = ostaunicode(name);
            (osta[0], osta[1..].to_vec())
        };
        UdfFileIdentifierDescriptor {
            desc_tag: UdfTag::new(257, 0),
            file_characteristics,
            fi,
            encoding,
            isdir,
            isparent,
            icb: UdfLongAd::new(2048, 2),
            impl_use: Vec::new(),
            file_entry: None,
            parent,
            orig_extent_loc: None,
            new_extent_loc: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.isdir
    }

    pub fn is_parent(&self) -> bool {
        self.isparent
    }

    /// The length-prefix byte stored on disc: name plus encoding byte.
    fn len_fi(&self) -> usize {
        if self.isparent || self.fi.is_empty() {
            0
        } else {
            self.fi.len() + 1
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let len_fi = self.len_fi();
        let unpadded = Self::HEADER_LENGTH + self.impl_use.len() + len_fi;
        let mut body = vec![0u8; Self::HEADER_LENGTH - 16];
        LittleEndian::write_u16(&mut body[0..2], 1);
        body[2] = self.file_characteristics;
        body[3] = len_fi as u8;
        body[4..20].copy_from_slice(&self.icb.record());
        LittleEndian::write_u16(&mut body[20..22], self.impl_use.len() as u16);
        body.extend_from_slice(&self.impl_use);
        if len_fi > 0 {
            body.push(self.encoding);
            body.extend_from_slice(&self.fi);
        }
        body.resize(body.len() + Self::pad(unpadded), 0);
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub fn set_extent_location(&mut self, extent: u32, tag_location: u32) {
        self.new_extent_loc = Some(extent);
        self.desc_tag.tag_location = tag_location;
    }

    pub fn set_icb(&mut self, new_location: u32, tag_location: u32) {
        self.icb.set_extent_location(new_location, tag_location);
    }
}

/// A UDF Boot Descriptor (ECMA-167, Part 2, 9.4).
pub struct UdfBootDescriptor {
    pub architecture_type: UdfEntityId,
    pub boot_identifier: UdfEntityId,
    pub boot_extent_loc: u32,
    pub boot_extent_len: u32,
    pub load_address: u64,
    pub start_address: u64,
    pub desc_creation_time: UdfTimestamp,
    pub flags: u16,
    pub boot_use: Vec<u8>,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfBootDescriptor {
    pub fn parse(data: &[u8], extent: u32) -> Result<Self> {
        parse_volume_structure(data, &[b"BOOT2"])?;
        if data[7] != 0 {
            return Err(Error::invalid_iso("invalid reserved1"));
        }
        let flags = LittleEndian::read_u16(&data[130..132]);
        if flags > 1 {
            return Err(Error::invalid_iso("invalid flags (must be 0 or 1)"));
        }
        if data[132..164].iter().any(|&b| b != 0) {
            return Err(Error::invalid_iso("invalid reserved2"));
        }
        Ok(UdfBootDescriptor {
            architecture_type: UdfEntityId::parse(&data[8..40])?,
            boot_identifier: UdfEntityId::parse(&data[40..72])?,
            boot_extent_loc: LittleEndian::read_u32(&data[72..76]),
            boot_extent_len: LittleEndian::read_u32(&data[76..80]),
            load_address: LittleEndian::read_u64(&data[80..88]),
            start_address: LittleEndian::read_u64(&data[88..96]),
            desc_creation_time: UdfTimestamp::parse(&data[96..108])?,
            flags,
            boot_use: data[164..2048].to_vec(),
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = record_volume_structure(b"BOOT2");
        out[8..40].copy_from_slice(&self.architecture_type.record());
        out[40..72].copy_from_slice(&self.boot_identifier.record());
        LittleEndian::write_u32(&mut out[72..76], self.boot_extent_loc);
        LittleEndian::write_u32(&mut out[76..80], self.boot_extent_len);
        LittleEndian::write_u64(&mut out[80..88], self.load_address);
        LittleEndian::write_u64(&mut out[88..96], self.start_address);
        out[96..108].copy_from_slice(&self.desc_creation_time.record());
        LittleEndian::write_u16(&mut out[130..132], self.flags);
        let take = self.boot_use.len().min(1884);
        out[164..164 + take].copy_from_slice(&self.boot_use[..take]);
        out
    }
}

/// A Space Bitmap Descriptor (ECMA-167, Part 4, 14.12).
pub struct UdfSpaceBitmapDescriptor {
    pub desc_tag: UdfTag,
    pub num_bits: u32,
    pub num_bytes: u32,
    pub bitmap: Vec<u8>,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfSpaceBitmapDescriptor {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        if data.len() < 24 {
            return Err(Error::invalid_iso("UDF space bitmap descriptor too short"));
        }
        let num_bytes = LittleEndian::read_u32(&data[20..24]);
        let end = (24 + num_bytes as usize).min(data.len());
        Ok(UdfSpaceBitmapDescriptor {
            desc_tag,
            num_bits: LittleEndian::read_u32(&data[16..20]),
            num_bytes,
            bitmap: data[24..end].to_vec(),
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        LittleEndian::write_u32(&mut body[0..4], self.num_bits);
        LittleEndian::write_u32(&mut body[4..8], self.num_bytes);
        body.extend_from_slice(&self.bitmap);
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }
}

/// An Allocation Extent Descriptor (ECMA-167, Part 4, 14.5).
pub struct UdfAllocationExtentDescriptor {
    pub desc_tag: UdfTag,
    pub prev_allocation_extent_loc: u32,
    pub len_allocation_descs: u32,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl UdfAllocationExtentDescriptor {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        if data.len() < 24 {
            return Err(Error::invalid_iso("UDF allocation extent descriptor too short"));
        }
        Ok(UdfAllocationExtentDescriptor {
            desc_tag,
            prev_allocation_extent_loc: LittleEndian::read_u32(&data[16..20]),
            len_allocation_descs: LittleEndian::read_u32(&data[20..24]),
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        LittleEndian::write_u32(&mut body[0..4], self.prev_allocation_extent_loc);
        LittleEndian::write_u32(&mut body[4..8], self.len_allocation_descs);
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }
}

/// An Indirect Entry (ECMA-167, Part 4, 14.7): an ICB that points at
/// another ICB.
pub struct UdfIndirectEntry {
    pub desc_tag: UdfTag,
    pub icb_tag: UdfIcbTag,
    pub indirect_icb: UdfLongAd,
}

impl UdfIndirectEntry {
    pub fn parse(data: &[u8], desc_tag: UdfTag) -> Result<Self> {
        if data.len() < 52 {
            return Err(Error::invalid_iso("UDF indirect entry too short"));
        }
        Ok(UdfIndirectEntry {
            desc_tag,
            icb_tag: UdfIcbTag::parse(&data[16..36])?,
            indirect_icb: UdfLongAd::parse(&data[36..52]),
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 36];
        body[0..20].copy_from_slice(&self.icb_tag.record());
        body[20..36].copy_from_slice(&self.indirect_icb.record());
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }
}

/// A Terminal Entry (ECMA-167, Part 4, 14.8).
pub struct UdfTerminalEntry {
    pub desc_tag: UdfTag,
    pub icb_tag: UdfIcbTag,
}

impl UdfTerminalEntry {
    pub fn parse(data: &[u8], desc_tag: UdfTag) -> Result<Self> {
        if data.len() < 36 {
            return Err(Error::invalid_iso("UDF terminal entry too short"));
        }
        Ok(UdfTerminalEntry {
            desc_tag,
            icb_tag: UdfIcbTag::parse(&data[16..36])?,
        })
    }

    pub fn new(file_type: UdfFileType) -> Self {
        UdfTerminalEntry {
            desc_tag: UdfTag::new(260, 0),
            icb_tag: UdfIcbTag::new(file_type),
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 20];
        body[0..20].copy_from_slice(&self.icb_tag.record());
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }
}

/// An Extended Attribute Header Descriptor (ECMA-167, Part 4, 14.10.1).
pub struct UdfExtendedAttributeHeaderDescriptor {
    pub desc_tag: UdfTag,
    pub impl_attr_loc: u32,
    pub app_attr_loc: u32,
}

impl UdfExtendedAttributeHeaderDescriptor {
    pub fn parse(data: &[u8], desc_tag: UdfTag) -> Result<Self> {
        if data.len() < 24 {
            return Err(Error::invalid_iso("UDF extended attribute header too short"));
        }
        Ok(UdfExtendedAttributeHeaderDescriptor {
            desc_tag,
            impl_attr_loc: LittleEndian::read_u32(&data[16..20]),
            app_attr_loc: LittleEndian::read_u32(&data[20..24]),
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        LittleEndian::write_u32(&mut body[0..4], self.impl_attr_loc);
        LittleEndian::write_u32(&mut body[4..8], self.app_attr_loc);
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }
}

/// An Unallocated Space Entry (ECMA-167, Part 4, 14.11).
pub struct UdfUnallocatedSpaceEntry {
    pub desc_tag: UdfTag,
    pub icb_tag: UdfIcbTag,
    pub alloc_descs: Vec<AllocationDescriptor>,
}

impl UdfUnallocatedSpaceEntry {
    pub fn parse(data: &[u8], extent: u32, desc_tag: UdfTag) -> Result<Self> {
        if data.len() < 40 {
            return Err(Error::invalid_iso("UDF unallocated space entry too short"));
        }
        let icb_tag = UdfIcbTag::parse(&data[16..36])?;
        let len_alloc_descs = LittleEndian::read_u32(&data[36..40]) as usize;
        let alloc_descs =
            parse_allocation_descriptors(icb_tag.flags, &data[40..], len_alloc_descs, 40, extent)?;
        Ok(UdfUnallocatedSpaceEntry {
            desc_tag,
            icb_tag,
            alloc_descs,
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let len_alloc_descs: usize = self.alloc_descs.iter().map(AllocationDescriptor::length).sum();
        let mut body = vec![0u8; 24];
        body[0..20].copy_from_slice(&self.icb_tag.record());
        LittleEndian::write_u32(&mut body[20..24], len_alloc_descs as u32);
        for desc in &self.alloc_descs {
            body.extend_from_slice(&desc.record());
        }
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }
}

/// A Partition Integrity Entry (ECMA-167, Part 4, 14.13).
pub struct UdfPartitionIntegrityEntry {
    pub desc_tag: UdfTag,
    pub icb_tag: UdfIcbTag,
    pub timestamp: UdfTimestamp,
    pub integrity_type: u8,
    pub impl_ident: UdfEntityId,
    pub impl_use: Vec<u8>,
}

impl UdfPartitionIntegrityEntry {
    pub fn parse(data: &[u8], desc_tag: UdfTag) -> Result<Self> {
        if data.len() < 512 {
            return Err(Error::invalid_iso("UDF partition integrity entry too short"));
        }
        Ok(UdfPartitionIntegrityEntry {
            desc_tag,
            icb_tag: UdfIcbTag::parse(&data[16..36])?,
            timestamp: UdfTimestamp::parse(&data[36..48])?,
            integrity_type: data[48],
            impl_ident: UdfEntityId::parse(&data[224..256])?,
            impl_use: data[256..512].to_vec(),
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut body = vec![0u8; 496];
        body[0..20].copy_from_slice(&self.icb_tag.record());
        body[20..32].copy_from_slice(&self.timestamp.record());
        body[32] = self.integrity_type;
        body[208..240].copy_from_slice(&self.impl_ident.record());
        let take = self.impl_use.len().min(256);
        body[240..240 + take].copy_from_slice(&self.impl_use[..take]);
        let mut out = self.desc_tag.record(&body).to_vec();
        out.extend_from_slice(&body);
        out
    }
}

/// One main or reserve Volume Descriptor Sequence.  Duplicates with the
/// same sequence number must have identical contents (ECMA-167, Part 3,
/// 8.4.2).
#[derive(Default)]
pub struct UdfDescriptorSequence {
    pub pvds: Vec<UdfPrimaryVolumeDescriptor>,
    pub impl_use: Vec<UdfImplementationUseVolumeDescriptor>,
    pub partitions: Vec<UdfPartitionVolumeDescriptor>,
    pub logical_volumes: Vec<UdfLogicalVolumeDescriptor>,
    pub unallocated_space: Vec<UdfUnallocatedSpaceDescriptor>,
    pub terminator: Option<UdfTerminatingDescriptor>,
    pub desc_pointer: Option<UdfVolumeDescriptorPointer>,
}

fn check_dup<T>(existing: &[T], desc: &T, seqnum: impl Fn(&T) -> u32, eq: impl Fn(&T, &T) -> bool) -> Result<()> {
    for old in existing {
        if seqnum(old) == seqnum(desc) && !eq(old, desc) {
            return Err(Error::invalid_iso(
                "descriptors with same sequence number do not have the same contents",
            ));
        }
    }
    Ok(())
}

impl UdfDescriptorSequence {
    pub fn add_pvd(&mut self, desc: UdfPrimaryVolumeDescriptor) -> Result<()> {
        check_dup(&self.pvds, &desc, |d| d.vol_desc_seqnum, |a, b| a.content_eq(b))?;
        self.pvds.push(desc);
        Ok(())
    }

    pub fn add_impl_use(&mut self, desc: UdfImplementationUseVolumeDescriptor) -> Result<()> {
        check_dup(&self.impl_use, &desc, |d| d.vol_desc_seqnum, |a, b| a.content_eq(b))?;
        self.impl_use.push(desc);
        Ok(())
    }

    pub fn add_partition(&mut self, desc: UdfPartitionVolumeDescriptor) -> Result<()> {
        check_dup(&self.partitions, &desc, |d| d.vol_desc_seqnum, |a, b| a.content_eq(b))?;
        self.partitions.push(desc);
        Ok(())
    }

    pub fn add_logical_volume(&mut self, desc: UdfLogicalVolumeDescriptor) -> Result<()> {
        check_dup(
            &self.logical_volumes,
            &desc,
            |d| d.vol_desc_seqnum,
            |a, b| a.content_eq(b),
        )?;
        self.logical_volumes.push(desc);
        Ok(())
    }

    pub fn add_unallocated_space(&mut self, desc: UdfUnallocatedSpaceDescriptor) -> Result<()> {
        check_dup(
            &self.unallocated_space,
            &desc,
            |d| d.vol_desc_seqnum,
            |a, b| a.content_eq(b),
        )?;
        self.unallocated_space.push(desc);
        Ok(())
    }

    /// Assign consecutive extents to every descriptor in canonical
    /// order, starting at `start_extent`.
    pub fn assign_desc_extents(&mut self, start_extent: u32) {
        let mut current = start_extent;
        for pvd in &mut self.pvds {
            pvd.set_extent_location(current);
            current += 1;
        }
        if let Some(dp) = self.desc_pointer.as_mut() {
            dp.set_extent_location(current);
            current += 1;
        }
        for impl_use in &mut self.impl_use {
            impl_use.set_extent_location(current);
            current += 1;
        }
        for partition in &mut self.partitions {
            partition.set_extent_location(current);
            current += 1;
        }
        for lv in &mut self.logical_volumes {
            lv.set_extent_location(current);
            current += 1;
        }
        for us in &mut self.unallocated_space {
            us.set_extent_location(current);
            current += 1;
        }
        if let Some(term) = self.terminator.as_mut() {
            term.set_extent_location(current, None);
        }
    }

    /// Every descriptor paired with its current extent, for emission.
    pub fn records(&self) -> Vec<(u32, Vec<u8>)> {
        let mut out = Vec::new();
        for pvd in &self.pvds {
            out.push((pvd.extent_location(), pvd.record()));
        }
        if let Some(dp) = &self.desc_pointer {
            out.push((
                dp.new_extent_loc.or(dp.orig_extent_loc).unwrap_or(0),
                dp.record(),
            ));
        }
        for impl_use in &self.impl_use {
            out.push((
                impl_use.new_extent_loc.or(impl_use.orig_extent_loc).unwrap_or(0),
                impl_use.record(),
            ));
        }
        for partition in &self.partitions {
            out.push((
                partition.new_extent_loc.or(partition.orig_extent_loc).unwrap_or(0),
                partition.record(),
            ));
        }
        for lv in &self.logical_volumes {
            out.push((
                lv.new_extent_loc.or(lv.orig_extent_loc).unwrap_or(0),
                lv.record(),
            ));
        }
        for us in &self.unallocated_space {
            out.push((
                us.new_extent_loc.or(us.orig_extent_loc).unwrap_or(0),
                us.record(),
            ));
        }
        if let Some(term) = &self.terminator {
            out.push((term.extent_location(), term.record()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_record_parse_round_trip() {
        let mut tag = UdfTag::new(2, 0);
        tag.tag_location = 256;
        let body = vec![0xabu8; 496];
        let header = tag.record(&body);
        let mut full = header.to_vec();
        full.extend_from_slice(&body);
        let parsed = UdfTag::parse(&full, 256).unwrap();
        assert_eq!(parsed.tag_ident, 2);
        assert_eq!(parsed.tag_location, 256);
        assert_eq!(parsed.desc_crc_length, Some(496));
    }

    #[test]
    fn tag_checksum_detects_corruption() {
        let mut tag = UdfTag::new(2, 0);
        tag.tag_location = 10;
        let body = vec![0u8; 16];
        let mut full = tag.record(&body).to_vec();
        full.extend_from_slice(&body);
        full[0] ^= 0xff;
        assert!(UdfTag::parse(&full, 10).is_err());
    }

    #[test]
    fn tag_crc_detects_body_corruption() {
        let mut tag = UdfTag::new(2, 0);
        tag.tag_location = 10;
        let body = vec![7u8; 64];
        let mut full = tag.record(&body).to_vec();
        full.extend_from_slice(&body);
        full[20] ^= 0xff;
        assert!(UdfTag::parse(&full, 10).is_err());
    }

    #[test]
    fn tag_location_mismatch_fixed_up() {
        let mut tag = UdfTag::new(8, 0);
        tag.tag_location = 99;
        let body = vec![0u8; 16];
        let mut full = tag.record(&body).to_vec();
        full.extend_from_slice(&body);
        let parsed = UdfTag::parse(&full, 258).unwrap();
        assert_eq!(parsed.tag_location, 258);
    }

    #[test]
    fn timestamp_round_trip() {
        let ts = UdfTimestamp {
            tz: -300,
            timetype: 1,
            year: 2018,
            month: 1,
            day: 2,
            hour: 3,
            minute: 4,
            second: 5,
            centiseconds: 0,
            hundreds_microseconds: 0,
            microseconds: 0,
        };
        let rec = ts.record();
        let parsed = UdfTimestamp::parse(&rec).unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn timestamp_rejects_bad_month() {
        let mut rec = UdfTimestamp::now().record();
        rec[4] = 13;
        assert!(UdfTimestamp::parse(&rec).is_err());
    }

    #[test]
    fn ostaunicode_prefixes() {
        assert_eq!(ostaunicode("CDROM"), b"\x08CDROM");
        let omega = ostaunicode("Ω");
        assert_eq!(omega, vec![0x10, 0x03, 0xa9]);
    }

    #[test]
    fn ostaunicode_zero_pad_tracks_length() {
        let padded = ostaunicode_zero_pad("CDROM", 32);
        assert_eq!(padded.len(), 32);
        assert_eq!(&padded[..6], b"\x08CDROM");
        assert_eq!(padded[31], 6);
    }

    #[test]
    fn symlink_components_encode() {
        let data = symlink_to_bytes("/usr/../a");
        let mut expected = Vec::new();
        expected.extend_from_slice(&[0x02, 0, 0, 0]);
        expected.extend_from_slice(&[0x05, 4, 0, 0]);
        expected.extend_from_slice(b"\x08usr");
        expected.extend_from_slice(&[0x03, 0, 0, 0]);
        expected.extend_from_slice(&[0x05, 2, 0, 0]);
        expected.extend_from_slice(b"\x08a");
        assert_eq!(data, expected);
    }

    #[test]
    fn short_ad_type_bits() {
        let raw = [0x00, 0x08, 0x00, 0x40, 0x2a, 0x00, 0x00, 0x00];
        let ad = UdfShortAd::parse(&raw);
        assert_eq!(ad.extent_length, 0x800);
        assert_eq!(ad.extent_type, 1);
        assert_eq!(ad.log_block_num, 0x2a);
        assert_eq!(ad.record(), raw);
    }

    #[test]
    fn long_ad_impl_use_carries_absolute_block() {
        let mut ad = UdfLongAd::new(2048, 0);
        ad.set_extent_location(259, 2);
        assert_eq!(ad.log_block_num, 2);
        assert_eq!(LittleEndian::read_u32(&ad.impl_use[2..6]), 259);
    }

    #[test]
    fn parse_alloc_descs_short() {
        let mut data = Vec::new();
        data.extend_from_slice(&UdfShortAd::new(2048).unwrap().record());
        data.extend_from_slice(&UdfShortAd::new(100).unwrap().record());
        let descs = parse_allocation_descriptors(0x230, &data, 16, 176, 5).unwrap();
        assert_eq!(descs.len(), 2);
        assert_eq!(descs[0].extent_length(), 2048);
        assert_eq!(descs[1].extent_length(), 100);
    }

    #[test]
    fn parse_alloc_descs_inline() {
        let descs = parse_allocation_descriptors(0x233, &[], 123, 176, 5).unwrap();
        assert_eq!(descs.len(), 1);
        match descs[0] {
            AllocationDescriptor::Inline(ad) => {
                assert_eq!(ad.extent_length, 123);
                assert_eq!(ad.log_block_num, 5);
                assert_eq!(ad.offset, 176);
            }
            _ => panic!("expected inline AD"),
        }
    }

    #[test]
    fn parse_alloc_descs_extended_unsupported() {
        assert!(parse_allocation_descriptors(0x232, &[], 0, 0, 0).is_err());
    }

    #[test]
    fn anchor_round_trip() {
        let mut avdp = UdfAnchorVolumeStructure::new();
        avdp.set_extent_location(256, 32, 48);
        let rec = avdp.record();
        assert_eq!(rec.len(), 512);
        let tag = UdfTag::parse(&rec, 256).unwrap();
        let parsed = UdfAnchorVolumeStructure::parse(&rec, 256, tag).unwrap();
        assert_eq!(parsed.main_vd.extent_location, 32);
        assert_eq!(parsed.reserve_vd.extent_location, 48);
        assert_eq!(parsed.main_vd.extent_length, 32768);
    }

    #[test]
    fn udf_pvd_round_trip() {
        let mut pvd = UdfPrimaryVolumeDescriptor::new("0123456789abcdef");
        pvd.set_extent_location(32);
        let rec = pvd.record();
        assert_eq!(rec.len(), 512);
        let tag = UdfTag::parse(&rec, 32).unwrap();
        assert_eq!(tag.tag_ident, 1);
        let parsed = UdfPrimaryVolumeDescriptor::parse(&rec, 32, tag).unwrap();
        assert!(parsed.content_eq(&pvd));
    }

    #[test]
    fn impl_use_round_trip() {
        let mut iuvd = UdfImplementationUseVolumeDescriptor::new();
        iuvd.set_extent_location(33);
        let rec = iuvd.record();
        let tag = UdfTag::parse(&rec, 33).unwrap();
        assert_eq!(tag.tag_ident, 4);
        let parsed = UdfImplementationUseVolumeDescriptor::parse(&rec, 33, tag).unwrap();
        assert!(parsed.content_eq(&iuvd));
    }

    #[test]
    fn partition_round_trip() {
        let mut part = UdfPartitionVolumeDescriptor::new(2).unwrap();
        part.set_extent_location(34);
        part.set_start_location(257);
        let rec = part.record();
        let tag = UdfTag::parse(&rec, 34).unwrap();
        assert_eq!(tag.tag_ident, 5);
        let parsed = UdfPartitionVolumeDescriptor::parse(&rec, 34, tag).unwrap();
        assert!(parsed.content_eq(&part));
        assert_eq!(parsed.part_start_location, 257);
    }

    #[test]
    fn logical_volume_round_trip() {
        let mut lv = UdfLogicalVolumeDescriptor::new();
        lv.add_partition_map(UdfPartitionMap::new_type1()).unwrap();
        lv.set_extent_location(35);
        lv.set_integrity_location(64);
        let rec = lv.record();
        let tag = UdfTag::parse(&rec, 35).unwrap();
        assert_eq!(tag.tag_ident, 6);
        let parsed = UdfLogicalVolumeDescriptor::parse(&rec, 35, tag).unwrap();
        assert!(parsed.content_eq(&lv));
        assert_eq!(parsed.integrity_sequence.extent_location, 64);
    }

    #[test]
    fn unallocated_space_round_trip() {
        let mut us = UdfUnallocatedSpaceDescriptor::new();
        us.set_extent_location(36);
        let rec = us.record();
        let tag = UdfTag::parse(&rec, 36).unwrap();
        let parsed = UdfUnallocatedSpaceDescriptor::parse(&rec, 36, tag).unwrap();
        assert!(parsed.content_eq(&us));
    }

    #[test]
    fn lvid_round_trip() {
        let mut lvid = UdfLogicalVolumeIntegrityDescriptor::new();
        lvid.set_extent_location(64);
        let rec = lvid.record();
        let tag = UdfTag::parse(&rec, 64).unwrap();
        assert_eq!(tag.tag_ident, 9);
        let parsed = UdfLogicalVolumeIntegrityDescriptor::parse(&rec, 64, tag).unwrap();
        assert_eq!(parsed.free_space_tables, vec![0]);
        assert_eq!(parsed.size_tables, vec![3]);
        assert_eq!(parsed.logical_volume_impl_use.num_dirs, 1);
    }

    #[test]
    fn fsd_round_trip() {
        let mut fsd = UdfFileSetDescriptor::new();
        fsd.set_extent_location(257, 0);
        let rec = fsd.record();
        let tag = UdfTag::parse(&rec, 0).unwrap();
        assert_eq!(tag.tag_ident, 256);
        let parsed = UdfFileSetDescriptor::parse(&rec, 257, tag).unwrap();
        assert_eq!(parsed.root_dir_icb.log_block_num, 2);
    }

    #[test]
    fn file_entry_dir_round_trip() {
        let mut fe = UdfFileEntry::new(2048, UdfFileType::Dir, None, 2048).unwrap();
        fe.set_extent_location(259, 2);
        let rec = fe.record();
        let tag = UdfTag::parse(&rec, 2).unwrap();
        assert_eq!(tag.tag_ident, 261);
        let parsed = UdfFileEntry::parse(&rec, 2, None, tag).unwrap();
        assert!(parsed.is_dir());
        assert_eq!(parsed.alloc_descs.len(), 1);
        assert_eq!(parsed.file_link_count, 0);
        assert_eq!(parsed.unique_id, 259);
    }

    #[test]
    fn file_entry_file_alloc_chain() {
        let fe = UdfFileEntry::new(
            u64::from(MAX_ALLOC_EXTENT_LENGTH) + 100,
            UdfFileType::File,
            None,
            2048,
        )
        .unwrap();
        assert_eq!(fe.alloc_descs.len(), 2);
        assert_eq!(fe.alloc_descs[0].extent_length(), MAX_ALLOC_EXTENT_LENGTH);
        assert_eq!(fe.alloc_descs[1].extent_length(), 100);
    }

    #[test]
    fn file_entry_grows_and_shrinks() {
        let mut fe = UdfFileEntry::new(100, UdfFileType::File, None, 2048).unwrap();
        fe.set_data_length(200).unwrap();
        assert_eq!(fe.info_len, 200);
        assert_eq!(fe.alloc_descs.len(), 1);
        assert_eq!(fe.alloc_descs[0].extent_length(), 200);

        fe.set_data_length(u64::from(MAX_ALLOC_EXTENT_LENGTH) + 1)
            .unwrap();
        assert_eq!(fe.alloc_descs.len(), 2);
        assert_eq!(fe.alloc_descs[0].extent_length(), MAX_ALLOC_EXTENT_LENGTH);
        assert_eq!(fe.alloc_descs[1].extent_length(), 1);

        fe.set_data_length(50).unwrap();
        assert_eq!(fe.alloc_descs.len(), 1);
        assert_eq!(fe.alloc_descs[0].extent_length(), 50);
    }

    #[test]
    fn fid_lengths_are_padded_to_four() {
        // A parent FID has no name: 38 -> 40.
        assert_eq!(UdfFileIdentifierDescriptor::length(0), 40);
        // "A" plus encoding byte: 40 -> 40.
        assert_eq!(UdfFileIdentifierDescriptor::length(1), 40);
        assert_eq!(UdfFileIdentifierDescriptor::length(3), 44);
    }

    #[test]
    fn fid_round_trip() {
        let mut fid = UdfFileIdentifierDescriptor::new(false, false, "hello.txt", None);
        fid.set_extent_location(259, 2);
        fid.set_icb(260, 3);
        let rec = fid.record();
        assert_eq!(rec.len() % 4, 0);
        assert_eq!(rec.len(), UdfFileIdentifierDescriptor::length(fid.fi.len()));
        let tag = UdfTag::parse(&rec, 2).unwrap();
        let (parsed, consumed) = UdfFileIdentifierDescriptor::parse(&rec, 2, tag, None).unwrap();
        assert_eq!(consumed, rec.len());
        assert_eq!(parsed.fi, b"hello.txt");
        assert_eq!(parsed.encoding, 0x08);
        assert!(!parsed.is_parent());
        assert_eq!(parsed.icb.log_block_num, 3);
    }

    #[test]
    fn fid_parent_round_trip() {
        let fid = UdfFileIdentifierDescriptor::new(true, true, "", None);
        let rec = fid.record();
        assert_eq!(rec.len(), 40);
        let tag = UdfTag::parse(&rec, 0).unwrap();
        let (parsed, _) = UdfFileIdentifierDescriptor::parse(&rec, 0, tag, None).unwrap();
        assert!(parsed.is_parent());
        assert!(parsed.is_dir());
        assert!(parsed.fi.is_empty());
    }

    #[test]
    fn add_fid_grows_directory() {
        let mut dir = UdfFileEntry::new(2048, UdfFileType::Dir, None, 2048).unwrap();
        let parent = UdfFileIdentifierDescriptor::new(true, true, "", None);
        let added = dir.add_file_ident_desc(parent, 2048).unwrap();
        assert_eq!(added, 1);
        assert_eq!(dir.info_len, 40);
        assert_eq!(dir.alloc_descs[0].extent_length(), 40);
        assert_eq!(dir.file_link_count, 1);

        let child = UdfFileIdentifierDescriptor::new(false, false, "file.txt", None);
        let added = dir.add_file_ident_desc(child, 2048).unwrap();
        assert_eq!(added, 0);
        assert_eq!(dir.info_len, 40 + 48);
        assert_eq!(dir.file_link_count, 1);
    }

    #[test]
    fn remove_fid_requires_empty_directory() {
        let mut dir = UdfFileEntry::new(2048, UdfFileType::Dir, None, 2048).unwrap();
        let mut sub = UdfFileIdentifierDescriptor::new(true, false, "sub", None);
        sub.file_entry = Some(FeId(7));
        dir.add_file_ident_desc(sub, 2048).unwrap();

        let err = dir.remove_file_ident_desc_by_name(b"sub", 2048, |_| false);
        assert!(err.is_err());
        let (released, removed) = dir
            .remove_file_ident_desc_by_name(b"sub", 2048, |_| true)
            .unwrap();
        assert_eq!(released, 1);
        assert_eq!(removed.file_entry, Some(FeId(7)));
        assert_eq!(dir.info_len, 0);
        assert_eq!(dir.file_link_count, 0);
    }

    #[test]
    fn descriptor_sequence_rejects_conflicting_duplicates() {
        let mut seq = UdfDescriptorSequence::default();
        let pvd1 = UdfPrimaryVolumeDescriptor::new("0123456789abcdef");
        let mut pvd2 = UdfPrimaryVolumeDescriptor::new("0123456789abcdef");
        pvd2.recording_date = pvd1.recording_date.clone();
        seq.add_pvd(pvd1).unwrap();
        // Identical contents are fine.
        seq.add_pvd(pvd2).unwrap();
        let mut pvd3 = UdfPrimaryVolumeDescriptor::new("fedcba9876543210");
        pvd3.recording_date = seq.pvds[0].recording_date.clone();
        assert!(seq.add_pvd(pvd3).is_err());
    }

    #[test]
    fn descriptor_sequence_assigns_consecutive_extents() {
        let mut seq = UdfDescriptorSequence::default();
        seq.add_pvd(UdfPrimaryVolumeDescriptor::new("0123456789abcdef"))
            .unwrap();
        seq.add_impl_use(UdfImplementationUseVolumeDescriptor::new())
            .unwrap();
        seq.add_partition(UdfPartitionVolumeDescriptor::new(2).unwrap())
            .unwrap();
        let mut lv = UdfLogicalVolumeDescriptor::new();
        lv.add_partition_map(UdfPartitionMap::new_type1()).unwrap();
        seq.add_logical_volume(lv).unwrap();
        seq.add_unallocated_space(UdfUnallocatedSpaceDescriptor::new())
            .unwrap();
        seq.terminator = Some(UdfTerminatingDescriptor::new());

        seq.assign_desc_extents(32);
        assert_eq!(seq.pvds[0].new_extent_loc, Some(32));
        assert_eq!(seq.impl_use[0].new_extent_loc, Some(33));
        assert_eq!(seq.partitions[0].new_extent_loc, Some(34));
        assert_eq!(seq.logical_volumes[0].new_extent_loc, Some(35));
        assert_eq!(seq.unallocated_space[0].new_extent_loc, Some(36));
        assert_eq!(seq.terminator.as_ref().unwrap().extent_location(), 37);

        let records = seq.records();
        assert_eq!(records.len(), 6);
        assert!(records.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn volume_structures_round_trip() {
        let bea = BeaVolumeStructure::new();
        assert!(BeaVolumeStructure::parse(&bea.record(), 19).is_ok());
        let nsr = NsrVolumeStructure::new(2).unwrap();
        let parsed = NsrVolumeStructure::parse(&nsr.record(), 20).unwrap();
        assert_eq!(parsed.standard_ident, b"NSR02");
        let tea = TeaVolumeStructure::new();
        assert!(TeaVolumeStructure::parse(&tea.record(), 21).is_ok());
        assert!(NsrVolumeStructure::parse(&tea.record(), 20).is_err());
    }

    #[test]
    fn space_bitmap_round_trip() {
        let bitmap = UdfSpaceBitmapDescriptor {
            desc_tag: UdfTag::new(264, 0),
            num_bits: 24,
            num_bytes: 3,
            bitmap: vec![0xff, 0x0f, 0x00],
            orig_extent_loc: None,
            new_extent_loc: None,
        };
        let rec = bitmap.record();
        let tag = UdfTag::parse(&rec, 0).unwrap();
        assert_eq!(tag.tag_ident, 264);
        let parsed = UdfSpaceBitmapDescriptor::parse(&rec, 0, tag).unwrap();
        assert_eq!(parsed.num_bits, 24);
        assert_eq!(parsed.bitmap, vec![0xff, 0x0f, 0x00]);
    }

    #[test]
    fn allocation_extent_round_trip() {
        let aed = UdfAllocationExtentDescriptor {
            desc_tag: UdfTag::new(258, 0),
            prev_allocation_extent_loc: 12,
            len_allocation_descs: 16,
            orig_extent_loc: None,
            new_extent_loc: None,
        };
        let rec = aed.record();
        let tag = UdfTag::parse(&rec, 0).unwrap();
        let parsed = UdfAllocationExtentDescriptor::parse(&rec, 0, tag).unwrap();
        assert_eq!(parsed.prev_allocation_extent_loc, 12);
        assert_eq!(parsed.len_allocation_descs, 16);
    }

    #[test]
    fn indirect_and_terminal_entries_round_trip() {
        let ind = UdfIndirectEntry {
            desc_tag: UdfTag::new(259, 0),
            icb_tag: UdfIcbTag::new(UdfFileType::Dir),
            indirect_icb: UdfLongAd::new(2048, 9),
        };
        let rec = ind.record();
        let tag = UdfTag::parse(&rec, 0).unwrap();
        let parsed = UdfIndirectEntry::parse(&rec, tag).unwrap();
        assert_eq!(parsed.indirect_icb.log_block_num, 9);

        let term = UdfTerminalEntry::new(UdfFileType::File);
        let rec = term.record();
        let tag = UdfTag::parse(&rec, 0).unwrap();
        let parsed = UdfTerminalEntry::parse(&rec, tag).unwrap();
        assert_eq!(parsed.icb_tag.file_type, 5);
    }

    #[test]
    fn unallocated_space_entry_round_trip() {
        let use_entry = UdfUnallocatedSpaceEntry {
            desc_tag: UdfTag::new(263, 0),
            icb_tag: UdfIcbTag::new(UdfFileType::File),
            alloc_descs: vec![AllocationDescriptor::Short(UdfShortAd::new(4096).unwrap())],
        };
        let rec = use_entry.record();
        let tag = UdfTag::parse(&rec, 0).unwrap();
        let parsed = UdfUnallocatedSpaceEntry::parse(&rec, 0, tag).unwrap();
        assert_eq!(parsed.alloc_descs.len(), 1);
        assert_eq!(parsed.alloc_descs[0].extent_length(), 4096);
    }

    #[test]
    fn partition_integrity_entry_round_trip() {
        let pie = UdfPartitionIntegrityEntry {
            desc_tag: UdfTag::new(265, 0),
            icb_tag: UdfIcbTag::new(UdfFileType::File),
            timestamp: UdfTimestamp::now(),
            integrity_type: 1,
            impl_ident: UdfEntityId::new(0, b"*test", b"").unwrap(),
            impl_use: vec![0u8; 256],
        };
        let rec = pie.record();
        assert_eq!(rec.len(), 512);
        let tag = UdfTag::parse(&rec, 0).unwrap();
        let parsed = UdfPartitionIntegrityEntry::parse(&rec, tag).unwrap();
        assert_eq!(parsed.integrity_type, 1);
        assert_eq!(&parsed.impl_ident.identifier[..5], b"*test");
    }

    #[test]
    fn extended_attribute_header_round_trip() {
        let eahd = UdfExtendedAttributeHeaderDescriptor {
            desc_tag: UdfTag::new(262, 0),
            impl_attr_loc: 24,
            app_attr_loc: 48,
        };
        let rec = eahd.record();
        let tag = UdfTag::parse(&rec, 0).unwrap();
        let parsed = UdfExtendedAttributeHeaderDescriptor::parse(&rec, tag).unwrap();
        assert_eq!(parsed.impl_attr_loc, 24);
        assert_eq!(parsed.app_attr_loc, 48);
    }

    #[test]
    fn boot_descriptor_round_trip() {
        let boot = UdfBootDescriptor {
            architecture_type: UdfEntityId::new(0, b"", b"").unwrap(),
            boot_identifier: UdfEntityId::new(0, b"", b"").unwrap(),
            boot_extent_loc: 100,
            boot_extent_len: 2048,
            load_address: 0x7c00,
            start_address: 0x7c00,
            desc_creation_time: UdfTimestamp::now(),
            flags: 0,
            boot_use: vec![0u8; 1884],
            orig_extent_loc: None,
            new_extent_loc: None,
        };
        let rec = boot.record();
        assert_eq!(rec.len(), 2048);
        let parsed = UdfBootDescriptor::parse(&rec, 20).unwrap();
        assert_eq!(parsed.boot_extent_loc, 100);
        assert_eq!(parsed.load_address, 0x7c00);
    }

    #[test]
    fn terminating_descriptor_partition_relative_tag() {
        let mut term = UdfTerminatingDescriptor::new();
        term.set_extent_location(258, Some(1));
        assert_eq!(term.extent_location(), 258);
        assert_eq!(term.desc_tag.tag_location, 1);
        let rec = term.record();
        assert!(UdfTag::parse(&rec, 1).is_ok());
    }
}
