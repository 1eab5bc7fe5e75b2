//! SUSP / Rock Ridge support: the per-record codecs, the System Use
//! area assignment algorithm with continuation-entry overflow, and the
//! shared continuation-block allocator.

use crate::codec::{decode_both_u32, encode_both_u32};
use crate::dates::{DirectoryRecordDate, VolumeDescriptorDate};
use crate::directory::DrId;
use crate::error::{Error, Result};

pub const SU_ENTRY_VERSION: u8 = 1;
/// A directory record may grow to at most 254 bytes; SUSP data that
/// does not fit moves to a continuation block.
pub const ALLOWED_DR_SIZE: usize = 254;
/// The TF flags we record: creation is omitted; access, modification,
/// and attribute-change are kept.
pub const TF_FLAGS: u8 = 0x0e;

pub const EXT_ID_109: &[u8] = b"RRIP_1991A";
pub const EXT_DES_109: &[u8] =
    b"THE ROCK RIDGE INTERCHANGE PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS";
pub const EXT_SRC_109: &[u8] = b"PLEASE CONTACT DISC PUBLISHER FOR SPECIFICATION SOURCE.  SEE PUBLISHER IDENTIFIER IN PRIMARY VOLUME DESCRIPTOR FOR CONTACT INFORMATION.";
pub const EXT_ID_112: &[u8] = b"IEEE_P1282";
pub const EXT_DES_112: &[u8] =
    b"THE IEEE P1282 PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS";
pub const EXT_SRC_112: &[u8] =
    b"PLEASE CONTACT THE IEEE STANDARDS DEPARTMENT, PISCATAWAY, NJ, USA FOR THE P1282 SPECIFICATION";

/// The three Rock Ridge revisions this library reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RrVersion {
    V1_09,
    V1_10,
    V1_12,
}

impl RrVersion {
    pub fn px_length(self) -> usize {
        match self {
            RrVersion::V1_09 | RrVersion::V1_10 => 36,
            RrVersion::V1_12 => 44,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RrVersion::V1_09 => "1.09",
            RrVersion::V1_10 => "1.10",
            RrVersion::V1_12 => "1.12",
        }
    }
}

fn check_su_len(data: &[u8], expected: usize, what: &str) -> Result<()> {
    if data.len() < 4 || data[2] as usize != expected {
        return Err(Error::invalid_iso(format!(
            "invalid length on rock ridge {} record",
            what
        )));
    }
    if data.len() < expected {
        return Err(Error::invalid_iso(format!("rock ridge {} record truncated", what)));
    }
    Ok(())
}

/// SP: SUSP sharing-protocol indicator (first record of the root's dot
/// entry).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpRecord {
    pub bytes_to_skip: u8,
}

impl SpRecord {
    pub const LENGTH: usize = 7;

    pub fn parse(data: &[u8]) -> Result<Self> {
        check_su_len(data, Self::LENGTH, "SP")?;
        if data[4] != 0xbe || data[5] != 0xef {
            return Err(Error::invalid_iso("invalid check bytes on rock ridge SP record"));
        }
        Ok(SpRecord { bytes_to_skip: data[6] })
    }

    pub fn new(bytes_to_skip: u8) -> Self {
        SpRecord { bytes_to_skip }
    }

    pub fn record(&self) -> Vec<u8> {
        vec![
            b'S',
            b'P',
            Self::LENGTH as u8,
            SU_ENTRY_VERSION,
            0xbe,
            0xef,
            self.bytes_to_skip,
        ]
    }
}

/// RR: the 1.09-era field mask naming which other records are present.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RrRecord {
    pub rr_flags: u8,
}

impl RrRecord {
    pub const LENGTH: usize = 5;

    pub fn parse(data: &[u8]) -> Result<Self> {
        check_su_len(data, Self::LENGTH, "RR")?;
        Ok(RrRecord { rr_flags: data[4] })
    }

    pub fn append_field(&mut self, field: RrField) {
        self.rr_flags |= 1 << field as u8;
    }

    pub fn record(&self) -> Vec<u8> {
        vec![b'R', b'R', Self::LENGTH as u8, SU_ENTRY_VERSION, self.rr_flags]
    }
}

/// Bit positions in the RR field mask.
#[derive(Clone, Copy, Debug)]
pub enum RrField {
    Px = 0,
    Pn = 1,
    Sl = 2,
    Nm = 3,
    Cl = 4,
    Pl = 5,
    Re = 6,
    Tf = 7,
}

/// CE: continuation entry pointing into a shared continuation block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CeRecord {
    pub bl_cont_area: u32,
    pub offset_cont_area: u32,
    pub len_cont_area: u32,
}

impl CeRecord {
    pub const LENGTH: usize = 28;

    pub fn parse(data: &[u8]) -> Result<Self> {
        check_su_len(data, Self::LENGTH, "CE")?;
        Ok(CeRecord {
            bl_cont_area: decode_both_u32(&data[4..12], "CE continuation area")?,
            offset_cont_area: decode_both_u32(&data[12..20], "CE continuation area offset")?,
            len_cont_area: decode_both_u32(&data[20..28], "CE continuation area length")?,
        })
    }

    pub fn add_record(&mut self, length: usize) {
        self.len_cont_area += length as u32;
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::LENGTH];
        out[0] = b'C';
        out[1] = b'E';
        out[2] = Self::LENGTH as u8;
        out[3] = SU_ENTRY_VERSION;
        encode_both_u32(&mut out[4..12], self.bl_cont_area);
        encode_both_u32(&mut out[12..20], self.offset_cont_area);
        encode_both_u32(&mut out[20..28], self.len_cont_area);
        out
    }
}

/// PX: POSIX file attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PxRecord {
    pub posix_file_mode: u32,
    pub posix_file_links: u32,
    pub posix_user_id: u32,
    pub posix_group_id: u32,
    pub posix_serial_number: u32,
}

impl PxRecord {
    /// Returns the record plus the su_len seen, which feeds version
    /// inference.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(Error::invalid_iso("rock ridge PX record truncated"));
        }
        let su_len = data[2] as usize;
        if su_len != 36 && su_len != 44 {
            return Err(Error::invalid_iso("invalid length on rock ridge PX record"));
        }
        if data.len() < su_len {
            return Err(Error::invalid_iso("rock ridge PX record truncated"));
        }
        let serial = if su_len == 44 {
            decode_both_u32(&data[36..44], "PX file serial number")?
        } else {
            0
        };
        Ok((
            PxRecord {
                posix_file_mode: decode_both_u32(&data[4..12], "PX file mode")?,
                posix_file_links: decode_both_u32(&data[12..20], "PX file links")?,
                posix_user_id: decode_both_u32(&data[20..28], "PX file user ID")?,
                posix_group_id: decode_both_u32(&data[28..36], "PX file group ID")?,
                posix_serial_number: serial,
            },
            su_len,
        ))
    }

    pub fn new(mode: u32) -> Self {
        PxRecord {
            posix_file_mode: mode,
            posix_file_links: 1,
            posix_user_id: 0,
            posix_group_id: 0,
            posix_serial_number: 0,
        }
    }

    pub fn record(&self, version: RrVersion) -> Vec<u8> {
        let len = version.px_length();
        let mut out = vec![0u8; len];
        out[0] = b'P';
        out[1] = b'X';
        out[2] = len as u8;
        out[3] = SU_ENTRY_VERSION;
        encode_both_u32(&mut out[4..12], self.posix_file_mode);
        encode_both_u32(&mut out[12..20], self.posix_file_links);
        encode_both_u32(&mut out[20..28], self.posix_user_id);
        encode_both_u32(&mut out[28..36], self.posix_group_id);
        if version == RrVersion::V1_12 {
            encode_both_u32(&mut out[36..44], self.posix_serial_number);
        }
        out
    }
}

/// ER: extensions-reference record on the root's dot entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErRecord {
    pub ext_id: Vec<u8>,
    pub ext_des: Vec<u8>,
    pub ext_src: Vec<u8>,
    pub ext_ver: u8,
}

impl ErRecord {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::invalid_iso("rock ridge ER record truncated"));
        }
        let su_len = data[2] as usize;
        if su_len > data.len() {
            return Err(Error::invalid_iso("length of ER record much too long"));
        }
        let len_id = data[4] as usize;
        let len_des = data[5] as usize;
        let len_src = data[6] as usize;
        if 8 + len_id + len_des + len_src > su_len {
            return Err(Error::invalid_iso(
                "combined length of ER ID, des, and src longer than record",
            ));
        }
        Ok(ErRecord {
            ext_id: data[8..8 + len_id].to_vec(),
            ext_des: data[8 + len_id..8 + len_id + len_des].to_vec(),
            ext_src: data[8 + len_id + len_des..8 + len_id + len_des + len_src].to_vec(),
            ext_ver: data[7],
        })
    }

    pub fn new(ext_id: &[u8], ext_des: &[u8], ext_src: &[u8]) -> Self {
        ErRecord {
            ext_id: ext_id.to_vec(),
            ext_des: ext_des.to_vec(),
            ext_src: ext_src.to_vec(),
            ext_ver: 1,
        }
    }

    pub fn length(ext_id: &[u8], ext_des: &[u8], ext_src: &[u8]) -> usize {
        8 + ext_id.len() + ext_des.len() + ext_src.len()
    }

    pub fn len(&self) -> usize {
        Self::length(&self.ext_id, &self.ext_des, &self.ext_src)
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![
            b'E',
            b'R',
            self.len() as u8,
            SU_ENTRY_VERSION,
            self.ext_id.len() as u8,
            self.ext_des.len() as u8,
            self.ext_src.len() as u8,
            self.ext_ver,
        ];
        out.extend_from_slice(&self.ext_id);
        out.extend_from_slice(&self.ext_des);
        out.extend_from_slice(&self.ext_src);
        out
    }
}

/// ES: extension selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EsRecord {
    pub extension_sequence: u8,
}

impl EsRecord {
    pub const LENGTH: usize = 5;

    pub fn parse(data: &[u8]) -> Result<Self> {
        check_su_len(data, Self::LENGTH, "ES")?;
        Ok(EsRecord { extension_sequence: data[4] })
    }

    pub fn record(&self) -> Vec<u8> {
        vec![b'E', b'S', Self::LENGTH as u8, SU_ENTRY_VERSION, self.extension_sequence]
    }
}

/// PN: POSIX device number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PnRecord {
    pub dev_t_high: u32,
    pub dev_t_low: u32,
}

impl PnRecord {
    pub const LENGTH: usize = 20;

    pub fn parse(data: &[u8]) -> Result<Self> {
        check_su_len(data, Self::LENGTH, "PN")?;
        Ok(PnRecord {
            dev_t_high: decode_both_u32(&data[4..12], "PN dev_t high")?,
            dev_t_low: decode_both_u32(&data[12..20], "PN dev_t low")?,
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::LENGTH];
        out[0] = b'P';
        out[1] = b'N';
        out[2] = Self::LENGTH as u8;
        out[3] = SU_ENTRY_VERSION;
        encode_both_u32(&mut out[4..12], self.dev_t_high);
        encode_both_u32(&mut out[12..20], self.dev_t_low);
        out
    }
}

/// One component of a symbolic-link target path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlComponent {
    pub flags: u8,
    pub curr_length: u8,
    pub data: Vec<u8>,
}

pub const SL_FLAG_CONTINUE: u8 = 1 << 0;
pub const SL_FLAG_CURRENT: u8 = 1 << 1;
pub const SL_FLAG_PARENT: u8 = 1 << 2;
pub const SL_FLAG_ROOT: u8 = 1 << 3;

impl SlComponent {
    fn validate_flags(flags: u8) -> Result<()> {
        if !matches!(flags, 0 | 1 | 2 | 4 | 8) {
            return Err(Error::internal(format!(
                "invalid rock ridge symlink flags 0x{:x}",
                flags
            )));
        }
        Ok(())
    }

    pub fn parse(flags: u8, length: u8, data: &[u8]) -> Result<Self> {
        Self::validate_flags(flags)?;
        if flags & (SL_FLAG_CURRENT | SL_FLAG_PARENT | SL_FLAG_ROOT) != 0 && length != 0 {
            return Err(Error::internal(
                "rock ridge symlinks to dot, dotdot, or root should have zero length",
            ));
        }
        Ok(SlComponent {
            flags,
            curr_length: length,
            data: data.to_vec(),
        })
    }

    /// Build a component from a human-readable name.
    pub fn factory(name: &[u8]) -> Self {
        let (flags, length) = match name {
            b"." => (SL_FLAG_CURRENT, 0),
            b".." => (SL_FLAG_PARENT, 0),
            b"/" => (SL_FLAG_ROOT, 0),
            other => (0, other.len() as u8),
        };
        SlComponent {
            flags,
            curr_length: length,
            data: name.to_vec(),
        }
    }

    pub fn name(&self) -> &[u8] {
        if self.flags & SL_FLAG_CURRENT != 0 {
            b"."
        } else if self.flags & SL_FLAG_PARENT != 0 {
            b".."
        } else if self.flags & SL_FLAG_ROOT != 0 {
            b"/"
        } else {
            &self.data
        }
    }

    pub fn is_continued(&self) -> bool {
        self.flags & SL_FLAG_CONTINUE != 0
    }

    pub fn set_continued(&mut self) {
        self.flags |= SL_FLAG_CONTINUE;
    }

    /// On-disc length of one component naming `name`.
    pub fn length(name: &[u8]) -> usize {
        if matches!(name, b"." | b".." | b"/") {
            2
        } else {
            2 + name.len()
        }
    }

    pub fn record(&self) -> Vec<u8> {
        if self.flags & SL_FLAG_CURRENT != 0 {
            return vec![SL_FLAG_CURRENT, 0];
        }
        if self.flags & SL_FLAG_PARENT != 0 {
            return vec![SL_FLAG_PARENT, 0];
        }
        if self.flags & SL_FLAG_ROOT != 0 {
            return vec![SL_FLAG_ROOT, 0];
        }
        let mut out = vec![self.flags, self.curr_length];
        out.extend_from_slice(&self.data);
        out
    }
}

/// SL: one symbolic-link record holding a run of components.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlRecord {
    pub components: Vec<SlComponent>,
    pub flags: u8,
}

impl SlRecord {
    pub const HEADER_LENGTH: usize = 5;

    /// The largest component area a single SL record can hold.
    pub fn maximum_component_area_length() -> usize {
        255 - Self::HEADER_LENGTH
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(Error::invalid_iso("rock ridge SL record truncated"));
        }
        let su_len = data[2] as usize;
        if su_len > data.len() {
            return Err(Error::invalid_iso("rock ridge SL record truncated"));
        }
        let mut rec = SlRecord {
            components: Vec::new(),
            flags: data[4],
        };
        let mut offset = 5;
        while offset + 2 <= su_len {
            let cr_flags = data[offset];
            let len_cp = data[offset + 1] as usize;
            offset += 2;
            if offset + len_cp > su_len {
                return Err(Error::invalid_iso("rock ridge SL component truncated"));
            }
            rec.components.push(SlComponent::parse(
                cr_flags,
                len_cp as u8,
                &data[offset..offset + len_cp],
            )?);
            offset += len_cp;
        }
        Ok(rec)
    }

    pub fn add_component(&mut self, name: &[u8]) -> Result<()> {
        if self.current_length() + SlComponent::length(name) > 255 {
            return Err(Error::invalid_input("symlink would be longer than 255"));
        }
        self.components.push(SlComponent::factory(name));
        Ok(())
    }

    pub fn current_length(&self) -> usize {
        Self::HEADER_LENGTH
            + self
                .components
                .iter()
                .map(|c| SlComponent::length(c.name()))
                .sum::<usize>()
    }

    pub fn set_continued(&mut self) {
        self.flags |= SL_FLAG_CONTINUE;
    }

    pub fn set_last_component_continued(&mut self) {
        if let Some(last) = self.components.last_mut() {
            last.set_continued();
        }
    }

    pub fn last_component_continued(&self) -> bool {
        self.components.last().is_some_and(SlComponent::is_continued)
    }

    /// The concatenated target path fragment this record contributes.
    /// A root component resets everything before it.
    pub fn name(&self) -> Vec<u8> {
        let mut parts: Vec<Vec<u8>> = Vec::new();
        let mut continued = false;
        for comp in &self.components {
            let mut name = comp.name().to_vec();
            if name == b"/" {
                parts.clear();
                continued = false;
                name = Vec::new();
            }
            if continued {
                if let Some(last) = parts.last_mut() {
                    last.extend_from_slice(&name);
                }
            } else {
                parts.push(name);
            }
            continued = comp.is_continued();
        }
        parts.join(&b'/')
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![
            b'S',
            b'L',
            self.current_length() as u8,
            SU_ENTRY_VERSION,
            self.flags,
        ];
        for comp in &self.components {
            out.extend_from_slice(&comp.record());
        }
        out
    }
}

/// AL: libisofs arbitrary-attribute record; shares the component
/// machinery with SL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlRecord {
    pub components: Vec<SlComponent>,
    pub flags: u8,
}

impl AlRecord {
    pub const HEADER_LENGTH: usize = 5;

    pub fn maximum_component_area_length() -> usize {
        255 - Self::HEADER_LENGTH
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(Error::invalid_iso("rock ridge AL record truncated"));
        }
        let su_len = data[2] as usize;
        if su_len > data.len() {
            return Err(Error::invalid_iso("rock ridge AL record truncated"));
        }
        let mut rec = AlRecord {
            components: Vec::new(),
            flags: data[4],
        };
        let mut offset = 5;
        while offset + 2 <= su_len {
            let cr_flags = data[offset];
            if cr_flags > 1 {
                return Err(Error::internal(format!(
                    "invalid arbitrary attribute flags 0x{:x}",
                    cr_flags
                )));
            }
            let len_cp = data[offset + 1] as usize;
            offset += 2;
            if offset + len_cp > su_len {
                return Err(Error::invalid_iso("rock ridge AL component truncated"));
            }
            rec.components.push(SlComponent {
                flags: cr_flags,
                curr_length: len_cp as u8,
                data: data[offset..offset + len_cp].to_vec(),
            });
            offset += len_cp;
        }
        Ok(rec)
    }

    pub fn add_component(&mut self, attr: &[u8]) -> Result<()> {
        if self.current_length() + 2 + attr.len() > 255 {
            return Err(Error::invalid_input("attribute would be longer than 255"));
        }
        self.components.push(SlComponent {
            flags: 0,
            curr_length: attr.len() as u8,
            data: attr.to_vec(),
        });
        Ok(())
    }

    pub fn current_length(&self) -> usize {
        Self::HEADER_LENGTH
            + self
                .components
                .iter()
                .map(|c| 2 + c.data.len())
                .sum::<usize>()
    }

    pub fn set_continued(&mut self) {
        self.flags |= SL_FLAG_CONTINUE;
    }

    pub fn set_last_component_continued(&mut self) {
        if let Some(last) = self.components.last_mut() {
            last.set_continued();
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![
            b'A',
            b'L',
            self.current_length() as u8,
            SU_ENTRY_VERSION,
            self.flags,
        ];
        for comp in &self.components {
            out.push(comp.flags);
            out.push(comp.curr_length);
            out.extend_from_slice(&comp.data);
        }
        out
    }
}

/// NM: alternate (POSIX) name, possibly one chunk of several.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NmRecord {
    pub posix_name_flags: u8,
    pub posix_name: Vec<u8>,
}

impl NmRecord {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(Error::invalid_iso("rock ridge NM record truncated"));
        }
        let su_len = data[2] as usize;
        if su_len < 5 || su_len > data.len() {
            return Err(Error::invalid_iso("rock ridge NM record truncated"));
        }
        let flags = data[4];
        if !matches!(flags & 0x7, 0 | 1 | 2 | 4) {
            return Err(Error::invalid_iso("invalid rock ridge NM flags"));
        }
        let name_len = su_len - 5;
        if name_len != 0 && (flags & 0x26) != 0 {
            return Err(Error::invalid_iso("invalid name in rock ridge NM entry"));
        }
        Ok(NmRecord {
            posix_name_flags: flags,
            posix_name: data[5..5 + name_len].to_vec(),
        })
    }

    pub fn new(name: &[u8]) -> Self {
        NmRecord {
            posix_name_flags: 0,
            posix_name: name.to_vec(),
        }
    }

    pub fn set_continued(&mut self) {
        self.posix_name_flags |= 1;
    }

    pub fn length(name: &[u8]) -> usize {
        5 + name.len()
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![
            b'N',
            b'M',
            Self::length(&self.posix_name) as u8,
            SU_ENTRY_VERSION,
            self.posix_name_flags,
        ];
        out.extend_from_slice(&self.posix_name);
        out
    }
}

/// CL: child link; the relocated directory's new logical block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClRecord {
    pub child_log_block_num: u32,
}

impl ClRecord {
    pub const LENGTH: usize = 12;

    pub fn parse(data: &[u8]) -> Result<Self> {
        check_su_len(data, Self::LENGTH, "CL")?;
        Ok(ClRecord {
            child_log_block_num: decode_both_u32(&data[4..12], "CL block number")?,
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::LENGTH];
        out[0] = b'C';
        out[1] = b'L';
        out[2] = Self::LENGTH as u8;
        out[3] = SU_ENTRY_VERSION;
        encode_both_u32(&mut out[4..12], self.child_log_block_num);
        out
    }
}

/// PL: parent link; the relocated directory's logical parent block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlRecord {
    pub parent_log_block_num: u32,
}

impl PlRecord {
    pub const LENGTH: usize = 12;

    pub fn parse(data: &[u8]) -> Result<Self> {
        check_su_len(data, Self::LENGTH, "PL")?;
        Ok(PlRecord {
            parent_log_block_num: decode_both_u32(&data[4..12], "PL block number")?,
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::LENGTH];
        out[0] = b'P';
        out[1] = b'L';
        out[2] = Self::LENGTH as u8;
        out[3] = SU_ENTRY_VERSION;
        encode_both_u32(&mut out[4..12], self.parent_log_block_num);
        out
    }
}

/// One timestamp inside a TF record: directory-record style (7 bytes)
/// or volume-descriptor style (17 bytes), selected by TF flag bit 7.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TfTimestamp {
    Short(DirectoryRecordDate),
    Long(VolumeDescriptorDate),
}

impl TfTimestamp {
    fn record(&self) -> Vec<u8> {
        match self {
            TfTimestamp::Short(d) => d.record().to_vec(),
            TfTimestamp::Long(d) => d.record().to_vec(),
        }
    }
}

/// TF: file timestamps.  Seven selectable stamps, each enabled by one
/// flag bit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TfRecord {
    pub time_flags: u8,
    pub stamps: Vec<TfTimestamp>,
}

impl TfRecord {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(Error::invalid_iso("not enough bytes in the TF record"));
        }
        let su_len = data[2] as usize;
        if su_len < 5 || su_len > data.len() {
            return Err(Error::invalid_iso("not enough bytes in the TF record"));
        }
        let time_flags = data[4];
        let long_form = time_flags & (1 << 7) != 0;
        let each = if long_form { 17 } else { 7 };
        let mut stamps = Vec::new();
        let mut offset = 5;
        for bit in 0..7 {
            if time_flags & (1 << bit) != 0 {
                if offset + each > su_len {
                    return Err(Error::invalid_iso("not enough bytes in the TF record"));
                }
                let stamp = if long_form {
                    TfTimestamp::Long(VolumeDescriptorDate::parse(&data[offset..offset + each])?)
                } else {
                    TfTimestamp::Short(DirectoryRecordDate::parse(&data[offset..offset + each])?)
                };
                stamps.push(stamp);
                offset += each;
            }
        }
        Ok(TfRecord { time_flags, stamps })
    }

    /// Fresh timestamps (current time) for the selected flags.
    pub fn new(time_flags: u8) -> Self {
        let long_form = time_flags & (1 << 7) != 0;
        let count = (time_flags & 0x7f).count_ones() as usize;
        let stamps = (0..count)
            .map(|_| {
                if long_form {
                    TfTimestamp::Long(VolumeDescriptorDate::now())
                } else {
                    TfTimestamp::Short(DirectoryRecordDate::now())
                }
            })
            .collect();
        TfRecord { time_flags, stamps }
    }

    pub fn length(time_flags: u8) -> usize {
        let each = if time_flags & (1 << 7) != 0 { 17 } else { 7 };
        5 + each * (time_flags & 0x7f).count_ones() as usize
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![
            b'T',
            b'F',
            Self::length(self.time_flags) as u8,
            SU_ENTRY_VERSION,
            self.time_flags,
        ];
        for stamp in &self.stamps {
            out.extend_from_slice(&stamp.record());
        }
        out
    }
}

/// SF: sparse-file virtual size (1.10 short form or 1.12 long form).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SfRecord {
    pub virtual_file_size_high: Option<u32>,
    pub virtual_file_size_low: u32,
    pub table_depth: Option<u8>,
}

impl SfRecord {
    /// Returns the record plus the su_len seen, which feeds version
    /// inference.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(Error::invalid_iso("rock ridge SF record truncated"));
        }
        let su_len = data[2] as usize;
        match su_len {
            12 => {
                if data.len() < 12 {
                    return Err(Error::invalid_iso("rock ridge SF record truncated"));
                }
                Ok((
                    SfRecord {
                        virtual_file_size_high: None,
                        virtual_file_size_low: decode_both_u32(&data[4..12], "SF virtual size")?,
                        table_depth: None,
                    },
                    12,
                ))
            }
            21 => {
                if data.len() < 21 {
                    return Err(Error::invalid_iso("rock ridge SF record truncated"));
                }
                Ok((
                    SfRecord {
                        virtual_file_size_high: Some(decode_both_u32(
                            &data[4..12],
                            "SF virtual size high",
                        )?),
                        virtual_file_size_low: decode_both_u32(
                            &data[12..20],
                            "SF virtual size low",
                        )?,
                        table_depth: Some(data[20]),
                    },
                    21,
                ))
            }
            _ => Err(Error::invalid_iso(
                "invalid length on rock ridge SF record (expected 12 or 21)",
            )),
        }
    }

    pub fn record(&self) -> Vec<u8> {
        match (self.virtual_file_size_high, self.table_depth) {
            (Some(high), Some(depth)) => {
                let mut out = vec![0u8; 21];
                out[0] = b'S';
                out[1] = b'F';
                out[2] = 21;
                out[3] = SU_ENTRY_VERSION;
                encode_both_u32(&mut out[4..12], high);
                encode_both_u32(&mut out[12..20], self.virtual_file_size_low);
                out[20] = depth;
                out
            }
            _ => {
                let mut out = vec![0u8; 12];
                out[0] = b'S';
                out[1] = b'F';
                out[2] = 12;
                out[3] = SU_ENTRY_VERSION;
                encode_both_u32(&mut out[4..12], self.virtual_file_size_low);
                out
            }
        }
    }
}

/// RE: marks a relocated directory entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReRecord;

impl ReRecord {
    pub const LENGTH: usize = 4;

    pub fn parse(data: &[u8]) -> Result<Self> {
        check_su_len(data, Self::LENGTH, "RE")?;
        Ok(ReRecord)
    }

    pub fn record(&self) -> Vec<u8> {
        vec![b'R', b'E', Self::LENGTH as u8, SU_ENTRY_VERSION]
    }
}

/// ST: SUSP terminator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StRecord;

impl StRecord {
    pub const LENGTH: usize = 4;

    pub fn parse(data: &[u8]) -> Result<Self> {
        check_su_len(data, Self::LENGTH, "ST")?;
        Ok(StRecord)
    }

    pub fn record(&self) -> Vec<u8> {
        vec![b'S', b'T', Self::LENGTH as u8, SU_ENTRY_VERSION]
    }
}

/// PD: platform-dependent padding record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PdRecord {
    pub padding: Vec<u8>,
}

impl PdRecord {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::invalid_iso("rock ridge PD record truncated"));
        }
        let su_len = data[2] as usize;
        if su_len < 4 || su_len > data.len() {
            return Err(Error::invalid_iso("rock ridge PD record truncated"));
        }
        Ok(PdRecord {
            padding: data[4..su_len].to_vec(),
        })
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![
            b'P',
            b'D',
            (4 + self.padding.len()) as u8,
            SU_ENTRY_VERSION,
        ];
        out.extend_from_slice(&self.padding);
        out
    }
}

/// The records of one SUSP area: at most one of each singleton record
/// plus the repeatable lists.
#[derive(Debug, Default)]
pub struct RockRidgeEntries {
    pub sp_record: Option<SpRecord>,
    pub rr_record: Option<RrRecord>,
    pub ce_record: Option<CeRecord>,
    pub px_record: Option<PxRecord>,
    pub er_record: Option<ErRecord>,
    pub es_records: Vec<EsRecord>,
    pub pn_record: Option<PnRecord>,
    pub sl_records: Vec<SlRecord>,
    pub nm_records: Vec<NmRecord>,
    pub cl_record: Option<ClRecord>,
    pub pl_record: Option<PlRecord>,
    pub tf_record: Option<TfRecord>,
    pub sf_record: Option<SfRecord>,
    pub re_record: Option<ReRecord>,
    pub st_record: Option<StRecord>,
    pub pd_records: Vec<PdRecord>,
    pub al_records: Vec<AlRecord>,
}

/// The Rock Ridge extension attached to one directory record.
#[derive(Debug, Default)]
pub struct RockRidge {
    pub dr_entries: RockRidgeEntries,
    pub ce_entries: RockRidgeEntries,
    pub version: Option<RrVersion>,
    /// Index of the continuation block (in the PVD's list) hosting the
    /// ce_entries, if any.
    pub ce_block: Option<usize>,
    /// The relocated directory a CL record on this entry points at.
    pub cl_to_moved: Option<DrId>,
    /// The logical parent a PL record on this entry points back to.
    pub parent_link: Option<DrId>,
    pub bytes_to_skip: u8,
    full_name: Vec<u8>,
}

impl RockRidge {
    /// True if the named singleton record was already seen on either
    /// side.
    fn has_singleton(&self, sig: &[u8]) -> bool {
        let check = |e: &RockRidgeEntries| match sig {
            b"SP" => e.sp_record.is_some(),
            b"RR" => e.rr_record.is_some(),
            b"CE" => e.ce_record.is_some(),
            b"PX" => e.px_record.is_some(),
            b"ST" => e.st_record.is_some(),
            b"ER" => e.er_record.is_some(),
            b"PN" => e.pn_record.is_some(),
            b"CL" => e.cl_record.is_some(),
            b"PL" => e.pl_record.is_some(),
            b"RE" => e.re_record.is_some(),
            b"TF" => e.tf_record.is_some(),
            b"SF" => e.sf_record.is_some(),
            _ => false,
        };
        check(&self.dr_entries) || check(&self.ce_entries)
    }

    /// Parse one SUSP area.  Called once for the directory record's
    /// inline area and again (with `continuation` set) for the bytes a
    /// CE record points at.
    pub fn parse(
        &mut self,
        record: &[u8],
        is_first_dir_record_of_root: bool,
        bytes_to_skip: u8,
        continuation: bool,
    ) -> Result<()> {
        self.bytes_to_skip = bytes_to_skip;

        let mut offset = bytes_to_skip as usize;
        let mut left = record.len().saturating_sub(offset);
        let mut px_record_length: Option<usize> = None;
        let mut sf_record_length: Option<usize> = None;
        let mut has_es_record = false;
        let mut er_id: Option<Vec<u8>> = None;

        loop {
            if left == 0 {
                break;
            }
            if left == 1 {
                if record[offset] != 0 {
                    return Err(Error::invalid_iso("invalid pad byte"));
                }
                break;
            }
            if left < 4 {
                return Err(Error::invalid_iso("not enough bytes left in the system use field"));
            }

            let sig = &record[offset..offset + 2];
            let su_len = record[offset + 2] as usize;
            let su_entry_version = record[offset + 3];
            if su_entry_version != SU_ENTRY_VERSION {
                return Err(Error::invalid_iso(format!(
                    "invalid RR version {}",
                    su_entry_version
                )));
            }
            if su_len == 0 {
                return Err(Error::invalid_iso("zero size for rock ridge entry length"));
            }
            if su_len > left {
                return Err(Error::invalid_iso("rock ridge entry overruns the system use field"));
            }

            if matches!(
                sig,
                b"SP" | b"RR" | b"CE" | b"PX" | b"ST" | b"ER" | b"PN" | b"CL" | b"PL" | b"RE"
                    | b"TF" | b"SF"
            ) && self.has_singleton(sig)
            {
                return Err(Error::invalid_iso(format!(
                    "only single {} record supported",
                    String::from_utf8_lossy(sig)
                )));
            }

            let slice = &record[offset..];
            let entries = if continuation {
                &mut self.ce_entries
            } else {
                &mut self.dr_entries
            };
            match sig {
                b"SP" => {
                    if left < 7 || !is_first_dir_record_of_root {
                        return Err(Error::invalid_iso("invalid SUSP SP record"));
                    }
                    entries.sp_record = Some(SpRecord::parse(slice)?);
                }
                b"RR" => entries.rr_record = Some(RrRecord::parse(slice)?),
                b"CE" => entries.ce_record = Some(CeRecord::parse(slice)?),
                b"PX" => {
                    let (px, len) = PxRecord::parse(slice)?;
                    entries.px_record = Some(px);
                    px_record_length = Some(len);
                }
                b"PD" => entries.pd_records.push(PdRecord::parse(slice)?),
                b"ST" => entries.st_record = Some(StRecord::parse(slice)?),
                b"ER" => {
                    let er = ErRecord::parse(slice)?;
                    er_id = Some(er.ext_id.clone());
                    entries.er_record = Some(er);
                }
                b"ES" => {
                    entries.es_records.push(EsRecord::parse(slice)?);
                    has_es_record = true;
                }
                b"PN" => entries.pn_record = Some(PnRecord::parse(slice)?),
                b"SL" => entries.sl_records.push(SlRecord::parse(slice)?),
                b"NM" => entries.nm_records.push(NmRecord::parse(slice)?),
                b"CL" => entries.cl_record = Some(ClRecord::parse(slice)?),
                b"PL" => entries.pl_record = Some(PlRecord::parse(slice)?),
                b"RE" => entries.re_record = Some(ReRecord::parse(slice)?),
                b"TF" => entries.tf_record = Some(TfRecord::parse(slice)?),
                b"SF" => {
                    let (sf, len) = SfRecord::parse(slice)?;
                    entries.sf_record = Some(sf);
                    sf_record_length = Some(len);
                }
                b"AL" => entries.al_records.push(AlRecord::parse(slice)?),
                _ => return Err(Error::invalid_iso("unknown SUSP record")),
            }

            offset += su_len;
            left -= su_len;
        }

        // There is no version field anywhere in Rock Ridge, so infer it
        // from what is present.  Some ISOs in the wild (OpenSolaris
        // 2008) put an RR record into an otherwise 1.12 entry, so the
        // table is a hint, not a law.
        self.version = Some(
            if px_record_length == Some(44)
                || sf_record_length == Some(21)
                || has_es_record
                || er_id.as_deref() == Some(EXT_ID_112)
            {
                RrVersion::V1_12
            } else if sf_record_length == Some(12) {
                RrVersion::V1_10
            } else {
                RrVersion::V1_09
            },
        );

        self.recompute_full_name();
        Ok(())
    }

    fn recompute_full_name(&mut self) {
        let mut name = Vec::new();
        for nm in self
            .dr_entries
            .nm_records
            .iter()
            .chain(self.ce_entries.nm_records.iter())
        {
            name.extend_from_slice(&nm.posix_name);
        }
        self.full_name = name;
    }

    fn record_entries(&self, entries: &RockRidgeEntries) -> Vec<u8> {
        let version = self.version.unwrap_or(RrVersion::V1_09);
        let mut out = Vec::new();
        if let Some(sp) = &entries.sp_record {
            out.extend_from_slice(&sp.record());
        }
        if let Some(rr) = &entries.rr_record {
            out.extend_from_slice(&rr.record());
        }
        for nm in &entries.nm_records {
            out.extend_from_slice(&nm.record());
        }
        if let Some(px) = &entries.px_record {
            out.extend_from_slice(&px.record(version));
        }
        for sl in &entries.sl_records {
            out.extend_from_slice(&sl.record());
        }
        if let Some(tf) = &entries.tf_record {
            out.extend_from_slice(&tf.record());
        }
        if let Some(cl) = &entries.cl_record {
            out.extend_from_slice(&cl.record());
        }
        if let Some(pl) = &entries.pl_record {
            out.extend_from_slice(&pl.record());
        }
        if let Some(re) = &entries.re_record {
            out.extend_from_slice(&re.record());
        }
        for es in &entries.es_records {
            out.extend_from_slice(&es.record());
        }
        if let Some(er) = &entries.er_record {
            out.extend_from_slice(&er.record());
        }
        for al in &entries.al_records {
            out.extend_from_slice(&al.record());
        }
        if let Some(ce) = &entries.ce_record {
            out.extend_from_slice(&ce.record());
        }
        for pd in &entries.pd_records {
            out.extend_from_slice(&pd.record());
        }
        if let Some(st) = &entries.st_record {
            out.extend_from_slice(&st.record());
        }
        if let Some(sf) = &entries.sf_record {
            out.extend_from_slice(&sf.record());
        }
        out
    }

    /// The SUSP bytes emitted inline in the owning directory record.
    pub fn record_dr_entries(&self) -> Vec<u8> {
        self.record_entries(&self.dr_entries)
    }

    /// The SUSP bytes emitted in the continuation block.
    pub fn record_ce_entries(&self) -> Vec<u8> {
        self.record_entries(&self.ce_entries)
    }

    fn place<T>(
        dst_dr: &mut Option<T>,
        dst_ce: &mut Option<T>,
        ce: &mut Option<CeRecord>,
        rec: T,
        thislen: usize,
        curr_dr_len: usize,
    ) -> Option<usize> {
        if curr_dr_len + thislen > ALLOWED_DR_SIZE {
            match ce {
                None => None,
                Some(ce) => {
                    ce.add_record(thislen);
                    *dst_ce = Some(rec);
                    Some(curr_dr_len)
                }
            }
        } else {
            *dst_dr = Some(rec);
            Some(curr_dr_len + thislen)
        }
    }

    /// Add the NM record chain for `name`, chunking into the
    /// continuation area as needed.  Returns the new DR length, or None
    /// if it cannot fit without a CE record.
    fn add_name(&mut self, name: &[u8], mut curr_dr_len: usize) -> Option<usize> {
        let len_here_signed = ALLOWED_DR_SIZE as isize - curr_dr_len as isize - 5;
        let mut len_here = len_here_signed.max(0) as usize;
        if len_here < name.len() && self.dr_entries.ce_record.is_none() {
            return None;
        }
        len_here = len_here.min(name.len());

        if len_here > 0 {
            let mut nm = NmRecord::new(&name[..len_here]);
            curr_dr_len += NmRecord::length(&name[..len_here]);
            if len_here < name.len() {
                nm.set_continued();
            }
            self.dr_entries.nm_records.push(nm);
        }

        let mut offset = len_here;
        while offset < name.len() {
            self.dr_entries.ce_record.as_ref()?;

            // 250 is the largest name payload a single NM entry can
            // carry.
            let length = (name.len() - offset).min(250);
            let mut nm = NmRecord::new(&name[offset..offset + length]);
            if offset + length < name.len() {
                nm.set_continued();
            }
            self.ce_entries.nm_records.push(nm);
            if let Some(ce) = self.dr_entries.ce_record.as_mut() {
                ce.add_record(NmRecord::length(&name[offset..offset + length]));
            }
            offset += length;
        }

        Some(curr_dr_len)
    }

    /// Add the SL record chain for a symlink target, chunking records
    /// and components into the continuation area as needed.
    fn add_symlink(&mut self, target: &[u8], mut curr_dr_len: usize) -> Result<Option<usize>> {
        let comps: Vec<&[u8]> = target.split(|&b| b == b'/').collect();
        let whole_len = SlRecord::HEADER_LENGTH
            + comps
                .iter()
                .map(|c| SlComponent::length(c))
                .sum::<usize>();
        if curr_dr_len + whole_len > ALLOWED_DR_SIZE && self.dr_entries.ce_record.is_none() {
            return Ok(None);
        }

        let mut curr_in_dr;
        let mut curr_comp_area_len: isize;
        let smallest = SlRecord::HEADER_LENGTH + SlComponent::length(b"a");
        if curr_dr_len + smallest < ALLOWED_DR_SIZE {
            curr_comp_area_len =
                ALLOWED_DR_SIZE as isize - curr_dr_len as isize - SlRecord::HEADER_LENGTH as isize;
            self.dr_entries.sl_records.push(SlRecord::default());
            curr_dr_len += SlRecord::HEADER_LENGTH;
            curr_in_dr = true;
        } else {
            curr_comp_area_len = SlRecord::maximum_component_area_length() as isize;
            self.ce_entries.sl_records.push(SlRecord::default());
            if let Some(ce) = self.dr_entries.ce_record.as_mut() {
                ce.add_record(SlRecord::HEADER_LENGTH);
            }
            curr_in_dr = false;
        }

        for (index, comp) in comps.iter().enumerate() {
            let comp: &[u8] = comp;
            let (special, comp, mincomp): (bool, &[u8], &[u8]) = if index == 0 && comp.is_empty() {
                (true, b"/", b"/")
            } else if comp == b"." {
                (true, comp, comp)
            } else if comp == b".." {
                (true, comp, comp)
            } else if comp.is_empty() {
                return Err(Error::invalid_input("empty symlink component"));
            } else {
                (false, comp, b"a")
            };

            let mut offset = 0usize;
            loop {
                let minimum = SlComponent::length(mincomp) as isize;
                if minimum > curr_comp_area_len {
                    // The previous SL record is out of room; continue
                    // in a fresh record in the continuation area.
                    {
                        let curr = if curr_in_dr {
                            self.dr_entries.sl_records.last_mut()
                        } else {
                            self.ce_entries.sl_records.last_mut()
                        }
                        .expect("an SL record is always current here");
                        curr.set_continued();
                        if offset != 0 {
                            curr.set_last_component_continued();
                        }
                    }
                    self.ce_entries.sl_records.push(SlRecord::default());
                    curr_comp_area_len = SlRecord::maximum_component_area_length() as isize;
                    if let Some(ce) = self.dr_entries.ce_record.as_mut() {
                        ce.add_record(SlRecord::HEADER_LENGTH);
                    }
                    curr_in_dr = false;
                }

                let (length, compslice): (usize, &[u8]) = if special {
                    (0, comp)
                } else {
                    let complen = SlComponent::length(&comp[offset..]);
                    let length = if complen as isize > curr_comp_area_len {
                        (curr_comp_area_len - 2) as usize
                    } else {
                        complen
                    };
                    (length, &comp[offset..(offset + length).min(comp.len())])
                };

                {
                    let curr = if curr_in_dr {
                        self.dr_entries.sl_records.last_mut()
                    } else {
                        self.ce_entries.sl_records.last_mut()
                    }
                    .expect("an SL record is always current here");
                    curr.add_component(compslice)?;
                }

                let used = SlComponent::length(compslice);
                if curr_in_dr {
                    curr_dr_len += used;
                } else if let Some(ce) = self.dr_entries.ce_record.as_mut() {
                    ce.add_record(used);
                }

                offset += length;
                curr_comp_area_len -= length as isize + 2;

                if special || offset >= comp.len() {
                    break;
                }
            }
        }

        Ok(Some(curr_dr_len))
    }

    /// Add AL record chains for arbitrary attributes; same shape as the
    /// symlink chunking.
    fn add_attributes(
        &mut self,
        attributes: &[(Vec<u8>, Vec<u8>)],
        mut curr_dr_len: usize,
    ) -> Result<Option<usize>> {
        let attr_list: Vec<&[u8]> = attributes
            .iter()
            .flat_map(|(k, v)| [k.as_slice(), v.as_slice()])
            .collect();
        let whole_len = AlRecord::HEADER_LENGTH
            + attr_list.iter().map(|a| 2 + a.len()).sum::<usize>();
        if curr_dr_len + whole_len > ALLOWED_DR_SIZE && self.dr_entries.ce_record.is_none() {
            return Ok(None);
        }

        let mut curr_in_dr;
        let mut curr_comp_area_len: isize;
        let smallest = AlRecord::HEADER_LENGTH + 3;
        if curr_dr_len + smallest < ALLOWED_DR_SIZE {
            curr_comp_area_len =
                ALLOWED_DR_SIZE as isize - curr_dr_len as isize - AlRecord::HEADER_LENGTH as isize;
            self.dr_entries.al_records.push(AlRecord::default());
            curr_dr_len += AlRecord::HEADER_LENGTH;
            curr_in_dr = true;
        } else {
            curr_comp_area_len = AlRecord::maximum_component_area_length() as isize;
            if let Some(ce) = self.dr_entries.ce_record.as_mut() {
                ce.add_record(AlRecord::HEADER_LENGTH);
            }
            self.ce_entries.al_records.push(AlRecord::default());
            curr_in_dr = false;
        }

        for attr in attr_list {
            let mut offset = 0usize;
            loop {
                if 3 > curr_comp_area_len {
                    {
                        let curr = if curr_in_dr {
                            self.dr_entries.al_records.last_mut()
                        } else {
                            self.ce_entries.al_records.last_mut()
                        }
                        .expect("an AL record is always current here");
                        curr.set_continued();
                        if offset != 0 {
                            curr.set_last_component_continued();
                        }
                    }
                    self.ce_entries.al_records.push(AlRecord::default());
                    curr_comp_area_len = AlRecord::maximum_component_area_length() as isize;
                    if let Some(ce) = self.dr_entries.ce_record.as_mut() {
                        ce.add_record(AlRecord::HEADER_LENGTH);
                    }
                    curr_in_dr = false;
                }

                let complen = 2 + attr.len() - offset;
                let length = if complen as isize > curr_comp_area_len {
                    (curr_comp_area_len - 2) as usize
                } else {
                    complen
                };
                let compslice = &attr[offset..(offset + length).min(attr.len())];

                {
                    let curr = if curr_in_dr {
                        self.dr_entries.al_records.last_mut()
                    } else {
                        self.ce_entries.al_records.last_mut()
                    }
                    .expect("an AL record is always current here");
                    curr.add_component(compslice)?;
                }

                let used = 2 + compslice.len();
                if curr_in_dr {
                    curr_dr_len += used;
                } else if let Some(ce) = self.dr_entries.ce_record.as_mut() {
                    ce.add_record(used);
                }

                offset += length;
                curr_comp_area_len -= length as isize + 2;

                if offset >= attr.len() {
                    break;
                }
            }
        }

        Ok(Some(curr_dr_len))
    }

    fn assign_entries(&mut self, opts: &RockRidgeOptions<'_>, mut curr_dr_len: usize) -> Result<Option<usize>> {
        let version = opts.version;

        // SP comes first, and only on the first directory record of
        // the root.
        if opts.is_first_dir_record_of_root {
            let thislen = SpRecord::LENGTH;
            let rec = SpRecord::new(opts.bytes_to_skip);
            match Self::place(
                &mut self.dr_entries.sp_record,
                &mut self.ce_entries.sp_record,
                &mut self.dr_entries.ce_record,
                rec,
                thislen,
                curr_dr_len,
            ) {
                None => return Ok(None),
                Some(len) => curr_dr_len = len,
            }
        }

        let mut rr_fields: Vec<RrField> = Vec::new();
        let use_rr_record = version == RrVersion::V1_09;
        if use_rr_record {
            let thislen = RrRecord::LENGTH;
            match Self::place(
                &mut self.dr_entries.rr_record,
                &mut self.ce_entries.rr_record,
                &mut self.dr_entries.ce_record,
                RrRecord::default(),
                thislen,
                curr_dr_len,
            ) {
                None => return Ok(None),
                Some(len) => curr_dr_len = len,
            }
        }

        if !opts.name.is_empty() {
            match self.add_name(opts.name, curr_dr_len) {
                None => return Ok(None),
                Some(len) => curr_dr_len = len,
            }
            rr_fields.push(RrField::Nm);
        }

        let thislen = version.px_length();
        match Self::place(
            &mut self.dr_entries.px_record,
            &mut self.ce_entries.px_record,
            &mut self.dr_entries.ce_record,
            PxRecord::new(opts.file_mode),
            thislen,
            curr_dr_len,
        ) {
            None => return Ok(None),
            Some(len) => curr_dr_len = len,
        }
        rr_fields.push(RrField::Px);

        if !opts.symlink_target.is_empty() {
            match self.add_symlink(opts.symlink_target, curr_dr_len)? {
                None => return Ok(None),
                Some(len) => curr_dr_len = len,
            }
            rr_fields.push(RrField::Sl);
        }

        let thislen = TfRecord::length(TF_FLAGS);
        match Self::place(
            &mut self.dr_entries.tf_record,
            &mut self.ce_entries.tf_record,
            &mut self.dr_entries.ce_record,
            TfRecord::new(TF_FLAGS),
            thislen,
            curr_dr_len,
        ) {
            None => return Ok(None),
            Some(len) => curr_dr_len = len,
        }
        rr_fields.push(RrField::Tf);

        if opts.relocated_child {
            let thislen = ClRecord::LENGTH;
            match Self::place(
                &mut self.dr_entries.cl_record,
                &mut self.ce_entries.cl_record,
                &mut self.dr_entries.ce_record,
                ClRecord::default(),
                thislen,
                curr_dr_len,
            ) {
                None => return Ok(None),
                Some(len) => curr_dr_len = len,
            }
            rr_fields.push(RrField::Cl);
        }

        if opts.relocated {
            let thislen = ReRecord::LENGTH;
            match Self::place(
                &mut self.dr_entries.re_record,
                &mut self.ce_entries.re_record,
                &mut self.dr_entries.ce_record,
                ReRecord,
                thislen,
                curr_dr_len,
            ) {
                None => return Ok(None),
                Some(len) => curr_dr_len = len,
            }
            rr_fields.push(RrField::Re);
        }

        if opts.relocated_parent {
            let thislen = PlRecord::LENGTH;
            match Self::place(
                &mut self.dr_entries.pl_record,
                &mut self.ce_entries.pl_record,
                &mut self.dr_entries.ce_record,
                PlRecord::default(),
                thislen,
                curr_dr_len,
            ) {
                None => return Ok(None),
                Some(len) => curr_dr_len = len,
            }
            rr_fields.push(RrField::Pl);
        }

        if opts.is_first_dir_record_of_root {
            let (id, des, src) = match version {
                RrVersion::V1_09 | RrVersion::V1_10 => (EXT_ID_109, EXT_DES_109, EXT_SRC_109),
                RrVersion::V1_12 => (EXT_ID_112, EXT_DES_112, EXT_SRC_112),
            };
            let thislen = ErRecord::length(id, des, src);
            match Self::place(
                &mut self.dr_entries.er_record,
                &mut self.ce_entries.er_record,
                &mut self.dr_entries.ce_record,
                ErRecord::new(id, des, src),
                thislen,
                curr_dr_len,
            ) {
                None => return Ok(None),
                Some(len) => curr_dr_len = len,
            }
        }

        if !opts.attributes.is_empty() {
            match self.add_attributes(opts.attributes, curr_dr_len)? {
                None => return Ok(None),
                Some(len) => curr_dr_len = len,
            }
        }

        if use_rr_record {
            let rr = self
                .dr_entries
                .rr_record
                .as_mut()
                .or(self.ce_entries.rr_record.as_mut())
                .expect("RR record placed above for 1.09");
            for field in rr_fields {
                rr.append_field(field);
            }
        }

        Ok(Some(curr_dr_len))
    }

    /// Create a new Rock Ridge extension for a directory record whose
    /// non-SUSP prefix is `curr_dr_len` bytes.  Returns the extension
    /// and the new (even-padded) directory record length.  If the
    /// records do not fit inline, everything is reassigned once with a
    /// freshly allocated CE record; one retry is always sufficient.
    pub fn new(opts: &RockRidgeOptions<'_>, curr_dr_len: usize) -> Result<(RockRidge, usize)> {
        let mut rr = RockRidge {
            version: Some(opts.version),
            ..RockRidge::default()
        };

        let mut new_dr_len = rr.assign_entries(opts, curr_dr_len)?;

        if new_dr_len.is_none() {
            rr.dr_entries = RockRidgeEntries::default();
            rr.ce_entries = RockRidgeEntries::default();
            rr.dr_entries.ce_record = Some(CeRecord::default());
            let retry_len = curr_dr_len + CeRecord::LENGTH;
            new_dr_len = rr.assign_entries(opts, retry_len)?;
            if new_dr_len.is_none() {
                return Err(Error::internal("could not assign rock ridge entries"));
            }
        }

        let mut new_dr_len = new_dr_len.expect("set above");
        if new_dr_len > ALLOWED_DR_SIZE {
            return Err(Error::internal("rock ridge entry increased DR length too far"));
        }
        new_dr_len += new_dr_len % 2;

        rr.recompute_full_name();
        Ok((rr, new_dr_len))
    }

    fn px_mut(&mut self) -> Result<&mut PxRecord> {
        if self.dr_entries.px_record.is_some() {
            return Ok(self.dr_entries.px_record.as_mut().unwrap());
        }
        self.ce_entries
            .px_record
            .as_mut()
            .ok_or_else(|| Error::invalid_input("no rock ridge file links"))
    }

    fn px(&self) -> Result<&PxRecord> {
        self.dr_entries
            .px_record
            .as_ref()
            .or(self.ce_entries.px_record.as_ref())
            .ok_or_else(|| Error::invalid_input("no rock ridge file links"))
    }

    pub fn add_to_file_links(&mut self) -> Result<()> {
        self.px_mut()?.posix_file_links += 1;
        Ok(())
    }

    pub fn remove_from_file_links(&mut self) -> Result<()> {
        self.px_mut()?.posix_file_links -= 1;
        Ok(())
    }

    pub fn copy_file_links(&mut self, src: &RockRidge) -> Result<()> {
        let links = src.px()?.posix_file_links;
        self.px_mut()?.posix_file_links = links;
        Ok(())
    }

    pub fn file_mode(&self) -> Result<u32> {
        Ok(self.px()?.posix_file_mode)
    }

    /// The full alternate name, glued together across chunked NM
    /// records.
    pub fn name(&self) -> &[u8] {
        &self.full_name
    }

    pub fn is_symlink(&self) -> bool {
        !self.dr_entries.sl_records.is_empty() || !self.ce_entries.sl_records.is_empty()
    }

    /// Reconstruct the symlink target from the SL record chain.
    pub fn symlink_path(&self) -> Result<Vec<u8>> {
        if !self.is_symlink() {
            return Err(Error::invalid_input("entry is not a symlink"));
        }
        let mut parts: Vec<Vec<u8>> = Vec::new();
        let mut saved: Vec<u8> = Vec::new();
        for rec in self
            .dr_entries
            .sl_records
            .iter()
            .chain(self.ce_entries.sl_records.iter())
        {
            saved.extend_from_slice(&rec.name());
            if !rec.last_component_continued() {
                parts.push(std::mem::take(&mut saved));
            }
        }
        if !saved.is_empty() {
            return Err(Error::invalid_iso(
                "saw a continued symlink record with no end; ISO is probably malformed",
            ));
        }
        Ok(parts.join(&b'/'))
    }

    pub fn child_link_record_exists(&self) -> bool {
        self.dr_entries.cl_record.is_some() || self.ce_entries.cl_record.is_some()
    }

    pub fn child_link_extent(&self) -> Result<u32> {
        self.dr_entries
            .cl_record
            .as_ref()
            .or(self.ce_entries.cl_record.as_ref())
            .map(|cl| cl.child_log_block_num)
            .ok_or_else(|| Error::internal("asked for child extent for non-existent child record"))
    }

    /// Copy a freshly laid-out extent into the CL record.
    pub fn set_child_link_extent(&mut self, extent: u32) -> Result<()> {
        if let Some(cl) = self.dr_entries.cl_record.as_mut() {
            cl.child_log_block_num = extent;
            return Ok(());
        }
        if let Some(cl) = self.ce_entries.cl_record.as_mut() {
            cl.child_log_block_num = extent;
            return Ok(());
        }
        Err(Error::invalid_input("could not find child link record"))
    }

    pub fn parent_link_record_exists(&self) -> bool {
        self.dr_entries.pl_record.is_some() || self.ce_entries.pl_record.is_some()
    }

    pub fn parent_link_extent(&self) -> Result<u32> {
        self.dr_entries
            .pl_record
            .as_ref()
            .or(self.ce_entries.pl_record.as_ref())
            .map(|pl| pl.parent_log_block_num)
            .ok_or_else(|| Error::internal("asked for parent extent for non-existent parent record"))
    }

    /// Copy a freshly laid-out extent into the PL record.
    pub fn set_parent_link_extent(&mut self, extent: u32) -> Result<()> {
        if let Some(pl) = self.dr_entries.pl_record.as_mut() {
            pl.parent_log_block_num = extent;
            return Ok(());
        }
        if let Some(pl) = self.ce_entries.pl_record.as_mut() {
            pl.parent_log_block_num = extent;
            return Ok(());
        }
        Err(Error::invalid_input("could not find parent link record"))
    }

    pub fn relocated_record(&self) -> bool {
        self.dr_entries.re_record.is_some() || self.ce_entries.re_record.is_some()
    }

    /// The length of the inline SUSP area this extension adds to its
    /// directory record.
    pub fn dr_record_length(&self) -> usize {
        self.record_dr_entries().len()
    }
}

/// Options for building a new Rock Ridge extension.
pub struct RockRidgeOptions<'a> {
    pub is_first_dir_record_of_root: bool,
    pub name: &'a [u8],
    pub file_mode: u32,
    pub symlink_target: &'a [u8],
    pub version: RrVersion,
    pub relocated_child: bool,
    pub relocated: bool,
    pub relocated_parent: bool,
    pub bytes_to_skip: u8,
    pub attributes: &'a [(Vec<u8>, Vec<u8>)],
}

impl<'a> RockRidgeOptions<'a> {
    pub fn file(version: RrVersion, name: &'a [u8], file_mode: u32) -> Self {
        RockRidgeOptions {
            is_first_dir_record_of_root: false,
            name,
            file_mode,
            symlink_target: b"",
            version,
            relocated_child: false,
            relocated: false,
            relocated_parent: false,
            bytes_to_skip: 0,
            attributes: &[],
        }
    }
}

/// One reservation inside a continuation block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContinuationEntry {
    pub offset: usize,
    pub length: usize,
}

/// One logical block hosting packed continuation entries.  Tracks only
/// the (offset, length) reservations; the record bytes live with their
/// Rock Ridge owners.
#[derive(Debug)]
pub struct RockRidgeContinuationBlock {
    extent: Option<u32>,
    max_block_size: usize,
    entries: Vec<ContinuationEntry>,
}

impl RockRidgeContinuationBlock {
    pub fn new(extent: Option<u32>, max_block_size: usize) -> Self {
        RockRidgeContinuationBlock {
            extent,
            max_block_size,
            entries: Vec::new(),
        }
    }

    pub fn extent_location(&self) -> Option<u32> {
        self.extent
    }

    pub fn set_extent_location(&mut self, extent: Option<u32>) {
        self.extent = extent;
    }

    /// Record an already-placed reservation from parsing.  Overlaps
    /// are rejected.
    pub fn track_entry(&mut self, offset: usize, length: usize) -> Result<()> {
        let new_end = offset + length;
        for entry in &self.entries {
            let this_end = entry.offset + entry.length;
            if offset < this_end && entry.offset < new_end {
                return Err(Error::invalid_iso("overlapping CE regions on the ISO"));
            }
        }
        if offset + length > self.max_block_size {
            return Err(Error::invalid_iso("no room in continuation block to track entry"));
        }
        let pos = self
            .entries
            .partition_point(|e| e.offset < offset);
        self.entries.insert(pos, ContinuationEntry { offset, length });
        Ok(())
    }

    /// Find the first gap that fits `length` bytes, reserve it, and
    /// return its offset.  None if this block has no room.
    pub fn add_entry(&mut self, length: usize) -> Option<usize> {
        let mut offset: Option<usize> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if index == 0 {
                if entry.offset != 0 && length <= entry.offset {
                    offset = Some(0);
                    break;
                }
            } else {
                let last = &self.entries[index - 1];
                let last_end = last.offset + last.length;
                if entry.offset - last_end >= length {
                    offset = Some(last_end);
                    break;
                }
            }
        }
        if offset.is_none() {
            match self.entries.last() {
                Some(last) => {
                    let last_end = last.offset + last.length;
                    if self.max_block_size - last_end >= length {
                        offset = Some(last_end);
                    }
                }
                None => {
                    if self.max_block_size >= length {
                        offset = Some(0);
                    }
                }
            }
        }

        if let Some(off) = offset {
            let pos = self.entries.partition_point(|e| e.offset < off);
            self.entries.insert(pos, ContinuationEntry { offset: off, length });
        }
        offset
    }

    /// Drop the reservation matching exactly (offset, length).
    pub fn remove_entry(&mut self, offset: usize, length: usize) -> Result<()> {
        match self
            .entries
            .iter()
            .position(|e| e.offset == offset && e.length == length)
        {
            Some(pos) => {
                self.entries.remove(pos);
                Ok(())
            }
            None => Err(Error::internal(
                "could not find an entry for the RR CE entry in the CE block",
            )),
        }
    }

    pub fn entries(&self) -> &[ContinuationEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use byteorder::{ByteOrder, LittleEndian};

    use super::*;

    /// Read a CE record's little-endian length field out of raw bytes
    /// without a full parse.
    fn ce_len_cont_area(data: &[u8]) -> u32 {
        LittleEndian::read_u32(&data[20..24])
    }

    #[test]
    fn sp_record_round_trip() {
        let sp = SpRecord::parse(b"SP\x07\x01\xbe\xef\x00").unwrap();
        assert_eq!(sp.bytes_to_skip, 0);
        assert_eq!(sp.record(), b"SP\x07\x01\xbe\xef\x00");
    }

    #[test]
    fn sp_record_bad_check_bytes() {
        assert!(SpRecord::parse(b"SP\x07\x01\xbf\xef\x00").is_err());
        assert!(SpRecord::parse(b"SP\x06\x01\xbe\xef\x00").is_err());
    }

    #[test]
    fn rr_record_field_mask() {
        let mut rr = RrRecord::default();
        rr.append_field(RrField::Px);
        assert_eq!(rr.rr_flags, 0x1);
        rr.append_field(RrField::Tf);
        assert_eq!(rr.rr_flags, 0x81);
        assert_eq!(rr.record(), b"RR\x05\x01\x81");
    }

    #[test]
    fn ce_record_round_trip() {
        let mut raw = vec![b'C', b'E', 28, 1];
        raw.resize(28, 0);
        encode_both_u32(&mut raw[4..12], 24);
        encode_both_u32(&mut raw[12..20], 0);
        encode_both_u32(&mut raw[20..28], 92);
        let ce = CeRecord::parse(&raw).unwrap();
        assert_eq!(ce.bl_cont_area, 24);
        assert_eq!(ce.len_cont_area, 92);
        assert_eq!(ce.record(), raw);
    }

    #[test]
    fn px_record_version_lengths() {
        let px = PxRecord::new(0o100444);
        assert_eq!(px.record(RrVersion::V1_09).len(), 36);
        assert_eq!(px.record(RrVersion::V1_12).len(), 44);
        let (parsed, len) = PxRecord::parse(&px.record(RrVersion::V1_12)).unwrap();
        assert_eq!(len, 44);
        assert_eq!(parsed.posix_file_mode, 0o100444);
        assert_eq!(parsed.posix_file_links, 1);
    }

    #[test]
    fn er_record_round_trip() {
        let er = ErRecord::new(EXT_ID_109, EXT_DES_109, EXT_SRC_109);
        let rec = er.record();
        assert_eq!(rec.len(), er.len());
        let parsed = ErRecord::parse(&rec).unwrap();
        assert_eq!(parsed.ext_id, EXT_ID_109);
        assert_eq!(parsed.ext_ver, 1);
    }

    #[test]
    fn sl_component_specials() {
        assert_eq!(SlComponent::factory(b".").record(), vec![2, 0]);
        assert_eq!(SlComponent::factory(b"..").record(), vec![4, 0]);
        assert_eq!(SlComponent::factory(b"/").record(), vec![8, 0]);
        assert_eq!(SlComponent::factory(b"usr").record(), vec![0, 3, b'u', b's', b'r']);
        assert_eq!(SlComponent::length(b".."), 2);
        assert_eq!(SlComponent::length(b"usr"), 5);
    }

    #[test]
    fn sl_record_name_with_root_reset() {
        let mut sl = SlRecord::default();
        sl.add_component(b"ignored").unwrap();
        sl.add_component(b"/").unwrap();
        sl.add_component(b"usr").unwrap();
        sl.add_component(b"bin").unwrap();
        assert_eq!(sl.name(), b"/usr/bin");
    }

    #[test]
    fn sl_record_round_trip() {
        let mut sl = SlRecord::default();
        sl.add_component(b"..").unwrap();
        sl.add_component(b"lib").unwrap();
        let rec = sl.record();
        let parsed = SlRecord::parse(&rec).unwrap();
        assert_eq!(parsed, sl);
        assert_eq!(parsed.name(), b"../lib");
    }

    #[test]
    fn nm_record_round_trip() {
        let nm = NmRecord::new(b"longname.txt");
        let rec = nm.record();
        assert_eq!(rec[2] as usize, NmRecord::length(b"longname.txt"));
        let parsed = NmRecord::parse(&rec).unwrap();
        assert_eq!(parsed.posix_name, b"longname.txt");
    }

    #[test]
    fn tf_record_default_flags() {
        let tf = TfRecord::new(TF_FLAGS);
        assert_eq!(tf.stamps.len(), 3);
        let rec = tf.record();
        assert_eq!(rec.len(), TfRecord::length(TF_FLAGS));
        assert_eq!(rec.len(), 5 + 3 * 7);
        let parsed = TfRecord::parse(&rec).unwrap();
        assert_eq!(parsed.time_flags, TF_FLAGS);
        assert_eq!(parsed.stamps.len(), 3);
    }

    #[test]
    fn re_and_st_records() {
        assert_eq!(ReRecord.record(), b"RE\x04\x01");
        assert_eq!(StRecord.record(), b"ST\x04\x01");
        assert!(ReRecord::parse(b"RE\x04\x01").is_ok());
        assert!(ReRecord::parse(b"RE\x05\x01\x00").is_err());
    }

    fn file_rr(name: &[u8]) -> (RockRidge, usize) {
        let opts = RockRidgeOptions::file(RrVersion::V1_09, name, 0o100444);
        // 33 header bytes + an 8.3-style identifier.
        RockRidge::new(&opts, 44).unwrap()
    }

    #[test]
    fn short_name_fits_inline() {
        let (rr, dr_len) = file_rr(b"hello.txt");
        assert!(rr.dr_entries.ce_record.is_none());
        assert_eq!(rr.name(), b"hello.txt");
        assert_eq!(dr_len % 2, 0);
        assert!(dr_len <= ALLOWED_DR_SIZE);
        assert!(rr.dr_entries.rr_record.is_some());
        assert!(rr.dr_entries.px_record.is_some());
        assert!(rr.dr_entries.tf_record.is_some());
    }

    #[test]
    fn long_name_overflows_to_continuation() {
        let name = vec![b'a'; 250];
        let (rr, dr_len) = file_rr(&name);
        let ce = rr.dr_entries.ce_record.as_ref().expect("CE record expected");
        assert!(dr_len <= ALLOWED_DR_SIZE);
        // The pieces inline plus in the continuation area must
        // reassemble the full name, with every record but the last
        // marked continued.
        let total: usize = rr
            .dr_entries
            .nm_records
            .iter()
            .chain(rr.ce_entries.nm_records.iter())
            .map(|nm| nm.posix_name.len())
            .sum();
        assert_eq!(total, 250);
        assert_eq!(rr.name(), &name[..]);
        let all: Vec<&NmRecord> = rr
            .dr_entries
            .nm_records
            .iter()
            .chain(rr.ce_entries.nm_records.iter())
            .collect();
        assert!(all.len() >= 2);
        for nm in &all[..all.len() - 1] {
            assert_eq!(nm.posix_name_flags & 1, 1);
        }
        assert_eq!(all.last().unwrap().posix_name_flags & 1, 0);
        // The CE record's length covers exactly the ce-side bytes.
        assert_eq!(ce.len_cont_area as usize, rr.record_ce_entries().len());
    }

    #[test]
    fn inline_area_stays_within_limit() {
        for len in [1usize, 50, 100, 150, 200, 250] {
            let name = vec![b'n'; len];
            let (rr, dr_len) = file_rr(&name);
            assert!(dr_len <= ALLOWED_DR_SIZE, "len {} gave dr_len {}", len, dr_len);
            assert_eq!(dr_len % 2, 0);
            assert_eq!(rr.name(), &name[..]);
            assert!(44 + rr.record_dr_entries().len() <= ALLOWED_DR_SIZE + 1);
        }
    }

    #[test]
    fn symlink_round_trip_short() {
        let opts = RockRidgeOptions {
            symlink_target: b"/usr/local/bin/foo",
            ..RockRidgeOptions::file(RrVersion::V1_09, b"foo", 0o120555)
        };
        let (rr, _) = RockRidge::new(&opts, 44).unwrap();
        assert!(rr.is_symlink());
        assert_eq!(rr.symlink_path().unwrap(), b"/usr/local/bin/foo");
    }

    #[test]
    fn symlink_relative_components() {
        let opts = RockRidgeOptions {
            symlink_target: b"../lib/./libfoo.so",
            ..RockRidgeOptions::file(RrVersion::V1_09, b"foo", 0o120555)
        };
        let (rr, _) = RockRidge::new(&opts, 44).unwrap();
        assert_eq!(rr.symlink_path().unwrap(), b"../lib/./libfoo.so");
    }

    #[test]
    fn symlink_long_target_chunks() {
        let mut target = Vec::new();
        for _ in 0..20 {
            target.extend_from_slice(b"/component-name-x");
        }
        let opts = RockRidgeOptions {
            symlink_target: &target[1..],
            ..RockRidgeOptions::file(RrVersion::V1_09, b"foo", 0o120555)
        };
        let (rr, dr_len) = RockRidge::new(&opts, 44).unwrap();
        assert!(dr_len <= ALLOWED_DR_SIZE);
        assert!(!rr.ce_entries.sl_records.is_empty());
        assert_eq!(rr.symlink_path().unwrap(), &target[1..]);
    }

    #[test]
    fn symlink_empty_component_rejected() {
        let opts = RockRidgeOptions {
            symlink_target: b"a//b",
            ..RockRidgeOptions::file(RrVersion::V1_09, b"foo", 0o120555)
        };
        assert!(RockRidge::new(&opts, 44).is_err());
    }

    #[test]
    fn parse_round_trips_dr_entries() {
        let (rr, _) = file_rr(b"roundtrip.txt");
        let bytes = rr.record_dr_entries();
        let mut reparsed = RockRidge::default();
        reparsed.parse(&bytes, false, 0, false).unwrap();
        assert_eq!(reparsed.version, Some(RrVersion::V1_09));
        assert_eq!(reparsed.name(), b"roundtrip.txt");
        assert_eq!(reparsed.record_dr_entries(), bytes);
    }

    #[test]
    fn parse_version_inference_112() {
        let opts = RockRidgeOptions::file(RrVersion::V1_12, b"file", 0o100444);
        let (rr, _) = RockRidge::new(&opts, 44).unwrap();
        let bytes = rr.record_dr_entries();
        let mut reparsed = RockRidge::default();
        reparsed.parse(&bytes, false, 0, false).unwrap();
        assert_eq!(reparsed.version, Some(RrVersion::V1_12));
    }

    #[test]
    fn parse_rejects_duplicate_singleton() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&PxRecord::new(0).record(RrVersion::V1_09));
        bytes.extend_from_slice(&PxRecord::new(0).record(RrVersion::V1_09));
        let mut rr = RockRidge::default();
        assert!(rr.parse(&bytes, false, 0, false).is_err());
    }

    #[test]
    fn file_links_bookkeeping() {
        let (mut rr, _) = file_rr(b"dir");
        assert_eq!(rr.file_mode().unwrap(), 0o100444);
        rr.add_to_file_links().unwrap();
        rr.add_to_file_links().unwrap();
        rr.remove_from_file_links().unwrap();
        assert_eq!(rr.dr_entries.px_record.as_ref().unwrap().posix_file_links, 2);
    }

    #[test]
    fn ce_record_emitted_last_before_terminators() {
        let name = vec![b'z'; 240];
        let (rr, _) = file_rr(&name);
        assert!(rr.dr_entries.ce_record.is_some());
        let bytes = rr.record_dr_entries();
        let len = ce_len_cont_area(&bytes[bytes.len() - CeRecord::LENGTH..]);
        assert_eq!(len as usize, rr.record_ce_entries().len());
    }

    #[test]
    fn continuation_block_first_fit() {
        let mut block = RockRidgeContinuationBlock::new(None, 2048);
        assert_eq!(block.add_entry(100), Some(0));
        assert_eq!(block.add_entry(50), Some(100));
        block.remove_entry(0, 100).unwrap();
        // Gap at the front is reused first.
        assert_eq!(block.add_entry(80), Some(0));
        assert_eq!(block.add_entry(2048), None);
    }

    #[test]
    fn continuation_block_track_rejects_overlap() {
        let mut block = RockRidgeContinuationBlock::new(Some(24), 2048);
        block.track_entry(0, 100).unwrap();
        block.track_entry(100, 50).unwrap();
        assert!(block.track_entry(99, 10).is_err());
        assert!(block.track_entry(2000, 100).is_err());
    }

    #[test]
    fn continuation_block_fills_exactly() {
        let mut block = RockRidgeContinuationBlock::new(None, 256);
        assert_eq!(block.add_entry(256), Some(0));
        assert_eq!(block.add_entry(1), None);
    }

    mod properties {
        use quickcheck_macros::quickcheck;

        use super::super::*;

        #[quickcheck]
        fn qc_name_round_trips(name: Vec<u8>) -> bool {
            let name: Vec<u8> = name
                .into_iter()
                .filter(|&b| b != 0)
                .take(400)
                .collect();
            if name.is_empty() {
                return true;
            }
            let opts = RockRidgeOptions::file(RrVersion::V1_09, &name, 0o100444);
            let (rr, dr_len) = RockRidge::new(&opts, 44).unwrap();
            dr_len <= ALLOWED_DR_SIZE && dr_len % 2 == 0 && rr.name() == &name[..]
        }

        #[quickcheck]
        fn qc_continuation_reservations_never_overlap(lengths: Vec<u8>) -> bool {
            let mut block = RockRidgeContinuationBlock::new(None, 2048);
            for len in lengths {
                let len = usize::from(len) + 1;
                let _ = block.add_entry(len);
            }
            let entries = block.entries();
            entries.windows(2).all(|w| w[0].offset + w[0].length <= w[1].offset)
                && entries
                    .iter()
                    .all(|e| e.offset + e.length <= 2048)
        }
    }
}
