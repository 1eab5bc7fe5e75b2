//! ECMA-119 header volume descriptors: the Primary and Supplementary
//! (Joliet) descriptors, the Boot Record, the Volume Descriptor Set
//! Terminator, and the genisoimage-style Version Volume Descriptor.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use rand::Rng;

use crate::codec::{
    ceiling_div, decode_both_u16, decode_both_u32, encode_both_u16, encode_both_u32,
    encode_space_pad,
};
use crate::dates::VolumeDescriptorDate;
use crate::directory::{DirTree, DrId};
use crate::error::{Error, Result};
use crate::rockridge::RockRidgeContinuationBlock;

pub const VD_TYPE_BOOT_RECORD: u8 = 0;
pub const VD_TYPE_PRIMARY: u8 = 1;
pub const VD_TYPE_SUPPLEMENTARY: u8 = 2;
pub const VD_TYPE_SET_TERMINATOR: u8 = 255;

/// The three Joliet escape sequences (UCS-2 levels 1, 2, and 3).
pub const JOLIET_ESCAPES: [&[u8; 3]; 3] = [b"%/@", b"%/C", b"%/E"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VdKind {
    Primary,
    Supplementary,
}

/// A file-or-text identifier (ECMA-119 8.4.20-8.4.22).  File references
/// are not interpreted; the raw 128 bytes are kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileOrTextIdentifier {
    pub text: [u8; 128],
}

impl FileOrTextIdentifier {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != 128 {
            return Err(Error::invalid_iso("file or text identifier must be 128 bytes"));
        }
        let mut text = [0u8; 128];
        text.copy_from_slice(data);
        Ok(FileOrTextIdentifier { text })
    }

    pub fn new(text: &[u8]) -> Result<Self> {
        if text.len() != 128 {
            return Err(Error::invalid_input("length of text must be 128"));
        }
        let mut buf = [0u8; 128];
        buf.copy_from_slice(text);
        Ok(FileOrTextIdentifier { text: buf })
    }

    pub fn record(&self) -> [u8; 128] {
        self.text
    }
}

/// Parameters for creating a new Primary or Supplementary descriptor.
pub struct VdParams<'a> {
    pub sys_ident: &'a [u8],
    pub vol_ident: &'a [u8],
    pub set_size: u16,
    pub seqnum: u16,
    pub log_block_size: u32,
    /// Empty means "generate the UDF 2.60 2.2.2.5-style unique prefix"
    /// (hex seconds plus 26 random bits).
    pub vol_set_ident: &'a [u8],
    pub pub_ident: &'a [u8],
    pub preparer_ident: &'a [u8],
    pub app_ident: &'a [u8],
    pub copyright_file: &'a [u8],
    pub abstract_file: &'a [u8],
    pub bibli_file: &'a [u8],
    pub vol_expire_date: Option<VolumeDescriptorDate>,
    pub app_use: &'a [u8],
    pub xa: bool,
}

impl Default for VdParams<'_> {
    fn default() -> Self {
        VdParams {
            sys_ident: b"",
            vol_ident: b"",
            set_size: 1,
            seqnum: 1,
            log_block_size: 2048,
            vol_set_ident: b"",
            pub_ident: b"",
            preparer_ident: b"",
            app_ident: b"",
            copyright_file: b"",
            abstract_file: b"",
            bibli_file: b"",
            vol_expire_date: None,
            app_use: b"",
            xa: false,
        }
    }
}

/// A Primary or Supplementary Volume Descriptor.  The two share a
/// layout; a Supplementary descriptor adds the escape-sequence field
/// and (for Joliet) UCS-2 string encoding.
pub struct VolumeDescriptor {
    pub kind: VdKind,
    pub version: u8,
    pub flags: u8,
    pub system_identifier: [u8; 32],
    pub volume_identifier: [u8; 32],
    pub space_size: u32,
    pub escape_sequences: [u8; 32],
    pub set_size: u16,
    pub seqnum: u16,
    pub log_block_size: u32,
    pub path_tbl_size: u32,
    pub path_table_num_extents: u32,
    pub path_table_location_le: u32,
    pub optional_path_table_location_le: u32,
    pub path_table_location_be: u32,
    pub optional_path_table_location_be: u32,
    pub root_dir_record: DrId,
    pub volume_set_identifier: [u8; 128],
    pub publisher_identifier: FileOrTextIdentifier,
    pub preparer_identifier: FileOrTextIdentifier,
    pub application_identifier: FileOrTextIdentifier,
    pub copyright_file_identifier: [u8; 37],
    pub abstract_file_identifier: [u8; 37],
    pub bibliographic_file_identifier: [u8; 37],
    pub volume_creation_date: VolumeDescriptorDate,
    pub volume_modification_date: VolumeDescriptorDate,
    pub volume_expiration_date: VolumeDescriptorDate,
    pub volume_effective_date: VolumeDescriptorDate,
    pub file_structure_version: u8,
    pub application_use: [u8; 512],
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
    /// Shared Rock Ridge continuation blocks; populated only on the
    /// PVD, which is where every Rock Ridge extension looks for them.
    pub rr_ce_blocks: Vec<RockRidgeContinuationBlock>,
}

impl VolumeDescriptor {
    /// Whether string fields of this descriptor use UCS-2-BE (a Joliet
    /// SVD).
    pub fn is_ucs2(&self) -> bool {
        self.kind == VdKind::Supplementary
            && JOLIET_ESCAPES
                .iter()
                .any(|esc| self.escape_sequences.starts_with(*esc))
    }

    pub fn is_pvd(&self) -> bool {
        self.kind == VdKind::Primary
    }

    /// Parse a Primary or Supplementary descriptor out of one logical
    /// block, creating the embedded root directory record in `tree`.
    pub fn parse(data: &[u8], extent: u32, kind: VdKind, tree: &mut DirTree) -> Result<Self> {
        if data.len() < 2048 {
            return Err(Error::invalid_iso("volume descriptor must fill a logical block"));
        }

        let expected_type = match kind {
            VdKind::Primary => VD_TYPE_PRIMARY,
            VdKind::Supplementary => VD_TYPE_SUPPLEMENTARY,
        };
        if data[0] != expected_type {
            return Err(Error::invalid_iso("invalid volume descriptor"));
        }
        if &data[1..6] != b"CD001" {
            return Err(Error::invalid_iso("invalid CD identification"));
        }
        let version = data[6];
        let valid_versions: &[u8] = match kind {
            VdKind::Primary => &[1],
            VdKind::Supplementary => &[1, 2],
        };
        if !valid_versions.contains(&version) {
            return Err(Error::invalid_iso(format!(
                "invalid volume descriptor version {}",
                version
            )));
        }
        let flags = data[7];
        if kind == VdKind::Primary && flags != 0 {
            return Err(Error::invalid_iso("PVD flags field is not zero"));
        }
        if data[72..80].iter().any(|&b| b != 0) {
            return Err(Error::invalid_iso("data in 2nd unused field not zero"));
        }
        // 8.4.9 wants all-zero escape sequences on a PVD, but images in
        // the wild (psx redump collection) disagree; allow anything.

        let mut file_structure_version = data[881];
        match kind {
            VdKind::Primary => {
                if file_structure_version != 1 {
                    log::warn!(
                        "PVD file structure version {} forced to 1",
                        file_structure_version
                    );
                    file_structure_version = 1;
                }
            }
            VdKind::Supplementary => {
                if !matches!(file_structure_version, 1 | 2) {
                    return Err(Error::invalid_iso("file structure version expected to be 1"));
                }
            }
        }
        if data[882] != 0 {
            return Err(Error::invalid_iso("data in 2nd unused field not zero"));
        }
        // The final 653 bytes should be all zero, but images in the
        // wild put data there; ignore it.

        let space_size = decode_both_u32(&data[80..88], "space size")?;
        let set_size = decode_both_u16(&data[120..124], "set size")?;
        let seqnum = decode_both_u16(&data[124..128], "seqnum")?;
        let log_block_size = u32::from(decode_both_u16(&data[128..132], "logical block size")?);
        let path_tbl_size = decode_both_u32(&data[132..140], "path table size")?;

        let mut vd = VolumeDescriptor {
            kind,
            version,
            flags,
            system_identifier: data[8..40].try_into().unwrap(),
            volume_identifier: data[40..72].try_into().unwrap(),
            space_size,
            escape_sequences: data[88..120].try_into().unwrap(),
            set_size,
            seqnum,
            log_block_size,
            path_tbl_size,
            path_table_num_extents: (ceiling_div(u64::from(path_tbl_size), 4096) * 2) as u32,
            path_table_location_le: LittleEndian::read_u32(&data[140..144]),
            optional_path_table_location_le: LittleEndian::read_u32(&data[144..148]),
            path_table_location_be: BigEndian::read_u32(&data[148..152]),
            optional_path_table_location_be: LittleEndian::read_u32(&data[152..156]),
            root_dir_record: DrId(0),
            volume_set_identifier: data[190..318].try_into().unwrap(),
            publisher_identifier: FileOrTextIdentifier::parse(&data[318..446])?,
            preparer_identifier: FileOrTextIdentifier::parse(&data[446..574])?,
            application_identifier: FileOrTextIdentifier::parse(&data[574..702])?,
            copyright_file_identifier: data[702..739].try_into().unwrap(),
            abstract_file_identifier: data[739..776].try_into().unwrap(),
            bibliographic_file_identifier: data[776..813].try_into().unwrap(),
            volume_creation_date: VolumeDescriptorDate::parse(&data[813..830])?,
            volume_modification_date: VolumeDescriptorDate::parse(&data[830..847])?,
            volume_expiration_date: VolumeDescriptorDate::parse(&data[847..864])?,
            volume_effective_date: VolumeDescriptorDate::parse(&data[864..881])?,
            file_structure_version,
            application_use: data[883..1395].try_into().unwrap(),
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
            rr_ce_blocks: Vec::new(),
        };

        vd.root_dir_record = tree.parse_record(&data[156..190], None)?;
        Ok(vd)
    }

    fn new(kind: VdKind, params: &VdParams<'_>, escape_sequence: &[u8], tree: &mut DirTree) -> Result<Self> {
        let ucs2 = kind == VdKind::Supplementary
            && JOLIET_ESCAPES.iter().any(|esc| escape_sequence == *esc);

        if params.sys_ident.len() > 32 {
            return Err(Error::invalid_input("the system identifier has a maximum length of 32"));
        }
        if params.vol_ident.len() > 32 {
            return Err(Error::invalid_input("the volume identifier has a maximum length of 32"));
        }
        if params.seqnum > params.set_size {
            return Err(Error::invalid_input(
                "sequence number must be less than or equal to set size",
            ));
        }
        if params.vol_set_ident.len() > 128 {
            return Err(Error::invalid_input(
                "the maximum length for the volume set identifier is 128",
            ));
        }

        let mut escape_sequences = [0u8; 32];
        escape_sequences[..escape_sequence.len()].copy_from_slice(escape_sequence);

        // UDF 2.60 2.2.2.5 wants the first 16 characters of the volume
        // set identifier to be unique: hex seconds plus hex random
        // bits.  Generate that when the caller has no opinion.
        let generated;
        let vol_set_src: &[u8] = if params.vol_set_ident.is_empty() {
            let secs = chrono::Utc::now().timestamp() as u32;
            let bits: u32 = rand::thread_rng().gen_range(0..(1 << 26));
            generated = format!("{:08x}{:08x}", secs, bits);
            generated.as_bytes()
        } else {
            params.vol_set_ident
        };

        let root = tree.new_root(params.seqnum, params.log_block_size);

        let mut application_use = [0u8; 512];
        if params.xa {
            if params.app_use.len() > 141 {
                return Err(Error::invalid_input("cannot have XA and an app_use of > 140 bytes"));
            }
            let mut buf = params.app_use.to_vec();
            buf.resize(141, b' ');
            buf.extend_from_slice(b"CD-XA001");
            buf.extend_from_slice(&[0u8; 18]);
            buf.resize(512, b' ');
            application_use.copy_from_slice(&buf);
        } else {
            if params.app_use.len() > 512 {
                return Err(Error::invalid_input("the maximum length for the application use is 512"));
            }
            let mut buf = params.app_use.to_vec();
            buf.resize(512, b' ');
            application_use.copy_from_slice(&buf);
        }

        let now = VolumeDescriptorDate::now();
        let path_tbl_size = 10;

        Ok(VolumeDescriptor {
            kind,
            version: 1,
            flags: 0,
            system_identifier: encode_space_pad(params.sys_ident, 32, ucs2)?
                .try_into()
                .unwrap(),
            volume_identifier: encode_space_pad(params.vol_ident, 32, ucs2)?
                .try_into()
                .unwrap(),
            // The system area (16 extents) plus this descriptor.
            space_size: 17,
            escape_sequences,
            set_size: params.set_size,
            seqnum: params.seqnum,
            log_block_size: params.log_block_size,
            path_tbl_size,
            path_table_num_extents: (ceiling_div(u64::from(path_tbl_size), 4096) * 2) as u32,
            // The Little Endian path table starts right after the
            // Version Volume Descriptor; the Big Endian copy two
            // extents later.  Both move during the layout pass.
            path_table_location_le: 19,
            optional_path_table_location_le: 0,
            path_table_location_be: 21,
            optional_path_table_location_be: 0,
            root_dir_record: root,
            volume_set_identifier: encode_space_pad(vol_set_src, 128, ucs2)?
                .try_into()
                .unwrap(),
            publisher_identifier: FileOrTextIdentifier::new(&encode_space_pad(
                params.pub_ident,
                128,
                ucs2,
            )?)?,
            preparer_identifier: FileOrTextIdentifier::new(&encode_space_pad(
                params.preparer_ident,
                128,
                ucs2,
            )?)?,
            application_identifier: FileOrTextIdentifier::new(&encode_space_pad(
                params.app_ident,
                128,
                ucs2,
            )?)?,
            copyright_file_identifier: encode_space_pad(params.copyright_file, 37, ucs2)?
                .try_into()
                .unwrap(),
            abstract_file_identifier: encode_space_pad(params.abstract_file, 37, ucs2)?
                .try_into()
                .unwrap(),
            bibliographic_file_identifier: encode_space_pad(params.bibli_file, 37, ucs2)?
                .try_into()
                .unwrap(),
            volume_creation_date: now.clone(),
            // Overwritten with a fresh date at record() time.
            volume_modification_date: now.clone(),
            volume_expiration_date: params
                .vol_expire_date
                .clone()
                .unwrap_or_else(VolumeDescriptorDate::empty),
            volume_effective_date: now,
            file_structure_version: 1,
            application_use,
            orig_extent_loc: None,
            new_extent_loc: Some(0),
            rr_ce_blocks: Vec::new(),
        })
    }

    /// Create a new Primary Volume Descriptor with a fresh root record.
    pub fn new_primary(params: &VdParams<'_>, tree: &mut DirTree) -> Result<Self> {
        Self::new(VdKind::Primary, params, b"", tree)
    }

    /// Create a new Joliet Supplementary Volume Descriptor for UCS-2
    /// level 1, 2, or 3.
    pub fn new_joliet(level: u8, params: &VdParams<'_>, tree: &mut DirTree) -> Result<Self> {
        let escape = match level {
            1..=3 => JOLIET_ESCAPES[usize::from(level) - 1],
            _ => {
                return Err(Error::invalid_input("invalid Joliet level; must be 1, 2, or 3"));
            }
        };
        Self::new(VdKind::Supplementary, params, escape, tree)
    }

    /// Emit this descriptor's logical block.  The volume modification
    /// date is always refreshed.
    pub fn record(&self, tree: &DirTree) -> Vec<u8> {
        let mut out = vec![0u8; 2048];
        out[0] = match self.kind {
            VdKind::Primary => VD_TYPE_PRIMARY,
            VdKind::Supplementary => VD_TYPE_SUPPLEMENTARY,
        };
        out[1..6].copy_from_slice(b"CD001");
        out[6] = self.version;
        out[7] = self.flags;
        out[8..40].copy_from_slice(&self.system_identifier);
        out[40..72].copy_from_slice(&self.volume_identifier);
        encode_both_u32(&mut out[80..88], self.space_size);
        out[88..120].copy_from_slice(&self.escape_sequences);
        encode_both_u16(&mut out[120..124], self.set_size);
        encode_both_u16(&mut out[124..128], self.seqnum);
        encode_both_u16(&mut out[128..132], self.log_block_size as u16);
        encode_both_u32(&mut out[132..140], self.path_tbl_size);
        LittleEndian::write_u32(&mut out[140..144], self.path_table_location_le);
        LittleEndian::write_u32(&mut out[144..148], self.optional_path_table_location_le);
        BigEndian::write_u32(&mut out[148..152], self.path_table_location_be);
        LittleEndian::write_u32(&mut out[152..156], self.optional_path_table_location_be);
        let root = tree.get(self.root_dir_record).record();
        out[156..156 + root.len().min(34)].copy_from_slice(&root[..root.len().min(34)]);
        out[190..318].copy_from_slice(&self.volume_set_identifier);
        out[318..446].copy_from_slice(&self.publisher_identifier.record());
        out[446..574].copy_from_slice(&self.preparer_identifier.record());
        out[574..702].copy_from_slice(&self.application_identifier.record());
        out[702..739].copy_from_slice(&self.copyright_file_identifier);
        out[739..776].copy_from_slice(&self.abstract_file_identifier);
        out[776..813].copy_from_slice(&self.bibliographic_file_identifier);
        out[813..830].copy_from_slice(&self.volume_creation_date.record());
        out[830..847].copy_from_slice(&VolumeDescriptorDate::now().record());
        out[847..864].copy_from_slice(&self.volume_expiration_date.record());
        out[864..881].copy_from_slice(&self.volume_effective_date.record());
        out[881] = self.file_structure_version;
        out[883..1395].copy_from_slice(&self.application_use);
        out
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc
            .or(self.orig_extent_loc)
            .unwrap_or(0)
    }

    pub fn set_extent_location(&mut self, extent: u32) {
        self.new_extent_loc = Some(extent);
    }

    /// Grow the tracked space size by `addition` bytes, rounded up to
    /// extents.
    pub fn add_to_space_size(&mut self, addition_bytes: u64) {
        self.space_size += ceiling_div(addition_bytes, u64::from(self.log_block_size)) as u32;
    }

    pub fn remove_from_space_size(&mut self, removal_bytes: u64) {
        self.space_size -= ceiling_div(removal_bytes, u64::from(self.log_block_size)) as u32;
    }

    /// Grow the path table by one record.  True when the table pair now
    /// needs two more extents; the locations get fixed up during the
    /// layout pass.
    pub fn add_to_ptr_size(&mut self, ptr_size: usize) -> bool {
        self.path_tbl_size += ptr_size as u32;
        if (ceiling_div(u64::from(self.path_tbl_size), 4096) * 2) as u32
            > self.path_table_num_extents
        {
            self.path_table_num_extents += 2;
            return true;
        }
        false
    }

    /// Shrink the path table by one record.  True when the table pair
    /// releases two extents.
    pub fn remove_from_ptr_size(&mut self, ptr_size: usize) -> Result<bool> {
        self.path_tbl_size -= ptr_size as u32;
        let new_extents = (ceiling_div(u64::from(self.path_tbl_size), 4096) * 2) as u32;
        if new_extents > self.path_table_num_extents {
            return Err(Error::internal("path table extents grew while removing a record"));
        }
        if new_extents < self.path_table_num_extents {
            self.path_table_num_extents -= 2;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn copy_sizes(&mut self, other: &VolumeDescriptor) {
        self.space_size = other.space_size;
        self.path_tbl_size = other.path_tbl_size;
        self.path_table_num_extents = other.path_table_num_extents;
    }

    /// Track a continuation entry seen during parsing at (extent,
    /// offset, length).  Returns the index of the hosting block.
    pub fn track_rr_ce_entry(&mut self, extent: u32, offset: usize, length: usize) -> Result<usize> {
        let index = match self
            .rr_ce_blocks
            .iter()
            .position(|b| b.extent_location() == Some(extent))
        {
            Some(index) => index,
            None => {
                self.rr_ce_blocks.push(RockRidgeContinuationBlock::new(
                    Some(extent),
                    self.log_block_size as usize,
                ));
                self.rr_ce_blocks.len() - 1
            }
        };
        self.rr_ce_blocks[index].track_entry(offset, length)?;
        Ok(index)
    }

    /// Reserve room for a new continuation entry anywhere it fits,
    /// allocating a fresh block if no existing block has a gap.
    /// Returns (allocated a new block, block index, offset).
    pub fn add_rr_ce_entry(&mut self, length: usize) -> (bool, usize, usize) {
        for (index, block) in self.rr_ce_blocks.iter_mut().enumerate() {
            if let Some(offset) = block.add_entry(length) {
                return (false, index, offset);
            }
        }
        let mut block = RockRidgeContinuationBlock::new(None, self.log_block_size as usize);
        let offset = block
            .add_entry(length)
            .expect("a fresh continuation block always fits one entry");
        self.rr_ce_blocks.push(block);
        (true, self.rr_ce_blocks.len() - 1, offset)
    }

    /// Forget the extent locations of every continuation block, ready
    /// for reassignment.
    pub fn clear_rr_ce_entries(&mut self) {
        for block in &mut self.rr_ce_blocks {
            block.set_extent_location(None);
        }
    }
}

/// An ECMA-119 Boot Record.  For El Torito the system identifier is the
/// literal `EL TORITO SPECIFICATION` and the first four bytes of the
/// system-use area hold the boot catalog extent, little-endian.
pub struct BootRecord {
    pub boot_system_identifier: [u8; 32],
    pub boot_identifier: [u8; 32],
    pub boot_system_use: [u8; 1977],
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl BootRecord {
    pub fn parse(data: &[u8], extent: u32) -> Result<Self> {
        if data.len() < 2048 {
            return Err(Error::invalid_iso("boot record must fill a logical block"));
        }
        if data[0] != VD_TYPE_BOOT_RECORD {
            return Err(Error::invalid_iso("invalid descriptor type"));
        }
        if &data[1..6] != b"CD001" {
            return Err(Error::invalid_iso("invalid identifier"));
        }
        if data[6] != 1 {
            return Err(Error::invalid_iso("invalid version"));
        }
        Ok(BootRecord {
            boot_system_identifier: data[7..39].try_into().unwrap(),
            boot_identifier: data[39..71].try_into().unwrap(),
            boot_system_use: data[71..2048].try_into().unwrap(),
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new(boot_system_id: &[u8]) -> Self {
        let mut boot_system_identifier = [0u8; 32];
        boot_system_identifier[..boot_system_id.len().min(32)]
            .copy_from_slice(&boot_system_id[..boot_system_id.len().min(32)]);
        BootRecord {
            boot_system_identifier,
            boot_identifier: [0u8; 32],
            boot_system_use: [0u8; 1977],
            orig_extent_loc: None,
            new_extent_loc: Some(0),
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![0u8; 2048];
        out[0] = VD_TYPE_BOOT_RECORD;
        out[1..6].copy_from_slice(b"CD001");
        out[6] = 1;
        out[7..39].copy_from_slice(&self.boot_system_identifier);
        out[39..71].copy_from_slice(&self.boot_identifier);
        out[71..2048].copy_from_slice(&self.boot_system_use);
        out
    }

    pub fn update_boot_system_use(&mut self, boot_sys_use: &[u8]) {
        let len = boot_sys_use.len().min(1977);
        self.boot_system_use = [0u8; 1977];
        self.boot_system_use[..len].copy_from_slice(&boot_sys_use[..len]);
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc
            .or(self.orig_extent_loc)
            .unwrap_or(0)
    }
}

/// A Volume Descriptor Set Terminator.
pub struct VolumeDescriptorSetTerminator {
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl VolumeDescriptorSetTerminator {
    pub fn parse(data: &[u8], extent: u32) -> Result<Self> {
        if data.len() < 7 {
            return Err(Error::invalid_iso("volume descriptor set terminator too short"));
        }
        if data[0] != VD_TYPE_SET_TERMINATOR {
            return Err(Error::invalid_iso("invalid descriptor type"));
        }
        if &data[1..6] != b"CD001" {
            return Err(Error::invalid_iso("invalid identifier"));
        }
        if data[6] != 1 {
            return Err(Error::invalid_iso("invalid version"));
        }
        // The rest should be zero, but images in the wild put data
        // here; ignore it.
        Ok(VolumeDescriptorSetTerminator {
            orig_extent_loc: Some(extent),
            new_extent_loc: None,
        })
    }

    pub fn new() -> Self {
        VolumeDescriptorSetTerminator {
            orig_extent_loc: None,
            new_extent_loc: Some(0),
        }
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![0u8; 2048];
        out[0] = VD_TYPE_SET_TERMINATOR;
        out[1..6].copy_from_slice(b"CD001");
        out[6] = 1;
        out
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc
            .or(self.orig_extent_loc)
            .unwrap_or(0)
    }
}

impl Default for VolumeDescriptorSetTerminator {
    fn default() -> Self {
        Self::new()
    }
}

/// The Version Volume Descriptor genisoimage writes after the VDST.  No
/// standard mentions it; its contents are all zeros or a vendor
/// "MKI"-prefixed blob.
pub struct VersionVolumeDescriptor {
    data: Vec<u8>,
    pub orig_extent_loc: Option<u32>,
    pub new_extent_loc: Option<u32>,
}

impl VersionVolumeDescriptor {
    /// Probe one block; Some when it looks like a version descriptor.
    pub fn parse(data: &[u8], extent: u32) -> Option<Self> {
        if data.starts_with(b"MKI") || data.iter().all(|&b| b == 0) {
            return Some(VersionVolumeDescriptor {
                data: data.to_vec(),
                orig_extent_loc: Some(extent),
                new_extent_loc: None,
            });
        }
        None
    }

    pub fn new(log_block_size: u32) -> Self {
        VersionVolumeDescriptor {
            data: vec![0u8; log_block_size as usize],
            orig_extent_loc: None,
            new_extent_loc: Some(0),
        }
    }

    pub fn record(&self) -> &[u8] {
        &self.data
    }

    pub fn extent_location(&self) -> u32 {
        self.new_extent_loc
            .or(self.orig_extent_loc)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pvd_with_tree() -> (VolumeDescriptor, DirTree) {
        let mut tree = DirTree::default();
        let params = VdParams {
            sys_ident: b"LINUX",
            vol_ident: b"CDROM",
            ..VdParams::default()
        };
        let pvd = VolumeDescriptor::new_primary(&params, &mut tree).unwrap();
        (pvd, tree)
    }

    #[test]
    fn new_pvd_has_initial_sizes() {
        let (pvd, tree) = pvd_with_tree();
        assert_eq!(pvd.space_size, 17);
        assert_eq!(pvd.path_tbl_size, 10);
        assert_eq!(pvd.path_table_num_extents, 2);
        assert_eq!(pvd.path_table_location_le, 19);
        assert_eq!(pvd.path_table_location_be, 21);
        assert!(tree.get(pvd.root_dir_record).is_root);
        assert_eq!(tree.get(pvd.root_dir_record).data_length, 2048);
        assert!(!pvd.is_ucs2());
    }

    #[test]
    fn pvd_record_round_trips() {
        let (mut pvd, mut tree) = pvd_with_tree();
        pvd.set_extent_location(16);
        tree.get_mut(pvd.root_dir_record).set_data_location(23);
        let block = pvd.record(&tree);
        assert_eq!(block.len(), 2048);
        assert_eq!(block[0], VD_TYPE_PRIMARY);
        assert_eq!(&block[1..6], b"CD001");
        assert_eq!(&block[8..13], b"LINUX");
        assert_eq!(&block[40..45], b"CDROM");

        let parsed = VolumeDescriptor::parse(&block, 16, VdKind::Primary, &mut tree).unwrap();
        assert_eq!(parsed.space_size, 17);
        assert_eq!(parsed.log_block_size, 2048);
        assert_eq!(parsed.path_tbl_size, 10);
        assert_eq!(parsed.path_table_location_le, 19);
        assert_eq!(parsed.path_table_location_be, 21);
        assert_eq!(tree.get(parsed.root_dir_record).extent_location(), 23);
    }

    #[test]
    fn joliet_svd_carries_escape() {
        let mut tree = DirTree::default();
        let params = VdParams {
            vol_ident: b"CDROM",
            ..VdParams::default()
        };
        let svd = VolumeDescriptor::new_joliet(3, &params, &mut tree).unwrap();
        assert!(svd.escape_sequences.starts_with(b"%/E"));
        assert!(svd.is_ucs2());
        // UCS-2 volume identifier: zero-interleaved characters.
        assert_eq!(&svd.volume_identifier[..10], &[0, b'C', 0, b'D', 0, b'R', 0, b'O', 0, b'M']);
    }

    #[test]
    fn joliet_level_validated() {
        let mut tree = DirTree::default();
        assert!(VolumeDescriptor::new_joliet(4, &VdParams::default(), &mut tree).is_err());
    }

    #[test]
    fn space_size_counters() {
        let (mut pvd, _) = pvd_with_tree();
        pvd.add_to_space_size(2048);
        assert_eq!(pvd.space_size, 18);
        pvd.add_to_space_size(1);
        assert_eq!(pvd.space_size, 19);
        pvd.remove_from_space_size(2049);
        assert_eq!(pvd.space_size, 17);
    }

    #[test]
    fn ptr_size_counters() {
        let (mut pvd, _) = pvd_with_tree();
        // 4096 bytes per table pair before more extents are needed.
        assert!(!pvd.add_to_ptr_size(100));
        assert_eq!(pvd.path_tbl_size, 110);
        let mut grew = false;
        while !grew {
            grew = pvd.add_to_ptr_size(100);
        }
        assert_eq!(pvd.path_table_num_extents, 4);
        assert!(pvd.path_tbl_size > 4096);
        let mut shrank = false;
        while !shrank {
            shrank = pvd.remove_from_ptr_size(100).unwrap();
        }
        assert_eq!(pvd.path_table_num_extents, 2);
    }

    #[test]
    fn unique_vol_set_ident_generated_when_empty() {
        let (pvd, _) = pvd_with_tree();
        let ident = &pvd.volume_set_identifier;
        assert!(ident[..16].iter().all(|b| b.is_ascii_hexdigit()));
        assert!(ident[16..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn explicit_vol_set_ident_wins() {
        let mut tree = DirTree::default();
        let params = VdParams {
            vol_set_ident: b"MYSET",
            ..VdParams::default()
        };
        let pvd = VolumeDescriptor::new_primary(&params, &mut tree).unwrap();
        assert_eq!(&pvd.volume_set_identifier[..5], b"MYSET");
    }

    #[test]
    fn xa_application_use_embeds_signature() {
        let mut tree = DirTree::default();
        let params = VdParams {
            xa: true,
            ..VdParams::default()
        };
        let pvd = VolumeDescriptor::new_primary(&params, &mut tree).unwrap();
        assert_eq!(&pvd.application_use[141..149], b"CD-XA001");
    }

    #[test]
    fn continuation_entry_tracking() {
        let (mut pvd, _) = pvd_with_tree();
        let idx = pvd.track_rr_ce_entry(100, 0, 92).unwrap();
        assert_eq!(idx, 0);
        let idx2 = pvd.track_rr_ce_entry(100, 92, 50).unwrap();
        assert_eq!(idx2, 0);
        assert!(pvd.track_rr_ce_entry(100, 10, 30).is_err());
        let idx3 = pvd.track_rr_ce_entry(101, 0, 10).unwrap();
        assert_eq!(idx3, 1);
    }

    #[test]
    fn continuation_entry_allocation_reuses_gaps() {
        let (mut pvd, _) = pvd_with_tree();
        let (added, idx, offset) = pvd.add_rr_ce_entry(2000);
        assert!(added);
        assert_eq!((idx, offset), (0, 0));
        let (added, idx, offset) = pvd.add_rr_ce_entry(48);
        assert!(!added);
        assert_eq!((idx, offset), (0, 2000));
        // Block 0 is full now; a new one is allocated.
        let (added, idx, _) = pvd.add_rr_ce_entry(100);
        assert!(added);
        assert_eq!(idx, 1);
    }

    #[test]
    fn boot_record_round_trip() {
        let mut br = BootRecord::new(b"EL TORITO SPECIFICATION");
        let mut use_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut use_bytes, 25);
        br.update_boot_system_use(&use_bytes);
        let block = br.record();
        let parsed = BootRecord::parse(&block, 17).unwrap();
        assert_eq!(&parsed.boot_system_identifier[..23], b"EL TORITO SPECIFICATION");
        assert_eq!(LittleEndian::read_u32(&parsed.boot_system_use[..4]), 25);
    }

    #[test]
    fn vdst_round_trip() {
        let vdst = VolumeDescriptorSetTerminator::new();
        let block = vdst.record();
        assert_eq!(block[0], 255);
        assert!(VolumeDescriptorSetTerminator::parse(&block, 17).is_ok());
        assert!(VolumeDescriptorSetTerminator::parse(&[0u8; 2048], 17).is_err());
    }

    #[test]
    fn version_vd_probe() {
        let zeros = vec![0u8; 2048];
        assert!(VersionVolumeDescriptor::parse(&zeros, 18).is_some());
        let mut mki = vec![0u8; 2048];
        mki[..3].copy_from_slice(b"MKI");
        mki[3] = 7;
        let vd = VersionVolumeDescriptor::parse(&mki, 18).unwrap();
        assert_eq!(vd.record(), &mki[..]);
        let mut other = vec![0u8; 2048];
        other[0] = 1;
        assert!(VersionVolumeDescriptor::parse(&other, 18).is_none());
    }
}
