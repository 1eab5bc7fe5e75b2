//! El Torito boot support: the boot catalog with its validation,
//! initial, and section entries, the HD-MBR sanity check, and the
//! optional boot info table.

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::eltorito_checksum;
use crate::error::{Error, Result};

/// The indicator for a section header that is not the last one.
const HEADER_NOT_LAST: u8 = 0x90;
/// The indicator for the final section header in the catalog.
const HEADER_LAST: u8 = 0x91;

/// The optional 56-byte table patched into a boot image at offset 8:
/// PVD extent, boot-image extent, original image length, and a
/// u32-sum checksum of the image body from offset 64 on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootInfoTable {
    pub orig_len: u32,
    pub csum: u32,
}

impl BootInfoTable {
    /// Bytes of the header (the 40-byte zero tail is excluded).
    pub const HEADER_LENGTH: usize = 16;

    /// Raw-parse the four fields; the caller validates the extents
    /// against the live objects.
    pub fn parse(data: &[u8]) -> Result<(u32, u32, BootInfoTable)> {
        if data.len() < Self::HEADER_LENGTH {
            return Err(Error::invalid_iso("boot info table too short"));
        }
        let pvd_extent = LittleEndian::read_u32(&data[0..4]);
        let rec_extent = LittleEndian::read_u32(&data[4..8]);
        let orig_len = LittleEndian::read_u32(&data[8..12]);
        let csum = LittleEndian::read_u32(&data[12..16]);
        Ok((pvd_extent, rec_extent, BootInfoTable { orig_len, csum }))
    }

    /// Emit the table with the current PVD and boot-image extents.
    pub fn record(&self, pvd_extent: u32, inode_extent: u32) -> [u8; 56] {
        let mut out = [0u8; 56];
        LittleEndian::write_u32(&mut out[0..4], pvd_extent);
        LittleEndian::write_u32(&mut out[4..8], inode_extent);
        LittleEndian::write_u32(&mut out[8..12], self.orig_len);
        LittleEndian::write_u32(&mut out[12..16], self.csum);
        out
    }

    /// The u32-sum checksum over the boot image body, starting at byte
    /// 64.
    pub fn checksum(data: &[u8]) -> u32 {
        let mut csum: u32 = 0;
        for chunk in data.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            csum = csum.wrapping_add(LittleEndian::read_u32(&word));
        }
        csum
    }
}

/// The validation entry that opens every boot catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationEntry {
    pub platform_id: u8,
    pub id_string: [u8; 24],
    pub checksum: u16,
}

impl ValidationEntry {
    pub const LENGTH: usize = 32;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LENGTH {
            return Err(Error::invalid_iso("El Torito validation entry too short"));
        }
        if data[0] != 1 {
            return Err(Error::invalid_iso("El Torito validation entry header ID not 1"));
        }
        let platform_id = data[1];
        if !matches!(platform_id, 0 | 1 | 2) {
            return Err(Error::invalid_iso("El Torito validation entry platform ID not valid"));
        }
        if data[0x1e] != 0x55 {
            return Err(Error::invalid_iso(
                "El Torito validation entry first keybyte not 0x55",
            ));
        }
        if data[0x1f] != 0xaa {
            return Err(Error::invalid_iso(
                "El Torito validation entry second keybyte not 0xaa",
            ));
        }
        if eltorito_checksum(&data[..Self::LENGTH]) != 0 {
            return Err(Error::invalid_iso("El Torito validation entry checksum not correct"));
        }
        Ok(ValidationEntry {
            platform_id,
            id_string: data[4..28].try_into().unwrap(),
            checksum: LittleEndian::read_u16(&data[0x1c..0x1e]),
        })
    }

    /// A fresh validation entry whose 16-bit words sum to zero.
    pub fn new(platform_id: u8) -> Self {
        let mut entry = ValidationEntry {
            platform_id,
            id_string: [0u8; 24],
            checksum: 0,
        };
        let partial = eltorito_checksum(&entry.record());
        entry.checksum = 0u16.wrapping_sub(partial);
        entry
    }

    pub fn record(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0] = 1;
        out[1] = self.platform_id;
        out[4..28].copy_from_slice(&self.id_string);
        LittleEndian::write_u16(&mut out[0x1c..0x1e], self.checksum);
        out[0x1e] = 0x55;
        out[0x1f] = 0xaa;
        out
    }
}

/// Boot media emulation requested for an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootMedia {
    NoEmulation,
    Floppy,
    HdEmulation,
}

pub const MEDIA_NO_EMUL: u8 = 0;
pub const MEDIA_12_FLOPPY: u8 = 1;
pub const MEDIA_144_FLOPPY: u8 = 2;
pub const MEDIA_288_FLOPPY: u8 = 3;
pub const MEDIA_HD_EMUL: u8 = 4;

/// An initial or section entry in the boot catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EltoritoEntry {
    pub boot_indicator: u8,
    pub boot_media_type: u8,
    pub load_segment: u16,
    pub system_type: u8,
    pub sector_count: u16,
    pub load_rba: u32,
    pub selection_criteria_type: u8,
    /// 19 bytes on disc; grows past that when 0x44 extension entries
    /// are appended during parsing.
    pub selection_criteria: Vec<u8>,
}

impl EltoritoEntry {
    pub const LENGTH: usize = 32;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LENGTH {
            return Err(Error::invalid_iso("El Torito entry too short"));
        }
        let boot_indicator = data[0];
        if !matches!(boot_indicator, 0x88 | 0x00) {
            return Err(Error::invalid_iso("invalid El Torito initial entry boot indicator"));
        }
        let boot_media_type = data[1];
        if boot_media_type > 4 {
            return Err(Error::invalid_iso("invalid El Torito boot media type"));
        }
        if data[5] != 0 {
            return Err(Error::invalid_iso("El Torito unused field must be 0"));
        }
        // Bytes 0xc-0x1f should be zero for an initial entry, but
        // images in the wild put data there; keep whatever we saw.
        Ok(EltoritoEntry {
            boot_indicator,
            boot_media_type,
            load_segment: LittleEndian::read_u16(&data[2..4]),
            system_type: data[4],
            sector_count: LittleEndian::read_u16(&data[6..8]),
            load_rba: LittleEndian::read_u32(&data[8..12]),
            selection_criteria_type: data[12],
            selection_criteria: data[13..32].to_vec(),
        })
    }

    pub fn new(
        sector_count: u16,
        load_seg: u16,
        media: BootMedia,
        system_type: u8,
        bootable: bool,
    ) -> Result<Self> {
        let (media_type, sector_count) = match media {
            BootMedia::NoEmulation => (MEDIA_NO_EMUL, sector_count),
            BootMedia::Floppy => {
                let media_type = match sector_count {
                    2400 => MEDIA_12_FLOPPY,
                    2880 => MEDIA_144_FLOPPY,
                    5760 => MEDIA_288_FLOPPY,
                    _ => {
                        return Err(Error::invalid_input(
                            "invalid sector count for floppy media type; must be 2400, 2880, or 5760",
                        ));
                    }
                };
                // Floppy (and HD) booting loads a single virtual
                // sector.
                (media_type, 1)
            }
            BootMedia::HdEmulation => (MEDIA_HD_EMUL, 1),
        };

        Ok(EltoritoEntry {
            boot_indicator: if bootable { 0x88 } else { 0x00 },
            boot_media_type: media_type,
            load_segment: load_seg,
            system_type,
            sector_count,
            load_rba: 0,
            selection_criteria_type: 0,
            selection_criteria: vec![0u8; 19],
        })
    }

    pub fn set_data_location(&mut self, extent: u32) {
        self.load_rba = extent;
    }

    /// The number of bytes the BIOS loads for this entry; sector counts
    /// are in 512-byte virtual sectors.
    pub fn load_length(&self) -> u64 {
        u64::from(self.sector_count) * 512
    }

    pub fn record(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0] = self.boot_indicator;
        out[1] = self.boot_media_type;
        LittleEndian::write_u16(&mut out[2..4], self.load_segment);
        out[4] = self.system_type;
        LittleEndian::write_u16(&mut out[6..8], self.sector_count);
        LittleEndian::write_u32(&mut out[8..12], self.load_rba);
        out[12] = self.selection_criteria_type;
        let crit = &self.selection_criteria[..self.selection_criteria.len().min(19)];
        out[13..13 + crit.len()].copy_from_slice(crit);
        out
    }
}

/// A section header and its entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionHeader {
    pub header_indicator: u8,
    pub platform_id: u8,
    pub num_section_entries: u16,
    pub id_string: [u8; 28],
    pub entries: Vec<EltoritoEntry>,
}

impl SectionHeader {
    pub const LENGTH: usize = 32;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LENGTH {
            return Err(Error::invalid_iso("El Torito section header too short"));
        }
        Ok(SectionHeader {
            header_indicator: data[0],
            platform_id: data[1],
            num_section_entries: LittleEndian::read_u16(&data[2..4]),
            id_string: data[4..32].try_into().unwrap(),
            entries: Vec::new(),
        })
    }

    pub fn new(id_string: [u8; 28], platform_id: u8) -> Self {
        SectionHeader {
            // The newest section is the last one until told otherwise.
            header_indicator: HEADER_LAST,
            platform_id,
            num_section_entries: 0,
            id_string,
            entries: Vec::new(),
        }
    }

    /// Attach an entry found while parsing.  The header's declared
    /// count bounds how many we accept.
    pub fn add_parsed_entry(&mut self, entry: EltoritoEntry) -> Result<()> {
        if self.entries.len() >= usize::from(self.num_section_entries) {
            return Err(Error::invalid_input(
                "El Torito section had more entries than expected by section header; ISO is corrupt",
            ));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn add_new_entry(&mut self, entry: EltoritoEntry) {
        self.num_section_entries += 1;
        self.entries.push(entry);
    }

    pub fn set_record_not_last(&mut self) {
        self.header_indicator = HEADER_NOT_LAST;
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::LENGTH];
        out[0] = self.header_indicator;
        out[1] = self.platform_id;
        LittleEndian::write_u16(&mut out[2..4], self.num_section_entries);
        out[4..32].copy_from_slice(&self.id_string);
        for entry in &self.entries {
            out.extend_from_slice(&entry.record());
        }
        out
    }
}

/// Addresses one entry inside a boot catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryRef {
    Initial,
    Section { section: usize, entry: usize },
    Standalone(usize),
}

enum ParseState {
    ExpectingValidationEntry,
    ExpectingInitialEntry,
    ExpectingSectionHeaderOrDone,
}

/// The El Torito boot catalog: one validation entry, one initial
/// entry, up to 31 section header/entry pairs, and any standalone
/// entries a sloppy mastering tool left behind.
pub struct BootCatalog {
    pub validation_entry: Option<ValidationEntry>,
    pub initial_entry: Option<EltoritoEntry>,
    pub sections: Vec<SectionHeader>,
    pub standalone_entries: Vec<EltoritoEntry>,
    /// Directory records (ISO and Joliet) that name the catalog file.
    pub dirrecords: Vec<crate::inode::LinkedRecord>,
    state: ParseState,
}

impl BootCatalog {
    /// Start a catalog parse; feed 32-byte entries through
    /// `parse_entry`.
    pub fn parsing() -> Self {
        BootCatalog {
            validation_entry: None,
            initial_entry: None,
            sections: Vec::new(),
            standalone_entries: Vec::new(),
            dirrecords: Vec::new(),
            state: ParseState::ExpectingValidationEntry,
        }
    }

    /// Consume one 32-byte catalog record.  Returns true once the
    /// catalog is complete.
    pub fn parse_entry(&mut self, valstr: &[u8]) -> Result<bool> {
        match self.state {
            ParseState::ExpectingValidationEntry => {
                self.validation_entry = Some(ValidationEntry::parse(valstr)?);
                self.state = ParseState::ExpectingInitialEntry;
                Ok(false)
            }
            ParseState::ExpectingInitialEntry => {
                self.initial_entry = Some(EltoritoEntry::parse(valstr)?);
                self.state = ParseState::ExpectingSectionHeaderOrDone;
                Ok(false)
            }
            ParseState::ExpectingSectionHeaderOrDone => match valstr[0] {
                0x00 => {
                    let last = self.sections.len().saturating_sub(1);
                    for (index, sec) in self.sections.iter().enumerate() {
                        if usize::from(sec.num_section_entries) != sec.entries.len() {
                            return Err(Error::invalid_iso(format!(
                                "El Torito section header specified {} entries, only saw {}",
                                sec.num_section_entries,
                                sec.entries.len()
                            )));
                        }
                        if index != last && sec.header_indicator != HEADER_NOT_LAST {
                            return Err(Error::invalid_iso(
                                "intermediate El Torito section header not properly specified",
                            ));
                        }
                        // The final header should say 0x91, but FreeBSD
                        // 11.0 images disagree, so no check.
                    }
                    Ok(true)
                }
                HEADER_NOT_LAST | HEADER_LAST => {
                    self.sections.push(SectionHeader::parse(valstr)?);
                    Ok(false)
                }
                0x88 => {
                    // El Torito 2.4 wants a section entry after a
                    // section header, but Mageia 4 images emit them
                    // bare.  Attach to the last non-full header, else
                    // keep it standalone.
                    let entry = EltoritoEntry::parse(valstr)?;
                    match self.sections.last_mut() {
                        Some(sec) if sec.entries.len() < usize::from(sec.num_section_entries) => {
                            sec.add_parsed_entry(entry)?;
                        }
                        _ => self.standalone_entries.push(entry),
                    }
                    Ok(false)
                }
                0x44 => {
                    // A section entry extension: its payload extends
                    // the previous entry's selection criteria.
                    let target = self
                        .sections
                        .last_mut()
                        .and_then(|sec| sec.entries.last_mut())
                        .ok_or_else(|| {
                            Error::invalid_iso("El Torito section entry extension with no entry")
                        })?;
                    target.selection_criteria.extend_from_slice(&valstr[2..]);
                    Ok(false)
                }
                _ => Err(Error::invalid_iso("invalid El Torito boot catalog entry")),
            },
        }
    }

    /// Create a new catalog with its validation and initial entries.
    pub fn new(
        sector_count: u16,
        load_seg: u16,
        media: BootMedia,
        system_type: u8,
        platform_id: u8,
        bootable: bool,
    ) -> Result<Self> {
        Ok(BootCatalog {
            validation_entry: Some(ValidationEntry::new(platform_id)),
            initial_entry: Some(EltoritoEntry::new(
                sector_count,
                load_seg,
                media,
                system_type,
                bootable,
            )?),
            sections: Vec::new(),
            standalone_entries: Vec::new(),
            dirrecords: Vec::new(),
            state: ParseState::ExpectingSectionHeaderOrDone,
        })
    }

    /// Add a section header plus entry.  Returns a reference to the new
    /// entry.
    pub fn add_section(
        &mut self,
        sector_count: u16,
        load_seg: u16,
        media: BootMedia,
        system_type: u8,
        efi: bool,
        bootable: bool,
    ) -> Result<EntryRef> {
        // The catalog is a single 2048-byte extent; the validation and
        // initial entries take 64 bytes, and each section needs 64, so
        // at most (2048-64)/64 = 31 sections fit.
        if self.sections.len() == 31 {
            return Err(Error::invalid_input("too many El Torito sections"));
        }

        let platform_id = if efi {
            0xef
        } else {
            self.validation_entry
                .as_ref()
                .map(|v| v.platform_id)
                .unwrap_or(0)
        };

        let mut sec = SectionHeader::new([0u8; 28], platform_id);
        sec.add_new_entry(EltoritoEntry::new(
            sector_count,
            load_seg,
            media,
            system_type,
            bootable,
        )?);

        if let Some(prev) = self.sections.last_mut() {
            prev.set_record_not_last();
        }
        self.sections.push(sec);
        Ok(EntryRef::Section {
            section: self.sections.len() - 1,
            entry: 0,
        })
    }

    pub fn entry(&self, entry_ref: EntryRef) -> Option<&EltoritoEntry> {
        match entry_ref {
            EntryRef::Initial => self.initial_entry.as_ref(),
            EntryRef::Section { section, entry } => {
                self.sections.get(section).and_then(|s| s.entries.get(entry))
            }
            EntryRef::Standalone(index) => self.standalone_entries.get(index),
        }
    }

    pub fn entry_mut(&mut self, entry_ref: EntryRef) -> Option<&mut EltoritoEntry> {
        match entry_ref {
            EntryRef::Initial => self.initial_entry.as_mut(),
            EntryRef::Section { section, entry } => self
                .sections
                .get_mut(section)
                .and_then(|s| s.entries.get_mut(entry)),
            EntryRef::Standalone(index) => self.standalone_entries.get_mut(index),
        }
    }

    /// Every entry in catalog order.
    pub fn entry_refs(&self) -> Vec<EntryRef> {
        let mut out = Vec::new();
        if self.initial_entry.is_some() {
            out.push(EntryRef::Initial);
        }
        for (section, sec) in self.sections.iter().enumerate() {
            for entry in 0..sec.entries.len() {
                out.push(EntryRef::Section { section, entry });
            }
        }
        for index in 0..self.standalone_entries.len() {
            out.push(EntryRef::Standalone(index));
        }
        out
    }

    pub fn record(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(val) = &self.validation_entry {
            out.extend_from_slice(&val.record());
        }
        if let Some(initial) = &self.initial_entry {
            out.extend_from_slice(&initial.record());
        }
        for sec in &self.sections {
            out.extend_from_slice(&sec.record());
        }
        for entry in &self.standalone_entries {
            out.extend_from_slice(&entry.record());
        }
        out
    }
}

const PARTITION_TYPE_UNUSED: u8 = 0;
const PARTITION_STATUS_ACTIVE: u8 = 0x80;

/// Sanity-check the MBR of a hard-disk-emulation boot image and return
/// the partition type byte for the El Torito entry.  Exactly one used
/// partition is required; the softer genisoimage checks only warn.
pub fn hd_mbr_check(disk_mbr: &[u8], sector_count: u16, bootable: bool) -> Result<u8> {
    if disk_mbr.len() < 512 {
        return Err(Error::invalid_input("HD MBR shorter than 512 bytes"));
    }
    if disk_mbr[510] != 0x55 || disk_mbr[511] != 0xaa {
        return Err(Error::invalid_input("invalid magic on HD MBR"));
    }

    let mut system_type = PARTITION_TYPE_UNUSED;
    for part_index in 0..4 {
        let part = &disk_mbr[446 + part_index * 16..446 + (part_index + 1) * 16];
        let status = part[0];
        let s_head = part[1];
        let s_seccyl = part[2];
        let s_cyl = part[3];
        let parttype = part[4];
        let e_head = part[5];
        let e_seccyl = part[6];
        let e_cyl = part[7];

        if parttype == PARTITION_TYPE_UNUSED {
            continue;
        }
        if system_type != PARTITION_TYPE_UNUSED {
            return Err(Error::invalid_input("boot image has multiple partitions"));
        }

        if bootable && status != PARTITION_STATUS_ACTIVE {
            log::warn!("partition not marked active");
        }

        let cyl = (u32::from(s_seccyl & 0xc0) << 10) | u32::from(s_cyl);
        let sec = s_seccyl & 0x3f;
        if cyl != 0 || s_head != 1 || sec != 1 {
            log::warn!("partition does not start at 0/1/1");
        }

        let cyl = (u32::from(e_seccyl & 0xc0) << 10) | u32::from(e_cyl);
        let sec = e_seccyl & 0x3f;
        let geometry_sectors = (cyl + 1) * (u32::from(e_head) + 1) * u32::from(sec);
        if u32::from(sector_count) != geometry_sectors {
            log::warn!("image size does not match geometry");
        }

        system_type = parttype;
    }

    if system_type == PARTITION_TYPE_UNUSED {
        return Err(Error::invalid_input("boot image has no partitions"));
    }

    Ok(system_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_entry_checksum_balances() {
        let entry = ValidationEntry::new(0);
        let rec = entry.record();
        assert_eq!(eltorito_checksum(&rec), 0);
        let parsed = ValidationEntry::parse(&rec).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn validation_entry_checksum_balances_for_all_platforms() {
        for platform in [0u8, 1, 2] {
            let rec = ValidationEntry::new(platform).record();
            assert_eq!(eltorito_checksum(&rec), 0, "platform {}", platform);
        }
    }

    #[test]
    fn validation_entry_rejects_bad_keybytes() {
        let mut rec = ValidationEntry::new(0).record();
        rec[0x1e] = 0x54;
        assert!(ValidationEntry::parse(&rec).is_err());
    }

    #[test]
    fn validation_entry_rejects_bad_checksum() {
        let mut rec = ValidationEntry::new(0).record();
        rec[0x1c] ^= 0xff;
        assert!(ValidationEntry::parse(&rec).is_err());
    }

    #[test]
    fn entry_noemul_round_trip() {
        let mut entry = EltoritoEntry::new(4, 0, BootMedia::NoEmulation, 0, true).unwrap();
        entry.set_data_location(26);
        let rec = entry.record();
        assert_eq!(rec[0], 0x88);
        assert_eq!(rec[1], MEDIA_NO_EMUL);
        assert_eq!(LittleEndian::read_u16(&rec[6..8]), 4);
        assert_eq!(LittleEndian::read_u32(&rec[8..12]), 26);
        let parsed = EltoritoEntry::parse(&rec).unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(parsed.load_length(), 4 * 512);
    }

    #[test]
    fn entry_floppy_sector_counts() {
        let entry = EltoritoEntry::new(2880, 0, BootMedia::Floppy, 0, true).unwrap();
        assert_eq!(entry.boot_media_type, MEDIA_144_FLOPPY);
        assert_eq!(entry.sector_count, 1);
        assert!(EltoritoEntry::new(1000, 0, BootMedia::Floppy, 0, true).is_err());
    }

    #[test]
    fn catalog_new_and_record() {
        let catalog = BootCatalog::new(4, 0, BootMedia::NoEmulation, 0, 0, true).unwrap();
        let rec = catalog.record();
        assert_eq!(rec.len(), 64);
        assert_eq!(eltorito_checksum(&rec[..32]), 0);
        assert_eq!(rec[32], 0x88);
    }

    #[test]
    fn catalog_parse_round_trip() {
        let mut catalog = BootCatalog::new(4, 0, BootMedia::NoEmulation, 0, 0, true).unwrap();
        catalog
            .add_section(1, 0, BootMedia::HdEmulation, 0x83, false, true)
            .unwrap();
        let mut bytes = catalog.record();
        bytes.resize(2048, 0);

        let mut parsed = BootCatalog::parsing();
        let mut offset = 0;
        while !parsed.parse_entry(&bytes[offset..offset + 32]).unwrap() {
            offset += 32;
        }
        assert!(parsed.validation_entry.is_some());
        assert!(parsed.initial_entry.is_some());
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections[0].entries.len(), 1);
        assert_eq!(parsed.sections[0].entries[0].system_type, 0x83);
    }

    #[test]
    fn catalog_parse_standalone_entry() {
        let catalog = BootCatalog::new(4, 0, BootMedia::NoEmulation, 0, 0, true).unwrap();
        let mut bytes = catalog.record();
        // A bare section entry with no header, as some images do.
        let extra = EltoritoEntry::new(4, 0, BootMedia::NoEmulation, 0, true).unwrap();
        bytes.extend_from_slice(&extra.record());
        bytes.resize(2048, 0);

        let mut parsed = BootCatalog::parsing();
        let mut offset = 0;
        while !parsed.parse_entry(&bytes[offset..offset + 32]).unwrap() {
            offset += 32;
        }
        assert_eq!(parsed.standalone_entries.len(), 1);
    }

    #[test]
    fn catalog_section_chaining() {
        let mut catalog = BootCatalog::new(4, 0, BootMedia::NoEmulation, 0, 0, true).unwrap();
        catalog
            .add_section(4, 0, BootMedia::NoEmulation, 0, false, true)
            .unwrap();
        catalog
            .add_section(4, 0, BootMedia::NoEmulation, 0, true, true)
            .unwrap();
        assert_eq!(catalog.sections[0].header_indicator, 0x90);
        assert_eq!(catalog.sections[1].header_indicator, 0x91);
        assert_eq!(catalog.sections[1].platform_id, 0xef);
    }

    #[test]
    fn catalog_section_limit() {
        let mut catalog = BootCatalog::new(4, 0, BootMedia::NoEmulation, 0, 0, true).unwrap();
        for _ in 0..31 {
            catalog
                .add_section(4, 0, BootMedia::NoEmulation, 0, false, true)
                .unwrap();
        }
        assert!(catalog
            .add_section(4, 0, BootMedia::NoEmulation, 0, false, true)
            .is_err());
    }

    #[test]
    fn entry_refs_cover_catalog_order() {
        let mut catalog = BootCatalog::new(4, 0, BootMedia::NoEmulation, 0, 0, true).unwrap();
        let sec = catalog
            .add_section(4, 0, BootMedia::NoEmulation, 0, false, true)
            .unwrap();
        let refs = catalog.entry_refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0], EntryRef::Initial);
        assert_eq!(refs[1], sec);
        assert!(catalog.entry(sec).is_some());
    }

    fn mbr_with_partition(parttype: u8) -> Vec<u8> {
        let mut mbr = vec![0u8; 512];
        mbr[510] = 0x55;
        mbr[511] = 0xaa;
        let part = &mut mbr[446..462];
        part[0] = 0x80; // active
        part[1] = 1; // start head
        part[2] = 1; // start sector
        part[3] = 0; // start cylinder
        part[4] = parttype;
        part[5] = 15; // end head
        part[6] = 63; // end sector
        part[7] = 0; // end cylinder
        mbr
    }

    #[test]
    fn hd_mbr_check_returns_partition_type() {
        let mbr = mbr_with_partition(0x83);
        let system_type = hd_mbr_check(&mbr, 1008, true).unwrap();
        assert_eq!(system_type, 0x83);
    }

    #[test]
    fn hd_mbr_check_rejects_bad_magic() {
        let mut mbr = mbr_with_partition(0x83);
        mbr[510] = 0;
        assert!(hd_mbr_check(&mbr, 1, true).is_err());
    }

    #[test]
    fn hd_mbr_check_rejects_no_partitions() {
        let mut mbr = vec![0u8; 512];
        mbr[510] = 0x55;
        mbr[511] = 0xaa;
        assert!(hd_mbr_check(&mbr, 1, true).is_err());
    }

    #[test]
    fn hd_mbr_check_rejects_multiple_partitions() {
        let mut mbr = mbr_with_partition(0x83);
        mbr[462 + 4] = 0x0c;
        assert!(hd_mbr_check(&mbr, 1, true).is_err());
    }

    #[test]
    fn boot_info_table_round_trip() {
        let table = BootInfoTable {
            orig_len: 4096,
            csum: 0xdead_beef,
        };
        let rec = table.record(16, 26);
        assert_eq!(rec.len(), 56);
        let (pvd_extent, rec_extent, parsed) = BootInfoTable::parse(&rec).unwrap();
        assert_eq!(pvd_extent, 16);
        assert_eq!(rec_extent, 26);
        assert_eq!(parsed, table);
    }

    #[test]
    fn boot_info_table_checksum_sums_words() {
        assert_eq!(BootInfoTable::checksum(&[1, 0, 0, 0, 2, 0, 0, 0]), 3);
        // Trailing partial words are zero-extended.
        assert_eq!(BootInfoTable::checksum(&[1, 0, 0, 0, 2]), 3);
    }
}
