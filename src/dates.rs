//! The two ISO9660 date layouts: the 7-byte directory-record date
//! (ECMA-119 9.1.5) and the 17-byte volume-descriptor date (8.4.26.1).

use chrono::{Datelike, Local, Offset, Timelike};

use crate::error::{Error, Result};

/// The local GMT offset expressed in 15-minute intervals, as every
/// ISO9660 date field stores it.
pub fn gmt_offset_quarters() -> i8 {
    let seconds = Local::now().offset().fix().local_minus_utc();
    (seconds / 900) as i8
}

/// A directory-record date: years since 1900, month, day, hour, minute,
/// second, and the GMT offset in 15-minute intervals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryRecordDate {
    pub years_since_1900: u8,
    pub month: u8,
    pub day_of_month: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub gmtoffset: i8,
}

impl DirectoryRecordDate {
    pub const LENGTH: usize = 7;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LENGTH {
            return Err(Error::invalid_iso("directory record date too short"));
        }
        Ok(DirectoryRecordDate {
            years_since_1900: data[0],
            month: data[1],
            day_of_month: data[2],
            hour: data[3],
            minute: data[4],
            second: data[5],
            gmtoffset: data[6] as i8,
        })
    }

    /// A date reflecting the current local time.
    pub fn now() -> Self {
        let local = Local::now();
        DirectoryRecordDate {
            years_since_1900: (local.year() - 1900) as u8,
            month: local.month() as u8,
            day_of_month: local.day() as u8,
            hour: local.hour() as u8,
            minute: local.minute() as u8,
            second: local.second() as u8,
            gmtoffset: gmt_offset_quarters(),
        }
    }

    pub fn record(&self) -> [u8; 7] {
        [
            self.years_since_1900,
            self.month,
            self.day_of_month,
            self.hour,
            self.minute,
            self.second,
            self.gmtoffset as u8,
        ]
    }
}

/// A volume-descriptor date: ASCII `YYYYMMDDhhmmsshh` plus a signed GMT
/// offset byte.  An all-zero field means the date is unspecified, and
/// strings we cannot make sense of degrade to unspecified rather than
/// fault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeDescriptorDate {
    pub year: u16,
    pub month: u8,
    pub day_of_month: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
    pub gmtoffset: i8,
    date_str: [u8; 17],
}

const EMPTY_DATE: [u8; 17] = *b"0000000000000000\x00";

fn ascii_field(data: &[u8]) -> Option<u32> {
    let s = std::str::from_utf8(data).ok()?;
    s.parse::<u32>().ok()
}

impl VolumeDescriptorDate {
    pub const LENGTH: usize = 17;

    /// The unspecified date.
    pub fn empty() -> Self {
        VolumeDescriptorDate {
            year: 0,
            month: 0,
            day_of_month: 0,
            hour: 0,
            minute: 0,
            second: 0,
            hundredths: 0,
            gmtoffset: 0,
            date_str: EMPTY_DATE,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != Self::LENGTH {
            return Err(Error::invalid_iso("invalid ISO9660 date string"));
        }

        let year = ascii_field(&data[0..4]);
        let month = ascii_field(&data[4..6]);
        let day = ascii_field(&data[6..8]);
        let hour = ascii_field(&data[8..10]);
        let minute = ascii_field(&data[10..12]);
        let second = ascii_field(&data[12..14]);

        let fields = match (year, month, day, hour, minute, second) {
            (Some(y), Some(mo), Some(d), Some(h), Some(mi), Some(s))
                if (1..=12).contains(&mo)
                    && (1..=31).contains(&d)
                    && h <= 23
                    && mi <= 59
                    && s <= 59 =>
            {
                Some((y, mo, d, h, mi, s))
            }
            _ => None,
        };

        match fields {
            None => {
                // Either the all-zero "unspecified" encoding or one of
                // the wacky strings seen in the wild; both degrade to
                // unspecified.
                Ok(Self::empty())
            }
            Some((y, mo, d, h, mi, s)) => {
                // Some mastering tools (MagicISO) fill the hundredths
                // with raw binary zeros instead of ASCII digits.
                let hundredths = ascii_field(&data[14..16])
                    .unwrap_or_else(|| u32::from(data[14]) << 8 | u32::from(data[15]));
                let mut date_str = [0u8; 17];
                date_str.copy_from_slice(data);
                Ok(VolumeDescriptorDate {
                    year: y as u16,
                    month: mo as u8,
                    day_of_month: d as u8,
                    hour: h as u8,
                    minute: mi as u8,
                    second: s as u8,
                    hundredths: hundredths as u8,
                    gmtoffset: data[16] as i8,
                    date_str,
                })
            }
        }
    }

    /// A date reflecting the current local time.
    pub fn now() -> Self {
        let local = Local::now();
        let gmtoffset = gmt_offset_quarters();
        let rendered = format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}{:02}",
            local.year(),
            local.month(),
            local.day(),
            local.hour(),
            local.minute(),
            local.second(),
            0
        );
        let mut date_str = [0u8; 17];
        date_str[..16].copy_from_slice(rendered.as_bytes());
        date_str[16] = gmtoffset as u8;
        VolumeDescriptorDate {
            year: local.year() as u16,
            month: local.month() as u8,
            day_of_month: local.day() as u8,
            hour: local.hour() as u8,
            minute: local.minute() as u8,
            second: local.second() as u8,
            hundredths: 0,
            gmtoffset,
            date_str,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.date_str == EMPTY_DATE
    }

    pub fn record(&self) -> [u8; 17] {
        self.date_str
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dr_date_round_trip() {
        let data = [120, 1, 2, 13, 33, 44, 0xfc];
        let date = DirectoryRecordDate::parse(&data).unwrap();
        assert_eq!(date.years_since_1900, 120);
        assert_eq!(date.gmtoffset, -4);
        assert_eq!(date.record(), data);
    }

    #[test]
    fn dr_date_too_short() {
        assert!(DirectoryRecordDate::parse(&[0; 6]).is_err());
    }

    #[test]
    fn vd_date_parse_valid() {
        let date = VolumeDescriptorDate::parse(b"2018010100000000\x00").unwrap();
        assert_eq!(date.year, 2018);
        assert_eq!(date.month, 1);
        assert_eq!(date.day_of_month, 1);
        assert!(!date.is_empty());
        assert_eq!(&date.record(), b"2018010100000000\x00");
    }

    #[test]
    fn vd_date_all_zero_is_unspecified() {
        let date = VolumeDescriptorDate::parse(b"0000000000000000\x00").unwrap();
        assert!(date.is_empty());
        assert_eq!(date.year, 0);
    }

    #[test]
    fn vd_date_garbage_degrades_to_unspecified() {
        let date = VolumeDescriptorDate::parse(b"XYZZY*0000000000\x00").unwrap();
        assert!(date.is_empty());
        assert_eq!(&date.record(), b"0000000000000000\x00");
    }

    #[test]
    fn vd_date_wrong_length_rejected() {
        assert!(VolumeDescriptorDate::parse(b"20180101").is_err());
    }

    #[test]
    fn vd_date_binary_hundredths_tolerated() {
        let mut raw = *b"2018010100000000\x00";
        raw[14] = 0;
        raw[15] = 0;
        let date = VolumeDescriptorDate::parse(&raw).unwrap();
        assert_eq!(date.hundredths, 0);
        assert!(!date.is_empty());
    }

    #[test]
    fn vd_date_now_renders_seventeen_bytes() {
        let date = VolumeDescriptorDate::now();
        let rec = date.record();
        assert_eq!(rec.len(), 17);
        assert!(rec[..14].iter().all(u8::is_ascii_digit));
    }
}
