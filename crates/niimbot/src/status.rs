//! Decoders for heartbeat, RFID and device-info replies.

use std::fmt;

use serde::Serialize;

use crate::{NiimbotError, Result};

/// Liveness probe reply. Which fields are present depends on the model,
/// identified by reply length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeartbeatInfo {
    pub closing_state: Option<u8>,
    pub power_level: Option<u8>,
    pub paper_state: Option<u8>,
    pub rfid_read_state: Option<u8>,
}

impl HeartbeatInfo {
    pub fn parse(data: &[u8]) -> Self {
        let at = |i: usize| data.get(i).copied();
        match data.len() {
            20 => Self {
                paper_state: at(18),
                rfid_read_state: at(19),
                ..Self::default()
            },
            19 => Self {
                closing_state: at(15),
                power_level: at(16),
                paper_state: at(17),
                rfid_read_state: at(18),
            },
            13 => Self {
                closing_state: at(9),
                power_level: at(10),
                paper_state: at(11),
                rfid_read_state: at(12),
            },
            10 => Self {
                closing_state: at(8),
                power_level: at(9),
                rfid_read_state: at(8),
                ..Self::default()
            },
            9 => Self {
                closing_state: at(8),
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

/// Facts read from the label roll's RFID tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RfidInfo {
    /// Tag UUID as lowercase hex (8 bytes).
    pub uuid: String,
    pub barcode: String,
    pub serial: String,
    pub used_len: u16,
    pub total_len: u16,
    pub label_type: u8,
}

impl RfidInfo {
    /// Parse a `GetRfid` reply. A leading zero byte means no tag.
    pub fn parse(data: &[u8]) -> Result<Option<Self>> {
        if data.first().is_none_or(|&b| b == 0) {
            return Ok(None);
        }

        let mut r = Reader::new(data);
        let uuid = hex::encode(r.take(8)?);
        let barcode = r.string()?;
        let serial = r.string()?;
        let total_len = r.u16()?;
        let used_len = r.u16()?;
        let label_type = r.u8()?;

        Ok(Some(Self {
            uuid,
            barcode,
            serial,
            used_len,
            total_len,
            label_type,
        }))
    }

    /// Encode back into reply layout.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let mut out = hex::decode(&self.uuid)
            .map_err(|e| NiimbotError::Protocol(format!("bad RFID uuid {:?}: {e}", self.uuid)))?;
        out.resize(8, 0);
        for s in [&self.barcode, &self.serial] {
            let bytes = &s.as_bytes()[..s.len().min(u8::MAX as usize)];
            out.push(bytes.len() as u8);
            out.extend_from_slice(bytes);
        }
        out.extend_from_slice(&self.total_len.to_be_bytes());
        out.extend_from_slice(&self.used_len.to_be_bytes());
        out.push(self.label_type);
        Ok(out)
    }
}

/// Keys accepted by `GetInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InfoKey {
    Density = 1,
    PrintSpeed = 2,
    LabelType = 3,
    LanguageType = 6,
    AutoShutdownTime = 7,
    DeviceType = 8,
    SoftVersion = 9,
    Battery = 10,
    DeviceSerial = 11,
    HardVersion = 12,
}

impl InfoKey {
    pub const ALL: [InfoKey; 10] = [
        Self::Density,
        Self::PrintSpeed,
        Self::LabelType,
        Self::LanguageType,
        Self::AutoShutdownTime,
        Self::DeviceType,
        Self::SoftVersion,
        Self::Battery,
        Self::DeviceSerial,
        Self::HardVersion,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Reply id for this key.
    pub fn reply_id(self) -> u8 {
        0x40 + self.id()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Density => "density",
            Self::PrintSpeed => "print_speed",
            Self::LabelType => "label_type",
            Self::LanguageType => "language_type",
            Self::AutoShutdownTime => "auto_shutdown_time",
            Self::DeviceType => "device_type",
            Self::SoftVersion => "soft_version",
            Self::Battery => "battery",
            Self::DeviceSerial => "device_serial",
            Self::HardVersion => "hard_version",
        }
    }
}

/// Decoded `GetInfo` value.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Number(u64),
    Version(f32),
    Serial(String),
}

impl InfoValue {
    pub fn parse(key: InfoKey, data: &[u8]) -> Self {
        match key {
            InfoKey::DeviceSerial => Self::Serial(hex::encode(data)),
            InfoKey::SoftVersion | InfoKey::HardVersion => {
                Self::Version(be_uint(data) as f32 / 100.0)
            }
            _ => Self::Number(be_uint(data)),
        }
    }
}

impl fmt::Display for InfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Version(v) => write!(f, "{v:.2}"),
            Self::Serial(s) => f.write_str(s),
        }
    }
}

fn be_uint(data: &[u8]) -> u64 {
    let tail = &data[data.len().saturating_sub(8)..];
    tail.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Cursor over a reply payload.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self.data.get(self.pos..end).ok_or_else(|| {
            NiimbotError::Protocol(format!(
                "reply truncated: wanted {n} bytes at offset {}, have {}",
                self.pos,
                self.data.len()
            ))
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tag() -> RfidInfo {
        RfidInfo {
            uuid: "88a1b2c3d4e5f601".into(),
            barcode: "6972842743589".into(),
            serial: "PZ1G312345".into(),
            used_len: 12,
            total_len: 160,
            label_type: 1,
        }
    }

    #[test]
    fn rfid_parse_layout() {
        let mut data = vec![0x88, 0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0x01];
        data.push(3);
        data.extend_from_slice(b"123");
        data.push(2);
        data.extend_from_slice(b"SN");
        data.extend_from_slice(&[0x00, 0xa0, 0x00, 0x0c, 0x01]);

        let info = RfidInfo::parse(&data).unwrap().unwrap();
        assert_eq!(info.uuid, "88a1b2c3d4e5f601");
        assert_eq!(info.barcode, "123");
        assert_eq!(info.serial, "SN");
        assert_eq!(info.total_len, 160);
        assert_eq!(info.used_len, 12);
        assert_eq!(info.label_type, 1);
    }

    #[test]
    fn rfid_payload_is_parseable() {
        let tag = sample_tag();
        assert_eq!(RfidInfo::parse(&tag.to_payload().unwrap()).unwrap(), Some(tag));
    }

    #[test]
    fn malformed_uuid_is_rejected() {
        let mut tag = sample_tag();
        tag.uuid = "88a1zz".into();
        assert!(matches!(tag.to_payload(), Err(NiimbotError::Protocol(_))));
        tag.uuid = "88a".into();
        assert!(tag.to_payload().is_err());
    }

    #[test]
    fn rfid_no_tag() {
        assert_eq!(RfidInfo::parse(&[0x00]).unwrap(), None);
        assert_eq!(RfidInfo::parse(&[]).unwrap(), None);
    }

    #[test]
    fn rfid_truncated_is_error() {
        let payload = sample_tag().to_payload().unwrap();
        assert!(RfidInfo::parse(&payload[..payload.len() - 3]).is_err());
    }

    #[test]
    fn heartbeat_by_length() {
        let mut d13 = vec![0u8; 13];
        d13[9..13].copy_from_slice(&[0, 4, 0, 1]);
        assert_eq!(
            HeartbeatInfo::parse(&d13),
            HeartbeatInfo {
                closing_state: Some(0),
                power_level: Some(4),
                paper_state: Some(0),
                rfid_read_state: Some(1),
            }
        );

        let mut d20 = vec![0u8; 20];
        d20[18] = 1;
        d20[19] = 1;
        let hb = HeartbeatInfo::parse(&d20);
        assert_eq!(hb.paper_state, Some(1));
        assert_eq!(hb.power_level, None);

        assert_eq!(HeartbeatInfo::parse(&[1, 2, 3]), HeartbeatInfo::default());
    }

    #[test]
    fn info_values() {
        assert_eq!(
            InfoValue::parse(InfoKey::DeviceSerial, &[0xab, 0x01]),
            InfoValue::Serial("ab01".into())
        );
        assert_eq!(
            InfoValue::parse(InfoKey::SoftVersion, &[0x01, 0x2c]),
            InfoValue::Version(3.0)
        );
        assert_eq!(InfoValue::parse(InfoKey::Battery, &[4]), InfoValue::Number(4));
        assert_eq!(InfoKey::Battery.reply_id(), 0x4a);
        assert_eq!(InfoValue::Version(2.5).to_string(), "2.50");
    }
}
