//! Command ids understood by Niimbot printers.

use crate::packet::Packet;

/// Reply id the printer uses to reject a request.
pub const ERROR_REPLY: u8 = 0xdb;

/// Requests issued by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    StartPrint = 0x01,
    StartPagePrint = 0x03,
    SetDimension = 0x13,
    GetRfid = 0x1a,
    SetLabelDensity = 0x21,
    SetLabelType = 0x23,
    GetInfo = 0x40,
    PrintEmptyRow = 0x84,
    PrintBitmapRow = 0x85,
    Connect = 0xc1,
    Heartbeat = 0xdc,
    EndPagePrint = 0xe3,
    EndPrint = 0xf3,
}

impl Command {
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Id of the notification that answers this command.
    ///
    /// Row commands are streamed without acknowledgement. `GetInfo` replies
    /// carry `0x40 + key`, which the caller supplies instead.
    pub fn reply_id(self) -> Option<u8> {
        match self {
            Self::PrintEmptyRow | Self::PrintBitmapRow => None,
            Self::SetLabelDensity | Self::SetLabelType => Some(self.id() + 0x10),
            other => Some(other.id().wrapping_add(1)),
        }
    }

    /// Build a packet for this command.
    pub fn packet(self, payload: impl Into<Vec<u8>>) -> crate::Result<Packet> {
        Packet::new(self.id(), payload)
    }

    pub fn from_id(id: u8) -> Option<Self> {
        let cmd = match id {
            0x01 => Self::StartPrint,
            0x03 => Self::StartPagePrint,
            0x13 => Self::SetDimension,
            0x1a => Self::GetRfid,
            0x21 => Self::SetLabelDensity,
            0x23 => Self::SetLabelType,
            0x40 => Self::GetInfo,
            0x84 => Self::PrintEmptyRow,
            0x85 => Self::PrintBitmapRow,
            0xc1 => Self::Connect,
            0xdc => Self::Heartbeat,
            0xe3 => Self::EndPagePrint,
            0xf3 => Self::EndPrint,
            _ => return None,
        };
        Some(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_ids() {
        assert_eq!(Command::Heartbeat.reply_id(), Some(0xdd));
        assert_eq!(Command::GetRfid.reply_id(), Some(0x1b));
        assert_eq!(Command::SetLabelDensity.reply_id(), Some(0x31));
        assert_eq!(Command::SetLabelType.reply_id(), Some(0x33));
        assert_eq!(Command::EndPrint.reply_id(), Some(0xf4));
        assert_eq!(Command::PrintBitmapRow.reply_id(), None);
        assert_eq!(Command::PrintEmptyRow.reply_id(), None);
    }

    #[test]
    fn from_id_roundtrips_known_commands() {
        for cmd in [Command::Connect, Command::EndPagePrint, Command::SetDimension] {
            assert_eq!(Command::from_id(cmd.id()), Some(cmd));
        }
        assert_eq!(Command::from_id(0x99), None);
    }
}
