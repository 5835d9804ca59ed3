// ABOUTME: PTP USB bulk container header: the 12-byte (length, type, code, trans_id) record
// ABOUTME: wire encoding is little-endian and packed; see container::PduHeader::SIZE

use crate::error::FilterError;
use num_enum::TryFromPrimitive;

/// The four container types a PTP USB bulk header can carry. Only
/// `Command`, `Data`, and `Response` are ever acted on; `Event` passes
/// through the filter untouched (it never appears on the bulk pipes this
/// filter watches, but the wire format reserves the value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum ContainerType {
    Command = 1,
    Data = 2,
    Response = 3,
    Event = 4,
}

/// PTP response codes this filter inspects. Anything else is carried as a
/// raw `u16` — the response-code space is open-ended and only `Ok` is
/// ever compared against.
pub const RESPONSE_CODE_OK: u16 = 0x2001;

/// Opcodes this filter recognizes by name. Every other opcode is treated
/// as an ordinary non-preview command and passed through, carried as a
/// raw `u16` on [`PduHeader::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum KnownOpcode {
    OpenSession = 0x1002,
    CloseSession = 0x1003,
}

/// The 12-byte PTP USB bulk container header:
/// `length: u32 | type: u16 | code: u16 | trans_id: u32`, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    pub length: u32,
    pub kind: ContainerType,
    pub code: u16,
    pub trans_id: u32,
}

impl PduHeader {
    pub const SIZE: usize = 12;

    /// Decode a header from exactly 12 bytes. `buf.len()` must be `>= SIZE`;
    /// callers are responsible for buffering that much before calling this
    /// (see [`crate::parser::PduParser`], which never calls this on a
    /// partial slice).
    pub fn decode(buf: &[u8]) -> Result<Self, FilterError> {
        debug_assert!(buf.len() >= Self::SIZE);
        let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if (length as usize) < Self::SIZE {
            return Err(FilterError::TruncatedLength { length });
        }
        let raw_type = u16::from_le_bytes([buf[4], buf[5]]);
        let kind = ContainerType::try_from(raw_type)
            .map_err(|_| FilterError::UnknownContainerType(raw_type))?;
        let code = u16::from_le_bytes([buf[6], buf[7]]);
        let trans_id = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        Ok(PduHeader {
            length,
            kind,
            code,
            trans_id,
        })
    }

    pub fn encode(&self, out: &mut [u8; Self::SIZE]) {
        out[0..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..6].copy_from_slice(&(self.kind as u16).to_le_bytes());
        out[6..8].copy_from_slice(&self.code.to_le_bytes());
        out[8..12].copy_from_slice(&self.trans_id.to_le_bytes());
    }

    pub fn is_open_session(&self) -> bool {
        self.kind == ContainerType::Command && self.code == KnownOpcode::OpenSession as u16
    }

    pub fn is_close_session(&self) -> bool {
        self.kind == ContainerType::Command && self.code == KnownOpcode::CloseSession as u16
    }

    /// `length - SIZE` bytes of payload follow the header.
    pub fn payload_len(&self) -> u32 {
        self.length - Self::SIZE as u32
    }
}
