use byteorder::{ByteOrder, LittleEndian};
use common::{RcObject, RcState, TsError, TsResult};
use serde::Serialize;

use crate::events::event_type::EventType;

/// Unpacked event headers are one 32-bit word.
pub const UNPACKED_HEADER_LEN: usize = 4;
/// Packed event headers are two bytes.
pub const PACKED_HEADER_LEN: usize = 2;

/// Largest object id an unpacked header can carry (24 bits).
pub const MAX_ID_UNPACKED: u32 = 0x00FF_FFFF;
/// Largest object id a packed header can carry. The id byte stores
/// `id - 1`, so the decoded range is 1..=256.
pub const MAX_ID_PACKED: u32 = 256;

/// Decoded id 256 aliases to the root database (id 0), for packed
/// db-metadata events only.
pub const PACKED_ROOT_ALIAS: u32 = 256;

/// Common event header, either framing.
///
/// unpacked:            [bits]
/// +================================+
/// | object id          0 : 24      |
/// | event tag         24 : 8       |
/// +================================+
///
/// packed:              [bytes]
/// +================================+
/// | event tag          0 : 1       |
/// | object id - 1      1 : 1       |
/// +================================+
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
pub struct EventHeader {
    pub event_type: EventType,
    pub id: u32,
}

impl EventHeader {
    pub fn new(event_type: EventType, id: u32) -> Self {
        EventHeader { event_type, id }
    }

    pub fn parse_unpacked(buf: &[u8; UNPACKED_HEADER_LEN]) -> TsResult<EventHeader> {
        let word = LittleEndian::read_u32(buf);
        let tag = (word >> 24) as u8;
        let event_type = Self::tag_to_type(tag)?;
        Ok(EventHeader {
            event_type,
            id: word & MAX_ID_UNPACKED,
        })
    }

    /// Packed ids decode to `byte + 1`; the 256 -> 0 aliasing is applied
    /// by the parser, and only for db-metadata events.
    pub fn parse_packed(buf: &[u8; PACKED_HEADER_LEN]) -> TsResult<EventHeader> {
        let event_type = Self::tag_to_type(buf[0])?;
        Ok(EventHeader {
            event_type,
            id: buf[1] as u32 + 1,
        })
    }

    fn tag_to_type(tag: u8) -> TsResult<EventType> {
        EventType::try_from(tag).map_err(|_| {
            TsError::rc(
                RcObject::Data,
                RcState::Unexpected,
                format!("unrecognized event tag {}", tag),
            )
        })
    }

    pub fn to_unpacked(&self) -> [u8; UNPACKED_HEADER_LEN] {
        debug_assert!(self.id <= MAX_ID_UNPACKED);
        let word = self.id | (u8::from(self.event_type) as u32) << 24;
        let mut buf = [0u8; UNPACKED_HEADER_LEN];
        LittleEndian::write_u32(&mut buf, word);
        buf
    }

    pub fn to_packed(&self) -> [u8; PACKED_HEADER_LEN] {
        debug_assert!(self.id <= MAX_ID_PACKED);
        [u8::from(self.event_type), (self.id.wrapping_sub(1)) as u8]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unpacked_roundtrip() {
        let hdr = EventHeader::new(EventType::CellData, 0x00ABCDEF);
        let parsed = EventHeader::parse_unpacked(&hdr.to_unpacked()).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn unpacked_layout() {
        let hdr = EventHeader::new(EventType::NextRow, 3);
        // low 24 bits id, high byte tag
        assert_eq!(hdr.to_unpacked(), [3, 0, 0, 10]);
    }

    #[test]
    fn packed_id_offset() {
        let hdr = EventHeader::new(EventType::NextRow, 1);
        assert_eq!(hdr.to_packed(), [10, 0]);

        let parsed = EventHeader::parse_packed(&[10, 0]).unwrap();
        assert_eq!(parsed.id, 1);

        // id 0 wraps to byte 255 and decodes to the 256 alias
        let root = EventHeader::new(EventType::DbMetadataNode, 0);
        assert_eq!(root.to_packed(), [20, 255]);
        let parsed = EventHeader::parse_packed(&[20, 255]).unwrap();
        assert_eq!(parsed.id, PACKED_ROOT_ALIAS);
    }

    #[test]
    fn unknown_tag() {
        let err = EventHeader::parse_packed(&[99, 0]).unwrap_err();
        assert!(err.is_rc(RcObject::Data, RcState::Unexpected));

        let err = EventHeader::parse_unpacked(&[0, 0, 0, 200]).unwrap_err();
        assert!(err.is_rc(RcObject::Data, RcState::Unexpected));
    }

    #[test]
    fn zero_word_is_bad_event() {
        let hdr = EventHeader::parse_unpacked(&[0, 0, 0, 0]).unwrap();
        assert_eq!(hdr.event_type, EventType::BadEvent);
    }
}
