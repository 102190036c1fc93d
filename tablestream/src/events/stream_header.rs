use byteorder::{ByteOrder, LittleEndian};
use common::{RcObject, RcState, TsError, TsResult};
use serde::Serialize;

/// 8 characters identifying the stream type.
pub const STREAM_SIGNATURE: &[u8; 8] = b"NCBIgnld";

/// The endian sentinel as written by a same-endian producer.
pub const GOOD_ENDIAN: u32 = 1;
/// The sentinel as it appears when produced on the opposite endianness.
pub const REVERSE_ENDIAN: u32 = 1 << 24;

pub const CURRENT_VERSION: u32 = 1;

/// On-wire size of the versioned header, including the packing word.
pub const HEADER_SIZE: usize = 24;

/// Stream header, the first 24 bytes of every stream.
///
/// ```text
///                      [startPos : Len]
/// +=====================================+
/// | stream | signature         0 : 8    |  ==> "NCBIgnld"
/// | header +----------------------------+
/// |        | endian            8 : 4    | = 1 in the producer's order
/// |        +----------------------------+
/// |        | version          12 : 4    | = 1
/// |        +----------------------------+
/// |        | hdr_size         16 : 4    | = 24, the size of this struct
/// |        +----------------------------+
/// |        | packing          20 : 4    | 0 = unpacked, 1 = packed
/// +=====================================+
/// ```
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct StreamHeader {
    pub signature: [u8; 8],
    pub endian: u32,
    pub version: u32,
    pub hdr_size: u32,
    pub packing: u32,
}

impl StreamHeader {
    pub fn new(packed: bool) -> Self {
        StreamHeader {
            signature: *STREAM_SIGNATURE,
            endian: GOOD_ENDIAN,
            version: CURRENT_VERSION,
            hdr_size: HEADER_SIZE as u32,
            packing: if packed { 1 } else { 0 },
        }
    }

    pub fn is_packed(&self) -> bool {
        self.packing != 0
    }

    /// Decodes and validates the fixed 24-byte header.
    pub fn parse(buf: &[u8; HEADER_SIZE]) -> TsResult<StreamHeader> {
        let header = StreamHeader {
            signature: buf[0..8].try_into().unwrap(),
            endian: LittleEndian::read_u32(&buf[8..12]),
            version: LittleEndian::read_u32(&buf[12..16]),
            hdr_size: LittleEndian::read_u32(&buf[16..20]),
            packing: LittleEndian::read_u32(&buf[20..24]),
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> TsResult<()> {
        if &self.signature != STREAM_SIGNATURE {
            return Err(TsError::rc(
                RcObject::Header,
                RcState::Corrupt,
                "bad stream signature",
            ));
        }
        match self.endian {
            GOOD_ENDIAN => {}
            REVERSE_ENDIAN => {
                return Err(TsError::rc(
                    RcObject::Format,
                    RcState::Unsupported,
                    "reversed header byte order",
                ));
            }
            _ => {
                return Err(TsError::rc(
                    RcObject::Format,
                    RcState::Invalid,
                    "unrecognized endian sentinel",
                ));
            }
        }
        if self.version != CURRENT_VERSION {
            return Err(TsError::rc(
                RcObject::Header,
                RcState::BadVersion,
                format!("unsupported stream version {}", self.version),
            ));
        }
        if self.hdr_size as usize != HEADER_SIZE {
            return Err(TsError::rc(
                RcObject::Header,
                RcState::Corrupt,
                format!("bad header size {}", self.hdr_size),
            ));
        }
        if self.packing > 1 {
            return Err(TsError::rc(
                RcObject::Header,
                RcState::Corrupt,
                format!("bad packing flag {}", self.packing),
            ));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.signature);
        LittleEndian::write_u32(&mut buf[8..12], self.endian);
        LittleEndian::write_u32(&mut buf[12..16], self.version);
        LittleEndian::write_u32(&mut buf[16..20], self.hdr_size);
        LittleEndian::write_u32(&mut buf[20..24], self.packing);
        buf
    }
}
