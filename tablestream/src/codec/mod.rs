pub mod uint_codec;

pub use uint_codec::{
    decode_u16, decode_u32, decode_u64, encode_u16, encode_u32, encode_u64, CodecError,
    CodecResult,
};
