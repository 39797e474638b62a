//! A pass-through `tonic` codec carrying raw bytes.
//!
//! The Gen3 wire schema has no published `.proto` file, so there is nothing
//! for `prost`/`tonic-build` to generate stubs from. This codec lets `tonic`
//! handle HTTP/2 framing and gRPC message length-prefixing (the part of the
//! stack that genuinely benefits from a mature implementation) while every
//! byte of the message body is parsed and built by hand in
//! [`crate::gen3::codec`] and [`crate::gen3::discovery`], matching spec
//! §4.8.1's "no external framing library" requirement at the message layer.

use bytes::{Buf, BufMut};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::Status;

#[derive(Debug, Clone, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Encode = Vec<u8>;
    type Decode = Vec<u8>;
    type Encoder = RawCodec;
    type Decoder = RawCodec;

    fn encoder(&mut self) -> Self::Encoder {
        RawCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawCodec
    }
}

impl Encoder for RawCodec {
    type Item = Vec<u8>;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put_slice(&item);
        Ok(())
    }
}

impl Decoder for RawCodec {
    type Item = Vec<u8>;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let len = src.remaining();
        if len == 0 {
            return Ok(Some(Vec::new()));
        }
        let mut out = vec![0u8; len];
        src.copy_to_slice(&mut out);
        Ok(Some(out))
    }
}
