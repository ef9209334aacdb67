use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::input::Error;
use crate::symbol::Symbol;

/// Size of one frame written by the gesture relay.
pub const FRAME_LEN: usize = 3;

/// Splits the input byte stream into fixed-size frames and decodes each
/// frame into a [`Symbol`].
///
/// The relay must pad every frame to [`FRAME_LEN`] bytes: a short write is
/// held back until the rest of the frame arrives.
pub struct FrameDecoder {}

impl Decoder for FrameDecoder {
    type Item = Symbol;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < FRAME_LEN {
            return Ok(None);
        }
        let frame = buf.split_to(FRAME_LEN);
        Ok(Some(Symbol::decode(&frame)?))
    }
}
