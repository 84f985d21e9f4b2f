use super::protocol::PeerMessage;
use asynchronous_codec::{Bytes, BytesMut, Decoder, Encoder};
use thiserror::Error;
use unsigned_varint::codec;

#[derive(Debug, Error)]
pub enum PeerCodecError {
  #[error("message exceeds maximum transmission size")]
  MaxTransmissionSize,

  #[error("bincode error: {0}")]
  Bincode(#[from] bincode::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// All peer messages are length-prefixed `bincode`-serialized bytes.
/// The length prefix is an unsigned varint, same framing the gossip
/// layer originally used for its protobuf payloads; only the payload
/// encoding changed, since the canonical wire format for this
/// protocol is `bincode`, not protobuf.
pub struct PeerCodec {
  length_codec: codec::UviBytes,
}

impl PeerCodec {
  pub fn new(max_len: usize) -> Self {
    let mut length_codec = codec::UviBytes::default();
    length_codec.set_max_len(max_len);
    Self { length_codec }
  }
}

impl Encoder for PeerCodec {
  type Error = PeerCodecError;
  type Item = PeerMessage;

  fn encode(
    &mut self,
    item: Self::Item,
    dst: &mut BytesMut,
  ) -> Result<(), Self::Error> {
    let buf = bincode::serialize(&item)?;
    self
      .length_codec
      .encode(Bytes::from(buf), dst)
      .map_err(|_| PeerCodecError::MaxTransmissionSize)
  }
}

impl Decoder for PeerCodec {
  type Error = PeerCodecError;
  type Item = PeerMessage;

  fn decode(
    &mut self,
    src: &mut BytesMut,
  ) -> Result<Option<Self::Item>, Self::Error> {
    let packet = match self.length_codec.decode(src).map_err(|e| {
      if let std::io::ErrorKind::PermissionDenied = e.kind() {
        PeerCodecError::MaxTransmissionSize
      } else {
        PeerCodecError::Io(e)
      }
    })? {
      Some(p) => p,
      None => return Ok(None),
    };

    Ok(Some(bincode::deserialize(&packet)?))
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn roundtrips_a_message_through_the_codec() {
    let mut codec = PeerCodec::new(1 << 20);
    let mut buf = BytesMut::new();
    codec.encode(PeerMessage::GetConsentedHeader, &mut buf).unwrap();
    let decoded = codec.decode(&mut buf).unwrap().unwrap();
    assert!(matches!(decoded, PeerMessage::GetConsentedHeader));
  }
}
