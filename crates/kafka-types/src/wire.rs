//! Schema-registry wire framing.
//!
//! Every Avro payload on the wire is prefixed with a 5-byte header so any
//! registry-aware consumer can find the writer schema:
//!
//! ```text
//! byte 0      magic marker, always 0x00
//! bytes 1..5  schema id, u32 big-endian
//! bytes 5..   Avro binary body
//! ```

use crate::error::{KafkaTypesError, Result};
use crate::SchemaId;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic byte indicating a schema id follows.
pub const MAGIC_BYTE: u8 = 0x00;

/// Length of the magic byte plus the schema id.
pub const HEADER_LEN: usize = 5;

/// Prefix an encoded body with the wire header.
pub fn frame(schema_id: SchemaId, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u8(MAGIC_BYTE);
    buf.put_u32(schema_id);
    buf.put_slice(body);
    buf.freeze()
}

/// Split a wire payload into its schema id and body.
pub fn unframe(data: &[u8]) -> Result<(SchemaId, &[u8])> {
    if data.len() < HEADER_LEN {
        return Err(KafkaTypesError::TooShort { len: data.len() });
    }

    if data[0] != MAGIC_BYTE {
        return Err(KafkaTypesError::InvalidMagicByte(data[0]));
    }

    let mut id_bytes = &data[1..HEADER_LEN];
    let schema_id = id_bytes.get_u32();

    Ok((schema_id, &data[HEADER_LEN..]))
}
