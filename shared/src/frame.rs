/*!
Telescope protocol framing.

Frames are little-endian and fixed size:

| offset | field  | type  | meaning                              |
|--------|--------|-------|--------------------------------------|
| 0      | size   | u16   | frame length (framing only)          |
| 2      | type   | u16   | message type (framing only)          |
| 4      | time   | i64   | sender clock, microseconds           |
| 12     | ra     | u32   | right ascension, 2^32 units per 24h  |
| 16     | dec    | i32   | declination, 2^31 units per 180°     |
| 20     | status | i32   | outbound only, always zero           |
*/

use crate::coordinates::protocol_encode;
use crate::error::{Result, SharedError};
use crate::protocol::{
    FRAME_SIZE_BYTES, OUTBOUND_FRAME_SIZE_BYTES, OUTBOUND_SIZE_FIELD, OUTBOUND_TYPE_FIELD,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::Utc;

/// One telescope protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolFrame {
    pub size: u16,
    pub msg_type: u16,
    pub time_us: i64,
    pub ra: u32,
    pub dec: i32,
}

impl ProtocolFrame {
    /// Decode the first 20 bytes of a received buffer
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_SIZE_BYTES {
            return Err(SharedError::invalid_frame(format!(
                "{} bytes received, a frame needs {}",
                data.len(),
                FRAME_SIZE_BYTES
            )));
        }

        let mut buf = &data[..FRAME_SIZE_BYTES];
        Ok(Self {
            size: buf.get_u16_le(),
            msg_type: buf.get_u16_le(),
            time_us: buf.get_i64_le(),
            ra: buf.get_u32_le(),
            dec: buf.get_i32_le(),
        })
    }

    /// Outbound position report for already scaled coordinates
    pub fn position(ra: u32, dec: i32, time_us: i64) -> Self {
        Self {
            size: OUTBOUND_SIZE_FIELD,
            msg_type: OUTBOUND_TYPE_FIELD,
            time_us,
            ra,
            dec,
        }
    }

    /// Outbound position report for a pointing in radians, stamped with the current time
    pub fn current_position(ra: f64, dec: f64) -> Self {
        let (ra_scaled, dec_scaled) = protocol_encode(ra, dec);
        Self::position(ra_scaled, dec_scaled, now_micros())
    }

    /// Encode as an outbound frame, including the zeroed trailing status field
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(OUTBOUND_FRAME_SIZE_BYTES);
        buf.put_u16_le(self.size);
        buf.put_u16_le(self.msg_type);
        buf.put_i64_le(self.time_us);
        buf.put_u32_le(self.ra);
        buf.put_i32_le(self.dec);
        buf.put_i32_le(0);
        buf.freeze()
    }

    /// Coordinates and time as floating values carrying the raw integer magnitudes
    pub fn raw_values(&self) -> (f64, f64, f64) {
        (self.ra as f64, self.dec as f64, self.time_us as f64)
    }
}

/// Current wall-clock time in microseconds since the Unix epoch
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}
