use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes};
use crate::error::LinkError;

/// Default size of a complete encoded packet
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// timestamp (i64) + order (u64) + message length (u16) + flags (u32)
pub const HEADER_LEN: usize = std::mem::size_of::<i64>() + std::mem::size_of::<u64>() + std::mem::size_of::<u16>() + std::mem::size_of::<u32>();

/// payload capacity for a given datagram size, 0 if not even the header fits
pub const fn max_payload_len(max_datagram_size: usize) -> usize {
    max_datagram_size.saturating_sub(HEADER_LEN)
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PacketFlags: u32 {
        const RELIABLE = 1 << 0;
        const ACK = 1 << 1;
    }
}

/// A single UDP datagram. All numbers are little endian:
///
/// ```ascii
/// 0:  timestamp (i64) - microseconds since epoch at creation, doubles as the correlation id
///      that acknowledgements refer to
/// 8:  order (u64) - per-peer sequence number, 0 for unreliable and ack packets
/// 16: message length (u16)
/// 18: payload (message length bytes)
/// *:  flags (u32) - bit 0 reliable, bit 1 ack
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub timestamp: i64,
    pub order: u64,
    pub payload: Bytes,
    pub flags: PacketFlags,
}

impl Packet {
    pub fn is_reliable(&self) -> bool {
        self.flags.contains(PacketFlags::RELIABLE)
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(PacketFlags::ACK)
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Writes the packet to the start of `buf`, returning the number of bytes written. Nothing
    ///  is written if the packet does not fit.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let message_len: u16 = self.payload.len().try_into()
            .map_err(|_| LinkError::PayloadTooLarge { len: self.payload.len(), max: u16::MAX as usize })?;

        let required = self.encoded_len();
        if buf.len() < required {
            return Err(LinkError::BufferTooSmall { required, available: buf.len() });
        }

        let mut w = &mut buf[..required];
        w.put_i64_le(self.timestamp);
        w.put_u64_le(self.order);
        w.put_u16_le(message_len);
        w.put_slice(&self.payload);
        w.put_u32_le(self.flags.bits());
        Ok(required)
    }

    /// Parses a complete datagram. The declared message length must match the datagram's length
    ///  exactly, so truncated datagrams are rejected rather than read past their end.
    pub fn decode(mut buf: &[u8]) -> Result<Packet, LinkError> {
        if buf.remaining() < HEADER_LEN {
            return Err(LinkError::Malformed(format!("datagram of {} bytes is shorter than the header", buf.remaining())));
        }

        let timestamp = buf.get_i64_le();
        let order = buf.get_u64_le();
        let message_len = buf.get_u16_le() as usize;

        if buf.remaining() != message_len + std::mem::size_of::<u32>() {
            return Err(LinkError::Malformed(format!(
                "declared message length {} does not match the {} bytes remaining in the datagram",
                message_len,
                buf.remaining().saturating_sub(std::mem::size_of::<u32>()),
            )));
        }

        let payload = Bytes::copy_from_slice(&buf[..message_len]);
        buf.advance(message_len);

        let raw_flags = buf.get_u32_le();
        let flags = PacketFlags::from_bits(raw_flags)
            .ok_or_else(|| LinkError::Malformed(format!("unknown flags {:#x}", raw_flags)))?;
        if flags.contains(PacketFlags::RELIABLE | PacketFlags::ACK) {
            return Err(LinkError::Malformed("packet is flagged both reliable and ack".to_string()));
        }

        Ok(Packet {
            timestamp,
            order,
            payload,
            flags,
        })
    }
}
