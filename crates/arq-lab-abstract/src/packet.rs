use serde::{Deserialize, Serialize};

/// Fixed payload capacity of every packet, in bytes.
pub const PAYLOAD_SIZE: usize = 20;

/// The wire unit exchanged over the simulated link.
///
/// Data and ACK packets share this layout. An ACK carries `seqnum = 0` and a
/// zeroed payload; only `acknum` is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub seqnum: u32,
    pub acknum: u32,
    /// 8-bit wrapping sum over the other fields, see [`checksum`].
    pub checksum: u8,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl Packet {
    /// Build a data packet carrying `message`.
    ///
    /// The message is zero-padded to [`PAYLOAD_SIZE`]; anything beyond the
    /// capacity is truncated.
    pub fn build_data(message: &[u8], seqnum: u32, acknum: u32) -> Self {
        let mut packet = Self {
            seqnum,
            acknum,
            checksum: 0,
            payload: pad_message(message),
        };
        packet.checksum = packet.compute_checksum();
        packet
    }

    /// Build a payload-empty acknowledgement for `acknum`.
    pub fn build_ack(acknum: u32) -> Self {
        let mut packet = Self {
            seqnum: 0,
            acknum,
            checksum: 0,
            payload: [0; PAYLOAD_SIZE],
        };
        packet.checksum = packet.compute_checksum();
        packet
    }

    pub fn compute_checksum(&self) -> u8 {
        checksum(self.seqnum, self.acknum, &self.payload)
    }

    /// `true` when the stored checksum matches the recomputed one.
    pub fn verify(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

/// Wrapping byte sum of `seqnum`, `acknum` (little-endian) and the payload.
///
/// Sequence numbers stay below 256 in every discipline, so this is the plain
/// `seqnum + acknum + Σ payload (mod 256)`. Summing every header byte means a
/// single flipped byte anywhere is always caught.
pub fn checksum(seqnum: u32, acknum: u32, payload: &[u8]) -> u8 {
    seqnum
        .to_le_bytes()
        .iter()
        .chain(acknum.to_le_bytes().iter())
        .chain(payload.iter())
        .fold(0u8, |sum, &byte| sum.wrapping_add(byte))
}

/// Copy `message` into a zeroed payload buffer.
pub fn pad_message(message: &[u8]) -> [u8; PAYLOAD_SIZE] {
    let mut payload = [0u8; PAYLOAD_SIZE];
    let len = message.len().min(PAYLOAD_SIZE);
    payload[..len].copy_from_slice(&message[..len]);
    payload
}
