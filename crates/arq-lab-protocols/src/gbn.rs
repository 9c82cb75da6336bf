//! Go-Back-N sender and receiver.
//!
//! The sender keeps up to `window_size` packets in flight, ordered oldest
//! first in a retransmission list. ACKs are cumulative. One timer covers the
//! oldest unacknowledged packet; when it fires every packet in the list is
//! resent in original order.
//!
//! ```text
//!  base              next_seq
//!   │                    │
//! ──┼────────────────────┼──────────────▶ seq ring (mod 2N)
//!   │ <── in flight ───▶ │ <── usable ─▶
//! ```

use std::collections::VecDeque;

use arq_lab_abstract::{Packet, SystemContext, TransportProtocol};

use crate::discipline::ProtocolParams;
use crate::seq::SeqSpace;

pub struct GbnSender {
    base: u32,
    next_seq: u32,
    window_size: u32,
    seq: SeqSpace,
    /// Messages waiting for window space.
    pending: VecDeque<Vec<u8>>,
    /// Sent but unacknowledged packets, oldest first.
    in_flight: VecDeque<Packet>,
    timeout: f64,
}

impl GbnSender {
    pub fn new(params: &ProtocolParams) -> Self {
        let window_size = params.window_size();
        Self {
            base: 0,
            next_seq: 0,
            window_size: window_size as u32,
            seq: SeqSpace::for_window(window_size),
            pending: VecDeque::new(),
            in_flight: VecDeque::with_capacity(window_size),
            timeout: params.timeout(),
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    /// Sequence numbers in the retransmission list, oldest first.
    pub fn in_flight_seqs(&self) -> Vec<u32> {
        self.in_flight.iter().map(|p| p.seqnum).collect()
    }

    fn window_has_space(&self) -> bool {
        self.seq.distance(self.base, self.next_seq) < self.window_size
    }

    /// Move pending messages into the window while it has space.
    fn fill_window(&mut self, ctx: &mut dyn SystemContext) {
        while self.window_has_space() {
            let Some(message) = self.pending.pop_front() else {
                break;
            };
            let packet = Packet::build_data(&message, self.next_seq, 0);
            ctx.log(&format!("GBN send seq={}", packet.seqnum));
            ctx.send_packet(packet);
            if self.base == self.next_seq {
                ctx.start_timer(self.timeout);
            }
            self.in_flight.push_back(packet);
            self.next_seq = self.seq.next(self.next_seq);
            ctx.record_metric("in_flight", self.in_flight.len() as f64);
        }
        if !self.pending.is_empty() {
            ctx.log(&format!(
                "GBN window full, {} message(s) queued",
                self.pending.len()
            ));
        }
    }
}

impl TransportProtocol for GbnSender {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log(&format!(
            "GBN sender ready (window {}, seq space {})",
            self.window_size,
            self.seq.modulus()
        ));
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
        if !packet.verify() {
            ctx.log("GBN checksum error on ACK, dropped");
            return;
        }
        let outstanding = self.seq.distance(self.base, self.next_seq);
        if !self.seq.in_window(self.base, outstanding, packet.acknum) {
            ctx.log(&format!(
                "GBN ACK {} outside window [{}, {}), ignored",
                packet.acknum, self.base, self.next_seq
            ));
            return;
        }

        while let Some(acked) = self.in_flight.pop_front() {
            if acked.seqnum == packet.acknum {
                break;
            }
        }
        self.base = self.seq.next(packet.acknum);
        ctx.log(&format!(
            "GBN cumulative ACK {}, base now {}",
            packet.acknum, self.base
        ));

        ctx.stop_timer();
        if self.base != self.next_seq {
            ctx.start_timer(self.timeout);
        }
        ctx.record_metric("in_flight", self.in_flight.len() as f64);

        self.fill_window(ctx);
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext) {
        if self.in_flight.is_empty() {
            return;
        }
        ctx.log(&format!(
            "GBN timeout, resending {} packet(s) from seq {}",
            self.in_flight.len(),
            self.base
        ));
        ctx.start_timer(self.timeout);
        for packet in &self.in_flight {
            ctx.send_packet(*packet);
        }
    }

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        self.pending.push_back(data.to_vec());
        self.fill_window(ctx);
    }
}

pub struct GbnReceiver {
    expected: u32,
    last_acked: Option<u32>,
    seq: SeqSpace,
}

impl GbnReceiver {
    pub fn new(params: &ProtocolParams) -> Self {
        Self {
            expected: 0,
            last_acked: None,
            seq: SeqSpace::for_window(params.window_size()),
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn last_acked(&self) -> Option<u32> {
        self.last_acked
    }
}

impl TransportProtocol for GbnReceiver {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log("GBN receiver ready");
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
        if !packet.verify() {
            ctx.log(&format!(
                "GBN checksum mismatch for seq {}, dropped",
                packet.seqnum
            ));
            return;
        }

        if packet.seqnum == self.expected {
            ctx.deliver_data(&packet.payload);
            self.last_acked = Some(packet.seqnum);
            self.expected = self.seq.next(self.expected);
            ctx.send_packet(Packet::build_ack(packet.seqnum));
            return;
        }

        match self.last_acked {
            Some(last) => {
                ctx.log(&format!(
                    "GBN out-of-order seq {} (expect {}), re-ACK {}",
                    packet.seqnum, self.expected, last
                ));
                ctx.send_packet(Packet::build_ack(last));
            }
            None => ctx.log(&format!(
                "GBN out-of-order seq {} before first delivery, ignored",
                packet.seqnum
            )),
        }
    }

    fn on_timer(&mut self, _ctx: &mut dyn SystemContext) {}

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, _data: &[u8]) {
        ctx.log("GBN receiver does not originate data");
    }
}
