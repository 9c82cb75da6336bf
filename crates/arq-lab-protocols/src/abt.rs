//! Alternating-Bit (stop-and-wait) sender and receiver.

use std::collections::VecDeque;

use arq_lab_abstract::{Packet, SystemContext, TransportProtocol};

use crate::seq::SeqSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// No packet outstanding.
    Idle,
    /// One packet outstanding, timer running.
    WaitAck,
}

pub struct AbtSender {
    state: SenderState,
    seq: SeqSpace,
    /// Bit for the next new packet.
    next_seq: u32,
    outstanding: Option<Packet>,
    pending: VecDeque<Vec<u8>>,
    timeout: f64,
}

impl AbtSender {
    pub fn new(timeout: f64) -> Self {
        Self {
            state: SenderState::Idle,
            seq: SeqSpace::new(2),
            next_seq: 0,
            outstanding: None,
            pending: VecDeque::new(),
            timeout,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    fn transmit(&mut self, ctx: &mut dyn SystemContext, message: &[u8]) {
        let packet = Packet::build_data(message, self.next_seq, 0);
        ctx.log(&format!("ABT send seq={}", packet.seqnum));
        ctx.send_packet(packet);
        ctx.start_timer(self.timeout);
        self.outstanding = Some(packet);
        self.next_seq = self.seq.next(self.next_seq);
        self.state = SenderState::WaitAck;
        ctx.record_metric("in_flight", 1.0);
    }
}

impl TransportProtocol for AbtSender {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log("ABT sender ready");
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
        let Some(outstanding) = self.outstanding.filter(|_| self.state == SenderState::WaitAck)
        else {
            ctx.log(&format!(
                "ABT protocol error: ACK {} while idle, ignored",
                packet.acknum
            ));
            return;
        };
        if !packet.verify() {
            ctx.log("ABT checksum error on ACK, dropped");
            return;
        }
        if packet.acknum != outstanding.seqnum {
            ctx.log(&format!(
                "ABT stray ACK {} (waiting for {}), ignored",
                packet.acknum, outstanding.seqnum
            ));
            return;
        }

        ctx.log(&format!("ABT received ACK {}", packet.acknum));
        ctx.stop_timer();
        self.state = SenderState::Idle;
        self.outstanding = None;
        ctx.record_metric("in_flight", 0.0);

        if let Some(message) = self.pending.pop_front() {
            self.transmit(ctx, &message);
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext) {
        if self.state != SenderState::WaitAck {
            return;
        }
        if let Some(packet) = self.outstanding {
            ctx.log(&format!("ABT timeout, retransmitting seq {}", packet.seqnum));
            ctx.send_packet(packet);
            ctx.start_timer(self.timeout);
        }
    }

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        match self.state {
            SenderState::Idle => self.transmit(ctx, data),
            SenderState::WaitAck => self.pending.push_back(data.to_vec()),
        }
    }
}

pub struct AbtReceiver {
    seq: SeqSpace,
    expected: u32,
}

impl Default for AbtReceiver {
    fn default() -> Self {
        Self {
            seq: SeqSpace::new(2),
            expected: 0,
        }
    }
}

impl AbtReceiver {
    pub fn expected(&self) -> u32 {
        self.expected
    }
}

impl TransportProtocol for AbtReceiver {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log("ABT receiver ready");
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
        if !packet.verify() {
            ctx.log(&format!(
                "ABT checksum mismatch for seq {}, dropped",
                packet.seqnum
            ));
            return;
        }
        if packet.seqnum == self.expected {
            ctx.deliver_data(&packet.payload);
            self.expected = self.seq.next(self.expected);
        } else {
            ctx.log(&format!(
                "ABT duplicate seq {} (expect {}), re-ACK",
                packet.seqnum, self.expected
            ));
        }
        ctx.send_packet(Packet::build_ack(packet.seqnum));
    }

    fn on_timer(&mut self, _ctx: &mut dyn SystemContext) {}

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, _data: &[u8]) {
        ctx.log("ABT receiver does not originate data");
    }
}
