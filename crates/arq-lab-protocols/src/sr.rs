//! Selective-Repeat sender and receiver.
//!
//! Each in-flight packet has its own virtual deadline in a [`TimerSchedule`];
//! the side's single real timer is always armed for the earliest one. A
//! timeout resends only the packet whose deadline expired.
//!
//! `base` is always the nearest unacknowledged sequence number in ring order
//! from the previous base, or `next_seq` when nothing is in flight. It never
//! depends on the order packets were buffered in.

use std::collections::VecDeque;

use arq_lab_abstract::{PAYLOAD_SIZE, Packet, SimTime, SystemContext, TransportProtocol};

use crate::discipline::ProtocolParams;
use crate::seq::SeqSpace;
use crate::timer::{RealTimer, TimerSchedule};

pub struct SrSender {
    base: u32,
    next_seq: u32,
    window_size: u32,
    seq: SeqSpace,
    pending: VecDeque<Vec<u8>>,
    /// In-flight packets indexed by seqnum.
    resend: Vec<Option<Packet>>,
    /// One deadline per in-flight packet; its size is the in-flight count.
    schedule: TimerSchedule,
    timer: RealTimer,
    timeout: f64,
}

impl SrSender {
    pub fn new(params: &ProtocolParams) -> Self {
        let window_size = params.window_size();
        let timeout = params.timeout();
        let seq = SeqSpace::for_window(window_size);
        Self {
            base: 0,
            next_seq: 0,
            window_size: window_size as u32,
            seq,
            pending: VecDeque::new(),
            resend: vec![None; seq.modulus() as usize],
            schedule: TimerSchedule::new(seq.modulus()),
            timer: RealTimer::default(),
            timeout,
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

    /// Unacknowledged sequence numbers in ring order from `base`.
    pub fn in_flight_seqs(&self) -> Vec<u32> {
        self.seq
            .walk(self.base, self.seq.distance(self.base, self.next_seq))
            .filter(|&s| self.resend[s as usize].is_some())
            .collect()
    }

    /// Deadline the real timer is currently armed for.
    pub fn armed_deadline(&self) -> Option<SimTime> {
        self.timer.armed_for()
    }

    fn window_has_space(&self) -> bool {
        self.seq.distance(self.base, self.next_seq) < self.window_size
    }

    fn rearm(&mut self, ctx: &mut dyn SystemContext) {
        let earliest = self.schedule.earliest().map(|(deadline, _)| deadline);
        self.timer.sync(ctx, earliest);
    }

    fn fill_window(&mut self, ctx: &mut dyn SystemContext) {
        while self.window_has_space() {
            let Some(message) = self.pending.pop_front() else {
                break;
            };
            let packet = Packet::build_data(&message, self.next_seq, 0);
            ctx.log(&format!("SR send seq={}", packet.seqnum));
            ctx.send_packet(packet);
            self.resend[packet.seqnum as usize] = Some(packet);
            self.schedule
                .arm(packet.seqnum, ctx.now().after(self.timeout));
            self.next_seq = self.seq.next(self.next_seq);
            ctx.record_metric("in_flight", self.schedule.len() as f64);
        }
        self.rearm(ctx);
    }

    /// Nearest unacknowledged seqnum at or after `base`, else `next_seq`.
    fn advance_base(&mut self) {
        let span = self.seq.distance(self.base, self.next_seq);
        self.base = self
            .seq
            .walk(self.base, span)
            .find(|&s| self.resend[s as usize].is_some())
            .unwrap_or(self.next_seq);
    }
}

impl TransportProtocol for SrSender {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log(&format!(
            "SR sender ready (window {}, seq space {})",
            self.window_size,
            self.seq.modulus()
        ));
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
        if !packet.verify() {
            ctx.log("SR checksum error on ACK, dropped");
            return;
        }
        let ack = packet.acknum;
        if !self.seq.in_window(self.base, self.window_size, ack) {
            ctx.log(&format!(
                "SR ACK {} outside window starting at {}, ignored",
                ack, self.base
            ));
            return;
        }
        if self.resend[ack as usize].take().is_none() {
            ctx.log(&format!("SR duplicate ACK {}, ignored", ack));
            return;
        }
        self.schedule.cancel(ack);
        ctx.record_metric("in_flight", self.schedule.len() as f64);

        if self.schedule.is_empty() {
            self.base = self.next_seq;
        } else if ack == self.base {
            self.advance_base();
        }
        ctx.log(&format!("SR ACK {}, base now {}", ack, self.base));

        self.rearm(ctx);
        self.fill_window(ctx);
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext) {
        self.timer.fired();
        let Some((_, seq)) = self.schedule.earliest() else {
            return;
        };
        match self.resend[seq as usize] {
            Some(packet) => {
                ctx.log(&format!("SR timeout, retransmitting seq {}", seq));
                ctx.send_packet(packet);
                self.schedule.arm(seq, ctx.now().after(self.timeout));
            }
            None => {
                ctx.log(&format!("SR timeout for seq {} not in resend buffer", seq));
                self.schedule.cancel(seq);
            }
        }
        self.rearm(ctx);
    }

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        self.pending.push_back(data.to_vec());
        self.fill_window(ctx);
    }
}

pub struct SrReceiver {
    recv_base: u32,
    window_size: u32,
    seq: SeqSpace,
    /// Received but undelivered payloads indexed by seqnum.
    buffer: Vec<Option<[u8; PAYLOAD_SIZE]>>,
}

impl SrReceiver {
    pub fn new(params: &ProtocolParams) -> Self {
        let window_size = params.window_size();
        let seq = SeqSpace::for_window(window_size);
        Self {
            recv_base: 0,
            window_size: window_size as u32,
            seq,
            buffer: vec![None; seq.modulus() as usize],
        }
    }

    pub fn recv_base(&self) -> u32 {
        self.recv_base
    }

    pub fn buffered(&self) -> usize {
        self.buffer.iter().filter(|slot| slot.is_some()).count()
    }
}

impl TransportProtocol for SrReceiver {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log("SR receiver ready");
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
        if !packet.verify() {
            ctx.log(&format!(
                "SR checksum mismatch for seq {}, dropped",
                packet.seqnum
            ));
            return;
        }
        let seq = packet.seqnum;

        if !self.seq.in_window(self.recv_base, self.window_size, seq) {
            ctx.log(&format!(
                "SR seq {} outside receive window at {}, re-ACK",
                seq, self.recv_base
            ));
            ctx.send_packet(Packet::build_ack(seq));
            return;
        }

        let slot = &mut self.buffer[seq as usize];
        if slot.is_some() {
            ctx.log(&format!("SR duplicate seq {} already buffered, re-ACK", seq));
            ctx.send_packet(Packet::build_ack(seq));
            return;
        }
        *slot = Some(packet.payload);
        ctx.send_packet(Packet::build_ack(seq));

        while let Some(payload) = self.buffer[self.recv_base as usize].take() {
            ctx.deliver_data(&payload);
            self.recv_base = self.seq.next(self.recv_base);
        }
    }

    fn on_timer(&mut self, _ctx: &mut dyn SystemContext) {}

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, _data: &[u8]) {
        ctx.log("SR receiver does not originate data");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingContext, TimerCall, params};
    use arq_lab_abstract::pad_message;

    /// Send `count` messages, one per time unit starting at t=0.
    fn burst(s: &mut SrSender, ctx: &mut RecordingContext, count: usize) {
        for i in 0..count {
            ctx.now = SimTime(i as f64);
            s.on_app_data(ctx, format!("M{i}").as_bytes());
        }
    }

    #[test]
    fn timer_stays_on_earliest_deadline_after_out_of_order_ack() {
        let mut ctx = RecordingContext::new();
        let mut s = SrSender::new(&params(4));
        burst(&mut s, &mut ctx, 4);
        assert_eq!(ctx.sent_seqs(), vec![0, 1, 2, 3]);
        assert_eq!(ctx.timer_calls, vec![TimerCall::Start(20.0)]);
        ctx.clear_io();

        ctx.now = SimTime(6.0);
        s.on_packet(&mut ctx, Packet::build_ack(2));

        assert!(ctx.timer_calls.is_empty(), "timer must not be touched");
        assert_eq!(ctx.armed, Some(SimTime(20.0)));
        assert_eq!(s.armed_deadline(), Some(SimTime(20.0)));
        assert_eq!(s.in_flight_seqs(), vec![0, 1, 3]);
        assert_eq!(s.base(), 0);
    }

    #[test]
    fn base_ack_moves_base_and_rearms_for_next_deadline() {
        let mut ctx = RecordingContext::new();
        let mut s = SrSender::new(&params(3));
        burst(&mut s, &mut ctx, 3);
        ctx.clear_io();

        ctx.now = SimTime(5.0);
        s.on_packet(&mut ctx, Packet::build_ack(1));
        assert_eq!(s.in_flight_seqs(), vec![0, 2]);
        assert_eq!(s.base(), 0);
        assert!(ctx.timer_calls.is_empty());

        s.on_packet(&mut ctx, Packet::build_ack(0));
        assert_eq!(s.base(), 2);
        assert_eq!(s.in_flight_seqs(), vec![2]);
        // seq 2 was sent at t=2, so its deadline is 22
        assert_eq!(ctx.timer_calls, vec![TimerCall::Stop, TimerCall::Start(17.0)]);
        assert_eq!(ctx.armed, Some(SimTime(22.0)));
    }

    #[test]
    fn base_skips_every_acknowledged_number() {
        let mut ctx = RecordingContext::new();
        let mut s = SrSender::new(&params(4));
        burst(&mut s, &mut ctx, 4);

        // acknowledge out of order: 3, 1, 2 then the base
        for ack in [3, 1, 2] {
            s.on_packet(&mut ctx, Packet::build_ack(ack));
            assert_eq!(s.base(), 0);
        }
        s.on_packet(&mut ctx, Packet::build_ack(0));
        assert_eq!(s.base(), 4);
        assert_eq!(s.base(), s.next_seq());
        assert!(ctx.armed.is_none());
    }

    #[test]
    fn base_lands_on_nearest_unacked_in_ring_order() {
        let mut ctx = RecordingContext::new();
        let mut s = SrSender::new(&params(3));
        // move the window so it straddles the wrap: base 4, seqs 4, 5, 0
        burst(&mut s, &mut ctx, 3);
        for ack in [0, 1, 2] {
            s.on_packet(&mut ctx, Packet::build_ack(ack));
        }
        for i in 0..4 {
            s.on_app_data(&mut ctx, format!("N{i}").as_bytes());
        }
        assert_eq!(s.in_flight_seqs(), vec![3, 4, 5]);
        s.on_packet(&mut ctx, Packet::build_ack(3));
        s.on_app_data(&mut ctx, b"N4");
        assert_eq!(s.in_flight_seqs(), vec![4, 5, 0]);

        s.on_packet(&mut ctx, Packet::build_ack(5));
        s.on_packet(&mut ctx, Packet::build_ack(4));
        assert_eq!(s.base(), 0);
        // the freed slots let the queued N4 out as seq 1
        assert_eq!(s.in_flight_seqs(), vec![0, 1]);
        assert_eq!(s.queued(), 0);
    }

    #[test]
    fn timeout_resends_only_the_expired_packet() {
        let mut ctx = RecordingContext::new();
        let mut s = SrSender::new(&params(4));
        burst(&mut s, &mut ctx, 3);
        ctx.fire_timer();
        assert_eq!(ctx.now, SimTime(20.0));
        ctx.clear_io();

        s.on_timer(&mut ctx);

        assert_eq!(ctx.sent_seqs(), vec![0]);
        assert_eq!(ctx.sent[0].payload, pad_message(b"M0"));
        // next earliest is seq 1, deadline 21
        assert_eq!(ctx.timer_calls, vec![TimerCall::Start(1.0)]);

        ctx.fire_timer();
        ctx.clear_io();
        s.on_timer(&mut ctx);
        assert_eq!(ctx.sent_seqs(), vec![1]);
        assert_eq!(ctx.armed, Some(SimTime(22.0)));
    }

    #[test]
    fn in_flight_count_follows_deadlines_through_timeout() {
        let mut ctx = RecordingContext::new();
        let mut s = SrSender::new(&params(4));
        burst(&mut s, &mut ctx, 3);
        assert_eq!(ctx.last_metric("in_flight"), Some(3.0));

        s.on_packet(&mut ctx, Packet::build_ack(1));
        assert_eq!(ctx.last_metric("in_flight"), Some(2.0));

        // a retransmission re-arms a deadline without adding to the count
        ctx.fire_timer();
        s.on_timer(&mut ctx);
        assert_eq!(s.in_flight_seqs(), vec![0, 2]);

        for ack in [2, 0] {
            s.on_packet(&mut ctx, Packet::build_ack(ack));
        }
        assert_eq!(ctx.last_metric("in_flight"), Some(0.0));
        assert_eq!(s.base(), s.next_seq());
        assert_eq!(s.armed_deadline(), None);
        assert!(ctx.armed.is_none());
    }

    #[test]
    fn ack_refills_window_from_queue() {
        let mut ctx = RecordingContext::new();
        let mut s = SrSender::new(&params(2));
        burst(&mut s, &mut ctx, 4);
        assert_eq!(ctx.sent_seqs(), vec![0, 1]);
        assert_eq!(s.queued(), 2);
        ctx.clear_io();

        // non-base ACK frees no window space
        s.on_packet(&mut ctx, Packet::build_ack(1));
        assert!(ctx.sent.is_empty());

        s.on_packet(&mut ctx, Packet::build_ack(0));
        assert_eq!(ctx.sent_seqs(), vec![2, 3]);
        assert_eq!(s.queued(), 0);
        assert_eq!(ctx.last_metric("in_flight"), Some(2.0));
    }

    #[test]
    fn ignores_duplicate_stale_and_corrupt_acks() {
        let mut ctx = RecordingContext::new();
        let mut s = SrSender::new(&params(4));
        burst(&mut s, &mut ctx, 2);
        s.on_packet(&mut ctx, Packet::build_ack(1));
        ctx.clear_io();

        s.on_packet(&mut ctx, Packet::build_ack(1));
        s.on_packet(&mut ctx, Packet::build_ack(6));
        s.on_packet(&mut ctx, Packet::build_ack(3));
        let mut bad = Packet::build_ack(0);
        bad.payload[0] = 1;
        s.on_packet(&mut ctx, bad);

        assert!(ctx.timer_calls.is_empty());
        assert_eq!(s.in_flight_seqs(), vec![0]);
    }

    #[test]
    fn receiver_buffers_and_drains_contiguous_run() {
        let mut ctx = RecordingContext::new();
        let mut r = SrReceiver::new(&params(4));

        r.on_packet(&mut ctx, Packet::build_data(b"c", 2, 0));
        r.on_packet(&mut ctx, Packet::build_data(b"b", 1, 0));
        assert!(ctx.delivered.is_empty());
        assert_eq!(r.buffered(), 2);

        r.on_packet(&mut ctx, Packet::build_data(b"a", 0, 0));
        assert_eq!(
            ctx.delivered,
            vec![
                pad_message(b"a").to_vec(),
                pad_message(b"b").to_vec(),
                pad_message(b"c").to_vec()
            ]
        );
        assert_eq!(ctx.sent_acks(), vec![2, 1, 0]);
        assert_eq!(r.recv_base(), 3);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn receiver_reacks_duplicates_without_redelivery() {
        let mut ctx = RecordingContext::new();
        let mut r = SrReceiver::new(&params(4));

        r.on_packet(&mut ctx, Packet::build_data(b"b", 1, 0));
        r.on_packet(&mut ctx, Packet::build_data(b"b", 1, 0));
        r.on_packet(&mut ctx, Packet::build_data(b"a", 0, 0));
        // already delivered, now below the window
        r.on_packet(&mut ctx, Packet::build_data(b"a", 0, 0));

        assert_eq!(ctx.delivered.len(), 2);
        assert_eq!(ctx.sent_acks(), vec![1, 1, 0, 0]);
        assert_eq!(r.recv_base(), 2);
    }

    #[test]
    fn receiver_drops_corrupt_silently() {
        let mut ctx = RecordingContext::new();
        let mut r = SrReceiver::new(&params(4));
        let mut p = Packet::build_data(b"a", 0, 0);
        p.payload[19] ^= 0xFF;
        r.on_packet(&mut ctx, p);
        assert!(ctx.sent.is_empty());
        assert_eq!(r.buffered(), 0);
    }
}
