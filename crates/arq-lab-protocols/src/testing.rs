//! A `SystemContext` that records every call, for driving engines by hand.

use arq_lab_abstract::{Packet, SimTime, SystemContext};

use crate::discipline::ProtocolParams;

/// Params with the given window and a timeout of 20.
pub fn params(window_size: usize) -> ProtocolParams {
    ProtocolParams::new(window_size, 20.0).expect("valid test params")
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerCall {
    Start(f64),
    Stop,
}

#[derive(Default)]
pub struct RecordingContext {
    pub now: SimTime,
    pub sent: Vec<Packet>,
    pub delivered: Vec<Vec<u8>>,
    pub timer_calls: Vec<TimerCall>,
    /// Absolute deadline of the armed timer, if any.
    pub armed: Option<SimTime>,
    pub logs: Vec<String>,
    pub metrics: Vec<(String, f64)>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_seqs(&self) -> Vec<u32> {
        self.sent.iter().map(|p| p.seqnum).collect()
    }

    pub fn sent_acks(&self) -> Vec<u32> {
        self.sent.iter().map(|p| p.acknum).collect()
    }

    /// Forget everything sent or delivered so far.
    pub fn clear_io(&mut self) {
        self.sent.clear();
        self.delivered.clear();
        self.timer_calls.clear();
    }

    /// Emulate the timer firing: advance the clock to its deadline and disarm.
    pub fn fire_timer(&mut self) {
        let deadline = self.armed.take().expect("timer fired while disarmed");
        self.now = deadline;
    }

    pub fn last_metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

impl SystemContext for RecordingContext {
    fn send_packet(&mut self, packet: Packet) {
        self.sent.push(packet);
    }

    fn start_timer(&mut self, delay: f64) {
        assert!(self.armed.is_none(), "timer started while already armed");
        self.armed = Some(self.now.after(delay));
        self.timer_calls.push(TimerCall::Start(delay));
    }

    fn stop_timer(&mut self) {
        self.armed = None;
        self.timer_calls.push(TimerCall::Stop);
    }

    fn deliver_data(&mut self, data: &[u8]) {
        self.delivered.push(data.to_vec());
    }

    fn log(&mut self, message: &str) {
        self.logs.push(message.to_string());
    }

    fn now(&self) -> SimTime {
        self.now
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.metrics.push((name.to_string(), value));
    }
}
