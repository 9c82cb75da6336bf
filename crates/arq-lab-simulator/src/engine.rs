use crate::trace::SimulationReport;
use arq_lab_abstract::{ConfigError, PAYLOAD_SIZE, Packet, SimConfig, SimTime};
use arq_lab_abstract::{SystemContext, TransportProtocol};
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeId {
    Sender,
    Receiver,
}

impl NodeId {
    pub fn peer(&self) -> Self {
        match self {
            NodeId::Sender => NodeId::Receiver,
            NodeId::Receiver => NodeId::Sender,
        }
    }
}

#[derive(Debug)]
pub enum EventType {
    PacketArrival { to: NodeId, packet: Packet },
    TimerExpiry { node: NodeId, generation: u64 },
    AppSend { data: Vec<u8> },
}

#[derive(Debug)]
struct Event {
    time: SimTime,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time is Greater in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A compact textual summary of important link-layer events.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: SimTime,
    pub description: String,
}

#[derive(Debug, Clone, Copy)]
enum TimerOp {
    Start(f64),
    Stop,
}

/// Actions buffered during one protocol callback
#[derive(Default)]
struct ActionBuffer {
    outgoing_packets: Vec<Packet>,
    timer_ops: Vec<TimerOp>,
    logs: Vec<String>,
    delivered_data: Vec<Vec<u8>>,
    metrics: Vec<(String, f64)>,
}

/// Context implementation passed to a protocol endpoint
struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: SimTime,
}

impl<'a> SystemContext for ScopedContext<'a> {
    fn send_packet(&mut self, packet: Packet) {
        self.buffer.outgoing_packets.push(packet);
    }

    fn start_timer(&mut self, delay: f64) {
        self.buffer.timer_ops.push(TimerOp::Start(delay));
    }

    fn stop_timer(&mut self) {
        self.buffer.timer_ops.push(TimerOp::Stop);
    }

    fn deliver_data(&mut self, data: &[u8]) {
        self.buffer.delivered_data.push(data.to_vec());
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }

    fn now(&self) -> SimTime {
        self.now
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.buffer.metrics.push((name.to_string(), value));
    }
}

/// The single timer of one side. Bumping the generation invalidates any
/// expiry event already queued for it.
#[derive(Debug, Default, Clone, Copy)]
struct TimerSlot {
    generation: u64,
    armed: bool,
}

pub struct Simulator {
    time: SimTime,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: SimConfig,
    rng: rand::rngs::StdRng,

    pub sender: Box<dyn TransportProtocol>,
    pub receiver: Box<dyn TransportProtocol>,

    /// Messages handed to the sender, in submission order.
    pub submitted: Vec<Vec<u8>>,
    /// Payloads the receiver delivered to its application.
    pub delivered_data: Vec<Vec<u8>>,
    pub sender_packet_count: u32,
    pub receiver_packet_count: u32,
    pub packets_lost: u32,
    pub packets_corrupted: u32,

    /// Time-series metrics recorded via `SystemContext::record_metric`
    pub metrics: HashMap<String, Vec<(SimTime, f64)>>,

    // Deterministic fault injection: drop first packet from Sender with given seq numbers
    drop_sender_seq_once: Vec<u32>,
    // Deterministic fault injection: drop first ACK from Receiver with given ack numbers
    drop_receiver_ack_once: Vec<u32>,

    /// Timeline of link events (drops, corruptions, sends, deliveries).
    pub link_events: Vec<LinkEventSummary>,

    timers: HashMap<NodeId, TimerSlot>,
    /// Latest scheduled arrival per destination; keeps each direction FIFO.
    last_arrival: HashMap<NodeId, SimTime>,
    generated_messages: usize,
}

impl Simulator {
    /// Build a simulator, rejecting a config that fails
    /// [`SimConfig::validate`].
    pub fn new(
        config: SimConfig,
        sender: Box<dyn TransportProtocol>,
        receiver: Box<dyn TransportProtocol>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = rand::rngs::StdRng::seed_from_u64(config.seed);

        Ok(Self {
            time: SimTime::ZERO,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            config,
            rng,
            sender,
            receiver,
            submitted: Vec::new(),
            delivered_data: Vec::new(),
            sender_packet_count: 0,
            receiver_packet_count: 0,
            packets_lost: 0,
            packets_corrupted: 0,
            metrics: HashMap::new(),
            drop_sender_seq_once: Vec::new(),
            drop_receiver_ack_once: Vec::new(),
            link_events: Vec::new(),
            timers: HashMap::new(),
            last_arrival: HashMap::new(),
            generated_messages: 0,
        })
    }

    /// Register a deterministic fault: drop the first packet sent by Sender whose seq equals `seq`.
    pub fn add_drop_sender_seq_once(&mut self, seq: u32) {
        self.drop_sender_seq_once.push(seq);
    }

    /// Register a deterministic fault: drop the first ACK sent by Receiver whose ack equals `ack`.
    pub fn add_drop_receiver_ack_once(&mut self, ack: u32) {
        self.drop_receiver_ack_once.push(ack);
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Return the (time, value) samples for a named metric, if present.
    pub fn metric_series(&self, name: &str) -> Option<&[(SimTime, f64)]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }

    fn push_event(&mut self, time: SimTime, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    pub fn schedule_app_send(&mut self, time: f64, data: Vec<u8>) {
        self.push_event(SimTime(time), EventType::AppSend { data });
    }

    /// Schedule `count` generated messages, one every `interval` units from
    /// `start`. Each message is 20 copies of one letter, cycling `a..=z`.
    pub fn schedule_messages(&mut self, count: usize, start: f64, interval: f64) {
        for i in 0..count {
            let letter = b'a' + (self.generated_messages % 26) as u8;
            self.generated_messages += 1;
            self.schedule_app_send(start + i as f64 * interval, vec![letter; PAYLOAD_SIZE]);
        }
    }

    pub fn init(&mut self) {
        for node in [NodeId::Sender, NodeId::Receiver] {
            let mut buffer = ActionBuffer::default();
            {
                let mut ctx = ScopedContext {
                    buffer: &mut buffer,
                    now: self.time,
                };
                self.endpoint(node).init(&mut ctx);
            }
            self.process_actions(node, buffer);
        }
    }

    fn endpoint(&mut self, node: NodeId) -> &mut dyn TransportProtocol {
        match node {
            NodeId::Sender => self.sender.as_mut(),
            NodeId::Receiver => self.receiver.as_mut(),
        }
    }

    /// Time of the next live event. Expiries of stopped or replaced
    /// timers are discarded first so they never move the clock.
    pub fn peek_next_event_time(&mut self) -> Option<SimTime> {
        self.discard_stale_timers();
        self.event_queue.peek().map(|e| e.time)
    }

    fn is_stale(&self, event: &Event) -> bool {
        match event.event_type {
            EventType::TimerExpiry { node, generation } => self
                .timers
                .get(&node)
                .is_none_or(|slot| !slot.armed || slot.generation != generation),
            _ => false,
        }
    }

    fn discard_stale_timers(&mut self) {
        while self.event_queue.peek().is_some_and(|e| self.is_stale(e)) {
            if let Some(event) = self.event_queue.pop() {
                debug!("Skipping stale timer event: {:?}", event.event_type);
            }
        }
    }

    pub fn current_time(&self) -> SimTime {
        self.time
    }

    /// Process the next event. Returns true if an event was processed, false if queue is empty.
    pub fn step(&mut self) -> bool {
        self.discard_stale_timers();
        let event = match self.event_queue.pop() {
            Some(e) => e,
            None => return false,
        };

        self.time = event.time;
        debug!("Processing event at {}: {:?}", self.time, event.event_type);

        let mut buffer = ActionBuffer::default();
        let node = match event.event_type {
            EventType::PacketArrival { to, packet } => {
                let mut ctx = ScopedContext {
                    buffer: &mut buffer,
                    now: self.time,
                };
                self.endpoint(to).on_packet(&mut ctx, packet);
                to
            }
            EventType::TimerExpiry { node, generation } => {
                // live by construction: discard_stale_timers ran above
                debug_assert!(self.timers.get(&node).is_some_and(|s| s.generation == generation));
                self.timers.entry(node).or_default().armed = false;

                let mut ctx = ScopedContext {
                    buffer: &mut buffer,
                    now: self.time,
                };
                self.endpoint(node).on_timer(&mut ctx);
                node
            }
            EventType::AppSend { data } => {
                {
                    let mut ctx = ScopedContext {
                        buffer: &mut buffer,
                        now: self.time,
                    };
                    self.sender.on_app_data(&mut ctx, &data);
                }
                self.submitted.push(data);
                NodeId::Sender
            }
        };
        self.process_actions(node, buffer);
        true
    }

    /// Produce a serializable snapshot of the current simulation state.
    pub fn export_report(&self) -> SimulationReport {
        SimulationReport {
            config: self.config.clone(),
            duration: self.time,
            submitted: self.submitted.clone(),
            delivered_data: self.delivered_data.clone(),
            sender_packet_count: self.sender_packet_count,
            receiver_packet_count: self.receiver_packet_count,
            packets_lost: self.packets_lost,
            packets_corrupted: self.packets_corrupted,
            metrics: self.metrics.clone(),
            link_events: self.link_events.clone(),
        }
    }

    pub fn run_until_complete(&mut self) {
        self.init();
        while self.step() {}
    }

    /// Initialize, then process events up to virtual time `limit`.
    /// Returns `true` if the event queue drained before the limit.
    pub fn run_until(&mut self, limit: SimTime) -> bool {
        self.init();
        while let Some(next) = self.peek_next_event_time() {
            if next > limit {
                return false;
            }
            self.step();
        }
        true
    }

    fn process_actions(&mut self, source_node: NodeId, buffer: ActionBuffer) {
        // First, fold metrics into simulator-wide store
        for (name, value) in buffer.metrics {
            self.metrics
                .entry(name)
                .or_default()
                .push((self.time, value));
        }

        for log in buffer.logs {
            info!("[{:?}] {}", source_node, log);
        }

        for data in buffer.delivered_data {
            debug!("[{:?}] DELIVERED DATA: {} bytes", source_node, data.len());
            self.link_events.push(LinkEventSummary {
                time: self.time,
                description: format!(
                    "[{:?}] DELIVERED {} bytes to application",
                    source_node,
                    data.len()
                ),
            });
            self.delivered_data.push(data);
        }

        for op in buffer.timer_ops {
            self.apply_timer_op(source_node, op);
        }

        for packet in buffer.outgoing_packets {
            self.transmit(source_node, packet);
        }
    }

    fn apply_timer_op(&mut self, node: NodeId, op: TimerOp) {
        let slot = self.timers.entry(node).or_default();
        match op {
            TimerOp::Start(delay) => {
                if slot.armed {
                    warn!(
                        "[{:?}] start_timer while armed; replacing the running timer",
                        node
                    );
                }
                slot.generation += 1;
                slot.armed = true;
                let generation = slot.generation;
                self.push_event(
                    self.time.after(delay),
                    EventType::TimerExpiry { node, generation },
                );
            }
            TimerOp::Stop => {
                if slot.armed {
                    slot.generation += 1;
                    slot.armed = false;
                }
            }
        }
    }

    /// Channel: deterministic drops, random loss, random corruption, latency.
    fn transmit(&mut self, source_node: NodeId, mut packet: Packet) {
        let target_node = source_node.peer();
        match source_node {
            NodeId::Sender => {
                self.sender_packet_count += 1;
                if let Some(pos) = self
                    .drop_sender_seq_once
                    .iter()
                    .position(|s| *s == packet.seqnum)
                {
                    self.drop_sender_seq_once.remove(pos);
                    self.record_drop(source_node, &packet, "deterministic seq");
                    return;
                }
            }
            NodeId::Receiver => {
                self.receiver_packet_count += 1;
                if let Some(pos) = self
                    .drop_receiver_ack_once
                    .iter()
                    .position(|a| *a == packet.acknum)
                {
                    self.drop_receiver_ack_once.remove(pos);
                    self.record_drop(source_node, &packet, "deterministic ack");
                    return;
                }
            }
        }

        // 1. Check Loss
        if self.rng.random::<f64>() < self.config.loss_rate {
            self.packets_lost += 1;
            self.record_drop(source_node, &packet, "random loss");
            return;
        }

        // 2. Check Corruption
        if self.rng.random::<f64>() < self.config.corrupt_rate {
            self.packets_corrupted += 1;
            self.corrupt(&mut packet);
            self.link_events.push(LinkEventSummary {
                time: self.time,
                description: format!(
                    "[{:?}->{:?}] CORRUPT seq={} ack={}",
                    source_node, target_node, packet.seqnum, packet.acknum
                ),
            });
            debug!("Packet corrupted in channel");
        }

        // 3. Calculate Latency, never overtaking an earlier packet
        let latency = self
            .rng
            .random_range(self.config.min_latency..=self.config.max_latency);
        let earliest = self.time.after(latency);
        let arrival_time = match self.last_arrival.get(&target_node) {
            Some(&last) if last > earliest => last,
            _ => earliest,
        };
        self.last_arrival.insert(target_node, arrival_time);

        self.link_events.push(LinkEventSummary {
            time: self.time,
            description: format!(
                "[{:?}->{:?}] SEND seq={} ack={} (arrives {})",
                source_node, target_node, packet.seqnum, packet.acknum, arrival_time
            ),
        });

        self.push_event(
            arrival_time,
            EventType::PacketArrival {
                to: target_node,
                packet,
            },
        );
    }

    /// Flip one byte of seqnum, acknum or payload so the checksum no longer matches.
    fn corrupt(&mut self, packet: &mut Packet) {
        let mask = self.rng.random_range(1..=u8::MAX);
        match self.rng.random_range(0..PAYLOAD_SIZE + 2) {
            0 => packet.seqnum ^= u32::from(mask),
            1 => packet.acknum ^= u32::from(mask),
            i => packet.payload[i - 2] ^= mask,
        }
    }

    fn record_drop(&mut self, source_node: NodeId, packet: &Packet, reason: &str) {
        self.link_events.push(LinkEventSummary {
            time: self.time,
            description: format!(
                "[{:?}->{:?}] DROP ({}) seq={} ack={}",
                source_node,
                source_node.peer(),
                reason,
                packet.seqnum,
                packet.acknum
            ),
        });
        debug!("Packet dropped in channel ({})", reason);
    }
}

#[cfg(test)]
mod tests {
    use super::{NodeId, Simulator};
    use arq_lab_abstract::{
        ConfigError, Packet, SimConfig, SimTime, SystemContext, TransportProtocol,
    };
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Observed {
        timer_fires: Vec<SimTime>,
        arrivals: Vec<(SimTime, u32)>,
    }

    /// Sender side that exercises the timer contract from `init`.
    struct TimerProtocol {
        seen: Rc<RefCell<Observed>>,
    }

    impl TransportProtocol for TimerProtocol {
        fn init(&mut self, ctx: &mut dyn SystemContext) {
            // armed then cancelled: must never fire
            ctx.start_timer(10.0);
            ctx.stop_timer();
            // stopping twice is a no-op
            ctx.stop_timer();
            ctx.start_timer(15.0);
        }

        fn on_packet(&mut self, _ctx: &mut dyn SystemContext, _packet: Packet) {}

        fn on_timer(&mut self, ctx: &mut dyn SystemContext) {
            self.seen.borrow_mut().timer_fires.push(ctx.now());
        }

        fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
            for i in 0..data.len() as u32 {
                ctx.send_packet(Packet::build_data(data, i, 0));
            }
        }
    }

    /// Receiver side that records arrival order.
    struct Recorder {
        seen: Rc<RefCell<Observed>>,
    }

    impl TransportProtocol for Recorder {
        fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
            self.seen
                .borrow_mut()
                .arrivals
                .push((ctx.now(), packet.seqnum));
            if packet.verify() {
                ctx.deliver_data(&packet.payload);
            }
        }

        fn on_timer(&mut self, _ctx: &mut dyn SystemContext) {}

        fn on_app_data(&mut self, _ctx: &mut dyn SystemContext, _data: &[u8]) {}
    }

    fn build(config: SimConfig) -> (Simulator, Rc<RefCell<Observed>>) {
        let seen = Rc::new(RefCell::new(Observed::default()));
        let sim = Simulator::new(
            config,
            Box::new(TimerProtocol {
                seen: seen.clone(),
            }),
            Box::new(Recorder {
                seen: seen.clone(),
            }),
        )
        .expect("valid test config");
        (sim, seen)
    }

    #[test]
    fn stopped_timer_never_fires() {
        let (mut sim, seen) = build(SimConfig::default());
        sim.run_until_complete();
        assert_eq!(seen.borrow().timer_fires, vec![SimTime(15.0)]);
    }

    #[test]
    fn channel_preserves_order() {
        let config = SimConfig {
            min_latency: 1.0,
            max_latency: 50.0,
            seed: 7,
            ..Default::default()
        };
        let (mut sim, seen) = build(config);
        sim.schedule_app_send(0.0, vec![b'x'; 20]);
        sim.run_until_complete();

        let arrivals = &seen.borrow().arrivals;
        assert_eq!(arrivals.len(), 20);
        let seqs: Vec<u32> = arrivals.iter().map(|(_, s)| *s).collect();
        assert_eq!(seqs, (0..20).collect::<Vec<_>>());
        assert!(arrivals.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(sim.sender_packet_count, 20);
        assert_eq!(sim.submitted.len(), 1);
    }

    #[test]
    fn lossy_channel_drops_and_corrupts() {
        let config = SimConfig {
            loss_rate: 1.0,
            ..Default::default()
        };
        let (mut sim, seen) = build(config);
        sim.schedule_app_send(0.0, vec![b'y'; 5]);
        sim.run_until_complete();
        assert!(seen.borrow().arrivals.is_empty());
        assert_eq!(sim.packets_lost, 5);

        let config = SimConfig {
            corrupt_rate: 1.0,
            ..Default::default()
        };
        let (mut sim, seen) = build(config);
        sim.schedule_app_send(0.0, vec![b'z'; 5]);
        sim.run_until_complete();
        assert_eq!(seen.borrow().arrivals.len(), 5);
        assert_eq!(sim.packets_corrupted, 5);
        assert!(sim.delivered_data.is_empty(), "corrupted packets must fail verify");
    }

    #[test]
    fn deterministic_drop_hits_first_copy_only() {
        let (mut sim, seen) = build(SimConfig::default());
        sim.add_drop_sender_seq_once(2);
        sim.schedule_app_send(0.0, vec![b'q'; 4]);
        sim.schedule_app_send(100.0, vec![b'q'; 4]);
        sim.run_until_complete();

        let seqs: Vec<u32> = seen.borrow().arrivals.iter().map(|(_, s)| *s).collect();
        assert_eq!(seqs, vec![0, 1, 3, 0, 1, 2, 3]);
        assert!(sim.link_events.iter().any(|e| e.description.contains("deterministic seq")));
    }

    #[test]
    fn rejects_unvalidated_config() {
        let seen = Rc::new(RefCell::new(Observed::default()));
        let config = SimConfig {
            min_latency: 9.0,
            max_latency: 1.0,
            ..Default::default()
        };
        let result = Simulator::new(
            config,
            Box::new(TimerProtocol { seen: seen.clone() }),
            Box::new(Recorder { seen }),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidLatency { .. })
        ));
    }

    #[test]
    fn generated_messages_cycle_letters() {
        let (mut sim, _seen) = build(SimConfig::default());
        sim.schedule_messages(3, 0.0, 10.0);
        sim.run_until(SimTime(25.0));
        assert_eq!(sim.submitted.len(), 3);
        assert_eq!(sim.submitted[0], vec![b'a'; 20]);
        assert_eq!(sim.submitted[2], vec![b'c'; 20]);
        assert_eq!(NodeId::Sender.peer(), NodeId::Receiver);
    }
}
