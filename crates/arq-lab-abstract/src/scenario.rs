use crate::config::SimConfig;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    /// Discipline name (`abt`, `gbn`, `sr`); the caller's choice wins when absent.
    #[serde(default)]
    pub protocol: Option<String>,
    pub config: SimConfigOverride,
    pub actions: Vec<TestAction>,
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub loss_rate: Option<f64>,
    pub corrupt_rate: Option<f64>,
    pub min_latency: Option<f64>,
    pub max_latency: Option<f64>,
    pub seed: Option<u64>,
    pub window_size: Option<usize>,
    pub timeout: Option<f64>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.corrupt_rate {
            config.corrupt_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.timeout {
            config.timeout = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Application sends data at a specific time
    AppSend { time: f64, data: String },
    /// Application sends `count` generated 20-byte messages, one every `interval`
    GenerateMessages {
        count: usize,
        interval: f64,
        #[serde(default)]
        start: f64,
    },
    /// Deterministically drop the first packet sent by Sender with given seq number
    DropNextFromSenderSeq { seq: u32 },
    /// Deterministically drop the first ACK sent by Receiver with given ack number
    DropNextFromReceiverAck { ack: u32 },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// Assert that specific data was delivered to the application layer
    DataDelivered { data: String },
    /// Assert that every submitted message was delivered exactly once, in order
    AllDeliveredInOrder,
    /// Assert that the total number of packets sent by Sender is within range
    SenderPacketCount { min: u32, max: Option<u32> },
    /// Assert that the sender never had more than `max` packets in flight
    MaxInFlight { max: usize },
    /// Assert that the simulation finishes within the given virtual time
    MaxDuration { time: f64 },
}
