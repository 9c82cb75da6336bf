use arq_lab_abstract::{SimConfig, SimTime, pad_message};
use serde::Serialize;
use std::collections::HashMap;

use crate::engine::LinkEventSummary;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub duration: SimTime,
    pub submitted: Vec<Vec<u8>>,
    pub delivered_data: Vec<Vec<u8>>,
    pub sender_packet_count: u32,
    pub receiver_packet_count: u32,
    pub packets_lost: u32,
    pub packets_corrupted: u32,
    pub metrics: HashMap<String, Vec<(SimTime, f64)>>,
    pub link_events: Vec<LinkEventSummary>,
}

impl SimulationReport {
    /// True when every submitted message reached the receiver's application
    /// exactly once and in submission order. Payloads are compared after
    /// padding to the fixed packet size.
    pub fn delivered_in_order(&self) -> bool {
        self.submitted.len() == self.delivered_data.len()
            && self
                .submitted
                .iter()
                .zip(&self.delivered_data)
                .all(|(sent, got)| pad_message(sent).as_slice() == got.as_slice())
    }

    pub fn max_metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .get(name)?
            .iter()
            .map(|(_, v)| *v)
            .reduce(f64::max)
    }
}
