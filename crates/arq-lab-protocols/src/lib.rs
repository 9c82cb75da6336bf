//! Alternating-Bit, Go-Back-N and Selective-Repeat endpoints.
//! Each endpoint is a pure event-driven state machine driven through
//! [`TransportProtocol`](arq_lab_abstract::TransportProtocol).

pub mod abt;
pub mod discipline;
pub mod gbn;
mod seq;
pub mod sr;
mod timer;

#[cfg(test)]
mod testing;

pub use discipline::{Discipline, ProtocolParams, UnknownDiscipline};
pub use arq_lab_abstract::{Packet, SystemContext, TransportProtocol};
