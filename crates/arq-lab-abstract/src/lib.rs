pub mod config;
pub mod interface;
pub mod packet;
pub mod scenario;
pub mod time;

pub use interface::{SystemContext, TransportProtocol};
pub use packet::{PAYLOAD_SIZE, Packet, pad_message};
pub use time::SimTime;

pub use config::{ConfigError, SimConfig};
pub use scenario::{SimConfigOverride, TestAction, TestAssertion, TestScenario};
