use std::fmt;
use std::str::FromStr;

use arq_lab_abstract::{ConfigError, SimConfig, TransportProtocol};
use thiserror::Error;

use crate::abt::{AbtReceiver, AbtSender};
use crate::gbn::{GbnReceiver, GbnSender};
use crate::sr::{SrReceiver, SrSender};

/// The three ARQ disciplines, each a sender/receiver pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discipline {
    AlternatingBit,
    GoBackN,
    SelectiveRepeat,
}

/// Parameters read once when an endpoint is created.
///
/// Only obtainable through validation, so every engine can rely on a
/// window in `1..=127` and a positive timeout.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProtocolParams {
    window_size: usize,
    timeout: f64,
}

impl ProtocolParams {
    pub fn new(window_size: usize, timeout: f64) -> Result<Self, ConfigError> {
        let config = SimConfig {
            window_size,
            timeout,
            ..Default::default()
        };
        Self::try_from(&config)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }
}

impl TryFrom<&SimConfig> for ProtocolParams {
    type Error = ConfigError;

    fn try_from(config: &SimConfig) -> Result<Self, Self::Error> {
        config.validate()?;
        Ok(Self {
            window_size: config.window_size,
            timeout: config.timeout,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown protocol '{0}'. Try 'abt', 'gbn' or 'sr'.")]
pub struct UnknownDiscipline(pub String);

impl Discipline {
    pub const ALL: [Discipline; 3] = [
        Discipline::AlternatingBit,
        Discipline::GoBackN,
        Discipline::SelectiveRepeat,
    ];

    /// Map a user-visible name to a discipline.
    pub fn from_name(name: &str) -> Result<Self, UnknownDiscipline> {
        match name.to_ascii_lowercase().as_str() {
            "abt" | "alternating-bit" | "stop-and-wait" => Ok(Discipline::AlternatingBit),
            "gbn" | "go-back-n" => Ok(Discipline::GoBackN),
            "sr" | "selective-repeat" => Ok(Discipline::SelectiveRepeat),
            _ => Err(UnknownDiscipline(name.to_string())),
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Discipline::AlternatingBit => "abt",
            Discipline::GoBackN => "gbn",
            Discipline::SelectiveRepeat => "sr",
        }
    }

    /// Window the discipline actually uses; Alternating-Bit is always 1.
    pub fn effective_window(self, params: &ProtocolParams) -> usize {
        match self {
            Discipline::AlternatingBit => 1,
            _ => params.window_size(),
        }
    }

    pub fn sender(self, params: &ProtocolParams) -> Box<dyn TransportProtocol> {
        match self {
            Discipline::AlternatingBit => Box::new(AbtSender::new(params.timeout())),
            Discipline::GoBackN => Box::new(GbnSender::new(params)),
            Discipline::SelectiveRepeat => Box::new(SrSender::new(params)),
        }
    }

    pub fn receiver(self, params: &ProtocolParams) -> Box<dyn TransportProtocol> {
        match self {
            Discipline::AlternatingBit => Box::new(AbtReceiver::default()),
            Discipline::GoBackN => Box::new(GbnReceiver::new(params)),
            Discipline::SelectiveRepeat => Box::new(SrReceiver::new(params)),
        }
    }

    pub fn pair(
        self,
        params: &ProtocolParams,
    ) -> (Box<dyn TransportProtocol>, Box<dyn TransportProtocol>) {
        (self.sender(params), self.receiver(params))
    }
}

impl FromStr for Discipline {
    type Err = UnknownDiscipline;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}
