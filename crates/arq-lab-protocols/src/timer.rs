//! Per-packet virtual timers multiplexed onto one real timer.
//!
//! [`TimerSchedule`] keeps one deadline per in-flight sequence number, ordered
//! by `(deadline, seqnum)`. [`RealTimer`] tracks the deadline the side's
//! single real timer is armed for and re-arms it whenever the schedule's
//! earliest deadline moves.

use std::collections::BTreeSet;

use arq_lab_abstract::{SimTime, SystemContext};

#[derive(Debug, Clone)]
pub struct TimerSchedule {
    /// Deadline per sequence number, indexed directly by seqnum.
    slots: Vec<Option<SimTime>>,
    order: BTreeSet<(SimTime, u32)>,
}

impl TimerSchedule {
    pub fn new(modulus: u32) -> Self {
        Self {
            slots: vec![None; modulus as usize],
            order: BTreeSet::new(),
        }
    }

    /// Set (or reset) the deadline for `seq`.
    pub fn arm(&mut self, seq: u32, deadline: SimTime) {
        self.cancel(seq);
        self.slots[seq as usize] = Some(deadline);
        self.order.insert((deadline, seq));
    }

    /// Remove the deadline for `seq`. Returns `false` if none was set.
    pub fn cancel(&mut self, seq: u32) -> bool {
        match self.slots.get_mut(seq as usize).and_then(Option::take) {
            Some(deadline) => {
                self.order.remove(&(deadline, seq));
                true
            }
            None => false,
        }
    }

    /// The earliest `(deadline, seqnum)` entry.
    pub fn earliest(&self) -> Option<(SimTime, u32)> {
        self.order.first().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The side's one real timer, as last armed through the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimer {
    armed_for: Option<SimTime>,
}

impl RealTimer {
    pub fn armed_for(&self) -> Option<SimTime> {
        self.armed_for
    }

    /// The timer fired; it is no longer armed.
    pub fn fired(&mut self) {
        self.armed_for = None;
    }

    /// Arm against `target`, touching the real timer only if it changes.
    pub fn sync(&mut self, ctx: &mut dyn SystemContext, target: Option<SimTime>) {
        if self.armed_for == target {
            return;
        }
        if self.armed_for.take().is_some() {
            ctx.stop_timer();
        }
        if let Some(deadline) = target {
            let delay = ctx.now().until(deadline);
            ctx.start_timer(delay);
            self.armed_for = Some(deadline);
        }
    }
}
