use crate::packet::Packet;
use crate::time::SimTime;

/// The capability provided by the emulator to a protocol endpoint.
/// Each endpoint gets its own context, so the side is implicit in every call.
pub trait SystemContext {
    /// Hand a copy of `packet` to the lossy, corrupting, order-preserving link.
    fn send_packet(&mut self, packet: Packet);

    /// Arm this side's single timer to fire after `delay` time units.
    /// Starting an already-armed timer is not a supported call pattern;
    /// stop it first.
    fn start_timer(&mut self, delay: f64);

    /// Disarm this side's timer. Stopping a stopped timer is a no-op.
    fn stop_timer(&mut self);

    /// Deliver an in-order payload to the application layer.
    fn deliver_data(&mut self, data: &[u8]);

    /// Log a message to the emulator's debug output.
    fn log(&mut self, message: &str);

    /// Current virtual time.
    fn now(&self) -> SimTime;

    /// Record a numeric metric (e.g. packets in flight) for reports.
    fn record_metric(&mut self, _name: &str, _value: f64) {
        // Default no-op so contexts that do not collect metrics need not care.
    }
}

/// The four entry points every ARQ endpoint exposes to the emulator.
pub trait TransportProtocol {
    /// Called once before any other entry point.
    fn init(&mut self, _ctx: &mut dyn SystemContext) {}

    /// Called when a packet arrives from the channel.
    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet);

    /// Called when this side's timer fires.
    fn on_timer(&mut self, ctx: &mut dyn SystemContext);

    /// Called when the application layer has a message to send.
    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]);
}
