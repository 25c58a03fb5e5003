use crate::resource::delta::{Delta, Record};
use crate::resource::link::LinkState;

/// Callbacks of the local adapter for a subscribed resource.
///
/// All callbacks are invoked on the reactor, so they must return quickly. An adapter that needs
///  the data on a different thread is responsible for handing it over.
#[cfg_attr(test, mockall::automock)]
pub trait ResourceListener: Send + Sync {
    /// the replica was replaced by a full snapshot (initial baseline or resync)
    fn on_snapshot(&self, name: &str, seq: u64, records: &[Record]);

    /// an incremental update was applied to the replica, advancing it to `seq`
    fn on_delta(&self, name: &str, seq: u64, delta: &Delta);

    fn on_link_state(&self, name: &str, state: LinkState);
}
