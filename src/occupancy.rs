//! Channel occupancy: deciding when an empty channel should trigger
//! idle departure.
//!
//! The session samples member count on a fixed interval and feeds it here
//! together with whether a departure deadline is currently armed. This is a
//! different clock from the per-utterance silence deadline and the two must
//! never be conflated.

use tracing::debug;

/// What the session should do with its idle-departure deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupancyAction {
    /// Channel is empty and no departure is pending: arm the deadline.
    ScheduleDeparture,
    /// Channel regained members while a departure was pending: cancel it.
    CancelDeparture,
    /// Nothing to change.
    Hold,
}

/// Periodic occupancy check for one session.
#[derive(Debug, Default)]
pub struct OccupancyMonitor;

impl OccupancyMonitor {
    pub fn new() -> Self {
        Self
    }

    /// The agent itself counts as one member; "empty" means nobody else.
    pub fn is_empty(&self, member_count: usize) -> bool {
        member_count <= 1
    }

    /// Assess one sample of the channel roster.
    pub fn assess(&self, member_count: usize, departure_armed: bool) -> OccupancyAction {
        let empty = self.is_empty(member_count);
        debug!(member_count, empty, departure_armed, "occupancy check");
        match (empty, departure_armed) {
            (true, false) => OccupancyAction::ScheduleDeparture,
            (true, true) => OccupancyAction::Hold,
            (false, true) => OccupancyAction::CancelDeparture,
            (false, false) => OccupancyAction::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_channel_schedules_departure_once() {
        let mon = OccupancyMonitor::new();
        assert_eq!(mon.assess(1, false), OccupancyAction::ScheduleDeparture);
        // Already armed: no second timer.
        assert_eq!(mon.assess(1, true), OccupancyAction::Hold);
    }

    #[test]
    fn returning_member_cancels_pending_departure() {
        let mon = OccupancyMonitor::new();
        assert_eq!(mon.assess(2, true), OccupancyAction::CancelDeparture);
    }

    #[test]
    fn occupied_channel_is_a_no_op() {
        let mon = OccupancyMonitor::new();
        assert_eq!(mon.assess(3, false), OccupancyAction::Hold);
    }

    #[test]
    fn zero_members_counts_as_empty() {
        // Roster may momentarily exclude the agent during teardown races.
        let mon = OccupancyMonitor::new();
        assert!(mon.is_empty(0));
        assert_eq!(mon.assess(0, false), OccupancyAction::ScheduleDeparture);
    }
}
