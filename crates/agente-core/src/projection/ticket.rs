//! Fetch tickets: last-fetch-wins by issue order.

/// Issued before every bulk fetch; handed back with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub(crate) epoch: u64,
    pub(crate) seq: u64,
}

impl FetchTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// What happened to a fetch response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Replaced the held tasks.
    Applied,
    /// A newer ticket already completed; response discarded.
    Stale,
    /// Issued before a teardown or session change; response discarded.
    Cancelled,
}

/// Tracks issued and applied tickets.
///
/// Invariants:
/// - `seq` grows with issue order, never with arrival order.
/// - a response is applied only if its epoch is current and its seq is newer than the last applied one.
#[derive(Debug, Default)]
pub(crate) struct FetchGate {
    epoch: u64,
    next_seq: u64,
    applied_seq: Option<u64>,
}

impl FetchGate {
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Seq the next issued ticket will carry.
    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub(crate) fn issue(&mut self) -> FetchTicket {
        let ticket = FetchTicket {
            epoch: self.epoch,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        ticket
    }

    pub(crate) fn check(&self, ticket: FetchTicket) -> FetchOutcome {
        if ticket.epoch != self.epoch {
            return FetchOutcome::Cancelled;
        }
        match self.applied_seq {
            Some(applied) if ticket.seq <= applied => FetchOutcome::Stale,
            _ => FetchOutcome::Applied,
        }
    }

    pub(crate) fn mark_applied(&mut self, ticket: FetchTicket) {
        self.applied_seq = Some(ticket.seq);
    }

    /// Every ticket issued so far becomes `Cancelled`.
    pub(crate) fn invalidate(&mut self) {
        self.epoch += 1;
        self.applied_seq = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_ticket_wins_regardless_of_arrival() {
        let mut gate = FetchGate::default();
        let t0 = gate.issue();
        let t1 = gate.issue();

        assert_eq!(gate.check(t1), FetchOutcome::Applied);
        gate.mark_applied(t1);
        assert_eq!(gate.check(t0), FetchOutcome::Stale);
    }

    #[test]
    fn in_order_arrival_applies_both() {
        let mut gate = FetchGate::default();
        let t0 = gate.issue();
        let t1 = gate.issue();

        assert_eq!(gate.check(t0), FetchOutcome::Applied);
        gate.mark_applied(t0);
        assert_eq!(gate.check(t1), FetchOutcome::Applied);
    }

    #[test]
    fn invalidate_cancels_outstanding_tickets() {
        let mut gate = FetchGate::default();
        let t0 = gate.issue();
        gate.invalidate();
        gate.invalidate();
        assert_eq!(gate.check(t0), FetchOutcome::Cancelled);

        let t1 = gate.issue();
        assert_eq!(gate.check(t1), FetchOutcome::Applied);
        assert!(t1.seq() > t0.seq());
    }
}
