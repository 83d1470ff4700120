//! The single outstanding request of a connection.
//!
//! Every request gets a ticket. Issuing a new one aborts the task behind
//! the previous ticket, and a completion carrying an old ticket settles as
//! [`Settled::Canceled`] so it can never reach the state machine.

use tokio::task::JoinHandle;

/// Ticket identifying one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Outcome of a completion, as seen by the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T> {
    Done(T),
    Canceled,
}

#[derive(Debug, Default)]
pub struct RequestSlot {
    next: u64,
    current: Option<(Ticket, JoinHandle<()>)>,
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the current request and reserve a ticket for the next one.
    pub fn issue(&mut self) -> Ticket {
        self.cancel();
        self.next += 1;
        Ticket(self.next)
    }

    /// Record the task running the request for `ticket`.
    pub fn attach(&mut self, ticket: Ticket, task: JoinHandle<()>) {
        if ticket == Ticket(self.next) {
            self.current = Some((ticket, task));
        } else {
            task.abort();
        }
    }

    /// Abort the outstanding request, if any.
    pub fn cancel(&mut self) {
        if let Some((_, task)) = self.current.take() {
            task.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.current.is_some()
    }

    /// Match a completion to the current ticket.
    pub fn settle<T>(&mut self, ticket: Ticket, value: T) -> Settled<T> {
        match &self.current {
            Some((current, _)) if *current == ticket => {
                self.current = None;
                Settled::Done(value)
            }
            _ => Settled::Canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn idle_task() -> JoinHandle<()> {
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
    }

    #[tokio::test]
    async fn test_current_ticket_settles_once() {
        let mut slot = RequestSlot::new();
        let ticket = slot.issue();
        slot.attach(ticket, idle_task());
        assert!(slot.is_pending());

        assert_eq!(slot.settle(ticket, 7), Settled::Done(7));
        assert!(!slot.is_pending());
        assert_eq!(slot.settle(ticket, 8), Settled::Canceled);
    }

    #[tokio::test]
    async fn test_superseded_ticket_is_canceled() {
        let mut slot = RequestSlot::new();
        let first = slot.issue();
        slot.attach(first, idle_task());

        let second = slot.issue();
        slot.attach(second, idle_task());

        assert_eq!(slot.settle(first, "late"), Settled::Canceled);
        assert_eq!(slot.settle(second, "fresh"), Settled::Done("fresh"));
    }

    #[tokio::test]
    async fn test_cancel_invalidates() {
        let mut slot = RequestSlot::new();
        let ticket = slot.issue();
        slot.attach(ticket, idle_task());
        slot.cancel();
        assert_eq!(slot.settle(ticket, ()), Settled::Canceled);
    }
}
