use std::pin::Pin;

use futures::Stream;

use council_core::{AdvisorId, AdvisorUpdate, MessageStatus};

/// Push-based feed of one turn's advisor updates. Ends once both advisors
/// are terminal.
pub type TurnSubscription = Pin<Box<dyn Stream<Item = AdvisorUpdate> + Send>>;

#[derive(Clone, Copy, Debug)]
struct Seen {
    len: usize,
    status: MessageStatus,
}

/// Filters a merged replay and live feed so that each advisor's updates are
/// monotonic and nothing follows its terminal update.
#[derive(Debug, Default)]
pub struct UpdateTracker {
    seen: [Option<Seen>; 2],
}

impl UpdateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `update` and report whether it should be delivered.
    pub fn accept(&mut self, update: &AdvisorUpdate) -> bool {
        let slot = &mut self.seen[update.advisor.index()];
        if let Some(seen) = slot {
            if seen.status.is_terminal() {
                return false;
            }
            if !update.is_terminal() {
                let stale = update.text.len() < seen.len;
                let repeat = update.text.len() == seen.len && update.status == seen.status;
                if stale || repeat {
                    return false;
                }
            }
        }
        *slot = Some(Seen {
            len: update.text.len(),
            status: update.status,
        });
        true
    }

    pub fn is_terminal(&self, advisor: AdvisorId) -> bool {
        self.seen[advisor.index()].is_some_and(|s| s.status.is_terminal())
    }

    pub fn all_terminal(&self) -> bool {
        AdvisorId::ALL.iter().all(|a| self.is_terminal(*a))
    }
}
