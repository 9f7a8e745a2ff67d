use futures_util::future::LocalBoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use crate::closure::{ClosureRef, Task};
use crate::value::{HostError, HostValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromiseId(pub u32);

pub type Settlement = Result<HostValue, HostError>;

#[derive(Debug, Default)]
struct Reaction {
    on_fulfilled: Option<ClosureRef>,
    on_rejected: Option<ClosureRef>,
}

impl Reaction {
    fn task(&self, settlement: &Settlement) -> Option<Task> {
        let (callback, arg) = match settlement {
            Ok(value) => (self.on_fulfilled.as_ref()?, value.clone()),
            Err(error) => (self.on_rejected.as_ref()?, HostValue::error(error.clone())),
        };
        Some(Task {
            callback: callback.clone(),
            arg,
        })
    }
}

#[derive(Debug)]
enum PromiseState {
    Pending(Vec<Reaction>),
    Settled(Settlement),
}

/// A promise handed to the guest. Handles share it; once it has settled
/// and the last handle is released it is gone.
#[derive(Debug)]
pub struct Promise {
    id: PromiseId,
    state: RefCell<PromiseState>,
}

pub type PromiseRef = Rc<Promise>;

impl Promise {
    pub fn id(&self) -> PromiseId {
        self.id
    }

    pub fn settlement(&self) -> Option<Settlement> {
        match &*self.state.borrow() {
            PromiseState::Settled(settlement) => Some(settlement.clone()),
            PromiseState::Pending(_) => None,
        }
    }

    /// Record the outcome and return the reactions it triggers. A promise
    /// that already settled keeps its first outcome.
    fn settle(&self, settlement: Settlement) -> Vec<Task> {
        let mut state = self.state.borrow_mut();
        let tasks = match &*state {
            PromiseState::Pending(reactions) => reactions
                .iter()
                .filter_map(|reaction| reaction.task(&settlement))
                .collect(),
            PromiseState::Settled(_) => {
                tracing::warn!(promise = self.id.0, "promise settled twice, keeping first outcome");
                return Vec::new();
            }
        };
        *state = PromiseState::Settled(settlement);
        tasks
    }

    /// Subscribe. An already settled promise returns its reaction right away.
    pub(crate) fn then(
        &self,
        on_fulfilled: Option<ClosureRef>,
        on_rejected: Option<ClosureRef>,
    ) -> Option<Task> {
        let reaction = Reaction {
            on_fulfilled,
            on_rejected,
        };
        match &mut *self.state.borrow_mut() {
            PromiseState::Pending(reactions) => {
                reactions.push(reaction);
                None
            }
            PromiseState::Settled(settlement) => reaction.task(settlement),
        }
    }
}

/// Host futures started on behalf of the guest, each tied to a promise the
/// guest can subscribe to with `promise_then`.
///
/// Only unsettled promises are tracked here; a settled one lives as long as
/// a handle to it does. Nothing here can be cancelled.
#[derive(Default)]
pub struct PendingOps {
    next_id: u32,
    waiting: HashMap<PromiseId, PromiseRef>,
    in_flight: FuturesUnordered<LocalBoxFuture<'static, (PromiseId, Settlement)>>,
}

impl PendingOps {
    pub fn spawn(&mut self, work: impl Future<Output = Settlement> + 'static) -> PromiseRef {
        self.next_id += 1;
        let id = PromiseId(self.next_id);
        let promise = Rc::new(Promise {
            id,
            state: RefCell::new(PromiseState::Pending(Vec::new())),
        });
        self.waiting.insert(id, promise.clone());
        self.in_flight
            .push(Box::pin(async move { (id, work.await) }));
        tracing::debug!(promise = id.0, "host operation started");
        promise
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Promises still waiting for their host operation.
    pub fn unsettled(&self) -> usize {
        self.waiting.len()
    }

    /// Wait for the next host future to finish. `None` when nothing is
    /// running.
    pub async fn next_completion(&mut self) -> Option<(PromiseId, Settlement)> {
        self.in_flight.next().await
    }

    /// Settle the promise and stop tracking it. Returns the reactions the
    /// settlement triggers.
    pub(crate) fn settle(&mut self, id: PromiseId, settlement: Settlement) -> Vec<Task> {
        match self.waiting.remove(&id) {
            Some(promise) => promise.settle(settlement),
            None => {
                tracing::warn!(promise = id.0, "settlement for unknown promise dropped");
                Vec::new()
            }
        }
    }
}
