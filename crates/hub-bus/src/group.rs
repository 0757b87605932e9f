//! Publisher groups.
//!
//! Every member publish is pushed onto the group's queue and a single
//! dispatcher task fans events out in queue order, so two publishes from
//! different members are seen by every subscriber in the order the
//! `publish` calls returned.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::event::Event;
use crate::subscription::{fan_out, DropHandler, SubscriberList, SubscriptionCore};

pub(crate) struct GroupMessage {
    member_id: Arc<str>,
    event: Arc<dyn Event>,
    on_drop: Option<DropHandler>,
}

pub(crate) struct GroupCore {
    group_id: Arc<str>,
    members: RwLock<Vec<Arc<str>>>,
    subscribers: SubscriberList,
    queue: mpsc::UnboundedSender<GroupMessage>,
    // Taken by the dispatcher when the bus starts.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<GroupMessage>>>,
}

impl GroupCore {
    pub(crate) fn new(group_id: Arc<str>) -> Arc<Self> {
        let (queue, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            group_id,
            members: RwLock::new(Vec::new()),
            subscribers: SubscriberList::default(),
            queue,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    pub(crate) fn group_id(&self) -> &str {
        &self.group_id
    }

    pub(crate) fn subscribers(&self) -> &SubscriberList {
        &self.subscribers
    }

    pub(crate) fn add_member(&self, member_id: Arc<str>) {
        let mut members = self.members.write();
        if !members.contains(&member_id) {
            members.push(member_id);
        }
    }

    pub(crate) fn members(&self) -> Vec<Arc<str>> {
        self.members.read().clone()
    }

    /// Whether `core` should be attached to this group: it names the group
    /// itself or at least one member.
    pub(crate) fn is_watched_by(&self, core: &SubscriptionCore) -> bool {
        core.topics().matches(&self.group_id)
            || self
                .members
                .read()
                .iter()
                .any(|member| core.topics().matches(member))
    }

    pub(crate) fn count_watching(&self, member_id: &str) -> usize {
        self.subscribers
            .count_active(|core| core.watches(member_id, Some(&*self.group_id)))
    }

    pub(crate) fn enqueue(
        &self,
        member_id: Arc<str>,
        event: Arc<dyn Event>,
        on_drop: Option<DropHandler>,
    ) {
        if self.subscribers.is_empty() {
            trace!(group_id = %self.group_id, source_id = %member_id, "No group subscribers");
            return;
        }
        let message = GroupMessage {
            member_id,
            event,
            on_drop,
        };
        if self.queue.send(message).is_err() {
            debug!(group_id = %self.group_id, "Group dispatcher stopped, event discarded");
        }
    }

    pub(crate) fn spawn_dispatcher(
        self: &Arc<Self>,
        runtime: &Handle,
        shutdown: watch::Receiver<bool>,
    ) {
        let Some(receiver) = self.receiver.lock().take() else {
            return;
        };
        runtime.spawn(dispatch(Arc::clone(self), receiver, shutdown));
    }

    fn deliver(&self, message: GroupMessage) {
        let snapshot = self.subscribers.snapshot();
        fan_out(
            &snapshot,
            &message.event,
            &message.member_id,
            message.on_drop.as_ref(),
            |core| core.watches(&message.member_id, Some(&*self.group_id)),
        );
    }
}

async fn dispatch(
    group: Arc<GroupCore>,
    mut queue: mpsc::UnboundedReceiver<GroupMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(group_id = %group.group_id, "Group dispatcher started");
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            message = queue.recv() => match message {
                Some(message) => group.deliver(message),
                None => break,
            },
        }
    }
    debug!(group_id = %group.group_id, "Group dispatcher stopped");
}
