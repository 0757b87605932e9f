//! Async stream view of a subscription.
//!
//! Demand follows the consumer: the subscription starts with one unit of
//! demand per channel slot and requests one more each time the stream
//! yields, so the channel can never overflow.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::subscription::{Subscriber, Subscription};

pub(crate) struct ChannelSubscriber<E: ?Sized> {
    sender: Option<mpsc::Sender<Arc<E>>>,
    capacity: usize,
    subscription: Option<Subscription>,
}

impl<E: ?Sized> ChannelSubscriber<E> {
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<E>>) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let subscriber = Self {
            sender: Some(sender),
            capacity,
            subscription: None,
        };
        (subscriber, receiver)
    }
}

impl<E: ?Sized + Send + Sync + 'static> Subscriber<E> for ChannelSubscriber<E> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(self.capacity as u64);
        self.subscription = Some(subscription);
    }

    fn on_next(&mut self, event: Arc<E>) {
        let Some(sender) = &self.sender else {
            return;
        };
        // Runs on the blocking pool, where blocking_send is allowed.
        if sender.blocking_send(event).is_err() {
            debug!("Event stream dropped, cancelling subscription");
            self.sender = None;
            if let Some(subscription) = &self.subscription {
                subscription.cancel();
            }
        }
    }

    fn on_error(&mut self, error: DeliveryError) {
        warn!(error = %error, "Event stream subscription failed");
        self.sender = None;
    }

    fn on_complete(&mut self) {
        self.sender = None;
    }
}

/// Stream of events from one subscription. Dropping it cancels the
/// subscription.
pub struct EventStream<E: ?Sized> {
    receiver: mpsc::Receiver<Arc<E>>,
    subscription: Subscription,
}

impl<E: ?Sized> EventStream<E> {
    pub(crate) fn new(receiver: mpsc::Receiver<Arc<E>>, subscription: Subscription) -> Self {
        Self {
            receiver,
            subscription,
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl<E: ?Sized> Stream for EventStream<E> {
    type Item = Arc<E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                this.subscription.request(1);
                Poll::Ready(Some(event))
            }
            other => other,
        }
    }
}

impl<E: ?Sized> Drop for EventStream<E> {
    fn drop(&mut self) {
        self.subscription.cancel();
    }
}
