//! Channel-addressed pub/sub bus boundary.
//!
//! The engine only requires publish/subscribe/unsubscribe with at-most-once,
//! fan-out delivery to all current subscribers of a named topic. External
//! code talks to the bus task through typed command channels, keeping the
//! transport fully asynchronous and swappable: `spawn_memory_bus` provides
//! the in-process implementation used by tests and single-process embeds,
//! while a broker bridge can serve the same [`BusCommand`] channel.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::NetError;

/// Per-subscription delivery buffer. Frames beyond this are dropped, which
/// at-most-once delivery permits.
const SUBSCRIPTION_BUFFER: usize = 64;

/// Opaque handle identifying one open subscription on the bus.
pub type SubscriptionId = u64;

/// Commands sent *into* the bus task.
#[derive(Debug)]
pub enum BusCommand {
    /// Fan a frame out to every current subscriber of `topic`, except the
    /// subscription named in `from` (publisher self-filtering).
    Publish {
        topic: String,
        from: Option<SubscriptionId>,
        data: Vec<u8>,
    },
    /// Open a subscription on `topic`.
    Subscribe {
        topic: String,
        reply: oneshot::Sender<(SubscriptionId, mpsc::Receiver<BusMessage>)>,
    },
    /// Close a subscription. Idempotent.
    Unsubscribe { id: SubscriptionId },
}

/// A frame delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub data: Vec<u8>,
}

/// Clone-able handle to the bus task.
#[derive(Debug, Clone)]
pub struct BusHandle {
    cmd_tx: mpsc::Sender<BusCommand>,
}

impl BusHandle {
    /// Wrap an existing command channel (e.g. one served by a broker bridge).
    pub fn new(cmd_tx: mpsc::Sender<BusCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Open a subscription on `topic`.
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, NetError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(BusCommand::Subscribe {
                topic: topic.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| NetError::BusClosed)?;

        let (id, rx) = reply_rx.await.map_err(|_| NetError::BusClosed)?;

        Ok(Subscription {
            id,
            topic: topic.to_string(),
            rx,
            cmd_tx: self.cmd_tx.clone(),
        })
    }

    /// Publish without a subscriber identity (delivered to all subscribers).
    pub async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), NetError> {
        self.publish_from(topic, None, data).await
    }

    pub(crate) async fn publish_from(
        &self,
        topic: &str,
        from: Option<SubscriptionId>,
        data: Vec<u8>,
    ) -> Result<(), NetError> {
        self.cmd_tx
            .send(BusCommand::Publish {
                topic: topic.to_string(),
                from,
                data,
            })
            .await
            .map_err(|_| NetError::BusClosed)
    }
}

/// One open subscription.
///
/// Publishing through the subscription tags frames with its own id, so the
/// bus never delivers a frame back to its publisher. Dropping the
/// subscription unsubscribes (best-effort; the bus also prunes subscribers
/// whose receiver is gone).
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    rx: mpsc::Receiver<BusMessage>,
    cmd_tx: mpsc::Sender<BusCommand>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish on this subscription's topic, filtered from self-delivery.
    pub async fn publish(&self, data: Vec<u8>) -> Result<(), NetError> {
        BusHandle::new(self.cmd_tx.clone())
            .publish_from(&self.topic, Some(self.id), data)
            .await
    }

    /// Receive the next frame. `None` means the bus task is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Best-effort: if the command queue is full the bus prunes the
        // subscription on the next delivery attempt instead.
        let _ = self.cmd_tx.try_send(BusCommand::Unsubscribe { id: self.id });
    }
}

/// Spawn the in-process bus in a background tokio task.
///
/// Delivery is at-most-once: a subscriber whose buffer is full simply misses
/// the frame. No ordering is guaranteed across publishers.
pub fn spawn_memory_bus() -> BusHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    tokio::spawn(run_memory_bus(cmd_rx));
    BusHandle::new(cmd_tx)
}

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<BusMessage>,
}

async fn run_memory_bus(mut cmd_rx: mpsc::Receiver<BusCommand>) {
    let mut topics: HashMap<String, Vec<Subscriber>> = HashMap::new();
    let mut next_id: SubscriptionId = 1;

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            BusCommand::Subscribe { topic, reply } => {
                let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
                let id = next_id;
                next_id += 1;

                topics.entry(topic.clone()).or_default().push(Subscriber { id, tx });
                debug!(topic = %topic, id, "bus subscription opened");

                // Caller may have given up waiting; the dead sender is
                // pruned on first delivery.
                let _ = reply.send((id, rx));
            }

            BusCommand::Unsubscribe { id } => {
                for (topic, subs) in topics.iter_mut() {
                    if subs.iter().any(|s| s.id == id) {
                        subs.retain(|s| s.id != id);
                        debug!(topic = %topic, id, "bus subscription closed");
                    }
                }
                topics.retain(|_, subs| !subs.is_empty());
            }

            BusCommand::Publish { topic, from, data } => {
                let Some(subs) = topics.get_mut(&topic) else {
                    trace!(topic = %topic, "publish on topic with no subscribers");
                    continue;
                };

                let mut dead = Vec::new();
                for sub in subs.iter() {
                    if Some(sub.id) == from {
                        continue;
                    }
                    match sub.tx.try_send(BusMessage {
                        topic: topic.clone(),
                        data: data.clone(),
                    }) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(topic = %topic, id = sub.id, "subscriber buffer full, frame dropped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            dead.push(sub.id);
                        }
                    }
                }

                if !dead.is_empty() {
                    subs.retain(|s| !dead.contains(&s.id));
                    if subs.is_empty() {
                        topics.remove(&topic);
                    }
                }
            }
        }
    }

    debug!("bus task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_all_other_subscribers() {
        let bus = spawn_memory_bus();
        let a = bus.subscribe("t").await.unwrap();
        let mut b = bus.subscribe("t").await.unwrap();
        let mut c = bus.subscribe("t").await.unwrap();

        a.publish(b"hello".to_vec()).await.unwrap();

        assert_eq!(b.recv().await.unwrap().data, b"hello");
        assert_eq!(c.recv().await.unwrap().data, b"hello");
    }

    #[tokio::test]
    async fn publisher_never_receives_its_own_frame() {
        let bus = spawn_memory_bus();
        let mut a = bus.subscribe("t").await.unwrap();
        let mut b = bus.subscribe("t").await.unwrap();

        a.publish(b"one".to_vec()).await.unwrap();
        b.publish(b"two".to_vec()).await.unwrap();

        // Each side sees only the other's frame.
        assert_eq!(a.recv().await.unwrap().data, b"two");
        assert_eq!(b.recv().await.unwrap().data, b"one");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = spawn_memory_bus();
        let a = bus.subscribe("t1").await.unwrap();
        let mut b = bus.subscribe("t2").await.unwrap();

        a.publish(b"on-t1".to_vec()).await.unwrap();
        bus.publish("t2", b"on-t2".to_vec()).await.unwrap();

        assert_eq!(b.recv().await.unwrap().data, b"on-t2");
    }

    #[tokio::test]
    async fn dropped_subscription_stops_receiving() {
        let bus = spawn_memory_bus();
        let a = bus.subscribe("t").await.unwrap();
        let b = bus.subscribe("t").await.unwrap();
        drop(b);

        // Publishing must not error out because of the departed subscriber.
        a.publish(b"x".to_vec()).await.unwrap();
        a.publish(b"y".to_vec()).await.unwrap();
    }
}
