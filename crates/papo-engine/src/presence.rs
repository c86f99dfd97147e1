//! Presence agent.
//!
//! Keeps one participant's directory row alive (heartbeat every 30 s against
//! a 120 s TTL, so crashed clients age out without deregistering) and
//! re-polls the online list every 10 s; push delivery of directory changes
//! is never assumed. Snapshots go out on a watch channel.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use papo_shared::{EngineConfig, Identity};
use papo_store::{Database, PresenceAttrs, PresenceRecord};

use crate::storage::with_db;

#[derive(Debug)]
enum PresenceCommand {
    UpdateProfile(PresenceAttrs),
    Refresh,
    Shutdown,
}

/// Handle to the background presence task.
pub struct PresenceAgent {
    cmd_tx: mpsc::Sender<PresenceCommand>,
    snapshot_rx: watch::Receiver<Vec<PresenceRecord>>,
}

impl PresenceAgent {
    /// Register `identity` and spawn the heartbeat/poll task.
    pub fn spawn(
        db: Arc<Mutex<Database>>,
        identity: Identity,
        attrs: PresenceAttrs,
        config: &EngineConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(Vec::new());

        tokio::spawn(run_agent(
            db,
            identity,
            attrs,
            config.clone(),
            cmd_rx,
            snapshot_tx,
        ));

        Self { cmd_tx, snapshot_rx }
    }

    /// Current online list (most recent snapshot, excluding self).
    pub fn online(&self) -> Vec<PresenceRecord> {
        self.snapshot_rx.borrow().clone()
    }

    /// Subscribe to online-list snapshots.
    pub fn watch(&self) -> watch::Receiver<Vec<PresenceRecord>> {
        self.snapshot_rx.clone()
    }

    /// Replace the advertised display attributes.
    pub async fn update_profile(&self, attrs: PresenceAttrs) {
        let _ = self.cmd_tx.send(PresenceCommand::UpdateProfile(attrs)).await;
    }

    /// Force an immediate re-poll.
    pub async fn refresh(&self) {
        let _ = self.cmd_tx.send(PresenceCommand::Refresh).await;
    }

    /// Deregister and stop the task.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(PresenceCommand::Shutdown).await;
    }
}

async fn run_agent(
    db: Arc<Mutex<Database>>,
    identity: Identity,
    mut attrs: PresenceAttrs,
    config: EngineConfig,
    mut cmd_rx: mpsc::Receiver<PresenceCommand>,
    snapshot_tx: watch::Sender<Vec<PresenceRecord>>,
) {
    info!(identity = %identity.short(), "presence agent starting");
    with_db(&db, "presence register", |db| {
        db.upsert_presence(&identity, &attrs, Utc::now())
    });

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    let mut poll = tokio::time::interval(config.presence_poll_interval);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(PresenceCommand::UpdateProfile(new_attrs)) => {
                    attrs = new_attrs;
                    with_db(&db, "presence update", |db| {
                        db.upsert_presence(&identity, &attrs, Utc::now())
                    });
                }
                Some(PresenceCommand::Refresh) => {
                    publish_snapshot(&db, &identity, &config, &snapshot_tx);
                }
                Some(PresenceCommand::Shutdown) | None => break,
            },

            _ = heartbeat.tick() => {
                let touched = with_db(&db, "presence heartbeat", |db| {
                    db.touch_presence(&identity, Utc::now())
                });
                // Our row vanished (e.g. swept by an external cleaner):
                // re-register rather than silently going dark.
                if touched == Some(false) {
                    debug!(identity = %identity.short(), "presence row missing, re-registering");
                    with_db(&db, "presence re-register", |db| {
                        db.upsert_presence(&identity, &attrs, Utc::now())
                    });
                }
            }

            _ = poll.tick() => {
                publish_snapshot(&db, &identity, &config, &snapshot_tx);
            }
        }
    }

    with_db(&db, "presence deregister", |db| db.delete_presence(&identity));
    info!(identity = %identity.short(), "presence agent stopped");
}

fn publish_snapshot(
    db: &Arc<Mutex<Database>>,
    identity: &Identity,
    config: &EngineConfig,
    snapshot_tx: &watch::Sender<Vec<PresenceRecord>>,
) {
    if let Some(records) = with_db(db, "presence poll", |db| {
        db.list_online(Utc::now(), config.presence_ttl, Some(identity))
    }) {
        let _ = snapshot_tx.send(records);
    }
}
