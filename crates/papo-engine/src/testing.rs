//! Test doubles for the media boundary.
//!
//! `FakeMedia` stands in for a real capture/peer-session provider. One
//! instance shared by two engines pairs their fake pipelines, so
//! data-channel frames sent by one side surface as events on the other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use papo_shared::Role;

use crate::media::{
    DataChannelClosed, LocalMedia, MediaConstraints, MediaError, MediaPipeline, MediaProvider,
    PipelineEvent,
};

#[derive(Default)]
struct RoleEnd {
    events: Option<mpsc::Sender<PipelineEvent>>,
    writable: Option<Arc<AtomicBool>>,
}

#[derive(Default)]
struct FakeInner {
    initiator: RoleEnd,
    responder: RoleEnd,
    offers_created: usize,
    answers_created: usize,
    remote_answers_applied: usize,
}

impl FakeInner {
    fn end_mut(&mut self, role: Role) -> &mut RoleEnd {
        match role {
            Role::Initiator => &mut self.initiator,
            Role::Responder => &mut self.responder,
        }
    }

    fn other_end(&self, role: Role) -> &RoleEnd {
        match role {
            Role::Initiator => &self.responder,
            Role::Responder => &self.initiator,
        }
    }
}

pub(crate) struct FakeMedia {
    deny: Option<MediaError>,
    inner: Arc<Mutex<FakeInner>>,
}

impl FakeMedia {
    pub(crate) fn new() -> (Arc<Self>, FakeControl) {
        let inner = Arc::new(Mutex::new(FakeInner::default()));
        (
            Arc::new(Self {
                deny: None,
                inner: inner.clone(),
            }),
            FakeControl { inner },
        )
    }

    /// A provider whose acquisition always fails with `err`.
    pub(crate) fn denying(err: MediaError) -> Arc<Self> {
        Arc::new(Self {
            deny: Some(err),
            inner: Arc::default(),
        })
    }
}

impl MediaProvider for FakeMedia {
    fn acquire_local_media(
        &self,
        _constraints: &MediaConstraints,
    ) -> Result<LocalMedia, MediaError> {
        match &self.deny {
            Some(err) => Err(err.clone()),
            None => Ok(LocalMedia {
                token: "fake-capture".to_string(),
            }),
        }
    }

    fn create_pipeline(
        &self,
        role: Role,
        _local: &LocalMedia,
    ) -> Result<(Box<dyn MediaPipeline>, mpsc::Receiver<PipelineEvent>), MediaError> {
        let (tx, rx) = mpsc::channel(32);
        let writable = Arc::new(AtomicBool::new(false));
        {
            let mut inner = self.inner.lock().unwrap();
            let end = inner.end_mut(role);
            end.events = Some(tx);
            end.writable = Some(writable.clone());
        }
        Ok((
            Box::new(FakePipeline {
                role,
                inner: self.inner.clone(),
                writable,
            }),
            rx,
        ))
    }
}

struct FakePipeline {
    role: Role,
    inner: Arc<Mutex<FakeInner>>,
    writable: Arc<AtomicBool>,
}

impl MediaPipeline for FakePipeline {
    fn create_offer(&mut self) -> Result<String, MediaError> {
        self.inner.lock().unwrap().offers_created += 1;
        Ok(format!("offer-from-{:?}", self.role))
    }

    fn create_answer(&mut self, _remote_offer: &str) -> Result<String, MediaError> {
        self.inner.lock().unwrap().answers_created += 1;
        Ok("answer-sdp".to_string())
    }

    fn set_remote_answer(&mut self, _sdp: &str) -> Result<(), MediaError> {
        self.inner.lock().unwrap().remote_answers_applied += 1;
        Ok(())
    }

    fn add_remote_candidate(&mut self, _candidate: &str) -> Result<(), MediaError> {
        Ok(())
    }

    fn data_channel_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    fn send_text(&mut self, text: &str) -> Result<(), DataChannelClosed> {
        if !self.data_channel_writable() {
            return Err(DataChannelClosed);
        }
        let tx = self
            .inner
            .lock()
            .unwrap()
            .other_end(self.role)
            .events
            .clone();
        match tx {
            Some(tx) => tx
                .try_send(PipelineEvent::DataChannelText(text.to_string()))
                .map_err(|_| DataChannelClosed),
            None => Err(DataChannelClosed),
        }
    }

    fn close(&mut self) {}
}

/// Test-side handle to observe and drive the fake pipelines.
pub(crate) struct FakeControl {
    inner: Arc<Mutex<FakeInner>>,
}

impl FakeControl {
    /// Deliver a pipeline event to the engine holding the `role` pipeline,
    /// waiting for that pipeline to come into existence first.
    pub(crate) async fn drive(&self, role: Role, event: PipelineEvent) {
        for _ in 0..200 {
            let tx = self.inner.lock().unwrap().end_mut(role).events.clone();
            if let Some(tx) = tx {
                if tx.send(event.clone()).await.is_ok() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no live {role:?} pipeline to drive");
    }

    pub(crate) fn set_writable(&self, role: Role, writable: bool) {
        if let Some(flag) = &self.inner.lock().unwrap().end_mut(role).writable {
            flag.store(writable, Ordering::SeqCst);
        }
    }

    pub(crate) fn remote_answers_applied(&self) -> usize {
        self.inner.lock().unwrap().remote_answers_applied
    }

    pub(crate) fn answers_created(&self) -> usize {
        self.inner.lock().unwrap().answers_created
    }
}
