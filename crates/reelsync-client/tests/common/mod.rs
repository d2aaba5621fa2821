//! Shared fixtures for session integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use reelsync_client::{
    LocalTransport, OpLogClient, OpLogTransport, SyncConfig, SyncSession, TransportError,
};
use reelsync_server::OpLogStore;
use reelsync_types::{
    ActorId, ApplyRequest, ApplyResponse, AudioTrack, Clip, DocumentKey, DocumentState, Layer,
    Marker, PollRequest, PollResponse, TimelineSnapshot,
};

pub fn key() -> DocumentKey {
    DocumentKey::new("film", "reel-1")
}

/// Two video clips, one audio clip, one marker.
pub fn base() -> TimelineSnapshot {
    TimelineSnapshot::new()
        .with_layer(
            Layer::new("L1")
                .with_clip(Clip::new("C1", 0, 1000))
                .with_clip(Clip::new("C2", 1000, 1000)),
        )
        .with_track(AudioTrack::new("A1").with_clip(Clip::new("S1", 0, 2000)))
        .with_marker(Marker::new("M1", 100, "start"))
        .with_duration(2000)
}

pub fn store() -> Arc<OpLogStore> {
    let store = Arc::new(OpLogStore::new());
    store
        .create_document(key(), base(), &ActorId::from("setup"))
        .unwrap();
    store
}

pub async fn open(store: &Arc<OpLogStore>, who: &str) -> SyncSession {
    open_with(store, who, SyncConfig::default()).await
}

pub async fn open_with(store: &Arc<OpLogStore>, who: &str, config: SyncConfig) -> SyncSession {
    let client = OpLogClient::new(Arc::new(LocalTransport::new(store.clone(), who)), key());
    SyncSession::open(client, config).await.unwrap()
}

pub async fn open_flaky(store: &Arc<OpLogStore>, who: &str) -> (SyncSession, Arc<FlakyTransport>) {
    let transport = Arc::new(FlakyTransport::new(store.clone(), who));
    let client = OpLogClient::new(transport.clone(), key());
    let session = SyncSession::open(client, SyncConfig::default()).await.unwrap();
    (session, transport)
}

/// A local transport that can be switched off, or made to misreport.
pub struct FlakyTransport {
    inner: LocalTransport,
    offline: AtomicBool,
    drop_poll_items: AtomicBool,
    withhold_new_items: AtomicBool,
    skew_versions: AtomicBool,
}

impl FlakyTransport {
    pub fn new(store: Arc<OpLogStore>, author: &str) -> Self {
        Self {
            inner: LocalTransport::new(store, author),
            offline: AtomicBool::new(false),
            drop_poll_items: AtomicBool::new(false),
            withhold_new_items: AtomicBool::new(false),
            skew_versions: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Poll responses keep `current_version` but carry no items.
    pub fn set_drop_poll_items(&self, drop: bool) {
        self.drop_poll_items.store(drop, Ordering::SeqCst);
    }

    /// Poll responses carry the whole log up to the caller's version and
    /// nothing after it.
    pub fn set_withhold_new_items(&self, withhold: bool) {
        self.withhold_new_items.store(withhold, Ordering::SeqCst);
    }

    /// Successful applies report one version more than the server assigned.
    pub fn set_skew_versions(&self, skew: bool) {
        self.skew_versions.store(skew, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("network down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OpLogTransport for FlakyTransport {
    fn author(&self) -> &ActorId {
        self.inner.author()
    }

    async fn apply(
        &self,
        key: &DocumentKey,
        request: ApplyRequest,
    ) -> Result<ApplyResponse, TransportError> {
        self.check()?;
        let mut response = self.inner.apply(key, request).await?;
        if self.skew_versions.load(Ordering::SeqCst) {
            response.version += 1;
        }
        Ok(response)
    }

    async fn poll(
        &self,
        key: &DocumentKey,
        request: PollRequest,
    ) -> Result<PollResponse, TransportError> {
        self.check()?;
        if self.withhold_new_items.load(Ordering::SeqCst) {
            let everything = PollRequest {
                since_version: 0,
                limit: 0,
            };
            let mut response = self.inner.poll(key, everything).await?;
            response
                .operations
                .retain(|item| item.version <= request.since_version);
            return Ok(response);
        }
        let mut response = self.inner.poll(key, request).await?;
        if self.drop_poll_items.load(Ordering::SeqCst) {
            response.operations.clear();
        }
        Ok(response)
    }

    async fn fetch(&self, key: &DocumentKey) -> Result<DocumentState, TransportError> {
        self.check()?;
        self.inner.fetch(key).await
    }
}
