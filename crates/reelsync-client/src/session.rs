//! One actor's synchronized view of a document.
//!
//! A [`SyncSession`] owns the `{snapshot, version}` pair for a document. Every
//! change goes through it:
//!
//! - [`edit`](SyncSession::edit) diffs the desired snapshot against the last
//!   confirmed one and submits the operations under the confirmed version
//! - [`preview`](SyncSession::preview) shows a local-only state during an
//!   interaction without writing or touching history
//! - [`undo`](SyncSession::undo) / [`redo`](SyncSession::redo) submit rebased
//!   inverse edits as ordinary versioned writes
//! - [`poll_remote`](SyncSession::poll_remote) merges other actors' operations
//! - [`resolve`](SyncSession::resolve) leaves the conflict state
//!
//! Subscribers see the optimistic snapshot before the server answers. If the
//! write fails they see the previous state again.
//!
//! # State Machine
//!
//! ```text
//!   Normal ──edit/undo/redo──▶ (in flight) ──ok──▶ Normal
//!                                  │
//!                                  ├─conflict──▶ Conflict ──resolve──▶ Normal
//!                                  └─transport─▶ Normal + PendingEdit
//! ```

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use reelsync_ops::{apply_ops_lenient, diff};
use reelsync_server::ServerError;
use reelsync_types::{DocumentKey, Operation, TimelineSnapshot, Version};

use crate::config::SyncConfig;
use crate::conflict::{ConflictRecord, Resolution, SyncState};
use crate::history::{HistoryEntry, HistoryManager};
use crate::merge::{MergeOutcome, merge_remote, replay_remote};
use crate::oplog::{AppliedBatch, ApplyError, OpLogClient};
use crate::transport::TransportError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// A conflict is waiting for [`SyncSession::resolve`].
    #[error("unresolved conflict with server version {server_version}")]
    ConflictUnresolved { server_version: Version },
    /// A write is in flight, or one was abandoned and its outcome is unknown.
    #[error("a write is in flight; resync before writing again")]
    WriteInFlight,
    #[error("not in conflict")]
    NotInConflict,
    #[error("no pending edit")]
    NothingPending,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("rejected by server: {0}")]
    Rejected(ServerError),
    #[error("server answered version {got}, expected {expected}")]
    ProtocolViolation { expected: Version, got: Version },
    #[error("session shut down")]
    Shutdown,
}

/// Result of a write-producing call. Conflicts are outcomes, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    Applied { version: Version },
    /// Nothing differed from the confirmed snapshot; nothing was written.
    NoChange,
    /// Another actor got there first; the session is now in conflict.
    Conflict { server_version: Version },
    /// Local state was replaced by the server's.
    Reloaded { version: Version },
    NothingToUndo,
    NothingToRedo,
}

/// Result of one [`SyncSession::poll_remote`] round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    UpToDate,
    Merged {
        version: Version,
        applied: usize,
        skipped: usize,
    },
    /// Items were missing; the canonical snapshot was refetched.
    Resynced { version: Version },
    /// Polling is paused while in conflict.
    Paused,
}

/// An edit whose submission failed in transport.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEdit {
    pub base_version: Version,
    pub operations: Vec<Operation>,
    pub label: String,
}

/// What subscribers see.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionView {
    pub snapshot: TimelineSnapshot,
    pub version: Version,
    pub in_conflict: bool,
    pub previewing: bool,
    pub can_undo: bool,
    pub can_redo: bool,
    pub has_pending: bool,
}

pub struct SyncSession {
    client: OpLogClient,
    config: SyncConfig,
    /// Last server-acknowledged snapshot.
    confirmed: TimelineSnapshot,
    version: Version,
    preview: Option<TimelineSnapshot>,
    history: HistoryManager,
    state: SyncState,
    pending: Option<PendingEdit>,
    in_flight: bool,
    view_tx: watch::Sender<SessionView>,
}

/// Which stack a history step pops from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Undo,
    Redo,
}

impl SyncSession {
    /// Fetch the canonical state and start a session on it.
    pub async fn open(client: OpLogClient, config: SyncConfig) -> Result<Self, SessionError> {
        let state = client.fetch().await?;
        info!("opened {} at version {}", client.key(), state.version);

        let history = HistoryManager::new(config.history_capacity);
        let view = SessionView {
            snapshot: state.timeline_data.clone(),
            version: state.version,
            in_conflict: false,
            previewing: false,
            can_undo: false,
            can_redo: false,
            has_pending: false,
        };
        let (view_tx, _) = watch::channel(view);

        Ok(Self {
            client,
            config,
            confirmed: state.timeline_data,
            version: state.version,
            preview: None,
            history,
            state: SyncState::Normal,
            pending: None,
            in_flight: false,
            view_tx,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn key(&self) -> &DocumentKey {
        self.client.key()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Last server-acknowledged snapshot.
    pub fn confirmed(&self) -> &TimelineSnapshot {
        &self.confirmed
    }

    /// What the consumer should render.
    pub fn snapshot(&self) -> &TimelineSnapshot {
        match (&self.state, &self.preview) {
            (SyncState::Conflict(record), _) => &record.local_snapshot,
            (SyncState::Normal, Some(preview)) => preview,
            (SyncState::Normal, None) => &self.confirmed,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn pending(&self) -> Option<&PendingEdit> {
        self.pending.as_ref()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    // =========================================================================
    // Local changes
    // =========================================================================

    /// Commit `desired` as one undoable edit.
    ///
    /// An edit still pending from a failed delivery is submitted first, and
    /// this one is replayed on top of it.
    pub async fn edit(
        &mut self,
        desired: TimelineSnapshot,
        label: impl Into<String>,
    ) -> Result<EditOutcome, SessionError> {
        self.ensure_writable()?;
        let label = label.into();
        if self.pending.is_none() {
            return self.commit(desired, label).await;
        }

        let operations = diff(&self.confirmed, &desired);
        match self.retry_pending().await {
            Ok(EditOutcome::Conflict { server_version }) => {
                if let SyncState::Conflict(record) = &mut self.state {
                    record.local_snapshot =
                        apply_ops_lenient(&record.local_snapshot, &operations).0;
                    record.label = format!("{}, {}", record.label, label);
                }
                self.publish();
                return Ok(EditOutcome::Conflict { server_version });
            }
            Ok(_) => {}
            Err(err) => {
                if let Some(pending) = &mut self.pending {
                    debug!("edit '{}' queued behind '{}'", label, pending.label);
                    pending.operations.extend(operations);
                    pending.label = format!("{}, {}", pending.label, label);
                    self.publish();
                }
                return Err(err);
            }
        }

        let (desired, _) = apply_ops_lenient(&self.confirmed, &operations);
        self.commit(desired, label).await
    }

    /// Show a local-only state without writing or recording history.
    ///
    /// The next [`edit`](Self::edit) commits the interaction as one entry.
    pub fn preview(&mut self, desired: TimelineSnapshot) -> Result<(), SessionError> {
        self.ensure_writable()?;
        self.preview = Some(desired);
        self.publish();
        Ok(())
    }

    /// Drop the preview overlay and show the confirmed state again.
    pub fn cancel_preview(&mut self) {
        if self.preview.take().is_some() {
            self.publish();
        }
    }

    pub async fn undo(&mut self) -> Result<EditOutcome, SessionError> {
        self.step(Step::Undo).await
    }

    pub async fn redo(&mut self) -> Result<EditOutcome, SessionError> {
        self.step(Step::Redo).await
    }

    /// Resubmit an edit that failed in transport, rebased onto the current
    /// confirmed snapshot.
    pub async fn retry_pending(&mut self) -> Result<EditOutcome, SessionError> {
        self.ensure_writable()?;
        let pending = self.pending.take().ok_or(SessionError::NothingPending)?;
        let (desired, report) = apply_ops_lenient(&self.confirmed, &pending.operations);
        if !report.skipped.is_empty() {
            debug!(
                "retry '{}': {} ops no longer apply (base {}, now {})",
                pending.label,
                report.skipped.len(),
                pending.base_version,
                self.version
            );
        }
        self.commit(desired, pending.label).await
    }

    // =========================================================================
    // Remote changes
    // =========================================================================

    /// Fetch and merge everything other actors applied since our version.
    ///
    /// Pages until the server reports no more items.
    pub async fn poll_remote(&mut self) -> Result<PollOutcome, SessionError> {
        if self.state.is_conflict() {
            return Ok(PollOutcome::Paused);
        }
        if self.in_flight {
            return Err(SessionError::WriteInFlight);
        }

        let mut outcome = PollOutcome::UpToDate;
        loop {
            let response = self.client.poll(self.version, self.config.poll_limit).await?;
            if response.current_version < self.version {
                debug!(
                    "ignoring stale poll response ({} < {})",
                    response.current_version, self.version
                );
                return Ok(outcome);
            }

            // An empty page from a server that claims a newer version means
            // items are missing.
            let remote_version = if response.operations.is_empty() {
                response.current_version
            } else {
                response.reached_version(self.version)
            };
            match merge_remote(&self.confirmed, self.version, &response.operations, remote_version) {
                MergeOutcome::UpToDate if response.current_version > self.version => {
                    warn!(
                        "server at {} sent nothing past {}",
                        response.current_version, self.version
                    );
                    let version = self.resync().await?;
                    return Ok(PollOutcome::Resynced { version });
                }
                MergeOutcome::UpToDate => {}
                MergeOutcome::Merged {
                    snapshot,
                    version,
                    applied,
                    skipped,
                } => {
                    if let Some(preview) = &self.preview {
                        let fresh: Vec<_> = response
                            .operations
                            .iter()
                            .filter(|item| item.version > self.version)
                            .cloned()
                            .collect();
                        self.preview = Some(replay_remote(preview, &fresh).0);
                    }
                    self.confirmed = snapshot;
                    self.version = version;
                    outcome = match outcome {
                        PollOutcome::Merged {
                            applied: a,
                            skipped: s,
                            ..
                        } => PollOutcome::Merged {
                            version,
                            applied: a + applied,
                            skipped: s + skipped,
                        },
                        _ => PollOutcome::Merged {
                            version,
                            applied,
                            skipped,
                        },
                    };
                    self.publish();
                }
                MergeOutcome::NeedsResync { .. } => {
                    let version = self.resync().await?;
                    return Ok(PollOutcome::Resynced { version });
                }
            }

            if self.version >= response.current_version || response.operations.is_empty() {
                return Ok(outcome);
            }
        }
    }

    /// Replace local state with the canonical snapshot.
    ///
    /// History entries stay usable: undo rebases onto whatever is confirmed.
    /// An abandoned in-flight write is forgotten.
    pub async fn resync(&mut self) -> Result<Version, SessionError> {
        let state = self.client.fetch().await?;
        info!(
            "resynced {} from {} to version {}",
            self.key(),
            self.version,
            state.version
        );
        self.confirmed = state.timeline_data;
        self.version = state.version;
        self.preview = None;
        self.in_flight = false;
        self.publish();
        Ok(self.version)
    }

    // =========================================================================
    // Conflicts
    // =========================================================================

    pub async fn resolve(&mut self, resolution: Resolution) -> Result<EditOutcome, SessionError> {
        let SyncState::Conflict(record) = &self.state else {
            return Err(SessionError::NotInConflict);
        };
        if self.in_flight {
            return Err(SessionError::WriteInFlight);
        }

        match resolution {
            Resolution::Reload => {
                let state = self.client.fetch().await?;
                info!(
                    "conflict on {} resolved by reload at version {}",
                    self.key(),
                    state.version
                );
                self.confirmed = state.timeline_data;
                self.version = state.version;
                self.history.clear();
                self.pending = None;
                self.preview = None;
                self.state = SyncState::Normal;
                self.publish();
                Ok(EditOutcome::Reloaded {
                    version: self.version,
                })
            }
            Resolution::Force => {
                let operations = record.force_operations();
                let server_version = record.server_version;
                let base = record.base.clone();
                let local = record.local_snapshot.clone();
                let label = record.label.clone();

                self.in_flight = true;
                let result = self.client.apply(server_version, operations).await;
                self.in_flight = false;

                match result {
                    Ok(batch) => {
                        info!(
                            "conflict on {} resolved by force at version {}",
                            self.key(),
                            batch.version
                        );
                        self.adopt(batch);
                        self.history
                            .record(HistoryEntry::new(base, self.confirmed.clone(), label));
                        self.state = SyncState::Normal;
                        self.publish();
                        Ok(EditOutcome::Applied {
                            version: self.version,
                        })
                    }
                    Err(ApplyError::Conflict { server_version }) => {
                        warn!("forced write conflicted again at {}", server_version);
                        self.state = SyncState::Conflict(ConflictRecord::new(
                            base,
                            local,
                            label,
                            server_version,
                        ));
                        self.publish();
                        Ok(EditOutcome::Conflict { server_version })
                    }
                    Err(err) => Err(self.rejected(err).await),
                }
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn step(&mut self, step: Step) -> Result<EditOutcome, SessionError> {
        self.ensure_writable()?;
        let popped = match step {
            Step::Undo => self.history.pop_undo(),
            Step::Redo => self.history.pop_redo(),
        };
        let Some(entry) = popped else {
            return Ok(match step {
                Step::Undo => EditOutcome::NothingToUndo,
                Step::Redo => EditOutcome::NothingToRedo,
            });
        };
        self.preview = None;

        let revert = match step {
            Step::Undo => diff(&entry.applied, &entry.snapshot),
            Step::Redo => diff(&entry.snapshot, &entry.applied),
        };
        let (target, report) = apply_ops_lenient(&self.confirmed, &revert);
        if !report.skipped.is_empty() {
            debug!(
                "{:?} '{}': {} ops no longer apply",
                step,
                entry.label,
                report.skipped.len()
            );
        }

        let operations = diff(&self.confirmed, &target);
        if operations.is_empty() {
            self.settle(step, entry);
            self.publish();
            return Ok(EditOutcome::NoChange);
        }
        debug!("{:?} '{}': {} ops", step, entry.label, operations.len());

        let label = entry.label.clone();
        match self.submit(operations, target.clone()).await {
            Ok(batch) => {
                self.adopt(batch);
                self.settle(step, entry);
                self.publish();
                Ok(EditOutcome::Applied {
                    version: self.version,
                })
            }
            Err(err @ (ApplyError::Conflict { .. } | ApplyError::ProtocolViolation { .. })) => {
                self.settle(step, entry);
                self.write_failed(err, target, label).await
            }
            Err(err) => {
                // Not applied: the entry goes back where it came from.
                match step {
                    Step::Undo => self.history.push_undo(entry),
                    Step::Redo => self.history.push_redo(entry),
                }
                self.write_failed(err, target, label).await
            }
        }
    }

    /// Diff `desired` against the confirmed snapshot and submit it.
    async fn commit(
        &mut self,
        desired: TimelineSnapshot,
        label: String,
    ) -> Result<EditOutcome, SessionError> {
        self.preview = None;

        let operations = diff(&self.confirmed, &desired);
        if operations.is_empty() {
            self.publish();
            return Ok(EditOutcome::NoChange);
        }
        debug!("edit '{}': {} ops at version {}", label, operations.len(), self.version);

        let base = self.confirmed.clone();
        let base_version = self.version;
        match self.submit(operations.clone(), desired.clone()).await {
            Ok(batch) => {
                self.adopt(batch);
                self.history
                    .record(HistoryEntry::new(base, self.confirmed.clone(), label));
                self.publish();
                Ok(EditOutcome::Applied {
                    version: self.version,
                })
            }
            Err(ApplyError::Transport(err)) => {
                warn!("edit '{}' not delivered, keeping it pending: {}", label, err);
                self.pending = Some(PendingEdit {
                    base_version,
                    operations,
                    label,
                });
                self.publish();
                Err(SessionError::Transport(err))
            }
            Err(err) => self.write_failed(err, desired, label).await,
        }
    }

    /// Move a history entry to the opposite stack.
    fn settle(&mut self, step: Step, entry: HistoryEntry) {
        match step {
            Step::Undo => self.history.push_redo(entry),
            Step::Redo => self.history.push_undo(entry),
        }
    }

    fn ensure_writable(&self) -> Result<(), SessionError> {
        if let Some(record) = self.state.conflict() {
            return Err(SessionError::ConflictUnresolved {
                server_version: record.server_version,
            });
        }
        if self.in_flight {
            return Err(SessionError::WriteInFlight);
        }
        Ok(())
    }

    /// Publish `optimistic`, then submit under the confirmed version.
    async fn submit(
        &mut self,
        operations: Vec<Operation>,
        optimistic: TimelineSnapshot,
    ) -> Result<AppliedBatch, ApplyError> {
        self.in_flight = true;
        self.publish_snapshot(optimistic);
        let result = self.client.apply(self.version, operations).await;
        self.in_flight = false;
        result
    }

    fn adopt(&mut self, batch: AppliedBatch) {
        self.confirmed = batch.timeline;
        self.version = batch.version;
    }

    /// Handle a write that did not land (transport failures of edits are
    /// handled by the caller).
    async fn write_failed(
        &mut self,
        err: ApplyError,
        local: TimelineSnapshot,
        label: String,
    ) -> Result<EditOutcome, SessionError> {
        match err {
            ApplyError::Conflict { server_version } => {
                warn!(
                    "{}: conflict at local version {}, server at {}",
                    self.key(),
                    self.version,
                    server_version
                );
                self.state = SyncState::Conflict(ConflictRecord::new(
                    self.confirmed.clone(),
                    local,
                    label,
                    server_version,
                ));
                self.publish();
                Ok(EditOutcome::Conflict { server_version })
            }
            other => {
                let err = self.rejected(other).await;
                self.publish();
                Err(err)
            }
        }
    }

    /// Turn a failed write into a session error.
    ///
    /// An unexpected version means the server applied the batch somewhere we
    /// did not predict, so the canonical state is refetched.
    async fn rejected(&mut self, err: ApplyError) -> SessionError {
        if let ApplyError::ProtocolViolation { expected, got } = err {
            warn!(
                "{}: expected version {}, server answered {}; resyncing",
                self.key(),
                expected,
                got
            );
            if let Err(e) = self.resync().await {
                warn!("{}: resync failed: {}", self.key(), e);
            }
        }
        Self::session_error(err)
    }

    fn session_error(err: ApplyError) -> SessionError {
        match err {
            ApplyError::Conflict { server_version } => {
                SessionError::ConflictUnresolved { server_version }
            }
            ApplyError::Transport(e) => SessionError::Transport(e),
            ApplyError::Rejected(e) => SessionError::Rejected(e),
            ApplyError::ProtocolViolation { expected, got } => {
                SessionError::ProtocolViolation { expected, got }
            }
        }
    }

    fn view(&self, snapshot: TimelineSnapshot) -> SessionView {
        SessionView {
            snapshot,
            version: self.version,
            in_conflict: self.state.is_conflict(),
            previewing: self.preview.is_some(),
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
            has_pending: self.pending.is_some(),
        }
    }

    fn publish(&self) {
        self.publish_snapshot(self.snapshot().clone());
    }

    fn publish_snapshot(&self, snapshot: TimelineSnapshot) {
        self.view_tx.send_replace(self.view(snapshot));
    }
}
