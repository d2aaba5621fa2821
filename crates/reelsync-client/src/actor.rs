//! Actor that owns a [`SyncSession`] and serializes access to it.
//!
//! ```text
//!   SessionHandle (Clone)      mpsc      SessionActor (tokio task)
//!   ┌──────────────────┐   ────────▶   ┌──────────────────────────┐
//!   │ .edit()          │               │ SyncSession              │
//!   │ .undo()          │   ◀────────   │ one command at a time    │
//!   │ .poll_remote()   │    oneshot    │                          │
//!   └──────────────────┘               └──────────────────────────┘
//! ```
//!
//! Commands run to completion in arrival order, so at most one batch per
//! document is ever in flight. UI edits, undo, and the poll loop can all hold
//! handles without coordinating.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use reelsync_types::{TimelineSnapshot, Version};

use crate::conflict::Resolution;
use crate::session::{EditOutcome, PollOutcome, SessionError, SessionView, SyncSession};

// ============================================================================
// Commands (internal)
// ============================================================================

enum SessionCommand {
    Edit {
        desired: TimelineSnapshot,
        label: String,
        reply: oneshot::Sender<Result<EditOutcome, SessionError>>,
    },
    Preview {
        desired: TimelineSnapshot,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    CancelPreview,
    Undo {
        reply: oneshot::Sender<Result<EditOutcome, SessionError>>,
    },
    Redo {
        reply: oneshot::Sender<Result<EditOutcome, SessionError>>,
    },
    RetryPending {
        reply: oneshot::Sender<Result<EditOutcome, SessionError>>,
    },
    Resolve {
        resolution: Resolution,
        reply: oneshot::Sender<Result<EditOutcome, SessionError>>,
    },
    PollRemote {
        reply: oneshot::Sender<Result<PollOutcome, SessionError>>,
    },
    Resync {
        reply: oneshot::Sender<Result<Version, SessionError>>,
    },
}

// ============================================================================
// SessionHandle (public API)
// ============================================================================

/// Cloneable handle to a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
    view_rx: watch::Receiver<SessionView>,
}

/// Send a command and await its reply.
macro_rules! request {
    ($self:ident, $variant:ident { $($field:ident),* }) => {{
        let (reply, rx) = oneshot::channel();
        $self
            .tx
            .send(SessionCommand::$variant { $($field,)* reply })
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }};
}

impl SessionHandle {
    pub async fn edit(
        &self,
        desired: TimelineSnapshot,
        label: impl Into<String>,
    ) -> Result<EditOutcome, SessionError> {
        let label = label.into();
        request!(self, Edit { desired, label })
    }

    pub async fn preview(&self, desired: TimelineSnapshot) -> Result<(), SessionError> {
        request!(self, Preview { desired })
    }

    pub fn cancel_preview(&self) -> Result<(), SessionError> {
        self.tx
            .send(SessionCommand::CancelPreview)
            .map_err(|_| SessionError::Shutdown)
    }

    pub async fn undo(&self) -> Result<EditOutcome, SessionError> {
        request!(self, Undo {})
    }

    pub async fn redo(&self) -> Result<EditOutcome, SessionError> {
        request!(self, Redo {})
    }

    pub async fn retry_pending(&self) -> Result<EditOutcome, SessionError> {
        request!(self, RetryPending {})
    }

    pub async fn resolve(&self, resolution: Resolution) -> Result<EditOutcome, SessionError> {
        request!(self, Resolve { resolution })
    }

    pub async fn poll_remote(&self) -> Result<PollOutcome, SessionError> {
        request!(self, PollRemote {})
    }

    pub async fn resync(&self) -> Result<Version, SessionError> {
        request!(self, Resync {})
    }

    /// Latest published view.
    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    /// True once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// Actor loop
// ============================================================================

async fn run(mut session: SyncSession, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            SessionCommand::Edit {
                desired,
                label,
                reply,
            } => {
                let _ = reply.send(session.edit(desired, label).await);
            }
            SessionCommand::Preview { desired, reply } => {
                let _ = reply.send(session.preview(desired));
            }
            SessionCommand::CancelPreview => session.cancel_preview(),
            SessionCommand::Undo { reply } => {
                let _ = reply.send(session.undo().await);
            }
            SessionCommand::Redo { reply } => {
                let _ = reply.send(session.redo().await);
            }
            SessionCommand::RetryPending { reply } => {
                let _ = reply.send(session.retry_pending().await);
            }
            SessionCommand::Resolve { resolution, reply } => {
                let _ = reply.send(session.resolve(resolution).await);
            }
            SessionCommand::PollRemote { reply } => {
                let _ = reply.send(session.poll_remote().await);
            }
            SessionCommand::Resync { reply } => {
                let _ = reply.send(session.resync().await);
            }
        }
    }
    debug!("session actor for {} shutting down: channel closed", session.key());
}

/// Spawn an actor that owns `session`.
///
/// The actor stops when every handle has been dropped.
pub fn spawn_session(session: SyncSession) -> (SessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let view_rx = session.subscribe();
    let task = tokio::spawn(run(session, rx));
    (SessionHandle { tx, view_rx }, task)
}
