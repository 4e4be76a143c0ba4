//! Session registry keyed by [`SessionId`].
//!
//! Sessions are created on first reference and removed once they have been
//! closed for [`SessionOptions::disconnect_delay`], so a late request for a
//! closed session is still answered with its close frame.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                 Registry                 │
//! │  ┌────────────────────────────────────┐  │
//! │  │ "a1b2" → Session (active)          │  │
//! │  │ "c3d4" → Session (opening)         │  │
//! │  │ "e5f6" → Session (closed, linger)  │  │
//! │  └────────────────────────────────────┘  │
//! │  accept() ◄── each new session once      │
//! └──────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::Result;
use crate::identifiers::SessionId;
use crate::options::SessionOptions;
use crate::protocol::{GO_AWAY_CODE, GO_AWAY_REASON};

use super::core::Session;

// ============================================================================
// Registry
// ============================================================================

/// Owns every live session.
///
/// Thread-safe; share it as `Arc<Registry>`.
///
/// # Example
///
/// ```no_run
/// use sockjs_session::{Registry, SessionOptions};
///
/// # async fn run() -> sockjs_session::Result<()> {
/// let registry = Registry::new(SessionOptions::new())?;
///
/// while let Some(session) = registry.accept().await {
///     tokio::spawn(async move {
///         while let Some(message) = session.recv().await {
///             let _ = session.enqueue_message(message);
///         }
///     });
/// }
/// # Ok(())
/// # }
/// ```
pub struct Registry {
    options: Arc<SessionOptions>,

    /// Sessions by id.
    sessions: Mutex<FxHashMap<SessionId, Arc<Session>>>,

    /// Feeds [`accept`](Self::accept). Created by the first `accept` call,
    /// taken on shutdown.
    accept_tx: Mutex<Option<mpsc::UnboundedSender<Arc<Session>>>>,
    /// Receiving half between its creation and the first poll of `accept`.
    staged_rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<Session>>>>,
    accept_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<Arc<Session>>>>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

// ============================================================================
// Registry - Constructor
// ============================================================================

impl Registry {
    /// Creates an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `options` fail
    /// validation.
    pub fn new(options: SessionOptions) -> Result<Arc<Self>> {
        options.validate()?;
        Ok(Self::build(options))
    }

    /// Creates an empty registry with default options.
    #[must_use]
    pub fn with_defaults() -> Arc<Self> {
        Self::build(SessionOptions::default())
    }

    fn build(options: SessionOptions) -> Arc<Self> {
        Arc::new(Self {
            options: Arc::new(options),
            sessions: Mutex::new(FxHashMap::default()),
            accept_tx: Mutex::new(None),
            staged_rx: Mutex::new(None),
            accept_rx: AsyncMutex::new(None),
            shutdown: AtomicBool::new(false),
        })
    }
}

// ============================================================================
// Registry - Public API
// ============================================================================

impl Registry {
    /// Returns the options new sessions are created with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Returns the number of registered sessions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns `true` if no session is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Returns the ids of all registered sessions.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Looks up a session.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    /// Returns the session named `id`, creating it if needed.
    ///
    /// The flag is `true` when the session was created by this call. After
    /// [`shutdown`](Self::shutdown) a fresh, already closed session is
    /// returned and nothing is registered.
    pub fn get_or_create(self: &Arc<Self>, id: &SessionId) -> (Arc<Session>, bool) {
        let session = {
            let mut sessions = self.sessions.lock();
            if let Some(existing) = sessions.get(id) {
                return (Arc::clone(existing), false);
            }
            if self.shutdown.load(Ordering::SeqCst) {
                drop(sessions);
                let session = Session::new(id.clone(), Arc::clone(&self.options));
                session.close(GO_AWAY_CODE, GO_AWAY_REASON);
                return (session, false);
            }
            let session = Session::new(id.clone(), Arc::clone(&self.options));
            sessions.insert(id.clone(), Arc::clone(&session));
            session
        };

        info!(session_id = %id, "Session registered");

        if let Some(accept_tx) = self.accept_tx.lock().as_ref() {
            let _ = accept_tx.send(Arc::clone(&session));
        }
        self.watch_session(&session);

        (session, true)
    }

    /// Waits for the next newly created session.
    ///
    /// Each session is yielded once. Notification starts with the first
    /// call: sessions created before it are never queued, so a registry
    /// whose owner never accepts holds no extra references. Returns `None`
    /// after [`shutdown`](Self::shutdown) once pending sessions are drained.
    pub fn accept(&self) -> impl Future<Output = Option<Arc<Session>>> + Send + '_ {
        self.listen();

        async move {
            let mut accept_rx = self.accept_rx.lock().await;
            if accept_rx.is_none() {
                *accept_rx = self.staged_rx.lock().take();
            }
            accept_rx.as_mut()?.recv().await
        }
    }
}

// ============================================================================
// Registry - Lifecycle
// ============================================================================

impl Registry {
    /// Opens the accept channel on first use.
    fn listen(&self) {
        let mut accept_tx = self.accept_tx.lock();
        if accept_tx.is_some() || self.shutdown.load(Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *accept_tx = Some(tx);
        *self.staged_rx.lock() = Some(rx);
        debug!("Accepting new sessions");
    }

    /// Removes a session, closing it with the generic pair if still open.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.lock().remove(id);

        if let Some(session) = &removed {
            session.close(GO_AWAY_CODE, GO_AWAY_REASON);
            debug!(session_id = %id, "Session removed from registry");
        }
        removed
    }

    /// Closes every session and stops [`accept`](Self::accept).
    pub fn shutdown(&self) {
        info!("Registry shutting down");

        self.shutdown.store(true, Ordering::SeqCst);
        drop(self.accept_tx.lock().take());

        let sessions: Vec<_> = {
            let mut map = self.sessions.lock();
            map.drain().collect()
        };

        for (session_id, session) in sessions {
            session.close(GO_AWAY_CODE, GO_AWAY_REASON);
            debug!(session_id = %session_id, "Session closed during shutdown");
        }

        info!("Registry shutdown complete");
    }

    /// Drops the entry once `session` has been closed for the linger time.
    fn watch_session(self: &Arc<Self>, session: &Arc<Session>) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        let registry = Arc::downgrade(self);
        let session = Arc::clone(session);
        let linger = self.options.disconnect_delay;

        handle.spawn(async move {
            session.closed().await;
            sleep(linger).await;

            if let Some(registry) = registry.upgrade() {
                registry.evict(&session);
            }
        });
    }

    fn evict(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.lock();
        let current = sessions.get(session.id());

        if current.is_some_and(|current| Arc::ptr_eq(current, session)) {
            sessions.remove(session.id());
            debug!(session_id = %session.id(), "Closed session evicted");
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &self.len())
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
