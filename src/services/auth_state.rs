//! Client auth state tracker
//!
//! Mirrors the identity provider's sign-in state into an observable
//! `{ user, credential, loading }` snapshot and keeps the server session
//! cookie fresh:
//! - on sign-in the credential is force-refreshed and pushed to the session
//!   endpoint, and a refresh timer is started;
//! - on sign-out the credential is dropped, the cookie expired and the timer
//!   cancelled;
//! - a startup grace period forces `loading` off even if the provider never
//!   reports a state.
//!
//! Every timer is an owned task. Dropping the tracker aborts all of them, so
//! nothing fires after unmount.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ClientConfig;

/// A user as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUser {
    pub uid: String,
    pub email: Option<String>,
}

/// Observable auth state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub user: Option<ProviderUser>,
    pub credential: Option<String>,
    pub loading: bool,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            user: None,
            credential: None,
            loading: true,
        }
    }
}

/// Client side of the identity provider
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Sign-in state changes, starting with the current state
    fn auth_state_changes(&self) -> BoxStream<'static, Option<ProviderUser>>;

    /// Credential for the signed-in user; `force_refresh` mints a new one
    async fn id_token(&self, force_refresh: bool) -> anyhow::Result<String>;
}

/// Where fresh credentials are pushed (the cookie-set endpoint)
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn set_session(&self, credential: &str) -> anyhow::Result<()>;
    async fn clear_session(&self) -> anyhow::Result<()>;
}

/// Timer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerTimings {
    /// Proactive refresh period; must be shorter than the credential lifetime
    pub refresh_interval: Duration,
    /// Startup grace before `loading` is forced off
    pub loading_grace: Duration,
}

impl Default for TrackerTimings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(50 * 60),
            loading_grace: Duration::from_secs(3),
        }
    }
}

impl From<&ClientConfig> for TrackerTimings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            refresh_interval: Duration::from_secs(config.refresh_interval_secs.max(1)),
            loading_grace: Duration::from_secs(config.loading_grace_secs),
        }
    }
}

/// Resets the in-flight flag even if the refresh task is aborted
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared {
    client: Arc<dyn IdentityClient>,
    sink: Arc<dyn SessionSink>,
    state: watch::Sender<AuthSnapshot>,
    timings: TrackerTimings,
    mounted: AtomicBool,
    refreshing: AtomicBool,
    /// Bumped on every sign-out; refreshes that straddle one are dropped
    sign_outs: AtomicU64,
    /// Orders session pushes against clears
    pushes: tokio::sync::Mutex<()>,
    refresh_timer: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn publish(&self, update: impl FnOnce(&mut AuthSnapshot)) {
        if self.mounted.load(Ordering::Acquire) {
            self.state.send_modify(update);
        }
    }

    async fn on_sign_in(self: &Arc<Self>, user: ProviderUser) {
        tracing::info!(uid = %user.uid, "Signed in");
        self.publish(|s| {
            s.user = Some(user);
            s.loading = false;
        });
        self.refresh_credential().await;
        self.start_refresh_timer();
    }

    async fn on_sign_out(&self) {
        tracing::info!("Signed out");
        self.sign_outs.fetch_add(1, Ordering::AcqRel);
        self.stop_refresh_timer();
        self.publish(|s| {
            s.user = None;
            s.credential = None;
            s.loading = false;
        });
        let _push = self.pushes.lock().await;
        if let Err(e) = self.sink.clear_session().await {
            tracing::error!("Failed to clear session cookie: {:#}", e);
        }
    }

    /// Mint a fresh credential and push it to the session sink.
    ///
    /// Returns false when another refresh is already in flight or this one
    /// failed; failures are retried on the next timer tick.
    async fn refresh_credential(&self) -> bool {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            tracing::debug!("Credential refresh already in flight");
            return false;
        }
        let _guard = RefreshGuard(&self.refreshing);
        let sign_outs = self.sign_outs.load(Ordering::Acquire);

        let token = match self.client.id_token(true).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!("Credential refresh failed: {:#}", e);
                return false;
            }
        };

        // A clear queued behind this push always lands after it.
        let _push = self.pushes.lock().await;
        if self.sign_outs.load(Ordering::Acquire) != sign_outs {
            tracing::debug!("Discarding credential minted across a sign-out");
            return false;
        }

        let pushed = match self.sink.set_session(&token).await {
            Ok(()) => {
                tracing::debug!("Session cookie refreshed");
                true
            }
            Err(e) => {
                tracing::error!("Failed to push credential to session endpoint: {:#}", e);
                false
            }
        };

        if !self.publish_credential(token, sign_outs) {
            tracing::debug!("Signed out while the credential was being pushed");
            return false;
        }
        pushed
    }

    /// Publish `token` unless a sign-out happened since `sign_outs` was read
    fn publish_credential(&self, token: String, sign_outs: u64) -> bool {
        if !self.mounted.load(Ordering::Acquire) {
            return false;
        }
        self.state.send_if_modified(|s| {
            if self.sign_outs.load(Ordering::Acquire) != sign_outs {
                return false;
            }
            s.credential = Some(token);
            true
        })
    }

    fn start_refresh_timer(self: &Arc<Self>) {
        if !self.mounted.load(Ordering::Acquire) {
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.timings.refresh_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                shared.refresh_credential().await;
            }
        });

        let previous = self
            .refresh_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_refresh_timer(&self) {
        let handle = self
            .refresh_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Tracks the provider's auth state for the lifetime of the value
///
/// Must be mounted inside a tokio runtime.
pub struct AuthStateTracker {
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
    grace: JoinHandle<()>,
}

impl AuthStateTracker {
    /// Subscribe to the provider and start the loading grace timer
    pub fn mount(
        client: Arc<dyn IdentityClient>,
        sink: Arc<dyn SessionSink>,
        timings: TrackerTimings,
    ) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::default());
        let mut changes = client.auth_state_changes();

        let shared = Arc::new(Shared {
            client,
            sink,
            state,
            timings,
            mounted: AtomicBool::new(true),
            refreshing: AtomicBool::new(false),
            sign_outs: AtomicU64::new(0),
            pushes: tokio::sync::Mutex::new(()),
            refresh_timer: Mutex::new(None),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let listener = tokio::spawn(async move {
            while let Some(user) = changes.next().await {
                let Some(shared) = weak.upgrade() else { break };
                match user {
                    Some(user) => shared.on_sign_in(user).await,
                    None => shared.on_sign_out().await,
                }
            }
            tracing::debug!("Auth state stream ended");
        });

        let weak = Arc::downgrade(&shared);
        let grace_period = timings.loading_grace;
        let grace = tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            if let Some(shared) = weak.upgrade() {
                shared.publish(|s| s.loading = false);
            }
        });

        Self {
            shared,
            listener,
            grace,
        }
    }

    /// Watch the auth state
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.shared.state.subscribe()
    }

    /// Current auth state
    pub fn snapshot(&self) -> AuthSnapshot {
        self.shared.state.borrow().clone()
    }

    /// Refresh the credential now; coalesces with any refresh in flight
    pub async fn refresh_now(&self) -> bool {
        self.shared.refresh_credential().await
    }

    /// Stop tracking; equivalent to dropping the tracker
    pub fn unmount(self) {}
}

impl Drop for AuthStateTracker {
    fn drop(&mut self) {
        self.shared.mounted.store(false, Ordering::Release);
        self.listener.abort();
        self.grace.abort();
        self.shared.stop_refresh_timer();
    }
}
