use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use reqwest::Url;
use store::{FileTier, MemoryTier, RedisTier, StorageTier, TierKind, TieredStore};
use tokio::{sync::broadcast, task};
use tracing::{debug, error, info, warn};

use crate::{
    binder::{Binder, UiSurfaceBinding},
    config::Config,
    dom::Document,
    engine::{Commit, Reconciler, Transition},
    error::BridgeError,
    events::{EventBus, SessionEvent},
    models::{OracleResult, SessionFact},
    oracle::{HttpTransport, OracleClient, OracleTransport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Another check was in flight; this one never started.
    Skipped,
    Unchanged,
    Applied(Transition),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    Confirmed,
    /// The authority could not be reached. Local state is untouched and the
    /// caller should send the visitor to this URL instead.
    Navigate(Url),
}

/// Copy of the engine state as of its last run, readable without waiting on storage.
struct Snapshot {
    fact: SessionFact,
    tiers: Vec<TierKind>,
}

/// Everything one page (one process) needs, built once at entry.
///
/// Storage tiers do blocking IO, so the engine only ever runs on the blocking
/// pool. Everything async reads the snapshot instead.
pub struct SyncContext {
    config: Config,
    oracle: OracleClient,
    engine: Arc<Mutex<Reconciler>>,
    snapshot: Mutex<Snapshot>,
    binder: Mutex<Binder>,
    events: EventBus,
    flight: tokio::sync::Mutex<()>,
    sequence: AtomicU64,
    primary_url: Url,
    login_url: Url,
    logout_url: Url,
}

impl SyncContext {
    pub fn from_config(config: Config, document: Box<dyn Document>) -> Result<Arc<Self>, BridgeError> {
        let primary = parse_url(&config.primary_url)?;
        let transport = HttpTransport::new(
            config.request_timeout,
            &primary,
            config.session_cookie.as_deref(),
        )?;
        let store = build_store(&config);

        Self::new(config, Arc::new(transport), store, document)
    }

    pub fn new(
        config: Config,
        transport: Arc<dyn OracleTransport>,
        store: TieredStore,
        document: Box<dyn Document>,
    ) -> Result<Arc<Self>, BridgeError> {
        let primary_url = parse_url(&config.primary_url)?;
        let legacy_url = parse_url(&config.legacy_url)?;
        let login_url = parse_url(&config.login_url)?;
        let logout_url = parse_url(&config.logout_url)?;

        let oracle = OracleClient::new(
            transport,
            primary_url.clone(),
            legacy_url,
            logout_url.clone(),
        );

        let login_href = redirect_target(&login_url, config.return_url.as_deref());
        let binder = Binder::with_selectors(document, login_href.as_str(), &config.selectors);

        let tiers = store.usable_tiers();
        info!("Session bridge storage tiers: {tiers:?}");

        Ok(Arc::new(Self {
            config,
            oracle,
            engine: Arc::new(Mutex::new(Reconciler::new(store))),
            snapshot: Mutex::new(Snapshot {
                fact: SessionFact::default(),
                tiers,
            }),
            binder: Mutex::new(binder),
            events: EventBus::new(),
            flight: tokio::sync::Mutex::new(()),
            sequence: AtomicU64::new(0),
            primary_url,
            login_url,
            logout_url,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hosts whose pages count as "the remote authority" for return detection.
    pub fn authorities(&self) -> [&Url; 3] {
        [&self.login_url, &self.logout_url, &self.primary_url]
    }

    pub fn fact(&self) -> SessionFact {
        self.snapshot().fact.clone()
    }

    pub fn usable_tiers(&self) -> Vec<TierKind> {
        self.snapshot().tiers.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn register(&self, binding: UiSurfaceBinding) {
        self.binder().register(binding);
    }

    pub fn apply_current_fact(&self) {
        let fact = self.fact();
        self.binder().apply_current_fact(&fact);
    }

    /// Startup fast path: show the cached user, if any, before the network
    /// answers. Returns whether a cached user was found.
    pub async fn seed_from_cache(&self) -> bool {
        let Ok(_flight) = self.flight.try_lock() else {
            return false;
        };

        let commit = self
            .with_engine(Reconciler::seed_from_cache)
            .await
            .flatten();

        match commit {
            Some(commit) => {
                self.notify(commit);
                true
            }
            None => {
                self.apply_current_fact();
                false
            }
        }
    }

    /// One oracle round trip. At most one runs at a time; a call made while
    /// another is in flight is dropped, not queued.
    pub async fn check_now(&self) -> CheckOutcome {
        let Ok(_flight) = self.flight.try_lock() else {
            debug!("Session check already in flight, skipping");
            return CheckOutcome::Skipped;
        };

        let seq = self.next_seq();
        let result = self.oracle.check().await;

        self.apply(seq, result).await
    }

    /// Logout is confirmed by the authority before local state is cleared.
    pub async fn logout(&self) -> LogoutOutcome {
        let _flight = self.flight.lock().await;

        match self.oracle.logout().await {
            Ok(()) => {
                let seq = self.next_seq();
                self.apply(seq, OracleResult::Unauthenticated).await;
                LogoutOutcome::Confirmed
            }
            Err(e) => {
                warn!("Remote logout failed, falling back to navigation: {e}");
                LogoutOutcome::Navigate(self.logout_url.clone())
            }
        }
    }

    /// Where a login control should send the visitor. `return_to` is passed
    /// along only if it is an absolute http(s) URL.
    pub fn login_target(&self, return_to: Option<&str>) -> Url {
        redirect_target(&self.login_url, return_to)
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn apply(&self, seq: u64, result: OracleResult) -> CheckOutcome {
        let commit = self
            .with_engine(move |engine| engine.reconcile(seq, result))
            .await
            .flatten();

        match commit {
            Some(commit) => {
                let transition = commit.transition();
                self.notify(commit);
                CheckOutcome::Applied(transition)
            }
            None => CheckOutcome::Unchanged,
        }
    }

    /// Runs `op` against the engine on the blocking pool and refreshes the
    /// snapshot from the result. `None` only if the task itself died.
    async fn with_engine<T, F>(&self, op: F) -> Option<T>
    where
        F: FnOnce(&mut Reconciler) -> T + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);

        let joined = task::spawn_blocking(move || {
            let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
            let output = op(&mut engine);
            let snapshot = Snapshot {
                fact: engine.fact().clone(),
                tiers: engine.usable_tiers(),
            };
            (output, snapshot)
        })
        .await;

        match joined {
            Ok((output, snapshot)) => {
                *self.snapshot() = snapshot;
                Some(output)
            }
            Err(e) => {
                error!("Session storage task failed: {e}");
                None
            }
        }
    }

    /// Second phase. Only reachable with a [`Commit`], i.e. after persistence.
    fn notify(&self, commit: Commit) {
        self.binder().apply_current_fact(commit.fact());

        for event in SessionEvent::for_commit(&commit) {
            self.events.publish(event);
        }
    }

    fn snapshot(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn binder(&self) -> MutexGuard<'_, Binder> {
        self.binder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn redirect_target(login_url: &Url, return_to: Option<&str>) -> Url {
    let mut target = login_url.clone();

    let return_to = return_to
        .and_then(|raw| Url::parse(raw).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"));

    if let Some(return_to) = return_to {
        target
            .query_pairs_mut()
            .append_pair("redirect", return_to.as_str());
    }

    target
}

fn parse_url(raw: &str) -> Result<Url, BridgeError> {
    Url::parse(raw).map_err(|e| BridgeError::InvalidEndpoint {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

fn build_store(config: &Config) -> TieredStore {
    let mut tiers: Vec<Box<dyn StorageTier>> = vec![Box::new(FileTier::new(&config.cache_path))];

    if let Some(redis_url) = &config.redis_url {
        match RedisTier::connect(redis_url, &config.session_namespace, config.session_ttl) {
            Ok(tier) => tiers.push(Box::new(tier)),
            Err(e) => warn!("Session tier unavailable: {e}"),
        }
    }

    tiers.push(Box::new(MemoryTier::default()));

    TieredStore::new(tiers)
}
