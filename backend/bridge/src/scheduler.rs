//! Decides when [`SyncContext::check_now`] runs: once at startup, once more when
//! the page was reached straight from the remote authority, then on a fixed
//! interval or on demand. Checks never overlap; ticks that arrive while a check
//! is running are skipped, and on-demand triggers collapse into one.
use std::{sync::Arc, time::Duration};

use reqwest::Url;
use tokio::{
    sync::{Notify, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use crate::state::SyncContext;

/// Query markers the authority appends when it sends the visitor back.
const RETURN_MARKERS: [(&str, Option<&str>); 4] = [
    ("auth_return", None),
    ("login", Some("success")),
    ("logout", Some("success")),
    ("sso", Some("1")),
];

/// How the page was reached.
#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    pub location: Option<Url>,
    pub referrer: Option<Url>,
}

impl LaunchContext {
    pub fn new(location: Option<Url>, referrer: Option<Url>) -> Self {
        Self { location, referrer }
    }

    pub fn is_returning_from(&self, authorities: &[&Url]) -> bool {
        let from_referrer = self.referrer.as_ref().is_some_and(|referrer| {
            authorities.iter().any(|authority| {
                referrer.origin() == authority.origin()
                    && referrer.path().starts_with(authority.path())
            })
        });

        let from_query = self.location.as_ref().is_some_and(|location| {
            location.query_pairs().any(|(key, value)| {
                RETURN_MARKERS.iter().any(|(name, expected)| {
                    key == *name && expected.is_none_or(|expected| value == expected)
                })
            })
        });

        from_referrer || from_query
    }
}

pub struct Scheduler {
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn start(ctx: Arc<SyncContext>, interval: Duration, launch: LaunchContext) -> Self {
        let trigger = Arc::new(Notify::new());
        let (shutdown, stop) = watch::channel(false);

        let handle = tokio::spawn(run(ctx, interval, launch, trigger.clone(), stop));

        Self {
            trigger,
            shutdown,
            handle,
        }
    }

    /// Ask for a check without waiting for the next tick.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Lets an in-flight check finish, then ends the loop.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);

        if let Err(e) = self.handle.await {
            warn!("Scheduler task ended abnormally: {e}");
        }
    }
}

async fn run(
    ctx: Arc<SyncContext>,
    interval: Duration,
    launch: LaunchContext,
    trigger: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) {
    if ctx.config().check_on_load {
        let outcome = ctx.check_now().await;
        debug!("Initial session check: {outcome:?}");
    }

    if launch.is_returning_from(&ctx.authorities()) {
        info!("Returning from the authority, checking session again");
        ctx.check_now().await;
    }

    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = trigger.notified() => debug!("Session check requested"),
            _ = stop.changed() => break,
        }

        let outcome = ctx.check_now().await;
        debug!("Session check: {outcome:?}");
    }

    info!("Session scheduler stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use store::TieredStore;

    use super::*;
    use crate::{
        config::Config,
        dom::VirtualDocument,
        oracle::scripted::{Reply, ScriptedTransport},
    };

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn context(transport: Arc<ScriptedTransport>, check_on_load: bool) -> Arc<SyncContext> {
        let config = Config {
            check_on_load,
            ..Config::default()
        };

        SyncContext::new(
            config,
            transport,
            TieredStore::new(Vec::new()),
            Box::new(Arc::new(Mutex::new(VirtualDocument::new()))),
        )
        .unwrap()
    }

    async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        done()
    }

    #[test]
    fn test_return_by_referrer() {
        let login = url("https://auth.test/login");
        let session = url("https://auth.test/api/auth/session");
        let authorities = [&login, &session];

        let launch = LaunchContext::new(None, Some(url("https://auth.test/login?step=2")));
        assert!(launch.is_returning_from(&authorities));

        let launch = LaunchContext::new(None, Some(url("https://auth.test/blog/post")));
        assert!(!launch.is_returning_from(&authorities));

        let launch = LaunchContext::new(None, Some(url("https://elsewhere.test/login")));
        assert!(!launch.is_returning_from(&authorities));

        assert!(!LaunchContext::default().is_returning_from(&authorities));
    }

    #[test]
    fn test_return_by_query_marker() {
        let login = url("https://auth.test/login");
        let authorities = [&login];

        for location in [
            "https://shop.test/?auth_return",
            "https://shop.test/?login=success",
            "https://shop.test/cart?x=1&logout=success",
            "https://shop.test/?sso=1",
        ] {
            let launch = LaunchContext::new(Some(url(location)), None);
            assert!(launch.is_returning_from(&authorities), "{location}");
        }

        for location in ["https://shop.test/?login=failed", "https://shop.test/?sso=0"] {
            let launch = LaunchContext::new(Some(url(location)), None);
            assert!(!launch.is_returning_from(&authorities), "{location}");
        }
    }

    #[tokio::test]
    async fn test_checks_on_start() {
        let transport = Arc::new(ScriptedTransport::new(vec![Reply::Json(json!({
            "authenticated": true,
            "user": { "id": 1, "name": "Ada" }
        }))]));
        let ctx = context(transport.clone(), true);

        let scheduler = Scheduler::start(ctx.clone(), Duration::from_secs(3600), LaunchContext::default());

        assert!(wait_for(|| ctx.fact().is_authenticated()).await);
        scheduler.stop().await;

        assert_eq!(transport.calls(), vec!["/api/auth/session"]);
    }

    #[tokio::test]
    async fn test_no_check_on_start_when_disabled() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let ctx = context(transport.clone(), false);

        let scheduler = Scheduler::start(ctx, Duration::from_secs(3600), LaunchContext::default());
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;

        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_extra_check_when_returning() {
        // Exhausted script: every check hits both endpoints
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let ctx = context(transport.clone(), true);
        let launch = LaunchContext::new(Some(url("https://shop.test/?login=success")), None);

        let scheduler = Scheduler::start(ctx, Duration::from_secs(3600), launch);

        assert!(wait_for(|| transport.calls().len() == 4).await);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_trigger_now() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let ctx = context(transport.clone(), false);

        let scheduler = Scheduler::start(ctx, Duration::from_secs(3600), LaunchContext::default());
        scheduler.trigger_now();

        assert!(wait_for(|| transport.calls().len() == 2).await);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_interval_never_overlaps() {
        let transport = Arc::new(ScriptedTransport::with_delay(
            Vec::new(),
            Duration::from_millis(40),
        ));
        let ctx = context(transport.clone(), true);

        let scheduler = Scheduler::start(ctx.clone(), Duration::from_millis(10), LaunchContext::default());
        for _ in 0..10 {
            scheduler.trigger_now();
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        scheduler.stop().await;

        assert!(transport.calls().len() >= 2);
        assert_eq!(transport.max_in_flight(), 1);
    }
}
