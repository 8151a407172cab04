use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use bridge::{
    config::Config,
    dom::{Document, Element, VirtualDocument},
    scheduler::LaunchContext,
    start_bridge,
    state::{LogoutOutcome, SyncContext},
    utils::display_name_or_default,
};
use clap::Parser;
use reqwest::Url;
use tracing::info;

/// Mirrors a remote login session into a local page model.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Run a single session check and exit.
    #[arg(long)]
    once: bool,

    /// Log out through the authority and exit.
    #[arg(long, conflicts_with = "once")]
    logout: bool,

    /// Address of the page being synced. Query markers such as `login=success` trigger an extra check.
    #[arg(long)]
    location: Option<Url>,

    /// Page the visitor came from.
    #[arg(long)]
    referrer: Option<Url>,

    /// Overrides BRIDGE_POLL_MS.
    #[arg(long)]
    interval_ms: Option<u64>,
}

type Page = Arc<Mutex<VirtualDocument>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bridge::init_tracing();
    let args = Args::parse();

    let mut config = Config::load();
    if let Some(ms) = args.interval_ms.filter(|ms| *ms > 0) {
        config.poll_interval = Duration::from_millis(ms);
    }
    if config.return_url.is_none() {
        config.return_url = args.location.as_ref().map(Url::to_string);
    }

    let page: Page = Arc::new(Mutex::new(starter_page()));

    let ctx = if args.once || args.logout {
        let ctx = SyncContext::from_config(config, Box::new(page.clone()))
            .context("Failed to initialize session bridge")?;
        ctx.seed_from_cache().await;

        if args.logout {
            match ctx.logout().await {
                LogoutOutcome::Confirmed => info!("Logged out"),
                LogoutOutcome::Navigate(url) => println!("Authority unreachable, open {url} to log out"),
            }
        } else {
            let outcome = ctx.check_now().await;
            info!("Session check: {outcome:?}");
        }

        ctx
    } else {
        let launch = LaunchContext::new(args.location, args.referrer);

        start_bridge(config, Box::new(page.clone()), launch)
            .await
            .context("Session bridge failed")?
    };

    summarize(&ctx, &page);

    Ok(())
}

/// The markup the default selectors expect.
fn starter_page() -> VirtualDocument {
    let mut page = VirtualDocument::new();

    page.insert(Element::new("button").with_id("loginBtn"));
    page.insert(Element::new("button").with_id("logoutBtn").hidden());
    let profile = page.insert(Element::new("div").with_id("userProfile").hidden());

    let mut name = Element::new("span").with_class("user-name");
    name.parent = Some(profile);
    page.insert(name);

    let mut avatar = Element::new("img").with_class("user-avatar");
    avatar.parent = Some(profile);
    page.insert(avatar);

    page
}

fn summarize(ctx: &SyncContext, page: &Page) {
    let fact = ctx.fact();

    match fact.user() {
        Some(user) => println!(
            "Signed in as {} ({}), as of {}",
            display_name_or_default(user.display_name.as_deref()),
            user.id,
            fact.observed_at()
        ),
        None => {
            println!("Signed out, as of {}", fact.observed_at());
            println!("Log in at {}", ctx.login_target(ctx.config().return_url.as_deref()));
        }
    }

    let page = page.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    for node in page.query_all(".user-name") {
        if let Some(element) = page.get(node) {
            println!("Rendered name: {:?}", element.text);
        }
    }

    println!("Storage tiers in use: {:?}", ctx.usable_tiers());
}
