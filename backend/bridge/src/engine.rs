//! # Reconciliation
//!
//! Owns the [`SessionFact`] and decides, for every oracle answer, whether a
//! real transition happened.
//!
//! | Current     | Incoming              | Result                               |
//! |-------------|-----------------------|--------------------------------------|
//! | LoggedOut   | Unauthenticated       | nothing                              |
//! | LoggedOut   | Authenticated(u)      | persist u, `Login`                   |
//! | LoggedIn(u) | Authenticated(u)      | nothing, or persist + re-render (`Refreshed`, no event) if profile fields changed |
//! | LoggedIn(u) | Authenticated(v)      | persist v, `Switched`                |
//! | LoggedIn(u) | Unauthenticated       | clear every tier, `Logout`           |
//! | any         | Unknown               | nothing, prior state kept            |
//!
//! Persistence always finishes before a [`Commit`] exists, and a commit is the
//! only thing the notifier accepts. Readers reacting to an event can therefore
//! read back what was just stored.
use store::{TOMBSTONE, TierKind, TieredStore};
use tracing::{debug, info, warn};

use crate::models::{LEGACY_USER_KEY, OracleResult, SessionFact, Source, USER_KEY, UserRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Seeded from local storage before the first remote answer.
    Provisional,
    Login,
    /// A different user replaced the signed-in one; treated as logout + login.
    Switched,
    /// Same user, changed profile fields. Rendered, but not announced.
    Refreshed,
    Logout,
}

/// Proof that a new fact has been persisted and may now be announced.
#[derive(Debug)]
pub struct Commit {
    fact: SessionFact,
    transition: Transition,
}

impl Commit {
    pub fn fact(&self) -> &SessionFact {
        &self.fact
    }

    pub fn transition(&self) -> Transition {
        self.transition
    }
}

pub struct Reconciler {
    fact: SessionFact,
    store: TieredStore,
    last_seq: u64,
}

impl Reconciler {
    pub fn new(store: TieredStore) -> Self {
        Self {
            fact: SessionFact::default(),
            store,
            last_seq: 0,
        }
    }

    pub fn fact(&self) -> &SessionFact {
        &self.fact
    }

    pub fn usable_tiers(&self) -> Vec<TierKind> {
        self.store.usable_tiers()
    }

    /// Startup fast path. Takes the highest-priority tier holding a plausible
    /// record, canonical key before legacy alias within a tier. A tombstone in
    /// any tier means a logout was not fully cleared, and nothing is seeded.
    ///
    /// Only applies before any remote answer has been reconciled.
    pub fn seed_from_cache(&mut self) -> Option<Commit> {
        if self.last_seq > 0 || self.fact.is_authenticated() {
            return None;
        }

        let mut cached: Vec<(TierKind, String)> = self.store.entries(USER_KEY);
        cached.extend(self.store.entries(LEGACY_USER_KEY));
        cached.sort_by_key(|(tier, _)| *tier);

        if let Some((tier, _)) = cached.iter().find(|(_, json)| json == TOMBSTONE) {
            info!("Cached session was cleared in {tier:?} tier, not seeding");
            return None;
        }

        let (tier, user) = cached
            .into_iter()
            .find_map(|(tier, json)| UserRecord::from_json(&json).map(|user| (tier, user)))?;

        info!("Seeded session for user {} from {tier:?} tier", user.id);
        self.fact = SessionFact::logged_in(user, Source::Cache);

        Some(self.commit(Transition::Provisional))
    }

    /// Applies oracle answer number `seq`. Answers not newer than the last
    /// applied one are dropped.
    pub fn reconcile(&mut self, seq: u64, result: OracleResult) -> Option<Commit> {
        if seq <= self.last_seq {
            debug!("Dropping stale oracle answer #{seq}, already applied #{}", self.last_seq);
            return None;
        }
        self.last_seq = seq;

        let current = self.fact.user().cloned();

        match (current, result) {
            (_, OracleResult::Unknown) => {
                debug!("Oracle answer unknown, keeping current state");
                None
            }
            (None, OracleResult::Unauthenticated) => {
                self.fact.observe(Source::Remote);
                None
            }
            (Some(previous), OracleResult::Unauthenticated) => {
                info!("User {} signed out", previous.id);
                self.clear();
                self.fact = SessionFact::logged_out(Source::Remote);
                Some(self.commit(Transition::Logout))
            }
            (None, OracleResult::Authenticated(user)) => {
                info!("User {} signed in", user.id);
                Some(self.replace(user, Transition::Login))
            }
            (Some(previous), OracleResult::Authenticated(user)) if previous.id == user.id => {
                if previous == user {
                    self.fact.observe(Source::Remote);
                    return None;
                }

                debug!("Profile of user {} changed", user.id);
                Some(self.replace(user, Transition::Refreshed))
            }
            (Some(previous), OracleResult::Authenticated(user)) => {
                info!("Session switched from user {} to {}", previous.id, user.id);
                Some(self.replace(user, Transition::Switched))
            }
        }
    }

    fn replace(&mut self, user: UserRecord, transition: Transition) -> Commit {
        self.persist(&user);
        self.fact = SessionFact::logged_in(user, Source::Remote);
        self.commit(transition)
    }

    fn persist(&mut self, user: &UserRecord) {
        let json = match user.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Could not serialize user {}: {e}", user.id);
                return;
            }
        };

        for key in [USER_KEY, LEGACY_USER_KEY] {
            if let Err(e) = self.store.set(key, &json) {
                warn!("Could not persist {key}: {e}");
            }
        }
    }

    fn clear(&mut self) {
        for key in [USER_KEY, LEGACY_USER_KEY] {
            if !self.store.remove(key) {
                warn!("Could not remove {key} everywhere, left tombstones");
            }
        }
    }

    fn commit(&self, transition: Transition) -> Commit {
        Commit {
            fact: self.fact.clone(),
            transition,
        }
    }
}
