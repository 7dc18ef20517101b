//! Entitlement ledger: subscription checks, the free trial, and the per-day
//! and per-month image quotas for paid subscribers.
//!
//! Counter resets are lazy: stored day/month keys are compared against the
//! current date on every consumption, never by a background sweep. Every
//! read-modify-write of a record runs under a per-user async lock so
//! concurrent double-submits from one user cannot overshoot a ceiling.

use crate::models::{Config, QuotaDecision, UserEntitlement};
use crate::store::EntitlementStore;
use crate::Result;
use chrono::{DateTime, Duration, Local};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Numeric ceilings for trial and subscriber image quotas.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub free_trial: u32,
    pub image_daily_pro: u32,
    pub image_monthly_pro: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            free_trial: 5,
            image_daily_pro: 20,
            image_monthly_pro: 300,
        }
    }
}

pub struct Ledger {
    store: Arc<dyn EntitlementStore>,
    admin_ids: HashSet<i64>,
    limits: Limits,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

fn today_key(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d").to_string()
}

fn month_key(now: DateTime<Local>) -> String {
    now.format("%Y-%m").to_string()
}

impl Ledger {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        admin_ids: impl IntoIterator<Item = i64>,
        limits: Limits,
    ) -> Self {
        Self {
            store,
            admin_ids: admin_ids.into_iter().collect(),
            limits,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(store: Arc<dyn EntitlementStore>, config: &Config) -> Self {
        Self::new(
            store,
            config.admin_ids.iter().copied(),
            Limits {
                free_trial: config.free_trial_limit,
                image_daily_pro: config.image_daily_limit_pro,
                image_monthly_pro: config.image_monthly_limit_pro,
            },
        )
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Administrators bypass every quota check in this component.
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// User-facing denial shown when the free trial is exhausted.
    pub fn paywall_message(&self) -> String {
        format!(
            "Free trial exhausted ({} generations). Subscribe to continue.",
            self.limits.free_trial
        )
    }

    /// Lock entries are never evicted; the map is bounded by the number of
    /// distinct users seen by this process, matching the record store which
    /// also never deletes.
    fn user_lock(&self, user_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("ledger lock map poisoned");
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn load_or_default(&self, user_id: i64) -> Result<UserEntitlement> {
        Ok(self.store.load(user_id).await?.unwrap_or_default())
    }

    pub async fn has_active_subscription(&self, user_id: i64) -> Result<bool> {
        if self.is_admin(user_id) {
            return Ok(true);
        }
        let record = self.load_or_default(user_id).await?;
        Ok(matches!(record.subscription_end, Some(end) if Local::now() < end))
    }

    pub async fn subscription_end(&self, user_id: i64) -> Result<Option<DateTime<Local>>> {
        Ok(self.load_or_default(user_id).await?.subscription_end)
    }

    pub async fn free_trial_used(&self, user_id: i64) -> Result<u32> {
        Ok(self.load_or_default(user_id).await?.free_trial_used)
    }

    /// May this user make a generation request at all (subscription or
    /// remaining free trial)?
    pub async fn can_make_request(&self, user_id: i64) -> Result<bool> {
        if self.has_active_subscription(user_id).await? {
            return Ok(true);
        }
        Ok(self.free_trial_used(user_id).await? < self.limits.free_trial)
    }

    /// Charge one free-trial unit. The caller grants at most one per
    /// accepted generation.
    pub async fn consume_free_trial(&self, user_id: i64, is_image: bool) -> Result<()> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut record = self.load_or_default(user_id).await?;
        if record.free_trial_used == 0 {
            record.first_use_time = Some(Local::now());
        }
        record.free_trial_used += 1;
        if is_image {
            record.image_trial_used += 1;
        }
        debug!(
            user_id,
            used = record.free_trial_used,
            "Consumed one free-trial unit"
        );
        self.store.save(user_id, &record).await
    }

    fn roll_windows(record: &mut UserEntitlement, now: DateTime<Local>) {
        let today = today_key(now);
        let month = month_key(now);

        if record.image_daily_date.as_deref() != Some(&today) {
            record.image_daily_date = Some(today);
            record.image_daily_count = 0;
        }
        if record.image_monthly_period.as_deref() != Some(&month) {
            record.image_monthly_period = Some(month);
            record.image_monthly_count = 0;
        }
    }

    /// Denial reasons are mutually exclusive, daily checked first. Expects
    /// rolled windows.
    fn ceiling_denial(&self, record: &UserEntitlement) -> Option<String> {
        if record.image_daily_count >= self.limits.image_daily_pro {
            return Some(format!(
                "Daily image generation limit reached ({}). Try again tomorrow.",
                self.limits.image_daily_pro
            ));
        }
        if record.image_monthly_count >= self.limits.image_monthly_pro {
            return Some(format!(
                "Monthly image generation limit reached ({}).",
                self.limits.image_monthly_pro
            ));
        }
        None
    }

    /// Evaluate the image gate without charging anything. This is the
    /// affordance-time check: callers use it to decide whether to offer
    /// image generation at all. The single per-generation charge happens in
    /// [`Ledger::try_consume_image_quota`], which the dispatcher calls.
    pub async fn check_image_quota(&self, user_id: i64) -> Result<QuotaDecision> {
        if self.is_admin(user_id) {
            return Ok(QuotaDecision::allowed());
        }

        let mut record = self.load_or_default(user_id).await?;

        let subscribed = matches!(record.subscription_end, Some(end) if Local::now() < end);
        if !subscribed {
            if record.free_trial_used < self.limits.free_trial {
                return Ok(QuotaDecision::allowed());
            }
            return Ok(QuotaDecision::denied(self.paywall_message()));
        }

        // The rolled windows are evaluated but not persisted; the next
        // consumption rolls and saves them.
        Self::roll_windows(&mut record, Local::now());
        match self.ceiling_denial(&record) {
            Some(message) => Ok(QuotaDecision::denied(message)),
            None => Ok(QuotaDecision::allowed()),
        }
    }

    /// Check and charge one image generation. Called exactly once per
    /// accepted generation.
    ///
    /// Non-subscribers go through the free-trial path and do not touch the
    /// daily/monthly counters (trial units are charged separately, after a
    /// delivered success). Subscribers lazily roll stale counters, are
    /// denied daily-first then monthly, and otherwise have both counters
    /// incremented before any provider call is made.
    pub async fn try_consume_image_quota(&self, user_id: i64) -> Result<QuotaDecision> {
        if self.is_admin(user_id) {
            return Ok(QuotaDecision::allowed());
        }

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut record = self.load_or_default(user_id).await?;

        let subscribed = matches!(record.subscription_end, Some(end) if Local::now() < end);
        if !subscribed {
            if record.free_trial_used < self.limits.free_trial {
                return Ok(QuotaDecision::allowed());
            }
            return Ok(QuotaDecision::denied(self.paywall_message()));
        }

        Self::roll_windows(&mut record, Local::now());
        if let Some(message) = self.ceiling_denial(&record) {
            return Ok(QuotaDecision::denied(message));
        }

        record.image_daily_count += 1;
        record.image_monthly_count += 1;
        self.store.save(user_id, &record).await?;
        Ok(QuotaDecision::allowed())
    }

    /// Grant or extend a subscription. An active subscription extends from
    /// its current end; an expired or absent one starts from now.
    pub async fn grant_subscription(&self, user_id: i64, days: i64) -> Result<DateTime<Local>> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut record = self.load_or_default(user_id).await?;
        let now = Local::now();
        let base = match record.subscription_end {
            Some(end) if end > now => end,
            _ => now,
        };
        let new_end = base + Duration::days(days);
        record.subscription_end = Some(new_end);
        self.store.save(user_id, &record).await?;

        info!(user_id, %new_end, "Granted subscription for {} days", days);
        Ok(new_end)
    }

    pub async fn revoke_subscription(&self, user_id: i64) -> Result<()> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut record = self.load_or_default(user_id).await?;
        record.subscription_end = None;
        self.store.save(user_id, &record).await?;

        info!(user_id, "Revoked subscription");
        Ok(())
    }

    /// Remember the model the user explicitly picked.
    pub async fn set_preferred_model(&self, user_id: i64, model: &str) -> Result<()> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut record = self.load_or_default(user_id).await?;
        record.preferred_model = Some(model.to_string());
        self.store.save(user_id, &record).await
    }

    pub async fn preferred_model(&self, user_id: i64) -> Result<Option<String>> {
        Ok(self.load_or_default(user_id).await?.preferred_model)
    }
}
