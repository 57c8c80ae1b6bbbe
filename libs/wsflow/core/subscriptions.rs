//! Subscription registry
//!
//! Tracks every subscription a connection has requested. Records are never
//! deleted: unsubscribing, failing or timing out only changes the status and
//! appends to the record's history, so the full lifecycle stays inspectable.
//!
//! The registry holds no timers. The orchestrator calls
//! [`SubscriptionRegistry::check_timeouts`] from its housekeeping tick.

use crate::error::{Result, WsError};
use crate::subscription::{SubscriptionKey, SubscriptionResponse};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

const ID_PREFIX: &str = "sub_";
const ID_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Confirmed,
    Failed,
    Unsubscribed,
    Timeout,
}

impl SubscriptionStatus {
    /// Whether a reconnect should re-issue this subscription
    pub fn is_replayable(self) -> bool {
        matches!(self, SubscriptionStatus::Pending | SubscriptionStatus::Confirmed)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Confirmed => "confirmed",
            SubscriptionStatus::Failed => "failed",
            SubscriptionStatus::Unsubscribed => "unsubscribed",
            SubscriptionStatus::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub status: SubscriptionStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionRecord {
    pub id: String,
    pub channel: String,
    pub params: Value,
    pub status: SubscriptionStatus,
    /// When the record was created
    pub timestamp: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub history: Vec<StatusChange>,
    /// 1 for the first request, +1 for every replay after a reconnect
    pub attempt: u32,
    pub error: Option<String>,
    /// Id of the record that replaced this one during a replay
    pub replaced_by: Option<String>,
}

impl SubscriptionRecord {
    fn transition(&mut self, status: SubscriptionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.last_updated = now;
        self.history.push(StatusChange { status, at: now });
    }
}

/// What [`SubscriptionRegistry::handle_response`] changed
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Confirmed { id: String, channel: String },
    Failed { id: String, channel: String, reason: String },
    /// Unknown key, or the record was no longer pending
    Unchanged,
}

/// Channel ↔ subscription id table for one connection
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    records: HashMap<String, SubscriptionRecord>,
    /// Ids in creation order
    order: Vec<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending record and return its fresh id
    pub fn subscribe(&mut self, channel: &str, params: Value) -> String {
        self.subscribe_at(channel, params, Utc::now())
    }

    pub fn subscribe_at(&mut self, channel: &str, params: Value, now: DateTime<Utc>) -> String {
        self.insert(channel, params, 1, now)
    }

    /// Re-issue a record under a fresh id
    ///
    /// The new record starts pending with `attempt + 1`; the old one becomes
    /// unsubscribed and points at its replacement.
    pub fn replay_at(&mut self, id: &str, now: DateTime<Utc>) -> Result<String> {
        let (channel, params, attempt) = match self.records.get(id) {
            Some(record) => (record.channel.clone(), record.params.clone(), record.attempt),
            None => return Err(WsError::NotFound(id.to_string())),
        };

        let new_id = self.insert(&channel, params, attempt + 1, now);
        self.mark_replaced_at(id, &new_id, now)?;
        Ok(new_id)
    }

    pub fn mark_replaced(&mut self, old_id: &str, new_id: &str) -> Result<()> {
        self.mark_replaced_at(old_id, new_id, Utc::now())
    }

    pub fn mark_replaced_at(&mut self, old_id: &str, new_id: &str, now: DateTime<Utc>) -> Result<()> {
        let record = self
            .records
            .get_mut(old_id)
            .ok_or_else(|| WsError::NotFound(old_id.to_string()))?;
        record.replaced_by = Some(new_id.to_string());
        if record.status != SubscriptionStatus::Unsubscribed {
            record.transition(SubscriptionStatus::Unsubscribed, now);
        }
        Ok(())
    }

    pub fn unsubscribe(&mut self, id: &str) -> Result<()> {
        self.unsubscribe_at(id, Utc::now())
    }

    pub fn unsubscribe_at(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| WsError::NotFound(id.to_string()))?;
        if record.status != SubscriptionStatus::Unsubscribed {
            record.transition(SubscriptionStatus::Unsubscribed, now);
        }
        Ok(())
    }

    /// Fail a record locally, e.g. when its request was rejected before sending
    pub fn mark_failed(&mut self, id: &str, reason: &str) -> Result<()> {
        self.mark_failed_at(id, reason, Utc::now())
    }

    pub fn mark_failed_at(&mut self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| WsError::NotFound(id.to_string()))?;
        record.error = Some(reason.to_string());
        record.transition(SubscriptionStatus::Failed, now);
        Ok(())
    }

    /// Apply a server acknowledgement
    ///
    /// Only pending records change; acks for unknown ids or for records in
    /// any other state are ignored.
    pub fn handle_response(&mut self, response: &SubscriptionResponse) -> ResponseOutcome {
        self.handle_response_at(response, Utc::now())
    }

    pub fn handle_response_at(
        &mut self,
        response: &SubscriptionResponse,
        now: DateTime<Utc>,
    ) -> ResponseOutcome {
        let (key, failure) = match response {
            SubscriptionResponse::Confirmed(key) => (key, None),
            SubscriptionResponse::Failed { key, reason } => (key, Some(reason)),
            SubscriptionResponse::Unrelated => return ResponseOutcome::Unchanged,
        };

        let Some(id) = self.pending_id_for(key) else {
            return ResponseOutcome::Unchanged;
        };
        let Some(record) = self.records.get_mut(&id) else {
            return ResponseOutcome::Unchanged;
        };

        match failure {
            None => {
                record.error = None;
                record.transition(SubscriptionStatus::Confirmed, now);
                ResponseOutcome::Confirmed {
                    id,
                    channel: record.channel.clone(),
                }
            }
            Some(reason) => {
                record.error = Some(reason.clone());
                record.transition(SubscriptionStatus::Failed, now);
                ResponseOutcome::Failed {
                    id,
                    channel: record.channel.clone(),
                    reason: reason.clone(),
                }
            }
        }
    }

    /// Move pending records older than `timeout_seconds` to timeout
    pub fn check_timeouts(&mut self, timeout_seconds: u64) -> usize {
        self.expire_pending_at(timeout_seconds, Utc::now()).len()
    }

    pub fn check_timeouts_at(&mut self, timeout_seconds: u64, now: DateTime<Utc>) -> usize {
        self.expire_pending_at(timeout_seconds, now).len()
    }

    /// Like `check_timeouts_at`, returning the ids that timed out
    pub fn expire_pending_at(&mut self, timeout_seconds: u64, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::seconds(timeout_seconds.min(i64::MAX as u64) as i64);
        let mut expired = Vec::new();

        for id in &self.order {
            if let Some(record) = self.records.get_mut(id) {
                if record.status == SubscriptionStatus::Pending && now - record.timestamp > timeout {
                    record.error = Some("subscription_timeout".to_string());
                    record.transition(SubscriptionStatus::Timeout, now);
                    expired.push(id.clone());
                }
            }
        }
        expired
    }

    /// Confirmed records only
    pub fn active_subscriptions(&self) -> Vec<&SubscriptionRecord> {
        self.iter()
            .filter(|record| record.status == SubscriptionStatus::Confirmed)
            .collect()
    }

    /// Most recent confirmed record for `channel`, else the most recent pending one
    pub fn find_by_channel(&self, channel: &str) -> Option<&SubscriptionRecord> {
        let newest = |status: SubscriptionStatus| {
            self.iter()
                .rev()
                .find(|record| record.channel == channel && record.status == status)
        };
        newest(SubscriptionStatus::Confirmed).or_else(|| newest(SubscriptionStatus::Pending))
    }

    pub fn get(&self, id: &str) -> Option<&SubscriptionRecord> {
        self.records.get(id)
    }

    /// Follow `replaced_by` links to the current record for an id
    pub fn resolve(&self, id: &str) -> Option<&SubscriptionRecord> {
        let mut record = self.records.get(id)?;
        // Bounded by the number of records so a corrupted link cannot loop
        for _ in 0..self.records.len() {
            match record.replaced_by.as_deref().and_then(|next| self.records.get(next)) {
                Some(next) => record = next,
                None => break,
            }
        }
        Some(record)
    }

    /// Ids of pending and confirmed records in creation order
    pub fn replayable(&self) -> Vec<String> {
        self.iter()
            .filter(|record| record.status.is_replayable())
            .map(|record| record.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in creation order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &SubscriptionRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    fn insert(&mut self, channel: &str, params: Value, attempt: u32, now: DateTime<Utc>) -> String {
        let id = self.fresh_id();
        let record = SubscriptionRecord {
            id: id.clone(),
            channel: channel.to_string(),
            params,
            status: SubscriptionStatus::Pending,
            timestamp: now,
            last_updated: now,
            history: vec![StatusChange {
                status: SubscriptionStatus::Pending,
                at: now,
            }],
            attempt,
            error: None,
            replaced_by: None,
        };
        self.records.insert(id.clone(), record);
        self.order.push(id.clone());
        id
    }

    fn fresh_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let suffix: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(ID_LEN)
                .map(char::from)
                .collect();
            let id = format!("{}{}", ID_PREFIX, suffix);
            if !self.records.contains_key(&id) {
                return id;
            }
        }
    }

    fn pending_id_for(&self, key: &SubscriptionKey) -> Option<String> {
        match key {
            SubscriptionKey::Id(id) => self
                .records
                .get(id)
                .filter(|record| record.status == SubscriptionStatus::Pending)
                .map(|record| record.id.clone()),
            SubscriptionKey::Channel(channel) => self
                .iter()
                .rev()
                .find(|record| &record.channel == channel && record.status == SubscriptionStatus::Pending)
                .map(|record| record.id.clone()),
        }
    }
}
