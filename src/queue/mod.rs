//! Reservation Queue: durable priority queue of pending booking attempts, ordered by
//! run-at timestamp, with per-owner secondary indexing.
//!
//! Backed by three KVS structures keyed by a single reservation id: a string entry
//! holding the serialized record, a sorted set scored by `run_time` epoch-millis for
//! O(log n) enqueue and O(1) peek-minimum, and a set-per-owner index for tenant scoping.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::kvs::{Kvs, KvsError};

const PENDING_SORTED_SET: &str = "pending_reservations";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Kvs(#[from] KvsError),
    #[error("corrupt reservation record: {0}")]
    Corrupt(String),
}

/// Accounting usage bucket for a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageType {
    Immediate,
    Concierge,
}

/// A durable, queued booking attempt. Created by enqueue, never mutated thereafter
/// (credentials are re-resolved at execution time for entries with a non-empty
/// `owner_id`); destroyed after one execution attempt or by explicit cancel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledReservation {
    pub id: String,
    pub venue_id: i64,
    pub reservation_time: DateTime<Utc>,
    pub party_size: u32,
    pub table_preferences: Vec<String>,
    pub auth_token: Option<String>,
    pub payment_method_id: Option<String>,
    pub owner_id: String,
    pub usage_type: UsageType,
    pub run_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledReservation {
    /// Builds a new reservation with a freshly generated, globally unique id.
    ///
    /// `run_time` must be `<= reservation_time`; callers resolving an immediate
    /// attempt should pass the current instant for both.
    pub fn new(
        venue_id: i64,
        reservation_time: DateTime<Utc>,
        party_size: u32,
        table_preferences: Vec<String>,
        owner_id: String,
        usage_type: UsageType,
        run_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            venue_id,
            reservation_time,
            party_size,
            table_preferences,
            auth_token: None,
            payment_method_id: None,
            owner_id,
            usage_type,
            run_time,
            created_at: Utc::now(),
        }
    }
}

fn record_key(id: &str) -> String {
    format!("reservation:{id}")
}

fn owner_index_key(owner_id: &str) -> String {
    format!("reservations_by_owner:{owner_id}")
}

/// Durable priority queue of pending booking attempts.
pub struct ReservationQueue {
    kvs: Arc<dyn Kvs>,
}

impl ReservationQueue {
    pub fn new(kvs: Arc<dyn Kvs>) -> Self {
        Self { kvs }
    }

    /// Writes the record, then indexes it, so no reader ever observes a sorted-set
    /// member without a corresponding record. A duplicate enqueue (same id) overwrites
    /// both the record and its sorted-set score.
    pub async fn enqueue(&self, record: &ScheduledReservation) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(record)
            .map_err(|e| QueueError::Corrupt(format!("serialization failed: {e}")))?;

        self.kvs.set(&record_key(&record.id), &serialized, None).await?;

        let score = record.run_time.timestamp_millis() as f64;
        self.kvs
            .sorted_set_add(PENDING_SORTED_SET, &record.id, score)
            .await?;

        if !record.owner_id.is_empty() {
            self.kvs
                .set_add(&owner_index_key(&record.owner_id), &record.id)
                .await?;
        }

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ScheduledReservation>, QueueError> {
        let Some(raw) = self.kvs.get(&record_key(id)).await? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&raw)
            .map_err(|e| QueueError::Corrupt(format!("stored record is not valid json: {e}")))?;
        Ok(Some(record))
    }

    /// Removes `id` from all three structures. Idempotent: a missing id is a no-op.
    /// Removes sorted-set and owner-index membership before the record, so the
    /// invariant "every sorted-set member has a record" is never violated by a
    /// concurrent reader racing this delete.
    pub async fn delete(&self, id: &str) -> Result<(), QueueError> {
        self.kvs.sorted_set_remove(PENDING_SORTED_SET, id).await?;

        if let Some(record) = self.get(id).await? {
            if !record.owner_id.is_empty() {
                self.kvs
                    .set_remove(&owner_index_key(&record.owner_id), id)
                    .await?;
            }
        }

        self.kvs.delete(&record_key(id)).await?;
        Ok(())
    }

    /// Returns the entry with the smallest `run_time` score, or `None` if empty.
    /// Tolerates a sorted-set member whose record has gone missing (a transient
    /// partial-write state) by skipping it and letting the caller retry.
    pub async fn peek_next(&self) -> Result<Option<ScheduledReservation>, QueueError> {
        let Some(min) = self.kvs.sorted_set_min(PENDING_SORTED_SET).await? else {
            return Ok(None);
        };
        match self.get(&min.member).await? {
            Some(record) => Ok(Some(record)),
            None => {
                tracing::warn!(id = %min.member, "sorted-set member missing its record, skipping");
                Ok(None)
            }
        }
    }

    /// Lists the owner's pending reservations sorted by `run_time` ascending.
    pub async fn list_by_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<ScheduledReservation>, QueueError> {
        let ids = self.kvs.set_members(&owner_index_key(owner_id)).await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(&id).await? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.run_time);
        Ok(records)
    }

    /// Lists every pending reservation, sorted by `run_time` ascending. Used by the
    /// admin-scoped listing path when no owner header is present.
    pub async fn list_all(&self) -> Result<Vec<ScheduledReservation>, QueueError> {
        let members = self.kvs.sorted_set_range_all(PENDING_SORTED_SET).await?;
        let mut records = Vec::with_capacity(members.len());
        for member in members {
            if let Some(record) = self.get(&member.member).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn count_pending(&self) -> Result<u64, QueueError> {
        Ok(self.kvs.sorted_set_card(PENDING_SORTED_SET).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvs::InMemoryKvs;
    use chrono::TimeZone;

    fn reservation(id_suffix: &str, run_time: DateTime<Utc>) -> ScheduledReservation {
        let mut record = ScheduledReservation::new(
            89607,
            run_time,
            2,
            vec![],
            format!("owner-{id_suffix}"),
            UsageType::Immediate,
            run_time,
        );
        record.id = format!("R{id_suffix}");
        record
    }

    #[tokio::test]
    async fn peek_next_returns_smallest_run_time() {
        let queue = ReservationQueue::new(Arc::new(InMemoryKvs::new()));
        let r1 = reservation("1", Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap());
        let r2 = reservation("2", Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        queue.enqueue(&r1).await.unwrap();
        queue.enqueue(&r2).await.unwrap();

        let next = queue.peek_next().await.unwrap().unwrap();
        assert_eq!(next.id, "R2");
    }

    #[tokio::test]
    async fn list_by_owner_contains_id_exactly_once_until_deletion() {
        let queue = ReservationQueue::new(Arc::new(InMemoryKvs::new()));
        let r1 = reservation("1", Utc::now());
        queue.enqueue(&r1).await.unwrap();

        let listed = queue.list_by_owner("owner-1").await.unwrap();
        assert_eq!(listed.iter().filter(|r| r.id == "R1").count(), 1);

        queue.delete("R1").await.unwrap();
        let listed = queue.list_by_owner("owner-1").await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn duplicate_enqueue_overwrites() {
        let queue = ReservationQueue::new(Arc::new(InMemoryKvs::new()));
        let mut r1 = reservation("1", Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap());
        queue.enqueue(&r1).await.unwrap();
        r1.party_size = 5;
        r1.run_time = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        queue.enqueue(&r1).await.unwrap();

        assert_eq!(queue.count_pending().await.unwrap(), 1);
        let fetched = queue.get("R1").await.unwrap().unwrap();
        assert_eq!(fetched.party_size, 5);
    }

    #[tokio::test]
    async fn cancel_of_unknown_id_is_a_no_op() {
        let queue = ReservationQueue::new(Arc::new(InMemoryKvs::new()));
        assert!(queue.delete("does-not-exist").await.is_ok());
    }

    #[tokio::test]
    async fn empty_queue_peek_returns_none() {
        let queue = ReservationQueue::new(Arc::new(InMemoryKvs::new()));
        assert!(queue.peek_next().await.unwrap().is_none());
    }
}
