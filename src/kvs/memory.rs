//! In-memory [`Kvs`] implementation used by tests in place of a real Redis server.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Kvs, KvsError, ScoredMember};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
pub struct InMemoryKvs {
    strings: Mutex<HashMap<String, Entry>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
    /// score -> members sharing it, kept alongside a reverse index for O(log n) removal.
    sorted_sets: Mutex<HashMap<String, BTreeMap<(i64, String), f64>>>,
    counters: Mutex<HashMap<String, i64>>,
}

impl InMemoryKvs {
    pub fn new() -> Self {
        Self::default()
    }

    fn score_key(score: f64) -> (i64, String) {
        // Sort by score first via a fixed-point ordering key, then by member for determinism.
        ((score * 1000.0) as i64, String::new())
    }
}

#[async_trait]
impl Kvs for InMemoryKvs {
    async fn get(&self, key: &str) -> Result<Option<String>, KvsError> {
        let mut strings = self.strings.lock().unwrap();
        if let Some(entry) = strings.get(key) {
            if let Some(exp) = entry.expires_at {
                if exp < Instant::now() {
                    strings.remove(key);
                    return Ok(None);
                }
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvsError> {
        let mut strings = self.strings.lock().unwrap();
        strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvsError> {
        self.strings.lock().unwrap().remove(key);
        self.sets.lock().unwrap().remove(key);
        self.sorted_sets.lock().unwrap().remove(key);
        self.counters.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvsError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvsError> {
        let strings = self.strings.lock().unwrap();
        Ok(strings.get(key).and_then(|e| {
            e.expires_at
                .map(|exp| exp.saturating_duration_since(Instant::now()))
        }))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvsError> {
        let mut strings = self.strings.lock().unwrap();
        if let Some(entry) = strings.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, KvsError> {
        let mut counters = self.counters.lock().unwrap();
        let value = counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), KvsError> {
        self.sets
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), KvsError> {
        if let Some(set) = self.sets.lock().unwrap().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, KvsError> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<(), KvsError> {
        let mut sorted_sets = self.sorted_sets.lock().unwrap();
        let set = sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(_, m), _| m != member);
        let (bucket, _) = Self::score_key(score);
        set.insert((bucket, member.to_string()), score);
        Ok(())
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<(), KvsError> {
        if let Some(set) = self.sorted_sets.lock().unwrap().get_mut(key) {
            set.retain(|(_, m), _| m != member);
        }
        Ok(())
    }

    async fn sorted_set_min(&self, key: &str) -> Result<Option<ScoredMember>, KvsError> {
        let sorted_sets = self.sorted_sets.lock().unwrap();
        Ok(sorted_sets.get(key).and_then(|set| {
            set.iter()
                .next()
                .map(|((_, member), score)| ScoredMember {
                    member: member.clone(),
                    score: *score,
                })
        }))
    }

    async fn sorted_set_card(&self, key: &str) -> Result<u64, KvsError> {
        Ok(self
            .sorted_sets
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }

    async fn sorted_set_range_all(&self, key: &str) -> Result<Vec<ScoredMember>, KvsError> {
        let sorted_sets = self.sorted_sets.lock().unwrap();
        Ok(sorted_sets
            .get(key)
            .map(|set| {
                set.iter()
                    .map(|((_, member), score)| ScoredMember {
                        member: member.clone(),
                        score: *score,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sorted_set_min_returns_smallest_score() {
        let kvs = InMemoryKvs::new();
        kvs.sorted_set_add("q", "r1", 200.0).await.unwrap();
        kvs.sorted_set_add("q", "r2", 100.0).await.unwrap();
        let min = kvs.sorted_set_min("q").await.unwrap().unwrap();
        assert_eq!(min.member, "r2");
    }

    #[tokio::test]
    async fn duplicate_enqueue_overwrites_score() {
        let kvs = InMemoryKvs::new();
        kvs.sorted_set_add("q", "r1", 200.0).await.unwrap();
        kvs.sorted_set_add("q", "r1", 50.0).await.unwrap();
        assert_eq!(kvs.sorted_set_card("q").await.unwrap(), 1);
        let min = kvs.sorted_set_min("q").await.unwrap().unwrap();
        assert_eq!(min.score, 50.0);
    }

    #[tokio::test]
    async fn get_respects_ttl_expiry() {
        let kvs = InMemoryKvs::new();
        kvs.set("k", "v", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kvs.get("k").await.unwrap(), None);
    }
}
