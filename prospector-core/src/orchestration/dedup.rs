//! Candidate fingerprinting and TTL-bound duplicate suppression.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use prospector_model::{CandidateId, StrategyCandidate};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{error::Result, persistence::FingerprintStore};

/// Separates hashed fields so `("ab", "c")` and `("a", "bc")` differ.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Content hash over the normalised archetype, hypothesis and rules.
///
/// Text is lower-cased with whitespace runs collapsed; rules are rendered as
/// canonical JSON with object keys sorted. The display name is excluded, so
/// renaming an idea does not make it new.
pub fn fingerprint(candidate: &StrategyCandidate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(&candidate.archetype_name).as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(normalize_text(&candidate.hypothesis).as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    let mut rules = String::new();
    write_canonical(&candidate.rules_json, &mut rules);
    hasher.update(rules.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(*key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(text) => {
            out.push_str(&Value::String(normalize_text(text)).to_string());
        }
        other => out.push_str(&other.to_string()),
    }
}

/// A candidate that survived de-duplication.
#[derive(Clone, Debug, PartialEq)]
pub struct AcceptedCandidate {
    pub candidate_id: CandidateId,
    pub fingerprint_hash: String,
    pub candidate: StrategyCandidate,
}

/// A candidate suppressed because its fingerprint was seen recently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateCandidate {
    pub name: String,
    pub fingerprint_hash: String,
    pub hit_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScreenResult {
    pub accepted: Vec<AcceptedCandidate>,
    pub duplicates: Vec<DuplicateCandidate>,
    /// Hashes repeated inside the batch. Recorded together with `accepted`.
    repeats: Vec<String>,
}

impl ScreenResult {
    /// Fingerprint recorded on the job: first accepted, else first duplicate.
    pub fn representative_hash(&self) -> Option<&str> {
        self.accepted
            .first()
            .map(|a| a.fingerprint_hash.as_str())
            .or_else(|| {
                self.duplicates.first().map(|d| d.fingerprint_hash.as_str())
            })
    }

    /// Forget the accepted candidates and their in-batch repeats. Used when
    /// the batch never reached the sink.
    pub fn withdraw(&mut self) -> Vec<AcceptedCandidate> {
        let withdrawn = std::mem::take(&mut self.accepted);
        self.duplicates.retain(|d| !self.repeats.contains(&d.fingerprint_hash));
        self.repeats.clear();
        withdrawn
    }
}

/// Screens executor output against the fingerprint store.
///
/// Screening only records sightings of ideas the store already knows.
/// Accepted candidates are written by [`Deduplicator::commit`] once their
/// batch has been handed off, so a lost batch does not block the idea.
#[derive(Clone, Debug)]
pub struct Deduplicator {
    store: Arc<dyn FingerprintStore>,
    ttl: Option<Duration>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn FingerprintStore>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.ttl.and_then(|ttl| now.checked_add_signed(ttl))
    }

    /// Classify every candidate in order. Repeats inside one batch count as
    /// duplicates of the first occurrence.
    pub async fn screen(
        &self,
        candidates: Vec<StrategyCandidate>,
        now: DateTime<Utc>,
    ) -> Result<ScreenResult> {
        let expires_at = self.expires_at(now);
        let mut seen: HashMap<String, u32> = HashMap::new();
        let mut result = ScreenResult::default();
        for candidate in candidates {
            let hash = fingerprint(&candidate);
            let hit_count = if let Some(hits) = seen.get_mut(&hash) {
                *hits += 1;
                result.repeats.push(hash.clone());
                Some(*hits)
            } else if self.store.get(&hash, now).await?.is_some() {
                let observation =
                    self.store.observe(&hash, now, expires_at).await?;
                Some(observation.record().hit_count)
            } else {
                None
            };
            if let Some(hit_count) = hit_count {
                debug!(
                    target: "research::dedup",
                    fingerprint = %hash,
                    hit_count,
                    candidate = %candidate.name,
                    "duplicate candidate suppressed"
                );
                result.duplicates.push(DuplicateCandidate {
                    name: candidate.name,
                    fingerprint_hash: hash,
                    hit_count,
                });
                continue;
            }
            seen.insert(hash.clone(), 1);
            result.accepted.push(AcceptedCandidate {
                candidate_id: CandidateId::new(),
                fingerprint_hash: hash,
                candidate,
            });
        }
        Ok(result)
    }

    /// Record the accepted fingerprints, link them to their candidate ids
    /// and count the in-batch repeats.
    pub async fn commit(
        &self,
        screened: &ScreenResult,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let expires_at = self.expires_at(now);
        for accepted in &screened.accepted {
            let hash = &accepted.fingerprint_hash;
            self.store.observe(hash, now, expires_at).await?;
            self.store.attach_candidate(hash, accepted.candidate_id).await?;
        }
        for hash in &screened.repeats {
            self.store.observe(hash, now, expires_at).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::InMemoryFingerprintStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn candidate(
        name: &str,
        hypothesis: &str,
        rules: Value,
    ) -> StrategyCandidate {
        StrategyCandidate {
            name: name.into(),
            archetype_name: "Mean Reversion".into(),
            hypothesis: hypothesis.into(),
            rules_json: rules,
        }
    }

    #[test]
    fn fingerprint_ignores_formatting_and_key_order() {
        let a = candidate(
            "Alpha",
            "Funding  rate spikes\nrevert",
            json!({"entry": {"rsi": 30, "tf": "1h"}, "exit": "TP 2%"}),
        );
        let b = candidate(
            "Beta",
            "funding rate SPIKES revert",
            json!({"exit": "tp 2%", "entry": {"tf": "1H", "rsi": 30}}),
        );
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);

        let c = candidate(
            "Alpha",
            "funding rate spikes revert",
            json!({"entry": {"rsi": 31}}),
        );
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[tokio::test]
    async fn repeats_within_ttl_are_suppressed() {
        let store = Arc::new(InMemoryFingerprintStore::default());
        let dedup = Deduplicator::new(store.clone(), Some(Duration::days(30)));
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let idea = candidate("Alpha", "basis converges", json!({"k": 1}));

        let first = dedup
            .screen(vec![idea.clone(), idea.clone()], now)
            .await
            .unwrap();
        assert_eq!(first.accepted.len(), 1);
        assert_eq!(first.duplicates.len(), 1);
        assert_eq!(first.duplicates[0].hit_count, 2);
        dedup.commit(&first, now).await.unwrap();

        let stored = store
            .stored(&first.accepted[0].fingerprint_hash)
            .await
            .unwrap();
        assert_eq!(stored.candidate_id, Some(first.accepted[0].candidate_id));
        assert_eq!(stored.expires_at, Some(now + Duration::days(30)));
        assert_eq!(stored.hit_count, 2);

        let later = dedup.screen(vec![idea.clone()], now).await.unwrap();
        assert!(later.accepted.is_empty());
        assert_eq!(later.duplicates[0].hit_count, 3);

        let after_expiry = dedup
            .screen(vec![idea], now + Duration::days(31))
            .await
            .unwrap();
        assert_eq!(after_expiry.accepted.len(), 1);
    }

    #[tokio::test]
    async fn screening_alone_leaves_new_ideas_unrecorded() {
        let store = Arc::new(InMemoryFingerprintStore::default());
        let dedup = Deduplicator::new(store.clone(), Some(Duration::days(30)));
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let idea = candidate("Alpha", "basis converges", json!({"k": 1}));

        let mut screened = dedup
            .screen(vec![idea.clone(), idea.clone()], now)
            .await
            .unwrap();
        let hash = screened.accepted[0].fingerprint_hash.clone();
        assert!(store.stored(&hash).await.is_none());

        let withdrawn = screened.withdraw();
        assert_eq!(withdrawn.len(), 1);
        assert!(screened.duplicates.is_empty());
        assert_eq!(screened.representative_hash(), None);

        let again = dedup.screen(vec![idea], now).await.unwrap();
        assert_eq!(again.accepted.len(), 1);
    }
}
