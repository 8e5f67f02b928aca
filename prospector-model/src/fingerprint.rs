use chrono::{DateTime, Utc};

use crate::ids::CandidateId;

/// Content-hash record used to suppress previously seen candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CandidateFingerprint {
    pub fingerprint_hash: String,
    pub candidate_id: Option<CandidateId>,
    pub hit_count: u32,
    pub last_seen_at: DateTime<Utc>,
    /// `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CandidateFingerprint {
    pub fn fresh(
        fingerprint_hash: impl Into<String>,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            fingerprint_hash: fingerprint_hash.into(),
            candidate_id: None,
            hit_count: 1,
            last_seen_at: now,
            expires_at,
            created_at: now,
        }
    }

    /// Expired rows are logically absent even while still stored.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    pub fn record_hit(&mut self, now: DateTime<Utc>) {
        self.hit_count = self.hit_count.saturating_add(1);
        self.last_seen_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn expiry_is_strictly_before_now() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let fp = CandidateFingerprint::fresh("abc", now, Some(now));
        assert!(!fp.is_expired(now));
        assert!(fp.is_expired(now + Duration::seconds(1)));

        let forever = CandidateFingerprint::fresh("abc", now, None);
        assert!(!forever.is_expired(now + Duration::days(10_000)));
    }

    #[test]
    fn hits_only_increase() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut fp = CandidateFingerprint::fresh("abc", now, None);
        fp.record_hit(now + Duration::minutes(5));
        assert_eq!(fp.hit_count, 2);
        assert_eq!(fp.last_seen_at, now + Duration::minutes(5));
        assert_eq!(fp.created_at, now);
    }
}
