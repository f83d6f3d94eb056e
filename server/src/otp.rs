//! One-time codes for signup and password reset, kept in the [`OtpCache`].

use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

use crate::cache::{CacheError, OtpCache};
use crate::ids;

pub fn signup_key(email: &str) -> String {
    format!("otp:{email}")
}

pub fn reset_key(email: &str) -> String {
    format!("reset-otp:{email}")
}

/// A cached code together with whatever the flow needs once it is verified.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OtpEntry<T> {
    pub code: String,
    pub expires_at_ms: i64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub verified: bool,
    pub payload: T,
}

impl<T> OtpEntry<T> {
    fn remaining(&self, now_ms: i64) -> Option<Duration> {
        let left = self.expires_at_ms - now_ms;
        (left > 0).then(|| Duration::from_millis(left as u64))
    }
}

#[derive(Debug)]
pub enum OtpCheck<T> {
    Missing,
    Expired,
    Mismatch { attempts_left: u32 },
    Locked,
    Valid(OtpEntry<T>),
}

pub struct OtpStore {
    cache: OtpCache,
    code_length: usize,
    max_attempts: u32,
}

impl OtpStore {
    pub fn new(cache: OtpCache, code_length: usize, max_attempts: u32) -> Self {
        Self {
            cache,
            code_length,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Stores a fresh code for `key`, replacing any previous one.
    pub async fn issue<T: Serialize>(
        &self,
        key: &str,
        payload: T,
        ttl: Duration,
    ) -> Result<OtpEntry<T>, CacheError> {
        let entry = OtpEntry {
            code: ids::numeric_code(self.code_length),
            expires_at_ms: Utc::now().timestamp_millis() + ttl.as_millis() as i64,
            attempts: 0,
            verified: false,
            payload,
        };
        self.put(key, &entry, ttl).await?;
        Ok(entry)
    }

    /// Loads a live entry; an entry past its deadline is removed.
    pub async fn load<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<OtpEntry<T>>, CacheError> {
        let Some(raw) = self.cache.get(key).await? else {
            return Ok(None);
        };
        let entry: OtpEntry<T> = serde_json::from_str(&raw)?;
        if entry.remaining(Utc::now().timestamp_millis()).is_none() {
            self.cache.del(key).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Compares `code` with the cached one. Mismatches count towards the
    /// attempt limit and the entry is dropped once the limit is reached.
    pub async fn check<T: Serialize + DeserializeOwned>(
        &self,
        key: &str,
        code: &str,
    ) -> Result<OtpCheck<T>, CacheError> {
        let Some(raw) = self.cache.get(key).await? else {
            return Ok(OtpCheck::Missing);
        };
        let mut entry: OtpEntry<T> = serde_json::from_str(&raw)?;
        let now_ms = Utc::now().timestamp_millis();
        let Some(remaining) = entry.remaining(now_ms) else {
            self.cache.del(key).await?;
            return Ok(OtpCheck::Expired);
        };
        if codes_match(&entry.code, code.trim()) {
            return Ok(OtpCheck::Valid(entry));
        }
        entry.attempts += 1;
        if entry.attempts >= self.max_attempts {
            self.cache.del(key).await?;
            return Ok(OtpCheck::Locked);
        }
        self.put(key, &entry, remaining).await?;
        Ok(OtpCheck::Mismatch {
            attempts_left: self.max_attempts - entry.attempts,
        })
    }

    /// Marks a checked entry as verified and gives it a new lifetime.
    pub async fn mark_verified<T: Serialize>(
        &self,
        key: &str,
        mut entry: OtpEntry<T>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        entry.verified = true;
        entry.expires_at_ms = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        self.put(key, &entry, ttl).await
    }

    pub async fn discard(&self, key: &str) -> Result<(), CacheError> {
        self.cache.del(key).await
    }

    async fn put<T: Serialize>(
        &self,
        key: &str,
        entry: &OtpEntry<T>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_string(entry)?;
        self.cache.set_ex(key, &raw, ttl).await
    }
}

fn codes_match(expected: &str, given: &str) -> bool {
    if expected.len() != given.len() {
        return false;
    }
    expected
        .bytes()
        .zip(given.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> OtpStore {
        OtpStore::new(OtpCache::memory(String::new()), 4, 3)
    }

    #[tokio::test]
    async fn test_valid_code() {
        let otps = store();
        let entry = otps
            .issue("otp:a@example.com", "payload".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        match otps
            .check::<String>("otp:a@example.com", &entry.code)
            .await
            .unwrap()
        {
            OtpCheck::Valid(found) => assert_eq!(found.payload, "payload"),
            other => panic!("unexpected check result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mismatch_locks_after_max_attempts() {
        let otps = store();
        let entry = otps
            .issue("otp:b@example.com", (), Duration::from_secs(60))
            .await
            .unwrap();
        let wrong = if entry.code == "0000" { "1111" } else { "0000" };
        assert!(matches!(
            otps.check::<()>("otp:b@example.com", wrong).await.unwrap(),
            OtpCheck::Mismatch { attempts_left: 2 }
        ));
        assert!(matches!(
            otps.check::<()>("otp:b@example.com", wrong).await.unwrap(),
            OtpCheck::Mismatch { attempts_left: 1 }
        ));
        assert!(matches!(
            otps.check::<()>("otp:b@example.com", wrong).await.unwrap(),
            OtpCheck::Locked
        ));
        assert!(matches!(
            otps.check::<()>("otp:b@example.com", &entry.code).await.unwrap(),
            OtpCheck::Missing
        ));
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let otps = store();
        let mut entry = otps
            .issue("otp:c@example.com", (), Duration::from_secs(60))
            .await
            .unwrap();
        entry.expires_at_ms = Utc::now().timestamp_millis() - 1;
        otps.put("otp:c@example.com", &entry, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            otps.check::<()>("otp:c@example.com", &entry.code).await.unwrap(),
            OtpCheck::Expired
        ));
        assert!(otps.load::<()>("otp:c@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_verified() {
        let otps = store();
        let entry = otps
            .issue("reset-otp:d@example.com", (), Duration::from_secs(60))
            .await
            .unwrap();
        otps.mark_verified("reset-otp:d@example.com", entry, Duration::from_secs(600))
            .await
            .unwrap();
        let loaded = otps
            .load::<()>("reset-otp:d@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.verified);
    }

    #[test]
    fn test_codes_match() {
        assert!(codes_match("1234", "1234"));
        assert!(!codes_match("1234", "1235"));
        assert!(!codes_match("1234", "123"));
    }
}
