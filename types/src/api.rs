//! Response envelopes and paging shared by every route.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Body of every successful response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T> Envelope<T> {
    pub fn new(status: u16, data: T, message: impl Into<String>) -> Self {
        Self {
            status,
            data,
            message: message.into(),
            success: (200..300).contains(&status),
        }
    }
}

/// Body of every failed response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status: u16,
    pub message: String,
    pub success: bool,
    pub errors: serde_json::Value,
    pub stack: Vec<String>,
}

/// `?page=&limit=` query parameters.
///
/// Missing, zero or unparsable values fall back to the route's default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PageQuery {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub page: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub limit: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl PageQuery {
    pub fn resolve(&self, default_limit: u32) -> Page {
        let page = self.page.filter(|page| *page > 0).unwrap_or(1);
        let limit = self
            .limit
            .filter(|limit| *limit > 0)
            .unwrap_or(default_limit)
            .min(MAX_PAGE_LIMIT);
        Page { page, limit }
    }
}

impl Page {
    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(self.limit as u64)
    }
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|value| value.trim().parse().ok()))
}
