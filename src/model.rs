use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// A time-bounded puzzle descriptor published by the remote service.
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    pub challenge_id: String,
    pub day: i64,
    pub challenge_number: i64,
    pub difficulty: String,
    pub no_pre_mine: String,
    pub no_pre_mine_hour: String,
    pub latest_submission: String,
}

impl Challenge {
    pub fn latest_submission_dt(&self) -> DateTime<Utc> {
        parse_iso8601_utc(&self.latest_submission)
    }

    /// A challenge is valid only while there is still at least a 10 second
    /// margin before its submission deadline.
    pub fn is_valid(&self) -> bool {
        Self::is_valid_dt(self.latest_submission_dt())
    }

    pub fn is_valid_dt(latest_submission_dt: DateTime<Utc>) -> bool {
        latest_submission_dt >= Utc::now() + Duration::seconds(10)
    }
}

/// Parses `"2025-10-30T23:59:59Z"`-style timestamps, tolerating either a
/// trailing `Z` or an explicit offset.
pub fn parse_iso8601_utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkStatus {
    Open,
    Solving,
    Validated,
    Invalid,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Open => "Open",
            WorkStatus::Solving => "Solving",
            WorkStatus::Validated => "Validated",
            WorkStatus::Invalid => "Invalid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Open" => Some(WorkStatus::Open),
            "Solving" => Some(WorkStatus::Solving),
            "Validated" => Some(WorkStatus::Validated),
            "Invalid" => Some(WorkStatus::Invalid),
            _ => None,
        }
    }

    pub fn all() -> [WorkStatus; 4] {
        [
            WorkStatus::Open,
            WorkStatus::Solving,
            WorkStatus::Validated,
            WorkStatus::Invalid,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolutionStatus {
    Found,
    Validated,
    Invalid,
}

impl SolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolutionStatus::Found => "Found",
            SolutionStatus::Validated => "Validated",
            SolutionStatus::Invalid => "Invalid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Found" => Some(SolutionStatus::Found),
            "Validated" => Some(SolutionStatus::Validated),
            "Invalid" => Some(SolutionStatus::Invalid),
            _ => None,
        }
    }
}

/// A nonce and its resulting hash satisfying the difficulty predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub nonce_hex: String,
    pub hash_hex: String,
    pub tries: u64,
}

#[derive(Debug, Clone)]
pub struct JobStats {
    pub challenge: Challenge,
    pub tries: u64,
    pub hashrate: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerProfile {
    pub job_stats: Option<JobStats>,
    pub best_batch_size: Option<usize>,
    pub batch_size_search: HashMap<usize, Vec<f64>>,
}

impl WorkerProfile {
    pub fn clear(&mut self) {
        self.job_stats = None;
        self.best_batch_size = None;
        self.batch_size_search.clear();
    }
}
