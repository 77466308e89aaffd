use chrono::{DateTime, Utc};

/// Update status ids as stored in the site_updates table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Idle,
    Updating,
}

impl UpdateStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            UpdateStatus::Idle => 1,
            UpdateStatus::Updating => 2,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            2 => UpdateStatus::Updating,
            _ => UpdateStatus::Idle,
        }
    }
}

/// One row of the site_updates table.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct SiteCursor {
    pub id: i64,
    pub site_id: i64,
    pub last_question_id: Option<i64>,
    pub last_question_time: Option<i64>,
    pub next_update_at: Option<DateTime<Utc>>,
    pub status: UpdateStatus,
}

/// A site selected for update this cycle. `cursor_id` is None for a site that
/// has a subscription but no site_updates row yet (first-time activation).
#[derive(Debug, Clone)]
pub struct DueSite {
    pub cursor_id: Option<i64>,
    pub last_question_id: Option<i64>,
    pub last_question_time: Option<i64>,
    pub site_slug: String,
    pub site_id: i64,
    pub status: Option<UpdateStatus>,
}
