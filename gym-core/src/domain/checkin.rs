use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: Uuid,
    pub user_id: Uuid,
    pub membership_id: Uuid,
    /// Staff member who scanned the member in, or the member for self check-in.
    pub checked_in_by: Uuid,
    pub checked_in_at: DateTime<Utc>,
    /// UTC calendar day; at most one check-in per member per day.
    pub check_in_date: NaiveDate,
}

impl CheckIn {
    pub fn new(user_id: Uuid, membership_id: Uuid, checked_in_by: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            membership_id,
            checked_in_by,
            checked_in_at: now,
            check_in_date: now.date_naive(),
        }
    }
}
