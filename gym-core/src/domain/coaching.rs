use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachProfile {
    pub user_id: Uuid,
    pub specialty: String,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Booked,
    Cancelled,
    Completed,
}

string_enum!(BookingStatus, "booking status", {
    Booked => "booked",
    Cancelled => "cancelled",
    Completed => "completed",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub coach_id: Uuid,
    pub member_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: BookingStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Only live bookings hold a slot; the intervals are half-open.
    pub fn overlaps(&self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Booked && self.starts_at < ends_at && starts_at < self.ends_at
    }

    /// True when `other` would collide with this booking for either the coach or the member.
    pub fn conflicts_with(&self, other: &Booking) -> bool {
        let shares_party = self.coach_id == other.coach_id
            || self.member_id == other.member_id
            || self.coach_id == other.member_id
            || self.member_id == other.coach_id;
        shares_party && self.overlaps(other.starts_at, other.ends_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn booking(coach: Uuid, member: Uuid, start: DateTime<Utc>, minutes: i64) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            coach_id: coach,
            member_id: member,
            starts_at: start,
            ends_at: start + Duration::minutes(minutes),
            status: BookingStatus::Booked,
            note: None,
            created_at: start,
            cancelled_at: None,
        }
    }

    #[test]
    fn test_back_to_back_bookings_do_not_overlap() {
        let coach = Uuid::new_v4();
        let start = Utc::now();
        let first = booking(coach, Uuid::new_v4(), start, 60);
        let second = booking(coach, Uuid::new_v4(), start + Duration::minutes(60), 60);
        assert!(!first.conflicts_with(&second));
    }

    #[test]
    fn test_same_coach_overlap_conflicts() {
        let coach = Uuid::new_v4();
        let start = Utc::now();
        let first = booking(coach, Uuid::new_v4(), start, 60);
        let second = booking(coach, Uuid::new_v4(), start + Duration::minutes(30), 60);
        assert!(first.conflicts_with(&second));
    }

    #[test]
    fn test_same_member_different_coach_conflicts() {
        let member = Uuid::new_v4();
        let start = Utc::now();
        let first = booking(Uuid::new_v4(), member, start, 60);
        let second = booking(Uuid::new_v4(), member, start + Duration::minutes(15), 30);
        assert!(first.conflicts_with(&second));
    }

    #[test]
    fn test_cancelled_booking_frees_slot() {
        let coach = Uuid::new_v4();
        let start = Utc::now();
        let mut first = booking(coach, Uuid::new_v4(), start, 60);
        first.status = BookingStatus::Cancelled;
        let second = booking(coach, Uuid::new_v4(), start, 60);
        assert!(!first.conflicts_with(&second));
    }
}
