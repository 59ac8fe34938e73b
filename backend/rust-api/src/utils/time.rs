use chrono::{DateTime, Utc};
use mongodb::bson;

/// Convert chrono DateTime to BSON DateTime for use in update documents
pub fn chrono_to_bson(date: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(date.timestamp_millis())
}
