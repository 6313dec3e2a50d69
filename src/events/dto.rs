use serde::{Deserialize, Serialize};

use crate::events::repo::{Event, RegisteredEvent};

/// Query filter for the public event listing. `featured` and `limit` arrive
/// as raw strings; anything that does not parse is ignored rather than
/// rejected.
#[derive(Debug, Deserialize)]
pub struct EventFilter {
    pub category: Option<String>,
    pub featured: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeaturedQuery {
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub image: Option<String>,
    pub seats: Option<i32>,
    pub category: Option<String>,
    pub featured: Option<bool>,
}

/// Partial event update; absent fields keep their stored value. The
/// `registered` counter is owned by the registration ledger and cannot be
/// set through this request.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub image: Option<String>,
    pub seats: Option<i32>,
    pub category: Option<String>,
    pub featured: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub status: &'static str,
    pub count: usize,
    pub data: Vec<Event>,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub status: &'static str,
    pub data: Event,
}

#[derive(Debug, Serialize)]
pub struct CreatedEventResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub data: CreatedEventId,
}

#[derive(Debug, Serialize)]
pub struct CreatedEventId {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct UserEventsResponse {
    pub status: &'static str,
    pub count: usize,
    pub data: Vec<RegisteredEvent>,
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
    pub message: &'static str,
}
