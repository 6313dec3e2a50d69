use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use time::{
    macros::{format_description, time},
    Date, Time,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::services::AuthUser,
    error::{is_check_violation, ApiError},
    events::{
        dto::{
            CreateEventRequest, CreatedEventId, CreatedEventResponse, EventFilter,
            EventListResponse, EventResponse, FeaturedQuery, StatusMessage, UpdateEventRequest,
            UserEventsResponse,
        },
        repo::{self, EventPatch, NewEvent},
    },
    mailer::{event_confirmation_email, send_in_background},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", get(list_events).post(create_event))
        .route("/events/featured", get(featured_events))
        .route("/events/user/events", get(user_events))
        .route(
            "/events/:id",
            get(get_event).put(update_event).delete(delete_event),
        )
        .route(
            "/events/:id/register",
            post(register_for_event).delete(cancel_registration),
        )
}

#[instrument(skip(state))]
pub async fn list_events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Result<Json<EventListResponse>, ApiError> {
    let category = filter.category.as_deref().filter(|c| !c.is_empty());
    // Only the literal "true" narrows the listing; anything else is no filter
    let featured = matches!(filter.featured.as_deref(), Some("true")).then_some(true);
    let limit = filter
        .limit
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|n| *n >= 0);

    let events = repo::list(&state.db, category, featured, limit).await?;
    Ok(Json(EventListResponse {
        status: "success",
        count: events.len(),
        data: events,
    }))
}

#[instrument(skip(state))]
pub async fn featured_events(
    State(state): State<AppState>,
    Query(query): Query<FeaturedQuery>,
) -> Result<Json<EventListResponse>, ApiError> {
    let limit = query
        .limit
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(3);

    let events = repo::featured(&state.db, limit).await?;
    Ok(Json(EventListResponse {
        status: "success",
        count: events.len(),
        data: events,
    }))
}

#[instrument(skip(state))]
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EventResponse>, ApiError> {
    let event_id = parse_event_id(&id)?;
    let event = repo::get(&state.db, event_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Event not found"))?;

    Ok(Json(EventResponse {
        status: "success",
        data: event,
    }))
}

#[instrument(skip(state, user, payload))]
pub async fn create_event(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<CreatedEventResponse>), ApiError> {
    let title = payload.title.unwrap_or_default();
    let date_raw = payload.date.unwrap_or_default();
    let location = payload.location.unwrap_or_default();

    if title.is_empty() || date_raw.is_empty() || location.is_empty() {
        warn!("event creation with missing fields");
        return Err(ApiError::validation(
            "Title, date, and location are required fields",
        ));
    }

    let date = parse_event_date(&date_raw)?;
    let time = match payload.time.as_deref().filter(|t| !t.is_empty()) {
        Some(raw) => parse_event_time(raw)?,
        None => time!(12:00:00),
    };
    let seats = payload.seats.unwrap_or(100);
    if seats < 0 {
        return Err(ApiError::validation("Seats must be a non-negative number"));
    }

    let id = repo::create(
        &state.db,
        NewEvent {
            title,
            description: payload.description,
            date,
            time,
            location,
            image: payload.image,
            seats,
            category: payload.category,
            featured: payload.featured.unwrap_or(false),
        },
    )
    .await?;

    info!(event_id = id, user_id = user.id, "event created");
    Ok((
        StatusCode::CREATED,
        Json(CreatedEventResponse {
            status: "success",
            message: "Event created successfully",
            data: CreatedEventId { id },
        }),
    ))
}

#[instrument(skip(state, user, payload))]
pub async fn update_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateEventRequest>,
) -> Result<Json<StatusMessage>, ApiError> {
    let event_id = parse_event_id(&id)?;

    if let Some(seats) = payload.seats {
        if seats < 0 {
            return Err(ApiError::validation("Seats must be a non-negative number"));
        }
    }

    // Empty strings count as absent, same as missing keys
    let date = match payload.date.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_event_date(raw)?),
        None => None,
    };
    let time = match payload.time.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_event_time(raw)?),
        None => None,
    };
    let patch = EventPatch {
        title: payload.title.filter(|s| !s.is_empty()),
        description: payload.description.filter(|s| !s.is_empty()),
        date,
        time,
        location: payload.location.filter(|s| !s.is_empty()),
        image: payload.image.filter(|s| !s.is_empty()),
        seats: payload.seats,
        category: payload.category.filter(|s| !s.is_empty()),
        featured: payload.featured,
    };

    let updated = match repo::update(&state.db, event_id, patch).await {
        Ok(updated) => updated,
        Err(e) if is_check_violation(&e, "events_seats_check") => {
            warn!(event_id = event_id, "seat shrink below registrations");
            return Err(ApiError::validation(
                "Seats cannot be lower than the current number of registrations",
            ));
        }
        Err(e) => return Err(e.into()),
    };
    if updated.is_none() {
        return Err(ApiError::not_found("Event not found"));
    }

    info!(event_id = event_id, user_id = user.id, "event updated");
    Ok(Json(StatusMessage {
        status: "success",
        message: "Event updated successfully",
    }))
}

#[instrument(skip(state, user))]
pub async fn delete_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<StatusMessage>, ApiError> {
    let event_id = parse_event_id(&id)?;
    if !repo::delete(&state.db, event_id).await? {
        return Err(ApiError::not_found("Event not found"));
    }

    info!(event_id = event_id, user_id = user.id, "event deleted");
    Ok(Json(StatusMessage {
        status: "success",
        message: "Event deleted successfully",
    }))
}

#[instrument(skip(state, user))]
pub async fn register_for_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<StatusMessage>), ApiError> {
    let event_id = parse_event_id(&id)?;
    let event = repo::register(&state.db, user.id, event_id).await?;

    let (subject, html) =
        event_confirmation_email(&event.title, &event.date.to_string(), &event.location);
    send_in_background(state.mailer.clone(), user.email.clone(), subject, html);

    info!(user_id = user.id, event_id = event_id, "registration confirmed");
    Ok((
        StatusCode::CREATED,
        Json(StatusMessage {
            status: "success",
            message: "Successfully registered for the event",
        }),
    ))
}

#[instrument(skip(state, user))]
pub async fn cancel_registration(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<StatusMessage>, ApiError> {
    let event_id = parse_event_id(&id)?;
    repo::cancel(&state.db, user.id, event_id).await?;

    info!(user_id = user.id, event_id = event_id, "registration cancelled");
    Ok(Json(StatusMessage {
        status: "success",
        message: "Registration cancelled successfully",
    }))
}

#[instrument(skip(state, user))]
pub async fn user_events(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UserEventsResponse>, ApiError> {
    let events = repo::list_for_user(&state.db, user.id).await?;
    Ok(Json(UserEventsResponse {
        status: "success",
        count: events.len(),
        data: events,
    }))
}

fn parse_event_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::validation("Invalid event ID"))
}

fn parse_event_date(raw: &str) -> Result<Date, ApiError> {
    let fmt = format_description!("[year]-[month]-[day]");
    Date::parse(raw, &fmt).map_err(|_| ApiError::validation("Invalid date format"))
}

fn parse_event_time(raw: &str) -> Result<Time, ApiError> {
    let fmt = format_description!("[hour]:[minute]:[second]");
    Time::parse(raw, &fmt).map_err(|_| ApiError::validation("Invalid time format"))
}
