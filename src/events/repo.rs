use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::{Date, OffsetDateTime, Time};

use crate::error::ApiError;

/// Event record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub date: Date,
    pub time: Time,
    pub location: String,
    pub image: Option<String>,
    pub seats: i32,
    pub registered: i32,
    pub category: Option<String>,
    pub featured: bool,
    pub created_at: OffsetDateTime,
}

/// An event joined with the caller's registration metadata.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RegisteredEvent {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub date: Date,
    pub time: Time,
    pub location: String,
    pub image: Option<String>,
    pub seats: i32,
    pub registered: i32,
    pub category: Option<String>,
    pub featured: bool,
    pub created_at: OffsetDateTime,
    pub registration_date: OffsetDateTime,
    pub status: String,
}

/// Fields for a new event, defaults already applied.
#[derive(Debug)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub date: Date,
    pub time: Time,
    pub location: String,
    pub image: Option<String>,
    pub seats: i32,
    pub category: Option<String>,
    pub featured: bool,
}

/// Typed partial update; `None` leaves the stored value untouched.
#[derive(Debug, Default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<Date>,
    pub time: Option<Time>,
    pub location: Option<String>,
    pub image: Option<String>,
    pub seats: Option<i32>,
    pub category: Option<String>,
    pub featured: Option<bool>,
}

pub async fn list(
    db: &PgPool,
    category: Option<&str>,
    featured: Option<bool>,
    limit: Option<i64>,
) -> anyhow::Result<Vec<Event>> {
    let rows = sqlx::query_as::<_, Event>(
        r#"
        SELECT id, title, description, date, time, location, image,
               seats, registered, category, featured, created_at
        FROM events
        WHERE ($1::text IS NULL OR category = $1)
          AND ($2::boolean IS NULL OR featured = $2)
        ORDER BY date ASC
        LIMIT $3
        "#,
    )
    .bind(category)
    .bind(featured)
    .bind(limit)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn featured(db: &PgPool, limit: i64) -> anyhow::Result<Vec<Event>> {
    let rows = sqlx::query_as::<_, Event>(
        r#"
        SELECT id, title, description, date, time, location, image,
               seats, registered, category, featured, created_at
        FROM events
        WHERE featured = TRUE
        ORDER BY date ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn get(db: &PgPool, id: i64) -> anyhow::Result<Option<Event>> {
    let event = sqlx::query_as::<_, Event>(
        r#"
        SELECT id, title, description, date, time, location, image,
               seats, registered, category, featured, created_at
        FROM events
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(event)
}

pub async fn create(db: &PgPool, event: NewEvent) -> anyhow::Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO events
            (title, description, date, time, location, image, seats, category, featured)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(&event.title)
    .bind(&event.description)
    .bind(event.date)
    .bind(event.time)
    .bind(&event.location)
    .bind(&event.image)
    .bind(event.seats)
    .bind(&event.category)
    .bind(event.featured)
    .fetch_one(db)
    .await?;
    Ok(id)
}

/// Apply a partial update. Returns the updated id, or None if the event
/// does not exist. Shrinking seats below the current registration count
/// trips the events_seats_check constraint.
pub async fn update(db: &PgPool, id: i64, patch: EventPatch) -> anyhow::Result<Option<i64>> {
    let updated = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE events
           SET title = COALESCE($2, title),
               description = COALESCE($3, description),
               date = COALESCE($4, date),
               time = COALESCE($5, time),
               location = COALESCE($6, location),
               image = COALESCE($7, image),
               seats = COALESCE($8, seats),
               category = COALESCE($9, category),
               featured = COALESCE($10, featured)
         WHERE id = $1
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(&patch.title)
    .bind(&patch.description)
    .bind(patch.date)
    .bind(patch.time)
    .bind(&patch.location)
    .bind(&patch.image)
    .bind(patch.seats)
    .bind(&patch.category)
    .bind(patch.featured)
    .fetch_optional(db)
    .await?;
    Ok(updated)
}

pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
    let deleted = sqlx::query("DELETE FROM events WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();
    Ok(deleted > 0)
}

/// Register a user for an event. The whole check-then-increment runs inside
/// one transaction holding the event row lock, so concurrent registrations
/// against the same event serialize and the seat counter can never pass
/// `seats`. Any failure drops the transaction and rolls back. Returns the
/// event as it was when the seat was taken.
pub async fn register(db: &PgPool, user_id: i64, event_id: i64) -> Result<Event, ApiError> {
    let mut tx = db.begin().await?;

    let event = sqlx::query_as::<_, Event>(
        r#"
        SELECT id, title, description, date, time, location, image,
               seats, registered, category, featured, created_at
        FROM events
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(event_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Event not found"))?;

    let already = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM event_registrations WHERE event_id = $1 AND user_id = $2",
    )
    .bind(event_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if already > 0 {
        return Err(ApiError::conflict("You are already registered for this event"));
    }

    if event.registered >= event.seats {
        return Err(ApiError::capacity("This event is fully booked"));
    }

    sqlx::query("INSERT INTO event_registrations (event_id, user_id) VALUES ($1, $2)")
        .bind(event_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                ApiError::conflict("You are already registered for this event")
            }
            _ => ApiError::from(e),
        })?;

    sqlx::query("UPDATE events SET registered = registered + 1 WHERE id = $1")
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(event)
}

/// Cancel a registration. Takes the event row lock first, in the same order
/// as `register`, so the two paths never deadlock against each other.
pub async fn cancel(db: &PgPool, user_id: i64, event_id: i64) -> Result<(), ApiError> {
    let mut tx = db.begin().await?;

    let event = sqlx::query_scalar::<_, i64>("SELECT id FROM events WHERE id = $1 FOR UPDATE")
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await?;
    if event.is_none() {
        return Err(ApiError::not_found("Registration not found"));
    }

    let deleted = sqlx::query("DELETE FROM event_registrations WHERE event_id = $1 AND user_id = $2")
        .bind(event_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::not_found("Registration not found"));
    }

    // The registration existed, so the counter is at least 1
    sqlx::query("UPDATE events SET registered = registered - 1 WHERE id = $1")
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn list_for_user(db: &PgPool, user_id: i64) -> anyhow::Result<Vec<RegisteredEvent>> {
    let rows = sqlx::query_as::<_, RegisteredEvent>(
        r#"
        SELECT e.id, e.title, e.description, e.date, e.time, e.location, e.image,
               e.seats, e.registered, e.category, e.featured, e.created_at,
               er.registration_date, er.status
        FROM events e
        INNER JOIN event_registrations er ON e.id = er.event_id
        WHERE er.user_id = $1
        ORDER BY e.date ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::User;
    use time::macros::{date, time};

    async fn seed_user(pool: &PgPool, email: &str) -> i64 {
        User::create(pool, "Test Member", email, "$argon2id$fake$hash")
            .await
            .expect("seed user")
            .id
    }

    async fn seed_event(pool: &PgPool, seats: i32) -> i64 {
        create(
            pool,
            NewEvent {
                title: "Quant Careers Night".into(),
                description: None,
                date: date!(2031 - 06 - 01),
                time: time!(18:00:00),
                location: "Frankfurt".into(),
                image: None,
                seats,
                category: Some("networking".into()),
                featured: false,
            },
        )
        .await
        .expect("seed event")
    }

    async fn counter_of(pool: &PgPool, event_id: i64) -> i32 {
        sqlx::query_scalar::<_, i32>("SELECT registered FROM events WHERE id = $1")
            .bind(event_id)
            .fetch_one(pool)
            .await
            .expect("event row")
    }

    async fn rows_of(pool: &PgPool, event_id: i64) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM event_registrations WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_one(pool)
        .await
        .expect("registration count")
    }

    #[sqlx::test]
    async fn counter_always_matches_registration_rows(pool: PgPool) {
        let event_id = seed_event(&pool, 10).await;
        let a = seed_user(&pool, "a@example.com").await;
        let b = seed_user(&pool, "b@example.com").await;
        let c = seed_user(&pool, "c@example.com").await;

        register(&pool, a, event_id).await.expect("a registers");
        register(&pool, b, event_id).await.expect("b registers");
        register(&pool, c, event_id).await.expect("c registers");
        cancel(&pool, b, event_id).await.expect("b cancels");

        let counter = counter_of(&pool, event_id).await;
        assert_eq!(counter, 2);
        assert_eq!(rows_of(&pool, event_id).await, counter as i64);
        assert!(counter >= 0 && counter <= 10);
    }

    #[sqlx::test]
    async fn concurrent_registrations_never_overbook(pool: PgPool) {
        let seats = 3;
        let event_id = seed_event(&pool, seats).await;
        let mut user_ids = Vec::new();
        for i in 0..8 {
            user_ids.push(seed_user(&pool, &format!("u{i}@example.com")).await);
        }

        let mut handles = Vec::new();
        for user_id in user_ids {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                register(&pool, user_id, event_id).await
            }));
        }

        let mut successes = 0;
        let mut capacity_failures = 0;
        for handle in handles {
            match handle.await.expect("task") {
                Ok(_) => successes += 1,
                Err(ApiError::Capacity(_)) => capacity_failures += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(successes, seats);
        assert_eq!(capacity_failures, 8 - seats);
        assert_eq!(counter_of(&pool, event_id).await, seats);
        assert_eq!(rows_of(&pool, event_id).await, seats as i64);
    }

    #[sqlx::test]
    async fn duplicate_registration_is_a_conflict(pool: PgPool) {
        let event_id = seed_event(&pool, 5).await;
        let user_id = seed_user(&pool, "a@example.com").await;

        register(&pool, user_id, event_id).await.expect("first");
        let err = register(&pool, user_id, event_id).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(err.to_string(), "You are already registered for this event");

        // No double increment
        assert_eq!(counter_of(&pool, event_id).await, 1);
        assert_eq!(rows_of(&pool, event_id).await, 1);
    }

    #[sqlx::test]
    async fn register_cancel_roundtrip_restores_the_counter(pool: PgPool) {
        let event_id = seed_event(&pool, 5).await;
        let user_id = seed_user(&pool, "a@example.com").await;
        let before = counter_of(&pool, event_id).await;

        register(&pool, user_id, event_id).await.expect("register");
        cancel(&pool, user_id, event_id).await.expect("cancel");

        assert_eq!(counter_of(&pool, event_id).await, before);
        assert_eq!(rows_of(&pool, event_id).await, 0);
    }

    #[sqlx::test]
    async fn last_seat_frees_up_after_cancellation(pool: PgPool) {
        let event_id = seed_event(&pool, 1).await;
        let a = seed_user(&pool, "a@example.com").await;
        let b = seed_user(&pool, "b@example.com").await;

        register(&pool, a, event_id).await.expect("a takes the seat");
        assert_eq!(counter_of(&pool, event_id).await, 1);

        let err = register(&pool, b, event_id).await.unwrap_err();
        assert!(matches!(err, ApiError::Capacity(_)));
        assert_eq!(err.to_string(), "This event is fully booked");
        assert_eq!(counter_of(&pool, event_id).await, 1);

        cancel(&pool, a, event_id).await.expect("a cancels");
        assert_eq!(counter_of(&pool, event_id).await, 0);

        register(&pool, b, event_id).await.expect("b gets the freed seat");
        assert_eq!(counter_of(&pool, event_id).await, 1);
    }

    #[sqlx::test]
    async fn cancel_without_registration_is_not_found(pool: PgPool) {
        let event_id = seed_event(&pool, 5).await;
        let user_id = seed_user(&pool, "a@example.com").await;

        let err = cancel(&pool, user_id, event_id).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(err.to_string(), "Registration not found");
    }

    #[sqlx::test]
    async fn register_on_missing_event_is_not_found(pool: PgPool) {
        let user_id = seed_user(&pool, "a@example.com").await;
        let err = register(&pool, user_id, 999_999).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(err.to_string(), "Event not found");
    }

    #[sqlx::test]
    async fn deleting_an_event_cascades_its_registrations(pool: PgPool) {
        let event_id = seed_event(&pool, 5).await;
        let user_id = seed_user(&pool, "a@example.com").await;
        register(&pool, user_id, event_id).await.expect("register");

        assert!(delete(&pool, event_id).await.expect("delete event"));
        assert_eq!(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM event_registrations")
                .fetch_one(&pool)
                .await
                .unwrap(),
            0
        );

        let err = cancel(&pool, user_id, event_id).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[sqlx::test]
    async fn account_deletion_gives_seats_back(pool: PgPool) {
        let event_id = seed_event(&pool, 5).await;
        let other_event = seed_event(&pool, 5).await;
        let leaver = seed_user(&pool, "leaver@example.com").await;
        let stayer = seed_user(&pool, "stayer@example.com").await;

        register(&pool, leaver, event_id).await.expect("leaver");
        register(&pool, leaver, other_event).await.expect("leaver 2nd");
        register(&pool, stayer, event_id).await.expect("stayer");

        assert!(User::delete_account(&pool, leaver).await.expect("delete"));

        assert_eq!(counter_of(&pool, event_id).await, 1);
        assert_eq!(rows_of(&pool, event_id).await, 1);
        assert_eq!(counter_of(&pool, other_event).await, 0);
        assert_eq!(rows_of(&pool, other_event).await, 0);
    }

    #[sqlx::test]
    async fn seats_cannot_shrink_below_registrations(pool: PgPool) {
        let event_id = seed_event(&pool, 5).await;
        let a = seed_user(&pool, "a@example.com").await;
        let b = seed_user(&pool, "b@example.com").await;
        register(&pool, a, event_id).await.expect("a");
        register(&pool, b, event_id).await.expect("b");

        let patch = EventPatch {
            seats: Some(1),
            ..EventPatch::default()
        };
        let err = update(&pool, event_id, patch).await.unwrap_err();
        assert!(crate::error::is_check_violation(&err, "events_seats_check"));

        // The failed shrink changed nothing
        assert_eq!(counter_of(&pool, event_id).await, 2);
        let event = get(&pool, event_id).await.unwrap().expect("event");
        assert_eq!(event.seats, 5);
    }

    #[sqlx::test]
    async fn patch_updates_only_supplied_fields(pool: PgPool) {
        let event_id = seed_event(&pool, 5).await;
        let patch = EventPatch {
            title: Some("Renamed Night".into()),
            seats: Some(50),
            ..EventPatch::default()
        };
        update(&pool, event_id, patch)
            .await
            .expect("update")
            .expect("event exists");

        let event = get(&pool, event_id).await.unwrap().expect("event");
        assert_eq!(event.title, "Renamed Night");
        assert_eq!(event.seats, 50);
        assert_eq!(event.location, "Frankfurt");
        assert_eq!(event.category.as_deref(), Some("networking"));
        assert_eq!(event.registered, 0);
    }

    #[sqlx::test]
    async fn listing_filters_and_orders_by_date(pool: PgPool) {
        for (title, day, category, is_featured) in [
            ("Late", 20, "workshop", false),
            ("Early", 5, "networking", true),
            ("Middle", 12, "workshop", true),
        ] {
            let id = create(
                &pool,
                NewEvent {
                    title: title.into(),
                    description: None,
                    date: Date::from_calendar_date(2031, time::Month::July, day).unwrap(),
                    time: time!(12:00:00),
                    location: "Berlin".into(),
                    image: None,
                    seats: 100,
                    category: Some(category.into()),
                    featured: is_featured,
                },
            )
            .await
            .expect("create");
            assert!(id > 0);
        }

        let all = list(&pool, None, None, None).await.expect("list all");
        let titles: Vec<_> = all.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["Early", "Middle", "Late"]);

        let workshops = list(&pool, Some("workshop"), None, None).await.expect("list");
        assert_eq!(workshops.len(), 2);

        let top = list(&pool, None, Some(true), Some(1)).await.expect("list");
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].title, "Early");

        let featured_events = featured(&pool, 3).await.expect("featured");
        assert_eq!(featured_events.len(), 2);
        assert!(featured_events.iter().all(|e| e.featured));
    }

    #[sqlx::test]
    async fn user_listing_joins_registration_metadata(pool: PgPool) {
        let event_id = seed_event(&pool, 5).await;
        let user_id = seed_user(&pool, "a@example.com").await;
        register(&pool, user_id, event_id).await.expect("register");

        let events = list_for_user(&pool, user_id).await.expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event_id);
        assert_eq!(events[0].status, "confirmed");
    }
}
