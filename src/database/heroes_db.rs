use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use tracing::{debug, warn};

use crate::api::overfast_api::{ApiHeroDetail, ApiHeroSummary};
use crate::database::types::{MapperError, Role};

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Hero {
    pub key: String,
    pub name: String,
    pub portrait: String,
    pub role: Option<String>,
    pub description: String,
    pub location: Option<String>,
    pub age: Option<i64>,
    pub hitpoints_health: i64,
    pub hitpoints_armor: i64,
    pub hitpoints_shields: i64,
    pub synced_at: DateTime<Utc>,
}

/// Builds a hero row from the roster entry and its detail payload.
/// Detail wins over the roster entry where both carry a value.
pub fn map_to_hero(
    summary: &ApiHeroSummary,
    detail: &ApiHeroDetail,
    synced_at: DateTime<Utc>,
) -> Result<Hero, MapperError> {
    let key = summary.key.trim();
    if key.is_empty() {
        return Err(MapperError::MissingField { field: "key" });
    }

    let name = if detail.name.is_empty() {
        summary.name.clone()
    } else {
        detail.name.clone()
    };

    let portrait = if summary.portrait.is_empty() {
        detail.portrait.clone().unwrap_or_default()
    } else {
        summary.portrait.clone()
    };

    let role = detail
        .role
        .as_deref()
        .or(summary.role.as_deref())
        .and_then(|r| match Role::try_from(r) {
            Ok(role) => Some(role.as_str().to_string()),
            Err(()) => {
                warn!(hero_key = key, role = r, "Unknown hero role, storing none");
                None
            }
        });

    Ok(Hero {
        key: key.to_string(),
        name,
        portrait,
        role,
        description: detail.description.clone(),
        location: detail.location.clone().filter(|l| !l.is_empty()),
        age: detail.age,
        hitpoints_health: non_negative(key, "health", detail.hitpoints.health),
        hitpoints_armor: non_negative(key, "armor", detail.hitpoints.armor),
        hitpoints_shields: non_negative(key, "shields", detail.hitpoints.shields),
        synced_at,
    })
}

fn non_negative(hero_key: &str, field: &'static str, value: i64) -> i64 {
    if value < 0 {
        warn!(hero_key, field, value, "Negative hitpoints from upstream, clamping to 0");
        0
    } else {
        value
    }
}

pub async fn upsert_hero(conn: &mut SqliteConnection, hero: &Hero) -> Result<(), sqlx::Error> {
    debug!(hero_key = %hero.key, "Upserting hero");
    sqlx::query(
        r#"
            INSERT INTO heroes (
                key,
                name,
                portrait,
                role,
                description,
                location,
                age,
                hitpoints_health,
                hitpoints_armor,
                hitpoints_shields,
                synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                name = excluded.name,
                portrait = excluded.portrait,
                role = excluded.role,
                description = excluded.description,
                location = excluded.location,
                age = excluded.age,
                hitpoints_health = excluded.hitpoints_health,
                hitpoints_armor = excluded.hitpoints_armor,
                hitpoints_shields = excluded.hitpoints_shields,
                synced_at = excluded.synced_at
        "#,
    )
    .bind(&hero.key)
    .bind(&hero.name)
    .bind(&hero.portrait)
    .bind(&hero.role)
    .bind(&hero.description)
    .bind(&hero.location)
    .bind(hero.age)
    .bind(hero.hitpoints_health)
    .bind(hero.hitpoints_armor)
    .bind(hero.hitpoints_shields)
    .bind(hero.synced_at)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn query_hero_keys(conn: &mut SqliteConnection) -> Result<HashSet<String>, sqlx::Error> {
    let keys: Vec<(String,)> = sqlx::query_as("SELECT key FROM heroes")
        .fetch_all(conn)
        .await?;

    Ok(keys.into_iter().map(|(key,)| key).collect())
}

pub async fn query_heroes(
    conn: &mut SqliteConnection,
    role: Option<Role>,
) -> Result<Vec<Hero>, sqlx::Error> {
    let rows: Vec<Hero> = sqlx::query_as(
        r#"
            SELECT
                key,
                name,
                portrait,
                role,
                description,
                location,
                age,
                hitpoints_health,
                hitpoints_armor,
                hitpoints_shields,
                synced_at
            FROM heroes
            WHERE (?1 IS NULL OR role = ?1)
            ORDER BY key
        "#,
    )
    .bind(role.map(Role::as_str))
    .fetch_all(conn)
    .await?;

    Ok(rows)
}

#[cfg(test)]
pub async fn query_hero_by_key(
    conn: &mut SqliteConnection,
    key: &str,
) -> Result<Option<Hero>, sqlx::Error> {
    let row: Option<Hero> = sqlx::query_as(
        r#"
            SELECT
                key,
                name,
                portrait,
                role,
                description,
                location,
                age,
                hitpoints_health,
                hitpoints_armor,
                hitpoints_shields,
                synced_at
            FROM heroes
            WHERE key = ?
        "#,
    )
    .bind(key)
    .fetch_optional(conn)
    .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::database_access;
    use crate::test_support::sample_hero;

    fn summary(key: &str) -> ApiHeroSummary {
        serde_json::from_value(serde_json::json!({
            "key": key,
            "name": "Ana",
            "portrait": "https://cdn.example/ana.png",
            "role": "support"
        }))
        .unwrap()
    }

    #[test]
    fn maps_detail_with_defaults() {
        let detail: ApiHeroDetail = serde_json::from_value(serde_json::json!({
            "name": "아나",
            "description": "Sniper",
            "role": "SUPPORT",
            "location": "Cairo, Egypt",
            "age": 60,
            "hitpoints": {"health": 250, "armor": -5}
        }))
        .unwrap();

        let hero = map_to_hero(&summary("ana"), &detail, Utc::now()).unwrap();

        assert_eq!(hero.key, "ana");
        assert_eq!(hero.name, "아나");
        assert_eq!(hero.portrait, "https://cdn.example/ana.png");
        assert_eq!(hero.role.as_deref(), Some("support"));
        assert_eq!(hero.location.as_deref(), Some("Cairo, Egypt"));
        assert_eq!(hero.age, Some(60));
        assert_eq!(hero.hitpoints_health, 250);
        assert_eq!(hero.hitpoints_armor, 0);
        assert_eq!(hero.hitpoints_shields, 0);
    }

    #[test]
    fn unknown_role_is_dropped_and_blank_key_rejected() {
        let detail: ApiHeroDetail =
            serde_json::from_value(serde_json::json!({"name": "X", "role": "healer"})).unwrap();
        let mut entry = summary("ana");
        entry.role = None;
        assert_eq!(map_to_hero(&entry, &detail, Utc::now()).unwrap().role, None);

        entry.key = "  ".into();
        assert!(matches!(
            map_to_hero(&entry, &detail, Utc::now()),
            Err(MapperError::MissingField { field: "key" })
        ));
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_updates_in_place() {
        let pool = database_access::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let ana = sample_hero("ana", "support");
        upsert_hero(&mut conn, &ana).await.unwrap();
        upsert_hero(&mut conn, &ana).await.unwrap();
        let once = query_heroes(&mut conn, None).await.unwrap();
        assert_eq!(once, vec![ana.clone()]);

        let mut renamed = ana.clone();
        renamed.name = "Ana Amari".into();
        renamed.hitpoints_health = 200;
        upsert_hero(&mut conn, &renamed).await.unwrap();

        let stored = query_hero_by_key(&mut conn, "ana").await.unwrap().unwrap();
        assert_eq!(stored, renamed);
        assert_eq!(query_hero_keys(&mut conn).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_filters_by_role() {
        let pool = database_access::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        for (key, role) in [("ana", "support"), ("dva", "tank"), ("mercy", "support")] {
            upsert_hero(&mut conn, &sample_hero(key, role)).await.unwrap();
        }

        let supports = query_heroes(&mut conn, Some(Role::Support)).await.unwrap();
        let keys: Vec<&str> = supports.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["ana", "mercy"]);
        assert_eq!(query_heroes(&mut conn, None).await.unwrap().len(), 3);
        assert!(query_hero_by_key(&mut conn, "genji").await.unwrap().is_none());
    }
}
