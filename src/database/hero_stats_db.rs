use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

#[cfg(test)]
use crate::database::types::Role;

/// The non-hero part of a stat row's natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, FromRow)]
pub struct StatDimensions {
    pub platform: String,
    pub gamemode: String,
    pub region: String,
    pub competitive_division: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatValues {
    pub winrate: Option<f64>,
    pub pickrate: Option<f64>,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct HeroStat {
    pub hero_key: String,
    #[sqlx(flatten)]
    pub dimensions: StatDimensions,
    pub winrate: Option<f64>,
    pub pickrate: Option<f64>,
    pub synced_at: DateTime<Utc>,
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub struct StatFilter {
    pub dimensions: StatDimensions,
    pub role: Option<Role>,
}

pub async fn upsert_stat(
    conn: &mut SqliteConnection,
    hero_key: &str,
    dimensions: &StatDimensions,
    values: StatValues,
    synced_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO hero_stats (
                hero_key,
                platform,
                gamemode,
                region,
                competitive_division,
                winrate,
                pickrate,
                synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (hero_key, platform, gamemode, region, competitive_division) DO UPDATE SET
                winrate = excluded.winrate,
                pickrate = excluded.pickrate,
                synced_at = excluded.synced_at
        "#,
    )
    .bind(hero_key)
    .bind(&dimensions.platform)
    .bind(&dimensions.gamemode)
    .bind(&dimensions.region)
    .bind(&dimensions.competitive_division)
    .bind(values.winrate)
    .bind(values.pickrate)
    .bind(synced_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Upserts rows one by one and stops at the first failure; rows already
/// written stay written.
pub async fn upsert_stats(
    conn: &mut SqliteConnection,
    dimensions: &StatDimensions,
    rows: &[(String, StatValues)],
    synced_at: DateTime<Utc>,
) -> Result<usize, sqlx::Error> {
    let mut written = 0;
    for (hero_key, values) in rows {
        upsert_stat(&mut *conn, hero_key, dimensions, *values, synced_at).await?;
        written += 1;
    }

    debug!(
        platform = %dimensions.platform,
        gamemode = %dimensions.gamemode,
        region = %dimensions.region,
        division = %dimensions.competitive_division,
        written,
        "Upserted hero stats"
    );
    Ok(written)
}

#[cfg(test)]
pub async fn query_stats(
    conn: &mut SqliteConnection,
    filter: &StatFilter,
) -> Result<Vec<HeroStat>, sqlx::Error> {
    let rows: Vec<HeroStat> = sqlx::query_as(
        r#"
            SELECT
                s.hero_key,
                s.platform,
                s.gamemode,
                s.region,
                s.competitive_division,
                s.winrate,
                s.pickrate,
                s.synced_at
            FROM hero_stats s
            JOIN heroes h ON h.key = s.hero_key
            WHERE s.platform = ?1
              AND s.gamemode = ?2
              AND s.region = ?3
              AND s.competitive_division = ?4
              AND (?5 IS NULL OR h.role = ?5)
            ORDER BY s.winrate DESC, s.hero_key
        "#,
    )
    .bind(&filter.dimensions.platform)
    .bind(&filter.dimensions.gamemode)
    .bind(&filter.dimensions.region)
    .bind(&filter.dimensions.competitive_division)
    .bind(filter.role.map(Role::as_str))
    .fetch_all(conn)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::database::{database_access, heroes_db};
    use crate::test_support::sample_hero;

    fn asia_gold() -> StatDimensions {
        StatDimensions {
            platform: "pc".into(),
            gamemode: "competitive".into(),
            region: "asia".into(),
            competitive_division: "gold".into(),
        }
    }

    fn values(winrate: f64, pickrate: f64) -> StatValues {
        StatValues {
            winrate: Some(winrate),
            pickrate: Some(pickrate),
        }
    }

    #[tokio::test]
    async fn repeated_upserts_converge_to_one_row_per_key() {
        let pool = database_access::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        heroes_db::upsert_hero(&mut conn, &sample_hero("ana", "support"))
            .await
            .unwrap();
        let synced_at = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        let rows = vec![("ana".to_string(), values(51.5, 12.0))];

        upsert_stats(&mut conn, &asia_gold(), &rows, synced_at).await.unwrap();
        let once = query_stats(&mut conn, &StatFilter { dimensions: asia_gold(), role: None })
            .await
            .unwrap();
        upsert_stats(&mut conn, &asia_gold(), &rows, synced_at).await.unwrap();
        let twice = query_stats(&mut conn, &StatFilter { dimensions: asia_gold(), role: None })
            .await
            .unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
        assert_eq!(twice[0].winrate, Some(51.5));
        assert_eq!(twice[0].synced_at, synced_at);
    }

    #[tokio::test]
    async fn other_dimensions_and_missing_heroes_are_left_untouched() {
        let pool = database_access::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        for (key, role) in [("ana", "support"), ("dva", "tank")] {
            heroes_db::upsert_hero(&mut conn, &sample_hero(key, role)).await.unwrap();
        }
        let first = Utc.with_ymd_and_hms(2025, 3, 1, 3, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        let mut silver = asia_gold();
        silver.competitive_division = "silver".into();

        let both = vec![
            ("ana".to_string(), values(50.0, 10.0)),
            ("dva".to_string(), values(48.0, 9.0)),
        ];
        upsert_stats(&mut conn, &asia_gold(), &both, first).await.unwrap();
        upsert_stats(&mut conn, &silver, &both, first).await.unwrap();

        let only_ana = vec![(
            "ana".to_string(),
            StatValues {
                winrate: None,
                pickrate: Some(11.0),
            },
        )];
        upsert_stats(&mut conn, &asia_gold(), &only_ana, second).await.unwrap();

        let gold = query_stats(&mut conn, &StatFilter { dimensions: asia_gold(), role: None })
            .await
            .unwrap();
        let dva = gold.iter().find(|s| s.hero_key == "dva").unwrap();
        assert_eq!(dva.winrate, Some(48.0));
        assert_eq!(dva.synced_at, first);
        let ana = gold.iter().find(|s| s.hero_key == "ana").unwrap();
        assert_eq!(ana.winrate, None);
        assert_eq!(ana.pickrate, Some(11.0));
        assert_eq!(ana.synced_at, second);

        let silver_rows = query_stats(&mut conn, &StatFilter { dimensions: silver, role: None })
            .await
            .unwrap();
        assert!(silver_rows.iter().all(|s| s.synced_at == first));

        let tanks = query_stats(
            &mut conn,
            &StatFilter {
                dimensions: asia_gold(),
                role: Some(Role::Tank),
            },
        )
        .await
        .unwrap();
        assert_eq!(tanks.len(), 1);
        assert_eq!(tanks[0].hero_key, "dva");
    }
}
