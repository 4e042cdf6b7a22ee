use sqlx::{FromRow, SqliteConnection};
use tracing::{debug, warn};

use crate::api::overfast_api::ApiHeroDetail;
use crate::database::types::AbilityType;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct HeroAbility {
    pub name: String,
    pub description: String,
    pub icon: String,
    pub ability_type: String,
}

/// Collects skills and perks from a hero detail payload. Entries without a name
/// cannot be keyed and are skipped.
pub fn map_to_abilities(hero_key: &str, detail: &ApiHeroDetail) -> Vec<HeroAbility> {
    let skills = detail.abilities.iter().map(|a| {
        (
            &a.name,
            &a.description,
            &a.icon,
            Some(AbilityType::Skill),
        )
    });
    let perks = detail.perks.iter().map(|p| {
        let kind = p.kind.as_deref().and_then(AbilityType::from_perk_type);
        if kind.is_none() {
            warn!(hero_key, perk = %p.name, kind = ?p.kind, "Unknown perk type, skipping");
        }
        (&p.name, &p.description, &p.icon, kind)
    });

    skills
        .chain(perks)
        .filter_map(|(name, description, icon, kind)| {
            let name = name.trim();
            if name.is_empty() {
                debug!(hero_key, "Skipping ability without a name");
                return None;
            }
            Some(HeroAbility {
                name: name.to_string(),
                description: description.clone(),
                icon: icon.clone(),
                ability_type: kind?.as_str().to_string(),
            })
        })
        .collect()
}

/// Upserts each ability on its own; earlier rows stay written if a later one fails.
pub async fn upsert_abilities(
    conn: &mut SqliteConnection,
    hero_key: &str,
    abilities: &[HeroAbility],
) -> Result<usize, sqlx::Error> {
    let mut written = 0;

    for ability in abilities {
        sqlx::query(
            r#"
                INSERT INTO hero_abilities (hero_key, name, description, icon, ability_type)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (hero_key, name) DO UPDATE SET
                    description = excluded.description,
                    icon = excluded.icon,
                    ability_type = excluded.ability_type
            "#,
        )
        .bind(hero_key)
        .bind(&ability.name)
        .bind(&ability.description)
        .bind(&ability.icon)
        .bind(&ability.ability_type)
        .execute(&mut *conn)
        .await?;
        written += 1;
    }

    debug!(hero_key, written, "Upserted hero abilities");
    Ok(written)
}

#[cfg(test)]
pub async fn query_abilities_by_hero(
    conn: &mut SqliteConnection,
    hero_key: &str,
) -> Result<Vec<HeroAbility>, sqlx::Error> {
    let rows: Vec<HeroAbility> = sqlx::query_as(
        r#"
            SELECT name, description, icon, ability_type
            FROM hero_abilities
            WHERE hero_key = ?
            ORDER BY ability_type, name
        "#,
    )
    .bind(hero_key)
    .fetch_all(conn)
    .await?;

    Ok(rows)
}
