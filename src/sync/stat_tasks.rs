use crate::api::overfast_api::Endpoint;
use crate::database::hero_stats_db::StatDimensions;
use crate::database::types::{Division, GameMode, Region};

/// One stats unit: a single `/heroes/stats` query and the rows it overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatTask {
    pub platform: String,
    pub gamemode: GameMode,
    pub region: Region,
    pub division: Option<Division>,
}

impl StatTask {
    pub fn division_label(&self) -> &'static str {
        self.division.map_or(Division::ALL_LABEL, Division::as_str)
    }

    pub fn label(&self) -> String {
        format!(
            "{}/{}/{}",
            self.region.as_str(),
            self.gamemode.as_str(),
            self.division_label()
        )
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::HeroStats {
            platform: self.platform.clone(),
            gamemode: self.gamemode,
            region: self.region,
            division: self.division,
        }
    }

    pub fn dimensions(&self) -> StatDimensions {
        StatDimensions {
            platform: self.platform.clone(),
            gamemode: self.gamemode.as_str().to_string(),
            region: self.region.as_str().to_string(),
            competitive_division: self.division_label().to_string(),
        }
    }
}

/// Every region gets competitive across all divisions, then each division in
/// rank order, then quickplay: 3 x 9 = 27 tasks.
pub fn build_stat_tasks(platform: &str) -> Vec<StatTask> {
    let mut tasks = Vec::with_capacity(Region::ALL.len() * (Division::ALL.len() + 2));

    for region in Region::ALL {
        let task = |gamemode, division| StatTask {
            platform: platform.to_string(),
            gamemode,
            region,
            division,
        };

        tasks.push(task(GameMode::Competitive, None));
        for division in Division::ALL {
            tasks.push(task(GameMode::Competitive, Some(division)));
        }
        tasks.push(task(GameMode::Quickplay, None));
    }

    tasks
}
