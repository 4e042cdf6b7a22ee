pub mod database_access;
pub mod hero_abilities_db;
pub mod hero_stats_db;
pub mod heroes_db;
pub mod sync_logs_db;
pub mod types;
