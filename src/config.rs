use std::env;
use std::path::PathBuf;

use crate::models::Developer;

const DEFAULT_DATABASE_PATH: &str = "data/costs.sqlite";
const DEFAULT_SERVICE_NAME: &str = "cost-reports";

const DEFAULT_DEVELOPERS: [(&str, &str); 2] = [("Daniel", "Ziv"), ("Taisiya", "Angel")];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub service_name: String,
    pub seed_initial_user: bool,
    pub developers: Vec<Developer>,
}

impl AppConfig {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let developers = DEFAULT_DEVELOPERS
            .iter()
            .enumerate()
            .map(|(index, (first, last))| Developer {
                first_name: non_empty(&format!("DEVELOPER_{}_FIRST_NAME", index + 1))
                    .unwrap_or_else(|| first.to_string()),
                last_name: non_empty(&format!("DEVELOPER_{}_LAST_NAME", index + 1))
                    .unwrap_or_else(|| last.to_string()),
            })
            .collect();

        Self {
            database_path: non_empty("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            service_name: non_empty("SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            seed_initial_user: non_empty("SEED_INITIAL_USER")
                .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            developers,
        }
    }
}
