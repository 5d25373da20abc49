use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Process configuration: a `config.toml` under the data dir, with every
/// field overridable through `MEDIADEX_*` environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub admin_ids: Vec<u64>,
    #[serde(default)]
    pub gateway_url: String,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MEDIADEX_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mediadex")
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = data_dir().join("config.toml");
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::from_toml(&raw)?
        } else {
            Config::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing config.toml")
    }

    /// Environment beats file. The lookup is injected so tests don't have to
    /// mutate the process environment.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(token) = get("MEDIADEX_BOT_TOKEN") {
            self.bot_token = token;
        }
        if let Some(ids) = get("MEDIADEX_ADMIN_IDS") {
            self.admin_ids = ids
                .split(',')
                .filter_map(|part| part.trim().parse().ok())
                .collect();
        }
        if let Some(url) = get("MEDIADEX_GATEWAY_URL") {
            self.gateway_url = url;
        }
        if let Some(path) = get("MEDIADEX_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot_token.is_empty() {
            bail!("bot_token is not set (config.toml or MEDIADEX_BOT_TOKEN)");
        }
        if self.gateway_url.is_empty() {
            bail!("gateway_url is not set (config.toml or MEDIADEX_GATEWAY_URL)");
        }
        if self.admin_ids.is_empty() {
            bail!("admin_ids is empty: no operator would be able to use the bot");
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| data_dir().join("mediadex.db"))
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_full_toml() {
        let config = Config::from_toml(
            r#"
            bot_token = "123:abc"
            admin_ids = [111, 222]
            gateway_url = "http://127.0.0.1:8118"
            db_path = "/tmp/test.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.bot_token, "123:abc");
        assert!(config.is_admin(111));
        assert!(!config.is_admin(333));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/test.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_beat_file_values() {
        let mut config = Config::from_toml(r#"bot_token = "file-token""#).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("MEDIADEX_BOT_TOKEN", "env-token"),
            ("MEDIADEX_ADMIN_IDS", "7, 8,9"),
            ("MEDIADEX_GATEWAY_URL", "http://gw:1"),
        ]);
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.bot_token, "env-token");
        assert_eq!(config.admin_ids, vec![7, 8, 9]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_pieces() {
        assert!(Config::default().validate().is_err());

        let mut config = Config::default();
        config.bot_token = "t".into();
        config.gateway_url = "u".into();
        assert!(config.validate().is_err(), "no admins means unusable bot");

        config.admin_ids = vec![1];
        assert!(config.validate().is_ok());
    }
}
