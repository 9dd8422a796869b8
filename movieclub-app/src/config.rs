use crate::domain::{ChatScope, UserId};
use crate::infrastructure::flows::DEFAULT_FLOW_TTL;
use crate::infrastructure::security::DEFAULT_EVENTS_PER_MINUTE;
use movieclub_errors::{ClubError, ClubResult};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_SWEEP_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct ClubConfig {
    /// `None` runs on the in-memory store.
    pub database_url: Option<String>,
    pub groups: Vec<ChatScope>,
    pub admin_ids: Vec<UserId>,
    pub rating_window: Option<chrono::Duration>,
    pub flow_ttl: Duration,
    pub events_per_minute: u32,
    /// Zero disables the deadline sweeper.
    pub deadline_sweep: Duration,
    pub listen_addr: SocketAddr,
}

impl Default for ClubConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            groups: Vec::new(),
            admin_ids: Vec::new(),
            rating_window: None,
            flow_ttl: DEFAULT_FLOW_TTL,
            events_per_minute: DEFAULT_EVENTS_PER_MINUTE,
            deadline_sweep: Duration::from_secs(DEFAULT_SWEEP_SECS),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

impl ClubConfig {
    pub fn from_env() -> ClubResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> ClubResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let rating_window = get("CLUB_RATING_WINDOW_HOURS")
            .map(|raw| parse::<i64>("CLUB_RATING_WINDOW_HOURS", &raw))
            .transpose()?
            .map(|hours| {
                if hours <= 0 {
                    Err(ClubError::Validation(
                        "CLUB_RATING_WINDOW_HOURS must be positive".to_string(),
                    ))
                } else {
                    Ok(chrono::Duration::hours(hours))
                }
            })
            .transpose()?;

        Ok(Self {
            database_url: get("DATABASE_URL"),
            groups: get("CLUB_GROUPS")
                .map(|raw| parse_groups(&raw))
                .transpose()?
                .unwrap_or_default(),
            admin_ids: get("CLUB_ADMIN_IDS")
                .map(|raw| parse_list::<UserId>("CLUB_ADMIN_IDS", &raw))
                .transpose()?
                .unwrap_or_default(),
            rating_window,
            flow_ttl: get("CLUB_FLOW_TTL_SECS")
                .map(|raw| parse::<u64>("CLUB_FLOW_TTL_SECS", &raw).map(Duration::from_secs))
                .transpose()?
                .unwrap_or(DEFAULT_FLOW_TTL),
            events_per_minute: get("CLUB_EVENTS_PER_MINUTE")
                .map(|raw| parse::<u32>("CLUB_EVENTS_PER_MINUTE", &raw))
                .transpose()?
                .unwrap_or(DEFAULT_EVENTS_PER_MINUTE),
            deadline_sweep: Duration::from_secs(
                get("CLUB_DEADLINE_SWEEP_SECS")
                    .map(|raw| parse::<u64>("CLUB_DEADLINE_SWEEP_SECS", &raw))
                    .transpose()?
                    .unwrap_or(DEFAULT_SWEEP_SECS),
            ),
            listen_addr: parse(
                "CLUB_LISTEN_ADDR",
                &get("CLUB_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            )?,
        })
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> ClubResult<T> {
    raw.parse()
        .map_err(|_| ClubError::Validation(format!("{key}: cannot parse {raw:?}")))
}

fn parse_list<T: FromStr>(key: &str, raw: &str) -> ClubResult<Vec<T>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse(key, item))
        .collect()
}

/// `chat_id[:topic_id]` entries separated by commas.
fn parse_groups(raw: &str) -> ClubResult<Vec<ChatScope>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once(':') {
            Some((chat, topic)) => Ok(ChatScope::new(
                parse("CLUB_GROUPS", chat.trim())?,
                Some(parse("CLUB_GROUPS", topic.trim())?),
            )),
            None => Ok(ChatScope::new(parse("CLUB_GROUPS", item)?, None)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ClubResult<ClubConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClubConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(config(&[]).unwrap(), ClubConfig::default());
    }

    #[test]
    fn parses_every_variable() {
        let config = config(&[
            ("DATABASE_URL", "postgres://club@localhost/club"),
            ("CLUB_GROUPS", "-100123, -100456:7"),
            ("CLUB_ADMIN_IDS", "11,22"),
            ("CLUB_RATING_WINDOW_HOURS", "48"),
            ("CLUB_FLOW_TTL_SECS", "120"),
            ("CLUB_EVENTS_PER_MINUTE", "5"),
            ("CLUB_DEADLINE_SWEEP_SECS", "0"),
            ("CLUB_LISTEN_ADDR", "127.0.0.1:8080"),
        ])
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://club@localhost/club"));
        assert_eq!(
            config.groups,
            vec![ChatScope::new(-100123, None), ChatScope::new(-100456, Some(7))]
        );
        assert_eq!(config.admin_ids, vec![11, 22]);
        assert_eq!(config.rating_window, Some(chrono::Duration::hours(48)));
        assert_eq!(config.flow_ttl, Duration::from_secs(120));
        assert_eq!(config.events_per_minute, 5);
        assert!(config.deadline_sweep.is_zero());
        assert_eq!(config.listen_addr.port(), 8080);
    }

    #[test]
    fn blank_database_url_means_memory_store() {
        assert_eq!(config(&[("DATABASE_URL", "  ")]).unwrap().database_url, None);
    }

    #[test]
    fn errors_name_the_variable() {
        let err = config(&[("CLUB_ADMIN_IDS", "11,abc")]).unwrap_err();
        assert!(matches!(&err, ClubError::Validation(msg) if msg.starts_with("CLUB_ADMIN_IDS")));

        let err = config(&[("CLUB_GROUPS", "-100:topic")]).unwrap_err();
        assert!(matches!(&err, ClubError::Validation(msg) if msg.starts_with("CLUB_GROUPS")));

        assert!(config(&[("CLUB_RATING_WINDOW_HOURS", "0")]).is_err());
    }
}
