//! Application-level configuration loading: persona catalog, simulated voting pace, local paths
//! and the URLs handed to the frontend.

use std::{env, fmt::Write as _, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::room::Persona;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PLANNING_POKER_CONFIG_PATH";
const DEFAULT_IDENTITY_PATH: &str = "data/identity.json";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:5173";
const DEFAULT_AVATAR_TEMPLATE: &str = "https://api.dicebear.com/9.x/thumbs/svg?seed={seed}";
const SEED_PLACEHOLDER: &str = "{seed}";
const DEFAULT_MIN_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 4_000;

/// Bounds of the random pause a simulated participant takes before voting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteDelay {
    pub min: Duration,
    pub max: Duration,
}

impl VoteDelay {
    /// Build the bounds, swapping them when given in the wrong order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }
}

impl Default for VoteDelay {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_MIN_DELAY_MS),
            Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        )
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    personas: Vec<Persona>,
    vote_delay: VoteDelay,
    identity_path: PathBuf,
    public_base_url: String,
    avatar_url_template: String,
    drive_simulated: bool,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        personas = config.personas.len(),
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a configuration document. Missing keys take their default value.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    pub fn vote_delay(&self) -> VoteDelay {
        self.vote_delay
    }

    pub fn identity_path(&self) -> &PathBuf {
        &self.identity_path
    }

    /// Whether this process runs the simulated participants' voting.
    pub fn drive_simulated(&self) -> bool {
        self.drive_simulated
    }

    /// Invite URL of a room, as written into the frontend's address bar.
    pub fn share_url(&self, room_id: &str) -> String {
        format!("{}/?room={}", self.public_base_url, encode_component(room_id))
    }

    /// Avatar reference derived from a seed such as a display name.
    pub fn avatar_url(&self, seed: &str) -> String {
        self.avatar_url_template
            .replace(SEED_PLACEHOLDER, &encode_component(seed.trim()))
    }

    pub fn with_vote_delay(mut self, vote_delay: VoteDelay) -> Self {
        self.vote_delay = vote_delay;
        self
    }

    pub fn with_identity_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_path = path.into();
        self
    }

    pub fn with_drive_simulated(mut self, drive: bool) -> Self {
        self.drive_simulated = drive;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    personas: Option<Vec<RawPersona>>,
    vote_delay_ms: Option<RawDelay>,
    identity_path: Option<PathBuf>,
    public_base_url: Option<String>,
    avatar_url_template: Option<String>,
    drive_simulated: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawPersona {
    id: String,
    name: String,
    role: String,
    #[serde(default)]
    avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDelay {
    min: u64,
    max: u64,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let avatar_url_template = value
            .avatar_url_template
            .filter(|template| !template.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AVATAR_TEMPLATE.to_string());
        let mut config = Self {
            personas: Vec::new(),
            vote_delay: value
                .vote_delay_ms
                .map(|delay| {
                    VoteDelay::new(
                        Duration::from_millis(delay.min),
                        Duration::from_millis(delay.max),
                    )
                })
                .unwrap_or_default(),
            identity_path: value
                .identity_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IDENTITY_PATH)),
            public_base_url: value
                .public_base_url
                .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            avatar_url_template,
            drive_simulated: value.drive_simulated.unwrap_or(true),
        };

        let raw_personas = value
            .personas
            .filter(|personas| !personas.is_empty())
            .unwrap_or_else(default_personas);
        config.personas = raw_personas
            .into_iter()
            .map(|persona| {
                let avatar_ref = persona
                    .avatar
                    .unwrap_or_else(|| config.avatar_url(&persona.name));
                Persona {
                    id: persona.id,
                    name: persona.name,
                    role: persona.role,
                    avatar_ref,
                }
            })
            .collect();
        config
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Percent-encode everything outside the URL unreserved set.
fn encode_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

/// Built-in persona catalog shipped with the binary.
fn default_personas() -> Vec<RawPersona> {
    [
        (
            "architect",
            "Ines",
            "a pragmatic software architect who worries about integration points and hidden coupling",
        ),
        (
            "qa",
            "Tomasz",
            "a meticulous QA engineer who counts every edge case that needs a test",
        ),
        (
            "junior",
            "Kai",
            "an enthusiastic junior developer who tends to underestimate unfamiliar work",
        ),
        (
            "pm",
            "Rosa",
            "a product manager who thinks in user value and prefers small, shippable slices",
        ),
        (
            "devops",
            "Amara",
            "a DevOps engineer focused on deployment, monitoring and operational risk",
        ),
        (
            "designer",
            "Leo",
            "a UX designer who considers every screen, state and accessibility concern",
        ),
    ]
    .into_iter()
    .map(|(id, name, role)| RawPersona {
        id: id.to_string(),
        name: name.to_string(),
        role: role.to_string(),
        avatar: None,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_setting() {
        let config = AppConfig::default();
        assert_eq!(config.personas().len(), 6);
        assert_eq!(config.vote_delay(), VoteDelay::default());
        assert_eq!(config.identity_path(), &PathBuf::from(DEFAULT_IDENTITY_PATH));
        assert!(config.drive_simulated());
        assert!(config.personas()[0].avatar_ref.contains("seed=Ines"));
    }

    #[test]
    fn partial_documents_keep_defaults_for_missing_keys() {
        let config = AppConfig::from_json(
            r#"{
                "vote_delay_ms": { "min": 5000, "max": 10 },
                "public_base_url": "https://poker.example.com/",
                "drive_simulated": false
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.vote_delay(),
            VoteDelay {
                min: Duration::from_millis(10),
                max: Duration::from_millis(5000)
            }
        );
        assert_eq!(
            config.share_url("ab12"),
            "https://poker.example.com/?room=ab12"
        );
        assert!(!config.drive_simulated());
        assert_eq!(config.personas().len(), 6);
    }

    #[test]
    fn custom_personas_replace_the_catalog() {
        let config = AppConfig::from_json(
            r#"{ "personas": [ { "id": "sre", "name": "Noor", "role": "an SRE", "avatar": "noor.png" } ] }"#,
        )
        .unwrap();
        assert_eq!(config.personas().len(), 1);
        assert_eq!(config.personas()[0].participant_id(), "sim-sre");
        assert_eq!(config.personas()[0].avatar_ref, "noor.png");
    }

    #[test]
    fn avatar_seeds_are_percent_encoded() {
        let config = AppConfig::default();
        assert_eq!(
            config.avatar_url(" Zoë B "),
            "https://api.dicebear.com/9.x/thumbs/svg?seed=Zo%C3%AB%20B"
        );
    }

    #[test]
    fn invalid_documents_are_errors() {
        assert!(AppConfig::from_json("{ not json").is_err());
        assert!(AppConfig::from_json(r#"{ "vote_delay_ms": 3 }"#).is_err());
    }
}
