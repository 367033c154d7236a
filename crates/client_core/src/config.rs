use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "item_list.toml";
pub const DEFAULT_CLASS_NAME: &str = "Item";
pub const DEFAULT_FETCH_LIMIT: u32 = 100;

/// Header the access key is presented under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    #[default]
    Master,
    RestApi,
    Javascript,
}

impl KeyKind {
    pub fn header_name(self) -> &'static str {
        match self {
            Self::Master => "X-Parse-Master-Key",
            Self::RestApi => "X-Parse-REST-API-Key",
            Self::Javascript => "X-Parse-Javascript-Key",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "master" => Some(Self::Master),
            "rest_api" | "rest" => Some(Self::RestApi),
            "javascript" | "js" => Some(Self::Javascript),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint_url: String,
    pub app_id: String,
    pub access_key: String,
    pub key_kind: KeyKind,
    pub live_query_url: Option<String>,
    pub class_name: String,
    pub fetch_limit: u32,
    pub state_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:1337/parse".into(),
            app_id: String::new(),
            access_key: String::new(),
            key_kind: KeyKind::default(),
            live_query_url: None,
            class_name: DEFAULT_CLASS_NAME.into(),
            fetch_limit: DEFAULT_FETCH_LIMIT,
            state_dir: None,
        }
    }
}

/// Configuration that passed startup validation.
#[derive(Clone)]
pub struct ValidatedConfig {
    pub endpoint_url: String,
    pub live_query_url: String,
    pub app_id: String,
    pub access_key: String,
    pub key_kind: KeyKind,
    pub class_name: String,
    pub fetch_limit: u32,
    pub state_dir: Option<PathBuf>,
}

impl std::fmt::Debug for ValidatedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("live_query_url", &self.live_query_url)
            .field("app_id", &self.app_id)
            .field("access_key", &"<redacted>")
            .field("key_kind", &self.key_kind)
            .field("class_name", &self.class_name)
            .field("fetch_limit", &self.fetch_limit)
            .field("state_dir", &self.state_dir)
            .finish()
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let endpoint_url = self.endpoint_url.trim();
        if endpoint_url.is_empty() {
            return Err(ConfigError::Missing("endpoint_url"));
        }
        let endpoint = parse_url("endpoint_url", endpoint_url, &["http", "https"])?;

        let live_query_url = match self.live_query_url.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                parse_url("live_query_url", raw, &["ws", "wss"])?;
                raw.to_string()
            }
            _ => websocket_url_for(&endpoint)?,
        };

        if self.app_id.trim().is_empty() {
            return Err(ConfigError::Missing("app_id"));
        }
        if self.access_key.trim().is_empty() {
            return Err(ConfigError::Missing("access_key"));
        }
        if self.class_name.trim().is_empty() {
            return Err(ConfigError::Missing("class_name"));
        }
        if self.fetch_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch_limit",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(ValidatedConfig {
            endpoint_url: endpoint_url.trim_end_matches('/').to_string(),
            live_query_url,
            app_id: self.app_id.trim().to_string(),
            access_key: self.access_key.trim().to_string(),
            key_kind: self.key_kind,
            class_name: self.class_name.trim().to_string(),
            fetch_limit: self.fetch_limit,
            state_dir: self.state_dir.clone(),
        })
    }

    /// Applies `ITEM_LIST_*` and `APP__*` overrides; `APP__*` wins when both are set.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("APP__{name}")).or_else(|| lookup(&format!("ITEM_LIST_{name}")))
        };

        if let Some(v) = var("ENDPOINT_URL") {
            self.endpoint_url = v;
        }
        if let Some(v) = var("APP_ID") {
            self.app_id = v;
        }
        if let Some(v) = var("ACCESS_KEY") {
            self.access_key = v;
        }
        if let Some(v) = var("KEY_KIND") {
            self.key_kind = KeyKind::parse(&v).ok_or_else(|| ConfigError::Invalid {
                field: "key_kind",
                reason: format!("unknown key kind '{v}'"),
            })?;
        }
        if let Some(v) = var("LIVE_QUERY_URL") {
            self.live_query_url = Some(v);
        }
        if let Some(v) = var("CLASS_NAME") {
            self.class_name = v;
        }
        if let Some(v) = var("FETCH_LIMIT") {
            self.fetch_limit = v.parse().map_err(|err| ConfigError::Invalid {
                field: "fetch_limit",
                reason: format!("{err}"),
            })?;
        }
        if let Some(v) = var("STATE_DIR") {
            self.state_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }
}

/// Loads defaults, then the config file, then environment overrides.
///
/// An explicit `path` must exist; otherwise `item_list.toml` in the working
/// directory is read when present.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                read_config_file(default_path)?
            } else {
                ClientConfig::default()
            }
        }
    };
    config.apply_env_overrides(|name| std::env::var(name).ok())?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<ClientConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_url(field: &'static str, raw: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|err| ConfigError::Invalid {
        field,
        reason: format!("'{raw}' is not an absolute URL: {err}"),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("scheme must be one of {}", schemes.join(", ")),
        });
    }
    if url.host_str().is_none() {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("'{raw}' has no host"),
        });
    }
    Ok(url)
}

fn websocket_url_for(endpoint: &Url) -> Result<String, ConfigError> {
    let raw = endpoint.as_str().trim_end_matches('/');
    if let Some(rest) = raw.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = raw.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        Err(ConfigError::Invalid {
            field: "endpoint_url",
            reason: "endpoint_url must start with http:// or https://".into(),
        })
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
