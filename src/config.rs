use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::presets::SocialFormat;

static CONFIG: OnceCell<RuntimeConfig> = OnceCell::new();

/// The upload namespace used when no `folder` is configured.
pub const DEFAULT_FOLDER: &str = "social-format-uploads";

pub fn config() -> &'static RuntimeConfig {
    CONFIG.get().expect("config init")
}

#[cfg(test)]
pub fn init_test(data: &str) -> Result<()> {
    let cfg: RuntimeConfig = serde_yaml::from_str(data)?;
    let _ = CONFIG.set(cfg);
    Ok(())
}

/// Loads the runtime config from the given file, falling back to the
/// defaults when no file is given.
///
/// This can only be called once per process.
pub async fn init(config_file: Option<&Path>) -> Result<()> {
    let cfg = match config_file {
        None => RuntimeConfig::default(),
        Some(path) => load(path).await?,
    };

    cfg.validate()?;

    CONFIG
        .set(cfg)
        .map_err(|_| anyhow!("Runtime config has already been initialised."))
}

async fn load(path: &Path) -> Result<RuntimeConfig> {
    let file = tokio::fs::read(path).await?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(serde_json::from_slice(&file)?),
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_slice(&file)?),
        other => Err(anyhow!(
            "Config file must be either `json` or `yaml`, got {:?}",
            other,
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_folder")]
    /// The folder uploads are placed in on the provider.
    ///
    /// Defaults to `social-format-uploads`.
    pub folder: String,

    #[serde(default)]
    /// The preset selected before the user picks one.
    ///
    /// Must be one of the preset labels, e.g. `"instagram square (1:1)"`.
    pub default_preset: SocialFormat,

    #[serde(default = "default_max_upload_size")]
    /// The max request body size in bytes the upload endpoint accepts.
    ///
    /// Defaults to 10MiB.
    pub max_upload_size: usize,

    #[serde(default)]
    /// The upstream image provider config.
    pub provider: ProviderConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            folder: default_folder(),
            default_preset: SocialFormat::default(),
            max_upload_size: default_max_upload_size(),
            provider: ProviderConfig::default(),
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.folder.trim().is_empty() {
            return Err(anyhow!("`folder` must not be empty."));
        }

        if self.max_upload_size == 0 {
            return Err(anyhow!("`max_upload_size` must be greater than 0."));
        }

        url::Url::parse(&self.provider.api_url)
            .map_err(|e| anyhow!("`provider.api_url` is not a valid url: {}", e))?;
        url::Url::parse(&self.provider.delivery_url)
            .map_err(|e| anyhow!("`provider.delivery_url` is not a valid url: {}", e))?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_api_url")]
    /// The base url of the upload API.
    pub api_url: String,

    #[serde(default = "default_delivery_url")]
    /// The base url renderings are delivered from.
    pub delivery_url: String,

    #[serde(default)]
    /// An optional timeout in seconds for requests made to the provider.
    ///
    /// No timeout is applied if this is unset.
    pub timeout: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            delivery_url: default_delivery_url(),
            timeout: None,
        }
    }
}

impl ProviderConfig {
    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

/// The account credentials used to talk to the provider.
///
/// These are given by the environment at startup and are never
/// read from the config file.
#[derive(Clone)]
pub struct ProviderCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl ProviderCredentials {
    pub fn new(cloud_name: String, api_key: String, api_secret: String) -> Result<Self> {
        for (name, value) in [
            ("cloud name", &cloud_name),
            ("api key", &api_key),
            ("api secret", &api_secret),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("The provider {} must not be empty.", name));
            }
        }

        Ok(Self {
            cloud_name,
            api_key,
            api_secret,
        })
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// The template written out by the `init` command.
#[derive(Serialize)]
pub struct ConfigTemplate {
    pub folder: &'static str,
    pub default_preset: &'static str,
    pub max_upload_size: usize,
    pub provider: ProviderTemplate,
}

#[derive(Serialize)]
pub struct ProviderTemplate {
    pub api_url: String,
    pub delivery_url: String,
    pub timeout: Option<u64>,
}

impl ConfigTemplate {
    pub fn new() -> Self {
        Self {
            folder: DEFAULT_FOLDER,
            default_preset: SocialFormat::default().label(),
            max_upload_size: default_max_upload_size(),
            provider: ProviderTemplate {
                api_url: default_api_url(),
                delivery_url: default_delivery_url(),
                timeout: Some(30),
            },
        }
    }
}

fn default_folder() -> String {
    DEFAULT_FOLDER.to_string()
}

const fn default_max_upload_size() -> usize {
    10 * 1024 * 1024
}

fn default_api_url() -> String {
    "https://api.cloudinary.com".to_string()
}

fn default_delivery_url() -> String {
    "https://res.cloudinary.com".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: RuntimeConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.folder, DEFAULT_FOLDER);
        assert_eq!(cfg.default_preset, SocialFormat::InstagramSquare);
        assert_eq!(cfg.max_upload_size, 10 * 1024 * 1024);
        assert_eq!(cfg.provider.api_url, "https://api.cloudinary.com");
        assert!(cfg.provider.timeout().is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_preset_is_parsed_from_label() {
        let cfg: RuntimeConfig =
            serde_yaml::from_str("default_preset: \"tweeter post (16:9)\"").unwrap();
        assert_eq!(cfg.default_preset, SocialFormat::TweeterPost);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let cfg: RuntimeConfig = serde_yaml::from_str("folder: \"  \"").unwrap();
        assert!(cfg.validate().is_err());

        let cfg: RuntimeConfig =
            serde_yaml::from_str("provider:\n  api_url: \"not a url\"").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn template_parses_back_into_a_valid_config() {
        let out = serde_yaml::to_string(&ConfigTemplate::new()).unwrap();
        let cfg: RuntimeConfig = serde_yaml::from_str(&out).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.provider.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn credentials_must_be_present() {
        assert!(ProviderCredentials::new("demo".into(), "key".into(), "".into()).is_err());
        assert!(ProviderCredentials::new(" ".into(), "key".into(), "secret".into()).is_err());

        let creds =
            ProviderCredentials::new("demo".into(), "key".into(), "secret".into()).unwrap();
        assert!(!format!("{:?}", creds).contains("\"secret\""));
    }
}
