use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use config::{Config, ConfigError, Environment, File};
use tracing::warn;

use crate::error::ImpactError;
use crate::gate::FlapPolicy;
use crate::registry::ChannelDefaults;

pub const REGION_ENV: &str = "AWS_IMPACT_REGION";
pub const QUEUE_ENV: &str = "AWS_IMPACT_QUEUE";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "lowercase")]
pub struct Settings {
    #[serde(alias = "SETTINGS")]
    pub settings: SettingsSection,
    #[serde(alias = "NOISE")]
    pub noise: NoiseSettings,
    #[serde(alias = "QUEUE")]
    pub queue: QueueSettings,
    #[serde(alias = "SNS")]
    pub sns: SnsSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub struct SettingsSection {
    /// Per-channel stream configuration file.
    #[serde(alias = "STREAMS")]
    pub streams: PathBuf,
    #[serde(alias = "VERBOSE")]
    pub verbose: bool,
    #[serde(alias = "DRY_RUN")]
    pub dry_run: bool,
    /// Stamp messages with the current time instead of the record time.
    #[serde(alias = "REPLAY")]
    pub replay: bool,
    /// UDP port for real-time records when no files are given.
    #[serde(alias = "PORT")]
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub struct NoiseSettings {
    /// Seconds.
    #[serde(alias = "PROBATION")]
    pub probation: u64,
    #[serde(alias = "LEVEL")]
    pub level: i32,
    #[serde(alias = "FLAP_TOLERANCE")]
    pub flap_tolerance: usize,
    /// Seconds.
    #[serde(alias = "FLAP_WINDOW")]
    pub flap_window: u64,
    /// Seconds.
    #[serde(alias = "COOLDOWN")]
    pub cooldown: u64,
    /// Seconds without a level change before a noisy channel is released early; 0 disables.
    #[serde(alias = "QUIET")]
    pub quiet: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub struct QueueSettings {
    #[serde(alias = "ENABLED")]
    pub enabled: bool,
    #[serde(alias = "REGION")]
    pub region: Option<String>,
    /// Queue name or full queue URL.
    #[serde(alias = "QUEUE")]
    pub queue: Option<String>,
    #[serde(alias = "AWS_ACCESS_KEY_ID")]
    pub aws_access_key_id: Option<String>,
    #[serde(alias = "AWS_SECRET_ACCESS_KEY")]
    pub aws_secret_access_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub struct SnsSettings {
    #[serde(alias = "ENABLED")]
    pub enabled: bool,
    #[serde(alias = "TOPIC_ARN")]
    pub topic_arn: String,
    #[serde(alias = "AWS_REGION")]
    pub aws_region: Option<String>,
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            streams: PathBuf::from("impact.json"),
            verbose: false,
            dry_run: false,
            replay: false,
            port: 18000,
        }
    }
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            probation: 600,
            level: 2,
            flap_tolerance: 5,
            flap_window: 60,
            cooldown: 600,
            quiet: 0,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            region: None,
            queue: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
        }
    }
}

impl Default for SnsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            topic_arn: "n/a".to_string(),
            aws_region: None,
        }
    }
}

fn seconds(name: &str, secs: u64) -> Result<chrono::Duration, ImpactError> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| ImpactError::Config(format!("noise.{} of {} seconds is out of range", name, secs)))
}

impl NoiseSettings {
    pub fn flap_policy(&self) -> Result<FlapPolicy, ImpactError> {
        Ok(FlapPolicy {
            tolerance: self.flap_tolerance,
            window: seconds("flap_window", self.flap_window)?,
            cooldown: seconds("cooldown", self.cooldown)?,
            quiet: if self.quiet > 0 {
                Some(seconds("quiet", self.quiet)?)
            } else {
                None
            },
        })
    }

    pub fn channel_defaults(&self) -> Result<ChannelDefaults, ImpactError> {
        Ok(ChannelDefaults {
            probation: seconds("probation", self.probation)?,
            level: self.level,
        })
    }
}

impl QueueSettings {
    /// Fill region and queue from `AWS_IMPACT_REGION` / `AWS_IMPACT_QUEUE`
    /// when they are not already set.
    pub fn apply_env_fallback(&mut self) {
        let lookup = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        if self.region.as_deref().is_none_or(str::is_empty) {
            self.region = lookup(REGION_ENV);
        }
        if self.queue.as_deref().is_none_or(str::is_empty) {
            self.queue = lookup(QUEUE_ENV);
        }
    }
}

impl Settings {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // 1. Load defaults
        let default_settings = Settings::default();
        builder = builder.add_source(config::Config::try_from(&default_settings)?);

        // 2. Load from file if specified
        if let Some(path) = config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path));
            } else {
                warn!("Settings file not found: {:?}", path);
            }
        } else if let Some(home) = dirs::home_dir() {
            let toml_path = home.join(".impact").join("settings.toml");
            let yaml_path = home.join(".impact").join("settings.yaml");

            if toml_path.exists() {
                builder = builder.add_source(File::from(toml_path));
            } else if yaml_path.exists() {
                builder = builder.add_source(File::from(yaml_path));
            }
        }

        // 3. Environment variables, e.g. IMPACT_NOISE__LEVEL=3
        builder = builder.add_source(
            Environment::with_prefix("IMPACT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        if let Ok(table) = config.clone().try_deserialize::<serde_json::Value>()
            && let Some(map) = table.as_object()
        {
            let known_sections = ["settings", "noise", "queue", "sns"];
            for key in map.keys() {
                if !known_sections.contains(&key.to_lowercase().as_str()) {
                    warn!("Unknown configuration section: {}", key);
                }
            }
        }

        config.try_deserialize()
    }

    pub fn dump(&self, format: &str) -> Result<String, Box<dyn std::error::Error>> {
        match format.to_lowercase().as_str() {
            "toml" => Ok(toml::to_string_pretty(self)?),
            "yaml" | "yml" => Ok(serde_yaml::to_string(self)?),
            _ => Err("Unsupported format".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File as StdFile;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.settings.streams, PathBuf::from("impact.json"));
        assert_eq!(settings.noise.probation, 600);
        assert_eq!(settings.noise.level, 2);
        assert!(settings.queue.enabled);
    }

    #[test]
    fn test_load_toml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("settings.toml");
        let mut file = StdFile::create(&config_path).unwrap();
        writeln!(file, "[noise]\nlevel = 0\ncooldown = 30\n\n[queue]\nregion = \"ap-southeast-2\"").unwrap();

        let settings = Settings::new(Some(config_path)).unwrap();
        assert_eq!(settings.noise.level, 0);
        assert_eq!(settings.noise.cooldown, 30);
        assert_eq!(settings.noise.flap_tolerance, 5);
        assert_eq!(settings.queue.region.as_deref(), Some("ap-southeast-2"));
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("settings.yaml");
        let mut file = StdFile::create(&config_path).unwrap();
        writeln!(file, "settings:\n  streams: \"streams.toml\"\n  replay: true").unwrap();

        let settings = Settings::new(Some(config_path)).unwrap();
        assert_eq!(settings.settings.streams, PathBuf::from("streams.toml"));
        assert!(settings.settings.replay);
    }

    #[test]
    fn test_dump_toml() {
        let settings = Settings::default();
        let dumped = settings.dump("toml").unwrap();
        assert!(dumped.contains("probation = 600"));
        assert!(dumped.contains("streams = \"impact.json\""));
        assert!(settings.dump("ini").is_err());
    }

    #[test]
    fn test_flap_policy_conversion() {
        let mut noise = NoiseSettings::default();
        assert_eq!(noise.flap_policy().unwrap().quiet, None);
        noise.quiet = 90;
        let policy = noise.flap_policy().unwrap();
        assert_eq!(policy.quiet, Some(chrono::Duration::seconds(90)));
        assert_eq!(policy.cooldown, chrono::Duration::seconds(600));
        assert_eq!(noise.channel_defaults().unwrap().probation, chrono::Duration::minutes(10));
    }

    #[test]
    fn test_oversized_durations_are_config_errors() {
        let mut noise = NoiseSettings::default();
        noise.cooldown = 10_000_000_000_000_000;
        assert!(matches!(noise.flap_policy(), Err(ImpactError::Config(_))));

        let mut noise = NoiseSettings::default();
        noise.quiet = u64::MAX;
        assert!(matches!(noise.flap_policy(), Err(ImpactError::Config(_))));

        let mut noise = NoiseSettings::default();
        noise.probation = u64::MAX;
        let err = noise.channel_defaults().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("probation"));
    }
}
