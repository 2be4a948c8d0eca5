//! Configuration for the activity bridge
//!
//! Pipeline definitions come from a YAML file (JSON and TOML are accepted by
//! extension). Ambient settings are layered: compiled defaults, then the file's
//! `settings` section, then `ACTIVITY_BRIDGE__SETTINGS__<FIELD>` environment
//! variables.
//!
//! Nothing here touches the network. [`ConfigValidator`] turns the raw
//! definitions into a [`ValidatedConfig`] before any pipeline starts.

use crate::catalog::{self, Resource};
use crate::error::ConfigError;
use crate::models::Credential;
use crate::subscription::EventFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Environment prefix for setting overrides
pub const ENV_PREFIX: &str = "ACTIVITY_BRIDGE";

/// Name of the single pipeline synthesized in deployment mode
pub const DEPLOYMENT_PIPELINE: &str = "default";

/// Whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub settings: BridgeSettings,

    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,
}

/// Ambient settings shared by all pipelines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Per-request ceiling for webhook POSTs
    pub dispatch_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub user_agent: String,
    /// Base URL of the people API used to verify tokens
    pub identity_url: String,
    /// Relay endpoint the transport connects to
    pub transport_url: String,
    /// Address for `/health` and `/metrics`; disabled when unset
    pub metrics_addr: Option<String>,
    /// How long shutdown waits for in-flight deliveries
    pub shutdown_grace_seconds: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            dispatch_timeout_seconds: 30,
            connect_timeout_seconds: 10,
            user_agent: format!("activity-bridge/{}", env!("CARGO_PKG_VERSION")),
            identity_url: "https://webexapis.com/v1".to_string(),
            transport_url: "wss://localhost:8443/activities".to_string(),
            metrics_addr: None,
            shutdown_grace_seconds: 5,
        }
    }
}

impl BridgeSettings {
    /// Reject settings that would make the bridge hang or spin
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch_timeout_seconds == 0 {
            return Err(ConfigError::invalid_setting(
                "dispatch_timeout_seconds",
                "must be greater than 0",
            ));
        }
        if self.connect_timeout_seconds == 0 {
            return Err(ConfigError::invalid_setting(
                "connect_timeout_seconds",
                "must be greater than 0",
            ));
        }
        if self.identity_url.trim().is_empty() {
            return Err(ConfigError::invalid_setting("identity_url", "must not be empty"));
        }
        if self.transport_url.trim().is_empty() {
            return Err(ConfigError::invalid_setting("transport_url", "must not be empty"));
        }
        if let Some(addr) = &self.metrics_addr {
            addr.parse::<std::net::SocketAddr>().map_err(|e| {
                ConfigError::invalid_setting("metrics_addr", format!("{}: {}", addr, e))
            })?;
        }
        Ok(())
    }
}

/// One forwarding pipeline as written in the file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Used for logging only
    #[serde(default)]
    pub name: String,
    /// Environment variable holding the access token
    #[serde(default)]
    pub token_env: String,
    /// Empty means every catalog resource
    #[serde(default)]
    pub resources: Vec<String>,
    /// Empty means `all`
    #[serde(default)]
    pub events: String,
    #[serde(default)]
    pub targets: Vec<TargetDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDefinition {
    #[serde(default)]
    pub url: String,
}

impl TargetDefinition {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self { url: url.into() }
    }
}

/// Where token values come from
pub trait SecretSource {
    fn secret(&self, key: &str) -> Option<String>;
}

/// Reads secrets from the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl SecretSource for HashMap<String, String> {
    fn secret(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// A pipeline that passed validation, credential resolved
#[derive(Debug, Clone)]
pub struct ValidatedPipeline {
    pub name: String,
    pub credential: Credential,
    /// Resources to subscribe, already expanded to the full catalog for firehose pipelines
    pub resources: Vec<&'static Resource>,
    pub filter: EventFilter,
    pub destinations: Vec<String>,
    pub firehose: bool,
}

/// Output of validation; the only input the supervisor accepts
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub settings: BridgeSettings,
    pub pipelines: Vec<ValidatedPipeline>,
}

/// Checks pipeline definitions, first failure wins
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(
        definitions: &[PipelineDefinition],
        secrets: &dyn SecretSource,
    ) -> Result<Vec<ValidatedPipeline>, ConfigError> {
        if definitions.is_empty() {
            return Err(ConfigError::EmptyConfig);
        }

        definitions
            .iter()
            .enumerate()
            .map(|(index, definition)| Self::validate_one(index, definition, secrets))
            .collect()
    }

    fn validate_one(
        index: usize,
        definition: &PipelineDefinition,
        secrets: &dyn SecretSource,
    ) -> Result<ValidatedPipeline, ConfigError> {
        let name = definition.name.clone();

        let credential = Some(definition.token_env.trim())
            .filter(|key| !key.is_empty())
            .and_then(|key| secrets.secret(key))
            .map(Credential::new)
            .filter(|credential| !credential.is_empty())
            .ok_or_else(|| ConfigError::MissingCredential {
                index,
                name: name.clone(),
            })?;

        if definition.targets.is_empty() {
            return Err(ConfigError::NoDestinations { index, name });
        }
        if definition.targets.iter().any(|t| t.url.trim().is_empty()) {
            return Err(ConfigError::InvalidDestination { index, name });
        }

        let resources = if definition.resources.is_empty() {
            catalog::RESOURCES.iter().collect()
        } else {
            definition
                .resources
                .iter()
                .map(|resource| {
                    catalog::resource(resource).ok_or_else(|| ConfigError::UnknownResource {
                        index,
                        name: name.clone(),
                        resource: resource.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(ValidatedPipeline {
            name,
            credential,
            resources,
            filter: EventFilter::from(definition.events.as_str()),
            destinations: definition
                .targets
                .iter()
                .map(|t| t.url.trim().to_string())
                .collect(),
            firehose: definition.resources.is_empty(),
        })
    }
}

impl BridgeConfig {
    /// Load from `path`, layering defaults, the file and environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        if !path.is_file() {
            return Err(ConfigError::read(display, "no such file"));
        }

        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => config::FileFormat::Json,
            Some("toml") => config::FileFormat::Toml,
            _ => config::FileFormat::Yaml,
        };

        Self::builder()?
            .add_source(config::File::new(&display, format))
            .add_source(Self::env_source())
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(|e| ConfigError::parse(display, e.to_string()))
    }

    /// Defaults plus environment overrides, no file
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(Self::env_source())
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(ConfigError::from)
    }

    /// Single firehose pipeline from `TOKEN`, `PORT` and optional `TARGET`.
    /// Returns `None` when `TOKEN` or `PORT` is unset.
    pub fn deployment_pipeline(
        env: &dyn SecretSource,
    ) -> Result<Option<PipelineDefinition>, ConfigError> {
        let token = env.secret("TOKEN").filter(|v| !v.is_empty());
        let port = env.secret("PORT").filter(|v| !v.is_empty());
        let (Some(_), Some(port)) = (token, port) else {
            return Ok(None);
        };

        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid_setting("PORT", "PORT is not a valid number"))?;
        let target = env
            .secret("TARGET")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "localhost".to_string());

        Ok(Some(PipelineDefinition {
            name: DEPLOYMENT_PIPELINE.to_string(),
            token_env: "TOKEN".to_string(),
            resources: Vec::new(),
            events: catalog::ALL_EVENTS.to_string(),
            targets: vec![TargetDefinition::new(format!("http://{}:{}", target, port))],
        }))
    }

    /// Validate pipelines, then settings
    pub fn validate(&self, secrets: &dyn SecretSource) -> Result<ValidatedConfig, ConfigError> {
        let pipelines = ConfigValidator::validate(&self.pipelines, secrets)?;
        self.settings.validate()?;

        Ok(ValidatedConfig {
            settings: self.settings.clone(),
            pipelines,
        })
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let defaults = config::Config::try_from(&BridgeConfig::default())?;
        Ok(config::Config::builder().add_source(defaults))
    }

    fn env_source() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::io::Write;

    fn secrets(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn definition(
        name: &str,
        token_env: &str,
        resources: &[&str],
        targets: &[&str],
    ) -> PipelineDefinition {
        PipelineDefinition {
            name: name.to_string(),
            token_env: token_env.to_string(),
            resources: resources.iter().map(|r| r.to_string()).collect(),
            events: String::new(),
            targets: targets.iter().map(|t| TargetDefinition::new(*t)).collect(),
        }
    }

    fn write_config(content: &str, extension: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(extension)
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_definition_list_rejected() {
        let err = ConfigValidator::validate(&[], &secrets(&[])).unwrap_err();
        assert_eq!(err, ConfigError::EmptyConfig);
    }

    #[test]
    fn test_missing_credential_source_rejected() {
        let defs = vec![definition("bad", "", &["messages"], &["http://localhost:8080"])];
        let err = ConfigValidator::validate(&defs, &secrets(&[])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingCredential {
                index: 0,
                name: "bad".to_string()
            }
        );
    }

    #[test]
    fn test_unresolvable_credential_rejected() {
        let defs = vec![definition("bot", "UNSET_TOKEN", &[], &["http://localhost:8080"])];
        let err = ConfigValidator::validate(&defs, &secrets(&[("UNSET_TOKEN", "")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { index: 0, .. }));
    }

    #[test]
    fn test_no_destinations_rejected() {
        let defs = vec![definition("no-targets", "TOKEN", &["messages"], &[])];
        let err = ConfigValidator::validate(&defs, &secrets(&[("TOKEN", "t")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NoDestinations {
                index: 0,
                name: "no-targets".to_string()
            }
        );
    }

    #[test]
    fn test_empty_destination_url_rejected() {
        let defs = vec![definition(
            "empty-url",
            "TOKEN",
            &["messages"],
            &["http://localhost:8080", ""],
        )];
        let err = ConfigValidator::validate(&defs, &secrets(&[("TOKEN", "t")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidDestination {
                index: 0,
                name: "empty-url".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_resource_rejected() {
        let defs = vec![definition(
            "bad-resource",
            "TOKEN",
            &["messages", "nonexistent"],
            &["http://localhost:8080"],
        )];
        let err = ConfigValidator::validate(&defs, &secrets(&[("TOKEN", "t")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownResource {
                index: 0,
                name: "bad-resource".to_string(),
                resource: "nonexistent".to_string()
            }
        );
    }

    #[test]
    fn test_first_failure_wins_in_list_order() {
        let defs = vec![
            definition("ok", "TOKEN", &["messages"], &["http://localhost:8080"]),
            definition("second", "TOKEN", &["bogus"], &[]),
            definition("third", "", &[], &[]),
        ];
        let err = ConfigValidator::validate(&defs, &secrets(&[("TOKEN", "t")])).unwrap_err();
        // credential passes for "second", so its missing targets are reported first
        assert_eq!(
            err,
            ConfigError::NoDestinations {
                index: 1,
                name: "second".to_string()
            }
        );
    }

    #[test]
    fn test_empty_resources_is_firehose() {
        let defs = vec![definition("all", "TOKEN", &[], &["http://localhost:8080"])];
        let validated = ConfigValidator::validate(&defs, &secrets(&[("TOKEN", "t")])).unwrap();

        let pipeline = &validated[0];
        assert!(pipeline.firehose);
        assert_eq!(pipeline.filter, EventFilter::All);
        assert_eq!(
            pipeline.resources.iter().map(|r| r.name).collect::<Vec<_>>(),
            catalog::resource_names().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_empty_resources_equivalent_to_full_list() {
        let all: Vec<&str> = catalog::resource_names().collect();
        let secrets = secrets(&[("TOKEN", "t")]);

        let implicit = ConfigValidator::validate(
            &[definition("a", "TOKEN", &[], &["http://h"])],
            &secrets,
        )
        .unwrap();
        let explicit = ConfigValidator::validate(
            &[definition("a", "TOKEN", &all, &["http://h"])],
            &secrets,
        )
        .unwrap();

        assert_eq!(implicit[0].resources, explicit[0].resources);
        assert_eq!(implicit[0].filter, explicit[0].filter);
    }

    #[test]
    fn test_load_valid_single_pipeline() {
        let file = write_config(
            r#"
pipelines:
  - name: "bot"
    token_env: "WEBEX_TOKEN_BOT"
    resources: ["messages", "rooms"]
    events: "all"
    targets:
      - url: "http://localhost:8080"
"#,
            ".yml",
        );

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.pipelines.len(), 1);
        let pipeline = &config.pipelines[0];
        assert_eq!(pipeline.name, "bot");
        assert_eq!(pipeline.token_env, "WEBEX_TOKEN_BOT");
        assert_eq!(pipeline.resources, vec!["messages", "rooms"]);
        assert_eq!(pipeline.events, "all");
        assert_eq!(pipeline.targets, vec![TargetDefinition::new("http://localhost:8080")]);
        assert_eq!(config.settings, BridgeSettings::default());
    }

    #[test]
    fn test_load_multiple_pipelines_and_settings() {
        let file = write_config(
            r#"
settings:
  dispatch_timeout_seconds: 5
  metrics_addr: "127.0.0.1:9464"
pipelines:
  - name: "bot"
    token_env: "WEBEX_TOKEN_BOT"
    resources: ["messages"]
    targets:
      - url: "http://localhost:8080"
  - name: "main"
    token_env: "WEBEX_TOKEN_MAIN"
    resources: ["messages", "rooms", "memberships", "attachmentActions"]
    events: "all"
    targets:
      - url: "http://localhost:3000"
      - url: "http://localhost:4000"
"#,
            ".yaml",
        );

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.pipelines.len(), 2);
        assert_eq!(config.pipelines[1].targets.len(), 2);
        assert_eq!(config.pipelines[0].events, "");
        assert_eq!(config.settings.dispatch_timeout_seconds, 5);
        assert_eq!(config.settings.connect_timeout_seconds, 10);
        assert_eq!(config.settings.metrics_addr.as_deref(), Some("127.0.0.1:9464"));
    }

    #[test]
    fn test_load_empty_resources_list() {
        let file = write_config(
            r#"
pipelines:
  - name: "no-resources"
    token_env: "WEBEX_TOKEN"
    resources: []
    targets:
      - url: "http://localhost:8080"
"#,
            ".yml",
        );

        let config = BridgeConfig::load(file.path()).unwrap();
        assert!(config.pipelines[0].resources.is_empty());

        let validated = config
            .validate(&secrets(&[("WEBEX_TOKEN", "token")]))
            .unwrap();
        assert!(validated.pipelines[0].firehose);
    }

    #[test]
    fn test_load_json_config() {
        let file = write_config(
            r#"{"pipelines": [{"name": "j", "token_env": "T", "targets": [{"url": "http://h"}]}]}"#,
            ".json",
        );
        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.pipelines[0].name, "j");
    }

    #[test]
    fn test_load_missing_file() {
        let err = BridgeConfig::load("/nonexistent/path/bridge.yml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let file = write_config("this is: [not valid yaml", ".yml");
        let err = BridgeConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_load_then_validate_reports_empty_config() {
        let file = write_config("pipelines: []", ".yml");
        let config = BridgeConfig::load(file.path()).unwrap();
        let err = config.validate(&secrets(&[])).unwrap_err();
        assert_eq!(err, ConfigError::EmptyConfig);
        assert!(err.to_string().contains("at least one pipeline"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_settings() {
        let file = write_config(
            r#"
settings:
  user_agent: "from-file"
pipelines: []
"#,
            ".yml",
        );

        std::env::set_var("ACTIVITY_BRIDGE__SETTINGS__USER_AGENT", "from-env");
        let config = BridgeConfig::load(file.path());
        std::env::remove_var("ACTIVITY_BRIDGE__SETTINGS__USER_AGENT");

        assert_eq!(config.unwrap().settings.user_agent, "from-env");
    }

    #[test]
    fn test_settings_validation() {
        assert!(BridgeSettings::default().validate().is_ok());

        let zero_timeout = BridgeSettings {
            dispatch_timeout_seconds: 0,
            ..BridgeSettings::default()
        };
        assert!(matches!(
            zero_timeout.validate(),
            Err(ConfigError::InvalidSetting { .. })
        ));

        let bad_addr = BridgeSettings {
            metrics_addr: Some("not-an-address".to_string()),
            ..BridgeSettings::default()
        };
        assert!(bad_addr.validate().is_err());
    }

    #[test]
    fn test_deployment_pipeline() {
        let env = secrets(&[("TOKEN", "abc"), ("PORT", "5000"), ("TARGET", "10.0.0.5")]);
        let pipeline = BridgeConfig::deployment_pipeline(&env).unwrap().unwrap();

        assert_eq!(pipeline.name, DEPLOYMENT_PIPELINE);
        assert_eq!(pipeline.token_env, "TOKEN");
        assert!(pipeline.resources.is_empty());
        assert_eq!(pipeline.events, "all");
        assert_eq!(pipeline.targets, vec![TargetDefinition::new("http://10.0.0.5:5000")]);

        let validated = ConfigValidator::validate(&[pipeline], &env).unwrap();
        assert_eq!(validated[0].credential.expose(), "abc");
    }

    #[test]
    fn test_deployment_pipeline_defaults_target() {
        let env = secrets(&[("TOKEN", "abc"), ("PORT", "8080")]);
        let pipeline = BridgeConfig::deployment_pipeline(&env).unwrap().unwrap();
        assert_eq!(pipeline.targets[0].url, "http://localhost:8080");
    }

    #[test]
    fn test_deployment_pipeline_requires_token_and_port() {
        assert!(BridgeConfig::deployment_pipeline(&secrets(&[("TOKEN", "abc")]))
            .unwrap()
            .is_none());
        assert!(BridgeConfig::deployment_pipeline(&secrets(&[("PORT", "80")]))
            .unwrap()
            .is_none());

        let err = BridgeConfig::deployment_pipeline(&secrets(&[("TOKEN", "abc"), ("PORT", "http")]))
            .unwrap_err();
        assert!(err.to_string().contains("PORT is not a valid number"));
    }
}
