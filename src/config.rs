use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::labels::EligibilityPolicy;
use crate::reconciler::DEFAULT_INTERVAL;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub cattle_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cattle_access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cattle_secret_key: Option<String>,
    pub metadata_url: String,
    /// Skip host discovery and act for this orchestrator host id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_ip: Option<String>,
    /// Defaults to the Consul agent on `agent_ip`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consul_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consul_datacenter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consul_token: Option<String>,
    pub reconcile_interval_secs: u64,
    /// Only publish workloads that explicitly opt in.
    pub strict: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cattle_url: String::new(),
            cattle_access_key: None,
            cattle_secret_key: None,
            metadata_url: "http://rancher-metadata/latest".into(),
            host_id: None,
            agent_ip: None,
            consul_address: None,
            consul_datacenter: None,
            consul_token: None,
            reconcile_interval_secs: DEFAULT_INTERVAL.as_secs(),
            strict: false,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("herder.toml"))
            .merge(Json::file("herder.json"))
            .merge(Env::raw().only(&["CATTLE_URL", "CATTLE_ACCESS_KEY", "CATTLE_SECRET_KEY"]))
            .merge(Env::prefixed("HERDER_"))
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(secret_file) = std::env::var("HERDER_CATTLE_SECRET_KEY_FILE") {
            config.cattle_secret_key = Some(std::fs::read_to_string(secret_file)?.trim().to_string());
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.cattle_url.trim().is_empty() {
            anyhow::bail!("`cattle_url` must be set (CATTLE_URL or HERDER_CATTLE_URL)");
        }
        if self.reconcile_interval_secs == 0 {
            anyhow::bail!("`reconcile_interval_secs` must be greater than zero");
        }
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn policy(&self) -> EligibilityPolicy {
        EligibilityPolicy::from_strict(self.strict)
    }

    /// Consul agent to talk to once the agent address is known.
    pub fn consul_address_for(&self, agent_ip: &str) -> String {
        self.consul_address
            .clone()
            .unwrap_or_else(|| format!("http://{}:8500", agent_ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_with_rancher_variables() {
        Jail::expect_with(|jail| {
            jail.set_env("CATTLE_URL", "http://rancher:8080/v2-beta");
            jail.set_env("CATTLE_ACCESS_KEY", "key");
            jail.set_env("CATTLE_SECRET_KEY", "secret");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.cattle_url, "http://rancher:8080/v2-beta");
            assert_eq!(config.cattle_access_key.as_deref(), Some("key"));
            assert_eq!(config.cattle_secret_key.as_deref(), Some("secret"));
            assert_eq!(config.reconcile_interval(), Duration::from_secs(300));
            assert_eq!(config.policy(), EligibilityPolicy::Permissive);
            assert_eq!(config.consul_address_for("10.0.0.5"), "http://10.0.0.5:8500");
            Ok(())
        });
    }

    #[test]
    fn file_and_prefixed_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "herder.toml",
                r#"
                    cattle_url = "http://from-file"
                    reconcile_interval_secs = 60
                    consul_address = "http://consul:8500"
                "#,
            )?;
            jail.set_env("HERDER_STRICT", "true");
            jail.set_env("HERDER_HOST_ID", "1h7");
            jail.set_env("HERDER_RECONCILE_INTERVAL_SECS", "30");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.cattle_url, "http://from-file");
            assert_eq!(config.reconcile_interval(), Duration::from_secs(30));
            assert_eq!(config.policy(), EligibilityPolicy::Strict);
            assert_eq!(config.host_id.as_deref(), Some("1h7"));
            assert_eq!(config.consul_address_for("10.0.0.5"), "http://consul:8500");
            Ok(())
        });
    }

    #[test]
    fn secret_file_overrides_secret_key() {
        Jail::expect_with(|jail| {
            jail.create_file("secret", "s3cr3t\n")?;
            jail.set_env("CATTLE_URL", "http://rancher");
            jail.set_env("CATTLE_SECRET_KEY", "plain");
            jail.set_env("HERDER_CATTLE_SECRET_KEY_FILE", "secret");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.cattle_secret_key.as_deref(), Some("s3cr3t"));
            Ok(())
        });
    }

    #[test]
    fn missing_url_and_zero_interval_are_rejected() {
        Jail::expect_with(|_jail| {
            assert!(Config::load().is_err());
            Ok(())
        });
        Jail::expect_with(|jail| {
            jail.set_env("CATTLE_URL", "http://rancher");
            jail.set_env("HERDER_RECONCILE_INTERVAL_SECS", "0");
            assert!(Config::load().is_err());
            Ok(())
        });
    }
}
