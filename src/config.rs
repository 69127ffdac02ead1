use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GantryError, Result};

/// Configuration for the batch provider adapter.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    /// Provider name ("gcp", "aws", "azure").
    pub provider: String,
    /// Cloud region for batch operations.
    pub region: String,
    /// Project ID (GCP) or equivalent account scoping value.
    pub project_id: String,
    /// Provider-specific options, e.g. AWS `account_id` / `job_queue`,
    /// Azure `subscription_id` / `resource_group`.
    pub options: HashMap<String, String>,
}

/// Database connection configuration. The engine itself is pluggable; only
/// the transactional contract in `store::StateStore` is relied upon.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub provider: String,
    pub project_id: String,
    pub instance: String,
    pub database: String,
}

/// Complete worker configuration, loaded from environment variables
/// (12-factor style).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub server_port: u16,
    pub worker_id: String,
    pub lease_ttl: Duration,
    pub claim_interval: Duration,
    pub batch_provider: ProviderSettings,
    pub database: DatabaseConfig,
    pub job_config_path: String,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let worker_id = match env::var("WORKER_ID") {
            Ok(id) if !id.is_empty() => id,
            _ => hostname_or_fallback(),
        };

        let config = Self {
            server_port: env_as_u16("WORKER_PORT", 8081),
            worker_id,
            lease_ttl: Duration::from_secs(env_as_u64("WORKER_LEASE_TTL_SECONDS", 30)),
            claim_interval: Duration::from_secs(env_as_u64("WORKER_CLAIM_INTERVAL_SECONDS", 5)),
            batch_provider: provider_settings_from_env(),
            database: database_config_from_env(),
            job_config_path: env_or_default("JOB_CONFIG_PATH", "config/job-config.json"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validate_provider(&self.batch_provider)?;
        validate_database(&self.database)
    }
}

/// Complete gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server_port: u16,
    /// Static worker set; changing membership requires a restart.
    pub worker_ips: Vec<String>,
    /// Port the workers listen on.
    pub worker_port: u16,
    pub allowed_origins: Vec<String>,
    pub database: DatabaseConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let worker_ips = split_csv(&env::var("WORKER_IPS").unwrap_or_default());
        if worker_ips.is_empty() {
            return Err(GantryError::InvalidArgument(
                "WORKER_IPS must list at least one worker".to_string(),
            ));
        }

        let config = Self {
            server_port: env_as_u16("GATEWAY_PORT", 8080),
            worker_ips,
            worker_port: env_as_u16("WORKER_PORT", 8081),
            allowed_origins: split_csv(&env::var("ALLOWED_ORIGINS").unwrap_or_default()),
            database: database_config_from_env(),
        };

        validate_database(&config.database)?;
        Ok(config)
    }
}

fn provider_settings_from_env() -> ProviderSettings {
    let mut options = HashMap::new();
    for (env_key, option_key) in [
        ("AWS_ACCOUNT_ID", "account_id"),
        ("AWS_JOB_QUEUE", "job_queue"),
        ("AZURE_SUBSCRIPTION_ID", "subscription_id"),
        ("AZURE_RESOURCE_GROUP", "resource_group"),
    ] {
        if let Ok(value) = env::var(env_key) {
            if !value.is_empty() {
                options.insert(option_key.to_string(), value);
            }
        }
    }

    ProviderSettings {
        provider: env_or_default("BATCH_PROVIDER", "gcp"),
        region: env::var("BATCH_REGION").unwrap_or_default(),
        project_id: env::var("BATCH_PROJECT_ID").unwrap_or_default(),
        options,
    }
}

fn database_config_from_env() -> DatabaseConfig {
    DatabaseConfig {
        provider: env_or_default("DB_PROVIDER", "sqlite"),
        project_id: env::var("DB_PROJECT_ID").unwrap_or_default(),
        instance: env::var("DB_INSTANCE").unwrap_or_default(),
        database: env_or_default("DB_DATABASE", "gantry.db"),
    }
}

fn validate_provider(p: &ProviderSettings) -> Result<()> {
    match p.provider.as_str() {
        "gcp" => {
            if p.project_id.is_empty() {
                return Err(GantryError::InvalidArgument(
                    "BATCH_PROJECT_ID is required for the gcp batch provider".to_string(),
                ));
            }
            if p.region.is_empty() {
                return Err(GantryError::InvalidArgument(
                    "BATCH_REGION is required for the gcp batch provider".to_string(),
                ));
            }
        }
        "aws" => {
            if p.region.is_empty() {
                return Err(GantryError::InvalidArgument(
                    "BATCH_REGION is required for the aws batch provider".to_string(),
                ));
            }
            if !p.options.contains_key("account_id") {
                return Err(GantryError::InvalidArgument(
                    "AWS_ACCOUNT_ID is required for the aws batch provider".to_string(),
                ));
            }
        }
        "azure" => {
            if !p.options.contains_key("subscription_id") {
                return Err(GantryError::InvalidArgument(
                    "AZURE_SUBSCRIPTION_ID is required for the azure batch provider".to_string(),
                ));
            }
        }
        other => {
            return Err(GantryError::InvalidArgument(format!(
                "unsupported batch provider: {other}"
            )));
        }
    }
    Ok(())
}

fn validate_database(db: &DatabaseConfig) -> Result<()> {
    if db.database.is_empty() {
        return Err(GantryError::InvalidArgument(
            "DB_DATABASE is required".to_string(),
        ));
    }
    Ok(())
}

fn hostname_or_fallback() -> String {
    if let Ok(name) = env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "worker-unknown".to_string())
}

fn env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_as_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_as_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Effective compute resources for a job: CPU in milli-cores, memory in MiB,
/// and the maximum run duration in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProfile {
    pub cpu_millis: i64,
    #[serde(rename = "memoryMiB", alias = "memoryMib")]
    pub memory_mib: i64,
    pub max_run_duration_seconds: i64,
}

/// Optional per-field resource overrides from a submission. A zero value
/// means "unspecified": the preset value is used instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceOverride {
    pub cpu_millis: i64,
    pub memory_mib: i64,
    pub max_run_duration_seconds: i64,
}

/// Job resource configuration: a default profile, named presets, and optional
/// machine-type-specific profiles. Loaded from the `JOB_CONFIG_PATH` JSON
/// file; `Default` carries built-in presets for tests and minimal deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfigFile {
    pub default_resources: ResourceProfile,
    #[serde(default)]
    pub resource_profiles: HashMap<String, ResourceProfile>,
    #[serde(default)]
    pub machine_type_resources: HashMap<String, ResourceProfile>,
}

impl Default for JobConfigFile {
    fn default() -> Self {
        let mut resource_profiles = HashMap::new();
        resource_profiles.insert(
            "small".to_string(),
            ResourceProfile {
                cpu_millis: 2000,
                memory_mib: 2048,
                max_run_duration_seconds: 1800,
            },
        );
        resource_profiles.insert(
            "medium".to_string(),
            ResourceProfile {
                cpu_millis: 4000,
                memory_mib: 4096,
                max_run_duration_seconds: 3600,
            },
        );
        resource_profiles.insert(
            "large".to_string(),
            ResourceProfile {
                cpu_millis: 8000,
                memory_mib: 8192,
                max_run_duration_seconds: 7200,
            },
        );
        resource_profiles.insert(
            "xlarge".to_string(),
            ResourceProfile {
                cpu_millis: 16000,
                memory_mib: 16384,
                max_run_duration_seconds: 14400,
            },
        );

        Self {
            default_resources: ResourceProfile {
                cpu_millis: 4000,
                memory_mib: 4096,
                max_run_duration_seconds: 3600,
            },
            resource_profiles,
            machine_type_resources: HashMap::new(),
        }
    }
}

impl JobConfigFile {
    /// Load job configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GantryError::Internal(format!(
                "failed to read job config {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let config: JobConfigFile = serde_json::from_str(&data)?;
        Ok(config)
    }

    /// Resource requirements for a named preset, falling back to the default
    /// when the name is empty or unknown.
    pub fn profile(&self, name: &str) -> ResourceProfile {
        if name.is_empty() {
            return self.default_resources;
        }
        self.resource_profiles
            .get(name)
            .copied()
            .unwrap_or(self.default_resources)
    }

    /// Resolve the effective resources for a submission.
    ///
    /// Precedence, highest first:
    /// 1. any non-zero field of the override;
    /// 2. the machine type's associated profile, when configured;
    /// 3. the named preset;
    /// 4. the default profile.
    ///
    /// Pure: no I/O and no failure modes.
    pub fn resolve_resources(
        &self,
        machine_type: &str,
        profile_name: &str,
        overrides: &ResourceOverride,
    ) -> ResourceProfile {
        let mut base = if !machine_type.is_empty() {
            self.machine_type_resources
                .get(machine_type)
                .copied()
                .unwrap_or_else(|| self.profile(profile_name))
        } else {
            self.profile(profile_name)
        };

        if overrides.cpu_millis != 0 {
            base.cpu_millis = overrides.cpu_millis;
        }
        if overrides.memory_mib != 0 {
            base.memory_mib = overrides.memory_mib;
        }
        if overrides.max_run_duration_seconds != 0 {
            base.max_run_duration_seconds = overrides.max_run_duration_seconds;
        }

        base
    }
}
