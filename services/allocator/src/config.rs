//! Configuration for the allocation controller.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use yarnscale_reconcile::{DEFAULT_MAX_RETRIES, DEFAULT_RELEASE_CACHE_TTL, DEFAULT_RETRY_WINDOW};

use crate::client::ResourceSpec;
use crate::command::{JvmSizing, LaunchTemplate};

/// Environment variable prefix for every setting.
pub const ENV_PREFIX: &str = "YARNSCALE_";

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Application the controller allocates for.
    pub app_name: String,

    /// Resources requested per container.
    pub container: ResourceSpec,

    /// Heap derivation from granted memory.
    pub sizing: JvmSizing,

    /// Static parts of the worker command.
    pub launch: LaunchTemplate,

    /// How long a released container id is remembered.
    pub release_cache_ttl: Duration,

    /// Container count reconciled to at startup.
    pub initial_containers: u32,

    /// Prefix for sequential instance names.
    pub instance_name_prefix: String,

    /// Failures tolerated per instance name before it is retired.
    pub instance_max_retries: u32,

    /// Window in which instance failures are counted.
    pub instance_retry_window: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "yarnscale".to_string(),
            container: ResourceSpec::default(),
            sizing: JvmSizing::default(),
            launch: LaunchTemplate::default(),
            release_cache_ttl: DEFAULT_RELEASE_CACHE_TTL,
            initial_containers: 1,
            instance_name_prefix: "YarnTaskRunner".to_string(),
            instance_max_retries: DEFAULT_MAX_RETRIES,
            instance_retry_window: DEFAULT_RETRY_WINDOW,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Keys are looked up with the `YARNSCALE_` prefix. Missing keys take
    /// their defaults; present but unparseable keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let defaults = Self::default();

        let app_name = get("APP_NAME").unwrap_or(defaults.app_name);

        let container = ResourceSpec {
            memory_mb: parse_or(&get, "CONTAINER_MEMORY_MBS", defaults.container.memory_mb)?,
            vcores: parse_or(&get, "CONTAINER_CORES", defaults.container.vcores)?,
        };

        let sizing = JvmSizing {
            overhead_mb: parse_or(
                &get,
                "CONTAINER_JVM_MEMORY_OVERHEAD_MBS",
                defaults.sizing.overhead_mb,
            )?,
            heap_ratio: parse_or(
                &get,
                "CONTAINER_JVM_MEMORY_XMX_RATIO",
                defaults.sizing.heap_ratio,
            )?,
        };
        if !(sizing.heap_ratio > 0.0 && sizing.heap_ratio <= 1.0) {
            anyhow::bail!(
                "{ENV_PREFIX}CONTAINER_JVM_MEMORY_XMX_RATIO must be in (0, 1], got {}",
                sizing.heap_ratio
            );
        }

        let launch = LaunchTemplate {
            java_bin: get("JAVA_BIN").unwrap_or(defaults.launch.java_bin),
            jvm_args: get("CONTAINER_JVM_ARGS")
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.launch.jvm_args),
            main_class: get("TASK_RUNNER_CLASS").unwrap_or(defaults.launch.main_class),
            app_name: app_name.clone(),
            log_dir: get("LOG_DIR").unwrap_or(defaults.launch.log_dir),
        };

        let release_cache_ttl = Duration::from_secs(parse_or(
            &get,
            "RELEASED_CONTAINERS_CACHE_EXPIRY_SECS",
            defaults.release_cache_ttl.as_secs(),
        )?);

        let instance_retry_window = Duration::from_secs(parse_or(
            &get,
            "INSTANCE_RETRY_WINDOW_SECS",
            defaults.instance_retry_window.as_secs(),
        )?);

        Ok(Self {
            app_name,
            container,
            sizing,
            launch,
            release_cache_ttl,
            initial_containers: parse_or(&get, "INITIAL_CONTAINERS", defaults.initial_containers)?,
            instance_name_prefix: get("INSTANCE_NAME_PREFIX")
                .unwrap_or(defaults.instance_name_prefix),
            instance_max_retries: parse_or(
                &get,
                "INSTANCE_MAX_RETRIES",
                defaults.instance_max_retries,
            )?,
            instance_retry_window,
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value {raw:?} for {ENV_PREFIX}{name}")),
        None => Ok(default),
    }
}
