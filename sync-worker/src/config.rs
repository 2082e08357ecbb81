use anyhow::{Context, Result, bail, ensure};
use std::path::PathBuf;
use std::time::Duration;
use sync_domain::config::DEFAULT_QUEUE_PREFIX;
use sync_domain::eventing::{DispatcherConfig, SyncEngineConfig};
use sync_domain::{ConfigSet, Environment, FeatureFlags};

/// 外部系统客户端的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSource {
    /// 进程内沙箱，仅用于本地验证
    Sandbox,
}

impl std::str::FromStr for ClientSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(ClientSource::Sandbox),
            other => bail!("unsupported client source `{other}`"),
        }
    }
}

/// 从环境变量加载的 worker 配置
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub environment: Environment,
    /// 未设置时需要外部客户端的模式拒绝运行
    pub clients: Option<ClientSource>,
    pub queue_prefix: String,
    pub feature_flags: Option<PathBuf>,
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    pub replay_interval: Duration,
    pub database_url: Option<String>,
    pub json_logs: bool,
}

impl WorkerConfig {
    /// 读取进程环境变量（存在 `.env` 时一并加载）
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let dispatcher = DispatcherConfig::default();
        let engine = SyncEngineConfig::default();

        let config = Self {
            environment: lookup("SYNC_ENV")
                .unwrap_or_else(|| "dev".to_string())
                .parse()
                .context("SYNC_ENV must be one of dev, stage, prod")?,
            clients: lookup("SYNC_CLIENTS")
                .map(|raw| raw.parse::<ClientSource>())
                .transpose()
                .context("SYNC_CLIENTS must be `sandbox` when set")?,
            queue_prefix: lookup("SYNC_QUEUE_PREFIX")
                .unwrap_or_else(|| DEFAULT_QUEUE_PREFIX.to_string()),
            feature_flags: lookup("SYNC_FEATURE_FLAGS").map(PathBuf::from),
            batch_size: parse_or(&lookup, "SYNC_BATCH_SIZE", dispatcher.batch_size)?,
            visibility_timeout: seconds_or(
                &lookup,
                "SYNC_VISIBILITY_TIMEOUT_SECS",
                dispatcher.visibility_timeout,
            )?,
            poll_interval: seconds_or(&lookup, "SYNC_POLL_INTERVAL_SECS", engine.poll_interval)?,
            replay_interval: seconds_or(
                &lookup,
                "SYNC_REPLAY_INTERVAL_SECS",
                engine.replay_interval,
            )?,
            database_url: lookup("DATABASE_URL"),
            json_logs: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        };

        ensure!(config.batch_size > 0, "SYNC_BATCH_SIZE must be greater than zero");
        for (key, value) in [
            ("SYNC_VISIBILITY_TIMEOUT_SECS", config.visibility_timeout),
            ("SYNC_POLL_INTERVAL_SECS", config.poll_interval),
            ("SYNC_REPLAY_INTERVAL_SECS", config.replay_interval),
        ] {
            ensure!(!value.is_zero(), "{key} must be greater than zero");
        }
        Ok(config)
    }

    pub fn configs(&self) -> ConfigSet {
        ConfigSet::resolve_with_prefix(self.environment, &self.queue_prefix)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_size: self.batch_size,
            visibility_timeout: self.visibility_timeout,
        }
    }

    pub fn engine_config(&self) -> SyncEngineConfig {
        SyncEngineConfig {
            poll_interval: self.poll_interval,
            replay_interval: self.replay_interval,
        }
    }

    /// 未配置开关文件时跳过所有受控操作
    pub fn load_feature_flags(&self) -> Result<FeatureFlags> {
        match &self.feature_flags {
            Some(path) => FeatureFlags::from_path(path)
                .with_context(|| format!("Failed to load feature flags from {}", path.display())),
            None => {
                tracing::warn!("SYNC_FEATURE_FLAGS not set, all gated operations disabled");
                Ok(FeatureFlags::default())
            }
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        None => Ok(default),
    }
}

fn seconds_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_dev() {
        let config = load(&[]).unwrap();
        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.visibility_timeout, Duration::from_secs(300));
        assert!(config.feature_flags.is_none());
        assert!(!config.json_logs);
        assert_eq!(config.configs().dead_letter_queue().unwrap(), "student_sync_dev_dlq");
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("SYNC_ENV", "production"),
            ("SYNC_QUEUE_PREFIX", "registrar"),
            ("SYNC_BATCH_SIZE", "25"),
            ("SYNC_POLL_INTERVAL_SECS", "3"),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();

        assert_eq!(config.environment, Environment::Prod);
        assert_eq!(config.dispatcher_config().batch_size, 25);
        assert_eq!(config.engine_config().poll_interval, Duration::from_secs(3));
        assert!(config.json_logs);
        assert_eq!(config.configs().work_queue().unwrap(), "registrar_prod_events");
    }

    #[test]
    fn rejects_unknown_environment_and_bad_numbers() {
        assert!(load(&[("SYNC_ENV", "qa")]).is_err());
        assert!(load(&[("SYNC_BATCH_SIZE", "ten")]).is_err());
        assert!(load(&[("SYNC_CLIENTS", "production")]).is_err());
    }

    #[test]
    fn rejects_zero_sizes_and_intervals() {
        for key in [
            "SYNC_BATCH_SIZE",
            "SYNC_VISIBILITY_TIMEOUT_SECS",
            "SYNC_POLL_INTERVAL_SECS",
            "SYNC_REPLAY_INTERVAL_SECS",
        ] {
            let err = load(&[(key, "0")]).unwrap_err();
            assert!(err.to_string().contains(key), "{err}");
        }
    }

    #[test]
    fn client_source_is_opt_in() {
        assert_eq!(load(&[]).unwrap().clients, None);
        let config = load(&[("SYNC_CLIENTS", " Sandbox ")]).unwrap();
        assert_eq!(config.clients, Some(ClientSource::Sandbox));
    }
}
