use crate::config::{Config, ConfigError, ConfigResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// 配置管理器
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<Config>>,
}

impl ConfigManager {
    /// 加载配置文件，不存在时写入默认配置
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let config = if path.exists() {
            info!("Loading config from {:?}", path);
            let content = tokio::fs::read_to_string(path).await?;
            let content = Self::expand_env_vars(&content)?;
            let config: Config = serde_json::from_str(&content)?;
            Self::validate(&config)?;
            config
        } else {
            info!("Config file not found, creating default config at {:?}", path);
            let default_config = Config::default();
            // 确保父目录存在
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = serde_json::to_string_pretty(&default_config)?;
            tokio::fs::write(path, &content).await?;
            default_config
        };

        Ok(Self {
            path: path.to_path_buf(),
            config: Arc::new(RwLock::new(config)),
        })
    }

    /// 创建一个新的配置管理器（用于测试）
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            path,
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// 获取当前配置的快照
    pub async fn snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    /// 更新配置（只在内存中生效，用于命令行覆盖）
    pub async fn update<F>(&self, f: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config) -> ConfigResult<()>,
    {
        let mut config = self.config.write().await;
        let mut candidate = config.clone();
        f(&mut candidate)?;
        Self::validate(&candidate)?;
        *config = candidate;
        Ok(())
    }

    /// 验证配置
    pub fn validate(config: &Config) -> ConfigResult<()> {
        if config.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        if config.rate_limit.capacity == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.capacity must be greater than 0".to_string(),
            ));
        }

        if !(config.rate_limit.refill_per_sec > 0.0) {
            return Err(ConfigError::Validation(
                "rate_limit.refill_per_sec must be greater than 0".to_string(),
            ));
        }

        if config.rate_limit.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.sweep_interval_secs must be greater than 0".to_string(),
            ));
        }

        if config.session.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "session.heartbeat_interval_secs must be greater than 0".to_string(),
            ));
        }

        // TTL 必须覆盖至少一个心跳周期，否则记录会在续期之前过期
        if config.session.store_ttl_secs <= config.session.heartbeat_interval_secs {
            return Err(ConfigError::Validation(format!(
                "session.store_ttl_secs ({}) must exceed heartbeat_interval_secs ({})",
                config.session.store_ttl_secs, config.session.heartbeat_interval_secs
            )));
        }

        if config.session_store.op_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "session_store.op_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if config.broadcast.event_log_capacity == 0 || config.broadcast.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "broadcast capacities must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// 展开环境变量 ${VAR} 或 ${VAR:-default}
    fn expand_env_vars(content: &str) -> ConfigResult<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::Validation(format!("Invalid pattern: {}", e)))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let var_expr = &cap[1];

            // 处理 ${VAR:-default} 语法
            let (var_name, default_value) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            let replacement = match std::env::var(var_name) {
                Ok(val) => val,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    None => return Err(ConfigError::EnvVarNotFound(var_name.to_string())),
                },
            };

            result = result.replace(full_match, &replacement);
        }

        Ok(result)
    }

    /// 获取配置文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}
