use serde::{Deserialize, Serialize};

/// 主配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub session_store: SessionStoreConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            server: ServerConfig::default(),
            access: AccessConfig::default(),
            rate_limit: RateLimitConfig::default(),
            session: SessionConfig::default(),
            session_store: SessionStoreConfig::default(),
            broadcast: BroadcastConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Server 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            host: "127.0.0.1".to_string(),
        }
    }
}

/// 访问控制配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessConfig {
    /// 共享密钥，为空时不做认证
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// 允许的 Origin 前缀列表，`*` 表示全部允许
    pub allowed_origins: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            allowed_origins: vec![
                "http://localhost".to_string(),
                "http://127.0.0.1".to_string(),
            ],
        }
    }
}

/// 限流配置（令牌桶）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// 桶容量（突发上限）
    pub capacity: u32,
    /// 每秒补充的令牌数
    pub refill_per_sec: f64,
    /// 空闲桶清理间隔（秒）
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            refill_per_sec: 1.0,
            sweep_interval_secs: 60,
        }
    }
}

/// 协议会话配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// 心跳间隔（秒）
    pub heartbeat_interval_secs: u64,
    /// 分布式存储中会话记录的 TTL（秒）
    pub store_ttl_secs: u64,
    /// 每个会话出站缓冲的帧数
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_outbound_buffer() -> usize {
    256
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            store_ttl_secs: 120,
            outbound_buffer: 256,
        }
    }
}

/// 分布式会话存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStoreConfig {
    /// Redis 连接串，为空时只在本进程内跟踪会话
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    /// 单次存储调用的超时（毫秒）
    pub op_timeout_ms: u64,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            op_timeout_ms: 2000,
        }
    }
}

/// 广播配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastConfig {
    /// 诊断事件日志容量
    pub event_log_capacity: usize,
    /// 每个观众连接的出站缓冲
    pub channel_capacity: usize,
    /// 观众 SSE 的 retry 指令（毫秒）
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
}

fn default_retry_ms() -> u64 {
    3000
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            event_log_capacity: 100,
            channel_capacity: 256,
            retry_ms: 3000,
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// 输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
