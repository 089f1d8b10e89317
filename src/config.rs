//! 分层配置：TOML文件为底，环境变量覆盖（前缀 RELAY_IM，分隔符 __）
//! Layered configuration: TOML file base, env overlay (prefix RELAY_IM,
//! separator __)

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub ws_port: u16,
    pub http_port: u16,
    /// 实例标识，写入在线提示作跨实例寻址钩子
    /// Instance id, stored in the presence hint as the addressing hook
    pub server_id: String,
    /// 心跳静默阈值 / Heartbeat silence threshold
    pub timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ws_port: 3000,
            http_port: 8080,
            server_id: "server-1".to_string(),
            timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: "data/relay-im".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// "redis" 或 "memory" / "redis" or "memory"
    pub backend: String,
    pub url: String,
    pub op_timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: "redis".to_string(),
            url: "redis://127.0.0.1:6379".to_string(),
            op_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// "redis" 或 "memory" / "redis" or "memory"
    pub backend: String,
    pub url: String,
    pub name: String,
    /// 重投上限，超过转死信 / Redelivery cap before dead-letter
    pub max_deliveries: u64,
    pub block_ms: u64,
    /// 未确认条目重投前的最短闲置时长 / Min idle before an unacked entry is
    /// redelivered
    pub min_idle_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: "redis".to_string(),
            url: "redis://127.0.0.1:6379".to_string(),
            name: "chat.messages".to_string(),
            max_deliveries: 5,
            block_ms: 5_000,
            min_idle_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub days: u64,
    pub interval_secs: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            days: 30,
            interval_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub queue: QueueSettings,
    pub retention: RetentionSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = path.unwrap_or("config/default.toml");
        let cfg = Config::builder()
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix("RELAY_IM").separator("__"))
            .build()
            .map_err(|e| RelayError::Internal(anyhow::anyhow!("config build failed: {}", e)))?;
        cfg.try_deserialize()
            .map_err(|e| RelayError::Internal(anyhow::anyhow!("config deserialize failed: {}", e)))
    }
}
