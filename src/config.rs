use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpServerConfig,
    pub auth: AuthConfig,
    pub push: PushConfig,
    pub membership: MembershipConfig,
    pub consumer: ConsumerConfig,
    /// Redis（可选）：配置后 token 与设备注册存储使用 Redis
    pub redis: Option<RedisConfig>,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: HttpServerConfig::default(),
            auth: AuthConfig::default(),
            push: PushConfig::default(),
            membership: MembershipConfig::default(),
            consumer: ConsumerConfig::default(),
            redis: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// HTTP 监听配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 10170,
        }
    }
}

impl HttpServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 认证配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// JWT 签名密钥
    pub jwt_secret: String,
    /// Token 有效期（秒）
    pub token_ttl_secs: u64,
    /// 可以强制下线其他用户的管理员
    pub admin_user_ids: Vec<String>,
    /// 服务端共享密钥：签发 token 接口和内部 `/push/*` RPC 使用，未配置时两者都关闭
    pub issue_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "your_jwt_secret_here".to_string(),
            token_ttl_secs: 7 * 24 * 3600,
            admin_user_ids: Vec::new(),
            issue_secret: None,
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_ids.iter().any(|id| id == user_id)
    }
}

/// 推送配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// 在线投递超时（毫秒）
    pub online_timeout_ms: u64,
    /// 离线推送超时（毫秒）
    pub offline_timeout_ms: u64,
    /// 群聊扇出时单个事件的最大并发投递数
    pub max_concurrent_deliveries: usize,
    /// 每个在线会话的待发队列长度
    pub session_queue_capacity: usize,
    /// 未配置厂商通道时使用日志 mock provider（开发用）
    pub mock_offline: bool,
    pub fcm: Option<FcmConfig>,
    pub apns: Option<ApnsConfig>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            online_timeout_ms: 3000,
            offline_timeout_ms: 5000,
            max_concurrent_deliveries: 64,
            session_queue_capacity: 256,
            mock_offline: false,
            fcm: None,
            apns: None,
        }
    }
}

impl PushConfig {
    pub fn online_timeout(&self) -> Duration {
        Duration::from_millis(self.online_timeout_ms)
    }

    pub fn offline_timeout(&self) -> Duration {
        Duration::from_millis(self.offline_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FcmConfig {
    pub project_id: String,
    pub access_token: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApnsConfig {
    pub bundle_id: String,
    pub team_id: String,
    pub key_id: String,
    pub private_key_path: String,
    #[serde(default)]
    pub sandbox: bool,
}

/// 群成员缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// 群组服务地址
    pub rpc_url: String,
    /// 成员查询超时（毫秒）
    pub rpc_timeout_ms: u64,
    /// 允许的最大陈旧时间（秒），即缓存条目 TTL
    pub max_staleness_secs: u64,
    /// 最多缓存的群数量
    pub max_capacity: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:10150".to_string(),
            rpc_timeout_ms: 3000,
            max_staleness_secs: 60,
            max_capacity: 100_000,
        }
    }
}

/// 事件消费配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// 并发 worker 数
    pub workers: usize,
    /// 入站队列容量
    pub queue_capacity: usize,
    /// nack 后重投延迟（毫秒），0 表示立即
    pub redelivery_delay_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 10_000,
            redelivery_delay_ms: 1000,
        }
    }
}

impl ConsumerConfig {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis 连接 URL
    pub url: String,
    /// 连接池大小
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// 最小空闲连接数
    #[serde(default)]
    pub min_idle: Option<u32>,
    /// 连接超时时间（秒）
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// 单条命令超时（毫秒）
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// 空闲连接回收时间（秒）
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout_secs() -> u64 {
    5
}

fn default_command_timeout_ms() -> u64 {
    1000
}

impl RedisConfig {
    pub fn from_url(url: String) -> Self {
        Self {
            url,
            pool_size: default_pool_size(),
            min_idle: None,
            connection_timeout_secs: default_connection_timeout_secs(),
            command_timeout_ms: default_command_timeout_ms(),
            idle_timeout_secs: None,
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// 日志配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

impl ServerConfig {
    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "配置文件格式错误")
    }

    /// 从环境变量合并配置（PRIVCHAT_PUSH_ 前缀）
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(host) = env::var("PRIVCHAT_PUSH_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("PRIVCHAT_PUSH_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("PRIVCHAT_PUSH_PORT 无效: {}", port))?;
        }
        if let Ok(secret) = env::var("PRIVCHAT_PUSH_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(ttl) = env::var("PRIVCHAT_PUSH_TOKEN_TTL_SECS") {
            self.auth.token_ttl_secs = ttl.parse().unwrap_or(self.auth.token_ttl_secs);
        }
        if let Ok(secret) = env::var("PRIVCHAT_PUSH_ISSUE_SECRET") {
            self.auth.issue_secret = Some(secret);
        }
        if let Ok(url) = env::var("PRIVCHAT_PUSH_MEMBERSHIP_RPC_URL") {
            self.membership.rpc_url = url;
        }
        if let Ok(workers) = env::var("PRIVCHAT_PUSH_CONSUMER_WORKERS") {
            self.consumer.workers = workers.parse().unwrap_or(self.consumer.workers);
        }
        if let Ok(level) = env::var("PRIVCHAT_PUSH_LOG_LEVEL") {
            self.logging.level = Some(level);
        }
        if let Ok(token) = env::var("PRIVCHAT_PUSH_FCM_ACCESS_TOKEN") {
            match self.push.fcm.as_mut() {
                Some(fcm) => fcm.access_token = token,
                None => warn!("PRIVCHAT_PUSH_FCM_ACCESS_TOKEN 已设置但未配置 [push.fcm]，忽略"),
            }
        }

        // Redis 配置
        if let Ok(redis_url) = env::var("REDIS_URL") {
            self.set_redis_url(redis_url);
        }

        Ok(())
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(redis_url) = &cli.redis_url {
            self.set_redis_url(redis_url.clone());
        }
        if let Some(jwt_secret) = &cli.jwt_secret {
            self.auth.jwt_secret = jwt_secret.clone();
        }
        if let Some(workers) = cli.workers {
            self.consumer.workers = workers;
        }
        if let Some(log_level) = cli.get_log_level() {
            self.logging.level = Some(log_level);
        }
        if let Some(log_format) = cli.get_log_format() {
            self.logging.format = Some(log_format);
        }
        if let Some(log_file) = &cli.log_file {
            self.logging.file = Some(log_file.clone());
        }
        if cli.dev {
            self.push.mock_offline = true;
        }
    }

    fn set_redis_url(&mut self, url: String) {
        match self.redis.as_mut() {
            Some(redis) => redis.url = url,
            None => self.redis = Some(RedisConfig::from_url(url)),
        }
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = match resolve_config_path(cli.config_file.as_deref()) {
            Some(path) => {
                info!("📄 从配置文件加载: {}", path);
                Self::from_toml_file(&path)?
            }
            None => Self::default(),
        };

        config.merge_from_env()?;
        config.merge_from_cli(cli);
        config.validate()?;

        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            bail!("auth.jwt_secret 不能为空");
        }
        if self.auth.token_ttl_secs == 0 {
            bail!("auth.token_ttl_secs 必须大于 0");
        }
        if self.consumer.workers == 0 {
            bail!("consumer.workers 必须大于 0");
        }
        if self.push.max_concurrent_deliveries == 0 {
            bail!("push.max_concurrent_deliveries 必须大于 0");
        }
        if self.membership.max_staleness_secs == 0 {
            bail!("membership.max_staleness_secs 必须大于 0");
        }
        Ok(())
    }
}

fn resolve_config_path(config_file: Option<&str>) -> Option<String> {
    match config_file {
        Some(path) if Path::new(path).exists() => Some(path.to_string()),
        Some(path) => {
            warn!("⚠️ 配置文件不存在: {}", path);
            None
        }
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Some(DEFAULT_CONFIG_FILE.to_string()),
        None => None,
    }
}

#[derive(Debug, Default, Deserialize)]
struct EarlyConfig {
    #[serde(default)]
    logging: LoggingConfig,
}

/// 只读取配置文件中的 [logging] 段，用于在完整加载配置前初始化日志
pub fn load_early_logging_config(config_file: Option<&str>) -> LoggingConfig {
    let path = match config_file {
        Some(path) => path,
        None => DEFAULT_CONFIG_FILE,
    };
    fs::read_to_string(path)
        .ok()
        .and_then(|content| toml::from_str::<EarlyConfig>(&content).ok())
        .map(|early| early.logging)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
[server]
port = 9999

[membership]
max_staleness_secs = 5

[redis]
url = "redis://127.0.0.1:6379"
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.membership.max_staleness_secs, 5);
        assert_eq!(config.consumer.workers, 4);
        let redis = config.redis.unwrap();
        assert_eq!(redis.pool_size, 10);
        assert_eq!(redis.command_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn test_provider_sections() {
        let config = ServerConfig::from_toml_str(
            r#"
[push.fcm]
project_id = "demo"
access_token = "secret"

[auth]
admin_user_ids = ["admin"]
"#,
        )
        .unwrap();
        assert_eq!(config.push.fcm.unwrap().project_id, "demo");
        assert!(config.push.apns.is_none());
        assert!(config.auth.is_admin("admin"));
        assert!(!config.auth.is_admin("u1"));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());
        config.consumer.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_early_logging_missing_file() {
        let logging = load_early_logging_config(Some("/nonexistent/config.toml"));
        assert!(logging.level.is_none());
    }
}
