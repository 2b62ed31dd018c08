use anyhow::{Context, Result};
use privchat_push::{
    cli::{Cli, Commands},
    config::{self, ServerConfig},
    logging, PushServer,
};
use std::fs;
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            Commands::GenerateConfig { path } => return generate_config(path),
            Commands::ValidateConfig { path } => return validate_config(path),
            Commands::ShowConfig => return show_config(&cli),
        }
    }

    // 快速读取 config.toml 的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > config.toml > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format().or(early_log.format);
    let log_file = cli.log_file.clone().or(early_log.file);

    // guard 持有到进程退出，保证文件日志落盘
    let _log_guard = logging::init_logging(
        &log_level,
        log_format.as_deref(),
        log_file.as_deref(),
        cli.quiet,
    )?;

    tracing::info!("🚀 PrivChat Push starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = ServerConfig::load(&cli).context("加载配置失败")?;

    if cli.dev {
        tracing::info!("🔧 开发模式已启用（离线推送使用 mock provider）");
    }

    tracing::info!("📊 Server Configuration:");
    tracing::info!("  - HTTP: {}", config.server.bind_address());
    tracing::info!("  - Token TTL: {}s", config.auth.token_ttl_secs);
    tracing::info!("  - Consumer Workers: {}", config.consumer.workers);
    tracing::info!(
        "  - Max Concurrent Deliveries: {}",
        config.push.max_concurrent_deliveries
    );
    tracing::info!("  - Membership RPC: {}", config.membership.rpc_url);
    tracing::info!(
        "  - Membership Staleness: {}s",
        config.membership.max_staleness_secs
    );
    tracing::info!("  - Redis: {}", config.redis.is_some());
    tracing::info!("  - Log Level: {}", log_level);
    if let Some(f) = &log_file {
        tracing::info!("  - Log File: {}", f);
    }

    let server = match PushServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("❌ 服务初始化失败: {}", e);
            tracing::error!("💡 请检查 Redis 连接与离线推送厂商配置后重试");
            process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        tracing::error!("❌ 服务运行失败: {}", e);
        process::exit(1);
    }

    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    let default_config = r#"# PrivChat Push 配置文件
# 此文件由 privchat-push generate-config 生成

[server]
host = "0.0.0.0"
port = 10170

[auth]
jwt_secret = "change-me"
token_ttl_secs = 604800
admin_user_ids = []
# 签发 token 和内部 /push/* RPC 的共享密钥
# issue_secret = "change-me-too"

[push]
online_timeout_ms = 3000
offline_timeout_ms = 5000
max_concurrent_deliveries = 64
session_queue_capacity = 256
mock_offline = false

# [push.fcm]
# project_id = "my-project"
# access_token = "ya29...."

# [push.apns]
# bundle_id = "com.example.app"
# team_id = "TEAMID"
# key_id = "KEYID"
# private_key_path = "./AuthKey.p8"
# sandbox = true

[membership]
rpc_url = "http://127.0.0.1:10150"
rpc_timeout_ms = 3000
max_staleness_secs = 60
max_capacity = 100000

[consumer]
workers = 4
queue_capacity = 10000
redelivery_delay_ms = 1000

# [redis]
# url = "redis://127.0.0.1:6379"
# pool_size = 10

[logging]
level = "info"
format = "compact"
# file = "./logs/push.log"
"#;

    fs::write(path, default_config).with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = ServerConfig::from_toml_file(path)
        .and_then(|config| config.validate().map(|_| config))
        .with_context(|| format!("配置文件验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - HTTP: {}", config.server.bind_address());
    println!("  - Consumer Workers: {}", config.consumer.workers);
    println!("  - Membership RPC: {}", config.membership.rpc_url);
    println!("  - Redis: {}", config.redis.is_some());

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    // 初始化基本日志（用于显示配置）
    let _guard = logging::init_logging("info", None, None, false)?;

    let config = ServerConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
