use async_trait::async_trait;
use chrono::Utc;
use redis::Script;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{TokenState, TokenStateStore};
use crate::error::Result;
use crate::infra::redis::RedisClient;
use crate::model::platform::Platform;
use crate::push::registration::{DeviceRegistration, RegistrationStore};

const UID_PID_TOKEN_STATUS: &str = "UID_PID_TOKEN_STATUS:";
const PUSH_TOKEN: &str = "PUSH_TOKEN:";

/// token 状态 hash：`UID_PID_TOKEN_STATUS:{user_id}:{platform_id}`，field 为 token，值为状态码
pub fn token_status_key(user_id: &str, platform_id: i32) -> String {
    format!("{}{}:{}", UID_PID_TOKEN_STATUS, user_id, platform_id)
}

/// 设备推送 token：`PUSH_TOKEN:{platform_id}:{user_id}`
pub fn push_token_key(user_id: &str, platform_id: i32) -> String {
    format!("{}{}:{}", PUSH_TOKEN, platform_id, user_id)
}

// KEYS[1] = hash, ARGV[1] = token, ARGV[2] = ttl 秒
// 其它 Normal token 改为 Kicked；新 token 写 Normal，已是 Kicked 的保持不变
const ISSUE_SCRIPT: &str = r#"
local kicked = 0
local fields = redis.call('HGETALL', KEYS[1])
for i = 1, #fields, 2 do
    if fields[i] ~= ARGV[1] and fields[i + 1] == '0' then
        redis.call('HSET', KEYS[1], fields[i], '2')
        kicked = kicked + 1
    end
end
if redis.call('HGET', KEYS[1], ARGV[1]) ~= '2' then
    redis.call('HSET', KEYS[1], ARGV[1], '0')
end
local ttl = tonumber(ARGV[2])
if redis.call('TTL', KEYS[1]) < ttl then
    redis.call('EXPIRE', KEYS[1], ttl)
end
return kicked
"#;

// KEYS[1] = hash, ARGV[1] = token, ARGV[2] = 墓碑 ttl 秒
const KICK_SCRIPT: &str = r#"
redis.call('HSET', KEYS[1], ARGV[1], '2')
if redis.call('TTL', KEYS[1]) < 0 then
    redis.call('EXPIRE', KEYS[1], tonumber(ARGV[2]))
end
return 2
"#;

// KEYS[1] = hash
const KICK_PLATFORM_SCRIPT: &str = r#"
local kicked = 0
local fields = redis.call('HGETALL', KEYS[1])
for i = 1, #fields, 2 do
    if fields[i + 1] == '0' then
        redis.call('HSET', KEYS[1], fields[i], '2')
        kicked = kicked + 1
    end
end
return kicked
"#;

fn parse_state(raw: &str) -> Result<TokenState> {
    let code: i32 = raw
        .parse()
        .map_err(|_| crate::error::ServerError::TokenUnknown)?;
    TokenState::from_code(code)
}

/// Redis token 状态存储
///
/// 所有状态变更都是单个 Lua 脚本，同一 (user, platform) 的并发变更由 Redis 串行化。
/// 过期由 key TTL 负责。
pub struct RedisTokenStore {
    client: Arc<RedisClient>,
    tombstone_ttl: Duration,
    issue_script: Script,
    kick_script: Script,
    kick_platform_script: Script,
}

impl RedisTokenStore {
    pub fn new(client: Arc<RedisClient>, tombstone_ttl: Duration) -> Self {
        Self {
            client,
            tombstone_ttl,
            issue_script: Script::new(ISSUE_SCRIPT),
            kick_script: Script::new(KICK_SCRIPT),
            kick_platform_script: Script::new(KICK_PLATFORM_SCRIPT),
        }
    }
}

#[async_trait]
impl TokenStateStore for RedisTokenStore {
    async fn lookup(&self, user_id: &str, platform_id: i32, token: &str) -> Result<TokenState> {
        match self
            .client
            .hget(&token_status_key(user_id, platform_id), token)
            .await?
        {
            Some(raw) => parse_state(&raw),
            None => Ok(TokenState::Absent),
        }
    }

    async fn issue(
        &self,
        user_id: &str,
        platform_id: i32,
        token: &str,
        expires_at: i64,
    ) -> Result<usize> {
        let ttl = (expires_at - Utc::now().timestamp()).max(1);
        let key = token_status_key(user_id, platform_id);
        let kicked: i64 = self
            .client
            .run_script(
                &self.issue_script,
                &[key.as_str()],
                &[token.to_string(), ttl.to_string()],
            )
            .await?;
        debug!(
            "[REDIS TOKEN] issue user_id={}, platform_id={}, kicked={}",
            user_id, platform_id, kicked
        );
        Ok(kicked as usize)
    }

    async fn kick(&self, user_id: &str, platform_id: i32, token: &str) -> Result<TokenState> {
        let key = token_status_key(user_id, platform_id);
        let code: i32 = self
            .client
            .run_script(
                &self.kick_script,
                &[key.as_str()],
                &[token.to_string(), self.tombstone_ttl.as_secs().max(1).to_string()],
            )
            .await?;
        TokenState::from_code(code)
    }

    async fn kick_platform(&self, user_id: &str, platform_id: i32) -> Result<usize> {
        let key = token_status_key(user_id, platform_id);
        let kicked: i64 = self
            .client
            .run_script(&self.kick_platform_script, &[key.as_str()], &[])
            .await?;
        Ok(kicked as usize)
    }

    async fn get_tokens(
        &self,
        user_id: &str,
        platform_id: i32,
    ) -> Result<HashMap<String, TokenState>> {
        let raw = self
            .client
            .hgetall(&token_status_key(user_id, platform_id))
            .await?;
        let mut tokens = HashMap::with_capacity(raw.len());
        for (token, value) in raw {
            match parse_state(&value) {
                Ok(state) => {
                    tokens.insert(token, state);
                }
                Err(_) => warn!(
                    "[REDIS TOKEN] unknown state code {} for user_id={}, platform_id={}",
                    value, user_id, platform_id
                ),
            }
        }
        Ok(tokens)
    }

    async fn purge_expired(&self) -> Result<usize> {
        // key TTL 自动清理
        Ok(0)
    }
}

/// Redis 设备推送注册存储
pub struct RedisRegistrationStore {
    client: Arc<RedisClient>,
}

impl RedisRegistrationStore {
    pub fn new(client: Arc<RedisClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RegistrationStore for RedisRegistrationStore {
    async fn upsert(&self, registration: DeviceRegistration) -> Result<()> {
        let key = push_token_key(&registration.user_id, registration.platform_id);
        let value = serde_json::to_string(&registration)?;
        self.client.set(&key, &value, None).await
    }

    async fn get_user_registrations(&self, user_id: &str) -> Result<Vec<DeviceRegistration>> {
        let keys: Vec<String> = Platform::ALL
            .iter()
            .map(|p| push_token_key(user_id, p.id()))
            .collect();
        let values = self.client.mget(&keys).await?;

        let mut registrations = Vec::new();
        for raw in values.into_iter().flatten() {
            match serde_json::from_str::<DeviceRegistration>(&raw) {
                Ok(registration) => registrations.push(registration),
                Err(e) => warn!(
                    "[REDIS REGISTRATION] skipping corrupt registration for user_id={}: {}",
                    user_id, e
                ),
            }
        }
        Ok(registrations)
    }

    async fn delete(&self, user_id: &str, platform_id: i32) -> Result<bool> {
        Ok(self.client.del(&push_token_key(user_id, platform_id)).await? > 0)
    }
}
