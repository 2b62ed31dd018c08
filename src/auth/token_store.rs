use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::auth::token_state::TokenState;
use crate::error::Result;

/// 每个 (user, platform) 的 token 状态存储
///
/// 同一个 (user, platform) 的所有变更在一把锁（或一个脚本）内完成，
/// 因此并发的签发与踢下线总会落到确定的终态。
#[async_trait]
pub trait TokenStateStore: Send + Sync {
    /// 查询 token 当前状态，没有记录返回 `Absent`
    async fn lookup(&self, user_id: &str, platform_id: i32, token: &str) -> Result<TokenState>;

    /// 记录新 token 为 Normal（已被踢的 token 保持 Kicked），
    /// 同时把该 (user, platform) 其它 Normal token 踢下线，返回被踢数量
    async fn issue(
        &self,
        user_id: &str,
        platform_id: i32,
        token: &str,
        expires_at: i64,
    ) -> Result<usize>;

    /// 踢下线单个 token，返回变更后的状态
    ///
    /// 没有记录的 token 会写入 Kicked 墓碑，之后的签发不会把它恢复为 Normal。
    async fn kick(&self, user_id: &str, platform_id: i32, token: &str) -> Result<TokenState>;

    /// 踢下线 (user, platform) 的所有 Normal token，返回被踢数量
    async fn kick_platform(&self, user_id: &str, platform_id: i32) -> Result<usize>;

    /// 列出 (user, platform) 的所有 token 及状态
    async fn get_tokens(&self, user_id: &str, platform_id: i32)
        -> Result<HashMap<String, TokenState>>;

    /// 清理过期记录，返回清理数量
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Debug, Clone, Copy)]
struct TokenRecord {
    state: TokenState,
    /// unix 秒
    expires_at: i64,
}

impl TokenRecord {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

type PairKey = (String, i32);

/// 内存 token 状态存储
///
/// DashMap 的 entry 锁即 (user, platform) 级别的锁。
pub struct MemoryTokenStore {
    entries: DashMap<PairKey, HashMap<String, TokenRecord>>,
    /// 墓碑（对未签发 token 的 kick）保留时间
    tombstone_ttl: Duration,
}

impl MemoryTokenStore {
    pub fn new(tombstone_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            tombstone_ttl,
        }
    }

    fn key(user_id: &str, platform_id: i32) -> PairKey {
        (user_id.to_string(), platform_id)
    }
}

#[async_trait]
impl TokenStateStore for MemoryTokenStore {
    async fn lookup(&self, user_id: &str, platform_id: i32, token: &str) -> Result<TokenState> {
        let now = Utc::now().timestamp();
        let state = self
            .entries
            .get(&Self::key(user_id, platform_id))
            .and_then(|tokens| tokens.get(token).copied())
            .filter(|record| !record.is_expired(now))
            .map(|record| record.state)
            .unwrap_or(TokenState::Absent);
        Ok(state)
    }

    async fn issue(
        &self,
        user_id: &str,
        platform_id: i32,
        token: &str,
        expires_at: i64,
    ) -> Result<usize> {
        let now = Utc::now().timestamp();
        let mut tokens = self.entries.entry(Self::key(user_id, platform_id)).or_default();
        tokens.retain(|_, record| !record.is_expired(now));

        let mut kicked = 0;
        for (existing, record) in tokens.iter_mut() {
            if existing != token && record.state == TokenState::Normal {
                record.state = record.state.on_kick();
                kicked += 1;
            }
        }

        let current = tokens
            .get(token)
            .map(|record| record.state)
            .unwrap_or(TokenState::Absent);
        let record = TokenRecord {
            state: current.on_issue(),
            expires_at: expires_at.max(tokens.get(token).map_or(0, |r| r.expires_at)),
        };
        tokens.insert(token.to_string(), record);

        debug!(
            "[TOKEN_STORE] issue user_id={}, platform_id={}, state={}, kicked={}",
            user_id,
            platform_id,
            record.state.as_str(),
            kicked
        );
        Ok(kicked)
    }

    async fn kick(&self, user_id: &str, platform_id: i32, token: &str) -> Result<TokenState> {
        let now = Utc::now().timestamp();
        let tombstone_expiry = now + self.tombstone_ttl.as_secs() as i64;
        let mut tokens = self.entries.entry(Self::key(user_id, platform_id)).or_default();

        let record = tokens.entry(token.to_string()).or_insert(TokenRecord {
            state: TokenState::Kicked,
            expires_at: tombstone_expiry,
        });
        if record.is_expired(now) {
            *record = TokenRecord {
                state: TokenState::Kicked,
                expires_at: tombstone_expiry,
            };
        }
        record.state = record.state.on_kick();
        Ok(record.state)
    }

    async fn kick_platform(&self, user_id: &str, platform_id: i32) -> Result<usize> {
        let now = Utc::now().timestamp();
        let Some(mut tokens) = self.entries.get_mut(&Self::key(user_id, platform_id)) else {
            return Ok(0);
        };

        let mut kicked = 0;
        for record in tokens.values_mut() {
            if record.state == TokenState::Normal && !record.is_expired(now) {
                record.state = record.state.on_kick();
                kicked += 1;
            }
        }
        info!(
            "[TOKEN_STORE] kick_platform user_id={}, platform_id={}, kicked={}",
            user_id, platform_id, kicked
        );
        Ok(kicked)
    }

    async fn get_tokens(
        &self,
        user_id: &str,
        platform_id: i32,
    ) -> Result<HashMap<String, TokenState>> {
        let now = Utc::now().timestamp();
        Ok(self
            .entries
            .get(&Self::key(user_id, platform_id))
            .map(|tokens| {
                tokens
                    .iter()
                    .filter(|(_, record)| !record.is_expired(now))
                    .map(|(token, record)| (token.clone(), record.state))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let mut purged = 0;
        self.entries.retain(|_, tokens| {
            let before = tokens.len();
            tokens.retain(|_, record| !record.is_expired(now));
            purged += before - tokens.len();
            !tokens.is_empty()
        });
        if purged > 0 {
            debug!("[TOKEN_STORE] purged {} expired token(s)", purged);
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> MemoryTokenStore {
        MemoryTokenStore::new(Duration::from_secs(3600))
    }

    fn later() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn test_new_token_kicks_previous() {
        let store = store();
        store.issue("u1", 1, "t1", later()).await.unwrap();
        assert_eq!(store.lookup("u1", 1, "t1").await.unwrap(), TokenState::Normal);

        let kicked = store.issue("u1", 1, "t2", later()).await.unwrap();
        assert_eq!(kicked, 1);
        assert_eq!(store.lookup("u1", 1, "t1").await.unwrap(), TokenState::Kicked);
        assert_eq!(store.lookup("u1", 1, "t2").await.unwrap(), TokenState::Normal);
    }

    #[tokio::test]
    async fn test_platforms_are_independent() {
        let store = store();
        store.issue("u1", 1, "ios", later()).await.unwrap();
        store.issue("u1", 2, "android", later()).await.unwrap();
        assert_eq!(store.lookup("u1", 1, "ios").await.unwrap(), TokenState::Normal);
        assert_eq!(store.lookup("u1", 2, "ios").await.unwrap(), TokenState::Absent);
    }

    #[tokio::test]
    async fn test_unknown_pair_is_absent() {
        let store = store();
        assert_eq!(store.lookup("u9", 2, "t").await.unwrap(), TokenState::Absent);
        assert!(store.get_tokens("u9", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_kick_is_noop() {
        let store = store();
        store.issue("u1", 1, "t1", later()).await.unwrap();
        assert_eq!(store.kick("u1", 1, "t1").await.unwrap(), TokenState::Kicked);
        assert_eq!(store.kick("u1", 1, "t1").await.unwrap(), TokenState::Kicked);
        assert_eq!(store.kick_platform("u1", 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_kicked_token_cannot_be_reissued() {
        let store = store();
        store.kick("u1", 1, "t1").await.unwrap();
        store.issue("u1", 1, "t1", later()).await.unwrap();
        assert_eq!(store.lookup("u1", 1, "t1").await.unwrap(), TokenState::Kicked);
    }

    #[tokio::test]
    async fn test_concurrent_issue_and_kick_end_kicked() {
        for _ in 0..20 {
            let store = Arc::new(store());
            let a = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.issue("u1", 1, "t1", later()).await })
            };
            let b = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.kick("u1", 1, "t1").await })
            };
            a.await.unwrap().unwrap();
            b.await.unwrap().unwrap();
            assert_eq!(store.lookup("u1", 1, "t1").await.unwrap(), TokenState::Kicked);
        }
    }

    #[tokio::test]
    async fn test_kick_platform() {
        let store = store();
        store.issue("u1", 1, "t1", later()).await.unwrap();
        assert_eq!(store.kick_platform("u1", 1).await.unwrap(), 1);
        assert_eq!(store.lookup("u1", 1, "t1").await.unwrap(), TokenState::Kicked);
        assert_eq!(store.kick_platform("u2", 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_reads_absent_and_purges() {
        let store = store();
        let past = Utc::now().timestamp() - 10;
        store.issue("u1", 1, "old", past).await.unwrap();
        assert_eq!(store.lookup("u1", 1, "old").await.unwrap(), TokenState::Absent);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.entries.is_empty());
    }
}
