// Infrastructure layer - 基础设施层
// 负责事件流、群成员缓存、Redis 存储

pub mod event_stream;
pub mod membership_cache;
pub mod redis;
pub mod redis_store;

pub use event_stream::{EventPublisher, EventStream, MemoryStream, StreamMessage};
pub use membership_cache::{GroupMemberSource, HttpMembershipSource, MembershipCache};
pub use redis::RedisClient;
pub use redis_store::{RedisRegistrationStore, RedisTokenStore};
