use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, ServerError};

/// 从事件流取出的一条消息
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// 本次投递的 ID，用于 ack / nack
    pub delivery_id: u64,
    /// 第几次投递（从 1 开始）
    pub attempt: u32,
    pub payload: Bytes,
}

/// 入站事件流（至少一次投递）
///
/// 未 ack 的消息在 nack 后会被重新投递；`recv` 返回 `None` 表示流已关闭且排空。
#[async_trait]
pub trait EventStream: Send + Sync {
    async fn recv(&self) -> Option<StreamMessage>;
    async fn ack(&self, delivery_id: u64) -> Result<()>;
    async fn nack(&self, delivery_id: u64) -> Result<()>;
}

/// 事件发布端
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, payload: Bytes) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Envelope {
    attempt: u32,
    payload: Bytes,
}

/// 进程内事件流
///
/// 有界 mpsc 队列 + 在途表。nack 的消息带着递增的 attempt 重新入队，
/// 可配置重投延迟。
pub struct MemoryStream {
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
    in_flight: DashMap<u64, Envelope>,
    next_delivery_id: AtomicU64,
    redelivery_delay: Duration,
}

impl MemoryStream {
    pub fn new(capacity: usize, redelivery_delay: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            in_flight: DashMap::new(),
            next_delivery_id: AtomicU64::new(1),
            redelivery_delay,
        }
    }

    /// 关闭写入端；已入队的消息仍会被消费完
    pub fn close(&self) {
        self.sender.lock().take();
        debug!("[STREAM] closed");
    }

    /// 已投递但未 ack / nack 的消息数
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn sender(&self) -> Result<mpsc::Sender<Envelope>> {
        self.sender
            .lock()
            .clone()
            .ok_or_else(|| ServerError::ServiceUnavailable("event stream closed".to_string()))
    }

    fn take_in_flight(&self, delivery_id: u64) -> Result<Envelope> {
        self.in_flight
            .remove(&delivery_id)
            .map(|(_, envelope)| envelope)
            .ok_or_else(|| ServerError::NotFound(format!("delivery {}", delivery_id)))
    }
}

#[async_trait]
impl EventStream for MemoryStream {
    async fn recv(&self) -> Option<StreamMessage> {
        let envelope = self.receiver.lock().await.recv().await?;
        let delivery_id = self.next_delivery_id.fetch_add(1, Ordering::Relaxed);
        let message = StreamMessage {
            delivery_id,
            attempt: envelope.attempt,
            payload: envelope.payload.clone(),
        };
        self.in_flight.insert(delivery_id, envelope);
        Some(message)
    }

    async fn ack(&self, delivery_id: u64) -> Result<()> {
        self.take_in_flight(delivery_id)?;
        Ok(())
    }

    async fn nack(&self, delivery_id: u64) -> Result<()> {
        let mut envelope = self.take_in_flight(delivery_id)?;
        envelope.attempt += 1;

        let sender = match self.sender() {
            Ok(sender) => sender,
            Err(e) => {
                warn!(
                    "[STREAM] dropping nacked delivery {} after close (attempt {})",
                    delivery_id, envelope.attempt
                );
                return Err(e);
            }
        };

        // 队列的唯一消费者就是调用 nack 的 worker，这里不能阻塞等待队列空位
        if self.redelivery_delay.is_zero() {
            match sender.try_send(envelope) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(envelope)) => {
                    debug!(
                        "[STREAM] queue full, redelivery of {} deferred (attempt {})",
                        delivery_id, envelope.attempt
                    );
                    spawn_redelivery(sender, envelope, Duration::ZERO);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(ServerError::ServiceUnavailable(
                        "event stream closed".to_string(),
                    ))
                }
            }
        } else {
            spawn_redelivery(sender, envelope, self.redelivery_delay);
        }
        Ok(())
    }
}

fn spawn_redelivery(sender: mpsc::Sender<Envelope>, envelope: Envelope, delay: Duration) {
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if sender.send(envelope).await.is_err() {
            warn!("[STREAM] redelivery dropped, stream closed");
        }
    });
}

#[async_trait]
impl EventPublisher for MemoryStream {
    async fn publish(&self, payload: Bytes) -> Result<()> {
        self.sender()?
            .send(Envelope {
                attempt: 1,
                payload,
            })
            .await
            .map_err(|_| ServerError::ServiceUnavailable("event stream closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ack_removes_in_flight() {
        let stream = MemoryStream::new(8, Duration::ZERO);
        stream.publish(Bytes::from_static(b"a")).await.unwrap();

        let msg = stream.recv().await.unwrap();
        assert_eq!(msg.attempt, 1);
        assert_eq!(stream.in_flight(), 1);

        stream.ack(msg.delivery_id).await.unwrap();
        assert_eq!(stream.in_flight(), 0);
        assert!(matches!(
            stream.ack(msg.delivery_id).await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_next_attempt() {
        let stream = MemoryStream::new(8, Duration::ZERO);
        stream.publish(Bytes::from_static(b"a")).await.unwrap();

        let first = stream.recv().await.unwrap();
        stream.nack(first.delivery_id).await.unwrap();

        let second = stream.recv().await.unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(second.payload, first.payload);
        assert_ne!(second.delivery_id, first.delivery_id);
    }

    #[tokio::test]
    async fn test_delayed_redelivery() {
        let stream = MemoryStream::new(8, Duration::from_millis(20));
        stream.publish(Bytes::from_static(b"a")).await.unwrap();

        let first = stream.recv().await.unwrap();
        stream.nack(first.delivery_id).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn test_nack_on_full_queue_does_not_block() {
        let stream = MemoryStream::new(1, Duration::ZERO);
        stream.publish(Bytes::from_static(b"a")).await.unwrap();
        let first = stream.recv().await.unwrap();
        stream.publish(Bytes::from_static(b"b")).await.unwrap();

        tokio::time::timeout(Duration::from_millis(500), stream.nack(first.delivery_id))
            .await
            .unwrap()
            .unwrap();

        let next = stream.recv().await.unwrap();
        assert_eq!(next.payload, Bytes::from_static(b"b"));
        assert_eq!(next.attempt, 1);
        let again = tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.payload, Bytes::from_static(b"a"));
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let stream = MemoryStream::new(8, Duration::ZERO);
        stream.publish(Bytes::from_static(b"a")).await.unwrap();
        stream.close();

        assert!(stream.publish(Bytes::from_static(b"b")).await.is_err());
        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_none());
    }
}
