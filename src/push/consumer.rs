use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConsumerConfig;
use crate::error::{Result, ServerError};
use crate::infra::event_stream::{EventStream, StreamMessage};
use crate::push::pusher::Pusher;
use crate::push::types::{MessageEvent, PushReport};

/// 事件分发目标
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    async fn dispatch(&self, event: Arc<MessageEvent>) -> Result<PushReport>;
}

#[async_trait]
impl EventDispatcher for Pusher {
    async fn dispatch(&self, event: Arc<MessageEvent>) -> Result<PushReport> {
        self.push(event).await
    }
}

/// 单条消息的处理结果，决定 ack / nack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// 投递成功（含可容忍的 NoOfflineProvider），已 ack
    Acked,
    /// 投递失败，已 nack 等待重投
    Nacked,
    /// 参数错误，ack 后丢弃，不重试
    Dropped,
}

/// 事件消费者
///
/// 多个 worker 并发从事件流取消息，每个 worker 同一时刻只处理一个事件。
/// 只有分发成功才 ack；失败 nack，由事件流负责重投，这里不做重试和退避。
pub struct Consumer {
    stream: Arc<dyn EventStream>,
    dispatcher: Arc<dyn EventDispatcher>,
    workers: usize,
}

impl Consumer {
    pub fn new(
        stream: Arc<dyn EventStream>,
        dispatcher: Arc<dyn EventDispatcher>,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            stream,
            dispatcher,
            workers: config.workers.max(1),
        }
    }

    /// 启动所有 worker；事件流关闭并排空后 worker 退出
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        info!("[CONSUMER] starting {} worker(s)", self.workers);
        (0..self.workers)
            .map(|worker_id| {
                let consumer = Arc::clone(&self);
                tokio::spawn(async move { consumer.run_worker(worker_id).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker_id: usize) {
        debug!("[CONSUMER] worker {} started", worker_id);
        while let Some(message) = self.stream.recv().await {
            self.process(message).await;
        }
        info!("[CONSUMER] worker {} stopped, stream closed", worker_id);
    }

    /// 处理一条消息
    pub async fn process(&self, message: StreamMessage) -> ProcessResult {
        let delivery_id = message.delivery_id;

        let event: MessageEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    "[CONSUMER] dropping undecodable event: delivery_id={}, error={}",
                    delivery_id, e
                );
                self.ack(delivery_id).await;
                return ProcessResult::Dropped;
            }
        };

        debug!(
            "[CONSUMER] dispatching: delivery_id={}, attempt={}, selector={}, client_msg_id={}",
            delivery_id, message.attempt, event.selector, event.client_msg_id
        );

        match self.dispatcher.dispatch(Arc::new(event)).await {
            Ok(report) if report.is_success() => {
                self.ack(delivery_id).await;
                ProcessResult::Acked
            }
            Ok(report) => {
                for (user_id, reason) in report.failures() {
                    warn!(
                        "[CONSUMER] delivery failed: delivery_id={}, user_id={}, reason={}",
                        delivery_id, user_id, reason
                    );
                }
                self.nack(delivery_id).await;
                ProcessResult::Nacked
            }
            Err(ServerError::InvalidArgument(reason)) => {
                warn!(
                    "[CONSUMER] dropping invalid event: delivery_id={}, reason={}",
                    delivery_id, reason
                );
                self.ack(delivery_id).await;
                ProcessResult::Dropped
            }
            Err(e) => {
                error!(
                    "[CONSUMER] event failed: delivery_id={}, attempt={}, error={}",
                    delivery_id, message.attempt, e
                );
                self.nack(delivery_id).await;
                ProcessResult::Nacked
            }
        }
    }

    async fn ack(&self, delivery_id: u64) {
        if let Err(e) = self.stream.ack(delivery_id).await {
            error!("[CONSUMER] ack failed: delivery_id={}, error={}", delivery_id, e);
        }
    }

    async fn nack(&self, delivery_id: u64) {
        if let Err(e) = self.stream.nack(delivery_id).await {
            error!("[CONSUMER] nack failed: delivery_id={}, error={}", delivery_id, e);
        }
    }
}
