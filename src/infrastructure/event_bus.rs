// Event Bus 框架
// 硬件签名生命周期事件的发布/订阅；发布时按订阅顺序同步分发，并保留有限历史

use std::{collections::VecDeque, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

// ============ 事件类型定义 ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum HardwareSignEvent {
    Started {
        request_id: Uuid,
        address_id: String,
        hardware_type: String,
        tx_context: String,
    },
    Succeeded {
        request_id: Uuid,
        address_id: String,
        tx_hash: String,
    },
    /// 硬件或签名失败（不含取消）
    Failed {
        request_id: Uuid,
        address_id: String,
        code: String,
        message: String,
    },
    /// 用户取消
    Aborted {
        request_id: Uuid,
        address_id: String,
    },
}

impl HardwareSignEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "HardwareSignStarted",
            Self::Succeeded { .. } => "HardwareSignSucceeded",
            Self::Failed { .. } => "HardwareSignFailed",
            Self::Aborted { .. } => "HardwareSignAborted",
        }
    }

    pub fn request_id(&self) -> Uuid {
        match self {
            Self::Started { request_id, .. }
            | Self::Succeeded { request_id, .. }
            | Self::Failed { request_id, .. }
            | Self::Aborted { request_id, .. } => *request_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event: HardwareSignEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

// ============ Event Handler Trait ============

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &HardwareSignEvent) -> Result<()>;
    fn event_types(&self) -> Vec<&'static str>;
}

// ============ Event Bus 接口 ============

#[async_trait]
pub trait EventBus: Send + Sync {
    /// 发布事件，处理器失败只记录日志
    async fn publish(&self, event: HardwareSignEvent) -> Result<()>;

    /// 订阅事件
    async fn subscribe(&self, handler: Arc<dyn EventHandler>);

    /// 获取事件历史（最新在前）
    async fn get_event_history(&self, limit: usize, offset: usize) -> Result<Vec<EventEnvelope>>;
}

// ============ 内存 Event Bus 实现 ============

const DEFAULT_HISTORY_CAPACITY: usize = 1000;

pub struct InMemoryEventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    history: RwLock<VecDeque<EventEnvelope>>,
    capacity: usize,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: HardwareSignEvent) -> Result<()> {
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            event,
            published_at: chrono::Utc::now(),
        };

        tracing::debug!(
            event_id = %envelope.event_id,
            event_type = envelope.event.event_type(),
            "Publishing hardware sign event"
        );

        {
            let mut history = self.history.write().await;
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(envelope.clone());
        }

        let handlers = self.handlers.read().await.clone();
        let event_type = envelope.event.event_type();
        for handler in handlers {
            if handler.event_types().contains(&event_type) {
                if let Err(e) = handler.handle(&envelope.event).await {
                    tracing::error!(error = ?e, event_type = event_type, "Event handler error");
                }
            }
        }

        Ok(())
    }

    async fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    async fn get_event_history(&self, limit: usize, offset: usize) -> Result<Vec<EventEnvelope>> {
        let history = self.history.read().await;
        Ok(history.iter().rev().skip(offset).take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingHandler {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &HardwareSignEvent) -> Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn event_types(&self) -> Vec<&'static str> {
            vec!["HardwareSignAborted"]
        }
    }

    #[tokio::test]
    async fn test_publish_dispatches_and_records() {
        let bus = InMemoryEventBus::with_capacity(2);
        let handler = Arc::new(CountingHandler {
            seen: AtomicUsize::new(0),
        });
        bus.subscribe(handler.clone()).await;

        let id = Uuid::new_v4();
        bus.publish(HardwareSignEvent::Started {
            request_id: id,
            address_id: "a1".into(),
            hardware_type: "bsim".into(),
            tx_context: "send".into(),
        })
        .await
        .unwrap();
        bus.publish(HardwareSignEvent::Aborted {
            request_id: id,
            address_id: "a1".into(),
        })
        .await
        .unwrap();
        bus.publish(HardwareSignEvent::Aborted {
            request_id: id,
            address_id: "a1".into(),
        })
        .await
        .unwrap();

        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);

        // 容量 2，最早的 Started 被淘汰
        let history = bus.get_event_history(10, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history
            .iter()
            .all(|e| e.event.event_type() == "HardwareSignAborted"));
    }
}
