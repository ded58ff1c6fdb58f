//! Mock 总线客户端
//!
//! 内存实现，用于单元测试与 dry run，支持注入失败场景。
//! 通过 `deliver` 模拟 broker 投递，消息按订阅模式路由到回调。

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use contracts::QoS;
use tracing::{debug, instrument};

use crate::client::BusClient;
use crate::error::{BusError, Result};
use crate::lock;
use crate::message::{BusMessage, DeliveryCallback, PublishedMessage};
use crate::routes::RouteTable;

/// Mock 客户端配置
#[derive(Debug, Default, Clone)]
pub struct MockConfig {
    /// connect 是否失败
    pub fail_connect: bool,
    /// 订阅应该失败的模式
    pub fail_subscribe: Vec<String>,
    /// 发布应该失败的 topic
    pub fail_publish: Vec<String>,
}

#[derive(Default)]
struct MockState {
    connected: bool,
    routes: RouteTable,
    published: Vec<PublishedMessage>,
}

/// Mock 总线客户端
///
/// `Clone` 共享同一份状态，测试可以保留一个句柄用于投递与检查。
#[derive(Clone)]
pub struct MockBus {
    client_id: String,
    /// 配置（可注入失败场景）
    config: MockConfig,
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    /// 创建默认 mock 客户端
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_config(client_id, MockConfig::default())
    }

    /// 使用配置创建 mock 客户端
    pub fn with_config(client_id: impl Into<String>, config: MockConfig) -> Self {
        Self {
            client_id: client_id.into(),
            config,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// 模拟 broker 投递，返回被调用的回调数量
    ///
    /// 回调可能阻塞（dispatcher 的 hand-off 容量为 1），
    /// 因此应在普通线程或 `spawn_blocking` 中调用，而不是在 async 任务里。
    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>, duplicate: bool) -> usize {
        let callbacks = lock(&self.state).routes.matching(topic);
        let message = BusMessage::new(topic, payload, duplicate);

        debug!(topic, handlers = callbacks.len(), duplicate, "mock delivery");
        for callback in &callbacks {
            callback(message.clone());
        }
        callbacks.len()
    }

    /// 是否已连接
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// 当前订阅的模式（按订阅顺序）
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.state).routes.patterns()
    }

    /// 所有已发布的消息
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state).published.clone()
    }

    fn ensure_connected(&self) -> Result<()> {
        if lock(&self.state).connected {
            Ok(())
        } else {
            Err(BusError::NotConnected)
        }
    }
}

impl BusClient for MockBus {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    #[instrument(name = "mock_bus_connect", skip(self), fields(client_id = %self.client_id))]
    async fn connect(&self) -> Result<()> {
        if self.config.fail_connect {
            return Err(BusError::connection("mock failure"));
        }
        lock(&self.state).connected = true;
        Ok(())
    }

    #[instrument(name = "mock_bus_subscribe", skip(self, callback), fields(pattern = %pattern, qos = %qos))]
    async fn subscribe(&self, pattern: &str, qos: QoS, callback: DeliveryCallback) -> Result<()> {
        self.ensure_connected()?;

        if self.config.fail_subscribe.iter().any(|p| p == pattern) {
            return Err(BusError::subscribe(pattern, "mock failure"));
        }

        lock(&self.state)
            .routes
            .insert(pattern, callback)
            .map_err(|e| BusError::subscribe(pattern, e.to_string()))
    }

    #[instrument(name = "mock_bus_unsubscribe", skip(self), fields(pattern = %pattern))]
    async fn unsubscribe(&self, pattern: &str) -> Result<()> {
        self.ensure_connected()?;

        if lock(&self.state).routes.remove(pattern) {
            Ok(())
        } else {
            Err(BusError::unsubscribe(pattern, "not subscribed"))
        }
    }

    #[instrument(
        name = "mock_bus_publish",
        skip(self, payload),
        fields(topic = %topic, qos = %qos, retain, bytes = payload.len())
    )]
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()> {
        self.ensure_connected()?;

        if self.config.fail_publish.iter().any(|t| t == topic) {
            return Err(BusError::publish(topic, "mock failure"));
        }

        // 不回环：发布的消息不会投递给本地订阅
        lock(&self.state).published.push(PublishedMessage {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }
}
