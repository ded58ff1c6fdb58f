//! BridgeBlueprint - Config Loader 输出
//!
//! 描述完整的桥接配置：broker 连接、订阅列表、发布默认值、分发策略、输出路由。

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use crate::{ContractError, QoS};

/// `{client}` 占位符，发布 topic 中替换为本地 client id
pub const CLIENT_PLACEHOLDER: &str = "{client}";

/// broker 状态 topic 的订阅模式
pub const SYS_PATTERN: &str = "$SYS/#";

/// 默认 MQTT 端口
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的桥接配置蓝图
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct BridgeBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// broker 连接设置
    #[serde(default)]
    #[validate(nested)]
    pub broker: BrokerConfig,

    /// 订阅设置
    #[serde(default)]
    #[validate(nested)]
    pub subscriptions: SubscriptionConfig,

    /// 标准输入发布设置
    #[serde(default)]
    #[validate(nested)]
    pub publish: PublishConfig,

    /// 分发循环设置
    #[serde(default)]
    #[validate(nested)]
    pub dispatch: DispatchConfig,

    /// 输出路由配置
    #[serde(default)]
    #[validate(nested)]
    pub sinks: Vec<SinkConfig>,
}

/// broker 连接配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BrokerConfig {
    /// broker 地址 (e.g., "tcp://localhost:1883")
    #[serde(default = "default_broker_uri")]
    #[validate(length(min = 1))]
    pub uri: String,

    /// client id，缺省时由 CLI 随机生成 "plumber-NNN"
    #[serde(default)]
    pub client_id: Option<String>,

    /// 是否以 clean session 连接
    #[serde(default = "default_true")]
    pub clean_session: bool,

    /// keep-alive 间隔 (秒)
    #[serde(default = "default_keep_alive_secs")]
    #[validate(range(min = 1))]
    pub keep_alive_secs: u64,

    /// 首次连接超时 (秒)
    #[serde(default = "default_connect_timeout_secs")]
    #[validate(range(min = 1))]
    pub connect_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: default_broker_uri(),
            client_id: None,
            clean_session: true,
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl BrokerConfig {
    /// 解析 uri 为 (host, port)
    ///
    /// 支持 `tcp://` 与 `mqtt://`，端口缺省为 1883。
    pub fn endpoint(&self) -> Result<(String, u16), ContractError> {
        let rest = self
            .uri
            .strip_prefix("tcp://")
            .or_else(|| self.uri.strip_prefix("mqtt://"))
            .ok_or_else(|| {
                ContractError::config_validation(
                    "broker.uri",
                    format!("unsupported scheme in '{}', expected tcp:// or mqtt://", self.uri),
                )
            })?
            .trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    ContractError::config_validation(
                        "broker.uri",
                        format!("invalid port '{port}': {e}"),
                    )
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_BROKER_PORT),
        };

        if host.is_empty() {
            return Err(ContractError::config_validation(
                "broker.uri",
                format!("missing host in '{}'", self.uri),
            ));
        }

        Ok((host.to_string(), port))
    }
}

fn default_broker_uri() -> String {
    "tcp://localhost:1883".to_string()
}

fn default_true() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// 订阅配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubscriptionConfig {
    /// 订阅模式列表，可写为数组或逗号分隔字符串
    #[serde(default = "default_watch", deserialize_with = "deserialize_watch")]
    pub watch: Vec<String>,

    /// 命名空间前缀，以 "/" 拼接到每个订阅模式前
    #[serde(default)]
    pub prefix: String,

    /// 订阅 QoS
    #[serde(default)]
    pub qos: QoS,

    /// 是否同时持久化 `$SYS/#` broker 状态消息
    #[serde(default)]
    pub sys: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            watch: default_watch(),
            prefix: String::new(),
            qos: QoS::default(),
            sys: false,
        }
    }
}

impl SubscriptionConfig {
    /// 实际订阅的模式列表
    ///
    /// 去除空白项与重复项，拼接前缀；启用 `sys` 时 `$SYS/#` 排在最前且不加前缀。
    pub fn effective_patterns(&self) -> Vec<String> {
        let prefix = self.prefix.trim().trim_end_matches('/');
        let mut patterns = Vec::with_capacity(self.watch.len() + 1);

        if self.sys {
            patterns.push(SYS_PATTERN.to_string());
        }

        for entry in &self.watch {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let pattern = if prefix.is_empty() {
                entry.to_string()
            } else {
                format!("{prefix}/{entry}")
            };
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }

        patterns
    }
}

/// 拆分逗号分隔的订阅列表（保留空白项，交由校验报告）
pub fn split_watch_list(list: &str) -> Vec<String> {
    list.split(',').map(str::to_string).collect()
}

fn default_watch() -> Vec<String> {
    vec!["broadcast/#".to_string()]
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WatchList {
    Joined(String),
    Items(Vec<String>),
}

fn deserialize_watch<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match WatchList::deserialize(deserializer)? {
        WatchList::Joined(list) => split_watch_list(&list),
        WatchList::Items(items) => items,
    })
}

/// 标准输入发布配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PublishConfig {
    /// 输入行不含 topic 时使用的默认 topic，支持 `{client}` 占位符
    #[serde(default = "default_publish_topic")]
    #[validate(length(min = 1))]
    pub default_topic: String,

    /// 发布 QoS
    #[serde(default)]
    pub qos: QoS,

    /// 是否设置 retain 标志
    #[serde(default)]
    pub retain: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            default_topic: default_publish_topic(),
            qos: QoS::default(),
            retain: false,
        }
    }
}

fn default_publish_topic() -> String {
    "broadcast/client/{client}".to_string()
}

/// 将模板中的 `{client}` 替换为 client id
pub fn substitute_client(template: &str, client_id: &str) -> String {
    template.replace(CLIENT_PLACEHOLDER, client_id)
}

/// 分发循环配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatchConfig {
    /// 空闲 tick 间隔 (毫秒)
    #[serde(default = "default_idle_interval_ms")]
    #[validate(range(min = 1))]
    pub idle_interval_ms: u64,

    /// sink 缓冲的最长保留时间 (毫秒)，与是否空闲无关
    #[serde(default = "default_flush_interval_ms")]
    #[validate(range(min = 1))]
    pub flush_interval_ms: u64,

    /// sink 写入失败策略
    #[serde(default)]
    pub sink_failure_policy: SinkFailurePolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: default_idle_interval_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            sink_failure_policy: SinkFailurePolicy::default(),
        }
    }
}

fn default_idle_interval_ms() -> u64 {
    1000
}

fn default_flush_interval_ms() -> u64 {
    1000
}

/// sink 写入失败策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SinkFailurePolicy {
    /// 记录日志后继续
    #[default]
    Continue,
    /// 同一 sink 连续失败 (写入或刷新) 达到阈值后终止分发循环
    AbortAfter { consecutive_failures: u32 },
}

/// Sink 配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// 唯一名称
    #[validate(length(min = 1))]
    pub name: String,

    /// Sink 类型
    pub sink_type: SinkType,

    /// 类型相关参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// tracing 日志
    Log,
    /// 本地文件 (JSON lines / line protocol)
    File,
    /// UDP 数据报
    Network,
    /// InfluxDB HTTP 写入
    Influx,
}
