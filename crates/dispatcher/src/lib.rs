//! # Dispatcher
//!
//! 分发模块，桥接的核心事件循环。
//!
//! 负责：
//! - 管理订阅 (pattern 编译 + 总线订阅)
//! - 将总线消息构造成 `Record` 并写入所有 sinks
//! - 将输入行发布到总线
//! - 空闲时定期 flush sinks

pub mod builder;
pub mod dispatcher;
pub mod error;
pub mod input;
pub mod metrics;
pub mod sinks;
pub mod subscription;

pub use builder::RecordBuilder;
pub use contracts::{DataSink, Record};
pub use dispatcher::{BridgeContext, BusEvent, Dispatcher, DispatcherState};
pub use error::DispatcherError;
pub use input::{parse_publish_request, spawn_line_reader, PublishRequest};
pub use metrics::DispatchStats;
pub use sinks::{create_sink, create_sinks, ConfiguredSink, FileSink, InfluxSink, LogSink, NetworkSink};
pub use subscription::{Subscription, SubscriptionId, SubscriptionTable};
