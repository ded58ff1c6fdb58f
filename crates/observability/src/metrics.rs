//! 桥接指标收集模块
//!
//! 记录消息接收、匹配、payload 分类、sink 写入与发布的运行指标。

use std::collections::HashMap;

use contracts::Record;
use metrics::{counter, gauge, histogram};

/// 记录收到的总线消息
pub fn record_message_received(pattern: &str, duplicate: bool) {
    counter!(
        "mqtt_plumber_messages_received_total",
        "pattern" => pattern.to_string(),
        "duplicate" => duplicate.to_string()
    )
    .increment(1);
}

/// 记录未能匹配订阅模式的消息
pub fn record_message_unmatched(pattern: &str) {
    counter!(
        "mqtt_plumber_messages_unmatched_total",
        "pattern" => pattern.to_string()
    )
    .increment(1);
}

/// 记录 payload 分类结果
pub fn record_payload_classified(kind: &str) {
    counter!("mqtt_plumber_payloads_total", "kind" => kind.to_string()).increment(1);
}

/// 记录无法解析的对象 payload
pub fn record_payload_malformed(pattern: &str) {
    counter!(
        "mqtt_plumber_payloads_malformed_total",
        "pattern" => pattern.to_string()
    )
    .increment(1);
}

/// 记录 sink 写入结果
pub fn record_record_written(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "mqtt_plumber_records_written_total",
        "sink" => sink_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录 sink 刷新结果
pub fn record_sink_flush(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "mqtt_plumber_sink_flushes_total",
        "sink" => sink_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录 sink 写入耗时
pub fn record_sink_write_latency_ms(sink_name: &str, latency_ms: f64) {
    histogram!(
        "mqtt_plumber_sink_write_latency_ms",
        "sink" => sink_name.to_string()
    )
    .record(latency_ms);
}

/// 记录发布结果
pub fn record_publish(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("mqtt_plumber_publish_total", "status" => status.to_string()).increment(1);
}

/// 记录当前活跃订阅数
pub fn record_subscriptions_active(count: usize) {
    gauge!("mqtt_plumber_subscriptions_active").set(count as f64);
}

/// 桥接指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct BridgeMetricsAggregator {
    /// 收到的消息总数 (含重复)
    pub total_received: u64,

    /// 重复投递数
    pub total_duplicates: u64,

    /// 未匹配的消息数
    pub total_unmatched: u64,

    /// 无法解析的对象 payload 数
    pub total_malformed: u64,

    /// 构建出的 record 数
    pub total_records: u64,

    /// sink 写入失败数
    pub total_write_failures: u64,

    /// 发布成功数
    pub total_published: u64,

    /// 发布失败数
    pub total_publish_failures: u64,

    /// sink 写入耗时统计 (毫秒)
    pub write_latency: RunningStats,

    /// 各订阅模式收到的消息数
    pub pattern_counts: HashMap<String, u64>,

    /// 各 payload 类型数量
    pub kind_counts: HashMap<String, u64>,
}

impl BridgeMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 收到一条消息
    pub fn on_received(&mut self, pattern: &str, duplicate: bool) {
        self.total_received += 1;
        if duplicate {
            self.total_duplicates += 1;
        }
        *self.pattern_counts.entry(pattern.to_string()).or_insert(0) += 1;
    }

    /// 消息未匹配
    pub fn on_unmatched(&mut self) {
        self.total_unmatched += 1;
    }

    /// payload 已分类
    pub fn on_payload(&mut self, kind: &str) {
        *self.kind_counts.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// 对象 payload 解析失败
    pub fn on_malformed(&mut self) {
        self.total_malformed += 1;
    }

    /// record 已构建
    pub fn on_record(&mut self, _record: &Record) {
        self.total_records += 1;
    }

    /// sink 写入完成
    pub fn on_write(&mut self, success: bool, latency_ms: f64) {
        if !success {
            self.total_write_failures += 1;
        }
        self.write_latency.push(latency_ms);
    }

    /// 发布完成
    pub fn on_publish(&mut self, success: bool) {
        if success {
            self.total_published += 1;
        } else {
            self.total_publish_failures += 1;
        }
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        let processed = self.total_received - self.total_duplicates;
        MetricsSummary {
            total_received: self.total_received,
            total_duplicates: self.total_duplicates,
            total_unmatched: self.total_unmatched,
            total_malformed: self.total_malformed,
            total_records: self.total_records,
            total_write_failures: self.total_write_failures,
            total_published: self.total_published,
            total_publish_failures: self.total_publish_failures,
            record_rate: if processed > 0 {
                self.total_records as f64 / processed as f64 * 100.0
            } else {
                0.0
            },
            write_latency_ms: StatsSummary::from(&self.write_latency),
            pattern_counts: self.pattern_counts.clone(),
            kind_counts: self.kind_counts.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_received: u64,
    pub total_duplicates: u64,
    pub total_unmatched: u64,
    pub total_malformed: u64,
    pub total_records: u64,
    pub total_write_failures: u64,
    pub total_published: u64,
    pub total_publish_failures: u64,
    /// 非重复消息中产出 record 的比例 (%)
    pub record_rate: f64,
    pub write_latency_ms: StatsSummary,
    pub pattern_counts: HashMap<String, u64>,
    pub kind_counts: HashMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bridge Metrics Summary ===")?;
        writeln!(
            f,
            "Messages received: {} (duplicates: {})",
            self.total_received, self.total_duplicates
        )?;
        writeln!(f, "Unmatched: {}", self.total_unmatched)?;
        writeln!(f, "Malformed objects: {}", self.total_malformed)?;
        writeln!(
            f,
            "Records built: {} ({:.2}%)",
            self.total_records, self.record_rate
        )?;
        writeln!(f, "Sink write failures: {}", self.total_write_failures)?;
        writeln!(f, "Sink write latency (ms): {}", self.write_latency_ms)?;
        writeln!(
            f,
            "Published: {} (failures: {})",
            self.total_published, self.total_publish_failures
        )?;

        if !self.pattern_counts.is_empty() {
            writeln!(f, "Messages per pattern:")?;
            let mut patterns: Vec<_> = self.pattern_counts.iter().collect();
            patterns.sort();
            for (pattern, count) in patterns {
                writeln!(f, "  {}: {}", pattern, count)?;
            }
        }

        if !self.kind_counts.is_empty() {
            writeln!(f, "Payload kinds:")?;
            let mut kinds: Vec<_> = self.kind_counts.iter().collect();
            kinds.sort();
            for (kind, count) in kinds {
                writeln!(f, "  {}: {}", kind, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }
}
