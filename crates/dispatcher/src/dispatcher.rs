//! Dispatcher - the single-consumer event loop
//!
//! Merges bus deliveries, publish requests and an idle tick. Events are handled
//! one at a time; sink writes are awaited inline so a slow sink throttles the
//! bus threads through the capacity-1 hand-off channel.
//!
//! Sinks are flushed on every idle tick and, under steady traffic, whenever the
//! last flush is older than the flush interval. Write and flush failures count
//! toward the same per-sink failure streak.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use bus::{BusClient, BusMessage, DeliveryCallback};
use bytes::Bytes;
use chrono::Utc;
use contracts::{
    substitute_client, ContractError, DataSink, DispatchConfig, PublishConfig, QoS,
    SinkFailurePolicy,
};
use observability::BridgeMetricsAggregator;
use observability::MetricsSummary;
use tracing::{debug, error, info, instrument, warn};

use crate::builder::RecordBuilder;
use crate::error::DispatcherError;
use crate::input::parse_publish_request;
use crate::metrics::DispatchStats;
use crate::subscription::{SubscriptionId, SubscriptionTable};

/// Metric label for deliveries whose subscription is gone
const UNKNOWN_PATTERN: &str = "<inactive>";

/// Loop state, observable between events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatcherState {
    #[default]
    Idle,
    HandlingBusMessage,
    HandlingPublishRequest,
    HandlingTick,
    /// Input closed; terminal
    Shutdown,
}

/// Per-client settings used by the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeContext {
    /// Local client id
    pub client_id: String,
    /// Topic for input lines without one, `{client}` already substituted
    pub default_publish_topic: String,
    pub publish_qos: QoS,
    pub publish_retain: bool,
}

impl BridgeContext {
    pub fn new(client_id: impl Into<String>, publish: &PublishConfig) -> Self {
        let client_id = client_id.into();
        Self {
            default_publish_topic: substitute_client(&publish.default_topic, &client_id),
            client_id,
            publish_qos: publish.qos,
            publish_retain: publish.retain,
        }
    }
}

/// Delivery tagged with the subscription it arrived through
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub subscription: SubscriptionId,
    pub message: BusMessage,
}

/// Consecutive failures per sink, checked against the policy
#[derive(Debug)]
struct FailureStreaks {
    policy: SinkFailurePolicy,
    counts: Vec<u32>,
}

impl FailureStreaks {
    fn new(policy: SinkFailurePolicy, sinks: usize) -> Self {
        Self {
            policy,
            counts: vec![0; sinks],
        }
    }

    fn succeeded(&mut self, sink: usize) {
        self.counts[sink] = 0;
    }

    fn failed(&mut self, sink: usize, sink_name: &str) -> Result<(), DispatcherError> {
        self.counts[sink] += 1;
        let failures = self.counts[sink];
        match self.policy {
            SinkFailurePolicy::AbortAfter {
                consecutive_failures,
            } if failures >= consecutive_failures => Err(DispatcherError::SinkFailureLimit {
                sink_name: sink_name.to_string(),
                failures,
            }),
            _ => Ok(()),
        }
    }
}

enum LoopEvent {
    Bus(BusEvent),
    Publish(String),
    InputClosed,
}

/// The main Dispatcher
pub struct Dispatcher<B, S> {
    bus: B,
    sinks: Vec<S>,
    context: BridgeContext,
    builder: RecordBuilder,
    idle_interval: Duration,
    flush_interval: Duration,
    last_flush: Instant,
    subscriptions: SubscriptionTable,
    events_tx: Sender<BusEvent>,
    events_rx: Receiver<BusEvent>,
    state: DispatcherState,
    stats: DispatchStats,
    aggregator: BridgeMetricsAggregator,
    streaks: FailureStreaks,
}

impl<B, S> Dispatcher<B, S>
where
    B: BusClient,
    S: DataSink,
{
    /// Create a dispatcher over a connected bus
    pub fn new(bus: B, sinks: Vec<S>, context: BridgeContext, config: &DispatchConfig) -> Self {
        let (events_tx, events_rx) = async_channel::bounded(1);
        let streaks = FailureStreaks::new(config.sink_failure_policy, sinks.len());
        Self {
            bus,
            sinks,
            builder: RecordBuilder::new(context.client_id.clone()),
            context,
            idle_interval: Duration::from_millis(config.idle_interval_ms),
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            last_flush: Instant::now(),
            subscriptions: SubscriptionTable::new(),
            events_tx,
            events_rx,
            state: DispatcherState::Idle,
            stats: DispatchStats::default(),
            aggregator: BridgeMetricsAggregator::new(),
            streaks,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn context(&self) -> &BridgeContext {
        &self.context
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    /// In-memory metrics summary
    pub fn summary(&self) -> MetricsSummary {
        self.aggregator.summary()
    }

    /// Subscribe to `pattern`
    ///
    /// On error no subscription is created and the dispatcher is unchanged.
    #[instrument(name = "dispatcher_subscribe", skip(self), fields(pattern = %pattern, qos = %qos))]
    pub async fn subscribe(
        &mut self,
        pattern: &str,
        qos: QoS,
    ) -> Result<SubscriptionId, DispatcherError> {
        let compiled = topic::compile(pattern)?;
        let id = self.subscriptions.next_id();
        let callback = self.delivery_callback(id);

        self.bus.subscribe(compiled.as_str(), qos, callback).await?;

        self.subscriptions.insert(id, compiled, qos);
        observability::record_subscriptions_active(self.subscriptions.active_count());
        info!(subscription = %id, "Subscribed");
        Ok(id)
    }

    /// Subscribe to every pattern, logging and skipping the ones that fail
    pub async fn subscribe_all(&mut self, patterns: &[String], qos: QoS) -> Vec<SubscriptionId> {
        let mut ids = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            match self.subscribe(pattern, qos).await {
                Ok(id) => ids.push(id),
                Err(e) => error!(pattern = %pattern, error = %e, "Subscription not created"),
            }
        }
        ids
    }

    /// Remove a subscription
    ///
    /// Deliveries already queued for it are skipped afterwards.
    #[instrument(name = "dispatcher_unsubscribe", skip(self), fields(subscription = %id))]
    pub async fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), DispatcherError> {
        let pattern = self
            .subscriptions
            .active(id)
            .map(|sub| sub.pattern.as_str().to_string())
            .ok_or(DispatcherError::UnknownSubscription(id.get()))?;

        self.bus.unsubscribe(&pattern).await?;

        self.subscriptions.deactivate(id);
        observability::record_subscriptions_active(self.subscriptions.active_count());
        info!(pattern = %pattern, "Unsubscribed");
        Ok(())
    }

    /// Callback handed to the bus for subscription `id`
    ///
    /// Runs on the bus thread and blocks until the loop takes the event.
    fn delivery_callback(&self, id: SubscriptionId) -> DeliveryCallback {
        let tx = self.events_tx.clone();
        Arc::new(move |message: BusMessage| {
            let event = BusEvent {
                subscription: id,
                message,
            };
            if tx.send_blocking(event).is_err() {
                debug!(subscription = %id, "Dispatcher gone, delivery dropped");
            }
        })
    }

    /// Run until `input` closes
    ///
    /// Subscriptions stay active afterwards. Deliveries already handed off when
    /// the input closes are still processed. Sinks are flushed on the way out.
    ///
    /// # Errors
    /// [`DispatcherError::SinkFailureLimit`] when the `abort_after` policy trips,
    /// on a write or on a flush.
    #[instrument(name = "dispatcher_run", skip(self, input))]
    pub async fn run(&mut self, input: Receiver<String>) -> Result<DispatchStats, DispatcherError> {
        info!(
            sinks = self.sinks.len(),
            subscriptions = self.subscriptions.active_count(),
            "Dispatcher started"
        );

        loop {
            self.state = DispatcherState::Idle;

            let next = Self::next_event(&self.events_rx, &input);
            match tokio::time::timeout(self.idle_interval, next).await {
                Err(_) => {
                    self.handle_tick().await?;
                    continue;
                }
                Ok(LoopEvent::Bus(event)) => self.handle_bus_event(event).await?,
                Ok(LoopEvent::Publish(line)) => self.handle_publish_request(&line).await,
                Ok(LoopEvent::InputClosed) => break,
            }

            if self.last_flush.elapsed() >= self.flush_interval {
                debug!("Flush interval elapsed");
                self.flush_sinks().await?;
            }
        }

        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_bus_event(event).await?;
        }

        self.state = DispatcherState::Shutdown;
        self.flush_sinks().await?;

        info!(stats = %self.stats, "Dispatcher input closed, shutting down");
        Ok(self.stats)
    }

    /// Close every sink
    ///
    /// Must be called on every exit path: buffering sinks send what they hold here.
    pub async fn close(&mut self) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.close().await {
                self.stats.flush_failures += 1;
                error!(sink = %sink.name(), error = %e, "Sink close failed, buffered records lost");
            }
        }
        info!("Dispatcher shutdown complete");
    }

    async fn next_event(events: &Receiver<BusEvent>, input: &Receiver<String>) -> LoopEvent {
        tokio::select! {
            Ok(event) = events.recv() => LoopEvent::Bus(event),
            line = input.recv() => match line {
                Ok(line) => LoopEvent::Publish(line),
                Err(_) => LoopEvent::InputClosed,
            },
        }
    }

    async fn handle_bus_event(&mut self, event: BusEvent) -> Result<(), DispatcherError> {
        self.state = DispatcherState::HandlingBusMessage;
        self.stats.received += 1;

        let BusEvent {
            subscription,
            message,
        } = event;

        let pattern = self
            .subscriptions
            .active(subscription)
            .map(|sub| sub.pattern.clone());
        let label = pattern.as_ref().map_or(UNKNOWN_PATTERN, |p| p.as_str());

        observability::record_message_received(label, message.duplicate);
        self.aggregator.on_received(label, message.duplicate);

        if message.duplicate {
            self.stats.duplicates += 1;
            info!(pattern = %label, topic = %message.topic, "Duplicate delivery skipped");
            return Ok(());
        }

        let Some(pattern) = pattern else {
            self.stats.orphaned += 1;
            warn!(subscription = %subscription, topic = %message.topic, "Delivery for inactive subscription skipped");
            return Ok(());
        };

        let Some(bindings) = pattern.matches(&message.topic) else {
            self.stats.unmatched += 1;
            self.aggregator.on_unmatched();
            observability::record_message_unmatched(pattern.as_str());
            warn!(pattern = %pattern, topic = %message.topic, "Topic does not match pattern");
            return Ok(());
        };

        let kind = payload::classify(&message.payload);
        observability::record_payload_classified(kind.as_str());
        self.aggregator.on_payload(kind.as_str());
        debug!(
            topic = %message.topic,
            kind = %kind,
            payload = %String::from_utf8_lossy(&message.payload),
            "Payload classified"
        );

        let normalized = match payload::normalize(&message.payload, kind) {
            Ok(normalized) => normalized,
            Err(e) => {
                self.stats.malformed += 1;
                self.aggregator.on_malformed();
                observability::record_payload_malformed(pattern.as_str());
                warn!(pattern = %pattern, topic = %message.topic, error = %e, "Payload skipped");
                return Ok(());
            }
        };

        let record = self
            .builder
            .build(&pattern, &message.topic, &bindings, &normalized, Utc::now());

        if !record.has_fields() {
            self.stats.empty += 1;
            debug!(topic = %message.topic, "Record has no fields, skipped");
            return Ok(());
        }

        self.stats.records += 1;
        self.aggregator.on_record(&record);

        for (idx, sink) in self.sinks.iter_mut().enumerate() {
            let started = Instant::now();
            let result = sink.write(&record).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            observability::record_record_written(sink.name(), result.is_ok());
            observability::record_sink_write_latency_ms(sink.name(), latency_ms);
            self.aggregator.on_write(result.is_ok(), latency_ms);

            match result {
                Ok(()) => {
                    self.stats.writes += 1;
                    self.streaks.succeeded(idx);
                    debug!(sink = %sink.name(), series = %record.series, "Record written");
                }
                Err(e) => {
                    self.stats.write_failures += 1;
                    error!(sink = %sink.name(), series = %record.series, error = %e, "Record write failed");
                    self.streaks.failed(idx, sink.name())?;
                }
            }
        }

        Ok(())
    }

    async fn handle_publish_request(&mut self, line: &str) {
        self.state = DispatcherState::HandlingPublishRequest;

        let Some(request) = parse_publish_request(
            line,
            &self.context.default_publish_topic,
            &self.context.client_id,
        ) else {
            self.stats.publish_skipped += 1;
            debug!("Blank input line skipped");
            return;
        };

        let result = self
            .bus
            .publish(
                &request.topic,
                self.context.publish_qos,
                self.context.publish_retain,
                Bytes::from(request.body),
            )
            .await;

        observability::record_publish(result.is_ok());
        self.aggregator.on_publish(result.is_ok());

        match result {
            Ok(()) => {
                self.stats.published += 1;
                info!(topic = %request.topic, "Published");
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!(topic = %request.topic, error = %e, "Publish failed");
            }
        }
    }

    async fn handle_tick(&mut self) -> Result<(), DispatcherError> {
        self.state = DispatcherState::HandlingTick;
        self.stats.ticks += 1;
        self.flush_sinks().await
    }

    async fn flush_sinks(&mut self) -> Result<(), DispatcherError> {
        self.last_flush = Instant::now();
        self.stats.flushes += 1;

        for (idx, sink) in self.sinks.iter_mut().enumerate() {
            let result: Result<(), ContractError> = sink.flush().await;
            observability::record_sink_flush(sink.name(), result.is_ok());

            match result {
                Ok(()) => self.streaks.succeeded(idx),
                Err(e) => {
                    self.stats.flush_failures += 1;
                    error!(sink = %sink.name(), error = %e, "Sink flush failed");
                    self.streaks.failed(idx, sink.name())?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use bus::{MockBus, MockConfig};
    use contracts::{ContractError, FieldValue, Record};

    /// Sink that records every write and can be told to fail
    #[derive(Clone, Default)]
    struct RecordingSink {
        records: Arc<Mutex<Vec<Record>>>,
        fail: bool,
        fail_flush: bool,
        flushes: Arc<Mutex<u32>>,
    }

    impl DataSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn write(&mut self, record: &Record) -> Result<(), ContractError> {
            if self.fail {
                return Err(ContractError::sink_write("recording", "injected"));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            *self.flushes.lock().unwrap() += 1;
            if self.fail_flush {
                return Err(ContractError::sink_write("recording", "flush injected"));
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn context() -> BridgeContext {
        BridgeContext::new("plumber-7", &PublishConfig::default())
    }

    async fn dispatcher(
        sink: RecordingSink,
        config: DispatchConfig,
    ) -> (Dispatcher<MockBus, RecordingSink>, MockBus) {
        let bus = MockBus::new("plumber-7");
        bus.connect().await.unwrap();
        let handle = bus.clone();
        (Dispatcher::new(bus, vec![sink], context(), &config), handle)
    }

    /// Run the loop while `deliveries` are pushed from a blocking thread, then close input
    async fn run_with(
        mut dispatcher: Dispatcher<MockBus, RecordingSink>,
        bus: MockBus,
        deliveries: Vec<(&'static str, &'static str, bool)>,
        lines: Vec<&'static str>,
    ) -> (
        Dispatcher<MockBus, RecordingSink>,
        Result<DispatchStats, DispatcherError>,
    ) {
        let (input_tx, input_rx) = async_channel::bounded(1);
        let run = tokio::spawn(async move {
            let result = dispatcher.run(input_rx).await;
            (dispatcher, result)
        });

        tokio::task::spawn_blocking(move || {
            for (topic, payload, duplicate) in deliveries {
                bus.deliver(topic, payload.as_bytes().to_vec(), duplicate);
            }
        })
        .await
        .unwrap();

        for line in lines {
            input_tx.send(line.to_string()).await.unwrap();
        }
        drop(input_tx);

        run.await.unwrap()
    }

    #[test]
    fn test_context_substitutes_client() {
        let ctx = context();
        assert_eq!(ctx.default_publish_topic, "broadcast/client/plumber-7");
        assert_eq!(ctx.publish_qos, QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_messages_become_records() {
        let sink = RecordingSink::default();
        let records = sink.records.clone();
        let (mut d, bus) = dispatcher(sink, DispatchConfig::default()).await;
        d.subscribe("sensors/+/temp", QoS::AtMostOnce).await.unwrap();

        let (d, result) = run_with(
            d,
            bus,
            vec![
                ("sensors/kitchen/temp", "21.5", false),
                ("sensors/hall/temp", r#"{"_unit": "C", "v": 19}"#, false),
            ],
            vec![],
        )
        .await;

        let stats = result.unwrap();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.records, 2);
        assert_eq!(d.state(), DispatcherState::Shutdown);

        let records = records.lock().unwrap();
        assert_eq!(records[0].fields["value"], FieldValue::Float(21.5));
        assert_eq!(records[0].tags["binding_0"], "kitchen");
        assert_eq!(records[1].tags["unit"], "C");
        assert_eq!(records[1].tags["bindings"], "hall");
    }

    #[tokio::test]
    async fn test_duplicates_counted_never_written() {
        let sink = RecordingSink::default();
        let records = sink.records.clone();
        let (mut d, bus) = dispatcher(sink, DispatchConfig::default()).await;
        d.subscribe("a/#", QoS::AtLeastOnce).await.unwrap();

        let (d, result) = run_with(
            d,
            bus,
            vec![("a/b", "1", false), ("a/b", "1", true), ("a/b", "1", true)],
            vec![],
        )
        .await;

        let stats = result.unwrap();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.duplicates, 2);
        assert_eq!(stats.writes, 1);
        assert_eq!(records.lock().unwrap().len(), 1);
        assert_eq!(d.summary().total_duplicates, 2);
    }

    #[tokio::test]
    async fn test_malformed_object_skipped() {
        let sink = RecordingSink::default();
        let records = sink.records.clone();
        let (mut d, bus) = dispatcher(sink, DispatchConfig::default()).await;
        d.subscribe("a/#", QoS::AtMostOnce).await.unwrap();

        let (_, result) = run_with(
            d,
            bus,
            vec![("a/x", "{oops}", false), ("a/y", "{}", false)],
            vec![],
        )
        .await;

        let stats = result.unwrap();
        assert_eq!(stats.malformed, 1);
        // `{}` parses but has no fields
        assert_eq!(stats.empty, 1);
        assert!(records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_requests() {
        let (d, bus) = dispatcher(RecordingSink::default(), DispatchConfig::default()).await;
        let handle = bus.clone();

        let (_, result) = run_with(d, bus, vec![], vec!["hi", "   ", "rooms/{client} hello there"]).await;

        let stats = result.unwrap();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.publish_skipped, 1);

        let published = handle.published();
        assert_eq!(published[0].topic, "broadcast/client/plumber-7");
        assert_eq!(published[0].payload, Bytes::from_static(b"hi"));
        assert_eq!(published[1].topic, "rooms/plumber-7");
        assert_eq!(published[1].payload, Bytes::from_static(b"hello there"));
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_fatal() {
        let bus = MockBus::with_config(
            "plumber-7",
            MockConfig {
                fail_publish: vec!["x".into()],
                ..Default::default()
            },
        );
        bus.connect().await.unwrap();
        let d = Dispatcher::new(
            bus.clone(),
            vec![RecordingSink::default()],
            context(),
            &DispatchConfig::default(),
        );

        let (_, result) = run_with(d, bus, vec![], vec!["x 1", "y 2"]).await;
        let stats = result.unwrap();
        assert_eq!(stats.publish_failures, 1);
        assert_eq!(stats.published, 1);
    }

    #[tokio::test]
    async fn test_abort_after_consecutive_failures() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let config = DispatchConfig {
            sink_failure_policy: SinkFailurePolicy::AbortAfter {
                consecutive_failures: 2,
            },
            ..Default::default()
        };
        let (mut d, bus) = dispatcher(sink, config).await;
        d.subscribe("a/#", QoS::AtMostOnce).await.unwrap();

        let (input_tx, input_rx) = async_channel::bounded::<String>(1);
        let run = tokio::spawn(async move { d.run(input_rx).await });

        // Delivery blocks once the loop has stopped, so this thread is not joined
        std::thread::spawn(move || {
            for _ in 0..3 {
                bus.deliver("a/b", "1", false);
            }
        });

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            DispatcherError::SinkFailureLimit { failures: 2, .. }
        ));
        drop(input_tx);
    }

    #[tokio::test]
    async fn test_continue_policy_keeps_running() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let (mut d, bus) = dispatcher(sink, DispatchConfig::default()).await;
        d.subscribe("a/#", QoS::AtMostOnce).await.unwrap();

        let (_, result) = run_with(
            d,
            bus,
            vec![("a/1", "1", false), ("a/2", "2", false), ("a/3", "3", false)],
            vec![],
        )
        .await;

        assert_eq!(result.unwrap().write_failures, 3);
    }

    #[tokio::test]
    async fn test_subscribe_errors_leave_no_subscription() {
        let bus = MockBus::with_config(
            "plumber-7",
            MockConfig {
                fail_subscribe: vec!["bad/#".into()],
                ..Default::default()
            },
        );
        bus.connect().await.unwrap();
        let mut d = Dispatcher::new(
            bus,
            vec![RecordingSink::default()],
            context(),
            &DispatchConfig::default(),
        );

        assert!(matches!(
            d.subscribe("a/#/b", QoS::AtMostOnce).await,
            Err(DispatcherError::Pattern(_))
        ));
        assert!(matches!(
            d.subscribe("bad/#", QoS::AtMostOnce).await,
            Err(DispatcherError::Bus(_))
        ));

        let ids = d
            .subscribe_all(&["ok/+".to_string(), "bad/#".to_string()], QoS::AtMostOnce)
            .await;
        assert_eq!(ids.len(), 1);
        assert_eq!(d.subscriptions().active_count(), 1);
        assert_eq!(d.bus().subscriptions(), vec!["ok/+"]);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let (mut d, bus) = dispatcher(RecordingSink::default(), DispatchConfig::default()).await;
        let id = d.subscribe("a/#", QoS::AtMostOnce).await.unwrap();

        d.unsubscribe(id).await.unwrap();
        assert!(bus.subscriptions().is_empty());
        assert_eq!(d.subscriptions().active_count(), 0);
        assert!(matches!(
            d.unsubscribe(id).await,
            Err(DispatcherError::UnknownSubscription(_))
        ));
    }

    #[tokio::test]
    async fn test_late_delivery_after_unsubscribe_is_skipped() {
        let sink = RecordingSink::default();
        let records = sink.records.clone();
        let (mut d, _bus) = dispatcher(sink, DispatchConfig::default()).await;
        let id = d.subscribe("a/#", QoS::AtMostOnce).await.unwrap();
        d.unsubscribe(id).await.unwrap();

        let event = BusEvent {
            subscription: id,
            message: BusMessage::new("a/b", "1", false),
        };
        d.handle_bus_event(event).await.unwrap();

        assert_eq!(d.stats().received, 1);
        assert_eq!(d.stats().orphaned, 1);
        assert!(records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idle_tick_flushes_sinks() {
        let sink = RecordingSink::default();
        let flushes = sink.flushes.clone();
        let config = DispatchConfig {
            idle_interval_ms: 5,
            ..Default::default()
        };
        let (mut d, _bus) = dispatcher(sink, config).await;

        let (input_tx, input_rx) = async_channel::bounded::<String>(1);
        let run = tokio::spawn(async move { d.run(input_rx).await });

        tokio::time::sleep(Duration::from_millis(60)).await;
        drop(input_tx);

        let stats = run.await.unwrap().unwrap();
        assert!(stats.ticks >= 1);
        // Ticks flush, and so does shutdown
        assert!(*flushes.lock().unwrap() as u64 >= stats.ticks + 1);
    }

    #[tokio::test]
    async fn test_flush_failure_trips_abort_policy() {
        let sink = RecordingSink {
            fail_flush: true,
            ..Default::default()
        };
        let config = DispatchConfig {
            sink_failure_policy: SinkFailurePolicy::AbortAfter {
                consecutive_failures: 1,
            },
            ..Default::default()
        };
        let (mut d, bus) = dispatcher(sink, config).await;
        d.subscribe("a/#", QoS::AtMostOnce).await.unwrap();

        // Writes are accepted; the records only fail on the way out
        let (d, result) = run_with(d, bus, vec![("a/b", "1", false)], vec![]).await;

        assert!(matches!(
            result,
            Err(DispatcherError::SinkFailureLimit { failures: 1, .. })
        ));
        assert_eq!(d.stats().writes, 1);
        assert_eq!(d.stats().flush_failures, 1);
    }

    #[tokio::test]
    async fn test_flush_failures_counted_under_continue() {
        let sink = RecordingSink {
            fail_flush: true,
            ..Default::default()
        };
        let (d, bus) = dispatcher(sink, DispatchConfig::default()).await;

        let (_, result) = run_with(d, bus, vec![], vec![]).await;

        assert_eq!(result.unwrap().flush_failures, 1);
    }

    #[tokio::test]
    async fn test_failure_streak_is_per_sink() {
        let healthy = RecordingSink::default();
        let failing = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let config = DispatchConfig {
            sink_failure_policy: SinkFailurePolicy::AbortAfter {
                consecutive_failures: 2,
            },
            ..Default::default()
        };
        let bus = MockBus::new("plumber-7");
        bus.connect().await.unwrap();
        let mut d = Dispatcher::new(bus.clone(), vec![healthy, failing], context(), &config);
        d.subscribe("a/#", QoS::AtMostOnce).await.unwrap();

        let (input_tx, input_rx) = async_channel::bounded::<String>(1);
        let run = tokio::spawn(async move { d.run(input_rx).await });

        // Delivery blocks once the loop has stopped, so this thread is not joined
        std::thread::spawn(move || {
            for _ in 0..3 {
                bus.deliver("a/b", "1", false);
            }
        });

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            DispatcherError::SinkFailureLimit { failures: 2, .. }
        ));
        drop(input_tx);
    }

    #[tokio::test]
    async fn test_steady_traffic_still_flushes() {
        let sink = RecordingSink::default();
        let flushes = sink.flushes.clone();
        let config = DispatchConfig {
            idle_interval_ms: 2_000,
            flush_interval_ms: 20,
            ..Default::default()
        };
        let (mut d, bus) = dispatcher(sink, config).await;
        d.subscribe("a/#", QoS::AtMostOnce).await.unwrap();

        let (input_tx, input_rx) = async_channel::bounded::<String>(1);
        let run = tokio::spawn(async move { d.run(input_rx).await });

        // One delivery every 10ms never leaves the loop idle long enough to tick
        tokio::task::spawn_blocking(move || {
            for i in 0..12 {
                bus.deliver("a/b", i.to_string(), false);
                std::thread::sleep(Duration::from_millis(10));
            }
        })
        .await
        .unwrap();

        let flushed_while_busy = *flushes.lock().unwrap();
        drop(input_tx);
        let stats = run.await.unwrap().unwrap();

        assert_eq!(stats.records, 12);
        assert!(flushed_while_busy >= 2, "flushed {flushed_while_busy} times");
    }
}
