//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置到运行时的合约测试
//! - 模拟 e2e 测试（MockBus，无需 broker）

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{QoS, SinkFailurePolicy, SinkType};

    #[test]
    fn test_full_config_loads() {
        let blueprint = ConfigLoader::load_from_str(
            r#"
[broker]
uri = "tcp://mashtun:1883"
client_id = "plumber-1"

[subscriptions]
watch = "sensors/+/temp, logs/#"
prefix = "home"
qos = 1
sys = true

[publish]
default_topic = "broadcast/client/{client}"

[dispatch]
idle_interval_ms = 250
sink_failure_policy = { mode = "abort_after", consecutive_failures = 3 }

[[sinks]]
name = "log"
sink_type = "log"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        assert_eq!(
            blueprint.subscriptions.effective_patterns(),
            vec!["$SYS/#", "home/sensors/+/temp", "home/logs/#"]
        );
        assert_eq!(blueprint.subscriptions.qos, QoS::AtLeastOnce);
        assert_eq!(
            blueprint.dispatch.sink_failure_policy,
            SinkFailurePolicy::AbortAfter {
                consecutive_failures: 3
            }
        );
        assert_eq!(blueprint.sinks[0].sink_type, SinkType::Log);
    }

    #[test]
    fn test_every_effective_pattern_compiles() {
        let blueprint = ConfigLoader::load_from_str(
            r#"{ "subscriptions": { "watch": ["a/+/c", "b/#"], "sys": true } }"#,
            ConfigFormat::Json,
        )
        .unwrap();

        for pattern in blueprint.subscriptions.effective_patterns() {
            assert!(topic::compile(&pattern).is_ok(), "{pattern}");
        }
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::{Arc, Mutex};

    use bus::{BusClient, MockBus};
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        BridgeBlueprint, ContractError, DataSink, FieldValue, Precision, Record,
    };
    use dispatcher::{
        create_sinks, spawn_line_reader, BridgeContext, ConfiguredSink, Dispatcher,
        DispatcherError,
    };
    use tokio::io::{AsyncWriteExt, BufReader};

    /// Sink keeping every record in memory
    #[derive(Clone, Default)]
    struct RecordingSink {
        records: Arc<Mutex<Vec<Record>>>,
        fail: bool,
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
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    async fn connected_bus() -> MockBus {
        let bus = MockBus::new("plumber-7");
        bus.connect().await.unwrap();
        bus
    }

    async fn subscribed<S: DataSink>(
        bus: &MockBus,
        sinks: Vec<S>,
        blueprint: &BridgeBlueprint,
    ) -> Dispatcher<MockBus, S> {
        let context = BridgeContext::new("plumber-7", &blueprint.publish);
        let mut dispatcher = Dispatcher::new(bus.clone(), sinks, context, &blueprint.dispatch);
        let patterns = blueprint.subscriptions.effective_patterns();
        let ids = dispatcher
            .subscribe_all(&patterns, blueprint.subscriptions.qos)
            .await;
        assert_eq!(ids.len(), patterns.len());
        dispatcher
    }

    /// End-to-end test: config -> file sink, bus deliveries and stdin-style input
    ///
    /// 验证完整的数据流：
    /// 1. 配置加载并创建 file sink
    /// 2. MockBus 投递消息，Dispatcher 构造 Record 写入文件
    /// 3. 输入行经 line reader 发布回总线
    #[tokio::test]
    async fn test_e2e_file_sink_and_publish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let config = format!(
            r#"
[subscriptions]
watch = ["sensors/+/temp", "logs/#"]

[[sinks]]
name = "file"
sink_type = "file"
params = {{ path = "{}" }}
"#,
            path.display()
        );
        let blueprint = ConfigLoader::load_from_str(&config, ConfigFormat::Toml).unwrap();

        let bus = connected_bus().await;
        let sinks = create_sinks(&blueprint.sinks).await.unwrap();
        let mut dispatcher: Dispatcher<MockBus, ConfiguredSink> =
            subscribed(&bus, sinks, &blueprint).await;

        let (mut writer, reader) = tokio::io::duplex(256);
        let (input, reader_task) = spawn_line_reader(BufReader::new(reader));

        let run = tokio::spawn(async move {
            let result = dispatcher.run(input).await;
            dispatcher.close().await;
            result
        });

        let deliveries = bus.clone();
        tokio::task::spawn_blocking(move || {
            deliveries.deliver("sensors/kitchen/temp", "21.5", false);
            deliveries.deliver(
                "logs/app/web",
                r#"{"_level": "warn", "msg": "disk", "code": 7}"#,
                false,
            );
            deliveries.deliver("sensors/kitchen/temp", "21.5", true);
        })
        .await
        .unwrap();

        writer
            .write_all(b"hello\n\n   \nrooms/{client} hi there\n")
            .await
            .unwrap();
        drop(writer);

        let stats = run.await.unwrap().unwrap();
        reader_task.await.unwrap();

        assert_eq!(stats.received, 3);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.published, 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0]["series"], "sensors/+/temp");
        assert_eq!(lines[0]["tags"]["binding_0"], "kitchen");
        assert_eq!(lines[0]["tags"]["client"], "plumber-7");
        assert_eq!(lines[0]["fields"]["value"], 21.5);
        assert_eq!(lines[0]["precision"], "s");

        assert_eq!(lines[1]["series"], "logs/#");
        assert_eq!(lines[1]["tags"]["level"], "warn");
        assert_eq!(lines[1]["tags"]["bindings"], "app/web");
        assert_eq!(lines[1]["fields"]["msg"], "disk");
        assert_eq!(lines[1]["fields"]["code"], 7);

        let published = bus.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "broadcast/client/plumber-7");
        assert_eq!(published[0].payload, bytes::Bytes::from_static(b"hello"));
        assert_eq!(published[1].topic, "rooms/plumber-7");
        assert_eq!(published[1].payload, bytes::Bytes::from_static(b"hi there"));
    }

    /// `$SYS` topics only reach the `$SYS/#` subscription, never a root `#`
    #[tokio::test]
    async fn test_sys_topics_need_sys_subscription() {
        let mut blueprint = BridgeBlueprint::default();
        blueprint.subscriptions.watch = vec!["#".to_string()];
        blueprint.subscriptions.sys = true;

        let sink = RecordingSink::default();
        let records = sink.records.clone();
        let bus = connected_bus().await;
        let mut dispatcher = subscribed(&bus, vec![sink], &blueprint).await;

        let (input_tx, input_rx) = async_channel::bounded::<String>(1);
        let run = tokio::spawn(async move { dispatcher.run(input_rx).await });

        let deliveries = bus.clone();
        tokio::task::spawn_blocking(move || {
            assert_eq!(
                deliveries.deliver("$SYS/broker/uptime", "2024-01-02 03:04:05-0500", false),
                1
            );
            assert_eq!(deliveries.deliver("house/temp", "20", false), 1);
        })
        .await
        .unwrap();
        drop(input_tx);

        run.await.unwrap().unwrap();

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].series, "$SYS/#");
        assert_eq!(
            records[0].fields["value"],
            FieldValue::Text("2024-01-02T03:04:05-05:00".to_string())
        );
        assert_eq!(records[1].series, "#");
        assert_eq!(records[1].fields["value"], FieldValue::Integer(20));
    }

    /// Object payload timestamps override receipt time and set the precision
    #[tokio::test]
    async fn test_object_timestamp_sets_record_time() {
        let mut blueprint = BridgeBlueprint::default();
        blueprint.subscriptions.watch = vec!["meters/+".to_string()];

        let sink = RecordingSink::default();
        let records = sink.records.clone();
        let bus = connected_bus().await;
        let mut dispatcher = subscribed(&bus, vec![sink], &blueprint).await;

        let (input_tx, input_rx) = async_channel::bounded::<String>(1);
        let run = tokio::spawn(async move { dispatcher.run(input_rx).await });

        let deliveries = bus.clone();
        tokio::task::spawn_blocking(move || {
            deliveries.deliver(
                "meters/m1",
                r#"{"timestamp": "2024-01-02T03:04:05.250Z", "kwh": 1.5}"#,
                false,
            );
        })
        .await
        .unwrap();
        drop(input_tx);

        run.await.unwrap().unwrap();

        let records = records.lock().unwrap();
        let record = &records[0];
        assert_eq!(record.precision, Precision::Nanosecond);
        assert_eq!(record.timestamp.timestamp_subsec_millis(), 250);
        assert!(!record.fields.contains_key("timestamp"));
        assert_eq!(record.fields["kwh"], FieldValue::Float(1.5));
    }

    /// `abort_after` stops the loop once the failure streak is reached
    #[tokio::test]
    async fn test_sink_failure_policy_aborts() {
        let blueprint = ConfigLoader::load_from_str(
            r#"
[subscriptions]
watch = ["a/#"]

[dispatch]
sink_failure_policy = { mode = "abort_after", consecutive_failures = 2 }
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let bus = connected_bus().await;
        let mut dispatcher = subscribed(&bus, vec![sink], &blueprint).await;

        let (_input_tx, input_rx) = async_channel::bounded::<String>(1);
        let run = tokio::spawn(async move { dispatcher.run(input_rx).await });

        // The last delivery is released when the dispatcher is dropped
        let deliveries = bus.clone();
        std::thread::spawn(move || {
            for _ in 0..3 {
                deliveries.deliver("a/b", "1", false);
            }
        });

        let err = run.await.unwrap().unwrap_err();
        match err {
            DispatcherError::SinkFailureLimit {
                sink_name,
                failures,
            } => {
                assert_eq!(sink_name, "recording");
                assert_eq!(failures, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// A pattern that fails to compile only loses its own subscription
    #[tokio::test]
    async fn test_invalid_pattern_does_not_block_others() {
        let blueprint = ConfigLoader::load_from_str(
            r#"{ "subscriptions": { "watch": ["ok/#", "a/#/b"] } }"#,
            ConfigFormat::Json,
        )
        .unwrap();

        let bus = connected_bus().await;
        let context = BridgeContext::new("plumber-7", &blueprint.publish);
        let mut dispatcher = Dispatcher::new(
            bus.clone(),
            vec![RecordingSink::default()],
            context,
            &blueprint.dispatch,
        );
        let ids = dispatcher
            .subscribe_all(
                &blueprint.subscriptions.effective_patterns(),
                blueprint.subscriptions.qos,
            )
            .await;

        assert_eq!(ids.len(), 1);
        assert_eq!(bus.subscriptions(), vec!["ok/#"]);
    }

    /// Batched records that never reach the server count as sink failures
    #[tokio::test]
    async fn test_unsent_batch_trips_abort_policy() {
        let blueprint = ConfigLoader::load_from_str(
            r#"
[subscriptions]
watch = ["a/#"]

[dispatch]
sink_failure_policy = { mode = "abort_after", consecutive_failures = 1 }

[[sinks]]
name = "influx"
sink_type = "influx"
params = { url = "http://127.0.0.1:1", db = "plumber", batch_size = "10", timeout_secs = "2" }
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        let bus = connected_bus().await;
        let sinks = create_sinks(&blueprint.sinks).await.unwrap();
        let mut dispatcher: Dispatcher<MockBus, ConfiguredSink> =
            subscribed(&bus, sinks, &blueprint).await;

        let (input_tx, input_rx) = async_channel::bounded::<String>(1);
        let run = tokio::spawn(async move { dispatcher.run(input_rx).await });

        let deliveries = bus.clone();
        tokio::task::spawn_blocking(move || {
            for i in 0..4 {
                deliveries.deliver("a/b", i.to_string(), false);
            }
        })
        .await
        .unwrap();
        drop(input_tx);

        match run.await.unwrap() {
            Err(DispatcherError::SinkFailureLimit { sink_name, failures }) => {
                assert_eq!(sink_name, "influx");
                assert_eq!(failures, 1);
            }
            other => panic!("expected the failure limit, got {other:?}"),
        }
    }

    /// Unsubscribed patterns stop producing records
    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let mut blueprint = BridgeBlueprint::default();
        blueprint.subscriptions.watch = vec!["a/#".to_string(), "b/#".to_string()];

        let sink = RecordingSink::default();
        let records = sink.records.clone();
        let bus = connected_bus().await;
        let mut dispatcher = subscribed(&bus, vec![sink], &blueprint).await;

        let first = dispatcher.subscriptions().iter().next().unwrap().id;
        dispatcher.unsubscribe(first).await.unwrap();
        assert_eq!(bus.subscriptions(), vec!["b/#"]);

        let (input_tx, input_rx) = async_channel::bounded::<String>(1);
        let run = tokio::spawn(async move { dispatcher.run(input_rx).await });

        let deliveries = bus.clone();
        tokio::task::spawn_blocking(move || {
            assert_eq!(deliveries.deliver("a/x", "1", false), 0);
            assert_eq!(deliveries.deliver("b/x", "2", false), 1);
        })
        .await
        .unwrap();
        drop(input_tx);

        let stats = run.await.unwrap().unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(records.lock().unwrap()[0].series, "b/#");
    }
}
