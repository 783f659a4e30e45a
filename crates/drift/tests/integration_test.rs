//! Integration tests for drift

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use drift::Config;
use drift::engine::{ConfigStore, MemoryEngine, ResolutionEngine};
use drift::mapping::{FileSource, MemorySource};
use drift::queue::{Broker, MemoryBroker, TaskEnvelope};
use drift::service::Service;

const ENTITIES: &str = r#"{"id":"P1","schema":"Person","properties":{"name":["Jane Roe"],"country":["us","fr"]}}
{"id":"D1","schema":"Directorship","properties":{"director":["P1"],"organization":["O1"],"role":["CEO"]}}
{"id":"O1","schema":"Company","properties":{"name":["Acme Ltd"],"jurisdiction":["gb"]}}
{"id":"S1","schema":"Succession","properties":{"predecessor":["O1"]}}
"#;

fn config(extra: &str) -> Config {
    let yaml = format!(
        "queue:\n  primary: work\n  dead_letter: dead\nmetrics:\n  enabled: false\nredo:\n  enabled: false\n{extra}"
    );
    Config::parse(&yaml).unwrap()
}

fn service(config: Config, broker: &MemoryBroker, engine: &MemoryEngine) -> Service {
    Service::new(
        config,
        Arc::new(broker.clone()),
        Arc::new(engine.clone()),
        Arc::new(engine.clone()),
    )
    .unwrap()
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    while !done() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

mod pipeline_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_file_to_engine() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("entities.ndjson");
        std::fs::write(&input, ENTITIES).unwrap();

        let broker = MemoryBroker::new();
        let engine = MemoryEngine::new();
        let service = service(config(""), &broker, &engine);
        service.declare_queues().await.unwrap();
        service.lifecycle().bootstrap().await.unwrap();

        let report = service
            .mapping_job()
            .run(FileSource::new(&input), "acme")
            .await
            .unwrap();
        assert_eq!(report.mapping.records, 2);
        assert_eq!(report.mapping.deferred, 1);
        assert_eq!(broker.ready("work").len(), 2);

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(service.run(shutdown.clone()));
        let watched = engine.clone();
        wait_until(move || watched.record_count() == 2).await;
        shutdown.cancel();
        let summary = running.await.unwrap().unwrap();
        assert_eq!(summary.failed, 0);

        let person: serde_json::Value =
            serde_json::from_str(&engine.record("ACME", "P1").unwrap()).unwrap();
        assert_eq!(person["RECORD_TYPE"], "PERSON");
        assert_eq!(person["CITIZENSHIP_LIST"][1]["CITIZENSHIP"], "fr");
        assert_eq!(person["RELATIONSHIP_LIST"][1]["REL_POINTER_KEY"], "O1");
        assert_eq!(person["RELATIONSHIP_LIST"][1]["REL_POINTER_ROLE"], "CEO");
        assert!(person.get("tries").is_none());
        assert!(broker.ready("dead").is_empty());
    }

    #[tokio::test]
    async fn test_registration_while_running_triggers_reinit() {
        let broker = MemoryBroker::new();
        let engine = MemoryEngine::new();
        let service = service(config(""), &broker, &engine);
        let job = service.mapping_job();

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(service.run(shutdown.clone()));
        let watched = engine.clone();
        wait_until(move || watched.reinits() == 1).await;

        // Registration moves the default while the consumer runs the old one.
        job.run(MemorySource::new(ENTITIES.lines()), "NEWSRC")
            .await
            .unwrap();
        let watched = engine.clone();
        wait_until(move || watched.record_count() == 2).await;
        shutdown.cancel();
        running.await.unwrap().unwrap();

        assert_eq!(engine.reinits(), 2);
        let default = engine.default_config_id().await.unwrap().unwrap();
        assert_eq!(engine.active_config_id().await.unwrap(), default);
        assert!(engine.record("NEWSRC", "O1").is_some());
        assert!(broker.ready("dead").is_empty());
    }

    #[tokio::test]
    async fn test_config_saved_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let broker = MemoryBroker::new();
        let engine = MemoryEngine::new();
        let extra = format!("engine:\n  config_path: {}\n", path.display());
        let service = service(config(&extra), &broker, &engine);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        service.run(shutdown).await.unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["DATA_SOURCES"][0]["DSRC_CODE"], "TEST");
    }
}

mod retry_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_dead_lettered_at_five_tries() {
        let broker = MemoryBroker::new();
        let engine = MemoryEngine::new();
        let service = service(
            config("consumer:\n  daemon_name: loader\n"),
            &broker,
            &engine,
        );
        service.declare_queues().await.unwrap();
        service.lifecycle().bootstrap().await.unwrap();
        engine.fail_next_add_records(5, "engine unavailable");

        let task = TaskEnvelope::new({
            let mut record = drift::mapping::CanonicalRecord::new("TEST", "P1");
            record.set("RECORD_TYPE", "PERSON");
            record
        });
        broker.publish("work", task.to_vec().unwrap()).await.unwrap();

        let start = tokio::time::Instant::now();
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(service.run(shutdown.clone()));
        let watched = broker.clone();
        wait_until(move || !watched.ready("dead").is_empty()).await;
        shutdown.cancel();
        running.await.unwrap().unwrap();

        // Four requeues of ten seconds each before the fifth failure.
        assert!(start.elapsed() >= Duration::from_secs(40));
        assert_eq!(engine.add_record_calls(), 5);
        assert_eq!(engine.record_count(), 0);

        let dead = TaskEnvelope::from_slice(&broker.ready("dead")[0]).unwrap();
        assert_eq!(dead.tries, Some(5));
        assert_eq!(dead.daemon_name.as_deref(), Some("loader"));
        assert!(dead.error.unwrap().contains("engine unavailable"));
        assert!(broker.ready("work").is_empty());
        assert_eq!(broker.unacked("work"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_outage_dead_letters_after_five_attempts() {
        let broker = MemoryBroker::new();
        let engine = MemoryEngine::new();
        let service = service(config(""), &broker, &engine);
        service.declare_queues().await.unwrap();
        service.lifecycle().bootstrap().await.unwrap();
        broker.fail_publishes("work", 5, "broker unreachable");

        let start = tokio::time::Instant::now();
        let report = service
            .mapping_job()
            .run(
                MemorySource::new([
                    r#"{"id":"P1","schema":"Person","properties":{"name":["Jane Roe"]}}"#,
                ]),
                "TEST",
            )
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(75));
        assert_eq!(report.published, 0);
        assert_eq!(report.dead_lettered, 1);
        let dead = TaskEnvelope::from_slice(&broker.ready("dead")[0]).unwrap();
        assert!(dead.error.unwrap().contains("broker unreachable"));
    }
}

mod redo_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_redo_pool_drains_backlog() {
        let broker = MemoryBroker::new();
        let engine = MemoryEngine::new();
        let config = Config::parse(
            "queue:\n  primary: work\n  dead_letter: dead\nmetrics:\n  enabled: false\nredo:\n  workers: 3\n",
        )
        .unwrap();
        let service = service(config, &broker, &engine);
        for i in 0..10 {
            engine.push_redo(format!("redo-{i}"));
        }

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(service.run(shutdown.clone()));
        let watched = engine.clone();
        wait_until(move || watched.redo_pending() == 0).await;
        shutdown.cancel();

        let summary = running.await.unwrap().unwrap();
        assert_eq!(summary.completed, 4);
    }
}

mod cli_tests {
    use clap::Parser;
    use drift::{CliArgs, execute};

    #[tokio::test]
    async fn test_map_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.ndjson");
        let output = dir.path().join("out.ndjson");
        std::fs::write(&input, super::ENTITIES).unwrap();

        let args = CliArgs::parse_from([
            "drift",
            "map",
            "--data-source",
            "acme",
            "--input",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
        ]);
        execute(args).await.unwrap();

        let written = std::fs::read_to_string(&output).unwrap();
        let records: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["DATA_SOURCE"], "ACME");
        assert_eq!(records[1]["RECORD_ID"], "O1");
    }

    #[tokio::test]
    async fn test_map_requires_data_source() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.ndjson");
        std::fs::write(&input, super::ENTITIES).unwrap();

        let args = CliArgs::parse_from(["drift", "map", "--input", input.to_str().unwrap()]);
        assert!(execute(args).await.is_err());
    }

    #[tokio::test]
    async fn test_check_config() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.yaml");
        let bad = dir.path().join("bad.yaml");
        std::fs::write(&good, "data_source: acme\n").unwrap();
        std::fs::write(&bad, "queue:\n  max_priority: 10\n").unwrap();

        let args = CliArgs::parse_from(["drift", "check", "--config", good.to_str().unwrap()]);
        execute(args).await.unwrap();
        let args = CliArgs::parse_from(["drift", "check", "--config", bad.to_str().unwrap()]);
        assert!(execute(args).await.is_err());
    }
}
