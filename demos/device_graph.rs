//! Device topology demo
//!
//! `bolt://GRAPH_HOST:GRAPH_PORT`에 연결해 토폴로지를 쓰고 다시 읽는다.
//! 서버에 연결할 수 없으면 스크립트 백엔드로 같은 흐름을 실행한다.
//!
//! ```text
//! GRAPH_HOST=localhost GRAPH_PORT=7687 GRAPH_USER=neo4j GRAPH_PASSWORD=password \
//!     RUST_LOG=graphtx=debug cargo run --example device_graph
//! ```

use std::env;
use std::time::Duration;

use graphtx::backend::{BoltConnector, ScriptedBackend, ScriptedConnector, ScriptedResponse};
use graphtx::driver::Node;
use graphtx::{
    sample, Counters, Dialect, DriverConfig, DriverHandle, DriverParams, Record, TransactionExecutor,
    Value,
};

const DEVICES: usize = 3;
const INTERFACES: usize = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("graphtx=info".parse()?),
        )
        .init();

    let params = DriverParams::new(
        env_or("GRAPH_HOST", "localhost"),
        env_or("GRAPH_PORT", "7687"),
        env_or("GRAPH_USER", "neo4j"),
        env_or("GRAPH_PASSWORD", "password"),
    );
    let config = DriverConfig::builder(Dialect::Neo4j, &params)?
        .with_connection_timeout(Duration::from_secs(3))
        .with_user_agent("device-graph-demo/1.0")
        .build();

    let handle = match DriverHandle::connect(config.clone(), &BoltConnector).await {
        Ok(handle) => handle,
        Err(err) => {
            tracing::warn!(uri = %config.uri(), %err, "server unreachable, using scripted backend");
            DriverHandle::connect(config, &ScriptedConnector::new(scripted())).await?
        }
    };
    let executor = TransactionExecutor::new(handle);
    executor.verify_connectivity().await?;

    let written = executor
        .write_commit_tx(&sample::device_graph(DEVICES, INTERFACES))
        .await;
    if let Some(err) = &written.error {
        tracing::error!(%err, retryable = written.retryable, "create devices failed");
    } else if let Some(summary) = written.write_summary() {
        tracing::info!(
            nodes = summary.nodes_created,
            relationships = summary.relationships_created,
            "devices created"
        );
    }

    let read = executor.read_tx(&sample::all_devices()).await;
    if let Some(stats) = read.stats() {
        tracing::info!(
            devices = read.records().len(),
            response_secs = stats.response_time_seconds,
            "devices read"
        );
    }

    executor.close().await?;
    tracing::info!("done");
    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn scripted() -> ScriptedBackend {
    let backend = ScriptedBackend::new();
    backend.push(ScriptedResponse::new().with_counters(Counters {
        nodes_created: (1 + DEVICES + DEVICES * INTERFACES * 2) as i64,
        relationships_created: (DEVICES * INTERFACES * 3) as i64,
        properties_set: (1 + DEVICES * 2 + DEVICES * INTERFACES * 2) as i64,
        labels_added: (1 + DEVICES + DEVICES * INTERFACES * 2) as i64,
        ..Default::default()
    }));
    backend.push(
        ScriptedResponse::new()
            .with_records((0..DEVICES).map(device_record).collect())
            .with_timings(Duration::from_millis(12), Duration::from_millis(15)),
    );
    backend
}

fn device_record(i: usize) -> Record {
    let mut properties = std::collections::HashMap::new();
    properties.insert("name".to_string(), Value::from(format!("device{i}")));
    let node = Node::new(i as i64, vec!["Device".to_string()], properties);
    Record::from_pairs([("n", Value::Node(node))])
}
