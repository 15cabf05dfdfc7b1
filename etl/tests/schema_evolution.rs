#![cfg(feature = "test-utils")]

use config::shared::{ColumnNaming, ConversionMode, PipelineConfig, TableSelection};
use etl::conversions::TypeMapper;
use etl::destination::ConcurrentSink;
use etl::destination::memory::{MemoryRow, MemorySink};
use etl::pipeline::Pipeline;
use etl::schema::{TableColumnType, TableName, TableSchema};
use etl::source::memory::MemorySource;
use etl::source::{ChangeKind, StreamHandle};
use etl::state::MemoryCheckpointStore;
use etl::test_utils::item::{item, number, text};
use etl::test_utils::pipeline::fast_pipeline_config;
use etl::test_utils::table::keyed_table_description;
use etl::test_utils::wait_until;
use etl::types::{AttributeValue, Item};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use telemetry::init_test_tracing;

fn columns(schema: &TableSchema) -> Vec<(String, TableColumnType)> {
    schema
        .columns()
        .iter()
        .map(|column| (column.name().to_owned(), column.column_type()))
        .collect()
}

async fn run_to_completion(config: PipelineConfig, source: MemorySource, sink: &MemorySink) {
    let mut pipeline = Pipeline::new(
        config,
        source,
        ConcurrentSink::new(vec![sink.clone()]).unwrap(),
        MemoryCheckpointStore::new(),
    );
    pipeline
        .start(&TableSelection::Names(vec!["metrics".to_owned()]))
        .await
        .unwrap();
    pipeline.wait().await.unwrap();
}

fn snapshot_only() -> PipelineConfig {
    let mut config = fast_pipeline_config();
    config.phases.changes = false;
    config
}

fn metrics() -> TableName {
    TableName::new(None, "metrics")
}

async fn metrics_source(items: Vec<Item>) -> MemorySource {
    let source = MemorySource::new();
    source
        .add_table(keyed_table_description("metrics", "id", Some("metrics-stream")))
        .await;
    source.put_items("metrics", items).await;
    source
}

#[tokio::test(flavor = "multi_thread")]
async fn type_conflicts_split_an_attribute_across_columns() {
    init_test_tracing();

    let source = metrics_source(vec![
        item(&[("id", number(1)), ("count", number(5))]),
        item(&[("id", number(2)), ("count", text("five"))]),
    ])
    .await;
    let sink = MemorySink::new();

    run_to_completion(snapshot_only(), source, &sink).await;

    let schema = sink.table_schema(&metrics()).await.unwrap();
    assert_eq!(
        columns(&schema),
        vec![
            ("id".to_owned(), TableColumnType::Numeric),
            ("count".to_owned(), TableColumnType::Numeric),
            ("count_text".to_owned(), TableColumnType::Text),
        ]
    );

    let mut rows = sink.table_rows(&metrics()).await;
    rows.sort_by(|a, b| a.get("id").cmp(&b.get("id")));
    assert_eq!(
        rows,
        vec![
            MemoryRow::from([
                ("id".to_owned(), "1".to_owned()),
                ("count".to_owned(), "5".to_owned())
            ]),
            MemoryRow::from([
                ("id".to_owned(), "2".to_owned()),
                ("count_text".to_owned(), "five".to_owned())
            ]),
        ]
    );
}

#[test]
fn mixed_numeric_and_text_values_always_yield_two_columns() {
    let mapper = TypeMapper::default();
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..200 {
        let mut schema = TableSchema::new(metrics());
        let length = rng.gen_range(2..12);
        let mut values = vec![number(rng.gen_range(0..100))];
        values.extend((1..length).map(|_| {
            if rng.gen_bool(0.5) {
                number(rng.gen_range(0..100))
            } else {
                text(format!("v{}", rng.gen_range(0..100)))
            }
        }));
        if !values.iter().any(|value| matches!(value, AttributeValue::S(_))) {
            values.push(text("forced"));
        }

        for value in values {
            mapper
                .evolve(&mut schema, &item(&[("value", value)]))
                .unwrap();
        }

        assert_eq!(
            columns(&schema),
            vec![
                ("value".to_owned(), TableColumnType::Numeric),
                ("value_text".to_owned(), TableColumnType::Text),
            ]
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn new_attributes_in_the_stream_add_columns() {
    init_test_tracing();

    let stream = StreamHandle("metrics-stream".to_owned());
    let source = metrics_source(vec![item(&[("id", number(1)), ("count", number(1))])]).await;
    source.add_partition(&stream, "shard-0", None).await;
    let sink = MemorySink::new();

    let mut pipeline = Pipeline::new(
        fast_pipeline_config(),
        source.clone(),
        ConcurrentSink::new(vec![sink.clone(), sink.clone()]).unwrap(),
        MemoryCheckpointStore::new(),
    );
    pipeline
        .start(&TableSelection::Names(vec!["metrics".to_owned()]))
        .await
        .unwrap();

    source
        .push_record(
            &stream,
            "shard-0",
            ChangeKind::Modify,
            item(&[("id", number(1))]),
            Some(item(&[
                ("id", number(1)),
                ("count", number(2)),
                ("healthy", AttributeValue::Bool(true)),
                ("tags", AttributeValue::Ss(vec!["a".to_owned()])),
            ])),
        )
        .await;

    let polled = sink.clone();
    wait_until(|| {
        let sink = polled.clone();
        async move {
            sink.table_rows(&metrics())
                .await
                .iter()
                .any(|row| row.get("healthy").map(String::as_str) == Some("true"))
        }
    })
    .await;
    pipeline.shutdown_and_wait().await.unwrap();

    let schema = sink.table_schema(&metrics()).await.unwrap();
    assert_eq!(
        columns(&schema),
        vec![
            ("id".to_owned(), TableColumnType::Numeric),
            ("count".to_owned(), TableColumnType::Numeric),
            ("healthy".to_owned(), TableColumnType::Boolean),
            ("tags".to_owned(), TableColumnType::Jsonb),
        ]
    );
    let rows = sink.table_rows(&metrics()).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("count").map(String::as_str), Some("2"));
}

#[tokio::test(flavor = "multi_thread")]
async fn lower_case_naming_folds_attribute_names() {
    init_test_tracing();

    let source = metrics_source(vec![item(&[("id", number(1)), ("HostName", text("db-1"))])]).await;
    let sink = MemorySink::new();
    let mut config = snapshot_only();
    config.column_naming = ColumnNaming::LowerCase;

    run_to_completion(config, source, &sink).await;

    let schema = sink.table_schema(&metrics()).await.unwrap();
    assert!(schema.has_column("hostname"));
    assert!(!schema.has_column("HostName"));
}

#[tokio::test(flavor = "multi_thread")]
async fn jsonb_mode_stores_whole_items_without_evolving() {
    init_test_tracing();

    let source = metrics_source(vec![
        item(&[("id", number(1)), ("count", number(5))]),
        item(&[("id", number(2)), ("count", text("five"))]),
    ])
    .await;
    let sink = MemorySink::new();
    let mut config = snapshot_only();
    config.conversion_mode = ConversionMode::Jsonb;

    run_to_completion(config, source, &sink).await;

    let schema = sink.table_schema(&metrics()).await.unwrap();
    assert_eq!(
        columns(&schema),
        vec![
            ("id".to_owned(), TableColumnType::Numeric),
            ("data".to_owned(), TableColumnType::Jsonb),
        ]
    );

    let mut rows = sink.table_rows(&metrics()).await;
    rows.sort_by(|a, b| a.get("id").cmp(&b.get("id")));
    let data = rows
        .iter()
        .map(|row| serde_json::from_str::<serde_json::Value>(&row["data"]).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        data,
        vec![
            serde_json::json!({"id": 1, "count": 5}),
            serde_json::json!({"id": 2, "count": "five"}),
        ]
    );
}
