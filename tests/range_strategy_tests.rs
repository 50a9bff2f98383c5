use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use shardmemodb::core::{DataType, DbError, Entity, EntityDescriptor, Member, Result, Row, Value};
use shardmemodb::engine::InMemoryEngine;
use shardmemodb::expression::col;
use shardmemodb::routing::{RangeShardingStrategy, ShardingConfig, ShardingRegistry};
use shardmemodb::{ShardingDbContext, ShardingOptions};

#[derive(Debug, Clone, PartialEq)]
struct Event {
    id: i64,
    created_at: DateTime<Utc>,
    kind: String,
}

lazy_static! {
    static ref EVENT: EntityDescriptor = EntityDescriptor::new(
        "Event",
        vec![
            Member::new("id", DataType::Integer).not_null(),
            Member::new("created_at", DataType::Timestamp).not_null(),
            Member::new("kind", DataType::Text),
        ],
        "id",
    );
}

impl Entity for Event {
    fn descriptor() -> &'static EntityDescriptor {
        &EVENT
    }

    fn to_row(&self) -> Row {
        vec![
            Value::Integer(self.id),
            Value::Timestamp(self.created_at),
            Value::Text(self.kind.clone()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        match row.as_slice() {
            [Value::Integer(id), Value::Timestamp(created_at), Value::Text(kind)] => Ok(Event {
                id: *id,
                created_at: *created_at,
                kind: kind.clone(),
            }),
            _ => Err(DbError::TypeMismatch(format!("not an event row: {:?}", row))),
        }
    }
}

fn day(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, month, day, 12, 0, 0).unwrap()
}

fn event_context() -> ShardingDbContext<InMemoryEngine> {
    let strategy = RangeShardingStrategy::monthly("Event", "default", 2024, 1, 3).unwrap();
    let registry = ShardingRegistry::new()
        .with::<Event>(ShardingConfig::for_entity::<Event>("created_at", strategy))
        .unwrap();
    ShardingDbContext::new(InMemoryEngine::new(), registry, ShardingOptions::new()).unwrap()
}

fn events() -> Vec<Event> {
    vec![
        Event { id: 1, created_at: day(1, 5), kind: "login".into() },
        Event { id: 2, created_at: day(1, 20), kind: "order".into() },
        Event { id: 3, created_at: day(2, 2), kind: "login".into() },
        Event { id: 4, created_at: day(2, 28), kind: "order".into() },
        Event { id: 5, created_at: day(3, 15), kind: "logout".into() },
    ]
}

#[tokio::test]
async fn test_events_land_in_month_tables() {
    let context = event_context();
    assert_eq!(context.insert_range(&events()).await.unwrap(), 5);

    let engine = context.engine();
    assert_eq!(engine.rows("default", "Event_202401").unwrap().len(), 2);
    assert_eq!(engine.rows("default", "Event_202402").unwrap().len(), 2);
    assert_eq!(engine.rows("default", "Event_202403").unwrap().len(), 1);
}

#[tokio::test]
async fn test_range_predicate_prunes_tables() {
    let context = event_context();
    context.insert_range(&events()).await.unwrap();

    let february = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    let before = context.engine().counters();
    let recent = context
        .query::<Event>()
        .filter(col("created_at").gt_eq(february))
        .order_by_desc("created_at")
        .to_list()
        .await
        .unwrap();
    let after = context.engine().counters();

    let ids: Vec<i64> = recent.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![5, 4, 3]);
    assert_eq!(after.queries - before.queries, 2);

    let before = context.engine().counters();
    let early = context
        .query::<Event>()
        .filter(col("created_at").lt(february))
        .count()
        .await
        .unwrap();
    assert_eq!(early, 2);
    assert_eq!(context.engine().counters().aggregates - before.aggregates, 1);
}

#[tokio::test]
async fn test_out_of_range_insert_fails() {
    let context = event_context();
    let late = Event {
        id: 9,
        created_at: Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
        kind: "login".into(),
    };
    assert!(matches!(context.insert(&late).await, Err(DbError::Routing(_))));
}

#[tokio::test]
async fn test_delete_by_month() {
    let context = event_context();
    context.insert_range(&events()).await.unwrap();

    let deleted = context
        .delete::<Event>(
            col("created_at")
                .gt_eq(day(1, 1))
                .and(col("created_at").lt(day(1, 31)))
                .and(col("kind").eq("order")),
        )
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(context.query::<Event>().count().await.unwrap(), 4);
}
