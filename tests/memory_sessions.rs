//! End-to-end repository sessions over the in-memory engine.

use std::sync::{Arc, Mutex};

use quarry::{
    Direction, EventBus, LifecycleEvent, MemoryEngine, Model, Query, Record, Relation, Repository,
    RepositoryAction, RepositoryFactory, RequestContext, Schema,
    cache::{CacheStores, CacheConfig},
    config::Settings,
    criteria::RequestSortCriterion,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Author {
    id: i64,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    books: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    books_count: Option<u64>,
}

impl Model for Author {
    fn schema() -> Schema {
        Schema::new("authors")
            .columns(["id", "name"])
            .relation(Relation::has_many("books", "books", "author_id"))
    }
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn library() -> Arc<MemoryEngine> {
    let engine = MemoryEngine::new();
    engine.seed(
        "authors",
        [
            json!({"id": 1, "name": "Le Guin"}),
            json!({"id": 2, "name": "Banks"}),
            json!({"id": 3, "name": "Jemisin"}),
        ]
        .into_iter()
        .map(record),
    );
    engine.seed(
        "books",
        [
            json!({"id": 10, "author_id": 1, "title": "The Dispossessed", "year": 1974}),
            json!({"id": 11, "author_id": 1, "title": "The Lathe of Heaven", "year": 1971}),
            json!({"id": 12, "author_id": 2, "title": "Excession", "year": 1996}),
        ]
        .into_iter()
        .map(record),
    );
    Arc::new(engine)
}

#[tokio::test]
async fn eager_loading_and_counts() {
    let factory = RepositoryFactory::new(library(), Arc::new(Settings::default()));
    let mut authors = factory.repository::<Author>().expect("repository");

    authors.with(["books"]).with_count(["books"]);
    let loaded = authors.all().await.expect("all");

    let counts: Vec<(i64, Option<u64>)> = loaded.iter().map(|a| (a.id, a.books_count)).collect();
    assert_eq!(counts, vec![(1, Some(2)), (2, Some(1)), (3, Some(0))]);
    assert_eq!(loaded[0].books.as_ref().map(Vec::len), Some(2));
    assert_eq!(loaded[2].books.as_deref(), Some(&[][..]));

    let plain = authors.find(&2).await.expect("find");
    assert!(plain.books.is_none());
}

#[tokio::test]
async fn relation_existence_filters() {
    let factory = RepositoryFactory::new(library(), Arc::new(Settings::default()));
    let mut authors = factory.repository::<Author>().expect("repository");

    authors.has("books");
    let with_books: Vec<i64> = authors.all().await.expect("all").iter().map(|a| a.id).collect();
    assert_eq!(with_books, vec![1, 2]);

    authors.where_has("books", |books: Query| books.where_op("year", quarry::Operator::Gt, 1990));
    let recent: Vec<i64> = authors.all().await.expect("all").iter().map(|a| a.id).collect();
    assert_eq!(recent, vec![2]);
}

#[tokio::test]
async fn request_sort_orders_pages() {
    let request = RequestContext::from_query_string("/authors", "sort[name]=asc&page=1");
    let factory =
        RepositoryFactory::new(library(), Arc::new(Settings::default())).with_request(request);
    let mut authors = factory.repository::<Author>().expect("repository");
    authors.push_criteria(RequestSortCriterion);

    let page = authors.paginate(Some(2), &["*"]).await.expect("paginate");
    let names: Vec<&str> = page.items.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Banks", "Jemisin"]);
    assert_eq!(
        page.next_page_url().as_deref(),
        Some("/authors?sort%5Bname%5D=asc&page=2")
    );
}

#[tokio::test]
async fn configured_cache_is_invalidated_by_writes() {
    let engine = library();
    let settings = Arc::new(Settings::default());
    let stores = CacheStores::with_defaults(&CacheConfig::from(&settings.cache));
    let factory = RepositoryFactory::new(engine.clone(), settings)
        .with_configured_cache(&stores)
        .expect("memory store");
    let registry = Arc::clone(factory.cache().expect("cache").registry());

    let mut reader = factory.repository::<Author>().expect("repository");
    let mut writer = factory.repository::<Author>().expect("repository");

    assert_eq!(reader.all().await.expect("all").len(), 3);
    assert_eq!(registry.key_count(), 1);

    writer
        .update(&1, &json!({"name": "Ursula K. Le Guin"}))
        .await
        .expect("update");
    assert_eq!(registry.key_count(), 0);

    let first = reader.find(&1).await.expect("find");
    assert_eq!(first.name, "Ursula K. Le Guin");
}

#[tokio::test]
async fn sessions_over_dynamic_schemas() {
    let engine = library();
    let bus = Arc::new(EventBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(
        RepositoryAction::COMPLETED,
        Arc::new(move |event: &LifecycleEvent| {
            sink.lock()
                .expect("sink lock")
                .push((event.repository().to_string(), event.action()));
        }),
    );

    let mut books: Repository<Record> = Repository::with_schema(
        engine.clone(),
        Arc::new(Settings::default()),
        Schema::new("books"),
    )
    .expect("schema")
    .with_id("catalogue")
    .with_events(bus);

    books.order_by("year", Direction::Desc);
    let titles = books.pluck("title").await.expect("pluck");
    assert_eq!(
        titles,
        vec![
            json!("Excession"),
            json!("The Dispossessed"),
            json!("The Lathe of Heaven")
        ]
    );

    books.delete(&12).await.expect("delete");
    assert_eq!(
        *seen.lock().expect("sink lock"),
        vec![("catalogue".to_string(), RepositoryAction::Deleted)]
    );
    assert_eq!(engine.rows("books").len(), 2);
}
