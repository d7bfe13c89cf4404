use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::*;
use crate::cache::{CacheConfig, CacheKeyRegistry, CacheStore, MemoryCacheStore};
use crate::criteria::WhereEquals;
use crate::engine::{MemoryEngine, RawOperation};
use crate::error::CacheError;
use crate::model::Relation;
use crate::query::{Operator, WhereConditions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Post {
    id: i64,
    title: String,
    status: String,
    active: bool,
}

impl Model for Post {
    fn schema() -> Schema {
        Schema::new("posts")
            .columns(["id", "title", "status", "active"])
            .relation(Relation::belongs_to_many(
                "tags", "tags", "post_tag", "post_id", "tag_id",
            ))
    }
}

struct ActiveOnly;

impl Criterion<Post> for ActiveOnly {
    fn apply(&self, query: Query, _repository: &Repository<Post>) -> Query {
        query.where_eq("active", true)
    }
}

struct OrderBy(&'static str);

impl Criterion<Post> for OrderBy {
    fn apply(&self, query: Query, _repository: &Repository<Post>) -> Query {
        query.order_by(self.0, Direction::Asc)
    }
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn engine() -> Arc<MemoryEngine> {
    let engine = MemoryEngine::new();
    engine.seed(
        "posts",
        [
            json!({"id": 1, "title": "delta", "status": "open", "active": true}),
            json!({"id": 2, "title": "alpha", "status": "closed", "active": false}),
            json!({"id": 3, "title": "echo", "status": "open", "active": true}),
            json!({"id": 4, "title": "bravo", "status": "open", "active": false}),
            json!({"id": 5, "title": "charlie", "status": "closed", "active": true}),
        ]
        .into_iter()
        .map(record),
    );
    engine.seed(
        "tags",
        [json!({"id": 7, "name": "rust"}), json!({"id": 8, "name": "sql"})]
            .into_iter()
            .map(record),
    );
    engine.seed("post_tag", [record(json!({"post_id": 1, "tag_id": 7}))]);
    Arc::new(engine)
}

fn repository(engine: &Arc<MemoryEngine>) -> Repository<Post> {
    Repository::new(engine.clone(), Arc::new(Settings::default())).expect("valid schema")
}

fn ids(posts: &[Post]) -> Vec<i64> {
    posts.iter().map(|post| post.id).collect()
}

fn recorder(bus: &EventBus) -> Arc<Mutex<Vec<LifecycleEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(
        [
            RepositoryAction::Creating,
            RepositoryAction::Created,
            RepositoryAction::Updating,
            RepositoryAction::Updated,
            RepositoryAction::Deleting,
            RepositoryAction::Deleted,
        ],
        Arc::new(move |event: &LifecycleEvent| {
            sink.lock().expect("sink lock").push(event.clone());
        }),
    );
    seen
}

fn actions(seen: &Mutex<Vec<LifecycleEvent>>) -> Vec<RepositoryAction> {
    seen.lock()
        .expect("sink lock")
        .iter()
        .map(LifecycleEvent::action)
        .collect()
}

struct Cached {
    factory: RepositoryFactory,
    store: Arc<MemoryCacheStore>,
}

fn cached(engine: &Arc<MemoryEngine>, config: CacheConfig) -> Cached {
    let store = Arc::new(MemoryCacheStore::new(&config));
    let binding = CacheBinding::new(store.clone(), Arc::new(CacheKeyRegistry::new()), config);
    let factory =
        RepositoryFactory::new(engine.clone(), Arc::new(Settings::default())).with_cache(binding);
    if let Some(cache) = factory.cache() {
        cache.attach_invalidator(factory.events());
    }
    Cached { factory, store }
}

#[tokio::test]
async fn criteria_apply_in_push_order() {
    let engine = engine();

    let mut repository = repository(&engine);
    repository.push_criteria(OrderBy("title")).push_criteria(OrderBy("id"));
    let first = repository.first().await.expect("first").expect("row");
    assert_eq!(first.title, "alpha");

    let mut repository = self::repository(&engine);
    repository.push_criteria(OrderBy("id")).push_criteria(OrderBy("title"));
    let first = repository.first().await.expect("first").expect("row");
    assert_eq!(first.id, 1);
}

#[tokio::test]
async fn criteria_persist_until_popped() {
    let engine = engine();
    let mut repository = repository(&engine);
    repository.push_criteria(ActiveOnly).push_criteria(ActiveOnly);

    assert_eq!(ids(&repository.all().await.expect("all")), vec![1, 3, 5]);
    assert_eq!(ids(&repository.all().await.expect("all")), vec![1, 3, 5]);

    repository.pop_criteria(&ActiveOnly);
    assert!(repository.criteria().is_empty());
    assert_eq!(repository.all().await.expect("all").len(), 5);
}

#[tokio::test]
async fn chain_modifiers_reset_after_a_terminal_read() {
    let engine = engine();
    let mut repository = repository(&engine);

    repository.order_by("id", Direction::Desc).take(2);
    assert_eq!(ids(&repository.all().await.expect("all")), vec![5, 4]);
    assert_eq!(*repository.query(), Query::new());
    assert_eq!(ids(&repository.all().await.expect("all")), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn skipped_criteria_still_apply_the_scope_once() {
    let engine = engine();
    let mut repository = repository(&engine);
    repository
        .push_criteria(ActiveOnly)
        .skip_criteria(true)
        .scope_query(|query| query.where_eq("status", "open"));

    assert_eq!(ids(&repository.all().await.expect("all")), vec![1, 3, 4]);
    assert_eq!(repository.all().await.expect("all").len(), 5);

    repository.skip_criteria(false);
    assert_eq!(ids(&repository.all().await.expect("all")), vec![1, 3, 5]);
}

#[tokio::test]
async fn scope_survives_reads_that_do_not_clear_it() {
    let engine = engine();
    let mut repository = repository(&engine);
    repository.scope_query(|query| query.where_eq("status", "closed"));

    let found = repository.find_by_field("active", true).await.expect("find_by_field");
    assert_eq!(ids(&found), vec![5]);
    assert_eq!(repository.count(WhereConditions::new()).await.expect("count"), 2);
    assert_eq!(repository.count(WhereConditions::new()).await.expect("count"), 5);
}

#[tokio::test]
async fn find_reports_missing_keys() {
    let engine = engine();
    let mut repository = repository(&engine);

    assert_eq!(repository.find(&3).await.expect("find").title, "echo");
    let err = repository.find(&42).await.expect_err("missing");
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "`posts` with key `42` not found");
}

#[tokio::test]
async fn count_accepts_condition_maps() {
    let engine = engine();
    let mut repository = repository(&engine);

    let cases = [
        (json!({"status": "open"}), 3),
        (json!({"status": ["!=", "closed"]}), 3),
        (json!({"0": ["status", "=", "open"], "active": true}), 2),
        (json!([["id", ">", 2], ["active", "=", true]]), 2),
    ];
    for (conditions, expected) in cases {
        let conditions = WhereConditions::from_json(&conditions).expect("conditions");
        assert_eq!(
            repository.count(conditions).await.expect("count"),
            expected
        );
    }
}

#[tokio::test]
async fn count_column_skips_nulls() {
    let engine = engine();
    engine.seed(
        "posts",
        [record(json!({"id": 6, "title": null, "status": "open", "active": true}))],
    );
    let mut repository = repository(&engine);

    let all = repository.count(WhereConditions::new()).await.expect("count");
    let titled = repository
        .count_column(WhereConditions::new(), "title")
        .await
        .expect("count");
    assert_eq!((all, titled), (6, 5));
}

#[tokio::test]
async fn find_where_variants_filter_rows() {
    let engine = engine();
    let mut repository = repository(&engine);

    let open = repository
        .find_where(WhereConditions::new().op("id", Operator::Gte, 3).eq("status", "open"), &["*"])
        .await
        .expect("find_where");
    assert_eq!(ids(&open), vec![3, 4]);

    let listed = repository.find_where_in("id", [5, 1]).await.expect("in");
    assert_eq!(ids(&listed), vec![1, 5]);

    let rest = repository.find_where_not_in("id", [1, 2, 3]).await.expect("not in");
    assert_eq!(ids(&rest), vec![4, 5]);

    let middle = repository.find_where_between("id", 2, 4).await.expect("between");
    assert_eq!(ids(&middle), vec![2, 3, 4]);
}

#[tokio::test]
async fn create_publishes_events_and_assigns_keys() {
    let engine = engine();
    let bus = Arc::new(EventBus::new());
    let seen = recorder(&bus);
    let mut repository = repository(&engine).with_events(bus);

    let post = repository
        .create(&json!({"title": "foxtrot", "status": "open", "active": true}))
        .await
        .expect("create");

    assert_eq!(post.id, 6);
    assert_eq!(
        actions(&seen),
        vec![RepositoryAction::Creating, RepositoryAction::Created]
    );
    let events = seen.lock().expect("sink lock");
    assert_eq!(events[0].subject().record().and_then(|r| r.get("id")), None);
    assert_eq!(events[1].subject().record().and_then(|r| r.get("id")), Some(&json!(6)));
    assert_eq!(events[1].repository().as_str(), "posts");
}

#[tokio::test]
async fn create_discards_the_chain_without_running_the_scope() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let engine = engine();
    let mut repository = repository(&engine);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    repository
        .scope_query(move |query| {
            counter.fetch_add(1, Ordering::SeqCst);
            query.where_eq("status", "open")
        })
        .order_by("id", Direction::Desc);

    repository
        .create(&json!({"title": "kilo", "status": "closed", "active": true}))
        .await
        .expect("create");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(*repository.query(), Query::new());

    assert_eq!(repository.count(WhereConditions::new()).await.expect("count"), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn create_rejects_unknown_columns() {
    let engine = engine();
    let mut repository = repository(&engine);

    let err = repository
        .create(&json!({"title": "x", "status": "open", "active": true, "rating": 5}))
        .await
        .expect_err("undeclared column");
    assert!(matches!(err, RepositoryError::Validation { .. }));
}

#[tokio::test]
async fn update_publishes_the_prior_row_then_the_stored_row() {
    let engine = engine();
    let bus = Arc::new(EventBus::new());
    let seen = recorder(&bus);
    let mut repository = repository(&engine).with_events(bus);

    let post = repository
        .update(&1, &json!({"status": "closed"}))
        .await
        .expect("update");
    assert_eq!(post.status, "closed");
    assert_eq!(post.title, "delta");

    assert_eq!(
        actions(&seen),
        vec![RepositoryAction::Updating, RepositoryAction::Updated]
    );
    let events = seen.lock().expect("sink lock");
    let before = events[0].subject().record().expect("record");
    assert_eq!(before.get("status"), Some(&json!("open")));
    assert_eq!(before.get("title"), Some(&json!("delta")));
    let after = events[1].subject().record().expect("record");
    assert_eq!(after.get("status"), Some(&json!("closed")));
}

#[tokio::test]
async fn update_of_missing_row_is_not_found_and_silent() {
    let engine = engine();
    let bus = Arc::new(EventBus::new());
    let seen = recorder(&bus);
    let mut repository = repository(&engine).with_events(bus);

    let err = repository
        .update(&99, &json!({"status": "closed"}))
        .await
        .expect_err("missing row");
    assert!(err.is_not_found());
    assert!(actions(&seen).is_empty());
}

#[tokio::test]
async fn scope_hides_rows_from_mutations() {
    let engine = engine();
    let mut repository = repository(&engine);
    repository.scope_query(|query| query.where_eq("status", "open"));

    let err = repository.delete(&2).await.expect_err("closed row is out of scope");
    assert!(err.is_not_found());
    assert_eq!(engine.rows("posts").len(), 5);
}

#[tokio::test]
async fn delete_events_carry_the_same_snapshot() {
    let engine = engine();
    let bus = Arc::new(EventBus::new());
    let seen = recorder(&bus);
    let mut repository = repository(&engine).with_events(bus);

    assert_eq!(repository.delete(&4).await.expect("delete"), 1);
    assert_eq!(engine.rows("posts").len(), 4);

    let events = seen.lock().expect("sink lock");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action(), RepositoryAction::Deleting);
    assert_eq!(events[1].action(), RepositoryAction::Deleted);
    assert_eq!(events[0].subject(), events[1].subject());
    assert_eq!(
        events[1].subject().record().and_then(|r| r.get("title")),
        Some(&json!("bravo"))
    );
}

#[tokio::test]
async fn delete_where_reports_the_query() {
    let engine = engine();
    let bus = Arc::new(EventBus::new());
    let seen = recorder(&bus);
    let mut repository = repository(&engine).with_events(bus);

    let deleted = repository
        .delete_where(WhereConditions::new().eq("status", "closed"))
        .await
        .expect("delete_where");
    assert_eq!(deleted, 2);

    let events = seen.lock().expect("sink lock");
    assert!(matches!(events[1].subject(), Subject::Query(_)));
    assert_eq!(engine.rows("posts").len(), 3);
}

#[tokio::test]
async fn update_or_create_takes_both_paths() {
    let engine = engine();
    let bus = Arc::new(EventBus::new());
    let seen = recorder(&bus);
    let mut repository = repository(&engine).with_events(bus);

    let updated = repository
        .update_or_create(&json!({"title": "echo"}), &json!({"status": "closed"}))
        .await
        .expect("update path");
    assert_eq!((updated.id, updated.status.as_str()), (3, "closed"));

    let created = repository
        .update_or_create(
            &json!({"title": "golf"}),
            &json!({"status": "open", "active": false}),
        )
        .await
        .expect("create path");
    assert_eq!(created.id, 6);
    assert_eq!(engine.rows("posts").len(), 6);

    assert_eq!(
        actions(&seen),
        vec![
            RepositoryAction::Creating,
            RepositoryAction::Updated,
            RepositoryAction::Creating,
            RepositoryAction::Updated,
        ]
    );
}

#[tokio::test]
async fn first_or_new_does_not_persist() {
    let engine = engine();
    let mut repository = repository(&engine);

    let existing = repository
        .first_or_new(&json!({"title": "alpha"}))
        .await
        .expect("existing");
    assert_eq!(existing.id, 2);

    let fresh = repository
        .first_or_new(&json!({"id": 0, "title": "hotel", "status": "open", "active": true}))
        .await
        .expect("unsaved");
    assert_eq!(fresh.title, "hotel");
    assert_eq!(engine.rows("posts").len(), 5);

    let created = repository
        .first_or_create(&json!({"title": "india", "status": "open", "active": true}))
        .await
        .expect("created");
    assert_eq!(created.id, 6);
    let again = repository
        .first_or_create(&json!({"title": "india", "status": "open", "active": true}))
        .await
        .expect("found");
    assert_eq!(again.id, 6);
    assert_eq!(engine.rows("posts").len(), 6);
}

#[tokio::test]
async fn paginate_counts_and_carries_request_parameters() {
    let engine = engine();
    let request = RequestContext::from_query_string("/posts", "page=2&status=open");
    let mut repository = repository(&engine).with_request(request);

    let page = repository.paginate(Some(2), &["*"]).await.expect("paginate");
    assert_eq!(ids(&page.items), vec![3, 4]);
    assert_eq!(page.total, Some(5));
    assert_eq!(page.last_page(), Some(3));
    assert_eq!(page.next_page_url().as_deref(), Some("/posts?status=open&page=3"));

    let page = repository.simple_paginate(Some(2), &["*"]).await.expect("simple");
    assert_eq!(ids(&page.items), vec![3, 4]);
    assert_eq!(page.total, None);
    assert!(page.has_more);
}

#[tokio::test]
async fn paginate_falls_back_to_configured_limit() {
    let engine = engine();
    let mut repository = repository(&engine);

    let page = repository.paginate(None, &["*"]).await.expect("paginate");
    assert_eq!(page.per_page, 15);
    assert_eq!(page.items.len(), 5);
    assert!(!page.has_more);
}

#[tokio::test]
async fn cached_reads_are_served_until_a_create() {
    let engine = engine();
    let cached = cached(&engine, CacheConfig::default());
    let mut repository = cached.factory.repository::<Post>().expect("repository");

    assert_eq!(repository.all().await.expect("all").len(), 5);
    engine.seed(
        "posts",
        [record(json!({"id": 9, "title": "out of band", "status": "open", "active": true}))],
    );
    assert_eq!(repository.all().await.expect("cached all").len(), 5);
    assert_eq!(cached.store.len(), 1);

    repository
        .create(&json!({"title": "juliet", "status": "open", "active": true}))
        .await
        .expect("create");
    assert!(cached.store.is_empty());
    assert_eq!(repository.all().await.expect("fresh all").len(), 7);
}

#[tokio::test]
async fn disabled_cleaning_keeps_stale_reads() {
    let engine = engine();
    let config = CacheConfig {
        clean_on_created: false,
        ..Default::default()
    };
    let cached = cached(&engine, config);
    let mut repository = cached.factory.repository::<Post>().expect("repository");

    assert_eq!(repository.all().await.expect("all").len(), 5);
    repository
        .create(&json!({"title": "kilo", "status": "open", "active": true}))
        .await
        .expect("create");
    assert_eq!(cached.store.len(), 1);
    assert_eq!(repository.all().await.expect("stale all").len(), 5);
}

#[tokio::test]
async fn skip_flags_bypass_the_cache() {
    let engine = engine();
    let cached = cached(&engine, CacheConfig::default());

    let request = RequestContext::new("/posts").with_param("skipCache", "1");
    let mut repository = cached
        .factory
        .clone()
        .with_request(request)
        .repository::<Post>()
        .expect("repository");
    repository.all().await.expect("all");
    assert!(cached.store.is_empty());

    let mut repository = cached.factory.repository::<Post>().expect("repository");
    repository.skip_cache(true);
    repository.find(&1).await.expect("find");
    assert!(cached.store.is_empty());

    repository.skip_cache(false);
    repository.find(&1).await.expect("find");
    assert_eq!(cached.store.len(), 1);
}

#[tokio::test]
async fn non_cacheable_methods_never_touch_the_store() {
    let engine = engine();
    let config = CacheConfig {
        only: Some(vec!["find".into()]),
        ..Default::default()
    };
    let cached = cached(&engine, config);
    let mut repository = cached.factory.repository::<Post>().expect("repository");

    repository.all().await.expect("all");
    repository.pluck("title").await.expect("pluck");
    repository.first().await.expect("first");
    assert!(cached.store.is_empty());
}

struct BrokenStore;

impl CacheStore for BrokenStore {
    fn name(&self) -> &str {
        "broken"
    }

    fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
        Err(CacheError::Unavailable {
            store: "broken".into(),
            message: "offline".into(),
        })
    }

    fn put(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable {
            store: "broken".into(),
            message: "offline".into(),
        })
    }

    fn forget(&self, _key: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable {
            store: "broken".into(),
            message: "offline".into(),
        })
    }
}

#[tokio::test]
async fn cache_store_failures_never_fail_the_session() {
    let engine = engine();
    let registry = Arc::new(CacheKeyRegistry::new());
    let binding = CacheBinding::new(Arc::new(BrokenStore), registry.clone(), CacheConfig::default());
    let events = Arc::new(EventBus::new());
    binding.attach_invalidator(&events);
    let mut repository = repository(&engine).with_events(events).with_cache(binding);

    registry.register(repository.id(), "posts@all-stale");
    assert_eq!(repository.all().await.expect("all").len(), 5);
    repository
        .create(&json!({"title": "lima", "status": "open", "active": true}))
        .await
        .expect("create despite failing invalidation");
    assert_eq!(registry.keys_for(repository.id()), vec!["posts@all-stale"]);
}

#[tokio::test]
async fn registry_stays_within_store_capacity_under_read_load() {
    let engine = engine();
    let config = CacheConfig {
        capacity: std::num::NonZeroUsize::new(2).expect("non-zero"),
        ..Default::default()
    };
    let cached = cached(&engine, config);
    let registry = Arc::clone(cached.factory.cache().expect("cache").registry());
    let mut repository = cached.factory.repository::<Post>().expect("repository");

    for n in 0..200 {
        repository
            .find_by_field("title", format!("t{n}"))
            .await
            .expect("find_by_field");
    }

    assert_eq!(cached.store.len(), 2);
    assert_eq!(registry.key_count(), 2);
}

#[tokio::test]
async fn cache_keys_follow_the_repository_id() {
    let engine = engine();
    let cached = cached(&engine, CacheConfig::default());
    let mut repository = cached
        .factory
        .repository::<Post>()
        .expect("repository")
        .with_id("archive");

    repository.find(&1).await.expect("find");
    let registry = cached.factory.cache().expect("cache").registry();
    let keys = registry.keys_for(&RepositoryId::new("archive"));
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("archive@find-"));
}

#[tokio::test]
async fn named_criteria_resolve_through_the_registry() {
    let engine = engine();
    let mut registry = CriterionRegistry::<Post>::new();
    registry.register("closed", || WhereEquals::new("status", "closed"));
    let mut repository = repository(&engine).with_criteria_registry(Arc::new(registry));

    repository.push_criteria_named("closed").expect("registered");
    assert_eq!(ids(&repository.all().await.expect("all")), vec![2, 5]);

    assert!(repository.push_criteria_named("missing").is_err());

    repository.pop_criteria_named("closed");
    assert_eq!(repository.all().await.expect("all").len(), 5);
}

#[tokio::test]
async fn get_by_criteria_ignores_pushed_criteria_and_scope() {
    let engine = engine();
    let mut repository = repository(&engine);
    repository
        .push_criteria(ActiveOnly)
        .scope_query(|query| query.where_eq("id", 1));

    let closed = repository
        .get_by_criteria(&WhereEquals::new("status", "closed"))
        .await
        .expect("get_by_criteria");
    assert_eq!(ids(&closed), vec![2, 5]);
}

#[tokio::test]
async fn pluck_and_lists_follow_row_order() {
    let engine = engine();
    let mut repository = repository(&engine);

    repository.order_by("title", Direction::Asc).take(2);
    assert_eq!(
        repository.pluck("title").await.expect("pluck"),
        vec![json!("alpha"), json!("bravo")]
    );

    repository.push_criteria(ActiveOnly);
    assert_eq!(
        repository.lists("title", "id").await.expect("lists"),
        vec![
            (json!(1), json!("delta")),
            (json!(3), json!("echo")),
            (json!(5), json!("charlie")),
        ]
    );
}

#[tokio::test]
async fn hidden_and_visible_shape_rows() {
    let engine = engine();
    let mut repository: Repository<Record> =
        Repository::with_schema(engine.clone(), Arc::new(Settings::default()), Post::schema())
            .expect("valid schema");

    repository.hidden(["status", "active"]);
    let row = repository.find(&1).await.expect("find");
    assert_eq!(row, record(json!({"id": 1, "title": "delta"})));

    repository.visible(["id", "status"]).hidden(["status"]);
    let row = repository.find(&2).await.expect("find");
    assert_eq!(row, record(json!({"id": 2})));
}

#[tokio::test]
async fn unknown_relations_are_configuration_errors() {
    let engine = engine();
    let mut repository = repository(&engine);

    repository.with(["comments"]);
    let err = repository.all().await.expect_err("undeclared relation");
    assert!(matches!(err, RepositoryError::Configuration { .. }));

    let err = repository
        .sync(&1, "comments", [7])
        .await
        .expect_err("undeclared relation");
    assert!(matches!(err, RepositoryError::Configuration { .. }));
}

#[tokio::test]
async fn sync_reports_attached_and_detached_ids() {
    let engine = engine();
    let mut repository = repository(&engine);

    let changes = repository.sync(&1, "tags", [8]).await.expect("sync");
    assert_eq!(changes.attached, vec![json!(8)]);
    assert_eq!(changes.detached, vec![json!(7)]);

    let changes = repository
        .sync_without_detaching(&1, "tags", [7, 8])
        .await
        .expect("sync without detaching");
    assert_eq!(changes.attached, vec![json!(7)]);
    assert!(changes.detached.is_empty());
    assert_eq!(engine.rows("post_tag").len(), 2);

    let err = repository.sync(&99, "tags", [7]).await.expect_err("missing parent");
    assert!(err.is_not_found());
}

#[tokio::test]
async fn raw_failures_are_passthrough_errors() {
    let engine = engine();
    let mut repository = repository(&engine);

    let total = repository
        .raw(RawOperation::Sum("id".into()))
        .await
        .expect("sum");
    assert_eq!(total, json!(15));

    let err = repository
        .raw(RawOperation::Sum("title".into()))
        .await
        .expect_err("non-numeric sum");
    assert!(matches!(err, RepositoryError::Passthrough(_)));
}

#[tokio::test]
async fn factory_shares_events_between_sessions() {
    let engine = engine();
    let factory = RepositoryFactory::new(engine.clone(), Arc::new(Settings::default()));
    let seen = recorder(factory.events());

    let mut first = factory.repository::<Post>().expect("repository");
    let mut second = factory.repository::<Post>().expect("repository");
    first.delete(&1).await.expect("delete");
    second.delete(&2).await.expect("delete");

    assert_eq!(actions(&seen).len(), 4);
}
