use std::{process, sync::Arc};

use quarry::{
    Direction, PostgresEngine, Record, Repository, RepositoryError, RequestContext, Schema,
    WhereConditions,
    cache::{CacheBinding, CacheConfig, CacheKeyRegistry, CacheStores},
    config::{self, Command, CountArgs, FindArgs, ListArgs, PaginateArgs, Settings, TableArgs},
    criteria::RequestSortCriterion,
    error::EngineError,
    telemetry::{self, TelemetryError},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::LoadError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("database unavailable: {0}")]
    Database(#[from] EngineError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("invalid argument `{argument}`: {reason}")]
    Argument { argument: &'static str, reason: String },
    #[error("failed to print result: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    if let Command::Config = cli_args.command {
        println!("{settings:#?}");
        return Ok(());
    }

    let engine = PostgresEngine::connect(&settings.database).await?;
    engine.health_check().await?;
    info!(
        max_connections = settings.database.max_connections.get(),
        "Connected to database"
    );

    let engine = Arc::new(engine);
    let settings = Arc::new(settings);

    match cli_args.command {
        Command::Config => Ok(()),
        Command::Count(args) => run_count(engine, settings, args).await,
        Command::List(args) => run_list(engine, settings, args).await,
        Command::Paginate(args) => run_paginate(engine, settings, args).await,
        Command::Find(args) => run_find(engine, settings, args).await,
    }
}

fn session(
    engine: Arc<PostgresEngine>,
    settings: Arc<Settings>,
    table: &TableArgs,
) -> Result<Repository<Record>, AppError> {
    let schema = Schema::new(table.table.clone()).primary_key(table.primary_key.clone());
    Ok(Repository::with_schema(engine, settings, schema)?)
}

fn conditions(raw: Option<&str>) -> Result<WhereConditions, AppError> {
    let Some(raw) = raw else {
        return Ok(WhereConditions::new());
    };
    let value: Value = serde_json::from_str(raw).map_err(|err| AppError::Argument {
        argument: "--where",
        reason: err.to_string(),
    })?;
    Ok(WhereConditions::from_json(&value)?)
}

fn print<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_count(
    engine: Arc<PostgresEngine>,
    settings: Arc<Settings>,
    args: CountArgs,
) -> Result<(), AppError> {
    let mut repository = session(engine, settings, &args.table)?;
    let count = repository.count(conditions(args.conditions.as_deref())?).await?;
    print(&serde_json::json!({ "count": count }))
}

async fn run_list(
    engine: Arc<PostgresEngine>,
    settings: Arc<Settings>,
    args: ListArgs,
) -> Result<(), AppError> {
    let mut repository = session(engine, settings, &args.table)?;
    for order in &args.order {
        let (column, direction) = parse_order(order)?;
        repository.order_by(column, direction);
    }
    if let Some(limit) = args.limit {
        repository.take(limit);
    }

    let columns: Vec<&str> = args.columns.iter().map(String::as_str).collect();
    let rows = repository
        .find_where(conditions(args.conditions.as_deref())?, &columns)
        .await?;
    print(&rows)
}

async fn run_paginate(
    engine: Arc<PostgresEngine>,
    settings: Arc<Settings>,
    args: PaginateArgs,
) -> Result<(), AppError> {
    let request = RequestContext::from_query_string(format!("/{}", args.table.table), &args.query);
    let cache_config = CacheConfig::from(&settings.cache);
    let cache = CacheBinding::from_settings(
        &settings.cache,
        &CacheStores::with_defaults(&cache_config),
        Arc::new(CacheKeyRegistry::new()),
    )?;

    let mut repository = session(engine, settings, &args.table)?
        .with_request(request)
        .with_cache(cache);
    repository.push_criteria(RequestSortCriterion);

    let page = if args.simple {
        repository.simple_paginate(args.per_page, &["*"]).await?
    } else {
        repository.paginate(args.per_page, &["*"]).await?
    };
    print(&page)
}

async fn run_find(
    engine: Arc<PostgresEngine>,
    settings: Arc<Settings>,
    args: FindArgs,
) -> Result<(), AppError> {
    let key = serde_json::from_str::<Value>(&args.id).unwrap_or(Value::String(args.id.clone()));
    let mut repository = session(engine, settings, &args.table)?;
    let row = repository.find(&key).await?;
    print(&row)
}

fn parse_order(raw: &str) -> Result<(String, Direction), AppError> {
    let (column, direction) = match raw.split_once(':') {
        Some((column, direction)) => {
            let direction = direction.parse().map_err(|err| AppError::Argument {
                argument: "--order",
                reason: format!("{err}"),
            })?;
            (column, direction)
        }
        None => (raw, Direction::Asc),
    };
    if column.trim().is_empty() {
        return Err(AppError::Argument {
            argument: "--order",
            reason: "column must not be empty".to_string(),
        });
    }
    Ok((column.trim().to_string(), direction))
}
