use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the quarry binary.
#[derive(Debug, Parser)]
#[command(
    name = "quarry",
    version,
    about = "Inspect database tables through a repository session"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "QUARRY_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: SettingsOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the resolved settings.
    Config,
    /// Count rows, optionally filtered by a JSON condition map.
    Count(CountArgs),
    /// List rows.
    List(ListArgs),
    /// Fetch one page of rows, reading page and sort from a query string.
    Paginate(PaginateArgs),
    /// Fetch a row by primary key.
    Find(FindArgs),
}

#[derive(Debug, Args, Clone)]
pub struct TableArgs {
    /// Table to read.
    #[arg(long, value_name = "TABLE")]
    pub table: String,

    /// Primary key column of the table.
    #[arg(long = "primary-key", value_name = "COLUMN", default_value = "id")]
    pub primary_key: String,
}

#[derive(Debug, Args, Clone)]
pub struct CountArgs {
    #[command(flatten)]
    pub table: TableArgs,

    /// Conditions such as `{"status": "open", "views": [">", 10]}`.
    #[arg(long = "where", value_name = "JSON")]
    pub conditions: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ListArgs {
    #[command(flatten)]
    pub table: TableArgs,

    /// Conditions such as `{"status": "open", "views": [">", 10]}`.
    #[arg(long = "where", value_name = "JSON")]
    pub conditions: Option<String>,

    /// Order as `column` or `column:desc`; may repeat.
    #[arg(long = "order", value_name = "COLUMN[:DIR]")]
    pub order: Vec<String>,

    /// Maximum number of rows.
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<u64>,

    /// Columns to select; defaults to every column.
    #[arg(long, value_delimiter = ',', value_name = "COLUMNS")]
    pub columns: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct PaginateArgs {
    #[command(flatten)]
    pub table: TableArgs,

    /// Rows per page; defaults to `pagination.limit`.
    #[arg(long = "per-page", value_name = "COUNT")]
    pub per_page: Option<u64>,

    /// Request query string, e.g. `page=2&sort[title]=desc`.
    #[arg(long, value_name = "QUERY", default_value = "")]
    pub query: String,

    /// Skip the total count.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub simple: bool,
}

#[derive(Debug, Args, Clone)]
pub struct FindArgs {
    #[command(flatten)]
    pub table: TableArgs,

    /// Primary key value; parsed as JSON when possible, otherwise a string.
    #[arg(long, value_name = "KEY")]
    pub id: String,
}

/// Flags that override file and environment settings.
#[derive(Debug, Args, Default, Clone)]
pub struct SettingsOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT", global = true)]
    pub database_max_connections: Option<u32>,

    /// Override the default page size.
    #[arg(long = "pagination-limit", value_name = "COUNT", global = true)]
    pub pagination_limit: Option<u64>,

    /// Toggle read caching.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache lifetime in minutes.
    #[arg(long = "cache-minutes", value_name = "MINUTES", global = true)]
    pub cache_minutes: Option<u64>,
}
