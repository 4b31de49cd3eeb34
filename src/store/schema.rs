//! Table definitions.
//!
//! The reference tables are shared between the primary store and the local snapshot database,
//! so they are created separately from the tables only the primary store has.
use anyhow::Result;
use sqlx::sqlite::SqlitePool;

const REFERENCE_TABLES: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS journal_metadata (
        issn_l TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        subject TEXT,
        publisher TEXT,
        is_society_journal INTEGER NOT NULL DEFAULT 0
    )",
    r"CREATE TABLE IF NOT EXISTS journal_embargo (
        issn_l TEXT PRIMARY KEY,
        embargo_months INTEGER NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS journal_downloads (
        issn_l TEXT NOT NULL,
        age INTEGER NOT NULL,
        downloads REAL NOT NULL,
        PRIMARY KEY (issn_l, age)
    )",
    r"CREATE TABLE IF NOT EXISTS journal_oa_status (
        issn_l TEXT NOT NULL,
        year INTEGER NOT NULL,
        num_papers REAL NOT NULL,
        gold REAL NOT NULL DEFAULT 0,
        hybrid REAL NOT NULL DEFAULT 0,
        bronze REAL NOT NULL DEFAULT 0,
        green REAL NOT NULL DEFAULT 0,
        green_submitted REAL NOT NULL DEFAULT 0,
        PRIMARY KEY (issn_l, year)
    )",
    r"CREATE TABLE IF NOT EXISTS journal_social_networks (
        issn_l TEXT PRIMARY KEY,
        rate REAL NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS journal_paper_counts (
        issn_l TEXT NOT NULL,
        year INTEGER NOT NULL,
        num_papers REAL NOT NULL,
        PRIMARY KEY (issn_l, year)
    )",
];

const PRIMARY_TABLES: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS packages (
        package_id TEXT PRIMARY KEY,
        institution_id TEXT NOT NULL,
        institution_name TEXT NOT NULL,
        currency TEXT NOT NULL,
        big_deal_cost REAL NOT NULL,
        big_deal_cost_increase REAL,
        base_year INTEGER NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS package_usage (
        package_id TEXT NOT NULL,
        issn_l TEXT NOT NULL,
        usage REAL NOT NULL,
        PRIMARY KEY (package_id, issn_l)
    )",
    r"CREATE TABLE IF NOT EXISTS package_prices (
        package_id TEXT NOT NULL,
        issn_l TEXT NOT NULL,
        price REAL NOT NULL,
        PRIMARY KEY (package_id, issn_l)
    )",
    r"CREATE TABLE IF NOT EXISTS package_perpetual_access (
        package_id TEXT NOT NULL,
        issn_l TEXT NOT NULL,
        start_year INTEGER NOT NULL,
        end_year INTEGER
    )",
    r"CREATE TABLE IF NOT EXISTS package_citations (
        package_id TEXT NOT NULL,
        issn_l TEXT NOT NULL,
        citations REAL NOT NULL DEFAULT 0,
        authorships REAL NOT NULL DEFAULT 0,
        PRIMARY KEY (package_id, issn_l)
    )",
    r"CREATE TABLE IF NOT EXISTS scenario_snapshots (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        scenario_id TEXT NOT NULL,
        updated TEXT NOT NULL,
        snapshot TEXT NOT NULL
    )",
    r"CREATE INDEX IF NOT EXISTS scenario_snapshots_id ON scenario_snapshots (scenario_id, updated)",
    r"CREATE TABLE IF NOT EXISTS consortium_snapshots (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        scenario_id TEXT NOT NULL,
        updated TEXT NOT NULL,
        snapshot TEXT NOT NULL
    )",
    r"CREATE INDEX IF NOT EXISTS consortium_snapshots_id ON consortium_snapshots (scenario_id, updated)",
    r"CREATE TABLE IF NOT EXISTS recompute_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        scenario_id TEXT NOT NULL,
        email TEXT,
        created TEXT NOT NULL,
        completed TEXT
    )",
];

async fn execute_all(pool: &SqlitePool, statements: &[&str]) -> Result<()> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Create the reference tables if they don't exist
pub async fn create_reference_tables(pool: &SqlitePool) -> Result<()> {
    execute_all(pool, REFERENCE_TABLES).await
}

/// Create the package, snapshot and queue tables if they don't exist
pub async fn create_primary_tables(pool: &SqlitePool) -> Result<()> {
    execute_all(pool, PRIMARY_TABLES).await
}
