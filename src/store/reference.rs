//! Reading and writing the reference tables.
//!
//! The free functions here take a bare pool so that the same queries serve both the primary
//! store and the local snapshot database.
use super::Store;
use crate::id::IssnL;
use crate::reference::{IdentifierSet, JournalMetadata, OaCounts, ReferenceData, ReferenceRowCounts};
use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

/// Restricts a query to a set of ISSN-Ls, passed to SQLite as one JSON array parameter
struct IdFilter(Option<String>);

impl IdFilter {
    fn new(ids: &IdentifierSet) -> Result<Self> {
        Ok(match ids {
            IdentifierSet::All => Self(None),
            IdentifierSet::Only(issns) => Self(Some(serde_json::to_string(issns)?)),
        })
    }

    async fn fetch(&self, pool: &SqlitePool, select: &str, order_by: &str) -> Result<Vec<SqliteRow>> {
        let sql = match self.0 {
            None => format!("{select} ORDER BY {order_by}"),
            Some(_) => format!(
                "{select} WHERE issn_l IN (SELECT value FROM json_each(?)) ORDER BY {order_by}"
            ),
        };

        let mut query = sqlx::query(&sql);
        if let Some(issns) = &self.0 {
            query = query.bind(issns.as_str());
        }

        Ok(query.fetch_all(pool).await?)
    }
}

fn issn_of(row: &SqliteRow) -> Result<IssnL> {
    Ok(IssnL::from(row.try_get::<String, _>("issn_l")?))
}

/// Load the reference tables for a set of journals
pub async fn load_reference_data(pool: &SqlitePool, ids: &IdentifierSet) -> Result<ReferenceData> {
    let filter = IdFilter::new(ids)?;
    let mut data = ReferenceData::default();

    let rows = filter
        .fetch(
            pool,
            "SELECT issn_l, title, subject, publisher, is_society_journal FROM journal_metadata",
            "issn_l",
        )
        .await?;
    for row in rows {
        let metadata = JournalMetadata {
            title: row.try_get("title")?,
            subject: row.try_get("subject")?,
            publisher: row.try_get("publisher")?,
            is_society_journal: row.try_get("is_society_journal")?,
        };
        data.metadata.insert(issn_of(&row)?, metadata);
    }

    let rows = filter
        .fetch(pool, "SELECT issn_l, embargo_months FROM journal_embargo", "issn_l")
        .await?;
    for row in rows {
        data.embargo_months
            .insert(issn_of(&row)?, row.try_get("embargo_months")?);
    }

    let rows = filter
        .fetch(
            pool,
            "SELECT issn_l, age, downloads FROM journal_downloads",
            "issn_l, age",
        )
        .await?;
    for row in rows {
        let age = usize::try_from(row.try_get::<i64, _>("age")?)?;
        let curve = data.downloads_by_age.entry(issn_of(&row)?).or_default();
        if curve.len() <= age {
            curve.resize(age + 1, 0.0);
        }
        curve[age] = row.try_get("downloads")?;
    }

    let rows = filter
        .fetch(
            pool,
            "SELECT issn_l, year, num_papers, gold, hybrid, bronze, green, green_submitted \
            FROM journal_oa_status",
            "issn_l, year",
        )
        .await?;
    for row in rows {
        let counts = OaCounts {
            num_papers: row.try_get("num_papers")?,
            gold: row.try_get("gold")?,
            hybrid: row.try_get("hybrid")?,
            bronze: row.try_get("bronze")?,
            green: row.try_get("green")?,
            green_submitted: row.try_get("green_submitted")?,
        };
        data.oa_by_year
            .entry(issn_of(&row)?)
            .or_default()
            .insert(row.try_get("year")?, counts);
    }

    let rows = filter
        .fetch(pool, "SELECT issn_l, rate FROM journal_social_networks", "issn_l")
        .await?;
    for row in rows {
        data.social_network_rate
            .insert(issn_of(&row)?, row.try_get("rate")?);
    }

    let rows = filter
        .fetch(
            pool,
            "SELECT issn_l, year, num_papers FROM journal_paper_counts",
            "issn_l, year",
        )
        .await?;
    for row in rows {
        data.paper_counts
            .entry(issn_of(&row)?)
            .or_default()
            .insert(row.try_get("year")?, row.try_get("num_papers")?);
    }

    Ok(data)
}

async fn count_rows(pool: &SqlitePool, table: &str) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;

    Ok(u64::try_from(count)?)
}

/// Count the rows in every reference table
pub async fn count_reference_rows(pool: &SqlitePool) -> Result<ReferenceRowCounts> {
    Ok(ReferenceRowCounts {
        metadata: count_rows(pool, "journal_metadata").await?,
        embargo: count_rows(pool, "journal_embargo").await?,
        downloads: count_rows(pool, "journal_downloads").await?,
        oa_status: count_rows(pool, "journal_oa_status").await?,
        social_networks: count_rows(pool, "journal_social_networks").await?,
        paper_counts: count_rows(pool, "journal_paper_counts").await?,
    })
}

/// Write reference data, replacing any existing rows for the same keys.
///
/// Runs in one transaction, so a failed bulk load leaves the tables untouched.
pub async fn insert_reference_data(pool: &SqlitePool, data: &ReferenceData) -> Result<()> {
    let mut tx = pool.begin().await?;

    for (issn_l, metadata) in &data.metadata {
        sqlx::query(
            "INSERT OR REPLACE INTO journal_metadata \
            (issn_l, title, subject, publisher, is_society_journal) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(issn_l.as_str())
        .bind(&metadata.title)
        .bind(metadata.subject.as_deref())
        .bind(metadata.publisher.as_deref())
        .bind(metadata.is_society_journal)
        .execute(&mut *tx)
        .await?;
    }

    for (issn_l, embargo_months) in &data.embargo_months {
        sqlx::query("INSERT OR REPLACE INTO journal_embargo (issn_l, embargo_months) VALUES (?, ?)")
            .bind(issn_l.as_str())
            .bind(*embargo_months)
            .execute(&mut *tx)
            .await?;
    }

    for (issn_l, curve) in &data.downloads_by_age {
        for (age, downloads) in curve.iter().enumerate() {
            sqlx::query(
                "INSERT OR REPLACE INTO journal_downloads (issn_l, age, downloads) VALUES (?, ?, ?)",
            )
            .bind(issn_l.as_str())
            .bind(i64::try_from(age)?)
            .bind(*downloads)
            .execute(&mut *tx)
            .await?;
        }
    }

    for (issn_l, by_year) in &data.oa_by_year {
        for (year, counts) in by_year {
            sqlx::query(
                "INSERT OR REPLACE INTO journal_oa_status \
                (issn_l, year, num_papers, gold, hybrid, bronze, green, green_submitted) \
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(issn_l.as_str())
            .bind(*year)
            .bind(counts.num_papers)
            .bind(counts.gold)
            .bind(counts.hybrid)
            .bind(counts.bronze)
            .bind(counts.green)
            .bind(counts.green_submitted)
            .execute(&mut *tx)
            .await?;
        }
    }

    for (issn_l, rate) in &data.social_network_rate {
        sqlx::query("INSERT OR REPLACE INTO journal_social_networks (issn_l, rate) VALUES (?, ?)")
            .bind(issn_l.as_str())
            .bind(*rate)
            .execute(&mut *tx)
            .await?;
    }

    for (issn_l, by_year) in &data.paper_counts {
        for (year, num_papers) in by_year {
            sqlx::query(
                "INSERT OR REPLACE INTO journal_paper_counts (issn_l, year, num_papers) \
                VALUES (?, ?, ?)",
            )
            .bind(issn_l.as_str())
            .bind(*year)
            .bind(*num_papers)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    Ok(())
}

impl Store {
    /// Load reference data for a set of journals from the primary store
    pub async fn reference_data(&self, ids: &IdentifierSet) -> Result<ReferenceData> {
        load_reference_data(self.pool(), ids).await
    }

    /// Count the rows in the primary store's reference tables
    pub async fn reference_row_counts(&self) -> Result<ReferenceRowCounts> {
        count_reference_rows(self.pool()).await
    }

    /// Validate reference data and write it to the primary store
    pub async fn insert_reference_data(&self, data: &ReferenceData) -> Result<()> {
        data.validate().context("Invalid reference data")?;
        insert_reference_data(self.pool(), data).await
    }
}
