//! Packages and their package-specific records.
use super::Store;
use crate::id::{IssnL, PackageID};
use crate::package::{Package, PackageData};
use crate::units::{Money, Usage};
use crate::year::YearRange;
use anyhow::{Context, Result};
use sqlx::Row;

impl Store {
    /// Create or replace a package
    pub async fn insert_package(&self, package: &Package) -> Result<()> {
        package.validate()?;
        sqlx::query(
            "INSERT OR REPLACE INTO packages (package_id, institution_id, institution_name, \
            currency, big_deal_cost, big_deal_cost_increase, base_year) \
            VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(package.id.as_str())
        .bind(package.institution_id.as_str())
        .bind(&package.institution_name)
        .bind(&package.currency)
        .bind(package.big_deal_cost.value())
        .bind(package.big_deal_cost_increase)
        .bind(package.base_year)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Look up a package, returning `None` if it doesn't exist
    pub async fn package(&self, package_id: &PackageID) -> Result<Option<Package>> {
        let row = sqlx::query(
            "SELECT package_id, institution_id, institution_name, currency, big_deal_cost, \
            big_deal_cost_increase, base_year FROM packages WHERE package_id = ?",
        )
        .bind(package_id.as_str())
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Package {
            id: row.try_get::<String, _>("package_id")?.into(),
            institution_id: row.try_get::<String, _>("institution_id")?.into(),
            institution_name: row.try_get("institution_name")?,
            currency: row.try_get("currency")?,
            big_deal_cost: Money(row.try_get("big_deal_cost")?),
            big_deal_cost_increase: row.try_get("big_deal_cost_increase")?,
            base_year: row.try_get("base_year")?,
        }))
    }

    /// Replace all package-specific records for a package
    pub async fn insert_package_data(&self, package_id: &PackageID, data: &PackageData) -> Result<()> {
        data.validate()
            .with_context(|| format!("Invalid data for package {package_id}"))?;
        let mut tx = self.pool().begin().await?;

        for table in [
            "package_usage",
            "package_prices",
            "package_perpetual_access",
            "package_citations",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE package_id = ?"))
                .bind(package_id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        for (issn_l, usage) in &data.usage {
            sqlx::query("INSERT INTO package_usage (package_id, issn_l, usage) VALUES (?, ?, ?)")
                .bind(package_id.as_str())
                .bind(issn_l.as_str())
                .bind(usage.value())
                .execute(&mut *tx)
                .await?;
        }

        for (issn_l, price) in &data.prices {
            sqlx::query("INSERT INTO package_prices (package_id, issn_l, price) VALUES (?, ?, ?)")
                .bind(package_id.as_str())
                .bind(issn_l.as_str())
                .bind(price.value())
                .execute(&mut *tx)
                .await?;
        }

        for (issn_l, ranges) in &data.perpetual_access {
            for range in ranges {
                sqlx::query(
                    "INSERT INTO package_perpetual_access (package_id, issn_l, start_year, end_year) \
                    VALUES (?, ?, ?, ?)",
                )
                .bind(package_id.as_str())
                .bind(issn_l.as_str())
                .bind(range.start)
                .bind(range.end)
                .execute(&mut *tx)
                .await?;
            }
        }

        let issns: std::collections::BTreeSet<&IssnL> =
            data.citations.keys().chain(data.authorships.keys()).collect();
        for issn_l in issns {
            sqlx::query(
                "INSERT INTO package_citations (package_id, issn_l, citations, authorships) \
                VALUES (?, ?, ?, ?)",
            )
            .bind(package_id.as_str())
            .bind(issn_l.as_str())
            .bind(data.citations.get(issn_l).copied().unwrap_or(0.0))
            .bind(data.authorships.get(issn_l).copied().unwrap_or(0.0))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Load the package-specific records for a package.
    ///
    /// A package with no uploaded data gets empty records.
    pub async fn package_data(&self, package_id: &PackageID) -> Result<PackageData> {
        let mut data = PackageData::default();
        let id = package_id.as_str();

        let rows = sqlx::query("SELECT issn_l, usage FROM package_usage WHERE package_id = ?")
            .bind(id)
            .fetch_all(self.pool())
            .await?;
        for row in rows {
            let issn_l: String = row.try_get("issn_l")?;
            data.usage.insert(issn_l.into(), Usage(row.try_get("usage")?));
        }

        let rows = sqlx::query("SELECT issn_l, price FROM package_prices WHERE package_id = ?")
            .bind(id)
            .fetch_all(self.pool())
            .await?;
        for row in rows {
            let issn_l: String = row.try_get("issn_l")?;
            data.prices.insert(issn_l.into(), Money(row.try_get("price")?));
        }

        let rows = sqlx::query(
            "SELECT issn_l, start_year, end_year FROM package_perpetual_access \
            WHERE package_id = ? ORDER BY issn_l, start_year",
        )
        .bind(id)
        .fetch_all(self.pool())
        .await?;
        for row in rows {
            let issn_l: String = row.try_get("issn_l")?;
            let range = YearRange::new(row.try_get("start_year")?, row.try_get("end_year")?)
                .with_context(|| format!("Invalid perpetual access for {issn_l} in {package_id}"))?;
            data.perpetual_access
                .entry(issn_l.into())
                .or_default()
                .push(range);
        }

        let rows = sqlx::query(
            "SELECT issn_l, citations, authorships FROM package_citations WHERE package_id = ?",
        )
        .bind(id)
        .fetch_all(self.pool())
        .await?;
        for row in rows {
            let issn_l: IssnL = row.try_get::<String, _>("issn_l")?.into();
            let citations: f64 = row.try_get("citations")?;
            let authorships: f64 = row.try_get("authorships")?;
            if citations != 0.0 {
                data.citations.insert(issn_l.clone(), citations);
            }
            if authorships != 0.0 {
                data.authorships.insert(issn_l, authorships);
            }
        }

        Ok(data)
    }
}
