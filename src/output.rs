//! The module responsible for writing scenario and consortium tables to disk.
use crate::allocation::ChannelUsage;
use crate::consortium::Consortium;
use crate::consortium::blend::ConsortiumJournal;
use crate::id::PackageID;
use crate::scenario::{JournalRow, Scenario};
use crate::year::calendar_year;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};

/// The root folder in which per-package output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "journal_scenarios_results";

/// The output file name for the journal table
const JOURNALS_FILE_NAME: &str = "journals.csv";

/// The output file name for usage by projection year
const USAGE_BY_YEAR_FILE_NAME: &str = "usage_by_year.csv";

/// The output file name for the scenario summary
const SUMMARY_FILE_NAME: &str = "summary.csv";

/// The output file name for blended consortium journals
const CONSORTIUM_JOURNALS_FILE_NAME: &str = "consortium_journals.csv";

/// The output file name for the consortium summary
const CONSORTIUM_SUMMARY_FILE_NAME: &str = "consortium_summary.csv";

/// The output file name for members left out of a consortium
const CONSORTIUM_FAILURES_FILE_NAME: &str = "consortium_failures.csv";

/// The default output folder for the named package or consortium
pub fn get_output_dir(name: &str) -> Result<PathBuf> {
    let name = name.trim();
    anyhow::ensure!(
        !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != "..",
        "Invalid name for output directory: {name:?}"
    );

    Ok([OUTPUT_DIRECTORY_ROOT, name].iter().collect())
}

/// Create a new output directory, with parents, if it doesn't exist yet
pub fn create_output_directory(output_dir: &Path) -> Result<()> {
    if output_dir.is_dir() {
        // already exists
        return Ok(());
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Could not create output directory {}", output_dir.display()))?;

    Ok(())
}

/// Usage by channel, flattened into CSV columns
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct UsageColumns {
    usage_total: f64,
    usage_oa_plus_social_networks: f64,
    usage_backfile: f64,
    usage_subscription: f64,
    usage_ill: f64,
    usage_other_delayed: f64,
}

impl From<&ChannelUsage> for UsageColumns {
    fn from(usage: &ChannelUsage) -> Self {
        Self {
            usage_total: usage.total.value(),
            usage_oa_plus_social_networks: usage.oa_plus_social_networks.value(),
            usage_backfile: usage.backfile.value(),
            usage_subscription: usage.subscription.value(),
            usage_ill: usage.ill.value(),
            usage_other_delayed: usage.other_delayed.value(),
        }
    }
}

/// Represents a row in the journals CSV file.
///
/// Undefined cost-per-use metrics are written as empty fields.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct JournalCsvRow {
    issn_l: String,
    title: String,
    subject: Option<String>,
    publisher: Option<String>,
    is_society_journal: bool,
    subscription: String,
    paywalled_usage: f64,
    ill_usage_unsubscribed: f64,
    cost_subscription: Option<f64>,
    cost_ill: f64,
    cost_actual: f64,
    ncppu: Option<f64>,
    cost_per_use: Option<f64>,
}

impl From<&JournalRow> for JournalCsvRow {
    fn from(row: &JournalRow) -> Self {
        Self {
            issn_l: row.issn_l.to_string(),
            title: row.title.clone(),
            subject: row.subject.clone(),
            publisher: row.publisher.clone(),
            is_society_journal: row.is_society_journal,
            subscription: row.subscription.to_string(),
            paywalled_usage: row.paywalled_usage.value(),
            ill_usage_unsubscribed: row.ill_usage_unsubscribed.value(),
            cost_subscription: row.cost_subscription.map(|cost| cost.value()),
            cost_ill: row.cost_ill.value(),
            cost_actual: row.cost_actual.value(),
            ncppu: row.ncppu.value().map(|value| value.value()),
            cost_per_use: row.cost_per_use.value().map(|value| value.value()),
        }
    }
}

/// Represents a row in the usage by year CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct UsageByYearRow {
    year: u32,
}

/// Represents the single row of the scenario summary CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct SummaryRow {
    package_id: PackageID,
    num_journals: usize,
    num_subscribed: usize,
    num_custom: usize,
    cost_total: f64,
    cost_subscriptions: f64,
    cost_ill: f64,
    cost_bigdeal_projected: f64,
    cost_percent: Option<f64>,
    instant_usage_percent: Option<f64>,
}

/// Write the journal table, usage by year and summary for a scenario
pub fn write_scenario(output_dir: &Path, scenario: &Scenario) -> Result<()> {
    let new_writer = |file_name: &str| csv::Writer::from_path(output_dir.join(file_name));

    let mut journals_writer = new_writer(JOURNALS_FILE_NAME)?;
    for row in scenario.ranked_by_cost_efficiency() {
        journals_writer.serialize((JournalCsvRow::from(&row), UsageColumns::from(&row.usage)))?;
    }
    journals_writer.flush()?;

    let summary = scenario.summary();
    let mut usage_writer = new_writer(USAGE_BY_YEAR_FILE_NAME)?;
    for (year_index, usage) in summary.usage_by_year.iter().enumerate() {
        let year = calendar_year(scenario.package.base_year, year_index);
        usage_writer.serialize((UsageByYearRow { year }, UsageColumns::from(usage)))?;
    }
    usage_writer.flush()?;

    let row = SummaryRow {
        package_id: summary.package_id.clone(),
        num_journals: summary.num_journals,
        num_subscribed: summary.num_subscribed,
        num_custom: summary.num_custom,
        cost_total: summary.cost_total.value(),
        cost_subscriptions: summary.cost_subscriptions.value(),
        cost_ill: summary.cost_ill.value(),
        cost_bigdeal_projected: summary.cost_bigdeal_projected.value(),
        cost_percent: summary.cost_percent,
        instant_usage_percent: summary.instant_usage_percent,
    };
    let mut summary_writer = new_writer(SUMMARY_FILE_NAME)?;
    summary_writer.serialize((row, UsageColumns::from(&summary.usage)))?;
    summary_writer.flush()?;

    Ok(())
}

/// Represents a row in the consortium journals CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ConsortiumJournalCsvRow {
    issn_l: String,
    title: String,
    subscribed: bool,
    num_members: usize,
    institutions: String,
    ill_usage_unsubscribed: f64,
    cost_subscription: Option<f64>,
    cost_ill: f64,
    cost_actual: f64,
    ncppu: Option<f64>,
}

impl From<&ConsortiumJournal> for ConsortiumJournalCsvRow {
    fn from(journal: &ConsortiumJournal) -> Self {
        Self {
            issn_l: journal.issn_l.to_string(),
            title: journal.title.clone(),
            subscribed: journal.subscribed,
            num_members: journal.package_ids.len(),
            institutions: journal.institution_names.join("; "),
            ill_usage_unsubscribed: journal.ill_usage_unsubscribed.value(),
            cost_subscription: journal.cost_subscription.map(|cost| cost.value()),
            cost_ill: journal.cost_ill.value(),
            cost_actual: journal.cost_actual().value(),
            ncppu: journal.ncppu.value().map(|value| value.value()),
        }
    }
}

/// Represents the single row of the consortium summary CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ConsortiumSummaryRow {
    scenario_id: String,
    num_members: usize,
    num_succeeded: usize,
    num_failed: usize,
    num_journals: usize,
    num_subscribed: usize,
    cost_total: f64,
    cost_subscriptions: f64,
    cost_ill: f64,
    instant_usage_percent: Option<f64>,
}

/// Represents a row in the consortium failures CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct FailureRow {
    package_id: String,
    status: Option<u16>,
    message: String,
}

/// Write the blended journal table, summary and failed members for a consortium
pub fn write_consortium(output_dir: &Path, consortium: &Consortium) -> Result<()> {
    let new_writer = |file_name: &str| csv::Writer::from_path(output_dir.join(file_name));

    let mut journals_writer = new_writer(CONSORTIUM_JOURNALS_FILE_NAME)?;
    for journal in consortium.ranked_by_cost_efficiency() {
        journals_writer.serialize((
            ConsortiumJournalCsvRow::from(journal),
            UsageColumns::from(&journal.usage),
        ))?;
    }
    journals_writer.flush()?;

    let summary = consortium.summary();
    let row = ConsortiumSummaryRow {
        scenario_id: summary.scenario_id.to_string(),
        num_members: summary.num_members,
        num_succeeded: summary.succeeded.len(),
        num_failed: summary.failures.len(),
        num_journals: summary.num_journals,
        num_subscribed: summary.num_subscribed,
        cost_total: summary.cost_total.value(),
        cost_subscriptions: summary.cost_subscriptions.value(),
        cost_ill: summary.cost_ill.value(),
        instant_usage_percent: summary.instant_usage_percent,
    };
    let mut summary_writer = new_writer(CONSORTIUM_SUMMARY_FILE_NAME)?;
    summary_writer.serialize((row, UsageColumns::from(&summary.usage)))?;
    summary_writer.flush()?;

    let mut failures_writer = new_writer(CONSORTIUM_FAILURES_FILE_NAME)?;
    for failure in consortium.failures() {
        failures_writer.serialize(FailureRow {
            package_id: failure.package_id.to_string(),
            status: failure.status,
            message: failure.message.clone(),
        })?;
    }
    failures_writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::scenario;
    use rstest::rstest;
    use tempfile::tempdir;

    /// Read back the records of a journals-style file, ignoring the usage columns
    fn read_issns(path: &Path) -> Vec<String> {
        csv::Reader::from_path(path)
            .unwrap()
            .records()
            .map(|record| record.unwrap()[0].to_string())
            .collect()
    }

    #[test]
    fn test_get_output_dir() {
        assert_eq!(
            get_output_dir("package1").unwrap(),
            PathBuf::from(OUTPUT_DIRECTORY_ROOT).join("package1")
        );
        assert!(get_output_dir("").is_err());
        assert!(get_output_dir("../elsewhere").is_err());
    }

    #[test]
    fn test_create_output_directory() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("a").join("b");
        create_output_directory(&output_dir).unwrap();
        assert!(output_dir.is_dir());

        // Second call is a no-op
        create_output_directory(&output_dir).unwrap();
    }

    #[rstest]
    fn test_write_scenario(scenario: Scenario) {
        let dir = tempdir().unwrap();
        write_scenario(dir.path(), &scenario).unwrap();

        let issns = read_issns(&dir.path().join(JOURNALS_FILE_NAME));
        assert_eq!(issns.len(), scenario.journals().count());

        let years = csv::Reader::from_path(dir.path().join(USAGE_BY_YEAR_FILE_NAME))
            .unwrap()
            .records()
            .count();
        assert_eq!(years, crate::year::NUM_PROJECTION_YEARS);

        let mut reader = csv::Reader::from_path(dir.path().join(SUMMARY_FILE_NAME)).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "package_id");
        assert!(headers.iter().any(|header| header == "usage_total"));
        let records: Vec<_> = reader.records().map(|record| record.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][0], "package1");
        assert_eq!(
            records[0][1].parse::<usize>().unwrap(),
            scenario.summary().num_journals
        );
    }

    #[rstest]
    fn test_journal_row_undefined_ncppu_is_empty(scenario: Scenario) {
        let mut row = scenario.member_rows().remove(0);
        row.ncppu = crate::finance::CostPerUse::UNDEFINED;
        let csv_row = JournalCsvRow::from(&row);
        assert_eq!(csv_row.ncppu, None);

        let mut writer = csv::Writer::from_writer(vec![]);
        writer.serialize(&csv_row).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let data_line = text.lines().nth(1).unwrap();
        assert!(data_line.contains(",,") || data_line.ends_with(','));
    }
}
