//! Fetching member scenarios concurrently.
//!
//! Members are fetched through a bounded pool of concurrent requests. A member which fails or
//! times out is recorded and excluded; it never aborts the others. There are no retries here:
//! re-running the recompute is the retry.
use super::ConsortiumMember;
use crate::cache::ReferenceCache;
use crate::id::PackageID;
use crate::scenario::{JournalRow, load_scenario};
use crate::store::Store;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a member's journal rows couldn't be fetched
#[derive(Debug, Error)]
pub enum MemberFetchError {
    /// The endpoint answered with a non-success status
    #[error("member endpoint returned status {0}")]
    Status(u16),
    /// No answer within the time limit
    #[error("timed out")]
    Timeout,
    /// The request couldn't be sent or the connection failed
    #[error("transport error: {0}")]
    Transport(String),
    /// The response body wasn't valid
    #[error("invalid response: {0}")]
    Decode(String),
    /// Computing the member's scenario locally failed
    #[error("{0}")]
    Local(String),
}

impl MemberFetchError {
    /// The status code, for errors which have one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(status) => Some(*status),
            _ => None,
        }
    }
}

/// Somewhere member journal rows can be fetched from
#[async_trait]
pub trait MemberSource: Send + Sync {
    /// Fetch the current journal rows for one member
    async fn fetch_member(&self, member: &ConsortiumMember) -> Result<Vec<JournalRow>, MemberFetchError>;
}

/// The body returned by a member's journals endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct MemberJournals {
    /// The member's journal rows
    pub journals: Vec<JournalRow>,
}

/// Fetches members from their HTTP journals endpoint
#[derive(Debug, Clone)]
pub struct HttpMemberSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMemberSource {
    /// A source for the endpoint rooted at `base_url`
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// The URL of a member's journals endpoint
    pub fn member_url(&self, package_id: &PackageID) -> String {
        format!("{}/package/{package_id}/journals", self.base_url)
    }
}

#[async_trait]
impl MemberSource for HttpMemberSource {
    async fn fetch_member(&self, member: &ConsortiumMember) -> Result<Vec<JournalRow>, MemberFetchError> {
        let mut request = self.client.get(self.member_url(&member.package_id));
        if let Some(scenario_id) = &member.scenario_id {
            request = request.query(&[("scenario_id", scenario_id.as_str())]);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                MemberFetchError::Timeout
            } else {
                MemberFetchError::Transport(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MemberFetchError::Status(status.as_u16()));
        }

        let body: MemberJournals = response
            .json()
            .await
            .map_err(|err| MemberFetchError::Decode(err.to_string()))?;

        Ok(body.journals)
    }
}

/// Computes member scenarios in-process from the primary store
#[derive(Debug, Clone)]
pub struct StoreMemberSource {
    store: Store,
    cache: Arc<ReferenceCache>,
}

impl StoreMemberSource {
    /// A source reading from `store` through `cache`
    pub fn new(store: Store, cache: Arc<ReferenceCache>) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl MemberSource for StoreMemberSource {
    async fn fetch_member(&self, member: &ConsortiumMember) -> Result<Vec<JournalRow>, MemberFetchError> {
        let scenario = load_scenario(
            &self.store,
            &self.cache,
            &member.package_id,
            member.scenario_id.as_ref(),
            None,
        )
        .await
        .map_err(|err| MemberFetchError::Local(format!("{err:#}")))?;

        Ok(scenario.member_rows())
    }
}

/// A member which couldn't be included
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFailure {
    /// The member's package
    pub package_id: PackageID,
    /// The HTTP status, if the member answered at all
    pub status: Option<u16>,
    /// What went wrong
    pub message: String,
}

/// The combined result of fetching every member
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    /// Journal rows from every member which succeeded
    pub rows: Vec<JournalRow>,
    /// Members which succeeded, in package order
    pub succeeded: Vec<PackageID>,
    /// Members which failed, in package order
    pub failures: Vec<MemberFailure>,
}

/// Fetch every member with at most `workers` requests in flight, each limited to `timeout`
pub async fn fan_out(
    source: &dyn MemberSource,
    members: &[ConsortiumMember],
    workers: usize,
    timeout: Duration,
) -> FanOutReport {
    let results: Vec<_> = stream::iter(members)
        .map(|member| async move {
            let result = tokio::time::timeout(timeout, source.fetch_member(member))
                .await
                .unwrap_or(Err(MemberFetchError::Timeout));
            (member, result)
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    let mut report = FanOutReport::default();
    for (member, result) in results {
        match result {
            Ok(rows) => {
                report.rows.extend(rows);
                report.succeeded.push(member.package_id.clone());
            }
            Err(err) => {
                warn!("Could not fetch consortium member {}: {err}", member.package_id);
                report.failures.push(MemberFailure {
                    package_id: member.package_id.clone(),
                    status: err.status(),
                    message: err.to_string(),
                });
            }
        }
    }

    // Completion order is arbitrary
    report.succeeded.sort();
    report.failures.sort_by(|a, b| a.package_id.cmp(&b.package_id));
    report
        .rows
        .sort_by(|a, b| (&a.issn_l, &a.package_id).cmp(&(&b.issn_l, &b.package_id)));
    info!(
        "Fetched {} of {} consortium members",
        report.succeeded.len(),
        members.len()
    );

    report
}
