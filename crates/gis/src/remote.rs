//! Paginated fetching from a remote feature service.
//!
//! Pages are pulled with numeric offset + page size until the service
//! stops reporting more records, and the whole pull is materialized
//! before anything is written — a cancelled or timed-out fetch leaves
//! no partial state. The optional filter expression is forwarded
//! verbatim; it is never evaluated locally.

use std::time::Duration;

use tracing::debug;

use crate::error::{GisError, Result};
use crate::formats::arcgis::{self, QueryPage};
use crate::formats::ParsedSource;

const DEFAULT_PAGE_SIZE: usize = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct FeatureServiceClient {
    http: reqwest::Client,
    page_size: usize,
}

impl FeatureServiceClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetch every page of a layer query and normalize the result.
    pub async fn fetch(&self, url: &str, filter: Option<&str>) -> Result<ParsedSource> {
        let endpoint = query_endpoint(url);
        let where_clause = filter.unwrap_or("1=1");

        let mut pages: Vec<QueryPage> = Vec::new();
        let mut offset = 0usize;

        loop {
            let offset_param = offset.to_string();
            let count_param = self.page_size.to_string();
            let page: QueryPage = self
                .http
                .get(&endpoint)
                .query(&[
                    ("where", where_clause),
                    ("outFields", "*"),
                    ("outSR", "4326"),
                    ("f", "json"),
                    ("resultOffset", offset_param.as_str()),
                    ("resultRecordCount", count_param.as_str()),
                ])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            if let Some(error) = &page.error {
                return Err(GisError::parse(format!(
                    "feature service error {}: {}",
                    error.code, error.message
                )));
            }

            let fetched = page.features.len();
            debug!(offset, fetched, "fetched feature service page");

            let more = page.exceeded_transfer_limit && fetched > 0;
            pages.push(page);
            if !more {
                break;
            }
            offset += fetched;
        }

        arcgis::assemble(pages)
    }
}

/// Normalize a layer URL into its query endpoint.
fn query_endpoint(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.to_ascii_lowercase().ends_with("/query") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/query")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_endpoint() {
        assert_eq!(
            query_endpoint("https://gis.example.com/FeatureServer/0"),
            "https://gis.example.com/FeatureServer/0/query"
        );
        assert_eq!(
            query_endpoint("https://gis.example.com/FeatureServer/0/query"),
            "https://gis.example.com/FeatureServer/0/query"
        );
        assert_eq!(
            query_endpoint("https://gis.example.com/FeatureServer/0/"),
            "https://gis.example.com/FeatureServer/0/query"
        );
    }
}
