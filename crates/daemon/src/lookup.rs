//! HTTP clients for the identity services.
//!
//! Blocking reqwest clients behind the [`CommunityLookup`] and
//! [`MetadataSearch`] traits. The pipeline calls these from
//! `spawn_blocking`, never from an async context. When a service has no
//! configured endpoint the disabled stand-ins keep the chain moving.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::identify::{
    CommunityLookup, IdentityResult, IdentitySource, LookupError, MetadataSearch, SearchCandidate,
};

/// Wire format of a community database entry.
#[derive(Debug, Deserialize)]
struct CommunityEntry {
    title: String,
    year: Option<u16>,
    external_id: Option<String>,
    runtime_secs: Option<u64>,
}

impl From<CommunityEntry> for IdentityResult {
    fn from(entry: CommunityEntry) -> Self {
        IdentityResult {
            title: entry.title,
            year: entry.year,
            external_id: entry.external_id,
            runtime_secs: entry.runtime_secs,
            source: IdentitySource::CommunityDb,
        }
    }
}

/// Wire format of a metadata search hit.
#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    year: Option<u16>,
    external_id: Option<String>,
    runtime_secs: Option<u64>,
}

impl From<SearchHit> for SearchCandidate {
    fn from(hit: SearchHit) -> Self {
        SearchCandidate {
            title: hit.title,
            year: hit.year,
            external_id: hit.external_id,
            runtime_secs: hit.runtime_secs,
        }
    }
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn build_client(timeout: Duration) -> Result<reqwest::blocking::Client, LookupError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LookupError(format!("http client setup failed: {}", e)))
}

/// Fingerprint lookups against a community disc database.
pub struct HttpCommunityClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpCommunityClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LookupError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trim_base(base_url),
        })
    }
}

impl CommunityLookup for HttpCommunityClient {
    fn lookup(&self, fingerprint: &str) -> Result<Option<IdentityResult>, LookupError> {
        let url = format!("{}/discs/{}", self.base_url, fingerprint);
        debug!(%url, "community lookup");

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| LookupError(format!("community lookup failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LookupError(format!(
                "community lookup returned {}",
                response.status()
            )));
        }

        let entry: CommunityEntry = response
            .json()
            .map_err(|e| LookupError(format!("community response malformed: {}", e)))?;
        Ok(Some(entry.into()))
    }
}

/// Title search and cover art against a public metadata service.
pub struct HttpMetadataClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpMetadataClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LookupError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trim_base(base_url),
        })
    }
}

impl MetadataSearch for HttpMetadataClient {
    fn search(
        &self,
        query: &str,
        year_hint: Option<u16>,
    ) -> Result<Vec<SearchCandidate>, LookupError> {
        let url = format!("{}/search", self.base_url);
        debug!(%url, query, "metadata search");

        let mut request = self.client.get(&url).query(&[("query", query)]);
        if let Some(year) = year_hint {
            request = request.query(&[("year", year.to_string())]);
        }

        let response = request
            .send()
            .map_err(|e| LookupError(format!("metadata search failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(LookupError(format!(
                "metadata search returned {}",
                response.status()
            )));
        }

        let hits: Vec<SearchHit> = response
            .json()
            .map_err(|e| LookupError(format!("search response malformed: {}", e)))?;
        Ok(hits.into_iter().map(SearchCandidate::from).collect())
    }

    fn fetch_cover_art(&self, external_id: &str) -> Result<Option<Vec<u8>>, LookupError> {
        let url = format!("{}/covers/{}", self.base_url, external_id);
        debug!(%url, "cover art fetch");

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| LookupError(format!("cover art fetch failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LookupError(format!(
                "cover art fetch returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| LookupError(format!("cover art body unreadable: {}", e)))?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Community lookup with no configured endpoint. Always a miss.
pub struct DisabledLookup;

impl CommunityLookup for DisabledLookup {
    fn lookup(&self, _fingerprint: &str) -> Result<Option<IdentityResult>, LookupError> {
        Ok(None)
    }
}

/// Metadata search with no configured endpoint. No candidates, no art.
pub struct DisabledSearch;

impl MetadataSearch for DisabledSearch {
    fn search(
        &self,
        _query: &str,
        _year_hint: Option<u16>,
    ) -> Result<Vec<SearchCandidate>, LookupError> {
        Ok(Vec::new())
    }

    fn fetch_cover_art(&self, _external_id: &str) -> Result<Option<Vec<u8>>, LookupError> {
        Ok(None)
    }
}
