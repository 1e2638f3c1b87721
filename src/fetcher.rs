use crate::error::{AppError, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Fetcher {
    client: Client,
    url: String,
}

/// Decoded body of one feed retrieval
#[derive(Debug, Clone)]
pub struct Feed {
    body: String,
}

impl Feed {
    pub fn new(body: String) -> Self {
        Self { body }
    }

    /// Forward-only sequence of the feed's text lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.body.lines()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.body.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl Fetcher {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tawes-bridge/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Single GET of the feed; any failure is returned to the caller, there is no retry
    pub async fn fetch(&self) -> Result<Feed> {
        debug!("Downloading feed from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;

        // Column labels carry `°` and `²`, so decoding must be exact
        let bytes = response.bytes().await?;
        let body = String::from_utf8(bytes.to_vec()).map_err(|e| {
            AppError::InvalidData(format!("Feed at {} is not valid UTF-8: {}", self.url, e))
        })?;
        if body.trim().is_empty() {
            warn!("Feed at {} returned an empty body", self.url);
        }

        let feed = Feed::new(body);
        info!("Downloaded feed: {} bytes, {} lines", feed.len(), feed.lines().count());
        Ok(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_lines_are_split_on_newlines() {
        let feed = Feed::new("Station;Name\r\n11331;Klagenfurt\n".to_string());
        let lines: Vec<&str> = feed.lines().collect();
        assert_eq!(lines, vec!["Station;Name", "11331;Klagenfurt"]);
    }

    #[test]
    fn test_fetcher_construction() {
        let fetcher = Fetcher::new("https://www.zamg.ac.at/ogd/", Duration::from_secs(5));
        assert!(fetcher.is_ok());
    }
}
