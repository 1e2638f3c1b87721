use crate::config::{Config, SchedulerConfig};
use crate::error::Result;
use crate::fetcher::{Feed, Fetcher};
use crate::mapper::{RecordMapper, ScanStats};
use crate::models::{FieldTable, Snapshot};
use crate::mqtt::{
    coerce_number, discovery_messages, state_message, MqttPublisher, OutboundMessage,
};
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rows_scanned: usize,
    pub station_found: bool,
    pub snapshot_fields: usize,
    pub discovery_messages: usize,
    pub state_fields: usize,
}

pub struct Scheduler {
    config: Config,
    table: FieldTable,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(config: Config, shutdown_rx: watch::Receiver<bool>) -> Self {
        let table = config.field_table();
        Self {
            config,
            table,
            shutdown_rx,
        }
    }

    /// Run once, or repeatedly when a schedule is configured.
    ///
    /// A single run propagates its error. Under a schedule, failed runs are
    /// logged and the next tick proceeds.
    pub async fn run(&mut self) -> Result<()> {
        match self.config.scheduler.clone() {
            None => {
                self.run_once().await?;
                Ok(())
            }
            Some(schedule) => self.run_periodic(&schedule).await,
        }
    }

    async fn run_periodic(&mut self, schedule: &SchedulerConfig) -> Result<()> {
        let initial_delay = Duration::from_secs(schedule.initial_delay_seconds);
        let poll_interval = Duration::from_secs(schedule.interval_minutes * 60);

        info!(
            "Scheduler starting with {}s initial delay, {}m interval",
            schedule.initial_delay_seconds, schedule.interval_minutes
        );

        self.run_every(initial_delay, poll_interval).await
    }

    /// Wait `initial_delay`, run, then run every `period` until shutdown
    async fn run_every(&mut self, initial_delay: Duration, period: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(initial_delay) => {},
            _ = self.shutdown_rx.changed() => {
                info!("Shutdown received during initial delay");
                return Ok(());
            }
        }

        // Run immediately, then on interval
        if let Err(e) = self.run_once().await {
            error!("Bridge run error: {}", e);
        }

        let mut ticker = interval(period);
        ticker.tick().await; // First tick is immediate, skip it

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Bridge run error: {}", e);
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Fetch, map, connect, publish discovery then state, disconnect
    pub async fn run_once(&self) -> Result<RunSummary> {
        info!("Starting bridge run for station {}", self.config.feed.station_id);

        let feed = self.fetch_feed().await?;
        let (snapshot, stats) = self.map_snapshot(&feed)?;
        let messages = self.build_messages(&snapshot)?;

        let summary = summarize(&snapshot, &stats, &messages);

        let mut publisher = MqttPublisher::connect(&self.config.mqtt, messages.len()).await?;

        // Always close the connection, even if a publish failed
        let published = publisher.publish_all(&messages).await;
        let closed = publisher.disconnect().await;
        published?;
        closed?;

        info!(
            "Bridge run completed: {} discovery messages, {} state values",
            summary.discovery_messages, summary.state_fields
        );
        Ok(summary)
    }

    pub async fn fetch_feed(&self) -> Result<Feed> {
        let fetcher = Fetcher::new(
            &self.config.feed.url,
            Duration::from_secs(self.config.feed.timeout_seconds),
        )?;
        fetcher.fetch().await
    }

    pub fn map_snapshot(&self, feed: &Feed) -> Result<(Snapshot, ScanStats)> {
        let (snapshot, stats) = RecordMapper::map_station(
            feed.as_bytes(),
            &self.config.feed.station_column,
            &self.config.feed.station_id,
            &self.table,
        )?;

        if stats.matches > 0 && snapshot.is_empty() {
            warn!(
                "Station {} found but none of its columns matched the field table",
                self.config.feed.station_id
            );
        }

        Ok((snapshot, stats))
    }

    /// Discovery messages in field table order, followed by the state message
    pub fn build_messages(&self, snapshot: &Snapshot) -> Result<Vec<OutboundMessage>> {
        let mut messages = discovery_messages(&self.config.mqtt, &self.table)?;
        messages.push(state_message(&self.config.mqtt, snapshot)?);
        Ok(messages)
    }
}

fn summarize(snapshot: &Snapshot, stats: &ScanStats, messages: &[OutboundMessage]) -> RunSummary {
    let state_fields = snapshot
        .iter()
        .filter(|(_, raw)| coerce_number(raw).is_some())
        .count();

    RunSummary {
        rows_scanned: stats.rows,
        station_found: stats.matches > 0,
        snapshot_fields: snapshot.len(),
        // every message but the trailing state message
        discovery_messages: messages.len().saturating_sub(1),
        state_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn unavailable_feed() -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;
        mock_server
    }

    fn scheduled_config(feed_url: String, initial_delay_seconds: u64) -> Config {
        Config {
            feed: FeedConfig {
                url: feed_url,
                timeout_seconds: 5,
                ..FeedConfig::default()
            },
            scheduler: Some(SchedulerConfig {
                interval_minutes: 60,
                initial_delay_seconds,
            }),
            ..Config::default()
        }
    }

    fn scheduler(config: Config) -> Scheduler {
        let (_tx, rx) = watch::channel(false);
        Scheduler::new(config, rx)
    }

    #[test]
    fn test_build_messages_discovery_then_state() {
        let scheduler = scheduler(Config::default());
        let mut snapshot = Snapshot::new();
        snapshot.insert("temperature", "15,4");

        let messages = scheduler.build_messages(&snapshot).unwrap();

        assert_eq!(messages.len(), 10);
        assert_eq!(
            messages[0].topic,
            "homeassistant/sensor/tawes/tawes_weather_temperature/config"
        );
        assert_eq!(messages[9].topic, "homeassistant/sensor/tawes/state");
        assert_eq!(messages[9].payload, r#"{"tawes_weather_temperature":15.4}"#);
    }

    #[test]
    fn test_map_snapshot_from_feed() {
        let scheduler = scheduler(Config::default());
        let feed = Feed::new("Station;Name;T °C;RF %\n11331;Klagenfurt;15,4;81\n".to_string());

        let (snapshot, stats) = scheduler.map_snapshot(&feed).unwrap();

        assert_eq!(stats.matches, 1);
        assert_eq!(snapshot.get("temperature"), Some("15,4"));
        assert_eq!(snapshot.get("humidity"), Some("81"));
        assert_eq!(snapshot.get("name"), None);
    }

    #[test]
    fn test_summarize_counts_numeric_fields() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("temperature", "15,4");
        snapshot.insert("sunshine", "n/a");
        let stats = ScanStats { rows: 3, matches: 1 };
        let scheduler = scheduler(Config::default());
        let messages = scheduler.build_messages(&snapshot).unwrap();

        let summary = summarize(&snapshot, &stats, &messages);

        assert_eq!(
            summary,
            RunSummary {
                rows_scanned: 3,
                station_found: true,
                snapshot_fields: 2,
                discovery_messages: 9,
                state_fields: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_during_initial_delay() {
        let mock_server = unavailable_feed().await;
        let (tx, rx) = watch::channel(false);
        let mut scheduler = Scheduler::new(scheduled_config(mock_server.uri(), 3600), rx);

        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };

        let (result, _) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(scheduler.run(), stop)
        })
        .await
        .expect("scheduler did not stop");

        assert!(result.is_ok());
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_runs_do_not_stop_the_schedule() {
        let mock_server = unavailable_feed().await;
        let (tx, rx) = watch::channel(false);
        let mut scheduler = Scheduler::new(scheduled_config(mock_server.uri(), 0), rx);

        let stop = async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            tx.send(true).unwrap();
        };

        let (result, _) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                scheduler.run_every(Duration::ZERO, Duration::from_millis(100)),
                stop
            )
        })
        .await
        .expect("scheduler did not stop");

        // Every run hit the 503, and the loop kept ticking until shutdown
        assert!(result.is_ok());
        let requests = mock_server.received_requests().await.unwrap();
        assert!(requests.len() >= 2, "only {} runs", requests.len());
    }

    #[tokio::test]
    async fn test_single_run_propagates_feed_error() {
        let mock_server = unavailable_feed().await;
        let config = Config {
            scheduler: None,
            ..scheduled_config(mock_server.uri(), 0)
        };
        let (_tx, rx) = watch::channel(false);
        let mut scheduler = Scheduler::new(config, rx);

        assert!(scheduler.run().await.is_err());
    }
}
