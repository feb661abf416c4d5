use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{MetricSnapshot, MetricsSource};
use crate::config::Config;
use crate::error::{Error, Result};

// Required sections are typed; optional ones stay loose so that an
// unexpected shape degrades to the default instead of failing the fetch.
#[derive(Deserialize, Debug)]
struct AllDocument {
    cpu: CpuSection,
    mem: PercentSection,
    swap: PercentSection,
    fs: Vec<PercentSection>,
    diskio: Vec<DiskIoEntry>,
    network: NetworkSection,
    #[serde(default)]
    sensors: Option<Value>,
    #[serde(default)]
    gpu: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct CpuSection {
    total: f64,
    #[serde(default)]
    current: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct PercentSection {
    percent: f64,
}

#[derive(Deserialize, Debug)]
struct DiskIoEntry {
    read_bytes: i64,
    write_bytes: i64,
}

#[derive(Deserialize, Debug)]
struct NetworkSection {
    tx: i64,
    rx: i64,
}

/// Parses an `/api/3/all` document into a snapshot.
pub fn parse_snapshot(body: &str) -> Result<MetricSnapshot> {
    let doc: AllDocument = serde_json::from_str(body)
        .map_err(|e| Error::MalformedSnapshot { reason: e.to_string() })?;

    let fs = doc.fs.first().ok_or_else(|| Error::MalformedSnapshot {
        reason: "no filesystem entries".to_string(),
    })?;
    let diskio = doc.diskio.first().ok_or_else(|| Error::MalformedSnapshot {
        reason: "no disk I/O entries".to_string(),
    })?;

    Ok(MetricSnapshot {
        cpu_total: doc.cpu.total,
        memory_percent: doc.mem.percent,
        swap_percent: doc.swap.percent,
        disk_usage: fs.percent,
        disk_io_read: diskio.read_bytes,
        disk_io_write: diskio.write_bytes,
        network_tx: doc.network.tx,
        network_rx: doc.network.rx,
        cpu_temp: cpu_temperature(doc.sensors.as_ref()),
        gpu_usage: doc
            .gpu
            .as_ref()
            .and_then(|gpu| gpu.get("gpu_util"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        cpu_freq: doc.cpu.current.as_ref().and_then(as_integer).unwrap_or(0),
    })
}

/// Value of the first sensor labelled like a CPU. Only that sensor is
/// consulted: a null reading there yields 0.0 even if a later CPU sensor
/// has a value.
fn cpu_temperature(sensors: Option<&Value>) -> f64 {
    sensors
        .and_then(Value::as_array)
        .and_then(|sensors| {
            sensors.iter().find(|sensor| {
                sensor
                    .get("label")
                    .and_then(Value::as_str)
                    .is_some_and(|label| label.to_lowercase().contains("cpu"))
            })
        })
        .and_then(|sensor| sensor.get("value"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

pub struct GlancesSource {
    client: Client,
    url: String,
}

impl GlancesSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| Error::SourceUnavailable { endpoint: url.clone(), source })?;
        Ok(GlancesSource { client, url })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.source_url.clone(), config.request_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn unavailable(&self, source: reqwest::Error) -> Error {
        Error::SourceUnavailable { endpoint: self.url.clone(), source }
    }
}

#[async_trait]
impl MetricsSource for GlancesSource {
    fn name(&self) -> &str {
        "glances"
    }

    async fn fetch(&self) -> Result<MetricSnapshot> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| self.unavailable(e))?;
        let body = response.text().await.map_err(|e| self.unavailable(e))?;
        debug!(endpoint = %self.url, bytes = body.len(), "Received metrics document");

        parse_snapshot(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MINIMAL: &str = r#"{"cpu":{"total":12.5,"current":2400},"mem":{"percent":40.0},"swap":{"percent":5.0},"fs":[{"percent":70.0}],"diskio":[{"read_bytes":1000,"write_bytes":2000}],"network":{"tx":500,"rx":600}}"#;

    fn full_document() -> Value {
        json!({
            "cpu": {"total": 33.3, "current": 3100},
            "mem": {"percent": 61.2},
            "swap": {"percent": 0.0},
            "fs": [
                {"mnt_point": "/", "percent": 48.5},
                {"mnt_point": "/boot", "percent": 12.0}
            ],
            "diskio": [
                {"disk_name": "nvme0n1", "read_bytes": 734003200, "write_bytes": 1048576},
                {"disk_name": "sda", "read_bytes": 1, "write_bytes": 2}
            ],
            "network": {"tx": 123456, "rx": 654321},
            "sensors": [
                {"label": "acpitz 1", "value": 27.8},
                {"label": "CPU Package", "value": 54.0},
                {"label": "cpu core 0", "value": 51.0}
            ],
            "gpu": {"gpu_util": 17.5}
        })
    }

    #[test]
    fn test_parse_minimal_document_applies_defaults() {
        let snapshot = parse_snapshot(MINIMAL).unwrap();
        assert_eq!(
            snapshot,
            MetricSnapshot {
                cpu_total: 12.5,
                memory_percent: 40.0,
                swap_percent: 5.0,
                disk_usage: 70.0,
                disk_io_read: 1000,
                disk_io_write: 2000,
                network_tx: 500,
                network_rx: 600,
                cpu_temp: 0.0,
                gpu_usage: 0.0,
                cpu_freq: 2400,
            }
        );
    }

    #[test]
    fn test_parse_uses_first_entries_and_optional_sections() {
        let snapshot = parse_snapshot(&full_document().to_string()).unwrap();
        assert_eq!(snapshot.disk_usage, 48.5);
        assert_eq!(snapshot.disk_io_read, 734003200);
        assert_eq!(snapshot.disk_io_write, 1048576);
        assert_eq!(snapshot.cpu_temp, 54.0);
        assert_eq!(snapshot.gpu_usage, 17.5);
        assert_eq!(snapshot.cpu_freq, 3100);
    }

    #[test]
    fn test_cpu_temperature_only_consults_first_cpu_sensor() {
        let mut doc = full_document();
        doc["sensors"] = json!([
            {"label": "Package id 0", "value": 60.0},
            {"label": "cpu_thermal", "value": null},
            {"label": "CPU", "value": 45.0}
        ]);
        let snapshot = parse_snapshot(&doc.to_string()).unwrap();
        assert_eq!(snapshot.cpu_temp, 0.0);
    }

    #[test]
    fn test_cpu_temperature_without_matching_sensor() {
        let mut doc = full_document();
        doc["sensors"] = json!([{"label": "acpitz", "value": 30.0}, {"value": 99.0}]);
        assert_eq!(parse_snapshot(&doc.to_string()).unwrap().cpu_temp, 0.0);
    }

    #[test]
    fn test_missing_cpu_current_and_gpu_util_default() {
        let mut doc = full_document();
        doc["cpu"] = json!({"total": 5.0});
        doc["gpu"] = json!({"name": "integrated"});
        let snapshot = parse_snapshot(&doc.to_string()).unwrap();
        assert_eq!(snapshot.cpu_freq, 0);
        assert_eq!(snapshot.gpu_usage, 0.0);
    }

    #[test]
    fn test_fractional_cpu_frequency_is_truncated() {
        let mut doc = full_document();
        doc["cpu"]["current"] = json!(2399.9);
        assert_eq!(parse_snapshot(&doc.to_string()).unwrap().cpu_freq, 2399);
    }

    #[test]
    fn test_missing_required_sections_fail() {
        for section in ["cpu", "mem", "swap", "fs", "diskio", "network"] {
            let mut doc = full_document();
            doc.as_object_mut().unwrap().remove(section);
            let err = parse_snapshot(&doc.to_string()).unwrap_err();
            assert!(matches!(err, Error::MalformedSnapshot { .. }), "section {section}");
        }
    }

    #[test]
    fn test_empty_filesystem_and_diskio_lists_fail() {
        let mut doc = full_document();
        doc["fs"] = json!([]);
        let err = parse_snapshot(&doc.to_string()).unwrap_err();
        assert!(err.to_string().contains("filesystem"));

        let mut doc = full_document();
        doc["diskio"] = json!([]);
        let err = parse_snapshot(&doc.to_string()).unwrap_err();
        assert!(err.to_string().contains("disk I/O"));
    }

    #[test]
    fn test_wrongly_typed_required_field_fails() {
        let mut doc = full_document();
        doc["mem"]["percent"] = json!("high");
        assert!(matches!(
            parse_snapshot(&doc.to_string()),
            Err(Error::MalformedSnapshot { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_from_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/3/all")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(MINIMAL)
            .create_async()
            .await;

        let source =
            GlancesSource::new(format!("{}/api/3/all", server.url()), Duration::from_secs(5))
                .unwrap();
        let snapshot = source.fetch().await.unwrap();

        mock.assert_async().await;
        assert_eq!(snapshot.cpu_total, 12.5);
        assert_eq!(snapshot.network_rx, 600);
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/3/all")
            .with_status(503)
            .create_async()
            .await;

        let source =
            GlancesSource::new(format!("{}/api/3/all", server.url()), Duration::from_secs(5))
                .unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_fetch_non_json_body_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/3/all")
            .with_status(200)
            .with_body("<html>glances is starting</html>")
            .create_async()
            .await;

        let source =
            GlancesSource::new(format!("{}/api/3/all", server.url()), Duration::from_secs(5))
                .unwrap();
        assert!(matches!(source.fetch().await, Err(Error::MalformedSnapshot { .. })));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source =
            GlancesSource::new(format!("http://{addr}/api/3/all"), Duration::from_secs(5)).unwrap();
        assert!(matches!(source.fetch().await, Err(Error::SourceUnavailable { .. })));
    }
}
