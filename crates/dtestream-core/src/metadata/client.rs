use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::{debug, error, info};

use super::overview::Overview;
use super::{MetadataSource, StreamDescriptor, StreamQuery, API_DATE_FORMAT};
use crate::config::{DatasetProfile, StreamerConfig};
use crate::error::{StreamError, StreamResult};

const OVERVIEW_PATH: &str = "data/overview/";
const START_PARAM: &str = "start_date";
const END_PARAM: &str = "end_date";

/// Blocking HTTP client for the streaming metadata service. One request per call, no retries.
pub struct MetadataClient {
    http: Client,
    api_base: String,
}

impl MetadataClient {
    pub fn new(config: &StreamerConfig) -> StreamResult<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            api_base: config.api_base.clone(),
        })
    }

    /// Fill the profile's path template. Returns the URL and any query parameters
    /// the template had no placeholder for.
    fn metadata_url(
        &self,
        profile: &DatasetProfile,
        query: &StreamQuery,
    ) -> (String, Vec<(&'static str, String)>) {
        let start = query.start.format(API_DATE_FORMAT).to_string();
        let end = query.end.format(API_DATE_FORMAT).to_string();
        let template = profile.metadata_path;

        let mut params = Vec::new();
        if !template.contains("{start}") {
            params.push((START_PARAM, start.clone()));
        }
        if !template.contains("{end}") {
            params.push((END_PARAM, end.clone()));
        }

        let path = template
            .replace("{subset}", &query.subset)
            .replace("{variable}", &query.variable)
            .replace("{start}", &start)
            .replace("{end}", &end);

        (format!("{}{}", self.api_base, path), params)
    }

    fn get_text(&self, url: &str, params: &[(&str, String)], token: &str) -> StreamResult<String> {
        info!(url, ?params, "requesting stream metadata");

        let response = self
            .http
            .get(url)
            .query(params)
            .bearer_auth(token)
            .send()?;
        let status = response.status();
        let body = response.text()?;

        debug!(url, status = status.as_u16(), bytes = body.len(), "metadata response");

        if status.is_success() {
            return Ok(body);
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!(url, status = status.as_u16(), "metadata service rejected token");
            return Err(StreamError::Auth {
                status: status.as_u16(),
            });
        }

        error!(url, status = status.as_u16(), %body, "metadata request failed");
        Err(StreamError::NotFound(format!(
            "API error {}: {}",
            status.as_u16(),
            body.trim()
        )))
    }

    /// List the streams the service offers, grouped by program subset.
    pub fn fetch_overview(&self, token: &str) -> StreamResult<Overview> {
        let url = format!("{}{}", self.api_base, OVERVIEW_PATH);
        let body = self.get_text(&url, &[], token)?;
        Overview::from_json(&body)
    }
}

impl MetadataSource for MetadataClient {
    fn fetch(
        &self,
        profile: &DatasetProfile,
        query: &StreamQuery,
        token: &str,
    ) -> StreamResult<StreamDescriptor> {
        let (url, params) = self.metadata_url(profile, query);
        let body = self.get_text(&url, &params, token)?;
        let descriptor = StreamDescriptor::from_json(&body, profile)?;

        info!(
            frames = descriptor.frames.len(),
            width = descriptor.width,
            height = descriptor.height,
            first = %descriptor.frames[0].timestamp,
            "stream metadata loaded"
        );
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    use chrono::NaiveDate;

    use super::*;
    use crate::config::datasets::{CLIMATE, LEGACY, SENTINEL_3};

    fn query() -> StreamQuery {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        StreamQuery {
            subset: "Climate DT".to_string(),
            variable: "2t".to_string(),
            start: day.and_hms_opt(0, 0, 0).unwrap(),
            end: day.and_hms_opt(6, 30, 0).unwrap(),
        }
    }

    fn client(api_base: &str) -> MetadataClient {
        let config = StreamerConfig {
            api_base: api_base.to_string(),
            ..StreamerConfig::default()
        };
        MetadataClient::new(&config).unwrap()
    }

    /// Serve one canned HTTP response and hand back the request head.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
                head.push_str(&line);
            }
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            tx.send(head).unwrap();
        });
        (format!("http://{addr}/api/streaming/"), rx)
    }

    #[test]
    fn fills_path_placeholders() {
        let c = client("https://host/api/streaming/");
        let (url, params) = c.metadata_url(&CLIMATE, &query());
        assert_eq!(
            url,
            "https://host/api/streaming/data/metadata/Climate DT/2t/20240101T0000/20240101T0630"
        );
        assert!(params.is_empty());
    }

    #[test]
    fn legacy_path_sits_under_metadata_prefix() {
        let c = client("https://host/api/streaming/");
        let (url, params) = c.metadata_url(&LEGACY, &query());
        assert_eq!(
            url,
            "https://host/api/streaming/metadata/data/2t/20240101T0000/20240101T0630"
        );
        assert!(params.is_empty());
    }

    #[test]
    fn moves_time_range_to_query_without_placeholders() {
        let c = client("https://host/api/streaming/");
        let mut q = query();
        q.variable = "europe".to_string();
        let (url, params) = c.metadata_url(&SENTINEL_3, &q);
        assert_eq!(url, "https://host/api/streaming/s3/data/metadata/europe");
        assert_eq!(
            params,
            vec![
                ("start_date", "20240101T0000".to_string()),
                ("end_date", "20240101T0630".to_string()),
            ]
        );
    }

    #[test]
    fn fetch_sends_bearer_token_and_decodes() {
        let (base, head) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"stream_path": "https://cdn/x.mp4", "nx": 2, "ny": 2, "unit": "K",
                "images": [{"img_number": 5, "img_date": "2024-01-01T00:00:00",
                            "img_min_value": 0.0, "img_max_value": 1.0}]}"#,
        );
        let d = client(&base).fetch(&CLIMATE, &query(), "secret").unwrap();
        assert_eq!(d.frames[0].frame_number, 5);
        assert_eq!(d.unit, "K");

        let head = head.recv().unwrap().to_ascii_lowercase();
        assert!(head.contains("authorization: bearer secret"), "{head}");
        assert!(head.starts_with("get /api/streaming/data/metadata/climate%20dt/2t/"), "{head}");
    }

    #[test]
    fn unauthorized_maps_to_auth_error() {
        let (base, _head) = serve_once("HTTP/1.1 401 Unauthorized", r#"{"detail": "expired"}"#);
        let err = client(&base).fetch(&CLIMATE, &query(), "old").unwrap_err();
        assert!(matches!(err, StreamError::Auth { status: 401 }), "got {err:?}");
    }

    #[test]
    fn other_failures_map_to_not_found() {
        let (base, _head) = serve_once("HTTP/1.1 404 Not Found", r#"{"detail": "no such variable"}"#);
        let err = client(&base).fetch(&CLIMATE, &query(), "t").unwrap_err();
        match err {
            StreamError::NotFound(msg) => assert!(msg.contains("404"), "{msg}"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
