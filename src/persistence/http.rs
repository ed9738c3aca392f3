use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;

use super::{AnnotationRecord, AnnotationStore, HiddenMark, NewAnnotation};
use crate::error::PersistenceError;

const TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HIDDEN_PATH: &str = "/service/list-hidden-annotation.json";

/// Client for the QC web service endpoints.
pub struct HttpStore {
    client: Client,
    base_url: String,
    hidden_path: String,
}

#[derive(Deserialize)]
struct AnnotationList {
    #[serde(rename = "quameterannotation", default)]
    annotations: Vec<AnnotationRecord>,
}

#[derive(Deserialize)]
struct HiddenList {
    #[serde(rename = "quameterhidden", alias = "quameterannotation", default)]
    hidden: Vec<HiddenMark>,
}

impl HttpStore {
    pub fn new(base_url: &str) -> Result<Self, PersistenceError> {
        let client = Client::builder().timeout(TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            hidden_path: DEFAULT_HIDDEN_PATH.to_string(),
        }
    }

    /// Where the hidden-result list is served. Services without that
    /// endpoint answer 404, which reads as "nothing hidden".
    pub fn with_hidden_path(mut self, path: &str) -> Self {
        self.hidden_path = format!("/{}", path.trim_start_matches('/'));
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(response: Response) -> Result<Response, PersistenceError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(PersistenceError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            })
        }
    }
}

impl AnnotationStore for HttpStore {
    fn hide(&self, result_id: i64, reason: &str) -> Result<(), PersistenceError> {
        let url = self.url(&format!("/service/quameter-hide/{result_id}"));
        let response = self.client.post(url).form(&[("reason", reason)]).send()?;
        Self::check(response)?;
        Ok(())
    }

    fn add_annotation(&self, annotation: &NewAnnotation) -> Result<(), PersistenceError> {
        let result_id = annotation.result_id.to_string();
        let form = [
            ("metricCode", annotation.metric_code.as_str()),
            ("dbId", result_id.as_str()),
            ("text", annotation.text.as_str()),
        ];
        let response = self
            .client
            .post(self.url("/service/new-annotation"))
            .form(&form)
            .send()?;
        Self::check(response)?;
        Ok(())
    }

    fn list_annotations(&self) -> Result<Vec<AnnotationRecord>, PersistenceError> {
        let response = self.client.get(self.url("/service/list-annotation.json")).send()?;
        let list: AnnotationList = Self::check(response)?.json()?;
        Ok(list.annotations)
    }

    fn list_hidden(&self) -> Result<Vec<HiddenMark>, PersistenceError> {
        let response = self.client.get(self.url(&self.hidden_path)).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            log::info!("{} not served; no hidden results", response.url());
            return Ok(Vec::new());
        }
        let list: HiddenList = Self::check(response)?.json()?;
        Ok(list.hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let store = HttpStore::new("http://swift:8080/").unwrap();
        assert_eq!(
            store.url("/service/new-annotation"),
            "http://swift:8080/service/new-annotation"
        );
    }

    /// Answer one request on a local port with `status` and `body`; the
    /// handle yields the request line.
    fn serve_once(status: &str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).lines().next().unwrap_or_default().to_string()
        });
        (format!("http://{addr}"), handle)
    }

    fn local_store(base_url: &str) -> HttpStore {
        let client = Client::builder().no_proxy().timeout(TIMEOUT).build().unwrap();
        HttpStore::with_client(client, base_url)
    }

    #[test]
    fn missing_hidden_endpoint_means_nothing_hidden() {
        let (url, server) = serve_once("404 Not Found", "");
        assert!(local_store(&url).list_hidden().unwrap().is_empty());
        assert_eq!(server.join().unwrap(), format!("GET {DEFAULT_HIDDEN_PATH} HTTP/1.1"));
    }

    #[test]
    fn hidden_list_is_read_from_the_configured_path() {
        let body = r#"{"quameterhidden": [{"quameterResultId": 42, "text": "bad run"}]}"#;
        let (url, server) = serve_once("200 OK", body);
        let store = local_store(&url).with_hidden_path("service/hidden.json");
        let hidden = store.list_hidden().unwrap();
        assert_eq!(server.join().unwrap(), "GET /service/hidden.json HTTP/1.1");
        assert_eq!(hidden.len(), 1);
        assert_eq!((hidden[0].result_id, hidden[0].reason.as_str()), (42, "bad run"));
    }

    #[test]
    fn server_errors_still_fail_the_hidden_list() {
        let (url, _server) = serve_once("500 Internal Server Error", "");
        let err = local_store(&url).list_hidden().unwrap_err();
        assert!(matches!(err, PersistenceError::Status { status: 500, .. }));
    }

    #[test]
    fn list_payload_uses_service_key() {
        let json = r#"{"quameterannotation": [{"metricCode": "p_1", "quameterResultId": 5, "text": "ok"}]}"#;
        let list: AnnotationList = serde_json::from_str(json).unwrap();
        assert_eq!(list.annotations.len(), 1);
        assert_eq!(list.annotations[0].id, None);
    }
}
