use crate::error::DispatchError;
use crate::events::{BlameInfo, ErrorDetail, ErrorTrace};
use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Upper bound for one outbound call, connect included
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(2);

/// JSON body posted to the collector
///
/// The trace text appears twice: at the top level and inside `error_detail`.
#[derive(Debug, Serialize)]
pub struct CollectorPayload<'a> {
    pub error_line: String,
    pub error_detail: PayloadDetail<'a>,
}

/// `error_detail` object of [`CollectorPayload`]
#[derive(Debug, Serialize)]
pub struct PayloadDetail<'a> {
    pub file: Option<&'a Path>,
    pub line: Option<u32>,
    pub vhost: Option<&'a Path>,
    pub git_remote: &'a str,
    pub error_line: String,
    pub blame: Option<&'a BlameInfo>,
}

impl<'a> CollectorPayload<'a> {
    pub fn new(trace: &ErrorTrace, detail: &'a ErrorDetail) -> Self {
        let text = trace.text();
        Self {
            error_line: text.clone(),
            error_detail: PayloadDetail {
                file: detail.file.as_deref(),
                line: detail.line,
                vhost: detail.vhost.as_deref(),
                git_remote: &detail.git_remote,
                error_line: text,
                blame: detail.blame.as_ref(),
            },
        }
    }
}

/// Delivers enriched traces to the collector
pub trait Dispatch {
    /// Send one trace to `endpoint`
    ///
    /// A single attempt is made; callers log the failure and move on.
    fn send(
        &self,
        trace: &ErrorTrace,
        detail: &ErrorDetail,
        endpoint: &str,
    ) -> Result<(), DispatchError>;
}

/// Posts payloads over HTTP
///
/// The async `reqwest` client is driven from the synchronous watcher loop on
/// a private current-thread runtime, so each `send` blocks until the response
/// arrives or the timeout expires. The collector is contacted directly;
/// proxy environment variables are ignored.
pub struct HttpDispatcher {
    client: Client,
    runtime: Runtime,
}

impl HttpDispatcher {
    /// Create a dispatcher with the default 2 second timeout
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ClientBuild` if the HTTP client or the runtime
    /// cannot be created.
    pub fn new() -> Result<Self, DispatchError> {
        Self::with_timeout(DEFAULT_DISPATCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| DispatchError::ClientBuild(e.to_string()))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DispatchError::ClientBuild(e.to_string()))?;

        Ok(Self { client, runtime })
    }
}

impl Dispatch for HttpDispatcher {
    fn send(
        &self,
        trace: &ErrorTrace,
        detail: &ErrorDetail,
        endpoint: &str,
    ) -> Result<(), DispatchError> {
        let payload = CollectorPayload::new(trace, detail);
        let body = serde_json::to_vec(&payload)?;

        debug!(
            target: "logwatch::dispatch",
            "Posting trace endpoint={} bytes={}",
            endpoint,
            body.len()
        );

        self.runtime.block_on(async {
            let response = self
                .client
                .post(endpoint)
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(DispatchError::Status(status.as_u16()));
            }

            debug!(
                target: "logwatch::dispatch",
                "Collector accepted trace status={}",
                status.as_u16()
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::path::PathBuf;
    use std::sync::mpsc;
    use std::thread;

    /// Recorded HTTP request: request line, lowercased headers and body
    struct CapturedRequest {
        request_line: String,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    }

    fn read_request(stream: &mut TcpStream) -> CapturedRequest {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];

        let header_end = loop {
            let n = stream.read(&mut buf).unwrap();
            assert!(n > 0, "connection closed before headers");
            data.extend_from_slice(&buf[..n]);
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&data[..header_end]).to_string();
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap().to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
            .collect();

        let length: usize = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| v.parse().unwrap())
            .unwrap_or(0);

        while data.len() < header_end + length {
            let n = stream.read(&mut buf).unwrap();
            assert!(n > 0, "connection closed before body");
            data.extend_from_slice(&buf[..n]);
        }

        CapturedRequest {
            request_line,
            headers,
            body: data[header_end..header_end + length].to_vec(),
        }
    }

    /// Serve exactly one request with `status_line`, handing the request back
    fn one_shot_server(status_line: &'static str) -> (String, mpsc::Receiver<CapturedRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/webhook/errors", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status_line
            );
            stream.write_all(response.as_bytes()).unwrap();
            let _ = tx.send(request);
        });

        (url, rx)
    }

    fn sample_trace() -> ErrorTrace {
        let mut trace = ErrorTrace::new(
            "[error] PHP Fatal error: boom in /var/www/a.php on line 3".to_string(),
        );
        trace.push("  #0 {main}".to_string());
        trace
    }

    fn sample_detail() -> ErrorDetail {
        ErrorDetail {
            file: Some(PathBuf::from("/var/www/a.php")),
            line: Some(3),
            vhost: Some(PathBuf::from("/etc/apache2/sites-enabled/a.conf")),
            git_remote: "git@github.com:acme/a.git".to_string(),
            blame: Some(BlameInfo {
                author: "Jane Doe".to_string(),
                email: "jane@example.com".to_string(),
                commit: "3f2a9c1e".to_string(),
                summary: "Add checkout".to_string(),
            }),
        }
    }

    #[test]
    fn test_payload_shape() {
        let trace = sample_trace();
        let detail = sample_detail();
        let value = serde_json::to_value(CollectorPayload::new(&trace, &detail)).unwrap();

        let text = "[error] PHP Fatal error: boom in /var/www/a.php on line 3\n  #0 {main}";
        assert_eq!(value["error_line"], text);
        assert_eq!(value["error_detail"]["error_line"], text);
        assert_eq!(value["error_detail"]["file"], "/var/www/a.php");
        assert_eq!(value["error_detail"]["line"], 3);
        assert_eq!(
            value["error_detail"]["vhost"],
            "/etc/apache2/sites-enabled/a.conf"
        );
        assert_eq!(value["error_detail"]["git_remote"], "git@github.com:acme/a.git");
        assert_eq!(value["error_detail"]["blame"]["author"], "Jane Doe");
        assert_eq!(value["error_detail"]["blame"]["email"], "jane@example.com");
        assert_eq!(value["error_detail"]["blame"]["commit"], "3f2a9c1e");
        assert_eq!(value["error_detail"]["blame"]["summary"], "Add checkout");
    }

    #[test]
    fn test_unlocated_payload_uses_nulls() {
        let trace = ErrorTrace::new("[error] AH00128: File does not exist".to_string());
        let detail = ErrorDetail::unlocated();
        let value = serde_json::to_value(CollectorPayload::new(&trace, &detail)).unwrap();

        let error_detail = &value["error_detail"];
        assert!(error_detail["file"].is_null());
        assert!(error_detail["line"].is_null());
        assert!(error_detail["vhost"].is_null());
        assert!(error_detail["blame"].is_null());
        assert_eq!(error_detail["git_remote"], "unknown");
    }

    #[test]
    fn test_send_posts_json() {
        let (url, requests) = one_shot_server("200 OK");
        let dispatcher = HttpDispatcher::new().unwrap();

        dispatcher
            .send(&sample_trace(), &sample_detail(), &url)
            .unwrap();

        let request = requests.recv().unwrap();
        assert_eq!(request.request_line, "POST /webhook/errors HTTP/1.1");
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "content-type" && v == "application/json"));

        let value: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(value["error_detail"]["line"], 3);
        assert_eq!(value["error_line"], sample_trace().text());
    }

    #[test]
    fn test_non_success_status_is_error() {
        let (url, _requests) = one_shot_server("500 Internal Server Error");
        let dispatcher = HttpDispatcher::new().unwrap();

        let result = dispatcher.send(&sample_trace(), &sample_detail(), &url);
        assert!(matches!(result, Err(DispatchError::Status(500))));
    }

    #[test]
    fn test_unresponsive_collector_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let holder = thread::spawn(move || {
            // Accept and hold the connection without answering
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(2));
            drop(stream);
        });

        let dispatcher = HttpDispatcher::with_timeout(Duration::from_millis(200)).unwrap();
        let result = dispatcher.send(&sample_trace(), &sample_detail(), &url);
        assert!(matches!(result, Err(DispatchError::HttpError(_))));

        holder.join().unwrap();
    }

    #[test]
    fn test_refused_connection_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let dispatcher = HttpDispatcher::new().unwrap();
        let result = dispatcher.send(&sample_trace(), &sample_detail(), &url);
        assert!(matches!(result, Err(DispatchError::HttpError(_))));
    }
}
