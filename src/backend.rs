use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;

use crate::loader::SliceSource;
use crate::signing::{SliceRequest, UrlSigner};
use crate::slices::{SliceCounts, ViewId};

const COUNT_TIMEOUT: Duration = Duration::from_secs(10);
const SLICE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn build_count_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(COUNT_TIMEOUT)
        .timeout(COUNT_TIMEOUT)
        .build()
        .context("Could not initialize HTTP client for slice counts")
}

/// Slice fetches carry no overall timeout; a stalled image only leaves its slot empty.
pub fn build_slice_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(SLICE_CONNECT_TIMEOUT)
        .build()
        .context("Could not initialize HTTP client for slice images")
}

pub fn normalize_base_url(base_url: &str) -> String {
    strip_query_and_fragment(base_url.trim())
        .trim()
        .trim_end_matches('/')
        .to_string()
}

fn strip_query_and_fragment(value: &str) -> &str {
    let query_index = value.find('?').unwrap_or(value.len());
    let fragment_index = value.find('#').unwrap_or(value.len());
    &value[..query_index.min(fragment_index)]
}

pub fn slice_counts_url(base: &str) -> String {
    format!("{}/slices-count", normalize_base_url(base))
}

pub fn parse_slice_counts(json: &str) -> Result<SliceCounts> {
    let counts: SliceCounts =
        serde_json::from_str(json).context("Slice count response was not valid JSON")?;
    Ok(counts.normalized())
}

pub fn fetch_slice_counts(client: &Client, base: &str) -> Result<SliceCounts> {
    let url = slice_counts_url(base);
    let body = http_get_text(client, &url, "application/json")
        .with_context(|| format!("Failed fetching slice counts from {url}"))?;
    parse_slice_counts(&body)
}

/// One `/slices-count` attempt. A failed attempt still carries usable
/// single-slice counts alongside the error so the caller can offer a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountFetch {
    pub counts: SliceCounts,
    pub error: Option<String>,
}

impl CountFetch {
    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

pub fn fetch_slice_counts_with_fallback(base: &str) -> CountFetch {
    let result = build_count_client().and_then(|client| fetch_slice_counts(&client, base));
    match result {
        Ok(counts) => {
            log::info!(
                "slice counts: axial={} coronal={} sagittal={}",
                counts.axial,
                counts.coronal,
                counts.sagittal
            );
            CountFetch {
                counts,
                error: None,
            }
        }
        Err(err) => {
            log::warn!("slice count retrieval failed, using single-slice stacks: {err:#}");
            CountFetch {
                counts: SliceCounts::fallback(),
                error: Some(format!("{err:#}")),
            }
        }
    }
}

fn http_get_text(client: &Client, url: &str, accept: &str) -> Result<String> {
    let bytes = http_get_bytes(client, url, accept)?;
    String::from_utf8(bytes).context("HTTP response was not valid UTF-8")
}

fn http_get_bytes(client: &Client, url: &str, accept: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .header(ACCEPT, accept)
        .send()
        .with_context(|| format!("HTTP request failed for {url}"))?;
    let status = response.status();
    if !status.is_success() {
        let detail = response
            .text()
            .unwrap_or_else(|_| String::from("unable to read error body"));
        bail!("HTTP {status} for {url}: {detail}");
    }

    response
        .bytes()
        .map(|body| body.to_vec())
        .with_context(|| format!("Could not read response body from {url}"))
}

/// Fetches signed `cdn-slice` images over HTTP.
pub struct HttpSliceSource {
    client: Client,
    signer: UrlSigner,
    width: u32,
    quality: u8,
}

impl HttpSliceSource {
    pub fn new(signer: UrlSigner, width: u32, quality: u8) -> Result<Self> {
        Ok(Self {
            client: build_slice_client()?,
            signer,
            width,
            quality,
        })
    }
}

impl SliceSource for HttpSliceSource {
    fn fetch(&self, view: ViewId, index: usize) -> Result<Vec<u8>> {
        let request = SliceRequest::new(view, index).with_size(self.width, self.quality);
        let url = self.signer.slice_url(&request)?;
        http_get_bytes(&self.client, &url, "image/*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    use crate::signing::SigningSecret;

    fn serve_once(status: &str, body: &'static [u8]) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let address = listener.local_addr().expect("local addr");
        let status = status.to_string();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut request_line = String::new();
            let _ = reader.read_line(&mut request_line);
            loop {
                let mut header = String::new();
                match reader.read_line(&mut header) {
                    Ok(0) => break,
                    Ok(_) if header == "\r\n" => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            let _ = tx.send(request_line.trim().to_string());
            let mut stream = stream;
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(body);
        });
        (format!("http://{address}"), rx)
    }

    #[test]
    fn normalize_base_url_trims_slash_and_query() {
        assert_eq!(
            normalize_base_url(" http://localhost:5000/ "),
            "http://localhost:5000"
        );
        assert_eq!(
            normalize_base_url("http://localhost:5000/api?x=1#frag"),
            "http://localhost:5000/api"
        );
    }

    #[test]
    fn slice_counts_url_appends_endpoint() {
        assert_eq!(
            slice_counts_url("http://localhost:5000/"),
            "http://localhost:5000/slices-count"
        );
    }

    #[test]
    fn parse_slice_counts_normalizes_missing_axes() {
        let counts = parse_slice_counts(r#"{"axial":120,"coronal":0}"#).expect("valid json");
        assert_eq!(
            counts,
            SliceCounts {
                axial: 120,
                coronal: 1,
                sagittal: 1,
            }
        );
        assert!(parse_slice_counts("not json").is_err());
    }

    #[test]
    fn fetch_slice_counts_reads_endpoint() {
        let (base, requests) =
            serve_once("200 OK", br#"{"axial":30,"coronal":40,"sagittal":25}"#);
        let client = build_count_client().expect("client");
        let counts = fetch_slice_counts(&client, &base).expect("counts");
        assert_eq!(counts.total(), 95);
        let request_line = requests.recv().expect("request observed");
        assert!(request_line.starts_with("GET /slices-count "));
    }

    #[test]
    fn server_error_reports_failure_with_single_slices() {
        let (base, _requests) = serve_once("500 Internal Server Error", b"boom");
        let fetch = fetch_slice_counts_with_fallback(&base);
        assert!(fetch.is_fallback());
        assert_eq!(fetch.counts, SliceCounts::fallback());
        let error = fetch.error.expect("failure is reported");
        assert!(error.contains("500"), "{error}");
    }

    #[test]
    fn successful_fetch_carries_no_error() {
        let (base, _requests) = serve_once("200 OK", br#"{"axial":3,"coronal":1,"sagittal":2}"#);
        let fetch = fetch_slice_counts_with_fallback(&base);
        assert!(!fetch.is_fallback());
        assert_eq!(fetch.counts.get(ViewId::Sagittal), 2);
    }

    #[test]
    fn http_source_requests_signed_url() {
        let (base, requests) = serve_once("200 OK", b"slice-bytes");
        let signer = UrlSigner::new(&base, SigningSecret::new("shared"));
        let source = HttpSliceSource::new(signer.clone(), 256, 90).expect("source");
        let bytes = source.fetch(ViewId::Coronal, 4).expect("fetch");
        assert_eq!(bytes, b"slice-bytes");
        let expected = SliceRequest::new(ViewId::Coronal, 4).with_size(256, 90);
        let request_line = requests.recv().expect("request observed");
        assert!(request_line.contains(&format!(
            "/cdn-slice?view=coronal&index=4&w=256&q=90&s={}",
            signer.signature(&expected)
        )));
    }
}
