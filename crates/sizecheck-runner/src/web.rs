//! Web mode: the subject serves an HTML page that embeds its analysis as JSON.

use std::io::Read as _;
use std::net::TcpListener;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use sizecheck_contracts::{
    PORT_RANGE_END, PORT_RANGE_START, SUBJECT_FLAG_LISTEN, SUBJECT_FLAG_WEB, WEB_READY_MARKERS,
    WEB_REQUIRED_KEYS,
};

use crate::process::{command_for, OutputPump, RunRequest};
use crate::settings::RunSettings;

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no free port in {start}..={end}")]
    PortExhaustion { start: u16, end: u16 },
    #[error("web server did not become ready: {reason}\noutput:\n{output}")]
    ServerStartFailure { reason: String, output: String },
    #[error("GET {url}: {message}")]
    Http { url: String, message: String },
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no data element found in the html")]
    NoDataElement,
    #[error("invalid json in data element: {0}")]
    InvalidJson(String),
    #[error("missing key {0} in the data")]
    MissingKey(String),
}

/// First port in `range` that can be bound on the loopback interface.
///
/// The port is released before returning, so another process may still take
/// it first.
pub fn find_unused_port(range: RangeInclusive<u16>) -> Result<u16, ValidationError> {
    let (start, end) = (*range.start(), *range.end());
    for port in range {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }
    Err(ValidationError::PortExhaustion { start, end })
}

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").expect("script regex")
    })
}

fn json_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\btype\s*=\s*(?:"application/json"|'application/json'|application/json(?:\s|/|$))"#)
            .expect("type attribute regex")
    })
}

/// Extracts and checks the JSON payload of a web-mode page.
pub fn validate_page(html: &str) -> Result<serde_json::Value, ValidationError> {
    let data = script_re()
        .captures_iter(html)
        .find(|c| json_type_re().is_match(&c[1]))
        .map(|c| c[2].to_string())
        .ok_or(ValidationError::NoDataElement)?;

    let value: serde_json::Value =
        serde_json::from_str(&data).map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
    let Some(obj) = value.as_object() else {
        return Err(ValidationError::InvalidJson(
            "expected a JSON object".to_string(),
        ));
    };
    for key in WEB_REQUIRED_KEYS {
        if !obj.contains_key(*key) {
            return Err(ValidationError::MissingKey((*key).to_string()));
        }
    }
    Ok(value)
}

/// Kills and reaps the server on every exit path.
struct ServerGuard {
    child: Child,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[derive(Debug, Clone)]
pub struct WebModeValidator<'a> {
    settings: &'a RunSettings,
    ready_timeout: Duration,
    request_timeout: Duration,
    ports: RangeInclusive<u16>,
}

impl<'a> WebModeValidator<'a> {
    pub fn new(settings: &'a RunSettings) -> Self {
        Self {
            settings,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            request_timeout: settings.timeout,
            ports: PORT_RANGE_START..=PORT_RANGE_END,
        }
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Deadline for the whole GET of the root page, body included.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Range scanned for a listen port.
    pub fn ports(mut self, ports: RangeInclusive<u16>) -> Self {
        self.ports = ports;
        self
    }

    /// Starts the subject in web mode on `input` and validates its root page.
    ///
    /// The server is killed and reaped before this returns, whatever the
    /// outcome. On failure the server's output is saved next to the case.
    pub fn run_web_test(&self, case: &str, input: &Path) -> Result<serde_json::Value, ValidationError> {
        let port = find_unused_port(self.ports.clone())?;
        let listen = format!("127.0.0.1:{port}");
        let case_dir = self.settings.case_dir(case);
        let profiler_dir = case_dir.join("profiler");
        std::fs::create_dir_all(&profiler_dir).map_err(|source| ValidationError::Io {
            action: "create dir",
            path: profiler_dir.clone(),
            source,
        })?;

        let req = RunRequest {
            name: format!("{case} (web)"),
            program: self.settings.subject.clone(),
            args: vec![
                SUBJECT_FLAG_WEB.into(),
                SUBJECT_FLAG_LISTEN.into(),
                listen.clone().into(),
                input.as_os_str().to_owned(),
            ],
            work_dir: self.settings.work_dir.clone(),
            env: self.settings.subject_env(Some(&profiler_dir)),
            timeout: self.ready_timeout,
            sample_resources: false,
        };
        let child = command_for(&req)
            .spawn()
            .map_err(|e| ValidationError::ServerStartFailure {
                reason: format!("spawn {}: {e}", req.program.display()),
                output: String::new(),
            })?;
        let mut server = ServerGuard { child };
        let pump = OutputPump::attach(&mut server.child);

        let mut output = String::new();
        let checked = wait_ready(&pump, self.ready_timeout, &mut output).map(|()| {
            log::debug!("{} listening on {listen}", req.name);
            let url = format!("http://{listen}/");
            http_get_text(&url, self.request_timeout).and_then(|html| validate_page(&html))
        });

        drop(server);
        pump.abandon_into(&mut output);
        let result = checked.unwrap_or_else(|reason| {
            Err(ValidationError::ServerStartFailure {
                reason,
                output: output.clone(),
            })
        });
        if let Err(err) = &result {
            log::warn!("{} failed validation: {err}", req.name);
            save_output(&case_dir, case, &output);
        }
        result
    }
}

/// Reads server output until a readiness marker shows up. The error is the
/// reason the server is not considered started.
fn wait_ready(pump: &OutputPump, timeout: Duration, output: &mut String) -> Result<(), String> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(format!(
                "no readiness marker within {:.1}s",
                timeout.as_secs_f64()
            ));
        }
        match pump.recv_line(remaining) {
            Ok(line) => {
                let ready = WEB_READY_MARKERS.iter().any(|m| line.contains(m));
                output.push_str(&line);
                if ready {
                    return Ok(());
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err("server exited before becoming ready".to_string());
            }
        }
    }
}

fn http_get_text(url: &str, timeout: Duration) -> Result<String, ValidationError> {
    let http_err = |message: String| ValidationError::Http {
        url: url.to_string(),
        message,
    };
    let resp = ureq::get(url)
        .config()
        .http_status_as_error(false)
        .timeout_global(Some(timeout))
        .build()
        .call()
        .map_err(|e| http_err(e.to_string()))?;
    let status = resp.status();
    let mut body = String::new();
    resp.into_body()
        .into_reader()
        .read_to_string(&mut body)
        .map_err(|e| http_err(format!("read body: {e}")))?;
    if !status.is_success() {
        return Err(http_err(format!("HTTP {}", status.as_u16())));
    }
    Ok(body)
}

fn save_output(dir: &Path, case: &str, output: &str) -> Option<PathBuf> {
    std::fs::create_dir_all(dir).ok()?;
    let path = dir.join(format!("{case}.web.output.txt"));
    std::fs::write(&path, output).ok()?;
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"<!doctype html><html><head>
<script src="app.js"></script>
<script type="application/json">{"name":"x","size":1,"packages":[],"sections":[]}</script>
</head><body></body></html>"#;

    #[test]
    fn accepts_complete_payload() {
        let v = validate_page(GOOD).expect("valid page");
        assert_eq!(v["name"], "x");
    }

    #[test]
    fn missing_key_is_named() {
        let page = GOOD.replace(r#","sections":[]"#, "");
        match validate_page(&page) {
            Err(ValidationError::MissingKey(k)) => assert_eq!(k, "sections"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn page_without_data_element_is_rejected() {
        let err = validate_page("<html><script>var x = 1;</script></html>").unwrap_err();
        assert!(matches!(err, ValidationError::NoDataElement));
        assert_eq!(err.to_string(), "no data element found in the html");
    }

    #[test]
    fn invalid_json_is_rejected() {
        let page = r#"<script type='application/json'>{"name": </script>"#;
        assert!(matches!(
            validate_page(page),
            Err(ValidationError::InvalidJson(_))
        ));
        let page = r#"<script type="application/json">[1,2]</script>"#;
        assert!(matches!(
            validate_page(page),
            Err(ValidationError::InvalidJson(_))
        ));
    }

    #[test]
    fn attribute_order_does_not_matter() {
        let page = r#"<SCRIPT id="data" TYPE="application/json">
{"name":"x","size":1,"packages":{},"sections":{}}
</SCRIPT>"#;
        validate_page(page).expect("valid page");
    }

    #[test]
    fn unused_port_can_be_bound() {
        let port = find_unused_port(PORT_RANGE_START..=PORT_RANGE_END).expect("port");
        TcpListener::bind(("127.0.0.1", port)).expect("bind returned port");
    }

    #[test]
    fn exhausted_range_reports_bounds() {
        let held = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = held.local_addr().expect("addr").port();
        let err = find_unused_port(port..=port).unwrap_err();
        assert!(matches!(err, ValidationError::PortExhaustion { start, end } if start == port && end == port));
    }
}
