//! Probe executors for http, tcp, ssl and ping checks
//!
//! Every failure (timeout, refused connection, DNS, TLS, unexpected status)
//! is folded into a failed [`ProbeResult`]; probes never return errors.

use std::fmt;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

use super::config::{parse_target, CheckConfig, CheckType};

/// Default number of days a certificate must remain valid
pub const DEFAULT_SSL_EXPIRY_DAYS: i64 = 14;

/// Category of a failed probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ConnectionRefused,
    Dns,
    TlsHandshake,
    UnexpectedStatus,
    CertificateExpiring,
    Network,
    InvalidTarget,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionRefused => "connection_refused",
            FailureKind::Dns => "dns",
            FailureKind::TlsHandshake => "tls_handshake",
            FailureKind::UnexpectedStatus => "unexpected_status",
            FailureKind::CertificateExpiring => "certificate_expiring",
            FailureKind::Network => "network",
            FailureKind::InvalidTarget => "invalid_target",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a probe failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ProbeFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub success: bool,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub error: Option<ProbeFailure>,
    /// Days until certificate expiry (ssl checks)
    pub days_remaining: Option<i64>,
}

impl ProbeResult {
    pub fn ok(latency: Duration) -> Self {
        Self {
            success: true,
            latency_ms: latency.as_millis() as u64,
            status_code: None,
            error: None,
            days_remaining: None,
        }
    }

    pub fn failed(failure: ProbeFailure, latency: Duration) -> Self {
        Self {
            success: false,
            latency_ms: latency.as_millis() as u64,
            status_code: None,
            error: Some(failure),
            days_remaining: None,
        }
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_days_remaining(mut self, days: i64) -> Self {
        self.days_remaining = Some(days);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn is_timeout(&self) -> bool {
        matches!(&self.error, Some(f) if f.kind == FailureKind::Timeout)
    }

    /// Error rendered as `"<category>: <message>"`
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Coarse outcome stored in probe history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
    Success,
    Failure,
    Timeout,
}

/// Historical record of one applied probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub outcome: ProbeOutcome,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub days_remaining: Option<i64>,
    pub checked_at: DateTime<Utc>,
}

impl ProbeRecord {
    pub fn from_result(result: &ProbeResult, checked_at: DateTime<Utc>) -> Self {
        let outcome = if result.success {
            ProbeOutcome::Success
        } else if result.is_timeout() {
            ProbeOutcome::Timeout
        } else {
            ProbeOutcome::Failure
        };

        Self {
            outcome,
            latency_ms: result.latency_ms,
            status_code: result.status_code,
            error: result.error_message(),
            days_remaining: result.days_remaining,
            checked_at,
        }
    }
}

/// Executes a probe for a check configuration
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, check: &CheckConfig) -> ProbeResult;
}

/// Errors building the network prober
#[derive(Debug, thiserror::Error)]
pub enum ProberError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Port used when ping cannot send ICMP and falls back to a TCP connect
pub const PING_FALLBACK_PORT: u16 = 80;

/// Program and leading arguments used to run ping checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for PingCommand {
    fn default() -> Self {
        Self {
            program: "ping".to_string(),
            args: Vec::new(),
        }
    }
}

/// Prober that talks to the network
#[derive(Clone)]
pub struct NetworkProber {
    client: reqwest::Client,
    tls: TlsConnector,
    ssl_expiry_days: i64,
    ping: PingCommand,
    ping_fallback_port: u16,
}

impl NetworkProber {
    pub fn new(ssl_expiry_days: i64) -> Result<Self, ProberError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("healthwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            tls: tls_connector()?,
            ssl_expiry_days,
            ping: PingCommand::default(),
            ping_fallback_port: PING_FALLBACK_PORT,
        })
    }

    pub fn with_ping_command(mut self, ping: PingCommand) -> Self {
        self.ping = ping;
        self
    }

    pub fn with_ping_fallback_port(mut self, port: u16) -> Self {
        self.ping_fallback_port = port;
        self
    }

    async fn probe_http(&self, check: &CheckConfig) -> ProbeResult {
        let start = Instant::now();

        let response = self
            .client
            .get(check.target.trim())
            .timeout(check.timeout)
            .send()
            .await;

        match response {
            Ok(response) => {
                let code = response.status().as_u16();
                let latency = start.elapsed();
                if code == check.expected_status {
                    ProbeResult::ok(latency).with_status_code(code)
                } else {
                    ProbeResult::failed(
                        ProbeFailure::new(
                            FailureKind::UnexpectedStatus,
                            format!("expected {}, got {}", check.expected_status, code),
                        ),
                        latency,
                    )
                    .with_status_code(code)
                }
            }
            Err(e) => ProbeResult::failed(
                ProbeFailure::new(classify_reqwest(&e), e.to_string()),
                start.elapsed(),
            ),
        }
    }

    async fn probe_tcp(&self, check: &CheckConfig) -> ProbeResult {
        let start = Instant::now();
        let (host, port) = match parse_target(&check.target, 80) {
            Ok(target) => target,
            Err(e) => {
                return ProbeResult::failed(
                    ProbeFailure::new(FailureKind::InvalidTarget, e),
                    start.elapsed(),
                )
            }
        };

        match tokio::time::timeout(check.timeout, connect(&host, port)).await {
            Ok(Ok(_stream)) => ProbeResult::ok(start.elapsed()),
            Ok(Err(failure)) => ProbeResult::failed(failure, start.elapsed()),
            Err(_) => ProbeResult::failed(timed_out(check.timeout), start.elapsed()),
        }
    }

    async fn probe_ssl(&self, check: &CheckConfig) -> ProbeResult {
        let start = Instant::now();
        let (host, port) = match parse_target(&check.target, 443) {
            Ok(target) => target,
            Err(e) => {
                return ProbeResult::failed(
                    ProbeFailure::new(FailureKind::InvalidTarget, e),
                    start.elapsed(),
                )
            }
        };

        let not_after = match tokio::time::timeout(
            check.timeout,
            self.certificate_not_after(&host, port),
        )
        .await
        {
            Ok(Ok(not_after)) => not_after,
            Ok(Err(failure)) => return ProbeResult::failed(failure, start.elapsed()),
            Err(_) => return ProbeResult::failed(timed_out(check.timeout), start.elapsed()),
        };

        let latency = start.elapsed();
        let days = (not_after - Utc::now()).num_days();
        if days > self.ssl_expiry_days {
            ProbeResult::ok(latency).with_days_remaining(days)
        } else {
            ProbeResult::failed(
                ProbeFailure::new(
                    FailureKind::CertificateExpiring,
                    format!(
                        "certificate for {} expires in {} days (threshold {})",
                        host, days, self.ssl_expiry_days
                    ),
                ),
                latency,
            )
            .with_days_remaining(days)
        }
    }

    async fn certificate_not_after(
        &self,
        host: &str,
        port: u16,
    ) -> Result<DateTime<Utc>, ProbeFailure> {
        let stream = connect(host, port).await?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ProbeFailure::new(FailureKind::InvalidTarget, e.to_string()))?;

        let tls = self
            .tls
            .connect(server_name, stream)
            .await
            .map_err(|e| ProbeFailure::new(FailureKind::TlsHandshake, e.to_string()))?;

        let (_, conn) = tls.get_ref();
        let leaf = conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| {
                ProbeFailure::new(FailureKind::TlsHandshake, "server sent no certificate")
            })?;

        let (_, cert) = X509Certificate::from_der(leaf.as_ref()).map_err(|e| {
            ProbeFailure::new(
                FailureKind::TlsHandshake,
                format!("unparseable certificate: {}", e),
            )
        })?;

        let not_after = cert.validity().not_after.timestamp();
        DateTime::from_timestamp(not_after, 0).ok_or_else(|| {
            ProbeFailure::new(
                FailureKind::TlsHandshake,
                format!("certificate expiry {} out of range", not_after),
            )
        })
    }

    async fn probe_ping(&self, check: &CheckConfig) -> ProbeResult {
        let start = Instant::now();
        let (host, _) = match parse_target(&check.target, 80) {
            Ok(target) => target,
            Err(e) => {
                return ProbeResult::failed(
                    ProbeFailure::new(FailureKind::InvalidTarget, e),
                    start.elapsed(),
                )
            }
        };

        let wait_secs = check.timeout.as_secs().max(1).to_string();
        let mut command = Command::new(&self.ping.program);
        command
            .args(&self.ping.args)
            .args(["-c", "1", "-W", wait_secs.as_str(), host.as_str()])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(check.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(host = %host, "ping binary unavailable, falling back to tcp connect");
                return self.ping_fallback(&host, start, check.timeout).await;
            }
            Ok(Err(e)) => {
                return ProbeResult::failed(
                    ProbeFailure::new(FailureKind::Network, format!("ping failed to start: {}", e)),
                    start.elapsed(),
                )
            }
            Err(_) => return ProbeResult::failed(timed_out(check.timeout), start.elapsed()),
        };

        let elapsed = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout);

        if output.status.success() {
            let result = ProbeResult::ok(elapsed);
            return match parse_ping_latency(&stdout) {
                Some(latency_ms) => result.with_latency_ms(latency_ms),
                None => result,
            };
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if icmp_not_permitted(&stderr) {
            tracing::debug!(
                host = %host,
                error = %stderr.trim(),
                "ICMP not permitted, falling back to tcp connect"
            );
            return self.ping_fallback(&host, start, check.timeout).await;
        }

        ProbeResult::failed(classify_ping_failure(&host, &stderr), elapsed)
    }

    /// TCP connect used in place of ICMP, bounded by what is left of `timeout`
    async fn ping_fallback(&self, host: &str, start: Instant, timeout: Duration) -> ProbeResult {
        let remaining = timeout.saturating_sub(start.elapsed());
        match tokio::time::timeout(remaining, connect(host, self.ping_fallback_port)).await {
            Ok(Ok(_stream)) => ProbeResult::ok(start.elapsed()),
            Ok(Err(failure)) => ProbeResult::failed(failure, start.elapsed()),
            Err(_) => ProbeResult::failed(timed_out(timeout), start.elapsed()),
        }
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn probe(&self, check: &CheckConfig) -> ProbeResult {
        match check.check_type {
            CheckType::Http => self.probe_http(check).await,
            CheckType::Tcp => self.probe_tcp(check).await,
            CheckType::Ssl => self.probe_ssl(check).await,
            CheckType::Ping => self.probe_ping(check).await,
        }
    }
}

fn tls_connector() -> Result<TlsConnector, rustls::Error> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Resolve `host` and connect to the first address that accepts
async fn connect(host: &str, port: u16) -> Result<TcpStream, ProbeFailure> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ProbeFailure::new(FailureKind::Dns, format!("{}: {}", host, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(ProbeFailure::new(
            FailureKind::Dns,
            format!("no addresses found for {}", host),
        ));
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(ProbeFailure::new(classify_io(&e), format!("{}: {}", addr, e))),
        }
    }

    Err(last_error
        .unwrap_or_else(|| ProbeFailure::new(FailureKind::Network, "connection failed")))
}

fn timed_out(timeout: Duration) -> ProbeFailure {
    ProbeFailure::new(
        FailureKind::Timeout,
        format!("no response within {}ms", timeout.as_millis()),
    )
}

fn classify_io(err: &std::io::Error) -> FailureKind {
    match err.kind() {
        std::io::ErrorKind::ConnectionRefused => FailureKind::ConnectionRefused,
        std::io::ErrorKind::TimedOut => FailureKind::Timeout,
        _ => FailureKind::Network,
    }
}

fn classify_reqwest(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        return FailureKind::Timeout;
    }
    if err.is_builder() {
        return FailureKind::InvalidTarget;
    }

    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            match classify_io(io) {
                FailureKind::Network => {}
                kind => return kind,
            }
        }
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup")
            || text.contains("name or service not known")
        {
            return FailureKind::Dns;
        }
        source = e.source();
    }

    FailureKind::Network
}

/// Whether ping failed because the process may not open an ICMP socket
fn icmp_not_permitted(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("operation not permitted") || lower.contains("permission denied")
}

fn classify_ping_failure(host: &str, stderr: &str) -> ProbeFailure {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("unknown host")
        || lower.contains("name or service not known")
        || lower.contains("cannot resolve")
        || lower.contains("temporary failure in name resolution")
    {
        ProbeFailure::new(FailureKind::Dns, stderr.trim().to_string())
    } else {
        ProbeFailure::new(FailureKind::Timeout, format!("no echo reply from {}", host))
    }
}

/// Extract the round-trip time from `ping` output (`time=12.3 ms`)
pub fn parse_ping_latency(output: &str) -> Option<u64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("valid ping latency pattern")
    });

    pattern
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|ms| ms.round() as u64)
}
