//! Image upload client shared by firmware and host targets.
//!
//! Each call to [`UploadClient::upload`] is one bounded request: check the
//! link, connect, send the head and the image body, read the status line and a
//! bounded prefix of the body, then classify the result. Retry policy belongs
//! to the cycle controller.

use core::fmt;
use core::time::Duration;

use heapless::{String, Vec};

use crate::config::{DeviceConfig, MAX_API_KEY_LEN, MAX_DEVICE_ID_LEN};
use crate::endpoint::Endpoint;
use crate::link::LinkStatus;

pub mod http;

use http::{StatusLineError, body_offset, content_length, parse_status_line, request_head};

/// Body bytes written per transport call.
pub const BODY_CHUNK: usize = 1024;
/// Response bytes buffered while looking for the status line.
pub const RESPONSE_BUFFER: usize = 512;
/// Response body bytes kept for diagnostics.
pub const RESPONSE_PREVIEW: usize = 256;

/// Socket-level failures reported by a transport.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SocketError {
    /// The peer actively refused the connection.
    Refused,
    TimedOut,
    /// The connection was reset or closed by the peer.
    Closed,
    /// Name resolution or routing failed before a connection existed.
    Unreachable,
    Other,
}

/// One TCP connection at a time to the upload endpoint.
///
/// The timeout passed to `connect` bounds every later operation on the same
/// connection.
pub trait HttpConnector {
    async fn connect(&mut self, endpoint: &Endpoint, timeout: Duration) -> Result<(), SocketError>;

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), SocketError>;

    /// Reads into `buf`; `Ok(0)` means the peer closed the connection.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError>;

    async fn close(&mut self);
}

/// Why an upload attempt did not succeed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailureReason {
    /// The link was down when the attempt started; no I/O was performed.
    NoLink,
    ConnectFailed,
    ConnectionRefused,
    HeaderSendFailed,
    /// The connection dropped mid-transfer.
    ConnectionLost,
    TimedOut,
    /// The response did not start with an HTTP status line.
    MalformedResponse,
    /// A non-error status other than 200.
    UnexpectedStatus(u16),
    /// The server answered with a status of 400 or above.
    ServerRejected(u16),
}

impl FailureReason {
    /// Operator-facing hint for the diagnostic log.
    pub const fn hint(self) -> &'static str {
        match self {
            FailureReason::NoLink => "wireless link is down",
            FailureReason::ConnectFailed => "check the server address and that it is reachable",
            FailureReason::ConnectionRefused => "server not running or port closed",
            FailureReason::HeaderSendFailed => "request headers could not be sent",
            FailureReason::ConnectionLost => "connection dropped, check signal strength",
            FailureReason::TimedOut => "server did not answer in time",
            FailureReason::MalformedResponse => "endpoint is not speaking HTTP",
            FailureReason::UnexpectedStatus(_) => "endpoint answered without accepting the image",
            FailureReason::ServerRejected(_) => "check the API key and endpoint path",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoLink => f.write_str("no link"),
            FailureReason::ConnectFailed => f.write_str("connection failed"),
            FailureReason::ConnectionRefused => f.write_str("connection refused"),
            FailureReason::HeaderSendFailed => f.write_str("send header failed"),
            FailureReason::ConnectionLost => f.write_str("connection lost"),
            FailureReason::TimedOut => f.write_str("timed out"),
            FailureReason::MalformedResponse => f.write_str("malformed response"),
            FailureReason::UnexpectedStatus(code) => write!(f, "unexpected status {code}"),
            FailureReason::ServerRejected(code) => write!(f, "server error {code}"),
        }
    }
}

/// Classified result of one upload attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UploadOutcome {
    Success,
    TransientFailure(FailureReason),
    /// The server rejected the request. Still retried within the budget.
    PermanentFailure(FailureReason),
}

impl UploadOutcome {
    /// Classifies a response status code.
    pub const fn from_status(code: u16) -> Self {
        match code {
            200 => UploadOutcome::Success,
            400.. => UploadOutcome::PermanentFailure(FailureReason::ServerRejected(code)),
            _ => UploadOutcome::TransientFailure(FailureReason::UnexpectedStatus(code)),
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, UploadOutcome::Success)
    }

    pub const fn reason(self) -> Option<FailureReason> {
        match self {
            UploadOutcome::Success => None,
            UploadOutcome::TransientFailure(reason) | UploadOutcome::PermanentFailure(reason) => {
                Some(reason)
            }
        }
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::Success => f.write_str("success"),
            UploadOutcome::TransientFailure(reason) => write!(f, "transient failure: {reason}"),
            UploadOutcome::PermanentFailure(reason) => write!(f, "permanent failure: {reason}"),
        }
    }
}

/// Details of one attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UploadReport {
    pub attempt: u8,
    pub outcome: UploadOutcome,
    pub status: Option<u16>,
    /// Body bytes handed to the transport.
    pub body_bytes_sent: usize,
}

/// HTTP client bound to the configured endpoint and device identity.
pub struct UploadClient<C> {
    connector: C,
    endpoint: Endpoint,
    device_id: String<MAX_DEVICE_ID_LEN>,
    api_key: String<MAX_API_KEY_LEN>,
    timeout: Duration,
    response: Vec<u8, RESPONSE_PREVIEW>,
}

impl<C> UploadClient<C>
where
    C: HttpConnector,
{
    pub fn new(connector: C, config: &DeviceConfig) -> Self {
        Self {
            connector,
            endpoint: config.endpoint.clone(),
            device_id: config.device_id.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timing.request_timeout,
            response: Vec::new(),
        }
    }

    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Body of the last response, truncated to [`RESPONSE_PREVIEW`] bytes.
    pub fn last_response_body(&self) -> &[u8] {
        &self.response
    }

    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    /// Performs one upload attempt of `image`.
    ///
    /// Returns `TransientFailure(NoLink)` without touching the transport when
    /// the link is down.
    pub async fn upload<L>(&mut self, link: &mut L, image: &[u8], attempt: u8) -> UploadReport
    where
        L: LinkStatus,
    {
        self.response.clear();
        let mut report = UploadReport {
            attempt,
            outcome: UploadOutcome::TransientFailure(FailureReason::NoLink),
            status: None,
            body_bytes_sent: 0,
        };
        if !link.is_connected() {
            return report;
        }

        let result = self.exchange(image, &mut report.body_bytes_sent).await;
        self.connector.close().await;

        report.outcome = match result {
            Ok(code) => {
                report.status = Some(code);
                UploadOutcome::from_status(code)
            }
            Err(reason) => UploadOutcome::TransientFailure(reason),
        };
        report
    }

    async fn exchange(&mut self, image: &[u8], sent: &mut usize) -> Result<u16, FailureReason> {
        self.connector
            .connect(&self.endpoint, self.timeout)
            .await
            .map_err(|err| match err {
                SocketError::Refused => FailureReason::ConnectionRefused,
                SocketError::TimedOut => FailureReason::TimedOut,
                SocketError::Closed => FailureReason::ConnectionLost,
                SocketError::Unreachable | SocketError::Other => FailureReason::ConnectFailed,
            })?;

        let head = request_head(&self.endpoint, &self.device_id, &self.api_key, image.len())
            .map_err(|_| FailureReason::HeaderSendFailed)?;
        self.connector
            .write_all(head.as_bytes())
            .await
            .map_err(|err| match err {
                SocketError::TimedOut => FailureReason::TimedOut,
                _ => FailureReason::HeaderSendFailed,
            })?;

        for chunk in image.chunks(BODY_CHUNK) {
            self.connector
                .write_all(chunk)
                .await
                .map_err(transfer_failure)?;
            *sent += chunk.len();
        }

        let mut buffer = [0u8; RESPONSE_BUFFER];
        let mut filled = 0;
        let status = loop {
            let read = self
                .connector
                .read(&mut buffer[filled..])
                .await
                .map_err(transfer_failure)?;
            if read == 0 {
                return Err(FailureReason::ConnectionLost);
            }
            filled += read;
            match parse_status_line(&buffer[..filled]) {
                Ok(line) => break line,
                Err(StatusLineError::Incomplete) if filled < buffer.len() => {}
                Err(_) => return Err(FailureReason::MalformedResponse),
            }
        };

        // The status is settled; the rest of the read only feeds diagnostics.
        while filled < buffer.len() {
            if let Some(offset) = body_offset(&buffer[..filled]) {
                let wanted = content_length(&buffer[..offset]).map_or(RESPONSE_PREVIEW, |len| {
                    len.min(RESPONSE_PREVIEW)
                });
                if filled - offset >= wanted {
                    break;
                }
            }
            match self.connector.read(&mut buffer[filled..]).await {
                Ok(0) | Err(_) => break,
                Ok(read) => filled += read,
            }
        }

        if let Some(offset) = body_offset(&buffer[..filled]) {
            let body = &buffer[offset..filled];
            let keep = body.len().min(RESPONSE_PREVIEW);
            let _ = self.response.extend_from_slice(&body[..keep]);
        }

        Ok(status.code)
    }
}

fn transfer_failure(err: SocketError) -> FailureReason {
    match err {
        SocketError::TimedOut => FailureReason::TimedOut,
        _ => FailureReason::ConnectionLost,
    }
}
