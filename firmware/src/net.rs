//! TCP transport for the upload client over the embassy-net stack.

use core::net::Ipv4Addr;
use core::time::Duration;

use camnode_core::endpoint::Endpoint;
use camnode_core::upload::{HttpConnector, SocketError};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{ConnectError, Error as TcpError, TcpSocket};
use embassy_net::{IpAddress, Stack};
use embassy_time::with_timeout;

pub const RX_BUFFER_LEN: usize = 2048;
pub const TX_BUFFER_LEN: usize = 4096;

/// One reusable socket; each upload attempt connects and closes it.
pub struct StackConnector {
    stack: Stack<'static>,
    socket: TcpSocket<'static>,
    timeout: embassy_time::Duration,
}

impl StackConnector {
    pub fn new(
        stack: Stack<'static>,
        rx_buffer: &'static mut [u8; RX_BUFFER_LEN],
        tx_buffer: &'static mut [u8; TX_BUFFER_LEN],
    ) -> Self {
        Self {
            stack,
            socket: TcpSocket::new(stack, rx_buffer, tx_buffer),
            timeout: embassy_time::Duration::from_secs(30),
        }
    }

    async fn resolve(&self, endpoint: &Endpoint) -> Result<IpAddress, SocketError> {
        if let Some(octets) = endpoint.ipv4() {
            return Ok(IpAddress::Ipv4(Ipv4Addr::from(octets)));
        }
        let addresses = with_timeout(
            self.timeout,
            self.stack.dns_query(endpoint.host(), DnsQueryType::A),
        )
        .await
        .map_err(|_| SocketError::TimedOut)?
        .map_err(|_| SocketError::Unreachable)?;
        addresses.first().copied().ok_or(SocketError::Unreachable)
    }
}

fn ticks(duration: Duration) -> embassy_time::Duration {
    embassy_time::Duration::try_from(duration).unwrap_or(embassy_time::Duration::MAX)
}

const fn connect_error(err: ConnectError) -> SocketError {
    match err {
        ConnectError::ConnectionReset => SocketError::Refused,
        ConnectError::TimedOut => SocketError::TimedOut,
        ConnectError::NoRoute => SocketError::Unreachable,
        ConnectError::InvalidState => SocketError::Other,
    }
}

const fn io_error(err: TcpError) -> SocketError {
    match err {
        TcpError::ConnectionReset => SocketError::Closed,
    }
}

impl HttpConnector for StackConnector {
    async fn connect(&mut self, endpoint: &Endpoint, timeout: Duration) -> Result<(), SocketError> {
        self.timeout = ticks(timeout);
        let address = self.resolve(endpoint).await?;

        self.socket.abort();
        self.socket.set_timeout(Some(self.timeout));
        with_timeout(self.timeout, self.socket.connect((address, endpoint.port())))
            .await
            .map_err(|_| SocketError::TimedOut)?
            .map_err(connect_error)
    }

    async fn write_all(&mut self, mut bytes: &[u8]) -> Result<(), SocketError> {
        while !bytes.is_empty() {
            let written = with_timeout(self.timeout, self.socket.write(bytes))
                .await
                .map_err(|_| SocketError::TimedOut)?
                .map_err(io_error)?;
            if written == 0 {
                return Err(SocketError::Closed);
            }
            bytes = &bytes[written..];
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        with_timeout(self.timeout, self.socket.read(buf))
            .await
            .map_err(|_| SocketError::TimedOut)?
            .map_err(io_error)
    }

    async fn close(&mut self) {
        self.socket.close();
        let _ = with_timeout(self.timeout, self.socket.flush()).await;
        self.socket.abort();
    }
}
