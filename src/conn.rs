//! A module providing the network connection used by the supervisor.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{sink::Sink, stream::Stream};
use native_tls::TlsConnector;
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;
use tokio_util::codec::{Decoder, Framed};

use dbot_proto::{LineCodec, ProtocolError};

use crate::config::ConfigStore;
use crate::error::Result;

/// The reconnect backoff schedule: zero at first, then ten seconds, doubled
/// after every failed attempt, capped at ten minutes.
pub fn next_backoff(delay: u64) -> u64 {
    match delay {
        0 => 10,
        d => (d * 2).min(600),
    }
}

/// A line-framed connection to the IRC network.
pub enum Connection {
    #[doc(hidden)]
    Unsecured(Framed<TcpStream, LineCodec>),
    #[doc(hidden)]
    Secured(Framed<TlsStream<TcpStream>, LineCodec>),
    #[doc(hidden)]
    #[cfg(test)]
    Mock(Framed<tokio::io::DuplexStream, LineCodec>),
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match *self {
                Connection::Unsecured(_) => "Connection::Unsecured(...)",
                Connection::Secured(_) => "Connection::Secured(...)",
                #[cfg(test)]
                Connection::Mock(_) => "Connection::Mock(...)",
            }
        )
    }
}

impl Connection {
    /// Creates a new `Connection` using the specified configuration.
    pub async fn new(config: &ConfigStore) -> Result<Connection> {
        let server = config.network();
        let port = config.port();

        log::info!(
            "Connecting to {}:{} using SSL: {}",
            server,
            port,
            config.ssl()
        );

        let socket = TcpStream::connect((server.as_str(), port)).await?;

        if config.ssl() {
            let mut builder = TlsConnector::builder();
            if config.ssl_noverify() {
                log::warn!("TLS certificate verification is DISABLED (ssl_noverify)");
                builder.danger_accept_invalid_certs(true);
            }
            let connector: tokio_native_tls::TlsConnector = builder.build()?.into();
            let stream = connector
                .connect(&server, socket)
                .await
                .map_err(crate::error::Error::Tls)?;
            Ok(Connection::Secured(LineCodec::new().framed(stream)))
        } else {
            Ok(Connection::Unsecured(LineCodec::new().framed(socket)))
        }
    }

    /// Wraps one end of an in-process duplex stream. Used by tests in place
    /// of a real socket.
    #[cfg(test)]
    pub fn mock(stream: tokio::io::DuplexStream) -> Connection {
        Connection::Mock(LineCodec::new().framed(stream))
    }
}

impl Stream for Connection {
    type Item = std::result::Result<String, ProtocolError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut *self {
            Connection::Unsecured(inner) => Pin::new(inner).poll_next(cx),
            Connection::Secured(inner) => Pin::new(inner).poll_next(cx),
            #[cfg(test)]
            Connection::Mock(inner) => Pin::new(inner).poll_next(cx),
        }
    }
}

impl Sink<String> for Connection {
    type Error = ProtocolError;

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        match &mut *self {
            Connection::Unsecured(inner) => Pin::new(inner).poll_ready(cx),
            Connection::Secured(inner) => Pin::new(inner).poll_ready(cx),
            #[cfg(test)]
            Connection::Mock(inner) => Pin::new(inner).poll_ready(cx),
        }
    }

    fn start_send(mut self: Pin<&mut Self>, item: String) -> std::result::Result<(), Self::Error> {
        match &mut *self {
            Connection::Unsecured(inner) => Pin::new(inner).start_send(item),
            Connection::Secured(inner) => Pin::new(inner).start_send(item),
            #[cfg(test)]
            Connection::Mock(inner) => Pin::new(inner).start_send(item),
        }
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        match &mut *self {
            Connection::Unsecured(inner) => Pin::new(inner).poll_flush(cx),
            Connection::Secured(inner) => Pin::new(inner).poll_flush(cx),
            #[cfg(test)]
            Connection::Mock(inner) => Pin::new(inner).poll_flush(cx),
        }
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        match &mut *self {
            Connection::Unsecured(inner) => Pin::new(inner).poll_close(cx),
            Connection::Secured(inner) => Pin::new(inner).poll_close(cx),
            #[cfg(test)]
            Connection::Mock(inner) => Pin::new(inner).poll_close(cx),
        }
    }
}

#[cfg(test)]
mod test {
    use super::next_backoff;

    #[test]
    fn backoff_schedule() {
        let mut delay = 0;
        let mut seen = vec![delay];
        for _ in 0..10 {
            delay = next_backoff(delay);
            seen.push(delay);
        }
        assert_eq!(&seen[..9], &[0, 10, 20, 40, 80, 160, 320, 600, 600]);
        // Non-decreasing and bounded by 600.
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|d| *d <= 600));
    }
}
