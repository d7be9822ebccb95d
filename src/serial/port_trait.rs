//! Trait abstraction for opening the upstream byte stream, so the bridge
//! can run against a real serial port or an in-memory stream in tests

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Bidirectional byte stream to the pod controller
pub trait UpstreamStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> UpstreamStream for T {}

/// Boxed upstream stream as handed to the bridge
pub type BoxedUpstream = Box<dyn UpstreamStream>;

/// Opens a fresh upstream connection on every call
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open the link to the device
    async fn connect(&self) -> Result<BoxedUpstream>;

    /// Human-readable description of the link, for logs
    fn describe(&self) -> String;
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::error::PodBridgeError;
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::io::{DuplexStream, ReadBuf};

    /// Buffer size of each in-memory link
    const DUPLEX_BUFFER: usize = 64 * 1024;

    /// Connector that hands out in-memory links, one per `connect` call
    ///
    /// The test keeps the device end of each link. Once the queue is empty
    /// every `connect` fails.
    #[derive(Clone, Default)]
    pub struct DuplexConnector {
        links: Arc<Mutex<VecDeque<BoxedUpstream>>>,
        attempts: Arc<Mutex<usize>>,
    }

    impl DuplexConnector {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a link and return its device end
        pub fn add_link(&self) -> DuplexStream {
            let (bridge_end, device_end) = tokio::io::duplex(DUPLEX_BUFFER);
            self.links.lock().unwrap().push_back(Box::new(bridge_end));
            device_end
        }

        /// Queue a link whose device has stopped accepting bytes
        ///
        /// Reads still work through the returned device end; every write
        /// from the bridge fails with `BrokenPipe`.
        pub fn add_unwritable_link(&self) -> DuplexStream {
            let (bridge_end, device_end) = tokio::io::duplex(DUPLEX_BUFFER);
            self.links
                .lock()
                .unwrap()
                .push_back(Box::new(UnwritableLink(bridge_end)));
            device_end
        }

        pub fn attempts(&self) -> usize {
            *self.attempts.lock().unwrap()
        }
    }

    #[async_trait]
    impl UpstreamConnector for DuplexConnector {
        async fn connect(&self) -> Result<BoxedUpstream> {
            *self.attempts.lock().unwrap() += 1;
            match self.links.lock().unwrap().pop_front() {
                Some(link) => Ok(link),
                None => Err(PodBridgeError::Serial("Mock device unavailable".to_string())),
            }
        }

        fn describe(&self) -> String {
            "mock duplex link".to_string()
        }
    }

    /// Readable link that refuses every write
    struct UnwritableLink(DuplexStream);

    impl AsyncRead for UnwritableLink {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for UnwritableLink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "device stopped reading")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
