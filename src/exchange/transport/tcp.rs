//! TCP notification channel.
//!
//! Each side of a connection gets a [`TcpNotifier`] for outgoing and a
//! [`TcpInbox`] for incoming notifications. Used for direct connections
//! between two peers and for localhost testing.

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

use super::{read_length_prefixed, write_length_prefixed};
use crate::exchange::message::Notification;
use crate::exchange::services::{Inbox, Notifier};
use crate::exchange::ExchangeError;

/// Sending half of a TCP notification channel.
#[derive(Debug)]
pub struct TcpNotifier {
    writer: Mutex<BufWriter<WriteHalf<TcpStream>>>,
    peer_addr: String,
}

/// Receiving half of a TCP notification channel.
#[derive(Debug)]
pub struct TcpInbox {
    reader: BufReader<ReadHalf<TcpStream>>,
    peer_addr: String,
}

/// Splits a connected stream into both halves.
pub fn split_stream(stream: TcpStream) -> (TcpNotifier, TcpInbox) {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let (read_half, write_half) = tokio::io::split(stream);

    (
        TcpNotifier {
            writer: Mutex::new(BufWriter::new(write_half)),
            peer_addr: peer_addr.clone(),
        },
        TcpInbox {
            reader: BufReader::new(read_half),
            peer_addr,
        },
    )
}

impl TcpNotifier {
    /// Connects to a listening peer.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<(Self, TcpInbox), ExchangeError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ExchangeError::TransportFailure(format!("Failed to connect: {}", e)))?;
        Ok(split_stream(stream))
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Flushes and shuts down the write half.
    pub async fn close(&self) -> Result<(), ExchangeError> {
        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        writer.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TcpNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ExchangeError> {
        let data = notification
            .to_bytes()
            .map_err(|e| ExchangeError::SerializationFailed(e.to_string()))?;
        let mut writer = self.writer.lock().await;
        write_length_prefixed(&mut *writer, &data).await
    }
}

impl TcpInbox {
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

#[async_trait]
impl Inbox for TcpInbox {
    async fn next(&mut self) -> Result<Option<Notification>, ExchangeError> {
        let Some(data) = read_length_prefixed(&mut self.reader).await? else {
            return Ok(None);
        };
        Notification::from_bytes(&data)
            .map(Some)
            .map_err(|e| ExchangeError::SerializationFailed(e.to_string()))
    }
}

/// Accepts incoming notification connections.
pub struct TcpNotificationListener {
    listener: TcpListener,
}

impl TcpNotificationListener {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, ExchangeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ExchangeError::TransportFailure(format!("Failed to bind: {}", e)))?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> Result<(TcpNotifier, TcpInbox), ExchangeError> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| ExchangeError::TransportFailure(format!("Failed to accept: {}", e)))?;
        Ok(split_stream(stream))
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ExchangeError> {
        self.listener
            .local_addr()
            .map_err(|e| {
                ExchangeError::TransportFailure(format!("Failed to get local addr: {}", e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::message::Message;

    fn notification(i: usize) -> Notification {
        Notification {
            recipient_id: "bob".to_string(),
            message: Message::image(format!("/uploads/{}.png", i)),
        }
    }

    #[tokio::test]
    async fn test_tcp_notification_exchange() {
        let listener = TcpNotificationListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let (notifier, mut inbox) = TcpNotifier::connect(addr).await.unwrap();
            notifier.notify(&notification(1)).await.unwrap();

            let reply = inbox.next().await.unwrap().unwrap();
            assert_eq!(reply.message.carrier_ref, "/uploads/2.png");

            notifier.close().await.unwrap();
        });

        let (notifier, mut inbox) = listener.accept().await.unwrap();
        let received = inbox.next().await.unwrap().unwrap();
        assert_eq!(received, notification(1));

        notifier.notify(&notification(2)).await.unwrap();

        // Client shuts down its write half after reading the reply.
        assert!(inbox.next().await.unwrap().is_none());
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_multiple_notifications_in_order() {
        let listener = TcpNotificationListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let (notifier, _inbox) = TcpNotifier::connect(addr).await.unwrap();
            for i in 0..10 {
                notifier.notify(&notification(i)).await.unwrap();
            }
            notifier.close().await.unwrap();
        });

        let (_notifier, mut inbox) = listener.accept().await.unwrap();
        for i in 0..10 {
            let received = inbox.next().await.unwrap().unwrap();
            assert_eq!(received.message.carrier_ref, format!("/uploads/{}.png", i));
        }

        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_frame() {
        let listener = TcpNotificationListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            write_length_prefixed(&mut stream, b"{not json").await.unwrap();
        });

        let (_notifier, mut inbox) = listener.accept().await.unwrap();
        let err = inbox.next().await.unwrap_err();
        assert!(matches!(err, ExchangeError::SerializationFailed(_)));

        client_task.await.unwrap();
    }
}
