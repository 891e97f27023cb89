//! Client for delivering messages to the buildsock consumer socket.
//!
//! One message per connection: connect, write the encoded document,
//! half-close, then wait for the consumer to close its end. Connections are
//! never reused and failed sends are not retried; the caller decides what a
//! failure means.

use crate::error::SendError;
use buildsock_protocol::Message;
use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

const READ_CHUNK_SIZE: usize = 1024;

/// Destination for protocol messages.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: &Message) -> Result<(), SendError>;
}

#[derive(Debug, Clone)]
pub struct ProtocolClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl ProtocolClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl MessageSink for ProtocolClient {
    fn send(&self, message: &Message) -> Result<(), SendError> {
        let payload = message
            .encode()
            .map_err(|err| SendError::Encode(err.to_string()))?;

        let mut stream =
            UnixStream::connect(&self.socket_path).map_err(|source| SendError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;
        if !self.timeout.is_zero() {
            let _ = stream.set_read_timeout(Some(self.timeout));
            let _ = stream.set_write_timeout(Some(self.timeout));
        }

        stream.write_all(&payload).map_err(SendError::Write)?;
        stream.flush().map_err(SendError::Write)?;
        stream.shutdown(Shutdown::Write).map_err(SendError::Close)?;

        wait_for_close(&mut stream)?;

        tracing::debug!(
            project = %message.project,
            commands = message.commands.len(),
            bytes = payload.len(),
            "Message delivered"
        );
        Ok(())
    }
}

/// Drains the connection until the consumer closes it. The consumer is not
/// expected to reply; anything it does write is discarded.
fn wait_for_close(stream: &mut UnixStream) -> Result<(), SendError> {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(SendError::Close(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildsock_protocol::{decode_message, Command};
    use std::os::unix::net::UnixListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn read_to_eof(stream: &mut UnixStream) -> Vec<u8> {
        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn sends_one_message_per_connection() {
        let temp = tempfile::tempdir().unwrap();
        let socket_path = temp.path().join("consumer.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        let server = thread::spawn(move || {
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().unwrap();
                let bytes = read_to_eof(&mut stream);
                received_clone
                    .lock()
                    .unwrap()
                    .push(decode_message(&bytes).unwrap());
            }
        });

        let client = ProtocolClient::new(&socket_path, Duration::from_secs(2));
        client
            .send(&Message::new("/repo", vec![Command::status("Building")]))
            .unwrap();
        client.send(&Message::clear("/repo")).unwrap();
        server.join().unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].commands, vec![Command::status("Building")]);
        assert_eq!(received[1], Message::clear("/repo"));
    }

    #[test]
    fn waits_for_consumer_to_close() {
        let temp = tempfile::tempdir().unwrap();
        let socket_path = temp.path().join("consumer.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let bytes = read_to_eof(&mut stream);
            stream.write_all(b"ignored").unwrap();
            bytes.len()
        });

        let client = ProtocolClient::new(&socket_path, Duration::from_secs(2));
        assert!(client.send(&Message::clear("/repo")).is_ok());
        assert!(server.join().unwrap() > 0);
    }

    #[test]
    fn missing_socket_is_connect_error() {
        let temp = tempfile::tempdir().unwrap();
        let client = ProtocolClient::new(temp.path().join("absent.sock"), Duration::from_secs(1));
        let err = client.send(&Message::clear("/repo")).unwrap_err();
        assert!(matches!(err, SendError::Connect { .. }));
    }
}
