use log::{debug, trace, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use uuid::Uuid;

use crate::{
    packet::{ClientPacket, ServerPacket},
    server::ServerHandle,
};

const TCP_MAX_SIZE: usize = 65535;
const MAX_LINE_SIZE: usize = 1 << 20;

pub struct Connection {
    id: Uuid,
    tcp_stream: TcpStream,
    server_handle: ServerHandle,
}

impl Connection {
    pub fn start(id: Uuid, tcp_stream: TcpStream, server_handle: ServerHandle) {
        let connection = Connection {
            id,
            tcp_stream,
            server_handle,
        };
        tokio::spawn(async move {
            let id = connection.id;
            connection.run().await;
            debug!("{} disconnected", id);
        });
    }

    async fn run(mut self) {
        let mut data = Vec::new();
        loop {
            let mut buffer = vec![0; TCP_MAX_SIZE];
            let size = tokio::select! {
                v = self.tcp_stream.read(&mut buffer) => v,
                _ = self.server_handle.wait_shutdown() => return,
            };
            let Ok(size) = size else {
                return;
            };
            if size == 0 {
                return;
            }

            buffer.truncate(size);
            data.extend(buffer);

            while let Some(split_index) = data.iter().position(|v| *v == b'\n') {
                let mut line_bytes = data.split_off(split_index + 1);
                std::mem::swap(&mut data, &mut line_bytes);
                line_bytes.pop();

                let response = self.handle_line(line_bytes).await;
                if !self.send(response).await {
                    return;
                }
            }

            // No way to resync on an unterminated line, so the connection is dropped.
            if data.len() > MAX_LINE_SIZE {
                warn!("{} sent a request over {} bytes", self.id, MAX_LINE_SIZE);
                self.send(error("Request too long")).await;
                return;
            }
        }
    }

    /// Returns false when the connection should close.
    async fn send(&mut self, packet: ServerPacket) -> bool {
        let mut response = packet.to_json().to_string();
        trace!("{} > {}", self.id, response);
        response.push('\n');

        let written = tokio::select! {
            v = self.tcp_stream.write_all(response.as_bytes()) => v,
            _ = self.server_handle.wait_shutdown() => return false,
        };
        written.is_ok()
    }

    async fn handle_line(&self, line_bytes: Vec<u8>) -> ServerPacket {
        let Ok(line) = String::from_utf8(line_bytes) else {
            return error("Invalid utf8");
        };
        trace!("{} < {}", self.id, line);

        let Ok(json) = serde_json::from_str::<serde_json::Value>(&line) else {
            return error("Invalid json");
        };

        let packet = match ClientPacket::parse(json) {
            Ok(v) => v,
            Err(e) => return error(&e.to_string()),
        };

        match self.server_handle.request(self.id, packet).await {
            Some(response) => response,
            None => error("Server shutting down"),
        }
    }
}

fn error(message: &str) -> ServerPacket {
    ServerPacket::Error {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio_util::sync::CancellationToken;

    use crate::{model::Uptime, server::Server};

    use super::*;

    async fn exchange(lines: &[&str]) -> Vec<serde_json::Value> {
        let server = Server::run("127.0.0.1:0", Uptime::start(), CancellationToken::new())
            .await
            .unwrap();
        let stream = TcpStream::connect(server.local_address()).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);

        let mut responses = Vec::new();
        for line in lines {
            write.write_all(line.as_bytes()).await.unwrap();
            write.write_all(b"\n").await.unwrap();
            let mut response = String::new();
            reader.read_line(&mut response).await.unwrap();
            responses.push(serde_json::from_str(&response).unwrap());
        }
        server.shutdown();
        responses
    }

    #[tokio::test]
    async fn malformed_requests_keep_connection_open() {
        let responses = exchange(&[
            "not json",
            r#"{"request": "addjob", "task": [], "priority": 1}"#,
            r#"{"request": "addjob", "task": ["true"], "priority": 1}"#,
            r#"{"request": "getjob"}"#,
            r#"{"request": "getjob"}"#,
        ])
        .await;

        assert_eq!(responses[0], serde_json::json!({"error": "Invalid json"}));
        assert_eq!(responses[1], serde_json::json!({"error": "'task' is empty"}));
        assert_eq!(responses[2], serde_json::json!({"result": 0}));
        assert_eq!(responses[3], serde_json::json!({"result": [1, 1, ["true"]]}));
        assert_eq!(responses[4], serde_json::json!({"result": 0}));
    }

    #[tokio::test]
    async fn unterminated_request_is_cut_off() {
        let server = Server::run("127.0.0.1:0", Uptime::start(), CancellationToken::new())
            .await
            .unwrap();
        let stream = TcpStream::connect(server.local_address()).await.unwrap();
        let (read, mut write) = stream.into_split();

        write
            .write_all(&vec![b'a'; MAX_LINE_SIZE + 1])
            .await
            .unwrap();

        let mut reader = BufReader::new(read);
        let mut response = String::new();
        reader.read_line(&mut response).await.unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&response).unwrap(),
            serde_json::json!({"error": "Request too long"})
        );

        response.clear();
        assert_eq!(reader.read_line(&mut response).await.unwrap(), 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn health_request() {
        let responses = exchange(&[r#"{"request": "health"}"#]).await;
        assert_eq!(responses[0]["result"]["status"], "OK");
        assert!(responses[0]["result"]["uptime"].as_f64().unwrap() >= 0.0);
    }
}
