use std::io;

use log::trace;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

use crate::{
    model::{Job, TakeNext, Task},
    packet::ClientPacket,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection to job queue failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid json from job queue: {0}")]
    Json(#[from] serde_json::Error),
    #[error("job queue closed the connection without a response")]
    NoResponse,
    #[error("job queue fault: {0}")]
    Remote(String),
    #[error("unexpected response from job queue: {0}")]
    UnexpectedResponse(serde_json::Value),
}

/// Status returned to a submitter. The wire protocol does not distinguish a new job
/// from a priority change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    Accepted,
    DuplicateIgnored,
}

impl EnqueueStatus {
    pub fn code(self) -> u8 {
        match self {
            EnqueueStatus::Accepted => 0,
            EnqueueStatus::DuplicateIgnored => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueClient {
    address: String,
}

impl QueueClient {
    pub fn new(address: impl Into<String>) -> QueueClient {
        QueueClient {
            address: address.into(),
        }
    }

    pub async fn add_job(&self, task: Task, priority: i64) -> Result<EnqueueStatus, ClientError> {
        let result = self.call(ClientPacket::AddJob { task, priority }).await?;
        match result.as_i64() {
            Some(0) => Ok(EnqueueStatus::Accepted),
            Some(4) => Ok(EnqueueStatus::DuplicateIgnored),
            _ => Err(ClientError::UnexpectedResponse(result)),
        }
    }

    pub async fn get_job(&self) -> Result<TakeNext, ClientError> {
        let result = self.call(ClientPacket::GetJob).await?;
        if result.as_i64() == Some(0) {
            return Ok(TakeNext::Empty);
        }
        parse_job(&result)
            .map(TakeNext::Job)
            .ok_or(ClientError::UnexpectedResponse(result))
    }

    pub async fn clear(&self) -> Result<(), ClientError> {
        let result = self.call(ClientPacket::ClearJobQueue).await?;
        match result.as_i64() {
            Some(0) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse(result)),
        }
    }

    pub async fn health(&self) -> Result<f64, ClientError> {
        let result = self.call(ClientPacket::Health).await?;
        if result.get("status").and_then(|v| v.as_str()) != Some("OK") {
            return Err(ClientError::UnexpectedResponse(result));
        }
        result
            .get("uptime")
            .and_then(|v| v.as_f64())
            .ok_or(ClientError::UnexpectedResponse(result))
    }

    async fn call(&self, packet: ClientPacket) -> Result<serde_json::Value, ClientError> {
        let stream = TcpStream::connect(&self.address).await?;
        let (read, mut write) = stream.into_split();

        let mut request = packet.to_json().to_string();
        trace!("> {}", request);
        request.push('\n');
        write.write_all(request.as_bytes()).await?;

        let mut line = String::new();
        if BufReader::new(read).read_line(&mut line).await? == 0 {
            return Err(ClientError::NoResponse);
        }
        trace!("< {}", line.trim_end());

        let mut response: serde_json::Value = serde_json::from_str(&line)?;
        if let Some(message) = response.get("error") {
            return Err(ClientError::Remote(
                message.as_str().unwrap_or_default().to_string(),
            ));
        }
        match response.get_mut("result").map(serde_json::Value::take) {
            Some(result) => Ok(result),
            None => Err(ClientError::UnexpectedResponse(response)),
        }
    }
}

fn parse_job(value: &serde_json::Value) -> Option<Job> {
    let [priority, number, task] = value.as_array()?.as_slice() else {
        return None;
    };
    Some(Job {
        priority: priority.as_i64()?,
        number: number.as_u64()?,
        task: serde_json::from_value::<Vec<String>>(task.clone())
            .ok()
            .and_then(Task::new)?,
    })
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{model::Uptime, server::Server};

    fn task(argv: &[&str]) -> Task {
        Task::new(argv.iter().map(|v| v.to_string()).collect()).unwrap()
    }

    async fn start() -> (QueueClient, CancellationToken) {
        let cancellation_token = CancellationToken::new();
        let server = Server::run("127.0.0.1:0", Uptime::start(), cancellation_token.clone())
            .await
            .unwrap();
        (
            QueueClient::new(server.local_address().to_string()),
            cancellation_token,
        )
    }

    #[tokio::test]
    async fn scenario_over_the_wire() {
        let (client, cancellation_token) = start().await;

        assert_eq!(
            client.add_job(task(&["echo", "a"]), 5).await.unwrap(),
            EnqueueStatus::Accepted
        );
        assert_eq!(
            client.add_job(task(&["echo", "b"]), 1).await.unwrap(),
            EnqueueStatus::Accepted
        );
        assert_eq!(
            client.add_job(task(&["echo", "a"]), 5).await.unwrap(),
            EnqueueStatus::DuplicateIgnored
        );

        let TakeNext::Job(job) = client.get_job().await.unwrap() else {
            panic!("expected a job");
        };
        assert_eq!(job.task, task(&["echo", "b"]));
        assert_eq!(job.priority, 1);
        assert_eq!(job.number, 2);

        let TakeNext::Job(job) = client.get_job().await.unwrap() else {
            panic!("expected a job");
        };
        assert_eq!(job.task, task(&["echo", "a"]));

        assert_eq!(client.get_job().await.unwrap(), TakeNext::Empty);
        cancellation_token.cancel();
    }

    #[tokio::test]
    async fn clear_then_empty() {
        let (client, cancellation_token) = start().await;
        client.add_job(task(&["a"]), 1).await.unwrap();
        client.add_job(task(&["b"]), 1).await.unwrap();
        client.clear().await.unwrap();
        assert_eq!(client.get_job().await.unwrap(), TakeNext::Empty);
        cancellation_token.cancel();
    }

    #[tokio::test]
    async fn health_reports_uptime() {
        let (client, cancellation_token) = start().await;
        assert!(client.health().await.unwrap() >= 0.0);
        cancellation_token.cancel();
    }

    #[tokio::test]
    async fn connection_refused_is_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let client = QueueClient::new(address.to_string());
        assert!(matches!(client.get_job().await, Err(ClientError::Io(_))));
    }

    #[test]
    fn parse_job_rejects_bad_shapes() {
        use serde_json::json;
        assert!(parse_job(&json!([1, 2])).is_none());
        assert!(parse_job(&json!([1, 2, []])).is_none());
        assert!(parse_job(&json!(["1", 2, ["a"]])).is_none());
        assert_eq!(
            parse_job(&json!([1, 2, ["a", "b"]])),
            Some(Job {
                priority: 1,
                number: 2,
                task: task(&["a", "b"])
            })
        );
    }
}
