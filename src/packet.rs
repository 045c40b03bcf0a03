use serde_json::json;
use thiserror::Error;

use crate::model::{EnqueueOutcome, TakeNext, Task};

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("No 'request' type passed")]
    NoRequest,
    #[error("Request type not a string")]
    RequestNotStr,
    #[error("Invalid request type")]
    InvalidRequestType,
    #[error("No 'task' passed")]
    NoTask,
    #[error("'task' not an array of strings")]
    TaskNotStrArray,
    #[error("'task' is empty")]
    EmptyTask,
    #[error("No 'priority' passed")]
    NoPriority,
    #[error("'priority' not an integer")]
    PriorityNotInt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    AddJob { task: Task, priority: i64 },
    GetJob,
    ClearJobQueue,
    Health,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    Error { message: String },
    AddJobResponse(EnqueueOutcome),
    GetJobResponse(TakeNext),
    ClearResponse,
    HealthResponse { uptime: f64 },
}

impl ClientPacket {
    pub fn parse(input: serde_json::Value) -> Result<ClientPacket, PacketError> {
        let request = input
            .get("request")
            .ok_or(PacketError::NoRequest)?
            .as_str()
            .ok_or(PacketError::RequestNotStr)?;

        match request {
            "addjob" => {
                let argv = input
                    .get("task")
                    .ok_or(PacketError::NoTask)?
                    .as_array()
                    .ok_or(PacketError::TaskNotStrArray)?
                    .iter()
                    .map(|arg| {
                        arg.as_str()
                            .map(|v| v.to_string())
                            .ok_or(PacketError::TaskNotStrArray)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let task = Task::new(argv).ok_or(PacketError::EmptyTask)?;
                let priority = input
                    .get("priority")
                    .ok_or(PacketError::NoPriority)?
                    .as_i64()
                    .ok_or(PacketError::PriorityNotInt)?;

                Ok(ClientPacket::AddJob { task, priority })
            }
            "getjob" => Ok(ClientPacket::GetJob),
            "clearjobq" => Ok(ClientPacket::ClearJobQueue),
            "health" => Ok(ClientPacket::Health),
            _ => Err(PacketError::InvalidRequestType),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ClientPacket::AddJob { task, priority } => {
                json!({"request": "addjob", "task": task, "priority": priority})
            }
            ClientPacket::GetJob => json!({"request": "getjob"}),
            ClientPacket::ClearJobQueue => json!({"request": "clearjobq"}),
            ClientPacket::Health => json!({"request": "health"}),
        }
    }
}

impl ServerPacket {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ServerPacket::Error { message } => json!({ "error": message }),
            ServerPacket::AddJobResponse(outcome) => json!({"result": outcome.status_code()}),
            ServerPacket::GetJobResponse(TakeNext::Job(job)) => {
                json!({"result": [job.priority, job.number, job.task]})
            }
            // 0 is the wire sentinel for an empty queue.
            ServerPacket::GetJobResponse(TakeNext::Empty) => json!({"result": 0}),
            ServerPacket::ClearResponse => json!({"result": 0}),
            ServerPacket::HealthResponse { uptime } => {
                json!({"result": {"status": "OK", "uptime": uptime}})
            }
        }
    }
}
