use std::{fmt, time::Instant};

use serde::Serialize;

/// Two tasks are the same job when their argument vectors are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Task(Vec<String>);

impl Task {
    pub fn new(argv: Vec<String>) -> Option<Task> {
        if argv.is_empty() {
            None
        } else {
            Some(Task(argv))
        }
    }

    pub fn program(&self) -> &str {
        &self.0[0]
    }

    pub fn args(&self) -> &[String] {
        &self.0[1..]
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Lower runs sooner.
    pub priority: i64,
    pub number: u64,
    pub task: Task,
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.number.cmp(&other.number))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Added,
    PriorityUpdated,
    DuplicateIgnored,
}

impl EnqueueOutcome {
    pub fn status_code(self) -> i64 {
        match self {
            EnqueueOutcome::Added | EnqueueOutcome::PriorityUpdated => 0,
            EnqueueOutcome::DuplicateIgnored => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TakeNext {
    Job(Job),
    Empty,
}

#[derive(Debug, Clone, Copy)]
pub struct Uptime {
    started: Instant,
}

impl Uptime {
    pub fn start() -> Uptime {
        Uptime {
            started: Instant::now(),
        }
    }

    pub fn seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(argv: &[&str]) -> Task {
        Task::new(argv.iter().map(|v| v.to_string()).collect()).unwrap()
    }

    #[test]
    fn empty_task_rejected() {
        assert_eq!(Task::new(Vec::new()), None);
    }

    #[test]
    fn task_program_and_args() {
        let task = task(&["bots-engine", "--new", "-cconfig"]);
        assert_eq!(task.program(), "bots-engine");
        assert_eq!(task.args(), ["--new", "-cconfig"]);
        assert_eq!(task.to_string(), "bots-engine --new -cconfig");
    }

    #[test]
    fn job_order_priority_then_number() {
        let a = Job {
            priority: 1,
            number: 7,
            task: task(&["a"]),
        };
        let b = Job {
            priority: 1,
            number: 8,
            task: task(&["b"]),
        };
        let c = Job {
            priority: -3,
            number: 9,
            task: task(&["c"]),
        };
        assert!(a < b);
        assert!(c < a);
    }

    #[test]
    fn status_codes() {
        assert_eq!(EnqueueOutcome::Added.status_code(), 0);
        assert_eq!(EnqueueOutcome::PriorityUpdated.status_code(), 0);
        assert_eq!(EnqueueOutcome::DuplicateIgnored.status_code(), 4);
    }
}
