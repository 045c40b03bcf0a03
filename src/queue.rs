use log::{debug, info};
use sorted_vec::SortedVec;

use crate::model::{EnqueueOutcome, Job, TakeNext, Task};

// Sorted on (priority, number): the next job is always at index 0.
#[derive(Default)]
pub struct JobQueue {
    jobs: SortedVec<Job>,
    job_counter: u64,
}

impl JobQueue {
    pub fn new() -> JobQueue {
        JobQueue::default()
    }

    pub fn enqueue(&mut self, task: Task, priority: i64) -> EnqueueOutcome {
        if let Some(index) = self.jobs.iter().position(|job| job.task == task) {
            if self.jobs[index].priority == priority {
                info!("Duplicate job not added: {}", task);
                return EnqueueOutcome::DuplicateIgnored;
            }

            // Re-insert so the sort order reflects the new priority; the number is kept.
            let mut job = self.jobs.remove_index(index);
            job.priority = priority;
            self.jobs.insert(job);
            info!("Duplicate job, changed priority to {}: {}", priority, task);
            self.log_queue();
            return EnqueueOutcome::PriorityUpdated;
        }

        self.job_counter += 1;
        info!(
            "Added job {}, priority {}: {}",
            self.job_counter, priority, task
        );
        self.jobs.insert(Job {
            priority,
            number: self.job_counter,
            task,
        });
        self.log_queue();
        EnqueueOutcome::Added
    }

    pub fn take_next(&mut self) -> TakeNext {
        if self.is_empty() {
            return TakeNext::Empty;
        }
        let job = self.jobs.remove_index(0);
        self.log_queue();
        TakeNext::Job(job)
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
        info!("Job queue cleared.");
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn log_queue(&self) {
        debug!(
            "Job queue changed. New queue: {:?}",
            self.jobs
                .iter()
                .map(|job| (job.priority, job.number, job.task.to_string()))
                .collect::<Vec<_>>()
        );
    }
}
