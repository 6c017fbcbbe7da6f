// Key layout of one queue
//
//   {prefix}:{queue}:job:{id}    record JSON
//   {prefix}:{queue}:wait        list, LPUSH on enqueue, RPOP on claim
//   {prefix}:{queue}:delayed     zset scored by available_at
//   {prefix}:{queue}:active      set
//   {prefix}:{queue}:completed   set (only when not removed on completion)
//   {prefix}:{queue}:failed      set
//   {prefix}:{queue}:events      pub/sub channel of terminal events

use fakturace_core::domain::JobState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    base: String,
}

impl QueueKeys {
    pub fn new(prefix: &str, queue: &str) -> Self {
        Self {
            base: format!("{}:{}", prefix, queue),
        }
    }

    pub fn job(&self, id: &str) -> String {
        format!("{}{}", self.job_prefix(), id)
    }

    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.base)
    }

    pub fn wait(&self) -> String {
        format!("{}:wait", self.base)
    }

    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.base)
    }

    pub fn active(&self) -> String {
        format!("{}:active", self.base)
    }

    pub fn completed(&self) -> String {
        format!("{}:completed", self.base)
    }

    pub fn failed(&self) -> String {
        format!("{}:failed", self.base)
    }

    pub fn events(&self) -> String {
        format!("{}:events", self.base)
    }

    /// Index holding ids of records in `state`
    pub fn index(&self, state: JobState) -> String {
        match state {
            JobState::Queued => self.wait(),
            JobState::Active => self.active(),
            JobState::Delayed => self.delayed(),
            JobState::Completed => self.completed(),
            JobState::Failed => self.failed(),
        }
    }
}
