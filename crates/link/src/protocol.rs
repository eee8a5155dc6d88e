//! Link operations and their payloads.
//!
//! A worker issues exactly two requests over its lifetime: one job pull and,
//! if it got a job, one result push. Both carry the worker's token.

use serde::{Deserialize, Serialize};

use forkstress_core::{Job, TestResult};

// ── Topics ──────────────────────────────────────────────────────────────

/// Worker asks for the job bound to its token.
pub const PULL_JOB: &str = "link.job.pull";

/// Server answers a pull with `Some(job)` once, `None` afterwards.
pub const JOB_REPLY: &str = "link.job.reply";

/// Worker hands back its finished result.
pub const PUSH_RESULT: &str = "link.result.push";

/// Server accepted the pushed result.
pub const RESULT_ACK: &str = "link.result.ack";

/// Server rejected a request (unknown token, duplicate result, bad payload).
pub const ERROR_REPLY: &str = "link.error";

// ── Payloads ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullJob {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReply {
    pub job: Option<Job>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResult {
    pub token: String,
    pub result: TestResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub reason: String,
}
