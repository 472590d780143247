/*!
 * Job handling.
 *
 * - `job`: inbound and outbound message bodies and the job lifecycle
 * - `handler`: eligibility, reply, acknowledgment and failure taxonomy
 * - `failures`: bounded failure counts per retry key
 * - `worker`: the coordinator that drives N translation slots
 */

pub mod failures;
pub mod handler;
pub mod job;
pub mod worker;

pub use failures::FailureLedger;
pub use handler::{HandlerConfig, JobOutcome, TaskHandler, run_translation};
pub use job::{Job, JobMessage, JobReply, JobState, TaskData};
pub use worker::{EngineSupervisor, PoolConfig, Worker, WorkerStats};
