//! Execution engine — worker supervision, dispatch, feedback, learning,
//! and the coordinator that sequences the whole pipeline.

pub mod coordinator;
pub mod dispatcher;
pub mod feedback;
pub mod learner;
pub mod supervisor;

pub use coordinator::PipelineCoordinator;
pub use dispatcher::{ApprovalHub, DispatchOutcome, ExecutionDispatcher, PendingAction};
pub use feedback::{FeedbackCollector, FeedbackSample};
pub use learner::{Learner, LearnerStatus};
pub use supervisor::{SupervisorConfig, WorkerSupervisor};
