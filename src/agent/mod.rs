//! The agent layer: routing, planning, tools, events and the orchestrator.

pub mod events;
pub mod orchestrator;
pub mod plan;
pub mod router;
pub mod tools;

pub use events::{
    FinalPayload, PlannedStep, StepKind, StepRecord, StepStatus, StreamEvent, TableRecord,
};
pub use orchestrator::{Orchestrator, DEFAULT_BUDGET};
pub use plan::{Plan, Step, StepAction};
pub use router::{classify, Route};
pub use tools::{ParamSpec, ParamType, ToolSpec};
