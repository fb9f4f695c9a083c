//! DeepFanout agent roles and the end-to-end research workflow.
//!
//! The Supervisor plans before the task graph exists; the Researcher,
//! Executor, Analyst and Critic run as graph nodes through the
//! [`AgentDispatcher`].

pub mod agent_context;
pub mod analyst;
pub mod critic;
pub mod dispatcher;
pub mod executor;
pub mod payloads;
pub mod researcher;
pub mod supervisor;
pub mod workflow;

pub use agent_context::{Agent, AgentContext, AgentResult};
pub use analyst::AnalystAgent;
pub use critic::{CriticAgent, assess, extract_claims};
pub use dispatcher::AgentDispatcher;
pub use executor::ExecutorAgent;
pub use payloads::{CritiqueVerdict, DraftOutput, ResearchOutput, SummaryOutput};
pub use researcher::ResearcherAgent;
pub use supervisor::SupervisorAgent;
pub use workflow::{
    ResearchOptions, ResearchOutcome, ResearchServices, run_research, run_research_with,
};
