//! Workflow execution runtime: capability registry, step executor,
//! rate-limited channel dispatch, reply routing and the run supervisor.

pub mod capability;
pub mod dispatcher;
pub mod executor;
pub mod router;
pub mod supervisor;

pub use capability::{Capability, CapabilityError, CapabilityKind, CapabilityRegistry};
pub use dispatcher::ChannelDispatcher;
pub use executor::StepExecutor;
pub use router::{IntentRouter, OperatorNotifier, RoutedReply, TracingNotifier};
pub use supervisor::{RuntimeError, Supervisor};
