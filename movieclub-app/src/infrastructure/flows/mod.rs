mod flow_registry;

pub use flow_registry::{FlowKind, FlowRegistry, PendingFlow, DEFAULT_FLOW_TTL};
