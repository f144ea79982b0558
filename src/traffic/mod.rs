//! Traffic Router (§4.4): direct/proxy egress decisions, resource
//! blocking, and channel rotation.

mod resource_policy;
mod router;

pub use resource_policy::{ResourcePolicy, ResourceType};
pub use router::{RequestOutcome, RoutingDecision, TrafficRouter, TrafficRouterConfig};
