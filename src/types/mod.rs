//! Domain types for the arbiter Cerbos client.
//!
//! These are idiomatic Rust types; the wire messages they convert to are
//! internal implementation details and are never exposed.

mod action;
pub(crate) mod attribute;
mod aux_data;
mod decision;
mod principal;
mod request;
mod resource;
mod token;

pub use action::Action;
pub use attribute::{AttributeValue, Attributes};
pub use aux_data::AuxData;
pub use decision::{CheckResult, Decision, ValidationError, ValidationSource};
pub use principal::{Principal, PrincipalBuilder};
pub use request::CheckRequest;
pub use resource::{Resource, ResourceBuilder, NEW_RESOURCE_ID};
pub use token::{BatchId, CorrelationToken};

pub(crate) use token::IdGenerator;
