//! Wire messages for the Cerbos `CheckResources` RPC.
//!
//! Only the subset of `cerbos.engine.v1`, `cerbos.request.v1`,
//! `cerbos.response.v1` and `cerbos.schema.v1` that the check path needs.
//! Field numbers follow the published Cerbos API so these encode and decode
//! the same bytes the generated clients do.

#![allow(missing_docs)]

use std::collections::HashMap;

/// Fully-qualified gRPC method path.
pub(crate) const CHECK_RESOURCES_PATH: &str = "/cerbos.svc.v1.CerbosService/CheckResources";

// ── cerbos.engine.v1 ────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Principal {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub policy_version: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "3")]
    pub roles: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(map = "string, message", tag = "4")]
    pub attr: HashMap<::prost::alloc::string::String, ::prost_types::Value>,
    #[prost(string, tag = "5")]
    pub scope: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Resource {
    #[prost(string, tag = "1")]
    pub kind: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub policy_version: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub id: ::prost::alloc::string::String,
    #[prost(map = "string, message", tag = "4")]
    pub attr: HashMap<::prost::alloc::string::String, ::prost_types::Value>,
    #[prost(string, tag = "5")]
    pub scope: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OutputEntry {
    #[prost(string, tag = "1")]
    pub src: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub val: ::core::option::Option<::prost_types::Value>,
}

// ── cerbos.effect.v1 ────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Effect {
    Unspecified = 0,
    Allow = 1,
    Deny = 2,
    NoMatch = 3,
}

// ── cerbos.schema.v1 ────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ValidationErrorSource {
    Unspecified = 0,
    Principal = 1,
    Resource = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidationError {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(enumeration = "ValidationErrorSource", tag = "3")]
    pub source: i32,
}

// ── cerbos.request.v1 ───────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Jwt {
    #[prost(string, tag = "1")]
    pub token: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub key_set_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuxData {
    #[prost(message, optional, tag = "1")]
    pub jwt: ::core::option::Option<Jwt>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResourceEntry {
    #[prost(string, repeated, tag = "1")]
    pub actions: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, optional, tag = "2")]
    pub resource: ::core::option::Option<Resource>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckResourcesRequest {
    #[prost(string, tag = "1")]
    pub request_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub principal: ::core::option::Option<Principal>,
    #[prost(message, repeated, tag = "3")]
    pub resources: ::prost::alloc::vec::Vec<ResourceEntry>,
    #[prost(message, optional, tag = "4")]
    pub aux_data: ::core::option::Option<AuxData>,
    #[prost(bool, tag = "5")]
    pub include_meta: bool,
}

// ── cerbos.response.v1 ──────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultResource {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub kind: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub policy_version: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub scope: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultEntry {
    #[prost(message, optional, tag = "1")]
    pub resource: ::core::option::Option<ResultResource>,
    #[prost(map = "string, enumeration(Effect)", tag = "2")]
    pub actions: HashMap<::prost::alloc::string::String, i32>,
    #[prost(message, repeated, tag = "3")]
    pub validation_errors: ::prost::alloc::vec::Vec<ValidationError>,
    #[prost(message, repeated, tag = "5")]
    pub outputs: ::prost::alloc::vec::Vec<OutputEntry>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckResourcesResponse {
    #[prost(string, tag = "1")]
    pub request_id: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub results: ::prost::alloc::vec::Vec<ResultEntry>,
    #[prost(string, tag = "3")]
    pub cerbos_call_id: ::prost::alloc::string::String,
}
