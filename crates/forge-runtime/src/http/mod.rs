//! HTTP surface DTOs (purpose & scope: the HTTP listener itself is an
//! external collaborator outside this crate's scope). These are the
//! request/response shapes a surface would serialize, kept here so the
//! wire contract is versioned alongside the engine types it mirrors.

mod dto;

pub use dto::*;
