//! `rpc-method-router` is a method-aware JSON-RPC router.
//!
//! Each inbound call is sent to the upstream configured for its `method` (or a default). Batches
//! are split into one sub-batch per upstream, dispatched concurrently, and merged back into a
//! single response array.
//!
//! Core modules:
//! - [`config`]: proxy config (YAML, with `${VAR}` rendering via [`template`])
//! - [`routes`]: method -> endpoint table
//! - [`rpc`]: call record and id model
//! - [`classify`]: single vs batch detection
//! - [`dispatch`]: single-call passthrough
//! - [`batching`]: batch grouping, fan-out, and merge
//! - [`forward`]: outbound HTTP POST
//! - [`server`]: axum server wiring

pub mod batching;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod forward;
pub mod routes;
pub mod rpc;
pub mod server;
pub mod template;
