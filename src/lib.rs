//! chat-relay - Streaming chat proxy for browser chat UIs
//!
//! Sits between a chat front end and a completion backend. Each request has its
//! roles canonicalized, a system prompt injected and its history trimmed to a
//! token budget. It is then shaped for the configured backend, and the
//! upstream stream is relayed back as uniform Server-Sent Events.

pub mod backend;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod stream;
pub mod telemetry;
pub mod tokenizer;
