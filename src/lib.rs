//! Mimir is the chat-session and model-routing core of a multi-provider LLM
//! chat client: conversation threads, a builtin model catalog with daily
//! rate-limit fallback chains, API key rotation with a shared-key free tier,
//! and character-by-character response playback that survives a restart.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns threads, the model registry, usage tracking, request
//!   orchestration, settings, and typing playback.
//! - [`auth`] resolves and rotates API keys, including the shared-key pool
//!   behind the free-message quota.
//! - [`api`] speaks the provider wire protocols (Gemini, OpenRouter) behind
//!   one adapter trait.
//! - [`storage`] is the string-keyed persistence namespace everything above
//!   saves into.
//!
//! A typical embedding builds a [`storage::FileStore`], loads a
//! [`core::settings::SettingsStore`] and [`core::session::SessionStore`] on
//! top of it, and drives sends through the session store.

pub mod api;
pub mod auth;
pub mod core;
pub mod logging;
pub mod storage;
pub mod utils;
