pub mod chat;
pub mod message;
pub mod orchestrator;
pub mod playback;
pub mod registry;
pub mod session;
pub mod settings;
pub mod usage;
