//! Collaborator services used by the messaging core.
//!
//! ARCHITECTURE
//! ============
//! Service modules own auth, persistence, and push-delivery concerns so the
//! presence registry, router, and websocket handler can stay focused on
//! connection state and fanout.

pub mod auth;
pub mod message;
pub mod notify;
