#![deny(missing_docs)]
//! TOTP bot core library.
//!
//! Conversation state machine, editable-message cache and the entity store
//! behind the chat commands. Transports plug in through [`messenger::Messenger`].

/// Command tokens and the inline-button callback codec.
pub mod command;
/// Configuration management.
pub mod config;
/// Pending-dialog tracking for multi-step TOTP creation.
pub mod dialog;
/// Inbound event dispatch.
pub mod engine;
/// Outbound messaging capability.
pub mod messenger;
/// Removal of abandoned drafts and stale handles.
pub mod purge;
/// Editable-message handles.
pub mod registry;
/// Entity store (SQLite).
pub mod storage;
/// TOTP code generation.
pub mod totp;
/// User-facing texts.
pub mod views;
