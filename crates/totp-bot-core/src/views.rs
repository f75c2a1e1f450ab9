//! User-facing texts
//!
//! Every reply the dispatch engine sends is produced here.

use crate::command::Command;
use std::fmt::Display;

// ─────────────────────────────────────────────────────────────────────────────
// Trait definition
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for TOTP bot text rendering
pub trait TotpView {
    /// Usage text listing the menu commands
    fn help_message(project_url: &str) -> String;
    /// Privacy policy pointer
    fn privacy_message(project_url: &str) -> String;

    /// Prompt for the name of a new TOTP
    fn input_name() -> &'static str;
    /// The name was blank
    fn name_empty() -> &'static str;
    /// The owner already has a TOTP with this name
    fn name_taken(name: &str) -> String;
    /// Prompt for the secret of a new TOTP
    fn input_secret(name: &str) -> String;
    /// The secret is not base32
    fn invalid_secret(name: &str) -> String;
    /// A TOTP was created
    fn created(name: &str) -> String;
    /// Creation dialog abandoned
    fn creation_canceled() -> &'static str;
    /// The draft idled past its TTL; the message that arrived was removed
    fn creation_timed_out(name: &str) -> String;
    /// `/cancel` with nothing in progress
    fn nothing_to_cancel() -> &'static str;

    /// The owner has no TOTP
    fn no_totp() -> &'static str;
    /// Bullet list of TOTP names
    fn totp_list(names: &[&str]) -> String;
    /// Header of the delete selection
    fn select_to_delete() -> &'static str;
    /// Header of the generate selection
    fn select_to_generate() -> &'static str;
    /// Label of the cancel button
    fn cancel_label() -> &'static str;

    /// Selection message after a delete
    fn deleted() -> &'static str;
    /// Selection message after a code was generated
    fn generated(name: &str, code: &str, seconds_left: i64) -> String;
    /// Selection message after cancel
    fn canceled() -> &'static str;
    /// The button belongs to a selection that is gone
    fn selection_expired() -> &'static str;

    /// Unknown slash command
    fn no_such_command(text: &str) -> String;
    /// Callback payload that does not decode
    fn invalid_callback(data: &str) -> String;
    /// Callback without payload
    fn empty_callback() -> &'static str;
    /// Message without text
    fn invalid_message_type() -> &'static str;
    /// Generic "failed to <action>" report
    fn failed(action: &str, error: &dyn Display) -> String;
}

// ─────────────────────────────────────────────────────────────────────────────
// Default implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Default English implementation of `TotpView`
pub struct DefaultTotpView;

impl TotpView for DefaultTotpView {
    fn help_message(project_url: &str) -> String {
        let usage = Command::MENU
            .iter()
            .map(|c| format!("{} : {}", c.token(), c.description()))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Usage:\n\n{usage}\n\nversion: {}\n\n* Source code: {project_url}",
            env!("CARGO_PKG_VERSION")
        )
    }

    fn privacy_message(project_url: &str) -> String {
        format!("Privacy Policy:\n\n{project_url}/raw/master/PRIVACY.md")
    }

    fn input_name() -> &'static str {
        "Input name for your TOTP:"
    }

    fn name_empty() -> &'static str {
        "Name cannot be empty. Input name for your TOTP:"
    }

    fn name_taken(name: &str) -> String {
        format!("You already have a TOTP named `{name}`. Input another name:")
    }

    fn input_secret(name: &str) -> String {
        format!("Input secret for your TOTP `{name}`:")
    }

    fn invalid_secret(name: &str) -> String {
        format!("That is not a valid base32 secret. Input secret for your TOTP `{name}` again:")
    }

    fn created(name: &str) -> String {
        format!("Your TOTP `{name}` was successfully created.")
    }

    fn creation_canceled() -> &'static str {
        "Canceled creating your TOTP."
    }

    fn creation_timed_out(name: &str) -> String {
        format!(
            "Creating your TOTP `{name}` timed out and your message was removed. Send /new to start again."
        )
    }

    fn nothing_to_cancel() -> &'static str {
        "There is nothing to cancel."
    }

    fn no_totp() -> &'static str {
        "You have no TOTP registered yet."
    }

    fn totp_list(names: &[&str]) -> String {
        let lines = names
            .iter()
            .map(|n| format!("• {n}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Your TOTPs:\n\n{lines}")
    }

    fn select_to_delete() -> &'static str {
        "Select TOTP to delete:"
    }

    fn select_to_generate() -> &'static str {
        "Select TOTP to generate OTP:"
    }

    fn cancel_label() -> &'static str {
        "Cancel"
    }

    fn deleted() -> &'static str {
        "Your TOTP was successfully deleted."
    }

    fn generated(name: &str, code: &str, seconds_left: i64) -> String {
        format!("{code}\n\n({name}, valid for {seconds_left}s)")
    }

    fn canceled() -> &'static str {
        "Canceled"
    }

    fn selection_expired() -> &'static str {
        "This selection has expired or was already used."
    }

    fn no_such_command(text: &str) -> String {
        format!("No such command: {text}")
    }

    fn invalid_callback(data: &str) -> String {
        format!("Invalid callback query data: {data}")
    }

    fn empty_callback() -> &'static str {
        "Callback query data is empty."
    }

    fn invalid_message_type() -> &'static str {
        "Invalid message type"
    }

    fn failed(action: &str, error: &dyn Display) -> String {
        format!("Failed to {action}: {error}")
    }
}
