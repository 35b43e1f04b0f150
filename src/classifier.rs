//! Broadcast failure classification
//!
//! Maps low-level signing and broadcast failures onto the categories a user
//! can act on and builds the notification for them.

use crate::events::Receipt;
use crate::notification::{ErrorChannel, Notification};
use crate::transaction::short_hash;
use std::fmt;
use tracing::warn;

/// Title of every send failure notification
pub const SENDING_ERROR_TITLE: &str = "Error sending transaction";

/// Category of a send failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendingErrorKind {
    OutOfGas,
    GasPriceTooLow,
    GasTooLow,
    Generic,
}

impl SendingErrorKind {
    /// Reason appended to the notification body, if the category has one
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            SendingErrorKind::OutOfGas => Some("out of gas"),
            SendingErrorKind::GasPriceTooLow => Some("gas price is too low"),
            SendingErrorKind::GasTooLow => Some("gas is too low"),
            SendingErrorKind::Generic => None,
        }
    }
}

impl fmt::Display for SendingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason().unwrap_or("generic"))
    }
}

/// What is known about a failed send
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendingError {
    /// Hash of the transaction, if one was assigned
    pub hash: Option<String>,

    /// Error message reported by the signer or the node
    pub message: Option<String>,

    /// Receipt accompanying the failure
    pub receipt: Option<Receipt>,
}

impl SendingError {
    pub fn for_hash(hash: Option<String>) -> Self {
        Self {
            hash,
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_receipt(mut self, receipt: Option<Receipt>) -> Self {
        self.receipt = receipt;
        self
    }
}

/// Classify a failure; the first matching rule wins
///
/// The substring checks run independently in this order: a receipt means
/// execution ran out of gas, then "out of gas", "gas price is too low" and
/// "gas is too low" are looked up in the message.
pub fn classify(error: &SendingError) -> SendingErrorKind {
    if error.receipt.is_some() {
        return SendingErrorKind::OutOfGas;
    }

    let message = error.message.as_deref().unwrap_or_default();
    if message.contains("out of gas") {
        SendingErrorKind::OutOfGas
    } else if message.contains("gas price is too low") {
        SendingErrorKind::GasPriceTooLow
    } else if message.contains("gas is too low") {
        SendingErrorKind::GasTooLow
    } else {
        SendingErrorKind::Generic
    }
}

/// Build the notification for a failed send
pub fn sending_error_notification(error: &SendingError) -> Notification {
    let subject = match &error.hash {
        Some(hash) => format!("Transaction {} was not sent", short_hash(hash)),
        None => "Transaction was not sent".to_string(),
    };

    let text = match classify(error).reason() {
        Some(reason) => format!("{}, because {}", subject, reason),
        None => subject,
    };

    Notification::danger(SENDING_ERROR_TITLE, text)
}

/// Classify a failed send and dispatch the notification
pub fn handle_sending_error(channel: &dyn ErrorChannel, error: &SendingError) {
    let notification = sending_error_notification(error);
    warn!(
        "Transaction send failed ({}): {}",
        classify(error),
        error.message.as_deref().unwrap_or("no error message")
    );
    channel.emit(notification);
}
