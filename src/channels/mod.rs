//! Collaborator traits and their concrete transports.

pub mod email_poller;
pub mod gmail;
pub mod mailbox;
pub mod notifier;
pub mod telegram;

pub use email_poller::spawn_triage_poller;
pub use gmail::{GmailConfig, GmailConnector};
pub use mailbox::{Mailbox, MailboxConnector};
pub use notifier::Notifier;
pub use telegram::TelegramNotifier;
