/// Flood protection for "Access denied" replies
pub mod access;
/// Update handlers translating teloxide updates into engine events
pub mod handlers;
/// `Messenger` implementation on top of the Bot API
pub mod messenger;

pub use access::DenialThrottle;
pub use messenger::TelegramMessenger;
