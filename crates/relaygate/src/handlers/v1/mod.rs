//! V1 API handlers.

mod insights;
mod messages;
mod pauses;
mod sessions;
mod webhooks;

pub use insights::{all_insights, session_insights};
pub use messages::{get_logs, get_message, list_messages, send_message};
pub use pauses::{list_pauses, pause_address, resume_address};
pub use sessions::{create_session, delete_session, get_pairing, get_session};
pub use webhooks::{delete_webhook, get_webhook, list_webhooks, put_webhook};
