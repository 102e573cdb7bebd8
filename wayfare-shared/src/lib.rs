pub mod models;
pub mod pii;

pub use models::events::BookingAdvancedEvent;
pub use models::session::PaymentSession;
pub use pii::Masked;
