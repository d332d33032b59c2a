mod mock;
mod smtp;
mod traits;

pub use mock::MockEmailProvider;
pub use smtp::SmtpProvider;
pub use traits::{EmailMessage, EmailProvider};
