mod api;
mod sdk;

pub use api::CertumAdapter;
pub use sdk::{CertumSdk, XmlParam};
