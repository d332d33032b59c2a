mod api;
mod sdk;

pub use api::TrustasiaAdapter;
pub use sdk::TrustasiaSdk;
