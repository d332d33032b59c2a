mod api;
mod sdk;

pub use api::RacentAdapter;
pub use sdk::RacentSdk;
