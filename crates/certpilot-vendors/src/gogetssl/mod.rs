mod api;
mod sdk;

pub use api::GogetsslAdapter;
pub use sdk::GogetsslSdk;
