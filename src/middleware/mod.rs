pub mod authenticate;
pub mod logging;

pub use authenticate::Authenticate;
pub use logging::RequestLogger;
