pub mod envelope;
pub mod status;

pub use envelope::Reply;
