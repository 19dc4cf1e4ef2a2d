pub mod envelope;
pub mod info;
