pub mod credentials;
pub mod sessions;
