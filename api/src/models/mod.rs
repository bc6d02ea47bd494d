pub mod email;
pub mod entry;
pub mod session;
