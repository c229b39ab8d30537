pub mod event;
pub mod token;
