pub mod beat;
pub mod clock;
pub mod engine;
pub mod policy;
pub mod sim;
pub mod subscribers;
pub mod tempo;
pub mod timer;
