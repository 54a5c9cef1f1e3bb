//! Run a vision model on your webcam stream and watch the results in the browser.

pub mod config;
pub mod controller;
pub mod endpoints;
pub mod engine;
pub mod meter;
pub mod postproc;
pub mod preproc;
pub mod pubsub;
pub mod render;
pub mod scheduler;
pub mod status;
pub mod tensor;
pub mod utils;
