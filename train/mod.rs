pub mod calibration;
pub mod config;
pub mod data;
pub mod forest;
pub mod matrix;
pub mod metrics;
pub mod pipeline;
pub mod search;
pub mod split;
