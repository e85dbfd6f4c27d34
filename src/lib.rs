// projeto: lstmpetr4
// file: src/lib.rs
// Next-day close forecaster for PETR4.SA: training pipeline and prediction API

pub mod api;
pub mod config;
pub mod neural;
