#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use anchore_admission_controller_backend as backend;
pub use anchore_admission_controller_core as core;
pub use anchore_admission_controller_k8s as k8s;

mod admission;
mod args;
mod config;
mod metrics;

pub use self::{
    admission::Admission,
    args::Args,
    config::{ControllerConfig, Reloader, SharedSnapshot, Snapshot},
    metrics::AdmissionMetrics,
};
