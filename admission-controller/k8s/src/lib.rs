#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod extract;
mod namespace;

pub use self::{extract::WorkloadKind, namespace::ClusterNamespaces};
