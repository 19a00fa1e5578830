#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod credentials;
pub mod evaluate;
pub mod gate;
pub mod queue;
pub mod reduce;
pub mod selector;
pub mod validation;


pub use self::{
    backend::{BackendError, Image, ImageBackend, ANALYZED_STATUS},
    credentials::{Credential, CredentialNotFound, CredentialResolver, Credentials},
    evaluate::{Decision, Evaluator, ValidatorConfig},
    gate::{
        GateConfiguration, NamespaceLookupError, NamespaceLookupFailure, NamespaceResolver,
        PolicyReference, PolicySelector,
    },
    queue::AnalysisRequestQueue,
    reduce::reduce,
    selector::{ResourceSelector, SelectorType},
    validation::{Mode, UnknownMode, Validator, Verdict},
};
pub use k8s_openapi::{api::core::v1::PodSpec, apimachinery::pkg::apis::meta::v1::ObjectMeta};
