use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct AdmissionMetrics {
    decisions: Family<DecisionLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct DecisionLabels {
    kind: String,
    allowed: &'static str,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let decisions = Family::<DecisionLabels, Counter>::default();
        reg.register(
            "decisions",
            "Total number of admission decisions by resource kind",
            decisions.clone(),
        );
        Self { decisions }
    }

    pub(crate) fn decided(&self, kind: &str, allowed: bool) {
        let labels = DecisionLabels {
            kind: kind.to_string(),
            allowed: if allowed { "true" } else { "false" },
        };
        self.decisions.get_or_create(&labels).inc();
    }
}
