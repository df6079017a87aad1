use prometheus::{
    IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec,
};

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub reconcile_failures: IntCounter,
    pub kernels_culled: IntCounter,
}

impl Metrics {
    pub fn new() -> Metrics {
        let reconciliations = register_int_counter_vec!(
            "jupyter_operator_reconciliations_total",
            "Successful reconcile passes by controller",
            &["controller"]
        )
        .expect("register reconciliation counter");
        let reconcile_failures = register_int_counter!(
            "jupyter_operator_reconcile_failures_total",
            "Reconcile passes that ended in an error"
        )
        .expect("register failure counter");
        let kernels_culled = register_int_counter!(
            "jupyter_operator_kernels_culled_total",
            "Kernels terminated by the idle culler"
        )
        .expect("register cull counter");

        Metrics {
            reconciliations,
            reconcile_failures,
            kernels_culled,
        }
    }
}
