// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Histogram, IntCounter,
    IntCounterVec, IntGauge, Registry,
};

const TICK_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10., 20., 30., 60., 120., 300.,
];

#[derive(Clone, Debug)]
pub struct RelayerMetrics {
    pub(crate) transfers_submitted: IntCounter,
    pub(crate) transfers_confirmed: IntCounter,
    pub(crate) transfers_settled: IntCounter,
    pub(crate) transfers_failed: IntCounter,
    pub(crate) speed_ups: IntCounter,
    pub(crate) insufficient_witnesses: IntCounter,
    pub(crate) err_phase: IntCounterVec,
    pub(crate) active_witnesses: IntGauge,
    pub(crate) tick_latency: Histogram,
}

impl RelayerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            transfers_submitted: register_int_counter_with_registry!(
                "relayer_transfers_submitted",
                "Total number of transfers submitted to the validator contract",
                registry,
            )
            .unwrap(),
            transfers_confirmed: register_int_counter_with_registry!(
                "relayer_transfers_confirmed",
                "Total number of transfers the validator contract accepted",
                registry,
            )
            .unwrap(),
            transfers_settled: register_int_counter_with_registry!(
                "relayer_transfers_settled",
                "Total number of transfers fully reconciled locally",
                registry,
            )
            .unwrap(),
            transfers_failed: register_int_counter_with_registry!(
                "relayer_transfers_failed",
                "Total number of transfers rejected on chain",
                registry,
            )
            .unwrap(),
            speed_ups: register_int_counter_with_registry!(
                "relayer_speed_ups",
                "Total number of stuck submissions rebroadcast at higher gas",
                registry,
            )
            .unwrap(),
            insufficient_witnesses: register_int_counter_with_registry!(
                "relayer_insufficient_witnesses",
                "Total number of submission attempts below the witness quorum",
                registry,
            )
            .unwrap(),
            err_phase: register_int_counter_vec_with_registry!(
                "relayer_err_phase",
                "Total number of errors per service-loop phase, by error type",
                &["phase", "error_type"],
                registry,
            )
            .unwrap(),
            active_witnesses: register_int_gauge_with_registry!(
                "relayer_active_witnesses",
                "Size of the active witness set at the last refresh",
                registry,
            )
            .unwrap(),
            tick_latency: register_histogram_with_registry!(
                "relayer_tick_latency",
                "Latency of one full service-loop tick in seconds",
                TICK_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}
