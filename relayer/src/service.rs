// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The relay service loop.
//!
//! One scheduled task drains the recorder's queues through the destination
//! driver every `interval`: submit `new` transfers, check `submitted` ones,
//! settle `confirmed` ones. All three queues are snapshotted at the start of
//! a tick, so a transfer advances at most one state per tick and a freshly
//! submitted transfer is never checked in the same breath.
//!
//! Errors never leave the loop: they are logged, counted, and retried on the
//! next tick. Re-entrancy is safe because the driver serializes submissions
//! and every recorder mutation is a conditional update.
//!
//! A submission that broadcasts and is then cancelled before
//! `mark_submitted` leaves the row in `new` with a transaction in flight;
//! the retry either lands first (and the late observation is reconciled via
//! `check`) or the broadcast expires. The store never moves backwards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_relayer_store::Recorder;
use bridge_relayer_types::{RelayError, Transfer};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::RelayerMetrics;
use crate::validator::{StatusOnChain, TransferValidator};

pub struct RelayService {
    recorder: Arc<Recorder>,
    validator: Arc<dyn TransferValidator>,
    interval: Duration,
    metrics: Arc<RelayerMetrics>,
    cancel: CancellationToken,
}

impl RelayService {
    pub fn new(
        recorder: Arc<Recorder>,
        validator: Arc<dyn TransferValidator>,
        interval: Duration,
        metrics: Arc<RelayerMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            recorder,
            validator,
            interval,
            metrics,
            cancel,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(&self) {
        info!("relay service started, interval {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("relay service cancelled, exiting");
                    return;
                }
                _ = ticker.tick() => {}
            }
            let started = Instant::now();
            self.tick().await;
            self.metrics
                .tick_latency
                .observe(started.elapsed().as_secs_f64());
        }
    }

    /// One pass over all three queues. Public so tests can drive the loop
    /// without a timer.
    pub async fn tick(&self) {
        let to_submit = self.fetch("submit", self.recorder.transfers_to_submit()).await;
        let to_check = self.fetch("check", self.recorder.transfers_to_settle()).await;
        let to_settle = self.fetch("settle", self.recorder.transfers_to_check()).await;

        self.submit_phase(to_submit).await;
        if self.cancel.is_cancelled() {
            return;
        }
        self.check_phase(to_check).await;
        if self.cancel.is_cancelled() {
            return;
        }
        self.settle_phase(to_settle).await;
    }

    async fn fetch(
        &self,
        phase: &str,
        query: impl std::future::Future<Output = Result<Vec<Transfer>, RelayError>>,
    ) -> Vec<Transfer> {
        match query.await {
            Ok(transfers) => transfers,
            Err(e) => {
                error!("failed to list transfers for {} phase: {}", phase, e);
                self.note_error(phase, &e);
                Vec::new()
            }
        }
    }

    async fn submit_phase(&self, transfers: Vec<Transfer>) {
        for mut transfer in transfers {
            if self.cancel.is_cancelled() {
                return;
            }
            let key = transfer.key();
            let signatures = match self.recorder.witnesses(&key).await {
                Ok(signatures) => signatures,
                Err(e) => {
                    error!("failed to load signatures for {}: {}", key, e);
                    self.note_error("submit", &e);
                    continue;
                }
            };
            let id = transfer.id_on(self.validator.address());
            transfer.id = Some(id);
            match self.validator.submit(&transfer, &signatures).await {
                Ok(submission) => {
                    match self
                        .recorder
                        .mark_submitted(
                            &key,
                            id,
                            submission.nonce,
                            submission.gas_price,
                            submission.tx_hash,
                        )
                        .await
                    {
                        Ok(()) => self.metrics.transfers_submitted.inc(),
                        Err(e) => {
                            error!("failed to record submission of {}: {}", key, e);
                            self.note_error("submit", &e);
                        }
                    }
                }
                Err(RelayError::InsufficientWitnesses) => {
                    info!("insufficient witnesses for transfer {}, will retry", key);
                    self.metrics.insufficient_witnesses.inc();
                }
                Err(e) if e.is_retriable() => {
                    warn!("submission of {} postponed: {}", key, e);
                    self.note_error("submit", &e);
                }
                Err(e) => {
                    error!("failed to submit transfer {}: {}", key, e);
                    self.note_error("submit", &e);
                }
            }
        }
    }

    async fn check_phase(&self, transfers: Vec<Transfer>) {
        for transfer in transfers {
            if self.cancel.is_cancelled() {
                return;
            }
            let key = transfer.key();
            match self.validator.check(&transfer).await {
                Ok(StatusOnChain::Settled) => {
                    match self.recorder.mark_confirmed(&key).await {
                        Ok(()) => self.metrics.transfers_confirmed.inc(),
                        Err(e) => {
                            error!("failed to record confirmation of {}: {}", key, e);
                            self.note_error("check", &e);
                        }
                    }
                }
                Ok(StatusOnChain::NeedSpeedUp) => self.speed_up(&transfer).await,
                Ok(StatusOnChain::Rejected) => {
                    match self
                        .recorder
                        .mark_failed(&key, "submission rejected by the validator contract")
                        .await
                    {
                        Ok(()) => self.metrics.transfers_failed.inc(),
                        Err(e) => {
                            error!("failed to record rejection of {}: {}", key, e);
                            self.note_error("check", &e);
                        }
                    }
                }
                Ok(StatusOnChain::NotConfirmed) => {}
                // Ambiguous answer: treat as not confirmed, ask again next tick
                Err(e) => {
                    warn!("status of transfer {} unknown this tick: {}", key, e);
                    self.note_error("check", &e);
                }
            }
        }
    }

    async fn speed_up(&self, transfer: &Transfer) {
        let key = transfer.key();
        let signatures = match self.recorder.witnesses(&key).await {
            Ok(signatures) => signatures,
            Err(e) => {
                error!("failed to load signatures for {}: {}", key, e);
                self.note_error("check", &e);
                return;
            }
        };
        match self.validator.speed_up(transfer, &signatures).await {
            Ok(submission) => {
                match self
                    .recorder
                    .mark_speed_up(
                        &key,
                        submission.nonce,
                        submission.gas_price,
                        submission.tx_hash,
                    )
                    .await
                {
                    Ok(()) => self.metrics.speed_ups.inc(),
                    Err(e) => {
                        error!("failed to record speed-up of {}: {}", key, e);
                        self.note_error("check", &e);
                    }
                }
            }
            Err(e) => {
                warn!("speed-up of {} postponed: {}", key, e);
                self.note_error("check", &e);
            }
        }
    }

    async fn settle_phase(&self, transfers: Vec<Transfer>) {
        for transfer in transfers {
            if self.cancel.is_cancelled() {
                return;
            }
            let key = transfer.key();
            match self.recorder.mark_settled(&key).await {
                Ok(()) => self.metrics.transfers_settled.inc(),
                Err(e) => {
                    error!("failed to settle transfer {}: {}", key, e);
                    self.note_error("settle", &e);
                }
            }
        }
    }

    fn note_error(&self, phase: &str, error: &RelayError) {
        self.metrics
            .err_phase
            .with_label_values(&[phase, error.error_type()])
            .inc();
    }
}
