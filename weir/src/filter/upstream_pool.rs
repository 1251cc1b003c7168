/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::{mpsc, watch};

use crate::pipeline::RequestFilter;
use crate::request::{Request, StageStatus};
use crate::response::Response;

use super::upstream::Upstream;

const PING_INTERVAL: Duration = Duration::from_secs(3);

pub struct UpstreamPoolEntry {
    pub upstream: Arc<Upstream>,
    /// 0 disables the entry, positive enables it, negative excludes it
    /// permanently.
    pub weight: i32,
}

/// A set of functionally equivalent upstreams served round-robin, with
/// health gating: failed forwards demote an entry to weight 0, the 3 second
/// pinger recovers it once its ping path answers 200 again.
pub struct UpstreamPool {
    name: String,
    entries: Vec<Arc<Upstream>>,
    weights: RwLock<Vec<i32>>,
    next_rx: tokio::sync::Mutex<mpsc::Receiver<Selected>>,
    shutdown_tx: watch::Sender<bool>,
}

/// What the selector publishes: the entry index, and whether it was only
/// selected because the whole pool has been down for two full passes.
#[derive(Clone, Copy)]
struct Selected {
    index: usize,
    fallthrough: bool,
}

impl UpstreamPool {
    pub fn new(name: &str, upstreams: Vec<UpstreamPoolEntry>) -> Arc<Self> {
        let mut entries = Vec::with_capacity(upstreams.len());
        let mut weights = Vec::with_capacity(upstreams.len());
        for e in upstreams {
            entries.push(e.upstream);
            weights.push(e.weight);
        }

        let (next_tx, next_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = watch::channel(false);
        let pool = Arc::new(UpstreamPool {
            name: name.to_string(),
            entries,
            weights: RwLock::new(weights),
            next_rx: tokio::sync::Mutex::new(next_rx),
            shutdown_tx,
        });

        tokio::spawn(Arc::clone(&pool).run_selector(next_tx));
        tokio::spawn(Arc::clone(&pool).run_pinger());

        pool
    }

    /// The next eligible entry, round-robin. Falls back to a disabled
    /// entry when everything has been down for two full passes, so the
    /// request still proceeds.
    pub async fn next(&self) -> (usize, Arc<Upstream>) {
        let mut rx = self.next_rx.lock().await;
        loop {
            let Some(selected) = rx.recv().await else {
                return (0, Arc::clone(&self.entries[0]));
            };
            // an entry may have been demoted between publish and pick-up
            if selected.fallthrough || self.weight_of(selected.index) > 0 {
                return (selected.index, Arc::clone(&self.entries[selected.index]));
            }
        }
    }

    /// Stops the selector and pinger tasks. Only call once the pool is no
    /// longer serving requests.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn log_status(&self) {
        let weights = self.read_weights();
        for (i, upstream) in self.entries.iter().enumerate() {
            info!(
                "upstream {}: {}:{}\t{}",
                self.name,
                upstream.transport().host(),
                upstream.transport().port(),
                weights[i]
            );
        }
    }

    fn read_weights(&self) -> Vec<i32> {
        match self.weights.read() {
            Ok(w) => w.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }

    fn weight_of(&self, index: usize) -> i32 {
        match self.weights.read() {
            Ok(w) => w[index],
            Err(p) => p.into_inner()[index],
        }
    }

    fn update_upstream(&self, index: usize, weight: i32) {
        let mut weights = match self.weights.write() {
            Ok(w) => w,
            Err(p) => p.into_inner(),
        };
        weights[index] = weight;
    }

    async fn run_selector(self: Arc<Self>, next_tx: mpsc::Sender<Selected>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let len = self.entries.len();
        if len == 0 {
            return;
        }
        let mut rr_count = 0usize;
        let mut loop_count = 0usize;
        loop {
            let next = rr_count % len;
            let weight = self.weight_of(next);
            // after two empty passes a disabled entry is better than
            // stalling the request; negative weights stay out regardless
            if (weight > 0 || loop_count > 2 * len) && weight >= 0 {
                let selected = Selected {
                    index: next,
                    fallthrough: weight <= 0,
                };
                loop_count = 0;
                tokio::select! {
                    _ = shutdown_rx.wait_for(|v| *v) => return,
                    r = next_tx.send(selected) => {
                        if r.is_err() {
                            return;
                        }
                    }
                }
            } else {
                loop_count += 1;
                if loop_count % len == 0 {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    // everything is down, don't spin the scheduler hot
                    tokio::task::yield_now().await;
                }
            }
            rr_count = rr_count.wrapping_add(1);
        }
    }

    async fn run_pinger(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let start = tokio::time::Instant::now() + PING_INTERVAL;
        let mut interval = tokio::time::interval_at(start, PING_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown_rx.wait_for(|v| *v) => return,
                _ = interval.tick() => {
                    let mut got_one = false;
                    for (i, upstream) in self.entries.iter().enumerate() {
                        if upstream.has_ping_path() {
                            got_one = true;
                            let pool = Arc::clone(&self);
                            let upstream = Arc::clone(upstream);
                            tokio::spawn(async move {
                                pool.ping_upstream(&upstream, i).await;
                            });
                        }
                    }
                    if !got_one {
                        break;
                    }
                }
            }
        }
        warn!("stopping ping for {}", self.name);
    }

    async fn ping_upstream(&self, upstream: &Upstream, index: usize) {
        let Some(is_up) = upstream.ping().await else {
            return;
        };
        let weight = self.weight_of(index);
        if weight < 0 {
            return;
        }
        // change in status
        if (weight > 0) != is_up {
            self.update_upstream(index, if is_up { 1 } else { 0 });
            self.log_status();
        }
    }
}

#[async_trait]
impl RequestFilter for UpstreamPool {
    async fn filter_request(&self, req: &mut Request<'_>) -> Option<Response> {
        let (index, upstream) = self.next().await;
        let res = upstream.filter_request(req).await;
        if let Some(stage) = req.current_stage() {
            if stage.status == StageStatus::Failure && self.weight_of(index) > 0 {
                // set by the upstream on transport errors, so mark this
                // upstream as down
                self.update_upstream(index, 0);
                self.log_status();
            }
        }
        res
    }
}
