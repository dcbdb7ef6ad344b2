//! The polling scheduler.
//!
//! One cooperative loop per controller instance: park until the scan
//! period (or a wake signal) expires, drain queued requests, then poll
//! every in-motion axis through the executor, parser and completion
//! detector. A failure on one axis never unwinds the cycle — it lands
//! in that axis's status and the loop moves on.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use motion_core::command::{Directive, MessageClass, MotionCommand};
use motion_core::dialect::BatchMode;

use crate::axis::{MotionNode, PollVerdict};
use crate::builder::{build_transaction, BuildContext};
use crate::controller::{fill_axis, Controller, HostEvent, MotionRequest, Request};
use crate::executor::{self, ExchangeOutcome};
use crate::parser::{apply_reply, ParsedStatus};

/// Park time when nothing is in motion; requests and wake signals cut
/// it short.
const IDLE_WAIT: Duration = Duration::from_secs(1000);

impl Controller {
    /// The poll task. Runs until shutdown, handle drop, or a hardware
    /// self-fault disables the instance.
    pub async fn run(mut self) {
        info!(
            dialect = self.dialect.name,
            axes = self.axes.len(),
            "poll task started"
        );
        let mut last_sweep = Instant::now();

        loop {
            let wait = if self.any_in_motion() {
                self.cfg.scan_period().saturating_sub(last_sweep.elapsed())
            } else {
                IDLE_WAIT
            };
            if !wait.is_zero() {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = sleep(wait) => {}
                }
            }

            if self.drain_requests().await {
                break;
            }
            if self.disabled.load(Ordering::SeqCst) {
                break;
            }

            if self.any_in_motion() {
                last_sweep = Instant::now();
                self.sweep(false).await;
                if self.disabled.load(Ordering::SeqCst) {
                    break;
                }
            }
        }

        info!(dialect = self.dialect.name, "poll task stopped");
    }

    fn any_in_motion(&self) -> bool {
        self.axes.iter().any(|a| a.in_motion())
    }

    /// Initial status pass so the first published snapshots carry real
    /// hardware state.
    pub(crate) async fn initial_sweep(&mut self) {
        self.sweep(true).await;
    }

    /// Drain the request queue; returns true on shutdown.
    async fn drain_requests(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(Request::Transact(request)) => self.handle_request(request).await,
                Ok(Request::Shutdown) => return true,
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    async fn handle_request(&mut self, request: MotionRequest) {
        let index = request.axis;
        let Some(axis) = self.axes.get(index) else {
            warn!(axis = index, "request for unknown axis dropped");
            return;
        };
        let Some(label) = self.dialect.axis_label(index) else {
            warn!(axis = index, "dialect cannot address axis; request dropped");
            return;
        };

        let ctx = BuildContext {
            axis_label: label,
            resolution: axis.resolution,
            decimals: axis.decimals,
            base_velocity: axis.base_velocity,
            plus_limit_active: axis.status.plus_limit,
            minus_limit_active: axis.status.minus_limit,
            high_limit: axis.high_limit,
            low_limit: axis.low_limit,
            home_preset: axis.home_preset,
        };

        let txn = match build_transaction(
            &self.dialect,
            &ctx,
            &request.commands,
            request.pre.as_deref(),
            request.post.clone(),
        ) {
            Ok(txn) => txn,
            Err(e) => {
                // Rejected before any bytes were sent.
                warn!(axis = index, error = %e, "transaction rejected at build");
                return;
            }
        };
        if txn.adjusted {
            debug!(axis = index, "parameters adjusted to hardware limits");
        }

        // One motion node per axis: a new move is refused while one is
        // outstanding. Velocity updates are the exception — they retarget
        // an active jog.
        if txn.class == MessageClass::Motion && self.axes[index].in_motion() {
            warn!(axis = index, "move requested while a motion is outstanding; dropped");
            return;
        }

        let sent = if txn.is_noop() {
            true
        } else {
            let outcome = {
                let mut transport = self.transport.lock().await;
                executor::send_transaction(
                    transport.as_mut(),
                    &self.dialect,
                    &self.params,
                    &txn,
                )
                .await
            };
            match outcome {
                Ok(out) if !out.is_failure() => {
                    self.health = self.health.on_success();
                    self.axes[index].comm_recovered();
                    true
                }
                Ok(out) => {
                    warn!(axis = index, outcome = ?out, "command exchange failed");
                    self.fail_exchange(&[index]);
                    false
                }
                Err(e) => {
                    warn!(axis = index, error = %e, "command exchange I/O error");
                    self.fail_exchange(&[index]);
                    false
                }
            }
        };

        if !sent {
            return;
        }

        let now = Instant::now();
        match txn.class {
            MessageClass::Motion | MessageClass::Velocity if !txn.is_noop() => {
                self.axes[index].start_motion(
                    MotionNode {
                        class: txn.class,
                        post_move: txn.post_move.clone(),
                    },
                    now,
                );
                self.axes[index].publish();
            }
            MessageClass::Info => {
                self.refresh_axis(index).await;
            }
            MessageClass::MoveTerminate => {
                // The stop itself went through the normal transaction
                // path; completion shows up on the next poll.
            }
            _ => {
                self.axes[index].last_command_at = Some(now);
            }
        }

        for command in &request.commands {
            if let MotionCommand::SetVelocityBase(v) = command {
                self.axes[index].base_velocity = *v;
            }
        }
    }

    /// Forced single-axis refresh (the GET_INFO path).
    async fn refresh_axis(&mut self, index: usize) {
        self.wait_update_delay(&[index]).await;
        match self.fetch_axes(&[index]).await {
            Some(mut parsed) => {
                self.health = self.health.on_success();
                self.axes[index].comm_recovered();
                self.process_axis(index, parsed.remove(0)).await;
            }
            None => self.fail_exchange(&[index]),
        }
    }

    /// One poll sweep over the in-motion axes (or all of them when
    /// forced).
    async fn sweep(&mut self, force_all: bool) {
        let targets: Vec<usize> = (0..self.axes.len())
            .filter(|&i| force_all || self.axes[i].in_motion())
            .collect();
        if targets.is_empty() {
            return;
        }

        self.wait_update_delay(&targets).await;

        let Some(parsed) = self.fetch_axes(&targets).await else {
            self.fail_exchange(&targets);
            return;
        };

        self.health = self.health.on_success();
        for &index in &targets {
            self.axes[index].comm_recovered();
        }

        for (slot, &index) in targets.iter().enumerate() {
            self.process_axis(index, parsed[slot].clone()).await;
            if self.disabled.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// Stale-data delay: give the controller time between a motion
    /// command and the first status query that would otherwise read
    /// stale data.
    async fn wait_update_delay(&self, targets: &[usize]) {
        if self.cfg.update_delay.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut wait = Duration::ZERO;
        for &index in targets {
            let axis = &self.axes[index];
            if !axis.in_motion() {
                continue;
            }
            if let Some(at) = axis.last_command_at {
                let elapsed = now.saturating_duration_since(at);
                if elapsed < self.cfg.update_delay {
                    wait = wait.max(self.cfg.update_delay - elapsed);
                }
            }
        }
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    /// Fetch and decode one round of status replies for `targets`.
    /// `None` means the exchange failed (timeout, malformed reply, I/O
    /// or parse error) — the caller runs the health ladder.
    async fn fetch_axes(&self, targets: &[usize]) -> Option<Vec<ParsedStatus>> {
        let plan = &self.dialect.poll;
        let mut per_axis_replies: Vec<Vec<String>> = Vec::with_capacity(targets.len());
        let mut shared_replies: Vec<String> = Vec::new();

        {
            let mut transport = self.transport.lock().await;

            if plan.per_controller {
                // Aggregate replies answer for every axis at once.
                for query in &plan.queries {
                    let text = self
                        .query_one(transport.as_mut(), &query.template)
                        .await?;
                    shared_replies.push(text);
                }
            } else {
                match plan.batch {
                    BatchMode::Sequential => {
                        for &index in targets {
                            let label = self.dialect.axis_label(index)?;
                            let mut replies = Vec::with_capacity(plan.queries.len());
                            for query in &plan.queries {
                                let message = fill_axis(&query.template, &label);
                                replies.push(
                                    self.query_one(transport.as_mut(), &message).await?,
                                );
                            }
                            per_axis_replies.push(replies);
                        }
                    }
                    BatchMode::Pipelined => {
                        // Requests pipelined axis-major; replies come
                        // back in issue order.
                        let mut messages = Vec::with_capacity(targets.len() * plan.queries.len());
                        for &index in targets {
                            let label = self.dialect.axis_label(index)?;
                            for query in &plan.queries {
                                messages.push(fill_axis(&query.template, &label));
                            }
                        }
                        let outcomes = match executor::query_pipelined(
                            transport.as_mut(),
                            &self.dialect,
                            &self.params,
                            &messages,
                        )
                        .await
                        {
                            Ok(outcomes) => outcomes,
                            Err(e) => {
                                warn!(error = %e, "pipelined poll I/O error");
                                return None;
                            }
                        };
                        let mut iter = outcomes.into_iter();
                        for _ in targets {
                            let mut replies = Vec::with_capacity(plan.queries.len());
                            for _ in &plan.queries {
                                match iter.next() {
                                    Some(ExchangeOutcome::Success(Some(text))) => {
                                        replies.push(text);
                                    }
                                    other => {
                                        debug!(outcome = ?other, "pipelined poll failed");
                                        return None;
                                    }
                                }
                            }
                            per_axis_replies.push(replies);
                        }
                    }
                }
            }
        }

        let mut out = Vec::with_capacity(targets.len());
        for (slot, &index) in targets.iter().enumerate() {
            let mut acc = ParsedStatus::default();
            let replies = if plan.per_controller {
                &shared_replies
            } else {
                &per_axis_replies[slot]
            };
            for (query, text) in plan.queries.iter().zip(replies) {
                if let Err(e) = apply_reply(&mut acc, &query.layout, index, text) {
                    warn!(axis = index, error = %e, "status reply parse failed");
                    return None;
                }
            }
            match acc.finish() {
                Ok(parsed) => out.push(parsed),
                Err(e) => {
                    warn!(axis = index, error = %e, "incomplete status sweep");
                    return None;
                }
            }
        }
        Some(out)
    }

    async fn query_one(
        &self,
        transport: &mut dyn motion_core::transport::Transport,
        message: &str,
    ) -> Option<String> {
        match executor::query(transport, &self.dialect, &self.params, message).await {
            Ok(ExchangeOutcome::Success(Some(text))) => Some(text),
            Ok(outcome) => {
                debug!(message, outcome = ?outcome, "poll query failed");
                None
            }
            Err(e) => {
                warn!(message, error = %e, "poll query I/O error");
                None
            }
        }
    }

    /// Merge a parsed sweep into one axis and act on the verdict.
    async fn process_axis(&mut self, index: usize, parsed: ParsedStatus) {
        let settle_available = !self.dialect.settle_delay.is_zero();

        self.axes[index].apply_parsed(&parsed);
        if parsed.fatal_fault {
            self.disable_instance();
            return;
        }

        let mut verdict = self.axes[index].evaluate(self.cfg.no_motion_ceiling, settle_available);

        if verdict == PollVerdict::NeedsSettleCheck {
            // "Done" may only mean jerk-complete; look again after the
            // settle delay before believing it.
            sleep(self.dialect.settle_delay).await;
            if let Some(mut again) = self.fetch_axes(&[index]).await {
                let parsed = again.remove(0);
                self.axes[index].apply_parsed(&parsed);
                if parsed.fatal_fault {
                    self.disable_instance();
                    return;
                }
            }
            verdict = self.axes[index].evaluate(self.cfg.no_motion_ceiling, settle_available);
        }

        match verdict {
            PollVerdict::Stalled => {
                warn!(
                    axis = index,
                    "position frozen past the no-motion ceiling; stopping axis"
                );
                self.issue_stop(index).await;
            }
            PollVerdict::Completed { post_move } => {
                debug!(axis = index, "motion complete");
                match post_move {
                    Some(Directive::Controller(text)) => self.send_post_move(&text).await,
                    Some(Directive::Host { target, value }) => {
                        let _ = self.host_tx.send(HostEvent { target, value });
                    }
                    None => {}
                }
            }
            PollVerdict::Pending | PollVerdict::NeedsSettleCheck => {}
        }

        self.axes[index].publish();
    }

    /// Stall escape hatch: stop the axis through the ordinary
    /// transaction path.
    async fn issue_stop(&mut self, index: usize) {
        let axis = &self.axes[index];
        let Some(label) = self.dialect.axis_label(index) else {
            return;
        };
        let ctx = BuildContext {
            axis_label: label,
            resolution: axis.resolution,
            decimals: axis.decimals,
            base_velocity: axis.base_velocity,
            plus_limit_active: axis.status.plus_limit,
            minus_limit_active: axis.status.minus_limit,
            high_limit: axis.high_limit,
            low_limit: axis.low_limit,
            home_preset: axis.home_preset,
        };
        let txn = match build_transaction(
            &self.dialect,
            &ctx,
            &[MotionCommand::Stop],
            None,
            None,
        ) {
            Ok(txn) => txn,
            Err(e) => {
                warn!(axis = index, error = %e, "could not build stall stop");
                return;
            }
        };

        let mut transport = self.transport.lock().await;
        if let Err(e) =
            executor::send_transaction(transport.as_mut(), &self.dialect, &self.params, &txn)
                .await
        {
            warn!(axis = index, error = %e, "stall stop failed to send");
        }
    }

    async fn send_post_move(&self, text: &str) {
        let mut transport = self.transport.lock().await;
        if let Err(e) =
            executor::send_message(transport.as_mut(), &self.dialect, &self.params, text).await
        {
            warn!(error = %e, "post-move dispatch failed");
        }
    }

    /// Health ladder after a failed exchange. In `Retry` the cycle
    /// reports no new status; in `CommError` every target axis fails
    /// and outstanding motions terminate.
    fn fail_exchange(&mut self, targets: &[usize]) {
        self.health = self.health.on_failure();
        if self.health.is_failed() {
            warn!(dialect = self.dialect.name, "persistent communication failure");
            for &index in targets {
                self.axes[index].fail_comm();
            }
        } else {
            debug!(
                dialect = self.dialect.name,
                "transient communication failure absorbed"
            );
        }
    }

    /// Hardware self-fault: stop polling this instance for good.
    fn disable_instance(&mut self) {
        warn!(
            dialect = self.dialect.name,
            "hardware self-fault register nonzero; disabling controller"
        );
        self.disabled.store(true, Ordering::SeqCst);
        for axis in &mut self.axes {
            axis.status.problem = true;
            axis.node = None;
            axis.publish();
        }
    }
}
