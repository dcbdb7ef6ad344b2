//! Controller instance, bring-up and the consumer handle.
//!
//! A [`Controller`] owns one transport, one dialect table and the state
//! of every axis on the unit. It is built by [`Controller::connect`]
//! (which probes the hardware) and then consumed by its poll task
//! (`run`, in the poller module). Consumers keep a [`ControllerHandle`]:
//! queued command submission, read-only axis snapshots, an early-wake
//! signal and shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use strfmt::strfmt;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{info, instrument};

use motion_core::command::{Directive, MotionCommand};
use motion_core::config::ControllerConfig;
use motion_core::dialect::{DialectTable, Probe, ReplyLayout};
use motion_core::error::{MotionError, MotionResult};
use motion_core::serial::DynWire;
use motion_core::status::AxisReadback;
use motion_core::transport::{self, Transport};

use crate::axis::AxisState;
use crate::executor::{self, ExchangeOutcome, ProtocolParams};
use crate::health::CommHealth;
use crate::parser;

/// A queued command request for one axis.
#[derive(Debug, Clone)]
pub struct MotionRequest {
    pub axis: usize,
    pub commands: Vec<MotionCommand>,
    /// Controller-native primitive injected before the first command.
    pub pre: Option<String>,
    /// Deferred directive dispatched after the motion completes.
    pub post: Option<Directive>,
}

impl MotionRequest {
    pub fn new(axis: usize, command: MotionCommand) -> Self {
        Self {
            axis,
            commands: vec![command],
            pre: None,
            post: None,
        }
    }

    pub fn with_commands(axis: usize, commands: Vec<MotionCommand>) -> Self {
        Self {
            axis,
            commands,
            pre: None,
            post: None,
        }
    }

    pub fn pre(mut self, text: &str) -> Self {
        self.pre = Some(text.to_string());
        self
    }

    pub fn post(mut self, directive: Directive) -> Self {
        self.post = Some(directive);
        self
    }
}

/// Host-side notification produced by a `Directive::Host` post-move.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEvent {
    pub target: String,
    pub value: f64,
}

pub(crate) enum Request {
    Transact(MotionRequest),
    Shutdown,
}

/// One motor controller unit: transport, dialect, axes, health.
pub struct Controller {
    pub(crate) cfg: ControllerConfig,
    pub(crate) dialect: Arc<DialectTable>,
    pub(crate) transport: Mutex<Box<dyn Transport>>,
    pub(crate) axes: Vec<AxisState>,
    pub(crate) health: CommHealth,
    pub(crate) disabled: Arc<AtomicBool>,
    pub(crate) ident: String,
    pub(crate) rx: mpsc::UnboundedReceiver<Request>,
    pub(crate) notify: Arc<Notify>,
    pub(crate) host_tx: mpsc::UnboundedSender<HostEvent>,
    pub(crate) params: ProtocolParams,
}

/// Cheap, cloneable consumer-side handle to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Request>,
    notify: Arc<Notify>,
    snapshots: Vec<Arc<RwLock<AxisReadback>>>,
    disabled: Arc<AtomicBool>,
    ident: String,
}

impl ControllerHandle {
    /// Queue a command request; the poll task picks it up on its next
    /// wake.
    pub fn submit(&self, request: MotionRequest) -> MotionResult<()> {
        if self.disabled.load(Ordering::SeqCst) {
            return Err(MotionError::Disabled);
        }
        self.tx
            .send(Request::Transact(request))
            .map_err(|_| MotionError::NotRunning)?;
        self.notify.notify_one();
        Ok(())
    }

    /// Ask the scheduler to poll earlier than its period — the
    /// interrupt-style completion path. Safe to call from any context;
    /// it never touches axis state.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Stop the poll task after it drains already-queued requests.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Request::Shutdown);
        self.notify.notify_one();
    }

    /// Current snapshot for an axis.
    pub fn axis(&self, axis: usize) -> Option<AxisReadback> {
        self.snapshots.get(axis).map(|s| *s.read())
    }

    pub fn axis_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Identity string read from the controller at bring-up.
    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// The instance was disabled by a hardware self-fault.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }
}

pub(crate) fn fill_axis(template: &str, label: &str) -> String {
    let mut vars = HashMap::new();
    vars.insert("axis".to_string(), label.to_string());
    // A probe template without {axis} passes through unchanged.
    strfmt(template, &vars).unwrap_or_else(|_| template.to_string())
}

impl Controller {
    /// Probe the hardware and build a ready-to-run instance.
    ///
    /// Follows the classic bring-up sequence: flush junk until the line
    /// is silent, probe for liveness with retries, stop all axes, read
    /// and check the identity string, discover axes, then probe each
    /// axis's closed-loop mode, resolution, home preset and travel
    /// limits where the dialect defines those queries.
    #[instrument(skip_all, fields(dialect = dialect.name))]
    pub async fn connect(
        cfg: ControllerConfig,
        dialect: Arc<DialectTable>,
        wire: DynWire,
    ) -> Result<(Self, ControllerHandle, mpsc::UnboundedReceiver<HostEvent>)> {
        cfg.validate()?;

        let params = ProtocolParams {
            send_timeout: cfg.send_timeout,
            recv_timeout: cfg.recv_timeout,
            max_reply_len: cfg.max_reply_len,
        };
        let mut transport = transport::for_framing(dialect.framing, wire);

        // Flush any junk at the input port until it goes quiet.
        while transport.flush_input().await > 0 {}

        let first_label = dialect
            .axis_label(0)
            .context("dialect addresses no axes")?;
        let probe_msg = fill_axis(&dialect.probes.position.query, &first_label);

        let mut probe_reply = None;
        for _attempt in 0..3 {
            if let Ok(ExchangeOutcome::Success(Some(text))) =
                executor::query(transport.as_mut(), &dialect, &params, &probe_msg).await
            {
                probe_reply = Some(text);
                break;
            }
        }
        let probe_reply = probe_reply.with_context(|| {
            format!(
                "{} controller did not answer the position probe after 3 attempts",
                dialect.name
            )
        })?;

        if let Some(stop_all) = &dialect.probes.stop_all {
            executor::send_message(transport.as_mut(), &dialect, &params, stop_all)
                .await
                .context("stop-all at bring-up failed")?;
        }

        let mut ident = String::new();
        if let Some(ident_probe) = &dialect.probes.ident {
            let reply = query_text(transport.as_mut(), &dialect, &params, &ident_probe.query)
                .await
                .context("identity query failed")?;
            ident = reply.get(ident_probe.prefix..).unwrap_or("").to_string();
            if let Some(expected) = dialect.probes.ident_substring {
                if !ident.contains(expected) {
                    bail!(
                        "unexpected controller identity {:?} (expected a {} family unit)",
                        ident,
                        expected
                    );
                }
            }
            info!(ident = %ident, "controller identified");
        }

        let total_axes = discover_axes(&cfg, &dialect, &probe_reply)?;

        let mut axes = Vec::with_capacity(total_axes);
        for index in 0..total_axes {
            let label = dialect
                .axis_label(index)
                .with_context(|| format!("dialect cannot address axis {index}"))?;
            let mut axis = AxisState::new(dialect.default_resolution, dialect.default_decimals);

            if let Some(probe) = &dialect.probes.loop_mode {
                let value =
                    probe_int(transport.as_mut(), &dialect, &params, probe, &label).await?;
                if value != 0 {
                    axis.encoder_present = true;
                    axis.gain_support = true;
                    axis.status.encoder_present = true;
                    axis.status.gain_support = true;
                }
            }
            if let Some(probe) = &dialect.probes.resolution {
                let res =
                    probe_float(transport.as_mut(), &dialect, &params, probe, &label).await?;
                if res > 0.0 {
                    axis.resolution = res;
                    axis.decimals = decimals_for(res);
                }
            }
            if let Some(probe) = &dialect.probes.home_preset {
                axis.home_preset =
                    probe_float(transport.as_mut(), &dialect, &params, probe, &label).await?;
            }
            if let Some(probe) = &dialect.probes.low_limit {
                axis.low_limit =
                    probe_float(transport.as_mut(), &dialect, &params, probe, &label).await?;
            }
            if let Some(probe) = &dialect.probes.high_limit {
                axis.high_limit =
                    probe_float(transport.as_mut(), &dialect, &params, probe, &label).await?;
            }

            axes.push(axis);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let notify = Arc::new(Notify::new());
        let disabled = Arc::new(AtomicBool::new(false));

        let handle = ControllerHandle {
            tx,
            notify: Arc::clone(&notify),
            snapshots: axes.iter().map(AxisState::snapshot_handle).collect(),
            disabled: Arc::clone(&disabled),
            ident: ident.clone(),
        };

        let mut controller = Self {
            cfg,
            dialect,
            transport: Mutex::new(transport),
            axes,
            health: CommHealth::Normal,
            disabled,
            ident,
            rx,
            notify,
            host_tx,
            params,
        };

        // One status pass so the first published snapshots are real.
        controller.initial_sweep().await;

        Ok((controller, handle, host_rx))
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }
}

/// Query returning the reply text, with timeout/malformed folded into
/// an error (bring-up treats them all as "not talking to us").
async fn query_text(
    transport: &mut dyn Transport,
    dialect: &DialectTable,
    params: &ProtocolParams,
    message: &str,
) -> Result<String> {
    match executor::query(transport, dialect, params, message).await? {
        ExchangeOutcome::Success(Some(text)) => Ok(text),
        ExchangeOutcome::Success(None) => bail!("no reply expected from query {message:?}"),
        ExchangeOutcome::Timeout => bail!("timeout on query {message:?}"),
        ExchangeOutcome::Malformed(bytes) => {
            bail!("malformed reply to {message:?}: {bytes:?}")
        }
    }
}

async fn probe_int(
    transport: &mut dyn Transport,
    dialect: &DialectTable,
    params: &ProtocolParams,
    probe: &Probe,
    label: &str,
) -> Result<u32> {
    let msg = fill_axis(&probe.query, label);
    let reply = query_text(transport, dialect, params, &msg).await?;
    parser::int_field(&reply, probe.prefix)
        .with_context(|| format!("probe {msg:?} reply {reply:?}"))
}

async fn probe_float(
    transport: &mut dyn Transport,
    dialect: &DialectTable,
    params: &ProtocolParams,
    probe: &Probe,
    label: &str,
) -> Result<f64> {
    let msg = fill_axis(&probe.query, label);
    let reply = query_text(transport, dialect, params, &msg).await?;
    parser::float_field(&reply, probe.prefix)
        .with_context(|| format!("probe {msg:?} reply {reply:?}"))
}

/// Axis count: counted from the aggregate position reply when the
/// dialect supports discovery, otherwise taken from configuration.
fn discover_axes(
    cfg: &ControllerConfig,
    dialect: &DialectTable,
    probe_reply: &str,
) -> Result<usize> {
    let discovered = if dialect.probes.axis_count_from_position {
        position_list_separator(dialect)
            .map(|sep| probe_reply.split(sep).filter(|t| !t.is_empty()).count())
    } else {
        None
    };

    let mut total = match (discovered, cfg.axes) {
        (Some(n), _) if n > 0 => n,
        (_, Some(n)) => n,
        _ => bail!(
            "axis count not discoverable for {}; set `axes` in the configuration",
            dialect.name
        ),
    };

    if let Some(max) = dialect.addressing.max_axes() {
        total = total.min(max);
    }
    if let Some(configured) = cfg.axes {
        total = total.min(configured);
    }
    Ok(total)
}

fn position_list_separator(dialect: &DialectTable) -> Option<char> {
    dialect.poll.queries.iter().find_map(|q| match q.layout {
        ReplyLayout::PositionList { separator, .. } => Some(separator),
        _ => None,
    })
}

/// Decimal digits matching a drive resolution (1e-4 units/step needs
/// more places than 1e-1).
fn decimals_for(resolution: f64) -> usize {
    let digits = (-resolution.log10()) as i32 + 2;
    digits.max(1) as usize
}
