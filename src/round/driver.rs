//! Periodic rounds driven through the supervisor engine.
//!
//! The driver only feeds uncontrollable events into the engine. Everything
//! with a side effect (fetching demands, calculating, publishing) runs as a
//! callback of a controllable event, so the automata decide what may happen
//! when.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::automata;
use super::logic::{self, AllocationLogic};
use super::messages::{FlowProposalsMessage, SensorLimitsMessage, SetPoint, SetPointsMessage};
use super::ticker::Ticker;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::flow::{ComponentSetPoint, FlowProposal, Topology};
use crate::sct::{Callback, Callbacks, EventSender, Model, SupervisorEngine, TieBreak};

pub const NEW_ROUND: &str = "newRound";
pub const GET_DATA: &str = "getData";
pub const DATA_RECEIVED: &str = "dataReceived";
pub const SEND_SET_POINTS: &str = "sendSetPoints";
pub const SENSOR_LIMITS_RECEIVED: &str = "sensorLimitsReceived";
pub const FLOW_PROPOSAL_REQUEST: &str = "flowProposalRequest";
pub const CALCULATE_FLOW_PROPOSAL: &str = "calculateFlowProposal";
pub const SEND_FLOW_PROPOSAL: &str = "sendFlowProposal";

/// Where a round gets component demands from.
pub trait DemandSource: Send + Sync {
    /// Current demand per component id. Unknown ids are ignored.
    fn demands(&self, round: u64) -> HashMap<String, f64>;
}

impl DemandSource for ControllerConfig {
    fn demands(&self, round: u64) -> HashMap<String, f64> {
        self.demands_for_round(round as usize)
    }
}

/// Where a round publishes its results.
pub trait SetPointSink: Send + Sync {
    /// `rows` are the topology rows the message was built from, demands
    /// included.
    fn send_set_points(&self, message: SetPointsMessage, rows: Vec<ComponentSetPoint>);
    fn send_flow_proposals(&self, message: FlowProposalsMessage);
}

/// A message published by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    SetPoints(SetPointsMessage, Vec<ComponentSetPoint>),
    FlowProposals(FlowProposalsMessage),
}

impl SetPointSink for mpsc::UnboundedSender<Outbound> {
    fn send_set_points(&self, message: SetPointsMessage, rows: Vec<ComponentSetPoint>) {
        if self.send(Outbound::SetPoints(message, rows)).is_err() {
            warn!("setpoint receiver dropped");
        }
    }

    fn send_flow_proposals(&self, message: FlowProposalsMessage) {
        if self.send(Outbound::FlowProposals(message)).is_err() {
            warn!("flow proposal receiver dropped");
        }
    }
}

/// Demand input and result output of a driver.
pub struct RoundIo {
    pub demands: Arc<dyn DemandSource>,
    pub sink: Arc<dyn SetPointSink>,
}

#[derive(Debug, Clone, Copy)]
pub struct RoundTiming {
    /// Time between two `newRound` events. Must be non-zero.
    pub period: Duration,
    /// Delay between requesting and reading demands.
    pub wait_time_for_inputs: Duration,
}

impl RoundTiming {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            period: config.period(),
            wait_time_for_inputs: config.wait_time_for_inputs(),
        }
    }
}

struct RoundState {
    topology: Topology,
    round: u64,
    proposals: Option<BTreeMap<String, FlowProposal>>,
}

type SharedState = Arc<Mutex<RoundState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, RoundState> {
    state.lock().expect("round state poisoned")
}

/// Cloneable access to a driver's round state and event queue.
#[derive(Clone)]
pub struct RoundHandle {
    events: EventSender,
    state: SharedState,
}

impl RoundHandle {
    /// Applies a limit update and reports it to the supervisors.
    ///
    /// Sensors missing from the message are closed, as are sensors given
    /// a negative or NaN limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] once the driver has shut down.
    pub async fn sensor_limits_received(&self, message: &SensorLimitsMessage) -> Result<()> {
        let limits = &message.sensor_limits;
        let rejected = lock(&self.state).topology.apply_sensor_limits(limits);
        if !rejected.is_empty() {
            warn!(?rejected, "limits for unknown sensors or invalid values ignored");
        }
        info!(sensors = limits.len(), "sensor limits received");
        self.events.add_event(SENSOR_LIMITS_RECEIVED).await
    }

    /// Asks for unconstrained flow proposals to be calculated and sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] once the driver has shut down.
    pub async fn request_flow_proposal(&self) -> Result<()> {
        self.events.add_event(FLOW_PROPOSAL_REQUEST).await
    }

    /// Number of rounds whose setpoints were sent.
    pub fn round(&self) -> u64 {
        lock(&self.state).round
    }

    /// Setpoints of the last calculation.
    pub fn set_points(&self) -> Vec<ComponentSetPoint> {
        lock(&self.state).topology.set_points()
    }

    /// Runs `f` on the topology, e.g. to apply a topology update between
    /// rounds.
    pub fn with_topology<R>(&self, f: impl FnOnce(&mut Topology) -> R) -> R {
        f(&mut lock(&self.state).topology)
    }
}

/// Owns the supervisor engine and turns leadership into periodic rounds.
pub struct RoundDriver<T: TieBreak> {
    engine: SupervisorEngine<T>,
    handle: RoundHandle,
    period: Duration,
}

impl<T: TieBreak + 'static> RoundDriver<T> {
    /// Wires the round callbacks into an engine built from `models`.
    ///
    /// # Errors
    ///
    /// Fails if the models do not compile or declare a controllable event
    /// the driver has no callback for.
    pub fn new(
        models: &[Model],
        topology: Topology,
        logic: Box<dyn AllocationLogic>,
        io: RoundIo,
        timing: RoundTiming,
        tie_break: T,
    ) -> Result<Self> {
        let state = Arc::new(Mutex::new(RoundState {
            topology,
            round: 0,
            proposals: None,
        }));
        let callback_state = Arc::clone(&state);
        let engine = SupervisorEngine::with_callback_factory(models, tie_break, |events| {
            callbacks(events, callback_state, logic, io, timing.wait_time_for_inputs)
        })?;
        let handle = RoundHandle {
            events: engine.sender(),
            state,
        };
        Ok(Self {
            engine,
            handle,
            period: timing.period,
        })
    }

    /// Builds a driver for a validated configuration.
    ///
    /// Uses the automata listed in the configuration, or the built-in ones
    /// for the configured algorithm.
    ///
    /// # Errors
    ///
    /// Fails on an unknown algorithm, unreadable automata, or any error of
    /// [`RoundDriver::new`].
    pub fn from_config(config: &ControllerConfig, io: RoundIo, tie_break: T) -> Result<Self> {
        let logic = logic::from_name(&config.controller.algorithm)
            .ok_or_else(|| Error::UnknownAlgorithm(config.controller.algorithm.clone()))?;
        let models = if config.automata.paths.is_empty() {
            automata::builtin(logic.round_sequence())?
        } else {
            automata::load(&config.automata.paths)?
        };
        Self::new(
            &models,
            Topology::from_config(config),
            logic,
            io,
            RoundTiming::from_config(config),
            tie_break,
        )
    }

    pub fn handle(&self) -> RoundHandle {
        self.handle.clone()
    }

    /// Runs rounds while `leadership` last reported `true`.
    ///
    /// Returns when `cancel` fires or the leadership channel closes. The
    /// supervisor engine is stopped on return.
    pub async fn run(self, mut leadership: mpsc::Receiver<bool>, cancel: CancellationToken) {
        let Self {
            engine,
            handle,
            period,
        } = self;
        let engine_cancel = cancel.child_token();
        let engine_task = engine.start(engine_cancel.clone());
        let mut ticker: Option<Ticker> = None;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("round driver cancelled");
                    break;
                }
                leader = leadership.recv() => match leader {
                    Some(true) if ticker.is_none() => {
                        info!("gained leadership, starting rounds");
                        let events = handle.events.clone();
                        ticker = Some(Ticker::start(period, move || {
                            request_round(&events);
                        }));
                    }
                    Some(true) => debug!("already leading"),
                    Some(false) => {
                        if let Some(t) = ticker.take() {
                            info!("lost leadership, stopping rounds");
                            t.shutdown().await;
                        }
                    }
                    None => {
                        info!("leadership channel closed");
                        break;
                    }
                },
            }
        }

        if let Some(t) = ticker.take() {
            t.shutdown().await;
        }
        engine_cancel.cancel();
        if let Err(err) = engine_task.await {
            warn!(%err, "supervisor engine task failed");
        }
    }

    /// Spawns [`RoundDriver::run`].
    pub fn start(self, leadership: mpsc::Receiver<bool>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(leadership, cancel))
    }
}

/// Queues a `newRound`, waiting in the background while the queue is full.
fn request_round(events: &EventSender) -> JoinHandle<()> {
    let events = events.clone();
    tokio::spawn(async move {
        if let Err(err) = events.add_event(NEW_ROUND).await {
            warn!(%err, "could not start round");
        }
    })
}

fn callbacks(
    events: EventSender,
    state: SharedState,
    mut logic: Box<dyn AllocationLogic>,
    io: RoundIo,
    wait_time: Duration,
) -> Callbacks {
    let mut callbacks = Callbacks::new();

    let (get_state, demands) = (Arc::clone(&state), Arc::clone(&io.demands));
    let get_data: Callback = Box::new(move || {
        let (state, demands, events) = (Arc::clone(&get_state), Arc::clone(&demands), events.clone());
        tokio::spawn(async move {
            time::sleep(wait_time).await;
            let round = lock(&state).round;
            let values = demands.demands(round);
            {
                let mut guard = lock(&state);
                for (id, demand) in &values {
                    if !guard.topology.set_demand(id, *demand) {
                        debug!(component = %id, "demand for unknown component ignored");
                    }
                }
            }
            debug!(round, components = values.len(), "demands received");
            if let Err(err) = events.add_event(DATA_RECEIVED).await {
                warn!(%err, "could not report received data");
            }
        });
    });
    callbacks.insert(GET_DATA.to_string(), get_data);

    let calc_state = Arc::clone(&state);
    let event = logic.event_name();
    let calculate: Callback = Box::new(move || {
        let mut guard = lock(&calc_state);
        logic.allocate(&mut guard.topology);
        debug!(round = guard.round, "setpoints calculated");
    });
    callbacks.insert(event.to_string(), calculate);

    let (send_state, sink) = (Arc::clone(&state), Arc::clone(&io.sink));
    let send: Callback = Box::new(move || {
        let (message, rows) = {
            let mut guard = lock(&send_state);
            let rows = guard.topology.set_points();
            let message = SetPointsMessage {
                round: guard.round,
                set_points: rows.iter().map(SetPoint::from).collect(),
            };
            guard.round += 1;
            (message, rows)
        };
        info!(round = message.round, set_points = message.set_points.len(), "sending setpoints");
        sink.send_set_points(message, rows);
    });
    callbacks.insert(SEND_SET_POINTS.to_string(), send);

    let proposal_state = Arc::clone(&state);
    let calculate_proposal: Callback = Box::new(move || {
        let mut guard = lock(&proposal_state);
        let proposals = guard.topology.flow_proposals();
        debug!(sensors = proposals.len(), "flow proposals calculated");
        guard.proposals = Some(proposals);
    });
    callbacks.insert(CALCULATE_FLOW_PROPOSAL.to_string(), calculate_proposal);

    let sink = Arc::clone(&io.sink);
    let send_proposal: Callback = Box::new(move || {
        let Some(proposals) = lock(&state).proposals.take() else {
            warn!("no flow proposal to send");
            return;
        };
        info!(sensors = proposals.len(), "sending flow proposals");
        sink.send_flow_proposals(FlowProposalsMessage { proposals });
    });
    callbacks.insert(SEND_FLOW_PROPOSAL.to_string(), send_proposal);

    callbacks
}
