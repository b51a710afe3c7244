//! Decentralized supervisor engine.
//!
//! Several independently written automata are composed by veto: a
//! controllable event may fire only if no automaton that defines it
//! currently disables it. Events are delivered through a bounded queue and
//! processed by a single task, which is the only owner of supervisor state.

use std::collections::HashMap;
use std::io::BufRead;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::model::Model;
use super::supervisor::{Event, Supervisor};
use crate::error::{Error, Result};

/// Capacity of the event queue. Producers wait when it is full.
pub const QUEUE_CAPACITY: usize = 100;

/// Side-effecting action bound to a controllable event.
pub type Callback = Box<dyn FnMut() + Send>;

/// Callback registry keyed by event name.
pub type Callbacks = HashMap<String, Callback>;

/// Chooses among several simultaneously enabled controllable events.
pub trait TieBreak: Send {
    /// Returns an index into `candidates`, which are sorted by name and
    /// hold at least two events.
    fn choose(&mut self, candidates: &[&Event]) -> usize;
}

/// Picks uniformly at random.
#[derive(Debug)]
pub struct UniformRandom {
    rng: StdRng,
}

impl UniformRandom {
    /// Reproducible choices for a given seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for UniformRandom {
    fn default() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }
}

impl TieBreak for UniformRandom {
    fn choose(&mut self, candidates: &[&Event]) -> usize {
        self.rng.random_range(0..candidates.len())
    }
}

/// Always picks the alphabetically first candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstByName;

impl TieBreak for FirstByName {
    fn choose(&mut self, _candidates: &[&Event]) -> usize {
        0
    }
}

/// Cloneable handle for feeding events into a running engine.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<String>,
}

impl EventSender {
    /// Enqueues an event, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] once the engine has been dropped.
    pub async fn add_event(&self, name: impl Into<String>) -> Result<()> {
        self.tx
            .send(name.into())
            .await
            .map_err(|_| Error::QueueClosed)
    }

    /// Enqueues an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] if the queue is at capacity and
    /// [`Error::QueueClosed`] once the engine has been dropped.
    pub fn try_add_event(&self, name: impl Into<String>) -> Result<()> {
        self.tx.try_send(name.into()).map_err(|e| match e {
            TrySendError::Full(name) => Error::QueueFull(name),
            TrySendError::Closed(_) => Error::QueueClosed,
        })
    }
}

/// Owns the supervisors, the event table and the callback registry.
///
/// Generic over the tie-break strategy so tests can make firing order
/// deterministic.
pub struct SupervisorEngine<T: TieBreak = UniformRandom> {
    supervisors: Vec<Supervisor>,
    events: HashMap<String, Event>,
    callbacks: Callbacks,
    tie_break: T,
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
}

impl SupervisorEngine<UniformRandom> {
    /// Builds an engine with uniformly random tie-breaking.
    ///
    /// # Errors
    ///
    /// See [`SupervisorEngine::with_tie_break`].
    pub fn new(models: &[Model], callbacks: Callbacks) -> Result<Self> {
        Self::with_tie_break(models, callbacks, UniformRandom::default())
    }

    /// Parses one automaton per reader and builds an engine.
    ///
    /// # Errors
    ///
    /// Returns an error if any reader fails or holds malformed XML, in
    /// addition to the errors of [`SupervisorEngine::with_tie_break`].
    pub fn from_readers<R: BufRead>(
        readers: impl IntoIterator<Item = R>,
        callbacks: Callbacks,
    ) -> Result<Self> {
        let models = readers
            .into_iter()
            .map(Model::from_reader)
            .collect::<Result<Vec<_>>>()?;
        Self::new(&models, callbacks)
    }
}

impl<T: TieBreak> SupervisorEngine<T> {
    /// Builds an engine from parsed models with an explicit tie-break.
    ///
    /// When several models declare an event with the same name, the last
    /// declaration decides whether it is controllable.
    ///
    /// # Errors
    ///
    /// Fails if a model cannot be compiled or if a controllable event has no
    /// callback.
    pub fn with_tie_break(models: &[Model], callbacks: Callbacks, tie_break: T) -> Result<Self> {
        Self::with_callback_factory(models, tie_break, |_| callbacks)
    }

    /// Like [`SupervisorEngine::with_tie_break`], for callbacks that feed
    /// events back into this engine. `make_callbacks` receives a sender
    /// bound to the engine's own queue.
    ///
    /// # Errors
    ///
    /// Same as [`SupervisorEngine::with_tie_break`].
    pub fn with_callback_factory(
        models: &[Model],
        tie_break: T,
        make_callbacks: impl FnOnce(EventSender) -> Callbacks,
    ) -> Result<Self> {
        let mut supervisors = Vec::with_capacity(models.len());
        let mut events = HashMap::new();

        for (i, model) in models.iter().enumerate() {
            let (supervisor, declared) = Supervisor::compile(i, model)?;
            for event in declared {
                events.insert(event.name.clone(), event);
            }
            supervisors.push(supervisor);
        }

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let callbacks = make_callbacks(EventSender { tx: tx.clone() });

        let mut missing: Vec<&str> = events
            .values()
            .filter(|e| e.controllable && !callbacks.contains_key(&e.name))
            .map(|e| e.name.as_str())
            .collect();
        missing.sort_unstable();
        if let Some(name) = missing.first() {
            return Err(Error::MissingCallback((*name).to_string()));
        }

        Ok(Self {
            supervisors,
            events,
            callbacks,
            tie_break,
            tx,
            rx,
        })
    }

    /// Returns a handle for enqueueing events.
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Number of compiled supervisors.
    pub fn supervisor_count(&self) -> usize {
        self.supervisors.len()
    }

    /// Applies an event and fires every controllable event it unlocks.
    ///
    /// Unknown names are logged and ignored. Returns the names of the fired
    /// controllable events in firing order.
    pub fn process_event(&mut self, name: &str) -> Vec<String> {
        if !self.events.contains_key(name) {
            warn!(event = name, "unknown event, ignoring");
            return Vec::new();
        }
        debug!(event = name, "processing event");
        self.apply(name);

        let mut fired = Vec::new();
        while let Some(next) = self.next_controllable() {
            debug!(event = %next, "firing controllable event");
            self.apply(&next);
            match self.callbacks.get_mut(&next) {
                Some(callback) => callback(),
                None => warn!(event = %next, "no callback registered"),
            }
            fired.push(next);
        }
        fired
    }

    fn apply(&mut self, name: &str) {
        for supervisor in &mut self.supervisors {
            supervisor.change_state(name);
        }
    }

    fn next_controllable(&mut self) -> Option<String> {
        let mut enabled: Vec<&Event> = self
            .events
            .values()
            .filter(|e| e.controllable)
            .filter(|e| self.supervisors.iter().all(|s| s.permits(&e.name)))
            .collect();

        match enabled.len() {
            0 => None,
            1 => Some(enabled[0].name.clone()),
            n => {
                enabled.sort_unstable_by(|a, b| a.name.cmp(&b.name));
                let pick = self.tie_break.choose(&enabled).min(n - 1);
                Some(enabled[pick].name.clone())
            }
        }
    }

    /// Processes queued events until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("supervisor engine cancelled");
                    return;
                }
                received = self.rx.recv() => match received {
                    Some(name) => {
                        self.process_event(&name);
                    }
                    None => return,
                },
            }
        }
    }
}

impl<T: TieBreak + 'static> SupervisorEngine<T> {
    /// Spawns the single processing task.
    ///
    /// Grab a [`SupervisorEngine::sender`] before calling this; the engine is
    /// moved into the task.
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
