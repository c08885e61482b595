//! Telemetry service runtime
//!
//! Wires config, dispatcher, poller and store together and runs the two loops
//! that drive them:
//! - `can-listener`: blocking receive with a short timeout, every frame goes
//!   through the dispatcher
//! - `conversation-poller`: fixed-cadence timer calling the poller's `tick`
//!
//! Both loops watch one shutdown flag. A transport error in either loop raises
//! the flag and is handed back by [`RunningService::shutdown`] or
//! [`RunningService::wait`].

use crate::bus::CanBus;
use crate::config::TelemetryConfig;
use crate::conversation::ConversationPoller;
use crate::dispatcher::FrameDispatcher;
use crate::store::CarStateStore;
use crate::types::{BusError, Result, TelemetryError};
use crossbeam::channel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default receive timeout of the listener loop
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(20);

type LoopHandle = JoinHandle<std::result::Result<(), BusError>>;

/// A configured, not yet running, telemetry service
pub struct TelemetryService {
    bus: Arc<dyn CanBus>,
    dispatcher: Arc<FrameDispatcher>,
    poller: Arc<ConversationPoller>,
    store: Arc<CarStateStore>,
    recv_timeout: Duration,
}

impl TelemetryService {
    /// Validate `config` and build the tables, poller and store
    pub fn new(config: &TelemetryConfig, bus: Arc<dyn CanBus>) -> Result<Self> {
        config.validate()?;

        let table = config.build_location_table()?;
        let poller = Arc::new(ConversationPoller::new(
            config.poller_config(),
            config.build_conversation_signals()?,
        ));
        let store = Arc::new(CarStateStore::with_signals(config.signal_names()));

        let mut dispatcher = FrameDispatcher::new(table, Arc::clone(&poller), Arc::clone(&store));
        if let Some(estimator) = config.derived.gear_estimator() {
            dispatcher = dispatcher.with_gear_estimator(estimator);
        }

        Ok(Self {
            bus,
            dispatcher: Arc::new(dispatcher),
            poller,
            store,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
        })
    }

    /// Builder method: bound on how long a shutdown waits for the listener
    pub fn with_recv_timeout(mut self, recv_timeout: Duration) -> Self {
        self.recv_timeout = recv_timeout;
        self
    }

    pub fn store(&self) -> &Arc<CarStateStore> {
        &self.store
    }

    pub fn poller(&self) -> &Arc<ConversationPoller> {
        &self.poller
    }

    pub fn dispatcher(&self) -> &Arc<FrameDispatcher> {
        &self.dispatcher
    }

    /// Spawn the listener and poller threads
    pub fn start(self) -> Result<RunningService> {
        let shutdown = Arc::new(AtomicBool::new(false));

        let listener = {
            let bus = Arc::clone(&self.bus);
            let dispatcher = Arc::clone(&self.dispatcher);
            let shutdown = Arc::clone(&shutdown);
            let recv_timeout = self.recv_timeout;
            thread::Builder::new()
                .name("can-listener".to_string())
                .spawn(move || listen(&*bus, &dispatcher, &shutdown, recv_timeout))
                .map_err(TelemetryError::IoError)?
        };

        let ticker = if self.poller.signals().is_empty() {
            log::info!("No on-demand signals configured, conversation poller not started");
            None
        } else {
            let bus = Arc::clone(&self.bus);
            let poller = Arc::clone(&self.poller);
            let shutdown_flag = Arc::clone(&shutdown);
            let spawned = thread::Builder::new()
                .name("conversation-poller".to_string())
                .spawn(move || poll(&*bus, &poller, &shutdown_flag));
            match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::Release);
                    if let Err(bus_error) = join_thread("can-listener", listener) {
                        log::warn!("can-listener stopped with error: {}", bus_error);
                    }
                    return Err(TelemetryError::IoError(e));
                }
            }
        };

        log::info!(
            "Telemetry service started ({} broadcast signals, {} on-demand signals)",
            self.dispatcher.table().stats().num_signals,
            self.poller.signals().len()
        );

        Ok(RunningService {
            shutdown,
            store: self.store,
            poller: self.poller,
            listener: Some(listener),
            ticker,
        })
    }
}

impl std::fmt::Debug for TelemetryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryService")
            .field("dispatcher", &self.dispatcher)
            .field("recv_timeout", &self.recv_timeout)
            .finish()
    }
}

fn listen(
    bus: &dyn CanBus,
    dispatcher: &FrameDispatcher,
    shutdown: &AtomicBool,
    recv_timeout: Duration,
) -> std::result::Result<(), BusError> {
    while !shutdown.load(Ordering::Acquire) {
        match bus.recv(recv_timeout) {
            Ok(frame) => {
                dispatcher.dispatch(frame.as_ref());
            }
            Err(e) => {
                log::error!("CAN listener stopped: {}", e);
                shutdown.store(true, Ordering::Release);
                return Err(e);
            }
        }
    }
    log::debug!("CAN listener exiting");
    Ok(())
}

fn poll(
    bus: &dyn CanBus,
    poller: &ConversationPoller,
    shutdown: &AtomicBool,
) -> std::result::Result<(), BusError> {
    let ticker = channel::tick(poller.config().tick_period);

    while !shutdown.load(Ordering::Acquire) {
        if ticker.recv().is_err() {
            break;
        }
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        if let Err(e) = poller.tick(bus, Instant::now()) {
            log::error!("Conversation poller stopped: {}", e);
            shutdown.store(true, Ordering::Release);
            return Err(e);
        }
    }
    log::debug!("Conversation poller exiting");
    Ok(())
}

/// Handle to the running loops
///
/// Dropping the handle stops both loops and joins their threads.
pub struct RunningService {
    shutdown: Arc<AtomicBool>,
    store: Arc<CarStateStore>,
    poller: Arc<ConversationPoller>,
    listener: Option<LoopHandle>,
    ticker: Option<LoopHandle>,
}

impl RunningService {
    pub fn store(&self) -> &Arc<CarStateStore> {
        &self.store
    }

    pub fn poller(&self) -> &Arc<ConversationPoller> {
        &self.poller
    }

    /// False once shutdown was requested or a loop failed
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
    }

    /// Shared flag that stops both loops when raised
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Stop both loops and return the first transport error, if any
    pub fn shutdown(mut self) -> std::result::Result<(), BusError> {
        log::info!("Stopping telemetry service");
        self.shutdown.store(true, Ordering::Release);
        self.join()
    }

    /// Block until the loops stop (shutdown flag raised or a bus failure)
    pub fn wait(mut self) -> std::result::Result<(), BusError> {
        self.join()
    }

    fn join(&mut self) -> std::result::Result<(), BusError> {
        let mut first_error = None;

        for (name, handle) in [("can-listener", self.listener.take()), ("conversation-poller", self.ticker.take())] {
            let Some(handle) = handle else {
                continue;
            };
            if let Err(e) = join_thread(name, handle) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Join a service thread, logging a panic and returning its bus error
fn join_thread(
    name: &str,
    handle: JoinHandle<std::result::Result<(), BusError>>,
) -> std::result::Result<(), BusError> {
    match handle.join() {
        Ok(Ok(())) => {
            log::debug!("{} stopped cleanly", name);
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            log::error!("{} thread panicked", name);
            Ok(())
        }
    }
}

impl Drop for RunningService {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Err(e) = self.join() {
            log::warn!("Telemetry service stopped with error: {}", e);
        }
    }
}

impl std::fmt::Debug for RunningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningService")
            .field("running", &self.is_running())
            .field("poller", &self.poller)
            .finish()
    }
}
