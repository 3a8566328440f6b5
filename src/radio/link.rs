use std::sync::Arc;
use std::time::Duration;

use light_bridge_protocol::{AddressScheme, Command, Framing, Packet, MAX_WIRE_SIZE};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::driver::{LinkSettings, RadioDriver};
use super::handle::{Query, RadioCommand, RadioHandle};
use super::schedule::{unix_millis, FrameGate, HopSchedule};
use crate::config::RadioConfig;
use crate::error::RadioError;
use crate::shutdown::Shutdown;
use crate::state::{ConnectedSet, SharedState};

const COMMAND_QUEUE: usize = 32;

/// Upper bound on stale packets discarded before one exchange.
const MAX_STALE_PACKETS: usize = 32;

/// Wall-clock source for the hopping schedule, in Unix milliseconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Outcome of one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    NotAcked,
    TimedOut,
    Reply(Packet),
}

/// Owns the radio: discovery, the broadcast loop and point queries.
pub struct RadioLink<D> {
    driver: D,
    state: Arc<SharedState>,
    config: RadioConfig,
    addresses: AddressScheme,
    framing: Framing,
    hopping: Option<HopSchedule>,
    clock: Clock,
    channel: u8,
    commands: mpsc::Receiver<RadioCommand>,
}

impl<D: RadioDriver> RadioLink<D> {
    /// Open the driver and return the link together with a handle to it.
    pub fn open(
        mut driver: D,
        state: Arc<SharedState>,
        config: &RadioConfig,
    ) -> Result<(Self, RadioHandle), RadioError> {
        let hopping = config.hopping.as_ref().and_then(HopSchedule::from_config);
        let clock: Clock = Arc::new(unix_millis);
        let channel = hopping
            .as_ref()
            .map_or(config.channel, |schedule| schedule.channel_at(clock()));

        let settings = LinkSettings {
            channel,
            ..LinkSettings::from_config(config)
        };
        driver.open(&settings)?;
        info!(
            channel,
            payload_size = settings.payload_size,
            hopping = hopping.is_some(),
            "radio opened"
        );

        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let link = Self {
            driver,
            state,
            config: config.clone(),
            addresses: config.addresses(),
            framing: config.framing(),
            hopping,
            clock,
            channel,
            commands,
        };
        Ok((link, RadioHandle::new(command_tx)))
    }

    /// Replace the wall clock the hopping schedule follows.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Discover once, then broadcast at the frame rate and serve handle
    /// requests until shutdown.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        self.discover(&shutdown).await;

        let mut frames = FrameGate::new(self.config.frame_period());
        let mut rescan = self.config.rescan_interval().map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        // Timers come before handle commands: a client waiting out slow
        // queries must not hold back the broadcast.
        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                _ = frames.wait() => {
                    self.broadcast_tick().await;
                }
                _ = next_rescan(&mut rescan) => {
                    self.discover(&shutdown).await;
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command, &shutdown).await;
                }
            }
        }
        info!("radio loop stopped");
    }

    async fn handle_command(&mut self, command: RadioCommand, shutdown: &Shutdown) {
        match command {
            RadioCommand::Discover { respond_to } => {
                let connected = self.discover(shutdown).await;
                let _ = respond_to.send(connected);
            }
            RadioCommand::Query {
                id,
                query,
                respond_to,
            } => {
                let result = self.query(id, query).await;
                let _ = respond_to.send(result);
            }
        }
    }

    /// Ping every light id and rebuild the liveness bitmap. The bitmap stays
    /// locked for the whole sweep.
    pub async fn discover(&mut self, shutdown: &Shutdown) -> ConnectedSet {
        let state = Arc::clone(&self.state);
        let mut connected = state.lock_connected().await;
        let started = Instant::now();

        for id in 0..=u8::MAX {
            if !self.config.is_light_id(id) {
                connected.remove(id);
                continue;
            }
            if shutdown.is_triggered() {
                debug!(id, "discovery interrupted");
                break;
            }
            let alive = self.ping(id).await;
            connected.set(id, alive);
        }

        info!(
            connected = connected.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "discovery complete"
        );
        *connected
    }

    async fn ping(&mut self, id: u8) -> bool {
        match self.exchange(id, Packet::request(Command::Ping)).await {
            Exchange::Reply(reply) => {
                let valid = reply.command() == Some(Command::PingResponse)
                    && (!self.config.ping_echoes_id || reply.data[0] == id);
                if !valid {
                    debug!(id, command = reply.command, echoed = reply.data[0], "bad ping response");
                }
                valid
            }
            Exchange::NotAcked | Exchange::TimedOut => false,
        }
    }

    /// Send SET_RGB to every connected light. Returns how many were sent.
    /// Nothing is acknowledged or retried; the next tick repeats it anyway.
    pub async fn broadcast_tick(&mut self) -> usize {
        let frame = self.state.snapshot_connected_colors().await;
        for (id, color) in &frame {
            self.transmit(*id, &Packet::set_rgb(*color));
        }
        trace!(lights = frame.len(), "broadcast tick");
        frame.len()
    }

    /// Ask one light a question. Every failure is [`RadioError::NotResponding`].
    /// A light that does not even acknowledge is marked disconnected.
    pub async fn query(&mut self, id: u8, query: Query) -> Result<Packet, RadioError> {
        if !self.config.is_light_id(id) {
            return Err(RadioError::NotResponding(id));
        }

        let request = query.request();
        match self.exchange(id, Packet::request(request)).await {
            Exchange::Reply(reply) if reply.command() == request.response() => Ok(reply),
            Exchange::Reply(reply) => {
                debug!(id, command = reply.command, ?query, "unexpected response");
                Err(RadioError::NotResponding(id))
            }
            Exchange::NotAcked => {
                self.state.set_connected(id, false).await;
                Err(RadioError::NotResponding(id))
            }
            Exchange::TimedOut => Err(RadioError::NotResponding(id)),
        }
    }

    async fn exchange(&mut self, id: u8, request: Packet) -> Exchange {
        self.drain_stale();
        if !self.transmit(id, &request) {
            return Exchange::NotAcked;
        }
        match self.wait_for_packet(self.config.response_timeout()).await {
            Some(reply) => Exchange::Reply(reply),
            None => Exchange::TimedOut,
        }
    }

    fn transmit(&mut self, id: u8, packet: &Packet) -> bool {
        self.hop_if_due();
        self.driver.set_address(self.addresses.address(id));
        self.driver.send(self.framing.encode(packet).as_bytes())
    }

    /// Poll the driver until a well-formed packet arrives or `timeout` passes.
    async fn wait_for_packet(&mut self, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        let poll = self.config.poll_interval();
        let mut buf = [0u8; MAX_WIRE_SIZE];

        loop {
            if self.driver.available() {
                let len = self.driver.receive(&mut buf);
                match self.framing.decode(&buf[..len]) {
                    Ok(packet) => return Some(packet),
                    Err(e) => debug!(error = %e, "discarding malformed packet"),
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(poll).await;
        }
    }

    /// Throw away anything already received so a late answer is never
    /// taken for the next one.
    fn drain_stale(&mut self) {
        let mut buf = [0u8; MAX_WIRE_SIZE];
        let mut drained = 0;
        while drained < MAX_STALE_PACKETS && self.driver.available() {
            self.driver.receive(&mut buf);
            drained += 1;
        }
        if drained > 0 {
            trace!(drained, "discarded stale packets");
        }
    }

    fn hop_if_due(&mut self) {
        let Some(schedule) = &self.hopping else {
            return;
        };
        let channel = schedule.channel_at((self.clock)());
        if channel == self.channel {
            return;
        }
        match self.driver.set_channel(channel) {
            Ok(()) => {
                trace!(from = self.channel, to = channel, "hopped");
                self.channel = channel;
            }
            Err(e) => warn!(error = %e, "channel hop failed"),
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }
}

async fn next_rescan(rescan: &mut Option<Interval>) {
    match rescan {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
