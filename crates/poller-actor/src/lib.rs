use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use cotek_protocol::{decode, query_wire, ControlCommand};
use device_cache::DeviceCache;
use serial_client::{connect_with_retry, ClientError, Connector, Transport};
use types::{LinkStatus, SensorName, SensorReading, SwitchState, Target, SENSOR_COUNT};

#[derive(Debug, Clone)]
pub struct ActorConfig {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub reconnect_interval: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(1),
            reconnect_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

/// Outcome of one poll/command cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    pub readings_ok: usize,
    pub readings_failed: usize,
    /// The link broke while polling and the remaining sensors were skipped.
    pub aborted: bool,
    pub dispatched: Vec<ControlCommand>,
}

/// One single-shot command slot per target.
#[derive(Debug, Default)]
struct PendingCommands {
    inverter: Mutex<Option<ControlCommand>>,
    charger: Mutex<Option<ControlCommand>>,
}

impl PendingCommands {
    fn slot(&self, target: Target) -> &Mutex<Option<ControlCommand>> {
        match target {
            Target::Inverter => &self.inverter,
            Target::Charger => &self.charger,
        }
    }

    /// Replaces whatever was pending for the command's target.
    fn arm(&self, command: ControlCommand) -> Option<ControlCommand> {
        self.slot(command.target())
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(command)
    }

    fn take(&self, target: Target) -> Option<ControlCommand> {
        self.slot(target)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn peek(&self, target: Target) -> Option<ControlCommand> {
        *self
            .slot(target)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// What the host sees of a running service.
#[derive(Clone, Debug)]
pub struct ServiceHandle {
    cache: DeviceCache,
    pending: Arc<PendingCommands>,
}

impl ServiceHandle {
    pub fn read_sensor(&self, name: SensorName) -> Option<f64> {
        self.cache.read_sensor(name)
    }

    pub fn reading(&self, name: SensorName) -> SensorReading {
        self.cache.reading(name)
    }

    pub fn read_state(&self, target: Target) -> SwitchState {
        self.cache.read_state(target)
    }

    pub fn snapshot(&self) -> Vec<SensorReading> {
        self.cache.snapshot()
    }

    pub fn link(&self) -> LinkStatus {
        self.cache.link()
    }

    pub fn pending(&self, target: Target) -> Option<ControlCommand> {
        self.pending.peek(target)
    }

    /// Queues the command that flips `target` away from its cached state.
    ///
    /// Nothing is sent here; the next cycle dispatches it. A later request
    /// for the same target overwrites this one.
    pub fn request_toggle(&self, target: Target) {
        let desired = self.cache.read_state(target).toggled();
        let command = ControlCommand::for_state(target, desired);
        let replaced = self.pending.arm(command).map(|previous| previous.wire());
        info!(
            switch = %target,
            command = command.wire(),
            ?replaced,
            "toggle requested"
        );
    }
}

/// Drives the serial line: reconnect, poll every sensor, dispatch pending
/// commands. Sole owner of the transport and sole writer of the cache.
pub struct SerialService<C: Connector> {
    connector: C,
    transport: Option<C::Transport>,
    cache: DeviceCache,
    pending: Arc<PendingCommands>,
    config: ActorConfig,
}

impl<C: Connector> SerialService<C> {
    pub fn new(connector: C, cache: DeviceCache, config: ActorConfig) -> Self {
        Self {
            connector,
            transport: None,
            cache,
            pending: Arc::new(PendingCommands::default()),
            config,
        }
    }

    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            cache: self.cache.clone(),
            pending: self.pending.clone(),
        }
    }

    pub fn link_state(&self) -> LinkState {
        if self.transport.is_some() {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }

    /// Polls until `shutdown` flips to true. Errors never end the loop.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut iteration = 0u64;

        loop {
            if *shutdown.borrow() {
                info!("serial service shutdown requested");
                break;
            }

            tokio::select! {
                report = self.run_cycle() => {
                    iteration = iteration.wrapping_add(1);
                    debug!(iteration, ?report, "cycle finished");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("serial service shutdown requested");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {},
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("serial service shutdown requested");
                        break;
                    }
                }
            }
        }
    }

    /// One full cycle: connect if needed, poll, dispatch.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.ensure_connected().await;

        let cycle_start = Instant::now();
        let mut report = CycleReport::default();
        self.poll_sensors(&mut report).await;
        self.dispatch_pending(&mut report).await;

        counter!("cotek_poll_cycles_total").increment(1);
        info!(
            elapsed_ms = cycle_start.elapsed().as_millis() as u64,
            readings_ok = report.readings_ok,
            readings_failed = report.readings_failed,
            aborted = report.aborted,
            dispatched = report.dispatched.len(),
            "poll cycle complete"
        );
        report
    }

    /// Blocks until a transport is open. Every sensor reads unavailable
    /// while this waits.
    pub async fn ensure_connected(&mut self) {
        if self.transport.is_some() {
            return;
        }

        self.cache.mark_all_unavailable();
        self.cache.publish_states_off();
        self.cache.set_link(LinkStatus::Unavailable);
        gauge!("cotek_link_up").set(0.0);

        let cache = self.cache.clone();
        let transport = connect_with_retry(
            &self.connector,
            self.config.reconnect_interval,
            |attempt, _err| {
                counter!("cotek_reconnect_failures_total").increment(1);
                debug!(attempt, "serial still unavailable");
                cache.set_link(LinkStatus::Unavailable);
            },
        )
        .await;

        self.transport = Some(transport);
        self.cache.set_link(LinkStatus::Available);
        gauge!("cotek_link_up").set(1.0);
    }

    /// Queries every sensor in order, updating the cache and arming a
    /// command for each detected state change.
    pub async fn poll_sensors(&mut self, report: &mut CycleReport) {
        for (index, name) in SensorName::ALL.iter().copied().enumerate() {
            let Some(transport) = self.transport.as_mut() else {
                self.abort_poll(index, report);
                return;
            };

            let result = transport
                .send_and_receive(query_wire(name), self.config.request_timeout)
                .await;

            match result {
                Ok(raw) => match decode(&raw) {
                    Ok(value) => {
                        self.cache.update(name, Some(value));
                        if let Some(change) = self.cache.derive_transition(name, value) {
                            let command = ControlCommand::for_state(change.target, change.to);
                            self.pending.arm(command);
                            info!(
                                switch = %change.target,
                                from = ?change.from,
                                to = ?change.to,
                                command = command.wire(),
                                "state change armed command"
                            );
                        }
                        report.readings_ok += 1;
                    }
                    Err(err) => {
                        warn!(sensor = %name, error = %err, "sensor response rejected");
                        self.record_failure(name, report);
                    }
                },
                Err(err @ ClientError::Timeout { .. }) => {
                    warn!(sensor = %name, error = %err, "sensor query failed");
                    self.record_failure(name, report);
                    self.reopen_after_timeout().await;
                }
                Err(err) => {
                    warn!(sensor = %name, error = %err, "serial link broken during poll");
                    self.drop_link();
                    self.abort_poll(index, report);
                    return;
                }
            }
        }
    }

    /// Sends each armed command once, inverter first. The device's reply is
    /// ignored. Commands stay armed while the link is down.
    pub async fn dispatch_pending(&mut self, report: &mut CycleReport) {
        for target in Target::ALL {
            let Some(transport) = self.transport.as_mut() else {
                if let Some(command) = self.pending.peek(target) {
                    debug!(command = command.wire(), "link down, command stays pending");
                }
                continue;
            };
            let Some(command) = self.pending.take(target) else {
                continue;
            };

            let result = transport
                .send_and_receive(command.wire(), self.config.request_timeout)
                .await;
            counter!("cotek_commands_sent_total", "command" => command.wire()).increment(1);
            report.dispatched.push(command);

            match result {
                Ok(_) => info!(command = command.wire(), "command sent"),
                Err(err @ ClientError::Timeout { .. }) => {
                    debug!(command = command.wire(), error = %err, "command sent without reply");
                    self.reopen_after_timeout().await;
                }
                Err(err) => {
                    warn!(command = command.wire(), error = %err, "serial link broken during command");
                    self.drop_link();
                }
            }
        }
    }

    fn record_failure(&self, name: SensorName, report: &mut CycleReport) {
        counter!("cotek_sensor_read_failures_total", "sensor" => name.as_str()).increment(1);
        self.cache.update(name, None);
        report.readings_failed += 1;
    }

    fn abort_poll(&self, index: usize, report: &mut CycleReport) {
        self.cache
            .mark_unavailable(SensorName::ALL[index..].iter().copied());
        report.readings_failed += SENSOR_COUNT - index;
        report.aborted = true;
    }

    /// Replaces the transport after an unanswered request so a late reply
    /// is never read as the answer to the next one. One attempt; a failure
    /// counts as a link break.
    async fn reopen_after_timeout(&mut self) {
        self.transport = None;
        match self.connector.open().await {
            Ok(transport) => {
                counter!("cotek_line_resyncs_total").increment(1);
                debug!("serial line reopened after timeout");
                self.transport = Some(transport);
            }
            Err(err) => {
                warn!(error = %err, "serial reopen after timeout failed");
                self.drop_link();
            }
        }
    }

    fn drop_link(&mut self) {
        self.transport = None;
        self.cache.set_link(LinkStatus::Unavailable);
        counter!("cotek_link_breaks_total").increment(1);
        gauge!("cotek_link_up").set(0.0);
    }
}
