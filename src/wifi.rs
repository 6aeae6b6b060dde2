//! WiFi station connection coordinator.
//!
//! Translates the radio driver's link events and the DHCP stack's address
//! acquisition into a single blocking yes/no outcome for the caller, with a
//! bounded immediate-retry policy for transient disconnects.

use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicBool, Ordering};
use defmt::{info, warn};
use embassy_executor::{SpawnError, Spawner};
use embassy_futures::select::{Either, select};
use embassy_net::{Runner, Stack, StackResources};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::watch::{Receiver, Sender, Watch};
use embassy_time::{Duration, with_timeout};
use esp_hal::peripherals::WIFI;
use esp_radio::Controller;
use esp_radio::wifi::ModeConfig::Client;
use esp_radio::wifi::event::{self, EventExt};
use esp_radio::wifi::{
    AuthMethod, ClientConfig, Config as WifiConfig, WifiController, WifiDevice, WifiError,
};
use static_cell::StaticCell;

/// Link/IP events consumed by the coordinator, in driver emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum StationEvent {
    StationStarted,
    StationDisconnected,
    AddressAcquired { address: Ipv4Addr },
}

/// Terminal result of one connection sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ConnectOutcome {
    Connected,
    Failed,
}

/// What a caller of [`StationLink::await_outcome`] observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum WaitResult {
    Connected,
    Failed,
    TimedOut,
}

/// Errors that make a connection sequence unstartable. These are fatal to the
/// sequence; there is no retry of the setup itself.
#[derive(Debug, defmt::Format)]
pub enum SetupError {
    Radio(esp_radio::InitializationError),
    Wifi(WifiError),
    Spawn(SpawnError),
}

/// Station parameters supplied by the caller. A `max_retries` of zero means
/// the first disconnect already fails the sequence.
pub struct StationConfig {
    pub ssid: &'static str,
    pub password: &'static str,
    pub auth_method: AuthMethod,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pending,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerAction {
    IssueConnect,
    Ignore,
}

/// The retry/outcome state machine. Mutated only by the dispatch task, so it
/// needs no locking of its own.
struct ConnectionCoordinator {
    retry_count: u32,
    max_retries: u32,
    outcome: Outcome,
}

impl ConnectionCoordinator {
    fn new(max_retries: u32) -> Self {
        Self {
            retry_count: 0,
            max_retries,
            outcome: Outcome::Pending,
        }
    }

    /// Begin a fresh sequence. The retry bound counts consecutive disconnects
    /// since this point or the last acquired address.
    fn reset(&mut self) {
        self.retry_count = 0;
        self.outcome = Outcome::Pending;
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn terminal(&self) -> Option<ConnectOutcome> {
        match self.outcome {
            Outcome::Pending => None,
            Outcome::Connected => Some(ConnectOutcome::Connected),
            Outcome::Failed => Some(ConnectOutcome::Failed),
        }
    }

    fn handle_event(&mut self, event: StationEvent) -> HandlerAction {
        if self.outcome != Outcome::Pending {
            // A finished sequence stays finished; late link events must not
            // reopen it.
            return HandlerAction::Ignore;
        }
        match event {
            StationEvent::StationStarted => HandlerAction::IssueConnect,
            StationEvent::StationDisconnected => {
                if self.retry_count < self.max_retries {
                    self.retry_count += 1;
                    HandlerAction::IssueConnect
                } else {
                    self.outcome = Outcome::Failed;
                    HandlerAction::Ignore
                }
            }
            StationEvent::AddressAcquired { .. } => {
                self.retry_count = 0;
                self.outcome = Outcome::Connected;
                HandlerAction::Ignore
            }
        }
    }
}

enum LinkMessage {
    Driver(StationEvent),
    Reset,
}

const EVENT_QUEUE_DEPTH: usize = 8;
const OUTCOME_WAITERS: usize = 3;

static STATION_EVENTS: Channel<CriticalSectionRawMutex, LinkMessage, EVENT_QUEUE_DEPTH> =
    Channel::new();
static OUTCOME: Watch<CriticalSectionRawMutex, ConnectOutcome, OUTCOME_WAITERS> = Watch::new();
static EVENT_HOOKS_INSTALLED: AtomicBool = AtomicBool::new(false);
static RADIO_INIT: StaticCell<Controller> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();

/// Handle to a started connection sequence. Holding it `mut` makes the caller
/// the single primary waiter; the outcome broadcast itself is not consumed by
/// waiting, so a timed-out wait can simply be repeated.
pub struct StationLink {
    receiver: Receiver<'static, CriticalSectionRawMutex, ConnectOutcome, OUTCOME_WAITERS>,
}

impl StationLink {
    /// Block cooperatively until the sequence reaches a terminal outcome or
    /// the optional deadline expires. A timeout leaves the coordinator state
    /// untouched; the eventual outcome stays observable.
    pub async fn await_outcome(&mut self, timeout: Option<Duration>) -> WaitResult {
        let outcome = match timeout {
            Some(deadline) => match with_timeout(deadline, self.receiver.get()).await {
                Ok(outcome) => outcome,
                Err(_) => return WaitResult::TimedOut,
            },
            None => self.receiver.get().await,
        };
        match outcome {
            ConnectOutcome::Connected => WaitResult::Connected,
            ConnectOutcome::Failed => WaitResult::Failed,
        }
    }

    /// Start a new connection sequence on the live event subscriptions. The
    /// driver callbacks registered by [`start`] are reused, never registered
    /// twice.
    #[allow(unused)]
    pub fn reset(&mut self) {
        OUTCOME.sender().clear();
        if STATION_EVENTS.try_send(LinkMessage::Reset).is_err() {
            warn!("station event queue full, reset dropped");
        }
    }
}

/// Bring the station up: initialize the radio, subscribe to the link and IP
/// event sources, start the interface and hand the connection sequence to the
/// dispatch task. Returns without waiting for an outcome. Any failure here is
/// fatal to the sequence.
pub async fn start(
    spawner: Spawner,
    wifi: WIFI<'static>,
    config: StationConfig,
) -> Result<StationLink, SetupError> {
    let radio = esp_radio::init().map_err(SetupError::Radio)?;
    let radio = RADIO_INIT.init(radio);

    let (mut controller, interfaces) =
        esp_radio::wifi::new(radio, wifi, WifiConfig::default()).map_err(SetupError::Wifi)?;

    let client_config = ClientConfig::default()
        .with_ssid(config.ssid.into())
        .with_password(config.password.into())
        .with_auth_method(config.auth_method);
    controller
        .set_config(&Client(client_config))
        .map_err(SetupError::Wifi)?;

    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::<4>::new()),
        0x8A3D_41C6_09B7_552E,
    );

    subscribe_link_events();
    OUTCOME.sender().clear();

    controller.start_async().await.map_err(SetupError::Wifi)?;
    info!("station started, ssid {}", config.ssid);

    spawner.spawn(net_task(runner)).map_err(SetupError::Spawn)?;
    spawner
        .spawn(link_task(controller, stack, config.max_retries))
        .map_err(SetupError::Spawn)?;

    Ok(StationLink {
        receiver: OUTCOME
            .receiver()
            .expect("outcome watch receiver slots exhausted"),
    })
}

/// Route the radio driver's station events into the dispatch queue. The
/// handlers run in the radio's own context and must only enqueue; installing
/// them twice would double-deliver, hence the guard.
fn subscribe_link_events() {
    if EVENT_HOOKS_INSTALLED.swap(true, Ordering::Relaxed) {
        return;
    }
    event::StaStart::update_handler(|_| {
        if STATION_EVENTS
            .try_send(LinkMessage::Driver(StationEvent::StationStarted))
            .is_err()
        {
            warn!("station event queue full, start event dropped");
        }
    });
    event::StaDisconnected::update_handler(|_| {
        if STATION_EVENTS
            .try_send(LinkMessage::Driver(StationEvent::StationDisconnected))
            .is_err()
        {
            warn!("station event queue full, disconnect dropped");
        }
    });
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

/// Single-writer dispatch loop: owns the coordinator state and the radio
/// controller, consumes queued link events and the DHCP address watcher in
/// arrival order, and publishes the terminal outcome once per sequence.
#[embassy_executor::task]
async fn link_task(
    mut controller: WifiController<'static>,
    stack: Stack<'static>,
    max_retries: u32,
) {
    let outcome_tx = OUTCOME.sender();
    let mut coordinator = ConnectionCoordinator::new(max_retries);
    loop {
        let message = if coordinator.terminal().is_some() {
            // Terminal: nothing to race the IP watcher for, just drain the
            // queue until a reset arrives.
            STATION_EVENTS.receive().await
        } else {
            match select(STATION_EVENTS.receive(), address_acquired(stack)).await {
                Either::First(message) => message,
                Either::Second(address) => {
                    LinkMessage::Driver(StationEvent::AddressAcquired { address })
                }
            }
        };

        let event = match message {
            LinkMessage::Reset => {
                coordinator.reset();
                info!("station sequence reset");
                // No fresh StaStart fires on a running interface, so the new
                // sequence issues its first attempt directly.
                issue_connect(&mut controller);
                continue;
            }
            LinkMessage::Driver(event) => event,
        };

        match coordinator.handle_event(event) {
            HandlerAction::IssueConnect => {
                log_attempt(&event, &coordinator, max_retries);
                issue_connect(&mut controller);
            }
            HandlerAction::Ignore => {}
        }
        if let Some(outcome) = coordinator.terminal() {
            publish_outcome(&outcome_tx, outcome, &event);
        }
    }
}

/// Resolves once the DHCP stack holds an IPv4 configuration.
async fn address_acquired(stack: Stack<'static>) -> Ipv4Addr {
    loop {
        stack.wait_config_up().await;
        if let Some(config) = stack.config_v4() {
            return config.address.address();
        }
    }
}

/// Fire-and-forget connect request. The driver reports the attempt's fate
/// through a later event; a synchronously rejected request surfaces as the
/// disconnect the retry policy already handles.
fn issue_connect(controller: &mut WifiController<'static>) {
    if let Err(err) = controller.connect() {
        warn!("station connect request rejected: {}", err);
    }
}

fn log_attempt(event: &StationEvent, coordinator: &ConnectionCoordinator, max_retries: u32) {
    match event {
        StationEvent::StationStarted => info!("station interface up, connecting"),
        StationEvent::StationDisconnected => info!(
            "station disconnected, retry {}/{}",
            coordinator.retry_count(),
            max_retries
        ),
        StationEvent::AddressAcquired { .. } => {}
    }
}

fn publish_outcome(
    outcome_tx: &Sender<'static, CriticalSectionRawMutex, ConnectOutcome, OUTCOME_WAITERS>,
    outcome: ConnectOutcome,
    event: &StationEvent,
) {
    // The watch already holding a value means this sequence's outcome was
    // published; terminal state never transitions twice.
    if outcome_tx.try_get().is_some() {
        return;
    }
    match event {
        StationEvent::AddressAcquired { address } => {
            let octets = address.octets();
            info!(
                "station got ip {}.{}.{}.{}",
                octets[0], octets[1], octets[2], octets[3]
            );
        }
        _ => {}
    }
    match outcome {
        ConnectOutcome::Connected => info!("station connected"),
        ConnectOutcome::Failed => warn!("station failed, retry budget exhausted"),
    }
    outcome_tx.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    fn address() -> StationEvent {
        StationEvent::AddressAcquired {
            address: Ipv4Addr::new(192, 168, 1, 34),
        }
    }

    /// Count connect requests produced by a scripted event sequence.
    fn drive(coordinator: &mut ConnectionCoordinator, events: &[StationEvent]) -> u32 {
        let mut connects = 0;
        for event in events {
            if coordinator.handle_event(*event) == HandlerAction::IssueConnect {
                connects += 1;
            }
        }
        connects
    }

    #[test]
    fn fails_after_retry_budget_exhausted() {
        let mut coordinator = ConnectionCoordinator::new(3);
        let connects = drive(
            &mut coordinator,
            &[
                StationEvent::StationStarted,
                StationEvent::StationDisconnected,
                StationEvent::StationDisconnected,
                StationEvent::StationDisconnected,
                StationEvent::StationDisconnected,
            ],
        );
        assert_eq!(coordinator.terminal(), Some(ConnectOutcome::Failed));
        // One initial attempt plus one per permitted retry, never more.
        assert_eq!(connects, 4);
    }

    #[test]
    fn connects_after_transient_disconnect() {
        let mut coordinator = ConnectionCoordinator::new(3);
        drive(
            &mut coordinator,
            &[
                StationEvent::StationStarted,
                StationEvent::StationDisconnected,
                address(),
            ],
        );
        assert_eq!(coordinator.terminal(), Some(ConnectOutcome::Connected));
        assert_eq!(coordinator.retry_count(), 0);
    }

    #[test]
    fn zero_retry_budget_fails_on_first_disconnect() {
        let mut coordinator = ConnectionCoordinator::new(0);
        let connects = drive(
            &mut coordinator,
            &[
                StationEvent::StationStarted,
                StationEvent::StationDisconnected,
            ],
        );
        assert_eq!(coordinator.terminal(), Some(ConnectOutcome::Failed));
        assert_eq!(connects, 1);
    }

    #[test]
    fn terminal_failure_is_latched() {
        let mut coordinator = ConnectionCoordinator::new(0);
        drive(
            &mut coordinator,
            &[
                StationEvent::StationStarted,
                StationEvent::StationDisconnected,
            ],
        );
        assert_eq!(coordinator.terminal(), Some(ConnectOutcome::Failed));

        // Late link noise cannot reopen or flip a finished sequence.
        let connects = drive(
            &mut coordinator,
            &[
                StationEvent::StationStarted,
                StationEvent::StationDisconnected,
                address(),
            ],
        );
        assert_eq!(connects, 0);
        assert_eq!(coordinator.terminal(), Some(ConnectOutcome::Failed));
    }

    #[test]
    fn terminal_success_is_latched_against_disconnects() {
        let mut coordinator = ConnectionCoordinator::new(2);
        drive(&mut coordinator, &[StationEvent::StationStarted, address()]);
        assert_eq!(coordinator.terminal(), Some(ConnectOutcome::Connected));

        let connects = drive(
            &mut coordinator,
            &[
                StationEvent::StationDisconnected,
                StationEvent::StationDisconnected,
            ],
        );
        assert_eq!(connects, 0);
        assert_eq!(coordinator.terminal(), Some(ConnectOutcome::Connected));
    }

    #[test]
    fn reset_starts_a_fresh_sequence() {
        let mut coordinator = ConnectionCoordinator::new(1);
        drive(
            &mut coordinator,
            &[
                StationEvent::StationStarted,
                StationEvent::StationDisconnected,
                StationEvent::StationDisconnected,
            ],
        );
        assert_eq!(coordinator.terminal(), Some(ConnectOutcome::Failed));

        coordinator.reset();
        assert_eq!(coordinator.terminal(), None);
        assert_eq!(coordinator.retry_count(), 0);
        drive(&mut coordinator, &[address()]);
        assert_eq!(coordinator.terminal(), Some(ConnectOutcome::Connected));
    }

    #[test]
    fn retry_bound_counts_consecutive_disconnects_only() {
        // The bound counts disconnects since the last acquired address, not
        // a lifetime total.
        let mut coordinator = ConnectionCoordinator::new(2);
        drive(
            &mut coordinator,
            &[
                StationEvent::StationStarted,
                StationEvent::StationDisconnected,
                StationEvent::StationDisconnected,
            ],
        );
        assert_eq!(coordinator.terminal(), None);
        assert_eq!(coordinator.retry_count(), 2);

        drive(&mut coordinator, &[address()]);
        assert_eq!(coordinator.retry_count(), 0);
    }

    #[test]
    fn outcome_broadcast_reaches_all_receivers() {
        let watch: Watch<NoopRawMutex, ConnectOutcome, 2> = Watch::new();
        let mut first = watch.receiver().unwrap();
        let mut second = watch.receiver().unwrap();

        watch.sender().send(ConnectOutcome::Connected);

        // The signal is broadcast, not consumed: every waiter observes the
        // same terminal value, as often as it asks.
        assert_eq!(first.try_get(), Some(ConnectOutcome::Connected));
        assert_eq!(second.try_get(), Some(ConnectOutcome::Connected));
        assert_eq!(first.try_get(), Some(ConnectOutcome::Connected));
    }
}
