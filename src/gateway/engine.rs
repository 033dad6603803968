//! Gateway composition root
//!
//! `Gateway` owns every piece of mutable state and exposes the management
//! surface consumed by the control server. State is split over three locks,
//! always taken in this order:
//!
//! 1. `directory`: credentials, allow-lists and sessions
//! 2. `presence`: the per-device presence cache
//! 3. `exchanges`: the pending-exchange table
//!
//! Locks are `std::sync::RwLock`s and are never held across an `.await`.
//! Eviction and rotation take the directory write lock, while the inbound
//! path authorizes and resolves under the directory read lock. An evicted
//! device therefore can never resolve an exchange after `remove_device`
//! returns.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::broker::message::{Envelope, RawMessage, timestamp_secs};
use crate::broker::topic::{TopicLayout, device_topic, notifications_topic, questions_topic};
use crate::broker::transport::{EvictionTarget, Transport};
use crate::client::Session;
use crate::config::{GatewaySettings, Settings};
use crate::correlation::{
    CorrelationEngine, ExchangeHandle, ExchangeOutcome, ExchangeState, duration_from_secs,
    timeout_from_secs,
};
use crate::family::{
    AllowedDevice, Credentials, DeviceId, DeviceKind, FamilyConfig, FamilyDirectory, FamilyId,
    FamilyLookup, validate_id,
};
use crate::gateway::events::GatewayEvent;
use crate::gateway::stats::{Counter, GatewayStats, StatsSnapshot};
use crate::persistence::FamilyStore;
use crate::presence::{DevicePresence, PresenceEvent, PresenceTracker};
use crate::utils::{GatewayError, Result};

const EVENT_CAPACITY: usize = 256;

pub struct Gateway {
    pub(crate) settings: GatewaySettings,
    pub(crate) heartbeat_window: Duration,
    pub(crate) layout: TopicLayout,
    pub(crate) directory: RwLock<FamilyDirectory>,
    pub(crate) presence: RwLock<PresenceTracker>,
    pub(crate) exchanges: RwLock<CorrelationEngine>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) store: Arc<dyn FamilyStore>,
    pub(crate) events: broadcast::Sender<GatewayEvent>,
    pub(crate) stats: GatewayStats,
}

impl Gateway {
    /// Build the gateway and load every stored family into memory.
    pub fn new(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn FamilyStore>,
    ) -> Result<Self> {
        let root = settings.mqtt.topic_root.as_str();
        let mut directory = FamilyDirectory::new(root);
        for record in store.list_families()? {
            if let Err(e) = directory.load(&record) {
                warn!("Skipping stored family {}: {e}", record.family_id);
            }
        }

        let gateway = &settings.gateway;
        let retention = duration_from_secs(gateway.terminal_retention_secs).ok_or_else(|| {
            GatewayError::InvalidTimeout(format!(
                "retention of {}s is out of range",
                gateway.terminal_retention_secs
            ))
        })?;
        let exchanges =
            CorrelationEngine::new(timeout_from_secs(gateway.answer_timeout_secs)?, retention);
        let heartbeat_window = timeout_from_secs(gateway.heartbeat_timeout_secs)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            settings: gateway.clone(),
            heartbeat_window,
            layout: TopicLayout::new(root),
            directory: RwLock::new(directory),
            presence: RwLock::new(PresenceTracker::new()),
            exchanges: RwLock::new(exchanges),
            transport,
            store,
            events,
            stats: GatewayStats::default(),
        })
    }

    pub(crate) fn directory(&self) -> RwLockReadGuard<'_, FamilyDirectory> {
        self.directory.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn directory_mut(&self) -> RwLockWriteGuard<'_, FamilyDirectory> {
        self.directory.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn presence(&self) -> RwLockReadGuard<'_, PresenceTracker> {
        self.presence.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn presence_mut(&self) -> RwLockWriteGuard<'_, PresenceTracker> {
        self.presence.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn exchanges(&self) -> RwLockReadGuard<'_, CorrelationEngine> {
        self.exchanges.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn exchanges_mut(&self) -> RwLockWriteGuard<'_, CorrelationEngine> {
        self.exchanges.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: GatewayEvent) {
        // No watchers is not an error.
        let _ = self.events.send(event);
    }

    fn require_broker(&self) -> Result<()> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(GatewayError::BrokerUnavailable)
        }
    }

    /// Make sure `family_id` is in the directory, pulling it from the store
    /// if this process has not seen it yet. Returns false if the family is
    /// unknown or not enabled anywhere.
    pub(crate) fn ensure_loaded(&self, family_id: &str) -> Result<bool> {
        if self.directory().contains(family_id) {
            return Ok(true);
        }
        match self.store.load_family(family_id)? {
            FamilyLookup::Enabled(record) => {
                let mut directory = self.directory_mut();
                if !directory.contains(family_id) {
                    directory.load(&record)?;
                    info!("Loaded family {family_id} from store");
                }
                Ok(true)
            }
            FamilyLookup::NotEnabled => Ok(false),
        }
    }

    fn require_family(&self, family_id: &str) -> Result<()> {
        if self.ensure_loaded(family_id)? {
            Ok(())
        } else {
            Err(GatewayError::FamilyNotFound(family_id.to_string()))
        }
    }

    pub(crate) fn persist(&self, directory: &FamilyDirectory, family_id: &str) -> Result<()> {
        let Some(record) = directory.record(family_id) else {
            return Ok(());
        };
        self.store.save_family(&record).inspect_err(|e| {
            self.stats.bump(Counter::PersistenceFailures);
            warn!("Failed to persist family {family_id}: {e}");
        })
    }

    /// Cut the given clients off: presence goes to `Disconnected` and the
    /// broker is told to drop them. Called with the directory write lock
    /// held.
    fn terminate(
        &self,
        directory: &mut FamilyDirectory,
        family_id: &str,
        prefix: &str,
        mut clients: Vec<DeviceId>,
        now: DateTime<Utc>,
    ) {
        clients.sort();
        clients.dedup();

        let mut presence = self.presence_mut();
        for client_id in clients {
            directory.sessions.close(&client_id);
            if let Some(transition) = presence.evict(&client_id, now) {
                self.emit(transition.into());
            }
            let target = EvictionTarget {
                family_id: family_id.to_string(),
                client_id,
                prefix: prefix.to_string(),
            };
            if let Err(e) = self.transport.force_disconnect(&target) {
                warn!("Forced disconnect of {} failed: {e}", target.client_id);
            }
        }
    }

    /// Clients of a family that may hold a live broker session. Their
    /// sessions are drained from the table.
    fn live_clients(&self, directory: &mut FamilyDirectory, family_id: &str) -> Vec<DeviceId> {
        let presence = self.presence();
        let mut clients: Vec<DeviceId> = directory
            .registry
            .devices(family_id)
            .into_iter()
            .filter(|d| presence.state(&d.device_id).is_live())
            .map(|d| d.device_id)
            .collect();
        clients.extend(
            directory
                .sessions
                .drain_family(family_id)
                .into_iter()
                .map(|s| s.client_id),
        );
        clients
    }

    /// Switch messaging on or off. Enabling issues credentials on first use;
    /// disabling terminates every live session of the family.
    pub fn enable_messaging(&self, family_id: &str, enabled: bool) -> Result<FamilyConfig> {
        validate_id("family", family_id)?;
        if !enabled {
            self.require_broker()?;
        }
        self.ensure_loaded(family_id)?;

        let mut directory = self.directory_mut();
        directory.acl.ensure_family(family_id);
        directory.acl.set_enabled(family_id, enabled)?;

        if enabled {
            directory.acl.issue_credentials(family_id)?;
        } else if let Some(prefix) = directory.acl.prefix(family_id).map(str::to_string) {
            let clients = self.live_clients(&mut directory, family_id);
            self.terminate(&mut directory, family_id, &prefix, clients, Utc::now());
        }
        info!("Messaging for family {family_id} enabled={enabled}");

        self.persist(&directory, family_id)?;
        directory
            .config(family_id)
            .ok_or_else(|| GatewayError::FamilyNotFound(family_id.to_string()))
    }

    /// Existing credentials, or new ones on first call.
    pub fn issue_credentials(&self, family_id: &str) -> Result<Credentials> {
        self.require_family(family_id)?;
        let mut directory = self.directory_mut();
        let had_credentials = directory.acl.credentials(family_id).is_some();
        let credentials = directory.acl.issue_credentials(family_id)?;
        if !had_credentials {
            self.persist(&directory, family_id)?;
        }
        Ok(credentials)
    }

    /// Replace username, password and prefix. The old identity stops
    /// authenticating immediately and its live sessions are cut.
    pub fn rotate_credentials(&self, family_id: &str) -> Result<Credentials> {
        self.require_broker()?;
        self.require_family(family_id)?;

        let mut directory = self.directory_mut();
        let rotation = directory.acl.rotate_credentials(family_id)?;
        if let Some(revoked) = &rotation.revoked {
            let mut clients = self.live_clients(&mut directory, family_id);
            clients.extend(
                directory
                    .sessions
                    .drain_username(&revoked.username)
                    .into_iter()
                    .map(|s| s.client_id),
            );
            self.terminate(
                &mut directory,
                family_id,
                &revoked.topic_prefix,
                clients,
                Utc::now(),
            );
        }
        self.persist(&directory, family_id)?;
        drop(directory);

        self.emit(GatewayEvent::CredentialsRotated {
            family_id: family_id.to_string(),
        });
        Ok(rotation.issued)
    }

    /// The broker's connect hook. A successful check opens a session and,
    /// for an allowed device, moves it to `Connecting`.
    pub fn authenticate(
        &self,
        client_id: &str,
        username: &str,
        password: &str,
    ) -> Result<FamilyId> {
        let now = Utc::now();
        let mut directory = self.directory_mut();
        let family_id = directory.acl.authenticate(username, password)?;

        let replaced = directory.sessions.open(Session {
            client_id: client_id.to_string(),
            family_id: family_id.clone(),
            username: username.to_string(),
            opened_at: now,
        });
        if replaced.is_some() {
            debug!("Session for {client_id} replaced by a new connection");
        }

        if directory.registry.is_allowed(&family_id, client_id) {
            let transition = self.presence_mut().apply(
                &directory.registry,
                &family_id,
                client_id,
                PresenceEvent::SessionOpened,
                now,
            );
            if let Some(transition) = transition {
                self.emit(transition.into());
            }
        }
        info!("Accepted connection {client_id} for family {family_id}");
        Ok(family_id)
    }

    /// Add or update an allow-list entry. Re-registration resets presence
    /// to `Unknown`.
    pub fn add_device(
        &self,
        family_id: &str,
        device_id: &str,
        display_name: &str,
        kind: DeviceKind,
    ) -> Result<FamilyConfig> {
        if device_id == self.settings.backend_identity {
            return Err(GatewayError::InvalidIdentifier {
                kind: "device",
                id: device_id.to_string(),
                reason: "reserved for the gateway's backend identity".to_string(),
            });
        }
        self.require_family(family_id)?;

        let mut directory = self.directory_mut();
        directory.registry.add(
            family_id,
            AllowedDevice {
                device_id: device_id.to_string(),
                display_name: display_name.to_string(),
                kind,
                registered_at: Utc::now(),
            },
        )?;
        self.presence_mut().forget(device_id);
        info!("Device {device_id} allowed for family {family_id}");

        self.persist(&directory, family_id)?;
        directory
            .config(family_id)
            .ok_or_else(|| GatewayError::FamilyNotFound(family_id.to_string()))
    }

    /// Remove a device and evict its live session.
    pub fn remove_device(&self, family_id: &str, device_id: &str) -> Result<FamilyConfig> {
        self.require_broker()?;
        self.require_family(family_id)?;

        let mut directory = self.directory_mut();
        directory.registry.remove(family_id, device_id)?;
        if let Some(prefix) = directory.acl.prefix(family_id).map(str::to_string) {
            self.terminate(
                &mut directory,
                family_id,
                &prefix,
                vec![device_id.to_string()],
                Utc::now(),
            );
        }
        info!("Device {device_id} removed from family {family_id}");

        self.persist(&directory, family_id)?;
        let config = directory
            .config(family_id)
            .ok_or_else(|| GatewayError::FamilyNotFound(family_id.to_string()));
        drop(directory);

        self.emit(GatewayEvent::DeviceEvicted {
            family_id: family_id.to_string(),
            device_id: device_id.to_string(),
        });
        config
    }

    /// Served from the presence cache; never touches the network.
    pub fn connected_devices(&self, family_id: &str) -> Vec<DevicePresence> {
        self.presence().connected(family_id)
    }

    pub fn family_config(&self, family_id: &str) -> Result<FamilyConfig> {
        self.require_family(family_id)?;
        self.directory()
            .config(family_id)
            .ok_or_else(|| GatewayError::FamilyNotFound(family_id.to_string()))
    }

    /// Prefix of an enabled family, checking the optional target device.
    fn outbound_prefix(&self, family_id: &str, target: Option<&str>) -> Result<String> {
        if !self.ensure_loaded(family_id)? {
            return Err(GatewayError::FamilyNotEnabled(family_id.to_string()));
        }
        let directory = self.directory();
        if !directory.acl.is_enabled(family_id) {
            return Err(GatewayError::FamilyNotEnabled(family_id.to_string()));
        }
        let prefix = directory
            .acl
            .prefix(family_id)
            .ok_or_else(|| GatewayError::FamilyNotEnabled(family_id.to_string()))?;
        if let Some(device_id) = target {
            if !directory.registry.is_allowed(family_id, device_id) {
                return Err(GatewayError::DeviceNotAllowed {
                    family_id: family_id.to_string(),
                    device_id: device_id.to_string(),
                });
            }
        }
        Ok(prefix.to_string())
    }

    pub fn dispatch_question(
        &self,
        family_id: &str,
        content: &str,
        target: Option<DeviceId>,
        timeout: Option<Duration>,
    ) -> Result<ExchangeHandle> {
        self.dispatch_question_at(family_id, content, target, timeout, Utc::now())
    }

    /// Register an exchange and publish the question: on the family's
    /// question topic for a broadcast, on the device's `questions` channel
    /// when targeted. A failed publish withdraws the exchange.
    pub fn dispatch_question_at(
        &self,
        family_id: &str,
        content: &str,
        target: Option<DeviceId>,
        timeout: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<ExchangeHandle> {
        self.require_broker()?;
        let prefix = self.outbound_prefix(family_id, target.as_deref())?;

        let handle = self
            .exchanges_mut()
            .register(family_id, target.clone(), timeout, now)?;
        let question_id = handle.question_id.clone();

        let envelope = match &target {
            None => Envelope::outbound(
                questions_topic(&prefix, family_id),
                json!({
                    "question_id": question_id,
                    "content": content,
                    "timestamp": timestamp_secs(now),
                }),
            ),
            Some(device_id) => Envelope::outbound(
                device_topic(&prefix, family_id, device_id, "questions"),
                json!({
                    "type": "question",
                    "question_id": question_id,
                    "content": content,
                    "timestamp": timestamp_secs(now),
                }),
            ),
        };

        if let Err(e) = self.transport.publish(envelope) {
            self.exchanges_mut().withdraw(&question_id);
            warn!("Dispatch of {question_id} to family {family_id} failed: {e}");
            return Err(e);
        }
        info!(
            "Dispatched question {question_id} to family {family_id}{}",
            target
                .as_deref()
                .map(|d| format!(" (device {d})"))
                .unwrap_or_default()
        );
        Ok(handle)
    }

    /// Publish an uncorrelated message: a family-wide notification, or a
    /// device-directed message on `devices/{device_id}/{message_type}`.
    pub fn send_message(
        &self,
        family_id: &str,
        target: Option<DeviceId>,
        message_type: &str,
        content: &str,
    ) -> Result<()> {
        self.require_broker()?;
        let prefix = self.outbound_prefix(family_id, target.as_deref())?;
        let now = timestamp_secs(Utc::now());

        let envelope = match &target {
            None => Envelope::outbound(
                notifications_topic(&prefix, family_id),
                json!({
                    "type": message_type,
                    "content": content,
                    "device_id": self.settings.backend_identity,
                    "timestamp": now,
                }),
            ),
            Some(device_id) => {
                let topic = device_topic(&prefix, family_id, device_id, message_type);
                let valid = !message_type.is_empty()
                    && message_type
                        .split('/')
                        .all(|p| !p.is_empty() && !p.contains(['+', '#']));
                if !valid {
                    return Err(GatewayError::malformed(&topic, "invalid message type"));
                }
                Envelope::outbound(
                    topic,
                    json!({
                        "type": message_type,
                        "content": content,
                        "timestamp": now,
                    }),
                )
            }
        };
        self.transport.publish(envelope)
    }

    /// Cancel a pending exchange. Returns false if it is unknown or already
    /// settled.
    pub fn cancel(&self, question_id: &str) -> bool {
        let mut exchanges = self.exchanges_mut();
        let family_id = exchanges.get(question_id).map(|e| e.family_id.clone());
        if !exchanges.cancel(question_id, Utc::now()) {
            return false;
        }
        drop(exchanges);

        self.stats.bump(Counter::ExchangesCancelled);
        if let Some(family_id) = family_id {
            self.emit(GatewayEvent::ExchangeSettled {
                question_id: question_id.to_string(),
                family_id,
                outcome: ExchangeOutcome::Cancelled,
            });
        }
        true
    }

    pub fn exchange_state(&self, question_id: &str) -> Option<ExchangeState> {
        self.exchanges().state(question_id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Refuse new dispatches. Open exchanges still settle or expire.
    pub fn shutdown(&self) {
        self.exchanges_mut().shutdown();
        info!("Gateway no longer accepting questions");
    }

    /// Expire overdue exchanges and silent devices.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let report = self.exchanges_mut().sweep(now);
        for (question_id, family_id) in report.expired {
            self.stats.bump(Counter::ExchangesExpired);
            self.emit(GatewayEvent::ExchangeSettled {
                question_id,
                family_id,
                outcome: ExchangeOutcome::TimedOut,
            });
        }
        if report.purged > 0 {
            debug!("Purged {} settled exchanges", report.purged);
        }

        let expired = self
            .presence_mut()
            .expire_stale(now, self.heartbeat_window);
        for transition in expired {
            self.emit(transition.into());
        }
    }

    /// Consume raw publishes from the broker until the channel closes.
    pub async fn run_inbound(self: Arc<Self>, mut inbound: mpsc::Receiver<RawMessage>) {
        while let Some(raw) = inbound.recv().await {
            self.handle_inbound(raw);
        }
        info!("Inbound dispatch loop stopped");
    }

    pub async fn run_maintenance(
        self: Arc<Self>,
        every: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(Utc::now()),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Maintenance loop stopped");
    }
}
