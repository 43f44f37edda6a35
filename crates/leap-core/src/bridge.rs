// ── Bridge engine ──
//
// Full lifecycle management for a LEAP bridge connection: TLS connect,
// flavor discovery, model bootstrap, subscription establishment, live
// event routing, the command API, and reconnect supervision. All model
// mutation happens on the session's read-loop task; callers observe the
// model through stable entries and registered observers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use leap_api::{id_from_href, CommuniqueType, Connection, Message, Requester, UrlMatch};

use crate::commands;
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::model::{
    default_button_name, derive_device_name, Area, Button, ButtonEvent, ButtonGroup, Device,
    DeviceKind, Domain, FanSpeed, LedState, OccupancyGroup, OccupancyStatus, Scene, Zone,
};
use crate::store::{BootstrapSeen, DataStore, Entry};
use crate::subscribe::{SubscriberHandle, SubscriberRegistry};
use crate::wire;

/// Bridges with more than one page of areas are read page-by-page.
const AREA_PAGE_LIMIT: usize = 100;

/// Connection state observable through
/// [`connection_state`](Bridge::connection_state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Handshaking,
    Bootstrapping,
    Live,
    Error,
    Reconnecting { attempt: u32 },
    Closing,
}

/// Which generation of LEAP server we are talking to. The flavors
/// differ in URL shapes and in how buttons are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeFlavor {
    /// Caséta and RA2 Select bridges.
    Caseta,
    /// RA3 and HomeWorks QSX processors.
    Processor,
}

/// Factory for fresh connections; invoked by the supervisor on every
/// (re)connect attempt.
pub type Connector =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Connection, leap_api::Error>> + Send + Sync>;

// ── Bridge ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable. [`connect`](Self::connect) performs the first
/// TLS connect and bootstrap inline and then hands the session to a
/// supervisor task that reconnects with capped exponential backoff
/// until [`close`](Self::close).
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    connector: Connector,
    store: DataStore,
    device_subs: SubscriberRegistry<Device>,
    button_subs: SubscriberRegistry<ButtonEvent>,
    occupancy_subs: SubscriberRegistry<OccupancyGroup>,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Option<Requester>>,
    connected_cb: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct SessionGuard {
    requester: Requester,
    run: JoinHandle<()>,
    cancel: CancellationToken,
}

impl SessionGuard {
    async fn shutdown(self) {
        self.cancel.cancel();
        self.requester.close().await;
        let _ = self.run.await;
    }
}

impl Bridge {
    /// Create a bridge that connects with TLS using the credentials
    /// produced by pairing. Does NOT connect — call
    /// [`connect`](Self::connect).
    pub fn new(config: BridgeConfig, credentials: leap_api::TlsCredentials) -> Self {
        let host = config.host.clone();
        let port = config.port;
        let timeout = config.connect_timeout;
        let connector: Connector = Arc::new(move || {
            let host = host.clone();
            let credentials = credentials.clone();
            Box::pin(async move { Connection::open(&host, port, &credentials, timeout).await })
        });
        Self::with_connector(config, connector)
    }

    /// Create a bridge with a custom connection factory. Used by tests
    /// to run the engine over in-memory pipes.
    pub fn with_connector(config: BridgeConfig, connector: Connector) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(BridgeInner {
                config,
                connector,
                store: DataStore::new(),
                device_subs: SubscriberRegistry::new(),
                button_subs: SubscriberRegistry::new(),
                occupancy_subs: SubscriberRegistry::new(),
                state_tx,
                session: Mutex::new(None),
                connected_cb: Mutex::new(None),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect and run the first bootstrap. An error here is returned
    /// directly; after the first success the supervisor owns the
    /// connection and reconnects on its own.
    pub async fn connect(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Disconnected);
        }

        let session = match self.start_session().await {
            Ok(session) => session,
            Err(e) => {
                let _ = self.inner.state_tx.send(ConnectionState::Idle);
                return Err(e);
            }
        };

        let bridge = self.clone();
        let handle = tokio::spawn(async move { bridge.supervise(session).await });
        self.inner.tasks.lock().push(handle);
        Ok(())
    }

    /// Stop the engine. Pending command awaits resolve with
    /// [`ConnectionClosed`](leap_api::Error::ConnectionClosed); the
    /// model stays readable.
    pub async fn close(&self) {
        self.inner.cancel.cancel();

        let handles: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        let session = self.inner.session.lock().take();
        if let Some(requester) = session {
            requester.close().await;
        }
        let _ = self.inner.state_tx.send(ConnectionState::Closing);
        debug!("bridge closed");
    }

    /// Register a callback invoked exactly once per successful
    /// bootstrap (including re-bootstraps after reconnect).
    pub fn on_connect(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.inner.connected_cb.lock() = Some(Arc::new(callback));
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state_tx.borrow() == ConnectionState::Live
    }

    // ── Session management ───────────────────────────────────────────

    async fn start_session(&self) -> Result<SessionGuard, CoreError> {
        let _ = self.inner.state_tx.send(ConnectionState::Connecting);
        let pending_connection = (self.inner.connector)();
        let _ = self.inner.state_tx.send(ConnectionState::Handshaking);
        let connection = pending_connection.await?;

        let requester =
            Requester::with_timeout(connection, self.inner.config.request_timeout);

        // Catch-all registered before bootstrap: some firmwares emit
        // zone statuses before the handshake finishes.
        requester.subscribe_unsolicited(self.handler(BridgeInner::handle_unsolicited));

        let run = {
            let requester = requester.clone();
            tokio::spawn(async move {
                if let Err(e) = requester.run().await {
                    warn!(error = %e, "LEAP session ended with error");
                }
            })
        };

        let _ = self.inner.state_tx.send(ConnectionState::Bootstrapping);
        if let Err(e) = self.bootstrap(&requester).await {
            requester.close().await;
            let _ = run.await;
            return Err(e);
        }

        let session_cancel = self.inner.cancel.child_token();
        {
            let requester = requester.clone();
            let interval = self.inner.config.ping_interval;
            let cancel = session_cancel.clone();
            tokio::spawn(ping_loop(requester, interval, cancel));
        }

        *self.inner.session.lock() = Some(requester.clone());
        let _ = self.inner.state_tx.send(ConnectionState::Live);

        let callback = self.inner.connected_cb.lock().clone();
        if let Some(callback) = callback {
            callback();
        }

        info!(devices = self.inner.store.device_count(), "bridge is live");
        Ok(SessionGuard {
            requester,
            run,
            cancel: session_cancel,
        })
    }

    async fn supervise(self, mut session: SessionGuard) {
        loop {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => {
                    session.shutdown().await;
                    let _ = self.inner.state_tx.send(ConnectionState::Closing);
                    return;
                }
                _ = &mut session.run => {}
            }

            session.cancel.cancel();
            *self.inner.session.lock() = None;
            let _ = self.inner.state_tx.send(ConnectionState::Error);
            warn!("LEAP session ended, reconnecting");

            let mut attempt: u32 = 0;
            session = loop {
                let delay = self.inner.config.backoff.delay(attempt);
                let _ = self
                    .inner
                    .state_tx
                    .send(ConnectionState::Reconnecting { attempt });
                debug!(delay_ms = delay.as_millis() as u64, attempt, "waiting before reconnect");

                tokio::select! {
                    biased;
                    _ = self.inner.cancel.cancelled() => {
                        let _ = self.inner.state_tx.send(ConnectionState::Closing);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                match self.start_session().await {
                    Ok(next) => break next,
                    Err(e) => {
                        warn!(error = %e, attempt, "reconnect attempt failed");
                        attempt = attempt.saturating_add(1);
                    }
                }
            };
        }
    }

    fn session(&self) -> Result<Requester, CoreError> {
        self.inner.session.lock().clone().ok_or(CoreError::Disconnected)
    }

    /// Wrap a `BridgeInner` method as a router handler. Handlers hold a
    /// weak reference so a dropped bridge cannot be kept alive by its
    /// own session.
    fn handler(&self, f: fn(&BridgeInner, &Message)) -> leap_api::MessageHandler {
        let weak = Arc::downgrade(&self.inner);
        Arc::new(move |message: &Message| {
            if let Some(inner) = weak.upgrade() {
                f(&inner, message);
            }
        })
    }

    // ── Bootstrap ────────────────────────────────────────────────────

    /// Populate the model and establish subscriptions. Flavor discovery
    /// failure aborts (and triggers reconnect); every later step logs
    /// and continues.
    async fn bootstrap(&self, requester: &Requester) -> Result<(), CoreError> {
        let flavor = self.discover_flavor(requester).await?;
        debug!(?flavor, "bridge flavor detected");

        let mut seen = BootstrapSeen::default();

        if let Err(e) = self.load_areas(requester, &mut seen).await {
            warn!(error = %e, "failed to load areas");
        }

        match flavor {
            BridgeFlavor::Caseta => {
                tolerate(self.load_devices(requester, &mut seen).await, "devices");
                tolerate(self.prime_zone_statuses(requester).await, "zone statuses");
                tolerate(self.load_buttons(requester, &mut seen).await, "buttons");
                tolerate(
                    self.subscribe_buttons(requester, &seen.buttons).await,
                    "button subscriptions",
                );
                tolerate(
                    self.load_occupancy_groups(requester, &mut seen).await,
                    "occupancy groups",
                );
                tolerate(
                    self.subscribe_url(
                        requester,
                        "/occupancygroup/status",
                        BridgeInner::handle_occupancy_group_status,
                    )
                    .await,
                    "occupancy subscription",
                );
                tolerate(self.load_scenes(requester, &mut seen).await, "scenes");
            }
            BridgeFlavor::Processor => {
                tolerate(self.load_processor(requester, &mut seen).await, "processor");
                let areas = self.inner.store.areas();
                for area in &areas {
                    let (area_id, area_name) = area.with(|a| (a.id, a.name.clone()));
                    tolerate(
                        self.load_control_stations(requester, area_id, &area_name, &mut seen)
                            .await,
                        "control stations",
                    );
                    tolerate(
                        self.load_area_zones(requester, area_id, &area_name, &mut seen)
                            .await,
                        "area zones",
                    );
                }
                tolerate(
                    self.subscribe_url(requester, "/zone/status", BridgeInner::handle_multi_zone_status)
                        .await,
                    "zone subscription",
                );
                tolerate(
                    self.load_processor_occupancy(requester, &mut seen).await,
                    "occupancy sensors",
                );
                tolerate(
                    self.subscribe_url(requester, "/area/status", BridgeInner::handle_area_status)
                        .await,
                    "area status subscription",
                );
            }
        }

        self.inner.store.prune(&seen);
        Ok(())
    }

    async fn discover_flavor(&self, requester: &Requester) -> Result<BridgeFlavor, CoreError> {
        let response = requester
            .request(CommuniqueType::ReadRequest, "/project", None)
            .await?;
        let body: wire::ProjectBody = decode_body(&response)?;
        let flavor = match body.project.product_type.as_str() {
            "Lutron RadioRA 3 Project" | "Lutron HWQS Project" => BridgeFlavor::Processor,
            _ => BridgeFlavor::Caseta,
        };
        Ok(flavor)
    }

    /// Read `/area` page-by-page until a short page.
    async fn load_areas(
        &self,
        requester: &Requester,
        seen: &mut BootstrapSeen,
    ) -> Result<(), CoreError> {
        let store = &self.inner.store;
        let mut offset = 0usize;
        let mut loaded: Vec<(u32, Option<u32>)> = Vec::new();

        loop {
            let url = if offset == 0 {
                "/area".to_owned()
            } else {
                format!("/area?offset={offset}")
            };
            let response = requester
                .request(CommuniqueType::ReadRequest, &url, None)
                .await?;
            let Some(body) = optional_body::<wire::MultipleAreaDefinition>(&response)? else {
                break;
            };

            let page_len = body.areas.len();
            for area in body.areas {
                let Ok(id) = id_from_href(&area.href) else {
                    warn!(href = %area.href, "skipping area with unparseable href");
                    continue;
                };
                let parent_id = area
                    .parent
                    .as_ref()
                    .and_then(|p| id_from_href(&p.href).ok());
                let occupancy_group_id = area.occupancy_groups.iter().find_map(|r| {
                    r.occupancy_group
                        .as_ref()
                        .map(|g| g.href.as_str())
                        .or(r.href.as_deref())
                        .and_then(|href| id_from_href(href).ok())
                });

                store.areas.upsert_with(
                    id,
                    || Area::new(id, area.name.clone()),
                    |existing| {
                        existing.name = area.name.clone();
                        existing.parent_id = parent_id;
                        if occupancy_group_id.is_some() {
                            existing.occupancy_group_id = occupancy_group_id;
                        }
                    },
                );
                seen.areas.insert(id);
                loaded.push((id, parent_id));
            }

            if page_len < AREA_PAGE_LIMIT {
                break;
            }
            offset += page_len;
        }

        // Rebuild the tree edges from this pass.
        for (id, _) in &loaded {
            store.areas.update(*id, |area| area.children.clear());
        }
        for (id, parent_id) in &loaded {
            if let Some(parent_id) = parent_id {
                store.areas.update(*parent_id, |parent| {
                    parent.children.insert(*id);
                });
            }
        }
        Ok(())
    }

    async fn load_devices(
        &self,
        requester: &Requester,
        seen: &mut BootstrapSeen,
    ) -> Result<(), CoreError> {
        let response = requester
            .request(CommuniqueType::ReadRequest, "/device", None)
            .await?;
        let Some(body) = optional_body::<wire::MultipleDeviceDefinition>(&response)? else {
            return Ok(());
        };

        for definition in body.devices {
            if let Err(e) = self.apply_device_definition(&definition, None, seen) {
                warn!(error = %e, href = %definition.href, "skipping device");
            }
        }
        Ok(())
    }

    fn apply_device_definition(
        &self,
        definition: &wire::DeviceDefinition,
        name_override: Option<String>,
        seen: &mut BootstrapSeen,
    ) -> Result<Entry<Device>, CoreError> {
        let store = &self.inner.store;
        let id = id_from_href(&definition.href)?;

        let area_id = definition
            .associated_area
            .as_ref()
            .and_then(|a| id_from_href(&a.href).ok());
        let area_name = area_id
            .and_then(|id| store.area(id))
            .map(|a| a.with(|a| a.name.clone()));

        let name = name_override.unwrap_or_else(|| match &definition.fully_qualified_name {
            Some(segments) => segments.join("/"),
            None => {
                let leaf = definition.name.clone().unwrap_or_default();
                match &area_name {
                    Some(area) => format!("{area}/{leaf}"),
                    None => leaf,
                }
            }
        });
        let device_name = derive_device_name(&name, area_name.as_deref());

        let zone_id = definition
            .local_zones
            .first()
            .and_then(|z| id_from_href(&z.href).ok());
        let button_group_ids: Vec<u32> = definition
            .button_groups
            .iter()
            .filter_map(|g| id_from_href(&g.href).ok())
            .collect();
        let occupancy_sensor_ids: Vec<u32> = definition
            .occupancy_sensors
            .iter()
            .filter_map(|s| id_from_href(&s.href).ok())
            .collect();
        let device_type = definition.device_type.clone().unwrap_or_default();

        let entry = store.devices.upsert_with(
            id,
            || Device::new(id),
            |device| {
                device.name = name.clone();
                device.device_name = device_name.clone();
                device.kind = DeviceKind::for_type(&device_type);
                device.device_type = device_type.clone();
                device.model = definition.model.clone();
                device.serial = definition.serial.clone();
                device.area_id = area_id;
                device.zone_id = zone_id;
                device.button_group_ids = button_group_ids.clone();
                device.occupancy_sensor_ids = occupancy_sensor_ids.clone();
                device.type_extras = definition.extra.clone();
            },
        );
        seen.devices.insert(id);

        if let Some(zone_id) = zone_id {
            store.zones.upsert_with(
                zone_id,
                || Zone {
                    id: zone_id,
                    device_id: id,
                },
                |zone| zone.device_id = id,
            );
            seen.zones.insert(zone_id);
        }

        for group_id in &button_group_ids {
            store.button_groups.upsert_with(
                *group_id,
                || ButtonGroup {
                    id: *group_id,
                    parent_device_id: id,
                    button_ids: Vec::new(),
                },
                |group| group.parent_device_id = id,
            );
            seen.button_groups.insert(*group_id);
        }

        Ok(entry)
    }

    /// Prime output state with one read per zone; later changes stream
    /// in as unsolicited `OneZoneStatus` messages.
    async fn prime_zone_statuses(&self, requester: &Requester) -> Result<(), CoreError> {
        let zones: Vec<u32> = self
            .inner
            .store
            .devices()
            .iter()
            .filter_map(|entry| entry.with(|d| d.zone_id))
            .collect();

        for zone_id in zones {
            match requester
                .request(
                    CommuniqueType::ReadRequest,
                    &format!("/zone/{zone_id}/status"),
                    None,
                )
                .await
            {
                Ok(response) => self.inner.handle_one_zone_status(&response),
                Err(e) => debug!(zone_id, error = %e, "zone status read failed"),
            }
        }
        Ok(())
    }

    async fn load_buttons(
        &self,
        requester: &Requester,
        seen: &mut BootstrapSeen,
    ) -> Result<(), CoreError> {
        let store = &self.inner.store;
        let response = requester
            .request(CommuniqueType::ReadRequest, "/button", None)
            .await?;
        let Some(body) = optional_body::<wire::MultipleButtonDefinition>(&response)? else {
            return Ok(());
        };

        for button in body.buttons {
            let Ok(id) = id_from_href(&button.href) else {
                continue;
            };
            let Some(group_id) = button
                .parent
                .as_ref()
                .and_then(|p| id_from_href(&p.href).ok())
            else {
                continue;
            };
            let Some(group) = store.button_groups.get(group_id) else {
                warn!(button = id, group = group_id, "button belongs to unknown button group");
                continue;
            };
            let parent_device_id = group.with(|g| g.parent_device_id);
            let device_name = store
                .device(parent_device_id)
                .map(|d| d.with(|d| d.name.clone()))
                .unwrap_or_default();
            let number = button.button_number.unwrap_or(0);

            store.buttons.upsert_with(
                id,
                || Button::new(id, parent_device_id),
                |b| {
                    b.parent_device_id = parent_device_id;
                    b.number = number;
                    b.name = device_name.clone();
                },
            );
            group.update(|g| {
                if !g.button_ids.contains(&id) {
                    g.button_ids.push(id);
                }
            });
            seen.buttons.insert(id);
        }
        Ok(())
    }

    async fn subscribe_buttons(
        &self,
        requester: &Requester,
        buttons: &HashSet<u32>,
    ) -> Result<(), CoreError> {
        let mut sorted: Vec<u32> = buttons.iter().copied().collect();
        sorted.sort_unstable();
        for button_id in sorted {
            let url = format!("/button/{button_id}/status/event");
            if let Err(e) = self
                .subscribe_url(requester, &url, BridgeInner::handle_button_event)
                .await
            {
                warn!(button_id, error = %e, "button subscription failed");
            }
        }
        Ok(())
    }

    async fn load_scenes(
        &self,
        requester: &Requester,
        seen: &mut BootstrapSeen,
    ) -> Result<(), CoreError> {
        let response = requester
            .request(CommuniqueType::ReadRequest, "/virtualbutton", None)
            .await?;
        let Some(body) = optional_body::<wire::MultipleVirtualButtonDefinition>(&response)? else {
            return Ok(());
        };

        for scene in body.virtual_buttons {
            // Unprogrammed or unnamed virtual buttons are scene picos;
            // not exposed.
            let (true, Some(name)) = (scene.is_programmed, scene.name) else {
                continue;
            };
            let Ok(id) = id_from_href(&scene.href) else {
                continue;
            };
            self.inner.store.scenes.upsert_with(
                id,
                || Scene {
                    id,
                    name: name.clone(),
                },
                |s| s.name = name.clone(),
            );
            seen.scenes.insert(id);
        }
        Ok(())
    }

    async fn load_occupancy_groups(
        &self,
        requester: &Requester,
        seen: &mut BootstrapSeen,
    ) -> Result<(), CoreError> {
        let store = &self.inner.store;
        let response = requester
            .request(CommuniqueType::ReadRequest, "/occupancygroup", None)
            .await?;
        let Some(body) = optional_body::<wire::MultipleOccupancyGroupDefinition>(&response)? else {
            return Ok(());
        };

        for group in body.occupancy_groups {
            let Ok(id) = id_from_href(&group.href) else {
                continue;
            };
            let sensor_ids: Vec<u32> = group
                .associated_sensors
                .iter()
                .filter_map(|s| id_from_href(&s.occupancy_sensor.href).ok())
                .collect();
            if sensor_ids.is_empty() {
                debug!(group = id, "occupancy group has no sensors");
                continue;
            }

            let Some(area_id) = group
                .associated_areas
                .first()
                .and_then(|a| id_from_href(&a.area.href).ok())
            else {
                warn!(group = id, "occupancy group with sensors has no associated area");
                continue;
            };
            if group.associated_areas.len() > 1 {
                warn!(group = id, "occupancy group associated with multiple areas");
            }
            if store.area(area_id).is_none() {
                warn!(group = id, area = area_id, "unknown parent area for occupancy group");
                continue;
            }

            store.occupancy_groups.upsert_with(
                id,
                || OccupancyGroup::new(id),
                |g| {
                    g.sensor_ids = sensor_ids.clone();
                    g.associated_area_id = Some(area_id);
                },
            );
            store.areas.update(area_id, |area| {
                area.occupancy_group_id = Some(id);
                area.sensor_ids = sensor_ids.clone();
            });
            seen.occupancy_groups.insert(id);
        }
        Ok(())
    }

    // ── Processor-flavor bootstrap ───────────────────────────────────

    async fn load_processor(
        &self,
        requester: &Requester,
        seen: &mut BootstrapSeen,
    ) -> Result<(), CoreError> {
        let response = requester
            .request(
                CommuniqueType::ReadRequest,
                "/device?where=IsThisDevice:true",
                None,
            )
            .await?;
        let Some(body) = optional_body::<wire::MultipleDeviceDefinition>(&response)? else {
            return Ok(());
        };
        let Some(processor) = body.devices.into_iter().next() else {
            return Ok(());
        };

        let area_name = processor
            .associated_area
            .as_ref()
            .and_then(|a| id_from_href(&a.href).ok())
            .and_then(|id| self.inner.store.area(id))
            .map(|a| a.with(|a| a.name.clone()));
        let name = [
            area_name.as_deref(),
            processor.name.as_deref(),
            processor.device_type.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("/");

        if let Err(e) = self.apply_device_definition(&processor, Some(name), seen) {
            warn!(error = %e, "failed to record processor device");
        }
        Ok(())
    }

    async fn load_control_stations(
        &self,
        requester: &Requester,
        area_id: u32,
        area_name: &str,
        seen: &mut BootstrapSeen,
    ) -> Result<(), CoreError> {
        let store = &self.inner.store;
        let response = requester
            .request(
                CommuniqueType::ReadRequest,
                &format!("/area/{area_id}/associatedcontrolstation"),
                None,
            )
            .await?;

        // Rebuild the station list from this pass.
        store
            .areas
            .update(area_id, |area| area.control_station_ids.clear());
        let Some(body) = optional_body::<wire::MultipleControlStation>(&response)? else {
            return Ok(());
        };

        for station in body.control_stations {
            if let Ok(station_id) = id_from_href(&station.href) {
                store.areas.update(area_id, |area| {
                    if !area.control_station_ids.contains(&station_id) {
                        area.control_station_ids.push(station_id);
                    }
                });
            }
            let station_name = station.name.clone().unwrap_or_default();
            for ganged in station.ganged_devices {
                let device_type = ganged.device.device_type.as_deref().unwrap_or_default();
                if DeviceKind::for_type(device_type) != DeviceKind::Keypad {
                    debug!(href = %ganged.device.href, "control station device is not a keypad");
                    continue;
                }
                let Ok(device_id) = id_from_href(&ganged.device.href) else {
                    continue;
                };
                if let Err(e) = self
                    .load_keypad(requester, device_id, area_name, &station_name, seen)
                    .await
                {
                    warn!(device_id, error = %e, "failed to load keypad");
                }
            }
        }
        Ok(())
    }

    async fn load_keypad(
        &self,
        requester: &Requester,
        device_id: u32,
        area_name: &str,
        station_name: &str,
        seen: &mut BootstrapSeen,
    ) -> Result<(), CoreError> {
        let store = &self.inner.store;

        let response = requester
            .request(
                CommuniqueType::ReadRequest,
                &format!("/device/{device_id}"),
                None,
            )
            .await?;
        let device: wire::OneDeviceDefinition = decode_body(&response)?;
        let definition = device.device;

        let response = requester
            .request(
                CommuniqueType::ReadRequest,
                &format!("/device/{device_id}/buttongroup/expanded"),
                None,
            )
            .await?;
        let Some(groups) = optional_body::<wire::MultipleButtonGroupExpanded>(&response)? else {
            debug!(device_id, "keypad has no buttons");
            return Ok(());
        };

        let leaf = definition.name.clone().unwrap_or_default();
        let name = format!("{area_name}/{station_name}/{leaf}");
        let entry = self.apply_device_definition(&definition, Some(name), seen)?;

        let model = definition.model.clone();
        let mut led_ids = Vec::new();
        let mut subscriptions = Vec::new();

        for group in groups.button_groups {
            let Ok(group_id) = id_from_href(&group.href) else {
                continue;
            };
            store.button_groups.upsert_with(
                group_id,
                || ButtonGroup {
                    id: group_id,
                    parent_device_id: device_id,
                    button_ids: Vec::new(),
                },
                |g| {
                    g.parent_device_id = device_id;
                    g.button_ids.clear();
                },
            );
            seen.button_groups.insert(group_id);

            for button in group.buttons {
                let Ok(button_id) = id_from_href(&button.href) else {
                    continue;
                };
                let number = button.button_number.unwrap_or(0);
                let engraving = button
                    .engraving
                    .as_ref()
                    .and_then(|e| e.text.as_deref())
                    .filter(|text| !text.is_empty())
                    .map(|text| text.replace('\n', " "));
                let button_name = engraving
                    .clone()
                    .or_else(|| default_button_name(model.as_deref(), number).map(str::to_owned))
                    .or_else(|| button.name.clone())
                    .unwrap_or_default();
                let led_id = button
                    .associated_led
                    .as_ref()
                    .and_then(|led| id_from_href(&led.href).ok());

                store.buttons.upsert_with(
                    button_id,
                    || Button::new(button_id, device_id),
                    |b| {
                        b.parent_device_id = device_id;
                        b.number = number;
                        b.name = button_name.clone();
                        b.engraving = engraving.clone();
                        b.led_id = led_id;
                    },
                );
                store.button_groups.update(group_id, |g| {
                    if !g.button_ids.contains(&button_id) {
                        g.button_ids.push(button_id);
                    }
                });
                seen.buttons.insert(button_id);

                subscriptions.push(format!("/button/{button_id}/status/event"));
                if let Some(led_id) = led_id {
                    led_ids.push(led_id);
                    subscriptions.push(format!("/led/{led_id}/status"));
                }
            }
        }

        entry.update(|device| device.button_led_ids = led_ids);

        for url in subscriptions {
            let handler = if url.starts_with("/led/") {
                BridgeInner::handle_led_status
            } else {
                BridgeInner::handle_button_event
            };
            if let Err(e) = self.subscribe_url(requester, &url, handler).await {
                warn!(%url, error = %e, "keypad subscription failed");
            }
        }
        Ok(())
    }

    /// Zones on a processor masquerade as devices, one per output.
    async fn load_area_zones(
        &self,
        requester: &Requester,
        area_id: u32,
        area_name: &str,
        seen: &mut BootstrapSeen,
    ) -> Result<(), CoreError> {
        let store = &self.inner.store;
        let response = requester
            .request(
                CommuniqueType::ReadRequest,
                &format!("/area/{area_id}/associatedzone"),
                None,
            )
            .await?;
        let Some(body) = optional_body::<wire::MultipleZoneDefinition>(&response)? else {
            return Ok(());
        };

        for zone in body.zones {
            let Ok(zone_id) = id_from_href(&zone.href) else {
                continue;
            };
            let leaf = zone.name.clone().unwrap_or_default();
            let name = format!("{area_name}/{leaf}");
            let control_type = zone.control_type.clone().unwrap_or_default();

            store.devices.upsert_with(
                zone_id,
                || Device::new(zone_id),
                |device| {
                    device.name = name.clone();
                    device.device_name = derive_device_name(&name, Some(area_name));
                    device.kind = DeviceKind::for_type(&control_type);
                    device.device_type = control_type.clone();
                    device.area_id = Some(area_id);
                    device.zone_id = Some(zone_id);
                    if let Some(level) = zone.level {
                        device.current_state = Some(level);
                    }
                    if zone.fan_speed.is_some() {
                        device.fan_speed = zone.fan_speed;
                    }
                },
            );
            store.zones.upsert_with(
                zone_id,
                || Zone {
                    id: zone_id,
                    device_id: zone_id,
                },
                |z| z.device_id = zone_id,
            );
            seen.devices.insert(zone_id);
            seen.zones.insert(zone_id);
        }
        Ok(())
    }

    /// Occupancy on processors is reported per area; groups are
    /// synthesized from the occupancy-sensor devices, keyed by area id.
    async fn load_processor_occupancy(
        &self,
        requester: &Requester,
        seen: &mut BootstrapSeen,
    ) -> Result<(), CoreError> {
        let store = &self.inner.store;
        let response = requester
            .request(
                CommuniqueType::ReadRequest,
                "/device?where=IsThisDevice:false",
                None,
            )
            .await?;
        let Some(body) = optional_body::<wire::MultipleDeviceDefinition>(&response)? else {
            return Ok(());
        };

        for device in body.devices {
            let device_type = device.device_type.as_deref().unwrap_or_default();
            if DeviceKind::for_type(device_type) != DeviceKind::OccupancySensor {
                continue;
            }
            let Ok(sensor_id) = id_from_href(&device.href) else {
                continue;
            };
            let Some(area_id) = device
                .associated_area
                .as_ref()
                .and_then(|a| id_from_href(&a.href).ok())
            else {
                continue;
            };
            if store.area(area_id).is_none() {
                warn!(sensor = sensor_id, area = area_id, "occupancy sensor in unknown area");
                continue;
            }

            store.occupancy_groups.upsert_with(
                area_id,
                || OccupancyGroup {
                    id: area_id,
                    status: OccupancyStatus::Unknown,
                    sensor_ids: Vec::new(),
                    associated_area_id: Some(area_id),
                },
                |group| {
                    if !group.sensor_ids.contains(&sensor_id) {
                        group.sensor_ids.push(sensor_id);
                    }
                },
            );
            store.areas.update(area_id, |area| {
                area.occupancy_group_id = Some(area_id);
                if !area.sensor_ids.contains(&sensor_id) {
                    area.sensor_ids.push(sensor_id);
                }
            });
            seen.occupancy_groups.insert(area_id);
        }
        Ok(())
    }

    /// Subscribe and replay the initial response through the same
    /// handler that will receive later notifications.
    async fn subscribe_url(
        &self,
        requester: &Requester,
        url: &str,
        handler: fn(&BridgeInner, &Message),
    ) -> Result<(), CoreError> {
        let (response, _tag) = requester
            .subscribe(url, UrlMatch::Exact, None, self.handler(handler))
            .await?;
        handler(&self.inner, &response);
        Ok(())
    }

    // ── Command API ──────────────────────────────────────────────────

    /// Set a device's output level (0-100). With `fade_time`, lights use
    /// a dimmed transition.
    pub async fn set_value(
        &self,
        device_id: u32,
        value: u8,
        fade_time: Option<Duration>,
    ) -> Result<(), CoreError> {
        let (zone_id, domain) = self.zone_and_domain(device_id)?;
        let command = match (domain, fade_time) {
            (Some(Domain::Light), Some(fade)) => commands::go_to_dimmed_level(value, fade),
            _ => commands::go_to_level(value),
        };
        self.send_zone_command(zone_id, command).await
    }

    /// Turn a device on: lights and switches go to full, fans to high,
    /// covers are raised.
    pub async fn turn_on(
        &self,
        device_id: u32,
        fade_time: Option<Duration>,
    ) -> Result<(), CoreError> {
        match self.domain_of(device_id)? {
            Some(Domain::Fan) => self.set_fan_speed(device_id, FanSpeed::High).await,
            Some(Domain::Cover) => self.raise_cover(device_id).await,
            _ => self.set_value(device_id, 100, fade_time).await,
        }
    }

    pub async fn turn_off(
        &self,
        device_id: u32,
        fade_time: Option<Duration>,
    ) -> Result<(), CoreError> {
        match self.domain_of(device_id)? {
            Some(Domain::Fan) => self.set_fan_speed(device_id, FanSpeed::Off).await,
            Some(Domain::Cover) => self.lower_cover(device_id).await,
            _ => self.set_value(device_id, 0, fade_time).await,
        }
    }

    pub async fn set_fan_speed(
        &self,
        device_id: u32,
        speed: FanSpeed,
    ) -> Result<(), CoreError> {
        let (zone_id, _) = self.zone_and_domain(device_id)?;
        self.send_zone_command(zone_id, commands::go_to_fan_speed(speed))
            .await
    }

    pub async fn set_tilt(&self, device_id: u32, tilt: u8) -> Result<(), CoreError> {
        let (zone_id, _) = self.zone_and_domain(device_id)?;
        self.send_zone_command(zone_id, commands::go_to_tilt(tilt)).await
    }

    /// Raise a cover. The bridge sends no zone status until `Stop`, so
    /// the level is set optimistically.
    pub async fn raise_cover(&self, device_id: u32) -> Result<(), CoreError> {
        let (zone_id, _) = self.zone_and_domain(device_id)?;
        self.send_zone_command(zone_id, commands::bare("Raise")).await?;
        self.inner
            .store
            .devices
            .update(device_id, |d| d.current_state = Some(100));
        Ok(())
    }

    pub async fn lower_cover(&self, device_id: u32) -> Result<(), CoreError> {
        let (zone_id, _) = self.zone_and_domain(device_id)?;
        self.send_zone_command(zone_id, commands::bare("Lower")).await?;
        self.inner
            .store
            .devices
            .update(device_id, |d| d.current_state = Some(0));
        Ok(())
    }

    pub async fn stop_cover(&self, device_id: u32) -> Result<(), CoreError> {
        let (zone_id, _) = self.zone_and_domain(device_id)?;
        self.send_zone_command(zone_id, commands::bare("Stop")).await
    }

    /// Press and release a button.
    pub async fn tap_button(&self, button_id: u32) -> Result<(), CoreError> {
        if self.inner.store.button(button_id).is_none() {
            return Err(CoreError::UnknownEntity { id: button_id });
        }
        let requester = self.session()?;
        requester
            .request(
                CommuniqueType::CreateRequest,
                &format!("/button/{button_id}/commandprocessor"),
                Some(serde_json::json!({"Command": commands::bare("PressAndRelease")})),
            )
            .await?;
        Ok(())
    }

    /// Activate a scene by pressing its virtual button.
    pub async fn activate_scene(&self, scene_id: u32) -> Result<(), CoreError> {
        if self.inner.store.scene(scene_id).is_none() {
            return Err(CoreError::UnknownEntity { id: scene_id });
        }
        let requester = self.session()?;
        requester
            .request(
                CommuniqueType::CreateRequest,
                &format!("/virtualbutton/{scene_id}/commandprocessor"),
                Some(serde_json::json!({"Command": commands::bare("PressAndRelease")})),
            )
            .await?;
        Ok(())
    }

    /// Drive a keypad button LED.
    pub async fn set_led(&self, led_id: u32, on: bool) -> Result<(), CoreError> {
        if self.inner.store.device_by_led(led_id).is_none() {
            return Err(CoreError::UnknownEntity { id: led_id });
        }
        let requester = self.session()?;
        let state = if on { "On" } else { "Off" };
        requester
            .request(
                CommuniqueType::UpdateRequest,
                &format!("/led/{led_id}/status"),
                Some(serde_json::json!({"LEDStatus": {"State": state}})),
            )
            .await?;
        Ok(())
    }

    async fn send_zone_command(
        &self,
        zone_id: u32,
        command: serde_json::Value,
    ) -> Result<(), CoreError> {
        let requester = self.session()?;
        requester
            .request(
                CommuniqueType::CreateRequest,
                &format!("/zone/{zone_id}/commandprocessor"),
                Some(serde_json::json!({"Command": command})),
            )
            .await?;
        Ok(())
    }

    fn zone_and_domain(&self, device_id: u32) -> Result<(u32, Option<Domain>), CoreError> {
        let entry = self
            .inner
            .store
            .device(device_id)
            .ok_or(CoreError::UnknownEntity { id: device_id })?;
        let (zone_id, domain) = entry.with(|d| (d.zone_id, d.domain()));
        let zone_id = zone_id.ok_or(CoreError::UnknownEntity { id: device_id })?;
        Ok((zone_id, domain))
    }

    fn domain_of(&self, device_id: u32) -> Result<Option<Domain>, CoreError> {
        let entry = self
            .inner
            .store
            .device(device_id)
            .ok_or(CoreError::UnknownEntity { id: device_id })?;
        Ok(entry.with(|d| d.domain()))
    }

    // ── Model access ─────────────────────────────────────────────────

    pub fn store(&self) -> &DataStore {
        &self.inner.store
    }

    pub fn devices(&self) -> Vec<Entry<Device>> {
        self.inner.store.devices()
    }

    pub fn device(&self, device_id: u32) -> Option<Entry<Device>> {
        self.inner.store.device(device_id)
    }

    pub fn devices_by_domain(&self, domain: Domain) -> Vec<Entry<Device>> {
        self.devices()
            .into_iter()
            .filter(|entry| entry.with(|d| d.domain()) == Some(domain))
            .collect()
    }

    pub fn devices_by_type(&self, device_type: &str) -> Vec<Entry<Device>> {
        self.devices()
            .into_iter()
            .filter(|entry| entry.with(|d| d.device_type == device_type))
            .collect()
    }

    pub fn areas(&self) -> Vec<Entry<Area>> {
        self.inner.store.areas()
    }

    pub fn buttons(&self) -> Vec<Entry<Button>> {
        self.inner.store.buttons()
    }

    pub fn scenes(&self) -> Vec<Entry<Scene>> {
        self.inner.store.scenes()
    }

    pub fn occupancy_groups(&self) -> Vec<Entry<OccupancyGroup>> {
        self.inner.store.occupancy_groups()
    }

    // ── Observers ────────────────────────────────────────────────────

    /// Observe state changes of one device. The callback runs on the
    /// read-loop task with a snapshot of the device after the change.
    pub fn add_subscriber(
        &self,
        device_id: u32,
        callback: impl Fn(&Device) + Send + Sync + 'static,
    ) -> SubscriberHandle {
        self.inner.device_subs.add(device_id, callback)
    }

    /// Observe press/release events of one button.
    pub fn add_button_subscriber(
        &self,
        button_id: u32,
        callback: impl Fn(&ButtonEvent) + Send + Sync + 'static,
    ) -> SubscriberHandle {
        self.inner.button_subs.add(button_id, callback)
    }

    /// Observe status changes of one occupancy group.
    pub fn add_occupancy_subscriber(
        &self,
        group_id: u32,
        callback: impl Fn(&OccupancyGroup) + Send + Sync + 'static,
    ) -> SubscriberHandle {
        self.inner.occupancy_subs.add(group_id, callback)
    }
}

// ── Event routing ───────────────────────────────────────────────────

impl BridgeInner {
    /// Messages no subscription claims. Dispatch keys off the body
    /// shape rather than `MessageBodyType`, which some firmwares omit.
    fn handle_unsolicited(&self, message: &Message) {
        if message.communique_type != CommuniqueType::ReadResponse {
            return;
        }
        let Some(body) = message.body.as_ref().and_then(|b| b.as_object()) else {
            return;
        };

        if body.contains_key("ZoneStatus") {
            self.handle_one_zone_status(message);
        } else if body.contains_key("ZoneStatuses") {
            self.handle_multi_zone_status(message);
        } else if body.contains_key("ButtonStatus") || body.contains_key("ButtonEvent") {
            self.handle_button_event(message);
        } else if body.contains_key("OccupancyGroupStatuses") {
            self.handle_occupancy_group_status(message);
        } else if body.contains_key("AreaStatuses") {
            self.handle_area_status(message);
        } else if body.contains_key("LEDStatus") {
            self.handle_led_status(message);
        }
    }

    fn handle_one_zone_status(&self, message: &Message) {
        let Some(body) = decode_or_log::<wire::OneZoneStatus>(message, "OneZoneStatus") else {
            return;
        };
        self.apply_zone_status(&body.zone_status);
    }

    fn handle_multi_zone_status(&self, message: &Message) {
        let Some(body) = decode_or_log::<wire::MultipleZoneStatus>(message, "MultipleZoneStatus")
        else {
            return;
        };
        for status in &body.zone_statuses {
            self.apply_zone_status(status);
        }
    }

    fn apply_zone_status(&self, status: &wire::ZoneStatus) {
        let Ok(zone_id) = id_from_href(&status.zone.href) else {
            warn!(href = %status.zone.href, "zone status with unparseable href");
            return;
        };
        let Some(entry) = self.store.device_by_zone(zone_id) else {
            debug!(zone_id, "status for unknown zone");
            return;
        };

        let snapshot = entry.update(|device| {
            if let Some(level) = status.level {
                device.current_state = Some(level);
            } else if let Some(switched) = status.switched_level.as_deref() {
                device.current_state = Some(if switched == "On" { 100 } else { 0 });
            }
            device.fan_speed = status.fan_speed;
            device.tilt = status.tilt;
            device.clone()
        });

        self.device_subs.notify(snapshot.id, &snapshot);
        self.store.mark_event();
    }

    fn handle_button_event(&self, message: &Message) {
        let Some(body) = message.body.clone() else {
            return;
        };

        let parsed = serde_json::from_value::<wire::OneButtonStatusEvent>(body.clone())
            .ok()
            .and_then(|full| {
                id_from_href(&full.button_status.button.href)
                    .ok()
                    .map(|id| (id, full.button_status.button_event.event_type))
            })
            .or_else(|| {
                // Some firmwares send the bare event; the button id then
                // lives in the message URL.
                let bare = serde_json::from_value::<wire::BareButtonEvent>(body).ok()?;
                let id = id_from_href(message.url()).ok()?;
                Some((id, bare.button_event.event_type))
            });
        let Some((button_id, event)) = parsed else {
            debug!(url = message.url(), "unrecognized button event body");
            return;
        };

        let Some(entry) = self.store.button(button_id) else {
            debug!(button_id, "event for unknown button");
            return;
        };
        let parent_device_id = entry.update(|button| {
            button.current_state = event;
            button.parent_device_id
        });

        self.button_subs.notify(button_id, &event);
        if let Some(device) = self.store.device(parent_device_id) {
            let snapshot = device.snapshot();
            self.device_subs.notify(snapshot.id, &snapshot);
        }
        self.store.mark_event();
    }

    fn handle_occupancy_group_status(&self, message: &Message) {
        let Some(body) =
            decode_or_log::<wire::MultipleOccupancyGroupStatus>(message, "occupancy status")
        else {
            return;
        };
        for status in &body.statuses {
            let Ok(group_id) = id_from_href(&status.occupancy_group.href) else {
                continue;
            };
            self.apply_occupancy_status(group_id, status.occupancy_status);
        }
    }

    fn handle_area_status(&self, message: &Message) {
        let Some(body) = decode_or_log::<wire::MultipleAreaStatus>(message, "area status") else {
            return;
        };
        for status in &body.statuses {
            let Some(occupancy) = status.occupancy_status else {
                continue;
            };
            let Ok(area_id) = id_from_href(&status.href) else {
                continue;
            };
            self.apply_occupancy_status(area_id, occupancy);
        }
    }

    fn apply_occupancy_status(&self, group_id: u32, status: OccupancyStatus) {
        let Some(entry) = self.store.occupancy_group(group_id) else {
            if status != OccupancyStatus::Unknown {
                debug!(group_id, "occupancy group has a status but no sensors");
            }
            return;
        };
        if status == OccupancyStatus::Unknown {
            warn!(group_id, "occupancy group has sensors but no status");
        }

        let snapshot = entry.update(|group| {
            group.status = status;
            group.clone()
        });
        if let Some(area_id) = snapshot.associated_area_id {
            self.store.areas.update(area_id, |area| area.occupancy = status);
        }

        self.occupancy_subs.notify(group_id, &snapshot);
        self.store.mark_event();
    }

    fn handle_led_status(&self, message: &Message) {
        let Some(body) = decode_or_log::<wire::OneLedStatus>(message, "OneLEDStatus") else {
            return;
        };
        let Ok(led_id) = id_from_href(&body.led_status.led.href) else {
            return;
        };
        let Some(entry) = self.store.device_by_led(led_id) else {
            warn!(led_id, "LED status for unknown LED");
            return;
        };

        let state = match body.led_status.state.as_str() {
            "On" => LedState::On,
            "Off" => LedState::Off,
            _ => LedState::Unknown,
        };
        let snapshot = entry.update(|device| {
            device.led_states.insert(led_id, state);
            device.clone()
        });
        self.device_subs.notify(snapshot.id, &snapshot);
        self.store.mark_event();
    }
}

// ── Keepalive ───────────────────────────────────────────────────────

/// Periodically ping the LEAP server; a failed ping closes the session
/// and hands control to the reconnect supervisor.
async fn ping_loop(requester: Requester, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = requester
                    .request(CommuniqueType::ReadRequest, "/server/1/status/ping", None)
                    .await
                {
                    warn!(error = %e, "keepalive ping failed, closing session");
                    requester.close().await;
                    break;
                }
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn tolerate(result: Result<(), CoreError>, step: &str) {
    if let Err(e) = result {
        warn!(step, error = %e, "bootstrap step failed, continuing");
    }
}

fn decode_body<T: DeserializeOwned>(message: &Message) -> Result<T, CoreError> {
    let body = message.body.clone().ok_or_else(|| {
        CoreError::Protocol(leap_api::Error::Decode {
            raw: format!("missing body for {}", message.url()),
        })
    })?;
    serde_json::from_value(body).map_err(|e| {
        CoreError::Protocol(leap_api::Error::Decode { raw: e.to_string() })
    })
}

fn optional_body<T: DeserializeOwned>(message: &Message) -> Result<Option<T>, CoreError> {
    match &message.body {
        None => Ok(None),
        Some(body) => serde_json::from_value(body.clone()).map(Some).map_err(|e| {
            CoreError::Protocol(leap_api::Error::Decode { raw: e.to_string() })
        }),
    }
}

fn decode_or_log<T: DeserializeOwned>(message: &Message, what: &str) -> Option<T> {
    let body = message.body.clone()?;
    match serde_json::from_value(body) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(what, error = %e, "undecodable status body");
            None
        }
    }
}
