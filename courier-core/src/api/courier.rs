// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Courier Orchestrator
//!
//! Main entry point for the Courier API.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::config::CourierConfig;
use super::error::{CourierError, CourierResult};
use crate::contacts::{
    AddressBookClient, ContactClient, ContactJobRunner, ContactSyncJobImpl, ContactsService,
    PlatformContacts,
};
use crate::crypto::{CipherService, SymmetricKey};
use crate::messaging::{MessengerDeps, MessengerService};
use crate::relay::{
    ReconnectionTimer, RelayClientEvent, RelayClientFactory, RelayClientManager, RelayError,
    RelayStatus,
};
use crate::storage::Storage;
use crate::types::{UserCredentials, UserId};

/// Main Courier orchestrator.
///
/// Wires storage, the cipher service, the relay and the contact services
/// into a running delivery pipeline:
/// - [`MessengerService`] for sending and receiving messages
/// - [`ContactsService`] for the contact list and its sync jobs
/// - [`RelayClientManager`] for the relay connection
///
/// # Example
///
/// ```ignore
/// use courier_core::api::CourierBuilder;
///
/// let courier = CourierBuilder::new()
///     .self_id(me)
///     .storage(storage)
///     .cipher(cipher)
///     .relay_factory(factory)
///     .contact_client(contact_client)
///     .address_book_client(address_book)
///     .platform_contacts(platform)
///     .build()?;
///
/// courier.init().await?;
/// courier.connect(credentials)?;
/// courier.messenger().send_message_to(friend, "hi").await?;
/// ```
pub struct Courier {
    config: CourierConfig,
    storage: Arc<Storage>,
    relay: RelayClientManager,
    messenger: MessengerService,
    contacts: ContactsService,
    network_task: JoinHandle<()>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl Courier {
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn relay(&self) -> &RelayClientManager {
        &self.relay
    }

    pub fn messenger(&self) -> &MessengerService {
        &self.messenger
    }

    pub fn contacts(&self) -> &ContactsService {
        &self.contacts
    }

    /// Recovers received packages queued by a previous run.
    pub async fn init(&self) -> CourierResult<()> {
        self.messenger.init().await?;
        Ok(())
    }

    /// Connects to the relay and keeps reconnecting after unrequested
    /// disconnects until [`Courier::disconnect`] is called.
    pub fn connect(&self, credentials: UserCredentials) -> CourierResult<()> {
        self.relay.connect(credentials.clone())?;

        let supervisor = tokio::spawn(supervise_connection(
            self.relay.clone(),
            credentials,
            ReconnectionTimer::new(
                self.config.relay.reconnect_base_delay(),
                self.config.relay.reconnect_max_delay(),
            ),
            self.config.relay.ping_interval(),
        ));
        if let Some(previous) = self.reconnect_task.lock().replace(supervisor) {
            previous.abort();
        }
        Ok(())
    }

    pub fn disconnect(&self) {
        if let Some(supervisor) = self.reconnect_task.lock().take() {
            supervisor.abort();
        }
        self.relay.disconnect();
    }

    pub fn is_online(&self) -> bool {
        self.relay.is_online()
    }

    pub fn shutdown(&self) {
        self.disconnect();
        self.network_task.abort();
        self.messenger.shutdown();
        self.contacts.shutdown();
    }
}

/// Reconnects with backoff when the relay drops the connection and pings
/// the relay periodically while online.
async fn supervise_connection(
    relay: RelayClientManager,
    credentials: UserCredentials,
    mut timer: ReconnectionTimer,
    ping_interval: Option<Duration>,
) {
    let mut events = relay.events();
    let mut keepalive = ping_interval.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let received = tokio::select! {
            received = events.recv() => received,
            () = next_ping(&mut keepalive) => {
                if relay.is_online() {
                    debug!("Pinging relay");
                    relay.send_ping();
                }
                continue;
            }
        };
        let event = match received {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            RelayClientEvent::AuthenticationSuccessful => timer.reset(),
            RelayClientEvent::AuthenticationFailure => {
                warn!("Relay rejected credentials, not reconnecting");
                break;
            }
            RelayClientEvent::ConnectionLost {
                was_requested: true,
            } => break,
            RelayClientEvent::ConnectionLost {
                was_requested: false,
            }
            | RelayClientEvent::ConnectionFailure(_) => {
                timer.wait().await;
                info!(attempt = timer.attempt(), "Reconnecting to relay");
                match relay.connect(credentials.clone()) {
                    Ok(()) | Err(RelayError::AlreadyConnected) => {}
                    Err(e) => warn!(error = %e, "Reconnect failed"),
                }
            }
            _ => {}
        }
    }
    debug!("Connection supervisor stopped");
}

async fn next_ping(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Mirrors relay online status as network availability.
async fn follow_relay_status(
    mut status: watch::Receiver<RelayStatus>,
    network: watch::Sender<bool>,
) {
    loop {
        let online = status.borrow_and_update().online;
        network.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if status.changed().await.is_err() {
            break;
        }
    }
}

/// Builder for creating Courier instances.
pub struct CourierBuilder {
    config: CourierConfig,
    storage_key: Option<SymmetricKey>,
    storage: Option<Arc<Storage>>,
    self_id: Option<UserId>,
    cipher: Option<Arc<dyn CipherService>>,
    relay_factory: Option<Arc<dyn RelayClientFactory>>,
    contact_client: Option<Arc<dyn ContactClient>>,
    address_book: Option<Arc<dyn AddressBookClient>>,
    platform_contacts: Option<Arc<dyn PlatformContacts>>,
    network_available: Option<watch::Receiver<bool>>,
}

impl CourierBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        CourierBuilder {
            config: CourierConfig::default(),
            storage_key: None,
            storage: None,
            self_id: None,
            cipher: None,
            relay_factory: None,
            contact_client: None,
            address_book: None,
            platform_contacts: None,
            network_available: None,
        }
    }

    pub fn config(mut self, config: CourierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config.storage_path = path.into();
        self
    }

    /// Key for the at-rest encryption of the database opened at the
    /// configured path. Required unless [`CourierBuilder::storage`] is used;
    /// reopening the database needs the same key.
    pub fn storage_key(mut self, key: SymmetricKey) -> Self {
        self.storage_key = Some(key);
        self
    }

    /// Uses an already opened storage instead of the configured path.
    pub fn storage(mut self, storage: Arc<Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Our own account; messages to it are looped back locally.
    pub fn self_id(mut self, user_id: UserId) -> Self {
        self.self_id = Some(user_id);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn CipherService>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn relay_factory(mut self, factory: Arc<dyn RelayClientFactory>) -> Self {
        self.relay_factory = Some(factory);
        self
    }

    pub fn contact_client(mut self, client: Arc<dyn ContactClient>) -> Self {
        self.contact_client = Some(client);
        self
    }

    pub fn address_book_client(mut self, client: Arc<dyn AddressBookClient>) -> Self {
        self.address_book = Some(client);
        self
    }

    pub fn platform_contacts(mut self, contacts: Arc<dyn PlatformContacts>) -> Self {
        self.platform_contacts = Some(contacts);
        self
    }

    /// Network availability for contact sync jobs. Defaults to the relay
    /// online status.
    pub fn network_available(mut self, network: watch::Receiver<bool>) -> Self {
        self.network_available = Some(network);
        self
    }

    /// Builds the Courier instance. Must be called within a Tokio runtime.
    pub fn build(self) -> CourierResult<Courier> {
        self.config.validate()?;

        let self_id = self.self_id.ok_or(CourierError::MissingComponent("self id"))?;
        let cipher = self.cipher.ok_or(CourierError::MissingComponent("cipher service"))?;
        let contact_client = self
            .contact_client
            .ok_or(CourierError::MissingComponent("contact client"))?;
        let address_book = self
            .address_book
            .ok_or(CourierError::MissingComponent("address book client"))?;
        let platform_contacts = self
            .platform_contacts
            .ok_or(CourierError::MissingComponent("platform contacts"))?;
        let relay_factory = match self.relay_factory {
            Some(factory) => factory,
            None => default_relay_factory(&self.config)?,
        };

        let storage = match self.storage {
            Some(storage) => storage,
            None => {
                let key = self
                    .storage_key
                    .ok_or(CourierError::MissingComponent("storage key"))?;
                if let Some(parent) = self.config.storage_path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| CourierError::Configuration(e.to_string()))?;
                }
                Arc::new(Storage::open(&self.config.storage_path, key)?)
            }
        };

        let capacity = self.config.messaging.event_channel_capacity;
        let relay = RelayClientManager::new(relay_factory, capacity);

        let (network_tx, network_rx) = watch::channel(false);
        let network_task = tokio::spawn(follow_relay_status(relay.status(), network_tx));
        let network_available = self.network_available.unwrap_or(network_rx);

        let sync_job = Arc::new(ContactSyncJobImpl::new(
            contact_client.clone(),
            address_book,
            storage.clone(),
            platform_contacts,
        ));
        let runner = ContactJobRunner::spawn(sync_job, network_available, capacity);
        let contacts = ContactsService::new(runner, storage.clone(), contact_client, capacity);

        let messenger = MessengerService::start(
            MessengerDeps {
                self_id,
                relay: relay.clone(),
                cipher,
                message_store: storage.clone(),
                send_queue: storage.clone(),
                package_queue: storage.clone(),
                contacts: Arc::new(contacts.clone()),
            },
            self.config.messaging.messenger_options(),
        );

        Ok(Courier {
            config: self.config,
            storage,
            relay,
            messenger,
            contacts,
            network_task,
            reconnect_task: Mutex::new(None),
        })
    }
}

impl Default for CourierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "network")]
fn default_relay_factory(config: &CourierConfig) -> CourierResult<Arc<dyn RelayClientFactory>> {
    Ok(Arc::new(crate::relay::WebSocketRelayClientFactory::new(
        config.relay.server_url.clone(),
        config.relay.connect_timeout(),
    )))
}

#[cfg(not(feature = "network"))]
fn default_relay_factory(_config: &CourierConfig) -> CourierResult<Arc<dyn RelayClientFactory>> {
    Err(CourierError::MissingComponent("relay client factory"))
}
