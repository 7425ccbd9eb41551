// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device Sessions and Pre-Key Bundles
//!
//! Every device holds a static X25519 identity and publishes a bundle with
//! its registration id and public key. Session keys are derived from the
//! Diffie-Hellman secret between two identities, so both ends arrive at the
//! same key without it ever leaving the device. The first payload on a fresh
//! session is flagged as a pre-key message so the recipient can accept a
//! sender it has never seen.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use ring::hkdf::{Salt, HKDF_SHA256};
use x25519_dalek::{PublicKey, StaticSecret};

use super::cipher::CipherError;
use super::encryption::SymmetricKey;
use crate::types::{DeviceAddress, UserId};

const SESSION_KEY_INFO: &[u8] = b"Courier_Session_Key_v1";

/// Published key material for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub address: DeviceAddress,
    pub registration_id: u32,
    /// X25519 public identity key.
    pub identity_key: [u8; 32],
}

/// This device's private identity. Only [`DeviceIdentity::bundle`] is published.
pub struct DeviceIdentity {
    address: DeviceAddress,
    registration_id: u32,
    secret: StaticSecret,
    public: PublicKey,
}

impl DeviceIdentity {
    /// Generates a new random identity.
    pub fn generate(address: DeviceAddress, registration_id: u32) -> Self {
        Self::from_secret(address, registration_id, StaticSecret::random_from_rng(OsRng))
    }

    /// Restores an identity from its 32 secret bytes.
    pub fn from_bytes(address: DeviceAddress, registration_id: u32, secret: [u8; 32]) -> Self {
        Self::from_secret(address, registration_id, StaticSecret::from(secret))
    }

    fn from_secret(address: DeviceAddress, registration_id: u32, secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        DeviceIdentity {
            address,
            registration_id,
            secret,
            public,
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// The public half, for the key directory.
    pub fn bundle(&self) -> PreKeyBundle {
        PreKeyBundle {
            address: self.address,
            registration_id: self.registration_id,
            identity_key: *self.public.as_bytes(),
        }
    }

    /// Derives the session key shared with the owner of `peer`.
    ///
    /// Both ends compute the same key: the salt orders the two public keys
    /// so the derivation is symmetric.
    pub fn session_key(&self, peer: &PreKeyBundle) -> Result<SymmetricKey, CipherError> {
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(peer.identity_key));
        if !shared.was_contributory() {
            return Err(CipherError::Crypto(format!(
                "non-contributory identity key for {}",
                peer.address
            )));
        }

        let ours = self.public.as_bytes();
        let theirs = &peer.identity_key;
        let (low, high) = if ours <= theirs {
            (ours, theirs)
        } else {
            (theirs, ours)
        };
        let mut salt_bytes = [0u8; 64];
        salt_bytes[..32].copy_from_slice(low);
        salt_bytes[32..].copy_from_slice(high);

        let prk = Salt::new(HKDF_SHA256, &salt_bytes).extract(shared.as_bytes());
        let okm = prk
            .expand(&[SESSION_KEY_INFO], HKDF_SHA256)
            .map_err(|_| CipherError::Crypto("HKDF expand failed".into()))?;
        let mut key_bytes = [0u8; 32];
        okm.fill(&mut key_bytes)
            .map_err(|_| CipherError::Crypto("HKDF fill failed".into()))?;
        Ok(SymmetricKey::from_bytes(key_bytes))
    }
}

/// Established session with a remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub registration_id: u32,
    pub key: SymmetricKey,
    /// No payload has been sent on this session yet.
    pub fresh: bool,
}

impl Session {
    /// Opens a fresh session with the owner of `bundle`.
    pub fn establish(local: &DeviceIdentity, bundle: &PreKeyBundle) -> Result<Self, CipherError> {
        Ok(Session {
            registration_id: bundle.registration_id,
            key: local.session_key(bundle)?,
            fresh: true,
        })
    }
}

/// Local session state.
pub trait SessionStore: Send + Sync {
    fn session(&self, address: DeviceAddress) -> Option<Session>;

    fn save_session(&self, address: DeviceAddress, session: Session);

    fn delete_session(&self, address: DeviceAddress);

    /// Drops every outbound session with a user.
    fn delete_user_sessions(&self, user_id: UserId);

    /// Device ids with an established outbound session, ascending.
    fn device_ids(&self, user_id: UserId) -> Vec<u32>;

    /// Whether a remote device has already opened a session with us.
    fn is_known_sender(&self, address: DeviceAddress) -> bool;

    fn add_known_sender(&self, address: DeviceAddress);
}

/// Server-side bundle directory.
#[async_trait]
pub trait PreKeyDirectory: Send + Sync {
    /// Bundles for every device of a user. Empty when the user published none.
    async fn fetch_bundles(&self, user_id: UserId) -> Result<Vec<PreKeyBundle>, CipherError>;

    async fn fetch_bundle(
        &self,
        address: DeviceAddress,
    ) -> Result<Option<PreKeyBundle>, CipherError>;
}

/// In-memory [`SessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<UserId, BTreeMap<u32, Session>>>,
    senders: RwLock<HashSet<DeviceAddress>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn session(&self, address: DeviceAddress) -> Option<Session> {
        self.sessions
            .read()
            .get(&address.user_id)
            .and_then(|devices| devices.get(&address.device_id))
            .cloned()
    }

    fn save_session(&self, address: DeviceAddress, session: Session) {
        self.sessions
            .write()
            .entry(address.user_id)
            .or_default()
            .insert(address.device_id, session);
    }

    fn delete_session(&self, address: DeviceAddress) {
        let mut sessions = self.sessions.write();
        if let Some(devices) = sessions.get_mut(&address.user_id) {
            devices.remove(&address.device_id);
            if devices.is_empty() {
                sessions.remove(&address.user_id);
            }
        }
    }

    fn delete_user_sessions(&self, user_id: UserId) {
        self.sessions.write().remove(&user_id);
    }

    fn device_ids(&self, user_id: UserId) -> Vec<u32> {
        self.sessions
            .read()
            .get(&user_id)
            .map(|devices| devices.keys().copied().collect())
            .unwrap_or_default()
    }

    fn is_known_sender(&self, address: DeviceAddress) -> bool {
        self.senders.read().contains(&address)
    }

    fn add_known_sender(&self, address: DeviceAddress) {
        self.senders.write().insert(address);
    }
}

/// In-memory [`PreKeyDirectory`], shared between clients in tests and demos.
#[derive(Default)]
pub struct MemoryPreKeyDirectory {
    bundles: RwLock<HashMap<UserId, BTreeMap<u32, PreKeyBundle>>>,
}

impl MemoryPreKeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, bundle: PreKeyBundle) {
        self.bundles
            .write()
            .entry(bundle.address.user_id)
            .or_default()
            .insert(bundle.address.device_id, bundle);
    }

    pub fn unpublish(&self, address: DeviceAddress) {
        if let Some(devices) = self.bundles.write().get_mut(&address.user_id) {
            devices.remove(&address.device_id);
        }
    }
}

#[async_trait]
impl PreKeyDirectory for MemoryPreKeyDirectory {
    async fn fetch_bundles(&self, user_id: UserId) -> Result<Vec<PreKeyBundle>, CipherError> {
        Ok(self
            .bundles
            .read()
            .get(&user_id)
            .map(|devices| devices.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_bundle(
        &self,
        address: DeviceAddress,
    ) -> Result<Option<PreKeyBundle>, CipherError> {
        Ok(self
            .bundles
            .read()
            .get(&address.user_id)
            .and_then(|devices| devices.get(&address.device_id))
            .cloned())
    }
}
