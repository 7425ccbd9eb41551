// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod cipher;
pub mod encryption;
pub mod mock;
pub mod session;
pub mod worker;

pub use cipher::{
    CipherChannels, CipherError, CipherService, DecryptedMessage, DecryptionFailure,
    DecryptionResult, DeviceUpdateResult, EncryptedMessageInfo, EncryptionOutcome,
    EncryptionResult,
};
pub use encryption::{decrypt, encrypt, EncryptionError, SymmetricKey};
pub use mock::{CipherCall, MockCipherService};
pub use session::{
    DeviceIdentity, MemoryPreKeyDirectory, MemorySessionStore, PreKeyBundle, PreKeyDirectory,
    Session, SessionStore,
};
pub use worker::SessionCipherService;
