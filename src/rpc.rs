//! The RPC skeleton (§4.6): bridges a `Transport` to a context's listener
//! callbacks, encoding outbound calls and decoding inbound frames into the
//! six messages of §4.5.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ContextConfig;
use crate::model::TweakId;
use crate::transport::{ConnState, Transport, TransportError};
use crate::variant::Variant;
use crate::wire::{self, Features, Message};

pub trait ServerListener: Send + Sync {
    fn on_subscribe(&self);
    fn on_change_item(&self, id: TweakId, value: Variant);
    fn on_announce_features(&self, features: Features);
    fn on_connection_state(&self, connected: bool);
}

pub trait ClientListener: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn on_add_item(
        &self,
        id: TweakId,
        uri: String,
        description: String,
        meta: String,
        default_value: Variant,
        current_value: Variant,
    );
    fn on_change_item(&self, id: TweakId, value: Variant);
    fn on_remove_item(&self, id: TweakId);
    fn on_connection_state(&self, connected: bool);
}

/// Owns the transport handle; on drop it tears the transport down, which
/// (via `Transport`'s own level-triggered guarantee) synthesises exactly
/// one final `on_connection_state(false)` if the transport was ever
/// connected — satisfying §4.6's "on destruction, synthesise one final
/// connection_state(false) then tear down the transport" in a single step
/// rather than two that could double-fire.
pub struct ServerSkeleton {
    transport: Mutex<Option<Transport>>,
}

impl ServerSkeleton {
    pub fn create(config: &ContextConfig, listener: Arc<dyn ServerListener>) -> Result<ServerSkeleton, TransportError> {
        let conn_listener = listener.clone();
        let conn_state_cb = Arc::new(move |state: ConnState| {
            conn_listener.on_connection_state(state == ConnState::Connected);
        });
        let recv_listener = listener;
        let recv_cb = Arc::new(move |bytes: Vec<u8>| {
            dispatch_server_frame(&bytes, recv_listener.as_ref());
        });
        let transport = Transport::create(config, conn_state_cb, recv_cb)?;
        Ok(ServerSkeleton { transport: Mutex::new(Some(transport)) })
    }

    fn send(&self, message: &Message) {
        let guard = self.transport.lock();
        if let Some(transport) = guard.as_ref() {
            if let Err(TransportError::Timeout) = transport.transmit(&wire::encode(message)) {
                tracing::warn!("transport transmit timed out; update superseded by next change");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn transmit_add_item(
        &self,
        id: TweakId,
        uri: String,
        description: String,
        meta: String,
        default_value: Variant,
        current_value: Variant,
    ) {
        self.send(&Message::AddItem { id, uri, description, meta, default_value, current_value });
    }

    pub fn transmit_change_item(&self, id: TweakId, value: Variant) {
        self.send(&Message::ChangeItem { id, value });
    }

    pub fn transmit_remove_item(&self, id: TweakId) {
        self.send(&Message::RemoveItem { id });
    }

    pub fn transmit_announce_features(&self, features: Features) {
        self.send(&Message::AnnounceFeatures { features_json: features.to_json() });
    }
}

fn dispatch_server_frame(bytes: &[u8], listener: &dyn ServerListener) {
    match wire::decode(bytes) {
        Ok(Message::Subscribe { .. }) => listener.on_subscribe(),
        Ok(Message::ChangeItem { id, value }) => listener.on_change_item(id, value),
        Ok(Message::AnnounceFeatures { features_json }) => {
            listener.on_announce_features(Features::from_json(&features_json));
        }
        Ok(other) => tracing::warn!(?other, "server skeleton: unexpected message direction, dropping"),
        Err(e) => tracing::warn!(%e, "server skeleton: dropping unparseable frame"),
    }
}

pub struct ClientSkeleton {
    transport: Mutex<Option<Transport>>,
}

impl ClientSkeleton {
    pub fn create(config: &ContextConfig, listener: Arc<dyn ClientListener>) -> Result<ClientSkeleton, TransportError> {
        let conn_listener = listener.clone();
        let conn_state_cb = Arc::new(move |state: ConnState| {
            conn_listener.on_connection_state(state == ConnState::Connected);
        });
        let recv_listener = listener;
        let recv_cb = Arc::new(move |bytes: Vec<u8>| {
            dispatch_client_frame(&bytes, recv_listener.as_ref());
        });
        let transport = Transport::create(config, conn_state_cb, recv_cb)?;
        Ok(ClientSkeleton { transport: Mutex::new(Some(transport)) })
    }

    fn send(&self, message: &Message) {
        let guard = self.transport.lock();
        if let Some(transport) = guard.as_ref() {
            if let Err(TransportError::Timeout) = transport.transmit(&wire::encode(message)) {
                tracing::warn!("transport transmit timed out; update superseded by next change");
            }
        }
    }

    pub fn transmit_subscribe(&self, uri_patterns: String) {
        self.send(&Message::Subscribe { uri_patterns });
    }

    pub fn transmit_announce_features(&self, features: Features) {
        self.send(&Message::AnnounceFeatures { features_json: features.to_json() });
    }

    pub fn transmit_change_item(&self, id: TweakId, value: Variant) {
        self.send(&Message::ChangeItem { id, value });
    }
}

fn dispatch_client_frame(bytes: &[u8], listener: &dyn ClientListener) {
    match wire::decode(bytes) {
        Ok(Message::AddItem { id, uri, description, meta, default_value, current_value }) => {
            listener.on_add_item(id, uri, description, meta, default_value, current_value);
        }
        Ok(Message::ChangeItem { id, value }) => listener.on_change_item(id, value),
        Ok(Message::RemoveItem { id }) => listener.on_remove_item(id),
        Ok(other) => tracing::warn!(?other, "client skeleton: unexpected message direction, dropping"),
        Err(e) => tracing::warn!(%e, "client skeleton: dropping unparseable frame"),
    }
}
