// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::HashMap;

use crate::session::SessionState;
use crate::trie::SubscriptionMap;
use crate::types::{ClientId, EndpointId};

/// All sessions known to the broker.
///
/// The map from client id to session is authoritative; the endpoint index
/// only tracks the currently online sessions and is kept in step inside
/// every handler that changes a session's connection. The expiry index is
/// the broker's timer queue.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<ClientId, SessionState>,

    by_endpoint: HashMap<EndpointId, ClientId>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn find_by_client_id(&self, client_id: &str) -> Option<&SessionState> {
        self.sessions.get(client_id)
    }

    pub fn find_by_client_id_mut(&mut self, client_id: &str) -> Option<&mut SessionState> {
        self.sessions.get_mut(client_id)
    }

    #[must_use]
    pub fn client_id_by_endpoint(&self, endpoint_id: EndpointId) -> Option<&ClientId> {
        self.by_endpoint.get(&endpoint_id)
    }

    #[must_use]
    pub fn find_by_endpoint(&self, endpoint_id: EndpointId) -> Option<&SessionState> {
        self.by_endpoint
            .get(&endpoint_id)
            .and_then(|client_id| self.sessions.get(client_id))
    }

    pub fn find_by_endpoint_mut(&mut self, endpoint_id: EndpointId) -> Option<&mut SessionState> {
        let client_id = self.by_endpoint.get(&endpoint_id)?;
        self.sessions.get_mut(client_id)
    }

    /// Insert a fresh online session, replacing any prior one for the same
    /// client id.
    pub fn insert(&mut self, session: SessionState) {
        if let Some(endpoint_id) = session.endpoint_id() {
            self.by_endpoint
                .insert(endpoint_id, session.client_id().to_string());
        }
        self.sessions
            .insert(session.client_id().to_string(), session);
    }

    /// Remove a session entirely, dropping its endpoint index entry.
    pub fn erase(&mut self, client_id: &str) -> Option<SessionState> {
        let session = self.sessions.remove(client_id)?;
        if let Some(endpoint_id) = session.endpoint_id() {
            self.by_endpoint.remove(&endpoint_id);
        }
        Some(session)
    }

    /// Attach an endpoint to an existing session, on resumption.
    pub fn bind_endpoint(&mut self, client_id: &str, endpoint_id: EndpointId) {
        if let Some(session) = self.sessions.get_mut(client_id) {
            session.set_endpoint_id(Some(endpoint_id));
            self.by_endpoint.insert(endpoint_id, client_id.to_string());
        }
    }

    /// Detach the endpoint from a session that stays offline.
    pub fn unbind_endpoint(&mut self, client_id: &str) {
        if let Some(session) = self.sessions.get_mut(client_id) {
            if let Some(endpoint_id) = session.endpoint_id() {
                self.by_endpoint.remove(&endpoint_id);
            }
            session.set_endpoint_id(None);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session, unsubscribing all of them. For tests and
    /// administration.
    pub fn clear(&mut self, subs_map: &mut SubscriptionMap) {
        for session in self.sessions.values_mut() {
            session.unsubscribe_all(subs_map);
        }
        self.sessions.clear();
        self.by_endpoint.clear();
    }
}
