// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Subscription map: a trie keyed on topic filter levels.
//!
//! Wildcard levels are ordinary child slots keyed `"+"` and `"#"`; matching
//! a published topic walks the literal child, the `+` child and the `#`
//! child of every node on the path. Each terminal node carries the set of
//! subscriptions per client id.

use std::collections::HashMap;

use codec::v5::SubscribeOptions;
use codec::{TopicFilter, TopicName};

use crate::types::ClientId;

/// One subscription of one client to one topic filter.
#[derive(Clone, Debug)]
pub struct Subscription {
    /// Owning session; the broker guarantees the session outlives the
    /// subscription.
    client_id: ClientId,

    options: SubscribeOptions,

    /// Subscription identifier to attach to every matching delivery.
    sid: Option<u32>,
}

impl Subscription {
    #[must_use]
    pub fn new(client_id: &str, options: SubscribeOptions, sid: Option<u32>) -> Self {
        Self {
            client_id: client_id.to_string(),
            options,
            sid,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub const fn options(&self) -> SubscribeOptions {
        self.options
    }

    #[must_use]
    pub const fn sid(&self) -> Option<u32> {
        self.sid
    }
}

/// Stable token for O(1) removal of a subscription.
///
/// The generation counter guards against a node id being freed and reused;
/// a stale handle then resolves to nothing instead of a different filter.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriptionHandle {
    node_id: usize,
    generation: u64,
}

#[derive(Debug, Default)]
struct Node {
    generation: u64,

    parent: Option<usize>,

    /// Level string this node is keyed by under its parent.
    level: String,

    children: HashMap<String, usize>,

    /// Full filter of this node; set while any subscription is attached.
    filter: Option<TopicFilter>,

    subscriptions: HashMap<ClientId, Subscription>,
}

impl Node {
    fn is_removable(&self) -> bool {
        self.subscriptions.is_empty() && self.children.is_empty()
    }
}

/// Trie of every subscription in the broker.
#[derive(Debug)]
pub struct SubscriptionMap {
    /// Slab of nodes; index 0 is the root and is never freed.
    nodes: Vec<Node>,

    free: Vec<usize>,

    generation: u64,

    count: usize,
}

impl Default for SubscriptionMap {
    fn default() -> Self {
        Self {
            nodes: vec![Node::default()],
            free: Vec::new(),
            generation: 0,
            count: 0,
        }
    }
}

impl SubscriptionMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions in the map.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Insert a subscription, or update in place when this client already
    /// subscribes to this filter. Returns the handle and whether a new
    /// entry was inserted.
    pub fn insert_or_assign(
        &mut self,
        filter: &TopicFilter,
        client_id: &str,
        subscription: Subscription,
    ) -> (SubscriptionHandle, bool) {
        let mut node_id = 0;
        for level in filter.levels() {
            node_id = match self.nodes[node_id].children.get(level) {
                Some(&child) => child,
                None => {
                    let child = self.alloc_node(node_id, level);
                    self.nodes[node_id].children.insert(level.to_string(), child);
                    child
                }
            };
        }

        let node = &mut self.nodes[node_id];
        if node.filter.is_none() {
            node.filter = Some(filter.clone());
        }
        let inserted = node
            .subscriptions
            .insert(client_id.to_string(), subscription)
            .is_none();
        if inserted {
            self.count += 1;
        }
        (
            SubscriptionHandle {
                node_id,
                generation: self.nodes[node_id].generation,
            },
            inserted,
        )
    }

    /// Find the handle for an exact filter, if any subscription is attached
    /// to it.
    #[must_use]
    pub fn lookup(&self, filter: &TopicFilter) -> Option<SubscriptionHandle> {
        let mut node_id = 0;
        for level in filter.levels() {
            node_id = *self.nodes[node_id].children.get(level)?;
        }
        let node = &self.nodes[node_id];
        if node.subscriptions.is_empty() {
            return None;
        }
        Some(SubscriptionHandle {
            node_id,
            generation: node.generation,
        })
    }

    /// Remove the subscription of `client_id` at `handle`. Stale handles
    /// are ignored.
    pub fn erase(&mut self, handle: SubscriptionHandle, client_id: &str) -> bool {
        if handle.node_id >= self.nodes.len() {
            return false;
        }
        if self.nodes[handle.node_id].generation != handle.generation {
            return false;
        }
        let node = &mut self.nodes[handle.node_id];
        if node.subscriptions.remove(client_id).is_none() {
            return false;
        }
        self.count -= 1;
        if node.subscriptions.is_empty() {
            node.filter = None;
        }
        self.prune(handle.node_id);
        true
    }

    /// Visit every subscription whose filter matches `topic`.
    ///
    /// Visitation order between distinct filters is unspecified but stable
    /// within a call. Filters starting with a wildcard never match topics
    /// in the reserved `$` namespace.
    pub fn for_each_match<F>(&self, topic: &TopicName, mut visit: F)
    where
        F: FnMut(&TopicFilter, &Subscription),
    {
        let levels: Vec<&str> = topic.levels().collect();
        self.match_node(0, &levels, 0, topic.is_sys(), &mut visit);
    }

    /// Drop every subscription. For tests and administration.
    pub fn clear(&mut self) {
        self.nodes = vec![Node::default()];
        self.free.clear();
        self.count = 0;
    }

    fn alloc_node(&mut self, parent: usize, level: &str) -> usize {
        self.generation += 1;
        let node = Node {
            generation: self.generation,
            parent: Some(parent),
            level: level.to_string(),
            children: HashMap::new(),
            filter: None,
            subscriptions: HashMap::new(),
        };
        match self.free.pop() {
            Some(node_id) => {
                self.nodes[node_id] = node;
                node_id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Free `node_id` and its now-empty ancestors.
    fn prune(&mut self, mut node_id: usize) {
        while node_id != 0 && self.nodes[node_id].is_removable() {
            let parent = match self.nodes[node_id].parent {
                Some(parent) => parent,
                None => break,
            };
            let level = self.nodes[node_id].level.clone();
            self.nodes[parent].children.remove(&level);
            // Invalidate outstanding handles to this node.
            self.generation += 1;
            self.nodes[node_id].generation = self.generation;
            self.free.push(node_id);
            node_id = parent;
        }
    }

    fn match_node<F>(
        &self,
        node_id: usize,
        levels: &[&str],
        depth: usize,
        sys_topic: bool,
        visit: &mut F,
    ) where
        F: FnMut(&TopicFilter, &Subscription),
    {
        let node = &self.nodes[node_id];
        if depth == levels.len() {
            self.visit_subscriptions(node_id, visit);
            // A trailing `#` also matches its parent level, so `a/#`
            // matches the topic `a`.
            if let Some(&child) = node.children.get("#") {
                self.visit_subscriptions(child, visit);
            }
            return;
        }

        if let Some(&child) = node.children.get(levels[depth]) {
            self.match_node(child, levels, depth + 1, sys_topic, visit);
        }

        // Wildcard filters starting at the root are excluded from the `$`
        // namespace.
        if depth == 0 && sys_topic {
            return;
        }
        if let Some(&child) = node.children.get("+") {
            self.match_node(child, levels, depth + 1, sys_topic, visit);
        }
        if let Some(&child) = node.children.get("#") {
            self.visit_subscriptions(child, visit);
        }
    }

    fn visit_subscriptions<F>(&self, node_id: usize, visit: &mut F)
    where
        F: FnMut(&TopicFilter, &Subscription),
    {
        let node = &self.nodes[node_id];
        if let Some(filter) = &node.filter {
            for subscription in node.subscriptions.values() {
                visit(filter, subscription);
            }
        }
    }
}
