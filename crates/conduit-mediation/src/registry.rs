//! Named sequences, load balancers and the environment handed to every mediator

use conduit_common::MediationContext;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::endpoint::MessageSender;
use crate::error::MediationError;
use crate::load_balance::LoadBalancer;
use crate::sequence::Sequence;

/// Sequences by name.
///
/// Lookups hand out an `Arc` snapshot: replacing a sequence affects later
/// lookups only, never an execution already running against the old one.
#[derive(Debug, Default)]
pub struct SequenceRegistry {
    sequences: DashMap<String, Arc<Sequence>>,
}

impl SequenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the sequence's own name, returning the one it replaced
    pub fn register(&self, sequence: Sequence) -> Option<Arc<Sequence>> {
        let name = sequence.name().to_string();
        let previous = self.sequences.insert(name.clone(), Arc::new(sequence));
        if previous.is_some() {
            info!(sequence = %name, "Sequence replaced");
        }
        previous
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<Sequence>> {
        self.sequences.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Sequence>> {
        self.sequences.remove(name).map(|(_, sequence)| sequence)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sequences.contains_key(name)
    }

    /// Sorted sequence names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sequences.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

/// Everything a mediator may consult besides the message itself
pub struct Environment {
    sequences: SequenceRegistry,
    load_balancers: DashMap<String, Arc<LoadBalancer>>,
    sender: Arc<dyn MessageSender>,
}

impl Environment {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self {
            sequences: SequenceRegistry::new(),
            load_balancers: DashMap::new(),
            sender,
        }
    }

    pub fn sequences(&self) -> &SequenceRegistry {
        &self.sequences
    }

    pub fn resolve_sequence(&self, name: &str) -> Result<Arc<Sequence>, MediationError> {
        self.sequences
            .resolve(name)
            .ok_or_else(|| MediationError::SequenceNotFound(name.to_string()))
    }

    pub fn register_load_balancer(&self, load_balancer: LoadBalancer) -> Option<Arc<LoadBalancer>> {
        self.load_balancers
            .insert(load_balancer.name().to_string(), Arc::new(load_balancer))
    }

    pub fn load_balancer(&self, name: &str) -> Option<Arc<LoadBalancer>> {
        self.load_balancers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn load_balancer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.load_balancers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn sender(&self) -> &Arc<dyn MessageSender> {
        &self.sender
    }

    /// Send through the named load balancer
    pub async fn send_via(&self, load_balancer: &str, ctx: &mut MediationContext) -> Result<(), MediationError> {
        let lb = self
            .load_balancer(load_balancer)
            .ok_or_else(|| MediationError::LoadBalancerNotFound(load_balancer.to_string()))?;
        lb.send(ctx, self.sender.as_ref()).await
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("sequences", &self.sequences.names())
            .field("load_balancers", &self.load_balancer_names())
            .finish()
    }
}
