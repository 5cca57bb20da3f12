//! Server configuration.

use hisaab_sync_protocol::EntityKind;
use std::collections::BTreeMap;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest page a pull may return.
    pub max_pull_page: u32,
    /// Largest batch a push may carry.
    pub max_push_batch: u32,
    /// Prefix of assigned slugs, per kind.
    pub slug_prefixes: BTreeMap<EntityKind, String>,
    /// Reject records whose reference fields name unknown slugs.
    pub require_known_references: bool,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new() -> Self {
        let slug_prefixes = EntityKind::ALL
            .iter()
            .map(|&kind| (kind, default_prefix(kind).to_string()))
            .collect();
        Self {
            max_pull_page: 100,
            max_push_batch: 100,
            slug_prefixes,
            require_known_references: true,
        }
    }

    /// Sets the maximum pull page size.
    pub fn with_max_pull_page(mut self, size: u32) -> Self {
        self.max_pull_page = size.max(1);
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size.max(1);
        self
    }

    /// Sets the slug prefix for one kind.
    pub fn with_slug_prefix(mut self, kind: EntityKind, prefix: impl Into<String>) -> Self {
        self.slug_prefixes.insert(kind, prefix.into());
        self
    }

    /// Turns reference checking on or off.
    pub fn with_require_known_references(mut self, require: bool) -> Self {
        self.require_known_references = require;
        self
    }

    /// Returns the slug prefix for a kind.
    pub fn slug_prefix(&self, kind: EntityKind) -> &str {
        self.slug_prefixes
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| default_prefix(kind))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_prefix(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Category => "CAT",
        EntityKind::PaymentMethod => "PM",
        EntityKind::QuantityUnit => "QU",
        EntityKind::Warehouse => "WH",
        EntityKind::Product => "PRD",
        EntityKind::RecipeIngredient => "RI",
        EntityKind::Party => "PER",
        EntityKind::EntityMedia => "MED",
        EntityKind::Transaction => "TRX",
        EntityKind::TransactionDetail => "TD",
        EntityKind::ProductQuantity => "PQ",
        EntityKind::DeletedRecord => "DEL",
    }
}
