//! Static description of the syncable entity types.
//!
//! Dependency ranks encode foreign-key direction: a referenced kind always
//! has a lower rank than the kinds pointing at it, so its records (and
//! their freshly assigned slugs) are finalized first.

use hisaab_sync_protocol::{EntityKind, FieldRef, RefTarget};

/// Static sync metadata for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityTypeDescriptor {
    /// Entity type.
    pub kind: EntityKind,
    /// Lower ranks sync first.
    pub rank: u32,
    /// Push path, `None` for kinds the server computes.
    pub push_endpoint: Option<&'static str>,
    /// Pull path.
    pub pull_endpoint: &'static str,
    /// Reference fields.
    pub references: &'static [FieldRef],
}

impl EntityTypeDescriptor {
    const fn new(kind: EntityKind, rank: u32) -> Self {
        Self {
            kind,
            rank,
            push_endpoint: kind.push_endpoint(),
            pull_endpoint: kind.pull_endpoint(),
            references: kind.references(),
        }
    }

    /// Returns true if local changes of this kind are pushed.
    pub fn is_pushable(&self) -> bool {
        self.push_endpoint.is_some()
    }
}

static CATALOG: [EntityTypeDescriptor; 12] = [
    EntityTypeDescriptor::new(EntityKind::Category, 10),
    EntityTypeDescriptor::new(EntityKind::PaymentMethod, 10),
    EntityTypeDescriptor::new(EntityKind::QuantityUnit, 10),
    EntityTypeDescriptor::new(EntityKind::Warehouse, 10),
    EntityTypeDescriptor::new(EntityKind::Product, 20),
    EntityTypeDescriptor::new(EntityKind::RecipeIngredient, 25),
    EntityTypeDescriptor::new(EntityKind::Party, 30),
    EntityTypeDescriptor::new(EntityKind::EntityMedia, 35),
    EntityTypeDescriptor::new(EntityKind::Transaction, 40),
    EntityTypeDescriptor::new(EntityKind::TransactionDetail, 50),
    EntityTypeDescriptor::new(EntityKind::ProductQuantity, 60),
    EntityTypeDescriptor::new(EntityKind::DeletedRecord, 70),
];

/// Returns the descriptors sorted ascending by rank.
///
/// Ties keep declaration order.
pub fn ordered_entity_types() -> Vec<EntityTypeDescriptor> {
    let mut types = CATALOG.to_vec();
    // `sort_by_key` is stable.
    types.sort_by_key(|d| d.rank);
    types
}

/// Returns the descriptor for `kind`.
pub fn descriptor(kind: EntityKind) -> &'static EntityTypeDescriptor {
    // Every EntityKind has exactly one entry; the fallback is unreachable.
    CATALOG
        .iter()
        .find(|d| d.kind == kind)
        .unwrap_or(&CATALOG[0])
}

/// Returns every `(referencing kind, field)` pair whose field may point at
/// `target`, self-references included.
pub fn referrers_of(target: EntityKind) -> Vec<(EntityKind, FieldRef)> {
    let mut out = Vec::new();
    for desc in ordered_entity_types() {
        for field in desc.references {
            let may_point = match field.target {
                RefTarget::Kind(k) => k == target,
                RefTarget::ByTypeField { .. } => true,
            };
            if may_point {
                out.push((desc.kind, *field));
            }
        }
    }
    out
}
