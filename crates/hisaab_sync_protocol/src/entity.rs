//! Syncable entity kinds.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::SyncRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A syncable entity type.
///
/// The wire name (`as_str`) is what appears in the `entity_type` field of
/// records that point at another kind, such as media attachments and
/// deletion tombstones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Product and party categories.
    Category,
    /// Cash, bank, wallet and similar.
    PaymentMethod,
    /// Units of measure, optionally derived from a parent unit.
    QuantityUnit,
    /// Stock locations.
    Warehouse,
    /// Sellable or purchasable items.
    Product,
    /// Component of a recipe product.
    RecipeIngredient,
    /// Customers, vendors and other ledger parties.
    Party,
    /// Image or file attached to another entity.
    EntityMedia,
    /// Sales, purchases, payments and other ledger entries.
    Transaction,
    /// Line item of a transaction.
    TransactionDetail,
    /// Per-warehouse stock level, computed by the server.
    ProductQuantity,
    /// Deletion tombstone for any other kind.
    DeletedRecord,
}

impl EntityKind {
    /// Every kind, in declaration order.
    pub const ALL: [EntityKind; 12] = [
        EntityKind::Category,
        EntityKind::PaymentMethod,
        EntityKind::QuantityUnit,
        EntityKind::Warehouse,
        EntityKind::Product,
        EntityKind::RecipeIngredient,
        EntityKind::Party,
        EntityKind::EntityMedia,
        EntityKind::Transaction,
        EntityKind::TransactionDetail,
        EntityKind::ProductQuantity,
        EntityKind::DeletedRecord,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Category => "category",
            EntityKind::PaymentMethod => "payment_method",
            EntityKind::QuantityUnit => "quantity_unit",
            EntityKind::Warehouse => "warehouse",
            EntityKind::Product => "product",
            EntityKind::RecipeIngredient => "recipe_ingredient",
            EntityKind::Party => "party",
            EntityKind::EntityMedia => "entity_media",
            EntityKind::Transaction => "transaction",
            EntityKind::TransactionDetail => "transaction_detail",
            EntityKind::ProductQuantity => "product_quantity",
            EntityKind::DeletedRecord => "deleted_record",
        }
    }

    /// Path the backend accepts pushes on, `None` for kinds the server
    /// computes itself.
    pub const fn push_endpoint(&self) -> Option<&'static str> {
        match self {
            EntityKind::Category => Some("sync-categories"),
            EntityKind::PaymentMethod => Some("payment-method"),
            EntityKind::QuantityUnit => Some("sync-quantity-unit"),
            EntityKind::Warehouse => Some("sync-warehouse"),
            EntityKind::Product => Some("products"),
            EntityKind::RecipeIngredient => Some("recipe-ingredients"),
            EntityKind::Party => Some("person"),
            EntityKind::EntityMedia => Some("sync-media"),
            EntityKind::Transaction => Some("transaction"),
            EntityKind::TransactionDetail => Some("sync-transaction-detail"),
            EntityKind::ProductQuantity => None,
            EntityKind::DeletedRecord => Some("delete-records"),
        }
    }

    /// Path the backend serves pulls on.
    pub const fn pull_endpoint(&self) -> &'static str {
        match self {
            EntityKind::Category => "sync-categories",
            EntityKind::PaymentMethod => "sync-payment-method",
            EntityKind::QuantityUnit => "sync-quantity-unit",
            EntityKind::Warehouse => "sync-warehouse",
            EntityKind::Product => "sync-product",
            EntityKind::RecipeIngredient => "sync-recipe-ingredients",
            EntityKind::Party => "sync-person",
            EntityKind::EntityMedia => "sync-media",
            EntityKind::Transaction => "sync-transaction",
            EntityKind::TransactionDetail => "sync-transaction-detail",
            EntityKind::ProductQuantity => "sync-product-quantities",
            EntityKind::DeletedRecord => "delete-records",
        }
    }

    /// Payload fields that hold another record's slug.
    pub const fn references(&self) -> &'static [FieldRef] {
        match self {
            EntityKind::QuantityUnit => QUANTITY_UNIT_REFS,
            EntityKind::Product => PRODUCT_REFS,
            EntityKind::RecipeIngredient => RECIPE_INGREDIENT_REFS,
            EntityKind::Party => PARTY_REFS,
            EntityKind::EntityMedia | EntityKind::DeletedRecord => TYPED_REFS,
            EntityKind::Transaction => TRANSACTION_REFS,
            EntityKind::TransactionDetail => TRANSACTION_DETAIL_REFS,
            EntityKind::ProductQuantity => PRODUCT_QUANTITY_REFS,
            EntityKind::Category | EntityKind::PaymentMethod | EntityKind::Warehouse => &[],
        }
    }

    /// Finds the kind pushed on `endpoint`.
    pub fn from_push_endpoint(endpoint: &str) -> Option<Self> {
        let endpoint = endpoint.trim_matches('/');
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.push_endpoint() == Some(endpoint))
    }

    /// Finds the kind pulled from `endpoint`.
    pub fn from_pull_endpoint(endpoint: &str) -> Option<Self> {
        let endpoint = endpoint.trim_matches('/');
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.pull_endpoint() == endpoint)
    }

    /// Returns a human-readable label for progress display.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Category => "Categories",
            EntityKind::PaymentMethod => "Payment Methods",
            EntityKind::QuantityUnit => "Quantity Units",
            EntityKind::Warehouse => "Warehouses",
            EntityKind::Product => "Products",
            EntityKind::RecipeIngredient => "Recipe Ingredients",
            EntityKind::Party => "Parties",
            EntityKind::EntityMedia => "Media",
            EntityKind::Transaction => "Transactions",
            EntityKind::TransactionDetail => "Transaction Details",
            EntityKind::ProductQuantity => "Product Quantities",
            EntityKind::DeletedRecord => "Deleted Records",
        }
    }
}

/// Where a reference field points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    /// Always the given kind.
    Kind(EntityKind),
    /// The kind named by the record's `type_field` payload field.
    ByTypeField {
        /// Payload field holding an entity kind wire name.
        type_field: &'static str,
    },
}

/// A payload field holding another record's slug, or a `local_<id>`
/// placeholder before that record is pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    /// Payload field name.
    pub field: &'static str,
    /// Kind the field refers to.
    pub target: RefTarget,
}

impl FieldRef {
    const fn to(field: &'static str, kind: EntityKind) -> Self {
        Self {
            field,
            target: RefTarget::Kind(kind),
        }
    }

    const fn by_type(field: &'static str) -> Self {
        Self {
            field,
            target: RefTarget::ByTypeField {
                type_field: "entity_type",
            },
        }
    }

    /// Returns the kind this field refers to on `record`.
    ///
    /// `None` if the record's type field is absent or unknown.
    pub fn target_kind(&self, record: &SyncRecord) -> Option<EntityKind> {
        match self.target {
            RefTarget::Kind(k) => Some(k),
            RefTarget::ByTypeField { type_field } => record
                .str_field(type_field)
                .and_then(|name| name.parse().ok()),
        }
    }

    /// Returns true if this field, on `record`, refers to a record of `kind`.
    pub fn points_at(&self, record: &SyncRecord, kind: EntityKind) -> bool {
        self.target_kind(record) == Some(kind)
    }
}

const QUANTITY_UNIT_REFS: &[FieldRef] = &[FieldRef::to("parent_slug", EntityKind::QuantityUnit)];

const PRODUCT_REFS: &[FieldRef] = &[
    FieldRef::to("category_slug", EntityKind::Category),
    FieldRef::to("base_unit_slug", EntityKind::QuantityUnit),
    FieldRef::to("default_unit_slug", EntityKind::QuantityUnit),
    FieldRef::to("minimum_quantity_unit_slug", EntityKind::QuantityUnit),
    FieldRef::to("opening_quantity_unit_slug", EntityKind::QuantityUnit),
];

const RECIPE_INGREDIENT_REFS: &[FieldRef] = &[
    FieldRef::to("product_slug", EntityKind::Product),
    FieldRef::to("ingredient_product_slug", EntityKind::Product),
    FieldRef::to("unit_slug", EntityKind::QuantityUnit),
];

const PARTY_REFS: &[FieldRef] = &[FieldRef::to("category_slug", EntityKind::Category)];

const TYPED_REFS: &[FieldRef] = &[FieldRef::by_type("entity_slug")];

const TRANSACTION_REFS: &[FieldRef] = &[
    FieldRef::to("party_slug", EntityKind::Party),
    FieldRef::to("payment_method_slug", EntityKind::PaymentMethod),
    FieldRef::to("warehouse_slug", EntityKind::Warehouse),
    FieldRef::to("category_slug", EntityKind::Category),
];

const TRANSACTION_DETAIL_REFS: &[FieldRef] = &[
    FieldRef::to("transaction_slug", EntityKind::Transaction),
    FieldRef::to("product_slug", EntityKind::Product),
    FieldRef::to("recipe_slug", EntityKind::Product),
    FieldRef::to("quantity_unit_slug", EntityKind::QuantityUnit),
];

const PRODUCT_QUANTITY_REFS: &[FieldRef] = &[
    FieldRef::to("product_slug", EntityKind::Product),
    FieldRef::to("warehouse_slug", EntityKind::Warehouse),
    FieldRef::to("quantity_unit_slug", EntityKind::QuantityUnit),
];

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownEntityKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_parse_back() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        let err = "invoice".parse::<EntityKind>().unwrap_err();
        assert_eq!(err, ProtocolError::UnknownEntityKind("invoice".into()));
    }

    #[test]
    fn endpoints_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_pull_endpoint(kind.pull_endpoint()), Some(kind));
            if let Some(push) = kind.push_endpoint() {
                assert_eq!(EntityKind::from_push_endpoint(push), Some(kind));
            }
        }
        assert_eq!(EntityKind::from_push_endpoint("/products"), Some(EntityKind::Product));
        assert_eq!(EntityKind::ProductQuantity.push_endpoint(), None);
    }

    #[test]
    fn typed_reference_follows_entity_type_field() {
        use crate::record::{LocalId, Payload};
        let mut payload = Payload::new();
        payload.insert("entity_type".into(), serde_json::json!("product"));
        payload.insert("entity_slug".into(), serde_json::json!("local_3"));
        let record = SyncRecord::new_local(
            EntityKind::EntityMedia,
            LocalId(1),
            "B1",
            payload,
            crate::time::epoch(),
        );
        let field = EntityKind::EntityMedia.references()[0];
        assert!(field.points_at(&record, EntityKind::Product));
        assert!(!field.points_at(&record, EntityKind::Party));
    }

    #[test]
    fn serde_uses_wire_name() {
        let json = serde_json::to_string(&EntityKind::TransactionDetail).unwrap();
        assert_eq!(json, "\"transaction_detail\"");
    }
}
