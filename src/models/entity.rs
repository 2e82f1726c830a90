//! Entity graph definitions.
//!
//! Every entity that takes part in a snapshot is described by one row of the
//! [`EntityKind`] table: its payload key, table, fields and foreign keys, and
//! its write rank. Encode, decode, wipe and restore are all driven off this
//! table, so a new entity type only needs a new row here plus its migration.

use std::fmt;

/// Storage/wire type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    /// Decimal carried as text (prices).
    Decimal,
    /// RFC 3339 timestamp or plain `YYYY-MM-DD` date, kept as text.
    Timestamp,
    /// Nested structured document owned by the entity's consumer; opaque text here.
    Document,
}

/// Value substituted when an optional field is absent from a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Null,
    Text(&'static str),
    Integer(i64),
    /// Left unset by the codec; the store stamps it on first write.
    Now,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// camelCase name used in the payload.
    pub name: &'static str,
    /// snake_case column name.
    pub column: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub unique: bool,
    pub default: FieldDefault,
    pub references: Option<EntityKind>,
}

impl FieldDef {
    const fn new(name: &'static str, column: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            column,
            ty,
            required: false,
            unique: false,
            default: FieldDefault::Null,
            references: None,
        }
    }

    const fn text(name: &'static str, column: &'static str) -> Self {
        Self::new(name, column, FieldType::Text)
    }

    const fn timestamp(name: &'static str, column: &'static str) -> Self {
        Self::new(name, column, FieldType::Timestamp)
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    const fn default(mut self, default: FieldDefault) -> Self {
        self.default = default;
        self
    }

    const fn references(mut self, kind: EntityKind) -> Self {
        self.references = Some(kind);
        self
    }
}

#[derive(Debug)]
pub struct EntityDef {
    pub kind: EntityKind,
    /// Top-level key in the snapshot document.
    pub key: &'static str,
    pub table: &'static str,
    pub fields: &'static [FieldDef],
    /// Payload name of the field `ON CONFLICT` targets during upserts.
    pub upsert_key: &'static str,
    /// Lower ranks are written first and wiped last.
    pub rank: u8,
}

impl EntityDef {
    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn upsert_position(&self) -> usize {
        self.position(self.upsert_key)
            .expect("upsert key is declared in the entity table")
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (usize, &'static FieldDef, EntityKind)> + '_ {
        self.fields
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.references.map(|kind| (i, f, kind)))
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Brand,
    Contact,
    Template,
    User,
    Location,
    Item,
    LendingRecord,
    ItemHistory,
}

impl EntityKind {
    /// Every kind in declaration order.
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Brand,
        EntityKind::Contact,
        EntityKind::Template,
        EntityKind::User,
        EntityKind::Location,
        EntityKind::Item,
        EntityKind::LendingRecord,
        EntityKind::ItemHistory,
    ];

    pub fn def(self) -> &'static EntityDef {
        match self {
            EntityKind::Brand => &BRAND,
            EntityKind::Contact => &CONTACT,
            EntityKind::Template => &TEMPLATE,
            EntityKind::User => &USER,
            EntityKind::Location => &LOCATION,
            EntityKind::Item => &ITEM,
            EntityKind::LendingRecord => &LENDING_RECORD,
            EntityKind::ItemHistory => &ITEM_HISTORY,
        }
    }

    pub fn key(self) -> &'static str {
        self.def().key
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }

    /// Parents before children.
    pub fn write_order() -> Vec<EntityKind> {
        let mut kinds = Self::ALL.to_vec();
        kinds.sort_by_key(|kind| kind.def().rank);
        kinds
    }

    /// Children before parents.
    pub fn wipe_order() -> Vec<EntityKind> {
        let mut kinds = Self::write_order();
        kinds.reverse();
        kinds
    }

    /// Kinds holding a foreign key to `self`.
    pub fn dependents(self) -> impl Iterator<Item = EntityKind> {
        Self::ALL.into_iter().filter(move |other| {
            other
                .def()
                .foreign_keys()
                .any(|(_, _, target)| target == self)
        })
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

const ID: FieldDef = FieldDef::text("id", "id").required().unique();
const CREATED_AT: FieldDef = FieldDef::timestamp("createdAt", "created_at").default(FieldDefault::Now);
const UPDATED_AT: FieldDef = FieldDef::timestamp("updatedAt", "updated_at").default(FieldDefault::Now);

static BRAND: EntityDef = EntityDef {
    kind: EntityKind::Brand,
    key: "brands",
    table: "brands",
    fields: &[ID, FieldDef::text("name", "name").required().unique(), CREATED_AT],
    upsert_key: "name",
    rank: 0,
};

static CONTACT: EntityDef = EntityDef {
    kind: EntityKind::Contact,
    key: "contacts",
    table: "contacts",
    fields: &[
        ID,
        FieldDef::text("name", "name").required().unique(),
        FieldDef::text("email", "email"),
        FieldDef::text("phone", "phone"),
        FieldDef::text("notes", "notes"),
        CREATED_AT,
    ],
    upsert_key: "name",
    rank: 0,
};

static TEMPLATE: EntityDef = EntityDef {
    kind: EntityKind::Template,
    key: "templates",
    table: "templates",
    fields: &[
        ID,
        FieldDef::text("name", "name").required(),
        FieldDef::text("category", "category"),
        FieldDef::new("config", "config", FieldType::Document).required(),
        CREATED_AT,
    ],
    upsert_key: "id",
    rank: 0,
};

static USER: EntityDef = EntityDef {
    kind: EntityKind::User,
    key: "users",
    table: "users",
    fields: &[
        ID,
        FieldDef::text("username", "username").required().unique(),
        FieldDef::text("password", "password").required(),
        FieldDef::text("fullName", "full_name"),
        FieldDef::text("avatar", "avatar"),
        FieldDef::text("theme", "theme").default(FieldDefault::Text("system")),
        FieldDef::text("primaryColor", "primary_color"),
        FieldDef::text("accentColor", "accent_color"),
        CREATED_AT,
    ],
    upsert_key: "id",
    rank: 0,
};

static LOCATION: EntityDef = EntityDef {
    kind: EntityKind::Location,
    key: "locations",
    table: "locations",
    fields: &[
        ID,
        FieldDef::text("name", "name").required(),
        FieldDef::text("type", "type").default(FieldDefault::Text("room")),
        FieldDef::text("parentId", "parent_id").references(EntityKind::Location),
        FieldDef::text("description", "description"),
        CREATED_AT,
        UPDATED_AT,
    ],
    upsert_key: "id",
    rank: 1,
};

static ITEM: EntityDef = EntityDef {
    kind: EntityKind::Item,
    key: "items",
    table: "items",
    fields: &[
        ID,
        FieldDef::text("name", "name").required(),
        FieldDef::text("type", "type").default(FieldDefault::Text("general")),
        FieldDef::text("category", "category"),
        FieldDef::new("specs", "specs", FieldType::Document),
        FieldDef::text("status", "status").default(FieldDefault::Text("available")),
        FieldDef::text("brand", "brand"),
        FieldDef::text("model", "model"),
        FieldDef::text("color", "color"),
        FieldDef::text("serialNumber", "serial_number"),
        FieldDef::timestamp("purchaseDate", "purchase_date"),
        FieldDef::new("purchasePrice", "purchase_price", FieldType::Decimal),
        FieldDef::text("purchaseFrom", "purchase_from"),
        FieldDef::new("quantity", "quantity", FieldType::Integer).default(FieldDefault::Integer(1)),
        FieldDef::text("notes", "notes"),
        FieldDef::text("image", "image"),
        FieldDef::text("locationId", "location_id").references(EntityKind::Location),
        CREATED_AT,
        UPDATED_AT,
    ],
    upsert_key: "id",
    rank: 2,
};

static LENDING_RECORD: EntityDef = EntityDef {
    kind: EntityKind::LendingRecord,
    key: "lendingRecords",
    table: "lending_records",
    fields: &[
        ID,
        FieldDef::text("itemId", "item_id").required().references(EntityKind::Item),
        FieldDef::text("borrowerName", "borrower_name").required(),
        FieldDef::text("borrowerContact", "borrower_contact"),
        FieldDef::timestamp("borrowDate", "borrow_date").required(),
        FieldDef::timestamp("dueDate", "due_date"),
        FieldDef::timestamp("returnDate", "return_date"),
        FieldDef::text("notes", "notes"),
    ],
    upsert_key: "id",
    rank: 3,
};

static ITEM_HISTORY: EntityDef = EntityDef {
    kind: EntityKind::ItemHistory,
    key: "itemHistory",
    table: "item_history",
    fields: &[
        ID,
        FieldDef::text("itemId", "item_id").required().references(EntityKind::Item),
        FieldDef::text("action", "action").required(),
        FieldDef::text("details", "details"),
        FieldDef::timestamp("timestamp", "timestamp").default(FieldDefault::Now),
    ],
    upsert_key: "id",
    rank: 3,
};
