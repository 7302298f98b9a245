//! Embeddable, schema-typed entity store.
//!
//! Elements carry raw byte-valued properties; a declarative schema assigns
//! each property a semantic type, and every comparison decodes the bytes
//! through one shared coercion table ([`codec`]). Queries are a small
//! boolean expression tree ([`query`]) compiled into reusable predicates
//! ([`matcher`]) or translated into SQL for the secondary index
//! ([`index`]). Collections are [`group::Group`] values composed from
//! decorators, synchronized with the index by the strategies in [`sync`],
//! and optionally proxied across a process boundary ([`remote`]).

pub mod codec;
pub mod element;
pub mod error;
pub mod group;
pub mod index;
pub mod matcher;
pub mod query;
pub mod remote;
pub mod schema;
pub mod signal;
pub mod sync;

pub use codec::PropKind;
pub use element::{Element, Prop};
pub use error::{LodestoreError, Result};
pub use group::{Group, MemoryGroup};
pub use index::{IndexStore, SqliteIndex};
pub use matcher::Match;
pub use query::Query;
pub use remote::{RemoteCollection, RemoteGroup};
pub use schema::Schema;
pub use signal::SignalBus;
pub use sync::{ActiveGroup, ImportedGroup, IndexSensor, PassiveGroup};
