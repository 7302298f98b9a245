//! Index synchronization strategies over an (origin group, index engine)
//! pair.
//!
//! Three groups keep an [`IndexStore`] aligned with an origin [`Group`]:
//! [`ImportedGroup`] copies everything on first access and then reads from
//! the index, [`ActiveGroup`] writes through to the index inside every
//! mutating call, and [`PassiveGroup`] leaves writes to the origin and lets
//! an [`IndexSensor`] on the signal bus apply them reactively.

use crate::element::{Element, Prop};
use crate::error::{LodestoreError, Result};
use crate::group::{Group, MemoryGroup, NO_LIMIT};
use crate::index::IndexStore;
use crate::matcher::ID_FIELD;
use crate::query::Query;
use crate::schema::Schema;
use crate::signal::{Sensor, Signal, SignalKind};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::sync::Arc;

fn id_query(ids: &[String]) -> Query {
    Query::is_in(ID_FIELD, ids.to_vec())
}

// ── Eager import ─────────────────────────────────────────────────

/// Copies every origin element into the index on first access (not at
/// construction), then serves reads from the index. Writes keep going to
/// the origin via plain delegation, so index reads may lag behind them.
pub struct ImportedGroup {
    origin: Arc<dyn Group>,
    index: Arc<dyn IndexStore>,
    schema: Arc<Schema>,
    context: String,
    imported: OnceCell<()>,
}

impl ImportedGroup {
    pub fn new(
        origin: Arc<dyn Group>,
        index: Arc<dyn IndexStore>,
        schema: Arc<Schema>,
        context: impl Into<String>,
    ) -> Self {
        ImportedGroup {
            origin,
            index,
            schema,
            context: context.into(),
            imported: OnceCell::new(),
        }
    }

    fn ensure_imported(&self) -> Result<()> {
        self.imported
            .get_or_try_init(|| {
                self.index.prepare(&self.context)?;
                for element in self.origin.elements()? {
                    self.index.insert(&self.context, &element)?;
                }
                Ok::<(), LodestoreError>(())
            })
            .map(|_| ())
    }
}

impl Group for ImportedGroup {
    fn elements(&self) -> Result<Vec<Element>> {
        self.ensure_imported()?;
        self.index.find(&self.context, &Query::All, 0, NO_LIMIT)
    }

    fn add(&self, elements: Vec<Element>) -> Result<()> {
        self.ensure_imported()?;
        self.origin.add(elements)
    }

    fn remove(&self, query: &Query) -> Result<()> {
        self.ensure_imported()?;
        self.origin.remove(query)
    }

    fn find(&self, query: &Query, start: usize, amount: usize) -> Result<MemoryGroup> {
        self.ensure_imported()?;
        let matched = self.index.find(&self.context, query, start, amount)?;
        MemoryGroup::with_elements(self.schema.clone(), self.context.clone(), matched)
    }

    fn update(&self, query: &Query, props: Vec<Prop>) -> Result<()> {
        self.ensure_imported()?;
        self.origin.update(query, props)
    }
}

// ── Write-through ────────────────────────────────────────────────

/// Mutates the index first, then delegates the same operation to the
/// origin; at the return of every call both sides agree. The index doubles
/// as a fast duplicate-id check on add.
pub struct ActiveGroup {
    origin: Arc<dyn Group>,
    index: Arc<dyn IndexStore>,
    schema: Arc<Schema>,
    context: String,
}

impl ActiveGroup {
    pub fn new(
        origin: Arc<dyn Group>,
        index: Arc<dyn IndexStore>,
        schema: Arc<Schema>,
        context: impl Into<String>,
    ) -> Result<Self> {
        let context = context.into();
        index.prepare(&context)?;
        Ok(ActiveGroup {
            origin,
            index,
            schema,
            context,
        })
    }

    fn validate_props(&self, props: &[Prop]) -> Result<()> {
        let declared: HashSet<String> =
            self.schema.prop_names(&self.context).into_iter().collect();
        let unknown: Vec<&str> = props
            .iter()
            .map(|p| p.name.as_str())
            .filter(|name| !declared.contains(*name))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(LodestoreError::Schema(format!(
                "unknown properties for context '{}': {}",
                self.context,
                unknown.join(", ")
            )))
        }
    }
}

impl Group for ActiveGroup {
    fn elements(&self) -> Result<Vec<Element>> {
        self.index.find(&self.context, &Query::All, 0, NO_LIMIT)
    }

    fn add(&self, elements: Vec<Element>) -> Result<()> {
        let mut conflicts = Vec::new();
        for element in &elements {
            if self.index.contains(&self.context, element.id())? {
                conflicts.push(element.id().to_string());
            }
        }
        if !conflicts.is_empty() {
            return Err(LodestoreError::DuplicateIds { ids: conflicts });
        }

        let ids: Vec<String> = elements.iter().map(|e| e.id().to_string()).collect();
        for element in &elements {
            self.index.insert(&self.context, element)?;
        }
        if let Err(err) = self.origin.add(elements) {
            // Undo the index writes so a failed call applies nothing.
            self.index.remove_matching(&self.context, &id_query(&ids))?;
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, query: &Query) -> Result<()> {
        let removed = self.index.find(&self.context, query, 0, NO_LIMIT)?;
        self.index.remove_matching(&self.context, query)?;
        if let Err(err) = self.origin.remove(query) {
            // Restore the deleted rows so a failed call applies nothing.
            for element in &removed {
                self.index.insert(&self.context, element)?;
            }
            return Err(err);
        }
        Ok(())
    }

    fn find(&self, query: &Query, start: usize, amount: usize) -> Result<MemoryGroup> {
        let matched = self.index.find(&self.context, query, start, amount)?;
        MemoryGroup::with_elements(self.schema.clone(), self.context.clone(), matched)
    }

    fn update(&self, query: &Query, props: Vec<Prop>) -> Result<()> {
        // Validate up front: once the index is touched the origin must not
        // be able to reject the same call.
        self.validate_props(&props)?;
        let originals = self.index.find(&self.context, query, 0, NO_LIMIT)?;
        for original in &originals {
            let mut element = original.clone();
            element.update(props.clone());
            self.index.insert(&self.context, &element)?;
        }
        if let Err(err) = self.origin.update(query, props) {
            // Put the pre-update rows back, mirroring the add rollback.
            for original in &originals {
                self.index.insert(&self.context, original)?;
            }
            return Err(err);
        }
        Ok(())
    }
}

// ── Reactive ─────────────────────────────────────────────────────

/// Writes go straight to the origin; the index only catches up when an
/// [`IndexSensor`] processes the resulting signals. Reads come from the
/// index and may be stale until then.
pub struct PassiveGroup {
    origin: Arc<dyn Group>,
    index: Arc<dyn IndexStore>,
    schema: Arc<Schema>,
    context: String,
}

impl PassiveGroup {
    pub fn new(
        origin: Arc<dyn Group>,
        index: Arc<dyn IndexStore>,
        schema: Arc<Schema>,
        context: impl Into<String>,
    ) -> Result<Self> {
        let context = context.into();
        index.prepare(&context)?;
        Ok(PassiveGroup {
            origin,
            index,
            schema,
            context,
        })
    }
}

impl Group for PassiveGroup {
    fn elements(&self) -> Result<Vec<Element>> {
        self.index.find(&self.context, &Query::All, 0, NO_LIMIT)
    }

    fn add(&self, elements: Vec<Element>) -> Result<()> {
        self.origin.add(elements)
    }

    fn remove(&self, query: &Query) -> Result<()> {
        self.origin.remove(query)
    }

    fn find(&self, query: &Query, start: usize, amount: usize) -> Result<MemoryGroup> {
        let matched = self.index.find(&self.context, query, start, amount)?;
        MemoryGroup::with_elements(self.schema.clone(), self.context.clone(), matched)
    }

    fn update(&self, query: &Query, props: Vec<Prop>) -> Result<()> {
        self.origin.update(query, props)
    }
}

/// Bus sensor that replays origin changes into the index. Signals carrying
/// the sensor's own initiator identity are echoes of writes this side
/// already made and are dropped; so are signals for other contexts.
pub struct IndexSensor {
    origin: Arc<dyn Group>,
    index: Arc<dyn IndexStore>,
    context: String,
    identity: String,
}

impl IndexSensor {
    pub fn new(
        origin: Arc<dyn Group>,
        index: Arc<dyn IndexStore>,
        context: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        IndexSensor {
            origin,
            index,
            context: context.into(),
            identity: identity.into(),
        }
    }

    fn apply(&self, signal: &Signal) -> Result<()> {
        match signal.kind {
            SignalKind::Added | SignalKind::Updated => {
                let refreshed = self
                    .origin
                    .find(&id_query(&signal.ids), 0, NO_LIMIT)?
                    .elements()?;
                for element in refreshed {
                    self.index.insert(&self.context, &element)?;
                }
            }
            SignalKind::Removed => {
                self.index.remove_matching(&self.context, &id_query(&signal.ids))?;
            }
        }
        Ok(())
    }
}

impl Sensor for IndexSensor {
    fn notify(&self, signal: &Signal) {
        if signal.initiator == self.identity || signal.context != self.context {
            return;
        }
        if let Err(err) = self.apply(signal) {
            log::warn!(
                "index sync failed for {:?} {} in '{}': {err}",
                signal.kind,
                signal.ids.join(", "),
                signal.context
            );
        }
    }
}
