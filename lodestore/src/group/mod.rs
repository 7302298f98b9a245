//! The mutable collection contract and its composable decorators.
//!
//! Every cross-cutting concern (scope limiting, mutual exclusion, change
//! notification, lazy construction, misconfiguration stubbing) is a small
//! wrapper implementing the same [`Group`] trait around one inner group.
//! Decorators are composed by explicit construction; none of them owns
//! elements itself.

use crate::element::{Element, Prop};
use crate::error::{LodestoreError, Result};
use crate::matcher::{self, ID_FIELD};
use crate::query::Query;
use crate::schema::Schema;
use crate::signal::{Signal, SignalBus, SignalKind};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

/// Amount value meaning "no pagination limit".
pub const NO_LIMIT: usize = usize::MAX;

/// The collection contract. `find` paginates: it skips `start` matches,
/// then collects up to `amount`, returning a new group scoped to the
/// matches. Mutations validate eagerly; a failed call applies nothing.
pub trait Group: Send + Sync {
    fn elements(&self) -> Result<Vec<Element>>;

    /// Add elements. Fails with the conflicting ids enumerated if any id
    /// already exists; no element is added on failure.
    fn add(&self, elements: Vec<Element>) -> Result<()>;

    /// Delete every element matching the query.
    fn remove(&self, query: &Query) -> Result<()>;

    fn find(&self, query: &Query, start: usize, amount: usize) -> Result<MemoryGroup>;

    /// Apply the given properties to every matching element,
    /// last-write-wins per property name.
    fn update(&self, query: &Query, props: Vec<Prop>) -> Result<()>;
}

// ── In-memory origin ─────────────────────────────────────────────

/// The linear-scan origin collection: owns its elements, compiles each
/// query once, and scans in id order.
pub struct MemoryGroup {
    schema: Arc<Schema>,
    context: String,
    elements: RwLock<BTreeMap<String, Element>>,
}

impl MemoryGroup {
    pub fn new(schema: Arc<Schema>, context: impl Into<String>) -> Result<Self> {
        let context = context.into();
        schema.context(&context)?;
        Ok(MemoryGroup {
            schema,
            context,
            elements: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn with_elements(
        schema: Arc<Schema>,
        context: impl Into<String>,
        elements: Vec<Element>,
    ) -> Result<Self> {
        let group = MemoryGroup::new(schema, context)?;
        group.add(elements)?;
        Ok(group)
    }

    fn snapshot(&self, elements: Vec<Element>) -> MemoryGroup {
        let map = elements.into_iter().map(|e| (e.id().to_string(), e)).collect();
        MemoryGroup {
            schema: self.schema.clone(),
            context: self.context.clone(),
            elements: RwLock::new(map),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Every prop name in the batch must be declared by the schema; an
    /// unknown name rejects the whole batch before anything is written.
    fn validate_props<'a>(&self, names: impl Iterator<Item = &'a str>) -> Result<()> {
        let unknown: Vec<String> = names
            .filter(|name| self.schema.kind_of(&self.context, name).is_none())
            .map(|name| name.to_string())
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(LodestoreError::Schema(format!(
                "Unknown properties in context '{}': {}",
                self.context,
                unknown.join(", ")
            )))
        }
    }
}

impl Group for MemoryGroup {
    fn elements(&self) -> Result<Vec<Element>> {
        Ok(self.elements.read().unwrap().values().cloned().collect())
    }

    fn add(&self, elements: Vec<Element>) -> Result<()> {
        for element in &elements {
            self.validate_props(element.prop_names())?;
        }

        let mut store = self.elements.write().unwrap();
        let mut conflicts: Vec<String> = Vec::new();
        let mut batch_ids = std::collections::HashSet::new();
        for element in &elements {
            let id = element.id().to_string();
            if store.contains_key(&id) || !batch_ids.insert(id.clone()) {
                conflicts.push(id);
            }
        }
        if !conflicts.is_empty() {
            return Err(LodestoreError::DuplicateIds { ids: conflicts });
        }

        for element in elements {
            store.insert(element.id().to_string(), element);
        }
        Ok(())
    }

    fn remove(&self, query: &Query) -> Result<()> {
        let compiled = matcher::compile(query, &self.schema, &self.context, None)?;
        let mut store = self.elements.write().unwrap();
        store.retain(|_, element| !compiled.matches(element));
        Ok(())
    }

    fn find(&self, query: &Query, start: usize, amount: usize) -> Result<MemoryGroup> {
        let compiled = matcher::compile(query, &self.schema, &self.context, None)?;
        let store = self.elements.read().unwrap();
        let matched: Vec<Element> = store
            .values()
            .filter(|element| compiled.matches(element))
            .skip(start)
            .take(amount)
            .cloned()
            .collect();
        drop(store);
        Ok(self.snapshot(matched))
    }

    fn update(&self, query: &Query, props: Vec<Prop>) -> Result<()> {
        self.validate_props(props.iter().map(|p| p.name.as_str()))?;
        let compiled = matcher::compile(query, &self.schema, &self.context, None)?;
        let mut store = self.elements.write().unwrap();
        for element in store.values_mut() {
            if compiled.matches(element) {
                element.update(props.clone());
            }
        }
        Ok(())
    }
}

// ── Scope limiting ───────────────────────────────────────────────

/// Restricts every operation to a fixed id allow-list. Queries are
/// intersected with `IN(id, allowed)`; `elements()` filters the inner
/// sequence instead of querying, which keeps the decorator usable when the
/// allow-list itself was derived from a query.
pub struct ScopedGroup {
    inner: Arc<dyn Group>,
    allowed: Vec<String>,
}

impl ScopedGroup {
    pub fn new(inner: Arc<dyn Group>, allowed: Vec<String>) -> Self {
        ScopedGroup { inner, allowed }
    }

    fn scoped(&self, query: &Query) -> Query {
        Query::is_in(ID_FIELD, self.allowed.clone()).and(query.clone())
    }
}

impl Group for ScopedGroup {
    fn elements(&self) -> Result<Vec<Element>> {
        Ok(self
            .inner
            .elements()?
            .into_iter()
            .filter(|e| self.allowed.iter().any(|id| id == e.id()))
            .collect())
    }

    fn add(&self, elements: Vec<Element>) -> Result<()> {
        // Out-of-scope elements are dropped silently, not rejected.
        let (kept, dropped): (Vec<Element>, Vec<Element>) = elements
            .into_iter()
            .partition(|e| self.allowed.iter().any(|id| id == e.id()));
        for element in &dropped {
            log::debug!("scoped group dropped out-of-scope element '{}'", element.id());
        }
        self.inner.add(kept)
    }

    fn remove(&self, query: &Query) -> Result<()> {
        self.inner.remove(&self.scoped(query))
    }

    fn find(&self, query: &Query, start: usize, amount: usize) -> Result<MemoryGroup> {
        self.inner.find(&self.scoped(query), start, amount)
    }

    fn update(&self, query: &Query, props: Vec<Prop>) -> Result<()> {
        self.inner.update(&self.scoped(query), props)
    }
}

// ── Mutual exclusion ─────────────────────────────────────────────

/// Serializes all five operations behind one shared lock object. The lock
/// is passed in, so several groups can share it. `elements()` returns a
/// snapshot taken while the lock is held, never a live view.
pub struct LockedGroup {
    inner: Arc<dyn Group>,
    lock: Arc<Mutex<()>>,
}

impl LockedGroup {
    pub fn new(inner: Arc<dyn Group>, lock: Arc<Mutex<()>>) -> Self {
        LockedGroup { inner, lock }
    }
}

impl Group for LockedGroup {
    fn elements(&self) -> Result<Vec<Element>> {
        let _guard = self.lock.lock().unwrap();
        self.inner.elements()
    }

    fn add(&self, elements: Vec<Element>) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        self.inner.add(elements)
    }

    fn remove(&self, query: &Query) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        self.inner.remove(query)
    }

    fn find(&self, query: &Query, start: usize, amount: usize) -> Result<MemoryGroup> {
        let _guard = self.lock.lock().unwrap();
        self.inner.find(query, start, amount)
    }

    fn update(&self, query: &Query, props: Vec<Prop>) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        self.inner.update(query, props)
    }
}

// ── Change notification ──────────────────────────────────────────

/// Emits an added/removed/updated signal on the shared bus after the inner
/// group has completed the mutation. Signals are tagged with this group's
/// initiator identity and element-type context.
pub struct NotifyingGroup {
    inner: Arc<dyn Group>,
    bus: Arc<SignalBus>,
    context: String,
    initiator: String,
}

impl NotifyingGroup {
    pub fn new(
        inner: Arc<dyn Group>,
        bus: Arc<SignalBus>,
        context: impl Into<String>,
        initiator: impl Into<String>,
    ) -> Self {
        NotifyingGroup {
            inner,
            bus,
            context: context.into(),
            initiator: initiator.into(),
        }
    }

    fn emit(&self, kind: SignalKind, ids: Vec<String>) {
        self.bus
            .send(&Signal::new(kind, self.context.clone(), ids, self.initiator.clone()));
    }

    fn matching_ids(&self, query: &Query) -> Result<Vec<String>> {
        Ok(self
            .inner
            .find(query, 0, NO_LIMIT)?
            .elements()?
            .iter()
            .map(|e| e.id().to_string())
            .collect())
    }
}

impl Group for NotifyingGroup {
    fn elements(&self) -> Result<Vec<Element>> {
        self.inner.elements()
    }

    fn add(&self, elements: Vec<Element>) -> Result<()> {
        let ids: Vec<String> = elements.iter().map(|e| e.id().to_string()).collect();
        self.inner.add(elements)?;
        self.emit(SignalKind::Added, ids);
        Ok(())
    }

    fn remove(&self, query: &Query) -> Result<()> {
        let ids = self.matching_ids(query)?;
        self.inner.remove(query)?;
        self.emit(SignalKind::Removed, ids);
        Ok(())
    }

    fn find(&self, query: &Query, start: usize, amount: usize) -> Result<MemoryGroup> {
        self.inner.find(query, start, amount)
    }

    fn update(&self, query: &Query, props: Vec<Prop>) -> Result<()> {
        let ids = self.matching_ids(query)?;
        self.inner.update(query, props)?;
        self.emit(SignalKind::Updated, ids);
        Ok(())
    }
}

// ── Fail-fast stub ───────────────────────────────────────────────

/// A group with no backing store. Every operation fails immediately, so an
/// illegal configuration surfaces at first use instead of silently doing
/// nothing.
#[derive(Debug, Default)]
pub struct DeadGroup;

impl Group for DeadGroup {
    fn elements(&self) -> Result<Vec<Element>> {
        Err(LodestoreError::Dead("elements"))
    }

    fn add(&self, _elements: Vec<Element>) -> Result<()> {
        Err(LodestoreError::Dead("add"))
    }

    fn remove(&self, _query: &Query) -> Result<()> {
        Err(LodestoreError::Dead("remove"))
    }

    fn find(&self, _query: &Query, _start: usize, _amount: usize) -> Result<MemoryGroup> {
        Err(LodestoreError::Dead("find"))
    }

    fn update(&self, _query: &Query, _props: Vec<Prop>) -> Result<()> {
        Err(LodestoreError::Dead("update"))
    }
}

// ── Lazy sticky construction ─────────────────────────────────────

type BuildGroup = Box<dyn FnOnce() -> Result<Arc<dyn Group>> + Send>;

/// Builds its inner group on the first call to any method and reuses the
/// same instance afterwards. First-access side effects of the builder
/// (such as an index import) therefore run exactly once.
pub struct LazyGroup {
    cell: OnceCell<Arc<dyn Group>>,
    build: Mutex<Option<BuildGroup>>,
}

impl LazyGroup {
    pub fn new(build: impl FnOnce() -> Result<Arc<dyn Group>> + Send + 'static) -> Self {
        LazyGroup {
            cell: OnceCell::new(),
            build: Mutex::new(Some(Box::new(build))),
        }
    }

    fn inner(&self) -> Result<Arc<dyn Group>> {
        self.cell
            .get_or_try_init(|| {
                let build = self
                    .build
                    .lock()
                    .unwrap()
                    .take()
                    .ok_or_else(|| LodestoreError::Other("lazy group construction failed on a previous access".into()))?;
                build()
            })
            .cloned()
    }
}

impl Group for LazyGroup {
    fn elements(&self) -> Result<Vec<Element>> {
        self.inner()?.elements()
    }

    fn add(&self, elements: Vec<Element>) -> Result<()> {
        self.inner()?.add(elements)
    }

    fn remove(&self, query: &Query) -> Result<()> {
        self.inner()?.remove(query)
    }

    fn find(&self, query: &Query, start: usize, amount: usize) -> Result<MemoryGroup> {
        self.inner()?.find(query, start, amount)
    }

    fn update(&self, query: &Query, props: Vec<Prop>) -> Result<()> {
        self.inner()?.update(query, props)
    }
}
