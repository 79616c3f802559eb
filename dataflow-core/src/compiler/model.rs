//! Compiled model state.
//!
//! A [`Model`] owns every scope compiled from one literal: an arena of
//! [`ScopeNode`]s indexed by [`ScopeId`], and one dependency graph over their
//! slots. Scopes refer to each other (parent, children) by id only.
//!
//! # Lock discipline
//!
//! All state sits behind one mutex. Operations that notify other nodes
//! collect what they have to do in [`Effects`] while locked, and apply them
//! after unlocking. Reconcile pulls bound producers with the lock released.
//!
//! # Cycles and deep pulls
//!
//! A field read while it is still being evaluated reads as `Absent`, the
//! same as in [`evaluate_literal`](super::evaluate_literal). Such a read is
//! not kept as a dependency. A pull deeper than `max_pull_depth` strands its
//! readers, which stay dirty until the field it reached has been settled by
//! a pull of its own; then they are pulled again.

use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::functions::FunctionTable;
use super::interpreter::{evaluate, Environment};
use super::{ItemKey, ScopeId, SlotRef};
use crate::graph::{DirtyState, NodeKind, UpdateScheduler};
use crate::reactive::{ChangeTag, Consumer, Epoch, KeyedConsumer, Outlet, Producer, SubscriberId};
use crate::value::{Item, Record, Value};

pub(crate) struct Model {
    state: Mutex<ModelState>,
    this: Weak<Model>,
}

struct ModelState {
    scopes: Vec<Option<ScopeNode>>,
    graph: UpdateScheduler<SlotRef>,
    /// Slots written since the last reconcile.
    written: IndexSet<SlotRef>,
    /// Bound slots whose producer decohered since the last reconcile.
    pending_bindings: IndexSet<SlotRef>,
    version: Option<Epoch>,
    functions: Arc<FunctionTable>,
    max_pull_depth: usize,
    evaluations: u64,
    /// The last full pass met a cycle, so values depend on evaluation order.
    cyclic: bool,
}

struct ScopeNode {
    parent: Option<ScopeId>,
    key_in_parent: Option<ItemKey>,
    items: IndexMap<ItemKey, Field>,
    next_position: usize,
    outlet: Outlet<dyn Consumer>,
    keyed_outlet: Outlet<dyn KeyedConsumer<Value>>,
}

struct Field {
    slot: Slot,
    /// Expression recomputing the slot, for derived fields.
    updater: Option<Value>,
    binding: Option<Binding>,
}

enum Slot {
    Value(Value),
    Scope(ScopeId),
    /// An item with a non-constant key, kept as written.
    Opaque(Item),
}

struct Binding {
    producer: Arc<dyn Producer<Value>>,
    inlet: Arc<ScopeInlet>,
}

impl Field {
    fn value(value: Value) -> Self {
        Self {
            slot: Slot::Value(value),
            updater: None,
            binding: None,
        }
    }

    fn derived(expr: Value) -> Self {
        Self {
            slot: Slot::Value(Value::Absent),
            updater: Some(expr),
            binding: None,
        }
    }

    fn kind(&self) -> NodeKind {
        if self.updater.is_some() {
            NodeKind::Derived
        } else {
            NodeKind::Source
        }
    }
}

/// Work to do once the model lock is released.
#[derive(Default)]
struct Effects {
    touched: IndexMap<SlotRef, ChangeTag>,
    releases: Vec<(Arc<dyn Producer<Value>>, SubscriberId)>,
    subscriptions: Vec<(Arc<dyn Producer<Value>>, Arc<dyn Consumer>)>,
    decohere: Vec<Arc<dyn Consumer>>,
    decohere_keys: Vec<(Arc<dyn KeyedConsumer<Value>>, Value, ChangeTag)>,
}

impl Effects {
    fn touch(&mut self, slot: SlotRef, tag: ChangeTag) {
        self.touched.insert(slot, tag);
    }

    fn apply(self) {
        for (producer, id) in self.releases {
            producer.unsubscribe(id);
        }
        for (producer, consumer) in self.subscriptions {
            producer.subscribe(consumer);
        }
        for consumer in self.decohere {
            consumer.on_decohere();
        }
        for (consumer, key, tag) in self.decohere_keys {
            consumer.decohere_key(&key, tag);
        }
    }
}

/// Per-reconcile bookkeeping.
#[derive(Default)]
struct Pass {
    /// Slots whose value differs from the previous reconcile.
    changed: IndexSet<SlotRef>,
    /// Slots being evaluated right now, to cut cycles.
    active: IndexSet<SlotRef>,
    /// Where a too-deep pull stopped, and the readers waiting on it.
    stranded: Option<(SlotRef, IndexSet<SlotRef>)>,
    /// Re-evaluate every derived field, in document order.
    full: bool,
    /// Some evaluation read a field that was still being evaluated.
    cyclic: bool,
    evaluated: usize,
}

/// Outcome of bringing one slot up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Ready,
    /// The slot is being evaluated further up the pull.
    Active,
    /// The pull ran too deep and has to be retried.
    Deferred,
}

impl Model {
    pub(crate) fn new(functions: Arc<FunctionTable>, max_pull_depth: usize) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(ModelState {
                scopes: Vec::new(),
                graph: UpdateScheduler::new(),
                written: IndexSet::new(),
                pending_bindings: IndexSet::new(),
                version: None,
                functions,
                max_pull_depth,
                evaluations: 0,
                cyclic: false,
            }),
            this: this.clone(),
        })
    }

    /// Materialize and compile `record` as a new root scope.
    pub(crate) fn install_root(&self, record: Record) -> ScopeId {
        let mut state = self.state.lock();
        let root = state.new_scope(None, None);
        let mut effects = Effects::default();
        state.install_record(root, record, &mut effects);
        debug!(
            scopes = state.scopes.len(),
            slots = state.graph.node_count(),
            "compiled model"
        );
        root
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub(crate) fn lookup(&self, scope: ScopeId, key: &Value) -> Value {
        let state = self.state.lock();
        let key = ItemKey::Field(key.clone());
        let mut current = Some(scope);
        while let Some(id) = current {
            let Some(node) = state.scope(id) else {
                break;
            };
            if node.items.contains_key(&key) {
                return state.value_of(&SlotRef::new(id, key));
            }
            current = node.parent;
        }
        Value::Absent
    }

    pub(crate) fn get_local(&self, scope: ScopeId, key: &Value) -> Option<Value> {
        let state = self.state.lock();
        let slot = SlotRef::new(scope, ItemKey::Field(key.clone()));
        state.field(&slot)?;
        Some(state.value_of(&slot))
    }

    pub(crate) fn snapshot(&self, scope: ScopeId) -> Record {
        self.state.lock().snapshot(scope)
    }

    /// Keys of the scope's `key: value` fields, in order.
    pub(crate) fn field_keys(&self, scope: ScopeId) -> Vec<Value> {
        let state = self.state.lock();
        let Some(node) = state.scope(scope) else {
            return Vec::new();
        };
        node.items
            .keys()
            .filter_map(|key| match key {
                ItemKey::Field(key) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn item_count(&self, scope: ScopeId) -> usize {
        self.state
            .lock()
            .scope(scope)
            .map_or(0, |node| node.items.len())
    }

    pub(crate) fn child_scope(&self, scope: ScopeId, key: &Value) -> Option<ScopeId> {
        let state = self.state.lock();
        match state.field(&SlotRef::new(scope, ItemKey::Field(key.clone())))?.slot {
            Slot::Scope(child) => Some(child),
            _ => None,
        }
    }

    pub(crate) fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.state.lock().scope(scope)?.parent
    }

    pub(crate) fn is_live(&self, scope: ScopeId) -> bool {
        self.state.lock().scope(scope).is_some()
    }

    pub(crate) fn evaluation_count(&self) -> u64 {
        self.state.lock().evaluations
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write `key` as seen from `scope`: the local field, else the nearest
    /// enclosing owner, else a new local field.
    pub(crate) fn put(&self, scope: ScopeId, key: Value, value: Value) {
        let effects = {
            let mut state = self.state.lock();
            let key = ItemKey::Field(key);
            let Some(owner) = state.owner_of(scope, &key) else {
                return;
            };
            debug!(
                scope = scope.index(),
                owner = owner.index(),
                ?key,
                delegated = owner != scope,
                "put"
            );
            let mut effects = Effects::default();
            state.write(owner, key, value, &mut effects);
            state.notify(&mut effects);
            effects
        };
        effects.apply();
    }

    /// Remove a local field. Readers re-resolve the name on the next
    /// reconcile, possibly in an enclosing scope.
    pub(crate) fn remove(&self, scope: ScopeId, key: &Value) -> bool {
        let effects = {
            let mut state = self.state.lock();
            let key = ItemKey::Field(key.clone());
            let Some(field) = state
                .scope_mut(scope)
                .and_then(|node| node.items.shift_remove(&key))
            else {
                return false;
            };
            debug!(scope = scope.index(), ?key, "remove");
            let mut effects = Effects::default();
            let slot = SlotRef::new(scope, key);
            state.changed(slot.clone(), ChangeTag::Removed, &mut effects);
            state.changed(SlotRef::keys_of(scope), ChangeTag::Updated, &mut effects);
            state.graph.remove_node(&slot);
            state.pending_bindings.shift_remove(&slot);
            state.retire(field, &mut effects);
            state.version = None;
            state.notify(&mut effects);
            effects
        };
        effects.apply();
        true
    }

    /// Feed the local field `key` from `producer`.
    pub(crate) fn bind(&self, scope: ScopeId, key: Value, producer: Arc<dyn Producer<Value>>) -> bool {
        let slot = SlotRef::new(scope, ItemKey::Field(key));
        let inlet = Arc::new(ScopeInlet {
            id: SubscriberId::new(),
            model: self.this.clone(),
            slot: slot.clone(),
        });
        let effects = {
            let mut state = self.state.lock();
            if state.scope(scope).is_none() {
                return false;
            }
            debug!(scope = scope.index(), key = ?slot.key, "bind");
            let mut effects = Effects::default();
            state.write(scope, slot.key.clone(), Value::Absent, &mut effects);
            if let Some(field) = state.field_mut(&slot) {
                field.binding = Some(Binding {
                    producer: producer.clone(),
                    inlet: inlet.clone(),
                });
            }
            state.pending_bindings.insert(slot);
            let consumer: Arc<dyn Consumer> = inlet;
            effects.subscriptions.push((producer, consumer));
            state.notify(&mut effects);
            effects
        };
        effects.apply();
        true
    }

    /// Release every producer subscription held in the subtree at `scope`.
    pub(crate) fn disconnect(&self, scope: ScopeId) -> usize {
        let effects = {
            let mut state = self.state.lock();
            let mut effects = Effects::default();
            state.disconnect(scope, &mut effects);
            effects
        };
        let released = effects.releases.len();
        debug!(scope = scope.index(), released, "disconnected scope");
        effects.apply();
        released
    }

    fn decohere_binding(&self, slot: &SlotRef, inlet: SubscriberId) {
        let effects = {
            let mut state = self.state.lock();
            let bound_here = state
                .field(slot)
                .and_then(|field| field.binding.as_ref())
                .is_some_and(|binding| binding.inlet.id == inlet);
            if !bound_here || !state.pending_bindings.insert(slot.clone()) {
                return;
            }
            let mut effects = Effects::default();
            for affected in state.graph.mark_changed(slot) {
                effects.touch(affected, ChangeTag::Updated);
            }
            effects.touch(slot.clone(), ChangeTag::Updated);
            state.version = None;
            state.notify(&mut effects);
            effects
        };
        effects.apply();
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub(crate) fn subscribe(&self, scope: ScopeId, consumer: Arc<dyn Consumer>) {
        if let Some(node) = self.state.lock().scope(scope) {
            node.outlet
                .subscribe(consumer.subscriber_id(), Arc::downgrade(&consumer));
        }
    }

    pub(crate) fn unsubscribe(&self, scope: ScopeId, id: SubscriberId) {
        if let Some(node) = self.state.lock().scope(scope) {
            node.outlet.unsubscribe(id);
        }
    }

    pub(crate) fn subscribe_keyed(&self, scope: ScopeId, consumer: Arc<dyn KeyedConsumer<Value>>) {
        if let Some(node) = self.state.lock().scope(scope) {
            node.keyed_outlet
                .subscribe(consumer.subscriber_id(), Arc::downgrade(&consumer));
        }
    }

    pub(crate) fn unsubscribe_keyed(&self, scope: ScopeId, id: SubscriberId) {
        if let Some(node) = self.state.lock().scope(scope) {
            node.keyed_outlet.unsubscribe(id);
        }
    }

    // ------------------------------------------------------------------
    // Reconcile
    // ------------------------------------------------------------------

    /// Bring every scope of the model up to date for `epoch`.
    pub(crate) fn reconcile(&self, epoch: Epoch) {
        let pulls: Vec<(SlotRef, Arc<dyn Producer<Value>>)> = {
            let mut state = self.state.lock();
            if state.version == Some(epoch) {
                return;
            }
            state.version = Some(epoch);
            let pending = std::mem::take(&mut state.pending_bindings);
            pending
                .into_iter()
                .filter_map(|slot| {
                    let producer = state.field(&slot)?.binding.as_ref()?.producer.clone();
                    Some((slot, producer))
                })
                .collect()
        };

        let values: Vec<(SlotRef, Value)> = pulls
            .into_iter()
            .map(|(slot, producer)| {
                producer.reconcile_output(epoch);
                (slot, producer.current_value())
            })
            .collect();

        let mut state = self.state.lock();
        let evaluated = state.run_pass(values);
        debug!(epoch, evaluated, "reconciled model");
    }
}

impl ModelState {
    fn scope(&self, id: ScopeId) -> Option<&ScopeNode> {
        self.scopes.get(id.0).and_then(Option::as_ref)
    }

    fn scope_mut(&mut self, id: ScopeId) -> Option<&mut ScopeNode> {
        self.scopes.get_mut(id.0).and_then(Option::as_mut)
    }

    fn field(&self, slot: &SlotRef) -> Option<&Field> {
        self.scope(slot.scope)?.items.get(&slot.key)
    }

    fn field_mut(&mut self, slot: &SlotRef) -> Option<&mut Field> {
        self.scope_mut(slot.scope)?.items.get_mut(&slot.key)
    }

    fn new_scope(&mut self, parent: Option<ScopeId>, key_in_parent: Option<ItemKey>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Some(ScopeNode {
            parent,
            key_in_parent,
            items: IndexMap::new(),
            next_position: 0,
            outlet: Outlet::new(),
            keyed_outlet: Outlet::new(),
        }));
        id
    }

    fn next_position(&mut self, scope: ScopeId) -> ItemKey {
        let position = match self.scope_mut(scope) {
            Some(node) => {
                node.next_position += 1;
                node.next_position - 1
            }
            None => 0,
        };
        ItemKey::Position(position)
    }

    fn owner_of(&self, scope: ScopeId, key: &ItemKey) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let node = self.scope(id)?;
            if node.items.contains_key(key) {
                return Some(id);
            }
            current = node.parent;
        }
        self.scope(scope).map(|_| scope)
    }

    // ------------------------------------------------------------------
    // Materialize and compile
    // ------------------------------------------------------------------

    fn install_record(&mut self, scope: ScopeId, record: Record, effects: &mut Effects) {
        // Materialize: nested records become child scopes, everything else
        // is placed as written.
        let mut compile: IndexMap<ItemKey, Value> = IndexMap::new();
        for item in record.into_items() {
            let (key, value) = match item {
                Item::Field { key, value } if !key.is_constant() => {
                    debug!(scope = scope.index(), ?key, "field key is not constant; leaving it unbound");
                    let position = self.next_position(scope);
                    self.place(
                        scope,
                        position,
                        Field {
                            slot: Slot::Opaque(Item::Field { key, value }),
                            updater: None,
                            binding: None,
                        },
                        effects,
                    );
                    continue;
                }
                Item::Field { key, value } => (ItemKey::Field(key), value),
                Item::Value(value @ Value::Record(_)) => (self.next_position(scope), value),
                Item::Value(value) => {
                    let position = self.next_position(scope);
                    self.place(scope, position, Field::value(value), effects);
                    continue;
                }
            };
            compile.shift_remove(&key);
            match value {
                Value::Record(record) => self.install_child(scope, key, record, effects),
                Value::Expr(_) => {
                    self.place(scope, key.clone(), Field::value(Value::Absent), effects);
                    compile.insert(key, value);
                }
                other => self.place(scope, key, Field::value(other), effects),
            }
        }

        // Compile: expression fields get an updater and start dirty.
        for (key, expr) in compile {
            trace!(scope = scope.index(), ?key, "compiled field updater");
            self.place(scope, key, Field::derived(expr), effects);
        }
    }

    fn install_child(&mut self, scope: ScopeId, key: ItemKey, record: Record, effects: &mut Effects) {
        let child = self.new_scope(Some(scope), Some(key.clone()));
        self.place(
            scope,
            key,
            Field {
                slot: Slot::Scope(child),
                updater: None,
                binding: None,
            },
            effects,
        );
        self.install_record(child, record, effects);
    }

    /// Store `field` at `key`, keeping the position of any field it replaces.
    fn place(&mut self, scope: ScopeId, key: ItemKey, field: Field, effects: &mut Effects) {
        let kind = field.kind();
        let slot = SlotRef::new(scope, key.clone());
        let old = match self.scope_mut(scope) {
            Some(node) => node.items.insert(key, field),
            None => return,
        };
        if let Some(old) = old {
            self.retire(old, effects);
        }
        self.graph.add_node(slot.clone(), kind);
        if kind == NodeKind::Source {
            self.graph.set_dependencies(&slot, std::iter::empty());
            self.graph.mark_clean(&slot);
        }
    }

    /// Install `value` at `key` and decohere its readers.
    fn write(&mut self, scope: ScopeId, key: ItemKey, value: Value, effects: &mut Effects) {
        let slot = SlotRef::new(scope, key.clone());
        let is_new = self.field(&slot).is_none();
        self.pending_bindings.shift_remove(&slot);
        match value {
            Value::Record(record) => self.install_child(scope, key, record, effects),
            Value::Expr(_) => self.place(scope, key, Field::derived(value), effects),
            other => self.place(scope, key, Field::value(other), effects),
        }
        self.changed(slot, ChangeTag::Updated, effects);
        if is_new {
            self.changed(SlotRef::keys_of(scope), ChangeTag::Updated, effects);
        }
        self.version = None;
    }

    fn changed(&mut self, slot: SlotRef, tag: ChangeTag, effects: &mut Effects) {
        for affected in self.graph.mark_changed(&slot) {
            effects.touch(affected, ChangeTag::Updated);
        }
        effects.touch(slot.clone(), tag);
        self.written.insert(slot);
    }

    /// Tear down whatever a replaced or removed field owned.
    fn retire(&mut self, field: Field, effects: &mut Effects) {
        if let Some(binding) = field.binding {
            effects.releases.push((binding.producer, binding.inlet.id));
        }
        if let Slot::Scope(child) = field.slot {
            self.drop_scope(child, effects);
        }
    }

    fn drop_scope(&mut self, id: ScopeId, effects: &mut Effects) {
        let Some(node) = self.scopes.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        for (key, field) in node.items {
            self.forget(SlotRef::new(id, key), effects);
            self.retire(field, effects);
        }
        self.forget(SlotRef::keys_of(id), effects);
    }

    fn forget(&mut self, slot: SlotRef, effects: &mut Effects) {
        for affected in self.graph.mark_changed(&slot) {
            effects.touch(affected, ChangeTag::Updated);
        }
        self.graph.remove_node(&slot);
        self.pending_bindings.shift_remove(&slot);
        self.written.insert(slot);
    }

    fn disconnect(&mut self, scope: ScopeId, effects: &mut Effects) {
        let mut stack = vec![scope];
        while let Some(id) = stack.pop() {
            let Some(node) = self.scope_mut(id) else {
                continue;
            };
            let mut unbound = Vec::new();
            for (key, field) in node.items.iter_mut() {
                if let Some(binding) = field.binding.take() {
                    effects.releases.push((binding.producer, binding.inlet.id));
                    unbound.push(SlotRef::new(id, key.clone()));
                }
                if let Slot::Scope(child) = &field.slot {
                    stack.push(*child);
                }
            }
            for slot in unbound {
                self.pending_bindings.shift_remove(&slot);
            }
        }
    }

    /// Turn touched slots into notifications for scope subscribers.
    fn notify(&self, effects: &mut Effects) {
        let touched = std::mem::take(&mut effects.touched);
        let mut scopes = IndexSet::new();
        for (slot, tag) in touched {
            let Some(node) = self.scope(slot.scope) else {
                continue;
            };
            if let ItemKey::Field(key) = &slot.key {
                for consumer in node.keyed_outlet.subscribers() {
                    effects.decohere_keys.push((consumer, key.clone(), tag));
                }
            }
            scopes.insert(slot.scope);
        }

        // An enclosing scope's value contains its children.
        let mut next = 0;
        while let Some(&id) = scopes.get_index(next) {
            next += 1;
            let Some(node) = self.scope(id) else {
                continue;
            };
            effects.decohere.extend(node.outlet.subscribers());
            let Some(parent) = node.parent else {
                continue;
            };
            if let (Some(ItemKey::Field(key)), Some(parent_node)) = (&node.key_in_parent, self.scope(parent)) {
                for consumer in parent_node.keyed_outlet.subscribers() {
                    effects.decohere_keys.push((consumer, key.clone(), ChangeTag::Updated));
                }
            }
            scopes.insert(parent);
        }
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    fn value_of(&self, slot: &SlotRef) -> Value {
        match self.field(slot).map(|field| &field.slot) {
            Some(Slot::Value(value)) => value.clone(),
            Some(Slot::Opaque(item)) => item.value().clone(),
            Some(Slot::Scope(child)) => Value::Record(self.snapshot(*child)),
            None => Value::Absent,
        }
    }

    fn snapshot(&self, scope: ScopeId) -> Record {
        let Some(node) = self.scope(scope) else {
            return Record::new();
        };
        node.items
            .keys()
            .map(|key| {
                let slot = SlotRef::new(scope, key.clone());
                self.make_item(&slot, self.value_of(&slot))
            })
            .collect()
    }

    fn make_item(&self, slot: &SlotRef, value: Value) -> Item {
        match (&slot.key, self.field(slot).map(|field| &field.slot)) {
            (ItemKey::Field(key), _) => Item::Field {
                key: key.clone(),
                value,
            },
            (_, Some(Slot::Opaque(item))) => item.clone(),
            _ => Item::Value(value),
        }
    }

    // ------------------------------------------------------------------
    // Reconcile
    // ------------------------------------------------------------------

    /// Settle every dirty slot and return how many evaluations it took.
    ///
    /// Acyclic models are settled incrementally, in dependency order. Once an
    /// evaluation reads a field that is still being evaluated, values depend
    /// on which field of the cycle went first, so the model is evaluated again
    /// in full, forcing fields in document order like a one-shot evaluation.
    /// It stays in that mode until a full pass meets no cycle.
    fn run_pass(&mut self, bound: Vec<(SlotRef, Value)>) -> usize {
        let mut changed = std::mem::take(&mut self.written);
        for (slot, value) in bound {
            let Some(field) = self.field_mut(&slot) else {
                continue;
            };
            if !matches!(&field.slot, Slot::Value(current) if *current == value) {
                field.slot = Slot::Value(value);
                changed.insert(slot);
            }
        }
        if changed.is_empty() && self.graph.dirty_count() == 0 {
            return 0;
        }

        let mut evaluated = 0;
        if !self.cyclic {
            let mut pass = Pass {
                changed: changed.clone(),
                ..Pass::default()
            };
            self.settle(&mut pass);
            evaluated += pass.evaluated;
            if !pass.cyclic {
                self.evaluations += evaluated as u64;
                return evaluated;
            }
            debug!("cycle found; evaluating the whole model");
        }

        for slot in self.document_order() {
            if self.field(&slot).is_some_and(|field| field.updater.is_some()) {
                self.graph.mark_dirty(&slot);
            }
        }
        let mut pass = Pass {
            changed,
            full: true,
            ..Pass::default()
        };
        self.settle(&mut pass);
        self.cyclic = pass.cyclic;
        evaluated += pass.evaluated;
        self.evaluations += evaluated as u64;
        evaluated
    }

    fn settle(&mut self, pass: &mut Pass) {
        let order = if pass.full {
            let mut order = self.document_order();
            order.extend(self.graph.dirty_in_order());
            order
        } else {
            self.graph.dirty_in_order()
        };
        for slot in &order {
            let freshness = self.pull(pass, slot, &IndexSet::new());
            if pass.cyclic && !pass.full {
                return;
            }
            if freshness == Freshness::Deferred {
                warn!(?slot, "pull stalled; field left stale");
            }
        }
    }

    /// Bring `slot` up to date from the top of a new pull, with `stack`
    /// still counted as being evaluated.
    ///
    /// A pull that runs deeper than `max_pull_depth` strands its readers.
    /// The field it reached is then pulled on its own, with the readers
    /// still counted as being evaluated, and the readers are pulled again.
    fn pull(&mut self, pass: &mut Pass, slot: &SlotRef, stack: &IndexSet<SlotRef>) -> Freshness {
        loop {
            pass.active = stack.clone();
            let freshness = self.ensure_fresh(pass, slot, 0);
            let stranded = pass.stranded.take();
            let aborted = pass.cyclic && !pass.full;
            match (freshness, stranded) {
                (Freshness::Deferred, Some((deep, readers))) if !aborted => {
                    trace!(?slot, ?deep, readers = readers.len(), "resuming stranded pull");
                    if self.pull(pass, &deep, &readers) == Freshness::Deferred {
                        return Freshness::Deferred;
                    }
                }
                (freshness, _) => return freshness,
            }
        }
    }

    /// Every slot, depth first in document order. A one-shot evaluation
    /// forces fields in this order.
    fn document_order(&self) -> Vec<SlotRef> {
        let mut order = Vec::new();
        for (index, node) in self.scopes.iter().enumerate() {
            if node.as_ref().is_some_and(|node| node.parent.is_none()) {
                self.collect_slots(ScopeId(index), &mut order);
            }
        }
        order
    }

    fn collect_slots(&self, scope: ScopeId, order: &mut Vec<SlotRef>) {
        let Some(node) = self.scope(scope) else {
            return;
        };
        for (key, field) in &node.items {
            order.push(SlotRef::new(scope, key.clone()));
            if let Slot::Scope(child) = field.slot {
                self.collect_slots(child, order);
            }
        }
    }

    /// Bring one slot up to date within `pass`.
    fn ensure_fresh(&mut self, pass: &mut Pass, slot: &SlotRef, depth: usize) -> Freshness {
        if pass.active.contains(slot) {
            pass.cyclic = true;
            return Freshness::Active;
        }
        let dirty = self.graph.dirty_state(slot);
        if dirty == DirtyState::Clean {
            return Freshness::Ready;
        }
        if pass.cyclic && !pass.full {
            return Freshness::Deferred;
        }
        if depth > self.max_pull_depth {
            if pass.stranded.is_none() {
                pass.stranded = Some((slot.clone(), pass.active.clone()));
            }
            return Freshness::Deferred;
        }

        pass.active.insert(slot.clone());
        let freshness = self.refresh(pass, slot, dirty, depth);
        pass.active.shift_remove(slot);
        freshness
    }

    fn refresh(&mut self, pass: &mut Pass, slot: &SlotRef, dirty: DirtyState, depth: usize) -> Freshness {
        if dirty == DirtyState::MaybeDirty {
            let dependencies: Vec<SlotRef> = self
                .graph
                .node(slot)
                .map(|node| node.dependencies().iter().cloned().collect())
                .unwrap_or_default();
            let mut stale = false;
            for dependency in &dependencies {
                match self.ensure_fresh(pass, dependency, depth + 1) {
                    Freshness::Ready => stale |= pass.changed.contains(dependency),
                    Freshness::Active => stale = true,
                    Freshness::Deferred => return Freshness::Deferred,
                }
            }
            if !stale {
                self.graph.mark_clean(slot);
                return Freshness::Ready;
            }
        }

        let Some(expr) = self.field(slot).and_then(|field| field.updater.clone()) else {
            self.graph.mark_clean(slot);
            return Freshness::Ready;
        };

        let (value, reads, deferred) = {
            let mut env = ScopeEnv {
                state: self,
                pass,
                scope: slot.scope,
                depth: depth + 1,
                reads: IndexSet::new(),
                deferred: false,
            };
            let value = evaluate(&expr, &mut env);
            (value, env.reads, env.deferred)
        };
        pass.evaluated += 1;
        trace!(?slot, reads = reads.len(), deferred, "evaluated field");

        if deferred {
            return Freshness::Deferred;
        }
        self.graph.set_dependencies(slot, reads);
        self.graph.mark_clean(slot);
        if let Some(field) = self.field_mut(slot) {
            if !matches!(&field.slot, Slot::Value(current) if *current == value) {
                field.slot = Slot::Value(value);
                pass.changed.insert(slot.clone());
            }
        }
        Freshness::Ready
    }
}

/// The environment an updater sees during a reconcile pass. Every slot it
/// touches is recorded, including names it failed to find, except fields
/// still being evaluated: those read as `Absent` and are not dependencies.
struct ScopeEnv<'a> {
    state: &'a mut ModelState,
    pass: &'a mut Pass,
    scope: ScopeId,
    depth: usize,
    reads: IndexSet<SlotRef>,
    /// Some read was deferred, so the result is incomplete.
    deferred: bool,
}

impl ScopeEnv<'_> {
    fn read(&mut self, slot: &SlotRef) -> Value {
        // Once a read is stranded the result is thrown away; force nothing more.
        if self.deferred {
            return Value::Absent;
        }
        match self.state.ensure_fresh(self.pass, slot, self.depth) {
            Freshness::Active => return Value::Absent,
            Freshness::Deferred => {
                self.deferred = true;
                return Value::Absent;
            }
            Freshness::Ready => {
                self.reads.insert(slot.clone());
            }
        }
        let child = match self.state.field(slot).map(|field| &field.slot) {
            Some(Slot::Scope(child)) => *child,
            Some(Slot::Value(value)) => return value.clone(),
            Some(Slot::Opaque(item)) => return item.value().clone(),
            None => return Value::Absent,
        };
        Value::Record(self.read_scope(child))
    }

    fn read_scope(&mut self, scope: ScopeId) -> Record {
        self.reads.insert(SlotRef::keys_of(scope));
        let keys: Vec<ItemKey> = self
            .state
            .scope(scope)
            .map(|node| node.items.keys().cloned().collect())
            .unwrap_or_default();
        keys.into_iter()
            .map(|key| {
                let slot = SlotRef::new(scope, key);
                let value = self.read(&slot);
                self.state.make_item(&slot, value)
            })
            .collect()
    }
}

impl Environment for ScopeEnv<'_> {
    fn functions(&self) -> &FunctionTable {
        &self.state.functions
    }

    fn lookup(&mut self, name: &Value) -> Value {
        let key = ItemKey::Field(name.clone());
        let mut current = Some(self.scope);
        while let Some(id) = current {
            let slot = SlotRef::new(id, key.clone());
            let Some(node) = self.state.scope(id) else {
                break;
            };
            if node.items.contains_key(&key) {
                return self.read(&slot);
            }
            current = node.parent;
            // Remember the miss so defining the name here later is noticed.
            self.reads.insert(slot);
        }
        Value::Absent
    }

    fn child(&mut self, key: &Value) -> Value {
        let key = match key.as_i64() {
            Some(index) => {
                self.reads.insert(SlotRef::keys_of(self.scope));
                let found = usize::try_from(index).ok().and_then(|index| {
                    self.state
                        .scope(self.scope)
                        .and_then(|node| node.items.get_index(index))
                        .map(|(key, _)| key.clone())
                });
                match found {
                    Some(key) => key,
                    None => return Value::Absent,
                }
            }
            None => ItemKey::Field(key.clone()),
        };
        let slot = SlotRef::new(self.scope, key);
        if self.state.field(&slot).is_none() {
            self.reads.insert(slot);
            return Value::Absent;
        }
        self.read(&slot)
    }

    fn snapshot(&mut self) -> Value {
        Value::Record(self.read_scope(self.scope))
    }
}

/// Subscription of a bound field to its external producer.
pub(crate) struct ScopeInlet {
    id: SubscriberId,
    model: Weak<Model>,
    slot: SlotRef,
}

impl Consumer for ScopeInlet {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn on_decohere(&self) {
        if let Some(model) = self.model.upgrade() {
            model.decohere_binding(&self.slot, self.id);
        }
    }

    fn reconcile_input(&self, epoch: Epoch) {
        if let Some(model) = self.model.upgrade() {
            model.reconcile(epoch);
        }
    }
}
