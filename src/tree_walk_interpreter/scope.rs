use super::{Record, Value};
use colored::Colorize;
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};
use strum::Display;

pub type ScopeRef = Rc<RefCell<Scope>>;

/// Who created a scope, and so who is allowed to destroy it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScopeKind {
    Global,
    Statement,
    Function,
    BodyLocal,
}

#[derive(Debug)]
pub struct Scope {
    kind: ScopeKind,
    values: HashMap<String, Value>,
    parent: Option<ScopeRef>,
}
impl Scope {
    pub fn wrap(self) -> ScopeRef {
        Rc::new(RefCell::new(self))
    }
    pub fn global() -> Self {
        Self {
            kind: ScopeKind::Global,
            values: HashMap::new(),
            parent: None,
        }
    }
    pub fn new_with_parent(kind: ScopeKind, parent: ScopeRef) -> Self {
        Self {
            kind,
            values: HashMap::new(),
            parent: Some(parent),
        }
    }
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }
    /// Binds `name` here, replacing any binding this scope already has.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.borrow().get(name))
        })
    }
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }
    /// This scope's own bindings, in name order.
    pub fn snapshot(&self) -> Record {
        Record::new(
            self.values
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScopeStats {
    pushes: [usize; 4],
    pops: [usize; 4],
    max_depth: usize,
}
impl ScopeStats {
    pub fn pushes(&self, kind: ScopeKind) -> usize {
        self.pushes[kind as usize]
    }
    pub fn pops(&self, kind: ScopeKind) -> usize {
        self.pops[kind as usize]
    }
    /// Deepest nesting reached above the top-level scope.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
    pub fn is_balanced(&self) -> bool {
        self.pushes == self.pops
    }
}

/// The active scope chain. The top-level scope sits underneath and is never
/// popped by evaluation; `finish` tears it down.
#[derive(Debug)]
pub struct ScopeStack {
    global: ScopeRef,
    frames: Vec<ScopeRef>,
    stats: ScopeStats,
}
impl ScopeStack {
    pub fn new() -> Self {
        let mut stack = Self {
            global: Scope::global().wrap(),
            frames: Vec::new(),
            stats: ScopeStats::default(),
        };
        stack.record_push(ScopeKind::Global);
        stack
    }
    pub fn current(&self) -> &ScopeRef {
        self.frames.last().unwrap_or(&self.global)
    }
    pub fn global(&self) -> &ScopeRef {
        &self.global
    }
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
    pub fn stats(&self) -> &ScopeStats {
        &self.stats
    }
    pub fn push(&mut self, kind: ScopeKind, parent: ScopeRef) {
        self.frames
            .push(Scope::new_with_parent(kind, parent).wrap());
        self.stats.max_depth = self.stats.max_depth.max(self.frames.len());
        self.record_push(kind);
    }
    pub fn pop(&mut self) -> Option<ScopeRef> {
        let popped = self.frames.pop()?;
        let kind = popped.borrow().kind();
        self.record_pop(kind);
        Some(popped)
    }
    pub fn finish(mut self) -> ScopeStats {
        while self.pop().is_some() {}
        self.record_pop(ScopeKind::Global);
        self.stats
    }
    fn record_push(&mut self, kind: ScopeKind) {
        self.stats.pushes[kind as usize] += 1;
        if cfg!(feature = "debug_scopes") {
            eprintln!(
                "{} push {} depth={}",
                "[scope]".dimmed(),
                kind.to_string().green(),
                self.frames.len()
            );
        }
    }
    fn record_pop(&mut self, kind: ScopeKind) {
        self.stats.pops[kind as usize] += 1;
        if cfg!(feature = "debug_scopes") {
            eprintln!(
                "{} pop {} depth={}",
                "[scope]".dimmed(),
                kind.to_string().red(),
                self.frames.len()
            );
        }
    }
}
impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_walks_parents() {
        let global = Scope::global().wrap();
        global.borrow_mut().define("a", 1.into());
        let mut inner = Scope::new_with_parent(ScopeKind::Statement, global.clone());
        inner.define("b", 2.into());
        assert_eq!(inner.get("a"), Some(1.into()));
        assert_eq!(inner.get("b"), Some(2.into()));
        assert_eq!(inner.get_local("a"), None);
        assert_eq!(global.borrow().get("b"), None);
    }

    #[test]
    fn inner_definitions_shadow() {
        let global = Scope::global().wrap();
        global.borrow_mut().define("a", 1.into());
        let mut inner = Scope::new_with_parent(ScopeKind::Function, global.clone());
        inner.define("a", 2.into());
        assert_eq!(inner.get("a"), Some(2.into()));
        assert_eq!(global.borrow().get("a"), Some(1.into()));
    }

    #[test]
    fn snapshot_holds_only_own_bindings() {
        let global = Scope::global().wrap();
        global.borrow_mut().define("outer", 1.into());
        let mut inner = Scope::new_with_parent(ScopeKind::Statement, global);
        inner.define("b", 2.into());
        inner.define("a", 3.into());
        assert_eq!(format!("{:?}", inner.snapshot()), "{a: 3, b: 2}");
    }

    #[test]
    fn stack_counts_pushes_and_pops() {
        let mut stack = ScopeStack::new();
        let parent = stack.current().clone();
        stack.push(ScopeKind::Statement, parent);
        let parent = stack.current().clone();
        stack.push(ScopeKind::Function, parent);
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.current().borrow().kind(), ScopeKind::Function);
        stack.pop();
        stack.pop();
        assert!(stack.pop().is_none());
        assert_eq!(stack.current().borrow().kind(), ScopeKind::Global);

        let stats = stack.finish();
        assert!(stats.is_balanced());
        assert_eq!(stats.pushes(ScopeKind::Statement), 1);
        assert_eq!(stats.pops(ScopeKind::Global), 1);
        assert_eq!(stats.max_depth(), 2);
    }
}
