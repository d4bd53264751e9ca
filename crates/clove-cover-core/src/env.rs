use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::ast::Value;

pub type EnvRef = Arc<RwLock<Env>>;

#[derive(Clone, Default)]
pub struct Env {
    data: HashMap<String, Value>,
    outer: Option<EnvRef>,
}

impl Env {
    pub fn new_child(outer: EnvRef) -> Self {
        Self {
            data: HashMap::new(),
            outer: Some(outer),
        }
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    pub fn contains_local(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.data.get(key) {
            return Some(v.clone());
        }
        self.outer
            .as_ref()
            .and_then(|outer| read_env(outer).get(key))
    }

    /// Names visible from this scope, shadowed names listed once.
    pub fn visible_names(&self) -> Vec<String> {
        let mut names = self
            .outer
            .as_ref()
            .map(|outer| read_env(outer).visible_names())
            .unwrap_or_default();
        for key in self.data.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
        names
    }
}

pub fn new_ref(env: Env) -> EnvRef {
    Arc::new(RwLock::new(env))
}

pub fn child_of(outer: &EnvRef) -> EnvRef {
    new_ref(Env::new_child(outer.clone()))
}

pub(crate) fn read_env(env: &EnvRef) -> std::sync::RwLockReadGuard<'_, Env> {
    env.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write_env(env: &EnvRef) -> std::sync::RwLockWriteGuard<'_, Env> {
    env.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
