use std::sync::{Arc, Mutex, MutexGuard};

use crate::ast::{Form, FormKind, NativeFn, Value};
use crate::error::CoverError;
use crate::form_to_string::form_to_string;
use crate::meta::MetaTable;
use serde::{Deserialize, Serialize};

/// Head symbol of emitted probe calls: `(clove.cover::capture line id form)`.
pub const CAPTURE_SYM: &str = "clove.cover::capture";

/// Builds the probe call that wraps one sub-form.
pub trait Probe {
    fn probe(&mut self, table: &MetaTable, line: Option<usize>, form: Form) -> Form;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeSite {
    pub id: usize,
    pub module: String,
    pub line: Option<usize>,
    /// Source text of the form before instrumentation.
    pub form: String,
}

#[derive(Debug, Default, Serialize)]
pub struct CoverageStore {
    sites: Vec<ProbeSite>,
    hits: Vec<u64>,
    #[serde(skip)]
    events: Vec<usize>,
}

pub type SharedStore = Arc<Mutex<CoverageStore>>;

impl CoverageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn register(&mut self, module: &str, line: Option<usize>, form: String) -> usize {
        let id = self.sites.len();
        self.sites.push(ProbeSite {
            id,
            module: module.to_string(),
            line,
            form,
        });
        self.hits.push(0);
        id
    }

    pub fn record(&mut self, id: usize) -> Result<(), CoverError> {
        let Some(count) = self.hits.get_mut(id) else {
            return Err(CoverError::runtime(format!("unknown probe id {}", id)));
        };
        *count += 1;
        self.events.push(id);
        Ok(())
    }

    pub fn sites(&self) -> &[ProbeSite] {
        &self.sites
    }

    pub fn site(&self, id: usize) -> Option<&ProbeSite> {
        self.sites.get(id)
    }

    pub fn hits(&self, id: usize) -> u64 {
        self.hits.get(id).copied().unwrap_or(0)
    }

    /// Probe ids in the order they fired.
    pub fn events(&self) -> &[usize] {
        &self.events
    }

    pub fn module_sites<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a ProbeSite> + 'a {
        self.sites.iter().filter(move |site| site.module == module)
    }

    pub fn to_json(&self) -> Result<String, CoverError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| CoverError::io(format!("failed to serialize coverage: {}", err)))
    }
}

pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, CoverageStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registers one site per wrapped form and emits a capture call for it.
pub struct CaptureProbe {
    module: String,
    store: SharedStore,
}

impl CaptureProbe {
    pub fn new(module: impl Into<String>, store: SharedStore) -> Self {
        Self {
            module: module.into(),
            store,
        }
    }
}

impl Probe for CaptureProbe {
    fn probe(&mut self, table: &MetaTable, line: Option<usize>, form: Form) -> Form {
        let source = table.original_of(&form).unwrap_or(&form);
        let id = lock_store(&self.store).register(&self.module, line, form_to_string(source));
        capture_call(line, id, form)
    }
}

pub fn capture_call(line: Option<usize>, id: usize, form: Form) -> Form {
    let line_form = match line {
        Some(line) => Form::synthetic(FormKind::Int(line as i64)),
        None => Form::nil(),
    };
    Form::list(vec![
        Form::symbol(CAPTURE_SYM),
        line_form,
        Form::synthetic(FormKind::Int(id as i64)),
        form,
    ])
}

/// Runtime side of the probe: records the hit and returns the form's value.
pub fn capture_native(store: SharedStore) -> Value {
    Value::Func(Arc::new(NativeFn::new(CAPTURE_SYM, move |_, args| {
        let [_line, id, value] = args else {
            return Err(CoverError::arity(format!(
                "{} expects 3 arguments, got {}",
                CAPTURE_SYM,
                args.len()
            )));
        };
        let Value::Int(id) = id else {
            return Err(CoverError::runtime(format!(
                "{} expects an integer probe id",
                CAPTURE_SYM
            )));
        };
        lock_store(&store).record(*id as usize)?;
        Ok(value.clone())
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_counts_hits_and_keeps_event_order() {
        let mut store = CoverageStore::new();
        let a = store.register("app.core", Some(1), "(f)".into());
        let b = store.register("app.core", Some(2), "x".into());
        store.record(b).unwrap();
        store.record(a).unwrap();
        store.record(b).unwrap();
        assert_eq!(store.hits(a), 1);
        assert_eq!(store.hits(b), 2);
        assert_eq!(store.events(), &[b, a, b]);
        assert!(store.record(7).is_err());
    }

    #[test]
    fn json_export_lists_sites_and_hits() {
        let mut store = CoverageStore::new();
        let id = store.register("app.core", None, "nil".into());
        store.record(id).unwrap();
        let json: serde_json::Value = serde_json::from_str(&store.to_json().unwrap()).unwrap();
        assert_eq!(json["sites"][0]["module"], "app.core");
        assert_eq!(json["sites"][0]["line"], serde_json::Value::Null);
        assert_eq!(json["hits"][0], 1);
        assert!(json.get("events").is_none());
    }
}
