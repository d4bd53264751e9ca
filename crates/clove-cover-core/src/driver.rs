use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ast::{Form, Value};
use crate::error::CoverError;
use crate::eval::Evaluator;
use crate::form_to_string::{form_to_string, forms_to_string};
use crate::meta::MetaTable;
use crate::options::CoverOptions;
use crate::probe::{capture_native, CaptureProbe, CoverageStore, SharedStore, CAPTURE_SYM};
use crate::reader::{Reader, ReaderOptions};
use crate::wrap::Wrapper;
use tracing::{debug, info};

thread_local! {
    static CURRENT_MODULE: RefCell<Option<String>> = RefCell::new(None);
}

pub fn set_current_module(name: Option<String>) {
    CURRENT_MODULE.with(|cell| {
        *cell.borrow_mut() = name;
    });
}

/// Module being instrumented on this thread, if any.
pub fn current_module() -> Option<String> {
    CURRENT_MODULE.with(|cell| cell.borrow().clone())
}

/// Marks a module as current until dropped, then restores the previous marker.
pub struct ModuleGuard {
    previous: Option<String>,
}

impl ModuleGuard {
    pub fn enter(module: &str) -> Self {
        let previous = current_module();
        set_current_module(Some(module.to_string()));
        Self { previous }
    }
}

impl Drop for ModuleGuard {
    fn drop(&mut self) {
        set_current_module(self.previous.take());
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '!' | '?' | '*' | '+' | '<' | '>' | '=')
}

pub fn validate_module_id(id: &str) -> Result<(), CoverError> {
    let invalid = |why: &str| CoverError::invalid_module(format!("{:?} {}", id, why));
    if id.trim().is_empty() {
        return Err(invalid("is empty"));
    }
    for segment in id.split('.') {
        let Some(first) = segment.chars().next() else {
            return Err(invalid("has an empty segment"));
        };
        if first.is_ascii_digit() {
            return Err(invalid("has a segment starting with a digit"));
        }
        if let Some(bad) = segment.chars().find(|c| !is_symbol_char(*c)) {
            return Err(invalid(&format!("contains {:?}", bad)));
        }
        if segment.split('-').any(str::is_empty) {
            return Err(invalid("has an empty hyphen-delimited part"));
        }
    }
    Ok(())
}

/// Relative resource path for a module: `app.my-lib` becomes `app/my_lib.clv`.
pub fn module_path(id: &str, suffix: &str) -> PathBuf {
    let mut path: PathBuf = id.replace('-', "_").split('.').collect();
    path.set_extension(suffix);
    path
}

#[derive(Debug)]
pub struct ModuleOutput {
    pub module: String,
    pub path: Option<PathBuf>,
    /// Rewritten top-level forms in source order.
    pub forms: Vec<Form>,
    pub values: Vec<Value>,
}

pub struct Driver {
    options: CoverOptions,
    store: SharedStore,
    evaluator: Evaluator,
}

impl Driver {
    pub fn new(options: CoverOptions) -> Self {
        let store = CoverageStore::shared();
        let evaluator = Evaluator::new();
        evaluator.define(CAPTURE_SYM, capture_native(store.clone()));
        Self {
            options,
            store,
            evaluator,
        }
    }

    pub fn options(&self) -> &CoverOptions {
        &self.options
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn resolve_module(&self, id: &str) -> Result<PathBuf, CoverError> {
        validate_module_id(id)?;
        let relative = module_path(id, &self.options.suffix);
        self.options
            .source_roots
            .iter()
            .map(|root| root.join(&relative))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                let searched: Vec<String> = self
                    .options
                    .source_roots
                    .iter()
                    .map(|root| root.display().to_string())
                    .collect();
                CoverError::io(format!(
                    "module {} not found as {} (searched: {})",
                    id,
                    relative.display(),
                    searched.join(", ")
                ))
                .with_module(Some(id.to_string()))
            })
    }

    pub fn instrument_module(&self, id: &str) -> Result<ModuleOutput, CoverError> {
        let path = self.resolve_module(id)?;
        let source = fs::read_to_string(&path).map_err(|err| {
            CoverError::io(format!("failed to read {}: {}", path.display(), err))
                .with_module(Some(id.to_string()))
        })?;
        self.run(id, &source, Some(path))
    }

    pub fn instrument_source(&self, id: &str, source: &str) -> Result<ModuleOutput, CoverError> {
        validate_module_id(id)?;
        self.run(id, source, None)
    }

    fn run(
        &self,
        module: &str,
        source: &str,
        path: Option<PathBuf>,
    ) -> Result<ModuleOutput, CoverError> {
        let _guard = ModuleGuard::enter(module);
        let source_name = match &path {
            Some(path) => path.display().to_string(),
            None => module_path(module, &self.options.suffix).display().to_string(),
        };
        let in_module = |err: CoverError| err.with_module(Some(module.to_string()));
        let mut reader = Reader::new_with_options(
            source,
            ReaderOptions::default().with_source_name(Some(source_name)),
        );
        let mut table = MetaTable::new();
        let mut probe = CaptureProbe::new(module, self.store.clone());
        let mut output = ModuleOutput {
            module: module.to_string(),
            path,
            forms: Vec::new(),
            values: Vec::new(),
        };
        while let Some(form) = reader.read_next(&mut table).map_err(in_module)? {
            let original = form_to_string(&form);
            let wrapped = Wrapper::new(&mut probe, &mut table)
                .strict(self.options.strict)
                .wrap(None, form)
                .map_err(|err| in_module(err.with_form(original.clone())))?;
            let rewritten = form_to_string(&wrapped);
            debug!(module, form = %original, "instrumented top-level form");
            let value = self
                .eval_top(&wrapped)
                .map_err(|err| in_module(CoverError::eval(&err, original, rewritten)))?;
            output.forms.push(wrapped);
            output.values.push(value);
        }
        info!(module, forms = output.forms.len(), "module instrumented");
        if let Some(dir) = &self.options.dump_dir {
            self.write_dump(dir, module, &output.forms).map_err(in_module)?;
        }
        Ok(output)
    }

    fn eval_top(&self, form: &Form) -> Result<Value, CoverError> {
        match self.evaluator.eval_top(form) {
            Err(err) if err.is_recur_signal() => Err(CoverError::runtime(
                "recur is only allowed within loop or function bodies",
            )
            .with_opt_span(form.span)),
            other => other,
        }
    }

    fn write_dump(&self, dir: &Path, module: &str, forms: &[Form]) -> Result<(), CoverError> {
        fs::create_dir_all(dir)?;
        let target = dir.join(format!("{}.{}", module, self.options.suffix));
        fs::write(&target, forms_to_string(forms)).map_err(|err| {
            CoverError::io(format!("failed to write {}: {}", target.display(), err))
        })?;
        debug!(module, path = %target.display(), "wrote instrumented dump");
        Ok(())
    }
}
