//! Scriptable stand-in interpreter for tests and offline runs.
//!
//! Functions are registered per `(script name, function)`. Evaluating a script
//! with registrations (re)defines those functions in that interpreter, so a
//! later script can shadow an earlier one's `generate` the same way globals
//! behave in a real engine.
//!
//! Script bodies may be a JSON object with these directives:
//!
//! * `"globals": {..}` merged into the interpreter's globals
//! * `"log": "text"` or `["a", "b"]` recorded as debug diagnostics
//! * `"fail": "message"` makes evaluation raise
//!
//! Anything that is not a JSON object is accepted and ignored.
use crate::engine::{Diagnostic, DiagnosticLevel, EngineFault, Interpreter, ScriptEngine};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

pub type Handler = Arc<dyn Fn(&[Value], &Map<String, Value>) -> Result<Value, EngineFault> + Send + Sync>;

/// One recorded call to a defined function.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub function: String,
    /// Script whose evaluation defined the function
    pub script: String,
    pub args: Vec<Value>,
    pub globals: Map<String, Value>,
    /// Every script evaluated in this interpreter so far, in order
    pub loaded: Vec<String>,
    pub interpreter: usize,
}

#[derive(Default)]
struct MockState {
    handlers: RwLock<HashMap<(String, String), Handler>>,
    calls: Mutex<Vec<MockCall>>,
    delay: RwLock<Option<Duration>>,
    created: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle<F>(&self, script: &str, function: &str, handler: F) -> &Self
    where
        F: Fn(&[Value], &Map<String, Value>) -> Result<Value, EngineFault> + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.state.handlers.write() {
            handlers.insert((script.to_string(), function.to_string()), Arc::new(handler));
        }
        self
    }

    /// Registers a function that always returns `value`.
    pub fn respond(&self, script: &str, function: &str, value: Value) -> &Self {
        self.handle(script, function, move |_, _| Ok(value.clone()))
    }

    pub fn raise(&self, script: &str, function: &str, message: &str) -> &Self {
        let message = message.to_string();
        self.handle(script, function, move |_, _| Err(EngineFault::Exception(message.clone())))
    }

    /// Every call sleeps this long, so tests can observe overlap.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.state.delay.write() {
            *slot = Some(delay);
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn calls_to(&self, script: &str) -> Vec<MockCall> {
        self.calls().into_iter().filter(|c| c.script == script).collect()
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were running at the same moment.
    pub fn max_concurrent_calls(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }

    fn handler(&self, script: &str, function: &str) -> Option<Handler> {
        self.state
            .handlers
            .read()
            .ok()?
            .get(&(script.to_string(), function.to_string()))
            .cloned()
    }

    fn functions_defined_by(&self, script: &str) -> Vec<String> {
        self.state
            .handlers
            .read()
            .map(|handlers| {
                handlers
                    .keys()
                    .filter(|(s, _)| s == script)
                    .map(|(_, f)| f.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ScriptEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn create(&self) -> Result<Box<dyn Interpreter>, EngineFault> {
        let id = self.state.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MockInterpreter {
            id,
            engine: self.clone(),
            globals: Map::new(),
            loaded: Vec::new(),
            defined: HashMap::new(),
            diagnostics: Vec::new(),
        }))
    }
}

pub struct MockInterpreter {
    id: usize,
    engine: MockEngine,
    globals: Map<String, Value>,
    loaded: Vec<String>,
    /// function name -> script that last defined it
    defined: HashMap<String, String>,
    diagnostics: Vec<Diagnostic>,
}

impl MockInterpreter {
    fn apply_directives(&mut self, body: &str) -> Result<(), EngineFault> {
        let directives = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => map,
            _ => return Ok(()),
        };
        match directives.get("log") {
            Some(Value::String(line)) => self.diagnostics.push(Diagnostic::debug(line.clone())),
            Some(Value::Array(lines)) => self.diagnostics.extend(
                lines
                    .iter()
                    .filter_map(Value::as_str)
                    .map(Diagnostic::debug),
            ),
            _ => {}
        }
        if let Some(Value::String(line)) = directives.get("warn") {
            self.diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Warn,
                message: line.clone(),
            });
        }
        if let Some(Value::Object(globals)) = directives.get("globals") {
            for (key, value) in globals {
                self.globals.insert(key.clone(), value.clone());
            }
        }
        if let Some(fail) = directives.get("fail") {
            let message = fail.as_str().map(str::to_string).unwrap_or_else(|| fail.to_string());
            return Err(EngineFault::Exception(message));
        }
        Ok(())
    }
}

impl Interpreter for MockInterpreter {
    fn set_global(&mut self, name: &str, value: Value) -> Result<(), EngineFault> {
        self.globals.insert(name.to_string(), value);
        Ok(())
    }

    fn evaluate(&mut self, name: &str, body: &str) -> Result<(), EngineFault> {
        self.apply_directives(body)?;
        self.loaded.push(name.to_string());
        for function in self.engine.functions_defined_by(name) {
            self.defined.insert(function, name.to_string());
        }
        Ok(())
    }

    fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, EngineFault> {
        let script = self
            .defined
            .get(function)
            .cloned()
            .ok_or_else(|| EngineFault::Exception(format!("ReferenceError: {} is not defined", function)))?;
        let handler = self
            .engine
            .handler(&script, function)
            .ok_or_else(|| EngineFault::Exception(format!("TypeError: {} is not a function", function)))?;

        if let Ok(mut calls) = self.engine.state.calls.lock() {
            calls.push(MockCall {
                function: function.to_string(),
                script: script.clone(),
                args: args.to_vec(),
                globals: self.globals.clone(),
                loaded: self.loaded.clone(),
                interpreter: self.id,
            });
        }

        let state = &self.engine.state;
        let live = state.live.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_live.fetch_max(live, Ordering::SeqCst);
        let delay = state.delay.read().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let result = handler(args, &self.globals);
        state.live.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn drain_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_script_shadows_earlier_definition() {
        let engine = MockEngine::new();
        engine
            .respond("prepare/iob.js", "generate", json!("iob"))
            .respond("prepare/meal.js", "generate", json!("meal"));
        let mut interp = engine.create().unwrap();

        interp.evaluate("prepare/iob.js", "").unwrap();
        assert_eq!(interp.call("generate", &[]).unwrap(), json!("iob"));
        interp.evaluate("prepare/meal.js", "").unwrap();
        assert_eq!(interp.call("generate", &[]).unwrap(), json!("meal"));
    }

    #[test]
    fn undefined_function_raises() {
        let engine = MockEngine::new();
        let mut interp = engine.create().unwrap();
        let err = interp.call("generate", &[]).unwrap_err();
        assert!(err.to_string().contains("not defined"));
    }

    #[test]
    fn directives_set_globals_log_and_fail() {
        let engine = MockEngine::new();
        let mut interp = engine.create().unwrap();
        interp
            .evaluate("a.js", r#"{"globals": {"x": 1}, "log": ["one", "two"]}"#)
            .unwrap();
        assert_eq!(interp.drain_diagnostics().len(), 2);
        assert!(interp.drain_diagnostics().is_empty());
        assert!(interp.evaluate("b.js", r#"{"fail": "SyntaxError"}"#).is_err());
    }

    #[test]
    fn calls_record_arguments_and_globals() {
        let engine = MockEngine::new();
        engine.handle("p.js", "generate", |args, _| Ok(args[0].clone()));
        let mut interp = engine.create().unwrap();
        interp.set_global("scriptName", json!("p.js")).unwrap();
        interp.evaluate("p.js", "function generate(x) { return x }").unwrap();
        assert_eq!(interp.call("generate", &[json!(7)]).unwrap(), json!(7));

        let calls = engine.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].globals["scriptName"], json!("p.js"));
        assert_eq!(calls[0].loaded, vec!["p.js".to_string()]);
    }
}
