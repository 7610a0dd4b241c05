//! V8 backend (`v8` feature).
//!
//! `JsRuntime` is `!Send`, so each interpreter owns a dedicated thread that
//! holds the runtime and executes source snippets sent over a channel. The
//! interpreter handle itself is just the sending half and can move freely
//! between pool owners.
use crate::engine::{Diagnostic, DiagnosticLevel, EngineFault, Interpreter, ScriptEngine};
use deno_core::{JsRuntime, ModuleCodeString, RuntimeOptions};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

const PRELUDE: &str = r#"
globalThis.__aps_logs = [];
globalThis._consoleLog = function (level, args) {
  const parts = Array.prototype.map.call(args, (a) =>
    typeof a === "string" ? a : JSON.stringify(a));
  globalThis.__aps_logs.push([level, parts.join(" ")]);
};
globalThis.console = {
  log: function () { _consoleLog("debug", arguments); },
  info: function () { _consoleLog("debug", arguments); },
  warn: function () { _consoleLog("warn", arguments); },
  error: function () { _consoleLog("error", arguments); },
};
"#;

struct Exec {
    source: String,
    reply: mpsc::Sender<Result<String, EngineFault>>,
}

fn run_isolate(commands: mpsc::Receiver<Exec>) {
    let mut runtime = JsRuntime::new(RuntimeOptions::default());
    if let Err(err) = runtime.execute_script("aps:prelude", ModuleCodeString::from(PRELUDE.to_string())) {
        tracing::error!(error = %err, "v8 prelude failed");
        return;
    }
    while let Ok(Exec { source, reply }) = commands.recv() {
        let outcome = match runtime.execute_script("aps:eval", ModuleCodeString::from(source)) {
            Ok(global) => {
                let scope = &mut runtime.handle_scope();
                let local = deno_core::v8::Local::new(scope, &global);
                if local.is_undefined() {
                    Ok(String::new())
                } else {
                    Ok(local.to_rust_string_lossy(scope))
                }
            }
            Err(err) => Err(EngineFault::Exception(err.to_string())),
        };
        // caller may have given up; nothing to do then
        let _ = reply.send(outcome);
    }
}

pub struct V8Interpreter {
    commands: mpsc::Sender<Exec>,
}

impl V8Interpreter {
    fn exec(&self, source: String) -> Result<String, EngineFault> {
        let (reply, outcome) = mpsc::channel();
        self.commands
            .send(Exec { source, reply })
            .map_err(|_| EngineFault::Unavailable("isolate thread stopped".to_string()))?;
        outcome
            .recv()
            .map_err(|_| EngineFault::Unavailable("isolate thread stopped".to_string()))?
    }
}

impl Interpreter for V8Interpreter {
    fn set_global(&mut self, name: &str, value: Value) -> Result<(), EngineFault> {
        let key = serde_json::to_string(name).map_err(|e| EngineFault::NotSerializable(e.to_string()))?;
        self.exec(format!("globalThis[{}] = {}; undefined", key, value))
            .map(|_| ())
    }

    fn evaluate(&mut self, _name: &str, body: &str) -> Result<(), EngineFault> {
        self.exec(format!("{}\n;undefined", body)).map(|_| ())
    }

    fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, EngineFault> {
        let args = args
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let source = format!(
            "(function () {{ const r = {}({}); const s = JSON.stringify(r); \
             return s === undefined ? \"__aps_unserializable__\" : s; }})()",
            function, args
        );
        let raw = self.exec(source)?;
        if raw == "__aps_unserializable__" {
            return Err(EngineFault::NotSerializable(format!("{} returned undefined", function)));
        }
        serde_json::from_str(&raw).map_err(|e| EngineFault::NotSerializable(e.to_string()))
    }

    fn drain_diagnostics(&mut self) -> Vec<Diagnostic> {
        let raw = match self.exec("JSON.stringify(globalThis.__aps_logs.splice(0))".to_string()) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        serde_json::from_str::<Vec<(String, String)>>(&raw)
            .unwrap_or_default()
            .into_iter()
            .map(|(level, message)| Diagnostic {
                level: DiagnosticLevel::parse(&level),
                message,
            })
            .collect()
    }
}

#[derive(Default)]
pub struct V8Engine {
    spawned: AtomicUsize,
}

impl V8Engine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptEngine for V8Engine {
    fn name(&self) -> &str {
        "v8"
    }

    fn create(&self) -> Result<Box<dyn Interpreter>, EngineFault> {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let (commands, inbox) = mpsc::channel();
        std::thread::Builder::new()
            .name(format!("aps-v8-{}", n))
            .spawn(move || run_isolate(inbox))
            .map_err(|e| EngineFault::Unavailable(e.to_string()))?;
        Ok(Box::new(V8Interpreter { commands }))
    }
}
