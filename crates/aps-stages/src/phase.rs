//! Phase trait and runner
//!
//! A phase is a fixed, ordered set of scripts plus one entry function. The
//! runner checks out a context, loads the scripts, optionally evaluates a
//! site middleware script, calls the entry with positional arguments and
//! records a proof (input/output fingerprints and latency).
use aps_core::pool::ContextPool;
use aps_core::script::{functions, Script, ScriptResolver};
use aps_core::{ApsError, ApsResult};
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;

pub trait Phase: Send + Sync {
    /// Short name used in logs, proofs and evaluation errors
    fn id(&self) -> &'static str;

    /// Scripts loaded into the context, in order.
    fn scripts(&self) -> &'static [&'static str];

    fn entry(&self) -> &'static str {
        functions::GENERATE
    }

    /// Optional site script evaluated after `scripts` and right before the call.
    fn middleware(&self) -> Option<&'static str> {
        None
    }

    fn deterministic(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseProof {
    pub id: String,
    pub in_hash: String,
    pub out_hash: String,
    pub deterministic: bool,
    pub latency_ms: u64,
    pub context_id: u64,
    pub middleware: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutput {
    pub value: Value,
    pub proof: PhaseProof,
}

pub fn hash_json(value: &Value) -> String {
    // Value maps are ordered, so equal values always hash equal
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    format!("blake3:{}", blake3::hash(&bytes))
}

#[derive(Clone)]
pub struct PhaseRunner {
    pool: ContextPool,
    scripts: ScriptResolver,
}

impl PhaseRunner {
    pub fn new(pool: ContextPool, scripts: ScriptResolver) -> Self {
        Self { pool, scripts }
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    pub async fn run(&self, phase: &dyn Phase, args: Vec<Value>, trace_id: &str) -> ApsResult<PhaseOutput> {
        let phase_id = phase.id();
        let scripts = self.scripts.resolve_all(phase.scripts())?;
        let middleware: Option<Script> = match phase.middleware() {
            Some(name) => self.scripts.resolve(name)?,
            None => None,
        };
        let has_middleware = middleware.is_some();
        if has_middleware {
            tracing::info!(trace_id, phase = phase_id, "evaluating middleware");
        }

        let in_hash = hash_json(&Value::Array(args.clone()));
        let entry = phase.entry();
        let start = Instant::now();

        let outcome = self
            .pool
            .with_context(move |ctx| {
                ctx.evaluate_batch(&scripts)?;
                if let Some(middleware) = &middleware {
                    ctx.evaluate(middleware)
                        .map_err(|fault| (middleware.file_name().to_string(), fault))?;
                }
                let value = ctx.call(entry, &args).map_err(|fault| {
                    let script = ctx.current_script().unwrap_or("unknown").to_string();
                    (script, fault)
                })?;
                Ok::<_, (String, aps_core::EngineFault)>((value, ctx.id()))
            })
            .await?;

        let (value, context_id) = outcome.map_err(|(script, fault)| {
            tracing::error!(trace_id, phase = phase_id, script = %script, error = %fault, "phase failed");
            ApsError::Evaluation {
                phase: phase_id.to_string(),
                script,
                message: fault.to_string(),
            }
        })?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let proof = PhaseProof {
            id: phase_id.to_string(),
            in_hash,
            out_hash: hash_json(&value),
            deterministic: phase.deterministic(),
            latency_ms,
            context_id,
            middleware: has_middleware,
        };
        tracing::debug!(trace_id, phase = phase_id, latency_ms, context_id, "phase complete");

        Ok(PhaseOutput { value, proof })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aps_core::mock::MockEngine;
    use aps_core::script::MemoryScriptStore;
    use aps_core::PoolConfig;
    use serde_json::json;
    use std::sync::Arc;

    struct Echo;

    impl Phase for Echo {
        fn id(&self) -> &'static str {
            "echo"
        }

        fn scripts(&self) -> &'static [&'static str] {
            &["prepare/log.js", "prepare/echo.js"]
        }
    }

    fn runner(engine: &MockEngine, bundled: MemoryScriptStore) -> PhaseRunner {
        let pool = ContextPool::new(Arc::new(engine.clone()), PoolConfig::default());
        let scripts = ScriptResolver::new(Arc::new(MemoryScriptStore::new()), Arc::new(bundled));
        PhaseRunner::new(pool, scripts)
    }

    fn bundle() -> MemoryScriptStore {
        MemoryScriptStore::new()
            .with("prepare/log.js", "")
            .with("prepare/echo.js", "")
    }

    #[tokio::test]
    async fn output_and_proof_hashes_are_stable() {
        let engine = MockEngine::new();
        engine.handle("prepare/echo.js", "generate", |args, _| Ok(json!({ "seen": args })));
        let runner = runner(&engine, bundle());

        let first = runner.run(&Echo, vec![json!(1), json!("a")], "t").await.unwrap();
        let second = runner.run(&Echo, vec![json!(1), json!("a")], "t").await.unwrap();
        assert_eq!(first.value, json!({ "seen": [1, "a"] }));
        assert_eq!(first.proof.in_hash, second.proof.in_hash);
        assert_eq!(first.proof.out_hash, second.proof.out_hash);
        assert!(first.proof.in_hash.starts_with("blake3:"));
    }

    #[tokio::test]
    async fn missing_script_is_reported_before_any_evaluation() {
        let engine = MockEngine::new();
        let runner = runner(&engine, MemoryScriptStore::new().with("prepare/log.js", ""));
        let err = runner.run(&Echo, vec![], "t").await.unwrap_err();
        assert_eq!(err, ApsError::ScriptNotFound("prepare/echo.js".to_string()));
        assert_eq!(engine.created(), 0);
    }

    #[tokio::test]
    async fn script_exception_names_phase_and_script() {
        let engine = MockEngine::new();
        engine.raise("prepare/echo.js", "generate", "TypeError: x is undefined");
        let runner = runner(&engine, bundle());
        match runner.run(&Echo, vec![], "t").await {
            Err(ApsError::Evaluation { phase, script, message }) => {
                assert_eq!(phase, "echo");
                assert_eq!(script, "echo.js");
                assert!(message.contains("TypeError"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let stats = runner.pool().stats();
        assert_eq!(stats.acquired, stats.released);
    }
}
