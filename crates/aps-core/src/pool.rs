//! Execution Context Pool
//!
//! A bounded set of isolated interpreters. A context is either idle (owned by
//! the pool) or checked out (owned by exactly one [`PooledContext`] guard).
//! The idle list is the only state behind a lock; evaluation always happens
//! outside of it, on the guard's owner.
//!
//! Contexts are created lazily up to `capacity` and are never destroyed while
//! the pool lives. When every context is checked out, `acquire` waits up to
//! `acquire_timeout`; after that it either fails with
//! [`ApsError::PoolExhausted`] or, with [`OverflowPolicy::Grow`], builds a
//! fresh transient context instead of stalling the run.
use crate::diagnostics;
use crate::engine::{EngineFault, Interpreter, ScriptEngine};
use crate::error::{ApsError, ApsResult};
use crate::script::Script;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Fail the acquisition once the timeout elapses
    Block,
    /// Build a transient context once the timeout elapses
    Grow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub capacity: usize,
    #[serde(with = "duration_ms")]
    pub acquire_timeout: Duration,
    pub overflow: OverflowPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            acquire_timeout: Duration::from_secs(10),
            overflow: OverflowPolicy::Block,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub created: usize,
    pub idle: usize,
    pub checked_out: usize,
    pub high_water: usize,
    pub acquired: u64,
    pub released: u64,
    pub overflow_created: u64,
}

// ============================================================================
// SCRIPT CONTEXT
// ============================================================================

/// One isolated interpreter plus the name of the script currently running in it.
pub struct ScriptContext {
    id: u64,
    interpreter: Box<dyn Interpreter>,
    current_script: Option<String>,
}

impl ScriptContext {
    fn new(id: u64, interpreter: Box<dyn Interpreter>) -> Self {
        Self {
            id,
            interpreter,
            current_script: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn current_script(&self) -> Option<&str> {
        self.current_script.as_deref()
    }

    pub fn evaluate(&mut self, script: &Script) -> Result<(), EngineFault> {
        let tag = script.file_name().to_string();
        self.interpreter
            .set_global("scriptName", Value::String(tag.clone()))?;
        self.current_script = Some(tag);
        let result = self.interpreter.evaluate(script.name(), script.body());
        self.flush_diagnostics();
        result
    }

    /// Evaluates in order, stopping at the first fault. The error carries
    /// the failing script's name.
    pub fn evaluate_batch(&mut self, scripts: &[Script]) -> Result<(), (String, EngineFault)> {
        for script in scripts {
            self.evaluate(script)
                .map_err(|fault| (script.file_name().to_string(), fault))?;
        }
        Ok(())
    }

    pub fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, EngineFault> {
        let result = self.interpreter.call(function, args);
        self.flush_diagnostics();
        result
    }

    fn flush_diagnostics(&mut self) {
        let drained = self.interpreter.drain_diagnostics();
        if drained.is_empty() {
            return;
        }
        let tag = self.current_script.as_deref().unwrap_or("unknown");
        diagnostics::route(tag, drained);
    }
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptContext")
            .field("id", &self.id)
            .field("current_script", &self.current_script)
            .finish()
    }
}

// ============================================================================
// POOL
// ============================================================================

struct PoolShared {
    engine: Arc<dyn ScriptEngine>,
    config: PoolConfig,
    idle: Mutex<Vec<ScriptContext>>,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
    created: AtomicUsize,
    checked_out: AtomicUsize,
    high_water: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
    overflow_created: AtomicU64,
}

impl PoolShared {
    fn idle(&self) -> MutexGuard<'_, Vec<ScriptContext>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create_context(&self) -> ApsResult<ScriptContext> {
        let interpreter = self
            .engine
            .create()
            .map_err(|fault| ApsError::PoolExhausted(format!("creating context: {}", fault)))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(context_id = id, engine = self.engine.name(), "created script context");
        Ok(ScriptContext::new(id, interpreter))
    }

    fn give_back(&self, context: ScriptContext) {
        let mut idle = self.idle();
        if idle.len() < self.config.capacity {
            idle.push(context);
        } else {
            tracing::debug!(context_id = context.id(), "dropping transient overflow context");
        }
    }
}

#[derive(Clone)]
pub struct ContextPool {
    shared: Arc<PoolShared>,
}

impl ContextPool {
    pub fn new(engine: Arc<dyn ScriptEngine>, config: PoolConfig) -> Self {
        let capacity = config.capacity.max(1);
        let config = PoolConfig { capacity, ..config };
        Self {
            shared: Arc::new(PoolShared {
                engine,
                idle: Mutex::new(Vec::with_capacity(capacity)),
                permits: Arc::new(Semaphore::new(capacity)),
                config,
                next_id: AtomicU64::new(1),
                created: AtomicUsize::new(0),
                checked_out: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
                overflow_created: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Pre-creates idle contexts up to `count` (bounded by capacity).
    pub fn warm(&self, count: usize) -> ApsResult<usize> {
        let target = count.min(self.shared.config.capacity);
        let mut made = 0;
        while self.shared.created.load(Ordering::Relaxed) < target {
            let context = self.shared.create_context()?;
            self.shared.idle().push(context);
            made += 1;
        }
        Ok(made)
    }

    pub async fn acquire(&self) -> ApsResult<PooledContext> {
        let shared = &self.shared;
        let waited = tokio::time::timeout(
            shared.config.acquire_timeout,
            Arc::clone(&shared.permits).acquire_owned(),
        )
        .await;

        let permit = match waited {
            Ok(Ok(permit)) => Some(permit),
            Ok(Err(_)) => return Err(ApsError::PoolExhausted("pool is closed".to_string())),
            Err(_) => match shared.config.overflow {
                OverflowPolicy::Block => {
                    tracing::warn!(
                        timeout_ms = shared.config.acquire_timeout.as_millis() as u64,
                        capacity = shared.config.capacity,
                        "script context acquisition timed out"
                    );
                    return Err(ApsError::PoolExhausted(format!(
                        "no script context available after {} ms",
                        shared.config.acquire_timeout.as_millis()
                    )));
                }
                OverflowPolicy::Grow => {
                    tracing::warn!("script pool saturated; building a transient context");
                    shared.overflow_created.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
        };

        let reused = shared.idle().pop();
        let context = match reused {
            Some(context) => context,
            None => shared.create_context()?,
        };

        let now_out = shared.checked_out.fetch_add(1, Ordering::SeqCst) + 1;
        shared.high_water.fetch_max(now_out, Ordering::SeqCst);
        shared.acquired.fetch_add(1, Ordering::Relaxed);

        Ok(PooledContext {
            context: Some(context),
            permit,
            shared: Arc::clone(shared),
        })
    }

    /// Returns a context to the idle set. Dropping the guard does the same.
    pub fn release(&self, context: PooledContext) {
        drop(context);
    }

    /// Acquires a context, runs `work` on the blocking pool and releases the
    /// context on every exit path, including a panic inside `work` or the
    /// caller abandoning the future.
    pub async fn with_context<F, T>(&self, work: F) -> ApsResult<T>
    where
        F: FnOnce(&mut ScriptContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.acquire().await?;
        tokio::task::spawn_blocking(move || work(guard.context_mut()))
            .await
            .map_err(|err| ApsError::Cancelled(format!("script task aborted: {}", err)))
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            capacity: shared.config.capacity,
            created: shared.created.load(Ordering::Relaxed),
            idle: shared.idle().len(),
            checked_out: shared.checked_out.load(Ordering::SeqCst),
            high_water: shared.high_water.load(Ordering::SeqCst),
            acquired: shared.acquired.load(Ordering::Relaxed),
            released: shared.released.load(Ordering::Relaxed),
            overflow_created: shared.overflow_created.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive ownership of one context; returns it to the pool on drop.
pub struct PooledContext {
    context: Option<ScriptContext>,
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for PooledContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledContext").field("id", &self.id()).finish_non_exhaustive()
    }
}

impl PooledContext {
    pub fn context_mut(&mut self) -> &mut ScriptContext {
        self.context
            .as_mut()
            .unwrap_or_else(|| unreachable!("context is only taken on drop"))
    }

    pub fn id(&self) -> u64 {
        self.context.as_ref().map(ScriptContext::id).unwrap_or_default()
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.shared.give_back(context);
        }
        self.shared.checked_out.fetch_sub(1, Ordering::SeqCst);
        self.shared.released.fetch_add(1, Ordering::Relaxed);
        // permit goes last so a waiter always finds the context idle
        drop(self.permit.take());
    }
}
