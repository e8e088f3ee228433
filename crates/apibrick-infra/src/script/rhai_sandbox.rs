//! Rhai-backed script sandbox.
//!
//! Every execution builds a fresh [`rhai::Engine`] on the blocking pool,
//! behind a semaphore sized by the configured worker count. The engine:
//!
//! - has no module resolver, so `import` cannot reach the filesystem;
//! - has `eval` disabled;
//! - caps string, array and map sizes from the memory ceiling, plus call and
//!   expression depth;
//! - checks a deadline and an abort flag from its progress callback, so a
//!   run abandoned by the async timeout stops burning its thread.
//!
//! `print` and `debug` output goes to `tracing` under `apibrick::script`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use apibrick_core::script::ScriptEngine;
use apibrick_types::{ValueMap, duration_ms};
use apibrick_types::config::ScriptSettings;
use apibrick_types::script::{ScriptError, ScriptLimits};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, Map, Scope};
use serde_json::Value;
use tokio::sync::Semaphore;

const LOG_TARGET: &str = "apibrick::script";
const MAX_CALL_LEVELS: usize = 64;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FN_EXPR_DEPTH: usize = 32;
/// Rough per-element footprint used to turn a byte ceiling into
/// array/map element caps.
const DYNAMIC_SLOT_BYTES: u64 = 32;

/// Stand-in deadline for budgets too large to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Scope variable holding every binding, identifier or not.
pub const CONTEXT_VARIABLE: &str = "ctx";

pub struct RhaiScriptEngine {
    permits: Arc<Semaphore>,
    defaults: ScriptLimits,
}

impl RhaiScriptEngine {
    pub fn new(workers: usize, defaults: ScriptLimits) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            defaults,
        }
    }

    pub fn from_settings(settings: &ScriptSettings) -> Self {
        Self::new(settings.workers, settings.limits())
    }
}

impl Default for RhaiScriptEngine {
    fn default() -> Self {
        Self::from_settings(&ScriptSettings::default())
    }
}

impl ScriptEngine for RhaiScriptEngine {
    async fn execute(
        &self,
        script: &str,
        bindings: ValueMap,
        limits: ScriptLimits,
    ) -> Result<Value, ScriptError> {
        let timeout_ms = limits.timeout_ms();
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScriptError::Pool("script worker pool is closed".into()))?;

        // The budget covers execution only, not time spent queued for a worker.
        let started = Instant::now();
        let deadline = started
            .checked_add(limits.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let abort = Arc::new(AtomicBool::new(false));

        let worker = {
            let abort = abort.clone();
            let script = script.to_string();
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                run_script(&script, bindings, &limits, deadline, &abort)
            })
        };

        match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), worker).await {
            Ok(joined) => joined.map_err(|e| ScriptError::Pool(format!("script worker failed: {e}")))?,
            Err(_) => {
                abort.store(true, Ordering::Release);
                tracing::warn!(target: LOG_TARGET, timeout_ms, "Script execution timed out");
                Err(ScriptError::Timeout { timeout_ms })
            }
        }
    }

    fn validate_syntax(&self, script: &str) -> Result<(), ScriptError> {
        base_engine()
            .compile(script)
            .map(|_| ())
            .map_err(|e| ScriptError::Compile(e.to_string()))
    }

    fn default_limits(&self) -> ScriptLimits {
        self.defaults
    }
}

/// Engine with the sandbox restrictions but no resource limits.
fn base_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.set_max_modules(0);
    engine.disable_symbol("eval");
    engine.on_print(|text| tracing::debug!(target: LOG_TARGET, "{text}"));
    engine.on_debug(|text, source, pos| {
        tracing::debug!(target: LOG_TARGET, source = source.unwrap_or(""), position = %pos, "{text}");
    });
    engine
}

fn limited_engine(limits: &ScriptLimits, deadline: Instant, abort: Arc<AtomicBool>) -> Engine {
    let mut engine = base_engine();

    let bytes = usize::try_from(limits.max_memory_bytes).unwrap_or(usize::MAX);
    let slots = usize::try_from(limits.max_memory_bytes / DYNAMIC_SLOT_BYTES).unwrap_or(usize::MAX);
    engine.set_max_string_size(bytes.max(1));
    engine.set_max_array_size(slots.max(1));
    engine.set_max_map_size(slots.max(1));
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FN_EXPR_DEPTH);
    engine.set_max_operations(limits.max_operations);

    engine.on_progress(move |_ops| {
        if abort.load(Ordering::Acquire) || Instant::now() >= deadline {
            Some("deadline exceeded".into())
        } else {
            None
        }
    });
    engine
}

fn run_script(
    script: &str,
    bindings: ValueMap,
    limits: &ScriptLimits,
    deadline: Instant,
    abort: &Arc<AtomicBool>,
) -> Result<Value, ScriptError> {
    let engine = limited_engine(limits, deadline, abort.clone());
    let ast = engine
        .compile(script)
        .map_err(|e| ScriptError::Compile(e.to_string()))?;

    let mut scope = build_scope(bindings)?;
    let started = Instant::now();
    let outcome = engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast);
    tracing::debug!(
        target: LOG_TARGET,
        elapsed_ms = duration_ms(started.elapsed()),
        ok = outcome.is_ok(),
        "Script finished"
    );

    let value = outcome.map_err(|e| classify(*e, limits))?;
    rhai::serde::from_dynamic::<Value>(&value)
        .map_err(|e| ScriptError::Runtime(format!("script result is not JSON-representable: {e}")))
}

fn build_scope(bindings: ValueMap) -> Result<Scope<'static>, ScriptError> {
    let mut scope = Scope::new();
    let mut all = Map::new();

    for (key, value) in bindings {
        let dynamic = rhai::serde::to_dynamic(&value)
            .map_err(|e| ScriptError::Runtime(format!("cannot bind '{key}': {e}")))?;
        if is_identifier(&key) && key != CONTEXT_VARIABLE {
            scope.push_dynamic(key.clone(), dynamic.clone());
        }
        all.insert(key.into(), dynamic);
    }

    scope.push_constant(CONTEXT_VARIABLE, all);
    Ok(scope)
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn classify(err: EvalAltResult, limits: &ScriptLimits) -> ScriptError {
    match err {
        EvalAltResult::ErrorTerminated(..) => ScriptError::Timeout {
            timeout_ms: limits.timeout_ms(),
        },
        EvalAltResult::ErrorTooManyOperations(..)
        | EvalAltResult::ErrorDataTooLarge(..)
        | EvalAltResult::ErrorStackOverflow(..)
        | EvalAltResult::ErrorTooManyModules(..) => ScriptError::ResourceLimit(err.to_string()),
        other => ScriptError::Runtime(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn engine() -> RhaiScriptEngine {
        RhaiScriptEngine::new(2, ScriptLimits::default())
    }

    fn bindings(value: Value) -> ValueMap {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn returns_script_value() {
        let result = engine()
            .execute("return 1 + 1;", ValueMap::new(), ScriptLimits::default())
            .await
            .unwrap();
        assert_eq!(result, json!(2));
    }

    #[tokio::test]
    async fn bindings_are_in_scope() {
        let result = engine()
            .execute(
                r#"#{ greeting: "hi " + name, next: age + 1, dashed: ctx["user-id"], tenant: tenantId }"#,
                bindings(json!({"name": "Ada", "age": 36, "user-id": "u-1", "tenantId": "acme"})),
                ScriptLimits::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            json!({"greeting": "hi Ada", "next": 37, "dashed": "u-1", "tenant": "acme"})
        );
    }

    #[tokio::test]
    async fn nested_bindings_round_trip() {
        let result = engine()
            .execute(
                "load.rows.len()",
                bindings(json!({"load": {"rows": [1, 2, 3]}})),
                ScriptLimits::default(),
            )
            .await
            .unwrap();
        assert_eq!(result, json!(3));
    }

    #[tokio::test]
    async fn unit_result_is_null() {
        let result = engine()
            .execute("let x = 1;", ValueMap::new(), ScriptLimits::default())
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn infinite_loop_times_out() {
        let limits = ScriptLimits::default().with_timeout(Duration::from_millis(50));
        let started = Instant::now();
        let err = engine()
            .execute("loop { }", ValueMap::new(), limits)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Timeout { timeout_ms: 50 }));
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn runtime_and_compile_errors_are_distinct() {
        let err = engine()
            .execute("missing_variable + 1", ValueMap::new(), ScriptLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)));

        let err = engine()
            .execute("let = ;", ValueMap::new(), ScriptLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Compile(_)));
    }

    #[tokio::test]
    async fn memory_ceiling_limits_growth() {
        let limits = ScriptLimits {
            max_memory_bytes: 1024,
            ..ScriptLimits::default()
        };
        let err = engine()
            .execute(r#"let s = "x"; loop { s += s; }"#, ValueMap::new(), limits)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::ResourceLimit(_)), "{err:?}");
    }

    #[tokio::test]
    async fn operation_ceiling() {
        let limits = ScriptLimits {
            max_operations: 1_000,
            ..ScriptLimits::default()
        };
        let err = engine()
            .execute("let n = 0; while n < 1000000 { n += 1; } n", ValueMap::new(), limits)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::ResourceLimit(_)));
    }

    #[tokio::test]
    async fn imports_are_unavailable() {
        let result = engine()
            .execute(r#"import "secrets" as s; s::value"#, ValueMap::new(), ScriptLimits::default())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn eval_is_disabled() {
        let err = engine().validate_syntax(r#"eval("1 + 1")"#).unwrap_err();
        assert!(matches!(err, ScriptError::Compile(_)));
        assert!(engine().validate_syntax("let x = 40 + 2; x").is_ok());
    }

    #[tokio::test]
    async fn concurrent_runs_share_the_pool() {
        let engine = Arc::new(RhaiScriptEngine::new(1, ScriptLimits::default()));
        let mut handles = Vec::new();
        for i in 0..4_i64 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .execute("n * 2", bindings(json!({"n": i})), ScriptLimits::default())
                    .await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().unwrap(), json!(i as i64 * 2));
        }
    }

    #[tokio::test]
    async fn queued_run_gets_its_full_budget() {
        let engine = Arc::new(RhaiScriptEngine::new(1, ScriptLimits::default()));

        let busy = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .execute(
                        "let t = timestamp(); while t.elapsed < 0.15 { } 1",
                        ValueMap::new(),
                        ScriptLimits::default().with_timeout(Duration::from_secs(5)),
                    )
                    .await
            })
        };
        // Let the busy run take the only worker.
        tokio::time::sleep(Duration::from_millis(30)).await;

        let queued = engine
            .execute(
                "40 + 2",
                ValueMap::new(),
                ScriptLimits::default().with_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap();
        assert_eq!(queued, json!(42));
        assert_eq!(busy.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn unbounded_timeout_does_not_overflow() {
        let limits = ScriptLimits::default().with_timeout(Duration::MAX);
        let result = engine().execute("6 * 7", ValueMap::new(), limits).await.unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn identifier_rules() {
        assert!(is_identifier("tenantId"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("user-id"));
        assert!(!is_identifier("load.output"));
        assert!(!is_identifier("1st"));
        assert!(!is_identifier(""));
    }
}
