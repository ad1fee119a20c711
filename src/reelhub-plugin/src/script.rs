//! In-process execution of scripted provider packages.
//!
//! Each package gets its own QuickJS runtime. The source is evaluated as a
//! CommonJS-style module whose only injected surface is `module`, `exports`
//! and a `require` that always throws. The exported provider object is kept
//! in a hidden global and every `search`/`load` call runs on the blocking
//! pool under an interrupt deadline.

use async_trait::async_trait;
use reelhub_core::{
    DetailResult, Provider, ProviderCapabilities, ProviderError, ProviderResult, SearchResult,
};
use rquickjs::function::This;
use rquickjs::{Context, Ctx, Function, Object, Runtime, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

const PROVIDER_GLOBAL: &str = "__reelhub_provider";

const MODULE_PRELUDE: &str = r#"(function () {
  var module = { exports: {} };
  var require = function (name) {
    throw new Error("require('" + name + "') is not available to plugins");
  };
  (function (module, exports, require) {
"#;

const MODULE_EPILOGUE: &str = r#"
  })(module, module.exports, require);
  return module.exports;
})()"#;

/// Resource bounds applied to every scripted provider.
#[derive(Debug, Clone, Copy)]
pub struct ScriptLimits {
    pub memory_limit: usize,
    pub max_stack_size: usize,
    /// Wall-clock budget for module evaluation and for each call.
    pub deadline: Duration,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            memory_limit: 32 * 1024 * 1024,
            max_stack_size: 1024 * 1024,
            deadline: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to create script runtime: {0}")]
    Runtime(String),
    #[error("script evaluation failed: {0}")]
    Execute(String),
    #[error("script does not export a usable provider: {0}")]
    Validate(String),
}

type DeadlineSlot = Arc<Mutex<Option<Instant>>>;

enum CallFailure {
    Thrown(String),
    TimedOut,
}

struct ScriptMeta {
    main_url: String,
    capabilities: ProviderCapabilities,
}

/// Provider backed by a QuickJS context.
pub struct ScriptedProvider {
    name: String,
    main_url: String,
    capabilities: ProviderCapabilities,
    context: Context,
    deadline: DeadlineSlot,
    limits: ScriptLimits,
    detached: AtomicBool,
}

impl ScriptedProvider {
    /// Evaluate `source` and bind the exported provider under `internal_name`.
    pub fn load(internal_name: &str, source: &str, limits: ScriptLimits) -> Result<Self, ScriptError> {
        let runtime = Runtime::new().map_err(|e| ScriptError::Runtime(e.to_string()))?;
        runtime.set_memory_limit(limits.memory_limit);
        runtime.set_max_stack_size(limits.max_stack_size);

        let deadline: DeadlineSlot = Arc::default();
        let watched = Arc::clone(&deadline);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            let at = *watched.lock().unwrap_or_else(PoisonError::into_inner);
            at.is_some_and(|at| Instant::now() >= at)
        })));

        let context = Context::full(&runtime).map_err(|e| ScriptError::Runtime(e.to_string()))?;
        let meta = context.with(|ctx| {
            arm(&deadline, limits.deadline);
            let meta = install(&ctx, source);
            disarm(&deadline);
            meta
        })?;

        tracing::debug!(
            plugin = %internal_name,
            main_url = %meta.main_url,
            quick_search = meta.capabilities.quick_search,
            "scripted provider evaluated"
        );

        Ok(Self {
            name: internal_name.to_string(),
            main_url: meta.main_url,
            capabilities: meta.capabilities,
            context,
            deadline,
            limits,
            detached: AtomicBool::new(false),
        })
    }

    async fn invoke(&self, method: &'static str, arg: &str) -> ProviderResult<Option<String>> {
        if self.detached.load(Ordering::Acquire) {
            return Err(ProviderError::NotSupported {
                operation: format!("{method} on unloaded plugin {}", self.name),
            });
        }

        let context = self.context.clone();
        let deadline = Arc::clone(&self.deadline);
        let budget = self.limits.deadline;
        let arg = arg.to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            context.with(|ctx| {
                arm(&deadline, budget);
                let started = Instant::now();
                let result = call_method(&ctx, method, arg);
                disarm(&deadline);
                result.map_err(|message| {
                    if started.elapsed() >= budget {
                        CallFailure::TimedOut
                    } else {
                        CallFailure::Thrown(message)
                    }
                })
            })
        })
        .await
        .map_err(|e| ProviderError::Other {
            message: format!("script task failed: {e}"),
        })?;

        outcome.map_err(|failure| match failure {
            CallFailure::TimedOut => {
                tracing::warn!(plugin = %self.name, method, "script call interrupted at deadline");
                ProviderError::Timeout(budget)
            }
            CallFailure::Thrown(message) => ProviderError::Other {
                message: format!("{method} failed: {message}"),
            },
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn main_url(&self) -> &str {
        &self.main_url
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn search(&self, query: &str) -> ProviderResult<Vec<SearchResult>> {
        let Some(json) = self.invoke("search", query).await? else {
            return Ok(Vec::new());
        };
        let mut results: Vec<SearchResult> =
            serde_json::from_str(&json).map_err(|e| ProviderError::Other {
                message: format!("malformed search results: {e}"),
            })?;
        for result in &mut results {
            if result.provider_name.is_empty() {
                result.provider_name = self.name.clone();
            }
        }
        Ok(results)
    }

    async fn load(&self, url: &str) -> ProviderResult<DetailResult> {
        let Some(json) = self.invoke("load", url).await? else {
            return Err(ProviderError::NotFound {
                entity: url.to_string(),
            });
        };
        let mut detail: DetailResult =
            serde_json::from_str(&json).map_err(|e| ProviderError::Other {
                message: format!("malformed detail result: {e}"),
            })?;
        if detail.provider_name.is_empty() {
            detail.provider_name = self.name.clone();
        }
        if detail.url.is_empty() {
            detail.url = url.to_string();
        }
        Ok(detail)
    }

    fn teardown(&self) {
        self.detached.store(true, Ordering::Release);
        tracing::debug!(plugin = %self.name, "scripted provider detached");
    }
}

fn arm(slot: &DeadlineSlot, budget: Duration) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now() + budget);
}

fn disarm(slot: &DeadlineSlot) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
}

fn install(ctx: &Ctx<'_>, source: &str) -> Result<ScriptMeta, ScriptError> {
    let wrapped = format!("{MODULE_PRELUDE}{source}{MODULE_EPILOGUE}");
    let exported: Value = ctx
        .eval(wrapped)
        .map_err(|e| ScriptError::Execute(describe_error(ctx, e)))?;
    let provider = select_provider(&exported)?;

    let meta = ScriptMeta {
        main_url: string_prop(&provider, "mainUrl").unwrap_or_default(),
        capabilities: ProviderCapabilities {
            quick_search: bool_prop(&provider, "hasQuickSearch"),
            chromecast: bool_prop(&provider, "hasChromecastSupport"),
            download: bool_prop(&provider, "hasDownloadSupport"),
        },
    };
    ctx.globals()
        .set(PROVIDER_GLOBAL, provider)
        .map_err(|e| ScriptError::Execute(describe_error(ctx, e)))?;
    Ok(meta)
}

/// `module.exports` itself when it is a provider, else its single own
/// property that is one.
fn select_provider<'js>(exported: &Value<'js>) -> Result<Object<'js>, ScriptError> {
    let Some(root) = exported.as_object() else {
        return Err(ScriptError::Validate(
            "module.exports is not an object".to_string(),
        ));
    };
    if is_provider(root) {
        return Ok(root.clone());
    }

    let mut found: Vec<(String, Object<'js>)> = Vec::new();
    for prop in root.props::<String, Value>() {
        let (key, value) = prop.map_err(|e| ScriptError::Validate(e.to_string()))?;
        if let Some(object) = value.as_object() {
            if is_provider(object) {
                found.push((key, object.clone()));
            }
        }
    }

    match found.len() {
        0 => Err(ScriptError::Validate(
            "no exported object with callable search and load".to_string(),
        )),
        1 => Ok(found.remove(0).1),
        _ => {
            let names: Vec<&str> = found.iter().map(|(key, _)| key.as_str()).collect();
            Err(ScriptError::Validate(format!(
                "multiple provider exports: {}",
                names.join(", ")
            )))
        }
    }
}

fn is_provider(object: &Object<'_>) -> bool {
    let callable = |key: &str| {
        object
            .get::<_, Value>(key)
            .map(|value| value.is_function())
            .unwrap_or(false)
    };
    callable("search") && callable("load")
}

fn string_prop(object: &Object<'_>, key: &str) -> Option<String> {
    let value: Value = object.get(key).ok()?;
    value.as_string()?.to_string().ok()
}

fn bool_prop(object: &Object<'_>, key: &str) -> bool {
    object
        .get::<_, Value>(key)
        .ok()
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

/// Invoke `method` on the bound provider; `Ok(None)` for null/undefined.
fn call_method(ctx: &Ctx<'_>, method: &str, arg: String) -> Result<Option<String>, String> {
    let provider: Object = ctx
        .globals()
        .get(PROVIDER_GLOBAL)
        .map_err(|e| describe_error(ctx, e))?;
    let function: Function = provider.get(method).map_err(|e| describe_error(ctx, e))?;
    let returned: Value = function
        .call((This(provider.clone()), arg))
        .map_err(|e| describe_error(ctx, e))?;

    let settled = match returned.as_promise() {
        Some(promise) => promise
            .finish::<Value>()
            .map_err(|e| describe_error(ctx, e))?,
        None => returned,
    };
    if settled.is_undefined() || settled.is_null() {
        return Ok(None);
    }

    let json: Object = ctx.globals().get("JSON").map_err(|e| describe_error(ctx, e))?;
    let stringify: Function = json.get("stringify").map_err(|e| describe_error(ctx, e))?;
    stringify
        .call::<_, Option<String>>((settled,))
        .map_err(|e| describe_error(ctx, e))
}

fn describe_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !matches!(err, rquickjs::Error::Exception) {
        return err.to_string();
    }
    let thrown = ctx.catch();
    if let Some(exception) = thrown.as_exception() {
        return exception
            .message()
            .unwrap_or_else(|| "uncaught exception".to_string());
    }
    if let Some(text) = thrown.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }
    format!("{thrown:?}")
}
