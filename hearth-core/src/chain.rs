//! Hook Chain — an ordered, editable pipeline of named steps.
//!
//! Every step sees the seed inputs plus the partial results of the steps
//! before it, and returns its own partial result with a flag saying whether
//! the chain should continue. The first error aborts the chain.
//!
//! ```text
//! seed ─▶ step 1 ─partial─▶ step 2 ─partial─▶ ... ─▶ merged partials
//!             └─ Stop ─▶ merged partials so far
//!             └─ Err  ─▶ ChainFailure { step, error }
//! ```
//!
//! The chain is generic over the step type so the same machinery drives
//! both behavior states (where a step borrows a [`Turn`](crate::state::Turn))
//! and plain test scopes.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::trace;

use crate::error::EngineError;

/// A step's partial result.
pub type Partial = Map<String, Value>;

/// What a step asks the chain to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Merge the partial and run the next step.
    Continue(Partial),
    /// Merge the partial and end the chain successfully.
    Stop(Partial),
}

impl StepOutcome {
    /// Continue with nothing to add.
    #[must_use]
    pub fn next() -> Self {
        Self::Continue(Partial::new())
    }

    /// Stop with nothing to add.
    #[must_use]
    pub fn stop() -> Self {
        Self::Stop(Partial::new())
    }

    /// Continue with a single field.
    #[must_use]
    pub fn with(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut partial = Partial::new();
        partial.insert(key.into(), value.into());
        Self::Continue(partial)
    }
}

/// Why a step failed.
#[derive(Debug)]
pub enum HookError {
    /// Recoverable: the owning state records the message and retries.
    Step(String),
    /// Unrecoverable: propagated unchanged to the caller of the manager.
    Fatal(Box<EngineError>),
}

impl HookError {
    /// A recoverable failure.
    pub fn step(message: impl Into<String>) -> Self {
        Self::Step(message.into())
    }

    /// Whether the failure can be retried.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Step(_))
    }
}

impl From<EngineError> for HookError {
    fn from(err: EngineError) -> Self {
        Self::Fatal(Box::new(err))
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(message) => f.write_str(message),
            Self::Fatal(err) => write!(f, "{err}"),
        }
    }
}

/// Result type every step returns.
pub type StepResult = Result<StepOutcome, HookError>;

/// A failed chain run: which step failed and how.
#[derive(Debug)]
pub struct ChainFailure {
    /// Name of the failing step.
    pub step: &'static str,
    /// The step's error.
    pub error: HookError,
}

impl ChainFailure {
    /// Human-readable failure message. Never empty.
    #[must_use]
    pub fn message(&self) -> String {
        let detail = self.error.to_string();
        if detail.is_empty() {
            format!("step `{}` failed", self.step)
        } else {
            format!("step `{}` failed: {detail}", self.step)
        }
    }
}

impl fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

// ---------------------------------------------------------------------------
// ChainContext
// ---------------------------------------------------------------------------

/// The fields visible to a step: seed inputs plus every earlier partial.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainContext {
    fields: Partial,
}

impl ChainContext {
    /// A context holding only `seed`.
    #[must_use]
    pub fn new(seed: Partial) -> Self {
        Self { fields: seed }
    }

    /// Borrow a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// A string field.
    #[must_use]
    pub fn str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// A boolean field; absent or non-boolean reads as `false`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.fields.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// An unsigned integer field.
    #[must_use]
    pub fn uint(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }

    /// A float field.
    #[must_use]
    pub fn float(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Whether the field is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    fn merge(&mut self, partial: &Partial) {
        for (k, v) in partial {
            self.fields.insert(k.clone(), v.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Steps and chains
// ---------------------------------------------------------------------------

/// One named step of a chain.
pub struct NamedStep<F: ?Sized> {
    name: &'static str,
    needs: &'static [&'static str],
    func: Arc<F>,
}

impl<F: ?Sized> NamedStep<F> {
    /// A step called `name` that requires the context fields in `needs`.
    pub fn new(name: &'static str, needs: &'static [&'static str], func: Arc<F>) -> Self {
        Self { name, needs, func }
    }

    /// The step's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Context fields the step requires.
    #[must_use]
    pub fn needs(&self) -> &'static [&'static str] {
        self.needs
    }
}

impl<F: ?Sized> Clone for NamedStep<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            needs: self.needs,
            func: Arc::clone(&self.func),
        }
    }
}

impl<F: ?Sized> fmt::Debug for NamedStep<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedStep")
            .field("name", &self.name)
            .field("needs", &self.needs)
            .finish_non_exhaustive()
    }
}

/// An ordered list of steps.
pub struct HookChain<F: ?Sized> {
    steps: Vec<NamedStep<F>>,
}

impl<F: ?Sized> HookChain<F> {
    /// An empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a step.
    pub fn push(&mut self, step: NamedStep<F>) {
        self.steps.push(step);
    }

    /// Insert a step before position `index`.
    ///
    /// Negative indices count from the end (`-1` inserts before the last
    /// step); out-of-range indices are clamped to the ends.
    pub fn insert(&mut self, index: isize, step: NamedStep<F>) {
        let len = self.steps.len();
        let at = if index < 0 {
            len.saturating_sub(index.unsigned_abs())
        } else {
            index.unsigned_abs().min(len)
        };
        self.steps.insert(at, step);
    }

    /// Insert a step just before the step called `anchor`. Returns `false`
    /// (and leaves the chain unchanged) when there is no such step.
    pub fn insert_before(&mut self, anchor: &str, step: NamedStep<F>) -> bool {
        match self.position(anchor) {
            Some(at) => {
                self.steps.insert(at, step);
                true
            }
            None => false,
        }
    }

    /// Insert a step just after the step called `anchor`. Returns `false`
    /// (and leaves the chain unchanged) when there is no such step.
    pub fn insert_after(&mut self, anchor: &str, step: NamedStep<F>) -> bool {
        match self.position(anchor) {
            Some(at) => {
                self.steps.insert(at + 1, step);
                true
            }
            None => false,
        }
    }

    /// Swap the step called `name` for `step`, keeping its position.
    pub fn replace(&mut self, name: &str, step: NamedStep<F>) -> bool {
        match self.position(name) {
            Some(at) => {
                self.steps[at] = step;
                true
            }
            None => false,
        }
    }

    /// Remove the step called `name`.
    pub fn remove(&mut self, name: &str) -> Option<NamedStep<F>> {
        self.position(name).map(|at| self.steps.remove(at))
    }

    /// Position of the step called `name`.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Step names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the chain has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the chain over `scope`.
    ///
    /// Returns the merge of every partial produced before the chain ended.
    ///
    /// # Errors
    ///
    /// Returns a [`ChainFailure`] naming the first step that failed or whose
    /// required fields were missing. Later steps do not run.
    pub fn execute<S>(&self, scope: &mut S, seed: Partial) -> Result<Partial, ChainFailure>
    where
        F: Fn(&mut S, &ChainContext) -> StepResult,
    {
        let mut ctx = ChainContext::new(seed);
        let mut merged = Partial::new();
        for step in &self.steps {
            if let Some(missing) = step.needs.iter().find(|field| !ctx.contains(field)) {
                return Err(ChainFailure {
                    step: step.name,
                    error: HookError::step(format!("missing required field `{missing}`")),
                });
            }
            let outcome = (step.func.as_ref())(scope, &ctx).map_err(|error| ChainFailure {
                step: step.name,
                error,
            })?;
            let (partial, stop) = match outcome {
                StepOutcome::Continue(p) => (p, false),
                StepOutcome::Stop(p) => (p, true),
            };
            ctx.merge(&partial);
            merged.extend(partial);
            if stop {
                trace!(step = step.name, "chain stopped");
                break;
            }
        }
        Ok(merged)
    }
}

impl<F: ?Sized> Default for HookChain<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> Clone for HookChain<F> {
    fn clone(&self) -> Self {
        Self {
            steps: self.steps.clone(),
        }
    }
}

impl<F: ?Sized> fmt::Debug for HookChain<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.steps.iter().map(|s| s.name)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Log = Vec<String>;
    type TestFn = dyn Fn(&mut Log, &ChainContext) -> StepResult + Send + Sync;

    fn step(
        name: &'static str,
        needs: &'static [&'static str],
        f: impl Fn(&mut Log, &ChainContext) -> StepResult + Send + Sync + 'static,
    ) -> NamedStep<TestFn> {
        NamedStep::new(name, needs, Arc::new(f))
    }

    fn logging(name: &'static str) -> NamedStep<TestFn> {
        step(name, &[], move |log, _| {
            log.push(name.to_string());
            Ok(StepOutcome::with(name, true))
        })
    }

    #[test]
    fn empty_chain_returns_empty_map() {
        let chain: HookChain<TestFn> = HookChain::new();
        let mut log = Log::new();
        let out = chain.execute(&mut log, Partial::new()).expect("empty chain succeeds");
        assert!(out.is_empty());
    }

    #[test]
    fn later_steps_see_earlier_partials() {
        let mut chain = HookChain::new();
        chain.push(step("a", &[], |_, _| Ok(StepOutcome::with("x", 2))));
        chain.push(step("b", &["x"], |_, ctx| {
            let x = ctx.uint("x").unwrap_or(0);
            Ok(StepOutcome::with("y", x * 10))
        }));
        let mut log = Log::new();
        let out = chain.execute(&mut log, Partial::new()).expect("chain runs");
        assert_eq!(out.get("y"), Some(&json!(20)));
    }

    #[test]
    fn seed_is_visible_but_not_returned() {
        let mut chain = HookChain::new();
        chain.push(step("echo", &["input"], |_, ctx| {
            Ok(StepOutcome::with("echo", ctx.str("input").unwrap_or_default()))
        }));
        let mut seed = Partial::new();
        seed.insert("input".into(), json!("hi"));
        let out = chain.execute(&mut Log::new(), seed).expect("chain runs");
        assert_eq!(out.len(), 1);
        assert_eq!(out["echo"], json!("hi"));
    }

    #[test]
    fn stop_ends_the_chain() {
        let mut chain = HookChain::new();
        chain.push(logging("a"));
        chain.push(step("halt", &[], |log, _| {
            log.push("halt".into());
            Ok(StepOutcome::Stop(Partial::new()))
        }));
        chain.push(logging("never"));
        let mut log = Log::new();
        let out = chain.execute(&mut log, Partial::new()).expect("chain runs");
        assert_eq!(log, vec!["a", "halt"]);
        assert!(out.contains_key("a"));
        assert!(!out.contains_key("never"));
    }

    #[test]
    fn error_aborts_with_step_name() {
        let mut chain = HookChain::new();
        chain.push(logging("a"));
        chain.push(step("boom", &[], |_, _| Err(HookError::step("bad shape"))));
        chain.push(logging("after"));
        let mut log = Log::new();
        let failure = chain.execute(&mut log, Partial::new()).unwrap_err();
        assert_eq!(failure.step, "boom");
        assert!(failure.message().contains("bad shape"));
        assert_eq!(log, vec!["a"]);
    }

    #[test]
    fn missing_required_field_fails_before_the_call() {
        let mut chain = HookChain::new();
        chain.push(step("needy", &["prompt"], |log, _| {
            log.push("called".into());
            Ok(StepOutcome::next())
        }));
        let mut log = Log::new();
        let failure = chain.execute(&mut log, Partial::new()).unwrap_err();
        assert!(failure.message().contains("prompt"));
        assert!(log.is_empty());
    }

    #[test]
    fn empty_error_message_still_names_the_step() {
        let mut chain = HookChain::new();
        chain.push(step("quiet", &[], |_, _| Err(HookError::step(""))));
        let failure = chain.execute(&mut Log::new(), Partial::new()).unwrap_err();
        assert_eq!(failure.message(), "step `quiet` failed");
    }

    #[test]
    fn insert_follows_list_semantics() {
        let mut chain = HookChain::new();
        chain.push(logging("a"));
        chain.push(logging("c"));
        chain.insert(1, logging("b"));
        chain.insert(-1, logging("b2"));
        chain.insert(99, logging("z"));
        chain.insert(-99, logging("first"));
        assert_eq!(chain.names(), vec!["first", "a", "b", "b2", "c", "z"]);
    }

    #[test]
    fn replace_and_remove_by_name() {
        let mut chain = HookChain::new();
        chain.push(logging("a"));
        chain.push(logging("b"));
        assert!(chain.replace("a", logging("a2")));
        assert!(!chain.replace("missing", logging("x")));
        assert!(chain.remove("b").is_some());
        assert!(chain.insert_after("a2", logging("tail")));
        assert!(chain.insert_before("a2", logging("head")));
        assert_eq!(chain.names(), vec!["head", "a2", "tail"]);
    }
}
