//! Transaction engine.

pub mod audit;
pub mod evaluator;
pub mod interruption;
pub mod matched;
pub mod phase;
pub mod transaction;

pub use audit::{AuditLog, AuditLogger};
pub use evaluator::RuleEvaluator;
pub use interruption::{Interruption, InterruptionAction};
pub use matched::MatchedRule;
pub use phase::Phase;
pub use transaction::{ArgumentKind, Transaction};

use crate::body::BodyBuffer;
use crate::config::WafConfig;
use crate::variables::VariableStore;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

/// Callback invoked for every matched rule.
pub type ErrorCallback = Arc<dyn Fn(&MatchedRule) + Send + Sync>;

/// Upper bound on idle pooled transaction states.
const MAX_POOLED: usize = 256;

/// Allocations a transaction hands back to its engine on release.
#[derive(Debug)]
pub(crate) struct PooledState {
    pub(crate) variables: VariableStore,
    pub(crate) request_body: BodyBuffer,
    pub(crate) response_body: BodyBuffer,
    pub(crate) matched_rules: Vec<MatchedRule>,
}

impl PooledState {
    fn new(config: &WafConfig) -> Self {
        Self {
            variables: VariableStore::new(),
            request_body: BodyBuffer::new(
                config.request_body_in_memory_limit,
                config.tmp_dir.clone(),
            ),
            response_body: BodyBuffer::new(
                config.response_body_limit,
                config.tmp_dir.clone(),
            ),
            matched_rules: Vec::new(),
        }
    }
}

struct WafInner {
    config: RwLock<WafConfig>,
    evaluator: RwLock<Option<Arc<dyn RuleEvaluator>>>,
    error_callback: RwLock<Option<ErrorCallback>>,
    audit_logger: RwLock<Option<Arc<dyn AuditLogger>>>,
    pool: Mutex<Vec<PooledState>>,
}

/// The engine: shared configuration, rules and transaction pool.
///
/// Cloning is cheap and every clone refers to the same engine.
#[derive(Clone)]
pub struct Waf {
    inner: Arc<WafInner>,
}

impl Waf {
    /// Create an engine with a configuration and no rules.
    pub fn new(config: WafConfig) -> Self {
        Self {
            inner: Arc::new(WafInner {
                config: RwLock::new(config),
                evaluator: RwLock::new(None),
                error_callback: RwLock::new(None),
                audit_logger: RwLock::new(None),
                pool: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create an engine with a rule evaluator.
    pub fn with_rules(config: WafConfig, evaluator: impl RuleEvaluator + 'static) -> Self {
        let waf = Self::new(config);
        waf.set_rule_evaluator(evaluator);
        waf
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> WafConfig {
        self.inner.config.read().clone()
    }

    /// Change the configuration. Transactions already running keep the
    /// snapshot they started with.
    pub fn update_config(&self, f: impl FnOnce(&mut WafConfig)) {
        f(&mut self.inner.config.write());
    }

    /// Replace the rule evaluator.
    pub fn set_rule_evaluator(&self, evaluator: impl RuleEvaluator + 'static) {
        *self.inner.evaluator.write() = Some(Arc::new(evaluator));
    }

    /// Set the callback invoked for every matched rule.
    pub fn set_error_callback(&self, callback: impl Fn(&MatchedRule) + Send + Sync + 'static) {
        *self.inner.error_callback.write() = Some(Arc::new(callback));
    }

    /// Set the audit logger.
    pub fn set_audit_logger(&self, logger: impl AuditLogger + 'static) {
        *self.inner.audit_logger.write() = Some(Arc::new(logger));
    }

    pub(crate) fn evaluator(&self) -> Option<Arc<dyn RuleEvaluator>> {
        self.inner.evaluator.read().clone()
    }

    pub(crate) fn error_callback(&self) -> Option<ErrorCallback> {
        self.inner.error_callback.read().clone()
    }

    pub(crate) fn audit_logger(&self) -> Option<Arc<dyn AuditLogger>> {
        self.inner.audit_logger.read().clone()
    }

    /// Start a transaction with a generated id.
    pub fn new_transaction(&self) -> Transaction {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.new_transaction_with_id(id)
    }

    /// Start a transaction with a caller-supplied id.
    pub fn new_transaction_with_id(&self, id: impl Into<String>) -> Transaction {
        let config = self.config();
        let pooled = self.inner.pool.lock().pop();
        let mut state = match pooled {
            Some(state) => state,
            None => PooledState::new(&config),
        };
        state
            .request_body
            .configure(config.request_body_in_memory_limit, config.tmp_dir.clone());
        state
            .response_body
            .configure(config.response_body_limit, config.tmp_dir.clone());
        Transaction::new(self.clone(), id.into(), config, state)
    }

    /// Take back the state of a released transaction.
    pub(crate) fn recycle(&self, state: PooledState) {
        let mut pool = self.inner.pool.lock();
        if pool.len() < MAX_POOLED {
            pool.push(state);
        } else {
            debug!("transaction pool full, dropping state");
        }
    }

    /// Number of idle states in the pool.
    pub fn pooled(&self) -> usize {
        self.inner.pool.lock().len()
    }
}

impl Default for Waf {
    fn default() -> Self {
        Self::new(WafConfig::default())
    }
}

impl std::fmt::Debug for Waf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.inner.config.read();
        f.debug_struct("Waf")
            .field("rule_engine", &config.rule_engine)
            .field("audit_engine", &config.audit_engine)
            .field("has_rules", &self.inner.evaluator.read().is_some())
            .field("pooled", &self.inner.pool.lock().len())
            .finish()
    }
}
