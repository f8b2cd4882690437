// Executor registry - one binding per concrete params type

use crate::domain::{ActionError, ActionParams};
use crate::port::ActionExecutor;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Executor erased for storage; holds an `Arc<dyn ActionExecutor<Params = P>>`
type ExecutorBinding = Arc<dyn Any + Send + Sync>;

/// Registry keyed by the params type. The executor's typed form is recovered
/// at lookup time from the requested params type.
#[derive(Default)]
pub struct ExecutorRegistry {
    bindings: RwLock<HashMap<TypeId, ExecutorBinding>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `executor` to its params type. Last registration wins; returns
    /// true if a previous binding was replaced.
    pub fn register<E: ActionExecutor>(&self, executor: E) -> bool {
        self.register_shared(Arc::new(executor))
    }

    /// Same as [`register`](Self::register) for an executor shared elsewhere
    pub fn register_shared<E: ActionExecutor>(&self, executor: Arc<E>) -> bool {
        let typed: Arc<dyn ActionExecutor<Params = E::Params>> = executor;
        let binding: ExecutorBinding = Arc::new(typed);
        let params_type = <E::Params as ActionParams>::type_name();
        let result_type = type_name::<<E::Params as ActionParams>::Output>();

        let replaced = self
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<E::Params>(), binding)
            .is_some();

        if replaced {
            warn!(
                params_type = %params_type,
                executor = %type_name::<E>(),
                "Replacing previously registered executor"
            );
        } else {
            info!(
                params_type = %params_type,
                result_type = %result_type,
                executor = %type_name::<E>(),
                "Executor registered"
            );
        }
        replaced
    }

    /// Executor bound to `P`, or `NotRegistered`
    pub fn resolve<P: ActionParams>(&self) -> Result<Arc<dyn ActionExecutor<Params = P>>, ActionError> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings
            .get(&TypeId::of::<P>())
            .and_then(|binding| {
                binding
                    .downcast_ref::<Arc<dyn ActionExecutor<Params = P>>>()
                    .cloned()
            })
            .ok_or(ActionError::NotRegistered {
                params_type: P::type_name(),
            })
    }

    pub fn contains<P: ActionParams>(&self) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<P>())
    }

    pub fn len(&self) -> usize {
        self.bindings.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
