//! Invocation of named exports with role-aware failure handling.
//!
//! [`CallDispatcher`] looks up an export, checks the arguments against its
//! signature, invokes it and reinterprets an `i32` result as an unsigned
//! address. What happens when the guest traps is decided by the
//! [`FailurePolicy`] the dispatcher was built with, not by inspecting the
//! context at call time.

use std::backtrace::Backtrace;

use tracing::{debug, error, instrument, warn};
use wasmtime::{Instance, Store, Val, ValType};

use wasm_bridge_common::{BridgeError, WasmArg};

use crate::store::{ContextState, Role};

/// What the dispatcher does when an invoked export traps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Return the trap to the caller. Used by the coordinator.
    Propagate,
    /// Terminate the current context and report it gone. Used by workers.
    TerminateContext,
}

impl From<Role> for FailurePolicy {
    fn from(role: Role) -> Self {
        match role {
            Role::Coordinator => FailurePolicy::Propagate,
            Role::Worker => FailurePolicy::TerminateContext,
        }
    }
}

/// Invokes exported entry points of one instance.
#[derive(Debug, Clone, Copy)]
pub struct CallDispatcher {
    policy: FailurePolicy,
}

impl CallDispatcher {
    pub fn new(policy: FailurePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Call export `name` with `args`.
    ///
    /// Returns the first result reinterpreted as `u32` when it is an `i32`,
    /// `None` when the export returns nothing.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::ContextTerminated`] if the context was terminated
    ///   before or, under [`FailurePolicy::TerminateContext`], during the call
    /// - [`BridgeError::ExportNotFound`] if `name` is not an exported function
    /// - [`BridgeError::InvalidArgument`] if `args` do not match the signature
    /// - [`BridgeError::RuntimeTrap`] if the guest traps under
    ///   [`FailurePolicy::Propagate`]
    #[instrument(skip(self, store, instance, args), fields(context = store.data().context_id()))]
    pub fn call(
        &self,
        store: &mut Store<ContextState>,
        instance: &Instance,
        name: &str,
        args: &[WasmArg],
    ) -> Result<Option<u32>, BridgeError> {
        if store.data().is_terminated() {
            return Err(BridgeError::terminated(store.data().context_id()));
        }

        let func = instance
            .get_func(&mut *store, name)
            .ok_or_else(|| BridgeError::export_not_found(name))?;

        let ty = func.ty(&*store);
        let params = check_args(name, ty.params(), args)?;
        let mut results = vec![Val::I32(0); ty.results().len()];

        debug!(function = name, args = args.len(), "Invoking export");

        match func.call(&mut *store, &params, &mut results) {
            Ok(()) => Ok(address_result(name, &results)),
            Err(trap) => Err(self.handle_trap(store, name, &trap)),
        }
    }

    fn handle_trap(&self, store: &Store<ContextState>, name: &str, trap: &wasmtime::Error) -> BridgeError {
        let state = store.data();
        let message = trap.to_string();
        let line = format!("WASM function {name} aborted, error: {message}");

        state.logger().log(&line);
        state.logger().log(&format!("{trap:?}\n{}", Backtrace::force_capture()));
        error!(
            context = state.context_id(),
            function = name,
            error = %message,
            "Export trapped"
        );

        if state.exit_requested() {
            state.terminate();
        }

        match self.policy {
            FailurePolicy::Propagate => BridgeError::trap(name, format!("{trap:?}")),
            FailurePolicy::TerminateContext => {
                warn!(context = state.context_id(), function = name, "Terminating worker context");
                state.terminate();
                BridgeError::terminated(state.context_id())
            }
        }
    }
}

impl From<Role> for CallDispatcher {
    fn from(role: Role) -> Self {
        Self::new(role.into())
    }
}

fn check_args(
    name: &str,
    params: impl ExactSizeIterator<Item = ValType>,
    args: &[WasmArg],
) -> Result<Vec<Val>, BridgeError> {
    if params.len() != args.len() {
        return Err(BridgeError::invalid_argument(format!(
            "{name} expects {} arguments, got {}",
            params.len(),
            args.len()
        )));
    }

    params
        .zip(args)
        .enumerate()
        .map(|(index, (param, arg))| match (&param, *arg) {
            (ValType::I32, WasmArg::I32(v)) => Ok(Val::I32(v)),
            (ValType::I64, WasmArg::I64(v)) => Ok(Val::I64(v)),
            (ValType::F32, WasmArg::F32(v)) => Ok(Val::F32(v.to_bits())),
            (ValType::F64, WasmArg::F64(v)) => Ok(Val::F64(v.to_bits())),
            _ => Err(BridgeError::invalid_argument(format!(
                "{name} argument {index}: expected {param}, got {}",
                arg.type_name()
            ))),
        })
        .collect()
}

#[allow(clippy::cast_sign_loss)]
fn address_result(name: &str, results: &[Val]) -> Option<u32> {
    match results.first() {
        Some(Val::I32(v)) => Some(*v as u32),
        Some(other) => {
            debug!(function = name, result = ?other, "Ignoring non-i32 result");
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_role() {
        assert_eq!(FailurePolicy::from(Role::Coordinator), FailurePolicy::Propagate);
        assert_eq!(FailurePolicy::from(Role::Worker), FailurePolicy::TerminateContext);
        assert_eq!(CallDispatcher::from(Role::Worker).policy(), FailurePolicy::TerminateContext);
    }

    #[test]
    fn test_address_result_reinterprets_sign() {
        assert_eq!(address_result("f", &[Val::I32(-1)]), Some(u32::MAX));
        assert_eq!(address_result("f", &[Val::I32(42)]), Some(42));
        assert_eq!(address_result("f", &[]), None);
        assert_eq!(address_result("f", &[Val::I64(5)]), None);
    }

    #[test]
    fn test_check_args() {
        let params = vec![ValType::I32, ValType::F64];
        let vals = check_args("f", params.clone().into_iter(), &[WasmArg::I32(1), WasmArg::F64(0.5)]).unwrap();
        assert_eq!(vals.len(), 2);

        let err = check_args("f", params.clone().into_iter(), &[WasmArg::I32(1)]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument { .. }));

        let err = check_args("f", params.into_iter(), &[WasmArg::I64(1), WasmArg::F64(0.5)]).unwrap_err();
        assert!(err.to_string().contains("argument 0"));
    }
}
