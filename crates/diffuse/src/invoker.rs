//! # Local invocation
//!
//! Runs a method on a target value in this process. Checks happen in a fixed
//! order so the first error is deterministic:
//!
//! 1. argument count
//! 2. target class is known and invocable
//! 3. a method with exactly the declared argument types exists on the class or
//!    one of its supertypes
//! 4. every argument is assignable to its declared type
//! 5. the call itself
//! 6. the returned value is assignable to the declared return type
//!
//! Methods executed on behalf of a remote caller run inside a "diffused call"
//! scope; a dispatcher consulted from within such a scope always runs locally,
//! so work is never diffused twice.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use diffpack::Value;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::signature::Signature;
use crate::types;

thread_local! {
    static IN_DIFFUSED_CALL: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is executing a method for a remote caller.
pub fn in_diffused_call() -> bool {
    IN_DIFFUSED_CALL.with(|flag| flag.get())
}

struct DiffusedScope {
    previous: bool,
}

impl DiffusedScope {
    fn enter() -> Self {
        Self { previous: IN_DIFFUSED_CALL.with(|flag| flag.replace(true)) }
    }
}

impl Drop for DiffusedScope {
    fn drop(&mut self) {
        IN_DIFFUSED_CALL.with(|flag| flag.set(self.previous));
    }
}

#[derive(Clone)]
pub struct LocalInvoker {
    context: Arc<Context>,
}

impl LocalInvoker {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }

    pub fn invoke(
        &self,
        target: &Value,
        method: &str,
        arg_types: &[String],
        return_type: &str,
        args: &[Value],
    ) -> Result<Value> {
        let class_name = target.type_name().map_or_else(|| "null".to_string(), |t| t.into_owned());
        let signature = Signature::create(return_type, &class_name, method, arg_types);

        if arg_types.len() != args.len() {
            return Err(Error::ArgumentMismatch {
                signature,
                detail: format!("{} argument types declared, {} arguments given", arg_types.len(), args.len()),
            });
        }

        let not_found = || Error::MethodNotFound {
            class: class_name.clone(),
            method: method.to_string(),
            arg_types: arg_types.to_vec(),
        };
        let Value::Object(object) = target else {
            return Err(not_found());
        };

        let classes = self.context.classes();
        if classes.get(&object.class).is_none() {
            return Err(Error::ClassResolution { class: object.class.clone(), tried: Vec::new() });
        }

        // the most specific class declaring the method wins
        let invocable = classes
            .ancestry(&object.class)
            .iter()
            .filter_map(|name| classes.get(name)?.methods().cloned())
            .find(|methods| methods.declares(method, arg_types))
            .ok_or_else(not_found)?;

        for (i, (arg, declared)) in args.iter().zip(arg_types).enumerate() {
            if !classes.is_assignable(arg, declared) {
                let found = arg.type_name().map_or_else(|| "null".to_string(), |t| t.into_owned());
                return Err(Error::ArgumentMismatch {
                    signature,
                    detail: format!("argument {} is {}, not assignable to {}", i, found, declared),
                });
            }
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| invocable.invoke(object, method, arg_types, args)));
        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return Err(Error::Invocation { signature, message: format!("{:#}", e) }),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "method panicked".to_string());
                return Err(Error::Invocation { signature, message });
            }
        };

        // primitive and void returns are not checked
        if !types::is_primitive(return_type) && !types::is_void(return_type) && !classes.is_assignable(&value, return_type) {
            let found = value.type_name().map_or_else(|| "null".to_string(), |t| t.into_owned());
            return Err(Error::ReturnTypeMismatch { signature, expected: return_type.to_string(), found });
        }
        Ok(value)
    }

    /// Like [`invoke`](Self::invoke), but marks the thread as serving a remote caller.
    pub fn invoke_diffused(
        &self,
        target: &Value,
        method: &str,
        arg_types: &[String],
        return_type: &str,
        args: &[Value],
    ) -> Result<Value> {
        let _scope = DiffusedScope::enter();
        self.invoke(target, method, arg_types, return_type, args)
    }
}
