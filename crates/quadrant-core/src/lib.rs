// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

#[doc(hidden)]
pub use tracing as __tracing;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Checks a programmer-facing contract.
///
/// A violation is always logged. Debug builds panic on top of that; release
/// builds carry on and the caller is expected to turn the offending call into a
/// no-op. Evaluates to `true` when the contract holds.
#[macro_export]
macro_rules! contract {
    ($cond:expr, $($arg:tt)+) => {{
        let held: bool = $cond;
        if !held {
            $crate::__tracing::error!("contract violated: {}", format_args!($($arg)+));
            if cfg!(debug_assertions) {
                panic!("contract violated: {}", format_args!($($arg)+));
            }
        }
        held
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn contract_holds_evaluates_true() {
        assert!(crate::contract!(1 + 1 == 2, "arithmetic"));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "contract violated: slot 40")]
    fn contract_violation_panics_in_debug() {
        let slot = 40;
        crate::contract!(slot < 32, "slot {slot}");
    }

    #[test]
    fn init_tracing_twice_is_harmless() {
        crate::init_tracing();
        crate::init_tracing();
    }
}
