//! Shared helpers for unit and integration tests.
//!
//! Provides consistent logging initialization plus phase/section macros for
//! readable test output. Everything here degrades to a no-op when the
//! `tracing-integration` feature is disabled, so tests compile and pass
//! either way.
//!
//! # Example
//! ```
//! use fibersync::test_utils::init_test_logging;
//!
//! init_test_logging();
//! fibersync::test_phase!("setup");
//! ```

#[cfg(feature = "tracing-integration")]
use std::sync::Once;

#[cfg(feature = "tracing-integration")]
static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
#[cfg(feature = "tracing-integration")]
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
#[cfg(feature = "tracing-integration")]
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Initialize test logging. No-op without the `tracing-integration` feature.
#[cfg(not(feature = "tracing-integration"))]
pub fn init_test_logging() {}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::tracing_compat::info!(phase = %$name, "========================================");
        $crate::tracing_compat::info!(phase = %$name, "TEST PHASE: {}", $name);
        $crate::tracing_compat::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        $crate::tracing_compat::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::tracing_compat::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        $crate::tracing_compat::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        $crate::tracing_compat::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

#[cfg(test)]
mod tests {
    use super::init_test_logging;

    #[test]
    fn init_is_idempotent() {
        init_test_logging();
        init_test_logging();
    }

    #[test]
    fn macros_expand_in_statement_position() {
        init_test_logging();
        crate::test_phase!("phase");
        crate::test_section!("section");
        let value = 3;
        crate::assert_with_log!(value == 3, "value", 3, value);
        crate::test_complete!("macros_expand_in_statement_position", value = value);
    }
}
