#[macro_use]
extern crate slog_scope;

mod metrics;

use std::fmt;

pub use metrics::{metrics_from_opts, MetricError, Metrics};

#[macro_export]
macro_rules! from_error {
    ($from:ty, $to:ty, $to_kind:expr) => {
        impl From<$from> for $to {
            fn from(inner: $from) -> $to {
                $to_kind(inner).into()
            }
        }
    };
}

#[macro_export]
macro_rules! impl_fmt_display {
    ($error:ty, $kind:ty) => {
        impl fmt::Display for $error {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.kind, formatter)
            }
        }
    };
}

/// Shared classification seam for errors that cross a component boundary.
///
/// Kept deliberately small (no sentry dependency is wired up, since nothing
/// in this system calls for crash reporting) but shaped the way the rest of
/// the error-handling stack expects, so a reporting sink can be bolted on
/// later without reshaping every error type.
pub trait ReportableError {
    fn error_backtrace(&self) -> String;
    fn is_reportable(&self) -> bool;
    fn metric_label(&self) -> Option<String>;
}
