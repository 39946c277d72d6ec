#![warn(missing_docs)]
//! Core library for the pierwatch snapshot and visibility pipeline.

pub mod backfill;
pub mod capture;
pub mod config;
pub mod corpus;
pub mod driver;
pub mod ledger;
pub mod manifest;
pub mod oracle;

pub use backfill::{run as run_backfill, BackfillReport, DEFAULT_WORKERS};
pub use capture::{
    capture, normalize_png, CaptureError, CaptureTuning, PageSession, SessionError,
    CANONICAL_HEIGHT, CANONICAL_WIDTH,
};
pub use config::{
    parse_headless, seed_env_defaults, CaptureControls, CaptureWindow, DataLayout, OracleArgs,
    OracleConfig, DEFAULT_URL, DEFAULT_WEBDRIVER_URL,
};
pub use corpus::{HourSlot, SnapshotStore};
pub use driver::WebDriverSession;
pub use ledger::{LedgerEntry, VisibilityLedger, VisibilityRecord};
pub use manifest::{build_last7, build_months, MonthEntry, WeekEntry};
pub use oracle::{Estimate, Estimator, VisibilityOracle};

#[cfg(feature = "debug_logs")]
#[macro_export]
// This allows use of the `eprintln!` macro via `debug_log!` macro.
macro_rules! debug_log {
        ($($arg:tt)*) => {
            eprintln!($($arg)*);
        };
    }
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
// This effectively disables the `eprintln!` macro, effectively removing it from the code during
// compilation.
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}
