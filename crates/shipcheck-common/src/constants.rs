//! Harness-wide constants and defaults.

/// Default number of readiness polling attempts.
pub const DEFAULT_READY_ATTEMPTS: u32 = 20;

/// Default delay between readiness attempts in milliseconds.
pub const DEFAULT_READY_INTERVAL_MS: u64 = 1000;

/// Default number of HTTP probe attempts.
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 20;

/// Default delay between HTTP probe attempts in milliseconds.
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 1000;

/// Port the application under test listens on inside the container.
pub const DEFAULT_APP_PORT: u16 = 8080;

/// How long an abandoned launch may take to finish before it is killed, in milliseconds.
pub const DEFAULT_LAUNCH_GRACE_MS: u64 = 5000;

/// Connect timeout for a single HTTP probe attempt in milliseconds.
pub const PROBE_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Overall request timeout for a single HTTP probe attempt in seconds.
pub const PROBE_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default build tool binary.
pub const DEFAULT_BUILD_TOOL: &str = "s2i";

/// Default container runtime binary.
pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";

/// Default directory containing the local sample applications.
pub const DEFAULT_APPS_DIR: &str = "test";

/// Label attached to every container launched by the harness.
pub const HARNESS_LABEL: &str = "io.shipcheck.harness";

/// Tag suffix shared by every image the harness builds.
pub const TEST_IMAGE_INFIX: &str = "testapp";

/// Application name used in CLI output.
pub const APP_NAME: &str = "shipcheck";
