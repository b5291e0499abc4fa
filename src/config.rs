// Application configuration, loaded from environment variables and CLI flags.

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Secret used to verify bearer tokens.
    pub jwt_secret: String,
    /// Whether to run in local mode (no auth, every request acts as the local user).
    pub local_mode: bool,
    /// Keep documents in memory instead of SQLite.
    pub memory: bool,
}

pub const DEFAULT_JWT_SECRET: &str = "paddock-dev-secret-change-in-production";

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:paddock.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `JWT_SECRET` - token verification secret
    /// - `PADDOCK_LOCAL_MODE` - Set to `true` to enable local mode
    ///
    /// CLI flags:
    /// - `--local` - Enable local mode (same as `PADDOCK_LOCAL_MODE=true`)
    /// - `--port <PORT>` - Override the port
    /// - `--memory` - Use the in-memory store
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    fn from_args(args: &[String]) -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:paddock.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let jwt_secret =
            std::env::var("JWT_SECRET").unwrap_or_else(|_| DEFAULT_JWT_SECRET.to_string());

        let local_mode = args.iter().any(|a| a == "--local")
            || std::env::var("PADDOCK_LOCAL_MODE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);

        let memory = args.iter().any(|a| a == "--memory");

        Config {
            database_url,
            port,
            jwt_secret,
            local_mode,
            memory,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

/// Global flag indicating local mode is active.
/// This is set once at startup and read by auth extractors.
static LOCAL_MODE: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

/// Set the local mode flag (called once at startup).
pub fn set_local_mode(enabled: bool) {
    LOCAL_MODE.store(enabled, std::sync::atomic::Ordering::Relaxed);
}

/// Check if local mode is active.
pub fn is_local_mode() -> bool {
    LOCAL_MODE.load(std::sync::atomic::Ordering::Relaxed)
}

/// The user every request acts as in local mode.
pub const LOCAL_USER_ID: &str = "local";
pub const LOCAL_USERNAME: &str = "Local Pilot";
