//! Fixed-window rate limiting
//!
//! Each bucket counts requests for one caller (user, application or IP) and,
//! when a route-specific limit applies, one route pattern. A bucket's window
//! starts with its first request and resets once the window has passed, so a
//! burst straddling a boundary can admit up to twice the limit.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{strip_query, EffectiveRoles, Identity, PatternError};

const SHARD_COUNT: usize = 16;

/// Limit applied to one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub limit: u64,
    /// Window length in milliseconds
    pub interval_ms: u64,
}

impl RateLimitEntry {
    pub const fn new(limit: u64, interval_ms: u64) -> Self {
        Self { limit, interval_ms }
    }
}

/// Caller classification for default limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Anonymous,
    Authenticated,
    Admin,
}

impl UserType {
    pub fn classify(identity: Option<&Identity>, roles: &EffectiveRoles) -> Self {
        match identity {
            None => UserType::Anonymous,
            Some(_) if roles.is_elevated() => UserType::Admin,
            Some(_) => UserType::Authenticated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Anonymous => "anonymous",
            UserType::Authenticated => "authenticated",
            UserType::Admin => "admin",
        }
    }
}

/// Per user-type default limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTypeLimits {
    pub anonymous: RateLimitEntry,
    pub authenticated: RateLimitEntry,
    pub admin: RateLimitEntry,
}

impl UserTypeLimits {
    pub fn for_type(&self, user_type: UserType) -> RateLimitEntry {
        match user_type {
            UserType::Anonymous => self.anonymous,
            UserType::Authenticated => self.authenticated,
            UserType::Admin => self.admin,
        }
    }
}

impl Default for UserTypeLimits {
    fn default() -> Self {
        Self {
            anonymous: RateLimitEntry::new(100, 60_000),
            authenticated: RateLimitEntry::new(300, 60_000),
            admin: RateLimitEntry::new(1_000, 60_000),
        }
    }
}

/// Rate limiter settings as loaded from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub defaults: UserTypeLimits,
    /// Route pattern (exact or `prefix/*`) to limit
    pub routes: BTreeMap<String, RateLimitEntry>,
    pub exempt_paths: Vec<String>,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let routes = BTreeMap::from([
            ("/api/auth/login".to_string(), RateLimitEntry::new(10, 300_000)),
            ("/api/auth/register".to_string(), RateLimitEntry::new(5, 3_600_000)),
            ("/api/auth/refresh".to_string(), RateLimitEntry::new(30, 300_000)),
        ]);

        Self {
            enabled: true,
            defaults: UserTypeLimits::default(),
            routes,
            exempt_paths: vec!["/health".to_string(), "/api/health".to_string()],
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

/// Longest accepted window (31 days)
pub const MAX_INTERVAL_MS: u64 = 31 * 24 * 60 * 60 * 1000;

/// Invalid rate limiter settings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitConfigError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("rate limit for {0:?} must have a non-zero limit and interval")]
    ZeroLimit(String),

    #[error("rate limit for {0:?} has an interval longer than {MAX_INTERVAL_MS} ms")]
    IntervalTooLong(String),

    #[error("invalid IP address in access list: {0:?}")]
    InvalidIp(String),
}

/// Exact path or `prefix/*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    Prefix(String),
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let pattern = pattern.trim();
        if !pattern.starts_with('/') {
            return Err(PatternError::NotAbsolute(pattern.to_string()));
        }
        if pattern.contains('?') {
            return Err(PatternError::QueryString(pattern.to_string()));
        }

        match pattern.strip_suffix("/*") {
            Some(prefix) if !prefix.contains('*') => Ok(Self::Prefix(format!("{prefix}/"))),
            Some(_) => Err(PatternError::MisplacedWildcard(pattern.to_string())),
            None if pattern.contains('*') => {
                Err(PatternError::MisplacedWildcard(pattern.to_string()))
            }
            None => Ok(Self::Exact(pattern.to_string())),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => path == exact,
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

/// Validated limiter policy
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    enabled: bool,
    defaults: UserTypeLimits,
    exact_routes: HashMap<String, RateLimitEntry>,
    /// Longest prefix first
    prefix_routes: Vec<(String, String, RateLimitEntry)>,
    exempt: Vec<PathPattern>,
    whitelist: HashSet<IpAddr>,
    blacklist: HashSet<IpAddr>,
}

impl RateLimitPolicy {
    pub fn compile(config: &RateLimitConfig) -> Result<Self, RateLimitConfigError> {
        let check_entry = |name: &str, entry: &RateLimitEntry| {
            if entry.limit == 0 || entry.interval_ms == 0 {
                Err(RateLimitConfigError::ZeroLimit(name.to_string()))
            } else if entry.interval_ms > MAX_INTERVAL_MS {
                Err(RateLimitConfigError::IntervalTooLong(name.to_string()))
            } else {
                Ok(())
            }
        };
        check_entry("anonymous", &config.defaults.anonymous)?;
        check_entry("authenticated", &config.defaults.authenticated)?;
        check_entry("admin", &config.defaults.admin)?;

        let mut exact_routes = HashMap::new();
        let mut prefix_routes = Vec::new();
        for (pattern, entry) in &config.routes {
            check_entry(pattern, entry)?;
            match PathPattern::parse(pattern)? {
                PathPattern::Exact(path) => {
                    exact_routes.insert(path, *entry);
                }
                PathPattern::Prefix(prefix) => {
                    prefix_routes.push((prefix, pattern.trim().to_string(), *entry));
                }
            }
        }
        prefix_routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let exempt = config
            .exempt_paths
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let parse_ips = |list: &[String]| {
            list.iter()
                .map(|ip| {
                    ip.trim()
                        .parse::<IpAddr>()
                        .map_err(|_| RateLimitConfigError::InvalidIp(ip.clone()))
                })
                .collect::<Result<HashSet<_>, _>>()
        };

        Ok(Self {
            enabled: config.enabled,
            defaults: config.defaults,
            exact_routes,
            prefix_routes,
            exempt,
            whitelist: parse_ips(&config.whitelist)?,
            blacklist: parse_ips(&config.blacklist)?,
        })
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt.iter().any(|p| p.matches(path))
    }

    /// Exact route, then longest wildcard prefix, then the user-type default.
    ///
    /// Returns the matched route pattern alongside the entry.
    pub fn resolve(&self, path: &str, user_type: UserType) -> (RateLimitEntry, Option<&str>) {
        if let Some((route, entry)) = self.exact_routes.get_key_value(path) {
            return (*entry, Some(route.as_str()));
        }
        if let Some((_, pattern, entry)) = self
            .prefix_routes
            .iter()
            .find(|(prefix, _, _)| path.starts_with(prefix.as_str()))
        {
            return (*entry, Some(pattern.as_str()));
        }
        (self.defaults.for_type(user_type), None)
    }

    fn ip_listed(list: &HashSet<IpAddr>, ip: &str) -> bool {
        ip.parse::<IpAddr>().map(|ip| list.contains(&ip)).unwrap_or(false)
    }
}

/// Millisecond wall clock
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock moved by hand, for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Counter state for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitBucket {
    pub count: u64,
    /// Epoch milliseconds at which the window ends
    pub reset_time_ms: i64,
}

/// Request attributes the limiter needs
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub ip: &'a str,
    pub identity: Option<&'a Identity>,
    pub roles: &'a EffectiveRoles,
}

/// Metadata for a counted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Window end in epoch seconds
    pub reset_epoch_secs: i64,
    /// Only set when blocked
    pub retry_after_secs: Option<u64>,
    pub key: String,
    pub user_type: UserType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitOutcome {
    /// Disabled, whitelisted or exempt; no counter touched
    Bypassed,
    /// Blacklisted IP; no counter touched
    Denied,
    Counted(RateLimitStatus),
}

impl RateLimitOutcome {
    pub fn is_allowed(&self) -> bool {
        match self {
            Self::Bypassed => true,
            Self::Denied => false,
            Self::Counted(status) => status.allowed,
        }
    }

    pub fn status(&self) -> Option<&RateLimitStatus> {
        match self {
            Self::Counted(status) => Some(status),
            _ => None,
        }
    }
}

/// Process-wide fixed-window limiter
///
/// Buckets live in striped shards; the read-modify-write for a key happens
/// under its shard lock. Buckets are never evicted, only cleared through
/// [`RateLimiter::reset_all`] or [`RateLimiter::reset_key`].
pub struct RateLimiter {
    policy: RateLimitPolicy,
    shards: Vec<Mutex<HashMap<String, RateLimitBucket>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            clock,
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, RateLimitBucket>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Check and count a request
    pub fn check(&self, request: &RateLimitRequest<'_>) -> RateLimitOutcome {
        if !self.policy.enabled {
            return RateLimitOutcome::Bypassed;
        }

        if RateLimitPolicy::ip_listed(&self.policy.blacklist, request.ip) {
            warn!(
                method = request.method,
                path = request.path,
                ip = request.ip,
                "request from blacklisted IP blocked"
            );
            return RateLimitOutcome::Denied;
        }
        if RateLimitPolicy::ip_listed(&self.policy.whitelist, request.ip) {
            return RateLimitOutcome::Bypassed;
        }

        let path = strip_query(request.path);
        if self.policy.is_exempt(path) {
            return RateLimitOutcome::Bypassed;
        }

        let user_type = UserType::classify(request.identity, request.roles);
        let (entry, route) = self.policy.resolve(path, user_type);
        let base = match request.identity {
            Some(identity) => identity.bucket_key(),
            None => format!("ip:{}", request.ip),
        };
        let key = match route {
            Some(route) => format!("{base}|{route}"),
            None => base,
        };

        let now = self.clock.now_ms();
        let bucket = self.hit(&key, entry, now);

        let allowed = bucket.count <= entry.limit;
        let retry_after = (!allowed).then(|| retry_after_secs(bucket.reset_time_ms, now));

        if !allowed {
            warn!(
                method = request.method,
                path,
                key = %key,
                user_type = user_type.as_str(),
                limit = entry.limit,
                interval_ms = entry.interval_ms,
                ip = request.ip,
                "rate limit exceeded"
            );
        }

        RateLimitOutcome::Counted(RateLimitStatus {
            allowed,
            limit: entry.limit,
            remaining: entry.limit.saturating_sub(bucket.count),
            reset_epoch_secs: div_ceil_ms(bucket.reset_time_ms),
            retry_after_secs: retry_after,
            key,
            user_type,
        })
    }

    fn hit(&self, key: &str, entry: RateLimitEntry, now: i64) -> RateLimitBucket {
        let fresh = RateLimitBucket {
            count: 0,
            reset_time_ms: now.saturating_add(entry.interval_ms as i64),
        };
        let mut shard = self.shard(key).lock();
        let bucket = shard.entry(key.to_string()).or_insert(fresh);
        if now > bucket.reset_time_ms {
            *bucket = fresh;
        }
        bucket.count += 1;
        *bucket
    }

    pub fn bucket(&self, key: &str) -> Option<RateLimitBucket> {
        self.shard(key).lock().get(key).copied()
    }

    pub fn bucket_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Drop one bucket; returns whether it existed
    pub fn reset_key(&self, key: &str) -> bool {
        self.shard(key).lock().remove(key).is_some()
    }

    /// Drop every bucket; returns how many were removed
    pub fn reset_all(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.lock();
                let n = shard.len();
                shard.clear();
                n
            })
            .sum()
    }
}

fn retry_after_secs(reset_time_ms: i64, now: i64) -> u64 {
    let wait_ms = (reset_time_ms - now).max(0) as u64;
    wait_ms.div_ceil(1000).max(1)
}

fn div_ceil_ms(ms: i64) -> i64 {
    (ms + 999).div_euclid(1000)
}
