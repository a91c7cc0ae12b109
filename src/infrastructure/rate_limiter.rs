//! 限流器 - 基础设施层
//!
//! 整个子系统中唯一的共享可变状态：按服务记录分钟窗口和天窗口的请求计数。
//!
//! - 计数桶按 `(服务名, 窗口)` 懒创建
//! - 桶到期后在下一次访问时重置
//! - 过期桶定期清扫，避免长期运行时无限增长
//! - 内部使用 `Mutex` 保护，可在并发分块处理时共享

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ProviderError;
use crate::models::RateLimit;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// 清扫过期桶的最小间隔
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// 计数窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Window {
    Minute,
    Day,
}

impl Window {
    fn length(self) -> Duration {
        match self {
            Window::Minute => MINUTE,
            Window::Day => DAY,
        }
    }

    fn ceiling(self, limits: &RateLimit) -> u32 {
        match self {
            Window::Minute => limits.per_minute,
            Window::Day => limits.per_day,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug)]
struct LimiterState {
    buckets: HashMap<(String, Window), Bucket>,
    last_sweep: Instant,
}

/// 限流器
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LimiterState {
                buckets: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// 检查服务是否还有配额（任一窗口达到上限即拒绝）
    pub fn check_quota(&self, provider_id: &str, limits: &RateLimit) -> bool {
        self.check_quota_at(provider_id, limits, Instant::now())
    }

    /// 消耗一次配额
    pub fn consume_quota(&self, provider_id: &str, limits: &RateLimit) {
        self.consume_quota_at(provider_id, limits, Instant::now())
    }

    /// 原子地检查并消耗一次配额，返回是否放行
    ///
    /// 并发调用时应使用此方法，避免检查与消耗之间被其他任务插入。
    pub fn try_acquire(&self, provider_id: &str, limits: &RateLimit) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        if !Self::has_room(&mut state, provider_id, limits, now) {
            return false;
        }
        Self::increment(&mut state, provider_id, now);
        true
    }

    /// 同 `try_acquire`，配额耗尽时返回 `RateLimited`
    pub fn acquire(&self, provider_id: &str, limits: &RateLimit) -> Result<(), ProviderError> {
        if self.try_acquire(provider_id, limits) {
            Ok(())
        } else {
            Err(ProviderError::RateLimited {
                provider: provider_id.to_string(),
            })
        }
    }

    /// 当前跟踪的计数桶数量
    pub fn tracked_buckets(&self) -> usize {
        self.lock().buckets.len()
    }

    pub(crate) fn check_quota_at(&self, provider_id: &str, limits: &RateLimit, now: Instant) -> bool {
        let mut state = self.lock();
        Self::has_room(&mut state, provider_id, limits, now)
    }

    pub(crate) fn consume_quota_at(&self, provider_id: &str, _limits: &RateLimit, now: Instant) {
        let mut state = self.lock();
        Self::increment(&mut state, provider_id, now);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LimiterState> {
        // 计数器在 panic 后仍然可用，不需要传播中毒状态
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn has_room(state: &mut LimiterState, provider_id: &str, limits: &RateLimit, now: Instant) -> bool {
        Self::maybe_sweep(state, now);
        [Window::Minute, Window::Day].into_iter().all(|window| {
            let count = state
                .buckets
                .get(&(provider_id.to_string(), window))
                .filter(|bucket| bucket.reset_at > now)
                .map_or(0, |bucket| bucket.count);
            count < window.ceiling(limits)
        })
    }

    fn increment(state: &mut LimiterState, provider_id: &str, now: Instant) {
        for window in [Window::Minute, Window::Day] {
            let bucket = state
                .buckets
                .entry((provider_id.to_string(), window))
                .or_insert(Bucket {
                    count: 0,
                    reset_at: now + window.length(),
                });
            if bucket.reset_at <= now {
                bucket.count = 0;
                bucket.reset_at = now + window.length();
            }
            bucket.count = bucket.count.saturating_add(1);
        }
    }

    fn maybe_sweep(state: &mut LimiterState, now: Instant) {
        if now.saturating_duration_since(state.last_sweep) < SWEEP_INTERVAL {
            return;
        }
        let before = state.buckets.len();
        state.buckets.retain(|_, bucket| bucket.reset_at > now);
        state.last_sweep = now;
        let removed = before - state.buckets.len();
        if removed > 0 {
            debug!("限流器清扫过期计数桶 {} 个", removed);
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_denies_after_minute_ceiling() {
        let limiter = RateLimiter::new();
        let limits = RateLimit::new(10, 1000);
        let mut denials = 0;
        for _ in 0..15 {
            if limiter.check_quota("groq", &limits) {
                limiter.consume_quota("groq", &limits);
            } else {
                denials += 1;
            }
        }
        assert!(denials >= 5);
    }

    #[test]
    fn test_day_ceiling_also_applies() {
        let limiter = RateLimiter::new();
        let limits = RateLimit::new(100, 3);
        assert!(limiter.try_acquire("gemini", &limits));
        assert!(limiter.try_acquire("gemini", &limits));
        assert!(limiter.try_acquire("gemini", &limits));
        assert!(!limiter.try_acquire("gemini", &limits));
    }

    #[test]
    fn test_acquire_reports_rate_limited() {
        let limiter = RateLimiter::new();
        let limits = RateLimit::new(1, 10);
        assert!(limiter.acquire("groq", &limits).is_ok());

        let err = limiter.acquire("groq", &limits).unwrap_err();
        assert_eq!(
            err,
            ProviderError::RateLimited {
                provider: "groq".into()
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_providers_are_independent() {
        let limiter = RateLimiter::new();
        let limits = RateLimit::new(1, 10);
        assert!(limiter.try_acquire("a", &limits));
        assert!(!limiter.try_acquire("a", &limits));
        assert!(limiter.try_acquire("b", &limits));
    }

    #[test]
    fn test_minute_window_resets() {
        let limiter = RateLimiter::new();
        let limits = RateLimit::new(2, 100);
        let start = Instant::now();
        limiter.consume_quota_at("openai", &limits, start);
        limiter.consume_quota_at("openai", &limits, start);
        assert!(!limiter.check_quota_at("openai", &limits, start));

        let later = start + Duration::from_secs(61);
        assert!(limiter.check_quota_at("openai", &limits, later));
    }

    #[test]
    fn test_expired_buckets_are_swept() {
        let limiter = RateLimiter::new();
        let limits = RateLimit::new(5, 5);
        let start = Instant::now();
        limiter.consume_quota_at("openai", &limits, start);
        assert_eq!(limiter.tracked_buckets(), 2);

        // 分钟桶过期后被清扫，天桶仍保留
        let later = start + Duration::from_secs(120);
        limiter.check_quota_at("openai", &limits, later);
        assert_eq!(limiter.tracked_buckets(), 1);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_ceiling() {
        let limiter = Arc::new(RateLimiter::new());
        let limits = RateLimit::new(20, 1000);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..10).filter(|_| limiter.try_acquire("shared", &limits)).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 20);
    }
}
