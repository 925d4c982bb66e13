use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;

use crate::error::ResolutionError;
use crate::pool_registry::{PoolConfig, PoolRegistry, WeightedDomain};

/// Source of the uniform draw used by weighted selection
pub trait RandomSource {
    /// Returns a value uniformly distributed in `[0, upper)`. `upper` is never 0.
    fn draw_below(&mut self, upper: u64) -> u64;
}

impl<R: Rng + ?Sized> RandomSource for R {
    fn draw_below(&mut self, upper: u64) -> u64 {
        self.gen_range(0..upper)
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectResult {
    pub url: String,
    pub domain: String,
    pub headers: BTreeMap<String, String>,
}

/// Resolves redirect targets against a shared, read-only registry.
///
/// Resolution depends only on the registry and one random draw: the pool's
/// default list is replaced by the path-based list with the longest matching
/// prefix, then one domain is picked with probability proportional to its
/// weight.
#[derive(Debug, Clone)]
pub struct RedirectResolver {
    registry: Arc<PoolRegistry>,
}

impl RedirectResolver {
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        Self { registry }
    }

    /// Resolves using the calling thread's generator
    pub fn resolve(
        &self,
        pool_id: &str,
        request_path: &str,
    ) -> Result<RedirectResult, ResolutionError> {
        self.resolve_with(&mut rand::thread_rng(), pool_id, request_path)
    }

    /// Resolves using the given random source.
    ///
    /// `request_path` is the part after `/redirect/{pool}/` and may carry a
    /// query string, which is re-appended to the target unmodified.
    pub fn resolve_with<R: RandomSource + ?Sized>(
        &self,
        rng: &mut R,
        pool_id: &str,
        request_path: &str,
    ) -> Result<RedirectResult, ResolutionError> {
        let pool = self
            .registry
            .get(pool_id)
            .ok_or(ResolutionError::PoolNotFound)?;

        let (path, query) = match request_path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (request_path, None),
        };

        let candidates = select_domain_set(pool, path);
        if candidates.is_empty() {
            return Err(ResolutionError::NoDomainsAvailable);
        }

        let chosen = choose_domain(candidates, rng)?;

        Ok(RedirectResult {
            url: build_redirect_url(&chosen.domain, path, query),
            domain: chosen.domain.clone(),
            headers: pool.custom_headers.clone(),
        })
    }
}

/// Picks the path-based list whose key is the longest prefix of `path`,
/// falling back to the pool's default list.
pub fn select_domain_set<'a>(pool: &'a PoolConfig, path: &str) -> &'a [WeightedDomain] {
    let path = strip_leading_slash(path);

    pool.path_based_domains
        .iter()
        .filter(|(key, _)| path.starts_with(strip_leading_slash(key)))
        // "/x" and "x" normalize to the same prefix; the raw key orders them
        .max_by(|(a, _), (b, _)| {
            let (a_norm, b_norm) = (strip_leading_slash(a), strip_leading_slash(b));
            a_norm.len().cmp(&b_norm.len()).then_with(|| a.cmp(b))
        })
        .map(|(_, domains)| domains.as_slice())
        .unwrap_or(pool.domains.as_slice())
}

/// Weighted random pick: one draw in `[0, total)` walked against the
/// cumulative weights in list order.
pub fn choose_domain<'a, R: RandomSource + ?Sized>(
    domains: &'a [WeightedDomain],
    rng: &mut R,
) -> Result<&'a WeightedDomain, ResolutionError> {
    let total = domains.iter().try_fold(0u64, |acc, candidate| {
        acc.checked_add(candidate.weight)
            .ok_or(ResolutionError::InvalidWeight)
    })?;

    if total == 0 {
        return Err(ResolutionError::NoDomainsAvailable);
    }

    let draw = rng.draw_below(total);
    let mut upper = 0u64;
    for candidate in domains {
        upper += candidate.weight;
        if draw < upper {
            return Ok(candidate);
        }
    }

    // Only reachable if the source returned a value outside [0, total)
    Err(ResolutionError::InvalidWeight)
}

/// `https://{domain}/{path}` with the query re-appended verbatim
pub fn build_redirect_url(domain: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!("https://{}/{}", domain, strip_leading_slash(path));
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn strip_leading_slash(s: &str) -> &str {
    s.strip_prefix('/').unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Always draws the same value, clamped into range
    struct FixedDraw(u64);

    impl RandomSource for FixedDraw {
        fn draw_below(&mut self, upper: u64) -> u64 {
            self.0.min(upper - 1)
        }
    }

    fn wd(domain: &str, weight: u64) -> WeightedDomain {
        WeightedDomain::new(domain, weight)
    }

    fn resolver_with(pools: Vec<(&str, PoolConfig)>) -> RedirectResolver {
        let pools: HashMap<String, PoolConfig> = pools
            .into_iter()
            .map(|(id, pool)| (id.to_string(), pool))
            .collect();
        RedirectResolver::new(PoolRegistry::new(pools))
    }

    fn pool(domains: Vec<WeightedDomain>) -> PoolConfig {
        PoolConfig {
            domains,
            ..Default::default()
        }
    }

    // ========== Weighted selection ==========

    #[test]
    fn test_fixed_draw_walks_cumulative_weights() {
        let domains = vec![wd("a", 2), wd("b", 3), wd("c", 5)];

        let expected = [
            (0, "a"),
            (1, "a"),
            (2, "b"),
            (4, "b"),
            (5, "c"),
            (9, "c"),
        ];
        for (draw, want) in expected {
            let chosen = choose_domain(&domains, &mut FixedDraw(draw)).unwrap();
            assert_eq!(chosen.domain, want, "draw {draw}");
        }
    }

    #[test]
    fn test_same_draw_same_domain() {
        let resolver = resolver_with(vec![("p", pool(vec![wd("a", 1), wd("b", 1), wd("c", 1)]))]);

        let first = resolver.resolve_with(&mut FixedDraw(1), "p", "x").unwrap();
        for _ in 0..20 {
            let again = resolver.resolve_with(&mut FixedDraw(1), "p", "x").unwrap();
            assert_eq!(again, first);
        }
        assert_eq!(first.domain, "b");
    }

    #[test]
    fn test_weighted_fairness() {
        let domains = vec![wd("a", 1), wd("b", 3), wd("c", 6)];
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 100_000;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for _ in 0..draws {
            let chosen = choose_domain(&domains, &mut rng).unwrap();
            *counts.entry(chosen.domain.as_str()).or_default() += 1;
        }

        for (domain, weight) in [("a", 0.1), ("b", 0.3), ("c", 0.6)] {
            let observed = counts[domain] as f64 / draws as f64;
            assert!(
                (observed - weight).abs() < 0.01,
                "{domain}: observed {observed}, expected {weight}"
            );
        }
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let domains = vec![wd("zero", 0), wd("a", 1), wd("zero-too", 0), wd("b", 1)];

        for draw in 0..2 {
            let chosen = choose_domain(&domains, &mut FixedDraw(draw)).unwrap();
            assert!(!chosen.domain.starts_with("zero"));
        }

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let chosen = choose_domain(&domains, &mut rng).unwrap();
            assert!(!chosen.domain.starts_with("zero"));
        }
    }

    #[test]
    fn test_all_zero_weights_fail() {
        let domains = vec![wd("a", 0), wd("b", 0)];
        let err = choose_domain(&domains, &mut FixedDraw(0)).unwrap_err();
        assert_eq!(err, ResolutionError::NoDomainsAvailable);

        let resolver = resolver_with(vec![("p", pool(domains))]);
        assert_eq!(
            resolver.resolve("p", "x").unwrap_err(),
            ResolutionError::NoDomainsAvailable
        );
    }

    #[test]
    fn test_weight_overflow_is_invalid_weight() {
        let domains = vec![wd("a", u64::MAX), wd("b", 1)];
        let err = choose_domain(&domains, &mut FixedDraw(0)).unwrap_err();
        assert_eq!(err, ResolutionError::InvalidWeight);
    }

    // ========== Domain set selection ==========

    #[test]
    fn test_prefix_override() {
        let mut p = pool(vec![wd("default.example.com", 1)]);
        p.path_based_domains
            .insert("/foo".to_string(), vec![wd("foo.example.com", 1)]);
        let resolver = resolver_with(vec![("p", p)]);

        let hit = resolver.resolve("p", "foo/bar").unwrap();
        assert_eq!(hit.domain, "foo.example.com");

        let hit = resolver.resolve("p", "/foo/bar").unwrap();
        assert_eq!(hit.domain, "foo.example.com");

        let miss = resolver.resolve("p", "bar/foo").unwrap();
        assert_eq!(miss.domain, "default.example.com");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut p = pool(vec![wd("default", 1)]);
        p.path_based_domains.insert("a".to_string(), vec![wd("short", 1)]);
        p.path_based_domains.insert("a/b".to_string(), vec![wd("long", 1)]);
        p.path_based_domains.insert("a/b/c/d".to_string(), vec![wd("too-long", 1)]);

        assert_eq!(select_domain_set(&p, "a/b/c")[0].domain, "long");
        assert_eq!(select_domain_set(&p, "a/x")[0].domain, "short");
        assert_eq!(select_domain_set(&p, "b")[0].domain, "default");
    }

    #[test]
    fn test_equivalent_prefixes_resolve_deterministically() {
        let mut p = pool(vec![wd("default", 1)]);
        p.path_based_domains.insert("/dup".to_string(), vec![wd("slashed", 1)]);
        p.path_based_domains.insert("dup".to_string(), vec![wd("bare", 1)]);

        for _ in 0..10 {
            assert_eq!(select_domain_set(&p, "dup/1")[0].domain, "bare");
        }
    }

    #[test]
    fn test_empty_prefix_matches_everything() {
        let mut p = pool(vec![wd("default", 1)]);
        p.path_based_domains.insert(String::new(), vec![wd("catch-all", 1)]);
        p.path_based_domains.insert("x".to_string(), vec![wd("x", 1)]);

        assert_eq!(select_domain_set(&p, "anything")[0].domain, "catch-all");
        assert_eq!(select_domain_set(&p, "xyz")[0].domain, "x");
    }

    #[test]
    fn test_prefix_ignores_query_string() {
        let mut p = pool(vec![wd("default.example.com", 1)]);
        p.path_based_domains
            .insert("page".to_string(), vec![wd("page.example.com", 1)]);
        let resolver = resolver_with(vec![("p", p)]);

        let result = resolver.resolve("p", "other?next=page").unwrap();
        assert_eq!(result.domain, "default.example.com");
    }

    // ========== Resolution ==========

    #[test]
    fn test_unknown_pool() {
        let resolver = resolver_with(vec![("p", pool(vec![wd("a", 1)]))]);
        assert_eq!(
            resolver.resolve("nonexistent", "/p").unwrap_err(),
            ResolutionError::PoolNotFound
        );
    }

    #[test]
    fn test_empty_pool() {
        let mut p = pool(vec![]);
        p.path_based_domains.insert("only/".to_string(), vec![wd("a", 1)]);
        let resolver = resolver_with(vec![("p", p)]);

        assert_eq!(
            resolver.resolve("p", "elsewhere").unwrap_err(),
            ResolutionError::NoDomainsAvailable
        );
        assert!(resolver.resolve("p", "only/here").is_ok());
    }

    #[test]
    fn test_empty_override_does_not_fall_back() {
        let mut p = pool(vec![wd("default", 1)]);
        p.path_based_domains.insert("off".to_string(), vec![]);
        let resolver = resolver_with(vec![("p", p)]);

        assert_eq!(
            resolver.resolve("p", "off/now").unwrap_err(),
            ResolutionError::NoDomainsAvailable
        );
    }

    #[test]
    fn test_query_string_preserved() {
        let resolver = resolver_with(vec![("p", pool(vec![wd("a.example.com", 1)]))]);
        let result = resolver.resolve("p", "landing/page?x=1&y=2").unwrap();
        assert_eq!(result.url, "https://a.example.com/landing/page?x=1&y=2");

        let result = resolver.resolve("p", "q?a=%20b&c").unwrap();
        assert_eq!(result.url, "https://a.example.com/q?a=%20b&c");
    }

    #[test]
    fn test_url_without_query() {
        let resolver = resolver_with(vec![("p", pool(vec![wd("a.example.com", 1)]))]);
        assert_eq!(
            resolver.resolve("p", "landing").unwrap().url,
            "https://a.example.com/landing"
        );
        assert_eq!(resolver.resolve("p", "").unwrap().url, "https://a.example.com/");
        assert_eq!(
            resolver.resolve("p", "landing?").unwrap().url,
            "https://a.example.com/landing"
        );
    }

    #[test]
    fn test_custom_headers_attached() {
        let mut p = pool(vec![wd("a.example.com", 1)]);
        p.custom_headers.insert("X-Foo".to_string(), "bar".to_string());
        let resolver = resolver_with(vec![("p", p)]);

        let result = resolver.resolve("p", "x").unwrap();
        let expected: BTreeMap<String, String> =
            [("X-Foo".to_string(), "bar".to_string())].into_iter().collect();
        assert_eq!(result.headers, expected);
    }

    #[test]
    fn test_build_redirect_url() {
        assert_eq!(build_redirect_url("d", "/a/b", None), "https://d/a/b");
        assert_eq!(build_redirect_url("d", "a/b", Some("k=v")), "https://d/a/b?k=v");
        assert_eq!(build_redirect_url("d:8443", "", Some("")), "https://d:8443/");
    }
}
