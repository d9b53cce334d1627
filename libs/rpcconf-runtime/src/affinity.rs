//! Provider selection for one reference, with optional sticky affinity.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::directory::Provider;

/// Picks a provider per call.
///
/// Without stickiness providers are rotated round-robin. With stickiness the
/// previously picked provider is reused for as long as it is still offered.
#[derive(Debug)]
pub struct StickyAffinity {
    sticky: bool,
    pinned: Mutex<Option<String>>,
    next: AtomicUsize,
}

impl StickyAffinity {
    #[must_use]
    pub fn new(sticky: bool) -> Self {
        Self {
            sticky,
            pinned: Mutex::new(None),
            next: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn is_sticky(&self) -> bool {
        self.sticky
    }

    #[must_use]
    pub fn select(&self, providers: &[Provider]) -> Option<Provider> {
        if providers.is_empty() {
            return None;
        }
        if !self.sticky {
            return Some(self.round_robin(providers).clone());
        }

        let mut pinned = self.pinned.lock();
        if let Some(id) = pinned.as_deref()
            && let Some(hit) = providers.iter().find(|p| p.id() == id)
        {
            return Some(hit.clone());
        }
        let picked = self.round_robin(providers).clone();
        tracing::debug!(provider = %picked.id(), "sticky provider pinned");
        *pinned = Some(picked.id());
        Some(picked)
    }

    /// Id of the provider currently pinned, if any.
    #[must_use]
    pub fn pinned(&self) -> Option<String> {
        self.pinned.lock().clone()
    }

    pub fn reset(&self) {
        *self.pinned.lock() = None;
    }

    fn round_robin<'a>(&self, providers: &'a [Provider]) -> &'a Provider {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % providers.len();
        &providers[idx]
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use rpcconf::AnnouncementUrl;

    fn provider(host: &str) -> Provider {
        Provider::from_url(
            AnnouncementUrl::parse(&format!(
                "dubbo://{host}:20880/com.example.Echo?interface=com.example.Echo&side=provider"
            ))
            .unwrap(),
        )
    }

    #[test]
    fn test_round_robin_without_stickiness() {
        let affinity = StickyAffinity::new(false);
        let providers = [provider("a"), provider("b")];

        let picks: Vec<String> = (0..4)
            .map(|_| affinity.select(&providers).unwrap().url.host().to_owned())
            .collect();
        assert_eq!(picks, ["a", "b", "a", "b"]);
        assert_eq!(affinity.pinned(), None);
    }

    #[test]
    fn test_sticky_reuses_provider_until_it_disappears() {
        let affinity = StickyAffinity::new(true);
        let providers = [provider("a"), provider("b")];

        let first = affinity.select(&providers).unwrap();
        for _ in 0..3 {
            assert_eq!(affinity.select(&providers).unwrap(), first);
        }

        let remaining: Vec<Provider> = providers.iter().filter(|p| **p != first).cloned().collect();
        let moved = affinity.select(&remaining).unwrap();
        assert_ne!(moved, first);
        assert_eq!(affinity.select(&providers).unwrap(), moved);
    }

    #[test]
    fn test_empty_and_reset() {
        let affinity = StickyAffinity::new(true);
        assert!(affinity.select(&[]).is_none());

        affinity.select(&[provider("a")]).unwrap();
        assert!(affinity.pinned().is_some());
        affinity.reset();
        assert!(affinity.pinned().is_none());
    }
}
