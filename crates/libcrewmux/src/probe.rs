use std::collections::HashMap;
use std::sync::Arc;

use crewmux_protocol::AgentRole;

use crate::screen::ScreenSnapshot;

/// Readiness signal for one agent kind.
///
/// A session counts as `active` only once its probe matches the visible
/// screen; until then it is `activating`. Roles ship a default banner probe
/// but callers can register their own signature for new agent programs.
pub trait ReadinessProbe: Send + Sync {
    fn is_ready(&self, screen: &ScreenSnapshot) -> bool;
}

/// Matches when any of the configured banner fragments is visible.
pub struct BannerProbe {
    needles: Vec<String>,
}

impl BannerProbe {
    pub fn new(needles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            needles: needles.into_iter().map(Into::into).collect(),
        }
    }
}

impl ReadinessProbe for BannerProbe {
    fn is_ready(&self, screen: &ScreenSnapshot) -> bool {
        self.needles.iter().any(|needle| screen.contains(needle))
    }
}

/// Per-role probe lookup with a shared default.
pub struct ProbeRegistry {
    probes: HashMap<AgentRole, Arc<dyn ReadinessProbe>>,
    fallback: Arc<dyn ReadinessProbe>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        // The stock agent CLI prints a shortcuts hint and an input box once
        // its REPL is up; either is a usable readiness signature.
        let fallback: Arc<dyn ReadinessProbe> =
            Arc::new(BannerProbe::new(["? for shortcuts", "│ >", "ready>"]));
        Self {
            probes: HashMap::new(),
            fallback,
        }
    }

    pub fn register(&mut self, role: AgentRole, probe: Arc<dyn ReadinessProbe>) {
        self.probes.insert(role, probe);
    }

    pub fn probe_for(&self, role: AgentRole) -> Arc<dyn ReadinessProbe> {
        self.probes.get(&role).cloned().unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::ScreenBuffer;

    fn snapshot_of(bytes: &[u8]) -> ScreenSnapshot {
        let mut screen = ScreenBuffer::new(60, 6);
        screen.feed(bytes);
        screen.snapshot()
    }

    #[test]
    fn banner_probe_matches_any_needle() {
        let probe = BannerProbe::new(["ready>", "? for shortcuts"]);
        assert!(probe.is_ready(&snapshot_of(b"starting up\n? for shortcuts\n")));
        assert!(!probe.is_ready(&snapshot_of(b"starting up\n")));
    }

    #[test]
    fn registry_prefers_registered_probe() {
        let mut registry = ProbeRegistry::new();
        registry.register(
            AgentRole::Qa,
            Arc::new(BannerProbe::new(["qa harness loaded"])),
        );

        let qa = registry.probe_for(AgentRole::Qa);
        assert!(qa.is_ready(&snapshot_of(b"qa harness loaded\n")));
        assert!(!qa.is_ready(&snapshot_of(b"? for shortcuts\n")));

        // Unregistered roles fall back to the stock banner probe.
        let dev = registry.probe_for(AgentRole::Developer);
        assert!(dev.is_ready(&snapshot_of(b"? for shortcuts\n")));
    }
}
