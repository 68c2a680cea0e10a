//! Which backends this build can run on.

use super::Backend;

/// Availability of one compiled-in backend.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub backend: Backend,
    pub available: bool,
    /// Auto-selection rank; the highest available backend wins.
    pub rank: u8,
    pub summary: &'static str,
}

/// Probe every backend compiled into this build, best first.
pub fn detect_backends() -> Vec<BackendInfo> {
    #[allow(unused_mut)]
    let mut found = Vec::with_capacity(2);

    #[cfg(feature = "opencl")]
    found.push(BackendInfo {
        backend: Backend::OpenCl,
        available: super::OpenClPlatform::is_available(),
        rank: 2,
        summary: "first platform reported by the OpenCL ICD loader",
    });

    found.push(BackendInfo {
        backend: Backend::Emulated,
        available: true,
        rank: 1,
        summary: "device layer emulated on host threads (rayon)",
    });

    found.sort_by_key(|info| std::cmp::Reverse((info.available, info.rank)));
    found
}

/// The backend `--backend auto` resolves to.
pub fn select_best_backend() -> Backend {
    detect_backends()
        .into_iter()
        .find(|info| info.available)
        .map_or(Backend::Emulated, |info| info.backend)
}

/// One line per backend, `[+]` when usable.
pub fn describe_backends() -> String {
    detect_backends()
        .iter()
        .map(|info| {
            let mark = if info.available { '+' } else { '-' };
            format!("[{mark}] {}: {}\n", info.backend.name(), info.summary)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulated_is_always_listed() {
        let found = detect_backends();
        assert!(found.iter().any(|i| i.backend == Backend::Emulated && i.available));
        assert!(describe_backends().contains("[+] emulated:"));
    }

    #[test]
    fn best_backend_is_available() {
        let best = select_best_backend();
        assert_ne!(best, Backend::Auto);
        assert!(detect_backends().iter().any(|i| i.backend == best && i.available));
    }
}
