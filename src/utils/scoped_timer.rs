use std::time::Instant;

use tracing::trace;

pub(crate) struct ScopedTimer<'a> {
    start: Instant,
    name: &'static str,
    path: &'a str,
}

impl<'a> ScopedTimer<'a> {
    pub(crate) fn new(
        name: &'static str,
        path: &'a str,
    ) -> Self {
        Self {
            start: Instant::now(),
            name,
            path,
        }
    }

    pub(crate) fn start(&self) -> Instant {
        self.start
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        trace!(target: "timing", "[TIMING] {}, path: {}, took {} ms", self.name, self.path, elapsed.as_millis());
    }
}
