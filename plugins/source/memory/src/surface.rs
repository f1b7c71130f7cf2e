use std::sync::Mutex;

use rowdrop_api::DisplaySurface;

/// Surface that keeps every painted markup.
#[derive(Debug, Default)]
pub struct MemorySurface {
    paints: Mutex<Vec<String>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paints(&self) -> Vec<String> {
        self.guard().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.guard().last().cloned()
    }

    pub fn paint_count(&self) -> usize {
        self.guard().len()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.paints.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DisplaySurface for MemorySurface {
    fn paint(&self, markup: &str) {
        self.guard().push(markup.to_string());
    }
}
