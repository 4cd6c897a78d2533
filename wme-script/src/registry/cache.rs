use std::rc::Rc;

use crate::image::ScriptImage;

struct CacheEntry {
    key: String,
    image: Rc<ScriptImage>,
    last_used: u64,
}

/// Loaded images by filename (case-insensitive); the least recently used
/// image is evicted when full.
pub struct ScriptCache {
    entries: Vec<CacheEntry>,
    capacity: usize,
    clock: u64,
}

fn cache_key(filename: &str) -> String {
    filename.replace('/', "\\").to_ascii_lowercase()
}

impl ScriptCache {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::new(), capacity: capacity.max(1), clock: 0 }
    }

    pub fn get(&mut self, filename: &str) -> Option<Rc<ScriptImage>> {
        let key = cache_key(filename);
        self.clock += 1;
        let now = self.clock;
        self.entries.iter_mut().find(|e| e.key == key).map(|e| {
            e.last_used = now;
            Rc::clone(&e.image)
        })
    }

    pub fn contains(&self, filename: &str) -> bool {
        let key = cache_key(filename);
        self.entries.iter().any(|e| e.key == key)
    }

    pub fn insert(&mut self, image: Rc<ScriptImage>) {
        let key = cache_key(image.filename());
        self.clock += 1;
        if let Some(e) = self.entries.iter_mut().find(|e| e.key == key) {
            e.image = image;
            e.last_used = self.clock;
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(i, _)| i)
            {
                let evicted = self.entries.swap_remove(oldest);
                log::debug!("script cache: evicting '{}'", evicted.image.filename());
            }
        }
        self.entries.push(CacheEntry { key, image, last_used: self.clock });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
