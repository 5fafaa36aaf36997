use crate::hires::dump_queue::{DumpJob, DumpQueue};
use crate::hires::key::TextureKey;
use crate::hires::load_image_file;
use crate::logging::debug_println;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Clone)]
pub struct TexDumpConfig {
    pub enable_dump: bool,
    pub enable_replace: bool,
    pub dump_dir: PathBuf,
    pub load_dir: PathBuf,
    /// Cap on the number of filenames remembered for dedup this session.
    pub in_memory_dedup_budget: usize,
    /// Byte budget for decoded replacement images kept in memory.
    pub replacement_cache_budget_bytes: usize,
    /// Max pending dump jobs; anything past this is dropped.
    pub io_queue_cap: usize,
    pub write_png: bool,
}

impl Default for TexDumpConfig {
    fn default() -> Self {
        TexDumpConfig {
            enable_dump: false,
            enable_replace: false,
            dump_dir: PathBuf::from("User/Dump/Textures"),
            load_dir: PathBuf::from("User/Load/Textures"),
            in_memory_dedup_budget: 64_000,
            replacement_cache_budget_bytes: 128 * 1024 * 1024,
            io_queue_cap: 4096,
            write_png: cfg!(feature = "png"),
        }
    }
}

struct CacheEntry {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
}

#[derive(Default)]
struct ReplacementCache {
    entries: HashMap<String, CacheEntry>,
    bytes: usize,
}

/// Texture dump and replacement service: dumps go through the async queue,
/// replacement loads are synchronous on the rare miss path and cached
/// against a byte budget.
pub struct TexAssets {
    config: TexDumpConfig,
    game_id: Mutex<String>,
    seen: Mutex<HashSet<String>>,
    cache: Mutex<ReplacementCache>,
    queue: DumpQueue,
}

impl TexAssets {
    /// Builds the service and, when dumping is enabled, starts the worker.
    pub fn new(config: TexDumpConfig, game_id: &str) -> Self {
        let queue = DumpQueue::new(config.io_queue_cap);
        if config.enable_dump {
            queue.start();
        }

        TexAssets {
            config,
            game_id: Mutex::new(game_id.to_string()),
            seen: Mutex::new(HashSet::new()),
            cache: Mutex::new(ReplacementCache::default()),
            queue,
        }
    }

    /// Stops the worker and clears every queue and cache.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        {
            let mut cache = self.cache.lock().unwrap();
            cache.entries.clear();
            cache.bytes = 0;
        }
        self.seen.lock().unwrap().clear();
    }

    pub fn set_game_id(&self, game_id: &str) {
        *self.game_id.lock().unwrap() = game_id.to_string();
    }

    pub fn dump_enabled(&self) -> bool {
        self.config.enable_dump
    }

    pub fn replace_enabled(&self) -> bool {
        self.config.enable_replace
    }

    pub fn pending_dumps(&self) -> usize {
        self.queue.len()
    }

    fn game_dir(&self, base: &Path) -> PathBuf {
        let game_id = self.game_id.lock().unwrap();
        base.join(if game_id.is_empty() { "Unknown" } else { game_id.as_str() })
    }

    /// Non-blocking dump: dedups against this session's seen set and the
    /// filesystem, then enqueues; a full queue drops the job.
    pub fn dump_if_enabled(&self, key: &TextureKey, rgba: &[u8], width: u32, height: u32) {
        if !self.config.enable_dump {
            return;
        }

        let png = self.config.write_png;
        let dst = self.game_dir(&self.config.dump_dir).join(key.filename(png));
        let dst_str = dst.to_string_lossy().into_owned();

        {
            let mut seen = self.seen.lock().unwrap();
            if seen.contains(&dst_str) {
                return;
            }
            if dst.exists() {
                seen.insert(dst_str);
                return;
            }
            if seen.len() >= self.config.in_memory_dedup_budget {
                // cheap pruning: drop an arbitrary half rather than track LRU
                let keep: Vec<String> = seen.iter().skip(seen.len() / 2).cloned().collect();
                seen.clear();
                seen.extend(keep);
            }
            seen.insert(dst_str);
        }

        self.queue.enqueue(DumpJob {
            path: dst,
            rgba: rgba.to_vec(),
            width,
            height,
            png,
        });
    }

    /// Synchronous replacement lookup, preferred extension first. Cached by
    /// absolute filename; inserting evicts arbitrary entries until the new
    /// total fits the byte budget.
    pub fn try_load_replacement(&self, key: &TextureKey) -> Option<(Vec<u8>, u32, u32)> {
        if !self.config.enable_replace {
            return None;
        }

        let png = self.config.write_png;
        let base = self.game_dir(&self.config.load_dir);
        let png_path = base.join(key.filename(true));
        let tga_path = base.join(key.filename(false));

        if png {
            if let Some(hit) = self.try_file(&png_path) {
                return Some(hit);
            }
        }
        if let Some(hit) = self.try_file(&tga_path) {
            return Some(hit);
        }
        if !png {
            if let Some(hit) = self.try_file(&png_path) {
                return Some(hit);
            }
        }
        None
    }

    fn try_file(&self, path: &Path) -> Option<(Vec<u8>, u32, u32)> {
        let path_str = path.to_string_lossy().into_owned();

        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.entries.get(&path_str) {
                debug_println!("tex cache hit: {} ({}x{})", path_str, entry.width, entry.height);
                return Some((entry.rgba.clone(), entry.width, entry.height));
            }
        }

        if !path.exists() {
            return None;
        }

        let (rgba, width, height) = load_image_file(path)?;
        debug_println!("tex replacement loaded: {} ({}x{})", path_str, width, height);

        let mut cache = self.cache.lock().unwrap();
        let add = rgba.len();
        while cache.bytes + add > self.config.replacement_cache_budget_bytes && !cache.entries.is_empty() {
            // arbitrary eviction, precise LRU is not worth the bookkeeping
            let victim = cache.entries.keys().next().cloned().unwrap();
            if let Some(entry) = cache.entries.remove(&victim) {
                cache.bytes -= entry.rgba.len();
            }
        }
        cache.entries.insert(
            path_str,
            CacheEntry {
                rgba: rgba.clone(),
                width,
                height,
            },
        );
        cache.bytes += add;

        Some((rgba, width, height))
    }
}

impl Drop for TexAssets {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hires::key::DsiTexFmt;
    use crate::hires::tga;

    fn test_config(tag: &str) -> TexDumpConfig {
        let base = std::env::temp_dir().join(format!("nitro2d_tex_assets_{tag}"));
        let _ = std::fs::remove_dir_all(&base);
        TexDumpConfig {
            enable_dump: true,
            enable_replace: true,
            dump_dir: base.join("dump"),
            load_dir: base.join("load"),
            write_png: false,
            ..TexDumpConfig::default()
        }
    }

    fn cleanup(config: &TexDumpConfig) {
        let _ = std::fs::remove_dir_all(config.dump_dir.parent().unwrap());
    }

    #[test]
    fn dump_reload_round_trip() {
        let mut config = test_config("round_trip");
        config.dump_dir = config.load_dir.clone();
        let assets = TexAssets::new(config.clone(), "GAME");

        let rgba: Vec<u8> = (0..8 * 8 * 4).map(|i| (i * 3) as u8).collect();
        let key = TextureKey::make(&rgba, 8, 8, false, false, DsiTexFmt::Pal256);
        assets.dump_if_enabled(&key, &rgba, 8, 8);

        // the async worker owns the write
        let path = config.load_dir.join("GAME").join(key.filename(false));
        for _ in 0..200 {
            if path.exists() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let (reloaded, width, height) = assets.try_load_replacement(&key).unwrap();
        assert_eq!((width, height), (8, 8));
        assert_eq!(reloaded, rgba);

        assets.shutdown();
        cleanup(&config);
    }

    #[test]
    fn dedup_set_evicts_half_when_full() {
        let mut config = test_config("dedup");
        config.in_memory_dedup_budget = 8;
        let assets = TexAssets::new(config.clone(), "GAME");

        for i in 0..32u32 {
            let rgba = i.to_le_bytes().repeat(4);
            let key = TextureKey::make(&rgba, 2, 2, false, false, DsiTexFmt::Direct);
            assets.dump_if_enabled(&key, &rgba, 2, 2);
        }
        assert!(assets.seen.lock().unwrap().len() <= config.in_memory_dedup_budget);

        assets.shutdown();
        cleanup(&config);
    }

    #[test]
    fn replacement_cache_respects_budget() {
        let mut config = test_config("budget");
        config.replacement_cache_budget_bytes = 3 * 16; // fits three 2x2 images
        let assets = TexAssets::new(config.clone(), "GAME");

        let load_dir = config.load_dir.join("GAME");
        let mut keys = Vec::new();
        for i in 0..5u8 {
            let rgba = vec![i; 16];
            let key = TextureKey::make(&rgba, 2, 2, false, false, DsiTexFmt::Direct);
            tga::write_tga(&load_dir.join(key.filename(false)), &rgba, 2, 2).unwrap();
            keys.push((key, rgba));
        }

        for (key, rgba) in &keys {
            let (loaded, _, _) = assets.try_load_replacement(key).unwrap();
            assert_eq!(&loaded, rgba);
        }
        let cache = assets.cache.lock().unwrap();
        assert!(cache.bytes <= config.replacement_cache_budget_bytes);
        assert!(!cache.entries.is_empty());
        drop(cache);

        assets.shutdown();
        cleanup(&config);
    }

    #[test]
    fn queue_backpressure_drops_exactly_one() {
        // worker deliberately not started so nothing drains while enqueueing
        let queue = DumpQueue::new(4);
        let mut dropped = 0;
        for i in 0..5 {
            let accepted = queue.enqueue(DumpJob {
                path: PathBuf::from(format!("/nonexistent/{i}.tga")),
                rgba: vec![0; 4],
                width: 1,
                height: 1,
                png: false,
            });
            if !accepted {
                dropped += 1;
            }
        }
        assert_eq!(dropped, 1);
    }
}
