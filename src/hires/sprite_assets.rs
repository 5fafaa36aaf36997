use crate::hires::key::{ObjFmt, SpriteKey};
use crate::hires::{load_image_file, write_image_file};
use crate::logging::debug_println;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Clone)]
pub struct SpriteDumpConfig {
    pub enable_dump: bool,
    pub enable_replace: bool,
    /// Swap R/B when converting replacement images.
    pub swap_rb: bool,
    pub dump_dir: PathBuf,
    pub load_dir: PathBuf,
    pub write_png: bool,
}

impl Default for SpriteDumpConfig {
    fn default() -> Self {
        SpriteDumpConfig {
            enable_dump: false,
            // replacement lookups are allowed by default, call sites gate usage
            enable_replace: true,
            swap_rb: false,
            dump_dir: PathBuf::from("User/Dump/Sprites"),
            load_dir: PathBuf::from("User/Load/Sprites"),
            write_png: cfg!(feature = "png"),
        }
    }
}

struct CacheEntry {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
}

/// Sprite dump and replacement service. Dumps are written synchronously
/// (sprites are small and keyed once per VBlank); replacement images are
/// cached per absolute filename.
pub struct SpriteAssets {
    config: SpriteDumpConfig,
    game_id: Mutex<String>,
    seen: Mutex<HashSet<String>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl SpriteAssets {
    pub fn new(config: SpriteDumpConfig, game_id: &str) -> Self {
        SpriteAssets {
            config,
            game_id: Mutex::new(game_id.to_string()),
            seen: Mutex::new(HashSet::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_game_id(&self, game_id: &str) {
        *self.game_id.lock().unwrap() = game_id.to_string();
    }

    pub fn shutdown(&self) {
        self.seen.lock().unwrap().clear();
        self.cache.lock().unwrap().clear();
    }

    pub fn dump_enabled(&self) -> bool {
        self.config.enable_dump
    }

    pub fn replace_enabled(&self) -> bool {
        self.config.enable_replace
    }

    pub fn swap_rb_enabled(&self) -> bool {
        self.config.swap_rb
    }

    pub fn make_key(rgba: &[u8], width: u32, height: u32, fmt: ObjFmt) -> SpriteKey {
        SpriteKey::make(rgba, width, height, fmt)
    }

    fn game_dir(&self, base: &Path) -> PathBuf {
        let game_id = self.game_id.lock().unwrap();
        base.join(if game_id.is_empty() { "Unknown" } else { game_id.as_str() })
    }

    pub fn dump_if_enabled(&self, key: &SpriteKey, rgba: &[u8], width: u32, height: u32) {
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
        }

        if write_image_file(&dst, rgba, width, height, png) {
            self.seen.lock().unwrap().insert(dst_str);
        }
    }

    /// Synchronously loads a replacement for the keyed content, trying the
    /// preferred extension first. The returned image may be an integer
    /// multiple of the native sprite size on each axis.
    pub fn try_load_replacement(&self, key: &SpriteKey) -> Option<(Vec<u8>, u32, u32)> {
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
            if let Some(entry) = cache.get(&path_str) {
                return Some((entry.rgba.clone(), entry.width, entry.height));
            }
        }

        if !path.exists() {
            return None;
        }

        let (rgba, width, height) = load_image_file(path)?;
        debug_println!("sprite replacement loaded: {} ({}x{})", path_str, width, height);

        let mut cache = self.cache.lock().unwrap();
        cache.insert(
            path_str,
            CacheEntry {
                rgba: rgba.clone(),
                width,
                height,
            },
        );
        Some((rgba, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dirs(tag: &str) -> (PathBuf, PathBuf) {
        let base = std::env::temp_dir().join(format!("nitro2d_sprite_assets_{tag}"));
        let _ = std::fs::remove_dir_all(&base);
        (base.join("dump"), base.join("load"))
    }

    fn test_config(tag: &str) -> SpriteDumpConfig {
        let (dump_dir, load_dir) = temp_dirs(tag);
        SpriteDumpConfig {
            enable_dump: true,
            enable_replace: true,
            swap_rb: false,
            dump_dir,
            load_dir,
            write_png: false,
        }
    }

    #[test]
    fn dump_then_reload_round_trip() {
        let mut config = test_config("round_trip");
        // dump into the load dir so the reload finds it
        config.dump_dir = config.load_dir.clone();
        let assets = SpriteAssets::new(config.clone(), "AAAA");

        let rgba: Vec<u8> = (0..16 * 16 * 4).map(|i| (i * 7) as u8).collect();
        let key = SpriteAssets::make_key(&rgba, 16, 16, ObjFmt::Pal16);
        assets.dump_if_enabled(&key, &rgba, 16, 16);

        let (reloaded, width, height) = assets.try_load_replacement(&key).unwrap();
        assert_eq!((width, height), (16, 16));
        assert_eq!(reloaded, rgba);

        let _ = std::fs::remove_dir_all(config.load_dir.parent().unwrap());
    }

    #[test]
    fn replacement_miss_returns_none() {
        let assets = SpriteAssets::new(test_config("miss"), "AAAA");
        let key = SpriteAssets::make_key(&[0; 16], 2, 2, ObjFmt::Pal256);
        assert!(assets.try_load_replacement(&key).is_none());
    }

    #[test]
    fn game_id_selects_subdirectory() {
        let config = test_config("game_id");
        let assets = SpriteAssets::new(config.clone(), "");
        let rgba = vec![1u8; 8 * 8 * 4];
        let key = SpriteAssets::make_key(&rgba, 8, 8, ObjFmt::Pal16);
        assets.dump_if_enabled(&key, &rgba, 8, 8);
        assert!(config.dump_dir.join("Unknown").join(key.filename(false)).exists());

        assets.set_game_id("BBBB");
        assets.dump_if_enabled(&key, &rgba, 8, 8);
        assert!(config.dump_dir.join("BBBB").join(key.filename(false)).exists());

        let _ = std::fs::remove_dir_all(config.dump_dir.parent().unwrap());
    }
}
