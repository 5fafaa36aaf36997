use crate::hires::sprite_assets::SpriteDumpConfig;
use crate::hires::tex_assets::TexDumpConfig;
use ini::Ini;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const SPRITE_SECTION: &str = "SpriteHires";
const TEX_SECTION: &str = "TextureHires";

fn get_parsed<T: FromStr>(ini: &Ini, section: &str, key: &str, default: T) -> T {
    ini.section(Some(section))
        .and_then(|s| s.get(key))
        .and_then(|v| T::from_str(v).ok())
        .unwrap_or(default)
}

/// Hi-res dump/replacement settings, persisted as an ini file next to the
/// rest of the user configuration.
pub struct HiresSettings {
    pub sprite: SpriteDumpConfig,
    pub tex: TexDumpConfig,
    pub settings_file_path: PathBuf,
    pub dirty: bool,
}

impl HiresSettings {
    pub fn new(path: PathBuf) -> Self {
        let mut sprite = SpriteDumpConfig::default();
        let mut tex = TexDumpConfig::default();

        if let Ok(ini) = Ini::load_from_file(&path) {
            sprite.enable_dump = get_parsed(&ini, SPRITE_SECTION, "EnableDump", sprite.enable_dump);
            sprite.enable_replace = get_parsed(&ini, SPRITE_SECTION, "EnableReplace", sprite.enable_replace);
            sprite.swap_rb = get_parsed(&ini, SPRITE_SECTION, "SwapRB", sprite.swap_rb);
            sprite.write_png = get_parsed(&ini, SPRITE_SECTION, "WritePNG", sprite.write_png);
            if let Some(dir) = ini.section(Some(SPRITE_SECTION)).and_then(|s| s.get("DumpDir")) {
                sprite.dump_dir = PathBuf::from(dir);
            }
            if let Some(dir) = ini.section(Some(SPRITE_SECTION)).and_then(|s| s.get("LoadDir")) {
                sprite.load_dir = PathBuf::from(dir);
            }

            tex.enable_dump = get_parsed(&ini, TEX_SECTION, "EnableDump", tex.enable_dump);
            tex.enable_replace = get_parsed(&ini, TEX_SECTION, "EnableReplace", tex.enable_replace);
            tex.write_png = get_parsed(&ini, TEX_SECTION, "WritePNG", tex.write_png);
            tex.in_memory_dedup_budget = get_parsed(&ini, TEX_SECTION, "DedupBudget", tex.in_memory_dedup_budget);
            tex.replacement_cache_budget_bytes = get_parsed(&ini, TEX_SECTION, "CacheBudgetBytes", tex.replacement_cache_budget_bytes);
            tex.io_queue_cap = get_parsed(&ini, TEX_SECTION, "IoQueueCap", tex.io_queue_cap);
            if let Some(dir) = ini.section(Some(TEX_SECTION)).and_then(|s| s.get("DumpDir")) {
                tex.dump_dir = PathBuf::from(dir);
            }
            if let Some(dir) = ini.section(Some(TEX_SECTION)).and_then(|s| s.get("LoadDir")) {
                tex.load_dir = PathBuf::from(dir);
            }
        }

        HiresSettings {
            sprite,
            tex,
            settings_file_path: path,
            dirty: false,
        }
    }

    pub fn flush(&mut self) {
        if !self.dirty {
            return;
        }

        let mut ini = Ini::new();
        ini.with_section(Some(SPRITE_SECTION))
            .set("EnableDump", self.sprite.enable_dump.to_string())
            .set("EnableReplace", self.sprite.enable_replace.to_string())
            .set("SwapRB", self.sprite.swap_rb.to_string())
            .set("WritePNG", self.sprite.write_png.to_string())
            .set("DumpDir", path_str(&self.sprite.dump_dir))
            .set("LoadDir", path_str(&self.sprite.load_dir));
        ini.with_section(Some(TEX_SECTION))
            .set("EnableDump", self.tex.enable_dump.to_string())
            .set("EnableReplace", self.tex.enable_replace.to_string())
            .set("WritePNG", self.tex.write_png.to_string())
            .set("DedupBudget", self.tex.in_memory_dedup_budget.to_string())
            .set("CacheBudgetBytes", self.tex.replacement_cache_budget_bytes.to_string())
            .set("IoQueueCap", self.tex.io_queue_cap.to_string())
            .set("DumpDir", path_str(&self.tex.dump_dir))
            .set("LoadDir", path_str(&self.tex.load_dir));

        if ini.write_to_file(&self.settings_file_path).is_ok() {
            self.dirty = false;
        }
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn settings_round_trip() {
        let path = std::env::temp_dir().join("nitro2d_settings_test.ini");
        let _ = fs::remove_file(&path);

        let mut settings = HiresSettings::new(path.clone());
        settings.sprite.enable_dump = true;
        settings.sprite.swap_rb = true;
        settings.tex.io_queue_cap = 123;
        settings.dirty = true;
        settings.flush();

        let reloaded = HiresSettings::new(path.clone());
        assert!(reloaded.sprite.enable_dump);
        assert!(reloaded.sprite.swap_rb);
        assert!(!reloaded.sprite.enable_replace);
        assert_eq!(reloaded.tex.io_queue_cap, 123);

        let _ = fs::remove_file(&path);
    }
}
