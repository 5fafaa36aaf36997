use static_assertions::const_assert;
use std::fmt::Write;
use std::mem;

pub const FNV_OFFSET: u64 = 0xcbf29ce484222325;
pub const FNV_PRIME: u64 = 0x100000001b3;

pub fn fnv1a64_seeded(data: &[u8], seed: u64) -> u64 {
    let mut hash = seed;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub fn fnv1a64(data: &[u8]) -> u64 {
    fnv1a64_seeded(data, FNV_OFFSET)
}

fn to_hex(value: u64) -> String {
    let mut out = String::with_capacity(16);
    write!(out, "{value:016x}").unwrap();
    out
}

/// Sprite pixel encodings, as carried in dump filenames.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ObjFmt {
    Pal16 = 0,
    Pal256 = 1,
    Bitmap = 2,
    Unknown = 15,
}

impl ObjFmt {
    pub fn name(self) -> &'static str {
        match self {
            ObjFmt::Pal16 => "pal16",
            ObjFmt::Pal256 => "pal256",
            ObjFmt::Bitmap => "bitmap",
            ObjFmt::Unknown => "unk",
        }
    }
}

/// Texture texel formats, in the naming the dump layer uses (not the
/// hardware numbering).
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DsiTexFmt {
    Pal4 = 0,
    Pal16 = 1,
    Pal256 = 2,
    Tex4x4 = 3,
    A5I3 = 4,
    A3I5 = 5,
    Direct = 6,
    Unknown = 15,
}

impl DsiTexFmt {
    pub fn name(self) -> &'static str {
        match self {
            DsiTexFmt::Pal4 => "pal4",
            DsiTexFmt::Pal16 => "pal16",
            DsiTexFmt::Pal256 => "pal256",
            DsiTexFmt::Tex4x4 => "tex4x4",
            DsiTexFmt::A5I3 => "a5i3",
            DsiTexFmt::A3I5 => "a3i5",
            DsiTexFmt::Direct => "rgba5551",
            DsiTexFmt::Unknown => "unk",
        }
    }
}

pub const TEX_FLAG_MIPS: u16 = 1 << 0;
pub const TEX_FLAG_PAL0_TRANSPARENT: u16 = 1 << 1;

/// Content identity of a decoded texture. Hash collisions are treated as
/// identity by the whole dump/replacement pipeline.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TextureKey {
    pub hash64: u64,
    pub width: u32,
    pub height: u32,
    pub flags: u16,
    pub fmt: DsiTexFmt,
}

impl TextureKey {
    /// Hashes the decoded RGBA contents chained with the invariants, so the
    /// same pixels in a different size or format key differently.
    pub fn make(rgba: &[u8], width: u32, height: u32, has_mips: bool, pal0_transparent: bool, fmt: DsiTexFmt) -> Self {
        let hash = fnv1a64(rgba);
        let hash = fnv1a64_seeded(&width.to_le_bytes(), hash);
        let hash = fnv1a64_seeded(&height.to_le_bytes(), hash);
        let flags = (has_mips as u16 * TEX_FLAG_MIPS) | (pal0_transparent as u16 * TEX_FLAG_PAL0_TRANSPARENT);
        let hash = fnv1a64_seeded(&flags.to_le_bytes(), hash);
        let hash = fnv1a64_seeded(&[fmt as u8], hash);

        TextureKey {
            hash64: hash,
            width,
            height,
            flags,
            fmt,
        }
    }

    pub fn filename(&self, png_ext: bool) -> String {
        let mut name = format!("tex1_{}x{}", self.width, self.height);
        if self.flags & TEX_FLAG_MIPS != 0 {
            name.push_str("_m");
        }
        let _ = write!(name, "_{}_{}", to_hex(self.hash64), self.fmt.name());
        name.push_str(if png_ext { ".png" } else { ".tga" });
        name
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SpriteKey {
    pub hash64: u64,
    pub width: u32,
    pub height: u32,
    pub fmt: ObjFmt,
}

impl SpriteKey {
    pub fn make(rgba: &[u8], width: u32, height: u32, fmt: ObjFmt) -> Self {
        SpriteKey {
            hash64: fnv1a64(rgba),
            width,
            height,
            fmt,
        }
    }

    pub fn filename(&self, png_ext: bool) -> String {
        format!(
            "obj1_{}x{}_{}_{}{}",
            self.width,
            self.height,
            to_hex(self.hash64),
            self.fmt.name(),
            if png_ext { ".png" } else { ".tga" }
        )
    }
}

/// Extracts the 4-character game code at offset 0x0C of a ROM image,
/// sanitized to printable ASCII. Used to pick the on-disk dump directory.
pub fn extract_game_code(rom_path: &std::path::Path) -> Option<String> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = std::fs::File::open(rom_path).ok()?;
    file.seek(SeekFrom::Start(0x0C)).ok()?;
    let mut code = [0u8; 4];
    file.read_exact(&mut code).ok()?;

    Some(
        code.iter()
            .map(|&c| if (32..=126).contains(&c) { c as char } else { '_' })
            .collect(),
    )
}

const_assert!(mem::size_of::<TextureKey>() <= 24);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a64_known_vectors() {
        // reference values for the 64-bit FNV-1a parameters
        assert_eq!(fnv1a64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a64(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn key_identity_tracks_content() {
        // the hash is injective over the test set: equal inputs agree,
        // different inputs disagree
        let mut state = 0x12345678u32;
        let mut rand = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };

        for _ in 0..1000 {
            let mut a = [0u8; 64];
            for byte in &mut a {
                *byte = rand() as u8;
            }
            let mut b = a;

            let key_a = SpriteKey::make(&a, 4, 4, ObjFmt::Pal16);
            assert_eq!(key_a, SpriteKey::make(&b, 4, 4, ObjFmt::Pal16));

            let flip = (rand() % 64) as usize;
            b[flip] = b[flip].wrapping_add(1 + (rand() % 255) as u8);
            assert_ne!(key_a.hash64, SpriteKey::make(&b, 4, 4, ObjFmt::Pal16).hash64);
        }
    }

    #[test]
    fn texture_key_mixes_invariants() {
        let rgba = [1u8; 16 * 16 * 4];
        let base = TextureKey::make(&rgba, 16, 16, false, false, DsiTexFmt::Pal16);
        assert_ne!(base.hash64, TextureKey::make(&rgba, 16, 16, true, false, DsiTexFmt::Pal16).hash64);
        assert_ne!(base.hash64, TextureKey::make(&rgba, 16, 16, false, true, DsiTexFmt::Pal16).hash64);
        assert_ne!(base.hash64, TextureKey::make(&rgba, 16, 16, false, false, DsiTexFmt::Pal256).hash64);
    }

    #[test]
    fn game_code_extraction() {
        let path = std::env::temp_dir().join("nitro2d_game_code_test.nds");
        let mut rom = vec![0u8; 0x20];
        rom[0x0C..0x10].copy_from_slice(b"AB\x01D");
        std::fs::write(&path, &rom).unwrap();

        assert_eq!(extract_game_code(&path).unwrap(), "AB_D");
        let _ = std::fs::remove_file(&path);

        assert!(extract_game_code(std::path::Path::new("/nonexistent.nds")).is_none());
    }

    #[test]
    fn filenames() {
        let key = TextureKey {
            hash64: 0xDEADBEEF,
            width: 64,
            height: 32,
            flags: TEX_FLAG_MIPS,
            fmt: DsiTexFmt::Tex4x4,
        };
        assert_eq!(key.filename(true), "tex1_64x32_m_00000000deadbeef_tex4x4.png");

        let key = SpriteKey {
            hash64: 1,
            width: 8,
            height: 8,
            fmt: ObjFmt::Pal256,
        };
        assert_eq!(key.filename(false), "obj1_8x8_0000000000000001_pal256.tga");
    }
}
