pub mod dump_queue;
pub mod key;
pub mod sprite_assets;
pub mod tex_assets;
pub mod tga;

use std::path::Path;

/// Writes a decoded RGBA image to disk, PNG when requested and built in,
/// the built-in TGA otherwise. Returns false on any I/O failure.
pub(crate) fn write_image_file(path: &Path, rgba: &[u8], width: u32, height: u32, png: bool) -> bool {
    #[cfg(feature = "png")]
    if png {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return image::save_buffer(path, rgba, width, height, image::ExtendedColorType::Rgba8).is_ok();
    }
    let _ = png;

    tga::write_tga(path, rgba, width, height).is_ok()
}

/// Loads an RGBA image from disk, dispatching on the file extension.
pub(crate) fn load_image_file(path: &Path) -> Option<(Vec<u8>, u32, u32)> {
    #[cfg(feature = "png")]
    if path.extension().is_some_and(|ext| ext == "png") {
        let decoded = image::open(path).ok()?.into_rgba8();
        let (width, height) = decoded.dimensions();
        return Some((decoded.into_raw(), width, height));
    }

    tga::read_tga(path)
}
