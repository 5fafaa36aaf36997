use crate::core::memory::vram::VramView;
use crate::utils;
use crate::utils::Convert;
use std::mem;

pub const OUTPUT_FMT_RGB6A5: u8 = 0;
pub const OUTPUT_FMT_RGBA8: u8 = 1;
pub const OUTPUT_FMT_BGRA8: u8 = 2;

/// Texel storage formats, in hardware numbering.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TexFmt {
    None = 0,
    A3I5 = 1,
    Pal4 = 2,
    Pal16 = 3,
    Pal256 = 4,
    Tex4x4 = 5,
    A5I3 = 6,
    Direct = 7,
}

impl From<u8> for TexFmt {
    fn from(value: u8) -> Self {
        debug_assert!(value <= TexFmt::Direct as u8);
        unsafe { mem::transmute(value) }
    }
}

fn read_tex<T: Convert>(vram: &dyn VramView, addr: u32) -> T {
    let (buf, mask) = vram.tex_vram();
    utils::read_from_mem(buf, addr & mask)
}

fn read_tex_pal<T: Convert>(vram: &dyn VramView, addr: u32) -> T {
    let (buf, mask) = vram.tex_pal();
    utils::read_from_mem(buf, addr & mask)
}

pub fn convert_rgb5_to_rgb8(val: u16) -> u32 {
    ((val as u32 & 0x1F) << 3) | ((val as u32 & 0x3E0) << 6) | ((val as u32 & 0x7C00) << 9)
}

pub fn convert_rgb5_to_bgr8(val: u16) -> u32 {
    ((val as u32 & 0x1F) << 19) | ((val as u32 & 0x3E0) << 6) | ((val as u32 & 0x7C00) >> 7)
}

pub fn convert_rgb5_to_rgb6(val: u16) -> u32 {
    let mut r = ((val & 0x1F) << 1) as u32;
    let mut g = ((val & 0x3E0) >> 4) as u32;
    let mut b = ((val & 0x7C00) >> 9) as u32;
    if r != 0 {
        r += 1;
    }
    if g != 0 {
        g += 1;
    }
    if b != 0 {
        b += 1;
    }
    r | (g << 8) | (b << 16)
}

fn convert_color<const OUTPUT_FMT: u8>(color: u16, opaque: bool) -> u32 {
    match OUTPUT_FMT {
        OUTPUT_FMT_RGB6A5 => convert_rgb5_to_rgb6(color) | if opaque { 0x1F000000 } else { 0 },
        OUTPUT_FMT_RGBA8 => convert_rgb5_to_rgb8(color) | if opaque { 0xFF000000 } else { 0 },
        _ => convert_rgb5_to_bgr8(color) | if opaque { 0xFF000000 } else { 0 },
    }
}

pub fn convert_bitmap_texture<const OUTPUT_FMT: u8>(width: u32, height: u32, output: &mut [u32], addr: u32, vram: &dyn VramView) {
    for i in 0..width * height {
        let value = read_tex::<u16>(vram, addr + i * 2);
        output[i as usize] = convert_color::<OUTPUT_FMT>(value, value & 0x8000 != 0);
    }
}

pub fn convert_compressed_texture<const OUTPUT_FMT: u8>(
    width: u32,
    height: u32,
    output: &mut [u32],
    addr: u32,
    addr_aux: u32,
    pal_addr: u32,
    vram: &dyn VramView,
) {
    // one 4x4 block at a time
    for y in 0..height / 4 {
        for x in 0..width / 4 {
            let data = read_tex::<u32>(vram, addr + (x + y * (width / 4)) * 4);
            let aux_data = read_tex::<u16>(vram, addr_aux + (x + y * (width / 4)) * 2);

            let palette_offset = pal_addr + (aux_data as u32 & 0x3FFF) * 4;
            let color0 = read_tex_pal::<u16>(vram, palette_offset) | 0x8000;
            let color1 = read_tex_pal::<u16>(vram, palette_offset + 2) | 0x8000;
            let mut color2 = read_tex_pal::<u16>(vram, palette_offset + 4) | 0x8000;
            let mut color3 = read_tex_pal::<u16>(vram, palette_offset + 6) | 0x8000;

            match (aux_data >> 14) & 0x3 {
                0 => color3 = 0,
                1 => {
                    let r0 = color0 as u32 & 0x001F;
                    let g0 = color0 as u32 & 0x03E0;
                    let b0 = color0 as u32 & 0x7C00;
                    let r1 = color1 as u32 & 0x001F;
                    let g1 = color1 as u32 & 0x03E0;
                    let b1 = color1 as u32 & 0x7C00;

                    let r = (r0 + r1) >> 1;
                    let g = ((g0 + g1) >> 1) & 0x03E0;
                    let b = ((b0 + b1) >> 1) & 0x7C00;
                    color2 = (r | g | b) as u16 | 0x8000;
                    color3 = 0;
                }
                2 => {}
                _ => {
                    let r0 = color0 as u32 & 0x001F;
                    let g0 = color0 as u32 & 0x03E0;
                    let b0 = color0 as u32 & 0x7C00;
                    let r1 = color1 as u32 & 0x001F;
                    let g1 = color1 as u32 & 0x03E0;
                    let b1 = color1 as u32 & 0x7C00;

                    let r = (r0 * 5 + r1 * 3) >> 3;
                    let g = ((g0 * 5 + g1 * 3) >> 3) & 0x03E0;
                    let b = ((b0 * 5 + b1 * 3) >> 3) & 0x7C00;
                    color2 = (r | g | b) as u16 | 0x8000;

                    let r = (r0 * 3 + r1 * 5) >> 3;
                    let g = ((g0 * 3 + g1 * 5) >> 3) & 0x03E0;
                    let b = ((b0 * 3 + b1 * 5) >> 3) & 0x7C00;
                    color3 = (r | g | b) as u16 | 0x8000;
                }
            }

            let packed = color0 as u64 | ((color1 as u64) << 16) | ((color2 as u64) << 32) | ((color3 as u64) << 48);

            for j in 0..4 {
                for i in 0..4 {
                    let color_idx = 16 * ((data >> (2 * (i + j * 4))) & 0x3);
                    let color = ((packed >> color_idx) & 0xFFFF) as u16;
                    output[(x * 4 + i + (y * 4 + j) * width) as usize] = convert_color::<OUTPUT_FMT>(color, color & 0x8000 != 0);
                }
            }
        }
    }
}

pub fn convert_axiy_texture<const OUTPUT_FMT: u8, const X: u32, const Y: u32>(
    width: u32,
    height: u32,
    output: &mut [u32],
    addr: u32,
    pal_addr: u32,
    vram: &dyn VramView,
) {
    for y in 0..height {
        for x in 0..width {
            let val = read_tex::<u8>(vram, addr + x + y * width);

            let idx = val as u32 & ((1 << Y) - 1);

            let color = read_tex_pal::<u16>(vram, pal_addr + idx * 2);
            let mut alpha = (val as u32 >> Y) & ((1 << X) - 1);
            if X != 5 {
                alpha = alpha * 4 + alpha / 2;
            }

            output[(x + y * width) as usize] = match OUTPUT_FMT {
                OUTPUT_FMT_RGB6A5 => convert_rgb5_to_rgb6(color) | (alpha << 24),
                // make sure full alpha == 255
                OUTPUT_FMT_RGBA8 => convert_rgb5_to_rgb8(color) | ((alpha << 27) | ((alpha & 0x1C) << 22)),
                _ => convert_rgb5_to_bgr8(color) | ((alpha << 27) | ((alpha & 0x1C) << 22)),
            };
        }
    }
}

pub fn convert_n_colors_texture<const OUTPUT_FMT: u8, const COLOR_BITS: u32>(
    width: u32,
    height: u32,
    output: &mut [u32],
    addr: u32,
    pal_addr: u32,
    color0_transparent: bool,
    vram: &dyn VramView,
) {
    let pixels_per_word = 16 / COLOR_BITS;

    for y in 0..height {
        for x in 0..width / pixels_per_word {
            // the smallest row is 8 pixels at 2bpp, so a row always fills u16s
            let mut val = read_tex::<u16>(vram, addr + 2 * (x + y * (width / pixels_per_word)));

            for i in 0..pixels_per_word {
                let index = val as u32 & ((1 << COLOR_BITS) - 1);
                val >>= COLOR_BITS;
                let color = read_tex_pal::<u16>(vram, pal_addr + index * 2);

                let transparent = color0_transparent && index == 0;
                output[(x * pixels_per_word + y * width + i) as usize] = convert_color::<OUTPUT_FMT>(color, !transparent);
            }
        }
    }
}

/// Decodes `width x height` texels of `fmt` into 32-bit pixels in the chosen
/// output encoding. `addr_aux` is only used by [TexFmt::Tex4x4].
#[allow(clippy::too_many_arguments)]
pub fn decode_texture<const OUTPUT_FMT: u8>(
    fmt: TexFmt,
    width: u32,
    height: u32,
    output: &mut [u32],
    addr: u32,
    addr_aux: u32,
    pal_addr: u32,
    color0_transparent: bool,
    vram: &dyn VramView,
) {
    match fmt {
        TexFmt::None => output[..(width * height) as usize].fill(0),
        TexFmt::A3I5 => convert_axiy_texture::<OUTPUT_FMT, 3, 5>(width, height, output, addr, pal_addr, vram),
        TexFmt::Pal4 => convert_n_colors_texture::<OUTPUT_FMT, 2>(width, height, output, addr, pal_addr, color0_transparent, vram),
        TexFmt::Pal16 => convert_n_colors_texture::<OUTPUT_FMT, 4>(width, height, output, addr, pal_addr, color0_transparent, vram),
        TexFmt::Pal256 => convert_n_colors_texture::<OUTPUT_FMT, 8>(width, height, output, addr, pal_addr, color0_transparent, vram),
        TexFmt::Tex4x4 => convert_compressed_texture::<OUTPUT_FMT>(width, height, output, addr, addr_aux, pal_addr, vram),
        TexFmt::A5I3 => convert_axiy_texture::<OUTPUT_FMT, 5, 3>(width, height, output, addr, pal_addr, vram),
        TexFmt::Direct => convert_bitmap_texture::<OUTPUT_FMT>(width, height, output, addr, vram),
    }
}

/// FNV-1a over the raw texel bytes, for cheap change detection without a
/// full decode.
pub fn hash_texture_vram(vram: &dyn VramView, addr: u32, size: u32) -> u64 {
    let (buf, mask) = vram.tex_vram();
    let mut hash = 0xcbf29ce484222325;
    for i in 0..size {
        hash ^= buf[((addr + i) & mask) as usize] as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Reads `count` palette entries as RGBA8 words (big-endian channel order,
/// alpha in the low byte) and hashes them, so palette swaps can be detected
/// independently of the texel data.
pub fn build_palette_data(vram: &dyn VramView, pal_addr: u32, count: u32, color0_transparent: bool, out_rgba: &mut Vec<u32>) -> u64 {
    out_rgba.clear();
    out_rgba.reserve(count as usize);

    let mut hash = 0xcbf29ce484222325u64;
    for i in 0..count {
        let color = read_tex_pal::<u16>(vram, pal_addr + i * 2);
        let r5 = color as u32 & 0x1F;
        let g5 = (color as u32 >> 5) & 0x1F;
        let b5 = (color as u32 >> 10) & 0x1F;
        let r8 = (r5 * 255 + 15) / 31;
        let g8 = (g5 * 255 + 15) / 31;
        let b8 = (b5 * 255 + 15) / 31;
        let a8: u32 = if color0_transparent && i == 0 { 0 } else { 255 };
        out_rgba.push((r8 << 24) | (g8 << 16) | (b8 << 8) | a8);

        for byte in [r8, g8, b8, a8] {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}

/// Per-pixel palette indices as a side product of decoding, so tooling can
/// re-derive images under a different palette. Indexed formats produce one
/// byte per pixel; Tex4x4 produces one little-endian u32 record per pixel
/// carrying the absolute palette index, the 2-bit block color and the block
/// mode.
#[allow(clippy::too_many_arguments)]
pub fn build_palette_index_map(
    vram: &dyn VramView,
    fmt: TexFmt,
    width: u32,
    height: u32,
    tex_addr: u32,
    aux_addr: u32,
    pal_addr: u32,
    out_indices: &mut Vec<u8>,
) -> Option<&'static str> {
    out_indices.clear();

    let pixel_count = (width * height) as usize;
    if pixel_count == 0 {
        return None;
    }

    match fmt {
        TexFmt::A3I5 => {
            out_indices.resize(pixel_count, 0);
            for i in 0..pixel_count {
                out_indices[i] = read_tex::<u8>(vram, tex_addr + i as u32) & 0x1F;
            }
            Some("u8")
        }
        TexFmt::A5I3 => {
            out_indices.resize(pixel_count, 0);
            for i in 0..pixel_count {
                out_indices[i] = read_tex::<u8>(vram, tex_addr + i as u32) & 0x07;
            }
            Some("u8")
        }
        TexFmt::Pal256 => {
            out_indices.resize(pixel_count, 0);
            for y in 0..height {
                for x in 0..width {
                    out_indices[(y * width + x) as usize] = read_tex::<u8>(vram, tex_addr + y * width + x);
                }
            }
            Some("u8")
        }
        TexFmt::Pal4 | TexFmt::Pal16 => {
            let color_bits = if fmt == TexFmt::Pal4 { 2u32 } else { 4 };
            let pixels_per_word = 16 / color_bits;
            if width % pixels_per_word != 0 {
                return None;
            }
            let words_per_row = width / pixels_per_word;
            let mask = (1u16 << color_bits) - 1;
            out_indices.resize(pixel_count, 0);
            for y in 0..height {
                for word in 0..words_per_row {
                    let mut packed = read_tex::<u16>(vram, tex_addr + 2 * (word + y * words_per_row));
                    for i in 0..pixels_per_word {
                        let idx = packed & mask;
                        packed >>= color_bits;
                        out_indices[(y * width + word * pixels_per_word + i) as usize] = idx as u8;
                    }
                }
            }
            Some("u8")
        }
        TexFmt::Tex4x4 => {
            if width % 4 != 0 || height % 4 != 0 || aux_addr == 0 {
                return None;
            }

            let blocks_x = width / 4;
            let blocks_y = height / 4;
            out_indices.resize(pixel_count * 4, 0);

            for by in 0..blocks_y {
                for bx in 0..blocks_x {
                    let block_index = bx + by * blocks_x;
                    let data = read_tex::<u32>(vram, tex_addr + block_index * 4);
                    let aux_data = read_tex::<u16>(vram, aux_addr + block_index * 2);
                    let mode = (aux_data as u32 >> 14) & 0x3;
                    let palette_base_index = (aux_data as u32 & 0x3FFF) * 2;

                    for j in 0..4 {
                        for i in 0..4 {
                            let color_local = (data >> (2 * (i + j * 4))) & 0x3;
                            let palette_index = palette_base_index + color_local;
                            let out_pos = (((by * 4 + j) * width + bx * 4 + i) * 4) as usize;
                            let encoded = (palette_index & 0xFFFF) | (color_local << 16) | (mode << 18);
                            out_indices[out_pos..out_pos + 4].copy_from_slice(&encoded.to_le_bytes());
                        }
                    }
                }
            }
            Some("u32")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::vram::FlatVram;
    use crate::utils::write_to_mem;

    fn vram_with_pal(colors: &[u16]) -> FlatVram {
        let mut vram = FlatVram::new();
        for (i, &color) in colors.iter().enumerate() {
            write_to_mem::<u16>(vram.tex_pal_mut(), (i * 2) as u32, color);
        }
        vram
    }

    #[test]
    fn direct_format_alpha_bit() {
        let mut vram = FlatVram::new();
        write_to_mem::<u16>(vram.tex_vram_mut(), 0, 0x801F);
        write_to_mem::<u16>(vram.tex_vram_mut(), 2, 0x001F);

        let mut out = [0u32; 2];
        convert_bitmap_texture::<OUTPUT_FMT_RGBA8>(2, 1, &mut out, 0, &vram);
        assert_eq!(out[0], 0xFF0000F8);
        assert_eq!(out[1], 0x000000F8);
    }

    #[test]
    fn pal16_color0_transparency() {
        let mut vram = vram_with_pal(&[0x7C00, 0x001F]);
        // one row of 4bpp indices: 0,1,0,1
        write_to_mem::<u16>(vram.tex_vram_mut(), 0, 0x1010);

        let mut out = [0u32; 4];
        convert_n_colors_texture::<OUTPUT_FMT_RGBA8, 4>(4, 1, &mut out, 0, 0, true, &vram);
        assert_eq!(out[0] >> 24, 0);
        assert_eq!(out[1] >> 24, 0xFF);
        assert_eq!(out[1] & 0xFF, 0xF8);

        let mut out = [0u32; 4];
        convert_n_colors_texture::<OUTPUT_FMT_RGBA8, 4>(4, 1, &mut out, 0, 0, false, &vram);
        assert_eq!(out[0] >> 24, 0xFF);
    }

    #[test]
    fn a3i5_alpha_expansion() {
        let mut vram = vram_with_pal(&[0x0000, 0x7FFF]);
        // index 1, alpha 5 -> expanded to 5*4 + 5/2 = 22
        vram.tex_vram_mut()[0] = 0xA1;

        let mut out = [0u32; 1];
        convert_axiy_texture::<OUTPUT_FMT_RGB6A5, 3, 5>(1, 1, &mut out, 0, 0, &vram);
        assert_eq!(out[0] >> 24, 22);
    }

    #[test]
    fn a5i3_alpha_is_direct() {
        let mut vram = vram_with_pal(&[0x0000, 0x7FFF]);
        // index 1, alpha 0x15
        vram.tex_vram_mut()[0] = (0x15 << 3) | 1;

        let mut out = [0u32; 1];
        convert_axiy_texture::<OUTPUT_FMT_RGB6A5, 5, 3>(1, 1, &mut out, 0, 0, &vram);
        assert_eq!(out[0] >> 24, 0x15);
    }

    #[test]
    fn tex4x4_mode1_interpolates_and_mode0_transparent() {
        let mut vram = vram_with_pal(&[0x001F, 0x7C00, 0, 0]);
        // block of indices: all texels use color 2 except texel 0 (color 3)
        let mut data = 0u32;
        for texel in 1..16 {
            data |= 2 << (2 * texel);
        }
        data |= 3;
        write_to_mem::<u32>(vram.tex_vram_mut(), 0, data);
        // aux: mode 1, palette word 0
        write_to_mem::<u16>(vram.tex_vram_mut(), 0x20000, 1 << 14);

        let mut out = [0u32; 16];
        convert_compressed_texture::<OUTPUT_FMT_RGBA8>(4, 4, &mut out, 0, 0x20000, 0, &vram);

        // color2 = average of red and blue
        let expected = convert_rgb5_to_rgb8(0x000F | (0x0F << 10)) | 0xFF000000;
        assert_eq!(out[1], expected);
        // color3 in mode 1 is transparent
        assert_eq!(out[0] >> 24, 0);
    }

    #[test]
    fn palette_index_map_formats() {
        let mut vram = FlatVram::new();
        for i in 0..8 {
            vram.tex_vram_mut()[i] = 0xE0 | i as u8;
        }

        let mut indices = Vec::new();
        let fmt = build_palette_index_map(&vram, TexFmt::A3I5, 8, 1, 0, 0, 0, &mut indices);
        assert_eq!(fmt, Some("u8"));
        assert_eq!(indices, (0..8).collect::<Vec<u8>>());

        let fmt = build_palette_index_map(&vram, TexFmt::Direct, 8, 1, 0, 0, 0, &mut indices);
        assert_eq!(fmt, None);
    }

    #[test]
    fn decode_dispatch_matches_direct_conversion() {
        let mut vram = FlatVram::new();
        write_to_mem::<u16>(vram.tex_vram_mut(), 0, 0x83E0);

        let mut via_dispatch = [0u32; 1];
        decode_texture::<OUTPUT_FMT_BGRA8>(TexFmt::Direct, 1, 1, &mut via_dispatch, 0, 0, 0, false, &vram);
        let mut direct = [0u32; 1];
        convert_bitmap_texture::<OUTPUT_FMT_BGRA8>(1, 1, &mut direct, 0, &vram);
        assert_eq!(via_dispatch, direct);
        // BGRA puts green in the middle byte
        assert_eq!(via_dispatch[0], 0xFF00F800);
    }

    #[test]
    fn vram_hash_is_content_sensitive() {
        let mut vram = FlatVram::new();
        let h1 = hash_texture_vram(&vram, 0, 64);
        vram.tex_vram_mut()[5] = 1;
        let h2 = hash_texture_vram(&vram, 0, 64);
        assert_ne!(h1, h2);
    }
}
