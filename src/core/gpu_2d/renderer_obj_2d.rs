use crate::core::gpu_2d::registers_2d::Gpu2DRegisters;
use crate::core::gpu_2d::renderer_soft_2d::{
    draw_pixel_accel, draw_pixel_normal, DrawPixelFn, SoftRenderer2D, SpriteReplacement,
};
use crate::core::gpu_2d::{DISPLAY_WIDTH, MOSAIC_TABLE};
use crate::core::gpu_3d::Renderer3D;
use crate::core::memory::oam::{SPRITE_HEIGHT, SPRITE_WIDTH};
use crate::core::memory::vram::VramView;
use crate::hires::key::ObjFmt;
use crate::hires::sprite_assets::SpriteAssets;
use crate::utils;

// OBJ line buffer entries:
// * bit0-15: color (bit15=1: direct color, bit15=0: palette index, bit12 set for the standard palette)
// * bit16-17: priority
// * bit18: non-transparent sprite pixel exists here
// * bit19: sprite covers this column
// * bit20: X mosaic should be applied here
// * bit24-31: compositor flags

fn color555_to_rgba(color: u16) -> [u8; 4] {
    let r = (((color & 0x001F) as u32 * 255 + 15) / 31) as u8;
    let g = ((((color & 0x03E0) >> 5) as u32 * 255 + 15) / 31) as u8;
    let b = ((((color & 0x7C00) >> 10) as u32 * 255 + 15) / 31) as u8;
    let a = if color & 0x8000 != 0 { 255 } else { 0 };
    [r, g, b, a]
}

fn rgba8_to_5551(r: u8, g: u8, b: u8, a: u8) -> u16 {
    if a < 32 {
        // treat as fully transparent
        return 0;
    }
    0x8000 | ((r as u16 * 31 + 127) / 255) | (((g as u16 * 31 + 127) / 255) << 5) | (((b as u16 * 31 + 127) / 255) << 10)
}

impl SoftRenderer2D {
    /// Scans OAM and rasterizes all sprites intersecting `line` into the
    /// per-unit object buffer. Called one line ahead of `draw_scanline`.
    pub fn draw_sprites(&mut self, line: u32, unit: &mut Gpu2DRegisters, vram: &dyn VramView) {
        let num = unit.engine.num();

        if line == 0 {
            // sprites are rendered one scanline in advance, so the Y mosaic
            // counters have to reset before the frame rather than at VBlank end
            unit.obj_mosaic_y = 0;
            unit.obj_mosaic_y_count = 0;
        }

        self.num_sprites[num] = 0;
        self.obj_line[num].fill(0);
        self.obj_window[num] = [0; DISPLAY_WIDTH];
        if u32::from(unit.disp_cnt) & 0x1000 == 0 {
            return;
        }

        let oam = vram.oam();
        let oam_base = unit.engine.oam_offset();

        for prio in (0u16..4).rev() {
            for sprnum in (0..128usize).rev() {
                let attr_base = oam_base + (sprnum as u32) * 8;
                let attr0 = utils::read_from_mem::<u16>(oam, attr_base);
                let attr1 = utils::read_from_mem::<u16>(oam, attr_base + 2);
                let attr2 = utils::read_from_mem::<u16>(oam, attr_base + 4);

                if (attr2 & 0x0C00) >> 10 != prio {
                    continue;
                }

                let iswin = (attr0 >> 10) & 0x3 == 2;

                let sprline = if attr0 & 0x1000 != 0 && !iswin {
                    // apply Y mosaic
                    unit.obj_mosaic_y as u32
                } else {
                    line
                };

                if attr0 & 0x0100 != 0 {
                    let sizeparam = ((attr0 >> 14) | ((attr1 & 0xC000) >> 12)) as usize;
                    let width = SPRITE_WIDTH[sizeparam];
                    let height = SPRITE_HEIGHT[sizeparam];
                    let mut boundwidth = width;
                    let mut boundheight = height;

                    if attr0 & 0x0200 != 0 {
                        boundwidth <<= 1;
                        boundheight <<= 1;
                    }

                    let ypos = (attr0 & 0xFF) as u32;
                    if line.wrapping_sub(ypos) & 0xFF >= boundheight as u32 {
                        continue;
                    }
                    let ypos = sprline.wrapping_sub(ypos) & 0xFF;

                    let xpos = ((attr1 as i32) << 23) >> 23;
                    if xpos <= -boundwidth {
                        continue;
                    }

                    if iswin {
                        self.draw_sprite_rotscale::<true>(unit, vram, sprnum, boundwidth, boundheight, width, height, xpos, ypos as i32);
                    } else {
                        self.draw_sprite_rotscale::<false>(unit, vram, sprnum, boundwidth, boundheight, width, height, xpos, ypos as i32);
                    }

                    self.num_sprites[num] += 1;
                } else {
                    if attr0 & 0x0200 != 0 {
                        continue;
                    }

                    let sizeparam = ((attr0 >> 14) | ((attr1 & 0xC000) >> 12)) as usize;
                    let width = SPRITE_WIDTH[sizeparam];
                    let height = SPRITE_HEIGHT[sizeparam];

                    let ypos = (attr0 & 0xFF) as u32;
                    if line.wrapping_sub(ypos) & 0xFF >= height as u32 {
                        continue;
                    }
                    let ypos = sprline.wrapping_sub(ypos) & 0xFF;

                    let xpos = ((attr1 as i32) << 23) >> 23;
                    if xpos <= -width {
                        continue;
                    }

                    if iswin {
                        self.draw_sprite_normal::<true>(unit, vram, sprnum, width, height, xpos, ypos as i32);
                    } else {
                        self.draw_sprite_normal::<false>(unit, vram, sprnum, width, height, xpos, ypos as i32);
                    }

                    self.num_sprites[num] += 1;
                }
            }
        }
    }

    /// X mosaic for sprites runs after all sprites are rendered, replicating
    /// the last kept column across each mosaic block.
    pub(super) fn apply_sprite_mosaic_x(&mut self, unit: &Gpu2DRegisters) {
        if unit.obj_mosaic_size[0] == 0 {
            return;
        }

        let obj_line = &mut self.obj_line[unit.engine.num()];
        let table = &MOSAIC_TABLE[(unit.obj_mosaic_size[0] & 0xF) as usize];

        let mut lastcolor = obj_line[0];

        for i in 1..DISPLAY_WIDTH {
            let currentcolor = obj_line[i];

            if lastcolor & currentcolor & 0x100000 == 0 || table[i] == 0 {
                lastcolor = currentcolor;
            } else {
                obj_line[i] = lastcolor;
            }
        }
    }

    pub(super) fn interleave_sprites(&mut self, unit: &Gpu2DRegisters, vram: &dyn VramView, prio: u32, accel: bool) {
        let draw_pixel: DrawPixelFn = if accel { draw_pixel_accel } else { draw_pixel_normal };
        let num = unit.engine.num();
        let palette = vram.palette();
        let pal_offset = unit.engine.palettes_offset() + 0x200;

        if unit.disp_cnt.obj_extended_palettes() {
            let extpal = vram.obj_ext_pal(unit.engine);

            for i in 0..DISPLAY_WIDTH {
                let pixel = self.obj_line[num][i];
                if pixel & 0x70000 != prio {
                    continue;
                }
                if self.window_mask[i] & 0x10 == 0 {
                    continue;
                }

                let color = if pixel & 0x8000 != 0 {
                    (pixel & 0x7FFF) as u16
                } else if pixel & 0x1000 != 0 {
                    utils::read_from_mem::<u16>(palette, pal_offset + ((pixel & 0xFF) << 1))
                } else {
                    extpal[(pixel & 0xFFF) as usize]
                };

                draw_pixel(&mut self.bg_obj_line, i, color, pixel & 0xFF000000);
            }
        } else {
            // no extended palettes mapped in
            for i in 0..DISPLAY_WIDTH {
                let pixel = self.obj_line[num][i];
                if pixel & 0x70000 != prio {
                    continue;
                }
                if self.window_mask[i] & 0x10 == 0 {
                    continue;
                }

                let color = if pixel & 0x8000 != 0 {
                    (pixel & 0x7FFF) as u16
                } else {
                    utils::read_from_mem::<u16>(palette, pal_offset + ((pixel & 0xFF) << 1))
                };

                draw_pixel(&mut self.bg_obj_line, i, color, pixel & 0xFF000000);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_sprite_rotscale<const WINDOW: bool>(
        &mut self,
        unit: &Gpu2DRegisters,
        vram: &dyn VramView,
        sprnum: usize,
        mut boundwidth: i32,
        boundheight: i32,
        width: i32,
        height: i32,
        mut xpos: i32,
        ypos: i32,
    ) {
        let num = unit.engine.num();
        let oam = vram.oam();
        let oam_base = unit.engine.oam_offset();
        let attr_base = oam_base + (sprnum as u32) * 8;
        let attr0 = utils::read_from_mem::<u16>(oam, attr_base);
        let attr1 = utils::read_from_mem::<u16>(oam, attr_base + 2);
        let attr2 = utils::read_from_mem::<u16>(oam, attr_base + 4);

        let disp_cnt = u32::from(unit.disp_cnt);

        let params_base = oam_base + ((attr1 as u32 >> 9) & 0x1F) * 0x20;
        let rot_a = utils::read_from_mem::<u16>(oam, params_base + 0x06) as i16 as i32;
        let rot_b = utils::read_from_mem::<u16>(oam, params_base + 0x0E) as i16 as i32;
        let rot_c = utils::read_from_mem::<u16>(oam, params_base + 0x16) as i16 as i32;
        let rot_d = utils::read_from_mem::<u16>(oam, params_base + 0x1E) as i16 as i32;

        let mut pixelattr = ((attr2 as u32 & 0x0C00) << 6) | 0xC0000;
        let tilenum = attr2 as u32 & 0x03FF;
        let spritemode = if WINDOW { 0 } else { (attr0 >> 10) & 0x3 };

        if attr0 & 0x1000 != 0 && !WINDOW {
            // apply Y mosaic
            pixelattr |= 0x100000;
        }

        let (objvram, objvrammask) = vram.obj_vram(unit.engine);

        let center_x = boundwidth >> 1;
        let center_y = boundheight >> 1;

        let mut xoff;
        if xpos >= 0 {
            xoff = 0;
            if xpos + boundwidth > DISPLAY_WIDTH as i32 {
                boundwidth = DISPLAY_WIDTH as i32 - xpos;
            }
        } else {
            xoff = -xpos;
            xpos = 0;
        }

        let mut rot_x = (xoff - center_x) * rot_a + (ypos - center_y) * rot_b + (width << 7);
        let mut rot_y = (xoff - center_x) * rot_c + (ypos - center_y) * rot_d + (height << 7);

        let width = (width << 8) as u32;
        let height = (height << 8) as u32;

        let (obj_line, obj_window) = {
            let SoftRenderer2D { obj_line, obj_window, .. } = self;
            (&mut obj_line[num], &mut obj_window[num])
        };

        if spritemode == 3 {
            let alpha = (attr2 >> 12) as u32;
            if alpha == 0 {
                return;
            }
            let alpha = alpha + 1;

            pixelattr |= 0xC0000000 | (alpha << 24);

            let (pixelsaddr, ytilefactor) = if disp_cnt & 0x40 != 0 {
                if disp_cnt & 0x20 != 0 {
                    // 'reserved', draws nothing
                    return;
                }
                (tilenum << (7 + ((disp_cnt >> 22) & 0x1)), (width >> 8) * 2)
            } else if disp_cnt & 0x20 != 0 {
                (((tilenum & 0x01F) << 4) + ((tilenum & 0x3E0) << 7), 256 * 2)
            } else {
                (((tilenum & 0x00F) << 4) + ((tilenum & 0x3F0) << 7), 128 * 2)
            };

            while xoff < boundwidth {
                if (rot_x as u32) < width && (rot_y as u32) < height {
                    let addr = pixelsaddr
                        .wrapping_add((rot_y as u32 >> 8).wrapping_mul(ytilefactor))
                        .wrapping_add((rot_x as u32 >> 8) << 1);
                    let color = utils::read_from_mem::<u16>(objvram, addr & objvrammask);

                    if color & 0x8000 != 0 {
                        if WINDOW {
                            obj_window[xpos as usize] = 1;
                        } else {
                            obj_line[xpos as usize] = color as u32 | pixelattr;
                        }
                    } else if !WINDOW && obj_line[xpos as usize] == 0 {
                        obj_line[xpos as usize] = pixelattr & 0x180000;
                    }
                }

                rot_x += rot_a;
                rot_y += rot_c;
                xoff += 1;
                xpos += 1;
            }
        } else {
            let mut pixelsaddr = tilenum;
            let ytilefactor;
            if disp_cnt & 0x10 != 0 {
                pixelsaddr <<= (disp_cnt >> 20) & 0x3;
                let double_stride = if attr0 & 0x2000 != 0 { 1 } else { 0 };
                ytilefactor = (width >> 11) << double_stride;
            } else {
                ytilefactor = 0x20;
            }

            if spritemode == 1 {
                pixelattr |= 0x80000000;
            } else {
                pixelattr |= 0x10000000;
            }

            let ytilefactor = ytilefactor << 5;
            pixelsaddr <<= 5;

            if attr0 & 0x2000 != 0 {
                // 256-color
                if !WINDOW {
                    if disp_cnt & 0x80000000 == 0 {
                        pixelattr |= 0x1000;
                    } else {
                        pixelattr |= (attr2 as u32 & 0xF000) >> 4;
                    }
                }

                while xoff < boundwidth {
                    if (rot_x as u32) < width && (rot_y as u32) < height {
                        let addr = pixelsaddr
                            .wrapping_add((rot_y as u32 >> 11).wrapping_mul(ytilefactor))
                            .wrapping_add((rot_y as u32 & 0x700) >> 5)
                            .wrapping_add((rot_x as u32 >> 11) * 64)
                            .wrapping_add((rot_x as u32 & 0x700) >> 8);
                        let color = objvram[(addr & objvrammask) as usize];

                        if color != 0 {
                            if WINDOW {
                                obj_window[xpos as usize] = 1;
                            } else {
                                obj_line[xpos as usize] = color as u32 | pixelattr;
                            }
                        } else if !WINDOW && obj_line[xpos as usize] == 0 {
                            obj_line[xpos as usize] = pixelattr & 0x180000;
                        }
                    }

                    rot_x += rot_a;
                    rot_y += rot_c;
                    xoff += 1;
                    xpos += 1;
                }
            } else {
                // 16-color
                if !WINDOW {
                    pixelattr |= 0x1000;
                    pixelattr |= (attr2 as u32 & 0xF000) >> 8;
                }

                while xoff < boundwidth {
                    if (rot_x as u32) < width && (rot_y as u32) < height {
                        let addr = pixelsaddr
                            .wrapping_add((rot_y as u32 >> 11).wrapping_mul(ytilefactor))
                            .wrapping_add((rot_y as u32 & 0x700) >> 6)
                            .wrapping_add((rot_x as u32 >> 11) * 32)
                            .wrapping_add((rot_x as u32 & 0x700) >> 9);
                        let mut color = objvram[(addr & objvrammask) as usize];
                        if rot_x & 0x100 != 0 {
                            color >>= 4;
                        } else {
                            color &= 0x0F;
                        }

                        if color != 0 {
                            if WINDOW {
                                obj_window[xpos as usize] = 1;
                            } else {
                                obj_line[xpos as usize] = color as u32 | pixelattr;
                            }
                        } else if !WINDOW && obj_line[xpos as usize] == 0 {
                            obj_line[xpos as usize] = pixelattr & 0x180000;
                        }
                    }

                    rot_x += rot_a;
                    rot_y += rot_c;
                    xoff += 1;
                    xpos += 1;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_sprite_normal<const WINDOW: bool>(
        &mut self,
        unit: &Gpu2DRegisters,
        vram: &dyn VramView,
        sprnum: usize,
        width: i32,
        height: i32,
        mut xpos: i32,
        mut ypos: i32,
    ) {
        let num = unit.engine.num();
        let oam = vram.oam();
        let oam_base = unit.engine.oam_offset();
        let attr_base = oam_base + (sprnum as u32) * 8;
        let attr0 = utils::read_from_mem::<u16>(oam, attr_base);
        let attr1 = utils::read_from_mem::<u16>(oam, attr_base + 2);
        let attr2 = utils::read_from_mem::<u16>(oam, attr_base + 4);

        let disp_cnt = u32::from(unit.disp_cnt);

        let mut pixelattr = ((attr2 as u32 & 0x0C00) << 6) | 0xC0000;
        let tilenum = attr2 as u32 & 0x03FF;
        let spritemode = if WINDOW { 0 } else { (attr0 >> 10) & 0x3 };

        let wmask = (width - 8) as u32;
        let xflip = attr1 & 0x1000 != 0;
        let yflip = attr1 & 0x2000 != 0;

        let replace_enabled = self.sprite_assets.as_ref().map_or(false, |assets| assets.replace_enabled());

        let (obj_line, obj_window, repl_state) = {
            let SoftRenderer2D {
                obj_line,
                obj_window,
                sprite_replacement,
                ..
            } = self;
            (&mut obj_line[num], &mut obj_window[num], &sprite_replacement[num][sprnum])
        };

        let replacement: Option<&SpriteReplacement> = if replace_enabled
            && repl_state.has_replacement
            && repl_state.width == width as u32
            && repl_state.height == height as u32
        {
            Some(repl_state)
        } else {
            None
        };

        let sample_replacement = |local_x: u32, local_y: u32| -> u16 {
            match replacement {
                Some(repl) if local_x < repl.width && local_y < repl.height => {
                    repl.colors[(local_y * repl.width + local_x) as usize]
                }
                _ => 0,
            }
        };

        // a substituted pixel keeps only the priority bits of its encoding
        let direct_mask = pixelattr & 0xFFFF0000;

        if attr0 & 0x1000 != 0 && !WINDOW {
            // apply Y mosaic
            pixelattr |= 0x100000;
        }

        let (objvram, objvrammask) = vram.obj_vram(unit.engine);

        if yflip {
            ypos = height - 1 - ypos;
        }

        let mut xoff;
        let mut xend = width;
        if xpos >= 0 {
            xoff = 0;
            if xpos + xend > DISPLAY_WIDTH as i32 {
                xend = DISPLAY_WIDTH as i32 - xpos;
            }
        } else {
            xoff = -xpos;
            xpos = 0;
        }

        if spritemode == 3 {
            // bitmap sprite
            let alpha = (attr2 >> 12) as u32;
            if alpha == 0 {
                return;
            }
            let alpha = alpha + 1;

            pixelattr |= 0xC0000000 | (alpha << 24);

            let mut pixelsaddr = if disp_cnt & 0x40 != 0 {
                if disp_cnt & 0x20 != 0 {
                    // 'reserved', draws nothing
                    return;
                }
                (tilenum << (7 + ((disp_cnt >> 22) & 0x1))).wrapping_add((ypos * width * 2) as u32)
            } else if disp_cnt & 0x20 != 0 {
                (((tilenum & 0x01F) << 4) + ((tilenum & 0x3E0) << 7)).wrapping_add((ypos * 256 * 2) as u32)
            } else {
                (((tilenum & 0x00F) << 4) + ((tilenum & 0x3F0) << 7)).wrapping_add((ypos * 128 * 2) as u32)
            };

            let pixelstride: i32;
            if xflip {
                pixelsaddr = pixelsaddr.wrapping_add(((width - 1) << 1) as u32).wrapping_sub((xoff << 1) as u32);
                pixelstride = -2;
            } else {
                pixelsaddr = pixelsaddr.wrapping_add((xoff << 1) as u32);
                pixelstride = 2;
            }

            while xoff < xend {
                let local_x = xoff as u32;
                let local_y = ypos as u32;
                let mut color = utils::read_from_mem::<u16>(objvram, pixelsaddr & objvrammask);

                pixelsaddr = pixelsaddr.wrapping_add(pixelstride as u32);

                if replacement.is_some() {
                    let repl_color = sample_replacement(local_x, local_y);
                    color = if repl_color != 0 { repl_color } else { 0 };
                }

                if color & 0x8000 != 0 {
                    if WINDOW {
                        obj_window[xpos as usize] = 1;
                    } else if replacement.is_some() {
                        obj_line[xpos as usize] = (color as u32 & 0x7FFF) | 0x8000 | direct_mask;
                    } else {
                        obj_line[xpos as usize] = color as u32 | pixelattr;
                    }
                } else if !WINDOW && obj_line[xpos as usize] == 0 {
                    obj_line[xpos as usize] = pixelattr & 0x180000;
                }

                xoff += 1;
                xpos += 1;
            }
        } else {
            let mut pixelsaddr = tilenum;
            if disp_cnt & 0x10 != 0 {
                pixelsaddr <<= (disp_cnt >> 20) & 0x3;
                let double_stride = if attr0 & 0x2000 != 0 { 1 } else { 0 };
                pixelsaddr += ((ypos as u32 >> 3) * (width as u32 >> 3)) << double_stride;
            } else {
                pixelsaddr += (ypos as u32 >> 3) * 0x20;
            }

            if spritemode == 1 {
                pixelattr |= 0x80000000;
            } else {
                pixelattr |= 0x10000000;
            }

            if attr0 & 0x2000 != 0 {
                // 256-color
                pixelsaddr <<= 5;
                pixelsaddr = pixelsaddr.wrapping_add((ypos as u32 & 0x7) << 3);
                let pixelstride: i32;

                if !WINDOW {
                    if disp_cnt & 0x80000000 == 0 {
                        pixelattr |= 0x1000;
                    } else {
                        pixelattr |= (attr2 as u32 & 0xF000) >> 4;
                    }
                }

                if xflip {
                    pixelsaddr = pixelsaddr
                        .wrapping_add((((width - 1) as u32 & wmask) << 3) + ((width - 1) as u32 & 0x7))
                        .wrapping_sub((xoff as u32 & wmask) << 3)
                        .wrapping_sub(xoff as u32 & 0x7);
                    pixelstride = -1;
                } else {
                    pixelsaddr = pixelsaddr.wrapping_add(((xoff as u32 & wmask) << 3) + (xoff as u32 & 0x7));
                    pixelstride = 1;
                }

                while xoff < xend {
                    let local_x = xoff as u32;
                    let local_y = ypos as u32;
                    let color = objvram[(pixelsaddr & objvrammask) as usize];

                    pixelsaddr = pixelsaddr.wrapping_add(pixelstride as u32);

                    if replacement.is_some() {
                        let repl_color = sample_replacement(local_x, local_y);
                        if repl_color != 0 {
                            if WINDOW {
                                obj_window[xpos as usize] = 1;
                            } else {
                                obj_line[xpos as usize] = (repl_color as u32 & 0x7FFF) | 0x8000 | direct_mask;
                            }
                        } else if !WINDOW && obj_line[xpos as usize] == 0 {
                            obj_line[xpos as usize] = pixelattr & 0x180000;
                        }

                        xoff += 1;
                        xpos += 1;
                        if xoff & 0x7 == 0 {
                            pixelsaddr = pixelsaddr.wrapping_add((56 * pixelstride) as u32);
                        }
                        continue;
                    }

                    if color != 0 {
                        if WINDOW {
                            obj_window[xpos as usize] = 1;
                        } else {
                            obj_line[xpos as usize] = color as u32 | pixelattr;
                        }
                    } else if !WINDOW && obj_line[xpos as usize] == 0 {
                        obj_line[xpos as usize] = pixelattr & 0x180000;
                    }

                    xoff += 1;
                    xpos += 1;
                    if xoff & 0x7 == 0 {
                        pixelsaddr = pixelsaddr.wrapping_add((56 * pixelstride) as u32);
                    }
                }
            } else {
                // 16-color
                pixelsaddr <<= 5;
                pixelsaddr = pixelsaddr.wrapping_add((ypos as u32 & 0x7) << 2);
                let pixelstride: i32;

                if !WINDOW {
                    pixelattr |= 0x1000;
                    pixelattr |= (attr2 as u32 & 0xF000) >> 8;
                }

                if xflip {
                    pixelsaddr = pixelsaddr
                        .wrapping_add((((width - 1) as u32 & wmask) << 2) + (((width - 1) as u32 & 0x7) >> 1))
                        .wrapping_sub((xoff as u32 & wmask) << 2)
                        .wrapping_sub((xoff as u32 & 0x7) >> 1);
                    pixelstride = -1;
                } else {
                    pixelsaddr = pixelsaddr.wrapping_add(((xoff as u32 & wmask) << 2) + ((xoff as u32 & 0x7) >> 1));
                    pixelstride = 1;
                }

                while xoff < xend {
                    let local_x = xoff as u32;
                    let local_y = ypos as u32;
                    let color;
                    if xflip {
                        if xoff & 0x1 != 0 {
                            color = objvram[(pixelsaddr & objvrammask) as usize] & 0x0F;
                            pixelsaddr = pixelsaddr.wrapping_sub(1);
                        } else {
                            color = objvram[(pixelsaddr & objvrammask) as usize] >> 4;
                        }
                    } else if xoff & 0x1 != 0 {
                        color = objvram[(pixelsaddr & objvrammask) as usize] >> 4;
                        pixelsaddr = pixelsaddr.wrapping_add(1);
                    } else {
                        color = objvram[(pixelsaddr & objvrammask) as usize] & 0x0F;
                    }

                    if replacement.is_some() {
                        let repl_color = sample_replacement(local_x, local_y);
                        if repl_color != 0 {
                            if WINDOW {
                                obj_window[xpos as usize] = 1;
                            } else {
                                obj_line[xpos as usize] = (repl_color as u32 & 0x7FFF) | 0x8000 | direct_mask;
                            }
                        } else if !WINDOW && obj_line[xpos as usize] == 0 {
                            obj_line[xpos as usize] = pixelattr & 0x180000;
                        }

                        xoff += 1;
                        xpos += 1;
                        if xoff & 0x7 == 0 {
                            pixelsaddr = pixelsaddr.wrapping_add(if xflip { -28i32 as u32 } else { 28 });
                        }
                        continue;
                    }

                    if color != 0 {
                        if WINDOW {
                            obj_window[xpos as usize] = 1;
                        } else {
                            obj_line[xpos as usize] = color as u32 | pixelattr;
                        }
                    } else if !WINDOW && obj_line[xpos as usize] == 0 {
                        obj_line[xpos as usize] = pixelattr & 0x180000;
                    }

                    xoff += 1;
                    xpos += 1;
                    if xoff & 0x7 == 0 {
                        pixelsaddr = pixelsaddr.wrapping_add(if xflip { -28i32 as u32 } else { 28 });
                    }
                }
            }
        }
    }

    /// Decodes a sprite's current native pixels to RGBA for key derivation
    /// and dumping. Rotation/scale sprites are not decodable.
    fn decode_sprite_for_dump(
        unit: &Gpu2DRegisters,
        vram: &dyn VramView,
        attr0: u16,
        attr1: u16,
        attr2: u16,
        width: u32,
        height: u32,
    ) -> Option<(Vec<u8>, ObjFmt)> {
        if width == 0 || height == 0 {
            return None;
        }

        if attr0 & 0x0100 != 0 {
            return None;
        }

        let fmt = if (attr0 >> 10) & 0x3 == 3 {
            ObjFmt::Bitmap
        } else if attr0 & 0x2000 != 0 {
            ObjFmt::Pal256
        } else {
            ObjFmt::Pal16
        };

        let mut rgba = vec![0u8; (width * height * 4) as usize];

        let (objvram, objvrammask) = vram.obj_vram(unit.engine);
        let disp_cnt = u32::from(unit.disp_cnt);
        let use_ext_pal = disp_cnt & 0x80000000 != 0;
        let palette = vram.palette();
        let base_pal_offset = unit.engine.palettes_offset() + 0x200;

        let xflip = attr1 & 0x1000 != 0;
        let yflip = attr1 & 0x2000 != 0;

        let tilenum = attr2 as u32 & 0x03FF;

        let write_pixel = |rgba: &mut [u8], dest_x: u32, dest_y: u32, color: [u8; 4]| {
            if dest_x >= width || dest_y >= height {
                return;
            }
            let idx = ((dest_y * width + dest_x) * 4) as usize;
            rgba[idx..idx + 4].copy_from_slice(&color);
        };

        match fmt {
            ObjFmt::Bitmap => {
                for dest_y in 0..height {
                    let src_y = if yflip { height - 1 - dest_y } else { dest_y };

                    let pixelsaddr = if disp_cnt & 0x40 != 0 {
                        if disp_cnt & 0x20 != 0 {
                            continue;
                        }
                        (tilenum << (7 + ((disp_cnt >> 22) & 0x1))) + src_y * width * 2
                    } else if disp_cnt & 0x20 != 0 {
                        ((tilenum & 0x01F) << 4) + ((tilenum & 0x3E0) << 7) + src_y * 256 * 2
                    } else {
                        ((tilenum & 0x00F) << 4) + ((tilenum & 0x3F0) << 7) + src_y * 128 * 2
                    };

                    let mut addr = pixelsaddr;
                    if xflip {
                        addr = addr.wrapping_add((width - 1) << 1);
                    }

                    for dest_x in 0..width {
                        let color = utils::read_from_mem::<u16>(objvram, addr & objvrammask);
                        addr = if xflip { addr.wrapping_sub(2) } else { addr.wrapping_add(2) };
                        let pixel = if color & 0x8000 != 0 { color555_to_rgba(color) } else { [0; 4] };
                        write_pixel(&mut rgba, dest_x, dest_y, pixel);
                    }
                }
            }
            ObjFmt::Pal256 => {
                let wmask = width - 8;
                let one_dim = disp_cnt & 0x10 != 0;
                let one_dim_shift = (disp_cnt >> 20) & 0x3;
                let double_size = attr0 & 0x2000 != 0;
                let pal_bank_256 = (attr2 as u32 & 0xF000) >> 4;

                for dest_y in 0..height {
                    let src_y = if yflip { height - 1 - dest_y } else { dest_y };

                    let mut base = tilenum;
                    if one_dim {
                        base <<= one_dim_shift;
                        base += ((src_y >> 3) * (width >> 3)) << (double_size as u32);
                    } else {
                        base += (src_y >> 3) * 0x20;
                    }

                    let mut addr = (base << 5) + ((src_y & 0x7) << 3);
                    let pixelstride: i32;
                    if xflip {
                        addr = addr.wrapping_add((((width - 1) & wmask) << 3) + ((width - 1) & 0x7));
                        pixelstride = -1;
                    } else {
                        pixelstride = 1;
                    }

                    for dest_x in 0..width {
                        let color_idx = objvram[(addr & objvrammask) as usize];
                        addr = addr.wrapping_add(pixelstride as u32);
                        if (dest_x + 1) & 0x7 == 0 {
                            addr = addr.wrapping_add((56 * pixelstride) as u32);
                        }

                        let pixel = if color_idx != 0 {
                            let pal_color = if use_ext_pal {
                                vram.obj_ext_pal(unit.engine)[(pal_bank_256 + color_idx as u32) as usize]
                            } else {
                                utils::read_from_mem::<u16>(palette, base_pal_offset + ((color_idx as u32) << 1))
                            };
                            color555_to_rgba(pal_color | 0x8000)
                        } else {
                            [0; 4]
                        };

                        write_pixel(&mut rgba, dest_x, dest_y, pixel);
                    }
                }
            }
            ObjFmt::Pal16 => {
                let wmask = width - 8;
                let one_dim = disp_cnt & 0x10 != 0;
                let one_dim_shift = (disp_cnt >> 20) & 0x3;
                let double_size = attr0 & 0x2000 != 0;
                let pal_bank_16 = (attr2 as u32 >> 12) & 0xF;
                let pal_bank_16_ext = (attr2 as u32 & 0xF000) >> 8;

                for dest_y in 0..height {
                    let src_y = if yflip { height - 1 - dest_y } else { dest_y };

                    let mut base = tilenum;
                    if one_dim {
                        base <<= one_dim_shift;
                        base += ((src_y >> 3) * (width >> 3)) << (double_size as u32);
                    } else {
                        base += (src_y >> 3) * 0x20;
                    }

                    let mut addr = (base << 5) + ((src_y & 0x7) << 2);
                    if xflip {
                        addr = addr.wrapping_add((((width - 1) & wmask) << 2) + (((width - 1) & 0x7) >> 1));
                    }

                    for dest_x in 0..width {
                        let color;
                        if xflip {
                            if dest_x & 0x1 != 0 {
                                color = objvram[(addr & objvrammask) as usize] & 0x0F;
                                addr = addr.wrapping_sub(1);
                            } else {
                                color = objvram[(addr & objvrammask) as usize] >> 4;
                            }
                        } else if dest_x & 0x1 != 0 {
                            color = objvram[(addr & objvrammask) as usize] >> 4;
                            addr = addr.wrapping_add(1);
                        } else {
                            color = objvram[(addr & objvrammask) as usize] & 0x0F;
                        }

                        if (dest_x + 1) & 0x7 == 0 {
                            addr = addr.wrapping_add(if xflip { -28i32 as u32 } else { 28 });
                        }

                        let pixel = if color != 0 {
                            let pal_color = if use_ext_pal {
                                vram.obj_ext_pal(unit.engine)[(pal_bank_16_ext + color as u32) as usize]
                            } else {
                                utils::read_from_mem::<u16>(palette, base_pal_offset + (((pal_bank_16 << 4) | color as u32) << 1))
                            };
                            color555_to_rgba(pal_color | 0x8000)
                        } else {
                            [0; 4]
                        };

                        write_pixel(&mut rgba, dest_x, dest_y, pixel);
                    }
                }
            }
            ObjFmt::Unknown => unreachable!(),
        }

        Some((rgba, fmt))
    }

    /// Dumps decodable sprites and refreshes the per-OAM-entry replacement
    /// cache from their current content keys.
    pub fn vblank_end(
        &mut self,
        unit_a: &mut Gpu2DRegisters,
        unit_b: Option<&mut Gpu2DRegisters>,
        vram: &dyn VramView,
        gpu3d: &mut dyn Renderer3D,
    ) {
        if gpu3d.is_accelerated() && unit_a.capture_cnt.enable() && u8::from(unit_a.capture_cnt.combine()) != 1 {
            gpu3d.prepare_capture_frame();
        }

        self.finish_unit_frame(unit_a);
        self.process_unit_sprites(unit_a, vram);
        if let Some(unit_b) = unit_b {
            self.finish_unit_frame(unit_b);
            self.process_unit_sprites(unit_b, vram);
        }
    }

    fn finish_unit_frame(&mut self, unit: &mut Gpu2DRegisters) {
        unit.reload_affine_refs();
        unit.bg_mosaic_y = 0;
        unit.bg_mosaic_y_max = unit.bg_mosaic_size[1] as u16;

        if unit.capture_latch {
            // the capture enable bit auto-clears after one captured frame
            unit.capture_latch = false;
            unit.set_capture_cnt(1 << 31, 0);
        }
    }

    fn process_unit_sprites(&mut self, unit: &Gpu2DRegisters, vram: &dyn VramView) {
        let assets = match &self.sprite_assets {
            Some(assets) => assets.clone(),
            None => return,
        };

        let do_dump = assets.dump_enabled();
        let do_replace = assets.replace_enabled();
        if !do_dump && !do_replace {
            return;
        }

        let num = unit.engine.num();
        let oam = vram.oam();
        let oam_base = unit.engine.oam_offset();

        for i in 0..128usize {
            let attr_base = oam_base + (i as u32) * 8;
            let attr0 = utils::read_from_mem::<u16>(oam, attr_base);
            let attr1 = utils::read_from_mem::<u16>(oam, attr_base + 2);
            let attr2 = utils::read_from_mem::<u16>(oam, attr_base + 4);

            self.sprite_replacement[num][i].has_replacement = false;

            if attr0 & 0x0300 == 0x0200 {
                continue;
            }

            let rotscale = attr0 & 0x0100 != 0;
            let sizeparam = ((attr0 >> 14) | ((attr1 & 0xC000) >> 12)) as usize;
            if sizeparam >= 16 {
                continue;
            }

            let mut width = SPRITE_WIDTH[sizeparam] as u32;
            let mut height = SPRITE_HEIGHT[sizeparam] as u32;

            if rotscale && attr0 & 0x0200 != 0 {
                width <<= 1;
                height <<= 1;
            }

            let (rgba, fmt) = match Self::decode_sprite_for_dump(unit, vram, attr0, attr1, attr2, width, height) {
                Some(decoded) => decoded,
                None => continue,
            };

            if fmt == ObjFmt::Bitmap {
                // direct-color sprites are typically 3D capture surfaces
                continue;
            }

            if do_dump && !rgba.is_empty() {
                let key = SpriteAssets::make_key(&rgba, width, height, fmt);
                assets.dump_if_enabled(&key, &rgba, width, height);
            }

            if do_replace && !rotscale {
                let swap_rb = assets.swap_rb_enabled();

                let load_into_state = |key_rgba: &[u8], adjust_for_flip: bool| -> Option<SpriteReplacement> {
                    let key = SpriteAssets::make_key(key_rgba, width, height, fmt);
                    let (repl_data, rw, rh) = assets.try_load_replacement(&key)?;
                    if rw % width != 0 || rh % height != 0 {
                        return None;
                    }

                    let scale_x = rw / width;
                    let scale_y = rh / height;

                    let mut colors = vec![0u16; (width * height) as usize];
                    for y in 0..height {
                        for x in 0..width {
                            let mut sample_x = x * scale_x;
                            let mut sample_y = y * scale_y;
                            if adjust_for_flip {
                                if attr1 & 0x1000 != 0 {
                                    sample_x = rw - scale_x * (x + 1);
                                }
                                if attr1 & 0x2000 != 0 {
                                    sample_y = rh - scale_y * (y + 1);
                                }
                            }
                            sample_x = sample_x.min(rw - 1);
                            sample_y = sample_y.min(rh - 1);
                            let src = ((sample_y * rw + sample_x) * 4) as usize;
                            if src + 3 >= repl_data.len() {
                                continue;
                            }
                            let r = repl_data[src + if swap_rb { 2 } else { 0 }];
                            let g = repl_data[src + 1];
                            let b = repl_data[src + if swap_rb { 0 } else { 2 }];
                            let a = repl_data[src + 3];
                            colors[(y * width + x) as usize] = rgba8_to_5551(r, g, b, a);
                        }
                    }

                    Some(SpriteReplacement {
                        has_replacement: true,
                        width,
                        height,
                        colors,
                    })
                };

                let mut loaded = load_into_state(&rgba, false);
                if loaded.is_none() && attr1 & 0x3000 != 0 {
                    // retry with a pre-flipped key, sampling inverted
                    let mut alt = rgba.clone();
                    if attr1 & 0x1000 != 0 {
                        for y in 0..height {
                            let row = &mut alt[(y * width * 4) as usize..((y + 1) * width * 4) as usize];
                            for x in 0..(width / 2) as usize {
                                for c in 0..4 {
                                    row.swap(x * 4 + c, (width as usize - 1 - x) * 4 + c);
                                }
                            }
                        }
                    }
                    if attr1 & 0x2000 != 0 {
                        for y in 0..(height / 2) as usize {
                            for x in 0..(width * 4) as usize {
                                let top = y * (width * 4) as usize + x;
                                let bottom = (height as usize - 1 - y) * (width * 4) as usize + x;
                                alt.swap(top, bottom);
                            }
                        }
                    }
                    loaded = load_into_state(&alt, true);
                }

                if let Some(state) = loaded {
                    self.sprite_replacement[num][i] = state;
                }
            }
        }
    }
}
