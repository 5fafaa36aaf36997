use crate::core::gpu_2d::registers_2d::Gpu2DRegisters;
use crate::core::gpu_2d::renderer_soft_2d::{
    bg_flag, draw_pixel_accel, draw_pixel_normal, DrawPixelFn, SoftRenderer2D, FLAG_3D,
};
use crate::core::gpu_2d::DISPLAY_WIDTH;
use crate::core::memory::vram::VramView;
use crate::utils;

impl SoftRenderer2D {
    pub(super) fn draw_bg_text(&mut self, line: u32, unit: &Gpu2DRegisters, vram: &dyn VramView, bg_num: usize, accel: bool) {
        let draw_pixel: DrawPixelFn = if accel { draw_pixel_accel } else { draw_pixel_normal };
        if unit.bg_cnt[bg_num].mosaic() && unit.bg_mosaic_size[0] > 0 {
            self.draw_bg_text_impl::<true>(line, unit, vram, bg_num, draw_pixel);
        } else {
            self.draw_bg_text_impl::<false>(line, unit, vram, bg_num, draw_pixel);
        }
    }

    pub(super) fn draw_bg_affine(&mut self, line: u32, unit: &mut Gpu2DRegisters, vram: &dyn VramView, bg_num: usize, accel: bool) {
        let draw_pixel: DrawPixelFn = if accel { draw_pixel_accel } else { draw_pixel_normal };
        if unit.bg_cnt[bg_num].mosaic() && unit.bg_mosaic_size[0] > 0 {
            self.draw_bg_affine_impl::<true>(line, unit, vram, bg_num, draw_pixel);
        } else {
            self.draw_bg_affine_impl::<false>(line, unit, vram, bg_num, draw_pixel);
        }
    }

    pub(super) fn draw_bg_extended(&mut self, line: u32, unit: &mut Gpu2DRegisters, vram: &dyn VramView, bg_num: usize, accel: bool) {
        let draw_pixel: DrawPixelFn = if accel { draw_pixel_accel } else { draw_pixel_normal };
        if unit.bg_cnt[bg_num].mosaic() && unit.bg_mosaic_size[0] > 0 {
            self.draw_bg_extended_impl::<true>(line, unit, vram, bg_num, draw_pixel);
        } else {
            self.draw_bg_extended_impl::<false>(line, unit, vram, bg_num, draw_pixel);
        }
    }

    pub(super) fn draw_bg_large(&mut self, line: u32, unit: &mut Gpu2DRegisters, vram: &dyn VramView, accel: bool) {
        let draw_pixel: DrawPixelFn = if accel { draw_pixel_accel } else { draw_pixel_normal };
        if unit.bg_cnt[2].mosaic() && unit.bg_mosaic_size[0] > 0 {
            self.draw_bg_large_impl::<true>(line, unit, vram, draw_pixel);
        } else {
            self.draw_bg_large_impl::<false>(line, unit, vram, draw_pixel);
        }
    }

    /// Inserts the 3D layer as BG0. In accelerated mode the color is not
    /// known yet, so a placeholder candidate with only the 3D flag is pushed.
    pub(super) fn draw_bg_3d(&mut self, accel: bool) {
        if accel {
            for i in 0..DISPLAY_WIDTH {
                if self.window_mask[i] & 0x01 == 0 {
                    continue;
                }

                self.bg_obj_line[i + DISPLAY_WIDTH * 2] = self.bg_obj_line[i + DISPLAY_WIDTH];
                self.bg_obj_line[i + DISPLAY_WIDTH] = self.bg_obj_line[i];
                self.bg_obj_line[i] = FLAG_3D;
            }
        } else {
            for i in 0..DISPLAY_WIDTH {
                let c = self.line_3d[i];

                if c >> 24 == 0 {
                    continue;
                }
                if self.window_mask[i] & 0x01 == 0 {
                    continue;
                }

                self.bg_obj_line[i + DISPLAY_WIDTH] = self.bg_obj_line[i];
                self.bg_obj_line[i] = c | FLAG_3D;
            }
        }
    }

    fn bg_base_addrs(unit: &Gpu2DRegisters, bg_cnt_raw: u16) -> (u32, u32) {
        let disp_cnt = u32::from(unit.disp_cnt);
        if unit.engine.num() != 0 {
            (((bg_cnt_raw as u32 & 0x003C) << 12), ((bg_cnt_raw as u32 & 0x1F00) << 3))
        } else {
            (
                ((disp_cnt & 0x07000000) >> 8) + ((bg_cnt_raw as u32 & 0x003C) << 12),
                ((disp_cnt & 0x38000000) >> 11) + ((bg_cnt_raw as u32 & 0x1F00) << 3),
            )
        }
    }

    fn draw_bg_text_impl<const MOSAIC: bool>(&mut self, line: u32, unit: &Gpu2DRegisters, vram: &dyn VramView, bg_num: usize, draw_pixel: DrawPixelFn) {
        let bg_cnt_raw = u16::from(unit.bg_cnt[bg_num]);
        let disp_cnt = u32::from(unit.disp_cnt);

        let xoff = unit.bg_h_ofs[bg_num];
        let mut yoff = unit.bg_v_ofs[bg_num].wrapping_add(line as u16);

        if bg_cnt_raw & 0x0040 != 0 {
            // vertical mosaic
            yoff = yoff.wrapping_sub(unit.bg_mosaic_y);
        }

        let widexmask = if bg_cnt_raw & 0x4000 != 0 { 0x100u32 } else { 0 };

        let extpal = disp_cnt & 0x40000000 != 0;
        let extpalslot = if bg_num < 2 && bg_cnt_raw & 0x2000 != 0 { 2 + bg_num } else { bg_num };

        let (bgvram, bgvrammask) = vram.bg_vram(unit.engine);
        let (tilesetaddr, mut tilemapaddr) = Self::bg_base_addrs(unit, bg_cnt_raw);
        let palette = vram.palette();
        let pal_offset = unit.engine.palettes_offset();

        // adjust Y position in the tilemap
        if bg_cnt_raw & 0x8000 != 0 {
            tilemapaddr += ((yoff as u32 & 0x1F8) << 3) + if bg_cnt_raw & 0x4000 != 0 { (yoff as u32 & 0x100) << 3 } else { 0 };
        } else {
            tilemapaddr += (yoff as u32 & 0xF8) << 3;
        }

        let bit8 = bg_cnt_raw & 0x0080 != 0;

        let mut curtile = 0u16;
        let mut pixelsaddr = 0u32;
        let mut ext_pal_base = 0usize;
        let mut pal_bank_offset = 0u32;
        let mut last_tile = u32::MAX;

        for i in 0..DISPLAY_WIDTH {
            let xpos = if MOSAIC {
                (xoff as u32).wrapping_add(i as u32).wrapping_sub(self.cur_bg_x_mosaic[i] as u32)
            } else {
                (xoff as u32).wrapping_add(i as u32)
            } & 0x1FF;

            if xpos >> 3 != last_tile {
                // load a new tile
                last_tile = xpos >> 3;
                let tile_addr = tilemapaddr + ((xpos & 0xF8) >> 2) + ((xpos & widexmask) << 3);
                curtile = utils::read_from_mem::<u16>(bgvram, tile_addr & bgvrammask);

                let tileyoff = if curtile & 0x0800 != 0 { 7 - (yoff as u32 & 0x7) } else { yoff as u32 & 0x7 };
                if bit8 {
                    if extpal {
                        ext_pal_base = (curtile as usize >> 12) * 256;
                    }
                    pixelsaddr = tilesetaddr + ((curtile as u32 & 0x03FF) << 6) + (tileyoff << 3);
                } else {
                    pal_bank_offset = (curtile as u32 & 0xF000) >> 7;
                    pixelsaddr = tilesetaddr + ((curtile as u32 & 0x03FF) << 5) + (tileyoff << 2);
                }
            }

            if self.window_mask[i] & (1 << bg_num) as u8 == 0 {
                continue;
            }

            let tilexoff = if curtile & 0x0400 != 0 { 7 - (xpos & 0x7) } else { xpos & 0x7 };

            if bit8 {
                let color = bgvram[((pixelsaddr + tilexoff) & bgvrammask) as usize];
                if color != 0 {
                    let color = if extpal {
                        vram.bg_ext_pal(unit.engine, extpalslot)[ext_pal_base + color as usize]
                    } else {
                        utils::read_from_mem::<u16>(palette, pal_offset + ((color as u32) << 1))
                    };
                    draw_pixel(&mut self.bg_obj_line, i, color, bg_flag(bg_num as u32));
                }
            } else {
                let byte = bgvram[((pixelsaddr + (tilexoff >> 1)) & bgvrammask) as usize];
                let color = if tilexoff & 0x1 != 0 { byte >> 4 } else { byte & 0x0F };
                if color != 0 {
                    let color = utils::read_from_mem::<u16>(palette, pal_offset + pal_bank_offset + ((color as u32) << 1));
                    draw_pixel(&mut self.bg_obj_line, i, color, bg_flag(bg_num as u32));
                }
            }
        }
    }

    fn draw_bg_affine_impl<const MOSAIC: bool>(&mut self, _line: u32, unit: &mut Gpu2DRegisters, vram: &dyn VramView, bg_num: usize, draw_pixel: DrawPixelFn) {
        let bg_cnt_raw = u16::from(unit.bg_cnt[bg_num]);

        let (coordmask, mut yshift) = match bg_cnt_raw & 0xC000 {
            0x0000 => (0x07800u32, 7u32),
            0x4000 => (0x0F800, 8),
            0x8000 => (0x1F800, 9),
            _ => (0x3F800, 10),
        };

        let overflowmask: u32 = if bg_cnt_raw & 0x2000 != 0 { 0 } else { !(coordmask | 0x7FF) };

        let rot_a = unit.bg_pa[bg_num - 2] as i32;
        let rot_c = unit.bg_pc[bg_num - 2] as i32;

        let mut rot_x = unit.internal.x[bg_num - 2];
        let mut rot_y = unit.internal.y[bg_num - 2];

        if bg_cnt_raw & 0x0040 != 0 {
            // vertical mosaic
            rot_x -= unit.bg_mosaic_y as i32 * unit.bg_pb[bg_num - 2] as i32;
            rot_y -= unit.bg_mosaic_y as i32 * unit.bg_pd[bg_num - 2] as i32;
        }

        let (bgvram, bgvrammask) = vram.bg_vram(unit.engine);
        let (tilesetaddr, tilemapaddr) = Self::bg_base_addrs(unit, bg_cnt_raw);
        let palette = vram.palette();
        let pal_offset = unit.engine.palettes_offset();

        yshift -= 3;

        for i in 0..DISPLAY_WIDTH {
            if self.window_mask[i] & (1 << bg_num) as u8 != 0 {
                let (final_x, final_y) = if MOSAIC {
                    let im = self.cur_bg_x_mosaic[i] as i32;
                    (rot_x - im * rot_a, rot_y - im * rot_c)
                } else {
                    (rot_x, rot_y)
                };

                if (final_x | final_y) as u32 & overflowmask == 0 {
                    let tile_addr = tilemapaddr
                        + ((((final_y as u32 & coordmask) >> 11) << yshift) + ((final_x as u32 & coordmask) >> 11));
                    let curtile = bgvram[(tile_addr & bgvrammask) as usize] as u32;

                    let tilexoff = (final_x as u32 >> 8) & 0x7;
                    let tileyoff = (final_y as u32 >> 8) & 0x7;

                    let color = bgvram[((tilesetaddr + (curtile << 6) + (tileyoff << 3) + tilexoff) & bgvrammask) as usize];

                    if color != 0 {
                        let color = utils::read_from_mem::<u16>(palette, pal_offset + ((color as u32) << 1));
                        draw_pixel(&mut self.bg_obj_line, i, color, bg_flag(bg_num as u32));
                    }
                }
            }

            rot_x += rot_a;
            rot_y += rot_c;
        }

        unit.internal.x[bg_num - 2] += unit.bg_pb[bg_num - 2] as i32;
        unit.internal.y[bg_num - 2] += unit.bg_pd[bg_num - 2] as i32;
    }

    fn draw_bg_extended_impl<const MOSAIC: bool>(&mut self, _line: u32, unit: &mut Gpu2DRegisters, vram: &dyn VramView, bg_num: usize, draw_pixel: DrawPixelFn) {
        let bg_cnt_raw = u16::from(unit.bg_cnt[bg_num]);
        let disp_cnt = u32::from(unit.disp_cnt);

        let rot_a = unit.bg_pa[bg_num - 2] as i32;
        let rot_c = unit.bg_pc[bg_num - 2] as i32;

        let mut rot_x = unit.internal.x[bg_num - 2];
        let mut rot_y = unit.internal.y[bg_num - 2];

        if bg_cnt_raw & 0x0040 != 0 {
            // vertical mosaic
            rot_x -= unit.bg_mosaic_y as i32 * unit.bg_pb[bg_num - 2] as i32;
            rot_y -= unit.bg_mosaic_y as i32 * unit.bg_pd[bg_num - 2] as i32;
        }

        let (bgvram, bgvrammask) = vram.bg_vram(unit.engine);
        let palette = vram.palette();
        let pal_offset = unit.engine.palettes_offset();

        if bg_cnt_raw & 0x0080 != 0 {
            // bitmap modes
            let (xmask, ymask, yshift) = match bg_cnt_raw & 0xC000 {
                0x0000 => (0x07FFFu32, 0x07FFFu32, 7u32),
                0x4000 => (0x0FFFF, 0x0FFFF, 8),
                0x8000 => (0x1FFFF, 0x0FFFF, 9),
                _ => (0x1FFFF, 0x1FFFF, 9),
            };

            let (ofxmask, ofymask) = if bg_cnt_raw & 0x2000 != 0 { (0u32, 0u32) } else { (!xmask, !ymask) };

            let tilemapaddr = (bg_cnt_raw as u32 & 0x1F00) << 6;

            if bg_cnt_raw & 0x0004 != 0 {
                // direct color bitmap
                for i in 0..DISPLAY_WIDTH {
                    if self.window_mask[i] & (1 << bg_num) as u8 != 0 {
                        let (final_x, final_y) = if MOSAIC {
                            let im = self.cur_bg_x_mosaic[i] as i32;
                            (rot_x - im * rot_a, rot_y - im * rot_c)
                        } else {
                            (rot_x, rot_y)
                        };

                        if final_x as u32 & ofxmask == 0 && final_y as u32 & ofymask == 0 {
                            let addr = tilemapaddr
                                + (((((final_y as u32 & ymask) >> 8) << yshift) + ((final_x as u32 & xmask) >> 8)) << 1);
                            let color = utils::read_from_mem::<u16>(bgvram, addr & bgvrammask);

                            if color & 0x8000 != 0 {
                                draw_pixel(&mut self.bg_obj_line, i, color, bg_flag(bg_num as u32));
                            }
                        }
                    }

                    rot_x += rot_a;
                    rot_y += rot_c;
                }
            } else {
                // 256-color bitmap
                for i in 0..DISPLAY_WIDTH {
                    if self.window_mask[i] & (1 << bg_num) as u8 != 0 {
                        let (final_x, final_y) = if MOSAIC {
                            let im = self.cur_bg_x_mosaic[i] as i32;
                            (rot_x - im * rot_a, rot_y - im * rot_c)
                        } else {
                            (rot_x, rot_y)
                        };

                        if final_x as u32 & ofxmask == 0 && final_y as u32 & ofymask == 0 {
                            let addr = tilemapaddr + (((final_y as u32 & ymask) >> 8) << yshift) + ((final_x as u32 & xmask) >> 8);
                            let color = bgvram[(addr & bgvrammask) as usize];

                            if color != 0 {
                                let color = utils::read_from_mem::<u16>(palette, pal_offset + ((color as u32) << 1));
                                draw_pixel(&mut self.bg_obj_line, i, color, bg_flag(bg_num as u32));
                            }
                        }
                    }

                    rot_x += rot_a;
                    rot_y += rot_c;
                }
            }
        } else {
            // mixed affine/text mode
            let (coordmask, mut yshift) = match bg_cnt_raw & 0xC000 {
                0x0000 => (0x07800u32, 7u32),
                0x4000 => (0x0F800, 8),
                0x8000 => (0x1F800, 9),
                _ => (0x3F800, 10),
            };

            let overflowmask: u32 = if bg_cnt_raw & 0x2000 != 0 { 0 } else { !(coordmask | 0x7FF) };

            let extpal = disp_cnt & 0x40000000 != 0;
            let (tilesetaddr, tilemapaddr) = Self::bg_base_addrs(unit, bg_cnt_raw);

            yshift -= 3;

            for i in 0..DISPLAY_WIDTH {
                if self.window_mask[i] & (1 << bg_num) as u8 != 0 {
                    let (final_x, final_y) = if MOSAIC {
                        let im = self.cur_bg_x_mosaic[i] as i32;
                        (rot_x - im * rot_a, rot_y - im * rot_c)
                    } else {
                        (rot_x, rot_y)
                    };

                    if (final_x | final_y) as u32 & overflowmask == 0 {
                        let tile_addr = tilemapaddr
                            + (((((final_y as u32 & coordmask) >> 11) << yshift) + ((final_x as u32 & coordmask) >> 11)) << 1);
                        let curtile = utils::read_from_mem::<u16>(bgvram, tile_addr & bgvrammask);

                        let mut tilexoff = (final_x as u32 >> 8) & 0x7;
                        let mut tileyoff = (final_y as u32 >> 8) & 0x7;

                        if curtile & 0x0400 != 0 {
                            tilexoff = 7 - tilexoff;
                        }
                        if curtile & 0x0800 != 0 {
                            tileyoff = 7 - tileyoff;
                        }

                        let color =
                            bgvram[((tilesetaddr + ((curtile as u32 & 0x03FF) << 6) + (tileyoff << 3) + tilexoff) & bgvrammask) as usize];

                        if color != 0 {
                            let color = if extpal {
                                vram.bg_ext_pal(unit.engine, bg_num)[(curtile as usize >> 12) * 256 + color as usize]
                            } else {
                                utils::read_from_mem::<u16>(palette, pal_offset + ((color as u32) << 1))
                            };
                            draw_pixel(&mut self.bg_obj_line, i, color, bg_flag(bg_num as u32));
                        }
                    }
                }

                rot_x += rot_a;
                rot_y += rot_c;
            }
        }

        unit.internal.x[bg_num - 2] += unit.bg_pb[bg_num - 2] as i32;
        unit.internal.y[bg_num - 2] += unit.bg_pd[bg_num - 2] as i32;
    }

    // the large bitmap mode only exists on BG2
    fn draw_bg_large_impl<const MOSAIC: bool>(&mut self, _line: u32, unit: &mut Gpu2DRegisters, vram: &dyn VramView, draw_pixel: DrawPixelFn) {
        let bg_cnt_raw = u16::from(unit.bg_cnt[2]);

        // large BG sizes: 512x1024, 1024x512, 512x256, 512x512
        let (xmask, ymask, yshift) = match bg_cnt_raw & 0xC000 {
            0x0000 => (0x1FFFFu32, 0x3FFFFu32, 9u32),
            0x4000 => (0x3FFFF, 0x1FFFF, 10),
            0x8000 => (0x1FFFF, 0x0FFFF, 9),
            _ => (0x1FFFF, 0x1FFFF, 9),
        };

        let (ofxmask, ofymask) = if bg_cnt_raw & 0x2000 != 0 { (0u32, 0u32) } else { (!xmask, !ymask) };

        let rot_a = unit.bg_pa[0] as i32;
        let rot_c = unit.bg_pc[0] as i32;

        let mut rot_x = unit.internal.x[0];
        let mut rot_y = unit.internal.y[0];

        if bg_cnt_raw & 0x0040 != 0 {
            // vertical mosaic
            rot_x -= unit.bg_mosaic_y as i32 * unit.bg_pb[0] as i32;
            rot_y -= unit.bg_mosaic_y as i32 * unit.bg_pd[0] as i32;
        }

        let (bgvram, bgvrammask) = vram.bg_vram(unit.engine);
        let palette = vram.palette();
        let pal_offset = unit.engine.palettes_offset();

        for i in 0..DISPLAY_WIDTH {
            if self.window_mask[i] & (1 << 2) != 0 {
                let (final_x, final_y) = if MOSAIC {
                    let im = self.cur_bg_x_mosaic[i] as i32;
                    (rot_x - im * rot_a, rot_y - im * rot_c)
                } else {
                    (rot_x, rot_y)
                };

                if final_x as u32 & ofxmask == 0 && final_y as u32 & ofymask == 0 {
                    let addr = (((final_y as u32 & ymask) >> 8) << yshift) + ((final_x as u32 & xmask) >> 8);
                    let color = bgvram[(addr & bgvrammask) as usize];

                    if color != 0 {
                        let color = utils::read_from_mem::<u16>(palette, pal_offset + ((color as u32) << 1));
                        draw_pixel(&mut self.bg_obj_line, i, color, bg_flag(2));
                    }
                }
            }

            rot_x += rot_a;
            rot_y += rot_c;
        }

        unit.internal.x[0] += unit.bg_pb[0] as i32;
        unit.internal.y[0] += unit.bg_pd[0] as i32;
    }
}
