use crate::core::gpu_2d::registers_2d::{DisplayMode, Gpu2DRegisters};
use crate::core::gpu_2d::{Gpu2DEngine, ACCEL_STRIDE, DISPLAY_HEIGHT, DISPLAY_WIDTH, MOSAIC_TABLE};
use crate::core::gpu_3d::Renderer3D;
use crate::core::memory::vram::{VramView, VRAM_DIRTY_GRANULARITY};
use crate::hires::sprite_assets::SpriteAssets;
use crate::utils;
use crate::utils::HeapMemU32;
use static_assertions::const_assert_eq;
use std::sync::Arc;

/// Three 256-entry sections: the top candidate, the second candidate (the
/// blending 2nd target) and, for the accelerated 3D path, a third candidate.
pub const LINE_SECTIONS: usize = DISPLAY_WIDTH * 3;

const_assert_eq!(ACCEL_STRIDE, LINE_SECTIONS + 1);

/// Compositor flags carried in the high byte of a line-buffer entry.
pub const FLAG_OBJ: u32 = 0x10000000;
pub const FLAG_BACKDROP: u32 = 0x20000000;
pub const FLAG_3D: u32 = 0x40000000;
pub const FLAG_OBJ_BLEND: u32 = 0x80000000;

pub const fn bg_flag(bg_num: u32) -> u32 {
    0x01000000 << bg_num
}

/// Writes one pixel candidate, pushing the previous top candidate down.
pub type DrawPixelFn = fn(&mut [u32; LINE_SECTIONS], usize, u16, u32);

pub fn draw_pixel_normal(line: &mut [u32; LINE_SECTIONS], x: usize, color: u16, flag: u32) {
    line[x + DISPLAY_WIDTH] = line[x];
    line[x] = rgb5_to_rgb6(color as u32) | flag;
}

pub fn draw_pixel_accel(line: &mut [u32; LINE_SECTIONS], x: usize, color: u16, flag: u32) {
    line[x + DISPLAY_WIDTH * 2] = line[x + DISPLAY_WIDTH];
    line[x + DISPLAY_WIDTH] = line[x];
    line[x] = rgb5_to_rgb6(color as u32) | flag;
}

/// 15-bit RGB to the internal 18-bit layout (6 bits per channel at byte
/// offsets), preserving nothing above the color bits.
pub fn rgb5_to_rgb6(color: u32) -> u32 {
    let r = (color & 0x001F) << 1;
    let g = (color & 0x03E0) >> 4;
    let b = (color & 0x7C00) >> 9;
    r | (g << 8) | (b << 16)
}

pub fn color_blend4(val1: u32, val2: u32, eva: u32, evb: u32) -> u32 {
    let mut r = (((val1 & 0x00003F) * eva) + ((val2 & 0x00003F) * evb)) >> 4;
    let mut g = ((((val1 & 0x003F00) * eva) + ((val2 & 0x003F00) * evb)) >> 4) & 0x7F00;
    let mut b = ((((val1 & 0x3F0000) * eva) + ((val2 & 0x3F0000) * evb)) >> 4) & 0x7F0000;

    if r > 0x00003F {
        r = 0x00003F;
    }
    if g > 0x003F00 {
        g = 0x003F00;
    }
    if b > 0x3F0000 {
        b = 0x3F0000;
    }

    r | g | b | 0xFF000000
}

/// Blend weighted by the first value's 5-bit source alpha (the 3D layer).
pub fn color_blend5(val1: u32, val2: u32) -> u32 {
    let eva = ((val1 >> 24) & 0x1F) + 1;
    let evb = 32 - eva;

    if eva == 32 {
        return val1;
    }

    let mut r = (((val1 & 0x00003F) * eva) + ((val2 & 0x00003F) * evb)) >> 5;
    let mut g = ((((val1 & 0x003F00) * eva) + ((val2 & 0x003F00) * evb)) >> 5) & 0x7F00;
    let mut b = ((((val1 & 0x3F0000) * eva) + ((val2 & 0x3F0000) * evb)) >> 5) & 0x7F0000;

    if r > 0x00003F {
        r = 0x00003F;
    }
    if g > 0x003F00 {
        g = 0x003F00;
    }
    if b > 0x3F0000 {
        b = 0x3F0000;
    }

    r | g | b | 0xFF000000
}

pub fn color_brightness_up(val: u32, factor: u32, bias: u32) -> u32 {
    let mut rb = val & 0x3F003F;
    let mut g = val & 0x003F00;

    rb += ((((0x3F003F - rb) * factor) + (bias * 0x010001)) >> 4) & 0x3F003F;
    g += ((((0x003F00 - g) * factor) + (bias * 0x000100)) >> 4) & 0x003F00;

    rb | g | 0xFF000000
}

pub fn color_brightness_down(val: u32, factor: u32, bias: u32) -> u32 {
    let mut rb = val & 0x3F003F;
    let mut g = val & 0x003F00;

    rb -= (((rb * factor) + (bias * 0x010001)) >> 4) & 0x3F003F;
    g -= (((g * factor) + (bias * 0x000100)) >> 4) & 0x003F00;

    rb | g | 0xFF000000
}

/// Deferred blend parameters for one column of the accelerated path. The
/// software compositor cannot resolve columns involving the 3D layer, so it
/// records what the GPU pass (or the capture replay) must do instead.
#[derive(Copy, Clone)]
pub struct Blend3DCtl {
    pub mode: u8,
    pub eva: u8,
    pub evb: u8,
    pub evy: u8,
}

impl Blend3DCtl {
    pub const MODE_3D_TOP_NONE: u8 = 0;
    pub const MODE_3D_BOTTOM_BLEND: u8 = 1;
    pub const MODE_3D_TOP_UP: u8 = 2;
    pub const MODE_3D_TOP_DOWN: u8 = 3;
    pub const MODE_3D_TOP_BLEND: u8 = 4;
    pub const MODE_NO_3D: u8 = 7;

    pub const NONE: Blend3DCtl = Blend3DCtl {
        mode: Blend3DCtl::MODE_NO_3D,
        eva: 0,
        evb: 0,
        evy: 0,
    };

    pub fn encode(self) -> u32 {
        match self.mode {
            Blend3DCtl::MODE_3D_TOP_BLEND => 0x04000000,
            Blend3DCtl::MODE_3D_TOP_NONE | Blend3DCtl::MODE_3D_TOP_UP | Blend3DCtl::MODE_3D_TOP_DOWN => {
                ((self.mode as u32) << 24) | ((self.evy as u32) << 8)
            }
            _ => ((self.mode as u32) << 24) | ((self.evb as u32) << 16) | ((self.eva as u32) << 8),
        }
    }
}

impl Default for Blend3DCtl {
    fn default() -> Self {
        Blend3DCtl::NONE
    }
}

/// Cached substitute image for one OAM entry, recomputed at VBlank end from
/// the sprite's current decoded content.
#[derive(Default)]
pub struct SpriteReplacement {
    pub has_replacement: bool,
    pub width: u32,
    pub height: u32,
    pub colors: Vec<u16>,
}

pub struct SoftRenderer2D {
    pub(super) bg_obj_line: HeapMemU32<LINE_SECTIONS>,
    pub(super) blend_3d_ctl: [Blend3DCtl; DISPLAY_WIDTH],
    pub(super) window_mask: [u8; DISPLAY_WIDTH],
    pub(super) obj_line: [HeapMemU32<DISPLAY_WIDTH>; 2],
    pub(super) obj_window: [[u8; DISPLAY_WIDTH]; 2],
    pub(super) num_sprites: [u32; 2],
    pub(super) line_3d: HeapMemU32<DISPLAY_WIDTH>,
    pub(super) cur_bg_x_mosaic: &'static [u8; 256],
    pub(super) sprite_replacement: [Vec<SpriteReplacement>; 2],
    pub(super) sprite_assets: Option<Arc<SpriteAssets>>,
    framebuffer: [HeapMemU32<{ ACCEL_STRIDE * DISPLAY_HEIGHT }>; 2],
}

impl SoftRenderer2D {
    pub fn new() -> Self {
        SoftRenderer2D {
            bg_obj_line: HeapMemU32::new(),
            blend_3d_ctl: [Blend3DCtl::NONE; DISPLAY_WIDTH],
            window_mask: [0; DISPLAY_WIDTH],
            obj_line: [HeapMemU32::new(), HeapMemU32::new()],
            obj_window: [[0; DISPLAY_WIDTH]; 2],
            num_sprites: [0; 2],
            line_3d: HeapMemU32::new(),
            cur_bg_x_mosaic: &MOSAIC_TABLE[0],
            sprite_replacement: [
                (0..128).map(|_| SpriteReplacement::default()).collect(),
                (0..128).map(|_| SpriteReplacement::default()).collect(),
            ],
            sprite_assets: None,
            framebuffer: [HeapMemU32::new(), HeapMemU32::new()],
        }
    }

    /// Injects the sprite dump/replacement service; `None` disables both.
    pub fn set_sprite_assets(&mut self, assets: Option<Arc<SpriteAssets>>) {
        self.sprite_assets = assets;
    }

    pub fn framebuffer(&self, engine: Gpu2DEngine) -> &[u32] {
        &*self.framebuffer[engine.num()]
    }

    fn framebuffer_line(&mut self, num: usize, line: u32, stride: usize) -> &mut [u32] {
        let start = stride * line as usize;
        &mut self.framebuffer[num][start..start + stride]
    }

    pub fn draw_scanline(&mut self, line: u32, unit: &mut Gpu2DRegisters, vram: &mut dyn VramView, gpu3d: &mut dyn Renderer3D) {
        let accel = gpu3d.is_accelerated();
        let stride = if accel { ACCEL_STRIDE } else { DISPLAY_WIDTH };
        let num = unit.engine.num();
        let n3d_line = line;

        unit.check_windows(line);

        let mut forceblank = false;

        // scanlines outside of the drawing range are filled white
        if line > 192 {
            forceblank = true;
        }

        // unit B can be completely disabled by POWCNT1, unit A cannot
        if num != 0 && !unit.enabled {
            forceblank = true;
        }

        if line == 0 && unit.capture_cnt.enable() && !forceblank {
            unit.capture_latch = true;
        }

        if num == 0 {
            if !accel {
                self.line_3d.copy_from_slice(gpu3d.line(n3d_line));
            } else if unit.capture_latch && u8::from(unit.capture_cnt.combine()) != 1 {
                self.line_3d.copy_from_slice(gpu3d.line(n3d_line));
            }
        }

        if forceblank {
            let dst = self.framebuffer_line(num, line, stride);
            dst[..DISPLAY_WIDTH].fill(0xFFFFFFFF);
            if accel {
                dst[LINE_SECTIONS] = 0;
            }
            return;
        }

        let disp_cnt = unit.disp_cnt;
        let mut dispmode = u8::from(disp_cnt.display_mode());
        dispmode &= if num != 0 { 0x1 } else { 0x3 };

        // regular graphics are always rendered, even when not displayed,
        // since capture source A reads them
        self.draw_scanline_bg_obj(line, unit, vram, accel);
        unit.update_mosaic_counters(line);

        match DisplayMode::from(dispmode) {
            DisplayMode::Off => {
                self.framebuffer_line(num, line, stride)[..DISPLAY_WIDTH].fill(0x003F3F3F);
            }
            DisplayMode::Layers => {
                if accel {
                    let start = stride * line as usize;
                    let fb = &mut self.framebuffer[num];
                    fb[start..start + DISPLAY_WIDTH * 2].copy_from_slice(&self.bg_obj_line[..DISPLAY_WIDTH * 2]);
                    for i in 0..DISPLAY_WIDTH {
                        fb[start + DISPLAY_WIDTH * 2 + i] = self.blend_3d_ctl[i].encode();
                    }
                } else {
                    let start = stride * line as usize;
                    self.framebuffer[num][start..start + DISPLAY_WIDTH].copy_from_slice(&self.bg_obj_line[..DISPLAY_WIDTH]);
                }
            }
            DisplayMode::Vram => {
                let vram_block = u8::from(disp_cnt.vram_block()) as usize;
                let start = stride * line as usize;
                let fb = &mut self.framebuffer[num];
                match vram.lcdc_bank(vram_block) {
                    Some(bank) => {
                        let base_addr = line * DISPLAY_WIDTH as u32 * 2;
                        for i in 0..DISPLAY_WIDTH {
                            let color = utils::read_from_mem::<u16>(bank, base_addr + ((i as u32) << 1)) as u32;
                            fb[start + i] = rgb5_to_rgb6(color);
                        }
                    }
                    None => fb[start..start + DISPLAY_WIDTH].fill(0),
                }
            }
            DisplayMode::Fifo => {
                let start = stride * line as usize;
                let fb = &mut self.framebuffer[num];
                for i in 0..DISPLAY_WIDTH {
                    fb[start + i] = rgb5_to_rgb6(unit.disp_fifo_buffer[i] as u32);
                }
            }
        }

        if num == 0 && unit.capture_latch {
            let (capwidth, capheight) = unit.capture_cnt.dimensions();
            if line < capheight {
                self.do_capture(line, capwidth, unit, vram, accel);
            }
        }

        let master_bright = u16::from(unit.master_bright) as u32;

        if accel {
            let xpos = gpu3d.render_x_pos();
            let disp_cnt_raw = u32::from(disp_cnt);
            let dst = self.framebuffer_line(num, line, stride);
            dst[LINE_SECTIONS] = master_bright | (disp_cnt_raw & 0x30000) | (xpos << 24) | ((xpos & 0x100) << 15);
            return;
        }

        let dst = self.framebuffer_line(num, line, stride);

        // master brightness
        if dispmode != 0 {
            match master_bright >> 14 {
                1 => {
                    let mut factor = master_bright & 0x1F;
                    if factor > 16 {
                        factor = 16;
                    }
                    for value in dst.iter_mut() {
                        *value = color_brightness_up(*value, factor, 0x0);
                    }
                }
                2 => {
                    let mut factor = master_bright & 0x1F;
                    if factor > 16 {
                        factor = 16;
                    }
                    for value in dst.iter_mut() {
                        *value = color_brightness_down(*value, factor, 0xF);
                    }
                }
                _ => {}
            }
        }

        // convert to 32-bit BGRA; the 6-to-8 expansion replicates the top
        // two bits so full intensity maps to 255 exactly
        for value in dst.iter_mut() {
            let c = *value;
            let r = (c << 18) & 0xFC0000;
            let g = (c << 2) & 0x00FC00;
            let b = (c >> 14) & 0x0000FC;
            let c = r | g | b;
            *value = c | ((c & 0xC0C0C0) >> 6) | 0xFF000000;
        }
    }

    fn draw_scanline_bg_obj(&mut self, line: u32, unit: &mut Gpu2DRegisters, vram: &dyn VramView, accel: bool) {
        let num = unit.engine.num();

        // forced blank disables BG/OBJ compositing
        if unit.disp_cnt.forced_blank() {
            self.bg_obj_line[..DISPLAY_WIDTH].fill(0xFF3F3F3F);
            return;
        }

        let backdrop = utils::read_from_mem::<u16>(vram.palette(), unit.engine.palettes_offset()) as u32;
        let backdrop = rgb5_to_rgb6(backdrop & !0x8000) | FLAG_BACKDROP;
        self.bg_obj_line.fill(backdrop);

        if unit.disp_cnt.is_any_window_enabled() {
            unit.calculate_window_mask(&mut self.window_mask, &self.obj_window[num]);
        } else {
            self.window_mask.fill(0xFF);
        }

        self.apply_sprite_mosaic_x(unit);
        self.cur_bg_x_mosaic = &MOSAIC_TABLE[(unit.bg_mosaic_size[0] & 0xF) as usize];

        match u8::from(unit.disp_cnt.bg_mode()) {
            0 => self.draw_scanline_bg_mode::<0>(line, unit, vram, accel),
            1 => self.draw_scanline_bg_mode::<1>(line, unit, vram, accel),
            2 => self.draw_scanline_bg_mode::<2>(line, unit, vram, accel),
            3 => self.draw_scanline_bg_mode::<3>(line, unit, vram, accel),
            4 => self.draw_scanline_bg_mode::<4>(line, unit, vram, accel),
            5 => self.draw_scanline_bg_mode::<5>(line, unit, vram, accel),
            6 => self.draw_scanline_bg_mode_6(line, unit, vram, accel),
            _ => self.draw_scanline_bg_mode_7(line, unit, vram, accel),
        }

        // color special effects
        if !accel {
            for i in 0..DISPLAY_WIDTH {
                let val1 = self.bg_obj_line[i];
                let val2 = self.bg_obj_line[DISPLAY_WIDTH + i];
                let composited = self.color_composite(unit, i, val1, val2);
                self.bg_obj_line[i] = composited;
            }
        } else if num == 0 {
            self.composite_deferred_3d(unit);
        } else {
            for i in 0..DISPLAY_WIDTH {
                let val1 = self.bg_obj_line[i];
                let val2 = self.bg_obj_line[DISPLAY_WIDTH + i];
                let composited = self.color_composite(unit, i, val1, val2);
                self.bg_obj_line[i] = composited;
                self.bg_obj_line[DISPLAY_WIDTH + i] = 0;
                self.blend_3d_ctl[i] = Blend3DCtl::NONE;
            }
        }

        if unit.bg_mosaic_y >= unit.bg_mosaic_y_max {
            unit.bg_mosaic_y = 0;
            unit.bg_mosaic_y_max = unit.bg_mosaic_size[1] as u16;
        } else {
            unit.bg_mosaic_y += 1;
        }
    }

    fn draw_scanline_bg_mode<const BG_MODE: u8>(&mut self, line: u32, unit: &mut Gpu2DRegisters, vram: &dyn VramView, accel: bool) {
        let disp_cnt = u32::from(unit.disp_cnt);

        for priority in (0u8..4).rev() {
            if u8::from(unit.bg_cnt[3].priority()) == priority {
                if disp_cnt & 0x0800 != 0 {
                    if BG_MODE >= 3 {
                        self.draw_bg_extended(line, unit, vram, 3, accel);
                    } else if BG_MODE >= 1 {
                        self.draw_bg_affine(line, unit, vram, 3, accel);
                    } else {
                        self.draw_bg_text(line, unit, vram, 3, accel);
                    }
                }
            }
            if u8::from(unit.bg_cnt[2].priority()) == priority {
                if disp_cnt & 0x0400 != 0 {
                    if BG_MODE == 5 {
                        self.draw_bg_extended(line, unit, vram, 2, accel);
                    } else if BG_MODE == 4 || BG_MODE == 2 {
                        self.draw_bg_affine(line, unit, vram, 2, accel);
                    } else {
                        self.draw_bg_text(line, unit, vram, 2, accel);
                    }
                }
            }
            if u8::from(unit.bg_cnt[1].priority()) == priority {
                if disp_cnt & 0x0200 != 0 {
                    self.draw_bg_text(line, unit, vram, 1, accel);
                }
            }
            if u8::from(unit.bg_cnt[0].priority()) == priority {
                if disp_cnt & 0x0100 != 0 {
                    if unit.engine.num() == 0 && disp_cnt & 0x8 != 0 {
                        self.draw_bg_3d(accel);
                    } else {
                        self.draw_bg_text(line, unit, vram, 0, accel);
                    }
                }
            }
            if disp_cnt & 0x1000 != 0 && self.num_sprites[unit.engine.num()] != 0 {
                self.interleave_sprites(unit, vram, 0x40000 | ((priority as u32) << 16), accel);
            }
        }
    }

    fn draw_scanline_bg_mode_6(&mut self, line: u32, unit: &mut Gpu2DRegisters, vram: &dyn VramView, accel: bool) {
        let disp_cnt = u32::from(unit.disp_cnt);

        for priority in (0u8..4).rev() {
            if u8::from(unit.bg_cnt[2].priority()) == priority {
                if disp_cnt & 0x0400 != 0 {
                    self.draw_bg_large(line, unit, vram, accel);
                }
            }
            if u8::from(unit.bg_cnt[0].priority()) == priority {
                if disp_cnt & 0x0100 != 0 && unit.engine.num() == 0 && disp_cnt & 0x8 != 0 {
                    self.draw_bg_3d(accel);
                }
            }
            if disp_cnt & 0x1000 != 0 && self.num_sprites[unit.engine.num()] != 0 {
                self.interleave_sprites(unit, vram, 0x40000 | ((priority as u32) << 16), accel);
            }
        }
    }

    // mode 7 only has text-mode BG0 and BG1
    fn draw_scanline_bg_mode_7(&mut self, line: u32, unit: &mut Gpu2DRegisters, vram: &dyn VramView, accel: bool) {
        let disp_cnt = u32::from(unit.disp_cnt);

        for priority in (0u8..4).rev() {
            if u8::from(unit.bg_cnt[1].priority()) == priority {
                if disp_cnt & 0x0200 != 0 {
                    self.draw_bg_text(line, unit, vram, 1, accel);
                }
            }
            if u8::from(unit.bg_cnt[0].priority()) == priority {
                if disp_cnt & 0x0100 != 0 {
                    if unit.engine.num() == 0 && disp_cnt & 0x8 != 0 {
                        self.draw_bg_3d(accel);
                    } else {
                        self.draw_bg_text(line, unit, vram, 0, accel);
                    }
                }
            }
            if disp_cnt & 0x1000 != 0 && self.num_sprites[unit.engine.num()] != 0 {
                self.interleave_sprites(unit, vram, 0x40000 | ((priority as u32) << 16), accel);
            }
        }
    }

    pub(super) fn color_composite(&self, unit: &Gpu2DRegisters, i: usize, val1: u32, val2: u32) -> u32 {
        let mut coloreffect = 0;
        let mut eva = 0;
        let mut evb = 0;

        let flag1 = val1 >> 24;
        let flag2 = val2 >> 24;

        let blend_cnt = unit.bld_cnt as u32;

        let target2 = if flag2 & 0x80 != 0 {
            0x1000
        } else if flag2 & 0x40 != 0 {
            0x0100
        } else {
            flag2 << 8
        };

        if flag1 & 0x80 != 0 && blend_cnt & target2 != 0 {
            // sprite blending
            coloreffect = 1;

            if flag1 & 0x40 != 0 {
                eva = flag1 & 0x1F;
                evb = 16 - eva;
            } else {
                eva = unit.eva();
                evb = unit.evb();
            }
        } else if flag1 & 0x40 != 0 && blend_cnt & target2 != 0 {
            // 3D layer blending
            coloreffect = 4;
        } else {
            let flag1 = if flag1 & 0x80 != 0 {
                0x10
            } else if flag1 & 0x40 != 0 {
                0x01
            } else {
                flag1
            };

            if blend_cnt & flag1 != 0 && self.window_mask[i] & 0x20 != 0 {
                coloreffect = (blend_cnt >> 6) & 0x3;

                if coloreffect == 1 {
                    if blend_cnt & target2 != 0 {
                        eva = unit.eva();
                        evb = unit.evb();
                    } else {
                        coloreffect = 0;
                    }
                }
            }
        }

        match coloreffect {
            1 => color_blend4(val1, val2, eva, evb),
            2 => color_brightness_up(val1, unit.evy(), 0x8),
            3 => color_brightness_down(val1, unit.evy(), 0x7),
            4 => color_blend5(val1, val2),
            _ => val1,
        }
    }

    /// Unit A compositing when the 3D renderer is accelerated: the 3D color
    /// is unknown here, so columns involving a 3D candidate keep their two
    /// remaining candidates and a control record describing the residual
    /// blend for the GPU pass (or the capture replay) to resolve.
    fn composite_deferred_3d(&mut self, unit: &Gpu2DRegisters) {
        for i in 0..DISPLAY_WIDTH {
            let val1 = self.bg_obj_line[i];
            let val2 = self.bg_obj_line[DISPLAY_WIDTH + i];
            let val3 = self.bg_obj_line[DISPLAY_WIDTH * 2 + i];

            let flag1 = val1 >> 24;
            let flag2 = val2 >> 24;

            let blend_cnt = unit.bld_cnt as u32;
            let mut bldcnteffect = (blend_cnt >> 6) & 0x3;

            let target1 = if flag1 & 0x80 != 0 {
                0x0010
            } else if flag1 & 0x40 != 0 {
                0x0001
            } else {
                flag1
            };

            let target2 = if flag2 & 0x80 != 0 {
                0x1000
            } else if flag2 & 0x40 != 0 {
                0x0100
            } else {
                flag2 << 8
            };

            if flag1 & 0xC0 == 0x40 && blend_cnt & target2 != 0 {
                // 3D on top, blending
                let composited = self.color_composite(unit, i, val2, val3);
                self.bg_obj_line[i] = val2;
                self.bg_obj_line[DISPLAY_WIDTH + i] = composited;
                self.blend_3d_ctl[i] = Blend3DCtl {
                    mode: Blend3DCtl::MODE_3D_TOP_BLEND,
                    eva: 0,
                    evb: 0,
                    evy: 0,
                };
            } else if flag1 & 0xC0 == 0x40 {
                // 3D on top, normal/fade
                if bldcnteffect == 1 {
                    bldcnteffect = 0;
                }
                if blend_cnt & 0x0001 == 0 {
                    bldcnteffect = 0;
                }
                if self.window_mask[i] & 0x20 == 0 {
                    bldcnteffect = 0;
                }

                let composited = self.color_composite(unit, i, val2, val3);
                self.bg_obj_line[i] = val2;
                self.bg_obj_line[DISPLAY_WIDTH + i] = composited;
                self.blend_3d_ctl[i] = Blend3DCtl {
                    mode: bldcnteffect as u8,
                    eva: 0,
                    evb: 0,
                    evy: unit.evy() as u8,
                };
            } else if flag2 & 0xC0 == 0x40 && blend_cnt & 0x01C0 == 0x0140 {
                // 3D on bottom, blending; bitmap sprites with per-sprite
                // alpha and valid first targets blend, anything else is
                // demoted to no effect
                let mut mode = Blend3DCtl::MODE_3D_BOTTOM_BLEND;
                let blends = flag1 & 0xC0 == 0xC0
                    || (blend_cnt & target1 != 0 && self.window_mask[i] & 0x20 != 0)
                    || flag1 & 0xC0 == 0x80;
                if !blends {
                    mode = Blend3DCtl::MODE_NO_3D;
                }

                let composited = self.color_composite(unit, i, val1, val3);
                self.bg_obj_line[i] = val1;
                self.bg_obj_line[DISPLAY_WIDTH + i] = composited;
                self.blend_3d_ctl[i] = Blend3DCtl {
                    mode,
                    eva: unit.eva() as u8,
                    evb: unit.evb() as u8,
                    evy: 0,
                };
            } else {
                // no potential 3D pixel involved
                let composited = self.color_composite(unit, i, val1, val2);
                self.bg_obj_line[i] = composited;
                self.bg_obj_line[DISPLAY_WIDTH + i] = 0;
                self.blend_3d_ctl[i] = Blend3DCtl::NONE;
            }
        }
    }

    fn do_capture(&mut self, line: u32, width: u32, unit: &mut Gpu2DRegisters, vram: &mut dyn VramView, accel: bool) {
        let capture_cnt = unit.capture_cnt;
        let dst_bank = u8::from(capture_cnt.dst_bank()) as usize;

        // capture requires the destination bank to be mapped to LCDC,
        // like VRAM display mode
        if vram.lcdc_bank(dst_bank).is_none() {
            return;
        }

        let mut dstaddr = ((u8::from(capture_cnt.dst_offset()) as u32) << 14) + line * width;

        let src_a_is_3d = capture_cnt.src_a_3d();
        if !src_a_is_3d && accel {
            // compositing normally happens on the GPU in accelerated mode,
            // but capture needs the composited output here, so replay the
            // deferred blend on the CPU
            for i in 0..DISPLAY_WIDTH {
                let val1 = self.bg_obj_line[i];
                let val2 = self.bg_obj_line[DISPLAY_WIDTH + i];
                let ctl = self.blend_3d_ctl[i];

                let resolved = match ctl.mode {
                    Blend3DCtl::MODE_3D_TOP_BLEND => {
                        let val_3d = self.line_3d[i];
                        if val_3d >> 24 > 0 {
                            color_blend5(val_3d, val1)
                        } else {
                            val2
                        }
                    }
                    Blend3DCtl::MODE_3D_BOTTOM_BLEND => {
                        let val_3d = self.line_3d[i];
                        if val_3d >> 24 > 0 {
                            color_blend4(val1, val_3d, ctl.eva as u32, ctl.evb as u32)
                        } else {
                            val2
                        }
                    }
                    mode if mode <= 3 => {
                        let val_3d = self.line_3d[i];
                        if val_3d >> 24 > 0 {
                            match mode {
                                Blend3DCtl::MODE_3D_TOP_UP => color_brightness_up(val_3d, ctl.evy as u32, 0x8),
                                Blend3DCtl::MODE_3D_TOP_DOWN => color_brightness_down(val_3d, ctl.evy as u32, 0x7),
                                _ => val_3d,
                            }
                        } else {
                            val2
                        }
                    }
                    _ => val1,
                };

                self.bg_obj_line[i] = resolved;
            }
        }

        let mut src_b_line = [0u16; DISPLAY_WIDTH];
        let mut src_b_valid = false;

        if capture_cnt.src_b_fifo() {
            src_b_line.copy_from_slice(&unit.disp_fifo_buffer);
            src_b_valid = true;
        } else {
            let mut src_b_addr = line * 256;
            let src_bank = (u32::from(unit.disp_cnt) >> 18) & 0x3;
            if u8::from(unit.disp_cnt.display_mode()) != 2 {
                src_b_addr += (u8::from(capture_cnt.src_b_offset()) as u32) << 14;
            }
            if let Some(bank) = vram.lcdc_bank(src_bank as usize) {
                for (i, entry) in src_b_line.iter_mut().enumerate() {
                    let addr = ((src_b_addr + i as u32) & 0xFFFF) << 1;
                    *entry = utils::read_from_mem::<u16>(bank, addr);
                }
                src_b_valid = true;
            }
        }

        dstaddr &= 0xFFFF;

        vram.set_vram_dirty(dst_bank, (dstaddr as usize * 2) / VRAM_DIRTY_GRANULARITY);

        let src_a_line: &[u32; DISPLAY_WIDTH] = if src_a_is_3d { &self.line_3d } else {
            unsafe { &*(self.bg_obj_line.as_ptr() as *const [u32; DISPLAY_WIDTH]) }
        };

        let dst = match vram.lcdc_bank_mut(dst_bank) {
            Some(dst) => dst,
            None => return,
        };

        let write_dst = |dst: &mut [u8], addr: u32, value: u16| {
            utils::write_to_mem::<u16>(dst, (addr & 0xFFFF) << 1, value);
        };

        match u8::from(capture_cnt.combine()) {
            0 => {
                // source A only
                for i in 0..width {
                    let val = src_a_line[i as usize];

                    let r = (val >> 1) & 0x1F;
                    let g = (val >> 9) & 0x1F;
                    let b = (val >> 17) & 0x1F;
                    let a = if val >> 24 != 0 { 0x8000 } else { 0 };

                    write_dst(dst, dstaddr, (r | (g << 5) | (b << 10) | a) as u16);
                    dstaddr = (dstaddr + 1) & 0xFFFF;
                }
            }
            1 => {
                // source B only
                if src_b_valid {
                    for i in 0..width {
                        write_dst(dst, dstaddr, src_b_line[i as usize]);
                        dstaddr = (dstaddr + 1) & 0xFFFF;
                    }
                } else {
                    for _ in 0..width {
                        write_dst(dst, dstaddr, 0);
                        dstaddr = (dstaddr + 1) & 0xFFFF;
                    }
                }
            }
            _ => {
                // weighted A + B
                let mut eva = u8::from(capture_cnt.eva()) as u32;
                let mut evb = u8::from(capture_cnt.evb()) as u32;
                if eva > 16 {
                    eva = 16;
                }
                if evb > 16 {
                    evb = 16;
                }

                for i in 0..width {
                    let val = src_a_line[i as usize];

                    let r_a = (val >> 1) & 0x1F;
                    let g_a = (val >> 9) & 0x1F;
                    let b_a = (val >> 17) & 0x1F;
                    let a_a = if val >> 24 != 0 { 1 } else { 0 };

                    let (r_b, g_b, b_b, a_b) = if src_b_valid {
                        let val = src_b_line[i as usize] as u32;
                        (val & 0x1F, (val >> 5) & 0x1F, (val >> 10) & 0x1F, val >> 15)
                    } else {
                        (0, 0, 0, 0)
                    };

                    let mut r_d = ((r_a * a_a * eva) + (r_b * a_b * evb) + 8) >> 4;
                    let mut g_d = ((g_a * a_a * eva) + (g_b * a_b * evb) + 8) >> 4;
                    let mut b_d = ((b_a * a_a * eva) + (b_b * a_b * evb) + 8) >> 4;
                    let a_d = (if eva > 0 { a_a } else { 0 }) | (if evb > 0 { a_b } else { 0 });

                    if r_d > 0x1F {
                        r_d = 0x1F;
                    }
                    if g_d > 0x1F {
                        g_d = 0x1F;
                    }
                    if b_d > 0x1F {
                        b_d = 0x1F;
                    }

                    write_dst(dst, dstaddr, (r_d | (g_d << 5) | (b_d << 10) | (a_d << 15)) as u16);
                    dstaddr = (dstaddr + 1) & 0xFFFF;
                }
            }
        }
    }
}

impl Default for SoftRenderer2D {
    fn default() -> Self {
        SoftRenderer2D::new()
    }
}
