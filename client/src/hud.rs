//! 2D overlays drawn on top of the world framebuffer: HUD readouts, keys,
//! crosshair, minimap.

use glam::Vec2;

use chasm_core::map::MapDataPtr;

use crate::map_state::MapState;
use crate::minimap_state::MinimapState;
use crate::weapon_state::WeaponState;

const HUD_BACKGROUND_COLOR: u32 = 0xFF10_1018;
const HUD_TEXT_COLOR: u32 = 0xFFD0_D0C0;
const HUD_RED_COLOR: u32 = 0xFFE0_2020;
const MINIMAP_WALL_COLOR: u32 = 0xFF80_FF80;
const MINIMAP_PLAYER_COLOR: u32 = 0xFFFF_FFFF;

/// Readouts below these switch to the red variant.
const HEALTH_RED_THRESHOLD: u8 = 25;
const AMMO_RED_THRESHOLD: u8 = 5;

const KEY_COLORS: [u32; 3] = [0xFFFF_4040, 0xFF40_FF40, 0xFF40_40FF];

/// 3x5 digit glyphs, one bit per pixel, rows top to bottom.
const DIGIT_GLYPHS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111], // 0
    [0b010, 0b110, 0b010, 0b010, 0b111], // 1
    [0b111, 0b001, 0b111, 0b100, 0b111], // 2
    [0b111, 0b001, 0b111, 0b001, 0b111], // 3
    [0b101, 0b101, 0b111, 0b001, 0b001], // 4
    [0b111, 0b100, 0b111, 0b001, 0b111], // 5
    [0b111, 0b100, 0b111, 0b101, 0b111], // 6
    [0b111, 0b001, 0b010, 0b010, 0b010], // 7
    [0b111, 0b101, 0b111, 0b101, 0b111], // 8
    [0b111, 0b101, 0b111, 0b001, 0b111], // 9
];

/// Integer overlay scale from the viewport height, never below one.
pub fn menu_scale(viewport_height: i32) -> i32 {
    (viewport_height / 240).max(1)
}

pub fn fill_rect(
    buffer: &mut [u32],
    width: i32,
    height: i32,
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    color: u32,
) {
    for py in y.max(0)..(y + h).min(height) {
        for px in x.max(0)..(x + w).min(width) {
            buffer[(px + py * width) as usize] = color;
        }
    }
}

fn draw_digit(
    buffer: &mut [u32],
    width: i32,
    height: i32,
    x: i32,
    y: i32,
    scale: i32,
    digit: u8,
    color: u32,
) {
    let glyph = &DIGIT_GLYPHS[digit as usize % 10];
    for (row, bits) in glyph.iter().enumerate() {
        for col in 0..3 {
            if bits & (0b100 >> col) != 0 {
                fill_rect(
                    buffer,
                    width,
                    height,
                    x + col * scale,
                    y + row as i32 * scale,
                    scale,
                    scale,
                    color,
                );
            }
        }
    }
}

pub fn draw_number(
    buffer: &mut [u32],
    width: i32,
    height: i32,
    x: i32,
    y: i32,
    scale: i32,
    value: u32,
    color: u32,
) {
    let digits: Vec<u8> = {
        let mut v = value;
        let mut out = Vec::new();
        loop {
            out.push((v % 10) as u8);
            v /= 10;
            if v == 0 {
                break;
            }
        }
        out.reverse();
        out
    };
    for (i, digit) in digits.iter().enumerate() {
        draw_digit(
            buffer,
            width,
            height,
            x + i as i32 * 4 * scale,
            y,
            scale,
            *digit,
            color,
        );
    }
}

/// Additive-average crosshair: each covered pixel moves halfway to white.
fn draw_crosshair(buffer: &mut [u32], width: i32, height: i32) {
    let cx = width / 2;
    let cy = height / 2;
    for (dx, dy) in [(0, 0), (-2, 0), (2, 0), (0, -2), (0, 2)] {
        let x = cx + dx;
        let y = cy + dy;
        if x < 0 || y < 0 || x >= width || y >= height {
            continue;
        }
        let index = (x + y * width) as usize;
        let pixel = buffer[index];
        let avg = |channel: u32| (channel + 0xFF) / 2;
        buffer[index] = (pixel & 0xFF00_0000)
            | (avg((pixel >> 16) & 0xFF) << 16)
            | (avg((pixel >> 8) & 0xFF) << 8)
            | avg(pixel & 0xFF);
    }
}

pub fn draw_hud(
    buffer: &mut [u32],
    width: i32,
    height: i32,
    map_state: &MapState,
    weapon_state: &WeaponState,
) {
    let scale = menu_scale(height);
    let bar_height = 12 * scale;
    let bar_y = height - bar_height;

    fill_rect(buffer, width, height, 0, bar_y, width, bar_height, HUD_BACKGROUND_COLOR);

    let text_y = bar_y + 3 * scale;
    let state = &map_state.own_state;

    // Health, armor, current ammo, red below their thresholds.
    let health_color = if state.health < HEALTH_RED_THRESHOLD {
        HUD_RED_COLOR
    } else {
        HUD_TEXT_COLOR
    };
    draw_number(buffer, width, height, 4 * scale, text_y, scale, state.health as u32, health_color);

    draw_number(
        buffer,
        width,
        height,
        width / 4,
        text_y,
        scale,
        state.armor as u32,
        HUD_TEXT_COLOR,
    );

    let weapon_index = weapon_state.current_weapon_index() as usize;
    let ammo = state.ammo.get(weapon_index).copied().unwrap_or(0);
    let ammo_color = if ammo < AMMO_RED_THRESHOLD {
        HUD_RED_COLOR
    } else {
        HUD_TEXT_COLOR
    };
    draw_number(
        buffer,
        width,
        height,
        width - 20 * scale,
        text_y,
        scale,
        ammo as u32,
        ammo_color,
    );

    // Weapon icon slot.
    fill_rect(
        buffer,
        width,
        height,
        width / 2 - 6 * scale,
        text_y,
        12 * scale,
        6 * scale,
        HUD_TEXT_COLOR,
    );
    draw_number(
        buffer,
        width,
        height,
        width / 2 - 2 * scale,
        text_y,
        scale,
        weapon_index as u32,
        HUD_BACKGROUND_COLOR,
    );

    // Keys.
    for (bit, color) in KEY_COLORS.iter().enumerate() {
        if state.keys_mask & (1 << bit) != 0 {
            fill_rect(
                buffer,
                width,
                height,
                width / 2 + (10 + 5 * bit as i32) * scale,
                text_y,
                4 * scale,
                4 * scale,
                *color,
            );
        }
    }

    draw_crosshair(buffer, width, height);
}

fn draw_line(
    buffer: &mut [u32],
    width: i32,
    height: i32,
    mut x0: i32,
    mut y0: i32,
    x1: i32,
    y1: i32,
    color: u32,
) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x0 >= 0 && y0 >= 0 && x0 < width && y0 < height {
            buffer[(x0 + y0 * width) as usize] = color;
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Seen walls as lines in a corner box, centred on the player.
pub fn draw_minimap(
    buffer: &mut [u32],
    width: i32,
    height: i32,
    map_data: &MapDataPtr,
    minimap: &MinimapState,
    player_pos: Vec2,
) {
    let scale = menu_scale(height);
    let map_size = 40 * scale;
    let origin_x = width - map_size - 4 * scale;
    let origin_y = 4 * scale;
    let world_to_map = map_size as f32 / 32.0;

    let to_map = |p: Vec2| -> (i32, i32) {
        (
            origin_x + ((p.x - player_pos.x) * world_to_map) as i32 + map_size / 2,
            origin_y + ((player_pos.y - p.y) * world_to_map) as i32 + map_size / 2,
        )
    };

    for (index, wall) in map_data.static_walls.iter().enumerate() {
        if !minimap.static_wall_seen(index) {
            continue;
        }
        let (x0, y0) = to_map(wall.vert_pos[0]);
        let (x1, y1) = to_map(wall.vert_pos[1]);
        draw_line(buffer, width, height, x0, y0, x1, y1, MINIMAP_WALL_COLOR);
    }
    for (index, wall) in map_data.dynamic_walls.iter().enumerate() {
        if !minimap.dynamic_wall_seen(index) {
            continue;
        }
        let (x0, y0) = to_map(wall.vert_pos[0]);
        let (x1, y1) = to_map(wall.vert_pos[1]);
        draw_line(buffer, width, height, x0, y0, x1, y1, MINIMAP_WALL_COLOR);
    }

    let (px, py) = to_map(player_pos);
    fill_rect(buffer, width, height, px - 1, py - 1, 3, 3, MINIMAP_PLAYER_COLOR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chasm_core::resources::GameResourcesPtr;
    use chasm_core::test_fixtures::write_test_archive;
    use chasm_core::vfs::Vfs;
    use std::rc::Rc;

    fn resources() -> GameResourcesPtr {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_test_archive(&archive_path);
        let vfs = Rc::new(Vfs::open(&archive_path, &[]).unwrap());
        chasm_core::resources::load_game_resources(vfs).unwrap()
    }

    fn count_color(buffer: &[u32], color: u32) -> usize {
        buffer.iter().filter(|&&p| p == color).count()
    }

    #[test]
    fn scale_rounds_down_to_an_integer_and_never_zero() {
        assert_eq!(menu_scale(120), 1);
        assert_eq!(menu_scale(480), 2);
        assert_eq!(menu_scale(700), 2);
        assert_eq!(menu_scale(720), 3);
    }

    #[test]
    fn low_health_switches_to_the_red_variant() {
        let resources = resources();
        let weapon = WeaponState::new(Rc::clone(&resources));

        let mut map_state = MapState::new();
        map_state.own_state.health = 100;
        map_state.own_state.ammo[0] = 50;
        let mut buffer = vec![0u32; 320 * 200];
        draw_hud(&mut buffer, 320, 200, &map_state, &weapon);
        assert_eq!(count_color(&buffer, HUD_RED_COLOR), 0);

        map_state.own_state.health = 10;
        let mut buffer = vec![0u32; 320 * 200];
        draw_hud(&mut buffer, 320, 200, &map_state, &weapon);
        assert!(count_color(&buffer, HUD_RED_COLOR) > 0);
    }

    #[test]
    fn crosshair_averages_toward_white() {
        let resources = resources();
        let weapon = WeaponState::new(resources);
        let map_state = MapState::new();

        let mut buffer = vec![0xFF00_0000u32; 320 * 200];
        draw_hud(&mut buffer, 320, 200, &map_state, &weapon);
        let center = buffer[160 + 100 * 320];
        assert_eq!(center & 0x00FF_FFFF, 0x007F_7F7F);
    }

    #[test]
    fn keys_appear_with_their_mask_bits() {
        let resources = resources();
        let weapon = WeaponState::new(resources);
        let mut map_state = MapState::new();

        let mut buffer = vec![0u32; 320 * 200];
        draw_hud(&mut buffer, 320, 200, &map_state, &weapon);
        assert_eq!(count_color(&buffer, KEY_COLORS[0]), 0);

        map_state.own_state.keys_mask = 0b101; // red + blue
        let mut buffer = vec![0u32; 320 * 200];
        draw_hud(&mut buffer, 320, 200, &map_state, &weapon);
        assert!(count_color(&buffer, KEY_COLORS[0]) > 0);
        assert_eq!(count_color(&buffer, KEY_COLORS[1]), 0);
        assert!(count_color(&buffer, KEY_COLORS[2]) > 0);
    }
}
