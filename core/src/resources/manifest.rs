//! `CHASM.INF` manifest parsing.
//!
//! The manifest is plain text split into bracket-delimited sections, one
//! record per non-blank line, `;` starting a comment line. A row that fails to
//! parse truncates its section at the last good record. Radii and attack
//! ranges are stored in 1/256 world units and divided down on load.

pub const MAX_SOUND_VOLUME: u32 = 128;

pub const MAX_GLOBAL_SOUNDS: usize = 80;
pub const MAX_MAP_SOUNDS: usize = 40;
pub const MAX_AMBIENT_SOUNDS: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct ItemDescription {
    pub radius: f32,
    pub cast_shadow: bool,
    pub bmp_obj: u32,
    pub bmp_z: f32,
    pub a_code: u32,
    pub blow_up: u32,
    pub b_limit: u32,
    pub b_sfx: u32,
    pub sfx: u32,
    pub model_file_name: String,
    pub animation_file_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct MonsterDescription {
    pub model_file_name: String,
    pub w_radius: f32,
    pub attack_radius: f32,
    pub speed: f32,
    pub rotation_speed: f32,
    pub life: u32,
    pub kick: u32,
    pub rock: u32,
    pub sep_limit: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SpriteEffectDescription {
    pub glass: bool,
    pub half_size: bool,
    pub smoking: bool,
    pub looped: bool,
    pub gravity: bool,
    pub jump: bool,
    pub light_on: bool,
    pub sprite_file_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct BmpObjectDescription {
    pub light: bool,
    pub glass: bool,
    pub half_size: bool,
    pub sprite_file_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct WeaponDescription {
    pub model_file_name: String,
    pub animation_file_name: String,
    pub reloading_animation_file_name: String,
    /// Rocket type spawned on fire.
    pub r_type: u32,
    /// Reload time in 1/128 seconds.
    pub reloading_time: u32,
    pub y_sh: f32,
    pub r_z0: f32,
    /// Ammo consumed per pickup unit.
    pub d_am: u32,
    /// Ammo limit.
    pub limit: u32,
    /// Starting ammo.
    pub start: u32,
    /// Rockets per shot.
    pub r_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RocketDescription {
    pub model_file_name: String,
    pub animation_file_name: String,
    pub blow_effect: u32,
    pub gravity_force: f32,
    pub explosion_radius: f32,
    pub cr_d: u32,
    pub power: u32,
    pub reflect: bool,
    pub fullbright: bool,
    pub light: bool,
    pub auto_aim: bool,
    pub auto_aim2: bool,
    pub fast: bool,
    pub smoke_trail_effect_id: u32,
}

#[derive(Debug, Clone, Default)]
pub struct GibDescription {
    pub model_file_name: String,
    pub sound_number: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SoundDescription {
    pub file_name: String,
    pub volume: u32,
}

/// Lines of a section body, the header line itself skipped.
fn section_lines<'a>(text: &'a str, header: &str) -> Option<impl Iterator<Item = &'a str>> {
    let start = text.find(header)?;
    Some(text[start..].lines().skip(1))
}

/// Records of a counted section: first non-blank line is the record count,
/// `;` lines are skipped.
fn counted_records<'a>(
    text: &'a str,
    header: &str,
) -> Option<(usize, impl Iterator<Item = &'a str>)> {
    let mut lines = section_lines(text, header)?;
    let count: usize = loop {
        let line = lines.next()?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }
        break trimmed.split_whitespace().next()?.parse().ok()?;
    };
    Some((count, lines.filter(|l| !l.trim_start().starts_with(';'))))
}

struct Fields<'a> {
    iter: std::str::SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn of(line: &'a str) -> Self {
        Fields {
            iter: line.split_whitespace(),
        }
    }

    fn token(&mut self) -> Option<&'a str> {
        self.iter.next()
    }

    fn int(&mut self) -> Option<u32> {
        self.iter.next()?.parse().ok()
    }

    fn float(&mut self) -> Option<f32> {
        self.iter.next()?.parse().ok()
    }

    fn flag(&mut self) -> Option<bool> {
        self.int().map(|v| v != 0)
    }
}

macro_rules! parse_or_truncate {
    ($out:expr, $section:expr, $parsed:expr) => {
        match $parsed {
            Some(record) => $out.push(record),
            None => {
                log::warn!("bad record in {} section, list truncated", $section);
                break;
            }
        }
    };
}

pub fn load_items_description(inf: &str) -> Vec<ItemDescription> {
    let mut out = Vec::new();
    let Some((count, mut lines)) = counted_records(inf, "[3D_OBJECTS]") else {
        log::warn!("no [3D_OBJECTS] section in manifest");
        return out;
    };

    while out.len() < count {
        let Some(line) = lines.next() else { break };
        if line.trim().is_empty() {
            continue;
        }
        let mut f = Fields::of(line);
        parse_or_truncate!(
            out,
            "[3D_OBJECTS]",
            (|| {
                Some(ItemDescription {
                    radius: f.float()? / 256.0,
                    cast_shadow: f.flag()?,
                    bmp_obj: f.int()?,
                    bmp_z: f.float()?,
                    a_code: f.int()?,
                    blow_up: f.int()?,
                    b_limit: f.int()?,
                    b_sfx: f.int()?,
                    sfx: f.int()?,
                    model_file_name: f.token()?.to_string(),
                    animation_file_name: f.token().unwrap_or("").to_string(),
                })
            })()
        );
    }
    out
}

pub fn load_monsters_description(inf: &str) -> Vec<MonsterDescription> {
    let mut out = Vec::new();
    let Some((count, mut lines)) = counted_records(inf, "[MONSTERS]") else {
        log::warn!("no [MONSTERS] section in manifest");
        return out;
    };

    while out.len() < count {
        let Some(line) = lines.next() else { break };
        if line.trim().is_empty() {
            continue;
        }
        let mut f = Fields::of(line);
        parse_or_truncate!(
            out,
            "[MONSTERS]",
            (|| {
                Some(MonsterDescription {
                    model_file_name: f.token()?.to_string(),
                    w_radius: f.float()? / 256.0,
                    attack_radius: f.float()? / 256.0,
                    speed: f.float()?,
                    rotation_speed: f.float()?,
                    life: f.int()?,
                    kick: f.int()?,
                    rock: f.int()?,
                    sep_limit: f.int()?,
                })
            })()
        );
    }
    out
}

pub fn load_sprite_effects_description(inf: &str) -> Vec<SpriteEffectDescription> {
    let mut out = Vec::new();
    let Some((count, mut lines)) = counted_records(inf, "[BLOWS]") else {
        log::warn!("no [BLOWS] section in manifest");
        return out;
    };

    while out.len() < count {
        let Some(line) = lines.next() else { break };
        if line.trim().is_empty() {
            continue;
        }
        let mut f = Fields::of(line);
        parse_or_truncate!(
            out,
            "[BLOWS]",
            (|| {
                Some(SpriteEffectDescription {
                    glass: f.flag()?,
                    half_size: f.flag()?,
                    smoking: f.flag()?,
                    looped: f.flag()?,
                    gravity: f.flag()?,
                    jump: f.flag()?,
                    light_on: f.flag()?,
                    sprite_file_name: f.token()?.to_string(),
                })
            })()
        );
    }
    out
}

pub fn load_bmp_objects_description(inf: &str) -> Vec<BmpObjectDescription> {
    let mut out = Vec::new();
    let Some((count, mut lines)) = counted_records(inf, "[BMP_OBJECTS]") else {
        log::warn!("no [BMP_OBJECTS] section in manifest");
        return out;
    };

    while out.len() < count {
        let Some(line) = lines.next() else { break };
        if line.trim().is_empty() {
            continue;
        }
        let mut f = Fields::of(line);
        parse_or_truncate!(
            out,
            "[BMP_OBJECTS]",
            (|| {
                let light = f.flag()?;
                let glass = f.flag()?;
                let half_size = f.flag()?;
                // Three reserved zero fields.
                f.int()?;
                f.int()?;
                f.int()?;
                Some(BmpObjectDescription {
                    light,
                    glass,
                    half_size,
                    sprite_file_name: f.token()?.to_string(),
                })
            })()
        );
    }
    out
}

/// A `NAME = value` line; the separator may carry spaces on both sides.
fn parse_assignment(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once('=')?;
    Some((name.trim(), value.trim().split_whitespace().next().unwrap_or("")))
}

fn next_content_line<'a>(lines: &mut impl Iterator<Item = &'a str>) -> Option<&'a str> {
    lines.find(|l| !l.trim().is_empty())
}

pub fn load_weapons_description(inf: &str) -> Vec<WeaponDescription> {
    let mut out = Vec::new();
    let Some((count, mut lines)) = counted_records(inf, "[WEAPONS]") else {
        log::warn!("no [WEAPONS] section in manifest");
        return out;
    };

    'weapons: while out.len() < count {
        let mut description = WeaponDescription::default();

        for _ in 0..3 {
            let Some(line) = next_content_line(&mut lines) else {
                break 'weapons;
            };
            let Some((name, value)) = parse_assignment(line) else {
                log::warn!("bad record in [WEAPONS] section, list truncated");
                break 'weapons;
            };
            match name {
                "MODEL" => description.model_file_name = value.to_string(),
                "STAT" => description.animation_file_name = value.to_string(),
                "SHOOT" => description.reloading_animation_file_name = value.to_string(),
                _ => {}
            }
        }

        let Some(line) = next_content_line(&mut lines) else {
            break;
        };
        let mut f = Fields::of(line);
        let parsed = (|| {
            description.r_type = f.int()?;
            description.reloading_time = f.int()?;
            description.y_sh = f.float()?;
            description.r_z0 = f.float()?;
            description.d_am = f.int()?;
            description.limit = f.int()?;
            description.start = f.int()?;
            description.r_count = f.int()?;
            Some(description)
        })();
        parse_or_truncate!(out, "[WEAPONS]", parsed);
    }
    out
}

pub fn load_rockets_description(inf: &str) -> Vec<RocketDescription> {
    let mut out = Vec::new();
    let Some((count, mut lines)) = counted_records(inf, "[ROCKETS]") else {
        log::warn!("no [ROCKETS] section in manifest");
        return out;
    };
    'rockets: while out.len() < count {
        let mut description = RocketDescription::default();

        for _ in 0..2 {
            let Some(line) = next_content_line(&mut lines) else {
                break 'rockets;
            };
            if let Some((name, value)) = parse_assignment(line) {
                if value.starts_with(';') || value.is_empty() {
                    continue;
                }
                match name {
                    "3d_MODEL" => description.model_file_name = value.to_string(),
                    "ANIMATION" => description.animation_file_name = value.to_string(),
                    _ => {}
                }
            }
        }

        let Some(line) = next_content_line(&mut lines) else {
            break;
        };
        let mut f = Fields::of(line);
        let parsed = (|| {
            description.blow_effect = f.int()?;
            description.gravity_force = f.float()?;
            description.explosion_radius = f.float()? / 256.0;
            description.cr_d = f.int()?;
            description.power = f.int()?;
            description.reflect = f.flag()?;
            description.fullbright = f.flag()?;
            description.light = f.flag()?;
            description.auto_aim = f.flag()?;
            description.auto_aim2 = f.flag()?;
            description.fast = f.flag()?;
            description.smoke_trail_effect_id = f.int()?;
            Some(description)
        })();
        parse_or_truncate!(out, "[ROCKETS]", parsed);
    }
    out
}

/// `N : = FILE.3O s:12` records, closed by `#end`.
pub fn load_gibs_description(inf: &str) -> Vec<GibDescription> {
    let mut out = Vec::new();
    let Some(lines) = section_lines(inf, "[GIBS]") else {
        log::warn!("no [GIBS] section in manifest");
        return out;
    };

    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with("#end") {
            break;
        }
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }

        let Some((_, value)) = trimmed.split_once('=') else {
            continue;
        };
        let mut f = Fields::of(value);
        let Some(file_name) = f.token() else { continue };

        let mut gib = GibDescription {
            model_file_name: file_name.to_string(),
            sound_number: 0,
        };
        if let Some(sound) = f.token() {
            if let Some(number) = sound.strip_prefix("s:") {
                gib.sound_number = number.parse().unwrap_or(0);
            }
        }
        out.push(gib);
    }
    out
}

/// `NN : = FILE.WAV v:100` records into a numbered table. Used for the global
/// `[SOUNDS]` block and the per-map `#newsounds` / `#ambients` overrides.
fn load_sounds_from_lines<'a>(
    lines: impl Iterator<Item = &'a str>,
    end_marker: &str,
    first_sound: usize,
    out_sounds: &mut [SoundDescription],
) {
    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with(end_marker) {
            break;
        }
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }

        let Some((number_part, value)) = trimmed.split_once(':') else {
            continue;
        };
        let Some(number) = number_part.trim().parse::<usize>().ok() else {
            continue;
        };
        let Some(slot) = number
            .checked_sub(first_sound)
            .and_then(|i| out_sounds.get_mut(i))
        else {
            continue;
        };

        let Some((_, value)) = value.split_once('=') else {
            continue;
        };
        let mut f = Fields::of(value);
        let Some(file_name) = f.token() else { continue };

        slot.file_name = file_name.replace('\\', "/");
        slot.volume = MAX_SOUND_VOLUME;
        if let Some(v) = f.token() {
            if let Some(volume) = v.strip_prefix("v:").or_else(|| v.strip_prefix("V:")) {
                slot.volume = volume.parse().unwrap_or(MAX_SOUND_VOLUME);
            }
        }
    }
}

pub fn load_sounds_description(inf: &str) -> Vec<SoundDescription> {
    let mut out = vec![SoundDescription::default(); MAX_GLOBAL_SOUNDS];
    match section_lines(inf, "[SOUNDS]") {
        Some(lines) => load_sounds_from_lines(lines, "[SOUNDS_END]", 0, &mut out),
        None => log::warn!("no [SOUNDS] section in manifest"),
    }
    out
}

/// Per-map sound overrides (`#newsounds .. #end`), numbered from the end of
/// the global table.
pub fn load_map_sounds_description(map_resources: &str) -> Vec<SoundDescription> {
    let mut out = vec![SoundDescription::default(); MAX_MAP_SOUNDS];
    if let Some(lines) = section_lines(map_resources, "#newsounds") {
        load_sounds_from_lines(lines, "#end", MAX_GLOBAL_SOUNDS, &mut out);
    }
    out
}

/// Per-map ambient loops (`#ambients .. #end`), numbered from zero.
pub fn load_ambient_sounds_description(map_resources: &str) -> Vec<SoundDescription> {
    let mut out = vec![SoundDescription::default(); MAX_AMBIENT_SOUNDS];
    if let Some(lines) = section_lines(map_resources, "#ambients") {
        load_sounds_from_lines(lines, "#end", 0, &mut out);
    }
    out
}
